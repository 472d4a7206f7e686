//! Bitfield layouts for the structured DM registers (spec §4.4, §6 "Debug
//! Module memory layout"). Plain storage-only registers (`data0..11`,
//! `command`, `progbuf0..15`, `abstractauto`, `nextdm`, `haltsum0`,
//! `sbaddress0..1`, `sbdata0..1`) carry no sub-fields the register file
//! needs to interpret structurally and live directly in the DM's register
//! image instead.
//!
//! Field layouts are grounded on the `bitfield!` usage in
//! `probe-rs/src/architecture/riscv/mod.rs` (`Dmcontrol`, `Dmstatus`,
//! `Abstractcs`, `Hartinfo`, `Dcsr`, `Sbcs` there decode the exact same
//! RISC-V External Debug Spec v0.13.x register layout from the debugger
//! side; this module produces the values those decode).

use bitfield::bitfield;

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Dmcontrol(u32);
    impl Debug;
    pub haltreq, set_haltreq: 31;
    pub resumereq, set_resumereq: 30;
    pub hartreset, set_hartreset: 29;
    pub ackhavereset, set_ackhavereset: 28;
    pub hasel, set_hasel: 26;
    pub hartsello, set_hartsello: 25, 16;
    pub hartselhi, set_hartselhi: 15, 6;
    pub setresethaltreq, set_setresethaltreq: 3;
    pub clrresethaltreq, set_clrresethaltreq: 2;
    pub ndmreset, set_ndmreset: 1;
    pub dmactive, set_dmactive: 0;
}

impl Dmcontrol {
    /// Combined 20-bit hart index (spec §4.4: "Only one hart selectable").
    pub fn hartsel(&self) -> u32 {
        ((self.hartselhi() as u32) << 10) | self.hartsello() as u32
    }

    pub fn set_hartsel(&mut self, value: u32) {
        self.set_hartsello((value & 0x3ff) as u16);
        self.set_hartselhi(((value >> 10) & 0x3ff) as u16);
    }
}

impl From<u32> for Dmcontrol {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dmcontrol> for u32 {
    fn from(register: Dmcontrol) -> Self {
        register.0
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Dmstatus(u32);
    impl Debug;
    pub impebreak, set_impebreak: 22;
    pub allhavereset, set_allhavereset: 19;
    pub anyhavereset, set_anyhavereset: 18;
    pub allresumeack, set_allresumeack: 17;
    pub anyresumeack, set_anyresumeack: 16;
    pub allnonexistent, set_allnonexistent: 15;
    pub anynonexistent, set_anynonexistent: 14;
    pub allunavail, set_allunavail: 13;
    pub anyunavail, set_anyunavail: 12;
    pub allrunning, set_allrunning: 11;
    pub anyrunning, set_anyrunning: 10;
    pub allhalted, set_allhalted: 9;
    pub anyhalted, set_anyhalted: 8;
    pub authenticated, set_authenticated: 7;
    pub authbusy, set_authbusy: 6;
    pub hasresethaltreq, set_hasresethaltreq: 5;
    pub confstrptrvalid, set_confstrptrvalid: 4;
    pub version, set_version: 3, 0;
}

/// `dmstatus.version` value for RISC-V External Debug Spec v0.13.x.
pub const DMSTATUS_VERSION_0_13: u8 = 2;

impl From<u32> for Dmstatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dmstatus> for u32 {
    fn from(register: Dmstatus) -> Self {
        register.0
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Hartinfo(u32);
    impl Debug;
    pub nscratch, set_nscratch: 23, 20;
    pub dataaccess, set_dataaccess: 16;
    pub datasize, set_datasize: 11, 6;
    pub dataaddr, set_dataaddr: 5, 0;
}

impl From<u32> for Hartinfo {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Hartinfo> for u32 {
    fn from(register: Hartinfo) -> Self {
        register.0
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Abstractcs(u32);
    impl Debug;
    pub progbufsize, set_progbufsize: 28, 24;
    pub busy, set_busy: 12;
    pub cmderr, set_cmderr: 10, 8;
    pub datacount, set_datacount: 3, 0;
}

impl From<u32> for Abstractcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Abstractcs> for u32 {
    fn from(register: Abstractcs) -> Self {
        register.0
    }
}

/// Values of `abstractcs.cmderr` (spec §7 "Command errors"); sticky until a
/// write-1-to-clear hits any of the three `cmderr` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdErr {
    None = 0,
    Busy = 1,
    NotSupported = 2,
    Exception = 3,
    HaltResume = 4,
    Bus = 5,
    Other = 7,
}

impl CmdErr {
    pub fn bits(self) -> u8 {
        self as u8
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Dcsr(u32);
    impl Debug;
    pub xdebugver, set_xdebugver: 31, 28;
    pub ebreakm, set_ebreakm: 15;
    pub ebreaks, set_ebreaks: 13;
    pub ebreaku, set_ebreaku: 12;
    pub stepie, set_stepie: 11;
    pub stopcount, set_stopcount: 10;
    pub stoptime, set_stoptime: 9;
    pub cause, set_cause: 8, 6;
    pub mprven, set_mprven: 4;
    pub nmip, set_nmip: 3;
    pub step, set_step: 2;
    pub prv, set_prv: 1, 0;
}

impl From<u32> for Dcsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dcsr> for u32 {
    fn from(register: Dcsr) -> Self {
        register.0
    }
}

/// `dcsr.xdebugver` for a hart implementing RISC-V External Debug v0.13.x
/// (spec §4.8).
pub const XDEBUGVER_0_13: u8 = 4;

/// `dcsr.cause` enumeration (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCause {
    None = 0,
    Ebreak = 1,
    Breakpoint = 2,
    Haltreq = 3,
    Step = 4,
    Resethaltreq = 5,
}

impl DebugCause {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits {
            1 => DebugCause::Ebreak,
            2 => DebugCause::Breakpoint,
            3 => DebugCause::Haltreq,
            4 => DebugCause::Step,
            5 => DebugCause::Resethaltreq,
            _ => DebugCause::None,
        }
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Sbcs(u32);
    impl Debug;
    pub sbversion, set_sbversion: 31, 29;
    pub sbbusyerror, set_sbbusyerror: 22;
    pub sbbusy, set_sbbusy: 21;
    pub sbreadonaddr, set_sbreadonaddr: 20;
    pub sbaccess, set_sbaccess: 19, 17;
    pub sbautoincrement, set_sbautoincrement: 16;
    pub sbreadondata, set_sbreadondata: 15;
    pub sberror, set_sberror: 14, 12;
    pub sbasize, set_sbasize: 11, 5;
    pub sbaccess128, set_sbaccess128: 4;
    pub sbaccess64, set_sbaccess64: 3;
    pub sbaccess32, set_sbaccess32: 2;
    pub sbaccess16, set_sbaccess16: 1;
    pub sbaccess8, set_sbaccess8: 0;
}

impl From<u32> for Sbcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Sbcs> for u32 {
    fn from(register: Sbcs) -> Self {
        register.0
    }
}

/// Values of `sbcs.sberror` (spec §7 "SBA errors"); write-1-to-clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbError {
    None = 0,
    Timeout = 1,
    Badaddr = 2,
    Badalign = 3,
    Asize = 4,
    Other = 7,
}

impl SbError {
    pub fn bits(self) -> u8 {
        self as u8
    }
}
