//! Debug Module register file (spec §4.4, §6 "Debug Module memory layout").
//!
//! Owns the 128-entry register image, the hart array, the abstract-command
//! engine, the park loop's memory contract, and system-bus access; dispatches
//! DMI reads/writes per address and implements the sticky/auto-exec rules
//! spec §4.4 describes. Grounded on `probe-rs`'s
//! `RiscvCommunicationInterface`/`Riscv32` register-accessor methods
//! (`communication_interface.rs`), mirrored from the polling host side to the
//! authoritative target side.

pub mod abstract_cmd;
pub mod assembly;
pub mod park_loop;
pub mod registers;
pub mod sbus;

use std::collections::HashMap;

use crate::address_space::{AddressSpace, MemTxAttrs};
use crate::dtm::{DmDevice, DmiStatus};
use crate::error::ConfigError;
use crate::hart::Hart;

use abstract_cmd::{AbstractCommandConfig, AbstractCommandEngine, Command, ExecOutcome};
use registers::{Abstractcs, CmdErr, Dcsr, Dmcontrol, Dmstatus, Hartinfo, Sbcs};
use sbus::SystemBusAccess;

mod addr {
    pub const DATA0: u32 = 0x04;
    pub const DMCONTROL: u32 = 0x10;
    pub const DMSTATUS: u32 = 0x11;
    pub const HARTINFO: u32 = 0x12;
    pub const ABSTRACTCS: u32 = 0x16;
    pub const COMMAND: u32 = 0x17;
    pub const ABSTRACTAUTO: u32 = 0x18;
    pub const NEXTDM: u32 = 0x1d;
    pub const PROGBUF0: u32 = 0x20;
    pub const SBCS: u32 = 0x38;
    pub const SBADDRESS0: u32 = 0x39;
    pub const SBADDRESS1: u32 = 0x3a;
    pub const SBDATA0: u32 = 0x3c;
    pub const SBDATA1: u32 = 0x3d;
    pub const HALTSUM0: u32 = 0x40;
}

/// Realize-time configuration for one [`DebugModule`] (spec §3
/// "Configuration", §6 "Properties").
#[derive(Debug, Clone, Copy)]
pub struct DebugModuleConfig {
    pub nscratch: u8,
    pub progbuf_count: u8,
    pub data_count: u8,
    pub abstractcmd_count: u32,
    pub dm_phyaddr: u32,
    pub rom_phyaddr: u32,
    pub whereto_phyaddr: u32,
    pub data_phyaddr: u32,
    pub progbuf_phyaddr: u32,
    pub abstractcmd_phyaddr: u32,
    pub sysbus_access: bool,
    pub sbasize: u8,
    pub xlen64: bool,
    pub max_size: u8,
    pub nextdm: u32,
}

impl DebugModuleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=12).contains(&self.data_count) {
            return Err(ConfigError::InvalidDataCount(self.data_count));
        }
        if self.progbuf_count > 16 {
            return Err(ConfigError::InvalidProgbufCount(self.progbuf_count));
        }
        if self.nscratch != 1 && self.nscratch != 2 {
            return Err(ConfigError::InvalidNscratch(self.nscratch));
        }
        Ok(())
    }
}

/// One DMI-addressable register's persisted value, plus whether it's a
/// computed read-only register that ignores the stored slot (spec §4.4:
/// "Any read/write that succeeded also persists the value into the register
/// file").
struct RegisterFile {
    storage: HashMap<u32, u32>,
}

impl RegisterFile {
    fn new() -> Self {
        Self { storage: HashMap::new() }
    }

    fn get(&self, addr: u32) -> u32 {
        *self.storage.get(&addr).unwrap_or(&0)
    }

    fn set(&mut self, addr: u32, value: u32) {
        self.storage.insert(addr, value);
    }
}

/// The RISC-V External Debug Spec v0.13.x Debug Module (spec §2 component D,
/// §4.4-§4.8). Implements [`DmDevice`] for registration with a
/// [`crate::dtm::Dtm`].
pub struct DebugModule {
    cfg: DebugModuleConfig,
    regs: RegisterFile,
    dmactive: bool,
    dmcontrol_hartsel: u32,
    abstractauto: u32,
    harts: Vec<Hart>,
    nonexistent: Vec<bool>,
    unavailable: Vec<bool>,
    abstract_cmd: AbstractCommandEngine,
    sbus: SystemBusAccess,
    mem: Box<dyn AddressSpace>,
    /// Latched on `dmcontrol.ndmreset` (spec §4.4 field `ndmreset`), mirrors
    /// [`crate::tap::Tap::system_reset_requested`]'s sticky-flag-drained-by-
    /// the-embedder pattern for the DM's own system-reset-request field.
    system_reset_requested: bool,
}

impl DebugModule {
    /// Construct a DM over `harts` (index = hart id) and an injected address
    /// space for `data*`/`progbuf*`/SBA traffic (spec §9 "Address-space
    /// abstraction").
    pub fn new(
        cfg: DebugModuleConfig,
        harts: Vec<Hart>,
        mem: Box<dyn AddressSpace>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let n = harts.len();
        let mut regs = RegisterFile::new();
        regs.set(addr::NEXTDM, cfg.nextdm);
        Ok(Self {
            sbus: SystemBusAccess::new(cfg.xlen64, cfg.sbasize),
            cfg,
            regs,
            dmactive: false,
            dmcontrol_hartsel: 0,
            abstractauto: 0,
            harts,
            nonexistent: vec![false; n],
            unavailable: vec![false; n],
            abstract_cmd: AbstractCommandEngine::new(),
            mem,
            system_reset_requested: false,
        })
    }

    fn abstract_cmd_cfg(&self) -> AbstractCommandConfig {
        AbstractCommandConfig {
            dm_phyaddr: self.cfg.dm_phyaddr,
            data_phyaddr: self.cfg.data_phyaddr,
            progbuf_phyaddr: self.cfg.progbuf_phyaddr,
            whereto_phyaddr: self.cfg.whereto_phyaddr,
            abstractcmd_phyaddr: self.cfg.abstractcmd_phyaddr,
            abstractcmd_count: self.cfg.abstractcmd_count,
            nscratch: self.cfg.nscratch,
            max_size: self.cfg.max_size,
        }
    }

    fn selected_hart_index(&self) -> Option<usize> {
        let idx = self.dmcontrol_hartsel as usize;
        if idx < self.harts.len() && !self.nonexistent[idx] {
            Some(idx)
        } else {
            None
        }
    }

    fn selected_hart_mut(&mut self) -> Option<&mut Hart> {
        let idx = self.selected_hart_index()?;
        Some(&mut self.harts[idx])
    }

    /// The park-loop ROM wrote `HALTED` for `hart_id` (spec §4.5/§4.6 ack
    /// wiring). An embedder calls this from the vCPU worker's trap handler.
    pub fn ack_halted(&mut self, hart_id: u32) {
        if let Some(hart) = self.harts.iter_mut().find(|h| h.id() == hart_id) {
            hart.ack_halted();
        }
        if self.abstract_cmd.busy() {
            if let Some(idx) = self.selected_hart_index() {
                if self.harts[idx].id() == hart_id {
                    let hart = &mut self.harts[idx];
                    self.abstract_cmd.ack_halted(hart);
                }
            }
        }
    }

    /// The park-loop ROM wrote `GOING` for the in-flight hart.
    pub fn ack_going(&mut self) {
        self.abstract_cmd.ack_going();
    }

    /// The park-loop ROM wrote `RESUMING` for `hart_id`.
    pub fn ack_resuming(&mut self, hart_id: u32) {
        if let Some(hart) = self.harts.iter_mut().find(|h| h.id() == hart_id) {
            hart.ack_resuming();
        }
    }

    /// The park-loop ROM wrote `EXCEPTION` for the in-flight hart.
    pub fn ack_exception(&mut self) {
        if let Some(idx) = self.selected_hart_index() {
            let hart = &mut self.harts[idx];
            self.abstract_cmd.ack_exception(hart);
        }
    }

    fn compute_dmstatus(&self) -> u32 {
        let existing: Vec<usize> = (0..self.harts.len())
            .filter(|&i| !self.nonexistent[i])
            .collect();

        let mut d = Dmstatus::from(0u32);
        d.set_version(registers::DMSTATUS_VERSION_0_13);
        d.set_authenticated(true);
        if existing.is_empty() {
            d.set_allnonexistent(true);
            d.set_anynonexistent(true);
            return u32::from(d);
        }

        let all = |pred: &dyn Fn(usize) -> bool| existing.iter().all(|&i| pred(i));
        let any = |pred: &dyn Fn(usize) -> bool| existing.iter().any(|&i| pred(i));

        let halted = |i: usize| self.harts[i].halted();
        let running = |i: usize| !self.harts[i].halted();
        let unavail = |i: usize| self.unavailable[i];
        let resumeack = |i: usize| self.harts[i].resumed();
        let havereset = |i: usize| self.harts[i].have_reset();

        d.set_allhalted(all(&halted));
        d.set_anyhalted(any(&halted));
        d.set_allrunning(all(&running));
        d.set_anyrunning(any(&running));
        d.set_allunavail(all(&unavail));
        d.set_anyunavail(any(&unavail));
        d.set_allresumeack(all(&resumeack));
        d.set_anyresumeack(any(&resumeack));
        d.set_allhavereset(all(&havereset));
        d.set_anyhavereset(any(&havereset));
        u32::from(d)
    }

    fn compute_hartinfo(&self) -> u32 {
        let mut h = Hartinfo::from(0u32);
        h.set_nscratch(self.cfg.nscratch);
        h.set_dataaccess(self.cfg.data_phyaddr != 0);
        h.set_datasize(self.cfg.data_count);
        u32::from(h)
    }

    fn compute_haltsum0(&self) -> u32 {
        let mut bitmap = 0u32;
        for (i, hart) in self.harts.iter().enumerate() {
            if i < 32 && hart.halted() {
                bitmap |= 1 << i;
            }
        }
        bitmap
    }

    fn write_dmcontrol(&mut self, value: u32) {
        let incoming = Dmcontrol::from(value);

        if !incoming.dmactive() {
            if self.dmactive {
                tracing::debug!("DM: dmactive 1->0, resetting DM state");
                self.reset_dm_state();
            }
            self.dmactive = false;
            return;
        }
        if !self.dmactive {
            self.dmactive = true;
            tracing::debug!("DM: dmactive 0->1");
        }

        self.dmcontrol_hartsel = incoming.hartsel();
        if self.selected_hart_index().is_none()
            && (self.dmcontrol_hartsel as usize) < self.nonexistent.len()
        {
            self.nonexistent[self.dmcontrol_hartsel as usize] = true;
        }

        if incoming.ndmreset() {
            self.system_reset_requested = true;
            tracing::info!("DM: ndmreset requested (system reset)");
        }

        if incoming.hartreset() {
            if let Some(hart) = self.selected_hart_mut() {
                hart.request_reset(true);
            }
        } else if let Some(hart) = self.selected_hart_mut() {
            hart.request_reset(false);
        }

        if incoming.ackhavereset() {
            if let Some(hart) = self.selected_hart_mut() {
                hart.ack_have_reset();
            }
        }

        if incoming.haltreq() {
            if let Some(hart) = self.selected_hart_mut() {
                if !hart.halted() {
                    hart.request_halt(registers::DebugCause::Haltreq);
                }
            }
        } else if incoming.resumereq() {
            if let Some(idx) = self.selected_hart_index() {
                if self.harts[idx].halted() {
                    let whereto = self.cfg.whereto_phyaddr;
                    let resume_target = self.cfg.rom_phyaddr.wrapping_add(park_loop::entry::RESUME);
                    let resume_jal = assembly::jal(0, resume_target.wrapping_sub(whereto) as i32);
                    let _ = self.mem.write_u32(whereto as u64, MemTxAttrs::DM, resume_jal);
                    let hart_id = self.harts[idx].id();
                    let flags_addr =
                        park_loop::flags_phyaddr(self.cfg.dm_phyaddr, self.cfg.nscratch, hart_id);
                    let _ = self.mem.write_u32(flags_addr as u64, MemTxAttrs::DM, 0b10);
                    let hart = &mut self.harts[idx];
                    hart.begin_resume();
                }
            }
        }
    }

    /// `dmcontrol.ndmreset` was requested (spec §4.4). An embedder drains
    /// this the same way [`crate::tap::Tap::take_system_reset_request`] is
    /// drained, to actually perform the system reset.
    pub fn take_system_reset_request(&mut self) -> bool {
        std::mem::take(&mut self.system_reset_requested)
    }

    fn reset_dm_state(&mut self) {
        self.abstractauto = 0;
        self.abstract_cmd = AbstractCommandEngine::new();
        self.regs = RegisterFile::new();
        self.regs.set(addr::NEXTDM, self.cfg.nextdm);
    }

    fn data_or_progbuf_index(&self, addr: u32) -> Option<(bool, u32)> {
        if addr >= addr::DATA0 && addr < addr::DATA0 + self.cfg.data_count as u32 {
            return Some((false, addr - addr::DATA0));
        }
        if addr >= addr::PROGBUF0 && addr < addr::PROGBUF0 + self.cfg.progbuf_count as u32 {
            return Some((true, addr - addr::PROGBUF0));
        }
        None
    }

    fn backing_phyaddr(&self, is_progbuf: bool, index: u32) -> u32 {
        let base = if is_progbuf { self.cfg.progbuf_phyaddr } else { self.cfg.data_phyaddr };
        base + index * 4
    }

    fn maybe_auto_exec(&mut self, is_progbuf: bool, index: u32) {
        let bit = if is_progbuf { 16 + index } else { index };
        if bit >= 32 || (self.abstractauto >> bit) & 1 == 0 {
            return;
        }
        let Some(idx) = self.selected_hart_index() else { return };
        let command = Command::from(self.regs.get(addr::COMMAND));
        let cfg = self.abstract_cmd_cfg();
        let hart = &mut self.harts[idx];
        let outcome = self.abstract_cmd.exec_command(command, &cfg, hart, &mut *self.mem);
        if let ExecOutcome::Rejected(_) = outcome {
            tracing::warn!(is_progbuf, index, "DM: auto-exec command failed");
        }
    }

    #[tracing::instrument(skip(self))]
    fn read(&mut self, addr: u32) -> (u32, DmiStatus) {
        let value = match addr {
            addr::DMSTATUS => self.compute_dmstatus(),
            addr::HARTINFO => self.compute_hartinfo(),
            addr::HALTSUM0 => self.compute_haltsum0(),
            addr::ABSTRACTCS => {
                let mut a = Abstractcs::from(0u32);
                a.set_progbufsize(self.cfg.progbuf_count);
                a.set_busy(self.abstract_cmd.busy());
                a.set_cmderr(self.abstract_cmd.cmderr().bits());
                a.set_datacount(self.cfg.data_count);
                u32::from(a)
            }
            addr::ABSTRACTAUTO => self.abstractauto,
            addr::SBCS => u32::from(self.sbus.sbcs()),
            addr::SBADDRESS0 => self.sbus.sbaddress0(),
            addr::SBADDRESS1 => self.sbus.sbaddress1(),
            addr::SBDATA0 => self.sbus.read_sbdata0(&mut *self.mem),
            addr::SBDATA1 => self.sbus.sbdata1(),
            _ => {
                if let Some((is_progbuf, index)) = self.data_or_progbuf_index(addr) {
                    let phy = self.backing_phyaddr(is_progbuf, index);
                    let v = self.mem.read_u32(phy as u64, MemTxAttrs::DM).unwrap_or(0);
                    self.maybe_auto_exec(is_progbuf, index);
                    v
                } else {
                    self.regs.get(addr)
                }
            }
        };
        self.regs.set(addr, value);
        (value, DmiStatus::NoErr)
    }

    #[tracing::instrument(skip(self))]
    fn write(&mut self, addr: u32, value: u32) -> DmiStatus {
        match addr {
            addr::DMCONTROL => self.write_dmcontrol(value),
            addr::DMSTATUS | addr::HARTINFO | addr::HALTSUM0 | addr::NEXTDM => {
                // read-only (NEXTDM is set once at configuration, not by DMI)
            }
            addr::ABSTRACTCS => {
                if self.abstract_cmd.busy() {
                    tracing::warn!("DM: abstractcs write rejected, command in flight");
                    return DmiStatus::NoErr;
                }
                let incoming = Abstractcs::from(value);
                self.abstract_cmd.clear_cmderr_if_written(incoming.cmderr() as u32);
            }
            addr::COMMAND => {
                if self.abstract_cmd.busy() || self.abstract_cmd.cmderr() != CmdErr::None {
                    tracing::warn!("DM: command write ignored, busy or sticky cmderr set");
                    return DmiStatus::NoErr;
                }
                self.regs.set(addr::COMMAND, value);
                let command = Command::from(value);
                let cfg = self.abstract_cmd_cfg();
                match self.selected_hart_index() {
                    Some(idx) => {
                        let hart = &mut self.harts[idx];
                        self.abstract_cmd.exec_command(command, &cfg, hart, &mut *self.mem);
                    }
                    None => tracing::warn!("DM: command write with no hart selected"),
                }
            }
            addr::ABSTRACTAUTO => {
                if self.abstract_cmd.busy() {
                    tracing::warn!("DM: abstractauto write rejected, command in flight");
                    return DmiStatus::NoErr;
                }
                self.abstractauto = value;
            }
            addr::SBCS => self.sbus.write_sbcs(value),
            addr::SBADDRESS0 => self.sbus.write_sbaddress0(value, &mut *self.mem),
            addr::SBADDRESS1 => self.sbus.write_sbaddress1(value),
            addr::SBDATA0 => self.sbus.write_sbdata0(value, &mut *self.mem),
            addr::SBDATA1 => self.sbus.write_sbdata1(value),
            _ => {
                if let Some((is_progbuf, index)) = self.data_or_progbuf_index(addr) {
                    let phy = self.backing_phyaddr(is_progbuf, index);
                    let _ = self.mem.write_u32(phy as u64, MemTxAttrs::DM, value);
                    self.maybe_auto_exec(is_progbuf, index);
                } else {
                    self.regs.set(addr, value);
                }
            }
        }
        self.regs.set(addr, value);
        DmiStatus::NoErr
    }

    /// Current `abstractcs.cmderr`, for tests and diagnostics.
    pub fn cmderr(&self) -> CmdErr {
        self.abstract_cmd.cmderr()
    }

    /// True if every existing hart is halted (spec §8 invariant
    /// `dmstatus.allhalted`).
    pub fn all_halted(&self) -> bool {
        (0..self.harts.len())
            .filter(|&i| !self.nonexistent[i])
            .all(|i| self.harts[i].halted())
    }

    /// `dcsr` of the currently selected hart, if any.
    pub fn selected_dcsr(&self) -> Option<Dcsr> {
        let idx = self.selected_hart_index()?;
        Some(self.harts[idx].dcsr())
    }
}

impl DmDevice for DebugModule {
    fn read_rq(&mut self, addr: u32) -> (u32, DmiStatus) {
        self.read(addr)
    }

    fn write_rq(&mut self, addr: u32, value: u32) -> DmiStatus {
        self.write(addr, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::FlatAddressSpace;
    use pretty_assertions::assert_eq;
    use crate::hart::test_support::FakeCpu;

    fn cfg() -> DebugModuleConfig {
        DebugModuleConfig {
            nscratch: 2,
            progbuf_count: 2,
            data_count: 2,
            abstractcmd_count: 10,
            dm_phyaddr: 0x1000_0000,
            rom_phyaddr: 0x1000_0800,
            whereto_phyaddr: 0x1000_0300,
            data_phyaddr: 0x1000_0380,
            progbuf_phyaddr: 0x1000_0360,
            abstractcmd_phyaddr: 0x1000_0338,
            sysbus_access: true,
            sbasize: 31,
            xlen64: false,
            max_size: 2,
            nextdm: 0,
        }
    }

    fn one_hart_dm() -> DebugModule {
        let harts = vec![Hart::new(0, Box::new(FakeCpu::default()), true)];
        let mem = Box::new(FlatAddressSpace::new(0x1000_0000, 0x2000));
        DebugModule::new(cfg(), harts, mem).unwrap()
    }

    #[test]
    fn dmactive_must_be_set_before_other_fields_take_effect() {
        let mut dm = one_hart_dm();
        let mut d = Dmcontrol::from(0u32);
        d.set_haltreq(true);
        dm.write_rq(addr::DMCONTROL, u32::from(d));
        assert!(!dm.harts[0].halted(), "haltreq without dmactive must be a no-op");
    }

    #[test]
    fn haltreq_halts_the_selected_hart_after_ack() {
        let mut dm = one_hart_dm();
        let mut d = Dmcontrol::from(0u32);
        d.set_dmactive(true);
        d.set_haltreq(true);
        dm.write_rq(addr::DMCONTROL, u32::from(d));
        assert!(!dm.harts[0].halted(), "halt only completes on ack");
        dm.ack_halted(0);
        assert!(dm.harts[0].halted());
        let (status, _) = dm.read_rq(addr::DMSTATUS);
        let dmstatus = Dmstatus::from(status);
        assert!(dmstatus.allhalted());
        assert!(dmstatus.anyhalted());
    }

    #[test]
    fn dmstatus_reports_nonexistent_when_no_hart_selected() {
        let mut dm = one_hart_dm();
        let mut d = Dmcontrol::from(0u32);
        d.set_dmactive(true);
        d.set_hartsel(5); // no hart at index 5
        dm.write_rq(addr::DMCONTROL, u32::from(d));
        let (status, _) = dm.read_rq(addr::DMSTATUS);
        assert!(Dmstatus::from(status).allnonexistent());
    }

    #[test]
    fn progbuf_write_then_read_round_trips() {
        let mut dm = one_hart_dm();
        dm.write_rq(addr::PROGBUF0, 0x1234_5678);
        let (value, status) = dm.read_rq(addr::PROGBUF0);
        assert_eq!(value, 0x1234_5678);
        assert_eq!(status, DmiStatus::NoErr);
    }

    #[test]
    fn command_write_is_ignored_while_sticky_cmderr_set() {
        let mut dm = one_hart_dm();
        let mut d = Dmcontrol::from(0u32);
        d.set_dmactive(true);
        d.set_haltreq(true);
        dm.write_rq(addr::DMCONTROL, u32::from(d));
        dm.ack_halted(0);

        let mut command = Command::from(0u32);
        command.set_cmdtype(abstract_cmd::CMDTYPE_ACCESS_REGISTER);
        command.set_transfer(true);
        command.set_regno(0xC000); // reserved -> NotSupported, latches cmderr
        dm.write_rq(addr::COMMAND, u32::from(command));
        assert_eq!(dm.cmderr(), CmdErr::NotSupported);

        let mut clear = Abstractcs::from(0u32);
        clear.set_cmderr(0b111);
        dm.write_rq(addr::ABSTRACTCS, u32::from(clear));
        assert_eq!(dm.cmderr(), CmdErr::None);
    }

    #[test]
    fn dmactive_toggle_resets_abstractauto() {
        let mut dm = one_hart_dm();
        let mut d = Dmcontrol::from(0u32);
        d.set_dmactive(true);
        dm.write_rq(addr::DMCONTROL, u32::from(d));
        dm.write_rq(addr::ABSTRACTAUTO, 0x3);
        assert_eq!(dm.read_rq(addr::ABSTRACTAUTO).0, 0x3);

        let mut off = Dmcontrol::from(0u32);
        off.set_dmactive(false);
        dm.write_rq(addr::DMCONTROL, u32::from(off));
        let mut on = Dmcontrol::from(0u32);
        on.set_dmactive(true);
        dm.write_rq(addr::DMCONTROL, u32::from(on));
        assert_eq!(dm.read_rq(addr::ABSTRACTAUTO).0, 0);
    }

    #[test]
    fn haltsum0_reflects_halted_bitmap() {
        let mut dm = one_hart_dm();
        assert_eq!(dm.read_rq(addr::HALTSUM0).0, 0);
        let mut d = Dmcontrol::from(0u32);
        d.set_dmactive(true);
        d.set_haltreq(true);
        dm.write_rq(addr::DMCONTROL, u32::from(d));
        dm.ack_halted(0);
        assert_eq!(dm.read_rq(addr::HALTSUM0).0, 0b1);
    }

    #[test]
    fn ndmreset_latches_a_drainable_system_reset_request() {
        let mut dm = one_hart_dm();
        assert!(!dm.take_system_reset_request());

        let mut d = Dmcontrol::from(0u32);
        d.set_dmactive(true);
        d.set_ndmreset(true);
        dm.write_rq(addr::DMCONTROL, u32::from(d));

        assert!(dm.take_system_reset_request());
        assert!(!dm.take_system_reset_request(), "request is consumed on take");
    }

    #[test]
    fn resumereq_sets_flag_resume_for_the_selected_hart() {
        let mut dm = one_hart_dm();
        let mut d = Dmcontrol::from(0u32);
        d.set_dmactive(true);
        d.set_haltreq(true);
        dm.write_rq(addr::DMCONTROL, u32::from(d));
        dm.ack_halted(0);

        let mut resume = Dmcontrol::from(0u32);
        resume.set_dmactive(true);
        resume.set_resumereq(true);
        dm.write_rq(addr::DMCONTROL, u32::from(resume));

        let flags_addr = park_loop::flags_phyaddr(cfg().dm_phyaddr, cfg().nscratch, 0);
        let flags = dm.mem.read_u32(flags_addr as u64, MemTxAttrs::DM).unwrap();
        assert_eq!(flags & 0b10, 0b10, "FLAG.RESUME must be set");
    }
}
