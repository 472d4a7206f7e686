//! System-bus access (spec §4.7): hart-independent memory transactions
//! through `sbcs`/`sbaddress0-1`/`sbdata0-1`.
//!
//! Grounded on `probe-rs/src/architecture/riscv/mod.rs`'s
//! `perform_memory_read_sysbus`/`perform_memory_write_sysbus`, which decode
//! and drive this exact register group from the debugger side; this module
//! is the target-side implementation those calls ultimately talk to.

use crate::address_space::{AddressSpace, MemTxAttrs};
use crate::dm::registers::{Sbcs, SbError};

/// `sbcs.sbaccess` values understood by this implementation (spec §4.7:
/// "`sbasize` capability is reported from the hart's XLEN" — we support up
/// to 8 bytes regardless of XLEN, matching RV32 and RV64 harts alike).
const MAX_SBACCESS: u8 = 3; // 1<<3 = 8 bytes

/// Owns the four SBA-visible registers and the address space they drive.
/// `xlen64` gates whether `sbaddress1`/the high word of `sbdata1` are live
/// (spec §4.7: "upper only if XLEN>32").
pub struct SystemBusAccess {
    sbcs: Sbcs,
    sbaddress0: u32,
    sbaddress1: u32,
    sbdata0: u32,
    sbdata1: u32,
    xlen64: bool,
}

impl SystemBusAccess {
    pub fn new(xlen64: bool, sbasize: u8) -> Self {
        let mut sbcs = Sbcs::from(0u32);
        sbcs.set_sbversion(1);
        sbcs.set_sbasize(sbasize);
        sbcs.set_sbaccess8(true);
        sbcs.set_sbaccess16(true);
        sbcs.set_sbaccess32(true);
        sbcs.set_sbaccess64(xlen64);
        Self { sbcs, sbaddress0: 0, sbaddress1: 0, sbdata0: 0, sbdata1: 0, xlen64 }
    }

    pub fn sbcs(&self) -> Sbcs {
        self.sbcs
    }

    pub fn sbaddress0(&self) -> u32 {
        self.sbaddress0
    }

    pub fn sbaddress1(&self) -> u32 {
        self.sbaddress1
    }

    pub fn sbdata0(&self) -> u32 {
        self.sbdata0
    }

    pub fn sbdata1(&self) -> u32 {
        self.sbdata1
    }

    fn address(&self) -> u64 {
        if self.xlen64 {
            ((self.sbaddress1 as u64) << 32) | self.sbaddress0 as u64
        } else {
            self.sbaddress0 as u64
        }
    }

    fn set_address(&mut self, addr: u64) {
        self.sbaddress0 = addr as u32;
        if self.xlen64 {
            self.sbaddress1 = (addr >> 32) as u32;
        }
    }

    fn width_bytes(&self) -> Option<u32> {
        let lg2 = self.sbcs.sbaccess();
        if lg2 > MAX_SBACCESS || (lg2 == 3 && !self.xlen64) {
            return None;
        }
        Some(1u32 << lg2 as u32)
    }

    fn latch_error(&mut self, error: SbError) {
        // sticky-first-error semantics, matching abstractcs.cmderr (spec
        // §4.4 open question resolution reused here for consistency).
        if self.sbcs.sberror() == SbError::None.bits() {
            self.sbcs.set_sberror(error.bits());
        }
    }

    fn busy_error_if_needed(&mut self) -> bool {
        if self.sbcs.sbbusy() {
            self.sbcs.set_sbbusyerror(true);
            true
        } else {
            false
        }
    }

    /// `sbcs` write. `sbbusyerror`/`sberror` bits are write-1-to-clear; all
    /// other fields overwrite.
    pub fn write_sbcs(&mut self, value: u32) {
        if self.busy_error_if_needed() {
            return;
        }
        let incoming = Sbcs::from(value);
        if incoming.sbbusyerror() {
            self.sbcs.set_sbbusyerror(false);
        }
        if incoming.sberror() != 0 {
            self.sbcs.set_sberror(0);
        }
        self.sbcs.set_sbaccess(incoming.sbaccess());
        self.sbcs.set_sbautoincrement(incoming.sbautoincrement());
        self.sbcs.set_sbreadonaddr(incoming.sbreadonaddr());
        self.sbcs.set_sbreadondata(incoming.sbreadondata());
    }

    pub fn write_sbaddress0(&mut self, value: u32, mem: &mut dyn AddressSpace) {
        if self.busy_error_if_needed() {
            return;
        }
        self.sbaddress0 = value;
        if self.sbcs.sbreadonaddr() {
            self.do_read(mem);
        }
    }

    pub fn write_sbaddress1(&mut self, value: u32) {
        if self.busy_error_if_needed() {
            return;
        }
        self.sbaddress1 = value;
    }

    pub fn read_sbdata0(&mut self, mem: &mut dyn AddressSpace) -> u32 {
        if self.sbcs.sbreadondata() && !self.busy_error_if_needed() {
            self.do_read(mem);
        }
        self.sbdata0
    }

    pub fn write_sbdata0(&mut self, value: u32, mem: &mut dyn AddressSpace) {
        if self.busy_error_if_needed() {
            return;
        }
        self.sbdata0 = value;
        self.do_write(mem);
    }

    pub fn write_sbdata1(&mut self, value: u32) {
        if self.busy_error_if_needed() {
            return;
        }
        self.sbdata1 = value;
    }

    fn check_aligned(&self, addr: u64, width: u32) -> bool {
        addr & (width as u64 - 1) == 0
    }

    fn do_read(&mut self, mem: &mut dyn AddressSpace) {
        let Some(width) = self.width_bytes() else {
            self.latch_error(SbError::Asize);
            return;
        };
        let addr = self.address();
        if !self.check_aligned(addr, width) {
            self.latch_error(SbError::Badalign);
            return;
        }
        let mut buf = [0u8; 8];
        match mem.read(addr, MemTxAttrs::SBA, &mut buf[..width as usize]) {
            Ok(()) => {
                self.sbdata0 = u32::from_le_bytes(buf[0..4].try_into().unwrap());
                if width == 8 {
                    self.sbdata1 = u32::from_le_bytes(buf[4..8].try_into().unwrap());
                }
                self.advance_if_autoincrement(width);
            }
            Err(_) => self.latch_error(SbError::Badaddr),
        }
    }

    fn do_write(&mut self, mem: &mut dyn AddressSpace) {
        let Some(width) = self.width_bytes() else {
            self.latch_error(SbError::Asize);
            return;
        };
        let addr = self.address();
        if !self.check_aligned(addr, width) {
            self.latch_error(SbError::Badalign);
            return;
        }
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.sbdata0.to_le_bytes());
        if width == 8 {
            buf[4..8].copy_from_slice(&self.sbdata1.to_le_bytes());
        }
        match mem.write(addr, MemTxAttrs::SBA, &buf[..width as usize]) {
            Ok(()) => self.advance_if_autoincrement(width),
            Err(_) => self.latch_error(SbError::Badaddr),
        }
    }

    fn advance_if_autoincrement(&mut self, width: u32) {
        if !self.sbcs.sbautoincrement() {
            return;
        }
        let addr = self.address().wrapping_add(width as u64);
        self.set_address(addr);
    }
}
