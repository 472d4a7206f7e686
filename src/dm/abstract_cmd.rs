//! Abstract-command engine: synthesizes RV32I snippets, programs them into
//! the abstract-command slot, and drives the FLAG.GO/ack handshake (spec
//! §4.5).
//!
//! Snippet shapes are grounded on the helper catalogue spec §9 calls for
//! (`jal`, `jalr`, `andi`, `slli`, `srli`, `load`, `store`, `auipc`,
//! `csrrw`, `csrrs`, `csrr`, `ebreak`, `nop`, floating-point variants), all
//! implemented in [`crate::dm::assembly`] and adapted here from the RV32I
//! instruction catalogue probe-rs's own `Riscv32` register-access code
//! names (`perform_register_read`/`perform_register_write` in
//! `probe-rs/src/architecture/riscv/mod.rs`) without reusing any of its
//! ARM/Xtensa-specific plumbing.

use crate::address_space::{AddressSpace, MemTxAttrs};
use crate::dm::assembly::*;
use crate::dm::park_loop;
use crate::dm::registers::CmdErr;
use crate::hart::Hart;

const S0: u8 = 8;
const T0: u8 = 5;
const A0: u8 = 10;
const GPR_BASE: u16 = 0x1000;
const FPR_BASE: u16 = 0x1020;
const RESERVED_BASE: u16 = 0xC000;

bitfield::bitfield! {
    /// `command` register layout, shared by ACCESS_REGISTER and
    /// ACCESS_MEMORY (spec §4.5); field meaning depends on `cmdtype`.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Command(u32);
    impl Debug;
    pub cmdtype, set_cmdtype: 31, 24;
    pub aamvirtual, set_aamvirtual: 23;
    pub size, set_size: 22, 20;
    pub postincrement, set_postincrement: 19;
    pub postexec, set_postexec: 18;
    pub transfer, set_transfer: 17;
    pub write, set_write: 16;
    pub regno, set_regno: 15, 0;
}

impl From<u32> for Command {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Command> for u32 {
    fn from(register: Command) -> Self {
        register.0
    }
}

pub const CMDTYPE_ACCESS_REGISTER: u8 = 0;
pub const CMDTYPE_QUICK_ACCESS: u8 = 1;
pub const CMDTYPE_ACCESS_MEMORY: u8 = 2;

/// Static per-DM configuration the engine needs to synthesize and place
/// snippets (spec §3 "Configuration").
#[derive(Debug, Clone, Copy)]
pub struct AbstractCommandConfig {
    pub dm_phyaddr: u32,
    pub data_phyaddr: u32,
    pub progbuf_phyaddr: u32,
    pub whereto_phyaddr: u32,
    pub abstractcmd_phyaddr: u32,
    pub abstractcmd_count: u32,
    pub nscratch: u8,
    /// Maximum supported access width in `aarsize`/`aamsize` units (lg2
    /// bytes): 2 for RV32 (4 bytes), 3 for RV64.
    pub max_size: u8,
}

/// Outcome of [`AbstractCommandEngine::exec_command`]: either the command
/// was rejected synchronously (no hart interaction needed), or it was
/// armed and the caller must wait for an ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Rejected(CmdErr),
    Armed,
}

/// Owns the sticky busy/cmderr state and the in-flight hart id. Doesn't own
/// memory or hart state directly — those are injected per call, per spec
/// §9's "coroutine-shaped control flow: no function waits".
pub struct AbstractCommandEngine {
    busy: bool,
    cmderr: CmdErr,
    in_flight_hart: Option<u32>,
}

impl AbstractCommandEngine {
    pub fn new() -> Self {
        Self { busy: false, cmderr: CmdErr::None, in_flight_hart: None }
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn cmderr(&self) -> CmdErr {
        self.cmderr
    }

    /// `abstractcs.cmderr` is write-1-to-clear on any of its three bits
    /// (spec §9 open question: "any write-1 bit clears all three bits to
    /// zero").
    pub fn clear_cmderr_if_written(&mut self, cmderr_write_bits: u32) {
        if cmderr_write_bits != 0 {
            self.cmderr = CmdErr::None;
        }
    }

    fn fail(&mut self, err: CmdErr) -> ExecOutcome {
        if self.cmderr == CmdErr::None {
            self.cmderr = err;
        }
        ExecOutcome::Rejected(err)
    }

    /// Execute (or reject) one `command` write (spec §4.5). `hart` must be
    /// the currently DMI-selected hart.
    pub fn exec_command(
        &mut self,
        command: Command,
        cfg: &AbstractCommandConfig,
        hart: &mut Hart,
        mem: &mut dyn AddressSpace,
    ) -> ExecOutcome {
        if self.busy {
            return self.fail(CmdErr::Busy);
        }
        if !hart.halted() {
            return self.fail(CmdErr::HaltResume);
        }
        if cfg.data_phyaddr == 0 {
            return self.fail(CmdErr::Other);
        }

        let cmdtype = command.cmdtype();
        let snippet = if cmdtype == CMDTYPE_ACCESS_REGISTER {
            match self.synthesize_access_register(command, cfg) {
                Ok(words) => words,
                Err(err) => return self.fail(err),
            }
        } else if cmdtype == CMDTYPE_ACCESS_MEMORY {
            return self.exec_access_memory(command, cfg, mem);
        } else {
            return self.fail(CmdErr::NotSupported);
        };

        self.program_and_go(snippet, cfg, hart, mem)
    }

    fn synthesize_access_register(
        &self,
        command: Command,
        cfg: &AbstractCommandConfig,
    ) -> Result<Vec<u32>, CmdErr> {
        let regno = command.regno() as u16;
        let write = command.write();
        let transfer = command.transfer();
        let size = command.size() as u8;
        let postincrement = command.postincrement();
        let postexec = command.postexec();

        if regno >= RESERVED_BASE {
            return Err(CmdErr::NotSupported);
        }
        if size > cfg.max_size || postincrement {
            return Err(CmdErr::NotSupported);
        }
        if !transfer {
            // Nothing to move; a bare postexec=1 still needs a no-op body
            // so the fallthrough trick below applies uniformly.
            return Ok(vec![EBREAK]);
        }

        let width = size_to_width(size);
        let mut words = if regno < GPR_BASE {
            csr_snippet(regno, write, cfg.data_phyaddr)
        } else if regno < FPR_BASE {
            let gpr = (regno - GPR_BASE) as u8;
            if gpr > 31 {
                return Err(CmdErr::NotSupported);
            }
            gpr_snippet(gpr, write, cfg.data_phyaddr, cfg.nscratch)
        } else {
            let fpr = (regno - FPR_BASE) as u8;
            if fpr > 31 {
                return Err(CmdErr::NotSupported);
            }
            fpr_snippet(fpr, write, width, cfg.data_phyaddr)
        };

        if postexec {
            // Fall through into the program buffer instead of trapping
            // (spec §4.5: ABSTRACTCMD is immediately followed by PROGBUF
            // in the DM-to-memory contract, §6).
            if let Some(last) = words.last_mut() {
                if *last == EBREAK {
                    *last = NOP;
                }
            }
        }
        Ok(words)
    }

    fn exec_access_memory(
        &mut self,
        command: Command,
        cfg: &AbstractCommandConfig,
        mem: &mut dyn AddressSpace,
    ) -> ExecOutcome {
        let size = command.size() as u8;
        if size > cfg.max_size {
            return self.fail(CmdErr::NotSupported);
        }
        if command.aamvirtual() {
            // Virtual-address translation needs the hart's page tables,
            // which this DM-side engine has no access to (spec §4.5: "if
            // aamvirtual, translate with the hart's page tables first").
            return self.fail(CmdErr::NotSupported);
        }
        let width = 1u32 << size;

        // arg0=data0/data1, arg1=data2/data3 for XLEN=32 (spec §4.5
        // "arg0..arg2 layout by XLEN").
        let data_read = |mem: &mut dyn AddressSpace, off: u32| -> Result<u32, ()> {
            mem.read_u32(cfg.data_phyaddr as u64 + off as u64, MemTxAttrs::DM).map_err(|_| ())
        };
        let data_write = |mem: &mut dyn AddressSpace, off: u32, v: u32| -> Result<(), ()> {
            mem.write_u32(cfg.data_phyaddr as u64 + off as u64, MemTxAttrs::DM, v).map_err(|_| ())
        };

        let Ok(address) = data_read(mem, 4) else {
            return self.fail(CmdErr::Bus);
        };
        if address & (width - 1) != 0 {
            return self.fail(CmdErr::Bus);
        }

        if command.write() {
            let Ok(data) = data_read(mem, 0) else { return self.fail(CmdErr::Bus) };
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&data.to_le_bytes());
            if mem.write(address as u64, MemTxAttrs::SBA, &buf[..width as usize]).is_err() {
                return self.fail(CmdErr::Bus);
            }
        } else {
            let mut buf = [0u8; 4];
            if mem.read(address as u64, MemTxAttrs::SBA, &mut buf[..width as usize]).is_err() {
                return self.fail(CmdErr::Bus);
            }
            let _ = data_write(mem, 0, u32::from_le_bytes(buf));
        }

        if command.postincrement() {
            let _ = data_write(mem, 4, address.wrapping_add(width));
        }

        // Entirely DM-side; no hart interaction, so it completes
        // synchronously (spec §4.5: "Executes entirely in the debug
        // module (not on the hart)").
        self.cmderr = CmdErr::None;
        ExecOutcome::Armed
    }

    fn program_and_go(
        &mut self,
        mut snippet: Vec<u32>,
        cfg: &AbstractCommandConfig,
        hart: &mut Hart,
        mem: &mut dyn AddressSpace,
    ) -> ExecOutcome {
        if snippet.len() as u32 > cfg.abstractcmd_count {
            return self.fail(CmdErr::NotSupported);
        }
        snippet.resize(cfg.abstractcmd_count as usize, NOP);

        for (i, word) in snippet.iter().enumerate() {
            let addr = cfg.abstractcmd_phyaddr as u64 + (i as u64) * 4;
            if mem.write_u32(addr, MemTxAttrs::DM, *word).is_err() {
                return self.fail(CmdErr::Bus);
            }
        }

        let jump_offset = cfg.abstractcmd_phyaddr as i64 - cfg.whereto_phyaddr as i64;
        let whereto = jal(0, jump_offset as i32);
        if mem.write_u32(cfg.whereto_phyaddr as u64, MemTxAttrs::DM, whereto).is_err() {
            return self.fail(CmdErr::Bus);
        }

        let flags_addr = park_loop::flags_phyaddr(cfg.dm_phyaddr, cfg.nscratch, hart.id());
        if mem.write_u32(flags_addr as u64, MemTxAttrs::DM, 0b01).is_err() {
            return self.fail(CmdErr::Bus);
        }

        self.busy = true;
        self.in_flight_hart = Some(hart.id());
        tracing::debug!(hart = hart.id(), "abstract-command: armed, FLAG.GO set");
        ExecOutcome::Armed
    }

    /// The park loop wrote `GOING`: clear FLAG.GO. Command stays busy
    /// until the subsequent halted/exception ack (spec §4.5).
    pub fn ack_going(&mut self) {
        tracing::trace!("abstract-command: ACK_GOING");
    }

    /// The park loop wrote `HALTED`: the command completed successfully.
    pub fn ack_halted(&mut self, hart: &mut Hart) {
        hart.ack_halted();
        self.busy = false;
        self.in_flight_hart = None;
    }

    /// The park loop wrote `EXCEPTION`: the snippet faulted.
    pub fn ack_exception(&mut self, hart: &mut Hart) {
        hart.ack_halted();
        if self.cmderr == CmdErr::None {
            self.cmderr = CmdErr::Exception;
        }
        self.busy = false;
        self.in_flight_hart = None;
    }
}

impl Default for AbstractCommandEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn size_to_width(size: u8) -> u8 {
    match size {
        0 => WIDTH_BYTE,
        1 => WIDTH_HALF,
        2 => WIDTH_WORD,
        _ => WIDTH_DOUBLE,
    }
}

fn hi_lo(addr: u32) -> (u32, u16) {
    let low = (addr & 0xfff) as i32;
    let low_signed = if low >= 0x800 { low - 0x1000 } else { low };
    let hi = addr.wrapping_sub(low_signed as u32) >> 12;
    (hi & 0xf_ffff, (low_signed as i16 as u16) & 0xfff)
}

fn csr_snippet(csr: u16, write: bool, data_phyaddr: u32) -> Vec<u32> {
    let (hi, lo) = hi_lo(data_phyaddr);
    let mut words = vec![csrw(CSR_DSCRATCH0, S0)];
    if write {
        words.push(lui(S0, hi));
        words.push(lw(lo, S0, WIDTH_WORD, S0));
        words.push(csrw(csr, S0));
    } else {
        words.push(csrr(S0, csr));
        words.push(lui(T0, hi));
        words.push(sw(lo as u32, T0 as u32, WIDTH_WORD as u32, S0 as u32));
    }
    words.push(csrr(S0, CSR_DSCRATCH0));
    words.push(EBREAK);
    words
}

/// Pointer register for a GPR snippet: `T0` normally, or `S0` when the
/// target itself is `T0` (and vice versa), so the snippet never needs to
/// both hold and clobber the same register for two different purposes.
/// `a0` gets its own scheme when a second dscratch register is available
/// (see [`gpr_a0_snippet`]).
fn gpr_snippet(gpr: u8, write: bool, data_phyaddr: u32, nscratch: u8) -> Vec<u32> {
    let (hi, lo) = hi_lo(data_phyaddr);
    if nscratch >= 2 && gpr == A0 {
        return gpr_a0_snippet(write, hi, lo);
    }
    let ptr = if gpr == T0 { S0 } else { T0 };
    let mut words = vec![csrw(CSR_DSCRATCH0, ptr)];
    words.push(lui(ptr, hi));
    if write {
        words.push(lw(lo, ptr, WIDTH_WORD, gpr));
    } else {
        words.push(sw(lo as u32, ptr as u32, WIDTH_WORD as u32, gpr as u32));
    }
    words.push(csrr(ptr, CSR_DSCRATCH0));
    words.push(EBREAK);
    words
}

/// `regno == 0x100a` (a0) with `nscratch >= 2`: use `a0` itself as the
/// pointer register instead of borrowing `t0`/`s0` (spec.md:152 design
/// note). A write overwrites `a0` with the transferred value directly, so
/// nothing needs saving. A read must stash `a0`'s original value in
/// `DSCRATCH1` before clobbering it to form the pointer, then route it
/// through `t0` (saved/restored via `DSCRATCH0` as usual) to reach the
/// store, and restore `a0` afterwards.
fn gpr_a0_snippet(write: bool, hi: u32, lo: u16) -> Vec<u32> {
    if write {
        vec![lui(A0, hi), lw(lo, A0, WIDTH_WORD, A0), EBREAK]
    } else {
        vec![
            csrw(CSR_DSCRATCH1, A0),
            csrw(CSR_DSCRATCH0, T0),
            lui(A0, hi),
            csrr(T0, CSR_DSCRATCH1),
            sw(lo as u32, A0 as u32, WIDTH_WORD as u32, T0 as u32),
            csrr(T0, CSR_DSCRATCH0),
            csrr(A0, CSR_DSCRATCH1),
            EBREAK,
        ]
    }
}

fn fpr_snippet(fpr: u8, write: bool, width: u8, data_phyaddr: u32) -> Vec<u32> {
    let (hi, lo) = hi_lo(data_phyaddr);
    let mut words = vec![csrw(CSR_DSCRATCH0, T0)];
    words.push(lui(T0, hi));
    if write {
        words.push(flw(lo, T0, width, fpr));
    } else {
        words.push(fsw(lo as u32, T0 as u32, width as u32, fpr as u32));
    }
    words.push(csrr(T0, CSR_DSCRATCH0));
    words.push(EBREAK);
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::FlatAddressSpace;
    use pretty_assertions::{assert_eq, assert_ne};
    use crate::hart::test_support::FakeCpu;

    fn cfg() -> AbstractCommandConfig {
        AbstractCommandConfig {
            dm_phyaddr: 0x1000_0000,
            data_phyaddr: 0x1000_0380,
            progbuf_phyaddr: 0x1000_0360,
            whereto_phyaddr: 0x1000_0300,
            abstractcmd_phyaddr: 0x1000_0338,
            abstractcmd_count: 10,
            nscratch: 2,
            max_size: 2,
        }
    }

    fn halted_hart() -> Hart {
        let mut hart = Hart::new(0, Box::new(FakeCpu::default()), true);
        hart.request_halt(crate::dm::registers::DebugCause::Haltreq);
        hart.ack_halted();
        hart
    }

    #[test]
    fn rejects_when_hart_not_halted() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = Hart::new(0, Box::new(FakeCpu::default()), true);
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_ACCESS_REGISTER);
        command.set_transfer(true);
        command.set_regno(GPR_BASE + 10);
        let outcome = engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert_eq!(outcome, ExecOutcome::Rejected(CmdErr::HaltResume));
    }

    #[test]
    fn register_read_arms_busy_and_programs_whereto() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = halted_hart();
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_ACCESS_REGISTER);
        command.set_transfer(true);
        command.set_size(2);
        command.set_regno(GPR_BASE + 10); // a0
        let outcome = engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert_eq!(outcome, ExecOutcome::Armed);
        assert!(engine.busy());
        let whereto = mem.read_u32(0x1000_0300, MemTxAttrs::DM).unwrap();
        assert_ne!(whereto, 0);
        let flags = mem.read_u32(0x1000_0400, MemTxAttrs::DM).unwrap();
        assert_eq!(flags & 0b01, 0b01, "FLAG.GO must be set once armed");
    }

    #[test]
    fn ack_halted_clears_busy_and_marks_hart_halted() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = halted_hart();
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_ACCESS_REGISTER);
        command.set_transfer(true);
        command.set_regno(GPR_BASE);
        engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert!(engine.busy());
        engine.ack_halted(&mut hart);
        assert!(!engine.busy());
        assert_eq!(engine.cmderr(), CmdErr::None);
    }

    #[test]
    fn reserved_regno_is_not_supported_without_touching_memory() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = halted_hart();
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_ACCESS_REGISTER);
        command.set_transfer(true);
        command.set_regno(0xC000);
        let outcome = engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert_eq!(outcome, ExecOutcome::Rejected(CmdErr::NotSupported));
        assert!(!engine.busy());
    }

    #[test]
    fn oversized_aarsize_on_32_bit_hart_is_not_supported() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = halted_hart();
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_ACCESS_REGISTER);
        command.set_transfer(true);
        command.set_size(3); // 8 bytes, max_size=2 for this config
        command.set_regno(GPR_BASE);
        let outcome = engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert_eq!(outcome, ExecOutcome::Rejected(CmdErr::NotSupported));
    }

    #[test]
    fn access_memory_write_then_read_round_trips() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = halted_hart();
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        mem.write_u32(cfg().data_phyaddr as u64, MemTxAttrs::DM, 0xdead_beef).unwrap();
        mem.write_u32(cfg().data_phyaddr as u64 + 4, MemTxAttrs::DM, 0x1000_1000).unwrap();

        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_ACCESS_MEMORY);
        command.set_size(2);
        command.set_write(true);
        let outcome = engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert_eq!(outcome, ExecOutcome::Armed);
        assert_eq!(mem.read_u32(0x1000_1000, MemTxAttrs::SBA).unwrap(), 0xdead_beef);
    }

    #[test]
    fn access_memory_misaligned_address_fails_with_bus_error() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = halted_hart();
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        mem.write_u32(cfg().data_phyaddr as u64 + 4, MemTxAttrs::DM, 0x1000_1001).unwrap();

        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_ACCESS_MEMORY);
        command.set_size(2);
        command.set_write(true);
        let outcome = engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert_eq!(outcome, ExecOutcome::Rejected(CmdErr::Bus));
    }

    #[test]
    fn quick_access_is_not_supported() {
        let mut engine = AbstractCommandEngine::new();
        let mut hart = halted_hart();
        let mut mem = FlatAddressSpace::new(0x1000_0000, 0x2000);
        let mut command = Command(0);
        command.set_cmdtype(CMDTYPE_QUICK_ACCESS);
        let outcome = engine.exec_command(command, &cfg(), &mut hart, &mut mem);
        assert_eq!(outcome, ExecOutcome::Rejected(CmdErr::NotSupported));
    }

    #[test]
    fn gpr_snippet_for_a0_uses_dscratch1_only_when_nscratch_is_2() {
        let with_second_scratch = gpr_snippet(A0, false, 0x1000_0380, 2);
        assert!(with_second_scratch.iter().any(|&w| w == csrw(CSR_DSCRATCH1, A0)));
        assert_eq!(*with_second_scratch.last().unwrap(), EBREAK);

        let without_second_scratch = gpr_snippet(A0, false, 0x1000_0380, 1);
        assert!(!without_second_scratch.iter().any(|&w| w == csrw(CSR_DSCRATCH1, A0)));
    }

    #[test]
    fn gpr_snippet_for_a0_write_direction_skips_the_save_restore_dance() {
        let words = gpr_snippet(A0, true, 0x1000_0380, 2);
        assert_eq!(words.len(), 3);
        assert_eq!(*words.last().unwrap(), EBREAK);
    }
}
