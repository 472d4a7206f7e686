//! The static park-loop ROM blob and its contract offsets (spec §4.6, §6
//! "DM-to-memory contract").
//!
//! Unlike the rest of the DM, this module has no runtime state: it only
//! assembles a fixed instruction sequence for an embedder to load into ROM
//! at `rom_phyaddr`. The hart that executes it is out of scope (spec §1);
//! this module's job ends at producing correct machine code, grounded on
//! the instruction helpers in [`crate::dm::assembly`].

use crate::dm::assembly::*;

/// `x5`, `t0` — scratch for the hart id and for `whereto` address assembly.
const T0: u8 = 5;
/// `x8`, `s0` — scratch for DM-base and flag polling.
const S0: u8 = 8;
/// `x10`, `a0` — holds the DM base address across the whole loop.
const A0: u8 = 10;
/// `x0`, hard-wired zero.
const ZERO: u8 = 0;

/// `mhartid` CSR number, read once at loop entry so HALTED/RESUMING can
/// report which hart acknowledged (spec §4.6: "value = hart id").
const CSR_MHARTID: u16 = 0xf14;

/// Offsets of the hart-visible contract words, relative to `dm_phyaddr`
/// (spec §6).
pub mod offset {
    pub const HALTED: u32 = 0x100;
    pub const GOING: u32 = 0x104;
    pub const RESUMING: u32 = 0x108;
    pub const EXCEPTION: u32 = 0x10c;
    pub const WHERETO: u32 = 0x300;
    pub const ABSTRACTCMD: u32 = 0x338;
    pub const PROGBUF0: u32 = 0x360;
    pub const DATAADDR0: u32 = 0x380;
    pub const FLAGS: u32 = 0x400;
    pub const ROM: u32 = 0x800;
}

/// Offsets of the park loop's fixed entry points, relative to `rom_phyaddr`
/// (spec §4.6). Each is a single `jal` to the entry's real body, so every
/// body can be larger than the 4-byte gap between fixed offsets.
pub mod entry {
    pub const HALT: u32 = 0;
    pub const RESUME: u32 = 4;
    pub const EXCEPTION: u32 = 8;
}

/// Word index (not byte offset) where body code starts, past the three
/// fixed single-word entry trampolines.
const BODY_START_WORD: u32 = 4;

/// Static configuration the ROM is assembled against. `dm_phyaddr` and
/// `whereto_phyaddr` are absolute physical addresses.
#[derive(Debug, Clone, Copy)]
pub struct ParkLoopConfig {
    pub dm_phyaddr: u32,
    pub whereto_phyaddr: u32,
    pub nscratch: u8,
}

/// The physical address of the FLAGS word a given hart polls (spec §3:
/// "Per-hart flag slot if `nscratch ≥ 2`, else a single shared slot"; memory
/// layout table's `FLAGS[hart]` bracket notation). Shared by the ROM
/// assembler (read side) and the DM's FLAG.GO/FLAG.RESUME writers, so both
/// sides agree on where a given hart's flags live.
pub fn flags_phyaddr(dm_phyaddr: u32, nscratch: u8, hart_id: u32) -> u32 {
    if nscratch >= 2 {
        dm_phyaddr.wrapping_add(offset::FLAGS).wrapping_add(hart_id.wrapping_mul(4))
    } else {
        dm_phyaddr.wrapping_add(offset::FLAGS)
    }
}

/// Assemble the park-loop ROM (spec §4.6). Returns instruction words; an
/// embedder writes them little-endian starting at `rom_phyaddr`.
pub fn park_loop_rom(cfg: ParkLoopConfig) -> Vec<u32> {
    let mut asm = Assembler::new();

    // --- fixed entry trampolines ---
    let halt_body = asm.reserve_label();
    let resume_body = asm.reserve_label();
    let exception_body = asm.reserve_label();
    asm.jump_to_label(halt_body); // entry::HALT
    asm.jump_to_label(resume_body); // entry::RESUME
    asm.jump_to_label(exception_body); // entry::EXCEPTION
    asm.push(NOP); // pad word 3 up to BODY_START_WORD

    debug_assert_eq!(asm.words.len() as u32, BODY_START_WORD);

    // --- halt entry (spec §4.6 offset 0) ---
    asm.place_label(halt_body);
    asm.push(FENCE);
    asm.push(csrw(CSR_DSCRATCH0, S0));
    asm.push(csrw(CSR_DSCRATCH1, A0));
    let (dm_hi, dm_lo) = hi_lo(cfg.dm_phyaddr);
    asm.push(lui(A0, dm_hi));
    asm.push(addi(A0, A0, dm_lo));

    let poll_loop = asm.here();
    asm.push(csrr(T0, CSR_MHARTID));
    asm.push(sw(offset::HALTED, A0 as u32, WIDTH_WORD as u32, T0 as u32));
    let going_label = asm.reserve_label();
    let resume_dispatch = asm.reserve_label();
    // Per-hart FLAGS slot (spec §3): with nscratch>=2 each hart's word sits
    // at FLAGS + 4*hartid, so fold the still-live mhartid value (in t0)
    // into the dm-base pointer before polling; with a single shared slot
    // every hart polls the same word at a0+FLAGS.
    let flags_base = if cfg.nscratch >= 2 {
        asm.push(slli(T0, T0, 2));
        asm.push(add(T0, A0, T0));
        T0
    } else {
        A0
    };
    asm.push(lw(offset::FLAGS as u16, flags_base, WIDTH_WORD, S0));
    asm.push(andi(S0, S0, 0b01));
    asm.branch_if_nonzero(S0, going_label);
    asm.push(lw(offset::FLAGS as u16, flags_base, WIDTH_WORD, S0));
    asm.push(andi(S0, S0, 0b10));
    asm.branch_if_nonzero(S0, resume_dispatch);
    asm.jump_to_label(poll_loop);

    // --- resume entry (spec §4.6 offset 4) ---
    asm.place_label(resume_body);
    asm.push(csrr(T0, CSR_MHARTID));
    asm.push(sw(offset::RESUMING, A0 as u32, WIDTH_WORD as u32, T0 as u32));
    asm.push(csrr(S0, CSR_DSCRATCH0));
    asm.push(csrr(A0, CSR_DSCRATCH1));
    asm.push(DRET);

    // --- exception entry (spec §4.6 offset 8) ---
    asm.place_label(exception_body);
    asm.push(sw(offset::EXCEPTION, A0 as u32, WIDTH_WORD as u32, ZERO as u32));
    asm.push(csrr(S0, CSR_DSCRATCH0));
    asm.push(csrr(A0, CSR_DSCRATCH1));
    asm.push(EBREAK);

    // --- going / resume-dispatch: falls out of the polling loop ---
    asm.place_label(going_label);
    asm.push(sw(offset::GOING, A0 as u32, WIDTH_WORD as u32, ZERO as u32));
    asm.push(csrr(S0, CSR_DSCRATCH0));
    let t0_saved = T0;
    let (whereto_hi, whereto_lo) = hi_lo(cfg.whereto_phyaddr);
    asm.push(lui(t0_saved, whereto_hi));
    asm.push(csrr(A0, CSR_DSCRATCH1));
    asm.push(jalr(ZERO, t0_saved, whereto_lo));

    asm.place_label(resume_dispatch);
    asm.jump_to_label(resume_body);

    asm.finish()
}

/// Split a 32-bit absolute address into `lui`'s upper-20 immediate and the
/// signed 12-bit low immediate that recombine via `add`/`addi`/`jalr`
/// (standard RISC-V `%hi`/`%lo` relocation split, rounding so the low part
/// stays in `-2048..2048`).
fn hi_lo(addr: u32) -> (u32, u16) {
    let low = (addr & 0xfff) as i32;
    let low_signed = if low >= 0x800 { low - 0x1000 } else { low };
    let hi = addr.wrapping_sub(low_signed as u32) >> 12;
    (hi & 0xf_ffff, (low_signed as i16 as u16) & 0xfff)
}

/// A tiny forward-reference assembler: labels can be branched/jumped to
/// before their word position is known, and patched once placed. Kept
/// local to the park loop since it's the only hand-assembled control-flow
/// graph in this crate; the abstract-command engine never branches.
#[derive(Default)]
struct Assembler {
    words: Vec<u32>,
    /// `None` until `place_label`; `Some(word_index)` after.
    labels: Vec<Option<u32>>,
    /// (word index of the branch/jump, label id, is_branch) fixups applied
    /// once every label is placed.
    fixups: Vec<(u32, usize, FixupKind)>,
}

#[derive(Clone, Copy)]
enum FixupKind {
    Jal { rd: u8 },
    BranchNonzero { rs1: u8 },
}

impl Assembler {
    fn new() -> Self {
        Self::default()
    }

    fn here(&self) -> u32 {
        self.words.len() as u32
    }

    fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    fn reserve_label(&mut self) -> usize {
        self.labels.push(None);
        self.labels.len() - 1
    }

    fn place_label(&mut self, label: usize) {
        self.labels[label] = Some(self.here());
    }

    fn jump_to_label(&mut self, label: usize) {
        let at = self.here();
        self.fixups.push((at, label, FixupKind::Jal { rd: ZERO }));
        self.push(0); // patched in finish()
    }

    fn branch_if_nonzero(&mut self, rs1: u8, label: usize) {
        let at = self.here();
        self.fixups.push((at, label, FixupKind::BranchNonzero { rs1 }));
        self.push(0);
    }

    fn finish(mut self) -> Vec<u32> {
        for (at, label, kind) in &self.fixups {
            let target = self.labels[*label].expect("label used before being placed");
            let byte_offset = (*target as i64 - *at as i64) * 4;
            self.words[*at as usize] = match kind {
                FixupKind::Jal { rd } => jal(*rd, byte_offset as i32),
                FixupKind::BranchNonzero { rs1 } => bne(*rs1, ZERO, byte_offset as i16),
            };
        }
        self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn hi_lo_recombines_to_the_original_address() {
        for addr in [0u32, 0x1000_0000, 0x8000_0800, 0xffff_ffff, 0x1234_5678] {
            let (hi, lo) = hi_lo(addr);
            let lo_signed = (lo as i16) as i32 as u32;
            let recombined = (hi << 12).wrapping_add(lo_signed);
            assert_eq!(recombined, addr, "addr={addr:#x} hi={hi:#x} lo={lo:#x}");
        }
    }

    fn rom() -> Vec<u32> {
        park_loop_rom(ParkLoopConfig {
            dm_phyaddr: 0x1000_0000,
            whereto_phyaddr: 0x1000_0300,
            nscratch: 2,
        })
    }

    #[test]
    fn rom_entry_points_contain_a_jump_not_illegal() {
        let rom = rom();
        assert_ne!(rom[(entry::HALT / 4) as usize], ILLEGAL);
        assert_ne!(rom[(entry::RESUME / 4) as usize], ILLEGAL);
        assert_ne!(rom[(entry::EXCEPTION / 4) as usize], ILLEGAL);
    }

    #[test]
    fn resume_entry_eventually_reaches_a_dret() {
        assert!(rom().contains(&DRET));
    }

    #[test]
    fn exception_entry_eventually_reaches_an_ebreak() {
        assert!(rom().contains(&EBREAK));
    }

    #[test]
    fn rom_assembles_with_a_single_shared_flags_slot_too() {
        let rom = park_loop_rom(ParkLoopConfig {
            dm_phyaddr: 0x1000_0000,
            whereto_phyaddr: 0x1000_0300,
            nscratch: 1,
        });
        assert_ne!(rom[entry::HALT as usize / 4], 0);
    }

    #[test]
    fn flags_phyaddr_is_per_hart_when_nscratch_is_2_and_shared_otherwise() {
        assert_eq!(flags_phyaddr(0x1000_0000, 2, 0), 0x1000_0400);
        assert_eq!(flags_phyaddr(0x1000_0000, 2, 3), 0x1000_040c);
        assert_eq!(flags_phyaddr(0x1000_0000, 1, 0), 0x1000_0400);
        assert_eq!(flags_phyaddr(0x1000_0000, 1, 3), 0x1000_0400);
    }

    #[test]
    fn rom_is_fully_assembled_with_no_dangling_placeholder_words() {
        // every fixup site must have been patched to something other than
        // the 0-word placeholder (0 happens to decode as an illegal
        // instruction too, so this doubles as a safety net).
        let rom = rom();
        assert_ne!(rom[entry::HALT as usize / 4], 0);
        assert_ne!(rom[entry::RESUME as usize / 4], 0);
        assert_ne!(rom[entry::EXCEPTION as usize / 4], 0);
    }
}
