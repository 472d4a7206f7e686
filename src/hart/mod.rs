//! Per-hart lifecycle state and DCSR bookkeeping (spec §4.8).
//!
//! The CPU interpreter itself is out of scope (spec §1); [`CpuControl`] is
//! the hook surface the DM drives, mirrored from the `Riscv32Core`/
//! `CoreInterface` split in `probe-rs/src/architecture/riscv/mod.rs` (there
//! a debugger drives a real core through a communication interface; here
//! the DM drives an emulated one through the same kind of narrow trait
//! seam, generalized from host-side polling to DM-side event plumbing per
//! spec §9 "coroutine-shaped control flow").

use crate::dm::registers::{Dcsr, DebugCause, XDEBUGVER_0_13};

/// Hooks into the emulator's CPU interpreter for one hart (spec §6: "the
/// emulator's CPU interpreter is assumed to expose the hooks"). An embedder
/// implements this against its own vCPU worker.
pub trait CpuControl: Send {
    /// Ask the interpreter to exit its current translation block so state
    /// changes made under the lock become visible promptly.
    fn exit_translation_block(&mut self);
    /// Assert or deassert the hart-local DEBUG interrupt line.
    fn set_debug_interrupt(&mut self, asserted: bool);
    /// Assert or deassert the hart's reset input.
    fn assert_reset(&mut self, asserted: bool);
    /// Ensure the VM is running so the hart can reach the park loop.
    fn ensure_running(&mut self);
    /// True if the next instruction the hart would execute is `ebreak` or
    /// `c.ebreak` (spec §4.8 step 2 of resume: "it is illegal to
    /// single-step an ebreak").
    fn next_instruction_is_ebreak(&self) -> bool;
}

/// The three-way existence state a hart can be in from the DM's
/// perspective (spec §3: "a hart is in exactly one of {nonexistent,
/// unavailable, halted, running}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Nonexistent,
    Unavailable,
    Present,
}

/// One emulated hart's debug-visible state.
pub struct Hart {
    id: u32,
    cpu: Box<dyn CpuControl>,
    existence: Existence,
    halted: bool,
    resumed: bool,
    have_reset: bool,
    /// False for harts that start held in reset by the power manager and
    /// must never be released by the DM (spec §4.8).
    unlock_reset: bool,
    in_reset: bool,
    dcsr: Dcsr,
}

impl Hart {
    pub fn new(id: u32, cpu: Box<dyn CpuControl>, unlock_reset: bool) -> Self {
        let mut dcsr = Dcsr::from(0u32);
        dcsr.set_xdebugver(XDEBUGVER_0_13);
        Self {
            id,
            cpu,
            existence: Existence::Present,
            halted: false,
            resumed: false,
            have_reset: !unlock_reset,
            unlock_reset,
            in_reset: !unlock_reset,
            dcsr,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn existence(&self) -> Existence {
        self.existence
    }

    pub fn set_existence(&mut self, existence: Existence) {
        self.existence = existence;
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn have_reset(&self) -> bool {
        self.have_reset
    }

    pub fn dcsr(&self) -> Dcsr {
        self.dcsr
    }

    pub fn dcsr_mut(&mut self) -> &mut Dcsr {
        &mut self.dcsr
    }

    /// Begin halting this hart (spec §4.8 "Halting a hart"). Returns
    /// immediately; the DM observes completion via [`Hart::ack_halted`]
    /// once the park loop writes `HALTED`.
    pub fn request_halt(&mut self, cause: DebugCause) {
        self.cpu.exit_translation_block();
        self.dcsr.set_cause(cause.bits());
        self.cpu.set_debug_interrupt(true);
        self.cpu.ensure_running();
        tracing::debug!(hart = self.id, ?cause, "hart: halt requested");
    }

    /// The park loop wrote `HALTED` for this hart.
    pub fn ack_halted(&mut self) {
        self.halted = true;
        self.resumed = false;
        tracing::debug!(hart = self.id, "hart: halted");
    }

    /// Begin resuming this hart (spec §4.8 "Resuming a hart", steps 2-3;
    /// step 1, patching `whereto`, is the DM's responsibility since it
    /// owns the address space). Returns whether `dcsr.step` was cleared
    /// because the next instruction is an `ebreak`.
    pub fn begin_resume(&mut self) -> bool {
        let step_cleared = if self.dcsr.step() && self.cpu.next_instruction_is_ebreak() {
            self.dcsr.set_step(false);
            true
        } else {
            false
        };
        self.cpu.set_debug_interrupt(false);
        self.cpu.ensure_running();
        step_cleared
    }

    /// The park loop wrote `RESUMING` for this hart.
    pub fn ack_resuming(&mut self) {
        self.halted = false;
        self.resumed = true;
        tracing::debug!(hart = self.id, "hart: resumed");
    }

    /// `dmcontrol.hartreset` / release from the power manager (spec §4.8
    /// "Reset flow"). Harts with `unlock_reset=false` are never released
    /// by the DM.
    pub fn request_reset(&mut self, assert: bool) {
        if assert {
            self.cpu.assert_reset(true);
            self.in_reset = true;
            self.have_reset = true;
        } else if self.unlock_reset {
            self.cpu.assert_reset(false);
            self.in_reset = false;
        } else {
            tracing::trace!(hart = self.id, "hart: reset release ignored, not unlocked");
        }
    }

    /// `dmcontrol.ackhavereset=1` for this hart (spec §9 open question:
    /// applied per-hart, not just the first element).
    pub fn ack_have_reset(&mut self) {
        self.have_reset = false;
    }
}

impl std::fmt::Debug for Hart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hart")
            .field("id", &self.id)
            .field("existence", &self.existence)
            .field("halted", &self.halted)
            .field("resumed", &self.resumed)
            .field("have_reset", &self.have_reset)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeCpu;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn halt_then_ack_sets_halted_and_cause() {
        let mut hart = Hart::new(0, Box::new(FakeCpu::default()), true);
        hart.request_halt(DebugCause::Haltreq);
        assert!(!hart.halted());
        hart.ack_halted();
        assert!(hart.halted());
        assert_eq!(DebugCause::from_bits(hart.dcsr().cause()), DebugCause::Haltreq);
    }

    #[test]
    fn resume_clears_step_before_an_ebreak() {
        let cpu = FakeCpu { next_is_ebreak: true, ..Default::default() };
        let mut hart = Hart::new(0, Box::new(cpu), true);
        hart.dcsr_mut().set_step(true);
        let cleared = hart.begin_resume();
        assert!(cleared);
        assert!(!hart.dcsr().step());
    }

    #[test]
    fn resume_keeps_step_when_next_instruction_is_not_ebreak() {
        let mut hart = Hart::new(0, Box::new(FakeCpu::default()), true);
        hart.dcsr_mut().set_step(true);
        let cleared = hart.begin_resume();
        assert!(!cleared);
        assert!(hart.dcsr().step());
    }

    #[test]
    fn locked_hart_is_never_released_by_reset_deassert() {
        let mut hart = Hart::new(0, Box::new(FakeCpu::default()), false);
        assert!(hart.have_reset());
        hart.request_reset(false);
        // still considered reset; the DM never calls assert_reset(false)
        // internally for an un-unlocked hart.
        assert!(hart.have_reset());
    }

    #[test]
    fn ack_have_reset_clears_only_when_requested() {
        let mut hart = Hart::new(0, Box::new(FakeCpu::default()), true);
        hart.request_reset(true);
        assert!(hart.have_reset());
        hart.ack_have_reset();
        assert!(!hart.have_reset());
    }
}
