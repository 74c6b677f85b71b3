//! The A32/Thumb conditional-execution state machine. Thumb `IT` blocks
//! guard a run of up to four instructions
//! whose per-slot condition is derived from the live IT state rather than
//! carried in the instruction encoding itself, and that state's top nibble
//! doubles as "effective condition for the next instruction" precisely
//! because `advance` rotates mask bits up into it — the same trick the
//! architecture's own ITSTATE register relies on. This machine is what lets
//! that map onto the single block-level condition a block carries, by
//! forcing a block boundary the moment a second, different condition would
//! be needed.

use dynarm_types::Cond;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondState {
    /// No conditional region is open; the next instruction may start one.
    None,
    /// Inside an `IT`-guarded region, collecting instructions whose
    /// condition is read off the live IT state via [`ItTracker::current_cond`].
    Translating,
    /// Past the guarded region, inside the same block, translating
    /// unconditionally-executed trailing instructions.
    Trailing,
    /// The current instruction is incompatible with the block's
    /// established condition; the translator must end the block before
    /// emitting it.
    Break,
}

/// Tracks IT-state across a block's worth of Thumb decoding. `itstate` is
/// the architectural 8-bit IT state register field (condition base in the
/// top nibble, mask in the bottom nibble per the Thumb encoding); `advance`
/// shifts it the way executing one more guarded instruction does.
#[derive(Debug, Clone, Copy)]
pub struct ItTracker {
    itstate: u8,
    state: CondState,
}

impl ItTracker {
    pub fn new() -> Self {
        ItTracker {
            itstate: 0,
            state: CondState::None,
        }
    }

    /// Resume from an architectural IT state, as when a block begins in the
    /// middle of an IT region (the condition-failed continuation of an
    /// earlier block carries the advanced state in its location
    /// descriptor).
    pub fn from_itstate(itstate: u8) -> Self {
        ItTracker {
            itstate,
            state: if itstate & 0xF != 0 {
                CondState::Translating
            } else {
                CondState::None
            },
        }
    }

    pub fn state(&self) -> CondState {
        self.state
    }

    pub fn itstate(&self) -> u8 {
        self.itstate
    }

    /// `IT{x}{y}{z} cond` sets up the guarded region: up to four
    /// instructions, each either executing under `cond` or its inverse per
    /// the `x`/`y`/`z` bits, encoded together as the 8-bit IT state.
    pub fn enter_it_block(&mut self, itstate: u8) {
        self.itstate = itstate;
        self.state = CondState::Translating;
    }

    /// The condition the *next* instruction in a Thumb IT region executes
    /// under. Outside a guarded region this is always `Al`. Reads the live
    /// top nibble rather than anything cached at `enter_it_block` time,
    /// because `advance` changes it slot to slot (e.g. `ITE EQ` flips the
    /// second slot to `NE`).
    pub fn current_cond(&self) -> Cond {
        match self.state {
            CondState::Translating => Cond::from_bits((self.itstate >> 4) & 0xF),
            _ => Cond::Al,
        }
    }

    /// Check an explicitly-encoded instruction condition (A32's per-word
    /// cond field, or Thumb `B<c>`'s) against the condition already
    /// established for this block. Outside any IT region the first checked
    /// condition establishes it; a later mismatching one forces `Break`.
    pub fn check(&mut self, cond: Cond) -> CondState {
        let compatible = match self.state {
            CondState::None | CondState::Trailing => cond == Cond::Al,
            CondState::Translating => cond == self.current_cond(),
            CondState::Break => false,
        };
        if !compatible {
            self.state = CondState::Break;
        }
        self.state
    }

    /// Advance the IT state after executing one more instruction inside
    /// the guarded region; once the mask bits are exhausted the tracker
    /// falls through to `Trailing` for the rest of the block.
    pub fn advance(&mut self) {
        if self.state != CondState::Translating {
            return;
        }
        self.itstate = if self.itstate & 0b111 == 0 {
            0
        } else {
            (self.itstate & 0b1110_0000) | ((self.itstate << 1) & 0b0001_1111)
        };
        if self.itstate & 0b1111 == 0 {
            self.state = CondState::Trailing;
        }
    }
}

impl Default for ItTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The ARM-encoding counterpart of [`ItTracker`]: A32 carries a condition
/// field in every instruction word instead of a separate IT state, but the
/// block-level mapping is the same four-state machine — a run of same-cond
/// instructions establishes the block condition, unconditional instructions
/// may trail it, and any other condition ends the block.
#[derive(Debug, Clone, Copy)]
pub struct ArmCondTracker {
    cond: Option<Cond>,
    state: CondState,
}

impl ArmCondTracker {
    pub fn new() -> Self {
        ArmCondTracker {
            cond: None,
            state: CondState::None,
        }
    }

    pub fn state(&self) -> CondState {
        self.state
    }

    /// The block condition established so far, if any.
    pub fn block_cond(&self) -> Option<Cond> {
        self.cond
    }

    /// Account for the next instruction's condition field. Returns the
    /// state the translator must act on: `Translating` means the
    /// instruction joins the conditional run (and the condition-failed
    /// location must be advanced past it), `Break` means the block ends
    /// before this instruction.
    pub fn check(&mut self, cond: Cond) -> CondState {
        self.state = match self.state {
            CondState::None => {
                if cond == Cond::Al {
                    CondState::None
                } else {
                    self.cond = Some(cond);
                    CondState::Translating
                }
            }
            CondState::Translating => {
                if Some(cond) == self.cond {
                    CondState::Translating
                } else if cond == Cond::Al {
                    CondState::Trailing
                } else {
                    CondState::Break
                }
            }
            CondState::Trailing => {
                if cond == Cond::Al {
                    CondState::Trailing
                } else {
                    CondState::Break
                }
            }
            CondState::Break => CondState::Break,
        };
        self.state
    }
}

impl Default for ArmCondTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_tracker_only_accepts_unconditional_code() {
        let mut t = ItTracker::new();
        assert_eq!(t.check(Cond::Al), CondState::None);
        assert_eq!(t.check(Cond::Eq), CondState::Break);
    }

    #[test]
    fn ite_flips_condition_on_the_second_slot() {
        let mut t = ItTracker::new();
        // ITE EQ: firstcond EQ (0000), mask 1100 -> first slot EQ (then),
        // second slot NE (else), then done.
        t.enter_it_block(0b0000_1100);
        assert_eq!(t.current_cond(), Cond::Eq);
        t.advance();
        assert_eq!(t.state(), CondState::Translating);
        assert_eq!(t.current_cond(), Cond::Ne);
        t.advance();
        assert_eq!(t.state(), CondState::Trailing);
    }

    #[test]
    fn single_instruction_it_block_falls_through_to_trailing() {
        let mut t = ItTracker::new();
        // IT EQ: mask 0b1000 -> one instruction, then done.
        t.enter_it_block(0b0000_1000);
        assert_eq!(t.current_cond(), Cond::Eq);
        t.advance();
        assert_eq!(t.state(), CondState::Trailing);
        assert_eq!(t.check(Cond::Al), CondState::Trailing);
    }

    #[test]
    fn a_mismatched_condition_forces_break() {
        let mut t = ItTracker::new();
        t.enter_it_block(0b0000_1000);
        assert_eq!(t.check(Cond::Ne), CondState::Break);
    }

    #[test]
    fn arm_same_cond_run_then_unconditional_trailing() {
        let mut t = ArmCondTracker::new();
        assert_eq!(t.check(Cond::Eq), CondState::Translating);
        assert_eq!(t.check(Cond::Eq), CondState::Translating);
        assert_eq!(t.check(Cond::Al), CondState::Trailing);
        assert_eq!(t.check(Cond::Al), CondState::Trailing);
        assert_eq!(t.block_cond(), Some(Cond::Eq));
    }

    #[test]
    fn arm_new_condition_after_trailing_breaks_the_block() {
        let mut t = ArmCondTracker::new();
        assert_eq!(t.check(Cond::Eq), CondState::Translating);
        assert_eq!(t.check(Cond::Al), CondState::Trailing);
        assert_eq!(t.check(Cond::Eq), CondState::Break);
    }

    #[test]
    fn arm_different_condition_mid_run_breaks_the_block() {
        let mut t = ArmCondTracker::new();
        assert_eq!(t.check(Cond::Ne), CondState::Translating);
        assert_eq!(t.check(Cond::Cs), CondState::Break);
    }
}
