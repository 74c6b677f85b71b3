use dynarm_types::{A32LocationDescriptor, A64LocationDescriptor, Cond};

use crate::value::Value;

/// Either architecture's location descriptor; the terminator and block
/// types are generic over this so the same shapes serve A32 and A64
/// translation without duplicating the enum. The backend and the block
/// cache only ever see locations through this trait: `unique_hash` is the
/// cache key and the value compared by the RSB and fast-dispatch epilogues,
/// so it must be injective over the descriptor's fields, not merely well
/// distributed.
pub trait Location: Copy + std::fmt::Debug + PartialEq + Eq + std::hash::Hash {
    fn unique_hash(&self) -> u64;
    fn pc(&self) -> u64;
    fn is_single_step(&self) -> bool;
}

impl Location for A32LocationDescriptor {
    fn unique_hash(&self) -> u64 {
        A32LocationDescriptor::unique_hash(self)
    }
    fn pc(&self) -> u64 {
        A32LocationDescriptor::pc(self) as u64
    }
    fn is_single_step(&self) -> bool {
        A32LocationDescriptor::is_single_step(self)
    }
}

impl Location for A64LocationDescriptor {
    fn unique_hash(&self) -> u64 {
        A64LocationDescriptor::unique_hash(self)
    }
    fn pc(&self) -> u64 {
        A64LocationDescriptor::pc(self)
    }
    fn is_single_step(&self) -> bool {
        A64LocationDescriptor::is_single_step(self)
    }
}

/// The symbolic exit of a block. Nesting is bounded and
/// structural: `If`/`CheckBit`/`CheckHalt` each carry boxed inner
/// terminators rather than being represented as control-flow edges, because
/// IR blocks are single-entry/single-exit — the nesting is resolved
/// entirely inside one emitted epilogue, never by branching to another IR
/// block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator<L: Location> {
    /// Hand the guest PC to the interpreter fallback rather than compiling.
    Interpret(L),
    /// Leave emitted code and go back to the dispatcher's reentry stub.
    ReturnToDispatch,
    /// Chain to another compiled block via a patchable direct jump.
    LinkBlock(L),
    /// Like `LinkBlock`, but falls back to `FastDispatchHint` on cache miss
    /// instead of leaving emitted code.
    LinkBlockFast(L),
    /// Consult the return-stack-buffer hint before falling through to
    /// dispatch.
    PopRSBHint,
    /// Consult the direct-mapped fast-dispatch table before falling through
    /// to dispatch.
    FastDispatchHint,
    /// Evaluate `cond` against the NZCV value `cond` was computed from; if
    /// it held, execute `then_term`, else `else_term`.
    If {
        cond: Cond,
        nzcv: Value,
        then_term: Box<Terminator<L>>,
        else_term: Box<Terminator<L>>,
    },
    /// Branch on the guest-state "check-bit" field (`CBZ`/`CBNZ`-style late
    /// conditions, written by `SetCheckBit`).
    CheckBit {
        then_term: Box<Terminator<L>>,
        else_term: Box<Terminator<L>>,
    },
    /// Test the halt flag first; if set, exit to the embedding API, else
    /// run `inner`.
    CheckHalt(Box<Terminator<L>>),
}

impl<L: Location> Terminator<L> {
    pub fn check_halt(inner: Terminator<L>) -> Self {
        Terminator::CheckHalt(Box::new(inner))
    }

    pub fn check_bit(then_term: Terminator<L>, else_term: Terminator<L>) -> Self {
        Terminator::CheckBit {
            then_term: Box::new(then_term),
            else_term: Box::new(else_term),
        }
    }

    pub fn if_cond(cond: Cond, nzcv: Value, then_term: Terminator<L>, else_term: Terminator<L>) -> Self {
        Terminator::If {
            cond,
            nzcv,
            then_term: Box::new(then_term),
            else_term: Box::new(else_term),
        }
    }

    /// Rewrite every [`Value`] carried directly by this terminator (today,
    /// only `If::nzcv`) through `f`. Used by optimizer passes that
    /// substitute values produced by get/set elimination or constant
    /// folding.
    pub fn rewrite_values(&mut self, f: &mut dyn FnMut(Value) -> Value) {
        match self {
            Terminator::If { nzcv, then_term, else_term, .. } => {
                *nzcv = f(*nzcv);
                then_term.rewrite_values(f);
                else_term.rewrite_values(f);
            }
            Terminator::CheckBit { then_term, else_term } => {
                then_term.rewrite_values(f);
                else_term.rewrite_values(f);
            }
            Terminator::CheckHalt(inner) => inner.rewrite_values(f),
            Terminator::Interpret(_)
            | Terminator::ReturnToDispatch
            | Terminator::LinkBlock(_)
            | Terminator::LinkBlockFast(_)
            | Terminator::PopRSBHint
            | Terminator::FastDispatchHint => {}
        }
    }

    /// The maximum nesting depth of this terminator, used by the verifier
    /// to enforce "nesting is bounded".
    pub fn depth(&self) -> usize {
        match self {
            Terminator::If { then_term, else_term, .. } => {
                1 + then_term.depth().max(else_term.depth())
            }
            Terminator::CheckBit { then_term, else_term } => {
                1 + then_term.depth().max(else_term.depth())
            }
            Terminator::CheckHalt(inner) => 1 + inner.depth(),
            _ => 0,
        }
    }
}

/// The bound the verifier enforces on [`Terminator::depth`]. Emitted
/// epilogues are hand-rolled per terminator shape; beyond this depth
/// they would stop being a handful of branches and need to become a real
/// tree walk, which the backend does not implement.
pub const MAX_TERMINATOR_DEPTH: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;
    use dynarm_types::A64LocationDescriptor;

    #[test]
    fn depth_counts_nesting() {
        let t: Terminator<A64LocationDescriptor> = Terminator::check_halt(Terminator::check_bit(
            Terminator::ReturnToDispatch,
            Terminator::PopRSBHint,
        ));
        assert_eq!(t.depth(), 2);
    }

    #[test]
    fn flat_terminators_have_zero_depth() {
        let t: Terminator<A64LocationDescriptor> = Terminator::ReturnToDispatch;
        assert_eq!(t.depth(), 0);
    }
}
