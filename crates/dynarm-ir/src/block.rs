use dynarm_types::Cond;

use crate::{
    inst::Inst,
    terminator::{Location, Terminator},
    value::InstId,
};

/// A single-entry/single-exit sequence of IR instructions.
/// Intra-block branches do not exist: the only way control leaves a block
/// is its one `terminator`.
#[derive(Debug, Clone)]
pub struct Block<L: Location> {
    pub location: L,
    insts: Vec<Inst>,
    terminator: Option<Terminator<L>>,
    /// Set once, on the first emission inside a Thumb IT region; `None` for
    /// an unconditionally-executed block.
    pub condition: Option<Cond>,
    /// Where to resume if `condition` does not hold for the whole block.
    pub condition_failed_location: Option<L>,
    pub cycle_count: u64,
    pub condition_failed_cycle_count: u64,
    /// One past the last guest byte this block was translated from; with
    /// the entry PC it forms the range the cache's interval index uses for
    /// `invalidate_range`.
    pub guest_code_end: u64,
}

impl<L: Location> Block<L> {
    pub fn new(location: L) -> Self {
        Block {
            location,
            insts: Vec::new(),
            terminator: None,
            condition: None,
            condition_failed_location: None,
            cycle_count: 0,
            condition_failed_cycle_count: 0,
            guest_code_end: 0,
        }
    }

    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    pub fn insts_mut(&mut self) -> &mut Vec<Inst> {
        &mut self.insts
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0 as usize]
    }

    /// Append `inst`, returning the id by which later instructions refer to
    /// it. Panics if the terminator has already been set — well-formedness
    /// makes further emission after terminator-set a caller bug, not
    /// a recoverable error.
    pub fn push(&mut self, inst: Inst) -> InstId {
        assert!(
            self.terminator.is_none(),
            "cannot emit into a block whose terminator is already set"
        );
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    pub fn terminator(&self) -> Option<&Terminator<L>> {
        self.terminator.as_ref()
    }

    pub fn terminator_mut(&mut self) -> Option<&mut Terminator<L>> {
        self.terminator.as_mut()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }

    /// Set the terminator exactly once. Panics on a second call: "a block
    /// must have exactly one terminator, set exactly once". Values
    /// the terminator references (an `If` condition's NZCV operand) gain a
    /// use, keeping the exact-use-count invariant intact for the verifier
    /// and the register allocator alike.
    pub fn set_terminator(&mut self, mut term: Terminator<L>) {
        assert!(
            self.terminator.is_none(),
            "terminator already set for this block"
        );
        let insts = &self.insts;
        term.rewrite_values(&mut |v| {
            if let crate::value::Value::Ref(id) = v {
                insts[id.0 as usize].add_use();
            }
            v
        });
        self.terminator = Some(term);
    }

    /// Rewrite every value the terminator carries, keeping use counts
    /// exact: a substituted-away `Ref` loses its use, a substituted-in one
    /// gains it. Optimizer passes must come through here rather than
    /// mutating the terminator directly.
    pub fn rewrite_terminator_values(&mut self, f: &mut dyn FnMut(crate::value::Value) -> crate::value::Value) {
        use crate::value::Value;
        let Block { insts, terminator, .. } = self;
        if let Some(term) = terminator.as_mut() {
            term.rewrite_values(&mut |v| {
                let new = f(v);
                if new != v {
                    if let Value::Ref(old) = v {
                        insts[old.0 as usize].remove_use();
                    }
                    if let Value::Ref(id) = new {
                        insts[id.0 as usize].add_use();
                    }
                }
                new
            });
        }
    }

    /// Rewrite the `idx`-th argument of `user` to `new_value`, adjusting use
    /// counts so they stay exact: the old target (if a `Ref`) loses a use,
    /// the new target (if a `Ref`) gains one. Used by the get/set
    /// elimination and constant-folding passes to forward-substitute a
    /// value without renumbering instructions.
    pub fn rewrite_arg(&mut self, user: InstId, idx: usize, new_value: crate::value::Value) {
        use crate::value::Value;
        let old_value = self.inst(user).args[idx];
        if let Value::Ref(old_id) = old_value {
            self.inst(old_id).remove_use();
        }
        if let Value::Ref(new_id) = new_value {
            self.inst(new_id).add_use();
        }
        self.insts[user.0 as usize].args[idx] = new_value;
    }

    /// Remove the instruction at `id` in place, leaving a hole (dead-code
    /// elimination never renumbers live instructions, so every other
    /// `InstId` in the block stays valid). Drops this instruction's own use
    /// edges on its former arguments so removing a chain of producers
    /// converges to an exact zero use count at each step.
    pub fn remove(&mut self, id: InstId) {
        use crate::value::Value;
        let old_args = std::mem::take(&mut self.insts[id.0 as usize].args);
        for a in old_args {
            if let Value::Ref(arg_id) = a {
                self.inst(arg_id).remove_use();
            }
        }
        self.insts[id.0 as usize] = Inst::new(crate::opcode::Opcode::Nop, Vec::new());
    }
}
