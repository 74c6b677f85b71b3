use std::cell::Cell;

use crate::{opcode::Opcode, value::Value};

/// One micro-op: an opcode, its fixed-arity argument list, and a use count
/// maintained incrementally by every producer/consumer edge change.
/// `use_count` is a `Cell` so callers holding a shared
/// reference into the block's instruction vector (the common case while
/// walking for a pass) can still record new uses without restructuring the
/// walk into something that needs `&mut` everywhere.
#[derive(Debug, Clone)]
pub struct Inst {
    pub opcode: Opcode,
    pub args: Vec<Value>,
    use_count: Cell<u32>,
}

impl Inst {
    pub fn new(opcode: Opcode, args: Vec<Value>) -> Self {
        Inst {
            opcode,
            args,
            use_count: Cell::new(0),
        }
    }

    pub fn use_count(&self) -> u32 {
        self.use_count.get()
    }

    pub fn add_use(&self) {
        self.use_count.set(self.use_count.get() + 1);
    }

    /// Drop one use; never underflows because every call site that removes
    /// a use first confirmed the edge existed.
    pub fn remove_use(&self) {
        let n = self.use_count.get();
        debug_assert!(n > 0, "use count underflow");
        self.use_count.set(n.saturating_sub(1));
    }

    /// An instruction is dead iff it has zero uses and its opcode carries no
    /// side effect.
    pub fn is_dead(&self) -> bool {
        self.use_count.get() == 0 && !self.opcode.has_side_effect()
    }
}
