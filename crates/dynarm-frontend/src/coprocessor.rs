//! The A32 coprocessor indirection surface: CP14/CP15 (and, historically,
//! CP10/11 for VFP) access is routed through whichever `Coprocessor` the
//! embedder installed for that number rather than hard-coded into the
//! decoder. Only the dispatch path lives here; bundled VFP/CP15 semantics
//! belong to the embedder.

use dynarm_ir::{IrEmitter, Value};
use dynarm_types::A32LocationDescriptor;

pub const COPROCESSOR_COUNT: usize = 16;

/// What a coprocessor access compiles down to: either a value the
/// translator can treat as already resolved, or a request to keep calling
/// back into the embedder at block-execution time via the generic
/// `A32CoprocGetOneWord`/`A32CoprocSetOneWord` IR ops.
pub enum CoprocResult {
    Constant(u32),
    CallAtRuntime,
}

/// One slot of the 16-entry coprocessor table. Implementors decide, per
/// `MCR`/`MRC`-style access, whether the register is something the
/// translator can read without an IR op (e.g. a fixed ID register) or must
/// be proxied through the runtime accessors, which emitted code reaches
/// through the callback table.
pub trait Coprocessor {
    fn compile_get_one_word(&self, crn: u8, opc1: u8, crm: u8, opc2: u8) -> CoprocResult;
    fn compile_set_one_word(&self, crn: u8, opc1: u8, crm: u8, opc2: u8) -> CoprocResult;

    /// Run-time read, reached when `compile_get_one_word` chose
    /// `CallAtRuntime`. Reads of registers a coprocessor does not model
    /// return zero rather than faulting.
    fn get_one_word(&mut self, _crn: u8, _opc1: u8, _crm: u8, _opc2: u8) -> u32 {
        0
    }

    /// Run-time write counterpart; ignored by default.
    fn set_one_word(&mut self, _crn: u8, _opc1: u8, _crm: u8, _opc2: u8, _value: u32) {}
}

pub type CoprocessorTable = [Option<Box<dyn Coprocessor>>; COPROCESSOR_COUNT];

pub fn empty_coprocessor_table() -> CoprocessorTable {
    std::array::from_fn(|_| None)
}

/// Emit the IR for an `MRC`-style read of `CPn`, `crn`, `opc1`, `crm`,
/// `opc2`, writing the result into `rt`. When no coprocessor is installed
/// for `cp_num`, or it asks to be called at runtime, falls back to the
/// generic side-effecting op so the backend can still raise to the
/// embedder.
pub fn emit_coproc_get(
    emitter: &mut IrEmitter<A32LocationDescriptor>,
    table: &CoprocessorTable,
    cp_num: u8,
    crn: u8,
    opc1: u8,
    crm: u8,
    opc2: u8,
) -> Value {
    if let Some(cp) = table.get(cp_num as usize).and_then(|slot| slot.as_ref()) {
        if let CoprocResult::Constant(value) = cp.compile_get_one_word(crn, opc1, crm, opc2) {
            return Value::ImmU32(value);
        }
    }
    emitter.emit(
        dynarm_ir::Opcode::A32CoprocGetOneWord,
        vec![
            Value::ImmU8(cp_num),
            Value::ImmU8(crn),
            Value::ImmU8(opc1),
            Value::ImmU8(crm),
            Value::ImmU8(opc2),
        ],
    )
}

pub fn emit_coproc_set(
    emitter: &mut IrEmitter<A32LocationDescriptor>,
    table: &CoprocessorTable,
    cp_num: u8,
    crn: u8,
    opc1: u8,
    crm: u8,
    opc2: u8,
    value: Value,
) {
    if let Some(cp) = table.get(cp_num as usize).and_then(|slot| slot.as_ref()) {
        if matches!(cp.compile_set_one_word(crn, opc1, crm, opc2), CoprocResult::Constant(_)) {
            return;
        }
    }
    emitter.emit_void(
        dynarm_ir::Opcode::A32CoprocSetOneWord,
        vec![
            Value::ImmU8(cp_num),
            Value::ImmU8(crn),
            Value::ImmU8(opc1),
            Value::ImmU8(crm),
            Value::ImmU8(opc2),
            value,
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynarm_ir::Opcode;

    struct FixedId(u32);
    impl Coprocessor for FixedId {
        fn compile_get_one_word(&self, _crn: u8, _opc1: u8, _crm: u8, _opc2: u8) -> CoprocResult {
            CoprocResult::Constant(self.0)
        }
        fn compile_set_one_word(&self, _crn: u8, _opc1: u8, _crm: u8, _opc2: u8) -> CoprocResult {
            CoprocResult::CallAtRuntime
        }
    }

    #[test]
    fn an_installed_coprocessor_can_fold_a_read_to_a_constant() {
        let loc = A32LocationDescriptor::new(0, false, false, 0, 0);
        let mut emitter = IrEmitter::new(loc);
        let mut table = empty_coprocessor_table();
        table[15] = Some(Box::new(FixedId(0x4107_2000)));
        let v = emit_coproc_get(&mut emitter, &table, 15, 0, 0, 0, 0);
        assert_eq!(v, Value::ImmU32(0x4107_2000));
    }

    #[test]
    fn an_uninstalled_coprocessor_falls_back_to_the_runtime_op() {
        let loc = A32LocationDescriptor::new(0, false, false, 0, 0);
        let mut emitter = IrEmitter::new(loc);
        let table = empty_coprocessor_table();
        let _ = emit_coproc_get(&mut emitter, &table, 14, 0, 0, 0, 0);
        emitter.set_terminator(dynarm_ir::Terminator::ReturnToDispatch);
        let block = emitter.finish();
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::A32CoprocGetOneWord));
    }
}
