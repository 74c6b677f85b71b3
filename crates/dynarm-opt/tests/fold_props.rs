//! Property tests for the constant folder: for
//! every pure opcode over immediate operands, the value the optimizer
//! folds to is bit-identical to evaluating the operation directly.

use dynarm_ir::{IrEmitter, Opcode, Terminator, Value};
use dynarm_opt::{run_a32, OptConfig};
use dynarm_types::{A32LocationDescriptor, A32Reg, MemoryProbe};
use proptest::prelude::*;

struct NoRom;

impl MemoryProbe for NoRom {
    fn is_read_only_memory(&self, _vaddr: u64) -> bool {
        false
    }
    fn memory_read_8(&self, _vaddr: u64) -> u8 {
        0
    }
    fn memory_read_16(&self, _vaddr: u64) -> u16 {
        0
    }
    fn memory_read_32(&self, _vaddr: u64) -> u32 {
        0
    }
    fn memory_read_64(&self, _vaddr: u64) -> u64 {
        0
    }
}

/// Fold `op(a, b)` through the full pipeline and return the immediate the
/// surviving register store carries.
fn fold_binary(op: Opcode, a: u32, b: u32) -> u32 {
    let loc = A32LocationDescriptor::new(0, false, false, 0, 0);
    let mut em = IrEmitter::new(loc);
    let result = em.emit(op, vec![Value::ImmU32(a), Value::ImmU32(b)]);
    em.emit_void(
        Opcode::A32SetRegister,
        vec![Value::ImmA32Reg(A32Reg::R0), result],
    );
    em.set_terminator(Terminator::ReturnToDispatch);
    let mut block = em.finish();
    run_a32(&mut block, &OptConfig::default(), &NoRom).expect("pipeline verifies");
    let set = block
        .insts()
        .iter()
        .find(|i| i.opcode == Opcode::A32SetRegister)
        .expect("the store survives folding");
    match set.args[1] {
        Value::ImmU32(v) => v,
        other => panic!("fold produced {other:?}, not an immediate"),
    }
}

proptest! {
    #[test]
    fn add_folds_to_wrapping_addition(a in any::<u32>(), b in any::<u32>()) {
        prop_assert_eq!(fold_binary(Opcode::Add32, a, b), a.wrapping_add(b));
    }

    #[test]
    fn sub_folds_to_wrapping_subtraction(a in any::<u32>(), b in any::<u32>()) {
        prop_assert_eq!(fold_binary(Opcode::Sub32, a, b), a.wrapping_sub(b));
    }

    #[test]
    fn mul_folds_to_wrapping_multiplication(a in any::<u32>(), b in any::<u32>()) {
        prop_assert_eq!(fold_binary(Opcode::Mul32, a, b), a.wrapping_mul(b));
    }

    #[test]
    fn bitwise_ops_fold_exactly(a in any::<u32>(), b in any::<u32>()) {
        prop_assert_eq!(fold_binary(Opcode::And32, a, b), a & b);
        prop_assert_eq!(fold_binary(Opcode::Or32, a, b), a | b);
        prop_assert_eq!(fold_binary(Opcode::Eor32, a, b), a ^ b);
    }

    #[test]
    fn rotate_folds_exactly(a in any::<u32>(), amount in 0u8..32) {
        let loc = A32LocationDescriptor::new(0, false, false, 0, 0);
        let mut em = IrEmitter::new(loc);
        let result = em.ror32(Value::ImmU32(a), Value::ImmU8(amount));
        em.emit_void(
            Opcode::A32SetRegister,
            vec![Value::ImmA32Reg(A32Reg::R0), result],
        );
        em.set_terminator(Terminator::ReturnToDispatch);
        let mut block = em.finish();
        run_a32(&mut block, &OptConfig::default(), &NoRom).unwrap();
        let set = block
            .insts()
            .iter()
            .find(|i| i.opcode == Opcode::A32SetRegister)
            .unwrap();
        prop_assert_eq!(set.args[1], Value::ImmU32(a.rotate_right(amount as u32)));
    }

    #[test]
    fn get_set_elimination_keeps_the_final_write(
        first in any::<u32>(),
        second in any::<u32>(),
    ) {
        let loc = A32LocationDescriptor::new(0, false, false, 0, 0);
        let mut em = IrEmitter::new(loc);
        em.emit_void(
            Opcode::A32SetRegister,
            vec![Value::ImmA32Reg(A32Reg::R1), Value::ImmU32(first)],
        );
        em.emit_void(
            Opcode::A32SetRegister,
            vec![Value::ImmA32Reg(A32Reg::R1), Value::ImmU32(second)],
        );
        em.set_terminator(Terminator::ReturnToDispatch);
        let mut block = em.finish();
        run_a32(&mut block, &OptConfig::default(), &NoRom).unwrap();
        let survivors: Vec<_> = block
            .insts()
            .iter()
            .filter(|i| i.opcode == Opcode::A32SetRegister)
            .collect();
        prop_assert_eq!(survivors.len(), 1, "the superseded write is dropped");
        prop_assert_eq!(survivors[0].args[1], Value::ImmU32(second));
    }
}
