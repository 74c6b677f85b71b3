//! The fixed, architecture-aware IR optimization pipeline. Every
//! block produced by the translator passes through exactly one of
//! [`run_a32`]/[`run_a64`] before it reaches the backend; there is no
//! configurable pass ordering, only which of the fixed steps are enabled.

pub mod config;
pub mod passes;
pub mod pipeline;

pub use config::{OptConfig, Optimization, UnsafeOptimization};
pub use pipeline::{run_a32, run_a64};
pub use passes::verify::VerificationError;

#[cfg(test)]
mod tests {
    use super::*;
    use dynarm_ir::IrEmitter;
    use dynarm_types::{A32LocationDescriptor, A32Reg, MemoryProbe};

    struct NoReadOnly;
    impl MemoryProbe for NoReadOnly {
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

    #[test]
    fn redundant_register_roundtrip_is_eliminated() {
        use dynarm_ir::{Opcode, Terminator, Value};

        let loc = A32LocationDescriptor::new(0x1000, false, false, 0, 0);
        let mut emitter = IrEmitter::new(loc);
        // Set(Get(R0)) — a pure roundtrip with no observable effect.
        let r0 = emitter.emit(Opcode::A32GetRegister, vec![Value::ImmA32Reg(A32Reg::R0)]);
        emitter.emit_void(Opcode::A32SetRegister, vec![Value::ImmA32Reg(A32Reg::R0), r0]);
        emitter.set_terminator(Terminator::ReturnToDispatch);
        let mut block = emitter.finish();

        let config = OptConfig::default();
        run_a32(&mut block, &config, &NoReadOnly).expect("verification must pass");

        assert!(
            block.insts().iter().all(|i| i.opcode == Opcode::Nop),
            "both the redundant get and the no-op set should have been eliminated"
        );
    }

    #[test]
    fn constant_arithmetic_folds_to_a_single_immediate_store() {
        use dynarm_ir::{Opcode, Terminator, Value};

        let loc = A32LocationDescriptor::new(0x2000, false, false, 0, 0);
        let mut emitter = IrEmitter::new(loc);
        let sum = emitter.add32(Value::ImmU32(2), Value::ImmU32(40));
        emitter.emit_void(Opcode::A32SetRegister, vec![Value::ImmA32Reg(A32Reg::R1), sum]);
        emitter.set_terminator(Terminator::ReturnToDispatch);
        let mut block = emitter.finish();

        run_a32(&mut block, &OptConfig::default(), &NoReadOnly).unwrap();

        let set = block
            .insts()
            .iter()
            .find(|i| i.opcode == Opcode::A32SetRegister)
            .expect("the set must survive, only its operand should change");
        assert_eq!(set.args[1], Value::ImmU32(42));
    }

    #[test]
    fn verification_rejects_a_block_with_no_terminator() {
        let loc = A32LocationDescriptor::new(0x3000, false, false, 0, 0);
        let block: dynarm_ir::Block<A32LocationDescriptor> = dynarm_ir::Block::new(loc);
        let err = passes::verify::run(&block).unwrap_err();
        assert_eq!(err, VerificationError::MissingTerminator);
    }

    #[test]
    fn dc_zva_lowers_to_zero_memory_block_when_hooking_is_disabled() {
        use dynarm_ir::{Opcode, Terminator, Value};
        use dynarm_types::A64LocationDescriptor;

        let loc = A64LocationDescriptor::new(0x4000, 0, false);
        let mut emitter = IrEmitter::new(loc);
        emitter.emit_void(
            Opcode::A64DataCacheOperationRaised,
            vec![Value::ImmU8(0), Value::ImmU64(0x8000), Value::ImmU32(64)],
        );
        emitter.set_terminator(Terminator::ReturnToDispatch);
        let mut block = emitter.finish();

        let mut config = OptConfig::default();
        config.hook_data_cache_operations = false;
        run_a64(&mut block, &config, &NoReadOnly).unwrap();

        let lowered = block
            .insts()
            .iter()
            .find(|i| i.opcode == Opcode::ZeroMemoryBlock)
            .expect("DC ZVA must lower to ZeroMemoryBlock when hooking is off");
        assert_eq!(lowered.args, vec![Value::ImmU64(0x8000), Value::ImmU32(64)]);
    }

    #[test]
    fn dc_zva_is_left_alone_when_hooking_is_enabled() {
        use dynarm_ir::{Opcode, Terminator, Value};
        use dynarm_types::A64LocationDescriptor;

        let loc = A64LocationDescriptor::new(0x5000, 0, false);
        let mut emitter = IrEmitter::new(loc);
        emitter.emit_void(
            Opcode::A64DataCacheOperationRaised,
            vec![Value::ImmU8(0), Value::ImmU64(0x9000), Value::ImmU32(64)],
        );
        emitter.set_terminator(Terminator::ReturnToDispatch);
        let mut block = emitter.finish();

        let mut config = OptConfig::default();
        config.hook_data_cache_operations = true;
        run_a64(&mut block, &config, &NoReadOnly).unwrap();

        assert!(block
            .insts()
            .iter()
            .any(|i| i.opcode == Opcode::A64DataCacheOperationRaised));
    }
}
