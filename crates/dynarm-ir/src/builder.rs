use dynarm_types::Cond;

use crate::{
    block::Block,
    inst::Inst,
    opcode::Opcode,
    terminator::{Location, Terminator},
    value::{InstId, Value},
};

/// The translator's only way to produce IR. Wraps a single
/// [`Block`] under construction and offers typed convenience operations;
/// architecture-specific helpers (guest-register get/set, coprocessor
/// access) live as extension traits in `dynarm-frontend` so this crate
/// stays architecture-neutral.
pub struct IrEmitter<L: Location> {
    block: Block<L>,
}

impl<L: Location> IrEmitter<L> {
    pub fn new(location: L) -> Self {
        IrEmitter {
            block: Block::new(location),
        }
    }

    pub fn block(&self) -> &Block<L> {
        &self.block
    }

    pub fn block_mut(&mut self) -> &mut Block<L> {
        &mut self.block
    }

    /// Extend the condition-failed exit as the translator consumes more
    /// instructions of the same conditional run: a failing block condition
    /// skips the whole run, so the fail destination tracks the end of what
    /// has been translated so far.
    pub fn extend_condition_failed(&mut self, location: L, cycles: u64) {
        self.block.condition_failed_location = Some(location);
        self.block.condition_failed_cycle_count += cycles;
    }

    pub fn is_terminated(&self) -> bool {
        self.block.is_terminated()
    }

    pub fn advance_cycles(&mut self, n: u64) {
        self.block.cycle_count += n;
    }

    /// Establish the block-level condition for a Thumb IT region.
    /// Returns `false` if a condition is already
    /// set and differs, signalling the translator must end the block
    /// instead of emitting into it.
    pub fn set_block_condition(&mut self, cond: Cond, condition_failed_location: L) -> bool {
        match self.block.condition {
            None => {
                self.block.condition = Some(cond);
                self.block.condition_failed_location = Some(condition_failed_location);
                true
            }
            Some(existing) => existing == cond,
        }
    }

    /// Low-level emission: append `opcode(args)`, bumping the use count of
    /// every argument that refers to a prior instruction, and return a
    /// `Value::Ref` handle to the new instruction.
    pub fn emit(&mut self, opcode: Opcode, args: Vec<Value>) -> Value {
        for a in &args {
            if let Value::Ref(id) = a {
                self.block.inst(*id).add_use();
            }
        }
        let id = self.block.push(Inst::new(opcode, args));
        Value::Ref(id)
    }

    /// Emission for opcodes with no result (side-effecting statements); the
    /// returned `InstId` lets the caller attach a virtual use later (e.g.
    /// flag producers kept alive through `GetCarryFromOp`).
    pub fn emit_void(&mut self, opcode: Opcode, args: Vec<Value>) -> InstId {
        for a in &args {
            if let Value::Ref(id) = a {
                self.block.inst(*id).add_use();
            }
        }
        self.block.push(Inst::new(opcode, args))
    }

    pub fn set_terminator(&mut self, term: Terminator<L>) {
        self.block.set_terminator(term);
    }

    pub fn finish(self) -> Block<L> {
        self.block
    }

    // --- architecture-neutral arithmetic/logic convenience ops ---

    pub fn add32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Add32, vec![a, b])
    }
    pub fn add64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Add64, vec![a, b])
    }
    pub fn sub32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Sub32, vec![a, b])
    }
    pub fn sub64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Sub64, vec![a, b])
    }
    pub fn add_with_carry32(&mut self, a: Value, b: Value, carry_in: Value) -> Value {
        self.emit(Opcode::AddWithCarry32, vec![a, b, carry_in])
    }
    pub fn mul32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Mul32, vec![a, b])
    }
    pub fn and32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::And32, vec![a, b])
    }
    pub fn or32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Or32, vec![a, b])
    }
    pub fn eor32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Eor32, vec![a, b])
    }
    pub fn not32(&mut self, a: Value) -> Value {
        self.emit(Opcode::Not32, vec![a])
    }
    pub fn lsl32(&mut self, a: Value, shift: Value) -> Value {
        self.emit(Opcode::LogicalShiftLeft32, vec![a, shift])
    }
    pub fn lsr32(&mut self, a: Value, shift: Value) -> Value {
        self.emit(Opcode::LogicalShiftRight32, vec![a, shift])
    }
    pub fn asr32(&mut self, a: Value, shift: Value) -> Value {
        self.emit(Opcode::ArithShiftRight32, vec![a, shift])
    }
    pub fn ror32(&mut self, a: Value, shift: Value) -> Value {
        self.emit(Opcode::RotateRight32, vec![a, shift])
    }
    pub fn is_zero32(&mut self, a: Value) -> Value {
        self.emit(Opcode::IsZero32, vec![a])
    }

    pub fn get_carry_from_op(&mut self, producer: Value) -> Value {
        self.emit(Opcode::GetCarryFromOp, vec![producer])
    }
    pub fn get_overflow_from_op(&mut self, producer: Value) -> Value {
        self.emit(Opcode::GetOverflowFromOp, vec![producer])
    }
    pub fn get_nzcv_from_op(&mut self, producer: Value) -> Value {
        self.emit(Opcode::GetNZCVFromOp, vec![producer])
    }
    pub fn test_condition(&mut self, cond: Cond, nzcv: Value) -> Value {
        self.emit(Opcode::TestCondition, vec![Value::ImmCond(cond), nzcv])
    }
    pub fn conditional_select32(&mut self, cond_value: Value, then_v: Value, else_v: Value) -> Value {
        self.emit(Opcode::ConditionalSelect32, vec![cond_value, then_v, else_v])
    }

    pub fn read_memory8(&mut self, vaddr: Value) -> Value {
        self.emit(Opcode::ReadMemory8, vec![vaddr])
    }
    pub fn read_memory16(&mut self, vaddr: Value) -> Value {
        self.emit(Opcode::ReadMemory16, vec![vaddr])
    }
    pub fn read_memory32(&mut self, vaddr: Value) -> Value {
        self.emit(Opcode::ReadMemory32, vec![vaddr])
    }
    pub fn read_memory64(&mut self, vaddr: Value) -> Value {
        self.emit(Opcode::ReadMemory64, vec![vaddr])
    }
    pub fn write_memory8(&mut self, vaddr: Value, data: Value) {
        self.emit_void(Opcode::WriteMemory8, vec![vaddr, data]);
    }
    pub fn write_memory16(&mut self, vaddr: Value, data: Value) {
        self.emit_void(Opcode::WriteMemory16, vec![vaddr, data]);
    }
    pub fn write_memory32(&mut self, vaddr: Value, data: Value) {
        self.emit_void(Opcode::WriteMemory32, vec![vaddr, data]);
    }
    pub fn write_memory64(&mut self, vaddr: Value, data: Value) {
        self.emit_void(Opcode::WriteMemory64, vec![vaddr, data]);
    }

    pub fn exclusive_read_memory32(&mut self, vaddr: Value) -> Value {
        self.emit(Opcode::ExclusiveReadMemory32, vec![vaddr])
    }
    pub fn exclusive_write_memory32(&mut self, vaddr: Value, data: Value) -> Value {
        self.emit(Opcode::ExclusiveWriteMemory32, vec![vaddr, data])
    }
    pub fn clear_exclusive(&mut self) {
        self.emit_void(Opcode::ClearExclusive, vec![]);
    }

    pub fn call_supervisor(&mut self, imm: Value) {
        self.emit_void(Opcode::CallSupervisor, vec![imm]);
    }
    pub fn exception_raised(&mut self, pc: Value, exception_kind: Value) {
        self.emit_void(Opcode::ExceptionRaised, vec![pc, exception_kind]);
    }
    pub fn nop(&mut self) {
        self.emit_void(Opcode::Nop, vec![]);
    }

    pub fn zero_memory_block(&mut self, vaddr: Value, byte_count: u32) {
        self.emit_void(Opcode::ZeroMemoryBlock, vec![vaddr, Value::ImmU32(byte_count)]);
    }

    /// Record `target_hash` (a packed location descriptor) and its code
    /// pointer on the return stack buffer; paired with a later block's
    /// `PopRSBHint` terminator.
    pub fn push_rsb(&mut self, target_hash: u64) {
        self.emit_void(Opcode::PushRSB, vec![Value::ImmU64(target_hash)]);
    }

    pub fn and64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::And64, vec![a, b])
    }
    pub fn or64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Or64, vec![a, b])
    }
    pub fn eor64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::Eor64, vec![a, b])
    }
    pub fn not64(&mut self, a: Value) -> Value {
        self.emit(Opcode::Not64, vec![a])
    }
    pub fn lsl64(&mut self, a: Value, shift: Value) -> Value {
        self.emit(Opcode::LogicalShiftLeft64, vec![a, shift])
    }
    pub fn lsr64(&mut self, a: Value, shift: Value) -> Value {
        self.emit(Opcode::LogicalShiftRight64, vec![a, shift])
    }
    pub fn asr64(&mut self, a: Value, shift: Value) -> Value {
        self.emit(Opcode::ArithShiftRight64, vec![a, shift])
    }
    pub fn is_zero64(&mut self, a: Value) -> Value {
        self.emit(Opcode::IsZero64, vec![a])
    }
    pub fn zero_extend_to_long(&mut self, a: Value) -> Value {
        self.emit(Opcode::ZeroExtendToLong, vec![a])
    }
    pub fn least_significant_word(&mut self, a: Value) -> Value {
        self.emit(Opcode::LeastSignificantWord, vec![a])
    }

    pub fn fp_add32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPAdd32, vec![a, b])
    }
    pub fn fp_add64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPAdd64, vec![a, b])
    }
    pub fn fp_sub32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPSub32, vec![a, b])
    }
    pub fn fp_sub64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPSub64, vec![a, b])
    }
    pub fn fp_mul32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPMul32, vec![a, b])
    }
    pub fn fp_mul64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPMul64, vec![a, b])
    }
    pub fn fp_div32(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPDiv32, vec![a, b])
    }
    pub fn fp_div64(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::FPDiv64, vec![a, b])
    }
    /// `rounding` is a `RoundingMode as u8` immediate; the emitter picks a
    /// host rounding-mode form or a library fallback from it.
    pub fn fp_to_fixed_s64(&mut self, a: Value, rounding: u8) -> Value {
        self.emit(Opcode::FPToFixedS64, vec![a, Value::ImmU8(rounding)])
    }
    pub fn fp_to_fixed_u64(&mut self, a: Value, rounding: u8) -> Value {
        self.emit(Opcode::FPToFixedU64, vec![a, Value::ImmU8(rounding)])
    }

    pub fn vector_add(&mut self, esize: u32, a: Value, b: Value) -> Value {
        let opcode = match esize {
            8 => Opcode::VectorAdd8,
            16 => Opcode::VectorAdd16,
            32 => Opcode::VectorAdd32,
            64 => Opcode::VectorAdd64,
            _ => panic!("unsupported vector element size {esize}"),
        };
        self.emit(opcode, vec![a, b])
    }
}
