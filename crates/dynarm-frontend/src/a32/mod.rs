//! A32 (32-bit ARM) and Thumb decode and translation.
//!
//! Full architectural coverage is out of scope; the tables
//! cover a representative working set: the data-processing space, multiply
//! and multiply-accumulate, load/store immediate, `LDREX`/`STREX`, branches
//! (`B`/`BL`/`BX`), `SVC`, hints, coprocessor moves, Thumb `PUSH`/`POP`
//! (both encodings), `IT`, and the Thumb arithmetic/compare/move group.

use dynarm_ir::{Block, IrEmitter, Opcode, Terminator, Value};
use dynarm_types::{A32LocationDescriptor, A32Reg, Cond, ExceptionKind};

use crate::{
    cond_state::{ArmCondTracker, CondState, ItTracker},
    coprocessor::{emit_coproc_get, emit_coproc_set, CoprocessorTable},
    decoder::{DecodeTable, Fields, Pattern},
    translate::{MemoryReadCode, StopReason, TranslateOptions},
};

/// Translates one A32 or Thumb block starting at `loc`, stopping at the
/// configured instruction budget, single-step mode, or the first
/// instruction that ends the block.
pub fn translate_a32<M: MemoryReadCode>(
    loc: A32LocationDescriptor,
    mem: &M,
    options: &TranslateOptions,
    coprocessors: &CoprocessorTable,
) -> (Block<A32LocationDescriptor>, StopReason) {
    if loc.is_thumb() {
        ThumbTranslator::new(loc, mem, options).run()
    } else {
        ArmTranslator::new(loc, mem, options, coprocessors).run()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    Stop(StopReason),
}

// --- ARM (32-bit encodings) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmOp {
    Mul,
    Mla,
    Ldrex,
    Strex,
    Bx,
    Hint,
    Mrc,
    Mcr,
    Svc,
    B,
    Bl,
    LdrImm,
    StrImm,
    DpImm,
    DpReg,
}

fn arm_table() -> DecodeTable<'static, ArmOp> {
    DecodeTable::new(
        32,
        vec![
            (Pattern { bits: "cccc0000000sdddd0000mmmm1001nnnn" }, ArmOp::Mul),
            (Pattern { bits: "cccc0000001sddddaaaammmm1001nnnn" }, ArmOp::Mla),
            (Pattern { bits: "cccc00011001nnnntttt111110011111" }, ArmOp::Ldrex),
            (Pattern { bits: "cccc00011000nnnndddd11111001tttt" }, ArmOp::Strex),
            (Pattern { bits: "cccc000100101111111111110001mmmm" }, ArmOp::Bx),
            (Pattern { bits: "cccc00110010000011110000iiiiiiii" }, ArmOp::Hint),
            (Pattern { bits: "cccc1110ooo1nnnnttttppppqqq1mmmm" }, ArmOp::Mrc),
            (Pattern { bits: "cccc1110ooo0nnnnttttppppqqq1mmmm" }, ArmOp::Mcr),
            (Pattern { bits: "cccc1111iiiiiiiiiiiiiiiiiiiiiiii" }, ArmOp::Svc),
            (Pattern { bits: "cccc1010iiiiiiiiiiiiiiiiiiiiiiii" }, ArmOp::B),
            (Pattern { bits: "cccc1011iiiiiiiiiiiiiiiiiiiiiiii" }, ArmOp::Bl),
            (Pattern { bits: "cccc0101u001nnnnttttiiiiiiiiiiii" }, ArmOp::LdrImm),
            (Pattern { bits: "cccc0101u000nnnnttttiiiiiiiiiiii" }, ArmOp::StrImm),
            (Pattern { bits: "cccc001oooosnnnnddddrrrriiiiiiii" }, ArmOp::DpImm),
            (Pattern { bits: "cccc000oooosnnnnddddiiiiiyy0mmmm" }, ArmOp::DpReg),
        ],
    )
    .expect("arm decode table patterns are fixed-width by construction")
}

struct ArmTranslator<'a, M> {
    mem: &'a M,
    options: &'a TranslateOptions,
    coprocessors: &'a CoprocessorTable,
    em: IrEmitter<A32LocationDescriptor>,
    loc: A32LocationDescriptor,
    pc: u32,
    cond: ArmCondTracker,
}

impl<'a, M: MemoryReadCode> ArmTranslator<'a, M> {
    fn new(
        loc: A32LocationDescriptor,
        mem: &'a M,
        options: &'a TranslateOptions,
        coprocessors: &'a CoprocessorTable,
    ) -> Self {
        ArmTranslator {
            mem,
            options,
            coprocessors,
            em: IrEmitter::new(loc),
            loc,
            pc: loc.pc(),
            cond: ArmCondTracker::new(),
        }
    }

    fn run(mut self) -> (Block<A32LocationDescriptor>, StopReason) {
        let table = arm_table();
        let single_step = self.options.single_step || self.loc.is_single_step();
        let mut count = 0usize;
        let stop = loop {
            if single_step && count > 0 {
                break StopReason::SingleStep;
            }
            if count >= self.options.max_block_size {
                break StopReason::MaxBlockSize;
            }
            let word = self.mem.memory_read_code(self.pc as u64);
            let Some((op, fields)) = table.decode(word) else {
                break self.undefined();
            };
            let cond = Cond::from_bits(fields[&'c'] as u8);
            if cond == Cond::Nv {
                break self.undefined();
            }
            match self.cond.check(cond) {
                CondState::Break => {
                    // The block ends before this instruction; it will head
                    // its own block with its own condition.
                    self.link_to(self.pc);
                    break StopReason::ControlFlow;
                }
                CondState::Translating => {
                    // The block condition gates the whole block, so a
                    // conditional run can only begin on an empty block;
                    // anything already translated forces a split here.
                    if self.em.block().condition.is_none()
                        && !self.em.block().insts().is_empty()
                    {
                        self.link_to(self.pc);
                        break StopReason::ControlFlow;
                    }
                    let fail = self.loc_at(self.pc.wrapping_add(4));
                    if !self.em.set_block_condition(cond, fail) {
                        self.link_to(self.pc);
                        break StopReason::ControlFlow;
                    }
                }
                _ => {}
            }
            let outcome = self.visit(op, &fields);
            self.em.advance_cycles(1);
            if self.cond.state() == CondState::Translating {
                self.em
                    .extend_condition_failed(self.loc_at(self.pc.wrapping_add(4)), 1);
            }
            self.pc = self.pc.wrapping_add(4);
            count += 1;
            if let Outcome::Stop(reason) = outcome {
                break reason;
            }
        };
        if !self.em.is_terminated() {
            self.link_to(self.pc);
        }
        let mut block = self.em.finish();
        block.guest_code_end = self.pc as u64;
        (block, stop)
    }

    fn loc_at(&self, pc: u32) -> A32LocationDescriptor {
        self.loc.with_pc(pc)
    }

    fn link_to(&mut self, pc: u32) {
        let loc = self.loc_at(pc);
        self.em.set_terminator(Terminator::LinkBlock(loc));
    }

    fn reg(&mut self, r: A32Reg) -> Value {
        if r == A32Reg::Pc {
            // Reading PC in ARM mode observes the current instruction
            // address plus 8.
            Value::ImmU32(self.pc.wrapping_add(8))
        } else {
            self.em
                .emit(Opcode::A32GetRegister, vec![Value::ImmA32Reg(r)])
        }
    }

    fn set_reg(&mut self, r: A32Reg, v: Value) {
        debug_assert_ne!(r, A32Reg::Pc, "PC writes go through bx_write_pc");
        self.em
            .emit_void(Opcode::A32SetRegister, vec![Value::ImmA32Reg(r), v]);
    }

    fn bx_write_pc(&mut self, v: Value) {
        self.em.emit_void(Opcode::A32BXWritePC, vec![v]);
    }

    fn set_nzcv_from(&mut self, producer: Value) {
        let nzcv = self.em.get_nzcv_from_op(producer);
        self.em.emit_void(Opcode::A32SetCpsrNZCV, vec![nzcv]);
    }

    fn set_nz_from(&mut self, result: Value) {
        let nz = self.em.emit(Opcode::GetNZFromOp, vec![result]);
        self.em.emit_void(Opcode::A32SetCpsrNZ, vec![nz]);
    }

    fn raise(&mut self, kind: ExceptionKind, stop: StopReason) -> Outcome {
        self.em.exception_raised(
            Value::ImmU32(self.pc),
            Value::ImmU32(kind.bits()),
        );
        self.em
            .set_terminator(Terminator::check_halt(Terminator::ReturnToDispatch));
        Outcome::Stop(stop)
    }

    fn undefined(&mut self) -> StopReason {
        self.raise(
            ExceptionKind::UndefinedInstruction,
            StopReason::UndefinedInstruction,
        );
        StopReason::UndefinedInstruction
    }

    fn unpredictable(&mut self) -> Outcome {
        self.raise(
            ExceptionKind::UnpredictableInstruction,
            StopReason::UnpredictableInstruction,
        )
    }

    fn visit(&mut self, op: ArmOp, fields: &Fields) -> Outcome {
        match op {
            ArmOp::Mul => {
                let rd = A32Reg::from_index(fields[&'d'] as u8);
                let rn = self.reg(A32Reg::from_index(fields[&'n'] as u8));
                let rm = self.reg(A32Reg::from_index(fields[&'m'] as u8));
                let prod = self.em.mul32(rn, rm);
                self.set_reg(rd, prod);
                if fields[&'s'] != 0 {
                    self.set_nz_from(prod);
                }
                Outcome::Continue
            }
            ArmOp::Mla => {
                let rd = A32Reg::from_index(fields[&'d'] as u8);
                let rn = self.reg(A32Reg::from_index(fields[&'n'] as u8));
                let rm = self.reg(A32Reg::from_index(fields[&'m'] as u8));
                let ra = self.reg(A32Reg::from_index(fields[&'a'] as u8));
                let prod = self.em.mul32(rn, rm);
                let sum = self.em.add32(prod, ra);
                self.set_reg(rd, sum);
                if fields[&'s'] != 0 {
                    self.set_nz_from(sum);
                }
                Outcome::Continue
            }
            ArmOp::Ldrex => {
                let rt = A32Reg::from_index(fields[&'t'] as u8);
                let addr = self.reg(A32Reg::from_index(fields[&'n'] as u8));
                let data = self.em.exclusive_read_memory32(addr);
                self.set_reg(rt, data);
                Outcome::Continue
            }
            ArmOp::Strex => {
                let rd = A32Reg::from_index(fields[&'d'] as u8);
                let rt = A32Reg::from_index(fields[&'t'] as u8);
                let addr = self.reg(A32Reg::from_index(fields[&'n'] as u8));
                let data = self.reg(rt);
                let status = self.em.exclusive_write_memory32(addr, data);
                self.set_reg(rd, status);
                Outcome::Continue
            }
            ArmOp::Bx => {
                let m = fields[&'m'] as u8;
                let target = self.reg(A32Reg::from_index(m));
                self.bx_write_pc(target);
                let term = if m == 14 {
                    Terminator::PopRSBHint
                } else {
                    Terminator::FastDispatchHint
                };
                self.em.set_terminator(term);
                Outcome::Stop(StopReason::ControlFlow)
            }
            ArmOp::Hint => self.hint(fields[&'i']),
            ArmOp::Mrc => {
                let rt = fields[&'t'] as u8;
                if rt == 15 {
                    return self.unpredictable();
                }
                let value = emit_coproc_get(
                    &mut self.em,
                    self.coprocessors,
                    fields[&'p'] as u8,
                    fields[&'n'] as u8,
                    fields[&'o'] as u8,
                    fields[&'m'] as u8,
                    fields[&'q'] as u8,
                );
                self.set_reg(A32Reg::from_index(rt), value);
                Outcome::Continue
            }
            ArmOp::Mcr => {
                let rt = fields[&'t'] as u8;
                if rt == 15 {
                    return self.unpredictable();
                }
                let value = self.reg(A32Reg::from_index(rt));
                emit_coproc_set(
                    &mut self.em,
                    self.coprocessors,
                    fields[&'p'] as u8,
                    fields[&'n'] as u8,
                    fields[&'o'] as u8,
                    fields[&'m'] as u8,
                    fields[&'q'] as u8,
                    value,
                );
                Outcome::Continue
            }
            ArmOp::Svc => {
                // The continuation PC is architected state before the
                // callback runs; the embedder may halt from inside it.
                let next_pc = self.pc.wrapping_add(4);
                self.em.emit_void(
                    Opcode::A32SetRegister,
                    vec![Value::ImmA32Reg(A32Reg::Pc), Value::ImmU32(next_pc)],
                );
                self.em.call_supervisor(Value::ImmU32(fields[&'i']));
                let next = self.loc_at(next_pc);
                self.em
                    .set_terminator(Terminator::check_halt(Terminator::LinkBlock(next)));
                Outcome::Stop(StopReason::ControlFlow)
            }
            ArmOp::B | ArmOp::Bl => {
                let offset = sign_extend(fields[&'i'], 24) << 2;
                let target = self
                    .pc
                    .wrapping_add(8)
                    .wrapping_add(offset as u32);
                if op == ArmOp::Bl {
                    let ret = self.pc.wrapping_add(4);
                    self.set_reg(A32Reg::Lr, Value::ImmU32(ret));
                    self.em.push_rsb(self.loc_at(ret).unique_hash());
                }
                self.em
                    .set_terminator(Terminator::LinkBlock(self.loc_at(target)));
                Outcome::Stop(StopReason::ControlFlow)
            }
            ArmOp::LdrImm | ArmOp::StrImm => {
                let rn = A32Reg::from_index(fields[&'n'] as u8);
                let rt = fields[&'t'] as u8;
                if rt == 15 {
                    return self.unpredictable();
                }
                let rt = A32Reg::from_index(rt);
                let base = if rn == A32Reg::Pc {
                    Value::ImmU32(self.pc.wrapping_add(8) & !3)
                } else {
                    self.reg(rn)
                };
                let imm = Value::ImmU32(fields[&'i']);
                let addr = if fields[&'u'] != 0 {
                    self.em.add32(base, imm)
                } else {
                    self.em.sub32(base, imm)
                };
                if op == ArmOp::LdrImm {
                    let data = self.em.read_memory32(addr);
                    self.set_reg(rt, data);
                } else {
                    let data = self.reg(rt);
                    self.em.write_memory32(addr, data);
                }
                Outcome::Continue
            }
            ArmOp::DpImm => {
                let imm = fields[&'i'].rotate_right(2 * fields[&'r']);
                self.data_processing(
                    fields[&'o'] as u8,
                    fields[&'s'] != 0,
                    fields[&'n'] as u8,
                    fields[&'d'] as u8,
                    Value::ImmU32(imm),
                )
            }
            ArmOp::DpReg => {
                let shift_ty = fields[&'y'] as u8;
                let imm5 = fields[&'i'] as u8;
                if imm5 == 0 && shift_ty != 0 && !self.options.define_unpredictable_behaviour {
                    // LSR/ASR #32 and RRX are not in the supported shifter
                    // subset.
                    return self.unpredictable();
                }
                let rm = self.reg(A32Reg::from_index(fields[&'m'] as u8));
                let op2 = if imm5 == 0 {
                    rm
                } else {
                    let amount = Value::ImmU8(imm5);
                    match shift_ty {
                        0 => self.em.lsl32(rm, amount),
                        1 => self.em.lsr32(rm, amount),
                        2 => self.em.asr32(rm, amount),
                        _ => self.em.ror32(rm, amount),
                    }
                };
                self.data_processing(
                    fields[&'o'] as u8,
                    fields[&'s'] != 0,
                    fields[&'n'] as u8,
                    fields[&'d'] as u8,
                    op2,
                )
            }
        }
    }

    fn hint(&mut self, hint: u32) -> Outcome {
        if !self.options.hook_hint_instructions {
            return Outcome::Continue;
        }
        let kind = match hint {
            1 => ExceptionKind::Yield,
            2 => ExceptionKind::WaitForEvent,
            3 => ExceptionKind::WaitForInterrupt,
            4 => ExceptionKind::SendEvent,
            5 => ExceptionKind::SendEventLocal,
            _ => return Outcome::Continue,
        };
        self.raise(kind, StopReason::ControlFlow)
    }

    fn data_processing(&mut self, opc: u8, s: bool, n: u8, d: u8, op2: Value) -> Outcome {
        let is_compare = (8..=11).contains(&opc);
        if is_compare && !s {
            // The S=0 half of the compare opcode space is MSR/MRS and
            // friends, none of which are in the supported set.
            return self.raise(
                ExceptionKind::UndefinedInstruction,
                StopReason::UndefinedInstruction,
            );
        }
        let rn = A32Reg::from_index(n);
        let result = match opc {
            0b0000 | 0b1000 => {
                let a = self.reg(rn);
                self.em.and32(a, op2)
            }
            0b0001 | 0b1001 => {
                let a = self.reg(rn);
                self.em.eor32(a, op2)
            }
            0b0010 | 0b1010 => {
                let a = self.reg(rn);
                self.em.sub32(a, op2)
            }
            0b0011 => {
                let a = self.reg(rn);
                self.em.sub32(op2, a)
            }
            0b0100 | 0b1011 => {
                let a = self.reg(rn);
                self.em.add32(a, op2)
            }
            0b0101 => {
                let a = self.reg(rn);
                let c = self.em.emit(Opcode::A32GetCFlag, vec![]);
                self.em.add_with_carry32(a, op2, c)
            }
            0b0110 => {
                let a = self.reg(rn);
                let c = self.em.emit(Opcode::A32GetCFlag, vec![]);
                self.em.emit(Opcode::SubWithCarry32, vec![a, op2, c])
            }
            0b0111 => {
                let a = self.reg(rn);
                let c = self.em.emit(Opcode::A32GetCFlag, vec![]);
                self.em.emit(Opcode::SubWithCarry32, vec![op2, a, c])
            }
            0b1100 => {
                let a = self.reg(rn);
                self.em.or32(a, op2)
            }
            0b1101 => op2,
            0b1110 => {
                let a = self.reg(rn);
                let inverted = self.em.not32(op2);
                self.em.and32(a, inverted)
            }
            _ => self.em.not32(op2),
        };
        if s {
            // Arithmetic opcodes update all four flags from the ALU;
            // logical and move opcodes update N and Z only (their carry
            // comes from the shifter, which the supported subset leaves
            // unchanged).
            match opc {
                0b0010..=0b0111 | 0b1010 | 0b1011 => self.set_nzcv_from(result),
                _ => self.set_nz_from(result),
            }
        }
        if is_compare {
            return Outcome::Continue;
        }
        if d == 15 {
            if s {
                return self.unpredictable();
            }
            self.bx_write_pc(result);
            self.em.set_terminator(Terminator::FastDispatchHint);
            return Outcome::Stop(StopReason::ControlFlow);
        }
        self.set_reg(A32Reg::from_index(d), result);
        Outcome::Continue
    }
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

// --- Thumb ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Thumb16Op {
    Hint,
    It,
    Push,
    Pop,
    Svc,
    BCond,
    BUncond,
    Bx,
    MovImm,
    CmpImm,
    AddImm3,
    SubImm3,
    AddReg,
    SubReg,
    AddImm8,
    SubImm8,
    StrSp,
    LdrSp,
}

fn thumb16_table() -> DecodeTable<'static, Thumb16Op> {
    DecodeTable::new(
        16,
        vec![
            (Pattern { bits: "10111111hhhh0000" }, Thumb16Op::Hint),
            (Pattern { bits: "10111111ccccmmmm" }, Thumb16Op::It),
            (Pattern { bits: "1011010mrrrrrrrr" }, Thumb16Op::Push),
            (Pattern { bits: "1011110prrrrrrrr" }, Thumb16Op::Pop),
            (Pattern { bits: "11011111iiiiiiii" }, Thumb16Op::Svc),
            (Pattern { bits: "1101ccccqqqqqqqq" }, Thumb16Op::BCond),
            (Pattern { bits: "11100iiiiiiiiiii" }, Thumb16Op::BUncond),
            (Pattern { bits: "010001110mmmm000" }, Thumb16Op::Bx),
            (Pattern { bits: "00100dddiiiiiiii" }, Thumb16Op::MovImm),
            (Pattern { bits: "00101nnniiiiiiii" }, Thumb16Op::CmpImm),
            (Pattern { bits: "0001110iiinnnddd" }, Thumb16Op::AddImm3),
            (Pattern { bits: "0001111iiinnnddd" }, Thumb16Op::SubImm3),
            (Pattern { bits: "0001100mmmnnnddd" }, Thumb16Op::AddReg),
            (Pattern { bits: "0001101mmmnnnddd" }, Thumb16Op::SubReg),
            (Pattern { bits: "00110dddiiiiiiii" }, Thumb16Op::AddImm8),
            (Pattern { bits: "00111dddiiiiiiii" }, Thumb16Op::SubImm8),
            (Pattern { bits: "10010tttiiiiiiii" }, Thumb16Op::StrSp),
            (Pattern { bits: "10011tttiiiiiiii" }, Thumb16Op::LdrSp),
        ],
    )
    .expect("thumb16 decode table patterns are fixed-width by construction")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Thumb32Op {
    PushW,
    PopW,
}

fn thumb32_table() -> DecodeTable<'static, Thumb32Op> {
    DecodeTable::new(
        32,
        vec![
            (Pattern { bits: "11101001001011010m0rrrrrrrrrrrrr" }, Thumb32Op::PushW),
            (Pattern { bits: "1110100010111101pm0rrrrrrrrrrrrr" }, Thumb32Op::PopW),
        ],
    )
    .expect("thumb32 decode table patterns are fixed-width by construction")
}

/// Register list from an N-bit reglist field, lowest register first.
fn reglist(bits: u32, width: u8) -> Vec<A32Reg> {
    (0..width)
        .filter(|i| bits & (1 << i) != 0)
        .map(A32Reg::from_index)
        .collect()
}

struct ThumbTranslator<'a, M> {
    mem: &'a M,
    options: &'a TranslateOptions,
    em: IrEmitter<A32LocationDescriptor>,
    loc: A32LocationDescriptor,
    pc: u32,
    it: ItTracker,
}

impl<'a, M: MemoryReadCode> ThumbTranslator<'a, M> {
    fn new(loc: A32LocationDescriptor, mem: &'a M, options: &'a TranslateOptions) -> Self {
        ThumbTranslator {
            mem,
            options,
            em: IrEmitter::new(loc),
            loc,
            pc: loc.pc(),
            it: ItTracker::from_itstate(loc.it_state()),
        }
    }

    fn read_halfword(&self, pc: u32) -> u16 {
        // The code-read callback returns the aligned 32-bit word containing
        // the requested address regardless of instruction size.
        let word = self.mem.memory_read_code(pc as u64);
        (word >> ((pc & 2) * 8)) as u16
    }

    fn run(mut self) -> (Block<A32LocationDescriptor>, StopReason) {
        let t16 = thumb16_table();
        let t32 = thumb32_table();
        let single_step = self.options.single_step || self.loc.is_single_step();
        let mut count = 0usize;
        let stop = loop {
            if single_step && count > 0 {
                break StopReason::SingleStep;
            }
            if count >= self.options.max_block_size {
                break StopReason::MaxBlockSize;
            }
            let hw1 = self.read_halfword(self.pc);
            let wide = (hw1 >> 11) >= 0b11101;
            // Captured before visiting: `advance` inside the visitor moves
            // the tracker on, and only instructions that were actually
            // guarded extend the condition-failed exit.
            let was_guarded = self.it.state() == CondState::Translating;
            let (outcome, size) = if wide {
                let hw2 = self.read_halfword(self.pc.wrapping_add(2));
                let word = ((hw1 as u32) << 16) | hw2 as u32;
                let Some((op, fields)) = t32.decode(word) else {
                    break self.undefined();
                };
                (self.visit32(op, &fields), 4u32)
            } else {
                let Some((op, fields)) = t16.decode(hw1 as u32) else {
                    break self.undefined();
                };
                (self.visit16(op, &fields), 2u32)
            };
            if outcome == Outcome::Stop(StopReason::ControlFlow)
                && !self.em.is_terminated()
            {
                // A conditional mismatch ends the block before consuming
                // the instruction.
                self.link_here();
                break StopReason::ControlFlow;
            }
            self.em.advance_cycles(1);
            self.pc = self.pc.wrapping_add(size);
            if was_guarded {
                let fail = self.loc_here();
                self.em.extend_condition_failed(fail, 1);
            }
            count += 1;
            if let Outcome::Stop(reason) = outcome {
                break reason;
            }
        };
        if !self.em.is_terminated() {
            self.link_here();
        }
        let mut block = self.em.finish();
        block.guest_code_end = self.pc as u64;
        (block, stop)
    }

    /// Current-location descriptor: `pc` plus the live IT state.
    fn loc_here(&self) -> A32LocationDescriptor {
        self.loc.with_pc(self.pc).with_it_state(self.it.itstate())
    }

    fn link_here(&mut self) {
        let loc = self.loc_here();
        self.em.set_terminator(Terminator::LinkBlock(loc));
    }

    fn reg(&mut self, r: A32Reg) -> Value {
        if r == A32Reg::Pc {
            Value::ImmU32(self.pc.wrapping_add(4))
        } else {
            self.em
                .emit(Opcode::A32GetRegister, vec![Value::ImmA32Reg(r)])
        }
    }

    fn set_reg(&mut self, r: A32Reg, v: Value) {
        self.em
            .emit_void(Opcode::A32SetRegister, vec![Value::ImmA32Reg(r), v]);
    }

    fn set_nzcv_from(&mut self, producer: Value) {
        let nzcv = self.em.get_nzcv_from_op(producer);
        self.em.emit_void(Opcode::A32SetCpsrNZCV, vec![nzcv]);
    }

    fn set_nz_from(&mut self, result: Value) {
        let nz = self.em.emit(Opcode::GetNZFromOp, vec![result]);
        self.em.emit_void(Opcode::A32SetCpsrNZ, vec![nz]);
    }

    fn raise(&mut self, kind: ExceptionKind, stop: StopReason) -> Outcome {
        self.em.exception_raised(
            Value::ImmU32(self.pc),
            Value::ImmU32(kind.bits()),
        );
        self.em
            .set_terminator(Terminator::check_halt(Terminator::ReturnToDispatch));
        Outcome::Stop(stop)
    }

    fn undefined(&mut self) -> StopReason {
        self.raise(
            ExceptionKind::UndefinedInstruction,
            StopReason::UndefinedInstruction,
        );
        StopReason::UndefinedInstruction
    }

    /// Establish or match the block condition for one IT-guarded
    /// instruction. Returns `false` when the block must end instead.
    fn enter_guarded(&mut self) -> bool {
        if self.it.state() != CondState::Translating {
            return true;
        }
        let cond = self.it.current_cond();
        if cond == Cond::Al {
            return true;
        }
        // The block condition gates the whole block: a guarded run can
        // only begin on an empty block (the IT instruction itself emits
        // nothing, so `IT` followed by its first guarded slot stays
        // together; anything translated before the `IT` forces a split).
        if self.em.block().condition.is_none() && !self.em.block().insts().is_empty() {
            return false;
        }
        // The fail destination is refined after emission, once the IT
        // state has advanced past this instruction.
        let fail = self.loc_here();
        self.em.set_block_condition(cond, fail)
    }

    /// `true` when the next instruction executes unconditionally, i.e.
    /// flag-setting encodings like `MOVS`/`ADDS` really set flags.
    fn outside_it(&self) -> bool {
        self.it.state() != CondState::Translating
    }

    fn visit16(&mut self, op: Thumb16Op, fields: &Fields) -> Outcome {
        // `IT` itself and `B<c>` manage conditions explicitly; everything
        // else participates in the block-condition protocol.
        if !matches!(op, Thumb16Op::It | Thumb16Op::BCond) && !self.enter_guarded() {
            return Outcome::Stop(StopReason::ControlFlow);
        }
        let outcome = match op {
            Thumb16Op::Hint => self.hint(fields[&'h']),
            Thumb16Op::It => {
                if self.it.state() == CondState::Translating {
                    return self.raise(
                        ExceptionKind::UnpredictableInstruction,
                        StopReason::UnpredictableInstruction,
                    );
                }
                let itstate = ((fields[&'c'] as u8) << 4) | fields[&'m'] as u8;
                self.it.enter_it_block(itstate);
                // Skip the shared `advance` below: the IT instruction
                // opens the region rather than consuming a slot of it.
                return Outcome::Continue;
            }
            Thumb16Op::Push => {
                let mut regs = reglist(fields[&'r'], 8);
                if fields[&'m'] != 0 {
                    regs.push(A32Reg::Lr);
                }
                self.push_regs(&regs);
                Outcome::Continue
            }
            Thumb16Op::Pop => {
                let regs = reglist(fields[&'r'], 8);
                self.pop_regs(&regs, fields[&'p'] != 0)
            }
            Thumb16Op::Svc => {
                let next_pc = self.pc.wrapping_add(2);
                self.em.emit_void(
                    Opcode::A32SetRegister,
                    vec![Value::ImmA32Reg(A32Reg::Pc), Value::ImmU32(next_pc)],
                );
                self.em.call_supervisor(Value::ImmU32(fields[&'i']));
                let next = self
                    .loc
                    .with_pc(next_pc)
                    .with_it_state(self.it.itstate());
                self.em
                    .set_terminator(Terminator::check_halt(Terminator::LinkBlock(next)));
                Outcome::Stop(StopReason::ControlFlow)
            }
            Thumb16Op::BCond => {
                if self.it.state() == CondState::Translating {
                    return self.raise(
                        ExceptionKind::UnpredictableInstruction,
                        StopReason::UnpredictableInstruction,
                    );
                }
                let cond_bits = fields[&'c'] as u8;
                if cond_bits == 0b1110 {
                    // Permanently undefined (`UDF`-adjacent encoding).
                    self.raise(
                        ExceptionKind::UndefinedInstruction,
                        StopReason::UndefinedInstruction,
                    );
                    return Outcome::Stop(StopReason::UndefinedInstruction);
                }
                let cond = Cond::from_bits(cond_bits);
                let next_pc = self.pc.wrapping_add(2);
                let offset = sign_extend(fields[&'q'] << 1, 9);
                let target = self.pc.wrapping_add(4).wrapping_add(offset as u32);
                let cpsr = self.em.emit(Opcode::A32GetCpsr, vec![]);
                let nzcv = self.em.emit(Opcode::NzcvFromPackedFlags, vec![cpsr]);
                self.em.set_terminator(Terminator::if_cond(
                    cond,
                    nzcv,
                    Terminator::LinkBlock(self.loc.with_pc(target)),
                    Terminator::LinkBlock(self.loc.with_pc(next_pc)),
                ));
                Outcome::Stop(StopReason::ControlFlow)
            }
            Thumb16Op::BUncond => {
                let offset = sign_extend(fields[&'i'] << 1, 12);
                let target = self.pc.wrapping_add(4).wrapping_add(offset as u32);
                self.em
                    .set_terminator(Terminator::LinkBlock(self.loc.with_pc(target)));
                Outcome::Stop(StopReason::ControlFlow)
            }
            Thumb16Op::Bx => {
                let m = fields[&'m'] as u8;
                let target = self.reg(A32Reg::from_index(m));
                self.em.emit_void(Opcode::A32BXWritePC, vec![target]);
                let term = if m == 14 {
                    Terminator::PopRSBHint
                } else {
                    Terminator::FastDispatchHint
                };
                self.em.set_terminator(term);
                Outcome::Stop(StopReason::ControlFlow)
            }
            Thumb16Op::MovImm => {
                let rd = A32Reg::from_index(fields[&'d'] as u8);
                let imm = Value::ImmU32(fields[&'i']);
                self.set_reg(rd, imm);
                if self.outside_it() {
                    let nz = self.em.emit(Opcode::GetNZFromOp, vec![imm]);
                    self.em.emit_void(Opcode::A32SetCpsrNZ, vec![nz]);
                }
                Outcome::Continue
            }
            Thumb16Op::CmpImm => {
                let rn = self.reg(A32Reg::from_index(fields[&'n'] as u8));
                let diff = self.em.sub32(rn, Value::ImmU32(fields[&'i']));
                self.set_nzcv_from(diff);
                Outcome::Continue
            }
            Thumb16Op::AddImm3 | Thumb16Op::SubImm3 | Thumb16Op::AddReg | Thumb16Op::SubReg => {
                let rd = A32Reg::from_index(fields[&'d'] as u8);
                let rn = self.reg(A32Reg::from_index(fields[&'n'] as u8));
                let op2 = match op {
                    Thumb16Op::AddImm3 | Thumb16Op::SubImm3 => Value::ImmU32(fields[&'i']),
                    _ => self.reg(A32Reg::from_index(fields[&'m'] as u8)),
                };
                let result = match op {
                    Thumb16Op::AddImm3 | Thumb16Op::AddReg => self.em.add32(rn, op2),
                    _ => self.em.sub32(rn, op2),
                };
                self.set_reg(rd, result);
                if self.outside_it() {
                    self.set_nzcv_from(result);
                }
                Outcome::Continue
            }
            Thumb16Op::AddImm8 | Thumb16Op::SubImm8 => {
                let rd = A32Reg::from_index(fields[&'d'] as u8);
                let rn = self.reg(rd);
                let imm = Value::ImmU32(fields[&'i']);
                let result = if op == Thumb16Op::AddImm8 {
                    self.em.add32(rn, imm)
                } else {
                    self.em.sub32(rn, imm)
                };
                self.set_reg(rd, result);
                if self.outside_it() {
                    self.set_nzcv_from(result);
                }
                Outcome::Continue
            }
            Thumb16Op::StrSp | Thumb16Op::LdrSp => {
                let rt = A32Reg::from_index(fields[&'t'] as u8);
                let sp = self.reg(A32Reg::Sp);
                let addr = self.em.add32(sp, Value::ImmU32(fields[&'i'] * 4));
                if op == Thumb16Op::LdrSp {
                    let data = self.em.read_memory32(addr);
                    self.set_reg(rt, data);
                } else {
                    let data = self.reg(rt);
                    self.em.write_memory32(addr, data);
                }
                Outcome::Continue
            }
        };
        self.it.advance();
        outcome
    }

    fn visit32(&mut self, op: Thumb32Op, fields: &Fields) -> Outcome {
        if !self.enter_guarded() {
            return Outcome::Stop(StopReason::ControlFlow);
        }
        let outcome = match op {
            Thumb32Op::PushW => {
                let mut regs = reglist(fields[&'r'], 13);
                if fields[&'m'] != 0 {
                    regs.push(A32Reg::Lr);
                }
                self.push_regs(&regs);
                Outcome::Continue
            }
            Thumb32Op::PopW => {
                let mut regs = reglist(fields[&'r'], 13);
                if fields[&'m'] != 0 {
                    regs.push(A32Reg::Lr);
                }
                self.pop_regs(&regs, fields[&'p'] != 0)
            }
        };
        self.it.advance();
        outcome
    }

    fn hint(&mut self, hint: u32) -> Outcome {
        if !self.options.hook_hint_instructions {
            return Outcome::Continue;
        }
        let kind = match hint {
            1 => ExceptionKind::Yield,
            2 => ExceptionKind::WaitForEvent,
            3 => ExceptionKind::WaitForInterrupt,
            4 => ExceptionKind::SendEvent,
            5 => ExceptionKind::SendEventLocal,
            _ => return Outcome::Continue,
        };
        self.raise(kind, StopReason::ControlFlow)
    }

    /// `PUSH`/`STMDB SP!`: registers stored in ascending order below SP.
    fn push_regs(&mut self, regs: &[A32Reg]) {
        let n = regs.len() as u32;
        let sp = self.reg(A32Reg::Sp);
        let base = self.em.sub32(sp, Value::ImmU32(4 * n));
        for (i, r) in regs.iter().enumerate() {
            let addr = self.em.add32(base, Value::ImmU32(4 * i as u32));
            let v = self.reg(*r);
            self.em.write_memory32(addr, v);
        }
        self.set_reg(A32Reg::Sp, base);
    }

    /// `POP`/`LDMIA SP!`: registers loaded in ascending order from SP; a
    /// PC load is an interworking return.
    fn pop_regs(&mut self, regs: &[A32Reg], loads_pc: bool) -> Outcome {
        let base = self.reg(A32Reg::Sp);
        let total = regs.len() as u32 + loads_pc as u32;
        for (i, r) in regs.iter().enumerate() {
            let addr = self.em.add32(base, Value::ImmU32(4 * i as u32));
            let v = self.em.read_memory32(addr);
            self.set_reg(*r, v);
        }
        let pc_value = if loads_pc {
            let addr = self
                .em
                .add32(base, Value::ImmU32(4 * regs.len() as u32));
            Some(self.em.read_memory32(addr))
        } else {
            None
        };
        let new_sp = self.em.add32(base, Value::ImmU32(4 * total));
        self.set_reg(A32Reg::Sp, new_sp);
        if let Some(v) = pc_value {
            self.em.emit_void(Opcode::A32BXWritePC, vec![v]);
            self.em.set_terminator(Terminator::PopRSBHint);
            return Outcome::Stop(StopReason::ControlFlow);
        }
        Outcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatCode {
        base: u32,
        bytes: Vec<u8>,
    }

    impl FlatCode {
        fn from_halfwords(base: u32, halfwords: &[u16]) -> Self {
            let bytes = halfwords
                .iter()
                .flat_map(|h| h.to_le_bytes())
                .collect();
            FlatCode { base, bytes }
        }

        fn from_words(base: u32, words: &[u32]) -> Self {
            let bytes = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            FlatCode { base, bytes }
        }
    }

    impl MemoryReadCode for FlatCode {
        fn memory_read_code(&self, vaddr: u64) -> u32 {
            let aligned = (vaddr as u32) & !3;
            let offset = aligned.wrapping_sub(self.base) as usize;
            if offset.checked_add(4).is_some_and(|end| end <= self.bytes.len()) {
                u32::from_le_bytes(self.bytes[offset..offset + 4].try_into().unwrap())
            } else {
                0
            }
        }
    }

    fn arm_loc(pc: u32) -> A32LocationDescriptor {
        A32LocationDescriptor::new(pc, false, false, 0, 0)
    }

    fn thumb_loc(pc: u32) -> A32LocationDescriptor {
        A32LocationDescriptor::new(pc, true, false, 0, 0)
    }

    fn translate<M: MemoryReadCode>(
        loc: A32LocationDescriptor,
        mem: &M,
    ) -> (Block<A32LocationDescriptor>, StopReason) {
        translate_a32(
            loc,
            mem,
            &TranslateOptions::default(),
            &crate::coprocessor::empty_coprocessor_table(),
        )
    }

    #[test]
    fn mla_multiplies_and_accumulates_into_rd() {
        // mla r3, r3, r2, r0 (the `E0230293` end-to-end vector).
        let mem = FlatCode::from_words(0, &[0xE023_0293]);
        let (block, _stop) = translate(arm_loc(0), &mem);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::Mul32));
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::Add32));
        assert_eq!(block.guest_code_end, 4);
    }

    #[test]
    fn strex_writes_exclusive_and_reads_status_into_rd() {
        // strex r0, r1, [r2]
        let mem = FlatCode::from_words(0x2000, &[0xE182_0F91]);
        let (block, _stop) = translate(arm_loc(0x2000), &mem);
        assert!(block
            .insts()
            .iter()
            .any(|i| i.opcode == Opcode::ExclusiveWriteMemory32));
    }

    #[test]
    fn conditional_run_sets_block_condition_and_fail_location() {
        // addeq r0, r0, #1 ; addeq r0, r0, #2 — one block, condition EQ,
        // fail destination past both instructions.
        let mem = FlatCode::from_words(0x100, &[0x0280_0001, 0x0280_0002]);
        let (block, _stop) = translate(arm_loc(0x100), &mem);
        assert_eq!(block.condition, Some(Cond::Eq));
        assert_eq!(
            block.condition_failed_location.map(|l| l.pc()),
            Some(0x108)
        );
        assert_eq!(block.condition_failed_cycle_count, 2);
    }

    #[test]
    fn a_different_condition_ends_the_block() {
        // addeq r0, r0, #1 ; addne r0, r0, #2
        let mem = FlatCode::from_words(0x100, &[0x0280_0001, 0x1280_0002]);
        let (block, stop) = translate(arm_loc(0x100), &mem);
        assert_eq!(stop, StopReason::ControlFlow);
        assert_eq!(
            block.terminator(),
            Some(&Terminator::LinkBlock(arm_loc(0x104)))
        );
    }

    #[test]
    fn bl_pushes_the_return_location_onto_the_rsb() {
        // bl +8
        let mem = FlatCode::from_words(0, &[0xEB00_0000]);
        let (block, _stop) = translate(arm_loc(0), &mem);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::PushRSB));
        assert_eq!(
            block.terminator(),
            Some(&Terminator::LinkBlock(arm_loc(8)))
        );
    }

    #[test]
    fn undefined_encoding_raises_and_returns_to_dispatch() {
        let mem = FlatCode::from_words(0, &[0xE7F0_00F0]);
        let (block, stop) = translate(arm_loc(0), &mem);
        assert_eq!(stop, StopReason::UndefinedInstruction);
        assert!(block
            .insts()
            .iter()
            .any(|i| i.opcode == Opcode::ExceptionRaised));
        assert_eq!(
            block.terminator(),
            Some(&Terminator::check_halt(Terminator::ReturnToDispatch))
        );
    }

    #[test]
    fn thumb_push_pop_roundtrip_shape() {
        // push {r0, lr} ; pop {r0, pc}
        let mem = FlatCode::from_halfwords(0x3000, &[0xB501, 0xBD01]);
        let (block, _stop) = translate(thumb_loc(0x3000), &mem);
        let writes = block
            .insts()
            .iter()
            .filter(|i| i.opcode == Opcode::WriteMemory32)
            .count();
        assert_eq!(writes, 2);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::A32BXWritePC));
        assert_eq!(block.terminator(), Some(&Terminator::PopRSBHint));
    }

    #[test]
    fn thumb32_push_w_stores_the_wide_register_list() {
        // push.w {r3, r4} — the `E92D 0018` end-to-end vector.
        let mem = FlatCode::from_halfwords(0, &[0xE92D, 0x0018]);
        let (block, _stop) = translate(thumb_loc(0), &mem);
        let writes = block
            .insts()
            .iter()
            .filter(|i| i.opcode == Opcode::WriteMemory32)
            .count();
        assert_eq!(writes, 2);
        assert_eq!(block.guest_code_end, 4);
    }

    #[test]
    fn it_block_gates_the_following_mov_on_the_tracked_condition() {
        // it eq ; moveq r0, #1
        let mem = FlatCode::from_halfwords(0x4000, &[0xBF08, 0x2001]);
        let (block, _stop) = translate(thumb_loc(0x4000), &mem);
        assert_eq!(block.condition, Some(Cond::Eq));
        assert_eq!(
            block.condition_failed_location.map(|l| l.pc()),
            Some(0x4004)
        );
        assert!(block
            .insts()
            .iter()
            .any(|i| i.opcode == Opcode::A32SetRegister));
        // Inside the IT region MOV must not touch the flags.
        assert!(!block
            .insts()
            .iter()
            .any(|i| i.opcode == Opcode::A32SetCpsrNZ));
    }

    #[test]
    fn movs_outside_an_it_region_sets_nz() {
        let mem = FlatCode::from_halfwords(0, &[0x2005]);
        let (block, _stop) = translate(thumb_loc(0), &mem);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::A32SetCpsrNZ));
    }

    #[test]
    fn ite_condition_flip_splits_the_block() {
        // ite eq ; moveq r0, #1 ; movne r0, #2 — the NE slot cannot share
        // the EQ block.
        let mem = FlatCode::from_halfwords(0, &[0xBF0C, 0x2001, 0x2002]);
        let (block, stop) = translate(thumb_loc(0), &mem);
        assert_eq!(stop, StopReason::ControlFlow);
        assert_eq!(block.condition, Some(Cond::Eq));
        // The continuation block starts at the NE instruction with the
        // advanced IT state.
        match block.terminator() {
            Some(Terminator::LinkBlock(loc)) => {
                assert_eq!(loc.pc(), 4);
                assert_ne!(loc.it_state(), 0);
            }
            other => panic!("unexpected terminator {other:?}"),
        }
    }

    #[test]
    fn conditional_branch_lowers_to_an_if_terminator() {
        // beq +4
        let mem = FlatCode::from_halfwords(0, &[0xD002]);
        let (block, _stop) = translate(thumb_loc(0), &mem);
        match block.terminator() {
            Some(Terminator::If { cond, then_term, else_term, .. }) => {
                assert_eq!(*cond, Cond::Eq);
                assert_eq!(**then_term, Terminator::LinkBlock(thumb_loc(8)));
                assert_eq!(**else_term, Terminator::LinkBlock(thumb_loc(2)));
            }
            other => panic!("unexpected terminator {other:?}"),
        }
    }

    #[test]
    fn single_step_translates_exactly_one_instruction() {
        let mem = FlatCode::from_halfwords(0, &[0x2001, 0x2002]);
        let loc = thumb_loc(0).with_single_step(true);
        let (block, stop) = translate(loc, &mem);
        assert_eq!(stop, StopReason::SingleStep);
        assert_eq!(block.guest_code_end, 2);
    }
}
