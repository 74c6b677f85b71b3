//! A64 decode and translation.
//!
//! As with the A32 side, the table is a
//! representative working set: add/sub (immediate and shifted register),
//! the move-wide family, loads and stores, `LDXR`/`STXR`, the branch
//! family (including `CBZ`/`CBNZ`, which exercise the check-bit
//! terminator), `SVC`, hints, `DC ZVA`, `MRS` of the counter/ID registers,
//! scalar FP arithmetic, integer conversion, and vector integer add.

use dynarm_ir::{Block, IrEmitter, Opcode, Terminator, Value};
use dynarm_types::{A64LocationDescriptor, A64Vec, Cond, ExceptionKind, RoundingMode};

use crate::{
    decoder::{DecodeTable, Fields, Pattern},
    translate::{MemoryReadCode, StopReason, TranslateOptions},
};

/// A64 translation options: the shared knobs plus the raw values of the
/// ID/system registers the translator folds to constants.
#[derive(Debug, Clone, Copy)]
pub struct A64TranslateOptions {
    pub base: TranslateOptions,
    pub dczid_el0: u32,
    pub ctr_el0: u32,
    pub cntfrq_el0: u32,
    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,
}

impl Default for A64TranslateOptions {
    fn default() -> Self {
        A64TranslateOptions {
            base: TranslateOptions::default(),
            // Reset values of a generic Cortex-flavoured implementation:
            // 64-byte DC ZVA block, 64-byte cache lines.
            dczid_el0: 4,
            ctr_el0: 0x8444_C004,
            cntfrq_el0: 19_200_000,
            tpidr_el0: 0,
            tpidrro_el0: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum A64Op {
    AddSubImm,
    AddSubShifted,
    MovWide,
    LdrStrImm64,
    LdrStrImm32,
    Ldxr,
    Stxr,
    B,
    Bl,
    BCond,
    Cbz,
    Cbnz,
    Ret,
    Br,
    Blr,
    Svc,
    Hint,
    DcZva,
    Mrs,
    FpArith,
    Fcvtzs,
    Fcvtzu,
    VecAdd,
}

fn a64_table() -> DecodeTable<'static, A64Op> {
    DecodeTable::new(
        32,
        vec![
            (Pattern { bits: "110101010000101101110100001ttttt" }, A64Op::DcZva),
            (Pattern { bits: "1101010100111oooNNNNMMMMqqqttttt" }, A64Op::Mrs),
            (Pattern { bits: "11010100000iiiiiiiiiiiiiiii00001" }, A64Op::Svc),
            (Pattern { bits: "11010101000000110010iiiiiii11111" }, A64Op::Hint),
            (Pattern { bits: "1101011001011111000000nnnnn00000" }, A64Op::Ret),
            (Pattern { bits: "1101011000011111000000nnnnn00000" }, A64Op::Br),
            (Pattern { bits: "1101011000111111000000nnnnn00000" }, A64Op::Blr),
            (Pattern { bits: "1100100001011111011111nnnnnttttt" }, A64Op::Ldxr),
            (Pattern { bits: "11001000000sssss011111nnnnnttttt" }, A64Op::Stxr),
            (Pattern { bits: "zoo100010hiiiiiiiiiiiinnnnnddddd" }, A64Op::AddSubImm),
            (Pattern { bits: "zoo01011yy0mmmmmiiiiiinnnnnddddd" }, A64Op::AddSubShifted),
            (Pattern { bits: "zoo100101wwiiiiiiiiiiiiiiiiddddd" }, A64Op::MovWide),
            (Pattern { bits: "11111001oliiiiiiiiiiiinnnnnttttt" }, A64Op::LdrStrImm64),
            (Pattern { bits: "10111001oliiiiiiiiiiiinnnnnttttt" }, A64Op::LdrStrImm32),
            (Pattern { bits: "000101iiiiiiiiiiiiiiiiiiiiiiiiii" }, A64Op::B),
            (Pattern { bits: "100101iiiiiiiiiiiiiiiiiiiiiiiiii" }, A64Op::Bl),
            (Pattern { bits: "01010100iiiiiiiiiiiiiiiiiii0cccc" }, A64Op::BCond),
            (Pattern { bits: "z0110100iiiiiiiiiiiiiiiiiiittttt" }, A64Op::Cbz),
            (Pattern { bits: "z0110101iiiiiiiiiiiiiiiiiiittttt" }, A64Op::Cbnz),
            (Pattern { bits: "00011110yy1mmmmm00oo10nnnnnddddd" }, A64Op::FpArith),
            (Pattern { bits: "1001111001111000000000nnnnnddddd" }, A64Op::Fcvtzs),
            (Pattern { bits: "1001111001111001000000nnnnnddddd" }, A64Op::Fcvtzu),
            (Pattern { bits: "01001110yy1mmmmm100001nnnnnddddd" }, A64Op::VecAdd),
        ],
    )
    .expect("a64 decode table patterns are fixed-width by construction")
}

struct A64Translator<'a, M> {
    mem: &'a M,
    options: &'a A64TranslateOptions,
    em: IrEmitter<A64LocationDescriptor>,
    loc: A64LocationDescriptor,
    pc: u64,
}

/// Translates one A64 block starting at `loc`.
pub fn translate_a64<M: MemoryReadCode>(
    loc: A64LocationDescriptor,
    mem: &M,
    options: &A64TranslateOptions,
) -> (Block<A64LocationDescriptor>, StopReason) {
    A64Translator {
        mem,
        options,
        em: IrEmitter::new(loc),
        loc,
        pc: loc.pc(),
    }
    .run()
}

impl<'a, M: MemoryReadCode> A64Translator<'a, M> {
    fn run(mut self) -> (Block<A64LocationDescriptor>, StopReason) {
        let table = a64_table();
        let single_step = self.options.base.single_step || self.loc.is_single_step();
        let mut count = 0usize;
        let stop = loop {
            if single_step && count > 0 {
                break StopReason::SingleStep;
            }
            if count >= self.options.base.max_block_size {
                break StopReason::MaxBlockSize;
            }
            let word = self.mem.memory_read_code(self.pc);
            let Some((op, fields)) = table.decode(word) else {
                break self.undefined();
            };
            let outcome = self.visit(op, &fields);
            self.em.advance_cycles(1);
            self.pc = self.pc.wrapping_add(4);
            count += 1;
            if let Outcome::Stop(reason) = outcome {
                break reason;
            }
        };
        if !self.em.is_terminated() {
            let next = self.loc.with_pc(self.pc);
            self.em.set_terminator(Terminator::LinkBlock(next));
        }
        let mut block = self.em.finish();
        block.guest_code_end = self.pc;
        (block, stop)
    }

    /// X-register read; index 31 is the zero register in every encoding
    /// this table carries except add/sub immediate, which banks SP there.
    fn x(&mut self, index: u8, sp_at_31: bool) -> Value {
        if index == 31 {
            if sp_at_31 {
                self.em.emit(Opcode::A64GetSP, vec![])
            } else {
                Value::ImmU64(0)
            }
        } else {
            self.em.emit(
                Opcode::A64GetX,
                vec![Value::ImmA64Reg(dynarm_types::A64Reg::from_index(index))],
            )
        }
    }

    fn set_x(&mut self, index: u8, sp_at_31: bool, v: Value) {
        if index == 31 {
            if sp_at_31 {
                self.em.emit_void(Opcode::A64SetSP, vec![v]);
            }
            // Writes to XZR vanish; the value stays in the block for DCE
            // to judge.
        } else {
            self.em.emit_void(
                Opcode::A64SetX,
                vec![Value::ImmA64Reg(dynarm_types::A64Reg::from_index(index)), v],
            );
        }
    }

    fn set_w(&mut self, index: u8, v: Value) {
        if index != 31 {
            self.em.emit_void(
                Opcode::A64SetW,
                vec![Value::ImmA64Reg(dynarm_types::A64Reg::from_index(index)), v],
            );
        }
    }

    fn raise(&mut self, kind: ExceptionKind, stop: StopReason) -> Outcome {
        self.em.exception_raised(
            Value::ImmU64(self.pc),
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

    fn link(&mut self, pc: u64) -> Outcome {
        let loc = self.loc.with_pc(pc);
        self.em.set_terminator(Terminator::LinkBlock(loc));
        Outcome::Stop(StopReason::ControlFlow)
    }

    fn visit(&mut self, op: A64Op, fields: &Fields) -> Outcome {
        match op {
            A64Op::AddSubImm => {
                let sf = fields[&'z'] != 0;
                let opc = fields[&'o'];
                let (is_sub, set_flags) = (opc & 0b10 != 0, opc & 0b01 != 0);
                let imm = (fields[&'i'] as u64) << if fields[&'h'] != 0 { 12 } else { 0 };
                let n = fields[&'n'] as u8;
                let d = fields[&'d'] as u8;
                // SP is addressable here unless flags are being set.
                let a = self.x(n, true);
                let result = if sf {
                    let b = Value::ImmU64(imm);
                    if is_sub { self.em.sub64(a, b) } else { self.em.add64(a, b) }
                } else {
                    let a32 = self.em.least_significant_word(a);
                    let b = Value::ImmU32(imm as u32);
                    if is_sub {
                        self.em.sub32(a32, b)
                    } else {
                        self.em.add32(a32, b)
                    }
                };
                if set_flags {
                    let nzcv = self.em.get_nzcv_from_op(result);
                    self.em.emit_void(Opcode::A64SetNZCVRaw, vec![nzcv]);
                }
                if sf {
                    self.set_x(d, !set_flags, result);
                } else if d != 31 {
                    self.set_w(d, result);
                } else if !set_flags {
                    let wide = self.em.zero_extend_to_long(result);
                    self.em.emit_void(Opcode::A64SetSP, vec![wide]);
                }
                Outcome::Continue
            }
            A64Op::AddSubShifted => {
                let sf = fields[&'z'] != 0;
                let opc = fields[&'o'];
                let (is_sub, set_flags) = (opc & 0b10 != 0, opc & 0b01 != 0);
                let shift_ty = fields[&'y'] as u8;
                let amount = fields[&'i'] as u8;
                if shift_ty == 0b11 {
                    return self.raise(
                        ExceptionKind::UndefinedInstruction,
                        StopReason::UndefinedInstruction,
                    );
                }
                let n = fields[&'n'] as u8;
                let m = fields[&'m'] as u8;
                let d = fields[&'d'] as u8;
                let a = self.x(n, false);
                let b = self.x(m, false);
                let result = if sf {
                    let b = if amount == 0 {
                        b
                    } else {
                        let sh = Value::ImmU8(amount);
                        match shift_ty {
                            0 => self.em.lsl64(b, sh),
                            1 => self.em.lsr64(b, sh),
                            _ => self.em.asr64(b, sh),
                        }
                    };
                    if is_sub { self.em.sub64(a, b) } else { self.em.add64(a, b) }
                } else {
                    let a = self.em.least_significant_word(a);
                    let b = self.em.least_significant_word(b);
                    let b = if amount == 0 {
                        b
                    } else {
                        let sh = Value::ImmU8(amount & 31);
                        match shift_ty {
                            0 => self.em.lsl32(b, sh),
                            1 => self.em.lsr32(b, sh),
                            _ => self.em.asr32(b, sh),
                        }
                    };
                    if is_sub { self.em.sub32(a, b) } else { self.em.add32(a, b) }
                };
                if set_flags {
                    let nzcv = self.em.get_nzcv_from_op(result);
                    self.em.emit_void(Opcode::A64SetNZCVRaw, vec![nzcv]);
                }
                if sf {
                    self.set_x(d, false, result);
                } else {
                    self.set_w(d, result);
                }
                Outcome::Continue
            }
            A64Op::MovWide => {
                let sf = fields[&'z'] != 0;
                let opc = fields[&'o'];
                let hw = fields[&'w'];
                if !sf && hw > 1 {
                    return self.raise(
                        ExceptionKind::UndefinedInstruction,
                        StopReason::UndefinedInstruction,
                    );
                }
                let d = fields[&'d'] as u8;
                let shift = hw * 16;
                let imm = (fields[&'i'] as u64) << shift;
                match opc {
                    0b00 => {
                        // MOVN
                        let value = !imm;
                        if sf {
                            self.set_x(d, false, Value::ImmU64(value));
                        } else {
                            self.set_w(d, Value::ImmU32(value as u32));
                        }
                    }
                    0b10 => {
                        // MOVZ
                        if sf {
                            self.set_x(d, false, Value::ImmU64(imm));
                        } else {
                            self.set_w(d, Value::ImmU32(imm as u32));
                        }
                    }
                    0b11 => {
                        // MOVK
                        let keep_mask = !(0xFFFFu64 << shift);
                        let old = self.x(d, false);
                        if sf {
                            let kept = self.em.and64(old, Value::ImmU64(keep_mask));
                            let merged = self.em.or64(kept, Value::ImmU64(imm));
                            self.set_x(d, false, merged);
                        } else {
                            let old = self.em.least_significant_word(old);
                            let kept = self.em.and32(old, Value::ImmU32(keep_mask as u32));
                            let merged = self.em.or32(kept, Value::ImmU32(imm as u32));
                            self.set_w(d, merged);
                        }
                    }
                    _ => {
                        return self.raise(
                            ExceptionKind::UndefinedInstruction,
                            StopReason::UndefinedInstruction,
                        )
                    }
                }
                Outcome::Continue
            }
            A64Op::LdrStrImm64 | A64Op::LdrStrImm32 => {
                let is_load = fields[&'l'] != 0;
                if fields[&'o'] != 0 {
                    return self.raise(
                        ExceptionKind::UndefinedInstruction,
                        StopReason::UndefinedInstruction,
                    );
                }
                let size = if op == A64Op::LdrStrImm64 { 8u64 } else { 4 };
                let n = fields[&'n'] as u8;
                let t = fields[&'t'] as u8;
                let base = self.x(n, true);
                let offset = fields[&'i'] as u64 * size;
                let addr = self.em.add64(base, Value::ImmU64(offset));
                match (is_load, size) {
                    (true, 8) => {
                        let data = self.em.read_memory64(addr);
                        self.set_x(t, false, data);
                    }
                    (true, _) => {
                        let data = self.em.read_memory32(addr);
                        self.set_w(t, data);
                    }
                    (false, 8) => {
                        let data = self.x(t, false);
                        self.em.write_memory64(addr, data);
                    }
                    (false, _) => {
                        let data = self.x(t, false);
                        let data = self.em.least_significant_word(data);
                        self.em.write_memory32(addr, data);
                    }
                }
                Outcome::Continue
            }
            A64Op::Ldxr => {
                let n = fields[&'n'] as u8;
                let t = fields[&'t'] as u8;
                let addr = self.x(n, true);
                let data = self
                    .em
                    .emit(Opcode::ExclusiveReadMemory64, vec![addr]);
                self.set_x(t, false, data);
                Outcome::Continue
            }
            A64Op::Stxr => {
                let s = fields[&'s'] as u8;
                let n = fields[&'n'] as u8;
                let t = fields[&'t'] as u8;
                let addr = self.x(n, true);
                let data = self.x(t, false);
                let status = self
                    .em
                    .emit(Opcode::ExclusiveWriteMemory64, vec![addr, data]);
                self.set_w(s, status);
                Outcome::Continue
            }
            A64Op::B | A64Op::Bl => {
                let offset = (sign_extend32(fields[&'i'], 26) as i64) << 2;
                let target = self.pc.wrapping_add(offset as u64);
                if op == A64Op::Bl {
                    let ret = self.pc.wrapping_add(4);
                    self.set_x(30, false, Value::ImmU64(ret));
                    self.em.push_rsb(self.loc.with_pc(ret).unique_hash());
                }
                self.link(target)
            }
            A64Op::BCond => {
                let offset = (sign_extend32(fields[&'i'], 19) as i64) << 2;
                let target = self.pc.wrapping_add(offset as u64);
                let next = self.pc.wrapping_add(4);
                let cond = Cond::from_bits(fields[&'c'] as u8);
                let nzcv = self.em.emit(Opcode::A64GetNZCVRaw, vec![]);
                self.em.set_terminator(Terminator::if_cond(
                    cond,
                    nzcv,
                    Terminator::LinkBlock(self.loc.with_pc(target)),
                    Terminator::LinkBlock(self.loc.with_pc(next)),
                ));
                Outcome::Stop(StopReason::ControlFlow)
            }
            A64Op::Cbz | A64Op::Cbnz => {
                let sf = fields[&'z'] != 0;
                let offset = (sign_extend32(fields[&'i'], 19) as i64) << 2;
                let target = self.loc.with_pc(self.pc.wrapping_add(offset as u64));
                let next = self.loc.with_pc(self.pc.wrapping_add(4));
                let t = fields[&'t'] as u8;
                let value = self.x(t, false);
                let bit = if sf {
                    self.em.is_zero64(value)
                } else {
                    let w = self.em.least_significant_word(value);
                    self.em.is_zero32(w)
                };
                self.em.emit_void(Opcode::A64SetCheckBit, vec![bit]);
                let (then_term, else_term) = if op == A64Op::Cbz {
                    (Terminator::LinkBlock(target), Terminator::LinkBlock(next))
                } else {
                    (Terminator::LinkBlock(next), Terminator::LinkBlock(target))
                };
                self.em
                    .set_terminator(Terminator::check_bit(then_term, else_term));
                Outcome::Stop(StopReason::ControlFlow)
            }
            A64Op::Ret | A64Op::Br | A64Op::Blr => {
                let n = fields[&'n'] as u8;
                let target = self.x(n, false);
                if op == A64Op::Blr {
                    let ret = self.pc.wrapping_add(4);
                    self.set_x(30, false, Value::ImmU64(ret));
                    self.em.push_rsb(self.loc.with_pc(ret).unique_hash());
                }
                self.em.emit_void(Opcode::A64SetPC, vec![target]);
                let term = if op == A64Op::Ret {
                    Terminator::PopRSBHint
                } else {
                    Terminator::FastDispatchHint
                };
                self.em.set_terminator(term);
                Outcome::Stop(StopReason::ControlFlow)
            }
            A64Op::Svc => {
                // The continuation PC is architected state before the
                // callback runs; the embedder may halt from inside it.
                let next_pc = self.pc.wrapping_add(4);
                self.em
                    .emit_void(Opcode::A64SetPC, vec![Value::ImmU64(next_pc)]);
                self.em.call_supervisor(Value::ImmU32(fields[&'i']));
                let next = self.loc.with_pc(next_pc);
                self.em
                    .set_terminator(Terminator::check_halt(Terminator::LinkBlock(next)));
                Outcome::Stop(StopReason::ControlFlow)
            }
            A64Op::Hint => {
                if !self.options.base.hook_hint_instructions {
                    return Outcome::Continue;
                }
                let kind = match fields[&'i'] {
                    1 => ExceptionKind::Yield,
                    2 => ExceptionKind::WaitForEvent,
                    3 => ExceptionKind::WaitForInterrupt,
                    4 => ExceptionKind::SendEvent,
                    5 => ExceptionKind::SendEventLocal,
                    _ => return Outcome::Continue,
                };
                self.raise(kind, StopReason::ControlFlow)
            }
            A64Op::DcZva => {
                let t = fields[&'t'] as u8;
                let addr = self.x(t, false);
                let block_size = 4u32 << (self.options.dczid_el0 & 0xF);
                self.em.emit_void(
                    Opcode::A64DataCacheOperationRaised,
                    vec![
                        Value::ImmU8(DC_ZVA_OP),
                        addr,
                        Value::ImmU32(block_size),
                    ],
                );
                Outcome::Continue
            }
            A64Op::Mrs => {
                let t = fields[&'t'] as u8;
                let key = (
                    fields[&'o'],
                    fields[&'N'],
                    fields[&'M'],
                    fields[&'q'],
                );
                // (op1, CRn, CRm, op2) with op0 fixed to 3 by the pattern.
                let value = match key {
                    (0b011, 0b1110, 0b0000, 0b001) => {
                        let v = self.em.emit(Opcode::A64GetCNTPCT, vec![]);
                        self.set_x(t, false, v);
                        return Outcome::Continue;
                    }
                    (0b011, 0b1110, 0b0000, 0b000) => self.options.cntfrq_el0 as u64,
                    (0b011, 0b0000, 0b0000, 0b001) => self.options.ctr_el0 as u64,
                    (0b011, 0b0000, 0b0000, 0b111) => self.options.dczid_el0 as u64,
                    (0b011, 0b1101, 0b0000, 0b010) => self.options.tpidr_el0,
                    (0b011, 0b1101, 0b0000, 0b011) => self.options.tpidrro_el0,
                    _ => {
                        return self.raise(
                            ExceptionKind::UndefinedInstruction,
                            StopReason::UndefinedInstruction,
                        )
                    }
                };
                self.set_x(t, false, Value::ImmU64(value));
                Outcome::Continue
            }
            A64Op::FpArith => {
                let double = fields[&'y'] == 0b01;
                if fields[&'y'] > 0b01 {
                    return self.raise(
                        ExceptionKind::UndefinedInstruction,
                        StopReason::UndefinedInstruction,
                    );
                }
                let d = A64Vec(fields[&'d'] as u8);
                let n = A64Vec(fields[&'n'] as u8);
                let m = A64Vec(fields[&'m'] as u8);
                let opc = fields[&'o'];
                if double {
                    let a = self.em.emit(Opcode::A64GetD, vec![Value::ImmA64Vec(n)]);
                    let b = self.em.emit(Opcode::A64GetD, vec![Value::ImmA64Vec(m)]);
                    let r = match opc {
                        0b10 => self.em.fp_add64(a, b),
                        0b11 => self.em.fp_sub64(a, b),
                        0b00 => self.em.fp_mul64(a, b),
                        _ => self.em.fp_div64(a, b),
                    };
                    self.em
                        .emit_void(Opcode::A64SetD, vec![Value::ImmA64Vec(d), r]);
                } else {
                    let a = self.em.emit(Opcode::A64GetS, vec![Value::ImmA64Vec(n)]);
                    let b = self.em.emit(Opcode::A64GetS, vec![Value::ImmA64Vec(m)]);
                    let r = match opc {
                        0b10 => self.em.fp_add32(a, b),
                        0b11 => self.em.fp_sub32(a, b),
                        0b00 => self.em.fp_mul32(a, b),
                        _ => self.em.fp_div32(a, b),
                    };
                    self.em
                        .emit_void(Opcode::A64SetS, vec![Value::ImmA64Vec(d), r]);
                }
                Outcome::Continue
            }
            A64Op::Fcvtzs | A64Op::Fcvtzu => {
                let d = fields[&'d'] as u8;
                let n = A64Vec(fields[&'n'] as u8);
                let value = self.em.emit(Opcode::A64GetD, vec![Value::ImmA64Vec(n)]);
                let rounding = RoundingMode::TowardsZero as u8;
                let result = if op == A64Op::Fcvtzs {
                    self.em.fp_to_fixed_s64(value, rounding)
                } else {
                    self.em.fp_to_fixed_u64(value, rounding)
                };
                self.set_x(d, false, result);
                Outcome::Continue
            }
            A64Op::VecAdd => {
                let esize = 8u32 << fields[&'y'];
                let d = A64Vec(fields[&'d'] as u8);
                let n = A64Vec(fields[&'n'] as u8);
                let m = A64Vec(fields[&'m'] as u8);
                let a = self.em.emit(Opcode::A64GetQ, vec![Value::ImmA64Vec(n)]);
                let b = self.em.emit(Opcode::A64GetQ, vec![Value::ImmA64Vec(m)]);
                let r = self.em.vector_add(esize, a, b);
                self.em
                    .emit_void(Opcode::A64SetQ, vec![Value::ImmA64Vec(d), r]);
                Outcome::Continue
            }
        }
    }
}

/// The `DataCacheOperationRaised` op-kind byte for `DC ZVA`; must agree
/// with the optimizer's callback-elimination pass.
const DC_ZVA_OP: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    Stop(StopReason),
}

fn sign_extend32(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Words(Vec<u32>);

    impl MemoryReadCode for Words {
        fn memory_read_code(&self, vaddr: u64) -> u32 {
            self.0
                .get((vaddr / 4) as usize)
                .copied()
                .unwrap_or(0)
        }
    }

    fn translate(words: &[u32], pc: u64) -> (Block<A64LocationDescriptor>, StopReason) {
        let loc = A64LocationDescriptor::new(pc, 0, false);
        translate_a64(loc, &Words(words.to_vec()), &A64TranslateOptions::default())
    }

    #[test]
    fn add_immediate_writes_the_destination() {
        // add x1, x0, #5
        let (block, _) = translate(&[0x9100_1401], 0);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::Add64));
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::A64SetX));
    }

    #[test]
    fn dc_zva_carries_the_configured_block_size() {
        // dc zva, x3
        let (block, _) = translate(&[0xD50B_7423], 0);
        let dc = block
            .insts()
            .iter()
            .find(|i| i.opcode == Opcode::A64DataCacheOperationRaised)
            .expect("DC ZVA must reach the IR as a cache-op record");
        assert_eq!(dc.args[0], Value::ImmU8(0));
        // dczid_el0 = 4 → 64-byte zeroing block.
        assert_eq!(dc.args[2], Value::ImmU32(64));
    }

    #[test]
    fn cbz_lowers_to_the_check_bit_terminator() {
        // cbz x0, +8
        let (block, _) = translate(&[0xB400_0040], 0);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::A64SetCheckBit));
        match block.terminator() {
            Some(Terminator::CheckBit { then_term, .. }) => {
                assert_eq!(
                    **then_term,
                    Terminator::LinkBlock(A64LocationDescriptor::new(8, 0, false))
                );
            }
            other => panic!("unexpected terminator {other:?}"),
        }
    }

    #[test]
    fn ret_pops_the_return_stack_hint() {
        // ret (x30)
        let (block, _) = translate(&[0xD65F_03C0], 0);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::A64SetPC));
        assert_eq!(block.terminator(), Some(&Terminator::PopRSBHint));
    }

    #[test]
    fn bl_records_the_return_location_and_links_to_the_target() {
        // bl +16
        let (block, _) = translate(&[0x9400_0004], 0);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::PushRSB));
        assert_eq!(
            block.terminator(),
            Some(&Terminator::LinkBlock(A64LocationDescriptor::new(16, 0, false)))
        );
    }

    #[test]
    fn mrs_of_an_id_register_folds_to_a_constant() {
        // mrs x0, dczid_el0
        let (block, _) = translate(&[0xD53B_00E0], 0);
        let set = block
            .insts()
            .iter()
            .find(|i| i.opcode == Opcode::A64SetX)
            .expect("the read must fold to an immediate store");
        assert_eq!(set.args[1], Value::ImmU64(4));
    }

    #[test]
    fn writes_to_xzr_are_discarded() {
        // add xzr, x0, #1
        let (block, _) = translate(&[0x9100_041F], 0);
        assert!(!block.insts().iter().any(|i| i.opcode == Opcode::A64SetX));
        assert!(!block.insts().iter().any(|i| i.opcode == Opcode::A64SetSP));
    }

    #[test]
    fn fadd_double_reads_both_lanes_and_writes_the_destination() {
        // fadd d2, d0, d1
        let (block, _) = translate(&[0x1E61_2802], 0);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::FPAdd64));
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::A64SetD));
    }

    #[test]
    fn vector_add_picks_the_element_size_from_the_encoding() {
        // add v0.4s, v1.4s, v2.4s
        let (block, _) = translate(&[0x4EA2_8420], 0);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::VectorAdd32));
    }

    #[test]
    fn svc_reports_before_the_next_block_runs() {
        // svc #7
        let (block, _) = translate(&[0xD400_00E1], 0);
        assert!(block.insts().iter().any(|i| i.opcode == Opcode::CallSupervisor));
        assert_eq!(
            block.terminator(),
            Some(&Terminator::check_halt(Terminator::LinkBlock(
                A64LocationDescriptor::new(4, 0, false)
            )))
        );
    }
}
