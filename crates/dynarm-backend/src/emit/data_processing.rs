//! Integer arithmetic, logic, shift, and flag lowering. Flag-producing
//! instructions leave the host flags set
//! and register their pending `Get*FromOp` consumers with the allocator,
//! which materializes them via `spill_flags` before the next
//! flag-clobbering emission.

use dynarm_ir::{InstId, Opcode, Value};
use dynarm_types::Cond;
use iced_x86::code_asm::CodeAssembler;

use crate::{
    emit::{flag_consumers, EmitContext, TargetArch},
    hostloc::{gpr16, gpr32, gpr64, gpr8, SCRATCH0, SCRATCH1},
    EmitError,
};

/// An ALU right-hand side: a small immediate is encoded directly, anything
/// else comes through a register.
enum Rhs {
    Imm(i32),
    Reg(u8),
}

fn rhs<T: TargetArch>(ctx: &mut EmitContext<'_, T>, v: Value) -> Result<Rhs, EmitError> {
    match v.immediate_bits() {
        Some(bits) if i32::try_from(bits as i128).is_ok() => Ok(Rhs::Imm(bits as i32)),
        Some(bits) if bits <= u32::MAX as u128 => {
            // A 32-bit pattern with the top bit set still encodes directly
            // in 32-bit forms (the sign extension is invisible at that
            // width) but not in 64-bit ones; callers of `rhs64` re-check.
            Ok(Rhs::Imm(bits as u32 as i32))
        }
        _ => Ok(Rhs::Reg(ctx.ra.use_gpr(&mut ctx.a, v)?)),
    }
}

fn rhs64<T: TargetArch>(ctx: &mut EmitContext<'_, T>, v: Value) -> Result<Rhs, EmitError> {
    match v.immediate_bits() {
        Some(bits) if i32::try_from(bits as i128).is_ok() => Ok(Rhs::Imm(bits as i32)),
        _ => Ok(Rhs::Reg(ctx.ra.use_gpr(&mut ctx.a, v)?)),
    }
}

/// Load CF from a `u1` carry-in operand, optionally complemented for the
/// subtract family (whose x86 borrow is inverted ARM carry).
fn load_carry_flag<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    v: Value,
    complement: bool,
) -> Result<(), EmitError> {
    match v {
        Value::ImmU1(set) => {
            if set != complement {
                ctx.a.stc()?;
            } else {
                ctx.a.clc()?;
            }
        }
        _ => {
            let reg = ctx.ra.use_gpr(&mut ctx.a, v)?;
            ctx.a.bt(gpr32(reg), 0)?;
            if complement {
                ctx.a.cmc()?;
            }
        }
    }
    Ok(())
}

pub fn emit<T: TargetArch>(ctx: &mut EmitContext<'_, T>, id: InstId) -> Result<(), EmitError> {
    let block = ctx.block;
    let inst = block.inst(id);
    let opcode = inst.opcode;
    let args = inst.args.clone();
    use Opcode::*;
    match opcode {
        Add32 | Sub32 | And32 | Or32 | Eor32 | Add64 | Sub64 | And64 | Or64 | Eor64 => {
            let wide = matches!(opcode, Add64 | Sub64 | And64 | Or64 | Eor64);
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            let src = if wide {
                rhs64(ctx, args[1])?
            } else {
                rhs(ctx, args[1])?
            };
            macro_rules! alu {
                ($op:ident) => {
                    match src {
                        Rhs::Imm(imm) if wide => ctx.a.$op(gpr64(dst), imm)?,
                        Rhs::Imm(imm) => ctx.a.$op(gpr32(dst), imm)?,
                        Rhs::Reg(r) if wide => ctx.a.$op(gpr64(dst), gpr64(r))?,
                        Rhs::Reg(r) => ctx.a.$op(gpr32(dst), gpr32(r))?,
                    }
                };
            }
            match opcode {
                Add32 | Add64 => alu!(add),
                Sub32 | Sub64 => alu!(sub),
                And32 | And64 => alu!(and),
                Or32 | Or64 => alu!(or),
                _ => alu!(xor),
            }
            ctx.ra.define_gpr(id, dst);
            let sub_family = matches!(opcode, Sub32 | Sub64);
            ctx.ra
                .set_flags_live(id, sub_family, flag_consumers(block, id));
        }
        AddWithCarry32 | AddWithCarry64 | SubWithCarry32 | SubWithCarry64 => {
            let wide = matches!(opcode, AddWithCarry64 | SubWithCarry64);
            let is_sub = matches!(opcode, SubWithCarry32 | SubWithCarry64);
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            let src = match args[1] {
                v @ Value::Ref(_) => Rhs::Reg(ctx.ra.use_gpr(&mut ctx.a, v)?),
                imm => {
                    if wide {
                        rhs64(ctx, imm)?
                    } else {
                        rhs(ctx, imm)?
                    }
                }
            };
            // The carry load must come after every allocator move (moves
            // preserve flags, loads of spilled operands do too, but an
            // eviction between `bt` and the arithmetic would not).
            load_carry_flag(ctx, args[2], is_sub)?;
            match (is_sub, wide, src) {
                (false, true, Rhs::Imm(imm)) => ctx.a.adc(gpr64(dst), imm)?,
                (false, false, Rhs::Imm(imm)) => ctx.a.adc(gpr32(dst), imm)?,
                (false, true, Rhs::Reg(r)) => ctx.a.adc(gpr64(dst), gpr64(r))?,
                (false, false, Rhs::Reg(r)) => ctx.a.adc(gpr32(dst), gpr32(r))?,
                (true, true, Rhs::Imm(imm)) => ctx.a.sbb(gpr64(dst), imm)?,
                (true, false, Rhs::Imm(imm)) => ctx.a.sbb(gpr32(dst), imm)?,
                (true, true, Rhs::Reg(r)) => ctx.a.sbb(gpr64(dst), gpr64(r))?,
                (true, false, Rhs::Reg(r)) => ctx.a.sbb(gpr32(dst), gpr32(r))?,
            }
            ctx.ra.define_gpr(id, dst);
            ctx.ra.set_flags_live(id, is_sub, flag_consumers(block, id));
        }
        Mul32 | Mul64 => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            let src = ctx.ra.use_gpr(&mut ctx.a, args[1])?;
            if opcode == Mul64 {
                ctx.a.imul_2(gpr64(dst), gpr64(src))?;
            } else {
                ctx.a.imul_2(gpr32(dst), gpr32(src))?;
            }
            ctx.ra.define_gpr(id, dst);
        }
        Not32 | Not64 => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            if opcode == Not64 {
                ctx.a.not(gpr64(dst))?;
            } else {
                ctx.a.not(gpr32(dst))?;
            }
            ctx.ra.define_gpr(id, dst);
        }
        LogicalShiftLeft32 | LogicalShiftRight32 | ArithShiftRight32 | RotateRight32
        | LogicalShiftLeft64 | LogicalShiftRight64 | ArithShiftRight64 | RotateRight64 => {
            let wide = matches!(
                opcode,
                LogicalShiftLeft64 | LogicalShiftRight64 | ArithShiftRight64 | RotateRight64
            );
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            let by_imm = args[1].immediate_bits().map(|b| b as u32);
            if by_imm.is_none() {
                let amount = ctx.ra.use_gpr(&mut ctx.a, args[1])?;
                ctx.a.mov(gpr32(SCRATCH1), gpr32(amount))?;
            }
            macro_rules! shift {
                ($op:ident) => {
                    match (by_imm, wide) {
                        (Some(n), true) => ctx.a.$op(gpr64(dst), n as i32)?,
                        (Some(n), false) => ctx.a.$op(gpr32(dst), n as i32)?,
                        (None, true) => ctx.a.$op(gpr64(dst), iced_x86::code_asm::cl)?,
                        (None, false) => ctx.a.$op(gpr32(dst), iced_x86::code_asm::cl)?,
                    }
                };
            }
            match opcode {
                LogicalShiftLeft32 | LogicalShiftLeft64 => shift!(shl),
                LogicalShiftRight32 | LogicalShiftRight64 => shift!(shr),
                ArithShiftRight32 | ArithShiftRight64 => shift!(sar),
                _ => shift!(ror),
            }
            ctx.ra.define_gpr(id, dst);
        }
        ZeroExtendToWord | LeastSignificantWord => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.a.mov(gpr32(dst), gpr32(dst))?;
            ctx.ra.define_gpr(id, dst);
        }
        ZeroExtendToLong => {
            // GPR-resident values are already zero-extended; re-home the
            // register under the new id.
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.ra.define_gpr(id, dst);
        }
        SignExtendToWord => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.a.movsx(gpr32(dst), gpr16(dst))?;
            ctx.ra.define_gpr(id, dst);
        }
        SignExtendToLong => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.a.movsxd(gpr64(dst), gpr32(dst))?;
            ctx.ra.define_gpr(id, dst);
        }
        LeastSignificantByte => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.a.movzx(gpr32(dst), gpr8(dst))?;
            ctx.ra.define_gpr(id, dst);
        }
        LeastSignificantHalf => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.a.movzx(gpr32(dst), gpr16(dst))?;
            ctx.ra.define_gpr(id, dst);
        }
        MostSignificantBit => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.a.shr(gpr32(dst), 31)?;
            ctx.ra.define_gpr(id, dst);
        }
        IsZero32 | IsZero64 => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            if opcode == IsZero64 {
                ctx.a.test(gpr64(dst), gpr64(dst))?;
            } else {
                ctx.a.test(gpr32(dst), gpr32(dst))?;
            }
            ctx.a.setz(gpr8(dst))?;
            ctx.a.movzx(gpr32(dst), gpr8(dst))?;
            ctx.ra.define_gpr(id, dst);
        }
        GetNZFromOp => {
            // Recomputed from the value rather than captured from host
            // flags, so multiply and move producers need no special
            // casing.
            let src = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a.test(gpr32(src), gpr32(src))?;
            ctx.a.sets(gpr8(dst))?;
            ctx.a.setz(gpr8(SCRATCH1))?;
            ctx.a.movzx(gpr32(dst), gpr8(dst))?;
            ctx.a.shl(gpr32(dst), 31)?;
            ctx.a.movzx(gpr32(SCRATCH1), gpr8(SCRATCH1))?;
            ctx.a.shl(gpr32(SCRATCH1), 30)?;
            ctx.a.or(gpr32(dst), gpr32(SCRATCH1))?;
            ctx.ra.define_gpr(id, dst);
        }
        NzcvFromPackedFlags => {
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[0])?;
            ctx.a.and(gpr32(dst), 0xF000_0000u32 as i32)?;
            ctx.ra.define_gpr(id, dst);
        }
        TestCondition => {
            let Value::ImmCond(cond) = args[0] else {
                panic!("TestCondition requires a condition immediate");
            };
            let src = ctx.ra.use_gpr(&mut ctx.a, args[1])?;
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            emit_cond_eval(&mut ctx.a, cond, src, dst)?;
            ctx.ra.define_gpr(id, dst);
        }
        ConditionalSelect32 | ConditionalSelect64 => {
            let wide = opcode == ConditionalSelect64;
            let cond = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
            let dst = ctx.ra.use_scratch_gpr(&mut ctx.a, args[2])?;
            let then_v = ctx.ra.use_gpr(&mut ctx.a, args[1])?;
            ctx.a.test(gpr32(cond), gpr32(cond))?;
            if wide {
                ctx.a.cmovne(gpr64(dst), gpr64(then_v))?;
            } else {
                ctx.a.cmovne(gpr32(dst), gpr32(then_v))?;
            }
            ctx.ra.define_gpr(id, dst);
        }
        other => unreachable!("{other:?} is not a data-processing opcode"),
    }
    Ok(())
}

/// Evaluate `cond` over an ARM-layout NZCV value in `src32`, leaving 0/1
/// in `dst32`. Clobbers the scratch pair.
pub(crate) fn emit_cond_eval(
    a: &mut CodeAssembler,
    cond: Cond,
    src: u8,
    dst: u8,
) -> Result<(), EmitError> {
    const N: i32 = 1 << 31;
    const Z: i32 = 1 << 30;
    const C: i32 = 1 << 29;
    const V: i32 = 1 << 28;
    let bit_test = |a: &mut CodeAssembler, mask: i32, invert: bool| -> Result<(), EmitError> {
        a.test(gpr32(src), mask)?;
        if invert {
            a.setz(gpr8(dst))?;
        } else {
            a.setnz(gpr8(dst))?;
        }
        a.movzx(gpr32(dst), gpr8(dst))?;
        Ok(())
    };
    match cond {
        Cond::Eq => bit_test(a, Z, false)?,
        Cond::Ne => bit_test(a, Z, true)?,
        Cond::Cs => bit_test(a, C, false)?,
        Cond::Cc => bit_test(a, C, true)?,
        Cond::Mi => bit_test(a, N, false)?,
        Cond::Pl => bit_test(a, N, true)?,
        Cond::Vs => bit_test(a, V, false)?,
        Cond::Vc => bit_test(a, V, true)?,
        Cond::Hi | Cond::Ls => {
            // C set and Z clear.
            a.mov(gpr32(SCRATCH0), gpr32(src))?;
            a.and(gpr32(SCRATCH0), C | Z)?;
            a.cmp(gpr32(SCRATCH0), C)?;
            if cond == Cond::Hi {
                a.sete(gpr8(dst))?;
            } else {
                a.setne(gpr8(dst))?;
            }
            a.movzx(gpr32(dst), gpr8(dst))?;
        }
        Cond::Ge | Cond::Lt => {
            // N == V.
            a.mov(gpr32(SCRATCH0), gpr32(src))?;
            a.shr(gpr32(SCRATCH0), 3)?;
            a.xor(gpr32(SCRATCH0), gpr32(src))?;
            a.test(gpr32(SCRATCH0), V)?;
            if cond == Cond::Ge {
                a.setz(gpr8(dst))?;
            } else {
                a.setnz(gpr8(dst))?;
            }
            a.movzx(gpr32(dst), gpr8(dst))?;
        }
        Cond::Gt | Cond::Le => {
            // Z clear and N == V.
            a.mov(gpr32(SCRATCH0), gpr32(src))?;
            a.shr(gpr32(SCRATCH0), 3)?;
            a.xor(gpr32(SCRATCH0), gpr32(src))?;
            a.and(gpr32(SCRATCH0), V)?;
            a.mov(gpr32(SCRATCH1), gpr32(src))?;
            a.and(gpr32(SCRATCH1), Z)?;
            a.or(gpr32(SCRATCH0), gpr32(SCRATCH1))?;
            if cond == Cond::Gt {
                a.setz(gpr8(dst))?;
            } else {
                a.setnz(gpr8(dst))?;
            }
            a.movzx(gpr32(dst), gpr8(dst))?;
        }
        Cond::Al | Cond::Nv => {
            a.mov(gpr32(dst), 1)?;
        }
    }
    Ok(())
}
