//! Scalar floating-point lowering.
//!
//! Rounding mode and flush-to-zero are not emitted per operation: the
//! dispatcher runs guest code under a guest MXCSR image whose RC and
//! FTZ/DAZ fields are derived from FPCR, so plain SSE arithmetic already
//! rounds and flushes the ARM way. What the host cannot be configured to
//! do is ARM's NaN behavior, handled here in two forms:
//!
//! - FPCR.DN set: any NaN result is forced to the ARM default NaN via a
//!   short branch (no blend/select dependency).
//! - FPCR.DN clear: x86 propagates the first operand's NaN, but ARM gives
//!   a signaling NaN priority over a quiet one; the post-process step
//!   inspects both operands on the NaN path and rewrites the result to
//!   the silenced second operand in the (op1 = QNaN, op2 = SNaN) case.
//!
//! Both are skipped under the `INACCURATE_NAN` unsafe flag. Saturating
//! conversions
//! clamp inline against constants of the source format and use the
//! two-step signed sequence for the unsigned 64-bit case; the one
//! rounding mode with no SSE immediate form (ties-away) falls back to a
//! library routine keyed by size and signedness.

use dynarm_ir::{InstId, Opcode, Value};
use dynarm_opt::UnsafeOptimization;
use dynarm_types::RoundingMode;
use iced_x86::code_asm::CodeAssembler;

use crate::{
    emit::{EmitContext, TargetArch},
    fplib,
    hostloc::{gpr32, gpr64, xmm, SCRATCH0, SCRATCH1, XMM_SCRATCH0, XMM_SCRATCH1},
    regalloc::CallArg,
    EmitError,
};

const F32_DEFAULT_NAN: u32 = 0x7FC0_0000;
const F64_DEFAULT_NAN: u64 = 0x7FF8_0000_0000_0000;

pub fn emit<T: TargetArch>(ctx: &mut EmitContext<'_, T>, id: InstId) -> Result<(), EmitError> {
    let block = ctx.block;
    let inst = block.inst(id);
    let opcode = inst.opcode;
    let args = inst.args.clone();
    use Opcode::*;
    match opcode {
        FPAdd32 | FPSub32 | FPMul32 | FPDiv32 => emit_binary(ctx, id, &args, opcode, false),
        FPAdd64 | FPSub64 | FPMul64 | FPDiv64 => emit_binary(ctx, id, &args, opcode, true),
        FPToFixedS32 | FPToFixedU32 | FPToFixedS64 | FPToFixedU64 => {
            emit_to_fixed(ctx, id, &args, opcode)
        }
        other => unreachable!("{other:?} is not a floating-point opcode"),
    }
}

fn emit_binary<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    id: InstId,
    args: &[Value],
    opcode: Opcode,
    double: bool,
) -> Result<(), EmitError> {
    let op1 = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
    let op2 = ctx.ra.use_gpr(&mut ctx.a, args[1])?;
    let a = &mut ctx.a;
    if double {
        a.movq(xmm(XMM_SCRATCH0), gpr64(op1))?;
        a.movq(xmm(XMM_SCRATCH1), gpr64(op2))?;
    } else {
        a.movd(xmm(XMM_SCRATCH0), gpr32(op1))?;
        a.movd(xmm(XMM_SCRATCH1), gpr32(op2))?;
    }
    use Opcode::*;
    match (opcode, double) {
        (FPAdd32, _) => a.addss(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
        (FPAdd64, _) => a.addsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
        (FPSub32, _) => a.subss(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
        (FPSub64, _) => a.subsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
        (FPMul32, _) => a.mulss(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
        (FPMul64, _) => a.mulsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
        (FPDiv32, _) => a.divss(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
        _ => a.divsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?,
    }
    let skip_nan = ctx
        .config
        .unsafe_optimizations
        .contains(UnsafeOptimization::INACCURATE_NAN);
    if !skip_nan {
        let mut done = a.create_label();
        if double {
            a.ucomisd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH0))?;
        } else {
            a.ucomiss(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH0))?;
        }
        a.jnp(done)?;
        if ctx.config.fpcr.dn() {
            // Default-NaN forcing.
            if double {
                a.mov(gpr64(SCRATCH0), F64_DEFAULT_NAN)?;
                a.movq(xmm(XMM_SCRATCH0), gpr64(SCRATCH0))?;
            } else {
                a.mov(gpr32(SCRATCH0), F32_DEFAULT_NAN)?;
                a.movd(xmm(XMM_SCRATCH0), gpr32(SCRATCH0))?;
            }
        } else if double {
            emit_nan_priority64(a, op1, op2, &mut done)?;
        } else {
            emit_nan_priority32(a, op1, op2, &mut done)?;
        }
        a.set_label(&mut done)?;
        a.nop()?;
    }
    let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
    if double {
        ctx.a.movq(gpr64(dst), xmm(XMM_SCRATCH0))?;
    } else {
        ctx.a.movd(gpr32(dst), xmm(XMM_SCRATCH0))?;
    }
    ctx.ra.define_gpr(id, dst);
    Ok(())
}

/// ARM NaN priority, f32: on the NaN path, if op1 is a quiet NaN while
/// op2 is a signaling one, the result is op2 silenced — the one case
/// where x86's first-operand propagation disagrees with ARM.
fn emit_nan_priority32(
    a: &mut CodeAssembler,
    op1: u8,
    op2: u8,
    done: &mut iced_x86::code_asm::CodeLabel,
) -> Result<(), EmitError> {
    // op1 quiet NaN?
    a.mov(gpr32(SCRATCH0), gpr32(op1))?;
    a.and(gpr32(SCRATCH0), 0x7FC0_0000u32 as i32)?;
    a.cmp(gpr32(SCRATCH0), 0x7FC0_0000u32 as i32)?;
    a.jne(*done)?;
    // op2 signaling NaN: exponent all ones, quiet bit clear, mantissa
    // nonzero.
    a.mov(gpr32(SCRATCH1), gpr32(op2))?;
    a.mov(gpr32(SCRATCH0), gpr32(SCRATCH1))?;
    a.and(gpr32(SCRATCH0), 0x7FC0_0000u32 as i32)?;
    a.cmp(gpr32(SCRATCH0), 0x7F80_0000u32 as i32)?;
    a.jne(*done)?;
    a.test(gpr32(SCRATCH1), 0x003F_FFFFu32 as i32)?;
    a.je(*done)?;
    a.or(gpr32(SCRATCH1), 0x0040_0000u32 as i32)?;
    a.movd(xmm(XMM_SCRATCH0), gpr32(SCRATCH1))?;
    Ok(())
}

fn emit_nan_priority64(
    a: &mut CodeAssembler,
    op1: u8,
    op2: u8,
    done: &mut iced_x86::code_asm::CodeLabel,
) -> Result<(), EmitError> {
    const QNAN_MASK: u64 = 0x7FF8_0000_0000_0000;
    const EXP_MASK: u64 = 0x7FF0_0000_0000_0000;
    const MANTISSA_LOW: u64 = 0x0007_FFFF_FFFF_FFFF;
    a.mov(gpr64(SCRATCH0), QNAN_MASK)?;
    a.and(gpr64(SCRATCH0), gpr64(op1))?;
    a.mov(gpr64(SCRATCH1), QNAN_MASK)?;
    a.cmp(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
    a.jne(*done)?;
    a.mov(gpr64(SCRATCH0), QNAN_MASK)?;
    a.and(gpr64(SCRATCH0), gpr64(op2))?;
    a.mov(gpr64(SCRATCH1), EXP_MASK)?;
    a.cmp(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
    a.jne(*done)?;
    a.mov(gpr64(SCRATCH0), MANTISSA_LOW)?;
    a.test(gpr64(SCRATCH0), gpr64(op2))?;
    a.je(*done)?;
    a.mov(gpr64(SCRATCH0), gpr64(op2))?;
    a.mov(gpr64(SCRATCH1), 0x0008_0000_0000_0000u64)?;
    a.or(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
    a.movq(xmm(XMM_SCRATCH0), gpr64(SCRATCH0))?;
    Ok(())
}

/// Saturating float→integer conversion. The 32-bit variants take an f32
/// source and widen it first; the 64-bit variants take an f64 source.
fn emit_to_fixed<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    id: InstId,
    args: &[Value],
    opcode: Opcode,
) -> Result<(), EmitError> {
    let rounding = match args[1] {
        Value::ImmU8(bits) => RoundingMode::from_bits(bits),
        other => panic!("FPToFixed rounding mode must be immediate, found {other:?}"),
    };
    if rounding == RoundingMode::TiesToAway {
        // No SSE immediate form; library fallback keyed by (size, mode).
        let cb_fn: extern "C" fn(u64) -> u64 = match opcode {
            Opcode::FPToFixedS32 => fplib::fp32_to_s32_ties_away,
            Opcode::FPToFixedU32 => fplib::fp32_to_u32_ties_away,
            Opcode::FPToFixedS64 => fplib::fp64_to_s64_ties_away,
            _ => fplib::fp64_to_u64_ties_away,
        };
        ctx.ra
            .host_call(&mut ctx.a, cb_fn as usize, &[CallArg::Value(args[0])])?;
        ctx.ra.take_call_result(&mut ctx.a, id)?;
        return Ok(());
    }
    let src = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
    let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
    let a = &mut ctx.a;
    let narrow_src = matches!(opcode, Opcode::FPToFixedS32 | Opcode::FPToFixedU32);
    if narrow_src {
        a.movd(xmm(XMM_SCRATCH0), gpr32(src))?;
        a.cvtss2sd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH0))?;
    } else {
        a.movq(xmm(XMM_SCRATCH0), gpr64(src))?;
    }
    match rounding {
        RoundingMode::TowardsZero => {}
        RoundingMode::TiesToEven => a.roundsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH0), 0)?,
        RoundingMode::TowardsMinusInfinity => {
            a.roundsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH0), 1)?
        }
        RoundingMode::TowardsPlusInfinity => a.roundsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH0), 2)?,
        RoundingMode::TiesToAway => unreachable!(),
    }
    // NaN saturates to zero.
    let mut done = a.create_label();
    let mut convert = a.create_label();
    a.ucomisd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH0))?;
    a.jnp(convert)?;
    a.xor(gpr32(dst), gpr32(dst))?;
    a.jmp(done)?;
    a.set_label(&mut convert)?;
    let clamp = |a: &mut CodeAssembler, lo: u64, hi: u64| -> Result<(), EmitError> {
        a.mov(gpr64(SCRATCH0), lo)?;
        a.movq(xmm(XMM_SCRATCH1), gpr64(SCRATCH0))?;
        a.maxsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?;
        a.mov(gpr64(SCRATCH0), hi)?;
        a.movq(xmm(XMM_SCRATCH1), gpr64(SCRATCH0))?;
        a.minsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?;
        Ok(())
    };
    match opcode {
        Opcode::FPToFixedS32 => {
            // [-2^31, 2^31 - 1], both exact in f64.
            clamp(a, (-2147483648.0f64).to_bits(), 2147483647.0f64.to_bits())?;
            a.cvttsd2si(gpr64(dst), xmm(XMM_SCRATCH0))?;
            a.mov(gpr32(dst), gpr32(dst))?;
        }
        Opcode::FPToFixedU32 => {
            clamp(a, 0.0f64.to_bits(), 4294967295.0f64.to_bits())?;
            a.cvttsd2si(gpr64(dst), xmm(XMM_SCRATCH0))?;
            a.mov(gpr32(dst), gpr32(dst))?;
        }
        Opcode::FPToFixedS64 => {
            // The upper clamp is the largest f64 below 2^63.
            clamp(
                a,
                (-9223372036854775808.0f64).to_bits(),
                0x43DF_FFFF_FFFF_FFFF,
            )?;
            a.cvttsd2si(gpr64(dst), xmm(XMM_SCRATCH0))?;
        }
        _ => {
            // Unsigned 64-bit: no direct host form; clamp, then convert
            // either directly (below 2^63) or via the signed-plus-fixup
            // two-step.
            let mut big = a.create_label();
            let mut converted = a.create_label();
            clamp(a, 0.0f64.to_bits(), 0x43EF_FFFF_FFFF_FFFF)?;
            a.mov(gpr64(SCRATCH0), 9223372036854775808.0f64.to_bits())?;
            a.movq(xmm(XMM_SCRATCH1), gpr64(SCRATCH0))?;
            a.ucomisd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?;
            a.jae(big)?;
            a.cvttsd2si(gpr64(dst), xmm(XMM_SCRATCH0))?;
            a.jmp(converted)?;
            a.set_label(&mut big)?;
            a.subsd(xmm(XMM_SCRATCH0), xmm(XMM_SCRATCH1))?;
            a.cvttsd2si(gpr64(dst), xmm(XMM_SCRATCH0))?;
            a.mov(gpr64(SCRATCH0), 0x8000_0000_0000_0000u64)?;
            a.xor(gpr64(dst), gpr64(SCRATCH0))?;
            a.set_label(&mut converted)?;
            a.nop()?;
        }
    }
    a.set_label(&mut done)?;
    a.nop()?;
    ctx.ra.define_gpr(id, dst);
    Ok(())
}
