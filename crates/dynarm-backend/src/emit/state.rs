//! Guest-state access, CPSR handling, RSB pushes, barriers, and the
//! callback-raising opcodes (exceptions, supervisor calls, coprocessor and
//! cache-maintenance traffic). Register reads and writes go straight
//! through the state pointer; the optimizer has already removed the
//! redundant ones, so nothing here second-guesses it.

use dynarm_ir::{InstId, Opcode, Value};
use dynarm_types::{A64Reg, ExceptionKind};
use iced_x86::code_asm::{dword_ptr, qword_ptr, xmmword_ptr};

use crate::{
    abi::{
        self, off_reg, off_vec, OFF_CHECK_BIT, OFF_CPSR_NZCV, OFF_CPSR_OTHER,
        OFF_LOCATION_PACKED, OFF_PC, OFF_RSB_CODE_PTRS, OFF_RSB_LOCATIONS, OFF_RSB_PTR, OFF_SP,
        RSB_PTR_MASK,
    },
    emit::{EmitContext, PatchFallback, PatchKind, TargetArch},
    hostloc::{gpr32, gpr64, xmm, SCRATCH0, SCRATCH1, STATE, XMM_SCRATCH0},
    regalloc::CallArg,
    EmitError,
};

fn a32_reg_index(v: Value) -> usize {
    match v {
        Value::ImmA32Reg(r) => r.index(),
        other => panic!("expected an A32 register name, found {other:?}"),
    }
}

fn a32_ext_index(v: Value) -> usize {
    match v {
        Value::ImmA32ExtReg(r) => r.single_index as usize,
        other => panic!("expected an A32 extension register name, found {other:?}"),
    }
}

fn a64_reg_index(v: Value) -> usize {
    match v {
        Value::ImmA64Reg(A64Reg::X(i)) => i as usize,
        Value::ImmA64Reg(other) => panic!("{other:?} is not an addressable X register"),
        other => panic!("expected an A64 register name, found {other:?}"),
    }
}

fn a64_vec_index(v: Value) -> usize {
    match v {
        Value::ImmA64Vec(r) => r.0 as usize,
        other => panic!("expected an A64 vector register name, found {other:?}"),
    }
}

/// Store a 32-bit value (immediate directly, register otherwise) to a
/// state field.
fn store32<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    offset: i32,
    v: Value,
) -> Result<(), EmitError> {
    match v.immediate_bits() {
        Some(bits) => {
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + offset), bits as u32 as i32)?;
        }
        None => {
            let reg = ctx.ra.use_gpr(&mut ctx.a, v)?;
            ctx.a.mov(dword_ptr(gpr64(STATE) + offset), gpr32(reg))?;
        }
    }
    Ok(())
}

/// Store a 64-bit value to a state field, zero-extending narrower
/// register-resident values by the GPR invariant.
fn store64<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    offset: i32,
    v: Value,
) -> Result<(), EmitError> {
    match v.immediate_bits() {
        Some(bits) => {
            let bits = bits as u64;
            if bits <= u32::MAX as u64 {
                // A 32-bit immediate store plus an explicit zero of the
                // high half avoids the imm64 round-trip through a scratch.
                ctx.a.mov(dword_ptr(gpr64(STATE) + offset), bits as i32)?;
                ctx.a.mov(dword_ptr(gpr64(STATE) + offset + 4), 0)?;
            } else {
                ctx.a.mov(gpr64(SCRATCH0), bits)?;
                ctx.a.mov(qword_ptr(gpr64(STATE) + offset), gpr64(SCRATCH0))?;
            }
        }
        None => {
            let reg = ctx.ra.use_gpr(&mut ctx.a, v)?;
            ctx.a.mov(qword_ptr(gpr64(STATE) + offset), gpr64(reg))?;
        }
    }
    Ok(())
}

pub fn emit<T: TargetArch>(ctx: &mut EmitContext<'_, T>, id: InstId) -> Result<(), EmitError> {
    let block = ctx.block;
    let inst = block.inst(id);
    let opcode = inst.opcode;
    let args = inst.args.clone();
    let cb = *ctx.callbacks;
    use Opcode::*;
    match opcode {
        A32GetRegister => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a.mov(
                gpr32(dst),
                dword_ptr(gpr64(STATE) + off_reg(a32_reg_index(args[0]))),
            )?;
            ctx.ra.define_gpr(id, dst);
        }
        A32SetRegister => {
            store32(ctx, off_reg(a32_reg_index(args[0])), args[1])?;
        }
        A32GetExtRegU32 => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            let off = abi::OFF_VEC + (a32_ext_index(args[0]) * 4) as i32;
            ctx.a.mov(gpr32(dst), dword_ptr(gpr64(STATE) + off))?;
            ctx.ra.define_gpr(id, dst);
        }
        A32SetExtRegU32 => {
            let off = abi::OFF_VEC + (a32_ext_index(args[0]) * 4) as i32;
            store32(ctx, off, args[1])?;
        }
        A32GetCpsr => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a
                .mov(gpr32(dst), dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV))?;
            ctx.a
                .or(gpr32(dst), dword_ptr(gpr64(STATE) + OFF_CPSR_OTHER))?;
            ctx.ra.define_gpr(id, dst);
        }
        A32SetCpsr => {
            // Mode-changing writes (T, IT) go through `A32BXWritePC` or
            // block boundaries; this split write covers the flag and
            // control halves.
            let src = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.a.and(gpr32(SCRATCH0), 0xF000_0000u32 as i32)?;
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV), gpr32(SCRATCH0))?;
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.a.and(gpr32(SCRATCH0), 0x0FFF_FFFFu32 as i32)?;
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + OFF_CPSR_OTHER), gpr32(SCRATCH0))?;
        }
        A32SetCpsrNZCV => {
            let src = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.a.and(gpr32(SCRATCH0), 0xF000_0000u32 as i32)?;
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV), gpr32(SCRATCH0))?;
        }
        A32SetCpsrNZ => {
            let src = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.a.and(gpr32(SCRATCH0), 0xC000_0000u32 as i32)?;
            ctx.a
                .mov(gpr32(SCRATCH1), dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV))?;
            ctx.a.and(gpr32(SCRATCH1), 0x3000_0000u32 as i32)?;
            ctx.a.or(gpr32(SCRATCH0), gpr32(SCRATCH1))?;
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV), gpr32(SCRATCH0))?;
        }
        A32GetCFlag => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a
                .mov(gpr32(dst), dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV))?;
            ctx.a.shr(gpr32(dst), 29)?;
            ctx.a.and(gpr32(dst), 1)?;
            ctx.ra.define_gpr(id, dst);
        }
        A32BXWritePC => {
            let src = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
            // Interworking: bit 0 selects Thumb, both in the packed
            // location word (bit 0) and in CPSR.T (bit 5).
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.a.and(gpr32(SCRATCH0), 1)?;
            ctx.a.and(
                dword_ptr(gpr64(STATE) + OFF_LOCATION_PACKED),
                !1i32,
            )?;
            ctx.a
                .or(dword_ptr(gpr64(STATE) + OFF_LOCATION_PACKED), gpr32(SCRATCH0))?;
            ctx.a.shl(gpr32(SCRATCH0), 5)?;
            ctx.a.and(
                dword_ptr(gpr64(STATE) + OFF_CPSR_OTHER),
                !(1i32 << 5),
            )?;
            ctx.a
                .or(dword_ptr(gpr64(STATE) + OFF_CPSR_OTHER), gpr32(SCRATCH0))?;
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.a.and(gpr32(SCRATCH0), !1i32)?;
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + off_reg(15)), gpr32(SCRATCH0))?;
        }
        A32SetCheckBit | A64SetCheckBit => {
            store32(ctx, OFF_CHECK_BIT, args[0])?;
        }
        A32GetCheckBit | A64GetCheckBit => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a
                .mov(gpr32(dst), dword_ptr(gpr64(STATE) + OFF_CHECK_BIT))?;
            ctx.ra.define_gpr(id, dst);
        }
        A32DataSynchronizationBarrier | A32DataMemoryBarrier => {
            ctx.a.mfence()?;
        }
        A32InstructionSynchronizationBarrier => {
            // Self-modifying code is handled through cache invalidation;
            // there is nothing to order on the host side.
        }
        A64GetX => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a.mov(
                gpr64(dst),
                qword_ptr(gpr64(STATE) + off_reg(a64_reg_index(args[0]))),
            )?;
            ctx.ra.define_gpr(id, dst);
        }
        A64SetX => {
            store64(ctx, off_reg(a64_reg_index(args[0])), args[1])?;
        }
        A64GetW => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a.mov(
                gpr32(dst),
                dword_ptr(gpr64(STATE) + off_reg(a64_reg_index(args[0]))),
            )?;
            ctx.ra.define_gpr(id, dst);
        }
        A64SetW => {
            // A W write zeroes the upper half of the X register; the GPR
            // invariant already has register-resident U32 values
            // zero-extended.
            store64(ctx, off_reg(a64_reg_index(args[0])), args[1])?;
        }
        A64GetSP => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a.mov(gpr64(dst), qword_ptr(gpr64(STATE) + OFF_SP))?;
            ctx.ra.define_gpr(id, dst);
        }
        A64SetSP => {
            store64(ctx, OFF_SP, args[0])?;
        }
        A64GetPC => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a.mov(gpr64(dst), qword_ptr(gpr64(STATE) + OFF_PC))?;
            ctx.ra.define_gpr(id, dst);
        }
        A64SetPC => {
            store64(ctx, OFF_PC, args[0])?;
        }
        A64GetNZCVRaw => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            ctx.a
                .mov(gpr32(dst), dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV))?;
            ctx.ra.define_gpr(id, dst);
        }
        A64SetNZCVRaw => {
            let src = ctx.ra.use_gpr(&mut ctx.a, args[0])?;
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.a.and(gpr32(SCRATCH0), 0xF000_0000u32 as i32)?;
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + OFF_CPSR_NZCV), gpr32(SCRATCH0))?;
        }
        A64GetS => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            let off = off_vec(a64_vec_index(args[0]));
            ctx.a.mov(gpr32(dst), dword_ptr(gpr64(STATE) + off))?;
            ctx.ra.define_gpr(id, dst);
        }
        A64SetS => {
            // Writes zero the rest of the vector register; `movd` into the
            // scratch XMM does exactly that.
            let off = off_vec(a64_vec_index(args[0]));
            let src = ctx.ra.use_gpr(&mut ctx.a, args[1])?;
            ctx.a.movd(xmm(XMM_SCRATCH0), gpr32(src))?;
            ctx.a
                .movups(xmmword_ptr(gpr64(STATE) + off), xmm(XMM_SCRATCH0))?;
        }
        A64GetD => {
            let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
            let off = off_vec(a64_vec_index(args[0]));
            ctx.a.mov(gpr64(dst), qword_ptr(gpr64(STATE) + off))?;
            ctx.ra.define_gpr(id, dst);
        }
        A64SetD => {
            let off = off_vec(a64_vec_index(args[0]));
            let src = ctx.ra.use_gpr(&mut ctx.a, args[1])?;
            ctx.a.movq(xmm(XMM_SCRATCH0), gpr64(src))?;
            ctx.a
                .movups(xmmword_ptr(gpr64(STATE) + off), xmm(XMM_SCRATCH0))?;
        }
        A64GetQ => {
            let dst = ctx.ra.scratch_xmm(&mut ctx.a)?;
            let off = off_vec(a64_vec_index(args[0]));
            ctx.a.movups(xmm(dst), xmmword_ptr(gpr64(STATE) + off))?;
            ctx.ra.define_xmm(id, dst);
        }
        A64SetQ => {
            let off = off_vec(a64_vec_index(args[0]));
            let src = ctx.ra.use_xmm(&mut ctx.a, ctx.pool, args[1])?;
            ctx.a.movups(xmmword_ptr(gpr64(STATE) + off), xmm(src))?;
        }
        PushRSB => {
            let Value::ImmU64(target_hash) = args[0] else {
                panic!("PushRSB requires an immediate location hash");
            };
            ctx.a
                .mov(gpr32(SCRATCH0), dword_ptr(gpr64(STATE) + OFF_RSB_PTR))?;
            ctx.a.mov(gpr64(SCRATCH1), target_hash)?;
            ctx.a.mov(
                qword_ptr(gpr64(STATE) + gpr64(SCRATCH0) * 8 + OFF_RSB_LOCATIONS),
                gpr64(SCRATCH1),
            )?;
            // The code pointer is a patch site: it points at the exit stub
            // until the target compiles, and is restored there when the
            // target is invalidated.
            ctx.emit_patch_site(PatchKind::MovRcx, target_hash, PatchFallback::ExitStub)?;
            ctx.a.mov(
                qword_ptr(gpr64(STATE) + gpr64(SCRATCH0) * 8 + OFF_RSB_CODE_PTRS),
                gpr64(SCRATCH1),
            )?;
            ctx.a.add(gpr32(SCRATCH0), 1)?;
            ctx.a.and(gpr32(SCRATCH0), RSB_PTR_MASK as i32)?;
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + OFF_RSB_PTR), gpr32(SCRATCH0))?;
        }
        ExceptionRaised => {
            ctx.ra.host_call(
                &mut ctx.a,
                cb.exception_raised,
                &[
                    CallArg::Imm64(cb.ctx as u64),
                    CallArg::Value(args[0]),
                    CallArg::Value(args[1]),
                ],
            )?;
        }
        CallSupervisor => {
            ctx.ra.host_call(
                &mut ctx.a,
                cb.call_svc,
                &[CallArg::Imm64(cb.ctx as u64), CallArg::Value(args[0])],
            )?;
        }
        Breakpoint => {
            ctx.ra.host_call(
                &mut ctx.a,
                cb.exception_raised,
                &[
                    CallArg::Imm64(cb.ctx as u64),
                    CallArg::Imm64(0),
                    CallArg::Imm32(ExceptionKind::Breakpoint.bits()),
                ],
            )?;
        }
        A32DataCacheOperationRaised | A64DataCacheOperationRaised => {
            ctx.ra.host_call(
                &mut ctx.a,
                cb.data_cache_operation,
                &[
                    CallArg::Imm64(cb.ctx as u64),
                    CallArg::Value(args[0]),
                    CallArg::Value(args[1]),
                ],
            )?;
        }
        A64InstructionCacheOperationRaised => {
            ctx.ra.host_call(
                &mut ctx.a,
                cb.instruction_cache_operation,
                &[
                    CallArg::Imm64(cb.ctx as u64),
                    CallArg::Value(args[0]),
                    CallArg::Value(args[1]),
                ],
            )?;
        }
        A64GetCNTPCT => {
            ctx.ra
                .host_call(&mut ctx.a, cb.get_cntpct, &[CallArg::Imm64(cb.ctx as u64)])?;
            ctx.ra.take_call_result(&mut ctx.a, id)?;
        }
        A32CoprocGetOneWord | A32CoprocSetOneWord => {
            let field = |v: Value| -> u32 {
                v.immediate_bits().expect("coprocessor fields are immediates") as u32
            };
            let packed = field(args[0])
                | (field(args[1]) << 4)
                | (field(args[2]) << 8)
                | (field(args[3]) << 12)
                | (field(args[4]) << 16);
            if opcode == A32CoprocGetOneWord {
                ctx.ra.host_call(
                    &mut ctx.a,
                    cb.coproc_get_one_word,
                    &[CallArg::Imm64(cb.ctx as u64), CallArg::Imm32(packed)],
                )?;
                ctx.ra.take_call_result(&mut ctx.a, id)?;
            } else {
                ctx.ra.host_call(
                    &mut ctx.a,
                    cb.coproc_set_one_word,
                    &[
                        CallArg::Imm64(cb.ctx as u64),
                        CallArg::Imm32(packed),
                        CallArg::Value(args[5]),
                    ],
                )?;
            }
        }
        other => unreachable!("{other:?} is not a state-access opcode"),
    }
    Ok(())
}
