//! Terminator epilogues. Every epilogue that
//! can leave for another block first writes the destination location into
//! the guest state and polls the halt flag, so a dispatcher re-entry at
//! any exit observes a consistent guest PC and halt latency stays bounded
//! by one block.

use dynarm_ir::{Location, Terminator};
use dynarm_types::Cond;
use iced_x86::code_asm::{dword_ptr, qword_ptr, CodeAssembler, CodeLabel};

use crate::{
    abi::{
        FAST_DISPATCH_MASK, OFF_CHECK_BIT, OFF_CYCLES_REMAINING, OFF_FAST_DISPATCH_BASE,
        OFF_HALT_REASON, OFF_RSB_CODE_PTRS, OFF_RSB_LOCATIONS, OFF_RSB_PTR, RSB_PTR_MASK,
    },
    emit::{EmitContext, PatchFallback, PatchKind, TargetArch},
    hostloc::{gpr32, gpr64, SCRATCH0, SCRATCH1, STATE},
    regalloc::CallArg,
    EmitError,
};

pub fn emit_terminal<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    term: &Terminator<T::Loc>,
    single_step: bool,
) -> Result<(), EmitError> {
    match term {
        Terminator::Interpret(loc) => {
            T::write_location(&mut ctx.a, *loc)?;
            let cb = *ctx.callbacks;
            ctx.ra.host_call(
                &mut ctx.a,
                cb.interpreter_fallback,
                &[
                    CallArg::Imm64(cb.ctx as u64),
                    CallArg::Imm64(loc.pc()),
                    CallArg::Imm32(1),
                ],
            )?;
            ctx.a.jmp(ctx.stubs.exit)?;
        }
        Terminator::ReturnToDispatch => {
            ctx.a.jmp(ctx.stubs.exit)?;
        }
        Terminator::LinkBlock(loc) => {
            emit_link_block(ctx, *loc, single_step)?;
        }
        Terminator::LinkBlockFast(loc) => {
            T::write_location(&mut ctx.a, *loc)?;
            if single_step {
                ctx.a.jmp(ctx.stubs.exit)?;
                return Ok(());
            }
            emit_halt_check(ctx)?;
            ctx.emit_patch_site(
                PatchKind::Jmp,
                loc.unique_hash(),
                PatchFallback::NextInstruction,
            )?;
            // Cache miss: stay in emitted code and consult the
            // fast-dispatch table with the statically known hash.
            ctx.a.mov(gpr64(SCRATCH0), loc.unique_hash())?;
            emit_fast_dispatch_lookup(ctx)?;
        }
        Terminator::PopRSBHint => {
            if single_step {
                ctx.a.jmp(ctx.stubs.exit)?;
                return Ok(());
            }
            emit_halt_check(ctx)?;
            T::emit_location_hash(&mut ctx.a)?;
            let mut miss = ctx.a.create_label();
            ctx.a
                .mov(gpr32(SCRATCH1), dword_ptr(gpr64(STATE) + OFF_RSB_PTR))?;
            ctx.a.sub(gpr32(SCRATCH1), 1)?;
            ctx.a.and(gpr32(SCRATCH1), RSB_PTR_MASK as i32)?;
            ctx.a.cmp(
                gpr64(SCRATCH0),
                qword_ptr(gpr64(STATE) + gpr64(SCRATCH1) * 8 + OFF_RSB_LOCATIONS),
            )?;
            ctx.a.jne(miss)?;
            // The head retreats only on a hit.
            ctx.a
                .mov(dword_ptr(gpr64(STATE) + OFF_RSB_PTR), gpr32(SCRATCH1))?;
            ctx.a.mov(
                gpr64(SCRATCH0),
                qword_ptr(gpr64(STATE) + gpr64(SCRATCH1) * 8 + OFF_RSB_CODE_PTRS),
            )?;
            ctx.a.jmp(gpr64(SCRATCH0))?;
            ctx.a.set_label(&mut miss)?;
            ctx.a.jmp(ctx.stubs.exit)?;
        }
        Terminator::FastDispatchHint => {
            if single_step {
                ctx.a.jmp(ctx.stubs.exit)?;
                return Ok(());
            }
            emit_halt_check(ctx)?;
            T::emit_location_hash(&mut ctx.a)?;
            emit_fast_dispatch_lookup(ctx)?;
        }
        Terminator::If {
            cond,
            nzcv,
            then_term,
            else_term,
        } => {
            let src = ctx.ra.use_gpr(&mut ctx.a, *nzcv)?;
            ctx.a.mov(gpr32(SCRATCH0), gpr32(src))?;
            ctx.ra.end_of_inst();
            let mut else_label = ctx.a.create_label();
            jump_if_cond_false_on_eax(&mut ctx.a, *cond, else_label)?;
            emit_terminal(ctx, then_term, single_step)?;
            ctx.a.set_label(&mut else_label)?;
            emit_terminal(ctx, else_term, single_step)?;
        }
        Terminator::CheckBit {
            then_term,
            else_term,
        } => {
            let mut else_label = ctx.a.create_label();
            ctx.a
                .cmp(dword_ptr(gpr64(STATE) + OFF_CHECK_BIT), 0)?;
            ctx.a.je(else_label)?;
            emit_terminal(ctx, then_term, single_step)?;
            ctx.a.set_label(&mut else_label)?;
            emit_terminal(ctx, else_term, single_step)?;
        }
        Terminator::CheckHalt(inner) => {
            emit_halt_check(ctx)?;
            emit_terminal(ctx, inner, single_step)?;
        }
    }
    Ok(())
}

/// `LinkBlock`: write the target location, poll halt, then either chain
/// directly (patched, cycle-gated) or return to the dispatcher.
pub fn emit_link_block<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    loc: T::Loc,
    single_step: bool,
) -> Result<(), EmitError> {
    T::write_location(&mut ctx.a, loc)?;
    if single_step {
        ctx.a.jmp(ctx.stubs.exit)?;
        return Ok(());
    }
    emit_halt_check(ctx)?;
    if ctx.config.enable_cycle_counting {
        ctx.a
            .cmp(qword_ptr(gpr64(STATE) + OFF_CYCLES_REMAINING), 0)?;
        // Taken (cycles remain) once the target is compiled; a no-op
        // branch until then.
        ctx.emit_patch_site(
            PatchKind::Jg,
            loc.unique_hash(),
            PatchFallback::NextInstruction,
        )?;
    } else {
        ctx.emit_patch_site(
            PatchKind::Jmp,
            loc.unique_hash(),
            PatchFallback::NextInstruction,
        )?;
    }
    ctx.a.jmp(ctx.stubs.exit)?;
    Ok(())
}

fn emit_halt_check<T: TargetArch>(ctx: &mut EmitContext<'_, T>) -> Result<(), EmitError> {
    ctx.a
        .cmp(dword_ptr(gpr64(STATE) + OFF_HALT_REASON), 0)?;
    ctx.a.jne(ctx.stubs.exit)?;
    Ok(())
}

/// Index the direct-mapped fast-dispatch table with the hash in RAX; jump
/// through a matching entry, return to the dispatcher otherwise.
fn emit_fast_dispatch_lookup<T: TargetArch>(ctx: &mut EmitContext<'_, T>) -> Result<(), EmitError> {
    let a = &mut ctx.a;
    let mut miss = a.create_label();
    a.mov(gpr64(SCRATCH1), gpr64(SCRATCH0))?;
    a.and(gpr64(SCRATCH1), FAST_DISPATCH_MASK as i32)?;
    a.shl(gpr64(SCRATCH1), 4)?;
    a.add(
        gpr64(SCRATCH1),
        qword_ptr(gpr64(STATE) + OFF_FAST_DISPATCH_BASE),
    )?;
    a.cmp(gpr64(SCRATCH0), qword_ptr(gpr64(SCRATCH1)))?;
    a.jne(miss)?;
    a.jmp(qword_ptr(gpr64(SCRATCH1) + 8))?;
    a.set_label(&mut miss)?;
    a.jmp(ctx.stubs.exit)?;
    Ok(())
}

/// Branch to `target` when `cond`, evaluated over the ARM-layout NZCV in
/// EAX, does **not** hold. Clobbers the scratch pair.
pub fn jump_if_cond_false_on_eax(
    a: &mut CodeAssembler,
    cond: Cond,
    target: CodeLabel,
) -> Result<(), EmitError> {
    const N: i32 = 1 << 31;
    const Z: i32 = 1 << 30;
    const C: i32 = 1 << 29;
    const V: i32 = 1 << 28;
    match cond {
        Cond::Eq => {
            a.test(gpr32(SCRATCH0), Z)?;
            a.je(target)?;
        }
        Cond::Ne => {
            a.test(gpr32(SCRATCH0), Z)?;
            a.jne(target)?;
        }
        Cond::Cs => {
            a.test(gpr32(SCRATCH0), C)?;
            a.je(target)?;
        }
        Cond::Cc => {
            a.test(gpr32(SCRATCH0), C)?;
            a.jne(target)?;
        }
        Cond::Mi => {
            a.test(gpr32(SCRATCH0), N)?;
            a.je(target)?;
        }
        Cond::Pl => {
            a.test(gpr32(SCRATCH0), N)?;
            a.jne(target)?;
        }
        Cond::Vs => {
            a.test(gpr32(SCRATCH0), V)?;
            a.je(target)?;
        }
        Cond::Vc => {
            a.test(gpr32(SCRATCH0), V)?;
            a.jne(target)?;
        }
        Cond::Hi | Cond::Ls => {
            a.mov(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
            a.and(gpr32(SCRATCH1), C | Z)?;
            a.cmp(gpr32(SCRATCH1), C)?;
            if cond == Cond::Hi {
                a.jne(target)?;
            } else {
                a.je(target)?;
            }
        }
        Cond::Ge | Cond::Lt => {
            a.mov(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
            a.shr(gpr32(SCRATCH1), 3)?;
            a.xor(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
            a.test(gpr32(SCRATCH1), V)?;
            if cond == Cond::Ge {
                a.jne(target)?;
            } else {
                a.je(target)?;
            }
        }
        Cond::Gt | Cond::Le => {
            a.mov(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
            a.shr(gpr32(SCRATCH1), 3)?;
            a.xor(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
            a.and(gpr32(SCRATCH1), V)?;
            a.and(gpr32(SCRATCH0), Z)?;
            a.or(gpr32(SCRATCH1), gpr32(SCRATCH0))?;
            if cond == Cond::Gt {
                a.jne(target)?;
            } else {
                a.je(target)?;
            }
        }
        Cond::Al | Cond::Nv => {}
    }
    Ok(())
}
