//! Vector lowering: every opcode in the current catalog
//! has a direct SSE2 equivalent, so this is straight per-lane lowering
//! with no library calls.

use dynarm_ir::{InstId, Opcode};

use crate::{
    emit::{EmitContext, TargetArch},
    hostloc::xmm,
    EmitError,
};

pub fn emit<T: TargetArch>(ctx: &mut EmitContext<'_, T>, id: InstId) -> Result<(), EmitError> {
    let inst = ctx.block.inst(id);
    let opcode = inst.opcode;
    let args = inst.args.clone();
    let dst = ctx.ra.use_scratch_xmm(&mut ctx.a, ctx.pool, args[0])?;
    let rhs = ctx.ra.use_xmm(&mut ctx.a, ctx.pool, args[1])?;
    match opcode {
        Opcode::VectorAdd8 => ctx.a.paddb(xmm(dst), xmm(rhs))?,
        Opcode::VectorAdd16 => ctx.a.paddw(xmm(dst), xmm(rhs))?,
        Opcode::VectorAdd32 => ctx.a.paddd(xmm(dst), xmm(rhs))?,
        Opcode::VectorAdd64 => ctx.a.paddq(xmm(dst), xmm(rhs))?,
        Opcode::VectorAnd => ctx.a.pand(xmm(dst), xmm(rhs))?,
        Opcode::VectorOr => ctx.a.por(xmm(dst), xmm(rhs))?,
        Opcode::VectorEor => ctx.a.pxor(xmm(dst), xmm(rhs))?,
        other => unreachable!("{other:?} is not a vector opcode"),
    }
    ctx.ra.define_xmm(id, dst);
    Ok(())
}
