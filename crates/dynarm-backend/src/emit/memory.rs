//! Memory lowering: every plain load/store is
//! compiled as either an inline page-table walk, a direct fastmem-window
//! access recovered through the signal handler, or a straight callback
//! call, per the configuration. The inline forms branch to a deferred
//! fallback region (emitted after the block body) that replays the access
//! through the per-size callback thunks and rejoins the mainline.
//! Exclusive accesses always go through the monitor callbacks.

use dynarm_ir::{InstId, Opcode, Value};
use iced_x86::code_asm::{byte_ptr, dword_ptr, qword_ptr, word_ptr, AsmMemoryOperand};

use crate::{
    abi::size_index,
    emit::{
        Deferred, EmitContext, FastmemMode, PageTableConfig, PendingFastmem, TargetArch,
    },
    hostloc::{gpr16, gpr32, gpr64, gpr8, MEM_BASE, SCRATCH0, SCRATCH1},
    regalloc::CallArg,
    EmitError,
};

fn access_bits(opcode: Opcode) -> u32 {
    use Opcode::*;
    match opcode {
        ReadMemory8 | WriteMemory8 | ExclusiveReadMemory8 | ExclusiveWriteMemory8 => 8,
        ReadMemory16 | WriteMemory16 | ExclusiveReadMemory16 | ExclusiveWriteMemory16 => 16,
        ReadMemory32 | WriteMemory32 | ExclusiveReadMemory32 | ExclusiveWriteMemory32 => 32,
        _ => 64,
    }
}

pub fn emit<T: TargetArch>(ctx: &mut EmitContext<'_, T>, id: InstId) -> Result<(), EmitError> {
    let block = ctx.block;
    let inst = block.inst(id);
    let opcode = inst.opcode;
    let args = inst.args.clone();
    let cb = *ctx.callbacks;
    use Opcode::*;
    match opcode {
        ReadMemory8 | ReadMemory16 | ReadMemory32 | ReadMemory64 => {
            let bits = access_bits(opcode);
            match ctx.config.fastmem {
                FastmemMode::PageTable(pt) => emit_inline_load(ctx, id, args[0], bits, Some(pt)),
                FastmemMode::SignalHandler => emit_inline_load(ctx, id, args[0], bits, None),
                FastmemMode::None => {
                    ctx.ra.host_call(
                        &mut ctx.a,
                        cb.memory_read[size_index(bits)],
                        &[CallArg::Imm64(cb.ctx as u64), CallArg::Value(args[0])],
                    )?;
                    ctx.ra.take_call_result(&mut ctx.a, id)?;
                    Ok(())
                }
            }
        }
        WriteMemory8 | WriteMemory16 | WriteMemory32 | WriteMemory64 => {
            let bits = access_bits(opcode);
            match ctx.config.fastmem {
                FastmemMode::PageTable(pt) => {
                    emit_inline_store(ctx, args[0], args[1], bits, Some(pt))
                }
                FastmemMode::SignalHandler => emit_inline_store(ctx, args[0], args[1], bits, None),
                FastmemMode::None => {
                    ctx.ra.host_call(
                        &mut ctx.a,
                        cb.memory_write[size_index(bits)],
                        &[
                            CallArg::Imm64(cb.ctx as u64),
                            CallArg::Value(args[0]),
                            CallArg::Value(args[1]),
                        ],
                    )?;
                    Ok(())
                }
            }
        }
        ExclusiveReadMemory8 | ExclusiveReadMemory16 | ExclusiveReadMemory32
        | ExclusiveReadMemory64 => {
            let bits = access_bits(opcode);
            ctx.ra.host_call(
                &mut ctx.a,
                cb.exclusive_read[size_index(bits)],
                &[CallArg::Imm64(cb.ctx as u64), CallArg::Value(args[0])],
            )?;
            ctx.ra.take_call_result(&mut ctx.a, id)?;
            Ok(())
        }
        ExclusiveWriteMemory8 | ExclusiveWriteMemory16 | ExclusiveWriteMemory32
        | ExclusiveWriteMemory64 => {
            let bits = access_bits(opcode);
            ctx.ra.host_call(
                &mut ctx.a,
                cb.exclusive_write[size_index(bits)],
                &[
                    CallArg::Imm64(cb.ctx as u64),
                    CallArg::Value(args[0]),
                    CallArg::Value(args[1]),
                ],
            )?;
            ctx.ra.take_call_result(&mut ctx.a, id)?;
            Ok(())
        }
        ClearExclusive => {
            ctx.ra.host_call(
                &mut ctx.a,
                cb.clear_exclusive,
                &[CallArg::Imm64(cb.ctx as u64)],
            )?;
            Ok(())
        }
        ZeroMemoryBlock => {
            ctx.ra.host_call(
                &mut ctx.a,
                cb.zero_memory_block,
                &[
                    CallArg::Imm64(cb.ctx as u64),
                    CallArg::Value(args[0]),
                    CallArg::Value(args[1]),
                ],
            )?;
            Ok(())
        }
        other => unreachable!("{other:?} is not a memory opcode"),
    }
}

/// The inline page-table walk: translate the page, fall back to the
/// callback thunk on a missing entry, a straddling access, or a policed
/// misalignment. Leaves the resolved host operand built over RAX (page
/// base) and RCX (page offset, local-offset mode only).
fn emit_page_walk<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    addr: u8,
    bits: u32,
    pt: PageTableConfig,
    fallback: iced_x86::code_asm::CodeLabel,
) -> Result<AsmMemoryOperand, EmitError> {
    let bytes = (bits / 8) as i32;
    if bits >= 16 {
        let policed = pt.detect_misaligned_mask & (1 << size_index(bits)) != 0;
        if policed && !pt.only_detect_on_page_boundary {
            ctx.a.test(gpr64(addr), bytes - 1)?;
            ctx.a.jne(fallback)?;
        } else {
            // Straddling a page boundary falls back; bit 12 of
            // `addr ^ (addr + bytes - 1)` flips exactly then.
            ctx.a.lea(gpr64(SCRATCH0), qword_ptr(gpr64(addr) + (bytes - 1)))?;
            ctx.a.xor(gpr64(SCRATCH0), gpr64(addr))?;
            ctx.a.test(gpr32(SCRATCH0), 0x1000)?;
            ctx.a.jne(fallback)?;
        }
    }
    ctx.a.mov(gpr64(SCRATCH0), gpr64(addr))?;
    ctx.a.shr(gpr64(SCRATCH0), 12)?;
    let page_count = 1u64 << (pt.address_space_bits - 12);
    if pt.silently_mirror {
        if page_count - 1 <= i32::MAX as u64 {
            ctx.a.and(gpr64(SCRATCH0), (page_count - 1) as i32)?;
        } else {
            ctx.a.mov(gpr64(SCRATCH1), page_count - 1)?;
            ctx.a.and(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
        }
    } else {
        if page_count <= i32::MAX as u64 {
            ctx.a.cmp(gpr64(SCRATCH0), page_count as i32)?;
        } else {
            ctx.a.mov(gpr64(SCRATCH1), page_count)?;
            ctx.a.cmp(gpr64(SCRATCH0), gpr64(SCRATCH1))?;
        }
        ctx.a.jae(fallback)?;
    }
    ctx.a.mov(
        gpr64(SCRATCH0),
        qword_ptr(gpr64(MEM_BASE) + gpr64(SCRATCH0) * 8),
    )?;
    ctx.a.test(gpr64(SCRATCH0), gpr64(SCRATCH0))?;
    ctx.a.je(fallback)?;
    if pt.absolute_offset {
        // Stored bases are pre-biased by the page address.
        Ok(gpr64(SCRATCH0) + gpr64(addr))
    } else {
        ctx.a.mov(gpr32(SCRATCH1), gpr32(addr))?;
        ctx.a.and(gpr32(SCRATCH1), 0xFFF)?;
        Ok(gpr64(SCRATCH0) + gpr64(SCRATCH1))
    }
}

fn emit_inline_load<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    id: InstId,
    vaddr: Value,
    bits: u32,
    pt: Option<PageTableConfig>,
) -> Result<(), EmitError> {
    let addr = ctx.ra.use_gpr(&mut ctx.a, vaddr)?;
    let dst = ctx.ra.scratch_gpr(&mut ctx.a)?;
    let fallback = ctx.a.create_label();
    let mut resume = ctx.a.create_label();
    let operand = match pt {
        Some(pt) => emit_page_walk(ctx, addr, bits, pt, fallback)?,
        // Signal-handler fastmem: direct dereference off the 4 GiB
        // window; the faulting instruction's address is registered so the
        // handler can redirect into the fallback.
        None => gpr64(MEM_BASE) + gpr64(addr),
    };
    let mut fault = ctx.a.create_label();
    if pt.is_none() {
        ctx.a.set_label(&mut fault)?;
    }
    match bits {
        8 => ctx.a.movzx(gpr32(dst), byte_ptr(operand))?,
        16 => ctx.a.movzx(gpr32(dst), word_ptr(operand))?,
        32 => ctx.a.mov(gpr32(dst), dword_ptr(operand))?,
        _ => ctx.a.mov(gpr64(dst), qword_ptr(operand))?,
    }
    ctx.a.set_label(&mut resume)?;
    // Anchor the resume label even when nothing follows in the mainline.
    ctx.a.nop()?;
    if pt.is_none() {
        ctx.fastmem.push(PendingFastmem {
            fault,
            fallback,
        });
    }
    ctx.deferred.push(Deferred::Load {
        entry: fallback,
        resume,
        addr_reg: addr,
        dst_reg: dst,
        bits,
    });
    ctx.ra.define_gpr(id, dst);
    Ok(())
}

fn emit_inline_store<T: TargetArch>(
    ctx: &mut EmitContext<'_, T>,
    vaddr: Value,
    value: Value,
    bits: u32,
    pt: Option<PageTableConfig>,
) -> Result<(), EmitError> {
    let addr = ctx.ra.use_gpr(&mut ctx.a, vaddr)?;
    let src = ctx.ra.use_gpr(&mut ctx.a, value)?;
    let fallback = ctx.a.create_label();
    let mut resume = ctx.a.create_label();
    let operand = match pt {
        Some(pt) => emit_page_walk(ctx, addr, bits, pt, fallback)?,
        None => gpr64(MEM_BASE) + gpr64(addr),
    };
    let mut fault = ctx.a.create_label();
    if pt.is_none() {
        ctx.a.set_label(&mut fault)?;
    }
    match bits {
        8 => ctx.a.mov(byte_ptr(operand), gpr8(src))?,
        16 => ctx.a.mov(word_ptr(operand), gpr16(src))?,
        32 => ctx.a.mov(dword_ptr(operand), gpr32(src))?,
        _ => ctx.a.mov(qword_ptr(operand), gpr64(src))?,
    }
    ctx.a.set_label(&mut resume)?;
    ctx.a.nop()?;
    if pt.is_none() {
        ctx.fastmem.push(PendingFastmem {
            fault,
            fallback,
        });
    }
    ctx.deferred.push(Deferred::Store {
        entry: fallback,
        resume,
        addr_reg: addr,
        value_reg: src,
        bits,
    });
    Ok(())
}

/// The deferred emission region: per fastmem access, a fallback
/// sequence that replays the access through the callback thunk and
/// rejoins the mainline.
pub fn emit_deferred<T: TargetArch>(ctx: &mut EmitContext<'_, T>) -> Result<(), EmitError> {
    for deferred in std::mem::take(&mut ctx.deferred) {
        match deferred {
            Deferred::Load {
                mut entry,
                resume,
                addr_reg,
                dst_reg,
                bits,
            } => {
                ctx.a.set_label(&mut entry)?;
                ctx.a.mov(gpr64(SCRATCH0), gpr64(addr_reg))?;
                ctx.a.call(ctx.stubs.read[size_index(bits)])?;
                ctx.a.mov(gpr64(dst_reg), gpr64(SCRATCH0))?;
                ctx.a.jmp(resume)?;
            }
            Deferred::Store {
                mut entry,
                resume,
                addr_reg,
                value_reg,
                bits,
            } => {
                ctx.a.set_label(&mut entry)?;
                ctx.a.mov(gpr64(SCRATCH0), gpr64(addr_reg))?;
                ctx.a.mov(gpr64(SCRATCH1), gpr64(value_reg))?;
                ctx.a.call(ctx.stubs.write[size_index(bits)])?;
                ctx.a.jmp(resume)?;
            }
        }
    }
    Ok(())
}
