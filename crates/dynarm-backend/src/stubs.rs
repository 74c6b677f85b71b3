//! The fixed stubs emitted once at the start of the code region: the
//! dispatcher entry thunk, the return-to-dispatcher stub, and the
//! memory-callback thunks the fastmem fallback paths call.
//!
//! Register conventions inside emitted code: R15 = guest state pointer,
//! R14 = memory base, RAX/RCX = scratch. The enter thunk establishes them
//! and swaps MXCSR to the guest image; the exit stub undoes it. Thunks use
//! a private convention (RAX = address, RCX = store value, result in RAX)
//! so fallback call sites stay two instructions long.

use iced_x86::code_asm::{dword_ptr, qword_ptr, xmmword_ptr, CodeAssembler};

use crate::{
    abi::{
        RuntimeCallbacks, OFF_GUEST_MXCSR, OFF_HOST_SAVE_GPR, OFF_HOST_SAVE_XMM, OFF_MEM_BASE,
        OFF_SAVE_HOST_MXCSR,
    },
    hostloc::{gpr64, xmm, RAX, RCX, RDI, RSI, STATE},
    EmitError,
};

/// Absolute addresses of the emitted stubs, fixed for the lifetime of the
/// code region.
#[derive(Debug, Clone, Copy)]
pub struct StubAddrs {
    /// `extern "C" fn(state: *mut GuestState, entry: *const u8)`
    pub enter: u64,
    /// Return-to-dispatcher target for terminator epilogues.
    pub exit: u64,
    /// Per-size memory read thunks (8/16/32/64).
    pub read: [u64; 4],
    /// Per-size memory write thunks.
    pub write: [u64; 4],
}

/// Stub machine code plus the offsets of each entry point within it.
pub struct StubBlob {
    pub bytes: Vec<u8>,
    pub enter: usize,
    pub exit: usize,
    pub read: [usize; 4],
    pub write: [usize; 4],
}

impl StubBlob {
    pub fn addrs(&self, base: u64) -> StubAddrs {
        StubAddrs {
            enter: base + self.enter as u64,
            exit: base + self.exit as u64,
            read: self.read.map(|o| base + o as u64),
            write: self.write.map(|o| base + o as u64),
        }
    }
}

/// The GPRs a thunk must preserve around the callback: every caller-saved
/// register except the RAX/RCX argument pair, which the call site owns.
const THUNK_SAVED_GPRS: [u8; 7] = [2, 6, 7, 8, 9, 10, 11];

pub fn emit_stubs(base_rip: u64, callbacks: &RuntimeCallbacks) -> Result<StubBlob, EmitError> {
    let mut a = CodeAssembler::new(64)?;

    let mut enter_label = a.create_label();
    let mut exit_label = a.create_label();
    let mut read_labels = [a.create_label(), a.create_label(), a.create_label(), a.create_label()];
    let mut write_labels = [a.create_label(), a.create_label(), a.create_label(), a.create_label()];

    // enter(state=rdi, entry=rsi): establish reservations, swap to the
    // guest FP environment, and jump into the block. The callee-saved
    // pushes plus the 8-byte adjustment leave RSP 16-byte aligned for
    // every call site inside emitted code.
    a.set_label(&mut enter_label)?;
    a.push(gpr64(3))?; // rbx
    a.push(gpr64(5))?; // rbp
    a.push(gpr64(12))?;
    a.push(gpr64(13))?;
    a.push(gpr64(14))?;
    a.push(gpr64(15))?;
    a.sub(gpr64(4), 8)?;
    a.mov(gpr64(STATE), gpr64(RDI))?;
    a.mov(gpr64(14), qword_ptr(gpr64(STATE) + OFF_MEM_BASE))?;
    a.stmxcsr(dword_ptr(gpr64(STATE) + OFF_SAVE_HOST_MXCSR))?;
    a.ldmxcsr(dword_ptr(gpr64(STATE) + OFF_GUEST_MXCSR))?;
    a.jmp(gpr64(RSI))?;

    // exit: the single reentry point back into the dispatcher.
    a.set_label(&mut exit_label)?;
    a.ldmxcsr(dword_ptr(gpr64(STATE) + OFF_SAVE_HOST_MXCSR))?;
    a.add(gpr64(4), 8)?;
    a.pop(gpr64(15))?;
    a.pop(gpr64(14))?;
    a.pop(gpr64(13))?;
    a.pop(gpr64(12))?;
    a.pop(gpr64(5))?;
    a.pop(gpr64(3))?;
    a.ret()?;

    for (i, bits) in [8u32, 16, 32, 64].into_iter().enumerate() {
        a.set_label(&mut read_labels[i])?;
        emit_callback_thunk(&mut a, callbacks, callbacks.memory_read[i], bits, false)?;
    }
    for (i, bits) in [8u32, 16, 32, 64].into_iter().enumerate() {
        a.set_label(&mut write_labels[i])?;
        emit_callback_thunk(&mut a, callbacks, callbacks.memory_write[i], bits, true)?;
    }

    let result = a.assemble_options(
        base_rip,
        iced_x86::BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS,
    )?;
    let off = |label: &iced_x86::code_asm::CodeLabel| -> usize {
        (result.label_ip(label).expect("stub labels are all set") - base_rip) as usize
    };
    Ok(StubBlob {
        enter: off(&enter_label),
        exit: off(&exit_label),
        read: [
            off(&read_labels[0]),
            off(&read_labels[1]),
            off(&read_labels[2]),
            off(&read_labels[3]),
        ],
        write: [
            off(&write_labels[0]),
            off(&write_labels[1]),
            off(&write_labels[2]),
            off(&write_labels[3]),
        ],
    bytes: result.inner.code_buffer,
    })
}

/// One memory-callback thunk: preserves every volatile register the call
/// site has not claimed, marshals `(ctx, vaddr[, value])`, and calls the
/// embedder. Entered by `call`, so RSP is 8 past alignment on entry.
fn emit_callback_thunk(
    a: &mut CodeAssembler,
    callbacks: &RuntimeCallbacks,
    fn_addr: usize,
    bits: u32,
    is_write: bool,
) -> Result<(), EmitError> {
    for (slot, reg) in THUNK_SAVED_GPRS.into_iter().enumerate() {
        a.mov(
            qword_ptr(gpr64(STATE) + (OFF_HOST_SAVE_GPR + slot as i32 * 8)),
            gpr64(reg),
        )?;
    }
    for i in 0..16u8 {
        a.movups(
            xmmword_ptr(gpr64(STATE) + (OFF_HOST_SAVE_XMM + i as i32 * 16)),
            xmm(i),
        )?;
    }
    a.sub(gpr64(4), 8)?;
    a.mov(gpr64(RDI), callbacks.ctx as u64)?;
    a.mov(gpr64(RSI), gpr64(RAX))?;
    if is_write {
        a.mov(gpr64(2), gpr64(RCX))?; // rdx = value
    }
    a.ldmxcsr(dword_ptr(gpr64(STATE) + OFF_SAVE_HOST_MXCSR))?;
    a.mov(gpr64(RAX), fn_addr as u64)?;
    a.call(gpr64(RAX))?;
    a.ldmxcsr(dword_ptr(gpr64(STATE) + OFF_GUEST_MXCSR))?;
    if !is_write {
        // Narrow returns leave the upper bits of RAX unspecified; restore
        // the zero-extension invariant call sites rely on.
        match bits {
            8 => a.movzx(iced_x86::code_asm::eax, iced_x86::code_asm::al)?,
            16 => a.movzx(iced_x86::code_asm::eax, iced_x86::code_asm::ax)?,
            32 => a.mov(iced_x86::code_asm::eax, iced_x86::code_asm::eax)?,
            _ => {}
        }
    }
    a.add(gpr64(4), 8)?;
    for i in 0..16u8 {
        a.movups(
            xmm(i),
            xmmword_ptr(gpr64(STATE) + (OFF_HOST_SAVE_XMM + i as i32 * 16)),
        )?;
    }
    for (slot, reg) in THUNK_SAVED_GPRS.into_iter().enumerate() {
        a.mov(
            gpr64(reg),
            qword_ptr(gpr64(STATE) + (OFF_HOST_SAVE_GPR + slot as i32 * 8)),
        )?;
    }
    a.ret()?;
    Ok(())
}
