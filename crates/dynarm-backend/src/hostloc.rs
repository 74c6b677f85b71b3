//! The abstract host register file: x86-64 integer and vector
//! registers by hardware encoding, the fixed reservations, and the
//! allocation preference order.
//!
//! Reservations: RSP is the host stack, R15 is the guest-state pointer,
//! R14 is the memory base (page table or fastmem window), and RAX/RCX are
//! the two always-available scratch registers — usable by any emitter
//! sequence without asking the allocator, never holding a value across an
//! IR instruction.

use iced_x86::code_asm::{
    al, ax, bl, bp, bpl, bx, cl, cx, di, dil, dl, dx, eax, ebp, ebx, ecx, edi, edx, esi, r10,
    r10b, r10d, r10w, r11, r11b, r11d, r11w, r12, r12b, r12d, r12w, r13, r13b, r13d, r13w, r14,
    r14b, r14d, r14w, r15, r15b, r15d, r15w, r8, r8b, r8d, r8w, r9, r9b, r9d, r9w, rax, rbp, rbx,
    rcx, rdi, rdx, rsi, rsp, si, sil, sp, spl, xmm0, xmm1, xmm10, xmm11, xmm12, xmm13, xmm14,
    xmm15, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, AsmRegister16, AsmRegister32,
    AsmRegister64, AsmRegister8, AsmRegisterXmm,
};

pub const RAX: u8 = 0;
pub const RCX: u8 = 1;
pub const RDX: u8 = 2;
pub const RBX: u8 = 3;
pub const RSP: u8 = 4;
pub const RBP: u8 = 5;
pub const RSI: u8 = 6;
pub const RDI: u8 = 7;
pub const R8: u8 = 8;
pub const R9: u8 = 9;
pub const R10: u8 = 10;
pub const R11: u8 = 11;
pub const R12: u8 = 12;
pub const R13: u8 = 13;
pub const R14: u8 = 14;
pub const R15: u8 = 15;

/// The state-pointer reservation.
pub const STATE: u8 = R15;
/// The page-table / fastmem base reservation.
pub const MEM_BASE: u8 = R14;
/// Scratch registers usable by any emitter sequence without reservation.
pub const SCRATCH0: u8 = RAX;
pub const SCRATCH1: u8 = RCX;

/// GPR allocation order: caller-saved first so short-lived values die
/// without a callee-save cost, callee-saved last.
pub const GPR_ALLOCATION_ORDER: [u8; 11] = [RDX, RSI, RDI, R8, R9, R10, R11, RBX, RBP, R12, R13];

/// XMM allocation order; XMM0/XMM1 are the vector scratch pair.
pub const XMM_ALLOCATION_ORDER: [u8; 14] = [2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

pub const XMM_SCRATCH0: u8 = 0;
pub const XMM_SCRATCH1: u8 = 1;

/// System V caller-saved GPRs (the set host calls clobber).
pub const CALLER_SAVED_GPRS: [u8; 9] = [RAX, RCX, RDX, RSI, RDI, R8, R9, R10, R11];

pub const fn is_caller_saved_gpr(index: u8) -> bool {
    matches!(index, RAX | RCX | RDX | RSI | RDI | R8 | R9 | R10 | R11)
}

/// Where a live IR value currently resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostLoc {
    Gpr(u8),
    Xmm(u8),
    Spill(u8),
}

pub fn gpr64(index: u8) -> AsmRegister64 {
    match index {
        0 => rax,
        1 => rcx,
        2 => rdx,
        3 => rbx,
        4 => rsp,
        5 => rbp,
        6 => rsi,
        7 => rdi,
        8 => r8,
        9 => r9,
        10 => r10,
        11 => r11,
        12 => r12,
        13 => r13,
        14 => r14,
        _ => r15,
    }
}

pub fn gpr32(index: u8) -> AsmRegister32 {
    match index {
        0 => eax,
        1 => ecx,
        2 => edx,
        3 => ebx,
        4 => iced_x86::code_asm::esp,
        5 => ebp,
        6 => esi,
        7 => edi,
        8 => r8d,
        9 => r9d,
        10 => r10d,
        11 => r11d,
        12 => r12d,
        13 => r13d,
        14 => r14d,
        _ => r15d,
    }
}

pub fn gpr16(index: u8) -> AsmRegister16 {
    match index {
        0 => ax,
        1 => cx,
        2 => dx,
        3 => bx,
        4 => sp,
        5 => bp,
        6 => si,
        7 => di,
        8 => r8w,
        9 => r9w,
        10 => r10w,
        11 => r11w,
        12 => r12w,
        13 => r13w,
        14 => r14w,
        _ => r15w,
    }
}

pub fn gpr8(index: u8) -> AsmRegister8 {
    match index {
        0 => al,
        1 => cl,
        2 => dl,
        3 => bl,
        4 => spl,
        5 => bpl,
        6 => sil,
        7 => dil,
        8 => r8b,
        9 => r9b,
        10 => r10b,
        11 => r11b,
        12 => r12b,
        13 => r13b,
        14 => r14b,
        _ => r15b,
    }
}

pub fn xmm(index: u8) -> AsmRegisterXmm {
    match index {
        0 => xmm0,
        1 => xmm1,
        2 => xmm2,
        3 => xmm3,
        4 => xmm4,
        5 => xmm5,
        6 => xmm6,
        7 => xmm7,
        8 => xmm8,
        9 => xmm9,
        10 => xmm10,
        11 => xmm11,
        12 => xmm12,
        13 => xmm13,
        14 => xmm14,
        _ => xmm15,
    }
}
