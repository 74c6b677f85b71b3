//! The fixed-layout guest state struct emitted code addresses through the
//! reserved state-pointer register, plus the C-ABI callback table emitted
//! call sites go through. Every offset in this file is baked into machine
//! code, so the struct is `repr(C)` and the offsets are computed by the
//! compiler rather than by hand; `tests/abi.rs` cross-checks them against
//! `memoffset` the way the rest of the workspace checks its own state
//! structs.

use std::mem::offset_of;
use std::sync::atomic::AtomicU32;

/// Spill slots are 16 bytes wide so one slot holds either a GPR or a
/// vector register.
pub const SPILL_COUNT: usize = 64;

/// Return-stack-buffer ring size; must be a power of two.
pub const RSB_SIZE: usize = 8;
pub const RSB_PTR_MASK: u32 = RSB_SIZE as u32 - 1;

/// Direct-mapped fast-dispatch table entries; must be a power of two.
pub const FAST_DISPATCH_TABLE_SIZE: usize = 1024;
pub const FAST_DISPATCH_MASK: u64 = FAST_DISPATCH_TABLE_SIZE as u64 - 1;

/// An unoccupied fast-dispatch or RSB location slot. No valid location
/// descriptor hashes to this value (it would need a single-step block in
/// the hint tables, which the emitter never produces).
pub const EMPTY_LOCATION: u64 = u64::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FastDispatchEntry {
    pub location: u64,
    pub code_ptr: u64,
}

impl FastDispatchEntry {
    pub const fn empty() -> Self {
        FastDispatchEntry {
            location: EMPTY_LOCATION,
            code_ptr: 0,
        }
    }
}

/// Guest-visible and dispatcher-internal CPU state, shared between the two
/// architectures: A32 uses the low 16 `regs` slots (PC in slot 15) and the
/// `vec` array as its extension register file; A64 uses all 31 plus `sp`
/// and `pc`.
#[repr(C, align(16))]
pub struct GuestState {
    pub regs: [u64; 32],
    pub sp: u64,
    pub pc: u64,
    /// Guest NZCV in ARM layout: N=31, Z=30, C=29, V=28, other bits zero.
    pub cpsr_nzcv: u32,
    /// A32 CPSR bits outside NZCV (mode, T, E, IT, ...).
    pub cpsr_other: u32,
    /// A32 packed location mode word; must match
    /// `A32LocationDescriptor::packed_bits` at every dispatcher entry.
    pub location_packed: u32,
    pub check_bit: u32,
    pub fpcr: u32,
    pub fpsr: u32,
    /// The FPCR bits that participate in block identity, pre-masked;
    /// hashed by the A64 fast-dispatch and RSB epilogues.
    pub fpcr_codegen: u32,
    /// MXCSR image loaded while guest code runs: rounding mode and
    /// FTZ/DAZ derived from FPCR.
    pub guest_mxcsr: u32,
    pub save_host_mxcsr: u32,
    pub _pad0: u32,
    pub cycles_to_run: i64,
    pub cycles_remaining: i64,
    /// `HaltReason` bits; written lock-free from any thread, polled by
    /// emitted code at halt-checking terminators.
    pub halt_reason: AtomicU32,
    pub _pad1: u32,
    /// Page-table base or fastmem window base, loaded into the reserved
    /// memory-base register by the enter thunk.
    pub mem_base: u64,
    /// Pointer to the dispatcher's `FastDispatchEntry` table.
    pub fast_dispatch_base: u64,
    pub rsb_ptr: u32,
    pub _pad2: u32,
    pub rsb_locations: [u64; RSB_SIZE],
    pub rsb_code_ptrs: [u64; RSB_SIZE],
    pub vec: [u128; 32],
    pub spill: [u128; SPILL_COUNT],
    /// Volatile-register save area used by the memory-callback thunks.
    pub host_save_gpr: [u64; 16],
    pub host_save_xmm: [u128; 16],
}

impl GuestState {
    pub fn new() -> Box<GuestState> {
        let mut state = Box::new(GuestState {
            regs: [0; 32],
            sp: 0,
            pc: 0,
            cpsr_nzcv: 0,
            cpsr_other: 0,
            location_packed: 0,
            check_bit: 0,
            fpcr: 0,
            fpsr: 0,
            fpcr_codegen: 0,
            guest_mxcsr: 0x1F80,
            save_host_mxcsr: 0,
            _pad0: 0,
            cycles_to_run: 0,
            cycles_remaining: 0,
            halt_reason: AtomicU32::new(0),
            _pad1: 0,
            mem_base: 0,
            fast_dispatch_base: 0,
            rsb_ptr: 0,
            _pad2: 0,
            rsb_locations: [EMPTY_LOCATION; RSB_SIZE],
            rsb_code_ptrs: [0; RSB_SIZE],
            vec: [0; 32],
            spill: [0; SPILL_COUNT],
            host_save_gpr: [0; 16],
            host_save_xmm: [0; 16],
        });
        state.reset_rsb();
        state
    }

    pub fn reset_rsb(&mut self) {
        self.rsb_ptr = 0;
        self.rsb_locations = [EMPTY_LOCATION; RSB_SIZE];
        self.rsb_code_ptrs = [0; RSB_SIZE];
    }
}

// Offsets baked into emitted code; `i32` because that is what memory
// operand displacements are.
pub const OFF_REGS: i32 = offset_of!(GuestState, regs) as i32;
pub const OFF_SP: i32 = offset_of!(GuestState, sp) as i32;
pub const OFF_PC: i32 = offset_of!(GuestState, pc) as i32;
pub const OFF_CPSR_NZCV: i32 = offset_of!(GuestState, cpsr_nzcv) as i32;
pub const OFF_CPSR_OTHER: i32 = offset_of!(GuestState, cpsr_other) as i32;
pub const OFF_LOCATION_PACKED: i32 = offset_of!(GuestState, location_packed) as i32;
pub const OFF_CHECK_BIT: i32 = offset_of!(GuestState, check_bit) as i32;
pub const OFF_FPCR_CODEGEN: i32 = offset_of!(GuestState, fpcr_codegen) as i32;
pub const OFF_GUEST_MXCSR: i32 = offset_of!(GuestState, guest_mxcsr) as i32;
pub const OFF_SAVE_HOST_MXCSR: i32 = offset_of!(GuestState, save_host_mxcsr) as i32;
pub const OFF_CYCLES_REMAINING: i32 = offset_of!(GuestState, cycles_remaining) as i32;
pub const OFF_HALT_REASON: i32 = offset_of!(GuestState, halt_reason) as i32;
pub const OFF_MEM_BASE: i32 = offset_of!(GuestState, mem_base) as i32;
pub const OFF_FAST_DISPATCH_BASE: i32 = offset_of!(GuestState, fast_dispatch_base) as i32;
pub const OFF_RSB_PTR: i32 = offset_of!(GuestState, rsb_ptr) as i32;
pub const OFF_RSB_LOCATIONS: i32 = offset_of!(GuestState, rsb_locations) as i32;
pub const OFF_RSB_CODE_PTRS: i32 = offset_of!(GuestState, rsb_code_ptrs) as i32;
pub const OFF_VEC: i32 = offset_of!(GuestState, vec) as i32;
pub const OFF_SPILL: i32 = offset_of!(GuestState, spill) as i32;
pub const OFF_HOST_SAVE_GPR: i32 = offset_of!(GuestState, host_save_gpr) as i32;
pub const OFF_HOST_SAVE_XMM: i32 = offset_of!(GuestState, host_save_xmm) as i32;

pub const fn off_reg(index: usize) -> i32 {
    OFF_REGS + (index * 8) as i32
}

pub const fn off_vec(index: usize) -> i32 {
    OFF_VEC + (index * 16) as i32
}

pub const fn off_spill(slot: usize) -> i32 {
    OFF_SPILL + (slot * 16) as i32
}

/// The C-ABI callback table emitted call sites dispatch through. Every
/// entry is the address of an `extern "C"` shim taking `ctx` first; the
/// facade owns the shims and the context they close over, the emitter
/// only bakes the addresses in. All addresses must stay valid for the
/// lifetime of the CPU instance.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeCallbacks {
    pub ctx: usize,
    /// `fn(ctx, vaddr) -> value`, one per access size.
    pub memory_read: [usize; 4],
    /// `fn(ctx, vaddr, value)`, one per access size.
    pub memory_write: [usize; 4],
    /// `fn(ctx, vaddr) -> value`; records the exclusive claim.
    pub exclusive_read: [usize; 4],
    /// `fn(ctx, vaddr, value) -> u32`; 0 on committed store, 1 on failure.
    pub exclusive_write: [usize; 4],
    /// `fn(ctx)`
    pub clear_exclusive: usize,
    /// `fn(ctx, vaddr, byte_count)`
    pub zero_memory_block: usize,
    /// `fn(ctx, swi)`
    pub call_svc: usize,
    /// `fn(ctx, pc, kind)`
    pub exception_raised: usize,
    /// `fn(ctx, op, vaddr)`
    pub data_cache_operation: usize,
    /// `fn(ctx, op, vaddr)`
    pub instruction_cache_operation: usize,
    /// `fn(ctx) -> u64`
    pub get_cntpct: usize,
    /// `fn(ctx, packed_coproc_descriptor) -> u32`
    pub coproc_get_one_word: usize,
    /// `fn(ctx, packed_coproc_descriptor, value)`
    pub coproc_set_one_word: usize,
    /// `fn(ctx, pc, num_instructions)`
    pub interpreter_fallback: usize,
}

/// Index into the per-size callback arrays for an 8/16/32/64-bit access.
pub const fn size_index(bits: u32) -> usize {
    match bits {
        8 => 0,
        16 => 1,
        32 => 2,
        _ => 3,
    }
}
