//! The embedding callback tables, one per guest architecture. Every
//! guest-visible effect that cannot be computed in-process goes through
//! one of these: memory traffic, supervisor calls, exceptions, cache
//! maintenance, tick accounting.
//!
//! `memory_read_code` must return the aligned 32-bit code word containing
//! the requested address regardless of guest instruction size; a fetch
//! that cannot be satisfied should return an encoding that traps (an
//! undefined instruction) so translation makes forward progress instead
//! of failing.

use dynarm_types::ExceptionKind;

pub trait A32Callbacks {
    fn memory_read_code(&mut self, vaddr: u32) -> u32;

    fn memory_read_8(&mut self, vaddr: u32) -> u8;
    fn memory_read_16(&mut self, vaddr: u32) -> u16;
    fn memory_read_32(&mut self, vaddr: u32) -> u32;
    fn memory_read_64(&mut self, vaddr: u32) -> u64;

    fn memory_write_8(&mut self, vaddr: u32, value: u8);
    fn memory_write_16(&mut self, vaddr: u32, value: u16);
    fn memory_write_32(&mut self, vaddr: u32, value: u32);
    fn memory_write_64(&mut self, vaddr: u32, value: u64);

    /// Compare-and-swap commit for an exclusive store: write `value` iff
    /// the location still holds `expected`, returning whether it did.
    fn memory_write_exclusive_8(&mut self, vaddr: u32, value: u8, expected: u8) -> bool;
    fn memory_write_exclusive_16(&mut self, vaddr: u32, value: u16, expected: u16) -> bool;
    fn memory_write_exclusive_32(&mut self, vaddr: u32, value: u32, expected: u32) -> bool;
    fn memory_write_exclusive_64(&mut self, vaddr: u32, value: u64, expected: u64) -> bool;

    /// Whether `vaddr` lies in memory that cannot change for the lifetime
    /// of compiled code; gates the constant-memory-reads optimization.
    fn is_read_only_memory(&mut self, _vaddr: u32) -> bool {
        false
    }

    fn call_svc(&mut self, swi: u32);
    fn exception_raised(&mut self, pc: u32, kind: ExceptionKind);
    fn interpreter_fallback(&mut self, pc: u32, num_instructions: usize);

    fn add_ticks(&mut self, ticks: u64);
    fn get_ticks_remaining(&mut self) -> u64;
}

pub trait A64Callbacks {
    fn memory_read_code(&mut self, vaddr: u64) -> u32;

    fn memory_read_8(&mut self, vaddr: u64) -> u8;
    fn memory_read_16(&mut self, vaddr: u64) -> u16;
    fn memory_read_32(&mut self, vaddr: u64) -> u32;
    fn memory_read_64(&mut self, vaddr: u64) -> u64;

    fn memory_write_8(&mut self, vaddr: u64, value: u8);
    fn memory_write_16(&mut self, vaddr: u64, value: u16);
    fn memory_write_32(&mut self, vaddr: u64, value: u32);
    fn memory_write_64(&mut self, vaddr: u64, value: u64);

    fn memory_write_exclusive_8(&mut self, vaddr: u64, value: u8, expected: u8) -> bool;
    fn memory_write_exclusive_16(&mut self, vaddr: u64, value: u16, expected: u16) -> bool;
    fn memory_write_exclusive_32(&mut self, vaddr: u64, value: u32, expected: u32) -> bool;
    fn memory_write_exclusive_64(&mut self, vaddr: u64, value: u64, expected: u64) -> bool;

    fn is_read_only_memory(&mut self, _vaddr: u64) -> bool {
        false
    }

    fn call_svc(&mut self, swi: u32);
    fn exception_raised(&mut self, pc: u64, kind: ExceptionKind);
    fn interpreter_fallback(&mut self, pc: u64, num_instructions: usize);

    /// Raised only when `hook_data_cache_operations` is set; otherwise
    /// `DC ZVA` is lowered to plain stores and the rest are dropped.
    fn data_cache_operation_raised(&mut self, _op: u32, _vaddr: u64) {}
    fn instruction_cache_operation_raised(&mut self, _op: u32, _vaddr: u64) {}

    fn get_cntpct(&mut self) -> u64;

    fn add_ticks(&mut self, ticks: u64);
    fn get_ticks_remaining(&mut self) -> u64;
}
