use dynarm_backend::abi::{self, FastDispatchEntry, GuestState};
use memoffset::offset_of;

#[test]
fn guest_state_offsets_match_the_emitted_constants() {
    assert_eq!(abi::OFF_REGS, offset_of!(GuestState, regs) as i32);
    assert_eq!(abi::OFF_SP, offset_of!(GuestState, sp) as i32);
    assert_eq!(abi::OFF_PC, offset_of!(GuestState, pc) as i32);
    assert_eq!(abi::OFF_CPSR_NZCV, offset_of!(GuestState, cpsr_nzcv) as i32);
    assert_eq!(abi::OFF_CPSR_OTHER, offset_of!(GuestState, cpsr_other) as i32);
    assert_eq!(
        abi::OFF_LOCATION_PACKED,
        offset_of!(GuestState, location_packed) as i32
    );
    assert_eq!(abi::OFF_CHECK_BIT, offset_of!(GuestState, check_bit) as i32);
    assert_eq!(
        abi::OFF_CYCLES_REMAINING,
        offset_of!(GuestState, cycles_remaining) as i32
    );
    assert_eq!(
        abi::OFF_HALT_REASON,
        offset_of!(GuestState, halt_reason) as i32
    );
    assert_eq!(abi::OFF_MEM_BASE, offset_of!(GuestState, mem_base) as i32);
    assert_eq!(abi::OFF_RSB_PTR, offset_of!(GuestState, rsb_ptr) as i32);
    assert_eq!(abi::OFF_VEC, offset_of!(GuestState, vec) as i32);
    assert_eq!(abi::OFF_SPILL, offset_of!(GuestState, spill) as i32);
}

#[test]
fn emitted_vector_accesses_need_16_byte_alignment() {
    assert_eq!(offset_of!(GuestState, vec) % 16, 0);
    assert_eq!(offset_of!(GuestState, spill) % 16, 0);
    assert_eq!(offset_of!(GuestState, host_save_xmm) % 16, 0);
    assert_eq!(std::mem::align_of::<GuestState>(), 16);
}

#[test]
fn gpr_slots_are_8_byte_aligned() {
    assert_eq!(offset_of!(GuestState, regs) % 8, 0);
    assert_eq!(offset_of!(GuestState, rsb_locations) % 8, 0);
    assert_eq!(offset_of!(GuestState, rsb_code_ptrs) % 8, 0);
    assert_eq!(offset_of!(GuestState, host_save_gpr) % 8, 0);
}

#[test]
fn fast_dispatch_entries_are_16_bytes() {
    // The epilogue indexes the table with `hash & mask << 4`.
    assert_eq!(std::mem::size_of::<FastDispatchEntry>(), 16);
}

#[test]
fn every_offset_fits_a_signed_displacement() {
    assert!(std::mem::size_of::<GuestState>() < i32::MAX as usize);
}
