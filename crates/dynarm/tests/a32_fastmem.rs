//! The fastmem fall-through scenario: with a null page-table entry
//! a load goes through the embedder callback; once the entry is filled,
//! re-executing the same compiled block takes the inline path and skips
//! the callback entirely.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{Shared, TestEnv};
use dynarm::{A32Config, A32Cpu, PageTableOptions};

const ADDRESS_SPACE_BITS: u32 = 24;
const PAGE_COUNT: usize = 1 << (ADDRESS_SPACE_BITS - 12);

#[test]
fn null_page_entries_fall_back_and_filled_ones_go_direct() {
    let shared = Shared::new(1 << 16);
    // ldr r0, [r1]; svc #0
    shared.write_words(0, &[0xE591_0000, 0xEF00_0000]);
    shared.write_words(0x3000, &[0xCAFE_F00D]);

    // The embedder-owned page table; entries are written between runs.
    let table: Arc<Vec<AtomicU64>> =
        Arc::new((0..PAGE_COUNT).map(|_| AtomicU64::new(0)).collect());

    let mut config = A32Config::new(TestEnv::new(shared.clone()));
    config.page_table = Some(PageTableOptions {
        pointer: table.as_ptr() as usize,
        address_space_bits: ADDRESS_SPACE_BITS,
        absolute_offset_page_table: false,
        silently_mirror_page_table: false,
        detect_misaligned_access_via_page_table: 0,
        only_detect_misalignment_via_page_table_on_page_boundary: false,
    });
    let mut cpu = A32Cpu::new(config).unwrap();
    shared.attach_halt(cpu.halt_handle());

    cpu.set_reg(1, 0x3000);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(0), 0xCAFE_F00D);
    let fallback_reads = *shared.read32_count.lock().unwrap();
    assert_eq!(
        fallback_reads, 1,
        "a null page entry must route the load through the callback"
    );

    // Map page 3 directly at the backing memory and re-execute the same
    // compiled block.
    let host_page = {
        let mem = shared.memory.lock().unwrap();
        mem.as_ptr() as u64 + 0x3000
    };
    table[3].store(host_page, Ordering::SeqCst);

    cpu.set_reg(0, 0);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(cpu.reg(0), 0xCAFE_F00D);
    assert_eq!(
        *shared.read32_count.lock().unwrap(),
        fallback_reads,
        "the filled entry must satisfy the load without the callback"
    );
}

#[test]
fn out_of_range_addresses_fall_back_without_mirroring() {
    let shared = Shared::new(1 << 16);
    shared.write_words(0, &[0xE591_0000, 0xEF00_0000]);
    let table: Arc<Vec<AtomicU64>> =
        Arc::new((0..PAGE_COUNT).map(|_| AtomicU64::new(0)).collect());

    let mut config = A32Config::new(TestEnv::new(shared.clone()));
    config.page_table = Some(PageTableOptions {
        pointer: table.as_ptr() as usize,
        address_space_bits: ADDRESS_SPACE_BITS,
        absolute_offset_page_table: false,
        silently_mirror_page_table: false,
        detect_misaligned_access_via_page_table: 0,
        only_detect_misalignment_via_page_table_on_page_boundary: false,
    });
    let mut cpu = A32Cpu::new(config).unwrap();
    shared.attach_halt(cpu.halt_handle());

    // An address above the 24-bit table range must take the callback.
    cpu.set_reg(1, 0x0400_0000);
    cpu.set_pc(0);
    cpu.run();
    assert_eq!(*shared.read32_count.lock().unwrap(), 1);
}
