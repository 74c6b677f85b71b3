//! CPU-instance configuration. Plain records with `Default` impls;
//! nothing here is serialized or validated beyond construction-time range
//! checks in `Cpu::new`.

use std::sync::Arc;

use dynarm_frontend::coprocessor::CoprocessorTable;
use dynarm_opt::{Optimization, UnsafeOptimization};
use dynarm_runtime::ExclusiveMonitor;

/// Inline page-table description. The table is
/// an embedder-owned array of host pointers, one per guest page, indexed
/// by `vaddr >> 12`; a null entry sends the access to the callbacks.
#[derive(Debug, Clone, Copy)]
pub struct PageTableOptions {
    /// Address of the embedder's `[*mut u8; 1 << (bits - 12)]` array.
    pub pointer: usize,
    pub address_space_bits: u32,
    /// Entries are pre-biased so the full guest address (not the page
    /// offset) is added to them.
    pub absolute_offset_page_table: bool,
    /// Out-of-range addresses wrap to the table instead of falling back.
    pub silently_mirror_page_table: bool,
    /// Bitmask of access sizes (bit 0 = 8-bit ... bit 3 = 64-bit) whose
    /// misalignment is policed through the fallback path.
    pub detect_misaligned_access_via_page_table: u32,
    pub only_detect_misalignment_via_page_table_on_page_boundary: bool,
}

/// Default size of the emitted-code region.
pub const DEFAULT_CODE_CACHE_SIZE: usize = 32 << 20;

pub struct A32Config {
    pub callbacks: Box<dyn A32Callbacks>,
    pub processor_id: usize,
    /// Shared exclusive monitor; absent means a private single-processor
    /// monitor.
    pub global_monitor: Option<Arc<ExclusiveMonitor>>,
    /// Always intersected with `Optimization::all_safe_optimizations()`;
    /// accuracy-reducing fast paths need `unsafe_optimizations` too.
    pub optimizations: Optimization,
    pub unsafe_optimizations: UnsafeOptimization,
    pub enable_unsafe_optimizations: bool,
    pub page_table: Option<PageTableOptions>,
    /// Base of a 4 GiB host window backing the whole guest address space,
    /// accessed directly and recovered via the signal handler.
    pub fastmem_pointer: Option<u64>,
    pub recompile_on_fastmem_failure: bool,
    pub coprocessors: CoprocessorTable,
    pub hook_hint_instructions: bool,
    pub define_unpredictable_behaviour: bool,
    pub enable_cycle_counting: bool,
    /// Pin CPSR.E to little-endian; big-endian load/store is not
    /// supported by this backend.
    pub always_little_endian: bool,
    pub max_block_size: usize,
    pub code_cache_size: usize,
}

use crate::callbacks::{A32Callbacks, A64Callbacks};
use dynarm_frontend::coprocessor::empty_coprocessor_table;

impl A32Config {
    pub fn new(callbacks: Box<dyn A32Callbacks>) -> A32Config {
        A32Config {
            callbacks,
            processor_id: 0,
            global_monitor: None,
            optimizations: Optimization::all_safe_optimizations(),
            unsafe_optimizations: UnsafeOptimization::empty(),
            enable_unsafe_optimizations: false,
            page_table: None,
            fastmem_pointer: None,
            recompile_on_fastmem_failure: false,
            coprocessors: empty_coprocessor_table(),
            hook_hint_instructions: false,
            define_unpredictable_behaviour: false,
            enable_cycle_counting: true,
            always_little_endian: true,
            max_block_size: 128,
            code_cache_size: DEFAULT_CODE_CACHE_SIZE,
        }
    }
}

pub struct A64Config {
    pub callbacks: Box<dyn A64Callbacks>,
    pub processor_id: usize,
    pub global_monitor: Option<Arc<ExclusiveMonitor>>,
    pub optimizations: Optimization,
    pub unsafe_optimizations: UnsafeOptimization,
    pub enable_unsafe_optimizations: bool,
    pub page_table: Option<PageTableOptions>,
    pub hook_hint_instructions: bool,
    pub hook_data_cache_operations: bool,
    pub define_unpredictable_behaviour: bool,
    pub enable_cycle_counting: bool,
    /// Raw values of the ID/system registers the translator folds to
    /// constants.
    pub cntfrq_el0: u32,
    pub ctr_el0: u32,
    pub dczid_el0: u32,
    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,
    pub max_block_size: usize,
    pub code_cache_size: usize,
}

impl A64Config {
    pub fn new(callbacks: Box<dyn A64Callbacks>) -> A64Config {
        A64Config {
            callbacks,
            processor_id: 0,
            global_monitor: None,
            optimizations: Optimization::all_safe_optimizations(),
            unsafe_optimizations: UnsafeOptimization::empty(),
            enable_unsafe_optimizations: false,
            page_table: None,
            hook_hint_instructions: false,
            hook_data_cache_operations: false,
            define_unpredictable_behaviour: false,
            enable_cycle_counting: true,
            cntfrq_el0: 19_200_000,
            ctr_el0: 0x8444_C004,
            dczid_el0: 4,
            tpidr_el0: 0,
            tpidrro_el0: 0,
            max_block_size: 128,
            code_cache_size: DEFAULT_CODE_CACHE_SIZE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("page table address space must cover at least one page and at most 48 bits, got {0}")]
    PageTableAddressSpace(u32),
    #[error("a page table and a fastmem pointer are mutually exclusive")]
    ConflictingFastmem,
    #[error("processor id {id} out of range for a monitor of {count} processors")]
    ProcessorId { id: usize, count: usize },
    #[error("failed to set up the emitted-code region: {0}")]
    Runtime(#[from] dynarm_runtime::RuntimeError),
}
