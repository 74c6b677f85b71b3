use dynarm_ir::{Block, Location};
use dynarm_types::{A64LocationDescriptor, MemoryProbe};

use crate::{
    config::{Optimization, OptConfig},
    passes::{
        a64_merge_interpret, callback_elimination, constant_fold, constant_memory_reads, dce,
        get_set_elimination,
        verify::{self, VerificationError},
    },
};

/// Runs the fixed eight-step pipeline over one freshly-translated
/// block, architecture-neutral steps only. A32 callback-elimination and the
/// A64 merge-interpret-blocks step are architecture-specific and applied by
/// [`run_a32`]/[`run_a64`] around this.
fn run_neutral<L: Location>(block: &mut Block<L>, config: &OptConfig, probe: &dyn MemoryProbe) {
    if config.enabled(Optimization::GET_SET_ELIMINATION) {
        get_set_elimination::run(block);
    }
    dce::run(block);
    if config.enabled(Optimization::CONSTANT_MEMORY_READS) {
        constant_memory_reads::run(block, probe);
    }
    if config.enabled(Optimization::CONST_PROP) {
        constant_fold::run(block);
    }
    dce::run(block);
}

/// Full pipeline for an A32/Thumb block: DC ZVA lowering, then the shared
/// neutral steps, then verification.
pub fn run_a32<L: Location>(
    block: &mut Block<L>,
    config: &OptConfig,
    probe: &dyn MemoryProbe,
) -> Result<(), VerificationError> {
    callback_elimination::run(block, config.hook_data_cache_operations);
    run_neutral(block, config, probe);
    verify::run(block)
}

/// Full pipeline for an A64 block: DC ZVA lowering, the shared neutral
/// steps, then the A64-only merge-interpret-blocks step, then verification.
pub fn run_a64(
    block: &mut Block<A64LocationDescriptor>,
    config: &OptConfig,
    probe: &dyn MemoryProbe,
) -> Result<(), VerificationError> {
    callback_elimination::run(block, config.hook_data_cache_operations);
    run_neutral(block, config, probe);
    if config.enabled(Optimization::A64_MERGE_INTERPRET_BLOCKS) {
        a64_merge_interpret::run(block);
    }
    verify::run(block)
}
