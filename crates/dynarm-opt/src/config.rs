use bitflags::bitflags;

bitflags! {
    /// Which passes of the fixed pipeline run. The
    /// `all_safe_optimizations()` constant is every bit here: every flag
    /// in this set preserves architectural semantics exactly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Optimization: u32 {
        const GET_SET_ELIMINATION   = 1 << 0;
        const CONST_PROP            = 1 << 1;
        const CONSTANT_MEMORY_READS = 1 << 2;
        const MISC_IR_OPT           = 1 << 3;
        const BLOCK_LINKING         = 1 << 4;
        const RETURN_STACK_BUFFER   = 1 << 5;
        const FAST_DISPATCH         = 1 << 6;
        const A64_MERGE_INTERPRET_BLOCKS = 1 << 7;
    }
}

impl Optimization {
    pub const fn all_safe_optimizations() -> Optimization {
        Optimization::all()
    }
}

impl Default for Optimization {
    fn default() -> Self {
        Optimization::all_safe_optimizations()
    }
}

bitflags! {
    /// Accuracy-reducing fast paths. These are
    /// never implied by [`Optimization::all_safe_optimizations`]; an
    /// embedder opts in explicitly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UnsafeOptimization: u32 {
        const UNFUSE_FMA                  = 1 << 0;
        const REDUCED_ERROR_FP            = 1 << 1;
        const INACCURATE_NAN              = 1 << 2;
        const IGNORE_STANDARD_FPCR_VALUE  = 1 << 3;
    }
}

/// Everything the fixed pipeline needs besides the block itself: which
/// passes are enabled and whether data-cache-operation hooking is
/// requested (which gates the first pass).
#[derive(Debug, Clone, Copy)]
pub struct OptConfig {
    pub optimizations: Optimization,
    pub unsafe_optimizations: UnsafeOptimization,
    /// When true, a `DC ZVA`-style `DataCacheOperationRaised` is left in
    /// place for the backend to raise to the embedder's cache-maintenance
    /// callback. When false (the default), it is lowered in the optimizer
    /// to a direct `ZeroMemoryBlock` instead.
    pub hook_data_cache_operations: bool,
}

impl Default for OptConfig {
    fn default() -> Self {
        OptConfig {
            optimizations: Optimization::default(),
            unsafe_optimizations: UnsafeOptimization::default(),
            hook_data_cache_operations: false,
        }
    }
}

impl OptConfig {
    pub fn enabled(&self, flag: Optimization) -> bool {
        self.optimizations.contains(flag)
    }
}
