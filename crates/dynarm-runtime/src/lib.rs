//! The runtime half of the recompiler: executable-region
//! ownership, the block cache with link patching and range invalidation,
//! the dispatcher run/step loop, the process-wide fastmem signal-handler
//! registry, and the cross-processor exclusive monitor.

pub mod cache;
pub mod dispatcher;
pub mod fastmem;
pub mod monitor;
pub mod region;

use bitflags::bitflags;

pub use cache::{BlockCache, BlockDescriptor};
pub use dispatcher::{CompileEnv, CompiledBlock, Dispatcher, RuntimeError};
pub use monitor::ExclusiveMonitor;
pub use region::CodeRegion;

bitflags! {
    /// Why the dispatcher returned. Multiple reasons can be posted before
    /// the next halt check observes them, so this is a bitmask rather
    /// than an enum.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HaltReason: u32 {
        const USER_DEFINED = 1 << 0;
        const STEP = 1 << 1;
        const UNRECOVERABLE_EXCEPTION = 1 << 2;
        const MEMORY_ABORT = 1 << 3;
        const DATA_ABORT = 1 << 4;
        const CODE_CACHE_FULL = 1 << 5;
    }
}
