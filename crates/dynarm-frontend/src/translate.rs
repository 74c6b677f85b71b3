//! The top-level `translate` entry point. Architecture-specific
//! modules (`a32`, `a64`) supply the decode tables and visitor; this module
//! owns the shared block-termination policy: max instruction count,
//! single-step mode, and control-flow-ends-the-block detection are all
//! architecture-neutral concerns.

/// Supplied by the embedder. A real failure
/// to read has no error channel here; the
/// callback itself is expected to return a fixed infinite-loop encoding to
/// make forward progress rather than signal failure back into the
/// translator.
pub trait MemoryReadCode {
    fn memory_read_code(&self, vaddr: u64) -> u32;
}

/// Translation-time options threaded through the decoder and optimizer
/// handoff.
#[derive(Debug, Clone, Copy)]
pub struct TranslateOptions {
    /// Hard cap on instructions translated into one block.
    pub max_block_size: usize,
    /// Caller requested exactly one guest instruction, then stop.
    pub single_step: bool,
    /// Map `UnpredictableInstruction` to a defined per-instruction behavior
    /// instead of raising to the embedder.
    pub define_unpredictable_behaviour: bool,
    /// Raise `ExceptionRaised` for hint instructions (`NOP`/`WFE`/`WFI`/...)
    /// instead of treating them as true no-ops.
    pub hook_hint_instructions: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        TranslateOptions {
            max_block_size: 128,
            single_step: false,
            define_unpredictable_behaviour: false,
            hook_hint_instructions: false,
        }
    }
}

/// Why translation of the current block stopped; used by callers that want
/// to distinguish "ran out of budget" from "guest control flow ended the
/// block" for diagnostics, though both produce a well-formed terminated
/// block either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ControlFlow,
    MaxBlockSize,
    SingleStep,
    UndefinedInstruction,
    UnpredictableInstruction,
}
