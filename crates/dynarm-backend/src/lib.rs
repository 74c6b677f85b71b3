//! The host backend: a linear-scan register allocator over a
//! fixed x86-64 register file and a per-opcode code emitter producing
//! position-dependent machine code, patch-site records for block linking,
//! and fault-site records for signal-based fastmem. The runtime crate owns
//! the executable memory this crate's output is copied into; nothing here
//! maps or executes anything.

pub mod abi;
pub mod constant_pool;
pub mod emit;
pub mod fplib;
pub mod hostloc;
pub mod regalloc;
pub mod stubs;

use thiserror::Error;

pub use abi::{GuestState, RuntimeCallbacks};
pub use constant_pool::ConstantPool;
pub use emit::{
    emit_a32, emit_a64, EmitArgs, EmitConfig, EmittedBlock, FastmemMode, FastmemSite,
    PageTableConfig, PatchFallback, PatchKind, PatchSite,
};
pub use stubs::{emit_stubs, StubAddrs, StubBlob};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("assembler error: {0}")]
    Assembler(String),
    #[error("register allocator ran out of spill slots")]
    OutOfSpillSlots,
    #[error(transparent)]
    PoolFull(#[from] constant_pool::PoolFull),
}

impl From<iced_x86::IcedError> for EmitError {
    fn from(e: iced_x86::IcedError) -> Self {
        EmitError::Assembler(e.to_string())
    }
}
