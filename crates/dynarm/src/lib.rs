//! A dynamic binary translator for 32-bit and 64-bit ARM guest code:
//! guest basic blocks are decoded to a typed SSA-style IR, run through a
//! fixed optimization pipeline, compiled to x86-64, cached, and chained
//! together by a dispatcher with fastmem, exclusive-monitor, cycle
//! accounting, halting, and invalidation support.
//!
//! This crate is the embedding surface: construct an [`A32Cpu`] or
//! [`A64Cpu`] with a callback table and a [`config::A32Config`] /
//! [`config::A64Config`], then drive it with `run`/`step` and the
//! register accessors.

use std::sync::atomic::{AtomicU32, Ordering};

pub mod a32;
pub mod a64;
pub mod callbacks;
pub mod config;
mod disasm;

pub use a32::A32Cpu;
pub use a64::A64Cpu;
pub use callbacks::{A32Callbacks, A64Callbacks};
pub use config::{A32Config, A64Config, ConfigError, PageTableOptions};
pub use dynarm_frontend::coprocessor::{Coprocessor, CoprocResult};
pub use dynarm_opt::{Optimization, UnsafeOptimization};
pub use dynarm_runtime::{ExclusiveMonitor, HaltReason};
pub use dynarm_types::{ExceptionKind, Fpcr, RoundingMode};

/// Lets an embedder's callbacks stop execution from inside a callback or
/// from another host thread: a lock-free store to the halt flag, observed
/// by emitted code at the next halt-checking terminator.
///
/// The handle borrows no lifetime but is only valid while the CPU it was
/// taken from is alive; using it afterwards is undefined behavior, the
/// same contract as handing the embedder any other raw resource.
#[derive(Clone, Copy)]
pub struct HaltHandle {
    flag: *const AtomicU32,
}

unsafe impl Send for HaltHandle {}
unsafe impl Sync for HaltHandle {}

impl HaltHandle {
    pub(crate) fn new(flag: &AtomicU32) -> HaltHandle {
        HaltHandle { flag }
    }

    pub fn halt(&self) {
        unsafe { &*self.flag }.fetch_or(HaltReason::USER_DEFINED.bits(), Ordering::SeqCst);
    }
}

/// The MXCSR image guest code runs under: host rounding and denormal
/// handling configured from FPCR once per FPCR write, instead of per
/// emitted operation.
pub(crate) fn mxcsr_for_fpcr(fpcr: Fpcr) -> u32 {
    // All exceptions masked.
    let mut mxcsr = 0x1F80;
    mxcsr |= match fpcr.rounding_mode() {
        RoundingMode::TiesToEven | RoundingMode::TiesToAway => 0,
        RoundingMode::TowardsMinusInfinity => 0b01 << 13,
        RoundingMode::TowardsPlusInfinity => 0b10 << 13,
        RoundingMode::TowardsZero => 0b11 << 13,
    };
    if fpcr.fz() {
        // Flush-to-zero both on input (DAZ) and output (FTZ).
        mxcsr |= (1 << 15) | (1 << 6);
    }
    mxcsr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mxcsr_tracks_the_fpcr_rounding_field() {
        assert_eq!(mxcsr_for_fpcr(Fpcr(0)) & (0b11 << 13), 0);
        assert_eq!(
            mxcsr_for_fpcr(Fpcr(0b01 << 22)) & (0b11 << 13),
            0b10 << 13,
            "ARM round-to-plus-infinity is x86 RC=10"
        );
        assert_eq!(
            mxcsr_for_fpcr(Fpcr(0b10 << 22)) & (0b11 << 13),
            0b01 << 13,
        );
        assert_eq!(
            mxcsr_for_fpcr(Fpcr(0b11 << 22)) & (0b11 << 13),
            0b11 << 13,
        );
    }

    #[test]
    fn flush_to_zero_sets_both_ftz_and_daz() {
        let m = mxcsr_for_fpcr(Fpcr(1 << 24));
        assert_ne!(m & (1 << 15), 0);
        assert_ne!(m & (1 << 6), 0);
    }
}
