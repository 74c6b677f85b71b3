//! Guest-instruction decode and translation to IR: the table-driven
//! bit-pattern decoder, the A32/Thumb and A64 translators, the conditional
//! execution state machine, and the coprocessor indirection surface.
//!
//! The decode tables cover a representative working set of each
//! architecture rather than the full instruction space; an encoding no
//! table matches is an undefined instruction, reported to the embedder
//! through `ExceptionRaised` exactly like an architecturally undefined one.

pub mod a32;
pub mod a64;
pub mod cond_state;
pub mod coprocessor;
pub mod decoder;
pub mod translate;

pub use translate::{MemoryReadCode, StopReason, TranslateOptions};
