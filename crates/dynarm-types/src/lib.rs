//! Closed vocabulary shared by every other `dynarm` crate: IR value types,
//! condition codes, guest register names and the packed location descriptor.
//!
//! This crate has no dependencies and no logic beyond `Display`/packing
//! helpers; it exists purely so the frontend, optimizer and backend agree
//! on one set of names without depending on each other.

pub mod callbacks;
pub mod cond;
pub mod exception;
pub mod fp;
pub mod location;
pub mod reg;
pub mod ty;

pub use callbacks::MemoryProbe;
pub use cond::Cond;
pub use exception::ExceptionKind;
pub use fp::{Fpcr, RoundingMode};
pub use location::{A32LocationDescriptor, A64LocationDescriptor};
pub use reg::{A32ExtReg, A32Reg, A64Reg, A64Vec};
pub use ty::IrType;
