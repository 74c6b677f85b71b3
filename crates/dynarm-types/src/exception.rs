//! Guest-fault and hint exception kinds reported through the embedder's
//! `exception_raised(pc, kind)` callback. The numeric values are part of
//! the `ExceptionRaised` IR op's immediate encoding, so they are fixed
//! here rather than left to enum default assignment.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExceptionKind {
    UndefinedInstruction = 0,
    UnpredictableInstruction = 1,
    DecodeError = 2,
    Breakpoint = 3,
    /// `SEV`
    SendEvent = 4,
    /// `SEVL`
    SendEventLocal = 5,
    /// `WFI`
    WaitForInterrupt = 6,
    /// `WFE`
    WaitForEvent = 7,
    Yield = 8,
}

impl ExceptionKind {
    pub const fn bits(self) -> u32 {
        self as u32
    }

    pub const fn from_bits(bits: u32) -> Option<ExceptionKind> {
        Some(match bits {
            0 => ExceptionKind::UndefinedInstruction,
            1 => ExceptionKind::UnpredictableInstruction,
            2 => ExceptionKind::DecodeError,
            3 => ExceptionKind::Breakpoint,
            4 => ExceptionKind::SendEvent,
            5 => ExceptionKind::SendEventLocal,
            6 => ExceptionKind::WaitForInterrupt,
            7 => ExceptionKind::WaitForEvent,
            8 => ExceptionKind::Yield,
            _ => return None,
        })
    }
}
