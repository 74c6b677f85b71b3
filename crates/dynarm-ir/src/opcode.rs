use dynarm_types::ty::IrType;

/// Which architecture (or none) an opcode belongs to. The translator only
/// ever emits opcodes matching the architecture it is currently compiling
/// for; the optimizer and backend dispatch on this to decide which passes
/// or emission tables apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Neutral,
    A32,
    A64,
}

/// The closed catalog of micro-ops. Each variant corresponds to exactly one
/// row of the shared opcode table; `Opcode::info` is that table,
/// implemented as a match rather than a separate data structure so it can
/// never drift from the variant list (design note: "prefer a single tagged
/// enumeration with a per-variant emitter table to virtual dispatch").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // --- Architecture-neutral arithmetic/logic, by width ---
    Add32,
    Add64,
    Sub32,
    Sub64,
    AddWithCarry32,
    AddWithCarry64,
    SubWithCarry32,
    SubWithCarry64,
    Mul32,
    Mul64,
    And32,
    And64,
    Or32,
    Or64,
    Eor32,
    Eor64,
    Not32,
    Not64,
    LogicalShiftLeft32,
    LogicalShiftLeft64,
    LogicalShiftRight32,
    LogicalShiftRight64,
    ArithShiftRight32,
    ArithShiftRight64,
    RotateRight32,
    RotateRight64,
    ZeroExtendToWord,
    ZeroExtendToLong,
    SignExtendToWord,
    SignExtendToLong,
    LeastSignificantByte,
    LeastSignificantHalf,
    LeastSignificantWord,
    MostSignificantBit,
    IsZero32,
    IsZero64,

    // --- Flag extraction (virtual-use producers, see GetSetElimination / ConstProp) ---
    GetCarryFromOp,
    GetOverflowFromOp,
    GetNZFromOp,
    GetNZCVFromOp,
    NzcvFromPackedFlags,
    TestCondition,
    ConditionalSelect32,
    ConditionalSelect64,

    // --- Scalar floating point (FPCR-governed; never constant-folded) ---
    FPAdd32,
    FPAdd64,
    FPSub32,
    FPSub64,
    FPMul32,
    FPMul64,
    FPDiv32,
    FPDiv64,
    FPToFixedS32,
    FPToFixedS64,
    FPToFixedU32,
    FPToFixedU64,

    // --- Vector (128-bit lanes) ---
    VectorAdd8,
    VectorAdd16,
    VectorAdd32,
    VectorAdd64,
    VectorAnd,
    VectorOr,
    VectorEor,

    // --- Memory ---
    ReadMemory8,
    ReadMemory16,
    ReadMemory32,
    ReadMemory64,
    WriteMemory8,
    WriteMemory16,
    WriteMemory32,
    WriteMemory64,
    ExclusiveReadMemory8,
    ExclusiveReadMemory16,
    ExclusiveReadMemory32,
    ExclusiveReadMemory64,
    ExclusiveWriteMemory8,
    ExclusiveWriteMemory16,
    ExclusiveWriteMemory32,
    ExclusiveWriteMemory64,
    ClearExclusive,

    // --- Exceptions / misc neutral ---
    ExceptionRaised,
    CallSupervisor,
    Breakpoint,
    Nop,
    /// Push (location-hash, code-pointer) for `args[0]` onto the return
    /// stack buffer; emitted by call-like instructions so the matching
    /// return's `PopRSBHint` terminator can skip the dispatcher.
    PushRSB,
    /// Zero `args[1]` bytes (a `u32` count) starting at `args[0]` (a `u64`
    /// vaddr). The only lowering a `DataCacheOperationRaised(ZeroByVA, ..)`
    /// can take
    /// that isn't "raise to the embedder": the byte count is usually larger
    /// than any single host store, so unlike every other memory op this one
    /// is left as one IR instruction and expanded by the code emitter
    /// rather than by the optimizer (see `dynarm-opt`'s callback
    /// elimination pass).
    ZeroMemoryBlock,

    // --- A32-specific ---
    A32GetRegister,
    A32SetRegister,
    A32GetCpsr,
    A32SetCpsr,
    A32SetCpsrNZCV,
    /// Write only the N and Z flags, preserving C and V; the flag update
    /// shape of the logical/move instructions, whose carry comes from the
    /// shifter rather than the ALU.
    A32SetCpsrNZ,
    A32GetCFlag,
    /// Interworking PC write (`BX`, `POP {.., PC}`): bit 0 of the value
    /// selects the Thumb bit, the rest becomes the new PC.
    A32BXWritePC,
    A32SetCheckBit,
    A32GetCheckBit,
    A32GetExtRegU32,
    A32SetExtRegU32,
    A32DataSynchronizationBarrier,
    A32DataMemoryBarrier,
    A32InstructionSynchronizationBarrier,
    A32DataCacheOperationRaised,
    A32CoprocGetOneWord,
    A32CoprocSetOneWord,

    // --- A64-specific ---
    A64GetX,
    A64SetX,
    A64GetSP,
    A64SetSP,
    A64GetPC,
    A64SetPC,
    A64GetNZCVRaw,
    A64SetNZCVRaw,
    A64GetW,
    A64SetW,
    A64GetS,
    A64SetS,
    A64GetD,
    A64SetD,
    A64GetQ,
    A64SetQ,
    A64DataCacheOperationRaised,
    A64InstructionCacheOperationRaised,
    A64GetCNTPCT,
    A64SetCheckBit,
    A64GetCheckBit,
}

/// Side-effect / purity metadata for one opcode, looked up by
/// [`Opcode::info`]. `pure` opcodes over immediate arguments are eligible
/// for constant folding (optimizer pass 5); `side_effect` opcodes are
/// barriers for get/set elimination and are never removed by DCE even with
/// zero uses.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub family: Family,
    pub ret: IrType,
    pub side_effect: bool,
    pub pure: bool,
    pub reads_cpsr: bool,
    pub writes_cpsr: bool,
}

macro_rules! info_table {
    ($self:expr, { $($variant:ident => $info:expr),* $(,)? }) => {
        match $self {
            $(Opcode::$variant => $info,)*
        }
    };
}

const fn neutral(ret: IrType) -> OpcodeInfo {
    OpcodeInfo {
        family: Family::Neutral,
        ret,
        side_effect: false,
        pure: false,
        reads_cpsr: false,
        writes_cpsr: false,
    }
}

const fn pure_neutral(ret: IrType) -> OpcodeInfo {
    OpcodeInfo {
        pure: true,
        ..neutral(ret)
    }
}

const fn side_effecting(family: Family) -> OpcodeInfo {
    OpcodeInfo {
        family,
        ret: IrType::Void,
        side_effect: true,
        pure: false,
        reads_cpsr: false,
        writes_cpsr: false,
    }
}

impl Opcode {
    pub const fn info(self) -> OpcodeInfo {
        info_table!(self, {
            Add32 => pure_neutral(IrType::U32),
            Add64 => pure_neutral(IrType::U64),
            Sub32 => pure_neutral(IrType::U32),
            Sub64 => pure_neutral(IrType::U64),
            AddWithCarry32 => pure_neutral(IrType::U32),
            AddWithCarry64 => pure_neutral(IrType::U64),
            SubWithCarry32 => pure_neutral(IrType::U32),
            SubWithCarry64 => pure_neutral(IrType::U64),
            Mul32 => pure_neutral(IrType::U32),
            Mul64 => pure_neutral(IrType::U64),
            And32 => pure_neutral(IrType::U32),
            And64 => pure_neutral(IrType::U64),
            Or32 => pure_neutral(IrType::U32),
            Or64 => pure_neutral(IrType::U64),
            Eor32 => pure_neutral(IrType::U32),
            Eor64 => pure_neutral(IrType::U64),
            Not32 => pure_neutral(IrType::U32),
            Not64 => pure_neutral(IrType::U64),
            LogicalShiftLeft32 => pure_neutral(IrType::U32),
            LogicalShiftLeft64 => pure_neutral(IrType::U64),
            LogicalShiftRight32 => pure_neutral(IrType::U32),
            LogicalShiftRight64 => pure_neutral(IrType::U64),
            ArithShiftRight32 => pure_neutral(IrType::U32),
            ArithShiftRight64 => pure_neutral(IrType::U64),
            RotateRight32 => pure_neutral(IrType::U32),
            RotateRight64 => pure_neutral(IrType::U64),
            ZeroExtendToWord => pure_neutral(IrType::U32),
            ZeroExtendToLong => pure_neutral(IrType::U64),
            SignExtendToWord => pure_neutral(IrType::U32),
            SignExtendToLong => pure_neutral(IrType::U64),
            LeastSignificantByte => pure_neutral(IrType::U8),
            LeastSignificantHalf => pure_neutral(IrType::U16),
            LeastSignificantWord => pure_neutral(IrType::U32),
            MostSignificantBit => pure_neutral(IrType::U1),
            IsZero32 => pure_neutral(IrType::U1),
            IsZero64 => pure_neutral(IrType::U1),

            GetCarryFromOp => pure_neutral(IrType::U1),
            GetOverflowFromOp => pure_neutral(IrType::U1),
            GetNZFromOp => pure_neutral(IrType::NzcvFlags),
            GetNZCVFromOp => pure_neutral(IrType::NzcvFlags),
            NzcvFromPackedFlags => pure_neutral(IrType::NzcvFlags),
            TestCondition => pure_neutral(IrType::OpaqueCond),
            ConditionalSelect32 => pure_neutral(IrType::U32),
            ConditionalSelect64 => pure_neutral(IrType::U64),

            // FPCR state (rounding mode, FZ, DN) reaches into every FP
            // result, so these are never `pure` even though they have no
            // side effect: the constant folder must not evaluate them.
            FPAdd32 => neutral(IrType::U32),
            FPAdd64 => neutral(IrType::U64),
            FPSub32 => neutral(IrType::U32),
            FPSub64 => neutral(IrType::U64),
            FPMul32 => neutral(IrType::U32),
            FPMul64 => neutral(IrType::U64),
            FPDiv32 => neutral(IrType::U32),
            FPDiv64 => neutral(IrType::U64),
            FPToFixedS32 => neutral(IrType::U32),
            FPToFixedS64 => neutral(IrType::U64),
            FPToFixedU32 => neutral(IrType::U32),
            FPToFixedU64 => neutral(IrType::U64),

            VectorAdd8 => pure_neutral(IrType::U128),
            VectorAdd16 => pure_neutral(IrType::U128),
            VectorAdd32 => pure_neutral(IrType::U128),
            VectorAdd64 => pure_neutral(IrType::U128),
            VectorAnd => pure_neutral(IrType::U128),
            VectorOr => pure_neutral(IrType::U128),
            VectorEor => pure_neutral(IrType::U128),

            ReadMemory8 => neutral(IrType::U8),
            ReadMemory16 => neutral(IrType::U16),
            ReadMemory32 => neutral(IrType::U32),
            ReadMemory64 => neutral(IrType::U64),
            WriteMemory8 => side_effecting(Family::Neutral),
            WriteMemory16 => side_effecting(Family::Neutral),
            WriteMemory32 => side_effecting(Family::Neutral),
            WriteMemory64 => side_effecting(Family::Neutral),
            ExclusiveReadMemory8 => side_effecting_ret(Family::Neutral, IrType::U8),
            ExclusiveReadMemory16 => side_effecting_ret(Family::Neutral, IrType::U16),
            ExclusiveReadMemory32 => side_effecting_ret(Family::Neutral, IrType::U32),
            ExclusiveReadMemory64 => side_effecting_ret(Family::Neutral, IrType::U64),
            ExclusiveWriteMemory8 => side_effecting_ret(Family::Neutral, IrType::U32),
            ExclusiveWriteMemory16 => side_effecting_ret(Family::Neutral, IrType::U32),
            ExclusiveWriteMemory32 => side_effecting_ret(Family::Neutral, IrType::U32),
            ExclusiveWriteMemory64 => side_effecting_ret(Family::Neutral, IrType::U32),
            ClearExclusive => side_effecting(Family::Neutral),

            ExceptionRaised => side_effecting(Family::Neutral),
            CallSupervisor => side_effecting(Family::Neutral),
            Breakpoint => side_effecting(Family::Neutral),
            Nop => neutral(IrType::Void),
            PushRSB => side_effecting(Family::Neutral),
            ZeroMemoryBlock => side_effecting(Family::Neutral),

            A32GetRegister => neutral(IrType::U32),
            A32SetRegister => side_effecting(Family::A32),
            A32GetCpsr => OpcodeInfo { reads_cpsr: true, ..neutral(IrType::U32) },
            A32SetCpsr => OpcodeInfo { writes_cpsr: true, ..side_effecting(Family::A32) },
            A32SetCpsrNZCV => OpcodeInfo { writes_cpsr: true, ..side_effecting(Family::A32) },
            A32SetCpsrNZ => OpcodeInfo { writes_cpsr: true, ..side_effecting(Family::A32) },
            A32GetCFlag => OpcodeInfo { reads_cpsr: true, ..neutral(IrType::U1) },
            A32BXWritePC => side_effecting(Family::A32),
            A32SetCheckBit => side_effecting(Family::A32),
            A32GetCheckBit => neutral(IrType::U1),
            A32GetExtRegU32 => neutral(IrType::U32),
            A32SetExtRegU32 => side_effecting(Family::A32),
            A32DataSynchronizationBarrier => side_effecting(Family::A32),
            A32DataMemoryBarrier => side_effecting(Family::A32),
            A32InstructionSynchronizationBarrier => side_effecting(Family::A32),
            A32DataCacheOperationRaised => side_effecting(Family::A32),
            A32CoprocGetOneWord => side_effecting_ret(Family::A32, IrType::U32),
            A32CoprocSetOneWord => side_effecting(Family::A32),

            A64GetX => neutral(IrType::U64),
            A64SetX => side_effecting(Family::A64),
            A64GetSP => neutral(IrType::U64),
            A64SetSP => side_effecting(Family::A64),
            A64GetPC => neutral(IrType::U64),
            A64SetPC => side_effecting(Family::A64),
            A64GetNZCVRaw => OpcodeInfo { reads_cpsr: true, ..neutral(IrType::NzcvFlags) },
            A64SetNZCVRaw => OpcodeInfo { writes_cpsr: true, ..side_effecting(Family::A64) },
            A64GetW => neutral(IrType::U32),
            A64SetW => side_effecting(Family::A64),
            A64GetS => neutral(IrType::U32),
            A64SetS => side_effecting(Family::A64),
            A64GetD => neutral(IrType::U64),
            A64SetD => side_effecting(Family::A64),
            A64GetQ => neutral(IrType::U128),
            A64SetQ => side_effecting(Family::A64),
            A64DataCacheOperationRaised => side_effecting(Family::A64),
            A64InstructionCacheOperationRaised => side_effecting(Family::A64),
            A64GetCNTPCT => neutral(IrType::U64),
            A64SetCheckBit => side_effecting(Family::A64),
            A64GetCheckBit => neutral(IrType::U1),
        })
    }

    /// Declared argument types, one entry per fixed argument slot. Slot
    /// compatibility is checked by the optimizer's verification pass via
    /// [`slot_accepts`]: integer slots accept any integer of equal or
    /// narrower width (the backend zero-extends on load), every other type
    /// must match exactly.
    pub const fn arg_types(self) -> &'static [IrType] {
        use IrType::*;
        const NONE: &[IrType] = &[];
        const W: &[IrType] = &[U32];
        const WW: &[IrType] = &[U32, U32];
        const WS: &[IrType] = &[U32, U8];
        const X: &[IrType] = &[U64];
        const XX: &[IrType] = &[U64, U64];
        const XS: &[IrType] = &[U64, U8];
        const Q: &[IrType] = &[U128];
        const QQ: &[IrType] = &[U128, U128];
        const REG: &[IrType] = &[TableRef];
        match self {
            Opcode::Add32 | Opcode::Sub32 | Opcode::Mul32 | Opcode::And32 | Opcode::Or32
            | Opcode::Eor32 => WW,
            Opcode::Add64 | Opcode::Sub64 | Opcode::Mul64 | Opcode::And64 | Opcode::Or64
            | Opcode::Eor64 => XX,
            Opcode::AddWithCarry32 | Opcode::SubWithCarry32 => &[U32, U32, U1],
            Opcode::AddWithCarry64 | Opcode::SubWithCarry64 => &[U64, U64, U1],
            Opcode::Not32 => W,
            Opcode::Not64 => X,
            Opcode::LogicalShiftLeft32 | Opcode::LogicalShiftRight32
            | Opcode::ArithShiftRight32 | Opcode::RotateRight32 => WS,
            Opcode::LogicalShiftLeft64 | Opcode::LogicalShiftRight64
            | Opcode::ArithShiftRight64 | Opcode::RotateRight64 => XS,
            // Extensions and truncations accept any integer input; the
            // opcode's name states the output width, not the input's.
            Opcode::ZeroExtendToWord | Opcode::SignExtendToWord => W,
            Opcode::ZeroExtendToLong | Opcode::SignExtendToLong => X,
            Opcode::LeastSignificantByte | Opcode::LeastSignificantHalf
            | Opcode::LeastSignificantWord => X,
            Opcode::MostSignificantBit => W,
            Opcode::IsZero32 => W,
            Opcode::IsZero64 => X,

            // Flag-extraction pseudo-ops take a reference to their
            // flag-producing arithmetic instruction of either width.
            Opcode::GetCarryFromOp | Opcode::GetOverflowFromOp | Opcode::GetNZFromOp
            | Opcode::GetNZCVFromOp => X,
            Opcode::NzcvFromPackedFlags => W,
            Opcode::TestCondition => &[TableRef, NzcvFlags],
            Opcode::ConditionalSelect32 => &[OpaqueCond, U32, U32],
            Opcode::ConditionalSelect64 => &[OpaqueCond, U64, U64],

            Opcode::FPAdd32 | Opcode::FPSub32 | Opcode::FPMul32 | Opcode::FPDiv32 => WW,
            Opcode::FPAdd64 | Opcode::FPSub64 | Opcode::FPMul64 | Opcode::FPDiv64 => XX,
            Opcode::FPToFixedS32 | Opcode::FPToFixedU32 => WS,
            Opcode::FPToFixedS64 | Opcode::FPToFixedU64 => XS,

            Opcode::VectorAdd8 | Opcode::VectorAdd16 | Opcode::VectorAdd32
            | Opcode::VectorAdd64 | Opcode::VectorAnd | Opcode::VectorOr
            | Opcode::VectorEor => QQ,

            Opcode::ReadMemory8 | Opcode::ReadMemory16 | Opcode::ReadMemory32
            | Opcode::ReadMemory64 => X,
            Opcode::WriteMemory8 => &[U64, U8],
            Opcode::WriteMemory16 => &[U64, U16],
            Opcode::WriteMemory32 => &[U64, U32],
            Opcode::WriteMemory64 => XX,
            Opcode::ExclusiveReadMemory8 | Opcode::ExclusiveReadMemory16
            | Opcode::ExclusiveReadMemory32 | Opcode::ExclusiveReadMemory64 => X,
            Opcode::ExclusiveWriteMemory8 => &[U64, U8],
            Opcode::ExclusiveWriteMemory16 => &[U64, U16],
            Opcode::ExclusiveWriteMemory32 => &[U64, U32],
            Opcode::ExclusiveWriteMemory64 => XX,
            Opcode::ClearExclusive => NONE,

            Opcode::ExceptionRaised => &[U64, U32],
            Opcode::CallSupervisor => W,
            Opcode::Breakpoint => NONE,
            Opcode::Nop => NONE,
            Opcode::PushRSB => X,
            Opcode::ZeroMemoryBlock => &[U64, U32],

            Opcode::A32GetRegister | Opcode::A32GetExtRegU32 => REG,
            Opcode::A32SetRegister => &[TableRef, U32],
            Opcode::A32SetExtRegU32 => &[TableRef, U32],
            Opcode::A32GetCpsr => NONE,
            Opcode::A32SetCpsr => W,
            Opcode::A32SetCpsrNZCV => &[NzcvFlags],
            Opcode::A32SetCpsrNZ => &[NzcvFlags],
            Opcode::A32GetCFlag => NONE,
            Opcode::A32BXWritePC => W,
            Opcode::A32SetCheckBit => &[U1],
            Opcode::A32GetCheckBit => NONE,
            Opcode::A32DataSynchronizationBarrier
            | Opcode::A32DataMemoryBarrier
            | Opcode::A32InstructionSynchronizationBarrier => NONE,
            Opcode::A32DataCacheOperationRaised => &[U8, U64, U32],
            Opcode::A32CoprocGetOneWord => &[U8, U8, U8, U8, U8],
            Opcode::A32CoprocSetOneWord => &[U8, U8, U8, U8, U8, U32],

            Opcode::A64GetX | Opcode::A64GetW => REG,
            Opcode::A64SetX => &[TableRef, U64],
            Opcode::A64SetW => &[TableRef, U32],
            Opcode::A64GetS | Opcode::A64GetD | Opcode::A64GetQ => REG,
            Opcode::A64SetS => &[TableRef, U32],
            Opcode::A64SetD => &[TableRef, U64],
            Opcode::A64SetQ => &[TableRef, U128],
            Opcode::A64GetSP | Opcode::A64GetPC => NONE,
            Opcode::A64SetSP | Opcode::A64SetPC => X,
            Opcode::A64GetNZCVRaw => NONE,
            Opcode::A64SetNZCVRaw => &[NzcvFlags],
            Opcode::A64DataCacheOperationRaised => &[U8, U64, U32],
            Opcode::A64InstructionCacheOperationRaised => &[U8, U64],
            Opcode::A64GetCNTPCT => NONE,
            Opcode::A64SetCheckBit => &[U1],
            Opcode::A64GetCheckBit => NONE,
        }
    }

    pub const fn family(self) -> Family {
        self.info().family
    }

    pub const fn is_pure(self) -> bool {
        self.info().pure
    }

    pub const fn has_side_effect(self) -> bool {
        self.info().side_effect
    }
}

const fn side_effecting_ret(family: Family, ret: IrType) -> OpcodeInfo {
    OpcodeInfo {
        ret,
        ..side_effecting(family)
    }
}

/// Whether a value of type `actual` may be wired into an argument slot
/// declared `expected`. Integers widen implicitly (the backend
/// zero-extends register loads, so a `u32` value in a `u64` slot is
/// well-defined); everything else is exact.
pub const fn slot_accepts(expected: IrType, actual: IrType) -> bool {
    match (expected.bit_width(), actual.bit_width()) {
        (Some(e), Some(a)) => a <= e,
        _ => matches!(
            (expected, actual),
            (IrType::NzcvFlags, IrType::NzcvFlags)
                | (IrType::OpaqueCond, IrType::OpaqueCond)
                | (IrType::CoprocInfo, IrType::CoprocInfo)
                | (IrType::TableRef, IrType::TableRef)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_effecting_ops_are_never_pure() {
        assert!(!Opcode::WriteMemory32.is_pure());
        assert!(Opcode::WriteMemory32.has_side_effect());
    }

    #[test]
    fn arithmetic_is_pure_and_side_effect_free() {
        assert!(Opcode::Add32.is_pure());
        assert!(!Opcode::Add32.has_side_effect());
    }

    #[test]
    fn family_partitions_match_naming_prefix() {
        assert_eq!(Opcode::A32SetRegister.family(), Family::A32);
        assert_eq!(Opcode::A64SetX.family(), Family::A64);
        assert_eq!(Opcode::Add32.family(), Family::Neutral);
    }
}
