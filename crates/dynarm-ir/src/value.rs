use dynarm_types::{cond::Cond, reg::{A32ExtReg, A32Reg, A64Reg, A64Vec}, ty::IrType};

/// The identity of an instruction within its block: its position in the
/// block's instruction list at the time it was appended. Stable for the
/// lifetime of the block (instructions are never reordered, only removed in
/// place by DCE, which leaves a hole rather than renumbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// An IR value: either an immediate or a reference to a prior instruction's
/// result. `Ref` is the only non-immediate variant, and is
/// always module-local — there is no cross-block value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    ImmU1(bool),
    ImmU8(u8),
    ImmU16(u16),
    ImmU32(u32),
    ImmU64(u64),
    ImmU128(u128),
    ImmCond(Cond),
    ImmA32Reg(A32Reg),
    ImmA32ExtReg(A32ExtReg),
    ImmA64Reg(A64Reg),
    ImmA64Vec(A64Vec),
    Ref(InstId),
}

impl Value {
    pub const fn is_immediate(self) -> bool {
        !matches!(self, Value::Ref(_))
    }

    pub const fn as_ref(self) -> Option<InstId> {
        match self {
            Value::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// The type an immediate carries on its own; `Ref` values must be typed
    /// by looking up the producing instruction's opcode, which is why this
    /// returns `None` for them rather than guessing.
    pub const fn immediate_type(self) -> Option<IrType> {
        match self {
            Value::ImmU1(_) => Some(IrType::U1),
            Value::ImmU8(_) => Some(IrType::U8),
            Value::ImmU16(_) => Some(IrType::U16),
            Value::ImmU32(_) => Some(IrType::U32),
            Value::ImmU64(_) => Some(IrType::U64),
            Value::ImmU128(_) => Some(IrType::U128),
            Value::ImmCond(_) | Value::ImmA32Reg(_) | Value::ImmA32ExtReg(_)
            | Value::ImmA64Reg(_) | Value::ImmA64Vec(_) => Some(IrType::TableRef),
            Value::Ref(_) => None,
        }
    }

    /// The bit pattern of an immediate integer, used by the constant-folding
    /// pass. Returns `None` for non-integer immediates and for
    /// `Ref`s.
    pub const fn immediate_bits(self) -> Option<u128> {
        match self {
            Value::ImmU1(b) => Some(b as u128),
            Value::ImmU8(v) => Some(v as u128),
            Value::ImmU16(v) => Some(v as u128),
            Value::ImmU32(v) => Some(v as u128),
            Value::ImmU64(v) => Some(v as u128),
            Value::ImmU128(v) => Some(v),
            _ => None,
        }
    }
}
