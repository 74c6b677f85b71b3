//! The slice of ARM floating-point control state the code generator cares
//! about. Only the FPCR bits that change emitted code live here; the full
//! register (including the RES0 space and the trap-enable bits this system
//! never honors) stays an opaque `u32` in the guest state.

/// ARM rounding modes as encoded in FPCR.RMode and carried as an immediate
/// operand by the `FPToFixed*` IR ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoundingMode {
    /// Round to nearest, ties to even; the IEEE default.
    TiesToEven = 0,
    TowardsPlusInfinity = 1,
    TowardsMinusInfinity = 2,
    TowardsZero = 3,
    /// Round to nearest, ties away from zero; used only by a handful of
    /// A64 conversion instructions, never selectable through FPCR.
    TiesToAway = 4,
}

impl RoundingMode {
    pub const fn from_bits(bits: u8) -> RoundingMode {
        match bits {
            0 => RoundingMode::TiesToEven,
            1 => RoundingMode::TowardsPlusInfinity,
            2 => RoundingMode::TowardsMinusInfinity,
            3 => RoundingMode::TowardsZero,
            _ => RoundingMode::TiesToAway,
        }
    }
}

/// A typed view over an FPCR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fpcr(pub u32);

impl Fpcr {
    /// The bits that participate in the location descriptor, and therefore
    /// in block identity: RMode, FZ, DN, AHP.
    pub const CODEGEN_MASK: u32 = 0x07C0_0000;

    /// Default NaN mode: any NaN result is replaced with the ARM default
    /// NaN instead of a propagated operand payload.
    pub const fn dn(self) -> bool {
        self.0 & (1 << 25) != 0
    }

    /// Flush-to-zero: denormal inputs are treated as signed zero.
    pub const fn fz(self) -> bool {
        self.0 & (1 << 24) != 0
    }

    pub const fn rounding_mode(self) -> RoundingMode {
        RoundingMode::from_bits(((self.0 >> 22) & 0b11) as u8)
    }

    pub const fn codegen_bits(self) -> u32 {
        self.0 & Self::CODEGEN_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmode_field_decodes_all_four_fpcr_modes() {
        assert_eq!(Fpcr(0).rounding_mode(), RoundingMode::TiesToEven);
        assert_eq!(Fpcr(0b01 << 22).rounding_mode(), RoundingMode::TowardsPlusInfinity);
        assert_eq!(Fpcr(0b10 << 22).rounding_mode(), RoundingMode::TowardsMinusInfinity);
        assert_eq!(Fpcr(0b11 << 22).rounding_mode(), RoundingMode::TowardsZero);
    }

    #[test]
    fn codegen_bits_ignore_status_only_fields() {
        // IXE (trap enable, bit 12) must not change block identity.
        assert_eq!(Fpcr(1 << 12).codegen_bits(), 0);
        assert_eq!(Fpcr(1 << 25).codegen_bits(), 1 << 25);
    }
}
