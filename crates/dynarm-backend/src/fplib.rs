//! Soft floating-point helpers for the conversions the host cannot
//! express with an SSE immediate form. Emitted code
//! calls these through the regular host-call path; they take and return
//! raw bit patterns so no ABI FP-register subtleties apply.

/// Round half away from zero, the `TiesToAway` mode. `f64::round` has
/// exactly these semantics.
fn round_ties_away(x: f64) -> f64 {
    x.round()
}

pub extern "C" fn fp64_to_s64_ties_away(bits: u64) -> u64 {
    let x = f64::from_bits(bits);
    if x.is_nan() {
        return 0;
    }
    // `as` saturates at the integer range bounds.
    (round_ties_away(x) as i64) as u64
}

pub extern "C" fn fp64_to_u64_ties_away(bits: u64) -> u64 {
    let x = f64::from_bits(bits);
    if x.is_nan() {
        return 0;
    }
    round_ties_away(x) as u64
}

pub extern "C" fn fp32_to_s32_ties_away(bits: u64) -> u64 {
    let x = f32::from_bits(bits as u32);
    if x.is_nan() {
        return 0;
    }
    (x.round() as i32) as u32 as u64
}

pub extern "C" fn fp32_to_u32_ties_away(bits: u64) -> u64 {
    let x = f32::from_bits(bits as u32);
    if x.is_nan() {
        return 0;
    }
    (x.round() as u32) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_away_rounds_half_cases_away_from_zero() {
        assert_eq!(fp64_to_s64_ties_away(2.5f64.to_bits()), 3);
        assert_eq!(fp64_to_s64_ties_away((-2.5f64).to_bits()), (-3i64) as u64);
    }

    #[test]
    fn out_of_range_saturates() {
        assert_eq!(fp64_to_s64_ties_away(1e30f64.to_bits()), i64::MAX as u64);
        assert_eq!(fp64_to_u64_ties_away((-1.0f64).to_bits()), 0);
        assert_eq!(fp32_to_s32_ties_away(1e30f32.to_bits() as u64), i32::MAX as u32 as u64);
    }

    #[test]
    fn nan_converts_to_zero() {
        assert_eq!(fp64_to_s64_ties_away(f64::NAN.to_bits()), 0);
        assert_eq!(fp32_to_u32_ties_away(f32::NAN.to_bits() as u64), 0);
    }
}
