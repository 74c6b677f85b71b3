use dynarm_ir::{Block, Inst, InstId, Location, Opcode, Value};

/// Pipeline step 5. Folds any `is_pure()` opcode whose arguments are all
/// immediates to a single immediate result, then forward-substitutes that
/// result at every use site the way [`super::get_set_elimination`] does.
///
/// `GetCarryFromOp`/`GetOverflowFromOp`/`GetNZFromOp`/`GetNZCVFromOp` take a
/// `Ref` to their producing arithmetic op as their *only* argument, so they
/// can never themselves have an all-immediate argument list — their edge to
/// the producer is left untouched here, which is exactly what keeps a
/// constant-folded `AddWithCarry32` from losing the use that the flag
/// extraction still needs.
pub fn run<L: Location>(block: &mut Block<L>) {
    let len = block.insts().len();
    for i in 0..len {
        let id = InstId(i as u32);
        let inst = block.inst(id);
        if !inst.opcode.is_pure() {
            continue;
        }
        if inst.args.iter().any(|a| !a.is_immediate()) {
            continue;
        }
        // A flag-extraction consumer reads the *host flags* its producer
        // leaves behind, which an immediate cannot reproduce; such
        // producers keep their virtual use and stay unfolded.
        if has_flag_consumer(block, id) {
            continue;
        }
        if let Some(folded) = fold(inst) {
            replace_all_uses_with_immediate(block, id, folded);
        }
    }
}

fn has_flag_consumer<L: Location>(block: &Block<L>, producer: InstId) -> bool {
    block.insts().iter().any(|inst| {
        matches!(
            inst.opcode,
            Opcode::GetCarryFromOp
                | Opcode::GetOverflowFromOp
                | Opcode::GetNZFromOp
                | Opcode::GetNZCVFromOp
        ) && inst.args.first() == Some(&Value::Ref(producer))
    })
}

/// Evaluate a pure opcode over all-immediate arguments. Widths not
/// represented by an `Imm*` bit pattern (flags, opaque conditions, table
/// references) are never `is_pure()` producers with useful immediate
/// folding here and fall through to `None`, leaving the instruction in
/// place for the backend to lower directly.
fn fold(inst: &Inst) -> Option<Value> {
    let bits: Vec<u128> = inst
        .args
        .iter()
        .map(|a| a.immediate_bits())
        .collect::<Option<_>>()?;
    match inst.opcode {
        Opcode::Add32 => Some(Value::ImmU32((bits[0] as u32).wrapping_add(bits[1] as u32))),
        Opcode::Add64 => Some(Value::ImmU64((bits[0] as u64).wrapping_add(bits[1] as u64))),
        Opcode::Sub32 => Some(Value::ImmU32((bits[0] as u32).wrapping_sub(bits[1] as u32))),
        Opcode::Sub64 => Some(Value::ImmU64((bits[0] as u64).wrapping_sub(bits[1] as u64))),
        Opcode::Mul32 => Some(Value::ImmU32((bits[0] as u32).wrapping_mul(bits[1] as u32))),
        Opcode::Mul64 => Some(Value::ImmU64((bits[0] as u64).wrapping_mul(bits[1] as u64))),
        Opcode::And32 => Some(Value::ImmU32(bits[0] as u32 & bits[1] as u32)),
        Opcode::And64 => Some(Value::ImmU64(bits[0] as u64 & bits[1] as u64)),
        Opcode::Or32 => Some(Value::ImmU32(bits[0] as u32 | bits[1] as u32)),
        Opcode::Or64 => Some(Value::ImmU64(bits[0] as u64 | bits[1] as u64)),
        Opcode::Eor32 => Some(Value::ImmU32(bits[0] as u32 ^ bits[1] as u32)),
        Opcode::Eor64 => Some(Value::ImmU64(bits[0] as u64 ^ bits[1] as u64)),
        Opcode::Not32 => Some(Value::ImmU32(!(bits[0] as u32))),
        Opcode::Not64 => Some(Value::ImmU64(!(bits[0] as u64))),
        Opcode::LogicalShiftLeft32 => {
            Some(Value::ImmU32((bits[0] as u32).wrapping_shl(bits[1] as u32)))
        }
        Opcode::LogicalShiftLeft64 => {
            Some(Value::ImmU64((bits[0] as u64).wrapping_shl(bits[1] as u32)))
        }
        Opcode::LogicalShiftRight32 => {
            Some(Value::ImmU32((bits[0] as u32).wrapping_shr(bits[1] as u32)))
        }
        Opcode::LogicalShiftRight64 => {
            Some(Value::ImmU64((bits[0] as u64).wrapping_shr(bits[1] as u32)))
        }
        Opcode::ArithShiftRight32 => {
            Some(Value::ImmU32(((bits[0] as u32 as i32).wrapping_shr(bits[1] as u32)) as u32))
        }
        Opcode::ArithShiftRight64 => {
            Some(Value::ImmU64(((bits[0] as u64 as i64).wrapping_shr(bits[1] as u32)) as u64))
        }
        Opcode::RotateRight32 => {
            Some(Value::ImmU32((bits[0] as u32).rotate_right(bits[1] as u32)))
        }
        Opcode::RotateRight64 => {
            Some(Value::ImmU64((bits[0] as u64).rotate_right(bits[1] as u32)))
        }
        Opcode::ZeroExtendToWord => Some(Value::ImmU32(bits[0] as u32)),
        Opcode::ZeroExtendToLong => Some(Value::ImmU64(bits[0] as u64)),
        Opcode::SignExtendToWord => Some(Value::ImmU32(bits[0] as u16 as i16 as i32 as u32)),
        Opcode::SignExtendToLong => Some(Value::ImmU64(bits[0] as u32 as i32 as i64 as u64)),
        Opcode::LeastSignificantByte => Some(Value::ImmU8(bits[0] as u8)),
        Opcode::LeastSignificantHalf => Some(Value::ImmU16(bits[0] as u16)),
        Opcode::LeastSignificantWord => Some(Value::ImmU32(bits[0] as u32)),
        Opcode::MostSignificantBit => Some(Value::ImmU1((bits[0] >> 31) & 1 != 0)),
        Opcode::IsZero32 => Some(Value::ImmU1(bits[0] as u32 == 0)),
        Opcode::IsZero64 => Some(Value::ImmU1(bits[0] as u64 == 0)),
        _ => None,
    }
}

/// Replace every use of `target`'s result throughout the block (and its
/// terminator) with `imm`, then drop `target` itself (now unreferenced) so
/// a single fold pays for its own cleanup instead of waiting on a separate
/// DCE pass to notice a zero use count.
pub(super) fn replace_all_uses_with_immediate<L: Location>(
    block: &mut Block<L>,
    target: InstId,
    imm: Value,
) {
    let len = block.insts().len();
    for i in 0..len {
        let id = InstId(i as u32);
        if id == target {
            continue;
        }
        let arg_count = block.inst(id).args.len();
        for idx in 0..arg_count {
            if block.inst(id).args[idx] == Value::Ref(target) {
                block.rewrite_arg(id, idx, imm);
            }
        }
    }
    block.rewrite_terminator_values(&mut |v| if v == Value::Ref(target) { imm } else { v });
    if block.inst(target).is_dead() {
        block.remove(target);
    }
}
