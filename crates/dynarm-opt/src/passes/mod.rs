pub mod a64_merge_interpret;
pub mod callback_elimination;
pub mod constant_fold;
pub mod constant_memory_reads;
pub mod dce;
pub mod get_set_elimination;
pub mod verify;

use dynarm_ir::{Inst, Opcode, Value};
use dynarm_types::{A32ExtReg, A32Reg, A64Reg, A64Vec};

/// The guest-visible storage location a `Get*`/`Set*` opcode pair accesses.
/// Shared by [`get_set_elimination`] to key its "current value per slot"
/// map; intentionally covers both architectures' register files, the
/// flag/CPSR/NZCV pseudo-slots, and the `CheckBit` scratch bit, since a
/// single block only ever contains one architecture's opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    A32Reg(A32Reg),
    A32Cpsr,
    A32ExtReg(A32ExtReg),
    A32CheckBit,
    A64Reg(A64Reg),
    A64RegW(A64Reg),
    A64Sp,
    A64Pc,
    A64Nzcv,
    A64CheckBit,
    A64VecS(A64Vec),
    A64VecD(A64Vec),
    A64VecQ(A64Vec),
}

/// Whether two *distinct* slot keys can observe each other's storage: the
/// W view of an X register, and the S/D/Q views of one vector register. An
/// access through one view must make the elimination pass forget what it
/// knew about the others (but never delete their surviving writes).
pub fn slots_alias(a: SlotKey, b: SlotKey) -> bool {
    if a == b {
        return false;
    }
    match (a, b) {
        (SlotKey::A64Reg(x), SlotKey::A64RegW(y))
        | (SlotKey::A64RegW(x), SlotKey::A64Reg(y)) => x == y,
        (
            SlotKey::A64VecS(x) | SlotKey::A64VecD(x) | SlotKey::A64VecQ(x),
            SlotKey::A64VecS(y) | SlotKey::A64VecD(y) | SlotKey::A64VecQ(y),
        ) => x == y,
        _ => false,
    }
}

/// If `inst` is a `Get*` opcode for a modeled slot, the slot it reads.
pub fn get_slot(inst: &Inst) -> Option<SlotKey> {
    match inst.opcode {
        Opcode::A32GetRegister => match inst.args[0] {
            Value::ImmA32Reg(r) => Some(SlotKey::A32Reg(r)),
            _ => None,
        },
        Opcode::A32GetCpsr => Some(SlotKey::A32Cpsr),
        Opcode::A32GetExtRegU32 => match inst.args[0] {
            Value::ImmA32ExtReg(r) => Some(SlotKey::A32ExtReg(r)),
            _ => None,
        },
        Opcode::A32GetCheckBit => Some(SlotKey::A32CheckBit),
        Opcode::A64GetX => match inst.args[0] {
            Value::ImmA64Reg(r) => Some(SlotKey::A64Reg(r)),
            _ => None,
        },
        Opcode::A64GetW => match inst.args[0] {
            Value::ImmA64Reg(r) => Some(SlotKey::A64RegW(r)),
            _ => None,
        },
        Opcode::A64GetS => match inst.args[0] {
            Value::ImmA64Vec(v) => Some(SlotKey::A64VecS(v)),
            _ => None,
        },
        Opcode::A64GetD => match inst.args[0] {
            Value::ImmA64Vec(v) => Some(SlotKey::A64VecD(v)),
            _ => None,
        },
        Opcode::A64GetQ => match inst.args[0] {
            Value::ImmA64Vec(v) => Some(SlotKey::A64VecQ(v)),
            _ => None,
        },
        Opcode::A64GetSP => Some(SlotKey::A64Sp),
        Opcode::A64GetPC => Some(SlotKey::A64Pc),
        Opcode::A64GetNZCVRaw => Some(SlotKey::A64Nzcv),
        Opcode::A64GetCheckBit => Some(SlotKey::A64CheckBit),
        _ => None,
    }
}

/// If `inst` is a `Set*` opcode for a modeled slot, the slot it writes and
/// the value being written (the argument that should replace future
/// matching `Get*`s).
pub fn set_slot(inst: &Inst) -> Option<(SlotKey, Value)> {
    match inst.opcode {
        Opcode::A32SetRegister => match inst.args[0] {
            Value::ImmA32Reg(r) => Some((SlotKey::A32Reg(r), inst.args[1])),
            _ => None,
        },
        Opcode::A32SetCpsr => Some((SlotKey::A32Cpsr, inst.args[0])),
        Opcode::A32SetExtRegU32 => match inst.args[0] {
            Value::ImmA32ExtReg(r) => Some((SlotKey::A32ExtReg(r), inst.args[1])),
            _ => None,
        },
        Opcode::A32SetCheckBit => Some((SlotKey::A32CheckBit, inst.args[0])),
        Opcode::A64SetX => match inst.args[0] {
            Value::ImmA64Reg(r) => Some((SlotKey::A64Reg(r), inst.args[1])),
            _ => None,
        },
        Opcode::A64SetW => match inst.args[0] {
            Value::ImmA64Reg(r) => Some((SlotKey::A64RegW(r), inst.args[1])),
            _ => None,
        },
        Opcode::A64SetS => match inst.args[0] {
            Value::ImmA64Vec(v) => Some((SlotKey::A64VecS(v), inst.args[1])),
            _ => None,
        },
        Opcode::A64SetD => match inst.args[0] {
            Value::ImmA64Vec(v) => Some((SlotKey::A64VecD(v), inst.args[1])),
            _ => None,
        },
        Opcode::A64SetQ => match inst.args[0] {
            Value::ImmA64Vec(v) => Some((SlotKey::A64VecQ(v), inst.args[1])),
            _ => None,
        },
        Opcode::A64SetSP => Some((SlotKey::A64Sp, inst.args[0])),
        Opcode::A64SetPC => Some((SlotKey::A64Pc, inst.args[0])),
        Opcode::A64SetNZCVRaw => Some((SlotKey::A64Nzcv, inst.args[0])),
        Opcode::A64SetCheckBit => Some((SlotKey::A64CheckBit, inst.args[0])),
        _ => None,
    }
}
