use dynarm_ir::{Block, InstId, Location, Opcode, Value};
use dynarm_types::{IrType, MemoryProbe};

/// Pipeline step 4: a memory read whose address is a compile-time
/// constant and which falls inside a region the embedder has declared
/// read-only is folded to the literal byte(s) observed right now. Safe
/// only because such regions are contractually immutable for the lifetime
/// of compiled code; anything else keeps reading live guest memory.
pub fn run<L: Location>(block: &mut Block<L>, probe: &dyn MemoryProbe) {
    let len = block.insts().len();
    for i in 0..len {
        let id = InstId(i as u32);
        let (opcode, vaddr) = {
            let inst = block.inst(id);
            let vaddr = match (inst.opcode, inst.args.first()) {
                (
                    Opcode::ReadMemory8 | Opcode::ReadMemory16 | Opcode::ReadMemory32 | Opcode::ReadMemory64,
                    Some(Value::ImmU64(addr)),
                ) => Some(*addr),
                _ => None,
            };
            (inst.opcode, vaddr)
        };
        let Some(vaddr) = vaddr else { continue };
        if !probe.is_read_only_memory(vaddr) {
            continue;
        }
        let folded = match opcode {
            Opcode::ReadMemory8 => (IrType::U8, probe.memory_read_8(vaddr) as u128),
            Opcode::ReadMemory16 => (IrType::U16, probe.memory_read_16(vaddr) as u128),
            Opcode::ReadMemory32 => (IrType::U32, probe.memory_read_32(vaddr) as u128),
            Opcode::ReadMemory64 => (IrType::U64, probe.memory_read_64(vaddr) as u128),
            _ => unreachable!("vaddr is only Some(_) for the four read opcodes matched above"),
        };
        replace_with_immediate(block, id, folded.0, folded.1);
    }
}

fn replace_with_immediate<L: Location>(block: &mut Block<L>, id: InstId, ty: IrType, bits: u128) {
    let imm = match ty {
        IrType::U8 => Value::ImmU8(bits as u8),
        IrType::U16 => Value::ImmU16(bits as u16),
        IrType::U32 => Value::ImmU32(bits as u32),
        IrType::U64 => Value::ImmU64(bits as u64),
        _ => unreachable!("constant memory reads only ever fold to an integer width"),
    };
    super::constant_fold::replace_all_uses_with_immediate(block, id, imm);
}
