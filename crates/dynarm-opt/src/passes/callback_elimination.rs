use dynarm_ir::{Block, Inst, InstId, Location, Opcode, Value};

/// The `DataCacheOperationRaised` op-kind encoding meaning "zero by
/// address" (DC ZVA). Other encodings (clean, invalidate,
/// clean-and-invalidate) are always left alone — zeroing is the only
/// variant with memory-level semantics simple enough to lower without
/// modelling the embedder's actual cache hierarchy.
const DC_ZVA: u8 = 0;

/// Pipeline step 1. A `DataCacheOperationRaised(ZeroByVA, addr)` is
/// lowered to a direct `ZeroMemoryBlock` when the embedder has *not*
/// asked to be hooked for cache maintenance; every other op kind, and ZVA
/// itself when hooking is requested, is left untouched for the backend's
/// normal lowering to a `data_cache_operation_raised`/
/// `instruction_cache_operation_raised` callback. Both architectures
/// carry the same hooking knob, so one pass covers both.
pub fn run<L: Location>(block: &mut Block<L>, hook_data_cache_operations: bool) {
    if hook_data_cache_operations {
        return;
    }
    let len = block.insts().len();
    for i in 0..len {
        let id = InstId(i as u32);
        let inst = block.inst(id);
        if !matches!(
            inst.opcode,
            Opcode::A32DataCacheOperationRaised | Opcode::A64DataCacheOperationRaised
        ) {
            continue;
        }
        let (Some(Value::ImmU8(DC_ZVA)), Some(&vaddr), Some(Value::ImmU32(block_size))) =
            (inst.args.first().copied(), inst.args.get(1), inst.args.get(2).copied())
        else {
            continue;
        };
        replace_in_place(
            block,
            id,
            Opcode::ZeroMemoryBlock,
            vec![vaddr, Value::ImmU32(block_size)],
        );
    }
}

/// Swap the opcode and argument list of `id` in place, preserving its
/// `InstId` (other instructions may already reference it) and keeping use
/// counts exact: every `Ref` among the old arguments loses a use, every
/// `Ref` among the new arguments gains one.
fn replace_in_place<L: Location>(block: &mut Block<L>, id: InstId, opcode: Opcode, args: Vec<Value>) {
    let old_args = std::mem::take(&mut block.insts_mut()[id.0 as usize].args);
    for a in old_args {
        if let Value::Ref(arg_id) = a {
            block.inst(arg_id).remove_use();
        }
    }
    for a in &args {
        if let Value::Ref(arg_id) = a {
            block.inst(*arg_id).add_use();
        }
    }
    block.insts_mut()[id.0 as usize] = Inst::new(opcode, args);
}
