//! Property tests for the exact-use-count invariant: however a block is
//! built up through the emitter, every instruction's stored use count
//! equals the number of live references to it.

use dynarm_ir::{IrEmitter, Opcode, Terminator, Value};
use dynarm_types::A64LocationDescriptor;
use proptest::prelude::*;

fn loc() -> A64LocationDescriptor {
    A64LocationDescriptor::new(0x4000, 0, false)
}

/// A tiny emission program: each step either introduces a fresh immediate
/// chain or combines two earlier results chosen by index.
#[derive(Debug, Clone)]
enum Step {
    Fresh(u32),
    Combine(usize, usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<u32>().prop_map(Step::Fresh),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Step::Combine(a, b)),
    ]
}

fn count_uses(block: &dynarm_ir::Block<A64LocationDescriptor>) -> Vec<u32> {
    let mut observed = vec![0u32; block.insts().len()];
    for inst in block.insts() {
        for arg in &inst.args {
            if let Value::Ref(id) = arg {
                observed[id.0 as usize] += 1;
            }
        }
    }
    observed
}

proptest! {
    #[test]
    fn use_counts_stay_exact_under_arbitrary_emission(
        steps in prop::collection::vec(step_strategy(), 1..40)
    ) {
        let mut em = IrEmitter::new(loc());
        let mut values: Vec<Value> = Vec::new();
        for step in steps {
            let v = match step {
                Step::Fresh(imm) => em.add32(Value::ImmU32(imm), Value::ImmU32(1)),
                Step::Combine(a, b) => {
                    if values.is_empty() {
                        em.add32(Value::ImmU32(0), Value::ImmU32(0))
                    } else {
                        let x = values[a % values.len()];
                        let y = values[b % values.len()];
                        em.add32(x, y)
                    }
                }
            };
            values.push(v);
        }
        em.set_terminator(Terminator::ReturnToDispatch);
        let block = em.finish();

        let observed = count_uses(&block);
        for (inst, expected) in block.insts().iter().zip(observed) {
            prop_assert_eq!(inst.use_count(), expected);
        }
    }

    #[test]
    fn removal_keeps_the_remaining_counts_exact(
        imms in prop::collection::vec(any::<u32>(), 2..20),
        victim in any::<usize>(),
    ) {
        let mut em = IrEmitter::new(loc());
        let mut last = em.add32(Value::ImmU32(imms[0]), Value::ImmU32(1));
        for &imm in &imms[1..] {
            last = em.add32(last, Value::ImmU32(imm));
        }
        em.set_terminator(Terminator::ReturnToDispatch);
        let mut block = em.finish();

        // Remove one zero-use instruction if any exists (only the chain
        // head qualifies once built; the tail always has zero uses).
        let len = block.insts().len();
        let candidate = dynarm_ir::InstId(((victim % len) as u32).min(len as u32 - 1));
        if block.inst(candidate).use_count() == 0 {
            block.remove(candidate);
            prop_assert_eq!(block.inst(candidate).opcode, Opcode::Nop);
        }
        let observed = count_uses(&block);
        for (inst, expected) in block.insts().iter().zip(observed) {
            prop_assert_eq!(inst.use_count(), expected);
        }
    }
}
