use dynarm_ir::{Block, InstId, Location, Value};

/// Pipeline steps 3 and 6. Repeatedly removes instructions with a zero use
/// count and no side effect until a full sweep removes nothing, so a chain
/// of producers (an `Add32` feeding a now-dead `Get`, itself feeding another
/// dead producer) collapses in one call instead of needing the pipeline to
/// re-invoke the pass by hand.
pub fn run<L: Location>(block: &mut Block<L>) {
    loop {
        let mut removed_any = false;
        let len = block.insts().len();
        for i in 0..len {
            let id = InstId(i as u32);
            if block.inst(id).is_dead() {
                block.remove(id);
                removed_any = true;
            }
        }
        if !removed_any {
            break;
        }
    }
}

/// True if nothing in `block` in its current form has a use count that
/// doesn't match the number of live references actually present — used by
/// [`super::verify`] rather than by this pass itself.
pub fn use_counts_are_exact<L: Location>(block: &Block<L>) -> bool {
    let mut observed = vec![0u32; block.insts().len()];
    for inst in block.insts() {
        for arg in &inst.args {
            if let Value::Ref(id) = arg {
                observed[id.0 as usize] += 1;
            }
        }
    }
    if let Some(term) = block.terminator() {
        term.clone().rewrite_values(&mut |v| {
            if let Value::Ref(id) = v {
                observed[id.0 as usize] += 1;
            }
            v
        });
    }
    block
        .insts()
        .iter()
        .zip(observed.iter())
        .all(|(inst, &count)| inst.use_count() == count)
}
