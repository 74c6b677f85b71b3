use std::collections::HashMap;

use dynarm_ir::{Block, InstId, Location, Value};

use super::{get_slot, set_slot, slots_alias, SlotKey};

/// Pipeline step 2. A single linear scan that:
/// - replaces every reference to a `Get*` result with the value already
///   known for that slot (from an earlier `Set*`, or from an earlier `Get*`
///   of the same slot), leaving the `Get*` itself dead for [`super::dce`];
/// - drops every `Set*` that is immediately superseded by a later `Set*`
///   to the same slot with nothing observable in between;
/// - treats any other side-effecting instruction as a barrier: every
///   in-flight write is kept live and every slot's cached value is
///   forgotten, so a later `Get*` re-reads and a later `Set*` starts a
///   fresh elimination chain.
pub fn run<L: Location>(block: &mut Block<L>) {
    let mut current_value: HashMap<SlotKey, Value> = HashMap::new();
    let mut last_set: HashMap<SlotKey, InstId> = HashMap::new();
    // Slot read by each `Get*` instruction seen so far, so the terminator
    // pass at the end can substitute without re-borrowing `block` to look
    // the opcode back up.
    let mut get_slot_of: HashMap<InstId, SlotKey> = HashMap::new();

    let len = block.insts().len();
    for i in 0..len {
        let id = InstId(i as u32);

        // Forward-substitute any argument that is a reference to an
        // earlier `Get*` whose slot value is already known.
        let arg_count = block.inst(id).args.len();
        for idx in 0..arg_count {
            if let Value::Ref(src) = block.inst(id).args[idx] {
                if let Some(slot) = get_slot_of.get(&src).copied() {
                    if let Some(&replacement) = current_value.get(&slot) {
                        block.rewrite_arg(id, idx, replacement);
                    }
                }
            }
        }

        let opcode = block.inst(id).opcode;
        if let Some(slot) = get_slot(block.inst(id)) {
            // An access through one register view invalidates what we knew
            // about its aliasing views (the W half of an X register, the
            // S/D/Q lanes of one vector register), but leaves their
            // surviving writes in place.
            current_value.retain(|&k, _| !slots_alias(k, slot));
            last_set.retain(|&k, _| !slots_alias(k, slot));
            get_slot_of.insert(id, slot);
            current_value.entry(slot).or_insert(Value::Ref(id));
            continue;
        }
        if let Some((slot, value)) = set_slot(block.inst(id)) {
            current_value.retain(|&k, _| !slots_alias(k, slot));
            last_set.retain(|&k, _| !slots_alias(k, slot));
            // Writing back exactly what is already known to be there (most
            // commonly a `Set(slot, Get(slot))` roundtrip once the `Get` has
            // been substituted above) has no observable effect.
            if current_value.get(&slot) == Some(&value) {
                block.remove(id);
                continue;
            }
            if let Some(prev) = last_set.insert(slot, id) {
                block.remove(prev);
            }
            current_value.insert(slot, value);
            continue;
        }
        if opcode.has_side_effect() {
            current_value.clear();
            last_set.clear();
        }
    }

    // A terminator referencing a `Get*` result directly (e.g. the NZCV
    // operand of an `If`) needs the same forward substitution.
    block.rewrite_terminator_values(&mut |v| match v {
        Value::Ref(src) => get_slot_of
            .get(&src)
            .and_then(|slot| current_value.get(slot).copied())
            .unwrap_or(v),
        other => other,
    });
}
