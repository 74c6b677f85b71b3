use dynarm_ir::{Block, Terminator};
use dynarm_types::A64LocationDescriptor;

/// Pipeline step 7, A64-only. A block whose only content is a single
/// `Interpret` terminator back to its own entry location is pointless to
/// keep cached on its own — every dispatch through it pays the block-cache
/// lookup just to immediately fall back to the interpreter. Folded into
/// `ReturnToDispatch` with the interpret decision pushed to the dispatcher,
/// which already knows how to invoke the interpreter fallback for a miss
///.
///
/// A32 has no equivalent pass: its interpreter fallback is reached through
/// `UndefinedInstruction`/`UnpredictableInstruction` handling inside
/// translation itself rather than a dedicated `Interpret` terminator shape,
/// so there is nothing here for it to merge.
pub fn run(block: &mut Block<A64LocationDescriptor>) {
    let is_bare_self_interpret = block.insts().is_empty()
        && matches!(block.terminator(), Some(Terminator::Interpret(loc)) if *loc == block.location);
    if is_bare_self_interpret {
        if let Some(term) = block.terminator_mut() {
            *term = Terminator::ReturnToDispatch;
        }
    }
}
