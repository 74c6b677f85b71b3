use dynarm_ir::{opcode::slot_accepts, Block, InstId, Location, Value, MAX_TERMINATOR_DEPTH};
use thiserror::Error;

use super::dce::use_counts_are_exact;

/// The last stage of the fixed pipeline. Failure here means an
/// earlier pass broke a well-formedness invariant the rest of the system
/// assumes holds unconditionally; the pipeline treats it as a
/// translator bug, not a recoverable condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("block has no terminator after the optimizer pipeline ran")]
    MissingTerminator,
    #[error("terminator nesting depth {0} exceeds the maximum of {MAX_TERMINATOR_DEPTH}")]
    TerminatorTooDeep(usize),
    #[error("instruction use counts do not match the number of live references")]
    UseCountMismatch,
    #[error("instruction {inst:?} has {actual} arguments, opcode declares {declared}")]
    ArityMismatch {
        inst: InstId,
        declared: usize,
        actual: usize,
    },
    #[error("argument {arg} of instruction {inst:?} has an incompatible type")]
    TypeMismatch { inst: InstId, arg: usize },
    #[error("argument {arg} of instruction {inst:?} references a later instruction")]
    UseBeforeDef { inst: InstId, arg: usize },
}

pub fn run<L: Location>(block: &Block<L>) -> Result<(), VerificationError> {
    let Some(term) = block.terminator() else {
        return Err(VerificationError::MissingTerminator);
    };
    let depth = term.depth();
    if depth > MAX_TERMINATOR_DEPTH {
        return Err(VerificationError::TerminatorTooDeep(depth));
    }
    for (i, inst) in block.insts().iter().enumerate() {
        let id = InstId(i as u32);
        let declared = inst.opcode.arg_types();
        if declared.len() != inst.args.len() {
            return Err(VerificationError::ArityMismatch {
                inst: id,
                declared: declared.len(),
                actual: inst.args.len(),
            });
        }
        for (k, (&arg, &expected)) in inst.args.iter().zip(declared).enumerate() {
            let actual = match arg {
                Value::Ref(src) => {
                    // Straight-line blocks make dominance a simple index
                    // comparison.
                    if src >= id {
                        return Err(VerificationError::UseBeforeDef { inst: id, arg: k });
                    }
                    block.inst(src).opcode.info().ret
                }
                imm => imm
                    .immediate_type()
                    .expect("non-Ref values always carry an immediate type"),
            };
            if !slot_accepts(expected, actual) {
                return Err(VerificationError::TypeMismatch { inst: id, arg: k });
            }
        }
    }
    if !use_counts_are_exact(block) {
        return Err(VerificationError::UseCountMismatch);
    }
    Ok(())
}
