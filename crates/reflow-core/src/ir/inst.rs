use serde::{Deserialize, Serialize};

use crate::define_entity;

use super::block::BlockId;
use super::value::ValueId;

define_entity!(InstId);

/// An instruction: an operation with an optional result value.
///
/// The structurizer never inspects `Opaque` payloads — it only preserves
/// their order along every execution path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inst {
    pub op: Op,
    /// The value produced by this instruction, if any.
    pub result: Option<ValueId>,
}

/// Instruction payloads.
///
/// `Opaque` is the host's instruction, carried through unmodified. The
/// remaining variants are synthetic markers injected at emission time to
/// describe the structured shape; they are stripped again on import so a
/// second structurization round starts from a clean slate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Host instruction — pass-through.
    Opaque {
        mnemonic: String,
        args: Vec<ValueId>,
    },
    /// Fragment discard call, paired with a `Kill` terminator.
    Discard,
    /// `selection_merge(merge)` at a selection header's terminator.
    SelectionMerge { merge: BlockId },
    /// `loop_merge(merge, continue)` at a loop header's terminator.
    LoopMerge {
        merge: BlockId,
        continue_block: BlockId,
    },
    /// Marks the first position of a merge target block.
    MergeBlockMarker,
    /// Marks the first position of a continue target block.
    ContinueBlockMarker,
}

impl Op {
    /// Whether this op is a structurizer-injected annotation.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            Op::SelectionMerge { .. }
                | Op::LoopMerge { .. }
                | Op::MergeBlockMarker
                | Op::ContinueBlockMarker
        )
    }
}
