use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::PrimaryMap;

use super::block::{Block, BlockId};
use super::inst::{Inst, InstId};
use super::value::{Value, ValueId};

/// A function: blocks, instructions, and values in entity arenas, plus the
/// entry block.
///
/// Arenas are append-only; unreachable blocks are cleared to stubs rather
/// than removed, so ids held by the host stay valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub blocks: PrimaryMap<BlockId, Block>,
    pub insts: PrimaryMap<InstId, Inst>,
    pub values: PrimaryMap<ValueId, Value>,
    pub entry: BlockId,
}

impl Function {
    /// Allocate an undef placeholder value.
    pub fn undef_value(&mut self) -> ValueId {
        self.values.push(Value::undef())
    }

    /// Allocate a named synthetic value (ladder phis, dispatch selectors).
    pub fn synth_value(&mut self, name: impl Into<String>) -> ValueId {
        self.values.push(Value::opaque(name))
    }

    /// Blocks reachable from the entry via terminator edges.
    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut reachable = HashSet::new();
        let mut worklist = vec![self.entry];
        reachable.insert(self.entry);
        while let Some(block) = worklist.pop() {
            if let Some(term) = &self.blocks[block].terminator {
                for target in term.targets() {
                    if reachable.insert(target) {
                        worklist.push(target);
                    }
                }
            }
        }
        reachable
    }
}
