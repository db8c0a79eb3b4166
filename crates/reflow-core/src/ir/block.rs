use serde::{Deserialize, Serialize};

use crate::define_entity;

use super::inst::InstId;
use super::value::ValueId;

define_entity!(BlockId);

/// A basic block.
///
/// `terminator` is `None` only while a block is under construction; a block
/// reaching the structurizer without one is rejected as unsupported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub phis: Vec<Phi<BlockId>>,
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator<BlockId>>,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phis: Vec::new(),
            insts: Vec::new(),
            terminator: None,
        }
    }

    /// Whether the block has been emptied out (unreachable blocks are
    /// cleared rather than removed — the arena is append-only).
    pub fn is_stub(&self) -> bool {
        self.phis.is_empty() && self.insts.is_empty() && self.terminator.is_none()
    }
}

/// Block terminators, generic over the block-reference type so the same
/// shape serves the host IR (`BlockId`) and the structurizer (`NodeId`).
///
/// For `Condition`, target order matters: `true_target` is successor 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator<L> {
    /// Unconditional branch.
    Branch { target: L },
    /// Two-way conditional branch.
    Condition {
        cond: ValueId,
        true_target: L,
        false_target: L,
    },
    /// Multi-way switch. The default arm is a case with `is_default` set.
    Switch {
        selector: ValueId,
        cases: Vec<SwitchCase<L>>,
    },
    /// Return from the function.
    Return { value: Option<ValueId> },
    /// Dead end.
    Unreachable,
    /// Fragment discard.
    Kill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase<L> {
    pub value: i64,
    pub target: L,
    pub is_default: bool,
}

impl<L: Copy + PartialEq> Terminator<L> {
    /// All branch targets, in successor order. Empty for exits.
    pub fn targets(&self) -> Vec<L> {
        match self {
            Terminator::Branch { target } => vec![*target],
            Terminator::Condition {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            Terminator::Switch { cases, .. } => cases.iter().map(|c| c.target).collect(),
            Terminator::Return { .. } | Terminator::Unreachable | Terminator::Kill => vec![],
        }
    }

    /// Replace every occurrence of `old` among the targets with `new`.
    /// Returns the number of rewritten targets.
    pub fn retarget(&mut self, old: L, new: L) -> usize {
        let mut count = 0;
        let mut rep = |t: &mut L| {
            if *t == old {
                *t = new;
                count += 1;
            }
        };
        match self {
            Terminator::Branch { target } => rep(target),
            Terminator::Condition {
                true_target,
                false_target,
                ..
            } => {
                rep(true_target);
                rep(false_target);
            }
            Terminator::Switch { cases, .. } => {
                for case in cases {
                    rep(&mut case.target);
                }
            }
            Terminator::Return { .. } | Terminator::Unreachable | Terminator::Kill => {}
        }
        count
    }

    /// Whether this terminator ends the function (joins the virtual exit).
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            Terminator::Return { .. } | Terminator::Unreachable | Terminator::Kill
        )
    }

    /// Translate the target type, preserving everything else.
    pub fn map_targets<M>(&self, mut f: impl FnMut(L) -> M) -> Terminator<M> {
        match self {
            Terminator::Branch { target } => Terminator::Branch { target: f(*target) },
            Terminator::Condition {
                cond,
                true_target,
                false_target,
            } => Terminator::Condition {
                cond: *cond,
                true_target: f(*true_target),
                false_target: f(*false_target),
            },
            Terminator::Switch { selector, cases } => Terminator::Switch {
                selector: *selector,
                cases: cases
                    .iter()
                    .map(|c| SwitchCase {
                        value: c.value,
                        target: f(c.target),
                        is_default: c.is_default,
                    })
                    .collect(),
            },
            Terminator::Return { value } => Terminator::Return { value: *value },
            Terminator::Unreachable => Terminator::Unreachable,
            Terminator::Kill => Terminator::Kill,
        }
    }
}

/// A phi record: `result` selects `value` according to the incoming edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phi<L> {
    pub result: ValueId,
    pub incoming: Vec<Incoming<L>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Incoming<L> {
    pub block: L,
    pub value: ValueId,
}

impl<L: Copy + PartialEq> Phi<L> {
    /// The incoming value for `block`, if one is recorded.
    pub fn value_for(&self, block: L) -> Option<ValueId> {
        self.incoming
            .iter()
            .find(|inc| inc.block == block)
            .map(|inc| inc.value)
    }

    pub fn map_blocks<M>(&self, mut f: impl FnMut(L) -> M) -> Phi<M> {
        Phi {
            result: self.result,
            incoming: self
                .incoming
                .iter()
                .map(|inc| Incoming {
                    block: f(inc.block),
                    value: inc.value,
                })
                .collect(),
        }
    }
}
