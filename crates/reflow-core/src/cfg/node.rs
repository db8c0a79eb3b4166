use crate::define_entity;
use crate::ir::{BlockId, InstId, Phi, Terminator};

define_entity!(NodeId);

/// Kind of structured-control-flow annotation a node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeType {
    #[default]
    None,
    Selection,
    Loop,
}

/// The portion of a node that mirrors the host block: pass-through
/// operations, phi records, and the terminator (retargeted to node ids).
#[derive(Debug, Clone)]
pub struct NodeIr {
    pub operations: Vec<InstId>,
    pub phis: Vec<Phi<NodeId>>,
    pub terminator: Terminator<NodeId>,
}

/// One basic block as the structurizer sees it.
///
/// `preds`/`succs` mirror the terminator edges exactly (including edges
/// later classified as back-edges); the back-edge slots are annotations
/// refreshed by each traversal, not a separate edge store.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// The host block this node was imported from; `None` for nodes the
    /// structurizer synthesized.
    pub host_block: Option<BlockId>,

    pub preds: Vec<NodeId>,
    pub succs: Vec<NodeId>,
    pub pred_back_edges: Vec<NodeId>,
    pub succ_back_edges: Vec<NodeId>,

    pub merge: MergeType,
    /// Loop merge target. `None` on an infinite loop until emission
    /// synthesizes an unreachable merge.
    pub loop_merge_block: Option<NodeId>,
    pub loop_continue_block: Option<NodeId>,
    /// Selection merge target, possibly absent when every arm exits.
    pub selection_merge_block: Option<NodeId>,
    pub selection_merge_exit: bool,

    pub immediate_dominator: Option<NodeId>,
    pub immediate_post_dominator: Option<NodeId>,
    pub forward_post_visit_index: u32,
    pub backward_post_visit_index: u32,
    pub dom_depth: u32,
    pub pdom_depth: u32,

    /// Replacement predecessor consulted at emission when this node was
    /// logically split and downstream phis must reference the new tail.
    pub phi_override: Option<BlockId>,

    /// Set on synthesized funnel blocks. Merge selection must not step past
    /// a ladder even though it carries no operations.
    pub is_ladder: bool,

    pub ir: NodeIr,
}

pub const UNVISITED: u32 = u32::MAX;

impl Node {
    pub fn new(name: impl Into<String>, host_block: Option<BlockId>) -> Self {
        Self {
            name: name.into(),
            host_block,
            preds: Vec::new(),
            succs: Vec::new(),
            pred_back_edges: Vec::new(),
            succ_back_edges: Vec::new(),
            merge: MergeType::None,
            loop_merge_block: None,
            loop_continue_block: None,
            selection_merge_block: None,
            selection_merge_exit: false,
            immediate_dominator: None,
            immediate_post_dominator: None,
            forward_post_visit_index: UNVISITED,
            backward_post_visit_index: UNVISITED,
            dom_depth: 0,
            pdom_depth: 0,
            phi_override: None,
            is_ladder: false,
            ir: NodeIr {
                operations: Vec::new(),
                phis: Vec::new(),
                terminator: Terminator::Unreachable,
            },
        }
    }

    /// Whether this node is a loop header (target of a back-edge).
    pub fn is_loop_header(&self) -> bool {
        !self.pred_back_edges.is_empty()
    }

    /// Forward predecessors: `preds` minus back-edge predecessors.
    pub fn forward_preds(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.preds
            .iter()
            .copied()
            .filter(move |p| !self.pred_back_edges.contains(p))
    }

    /// Forward successors: `succs` minus back-edge successors.
    pub fn forward_succs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.succs
            .iter()
            .copied()
            .filter(move |s| !self.succ_back_edges.contains(s))
    }

    /// A passthrough node carries no operations or phis and branches
    /// unconditionally to a single successor.
    pub fn is_passthrough(&self) -> bool {
        self.ir.operations.is_empty()
            && self.ir.phis.is_empty()
            && matches!(self.ir.terminator, Terminator::Branch { .. })
    }
}
