use std::fmt::Write as _;

use crate::entity::{EntityRef, PrimaryMap};
use crate::ir::BlockId;

use super::node::{Node, NodeId, UNVISITED};

/// Owns every CFG node. All other components hold `NodeId`s.
///
/// The arena is append-only; removal marks a node dead and it stops showing
/// up in iteration. Dead ids must not be dereferenced again.
#[derive(Default)]
pub struct NodePool {
    nodes: PrimaryMap<NodeId, Node>,
    dead: Vec<NodeId>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(&mut self, name: impl Into<String>) -> NodeId {
        self.nodes.push(Node::new(name, None))
    }

    pub fn create_node_for_block(&mut self, name: impl Into<String>, block: BlockId) -> NodeId {
        self.nodes.push(Node::new(name, Some(block)))
    }

    /// Unlink a node from the pool. The caller must have severed all
    /// predecessor and successor edges first.
    pub fn remove_node(&mut self, id: NodeId) {
        debug_assert!(self.nodes[id].preds.is_empty());
        debug_assert!(self.nodes[id].succs.is_empty());
        self.dead.push(id);
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        !self.dead.contains(&id)
    }

    /// Live node ids in a stable (creation) order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().filter(|id| self.is_live(*id)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(id, _)| self.is_live(*id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - self.dead.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of ids ever allocated (live or dead) — the dimension of
    /// side tables and reachability bitsets.
    pub fn id_bound(&self) -> usize {
        self.nodes.len()
    }

    // -- edge operations --
    // `preds`/`succs` use set semantics: an edge is recorded once no matter
    // how many terminator arms target it.

    /// Record the edge `from -> to` in both adjacency lists.
    pub fn add_branch(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes[from].succs.contains(&to) {
            self.nodes[from].succs.push(to);
        }
        if !self.nodes[to].preds.contains(&from) {
            self.nodes[to].preds.push(from);
        }
    }

    /// Point every terminator arm of `node` that targets `old` at `new`,
    /// and fix up the adjacency lists on all three nodes.
    pub fn retarget_branch(&mut self, node: NodeId, old: NodeId, new: NodeId) {
        let rewritten = self.nodes[node].ir.terminator.retarget(old, new);
        debug_assert!(rewritten > 0, "no branch from {node:?} to {old:?}");
        self.nodes[node].succs.retain(|&s| s != old);
        self.nodes[old].preds.retain(|&p| p != node);
        self.add_branch(node, new);
    }

    /// Swap `old` for `new` in `node.preds` (adjacency only; the caller is
    /// rewriting the terminator on the other side).
    pub fn replace_pred(&mut self, node: NodeId, old: NodeId, new: NodeId) {
        for p in &mut self.nodes[node].preds {
            if *p == old {
                *p = new;
            }
        }
    }

    /// Swap `old` for `new` in `node.succs`.
    pub fn replace_succ(&mut self, node: NodeId, old: NodeId, new: NodeId) {
        for s in &mut self.nodes[node].succs {
            if *s == old {
                *s = new;
            }
        }
    }

    // -- dominance queries --
    // O(depth) immediate-dominator chain walks bounded by depth tags.

    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if self.nodes[b].forward_post_visit_index == UNVISITED
            || self.nodes[a].forward_post_visit_index == UNVISITED
        {
            return false;
        }
        let mut cur = b;
        while self.nodes[cur].dom_depth > self.nodes[a].dom_depth {
            match self.nodes[cur].immediate_dominator {
                Some(idom) if idom != cur => cur = idom,
                _ => return false,
            }
        }
        cur == a
    }

    pub fn post_dominates(&self, a: NodeId, b: NodeId) -> bool {
        if self.nodes[b].backward_post_visit_index == UNVISITED
            || self.nodes[a].backward_post_visit_index == UNVISITED
        {
            return false;
        }
        let mut cur = b;
        while self.nodes[cur].pdom_depth > self.nodes[a].pdom_depth {
            match self.nodes[cur].immediate_post_dominator {
                Some(ipdom) if ipdom != cur => cur = ipdom,
                _ => return false,
            }
        }
        cur == a
    }

    /// Render the live CFG as graphviz, for trace logging.
    pub fn graphviz(&self, entry: NodeId) -> String {
        let mut out = String::from("digraph cfg {\n");
        for (id, node) in self.iter() {
            let shape = if id == entry { "box" } else { "ellipse" };
            let _ = writeln!(
                out,
                "  n{} [label=\"{}\" shape={shape}];",
                id.index(),
                node.name
            );
        }
        for (id, node) in self.iter() {
            for &succ in &node.succs {
                let style = if node.succ_back_edges.contains(&succ) {
                    " [style=dashed]"
                } else {
                    ""
                };
                let _ = writeln!(out, "  n{} -> n{}{style};", id.index(), succ.index());
            }
        }
        out.push_str("}\n");
        out
    }
}

impl std::ops::Index<NodeId> for NodePool {
    type Output = Node;
    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

impl std::ops::IndexMut<NodeId> for NodePool {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Terminator;

    #[test]
    fn add_and_retarget_branch() {
        let mut pool = NodePool::new();
        let a = pool.create_node("a");
        let b = pool.create_node("b");
        let c = pool.create_node("c");

        pool[a].ir.terminator = Terminator::Branch { target: b };
        pool.add_branch(a, b);
        assert_eq!(pool[a].succs, vec![b]);
        assert_eq!(pool[b].preds, vec![a]);

        pool.retarget_branch(a, b, c);
        assert_eq!(pool[a].succs, vec![c]);
        assert!(pool[b].preds.is_empty());
        assert_eq!(pool[c].preds, vec![a]);
        assert_eq!(pool[a].ir.terminator, Terminator::Branch { target: c });
    }

    #[test]
    fn removal_hides_node() {
        let mut pool = NodePool::new();
        let a = pool.create_node("a");
        let b = pool.create_node("b");
        assert_eq!(pool.node_ids(), vec![a, b]);
        pool.remove_node(b);
        assert_eq!(pool.node_ids(), vec![a]);
        assert_eq!(pool.len(), 1);
    }
}
