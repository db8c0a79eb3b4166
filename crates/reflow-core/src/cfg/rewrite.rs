//! Edge and node rewriting: ladders, helper blocks, duplication, phi
//! repair, degenerate-block elimination.
//!
//! Every rewrite keeps the pred/succ lists mirroring the terminators and
//! does eager phi maintenance where the moved values are locally known; the
//! [`Structurizer::insert_phi`] reconciliation pass catches the rest.

use std::collections::HashSet;

use crate::entity::EntityRef;
use crate::ir::{Incoming, Phi, Terminator, ValueId};

use super::analysis::exists_path_without_intermediate;
use super::node::NodeId;
use super::structurize::Structurizer;

impl Structurizer<'_> {
    /// Create a new block and rewrite all branches to `node` from blocks
    /// dominated by `header` to it; the ladder then branches to `node`.
    ///
    /// Phi incomings of `node` that arrive from the rewritten predecessors
    /// are materialized as a single merged value at the ladder tail.
    pub(crate) fn create_ladder_block(
        &mut self,
        header: NodeId,
        node: NodeId,
        tag: &str,
    ) -> NodeId {
        let rewrite_preds: Vec<NodeId> = self.pool[node]
            .preds
            .iter()
            .copied()
            .filter(|&p| {
                !self.pool[node].pred_back_edges.contains(&p) && self.pool.dominates(header, p)
            })
            .collect();
        self.funnel_preds(node, &rewrite_preds, tag)
    }

    /// Give `node` a unique forward predecessor by funnelling all of them
    /// through a fresh passthrough block.
    pub(crate) fn create_helper_pred_block(&mut self, node: NodeId) -> NodeId {
        let preds: Vec<NodeId> = self.pool[node].forward_preds().collect();
        self.funnel_preds(node, &preds, "ladder")
    }

    /// Shared funnel: reroute `preds -> node` edges through a new block.
    fn funnel_preds(&mut self, node: NodeId, preds: &[NodeId], tag: &str) -> NodeId {
        let name = format!("{}.{}", self.pool[node].name, tag);
        let ladder = self.pool.create_node(name.clone());
        self.pool[ladder].is_ladder = true;
        self.pool[ladder].ir.terminator = Terminator::Branch { target: node };

        // Materialize merged phi values at the ladder tail.
        let phis = self.pool[node].ir.phis.clone();
        let mut node_phis = phis.clone();
        let mut ladder_phis = Vec::new();
        for (i, phi) in phis.iter().enumerate() {
            let moved: Vec<Incoming<NodeId>> = phi
                .incoming
                .iter()
                .copied()
                .filter(|inc| preds.contains(&inc.block))
                .collect();
            if moved.is_empty() {
                continue;
            }
            let merged = if moved.len() == 1 {
                moved[0].value
            } else {
                let value = self.func.synth_value(format!("{name}.phi"));
                ladder_phis.push(Phi {
                    result: value,
                    incoming: moved,
                });
                value
            };
            node_phis[i].incoming.retain(|inc| !preds.contains(&inc.block));
            node_phis[i].incoming.push(Incoming {
                block: ladder,
                value: merged,
            });
        }
        self.pool[node].ir.phis = node_phis;
        self.pool[ladder].ir.phis = ladder_phis;

        for &p in preds {
            self.pool.retarget_branch(p, node, ladder);
        }
        self.pool.add_branch(ladder, node);
        log::trace!(
            "funnelled {} preds of `{}` through `{name}`",
            preds.len(),
            self.pool[node].name
        );
        ladder
    }

    /// Split `node`: its terminator moves to a fresh successor block and
    /// `node` branches there unconditionally. Downstream phi incomings are
    /// rewritten to reference the tail.
    pub(crate) fn create_helper_succ_block(&mut self, node: NodeId) -> NodeId {
        let name = format!("{}.{}", self.pool[node].name, "ladder");
        let tail = self.pool.create_node(name);

        let term = std::mem::replace(
            &mut self.pool[node].ir.terminator,
            Terminator::Branch { target: tail },
        );
        let succs = std::mem::take(&mut self.pool[node].succs);
        for &s in &succs {
            self.pool.replace_pred(s, node, tail);
            for phi in &mut self.pool[s].ir.phis {
                for inc in &mut phi.incoming {
                    if inc.block == node {
                        inc.block = tail;
                    }
                }
            }
        }
        self.pool[tail].ir.terminator = term;
        self.pool[tail].succs = succs;
        self.pool[tail].preds = vec![node];
        self.pool[node].succs = vec![tail];
        tail
    }

    /// Phi duplication is allowed only when no phi of the node consumes
    /// another phi of the same node (no in-block cycle).
    pub(crate) fn can_duplicate_phis(&self, node: NodeId) -> bool {
        let results: HashSet<ValueId> =
            self.pool[node].ir.phis.iter().map(|p| p.result).collect();
        self.pool[node]
            .ir
            .phis
            .iter()
            .all(|p| p.incoming.iter().all(|inc| !results.contains(&inc.value)))
    }

    /// Whether any value defined in `node` (op result or phi result) is
    /// consumed outside it. Duplicating such a node would need SSA repair
    /// the opaque-ops contract cannot express.
    pub(crate) fn node_values_escape(&self, node: NodeId) -> bool {
        let mut defined: HashSet<ValueId> = HashSet::new();
        for &inst in &self.pool[node].ir.operations {
            if let Some(result) = self.func.insts[inst].result {
                defined.insert(result);
            }
        }
        for phi in &self.pool[node].ir.phis {
            defined.insert(phi.result);
        }
        if defined.is_empty() {
            return false;
        }
        for (other, data) in self.pool.iter() {
            if other == node {
                continue;
            }
            for &inst in &data.ir.operations {
                if let crate::ir::Op::Opaque { args, .. } = &self.func.insts[inst].op {
                    if args.iter().any(|a| defined.contains(a)) {
                        return true;
                    }
                }
            }
            for phi in &data.ir.phis {
                if phi.incoming.iter().any(|inc| defined.contains(&inc.value)) {
                    return true;
                }
            }
            match &data.ir.terminator {
                Terminator::Condition { cond, .. } if defined.contains(cond) => return true,
                Terminator::Switch { selector, .. } if defined.contains(selector) => return true,
                Terminator::Return { value: Some(v) } if defined.contains(v) => return true,
                _ => {}
            }
        }
        false
    }

    /// Clone `node`'s operations and terminator into a fresh node and move
    /// the given predecessors over to it. The caller has checked
    /// `can_duplicate_phis` and `node_values_escape`.
    pub(crate) fn duplicate_node(&mut self, node: NodeId, move_preds: &[NodeId]) -> NodeId {
        let name = format!("{}.dup", self.pool[node].name);
        let dup = self.pool.create_node(name);

        // Clone operations, remapping results (and in-block uses) so the
        // copy defines its own values.
        let mut remap: std::collections::HashMap<ValueId, ValueId> = std::collections::HashMap::new();
        let ops = self.pool[node].ir.operations.clone();
        let mut dup_ops = Vec::with_capacity(ops.len());
        for inst_id in ops {
            let mut inst = self.func.insts[inst_id].clone();
            if let crate::ir::Op::Opaque { args, .. } = &mut inst.op {
                for arg in args {
                    if let Some(&new) = remap.get(arg) {
                        *arg = new;
                    }
                }
            }
            if let Some(result) = inst.result {
                let new = self.func.synth_value(format!("{}.dup", result.index()));
                remap.insert(result, new);
                inst.result = Some(new);
            }
            dup_ops.push(self.func.insts.push(inst));
        }
        self.pool[dup].ir.operations = dup_ops;

        // Split phis: entries for the moved predecessors go to the copy.
        let phis = self.pool[node].ir.phis.clone();
        let mut node_phis = Vec::new();
        let mut dup_phis = Vec::new();
        for phi in phis {
            let (moved, kept): (Vec<_>, Vec<_>) = phi
                .incoming
                .iter()
                .copied()
                .partition(|inc| move_preds.contains(&inc.block));
            if !moved.is_empty() {
                let result = self.func.synth_value(format!("{}.dup", phi.result.index()));
                dup_phis.push(Phi {
                    result,
                    incoming: moved,
                });
            }
            node_phis.push(Phi {
                result: phi.result,
                incoming: kept,
            });
        }
        self.pool[node].ir.phis = node_phis;
        self.pool[dup].ir.phis = dup_phis;

        // Same terminator, same targets.
        let term = self.pool[node].ir.terminator.clone();
        for target in term.targets() {
            self.pool.add_branch(dup, target);
        }
        self.pool[dup].ir.terminator = term;

        for &p in move_preds {
            self.pool.retarget_branch(p, node, dup);
        }
        log::debug!(
            "duplicated `{}` for {} external preds",
            self.pool[node].name,
            move_preds.len()
        );
        dup
    }

    /// Fold single-pred, single-succ passthrough nodes into their successor.
    /// Nodes serving as structured targets (merges, continues, selection
    /// merges) are load-bearing and kept.
    pub(crate) fn eliminate_degenerate_blocks(&mut self) -> bool {
        let mut changed = false;
        for id in self.analyses.post_order.clone() {
            if id == self.entry || !self.pool.is_live(id) {
                continue;
            }
            let node = &self.pool[id];
            if !node.is_passthrough()
                || !node.pred_back_edges.is_empty()
                || !node.succ_back_edges.is_empty()
                || node.preds.len() != 1
                || node.merge != super::node::MergeType::None
            {
                continue;
            }
            if self.structured_targets.contains(&id) {
                continue;
            }
            let pred = node.preds[0];
            let succ = match node.ir.terminator {
                Terminator::Branch { target } => target,
                _ => continue,
            };
            if succ == id || pred == id {
                continue;
            }
            // A phi on the successor must not end up with two entries for
            // the same predecessor.
            let conflict = self.pool[succ]
                .ir
                .phis
                .iter()
                .any(|phi| phi.value_for(pred).is_some() && phi.value_for(id).is_some());
            if conflict || self.pool[succ].preds.contains(&pred) {
                continue;
            }
            self.merge_to_succ(id, pred, succ);
            changed = true;
        }
        changed
    }

    /// Unlink a passthrough `node`, connecting `pred` directly to `succ`.
    fn merge_to_succ(&mut self, node: NodeId, pred: NodeId, succ: NodeId) {
        for phi in &mut self.pool[succ].ir.phis {
            for inc in &mut phi.incoming {
                if inc.block == node {
                    inc.block = pred;
                }
            }
        }
        self.pool.retarget_branch(pred, node, succ);
        self.pool[succ].preds.retain(|&p| p != node);
        self.pool[node].succs.clear();
        self.pool[node].preds.clear();
        self.pool.remove_node(node);
        log::trace!("eliminated degenerate block");
    }

    /// Reconcile every reachable node's phis against its predecessor list
    /// list: stale entries are dropped, missing predecessors receive a
    /// propagated value or undef.
    pub(crate) fn insert_phi(&mut self) -> bool {
        let mut changed = false;
        for id in self.analyses.post_order.clone() {
            let preds = self.pool[id].preds.clone();
            let phis = self.pool[id].ir.phis.clone();
            let mut new_phis = phis.clone();
            for (i, phi) in phis.iter().enumerate() {
                let before = new_phis[i].incoming.len();
                new_phis[i].incoming.retain(|inc| preds.contains(&inc.block));
                if new_phis[i].incoming.len() != before {
                    log::warn!(
                        "malformed phi in `{}`: dropped {} stale incoming entries",
                        self.pool[id].name,
                        before - new_phis[i].incoming.len()
                    );
                    changed = true;
                }
                for &p in &preds {
                    if new_phis[i].incoming.iter().any(|inc| inc.block == p) {
                        continue;
                    }
                    let value = self.phi_value_for_new_pred(phi, p, id);
                    new_phis[i].incoming.push(Incoming { block: p, value });
                    changed = true;
                }
            }
            self.pool[id].ir.phis = new_phis;
        }
        changed
    }

    /// Decide what a phi should carry along a freshly created edge: the
    /// unique propagatable definition, or undef when none can reach.
    fn phi_value_for_new_pred(&mut self, phi: &Phi<NodeId>, pred: NodeId, node: NodeId) -> ValueId {
        let mut candidates: Vec<Incoming<NodeId>> = phi
            .incoming
            .iter()
            .copied()
            .filter(|inc| self.phi_frontier_makes_forward_progress(inc.block, pred, node))
            .collect();
        if candidates.len() > 1 {
            // Prefer a definition site that dominates the new predecessor.
            candidates.retain(|inc| self.pool.dominates(inc.block, pred));
        }
        match candidates.as_slice() {
            [single] => single.value,
            _ => self.func.undef_value(),
        }
    }

    /// Whether a definition recorded at `def_block` can flow to the new
    /// predecessor `pred` without first re-entering `node` — i.e. the phi
    /// frontier makes forward progress across the new edge.
    pub(crate) fn phi_frontier_makes_forward_progress(
        &self,
        def_block: NodeId,
        pred: NodeId,
        node: NodeId,
    ) -> bool {
        if def_block == pred {
            return true;
        }
        self.analyses
            .query_reachability_through_back_edges(def_block, pred)
            && exists_path_without_intermediate(self.pool, def_block, pred, node)
    }

    /// Drop predecessors that are unreachable from the entry, along with
    /// their phi entries, then retire fully unreachable nodes.
    pub(crate) fn prune_dead_preds(&mut self) {
        let reachable: HashSet<NodeId> = self.analyses.post_order.iter().copied().collect();
        for id in self.analyses.post_order.clone() {
            let dead: Vec<NodeId> = self.pool[id]
                .preds
                .iter()
                .copied()
                .filter(|p| !reachable.contains(p))
                .collect();
            if dead.is_empty() {
                continue;
            }
            self.pool[id].preds.retain(|p| reachable.contains(p));
            self.pool[id]
                .pred_back_edges
                .retain(|p| reachable.contains(p));
            for phi in &mut self.pool[id].ir.phis {
                phi.incoming.retain(|inc| reachable.contains(&inc.block));
            }
            log::trace!(
                "pruned {} dead preds of `{}`",
                dead.len(),
                self.pool[id].name
            );
        }
        for id in self.pool.node_ids() {
            if reachable.contains(&id) {
                continue;
            }
            let succs = std::mem::take(&mut self.pool[id].succs);
            for s in succs {
                self.pool[s].preds.retain(|&p| p != id);
            }
            self.pool[id].preds.clear();
            self.pool.remove_node(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cfg::{NodeId, NodePool, Structurizer};
    use crate::ir::{Function, FunctionBuilder, Terminator};
    use crate::translate::import;

    fn node_named(pool: &NodePool, name: &str) -> NodeId {
        pool.iter()
            .find(|(_, n)| n.name == name)
            .map(|(id, _)| id)
            .unwrap_or_else(|| panic!("no node `{name}`"))
    }

    fn imported(func: &Function) -> (NodePool, NodeId) {
        let mut pool = NodePool::new();
        let entry = import(func, &mut pool).unwrap();
        (pool, entry)
    }

    #[test]
    fn ladder_block_materializes_merged_phi() {
        // entry: br_if c, t, e; t → m; e → m; m: phi [(t, vt), (e, ve)]
        let mut fb = FunctionBuilder::new("f");
        let c = fb.value("c");
        let vt = fb.value("vt");
        let ve = fb.value("ve");
        let t = fb.create_block("t");
        let e = fb.create_block("e");
        let m = fb.create_block("m");
        fb.br_if(c, t, e);
        fb.switch_to_block(t);
        fb.br(m);
        fb.switch_to_block(e);
        fb.br(m);
        fb.switch_to_block(m);
        let merged = fb.phi(&[(t, vt), (e, ve)]);
        fb.ret(Some(merged));

        let mut func = fb.build();
        let (mut pool, entry) = imported(&func);
        let entry_n = node_named(&pool, "entry");
        let m_n = node_named(&pool, "m");

        let mut s = Structurizer::new(&mut pool, &mut func, entry);
        let ladder = s.create_ladder_block(entry_n, m_n, "ladder");

        // Both arms now funnel through the ladder, which carries the merged
        // value; the original phi keeps a single incoming.
        assert_eq!(pool[m_n].preds, vec![ladder]);
        assert_eq!(pool[m_n].ir.phis[0].incoming.len(), 1);
        assert_eq!(pool[m_n].ir.phis[0].incoming[0].block, ladder);
        assert_eq!(pool[ladder].ir.phis.len(), 1);
        assert_eq!(pool[ladder].ir.phis[0].incoming.len(), 2);
        assert!(pool[ladder].is_ladder);
    }

    #[test]
    fn degenerate_passthrough_is_folded() {
        // entry → x → exit, with x a pure passthrough.
        let mut fb = FunctionBuilder::new("f");
        let x = fb.create_block("x");
        let exit = fb.create_block("exit");
        fb.br(x);
        fb.switch_to_block(x);
        fb.br(exit);
        fb.switch_to_block(exit);
        fb.ret(None);

        let mut func = fb.build();
        let (mut pool, entry) = imported(&func);
        let exit_n = node_named(&pool, "exit");

        let mut s = Structurizer::new(&mut pool, &mut func, entry);
        assert!(s.eliminate_degenerate_blocks());

        assert_eq!(pool.len(), 2);
        assert_eq!(
            pool[entry].ir.terminator,
            Terminator::Branch { target: exit_n }
        );
        assert_eq!(pool[exit_n].preds, vec![entry]);
    }

    #[test]
    fn duplicate_node_rewires_chosen_preds() {
        // entry: br_if c, a, b; a → j; b → j; j: side effect, → exit
        let mut fb = FunctionBuilder::new("f");
        let c = fb.value("c");
        let a = fb.create_block("a");
        let b = fb.create_block("b");
        let j = fb.create_block("j");
        let exit = fb.create_block("exit");
        fb.br_if(c, a, b);
        fb.switch_to_block(a);
        fb.br(j);
        fb.switch_to_block(b);
        fb.br(j);
        fb.switch_to_block(j);
        fb.opaque_void("effect", &[]);
        fb.br(exit);
        fb.switch_to_block(exit);
        fb.ret(None);

        let mut func = fb.build();
        let (mut pool, entry) = imported(&func);
        let a_n = node_named(&pool, "a");
        let b_n = node_named(&pool, "b");
        let j_n = node_named(&pool, "j");
        let exit_n = node_named(&pool, "exit");

        let mut s = Structurizer::new(&mut pool, &mut func, entry);
        assert!(s.can_duplicate_phis(j_n));
        assert!(!s.node_values_escape(j_n));
        let dup = s.duplicate_node(j_n, &[b_n]);

        assert_eq!(pool[j_n].preds, vec![a_n]);
        assert_eq!(pool[dup].preds, vec![b_n]);
        assert_eq!(pool[dup].ir.operations.len(), 1);
        assert_ne!(pool[dup].ir.operations[0], pool[j_n].ir.operations[0]);
        assert_eq!(
            pool[dup].ir.terminator,
            Terminator::Branch { target: exit_n }
        );
        assert!(pool[exit_n].preds.contains(&dup));
    }

    #[test]
    fn insert_phi_fills_missing_pred_with_undef() {
        // The phi at m only covers the t arm; the e arm gets undef since no
        // recorded definition can reach it.
        let mut fb = FunctionBuilder::new("f");
        let c = fb.value("c");
        let vt = fb.value("vt");
        let t = fb.create_block("t");
        let e = fb.create_block("e");
        let m = fb.create_block("m");
        fb.br_if(c, t, e);
        fb.switch_to_block(t);
        fb.br(m);
        fb.switch_to_block(e);
        fb.br(m);
        fb.switch_to_block(m);
        let merged = fb.phi(&[(t, vt)]);
        fb.ret(Some(merged));

        let mut func = fb.build();
        let (mut pool, entry) = imported(&func);
        let e_n = node_named(&pool, "e");
        let m_n = node_named(&pool, "m");

        let mut s = Structurizer::new(&mut pool, &mut func, entry);
        assert!(s.insert_phi());

        let phi = &pool[m_n].ir.phis[0];
        assert_eq!(phi.incoming.len(), 2);
        let e_value = phi.value_for(e_n).expect("entry for the e arm");
        assert!(func.values[e_value].is_undef());
    }
}
