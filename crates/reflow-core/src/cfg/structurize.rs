//! The structurization driver.
//!
//! Runs a bounded fixed-point loop over the rewriting passes. Each pass is a
//! transformation reporting a dirty bit; analyses are recomputed wholesale
//! after every mutation, never patched. The loop ends when a full pass
//! leaves the graph untouched and verification holds, or the budget runs
//! out (`NonConvergent` / `IrreducibleRemainder`).

use std::collections::HashSet;

use crate::entity::SecondaryMap;
use crate::error::StructurizeError;
use crate::ir::{Function, Terminator};

use super::analysis::Analyses;
use super::node::{MergeType, NodeId};
use super::pool::NodePool;

/// Upper bound on fixed-point iterations before giving up.
pub const MAX_PASSES: u32 = 16;

/// Per-pass classification progress of a loop header. Any rewrite that
/// invalidates post-dominance drops the header back to `Unclassified` for
/// the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Unclassified,
    Analyzed,
    MergeChosen,
    LadderMaterialized,
    Finalized,
}

/// Owns one structurization run over an imported CFG.
pub struct Structurizer<'a> {
    pub(crate) pool: &'a mut NodePool,
    pub(crate) func: &'a mut Function,
    pub(crate) entry: NodeId,
    pub(crate) analyses: Analyses,
    pub(crate) loop_state: SecondaryMap<NodeId, LoopState>,
    /// Nodes serving as a merge or continue target of some header; these are
    /// load-bearing and protected from degenerate elimination.
    pub(crate) structured_targets: HashSet<NodeId>,
    /// Loops found to have entries bypassing their header, pending
    /// duplication.
    pub(crate) pending_irreducible: Vec<(NodeId, Vec<NodeId>)>,
}

impl<'a> Structurizer<'a> {
    pub fn new(pool: &'a mut NodePool, func: &'a mut Function, entry: NodeId) -> Self {
        let analyses = Analyses::compute(pool, entry);
        Self {
            pool,
            func,
            entry,
            analyses,
            loop_state: SecondaryMap::new(),
            structured_targets: HashSet::new(),
            pending_irreducible: Vec::new(),
        }
    }

    /// Explicit cache invalidation: recompute every analysis from scratch.
    pub(crate) fn recompute_cfg(&mut self) {
        self.analyses = Analyses::compute(self.pool, self.entry);
    }

    /// Drop all merge annotations; each pass re-derives them on the current
    /// graph so stale choices cannot survive a rewrite.
    fn reset_annotations(&mut self) {
        for id in self.pool.node_ids() {
            let node = &mut self.pool[id];
            node.merge = MergeType::None;
            node.loop_merge_block = None;
            node.loop_continue_block = None;
            node.selection_merge_block = None;
            node.selection_merge_exit = false;
        }
        self.loop_state.clear();
        self.structured_targets.clear();
    }

    pub(crate) fn update_structured_loop_merge_targets(&mut self) {
        self.structured_targets.clear();
        for (_, node) in self.pool.iter() {
            match node.merge {
                MergeType::Loop => {
                    if let Some(m) = node.loop_merge_block {
                        self.structured_targets.insert(m);
                    }
                    if let Some(c) = node.loop_continue_block {
                        self.structured_targets.insert(c);
                    }
                }
                MergeType::Selection => {
                    if let Some(m) = node.selection_merge_block {
                        self.structured_targets.insert(m);
                    }
                }
                MergeType::None => {}
            }
        }
    }

    /// Run the fixed-point loop to completion.
    pub fn run(&mut self) -> Result<(), StructurizeError> {
        log::debug!(
            "structurizing `{}` ({} nodes)",
            self.func.name,
            self.pool.len()
        );
        let mut converged = false;
        for pass in 0..MAX_PASSES {
            let dirty = self.structurize_pass(pass);
            let violations = self.verify();
            if !dirty && violations.is_empty() {
                log::debug!("converged after {} passes", pass + 1);
                converged = true;
                break;
            }
            if !dirty {
                // The graph is stable but still invalid; more passes cannot
                // make progress.
                for v in &violations {
                    log::warn!("unresolved: {v}");
                }
                break;
            }
        }
        if !converged {
            if let Some((header, entries)) = self.pending_irreducible.first() {
                let block = entries
                    .first()
                    .map(|&n| self.pool[n].name.clone())
                    .unwrap_or_else(|| self.pool[*header].name.clone());
                return Err(StructurizeError::IrreducibleRemainder { block });
            }
            return Err(StructurizeError::NonConvergent { passes: MAX_PASSES });
        }

        self.recompute_cfg();
        self.prune_dead_preds();
        self.recompute_cfg();
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("final cfg:\n{}", self.pool.graphviz(self.entry));
        }
        Ok(())
    }

    /// One full pass over the rewriting steps. Returns the dirty bit.
    fn structurize_pass(&mut self, pass: u32) -> bool {
        log::trace!("structurize pass {pass}");
        let mut dirty = false;
        self.recompute_cfg();
        self.reset_annotations();

        if self.rewrite_multiple_back_edges() {
            dirty = true;
            self.recompute_cfg();
        }
        self.find_loops();
        if self.rewrite_transposed_loops() {
            dirty = true;
            self.recompute_cfg();
            self.find_loops();
        }
        if self.find_selection_merges(pass) {
            dirty = true;
            self.recompute_cfg();
        }
        if self.find_switch_blocks(pass) {
            dirty = true;
            self.recompute_cfg();
        }
        if self.duplicate_impossible_merge_constructs() {
            dirty = true;
            self.recompute_cfg();
        }
        if self.rewrite_invalid_loop_breaks() {
            dirty = true;
            self.recompute_cfg();
        }
        if self.split_merge_scopes() {
            dirty = true;
            self.recompute_cfg();
        }
        if self.eliminate_degenerate_blocks() {
            dirty = true;
            self.recompute_cfg();
        }
        if self.insert_phi() {
            dirty = true;
        }
        dirty
    }

    /// Check the structured-form invariants on the current annotations.
    /// Returns human-readable violations; empty means the shape is stable.
    pub(crate) fn verify(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if !self.pending_irreducible.is_empty() {
            for (header, entries) in &self.pending_irreducible {
                for &n in entries {
                    violations.push(format!(
                        "irreducible entry into `{}` bypassing header `{}`",
                        self.pool[n].name, self.pool[*header].name
                    ));
                }
            }
        }

        for &id in &self.analyses.post_order {
            let node = &self.pool[id];

            // At most one back-edge predecessor.
            if node.pred_back_edges.len() > 1 {
                violations.push(format!("`{}` has multiple back-edges", node.name));
            }

            // I1: adjacency lists mirror the terminator.
            for target in node.ir.terminator.targets() {
                if !node.succs.contains(&target) {
                    violations.push(format!(
                        "`{}` terminator targets `{}` without an edge",
                        node.name, self.pool[target].name
                    ));
                }
            }

            // Every conditional or switch is a loop or selection header.
            let needs_merge = matches!(
                node.ir.terminator,
                Terminator::Condition { .. } | Terminator::Switch { .. }
            );
            if needs_merge {
                let annotated = match node.merge {
                    MergeType::Loop => node.loop_continue_block.is_some(),
                    MergeType::Selection => {
                        node.selection_merge_block.is_some() || node.selection_merge_exit
                    }
                    MergeType::None => node.is_loop_header(),
                };
                if !annotated {
                    violations.push(format!("`{}` lacks a merge annotation", node.name));
                }
            }

            // Loop exits land on the merge, the continue, a legal
            // enclosing target, or a terminating escape.
            if node.merge == MergeType::Loop {
                let cont = match node.loop_continue_block {
                    Some(c) => c,
                    None => continue,
                };
                let merge = node.loop_merge_block;
                let (body, _) = self.collect_loop_body(id, cont);
                let enclosing = self.enclosing_legal_targets(id);
                for &n in &body {
                    let succs: Vec<NodeId> = self.pool[n].forward_succs().collect();
                    for s in succs {
                        if body.contains(&s)
                            || s == cont
                            || self.break_path_is_legal(s, merge, cont, &enclosing)
                        {
                            continue;
                        }
                        violations.push(format!(
                            "loop `{}` exits to `{}` past its merge",
                            node.name, self.pool[s].name
                        ));
                    }
                }
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BlockId, Function, FunctionBuilder, Op, Terminator};
    use crate::structurize;

    fn selection_merge_of(func: &Function, block: BlockId) -> Option<BlockId> {
        func.blocks[block].insts.iter().find_map(|&i| match func.insts[i].op {
            Op::SelectionMerge { merge } => Some(merge),
            _ => None,
        })
    }

    fn loop_merge_of(func: &Function, block: BlockId) -> Option<(BlockId, BlockId)> {
        func.blocks[block].insts.iter().find_map(|&i| match func.insts[i].op {
            Op::LoopMerge {
                merge,
                continue_block,
            } => Some((merge, continue_block)),
            _ => None,
        })
    }

    fn first_op(func: &Function, block: BlockId) -> Option<&Op> {
        func.blocks[block]
            .insts
            .first()
            .map(|&i| &func.insts[i].op)
    }

    fn block_named(func: &Function, name: &str) -> Option<BlockId> {
        func.blocks
            .iter()
            .find(|(_, b)| b.name == name)
            .map(|(id, _)| id)
    }

    fn live_blocks(func: &Function) -> usize {
        func.blocks.values().filter(|b| !b.is_stub()).count()
    }

    /// Diamond: both arms of a conditional re-converge directly.
    /// The header gets `Selection(merge)` and no new blocks appear.
    #[test]
    fn diamond_gets_selection_merge() {
        let mut fb = FunctionBuilder::new("diamond");
        let c = fb.value("c");
        let then_block = fb.create_block("then");
        let else_block = fb.create_block("else");
        let merge = fb.create_block("merge");

        fb.br_if(c, then_block, else_block);
        fb.switch_to_block(then_block);
        fb.br(merge);
        fb.switch_to_block(else_block);
        fb.br(merge);
        fb.switch_to_block(merge);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        assert_eq!(selection_merge_of(&func, func.entry), Some(merge));
        assert!(matches!(first_op(&func, merge), Some(Op::MergeBlockMarker)));
        assert_eq!(func.blocks.len(), 4, "no new blocks for a plain diamond");
    }

    /// Early-exit loop: the breaking arm funnels to the loop merge through
    /// a dedicated block, and the loop keeps its natural continue.
    #[test]
    fn early_exit_loop() {
        // entry → h → q; q: br_if c, r, l; r → e (break); l → h (back-edge)
        let mut fb = FunctionBuilder::new("early_exit");
        let c = fb.value("c");
        let h = fb.create_block("h");
        let q = fb.create_block("q");
        let r = fb.create_block("r");
        let l = fb.create_block("l");
        let e = fb.create_block("e");

        fb.br(h);
        fb.switch_to_block(h);
        fb.br(q);
        fb.switch_to_block(q);
        fb.br_if(c, r, l);
        fb.switch_to_block(r);
        fb.br(e);
        fb.switch_to_block(l);
        fb.br(h);
        fb.switch_to_block(e);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        assert_eq!(loop_merge_of(&func, h), Some((e, l)));
        let q_merge = selection_merge_of(&func, q).expect("q is a selection header");
        assert_ne!(q_merge, e, "the merge is a funnel, not the loop merge");
        assert_eq!(
            func.blocks[q_merge].terminator,
            Some(Terminator::Branch { target: e }),
            "the selection merge funnels into the loop merge"
        );
    }

    /// Irreducible two-header region: the secondary entry is duplicated and
    /// the remaining cycle becomes a natural loop.
    #[test]
    fn irreducible_two_header() {
        // a → b, a → c, b → c, c → b
        let mut fb = FunctionBuilder::new("irreducible");
        let cond = fb.value("cond");
        let b = fb.create_block("b");
        let c = fb.create_block("c");

        fb.br_if(cond, b, c);
        fb.switch_to_block(b);
        fb.br(c);
        fb.switch_to_block(c);
        fb.br(b);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        assert!(
            block_named(&func, "c.dup").is_some(),
            "secondary loop entry duplicated"
        );
        let (merge, cont) = loop_merge_of(&func, b).expect("b is the loop header");
        assert_eq!(cont, c);
        assert!(matches!(
            func.blocks[merge].terminator,
            Some(Terminator::Unreachable)
        ));
    }

    /// Single-block infinite loop: a synthetic unreachable merge appears and
    /// the header doubles as its own continue.
    #[test]
    fn infinite_self_loop() {
        let mut fb = FunctionBuilder::new("spin");
        let entry = fb.entry_block();
        fb.br(entry);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        let (merge, cont) = loop_merge_of(&func, entry).expect("loop annotation");
        assert_eq!(cont, entry);
        assert_eq!(func.blocks[merge].name, "entry.fake_merge");
        assert!(matches!(
            func.blocks[merge].terminator,
            Some(Terminator::Unreachable)
        ));
        assert!(matches!(
            first_op(&func, entry),
            Some(Op::ContinueBlockMarker)
        ));
    }

    /// Two back-edges merge into one synthetic continue, and the header phi
    /// is re-routed through it.
    #[test]
    fn multiple_back_edges_get_one_continue() {
        // entry → h; h: br_if c, a, e; a: br_if c2, l1, l2; l1/l2 → h
        let mut fb = FunctionBuilder::new("multi_back_edge");
        let c = fb.value("c");
        let c2 = fb.value("c2");
        let v0 = fb.value("v0");
        let v1 = fb.value("v1");
        let v2 = fb.value("v2");
        let h = fb.create_block("h");
        let a = fb.create_block("a");
        let l1 = fb.create_block("l1");
        let l2 = fb.create_block("l2");
        let e = fb.create_block("e");

        let entry = fb.entry_block();
        fb.br(h);
        fb.switch_to_block(h);
        fb.phi(&[(entry, v0), (l1, v1), (l2, v2)]);
        fb.br_if(c, a, e);
        fb.switch_to_block(a);
        fb.br_if(c2, l1, l2);
        fb.switch_to_block(l1);
        fb.br(h);
        fb.switch_to_block(l2);
        fb.br(h);
        fb.switch_to_block(e);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        let cont = block_named(&func, "h.fake_continue").expect("synthetic continue");
        assert_eq!(
            func.blocks[cont].terminator,
            Some(Terminator::Branch { target: h })
        );
        assert_eq!(loop_merge_of(&func, h), Some((e, cont)));

        // The header phi now merges only the forward entry and the continue.
        let phi = &func.blocks[h].phis[0];
        let mut blocks: Vec<BlockId> = phi.incoming.iter().map(|i| i.block).collect();
        blocks.sort();
        let mut expected = vec![entry, cont];
        expected.sort();
        assert_eq!(blocks, expected);

        // The inner conditional re-converges before the continue: its merge
        // is a helper feeding the continue, which carries the merged value
        // through it.
        let helper = selection_merge_of(&func, a).expect("a is a selection header");
        assert_ne!(helper, cont);
        assert_eq!(
            func.blocks[helper].terminator,
            Some(Terminator::Branch { target: cont })
        );
        assert_eq!(func.blocks[helper].phis[0].incoming.len(), 2);
        assert_eq!(func.blocks[cont].phis.len(), 1);
        assert_eq!(func.blocks[cont].phis[0].incoming.len(), 1);
    }

    /// Switch whose arms all meet at one block: annotated directly, no
    /// ladder inserted.
    #[test]
    fn switch_converging_arms() {
        let mut fb = FunctionBuilder::new("switcher");
        let sel = fb.value("sel");
        let a = fb.create_block("case_a");
        let b = fb.create_block("case_b");
        let d = fb.create_block("default");
        let m = fb.create_block("merge");

        fb.switch(sel, &[(1, a), (2, b)], d);
        for arm in [a, b, d] {
            fb.switch_to_block(arm);
            fb.br(m);
        }
        fb.switch_to_block(m);
        fb.ret(None);

        let mut func = fb.build();
        let before = func.blocks.len();
        structurize(&mut func).unwrap();

        assert_eq!(selection_merge_of(&func, func.entry), Some(m));
        assert_eq!(func.blocks.len(), before, "no ladder inserted");
    }

    /// A loop breaking to two distinct load-bearing targets gets a dispatch
    /// ladder as its merge.
    #[test]
    fn divergent_breaks_get_dispatch_ladder() {
        // h: br_if c, b, e1; b: br_if c2, l, e2; l → h; e1/e2 do work, → m
        let mut fb = FunctionBuilder::new("divergent_breaks");
        let c = fb.value("c");
        let c2 = fb.value("c2");
        let h = fb.create_block("h");
        let b = fb.create_block("b");
        let l = fb.create_block("l");
        let e1 = fb.create_block("e1");
        let e2 = fb.create_block("e2");
        let m = fb.create_block("m");

        fb.br(h);
        fb.switch_to_block(h);
        fb.br_if(c, b, e1);
        fb.switch_to_block(b);
        fb.br_if(c2, l, e2);
        fb.switch_to_block(l);
        fb.br(h);
        fb.switch_to_block(e1);
        fb.opaque_void("side_effect_one", &[]);
        fb.br(m);
        fb.switch_to_block(e2);
        fb.opaque_void("side_effect_two", &[]);
        fb.br(m);
        fb.switch_to_block(m);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        let (merge, cont) = loop_merge_of(&func, h).expect("loop annotation");
        assert_eq!(cont, l);
        assert_eq!(func.blocks[merge].name, "h.ladder");
        // The dispatch block re-branches on a selector phi, either directly
        // or through the helper its multi-way branch was split onto.
        assert!(!func.blocks[merge].phis.is_empty());
        let dispatch_term = match func.blocks[merge].terminator.clone().unwrap() {
            Terminator::Branch { target } => func.blocks[target].terminator.clone().unwrap(),
            other => other,
        };
        assert!(matches!(
            dispatch_term,
            Terminator::Switch { .. } | Terminator::Condition { .. }
        ));
        // Both break paths now land on the dispatch block, possibly through
        // a funnel.
        for start in [e1, e2] {
            let mut cur = start;
            for _ in 0..4 {
                if cur == merge {
                    break;
                }
                match &func.blocks[cur].terminator {
                    Some(Terminator::Branch { target }) => cur = *target,
                    other => panic!("expected branch chain to the merge, got {other:?}"),
                }
            }
            assert_eq!(cur, merge, "break from {start:?} reaches the dispatch");
        }
    }

    /// A conditional with one discarding arm merges toward the surviving
    /// arm, like an unreachable one.
    #[test]
    fn kill_arm_resolves_exit_merge() {
        let mut fb = FunctionBuilder::new("discard");
        let c = fb.value("c");
        let k = fb.create_block("k");
        let r = fb.create_block("r");

        fb.br_if(c, k, r);
        fb.switch_to_block(k);
        fb.kill();
        fb.switch_to_block(r);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        assert_eq!(selection_merge_of(&func, func.entry), Some(r));
    }

    /// Structurizing an already-structured function changes nothing but
    /// marker instruction identity.
    #[test]
    fn idempotent_on_structured_input() {
        let mut fb = FunctionBuilder::new("stable");
        let c = fb.value("c");
        let h = fb.create_block("h");
        let body = fb.create_block("body");
        let exit = fb.create_block("exit");

        fb.br(h);
        fb.switch_to_block(h);
        fb.br_if(c, body, exit);
        fb.switch_to_block(body);
        fb.br(h);
        fb.switch_to_block(exit);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();
        let blocks_after_first = live_blocks(&func);
        let merge_after_first = loop_merge_of(&func, h);

        structurize(&mut func).unwrap();
        assert_eq!(live_blocks(&func), blocks_after_first);
        assert_eq!(loop_merge_of(&func, h), merge_after_first);
        assert_eq!(loop_merge_of(&func, h), Some((exit, body)));
    }

    /// Unreachable input blocks are silently pruned to stubs, not an error.
    #[test]
    fn unreachable_blocks_are_pruned() {
        let mut fb = FunctionBuilder::new("orphaned");
        let dead = fb.create_block("dead");
        fb.ret(None);
        fb.switch_to_block(dead);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        assert!(func.blocks[dead].is_stub());
        assert!(!func.blocks[func.entry].is_stub());
    }

    /// A block without a terminator is rejected as unsupported.
    #[test]
    fn missing_terminator_is_fatal() {
        let mut fb = FunctionBuilder::new("broken");
        let unfinished = fb.create_block("unfinished");
        fb.br(unfinished);

        let mut func = fb.build();
        let err = structurize(&mut func).unwrap_err();
        assert!(matches!(
            err,
            crate::StructurizeError::UnsupportedTerminator { .. }
        ));
    }

    /// Nested selections sharing one natural merge get per-construct
    /// funnels; the outer header keeps the shared block.
    #[test]
    fn nested_selections_split_shared_merge() {
        // outer: br_if c0, left, right; each side is a diamond into m.
        let mut fb = FunctionBuilder::new("nested");
        let c0 = fb.value("c0");
        let c1 = fb.value("c1");
        let c2 = fb.value("c2");
        let left = fb.create_block("left");
        let right = fb.create_block("right");
        let l1 = fb.create_block("l1");
        let l2 = fb.create_block("l2");
        let r1 = fb.create_block("r1");
        let r2 = fb.create_block("r2");
        let m = fb.create_block("m");

        fb.br_if(c0, left, right);
        fb.switch_to_block(left);
        fb.br_if(c1, l1, l2);
        fb.switch_to_block(right);
        fb.br_if(c2, r1, r2);
        for arm in [l1, l2, r1, r2] {
            fb.switch_to_block(arm);
            fb.br(m);
        }
        fb.switch_to_block(m);
        fb.ret(None);

        let mut func = fb.build();
        structurize(&mut func).unwrap();

        let outer = selection_merge_of(&func, func.entry).expect("outer selection");
        let left_merge = selection_merge_of(&func, left).expect("left selection");
        let right_merge = selection_merge_of(&func, right).expect("right selection");
        assert_eq!(outer, m);
        assert_ne!(left_merge, m, "inner construct funnels, not shares");
        assert_ne!(right_merge, m);
        assert_ne!(left_merge, right_merge);
        assert_eq!(
            func.blocks[left_merge].terminator,
            Some(Terminator::Branch { target: m })
        );
    }
}
