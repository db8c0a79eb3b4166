//! Loop identification and normalization: back-edge bookkeeping, loop body
//! classification, merge/continue selection, transposed-loop rewriting,
//! break dispatch, and irreducible-entry duplication.

use std::collections::HashSet;

use crate::ir::{Incoming, Phi, SwitchCase, Terminator, Value, ValueKind};

use super::analysis::{find_common_post_dominator_with_ignored_break, sort_candidates};
use super::node::{MergeType, NodeId};
use super::structurize::{LoopState, Structurizer};

/// Classified exit edges of one loop body.
#[derive(Debug, Default)]
pub struct LoopAnalysis {
    pub body: Vec<NodeId>,
    /// Every edge target leaving the body.
    pub direct_exits: Vec<NodeId>,
    /// Exit targets still dominated by the header.
    pub dominated_exit: Vec<NodeId>,
    /// Dominated exit targets belonging to a nested loop.
    pub inner_dominated_exit: Vec<NodeId>,
    /// Exit targets not dominated by the header — merge candidates.
    pub non_dominated_exit: Vec<NodeId>,
    /// Exit targets that re-reach the continue block through back-edges.
    pub dominated_continue_exit: Vec<NodeId>,
    /// Loop-participating nodes entered from outside the header's dominance
    /// region — the irreducible remainder.
    pub irreducible_entries: Vec<NodeId>,
}

impl Structurizer<'_> {
    /// Restore the single-continue invariant: a header with more than one
    /// back-edge gets a fresh continue node that all back-edges funnel
    /// through.
    pub(crate) fn rewrite_multiple_back_edges(&mut self) -> bool {
        let mut changed = false;
        for h in self.analyses.post_order.clone() {
            let backs = self.pool[h].pred_back_edges.clone();
            if backs.len() <= 1 {
                continue;
            }
            log::debug!(
                "merging {} back-edges of `{}` into one continue",
                backs.len(),
                self.pool[h].name
            );
            let name = format!("{}.fake_continue", self.pool[h].name);
            let cont = self.pool.create_node(name);
            self.pool[cont].ir.terminator = Terminator::Branch { target: h };

            // Merge the header's phi entries for the back-edges at the new
            // continue node.
            let phis = self.pool[h].ir.phis.clone();
            let mut header_phis = phis.clone();
            let mut cont_phis = Vec::new();
            for (i, phi) in phis.iter().enumerate() {
                let moved: Vec<Incoming<NodeId>> = phi
                    .incoming
                    .iter()
                    .copied()
                    .filter(|inc| backs.contains(&inc.block))
                    .collect();
                if moved.is_empty() {
                    continue;
                }
                let merged = if moved.len() == 1 {
                    moved[0].value
                } else {
                    let value = self
                        .func
                        .synth_value(format!("{}.fake_continue.phi", self.pool[h].name));
                    cont_phis.push(Phi {
                        result: value,
                        incoming: moved,
                    });
                    value
                };
                header_phis[i].incoming.retain(|inc| !backs.contains(&inc.block));
                header_phis[i].incoming.push(Incoming {
                    block: cont,
                    value: merged,
                });
            }
            self.pool[h].ir.phis = header_phis;
            self.pool[cont].ir.phis = cont_phis;

            for &b in &backs {
                self.pool.retarget_branch(b, h, cont);
            }
            self.pool.add_branch(cont, h);
            changed = true;
        }
        changed
    }

    /// The loop body of `header` with continue block `cont`: the header plus
    /// every node in the header's dominance region with a forward path to
    /// the continue. External entries into the cycle are reported instead of
    /// being absorbed.
    pub(crate) fn collect_loop_body(&self, header: NodeId, cont: NodeId) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut body = vec![header];
        let mut irreducible = Vec::new();
        if cont == header {
            return (body, irreducible);
        }
        if !self.pool.dominates(header, cont) {
            irreducible.push(cont);
            return (body, irreducible);
        }
        let mut visited: HashSet<NodeId> = body.iter().copied().collect();
        let mut worklist = vec![cont];
        visited.insert(cont);
        while let Some(n) = worklist.pop() {
            body.push(n);
            let preds: Vec<NodeId> = self.pool[n].forward_preds().collect();
            for p in preds {
                if visited.contains(&p) {
                    continue;
                }
                if self.pool.dominates(header, p) {
                    visited.insert(p);
                    worklist.push(p);
                } else if !irreducible.contains(&n) {
                    irreducible.push(n);
                }
            }
        }
        (body, irreducible)
    }

    /// Classify the outgoing edges of a loop body.
    pub(crate) fn analyze_loop(&self, header: NodeId, cont: NodeId) -> LoopAnalysis {
        let (body, irreducible_entries) = self.collect_loop_body(header, cont);
        let body_set: HashSet<NodeId> = body.iter().copied().collect();

        let mut analysis = LoopAnalysis {
            irreducible_entries,
            ..LoopAnalysis::default()
        };
        for &n in &body {
            let succs: Vec<NodeId> = self.pool[n].forward_succs().collect();
            for s in succs {
                if body_set.contains(&s) {
                    continue;
                }
                analysis.direct_exits.push(s);
                if self.pool.dominates(header, s) {
                    let inner = self.innermost_loop_header_for(s);
                    if inner.is_some_and(|i| i != header && self.pool.dominates(header, i)) {
                        analysis.inner_dominated_exit.push(s);
                    } else if self
                        .analyses
                        .query_reachability_through_back_edges(s, cont)
                    {
                        analysis.dominated_continue_exit.push(s);
                    } else {
                        analysis.dominated_exit.push(s);
                    }
                } else {
                    analysis.non_dominated_exit.push(s);
                }
            }
        }
        sort_candidates(self.pool, &mut analysis.direct_exits);
        sort_candidates(self.pool, &mut analysis.dominated_exit);
        sort_candidates(self.pool, &mut analysis.inner_dominated_exit);
        sort_candidates(self.pool, &mut analysis.non_dominated_exit);
        sort_candidates(self.pool, &mut analysis.dominated_continue_exit);
        analysis.body = body;
        analysis
    }

    /// Pick the loop merge: the common post-dominator of the exit targets
    /// with the continue block ignored. Exits that immediately terminate the
    /// function and legal breaks to enclosing constructs do not constrain
    /// the choice. `None` means an infinite loop; emission synthesizes an
    /// unreachable merge for it.
    pub(crate) fn analyze_loop_merge(
        &self,
        header: NodeId,
        cont: NodeId,
        analysis: &LoopAnalysis,
    ) -> Option<NodeId> {
        let enclosing = self.enclosing_legal_targets(header);
        let mut candidates: Vec<NodeId> = analysis
            .direct_exits
            .iter()
            .copied()
            .filter(|&s| s != cont && !enclosing.contains(&s))
            .collect();
        let non_terminating: Vec<NodeId> = candidates
            .iter()
            .copied()
            .filter(|&s| !self.pool[s].ir.terminator.is_exit())
            .collect();
        let all_terminate = non_terminating.is_empty();
        if !all_terminate {
            candidates = non_terminating;
        }
        sort_candidates(self.pool, &mut candidates);
        let merge = match candidates.as_slice() {
            [] => return None,
            [single] => *single,
            // Every exit returns or discards: no re-convergence exists, so
            // the first candidate serves as merge and the rest escape.
            many if all_terminate => many[0],
            many => find_common_post_dominator_with_ignored_break(self.pool, many, cont)?,
        };
        Some(self.step_past_break_blocks(merge, cont, &analysis.body))
    }

    /// Walk the merge candidate past blocks that are not load-bearing — no
    /// operations, no phis, a lone unconditional branch — since the real
    /// convergence point lies beyond the breaking path. Ladders and
    /// re-entries into the body stop the walk.
    fn step_past_break_blocks(&self, mut merge: NodeId, cont: NodeId, body: &[NodeId]) -> NodeId {
        for _ in 0..self.pool.len() {
            let node = &self.pool[merge];
            if node.is_ladder
                || !node.ir.operations.is_empty()
                || !node.ir.phis.is_empty()
            {
                break;
            }
            let next = match node.ir.terminator {
                Terminator::Branch { target } => target,
                _ => break,
            };
            if next == cont || body.contains(&next) {
                break;
            }
            merge = next;
        }
        merge
    }

    /// Whether an edge out of a loop body lands somewhere legal: the merge,
    /// an enclosing construct's target, a terminating escape, or a chain of
    /// non-load-bearing break blocks reaching one of those.
    pub(crate) fn break_path_is_legal(
        &self,
        start: NodeId,
        merge: Option<NodeId>,
        cont: NodeId,
        enclosing: &HashSet<NodeId>,
    ) -> bool {
        let mut cur = start;
        for _ in 0..self.pool.len() {
            if Some(cur) == merge || enclosing.contains(&cur) {
                return true;
            }
            if self.pool[cur].ir.terminator.is_exit() {
                return true;
            }
            if !self.pool[cur].ir.operations.is_empty() {
                return false;
            }
            match self.pool[cur].ir.terminator {
                Terminator::Branch { target } if target != cont => cur = target,
                _ => return false,
            }
        }
        false
    }

    /// Annotate every loop header. Outer loops first, so inner loops can see
    /// the enclosing merge/continue targets when classifying their exits.
    pub(crate) fn find_loops(&mut self) {
        self.pending_irreducible.clear();
        for &h in self.analyses.post_order.clone().iter().rev() {
            if self.pool[h].pred_back_edges.len() != 1 {
                continue;
            }
            let cont = self.pool[h].pred_back_edges[0];
            self.loop_state.insert(h, LoopState::Analyzed);
            let analysis = self.analyze_loop(h, cont);
            if !analysis.irreducible_entries.is_empty() {
                log::debug!(
                    "loop `{}` has {} irreducible entries",
                    self.pool[h].name,
                    analysis.irreducible_entries.len()
                );
                self.pending_irreducible
                    .push((h, analysis.irreducible_entries.clone()));
                self.loop_state.insert(h, LoopState::Unclassified);
                continue;
            }
            log::trace!(
                "loop `{}`: {} exits ({} dominated, {} inner, {} non-dominated, {} continue-bound)",
                self.pool[h].name,
                analysis.direct_exits.len(),
                analysis.dominated_exit.len(),
                analysis.inner_dominated_exit.len(),
                analysis.non_dominated_exit.len(),
                analysis.dominated_continue_exit.len()
            );
            let merge = self.analyze_loop_merge(h, cont, &analysis);
            let node = &mut self.pool[h];
            node.merge = MergeType::Loop;
            node.loop_continue_block = Some(cont);
            node.loop_merge_block = merge;
            self.loop_state.insert(h, LoopState::MergeChosen);
            log::trace!(
                "loop header `{}`: continue `{}`, merge {:?}",
                self.pool[h].name,
                self.pool[cont].name,
                merge.map(|m| self.pool[m].name.clone())
            );
        }
        self.update_structured_loop_merge_targets();
    }

    /// Rewrite loops whose body branches to the merge before the continue:
    /// the merge has several body-side entries, or its single body-side
    /// entry is the continue block itself. A ladder takes over the branch to
    /// the merge and the merged phi value is materialized at its tail.
    pub(crate) fn rewrite_transposed_loops(&mut self) -> bool {
        let mut changed = false;
        for h in self.loop_headers() {
            let merge = match self.pool[h].loop_merge_block {
                Some(m) => m,
                None => {
                    self.mark_loop_finalized(h);
                    continue;
                }
            };
            let cont = self.pool[h].loop_continue_block.expect("annotated loop");
            let body_preds: Vec<NodeId> = self.pool[merge]
                .preds
                .iter()
                .copied()
                .filter(|&p| {
                    !self.pool[merge].pred_back_edges.contains(&p) && self.pool.dominates(h, p)
                })
                .collect();

            let transposed = !self.pool[merge].is_ladder
                && match body_preds.as_slice() {
                    [] => false,
                    [single] => *single == cont,
                    _ => true,
                };
            if !transposed {
                self.mark_loop_finalized(h);
                continue;
            }
            log::debug!(
                "transposed loop `{}`: rerouting merge `{}` through a ladder",
                self.pool[h].name,
                self.pool[merge].name
            );
            let has_outside_preds = self.pool[merge]
                .forward_preds()
                .any(|p| !self.pool.dominates(h, p));
            let ladder = if has_outside_preds {
                self.create_ladder_block(h, merge, "ladder")
            } else {
                self.create_helper_pred_block(merge)
            };
            self.pool[h].loop_merge_block = Some(ladder);
            self.loop_state.insert(h, LoopState::LadderMaterialized);
            changed = true;
        }
        if changed {
            // Post-dominance is stale; every header reclassifies next pass.
            for h in self.loop_headers() {
                self.loop_state.insert(h, LoopState::Unclassified);
            }
        }
        changed
    }

    fn mark_loop_finalized(&mut self, header: NodeId) {
        if matches!(
            self.loop_state.get(header),
            Some(LoopState::MergeChosen | LoopState::LadderMaterialized)
        ) {
            self.loop_state.insert(header, LoopState::Finalized);
        }
    }

    /// A node that only funnels control into a merge: no operations and an
    /// unconditional branch (phis are allowed — ladders carry merged
    /// values).
    pub(crate) fn is_merge_funnel(&self, node: NodeId) -> bool {
        self.pool[node].ir.operations.is_empty()
            && matches!(self.pool[node].ir.terminator, Terminator::Branch { .. })
    }

    /// Annotated loop headers in forward post-order (inner first).
    pub(crate) fn loop_headers(&self) -> Vec<NodeId> {
        self.analyses
            .post_order
            .iter()
            .copied()
            .filter(|&n| self.pool[n].merge == MergeType::Loop)
            .collect()
    }

    /// The innermost loop header whose body contains `node`, if any.
    pub(crate) fn innermost_loop_header_for(&self, node: NodeId) -> Option<NodeId> {
        let mut best: Option<NodeId> = None;
        for (h, data) in self.pool.iter() {
            if h == node || data.pred_back_edges.len() != 1 {
                continue;
            }
            let cont = data.pred_back_edges[0];
            if !self.pool.dominates(h, node) {
                continue;
            }
            let in_body = node == cont || self.analyses.query_reachability(node, cont);
            if !in_body {
                continue;
            }
            match best {
                Some(b) if self.pool[b].dom_depth >= data.dom_depth => {}
                _ => best = Some(h),
            }
        }
        best
    }

    /// Merge/continue targets of every construct strictly enclosing
    /// `header`: the legal escape targets for edges leaving its body.
    pub(crate) fn enclosing_legal_targets(&self, header: NodeId) -> HashSet<NodeId> {
        let mut targets = HashSet::new();
        for (h, data) in self.pool.iter() {
            if h == header || !self.pool.dominates(h, header) {
                continue;
            }
            if data.merge == MergeType::Loop {
                if let Some(m) = data.loop_merge_block {
                    targets.insert(m);
                }
                if let Some(c) = data.loop_continue_block {
                    targets.insert(c);
                }
            } else if data.merge == MergeType::Selection {
                if let Some(m) = data.selection_merge_block {
                    targets.insert(m);
                }
            }
        }
        targets
    }

    /// Every edge leaving a loop body must reach the loop merge,
    /// the continue, or a legal enclosing target. Remaining exits are
    /// funnelled through a dispatch ladder that becomes the merge and
    /// re-branches on a synthesized selector phi.
    pub(crate) fn rewrite_invalid_loop_breaks(&mut self) -> bool {
        let mut changed = false;
        for h in self.loop_headers() {
            let cont = self.pool[h].loop_continue_block.expect("annotated loop");
            let merge = self.pool[h].loop_merge_block;
            let (body, _) = self.collect_loop_body(h, cont);
            let body_set: HashSet<NodeId> = body.iter().copied().collect();
            let enclosing = self.enclosing_legal_targets(h);

            let mut invalid: Vec<NodeId> = Vec::new();
            for &n in &body {
                let succs: Vec<NodeId> = self.pool[n].forward_succs().collect();
                for s in succs {
                    if body_set.contains(&s)
                        || s == cont
                        || self.break_path_is_legal(s, merge, cont, &enclosing)
                    {
                        continue;
                    }
                    invalid.push(s);
                }
            }
            sort_candidates(self.pool, &mut invalid);
            if invalid.is_empty() {
                continue;
            }

            let mut targets = invalid;
            if let Some(m) = merge {
                if !targets.contains(&m) {
                    targets.push(m);
                }
            }
            sort_candidates(self.pool, &mut targets);

            if targets.len() == 1 {
                // A single stray target simply becomes the merge.
                self.pool[h].loop_merge_block = Some(targets[0]);
                self.loop_state.insert(h, LoopState::MergeChosen);
                continue;
            }

            log::debug!(
                "loop `{}` breaks to {} distinct targets; building dispatch ladder",
                self.pool[h].name,
                targets.len()
            );
            let dispatch = self.create_dispatch_ladder(h, &targets);
            self.pool[h].loop_merge_block = Some(dispatch);
            self.loop_state.insert(h, LoopState::LadderMaterialized);
            changed = true;
        }
        if changed {
            self.update_structured_loop_merge_targets();
        }
        changed
    }

    /// A ladder that captures several break targets behind one merge block:
    /// every rewritten edge records a selector constant in a phi, and the
    /// ladder re-branches on it.
    fn create_dispatch_ladder(&mut self, header: NodeId, targets: &[NodeId]) -> NodeId {
        let name = format!("{}.ladder", self.pool[header].name);
        let dispatch = self.pool.create_node(name.clone());
        self.pool[dispatch].is_ladder = true;

        let selector = self.func.synth_value(format!("{name}.sel"));
        let mut selector_phi = Phi {
            result: selector,
            incoming: Vec::new(),
        };
        let mut dispatch_phis = Vec::new();
        let mut seen_preds: HashSet<NodeId> = HashSet::new();

        for (i, &target) in targets.iter().enumerate() {
            let mut rewrite_preds: Vec<NodeId> = self.pool[target]
                .preds
                .iter()
                .copied()
                .filter(|&p| {
                    !self.pool[target].pred_back_edges.contains(&p)
                        && p != dispatch
                        && self.pool.dominates(header, p)
                })
                .collect();

            // A conditional that breaks to two distinct targets would need
            // two selector values for one predecessor; give its later arms
            // a passthrough each so every dispatch pred carries one value.
            for p in &mut rewrite_preds {
                if !seen_preds.insert(*p) {
                    let split = self
                        .pool
                        .create_node(format!("{}.ladder", self.pool[*p].name));
                    self.pool[split].is_ladder = true;
                    self.pool[split].ir.terminator = Terminator::Branch { target };
                    self.pool.retarget_branch(*p, target, split);
                    self.pool.add_branch(split, target);
                    for phi in &mut self.pool[target].ir.phis {
                        for inc in &mut phi.incoming {
                            if inc.block == *p {
                                inc.block = split;
                            }
                        }
                    }
                    seen_preds.insert(split);
                    *p = split;
                }
            }

            let case_value = if targets.len() == 2 {
                self.func.values.push(Value {
                    kind: ValueKind::Bool(i == 0),
                })
            } else {
                self.func.values.push(Value {
                    kind: ValueKind::Int(i as i64),
                })
            };

            // Materialize the target's phi inputs at the dispatch block.
            let phis = self.pool[target].ir.phis.clone();
            let mut target_phis = phis.clone();
            for (pi, phi) in phis.iter().enumerate() {
                let moved: Vec<Incoming<NodeId>> = phi
                    .incoming
                    .iter()
                    .copied()
                    .filter(|inc| rewrite_preds.contains(&inc.block))
                    .collect();
                if moved.is_empty() {
                    continue;
                }
                let merged = if moved.len() == 1 {
                    moved[0].value
                } else {
                    let value = self.func.synth_value(format!("{name}.phi"));
                    dispatch_phis.push(Phi {
                        result: value,
                        incoming: moved,
                    });
                    value
                };
                target_phis[pi]
                    .incoming
                    .retain(|inc| !rewrite_preds.contains(&inc.block));
                target_phis[pi].incoming.push(Incoming {
                    block: dispatch,
                    value: merged,
                });
            }
            self.pool[target].ir.phis = target_phis;

            for &p in &rewrite_preds {
                selector_phi.incoming.push(Incoming {
                    block: p,
                    value: case_value,
                });
                self.pool.retarget_branch(p, target, dispatch);
            }
            self.pool.add_branch(dispatch, target);
        }

        dispatch_phis.insert(0, selector_phi);
        self.pool[dispatch].ir.phis = dispatch_phis;
        self.pool[dispatch].ir.terminator = if targets.len() == 2 {
            Terminator::Condition {
                cond: selector,
                true_target: targets[0],
                false_target: targets[1],
            }
        } else {
            Terminator::Switch {
                selector,
                cases: targets
                    .iter()
                    .enumerate()
                    .map(|(i, &target)| SwitchCase {
                        value: i as i64,
                        target,
                        is_default: i == targets.len() - 1,
                    })
                    .collect(),
            }
        };
        dispatch
    }

    /// Split shared loop-merge scopes: a loop merge entered both from the
    /// loop body and from unrelated control flow gets a ladder so the body
    /// exits funnel through a block the construct owns.
    pub(crate) fn split_merge_scopes(&mut self) -> bool {
        let mut changed = false;
        for h in self.loop_headers() {
            let merge = match self.pool[h].loop_merge_block {
                Some(m) => m,
                None => continue,
            };
            let (inside, outside): (Vec<NodeId>, Vec<NodeId>) = self.pool[merge]
                .forward_preds()
                .partition(|&p| self.pool.dominates(h, p));
            if inside.is_empty() || outside.is_empty() {
                continue;
            }
            if let [single] = inside.as_slice() {
                if self.is_merge_funnel(*single) {
                    continue;
                }
            }
            log::debug!(
                "splitting shared merge `{}` of loop `{}`",
                self.pool[merge].name,
                self.pool[h].name
            );
            let ladder = self.create_ladder_block(h, merge, "ladder");
            self.pool[h].loop_merge_block = Some(ladder);
            self.loop_state.insert(h, LoopState::LadderMaterialized);
            changed = true;
        }
        if changed {
            self.update_structured_loop_merge_targets();
        }
        changed
    }

    /// Resolve irreducible loop entries by duplicating the entered node for
    /// its external predecessors, reducing the region to a natural loop.
    pub(crate) fn duplicate_impossible_merge_constructs(&mut self) -> bool {
        let mut changed = false;
        for (header, entries) in self.pending_irreducible.clone() {
            for node in entries {
                let external: Vec<NodeId> = self.pool[node]
                    .forward_preds()
                    .filter(|&p| !self.pool.dominates(header, p) && p != header)
                    .collect();
                if external.is_empty() {
                    continue;
                }
                if !self.can_duplicate_phis(node) || self.node_values_escape(node) {
                    log::warn!(
                        "cannot duplicate `{}` to reduce loop `{}`",
                        self.pool[node].name,
                        self.pool[header].name
                    );
                    continue;
                }
                self.duplicate_node(node, &external);
                changed = true;
            }
        }
        if changed {
            self.pending_irreducible.clear();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use crate::cfg::{NodeId, NodePool, Structurizer};
    use crate::ir::FunctionBuilder;
    use crate::translate::import;

    fn node_named(pool: &NodePool, name: &str) -> NodeId {
        pool.iter()
            .find(|(_, n)| n.name == name)
            .map(|(id, _)| id)
            .unwrap_or_else(|| panic!("no node `{name}`"))
    }

    #[test]
    fn loop_body_and_exit_classification() {
        // entry → h; h: br_if c, q, exit; q: br_if c2, body, ret_blk;
        // body → h (back-edge); ret_blk: return
        let mut fb = FunctionBuilder::new("f");
        let c = fb.value("c");
        let c2 = fb.value("c2");
        let h = fb.create_block("h");
        let q = fb.create_block("q");
        let body = fb.create_block("body");
        let ret_blk = fb.create_block("ret_blk");
        let exit = fb.create_block("exit");
        let done = fb.create_block("done");
        fb.br(h);
        fb.switch_to_block(h);
        fb.br_if(c, q, exit);
        fb.switch_to_block(q);
        fb.br_if(c2, body, ret_blk);
        fb.switch_to_block(body);
        fb.br(h);
        fb.switch_to_block(ret_blk);
        fb.ret(None);
        fb.switch_to_block(exit);
        fb.opaque_void("teardown", &[]);
        fb.br(done);
        fb.switch_to_block(done);
        fb.ret(None);

        let mut func = fb.build();
        let mut pool = NodePool::new();
        let entry = import(&func, &mut pool).unwrap();
        let h_n = node_named(&pool, "h");
        let q_n = node_named(&pool, "q");
        let body_n = node_named(&pool, "body");
        let ret_n = node_named(&pool, "ret_blk");
        let exit_n = node_named(&pool, "exit");

        let s = Structurizer::new(&mut pool, &mut func, entry);
        let analysis = s.analyze_loop(h_n, body_n);

        let mut loop_body = analysis.body.clone();
        loop_body.sort();
        let mut expected = vec![h_n, q_n, body_n];
        expected.sort();
        assert_eq!(loop_body, expected);
        assert!(analysis.irreducible_entries.is_empty());

        // Both exits leave the body; both are dominated by the header.
        assert_eq!(analysis.direct_exits.len(), 2);
        assert!(analysis.direct_exits.contains(&exit_n));
        assert!(analysis.direct_exits.contains(&ret_n));
        assert!(analysis.non_dominated_exit.is_empty());

        // The returning arm does not constrain the merge.
        let merge = s.analyze_loop_merge(h_n, body_n, &analysis);
        assert_eq!(merge, Some(exit_n));
    }

    #[test]
    fn multi_entry_cycle_is_reported() {
        // a: br_if cond, b, c; b → c; c → b — two entries into one cycle.
        let mut fb = FunctionBuilder::new("f");
        let cond = fb.value("cond");
        let b = fb.create_block("b");
        let c = fb.create_block("c");
        fb.br_if(cond, b, c);
        fb.switch_to_block(b);
        fb.br(c);
        fb.switch_to_block(c);
        fb.br(b);

        let mut func = fb.build();
        let mut pool = NodePool::new();
        let entry = import(&func, &mut pool).unwrap();
        let b_n = node_named(&pool, "b");
        let c_n = node_named(&pool, "c");

        let s = Structurizer::new(&mut pool, &mut func, entry);
        let (body, irreducible) = s.collect_loop_body(b_n, c_n);
        assert_eq!(body, vec![b_n]);
        assert_eq!(irreducible, vec![c_n]);
    }
}
