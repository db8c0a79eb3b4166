use crate::entity::PrimaryMap;

use super::block::{Block, BlockId, Incoming, Phi, SwitchCase, Terminator};
use super::func::Function;
use super::inst::{Inst, InstId, Op};
use super::value::{Value, ValueId};

/// Builder for constructing a [`Function`].
///
/// Manages block creation, opaque instruction emission, and terminators.
/// Tracks a "current block" cursor — instructions are appended to it.
pub struct FunctionBuilder {
    func: Function,
    current_block: BlockId,
}

impl FunctionBuilder {
    /// Create a new function builder with an `entry` block.
    pub fn new(name: impl Into<String>) -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(Block::new("entry"));
        let func = Function {
            name: name.into(),
            blocks,
            insts: PrimaryMap::new(),
            values: PrimaryMap::new(),
            entry,
        };
        Self {
            func,
            current_block: entry,
        }
    }

    /// Create a new block. Returns its `BlockId`.
    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        self.func.blocks.push(Block::new(name))
    }

    /// Switch the current block cursor to the given block.
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn entry_block(&self) -> BlockId {
        self.func.entry
    }

    /// Allocate an opaque value not produced by any instruction (a function
    /// argument or other host-defined input).
    pub fn value(&mut self, name: impl Into<String>) -> ValueId {
        self.func.values.push(Value::opaque(name))
    }

    /// Emit an opaque instruction producing a result.
    pub fn opaque(&mut self, mnemonic: impl Into<String>, args: &[ValueId]) -> ValueId {
        let mnemonic = mnemonic.into();
        let result = self.func.values.push(Value::opaque(mnemonic.clone()));
        let inst = self.func.insts.push(Inst {
            op: Op::Opaque {
                mnemonic,
                args: args.to_vec(),
            },
            result: Some(result),
        });
        self.func.blocks[self.current_block].insts.push(inst);
        result
    }

    /// Emit an opaque instruction with no result (a side effect).
    pub fn opaque_void(&mut self, mnemonic: impl Into<String>, args: &[ValueId]) -> InstId {
        let inst = self.func.insts.push(Inst {
            op: Op::Opaque {
                mnemonic: mnemonic.into(),
                args: args.to_vec(),
            },
            result: None,
        });
        self.func.blocks[self.current_block].insts.push(inst);
        inst
    }

    /// Add a phi to the current block. Returns the phi result value.
    pub fn phi(&mut self, incoming: &[(BlockId, ValueId)]) -> ValueId {
        let result = self.func.values.push(Value::opaque("phi"));
        self.func.blocks[self.current_block].phis.push(Phi {
            result,
            incoming: incoming
                .iter()
                .map(|&(block, value)| Incoming { block, value })
                .collect(),
        });
        result
    }

    // -- terminators --

    fn terminate(&mut self, terminator: Terminator<BlockId>) {
        let block = &mut self.func.blocks[self.current_block];
        debug_assert!(
            block.terminator.is_none(),
            "block `{}` already terminated",
            block.name
        );
        block.terminator = Some(terminator);
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Branch { target });
    }

    pub fn br_if(&mut self, cond: ValueId, true_target: BlockId, false_target: BlockId) {
        self.terminate(Terminator::Condition {
            cond,
            true_target,
            false_target,
        });
    }

    /// Emit a switch. `cases` are `(value, target)` pairs; `default` becomes
    /// the default arm.
    pub fn switch(&mut self, selector: ValueId, cases: &[(i64, BlockId)], default: BlockId) {
        let mut all = vec![SwitchCase {
            value: 0,
            target: default,
            is_default: true,
        }];
        all.extend(cases.iter().map(|&(value, target)| SwitchCase {
            value,
            target,
            is_default: false,
        }));
        self.terminate(Terminator::Switch {
            selector,
            cases: all,
        });
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Return { value });
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    /// Fragment discard: an implicit discard call plus a `Kill` terminator.
    pub fn kill(&mut self) {
        let inst = self.func.insts.push(Inst {
            op: Op::Discard,
            result: None,
        });
        self.func.blocks[self.current_block].insts.push(inst);
        self.terminate(Terminator::Kill);
    }

    /// Consume the builder and return the constructed `Function`.
    pub fn build(self) -> Function {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_diamond() {
        // entry: br_if c, then, else
        // then:  br merge
        // else:  br merge
        // merge: phi, return
        let mut fb = FunctionBuilder::new("diamond");
        let cond = fb.value("c");

        let then_block = fb.create_block("then");
        let else_block = fb.create_block("else");
        let merge_block = fb.create_block("merge");

        fb.br_if(cond, then_block, else_block);

        fb.switch_to_block(then_block);
        let a = fb.opaque("a", &[]);
        fb.br(merge_block);

        fb.switch_to_block(else_block);
        let b = fb.opaque("b", &[]);
        fb.br(merge_block);

        fb.switch_to_block(merge_block);
        let merged = fb.phi(&[(then_block, a), (else_block, b)]);
        fb.ret(Some(merged));

        let func = fb.build();

        assert_eq!(func.blocks.len(), 4);
        assert_eq!(
            func.blocks[func.entry].terminator,
            Some(Terminator::Condition {
                cond,
                true_target: then_block,
                false_target: else_block,
            })
        );
        assert_eq!(func.blocks[merge_block].phis.len(), 1);
        assert_eq!(func.reachable_blocks().len(), 4);
    }

    #[test]
    fn terminator_targets_and_retarget() {
        let mut fb = FunctionBuilder::new("switch");
        let sel = fb.value("sel");
        let a = fb.create_block("a");
        let b = fb.create_block("b");
        let d = fb.create_block("d");
        fb.switch(sel, &[(1, a), (2, b)], d);

        let func = fb.build();
        let mut term = func.blocks[func.entry].terminator.clone().unwrap();
        assert_eq!(term.targets(), vec![d, a, b]);

        assert_eq!(term.retarget(b, d), 1);
        assert_eq!(term.targets(), vec![d, a, d]);
    }
}
