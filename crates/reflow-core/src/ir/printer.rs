use std::fmt;
use std::fmt::Write as _;

use crate::entity::EntityRef;

use super::block::Terminator;
use super::func::Function;
use super::inst::Op;
use super::value::{ValueKind, ValueId};

fn fmt_value(func: &Function, v: ValueId, out: &mut String) -> fmt::Result {
    match &func.values[v].kind {
        ValueKind::Opaque(name) => write!(out, "%{}.{}", v.index(), name),
        ValueKind::Undef => write!(out, "undef"),
        ValueKind::Bool(b) => write!(out, "{b}"),
        ValueKind::Int(i) => write!(out, "{i}"),
    }
}

/// Render a function as plain text, one block per paragraph.
///
/// Stub blocks (cleared unreachable blocks) are skipped.
pub fn print_function(func: &Function) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "fn {} (entry: {})", func.name, func.blocks[func.entry].name);

    for (block_id, block) in func.blocks.iter() {
        if block.is_stub() {
            continue;
        }
        let _ = writeln!(out, "{}:", block.name);

        for phi in &block.phis {
            let _ = write!(out, "  ");
            let _ = fmt_value(func, phi.result, &mut out);
            let _ = write!(out, " = phi");
            for (i, inc) in phi.incoming.iter().enumerate() {
                let _ = write!(
                    out,
                    "{} [{}, ",
                    if i == 0 { "" } else { "," },
                    func.blocks[inc.block].name
                );
                let _ = fmt_value(func, inc.value, &mut out);
                let _ = write!(out, "]");
            }
            let _ = writeln!(out);
        }

        for &inst_id in &block.insts {
            let inst = &func.insts[inst_id];
            let _ = write!(out, "  ");
            if let Some(result) = inst.result {
                let _ = fmt_value(func, result, &mut out);
                let _ = write!(out, " = ");
            }
            match &inst.op {
                Op::Opaque { mnemonic, args } => {
                    let _ = write!(out, "{mnemonic}");
                    for (i, &arg) in args.iter().enumerate() {
                        let _ = write!(out, "{} ", if i == 0 { "" } else { "," });
                        let _ = fmt_value(func, arg, &mut out);
                    }
                }
                Op::Discard => {
                    let _ = write!(out, "discard");
                }
                Op::SelectionMerge { merge } => {
                    let _ = write!(out, "selection_merge {}", func.blocks[*merge].name);
                }
                Op::LoopMerge {
                    merge,
                    continue_block,
                } => {
                    let _ = write!(
                        out,
                        "loop_merge {}, {}",
                        func.blocks[*merge].name, func.blocks[*continue_block].name
                    );
                }
                Op::MergeBlockMarker => {
                    let _ = write!(out, "merge_block");
                }
                Op::ContinueBlockMarker => {
                    let _ = write!(out, "continue_block");
                }
            }
            let _ = writeln!(out);
        }

        let _ = write!(out, "  ");
        match &block.terminator {
            None => {
                let _ = writeln!(out, "<no terminator>");
            }
            Some(Terminator::Branch { target }) => {
                let _ = writeln!(out, "br {}", func.blocks[*target].name);
            }
            Some(Terminator::Condition {
                cond,
                true_target,
                false_target,
            }) => {
                let _ = write!(out, "br_if ");
                let _ = fmt_value(func, *cond, &mut out);
                let _ = writeln!(
                    out,
                    ", {}, {}",
                    func.blocks[*true_target].name, func.blocks[*false_target].name
                );
            }
            Some(Terminator::Switch { selector, cases }) => {
                let _ = write!(out, "switch ");
                let _ = fmt_value(func, *selector, &mut out);
                for case in cases {
                    if case.is_default {
                        let _ = write!(out, ", default -> {}", func.blocks[case.target].name);
                    } else {
                        let _ =
                            write!(out, ", {} -> {}", case.value, func.blocks[case.target].name);
                    }
                }
                let _ = writeln!(out);
            }
            Some(Terminator::Return { value }) => {
                let _ = write!(out, "return");
                if let Some(v) = value {
                    let _ = write!(out, " ");
                    let _ = fmt_value(func, *v, &mut out);
                }
                let _ = writeln!(out);
            }
            Some(Terminator::Unreachable) => {
                let _ = writeln!(out, "unreachable");
            }
            Some(Terminator::Kill) => {
                let _ = writeln!(out, "kill");
            }
        }

        if block_id != func.blocks.keys().last().unwrap() {
            let _ = writeln!(out);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;

    #[test]
    fn print_simple_function() {
        let mut fb = FunctionBuilder::new("f");
        let c = fb.value("c");
        let exit = fb.create_block("exit");
        let body = fb.create_block("body");
        fb.br_if(c, body, exit);
        fb.switch_to_block(body);
        fb.opaque_void("effect", &[]);
        fb.br(exit);
        fb.switch_to_block(exit);
        fb.ret(None);

        let text = print_function(&fb.build());
        assert!(text.contains("entry:"));
        assert!(text.contains("br_if"));
        assert!(text.contains("effect"));
        assert!(text.contains("return"));
    }
}
