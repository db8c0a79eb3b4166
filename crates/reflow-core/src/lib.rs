//! Structured control flow reconstruction for GPU shader IRs.
//!
//! Takes a function's control-flow graph — reducible or not — and rewrites
//! it so that every conditional branch and switch is either a loop header or
//! a selection header with a single, unambiguous merge block, and every loop
//! has a well-defined continue block. The structured shape is written back
//! as `selection_merge`/`loop_merge` marker instructions, the form SPIR-V
//! style shader IRs demand.
//!
//! Host instructions are opaque: the structurizer preserves their order
//! along every execution path and rewires nothing but control flow.

pub mod cfg;
pub mod entity;
pub mod error;
pub mod ir;
pub mod translate;

pub use error::StructurizeError;
pub use ir::{Function, FunctionBuilder};

use cfg::{NodePool, Structurizer};

/// Structurize `func` in place.
///
/// On success the function's conditionals carry merge annotations, synthetic
/// helper blocks have been inserted where required, and phis reference
/// exactly their predecessors. Unreachable input blocks are pruned to empty
/// stubs. On failure the function is left untouched except for value/inst
/// arena growth.
pub fn structurize(func: &mut Function) -> Result<(), StructurizeError> {
    let mut pool = NodePool::new();
    let entry = translate::import(func, &mut pool)?;
    {
        let mut structurizer = Structurizer::new(&mut pool, func, entry);
        structurizer.run()?;
    }
    translate::emit(func, &mut pool, entry);
    Ok(())
}
