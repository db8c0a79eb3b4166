/// Core error type for the reflow structurizer.
#[derive(Debug, thiserror::Error)]
pub enum StructurizeError {
    /// A block carries a terminator the structurizer cannot model,
    /// or no terminator at all. Fatal, no recovery.
    #[error("unsupported terminator in block `{block}`: {message}")]
    UnsupportedTerminator { block: String, message: String },

    /// The CFG failed to stabilize within the pass budget.
    #[error("control flow graph did not converge after {passes} passes")]
    NonConvergent { passes: u32 },

    /// An irreducible strongly-connected component survived the
    /// multi-back-edge and transposed-loop rewrites.
    #[error("irreducible control flow remains around block `{block}`")]
    IrreducibleRemainder { block: String },

    /// A phi references a block outside its predecessor set. Recovered
    /// locally with an undef placeholder; surfaced only when load-bearing.
    #[error("malformed phi in block `{block}`")]
    MalformedPhi { block: String },
}
