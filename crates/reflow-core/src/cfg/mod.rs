pub mod analysis;
pub mod loops;
pub mod node;
pub mod pool;
pub mod rewrite;
pub mod selection;
pub mod structurize;

pub use analysis::Analyses;
pub use loops::LoopAnalysis;
pub use node::{MergeType, Node, NodeId, NodeIr};
pub use pool::NodePool;
pub use structurize::{LoopState, Structurizer, MAX_PASSES};
