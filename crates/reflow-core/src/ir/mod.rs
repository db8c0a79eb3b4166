pub mod block;
pub mod builder;
pub mod func;
pub mod inst;
pub mod printer;
pub mod value;

pub use block::{Block, BlockId, Incoming, Phi, SwitchCase, Terminator};
pub use builder::FunctionBuilder;
pub use func::Function;
pub use inst::{Inst, InstId, Op};
pub use printer::print_function;
pub use value::{Value, ValueId, ValueKind};
