mod param;
mod source;

pub use param::{MacroExpr, ParamTemplate};
pub use source::{SignalSource, SignalTarget};
