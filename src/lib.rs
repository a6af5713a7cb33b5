pub mod engine;
pub mod primitives;
pub mod signal;
pub mod testing;
pub mod types;

pub use engine::{Actor, Engine, FactoryContext, PrimitiveFactory, Registry};
pub use primitives::{Primitive, PrimitiveNode};
pub use signal::{MacroExpr, ParamTemplate, SignalSource, SignalTarget};
pub use types::*;
