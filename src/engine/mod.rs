mod compiler;
mod engine;
mod registry;
mod remover;

pub use engine::{Actor, Engine};
pub(crate) use engine::{EngineInner, EngineState};
pub use registry::{FactoryContext, PrimitiveFactory, Registry};
