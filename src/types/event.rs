use std::fmt;
use std::sync::Arc;

use crate::types::Value;

pub type SharedEvent = Arc<dyn Event>;

/// The host-provided event abstraction.
///
/// Events carry a name and a set of named, dynamically typed properties.
/// Property access goes through integer IDs resolved once from the meta-event
/// instance handed to the engine; the engine caches every ID it needs at rule
/// load time and never looks names up on the hot path.
pub trait Event: Send + Sync + fmt::Debug {
    /// The event name used for dispatcher and actor lookup.
    fn name(&self) -> &str;

    /// Factory on the meta-event: a fresh instance bound to `name`, or `None`
    /// when the host cannot produce one.
    fn new_instance(&self, name: &str) -> Option<SharedEvent>;

    /// Resolves a property name to its ID; negative means unknown.
    fn property_id(&self, name: &str) -> i64;

    fn get(&self, id: i64) -> Option<Value>;

    fn set(&self, id: i64, value: Value);
}
