//! Shared helpers for the end-to-end tests: an engine over `MapEvent` and an
//! actor that captures derived events.
#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use ruleflow::testing::MapEvent;
use ruleflow::types::{SharedEvent, Value};
use ruleflow::{Actor, Engine};

pub const PROPS: &[&str] = &[
    "creator", "path", "pid", "name", "value", "EventId", "Score", "Path", "count",
];

pub fn engine() -> (Engine, SharedEvent) {
    let meta = MapEvent::meta(PROPS.iter().copied());
    (Engine::new(Arc::clone(&meta)), meta)
}

pub type Captured = Arc<Mutex<Vec<SharedEvent>>>;

/// Registers an actor recording every event produced under `event_name`.
pub fn capture(engine: &Engine, event_name: &str) -> Captured {
    let log: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let actor: Actor = Arc::new(move |event: &SharedEvent| sink.lock().push(Arc::clone(event)));
    engine.register_actor(event_name, actor, false);
    log
}

pub fn prop(meta: &SharedEvent, event: &SharedEvent, name: &str) -> Option<Value> {
    event.get(meta.property_id(name))
}

pub fn event(meta: &SharedEvent, name: &str, props: &[(&str, Value)]) -> SharedEvent {
    MapEvent::with_props(meta, name, props)
}
