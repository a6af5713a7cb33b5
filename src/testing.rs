//! Test doubles: an in-memory event implementation for embedders without
//! their own event type, and a recording sink primitive.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{Event, PrimitiveDescriptor, SharedEvent, Value};

/// `HashMap`-backed event. All instances spawned from one meta share a
/// property-name table, so IDs are stable across event names.
#[derive(Debug)]
pub struct MapEvent {
    name: String,
    properties: Arc<PropertyTable>,
    values: Mutex<HashMap<i64, Value>>,
}

#[derive(Debug, Default)]
struct PropertyTable {
    names: Mutex<Vec<String>>,
}

impl PropertyTable {
    fn id_of(&self, name: &str) -> i64 {
        self.names
            .lock()
            .iter()
            .position(|n| n == name)
            .map(|i| i as i64)
            .unwrap_or(-1)
    }

    fn declare(&self, name: &str) -> i64 {
        let mut names = self.names.lock();
        if let Some(i) = names.iter().position(|n| n == name) {
            return i as i64;
        }
        names.push(name.to_string());
        (names.len() - 1) as i64
    }
}

impl MapEvent {
    /// A meta instance declaring the given property names up front.
    pub fn meta<I, S>(property_names: I) -> SharedEvent
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table = Arc::new(PropertyTable::default());
        for name in property_names {
            table.declare(name.as_ref());
        }
        Arc::new(MapEvent {
            name: String::new(),
            properties: table,
            values: Mutex::new(HashMap::new()),
        })
    }

    /// Builds an instance from a meta event with named properties set.
    ///
    /// Panics on undeclared property names; declare everything in
    /// [`MapEvent::meta`].
    pub fn with_props(meta: &SharedEvent, name: &str, props: &[(&str, Value)]) -> SharedEvent {
        let event = meta
            .new_instance(name)
            .expect("meta event refused to create an instance");
        for (prop, value) in props {
            let id = meta.property_id(prop);
            assert!(id >= 0, "property '{prop}' was not declared on the meta event");
            event.set(id, value.clone());
        }
        event
    }
}

impl Event for MapEvent {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_instance(&self, name: &str) -> Option<SharedEvent> {
        Some(Arc::new(MapEvent {
            name: name.to_string(),
            properties: Arc::clone(&self.properties),
            values: Mutex::new(HashMap::new()),
        }))
    }

    fn property_id(&self, name: &str) -> i64 {
        self.properties.id_of(name)
    }

    fn get(&self, id: i64) -> Option<Value> {
        self.values.lock().get(&id).cloned()
    }

    fn set(&self, id: i64, value: Value) {
        self.values.lock().insert(id, value);
    }
}

pub type RecorderLog = Arc<Mutex<Vec<(Value, Value)>>>;

/// Sink primitive recording every `(parameter, context)` pair it receives.
#[derive(Debug)]
pub struct Recorder {
    log: RecorderLog,
}

impl Recorder {
    pub fn node() -> (Arc<PrimitiveNode>, RecorderLog) {
        let log: RecorderLog = Arc::new(Mutex::new(Vec::new()));
        let node = PrimitiveNode::new(
            "Recorder",
            Box::new(Recorder {
                log: Arc::clone(&log),
            }),
        );
        (node, log)
    }
}

impl Primitive for Recorder {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "Recorder".into(),
            description: "records every (parameter, context) pair it receives".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, _node: &PrimitiveNode, param: Value, ctx: &Value) {
        self.log.lock().push((param, ctx.clone()));
    }

    fn same_config(&self, _other: &dyn Primitive) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_event_round_trips_properties() {
        let meta = MapEvent::meta(["pid", "path"]);
        let event = MapEvent::with_props(
            &meta,
            "FileCreated",
            &[("pid", Value::Int(42)), ("path", "a.ps1".into())],
        );
        assert_eq!(event.name(), "FileCreated");
        let pid = meta.property_id("pid");
        assert_eq!(event.get(pid), Some(Value::Int(42)));
        assert_eq!(meta.property_id("missing"), -1);
    }
}
