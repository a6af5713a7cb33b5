use std::any::Any;
use std::sync::Weak;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::EngineInner;
use crate::primitives::{Primitive, PrimitiveNode};
use crate::signal::ParamTemplate;
use crate::types::{EngineError, PrimitiveDescriptor, SharedEvent, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventGeneratorConfig {
    pub new_event_name: String,
    /// Property name to literal-or-macro value.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Terminal node of a rule: synthesizes a derived event through the host's
/// meta-event factory and feeds it back into the engine dispatcher. Never
/// shared between rules, emits no outbound signal.
#[derive(Debug)]
pub struct EventGenerator {
    event_name: String,
    properties: Vec<(i64, ParamTemplate)>,
    meta: SharedEvent,
    engine: Weak<EngineInner>,
}

impl EventGenerator {
    pub fn new(
        config: EventGeneratorConfig,
        meta: &SharedEvent,
        engine: Weak<EngineInner>,
    ) -> Result<Self, EngineError> {
        if config.new_event_name.is_empty() {
            return Err(EngineError::Validation(
                "EventGenerator NewEventName must not be empty".into(),
            ));
        }
        let mut properties = Vec::with_capacity(config.properties.len());
        for (name, raw) in &config.properties {
            let id = meta.property_id(name);
            if id < 0 {
                return Err(EngineError::UnknownProperty(name.clone()));
            }
            properties.push((id, ParamTemplate::compile(raw, meta)?));
        }
        Ok(Self {
            event_name: config.new_event_name,
            properties,
            meta: meta.clone(),
            engine,
        })
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }
}

impl Primitive for EventGenerator {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "EventGenerator".into(),
            description: "synthesizes a derived event and re-enters the dispatcher".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, _node: &PrimitiveNode, _param: Value, ctx: &Value) {
        let Some(event) = self.meta.new_instance(&self.event_name) else {
            warn!(event = %self.event_name, "event factory returned no instance");
            return;
        };
        for (id, template) in &self.properties {
            match template.evaluate(ctx) {
                Ok(value) => event.set(*id, value),
                Err(err) => warn!(
                    event = %self.event_name,
                    %err,
                    "skipping derived event property"
                ),
            }
        }
        match self.engine.upgrade() {
            Some(engine) => engine.process_event(event),
            None => debug!(event = %self.event_name, "engine is gone, dropping derived event"),
        }
    }

    fn same_config(&self, _other: &dyn Primitive) -> bool {
        // one generator per rule, never shared
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
