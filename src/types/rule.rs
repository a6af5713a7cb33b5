use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::types::EngineError;

/// Wildcard source event name: matches every event entering the engine.
pub const ALL_EVENTS: &str = "AllEvents";

/// Reserved source event name wired by the compiler to self-driven
/// primitives. Hosts must not use it.
pub const SYNTHETIC_SOURCE: &str = "";

/// The in-memory rule description consumed by the compiler, as produced by an
/// external rule-file parser or deserialized directly from JSON text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleSet {
    pub rules: Vec<RuleDescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleDescription {
    pub rule_name: String,
    #[serde(default)]
    pub source_events: Vec<SourceEventDescription>,
    pub primitives: Vec<PrimitiveDescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceEventDescription {
    pub event_name: String,
    #[serde(default)]
    pub connect_to: HashMap<String, ConnectionDescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrimitiveDescription {
    #[serde(rename = "Type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub connect_to: HashMap<String, ConnectionDescription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionDescription {
    #[serde(default)]
    pub signal_parameter: Option<serde_json::Value>,
    /// Connect from the sender's negative output instead of its primary one.
    #[serde(default)]
    pub trigger_on_negative: bool,
}

impl RuleDescription {
    /// Structural validation: name uniqueness, edge targets, self-loops.
    /// Registry-dependent checks (primitive types, configs, macros) are the
    /// compiler's job.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.rule_name.is_empty() {
            return Err(EngineError::Validation("rule name must not be empty".into()));
        }
        if self.primitives.is_empty() {
            return Err(EngineError::Validation(format!(
                "rule '{}' defines no primitives",
                self.rule_name
            )));
        }

        let mut names = HashSet::new();
        for p in &self.primitives {
            if p.name.is_empty() {
                return Err(EngineError::Validation(format!(
                    "rule '{}' contains a primitive with an empty name",
                    self.rule_name
                )));
            }
            if !names.insert(p.name.as_str()) {
                return Err(EngineError::Validation(format!(
                    "rule '{}' defines primitive '{}' more than once",
                    self.rule_name, p.name
                )));
            }
        }

        for se in &self.source_events {
            if se.event_name == SYNTHETIC_SOURCE {
                return Err(EngineError::Validation(format!(
                    "rule '{}' uses the reserved empty source event name",
                    self.rule_name
                )));
            }
            for (target, conn) in &se.connect_to {
                if !names.contains(target.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "rule '{}': source event '{}' connects to undefined primitive '{}'",
                        self.rule_name, se.event_name, target
                    )));
                }
                if conn.trigger_on_negative {
                    return Err(EngineError::Validation(format!(
                        "rule '{}': source event '{}' has no negative output",
                        self.rule_name, se.event_name
                    )));
                }
            }
        }

        for p in &self.primitives {
            for target in p.connect_to.keys() {
                if target == &p.name {
                    return Err(EngineError::Validation(format!(
                        "rule '{}': primitive '{}' connects to itself",
                        self.rule_name, p.name
                    )));
                }
                if !names.contains(target.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "rule '{}': primitive '{}' connects to undefined primitive '{}'",
                        self.rule_name, p.name, target
                    )));
                }
            }
        }

        Ok(())
    }
}
