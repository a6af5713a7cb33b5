use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::engine::registry::{PrimitiveFactory, Registry};
use crate::engine::{compiler, remover};
use crate::primitives::PrimitiveNode;
use crate::signal::SignalSource;
use crate::types::{EngineError, PrimitiveDescriptor, RuleSet, SharedEvent, Value};

/// External callback invoked when a specific event name is produced.
pub type Actor = Arc<dyn Fn(&SharedEvent) + Send + Sync>;

/// The engine facade. Cheap to clone; all clones share one live graph.
///
/// Rule lifecycle calls (`add_rules`, `delete_rule`) serialize on a write
/// lock; event ingestion takes a recursive read lock, so concurrent
/// `process_event` calls (including the timer thread) and reentrant derived
/// events are fine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) meta: SharedEvent,
    pub(crate) registry: Registry,
    pub(crate) state: RwLock<EngineState>,
}

#[derive(Default)]
pub(crate) struct EngineState {
    /// One detached source per consumed event name.
    pub(crate) dispatchers: HashMap<String, Arc<SignalSource>>,
    /// Source firing on every event (the reserved `AllEvents` name).
    pub(crate) all_events: Option<Arc<SignalSource>>,
    pub(crate) actors: HashMap<String, Vec<Actor>>,
    pub(crate) rule_to_event: HashMap<String, String>,
    pub(crate) event_generators: HashMap<String, Arc<PrimitiveNode>>,
    pub(crate) pending_deletes: HashSet<String>,
    pub(crate) live_primitives: usize,
}

impl Engine {
    pub fn new(meta: SharedEvent) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                meta,
                registry: Registry::new(),
                state: RwLock::new(EngineState::default()),
            }),
        }
    }

    /// Parses and installs a batch of rules. Atomic: on any error the rules
    /// already installed from this batch are removed again.
    pub fn add_rules(&self, rules_text: &str) -> Result<(), EngineError> {
        let set: RuleSet =
            serde_json::from_str(rules_text).map_err(|e| EngineError::Parse(e.to_string()))?;
        self.inner.add_rule_set(set)
    }

    pub fn add_rules_from_file(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Parse(format!("{}: {e}", path.as_ref().display())))?;
        self.add_rules(&text)
    }

    /// Removes a rule and every primitive no other rule still needs.
    /// Idempotent; the remover's `RuleNotFound` is swallowed here.
    pub fn delete_rule(&self, rule_name: &str) {
        let mut state = self.inner.state.write();
        if let Err(err) = remover::delete_rule_locked(&mut state, rule_name) {
            debug!(%err, "delete_rule: nothing to do");
        }
    }

    pub fn register_actor(&self, event_name: &str, actor: Actor, high_priority: bool) {
        let mut state = self.inner.state.write();
        let actors = state.actors.entry(event_name.to_string()).or_default();
        if high_priority {
            actors.insert(0, actor);
        } else {
            actors.push(actor);
        }
    }

    /// Removes a previously registered actor, compared by identity.
    pub fn unregister_actor(&self, event_name: &str, actor: &Actor) {
        let mut state = self.inner.state.write();
        if let Some(actors) = state.actors.get_mut(event_name) {
            actors.retain(|a| !Arc::ptr_eq(a, actor));
            if actors.is_empty() {
                state.actors.remove(event_name);
            }
        }
    }

    /// Feeds one event through the graph. Propagation is synchronous and
    /// depth-first; every direct and derived effect completes before this
    /// returns.
    pub fn process_event(&self, event: SharedEvent) {
        self.inner.process_event(event);
    }

    pub fn rule_names(&self) -> Vec<String> {
        let state = self.inner.state.read();
        let mut names: Vec<String> = state.rule_to_event.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_rule(&self, rule_name: &str) -> bool {
        self.inner.state.read().rule_to_event.contains_key(rule_name)
    }

    /// Number of primitives in the live graph, shared ones counted once.
    pub fn live_primitive_count(&self) -> usize {
        self.inner.state.read().live_primitives
    }

    pub fn registered_primitives(&self) -> Vec<PrimitiveDescriptor> {
        self.inner.registry.descriptors()
    }

    /// Registers a host-defined primitive kind for use in rule descriptions.
    pub fn register_primitive(
        &self,
        type_name: &str,
        descriptor: PrimitiveDescriptor,
        factory: PrimitiveFactory,
    ) {
        self.inner.registry.register(type_name, descriptor, factory);
    }
}

impl EngineInner {
    fn add_rule_set(self: &Arc<Self>, set: RuleSet) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let mut installed: Vec<String> = Vec::new();
        for rule in &set.rules {
            match compiler::install_rule(self, &mut state, rule) {
                Ok(()) => installed.push(rule.rule_name.clone()),
                Err(err) => {
                    for name in installed.iter().rev() {
                        // installed in this batch, so the lookup cannot miss
                        let _ = remover::delete_rule_locked(&mut state, name);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn process_event(&self, event: SharedEvent) {
        let (dispatcher, all_events, actors) = {
            // recursive read: derived events re-enter on the same thread
            let state = self.state.read_recursive();
            (
                state.dispatchers.get(event.name()).cloned(),
                state.all_events.clone(),
                state.actors.get(event.name()).cloned().unwrap_or_default(),
            )
        };
        debug!(event = event.name(), "processing event");
        let ctx = Value::Event(Arc::clone(&event));
        if let Some(dispatcher) = dispatcher {
            dispatcher.trigger(&ctx);
        }
        if let Some(all_events) = all_events {
            all_events.trigger(&ctx);
        }
        for actor in actors {
            (*actor)(&event);
        }
    }
}
