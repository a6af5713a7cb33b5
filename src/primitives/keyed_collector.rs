use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::warn;

use crate::primitives::collector::{CollectorConfig, OrderedSlots, SlotEntry};
use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{EngineError, PrimitiveDescriptor, Value};

/// Correlation key extracted from the first element of the keyed signal
/// parameter. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    Int(i64),
    Str(String),
    Bool(bool),
}

fn key_from_value(value: &Value) -> Option<Key> {
    match value {
        Value::Int(n) => Some(Key::Int(*n)),
        Value::Str(s) => Some(Key::Str(s.clone())),
        Value::Bool(b) => Some(Key::Bool(*b)),
        _ => None,
    }
}

enum KeyedOp {
    Slot { key: Key, index: usize, cancel: bool },
    Remove(Key),
}

/// Decodes `(key, source_index, cancel?)` or `(key, "RemoveKey")`.
fn parse_keyed_param(param: &Value) -> Option<KeyedOp> {
    let items = param.as_list()?;
    let key = key_from_value(items.first()?)?;
    match items.get(1)? {
        Value::Str(s) if s == "RemoveKey" => Some(KeyedOp::Remove(key)),
        Value::Int(index) if *index >= 0 => {
            let cancel = match items.get(2) {
                None => false,
                Some(Value::Bool(b)) => *b,
                Some(Value::Int(n)) => *n != 0,
                Some(_) => return None,
            };
            Some(KeyedOp::Slot {
                key,
                index: *index as usize,
                cancel,
            })
        }
        _ => None,
    }
}

/// Per-key unordered join. Keys live until their collection completes or a
/// `RemoveKey` parameter discards them; expiry stays lazy and touches only
/// the triggered key.
#[derive(Debug)]
pub struct KeyedCollector {
    config: CollectorConfig,
    slots: Mutex<HashMap<Key, Vec<Option<SlotEntry>>>>,
}

impl KeyedCollector {
    pub fn new(config: CollectorConfig) -> Result<Self, EngineError> {
        config.validate("KeyedCollector")?;
        Ok(Self {
            config,
            slots: Mutex::new(HashMap::new()),
        })
    }
}

impl Primitive for KeyedCollector {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "KeyedCollector".into(),
            description: "per-key join of signals from several sources, in any order".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let Some(op) = parse_keyed_param(&param) else {
            warn!(param = %param, "KeyedCollector expects a (key, index) parameter");
            return;
        };
        let mut map = self.slots.lock();
        let (key, index, cancel) = match op {
            KeyedOp::Remove(key) => {
                map.remove(&key);
                return;
            }
            KeyedOp::Slot { key, index, cancel } => (key, index, cancel),
        };
        let count = self.config.source_count;
        if index >= count {
            warn!(index, "KeyedCollector slot index out of range");
            return;
        }
        let slots = map
            .entry(key.clone())
            .or_insert_with(|| (0..count).map(|_| None).collect());
        if cancel {
            slots[index] = None;
        } else {
            slots[index] = Some(SlotEntry {
                ctx: ctx.clone(),
                deadline: self.config.deadline_for(index),
            });
        }
        let now = Instant::now();
        for slot in slots.iter_mut() {
            if slot
                .as_ref()
                .and_then(|e| e.deadline)
                .is_some_and(|d| now > d)
            {
                *slot = None;
            }
        }
        if slots.iter().all(Option::is_some) {
            let out: Vec<Value> = slots.iter().flatten().map(|e| e.ctx.clone()).collect();
            map.remove(&key);
            node.output().trigger(&Value::List(out));
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<KeyedCollector>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-key ordered join: one collection cursor per key.
#[derive(Debug)]
pub struct KeyedCollectorInOrder {
    config: CollectorConfig,
    slots: Mutex<HashMap<Key, OrderedSlots>>,
}

impl KeyedCollectorInOrder {
    pub fn new(config: CollectorConfig) -> Result<Self, EngineError> {
        config.validate("KeyedCollectorInOrder")?;
        Ok(Self {
            config,
            slots: Mutex::new(HashMap::new()),
        })
    }
}

impl Primitive for KeyedCollectorInOrder {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "KeyedCollectorInOrder".into(),
            description: "per-key join of signals from several sources, in strict order".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let Some(op) = parse_keyed_param(&param) else {
            warn!(param = %param, "KeyedCollectorInOrder expects a (key, index) parameter");
            return;
        };
        let mut map = self.slots.lock();
        let (key, index, cancel) = match op {
            KeyedOp::Remove(key) => {
                map.remove(&key);
                return;
            }
            KeyedOp::Slot { key, index, cancel } => (key, index, cancel),
        };
        let count = self.config.source_count;
        if index >= count {
            warn!(index, "KeyedCollectorInOrder slot index out of range");
            return;
        }
        let state = map
            .entry(key.clone())
            .or_insert_with(|| OrderedSlots::new(count));
        state.expire(Instant::now());
        let completed = state.apply(index, cancel, || SlotEntry {
            ctx: ctx.clone(),
            deadline: self.config.deadline_for(index),
        });
        if let Some(out) = completed {
            map.remove(&key);
            node.output().trigger(&Value::List(out));
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<KeyedCollectorInOrder>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
