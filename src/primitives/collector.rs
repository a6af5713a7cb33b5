use std::any::Any;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{EngineError, PrimitiveDescriptor, Value};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CollectorConfig {
    pub source_count: usize,
    /// Per-slot lifetime in milliseconds; omitted slots never expire.
    #[serde(default)]
    pub timeouts: Option<Vec<u64>>,
}

impl CollectorConfig {
    pub(crate) fn validate(&self, kind: &str) -> Result<(), EngineError> {
        if self.source_count == 0 {
            return Err(EngineError::Validation(format!(
                "{kind} SourceCount must be positive"
            )));
        }
        if let Some(timeouts) = &self.timeouts {
            if timeouts.len() != self.source_count {
                return Err(EngineError::Validation(format!(
                    "{kind} Timeouts must list one entry per source, got {} for {}",
                    timeouts.len(),
                    self.source_count
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn deadline_for(&self, index: usize) -> Option<Instant> {
        self.timeouts
            .as_ref()
            .map(|t| Instant::now() + Duration::from_millis(t[index]))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SlotEntry {
    pub(crate) ctx: Value,
    pub(crate) deadline: Option<Instant>,
}

/// Decodes the collector signal parameter: a slot index, optionally wrapped
/// in a list with a cancel flag.
pub(crate) fn parse_slot_param(param: &Value) -> Option<(usize, bool)> {
    match param {
        Value::Int(index) if *index >= 0 => Some((*index as usize, false)),
        Value::List(items) => {
            let index = items.first()?.as_int()?;
            if index < 0 {
                return None;
            }
            let cancel = match items.get(1) {
                None => false,
                Some(Value::Bool(b)) => *b,
                Some(Value::Int(n)) => *n != 0,
                Some(_) => return None,
            };
            Some((index as usize, cancel))
        }
        _ => None,
    }
}

/// Unordered join: waits until every indexed slot has been triggered, then
/// emits the ordered list of slot contexts and clears. Slots past their
/// deadline are expired lazily whenever a new signal arrives.
#[derive(Debug)]
pub struct Collector {
    config: CollectorConfig,
    slots: Mutex<Vec<Option<SlotEntry>>>,
}

impl Collector {
    pub fn new(config: CollectorConfig) -> Result<Self, EngineError> {
        config.validate("Collector")?;
        let slots = (0..config.source_count).map(|_| None).collect();
        Ok(Self {
            config,
            slots: Mutex::new(slots),
        })
    }
}

impl Primitive for Collector {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "Collector".into(),
            description: "joins signals from several sources, in any order".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let Some((index, cancel)) = parse_slot_param(&param) else {
            warn!(param = %param, "Collector expects a slot index parameter");
            return;
        };
        let mut slots = self.slots.lock();
        if index >= slots.len() {
            warn!(index, "Collector slot index out of range");
            return;
        }
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
            for slot in slots.iter_mut() {
                *slot = None;
            }
            node.output().trigger(&Value::List(out));
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<Collector>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// State shared with the keyed variant: an in-order collection cursor.
#[derive(Debug)]
pub(crate) struct OrderedSlots {
    pub(crate) next: usize,
    pub(crate) filled: Vec<Option<SlotEntry>>,
}

impl OrderedSlots {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            next: 0,
            filled: (0..count).map(|_| None).collect(),
        }
    }

    fn clear_from(&mut self, index: usize) {
        for slot in self.filled.iter_mut().skip(index) {
            *slot = None;
        }
        self.next = index;
    }

    /// Rewinds the cursor to the earliest satisfied slot whose deadline has
    /// passed.
    pub(crate) fn expire(&mut self, now: Instant) {
        for i in 0..self.next {
            if self.filled[i]
                .as_ref()
                .and_then(|e| e.deadline)
                .is_some_and(|d| now > d)
            {
                debug!(slot = i, "in-order slot expired, rewinding");
                self.clear_from(i);
                return;
            }
        }
    }

    /// Applies one trigger; returns the completed context list when the
    /// cursor has walked every slot.
    pub(crate) fn apply(
        &mut self,
        index: usize,
        cancel: bool,
        entry: impl FnOnce() -> SlotEntry,
    ) -> Option<Vec<Value>> {
        if cancel {
            if index < self.next {
                self.clear_from(index);
            }
            return None;
        }
        if index != self.next {
            return None;
        }
        self.filled[index] = Some(entry());
        self.next += 1;
        if self.next < self.filled.len() {
            return None;
        }
        let out = self.filled.iter().flatten().map(|e| e.ctx.clone()).collect();
        self.clear_from(0);
        Some(out)
    }
}

/// Ordered join: accepts only the next expected slot index; a cancel or a
/// lapsed deadline rewinds the cursor. Emits the ordered context list once
/// the cursor completes a pass.
#[derive(Debug)]
pub struct CollectorInOrder {
    config: CollectorConfig,
    state: Mutex<OrderedSlots>,
}

impl CollectorInOrder {
    pub fn new(config: CollectorConfig) -> Result<Self, EngineError> {
        config.validate("CollectorInOrder")?;
        let state = OrderedSlots::new(config.source_count);
        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }
}

impl Primitive for CollectorInOrder {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "CollectorInOrder".into(),
            description: "joins signals from several sources in strict order".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let Some((index, cancel)) = parse_slot_param(&param) else {
            warn!(param = %param, "CollectorInOrder expects a slot index parameter");
            return;
        };
        let mut state = self.state.lock();
        if index >= state.filled.len() {
            warn!(index, "CollectorInOrder slot index out of range");
            return;
        }
        state.expire(Instant::now());
        let completed = state.apply(index, cancel, || SlotEntry {
            ctx: ctx.clone(),
            deadline: self.config.deadline_for(index),
        });
        if let Some(out) = completed {
            node.output().trigger(&Value::List(out));
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<CollectorInOrder>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ParamTemplate;
    use crate::testing::Recorder;

    fn collector(count: usize, timeouts: Option<Vec<u64>>) -> std::sync::Arc<PrimitiveNode> {
        PrimitiveNode::new(
            "Collector",
            Box::new(
                Collector::new(CollectorConfig {
                    source_count: count,
                    timeouts,
                })
                .unwrap(),
            ),
        )
    }

    fn in_order(count: usize, timeouts: Option<Vec<u64>>) -> std::sync::Arc<PrimitiveNode> {
        PrimitiveNode::new(
            "CollectorInOrder",
            Box::new(
                CollectorInOrder::new(CollectorConfig {
                    source_count: count,
                    timeouts,
                })
                .unwrap(),
            ),
        )
    }

    #[test]
    fn unordered_join_emits_contexts_in_slot_order() {
        let node = collector(2, None);
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(1), &Value::Str("second".into()));
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(0), &Value::Str("first".into()));

        let hits = log.lock();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].1,
            Value::List(vec![Value::Str("first".into()), Value::Str("second".into())])
        );
    }

    #[test]
    fn cancel_clears_a_slot() {
        let node = collector(2, None);
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(0), &Value::Null);
        node.trigger(
            Value::List(vec![Value::Int(0), Value::Bool(true)]),
            &Value::Null,
        );
        node.trigger(Value::Int(1), &Value::Null);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn expired_slots_are_pruned_on_the_next_trigger() {
        let node = collector(2, Some(vec![30, 10_000]));
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(0), &Value::Null);
        std::thread::sleep(Duration::from_millis(60));
        node.trigger(Value::Int(1), &Value::Null);
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(0), &Value::Null);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn in_order_join_ignores_out_of_order_triggers() {
        let node = in_order(2, None);
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(1), &Value::Str("x".into()));
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(0), &Value::Str("a".into()));
        node.trigger(Value::Int(1), &Value::Str("b".into()));

        let hits = log.lock();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].1,
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())])
        );
    }

    #[test]
    fn in_order_cancel_rewinds_the_cursor() {
        let node = in_order(3, None);
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(0), &Value::Str("a".into()));
        node.trigger(Value::Int(1), &Value::Str("b".into()));
        node.trigger(
            Value::List(vec![Value::Int(0), Value::Bool(true)]),
            &Value::Null,
        );
        node.trigger(Value::Int(2), &Value::Str("c".into()));
        assert!(log.lock().is_empty());

        node.trigger(Value::Int(0), &Value::Str("a2".into()));
        node.trigger(Value::Int(1), &Value::Str("b2".into()));
        node.trigger(Value::Int(2), &Value::Str("c2".into()));
        let hits = log.lock();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].1,
            Value::List(vec![
                Value::Str("a2".into()),
                Value::Str("b2".into()),
                Value::Str("c2".into()),
            ])
        );
    }

    #[test]
    fn in_order_rewinds_when_an_earlier_slot_expires() {
        let node = in_order(2, Some(vec![30, 10_000]));
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(0), &Value::Null);
        std::thread::sleep(Duration::from_millis(60));
        // slot 0 lapsed; the cursor rewinds and slot 1 is not accepted
        node.trigger(Value::Int(1), &Value::Null);
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(0), &Value::Null);
        node.trigger(Value::Int(1), &Value::Null);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn config_validation_rejects_bad_shapes() {
        assert!(Collector::new(CollectorConfig {
            source_count: 0,
            timeouts: None,
        })
        .is_err());
        assert!(CollectorInOrder::new(CollectorConfig {
            source_count: 2,
            timeouts: Some(vec![1]),
        })
        .is_err());
    }
}
