use std::any::Any;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::warn;

use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{EngineError, PrimitiveDescriptor, Value};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AccumulatorConfig {
    pub threshold: i64,
    /// Entries older than this many milliseconds fall out of the total.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug)]
struct Entry {
    value: i64,
    ctx: Value,
    arrived: Instant,
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<Entry>,
    total: i64,
}

/// Sums integer inputs toward a threshold, optionally aging entries out of
/// the window. When the running total reaches the threshold it emits a
/// context list of the form `[total, ctx1, ctx2, …]` and clears itself. The
/// string parameter `"Reset"` clears without emitting.
#[derive(Debug)]
pub struct Accumulator {
    config: AccumulatorConfig,
    state: Mutex<State>,
}

impl Accumulator {
    pub fn new(config: AccumulatorConfig) -> Result<Self, EngineError> {
        if config.threshold < 1 {
            return Err(EngineError::Validation(format!(
                "Accumulator Threshold must be positive, got {}",
                config.threshold
            )));
        }
        Ok(Self {
            config,
            state: Mutex::new(State::default()),
        })
    }
}

impl Primitive for Accumulator {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "Accumulator".into(),
            description: "sums scored inputs within a window and fires at a threshold".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        if param.as_str() == Some("Reset") {
            let mut state = self.state.lock();
            state.entries.clear();
            state.total = 0;
            return;
        }
        let value = match param.as_int() {
            Some(v) => v,
            None => {
                warn!(param = %param, "Accumulator expects an integer or \"Reset\"");
                return;
            }
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(timeout) = self.config.timeout {
            let horizon = Duration::from_millis(timeout);
            let now = Instant::now();
            while let Some(front) = state.entries.front() {
                if now.duration_since(front.arrived) > horizon {
                    state.total -= front.value;
                    state.entries.pop_front();
                } else {
                    break;
                }
            }
        }
        state.total += value;
        state.entries.push_back(Entry {
            value,
            ctx: ctx.clone(),
            arrived: Instant::now(),
        });

        if state.total >= self.config.threshold {
            // snapshot before clearing so the triggering input is included
            let mut out = Vec::with_capacity(state.entries.len() + 1);
            out.push(Value::Int(state.total));
            out.extend(state.entries.iter().map(|e| e.ctx.clone()));
            state.entries.clear();
            state.total = 0;
            node.output().trigger(&Value::List(out));
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<Accumulator>()
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

    fn accumulator(threshold: i64, timeout: Option<u64>) -> std::sync::Arc<PrimitiveNode> {
        PrimitiveNode::new(
            "Accumulator",
            Box::new(Accumulator::new(AccumulatorConfig { threshold, timeout }).unwrap()),
        )
    }

    #[test]
    fn fires_at_threshold_with_total_and_contexts() {
        let node = accumulator(60, None);
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(20), &Value::Str("a".into()));
        node.trigger(Value::Int(20), &Value::Str("b".into()));
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(30), &Value::Str("c".into()));

        let hits = log.lock();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].1,
            Value::List(vec![
                Value::Int(70),
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into()),
            ])
        );
    }

    #[test]
    fn state_clears_after_firing() {
        let node = accumulator(10, None);
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(10), &Value::Null);
        node.trigger(Value::Int(5), &Value::Null);
        assert_eq!(log.lock().len(), 1);
        node.trigger(Value::Int(5), &Value::Null);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn reset_clears_without_firing() {
        let node = accumulator(40, None);
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(30), &Value::Null);
        node.trigger(Value::Str("Reset".into()), &Value::Null);
        node.trigger(Value::Int(30), &Value::Null);
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(10), &Value::Null);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn stale_entries_age_out_of_the_total() {
        let node = accumulator(40, Some(50));
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(30), &Value::Null);
        std::thread::sleep(Duration::from_millis(80));
        // the first 30 expired, so 30 + 10 stays under the threshold
        node.trigger(Value::Int(10), &Value::Null);
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(30), &Value::Null);
        assert_eq!(log.lock().len(), 1);
    }
}
