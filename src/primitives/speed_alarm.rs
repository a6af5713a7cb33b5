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
pub struct SpeedAlarmConfig {
    pub maximum_speed: i64,
    /// Sliding window length in seconds.
    pub period: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<(Instant, i64)>,
    total: i64,
}

/// Sliding-window rate alarm: fires once when more than `MaximumSpeed` is
/// observed within any `Period`, then clears. A zero parameter clears without
/// firing.
#[derive(Debug)]
pub struct SpeedAlarm {
    config: SpeedAlarmConfig,
    window: Duration,
    state: Mutex<State>,
}

impl SpeedAlarm {
    pub fn new(config: SpeedAlarmConfig) -> Result<Self, EngineError> {
        if config.maximum_speed < 1 {
            return Err(EngineError::Validation(format!(
                "SpeedAlarm MaximumSpeed must be positive, got {}",
                config.maximum_speed
            )));
        }
        if config.period == 0 {
            return Err(EngineError::Validation(
                "SpeedAlarm Period must be positive".into(),
            ));
        }
        Ok(Self {
            window: Duration::from_secs(config.period),
            config,
            state: Mutex::new(State::default()),
        })
    }
}

impl Primitive for SpeedAlarm {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "SpeedAlarm".into(),
            description: "fires when a sliding-window total exceeds a maximum rate".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let amount = match param.as_int() {
            Some(n) => n,
            None => {
                warn!(param = %param, "SpeedAlarm expects an integer parameter");
                return;
            }
        };
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if amount == 0 {
            state.entries.clear();
            state.total = 0;
            return;
        }
        if amount < 0 {
            warn!(param = %param, "SpeedAlarm ignores negative amounts");
            return;
        }

        let now = Instant::now();
        state.entries.push_back((now, amount));
        state.total += amount;

        if state.total > self.config.maximum_speed {
            while let Some((arrived, value)) = state.entries.front() {
                if now.duration_since(*arrived) > self.window {
                    state.total -= *value;
                    state.entries.pop_front();
                } else {
                    break;
                }
            }
            if state.total > self.config.maximum_speed {
                state.entries.clear();
                state.total = 0;
                node.output().trigger(ctx);
            }
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<SpeedAlarm>()
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

    #[test]
    fn fires_when_rate_exceeds_maximum() {
        let node = PrimitiveNode::new(
            "SpeedAlarm",
            Box::new(
                SpeedAlarm::new(SpeedAlarmConfig {
                    maximum_speed: 3,
                    period: 5,
                })
                .unwrap(),
            ),
        );
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        for _ in 0..3 {
            node.trigger(Value::Int(1), &Value::Null);
        }
        assert!(log.lock().is_empty());
        node.trigger(Value::Int(1), &Value::Null);
        assert_eq!(log.lock().len(), 1);

        // window cleared after the alarm; the next burst is counted afresh
        node.trigger(Value::Int(1), &Value::Null);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn zero_clears_without_firing() {
        let node = PrimitiveNode::new(
            "SpeedAlarm",
            Box::new(
                SpeedAlarm::new(SpeedAlarmConfig {
                    maximum_speed: 2,
                    period: 5,
                })
                .unwrap(),
            ),
        );
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(2), &Value::Null);
        node.trigger(Value::Int(0), &Value::Null);
        node.trigger(Value::Int(2), &Value::Null);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn slow_inputs_age_out_of_the_window() {
        let node = PrimitiveNode::new(
            "SpeedAlarm",
            Box::new(
                SpeedAlarm::new(SpeedAlarmConfig {
                    maximum_speed: 2,
                    period: 1,
                })
                .unwrap(),
            ),
        );
        let (sink, log) = Recorder::node();
        node.output().connect(&sink, ParamTemplate::null());

        node.trigger(Value::Int(1), &Value::Null);
        node.trigger(Value::Int(1), &Value::Null);
        std::thread::sleep(Duration::from_millis(1100));
        // both prior entries are stale, so this stays within the limit
        node.trigger(Value::Int(1), &Value::Null);
        assert!(log.lock().is_empty());
    }
}
