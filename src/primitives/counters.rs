use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Deserialize;
use tracing::warn;

use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{EngineError, PrimitiveDescriptor, Value};

/// Lock-free counter with no outbound signal; its value is read synchronously
/// by `Checker`. A positive parameter counts one up, a negative one counts
/// one down, zero resets. As with the other counters, any non-zero parameter
/// is exactly one step regardless of its magnitude.
#[derive(Debug, Default)]
pub struct BasicCounter {
    value: AtomicI64,
}

impl BasicCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Primitive for BasicCounter {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "BasicCounter".into(),
            description: "counter stepped up or down by the signal's sign, readable by Checker"
                .into(),
            self_driven: false,
        }
    }

    fn trigger(&self, _node: &PrimitiveNode, param: Value, _ctx: &Value) {
        match param.as_int() {
            Some(0) => self.value.store(0, Ordering::SeqCst),
            Some(delta) if delta > 0 => {
                self.value.fetch_add(1, Ordering::SeqCst);
            }
            Some(_) => {
                self.value.fetch_sub(1, Ordering::SeqCst);
            }
            None => warn!(param = %param, "BasicCounter expects an integer parameter"),
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other.as_any().is::<BasicCounter>()
    }

    fn check(&self, _key: &Value) -> Option<i64> {
        Some(self.value.load(Ordering::SeqCst))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CountdownCounterConfig {
    pub start_from: i64,
}

/// Counts down from `StartFrom`; fires exactly once per cycle when the count
/// reaches zero, then pauses its inbound edges so upstream (typically a
/// timer) may stop issuing. A zero parameter restarts the cycle and resumes
/// the inbound edges.
#[derive(Debug)]
pub struct CountdownCounter {
    config: CountdownCounterConfig,
    remaining: AtomicI64,
}

impl CountdownCounter {
    pub fn new(config: CountdownCounterConfig) -> Result<Self, EngineError> {
        if config.start_from < 1 {
            return Err(EngineError::Validation(format!(
                "CountdownCounter StartFrom must be positive, got {}",
                config.start_from
            )));
        }
        Ok(Self {
            remaining: AtomicI64::new(config.start_from),
            config,
        })
    }
}

impl Primitive for CountdownCounter {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "CountdownCounter".into(),
            description: "fires once when the countdown hits zero, then back-pressures upstream"
                .into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let step = match param.as_int() {
            Some(n) => n,
            None => {
                warn!(param = %param, "CountdownCounter expects an integer parameter");
                return;
            }
        };
        if step == 0 {
            self.remaining.store(self.config.start_from, Ordering::SeqCst);
            node.resume_inbound();
            return;
        }
        let mut current = self.remaining.load(Ordering::SeqCst);
        loop {
            if current <= 0 {
                // cycle already complete; wait for a reset
                return;
            }
            match self.remaining.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    if current == 1 {
                        node.output().trigger(ctx);
                        node.pause_inbound();
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<CountdownCounter>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RepeatCounterConfig {
    pub restart_at: i64,
}

/// Fires every `RestartAt` triggers, rearming itself automatically. A zero
/// parameter rearms without firing.
#[derive(Debug)]
pub struct RepeatCounter {
    config: RepeatCounterConfig,
    remaining: AtomicI64,
}

impl RepeatCounter {
    pub fn new(config: RepeatCounterConfig) -> Result<Self, EngineError> {
        if config.restart_at < 1 {
            return Err(EngineError::Validation(format!(
                "RepeatCounter RestartAt must be positive, got {}",
                config.restart_at
            )));
        }
        Ok(Self {
            remaining: AtomicI64::new(config.restart_at),
            config,
        })
    }
}

impl Primitive for RepeatCounter {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "RepeatCounter".into(),
            description: "fires every RestartAt triggers and rearms itself".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let step = match param.as_int() {
            Some(n) => n,
            None => {
                warn!(param = %param, "RepeatCounter expects an integer parameter");
                return;
            }
        };
        if step == 0 {
            self.remaining.store(self.config.restart_at, Ordering::SeqCst);
            return;
        }
        let mut current = self.remaining.load(Ordering::SeqCst);
        loop {
            let fired = current <= 1;
            let next = if fired {
                self.config.restart_at
            } else {
                current - 1
            };
            match self
                .remaining
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    if fired {
                        node.output().trigger(ctx);
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<RepeatCounter>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
