use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, error};

use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{PrimitiveDescriptor, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TimerFrequency {
    OneTenthSecond,
    Second,
    Minute,
}

impl TimerFrequency {
    pub fn interval(self) -> Duration {
        match self {
            TimerFrequency::OneTenthSecond => Duration::from_millis(100),
            TimerFrequency::Second => Duration::from_secs(1),
            TimerFrequency::Minute => Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TimerSourceConfig {
    pub frequency: TimerFrequency,
}

#[derive(Debug, Default)]
struct TimerState {
    running: bool,
    generation: u64,
}

#[derive(Debug, Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    tick: Condvar,
}

/// Self-driven periodic source. The timer thread exists only while at least
/// one outbound edge is active: it starts on the first target activation and
/// stops when every target has paused, so a fully back-pressured rule costs
/// nothing.
#[derive(Debug)]
pub struct TimerSource {
    config: TimerSourceConfig,
    shared: Arc<TimerShared>,
}

impl TimerSource {
    pub fn new(config: TimerSourceConfig) -> Self {
        Self {
            config,
            shared: Arc::new(TimerShared::default()),
        }
    }

    fn start(&self, node: &PrimitiveNode) {
        let generation = {
            let mut state = self.shared.state.lock();
            if state.running {
                return;
            }
            state.running = true;
            state.generation += 1;
            state.generation
        };
        let shared = Arc::clone(&self.shared);
        let weak = node.weak_self();
        let interval = self.config.frequency.interval();
        let spawned = thread::Builder::new()
            .name("ruleflow-timer".into())
            .spawn(move || loop {
                {
                    let mut state = shared.state.lock();
                    loop {
                        if !state.running || state.generation != generation {
                            return;
                        }
                        if shared.tick.wait_for(&mut state, interval).timed_out() {
                            break;
                        }
                    }
                    if !state.running || state.generation != generation {
                        return;
                    }
                }
                match weak.upgrade() {
                    Some(node) => node.output().trigger(&Value::Null),
                    None => return,
                }
            });
        if let Err(err) = spawned {
            error!(%err, "failed to spawn timer thread");
            self.shared.state.lock().running = false;
        } else {
            debug!(interval = ?interval, "timer started");
        }
    }

    fn stop(&self) {
        let mut state = self.shared.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        // the thread is never joined: stop may run on the tick itself
        self.shared.tick.notify_all();
        debug!("timer stopped");
    }
}

impl Primitive for TimerSource {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "TimerSource".into(),
            description: "fires periodically while any outbound edge is active".into(),
            self_driven: true,
        }
    }

    fn trigger(&self, _node: &PrimitiveNode, _param: Value, _ctx: &Value) {
        debug!("TimerSource ignores inbound signals");
    }

    fn targetable(&self) -> bool {
        false
    }

    fn on_first_target_activated(&self, node: &PrimitiveNode) {
        self.start(node);
    }

    fn on_all_targets_paused(&self, _node: &PrimitiveNode) {
        self.stop();
    }

    fn on_removed(&self, _node: &PrimitiveNode) {
        self.stop();
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<TimerSource>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
