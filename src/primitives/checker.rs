use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{EngineError, PrimitiveDescriptor, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CheckCondition {
    LessThan,
    Equals,
    GreaterThan,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CheckerConfig {
    /// Local name of the checkable primitive to read.
    pub check_target: String,
    pub condition: CheckCondition,
    pub compare_to: i64,
    /// Advance the barrier by `CompareTo` on each positive fire, so a shared
    /// counter trips the checker at 100, 200, 300, … without being reset.
    #[serde(default)]
    pub auto_roll_over: bool,
}

/// Reads a `Checkable` primitive synchronously on every trigger and routes
/// the context to the primary or negative output.
#[derive(Debug)]
pub struct Checker {
    config: CheckerConfig,
    target: Arc<PrimitiveNode>,
    barrier: AtomicI64,
}

impl Checker {
    pub fn new(config: CheckerConfig, target: Arc<PrimitiveNode>) -> Result<Self, EngineError> {
        if target.behavior().check(&Value::Null).is_none() {
            return Err(EngineError::Validation(format!(
                "Checker CheckTarget '{}' is not checkable",
                config.check_target
            )));
        }
        Ok(Self {
            barrier: AtomicI64::new(config.compare_to),
            config,
            target,
        })
    }
}

impl Primitive for Checker {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "Checker".into(),
            description: "compares a checkable primitive's value against a barrier".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, _param: Value, ctx: &Value) {
        let Some(value) = self.target.behavior().check(&Value::Null) else {
            warn!(
                check_target = %self.config.check_target,
                "Checker target stopped answering check reads"
            );
            return;
        };
        let barrier = self.barrier.load(Ordering::SeqCst);
        let passed = match self.config.condition {
            CheckCondition::LessThan => value < barrier,
            CheckCondition::Equals => value == barrier,
            CheckCondition::GreaterThan => value > barrier,
        };
        if passed {
            if self.config.auto_roll_over {
                self.barrier.fetch_add(self.config.compare_to, Ordering::SeqCst);
            }
            node.output().trigger(ctx);
        } else {
            node.negative().trigger(ctx);
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other.as_any().downcast_ref::<Checker>().is_some_and(|o| {
            o.config == self.config && Arc::ptr_eq(&o.target, &self.target)
        })
    }

    fn dependees(&self) -> Vec<Arc<PrimitiveNode>> {
        vec![Arc::clone(&self.target)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::BasicCounter;
    use crate::signal::ParamTemplate;
    use crate::testing::Recorder;

    fn counter_and_checker(
        condition: CheckCondition,
        compare_to: i64,
        auto_roll_over: bool,
    ) -> (Arc<PrimitiveNode>, Arc<PrimitiveNode>) {
        let counter = PrimitiveNode::new("BasicCounter", Box::new(BasicCounter::new()));
        let checker = PrimitiveNode::new(
            "Checker",
            Box::new(
                Checker::new(
                    CheckerConfig {
                        check_target: "counter".into(),
                        condition,
                        compare_to,
                        auto_roll_over,
                    },
                    Arc::clone(&counter),
                )
                .unwrap(),
            ),
        );
        (counter, checker)
    }

    #[test]
    fn routes_to_primary_or_negative() {
        let (counter, checker) = counter_and_checker(CheckCondition::GreaterThan, 2, false);
        let (pass, pass_log) = Recorder::node();
        let (fail, fail_log) = Recorder::node();
        checker.output().connect(&pass, ParamTemplate::null());
        checker.negative().connect(&fail, ParamTemplate::null());

        counter.trigger(Value::Int(1), &Value::Null);
        checker.trigger(Value::Null, &Value::Null);
        assert_eq!((pass_log.lock().len(), fail_log.lock().len()), (0, 1));

        counter.trigger(Value::Int(2), &Value::Null);
        checker.trigger(Value::Null, &Value::Null);
        assert_eq!((pass_log.lock().len(), fail_log.lock().len()), (1, 1));
    }

    #[test]
    fn rollover_advances_the_barrier_by_the_original_step() {
        let (counter, checker) = counter_and_checker(CheckCondition::GreaterThan, 10, true);
        let (pass, pass_log) = Recorder::node();
        checker.output().connect(&pass, ParamTemplate::null());

        counter.trigger(Value::Int(11), &Value::Null);
        checker.trigger(Value::Null, &Value::Null);
        assert_eq!(pass_log.lock().len(), 1);

        // barrier is now 20; 11 no longer passes
        checker.trigger(Value::Null, &Value::Null);
        assert_eq!(pass_log.lock().len(), 1);

        counter.trigger(Value::Int(10), &Value::Null);
        checker.trigger(Value::Null, &Value::Null);
        assert_eq!(pass_log.lock().len(), 2);
    }

    #[test]
    fn non_checkable_target_is_rejected() {
        let (plain, _) = Recorder::node();
        let err = Checker::new(
            CheckerConfig {
                check_target: "plain".into(),
                condition: CheckCondition::Equals,
                compare_to: 1,
                auto_roll_over: false,
            },
            plain,
        );
        assert!(err.is_err());
    }
}
