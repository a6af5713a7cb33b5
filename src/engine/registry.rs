use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::engine::EngineInner;
use crate::primitives::{
    Accumulator, AccumulatorConfig, BasicCounter, Checker, CheckerConfig, Collector,
    CollectorConfig, CollectorInOrder, CountdownCounter, CountdownCounterConfig, EventGenerator,
    EventGeneratorConfig, IntegerFilter, IntegerFilterConfig, KeyedCollector,
    KeyedCollectorInOrder, Primitive, PrimitiveNode, RepeatCounter, RepeatCounterConfig,
    SpeedAlarm, SpeedAlarmConfig, StringFilter, StringFilterConfig, TimerSource,
    TimerSourceConfig,
};
use crate::types::{EngineError, PrimitiveDescriptor, SharedEvent};

/// Context handed to primitive factories at rule compilation time.
pub struct FactoryContext<'a> {
    /// Meta-event used to resolve property names in configs and macros.
    pub meta: &'a SharedEvent,
    /// Primitives of the current rule settled so far, by local name.
    /// Checkers resolve their `CheckTarget` here.
    pub settled: &'a HashMap<String, Arc<PrimitiveNode>>,
    pub(crate) engine: Weak<EngineInner>,
}

pub type PrimitiveFactory = Arc<
    dyn Fn(&FactoryContext<'_>, JsonValue) -> Result<Box<dyn Primitive>, EngineError>
        + Send
        + Sync,
>;

struct Registration {
    descriptor: PrimitiveDescriptor,
    factory: PrimitiveFactory,
}

/// Maps primitive type names from rule descriptions to their config
/// validators and constructors. Open for extension: hosts may register their
/// own primitive kinds.
pub struct Registry {
    entries: RwLock<HashMap<String, Registration>>,
}

fn parse_config<T: serde::de::DeserializeOwned>(
    kind: &str,
    raw: JsonValue,
) -> Result<T, EngineError> {
    serde_json::from_value(raw)
        .map_err(|e| EngineError::Validation(format!("{kind} configuration: {e}")))
}

impl Registry {
    pub fn new() -> Self {
        let registry = Self {
            entries: RwLock::new(HashMap::new()),
        };

        let builtins: Vec<(&str, &str, bool, PrimitiveFactory)> = vec![
            (
                "BasicCounter",
                "counter stepped up or down by the signal's sign, readable by Checker",
                false,
                Arc::new(|_ctx, _raw| Ok(Box::new(BasicCounter::new()) as Box<dyn Primitive>)),
            ),
            (
                "CountdownCounter",
                "fires once when the countdown hits zero, then back-pressures upstream",
                false,
                Arc::new(|_ctx, raw| {
                    let config: CountdownCounterConfig = parse_config("CountdownCounter", raw)?;
                    Ok(Box::new(CountdownCounter::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "RepeatCounter",
                "fires every RestartAt triggers and rearms itself",
                false,
                Arc::new(|_ctx, raw| {
                    let config: RepeatCounterConfig = parse_config("RepeatCounter", raw)?;
                    Ok(Box::new(RepeatCounter::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "Accumulator",
                "sums scored inputs within a window and fires at a threshold",
                false,
                Arc::new(|_ctx, raw| {
                    let config: AccumulatorConfig = parse_config("Accumulator", raw)?;
                    Ok(Box::new(Accumulator::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "SpeedAlarm",
                "fires when a sliding-window total exceeds a maximum rate",
                false,
                Arc::new(|_ctx, raw| {
                    let config: SpeedAlarmConfig = parse_config("SpeedAlarm", raw)?;
                    Ok(Box::new(SpeedAlarm::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "Collector",
                "joins signals from several sources, in any order",
                false,
                Arc::new(|_ctx, raw| {
                    let config: CollectorConfig = parse_config("Collector", raw)?;
                    Ok(Box::new(Collector::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "CollectorInOrder",
                "joins signals from several sources in strict order",
                false,
                Arc::new(|_ctx, raw| {
                    let config: CollectorConfig = parse_config("CollectorInOrder", raw)?;
                    Ok(Box::new(CollectorInOrder::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "KeyedCollector",
                "per-key join of signals from several sources, in any order",
                false,
                Arc::new(|_ctx, raw| {
                    let config: CollectorConfig = parse_config("KeyedCollector", raw)?;
                    Ok(Box::new(KeyedCollector::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "KeyedCollectorInOrder",
                "per-key join of signals from several sources, in strict order",
                false,
                Arc::new(|_ctx, raw| {
                    let config: CollectorConfig = parse_config("KeyedCollectorInOrder", raw)?;
                    Ok(Box::new(KeyedCollectorInOrder::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "Checker",
                "compares a checkable primitive's value against a barrier",
                false,
                Arc::new(|ctx, raw| {
                    let config: CheckerConfig = parse_config("Checker", raw)?;
                    let target = ctx.settled.get(&config.check_target).cloned().ok_or_else(|| {
                        EngineError::Validation(format!(
                            "Checker CheckTarget '{}' is not defined in this rule",
                            config.check_target
                        ))
                    })?;
                    Ok(Box::new(Checker::new(config, target)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "StringFilter",
                "routes a string to the primary or negative output by matching",
                false,
                Arc::new(|_ctx, raw| {
                    let config: StringFilterConfig = parse_config("StringFilter", raw)?;
                    Ok(Box::new(StringFilter::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "IntegerFilter",
                "routes an integer to the primary or negative output by comparison",
                false,
                Arc::new(|_ctx, raw| {
                    let config: IntegerFilterConfig = parse_config("IntegerFilter", raw)?;
                    Ok(Box::new(IntegerFilter::new(config)?) as Box<dyn Primitive>)
                }),
            ),
            (
                "EventGenerator",
                "synthesizes a derived event and re-enters the dispatcher",
                false,
                Arc::new(|ctx, raw| {
                    let config: EventGeneratorConfig = parse_config("EventGenerator", raw)?;
                    Ok(Box::new(EventGenerator::new(config, ctx.meta, ctx.engine.clone())?)
                        as Box<dyn Primitive>)
                }),
            ),
            (
                "TimerSource",
                "fires periodically while any outbound edge is active",
                true,
                Arc::new(|_ctx, raw| {
                    let config: TimerSourceConfig = parse_config("TimerSource", raw)?;
                    Ok(Box::new(TimerSource::new(config)) as Box<dyn Primitive>)
                }),
            ),
        ];

        for (type_name, description, self_driven, factory) in builtins {
            registry.register(
                type_name,
                PrimitiveDescriptor {
                    type_name: type_name.to_string(),
                    description: description.to_string(),
                    self_driven,
                },
                factory,
            );
        }
        registry
    }

    pub fn register(
        &self,
        type_name: &str,
        descriptor: PrimitiveDescriptor,
        factory: PrimitiveFactory,
    ) {
        self.entries.write().insert(
            type_name.to_string(),
            Registration {
                descriptor,
                factory,
            },
        );
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.read().contains_key(type_name)
    }

    pub fn is_self_driven(&self, type_name: &str) -> bool {
        self.entries
            .read()
            .get(type_name)
            .map_or(false, |r| r.descriptor.self_driven)
    }

    pub fn build(
        &self,
        type_name: &str,
        ctx: &FactoryContext<'_>,
        config: JsonValue,
    ) -> Result<Box<dyn Primitive>, EngineError> {
        let factory = self
            .entries
            .read()
            .get(type_name)
            .map(|r| Arc::clone(&r.factory))
            .ok_or_else(|| EngineError::UnknownPrimitiveType(type_name.to_string()))?;
        (*factory)(ctx, config)
    }

    pub fn descriptors(&self) -> Vec<PrimitiveDescriptor> {
        let mut descriptors: Vec<PrimitiveDescriptor> = self
            .entries
            .read()
            .values()
            .map(|r| r.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        descriptors
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
