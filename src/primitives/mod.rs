mod accumulator;
mod checker;
pub(crate) mod collector;
mod counters;
mod filters;
mod generator;
mod keyed_collector;
mod node;
mod speed_alarm;
mod timer;

pub use accumulator::{Accumulator, AccumulatorConfig};
pub use checker::{CheckCondition, Checker, CheckerConfig};
pub use collector::{Collector, CollectorConfig, CollectorInOrder};
pub use counters::{
    BasicCounter, CountdownCounter, CountdownCounterConfig, RepeatCounter, RepeatCounterConfig,
};
pub use filters::{
    IntCondition, IntegerFilter, IntegerFilterConfig, OneOrMany, StringCondition, StringFilter,
    StringFilterConfig, StringMatchMethod,
};
pub use generator::{EventGenerator, EventGeneratorConfig};
pub use keyed_collector::{KeyedCollector, KeyedCollectorInOrder};
pub use node::{Primitive, PrimitiveNode};
pub use speed_alarm::{SpeedAlarm, SpeedAlarmConfig};
pub use timer::{TimerFrequency, TimerSource, TimerSourceConfig};
