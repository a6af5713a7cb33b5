use std::any::Any;
use std::collections::HashSet;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::primitives::{Primitive, PrimitiveNode};
use crate::types::{EngineError, PrimitiveDescriptor, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StringMatchMethod {
    MatchSingle,
    MatchList,
    DictionarySearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StringCondition {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StringFilterConfig {
    pub method: StringMatchMethod,
    /// Drop this many leading characters before matching; an input shorter
    /// than the offset goes to the negative output.
    #[serde(default)]
    pub substring_pos: Option<usize>,
    #[serde(default)]
    pub condition: Option<StringCondition>,
    pub match_to: OneOrMany<String>,
}

/// Routes a string parameter to the primary output on match, to the negative
/// output otherwise. Non-regex comparisons are case-insensitive.
#[derive(Debug)]
pub struct StringFilter {
    config: StringFilterConfig,
    condition: StringCondition,
    patterns: Vec<String>,
    regexes: Vec<Regex>,
    dictionary: HashSet<String>,
}

impl StringFilter {
    pub fn new(config: StringFilterConfig) -> Result<Self, EngineError> {
        let raw: Vec<String> = config.match_to.clone().into_vec();
        if raw.is_empty() {
            return Err(EngineError::Validation(
                "StringFilter MatchTo must not be empty".into(),
            ));
        }
        if config.method == StringMatchMethod::MatchSingle && raw.len() != 1 {
            return Err(EngineError::Validation(
                "StringFilter MatchSingle takes exactly one MatchTo value".into(),
            ));
        }

        let condition = match (config.method, config.condition) {
            (StringMatchMethod::DictionarySearch, Some(_)) => {
                return Err(EngineError::Validation(
                    "StringFilter DictionarySearch does not take a Condition".into(),
                ));
            }
            (StringMatchMethod::DictionarySearch, None) => StringCondition::Equals,
            (_, Some(condition)) => condition,
            (_, None) => {
                return Err(EngineError::Validation(
                    "StringFilter requires a Condition".into(),
                ));
            }
        };

        let mut regexes = Vec::new();
        if condition == StringCondition::Regex {
            for pattern in &raw {
                regexes.push(Regex::new(pattern).map_err(|e| {
                    EngineError::Validation(format!("StringFilter regex '{pattern}': {e}"))
                })?);
            }
        }
        let dictionary = if config.method == StringMatchMethod::DictionarySearch {
            raw.iter().map(|p| p.to_lowercase()).collect()
        } else {
            HashSet::new()
        };
        let patterns = raw.iter().map(|p| p.to_lowercase()).collect();

        Ok(Self {
            config,
            condition,
            patterns,
            regexes,
            dictionary,
        })
    }

    fn matches(&self, input: &str) -> bool {
        if self.config.method == StringMatchMethod::DictionarySearch {
            return self.dictionary.contains(&input.to_lowercase());
        }
        if self.condition == StringCondition::Regex {
            return self.regexes.iter().any(|r| r.is_match(input));
        }
        let needle = input.to_lowercase();
        self.patterns.iter().any(|p| match self.condition {
            StringCondition::Equals => needle == *p,
            StringCondition::Contains => needle.contains(p.as_str()),
            StringCondition::StartsWith => needle.starts_with(p.as_str()),
            StringCondition::EndsWith => needle.ends_with(p.as_str()),
            StringCondition::Regex => unreachable!("handled above"),
        })
    }
}

impl Primitive for StringFilter {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "StringFilter".into(),
            description: "routes a string to the primary or negative output by matching".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let Some(input) = param.as_str() else {
            warn!(param = %param, "StringFilter expects a string parameter");
            return;
        };
        let trimmed: Option<String> = match self.config.substring_pos {
            None | Some(0) => Some(input.to_string()),
            Some(pos) if pos > input.chars().count() => None,
            Some(pos) => Some(input.chars().skip(pos).collect()),
        };
        let matched = trimmed.as_deref().is_some_and(|s| self.matches(s));
        if matched {
            node.output().trigger(ctx);
        } else {
            node.negative().trigger(ctx);
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<StringFilter>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IntCondition {
    LessThan,
    Equals,
    GreaterThan,
    OneOf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntegerFilterConfig {
    pub condition: IntCondition,
    pub compare_to: OneOrMany<i64>,
}

/// Routes an integer parameter to the primary output on match, to the
/// negative output otherwise.
#[derive(Debug)]
pub struct IntegerFilter {
    config: IntegerFilterConfig,
    values: Vec<i64>,
}

impl IntegerFilter {
    pub fn new(config: IntegerFilterConfig) -> Result<Self, EngineError> {
        let values = config.compare_to.clone().into_vec();
        if values.is_empty() {
            return Err(EngineError::Validation(
                "IntegerFilter CompareTo must not be empty".into(),
            ));
        }
        if config.condition != IntCondition::OneOf && values.len() != 1 {
            return Err(EngineError::Validation(format!(
                "IntegerFilter {:?} takes exactly one CompareTo value",
                config.condition
            )));
        }
        Ok(Self { config, values })
    }
}

impl Primitive for IntegerFilter {
    fn descriptor(&self) -> PrimitiveDescriptor {
        PrimitiveDescriptor {
            type_name: "IntegerFilter".into(),
            description: "routes an integer to the primary or negative output by comparison".into(),
            self_driven: false,
        }
    }

    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value) {
        let Some(value) = param.as_int() else {
            warn!(param = %param, "IntegerFilter expects an integer parameter");
            return;
        };
        let matched = match self.config.condition {
            IntCondition::LessThan => value < self.values[0],
            IntCondition::Equals => value == self.values[0],
            IntCondition::GreaterThan => value > self.values[0],
            IntCondition::OneOf => self.values.contains(&value),
        };
        if matched {
            node.output().trigger(ctx);
        } else {
            node.negative().trigger(ctx);
        }
    }

    fn same_config(&self, other: &dyn Primitive) -> bool {
        other
            .as_any()
            .downcast_ref::<IntegerFilter>()
            .is_some_and(|o| o.config == self.config)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
