use crate::types::{EngineError, SharedEvent, Value};

const MACRO_PREFIX: &str = "#MACRO#";

/// Per-edge parameter template, evaluated against the riding context on every
/// trigger. Compiled once when the edge is created; property names inside
/// macros are resolved to integer IDs through the meta-event at that point, so
/// evaluation never touches a name.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamTemplate {
    Literal(Value),
    Macro(MacroExpr),
    List(Vec<ParamTemplate>),
}

impl ParamTemplate {
    /// The template of an edge declared without a `SignalParameter`.
    pub fn null() -> Self {
        ParamTemplate::Literal(Value::Null)
    }

    pub fn compile(raw: &serde_json::Value, meta: &SharedEvent) -> Result<Self, EngineError> {
        match raw {
            serde_json::Value::String(s) => match s.strip_prefix(MACRO_PREFIX) {
                Some(body) => Ok(ParamTemplate::Macro(MacroExpr::parse(body, meta)?)),
                None => Ok(ParamTemplate::Literal(Value::Str(s.clone()))),
            },
            serde_json::Value::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(Self::compile(item, meta)?);
                }
                Ok(ParamTemplate::List(parts))
            }
            other => Ok(ParamTemplate::Literal(Value::from_json(other)?)),
        }
    }

    pub fn evaluate(&self, ctx: &Value) -> Result<Value, EngineError> {
        match self {
            ParamTemplate::Literal(v) => Ok(v.clone()),
            ParamTemplate::Macro(m) => m.evaluate(ctx),
            ParamTemplate::List(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    out.push(part.evaluate(ctx)?);
                }
                Ok(Value::List(out))
            }
        }
    }
}

/// A compiled `#MACRO#` expression.
///
/// Three grammars: `Context.Event.<prop>` reads a property of the context
/// event; `Contexts[i][j]…` indexes into a nested context list;
/// `Contexts[i][j]….Event.<prop>` indexes down to an event leaf and reads a
/// property of it.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroExpr {
    path: Vec<usize>,
    property: Option<i64>,
    text: String,
}

impl MacroExpr {
    pub fn parse(body: &str, meta: &SharedEvent) -> Result<Self, EngineError> {
        if let Some(rest) = body.strip_prefix("Context.") {
            let prop = rest.strip_prefix("Event.").ok_or_else(|| malformed(body))?;
            return Ok(MacroExpr {
                path: Vec::new(),
                property: Some(resolve_property(meta, prop, body)?),
                text: body.to_string(),
            });
        }

        let mut rest = body.strip_prefix("Contexts").ok_or_else(|| malformed(body))?;
        let mut path = Vec::new();
        while let Some(open) = rest.strip_prefix('[') {
            let close = open.find(']').ok_or_else(|| malformed(body))?;
            let index = open[..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| malformed(body))?;
            path.push(index);
            rest = &open[close + 1..];
        }
        if path.is_empty() {
            return Err(malformed(body));
        }

        let property = if rest.is_empty() {
            None
        } else {
            let prop = rest.strip_prefix(".Event.").ok_or_else(|| malformed(body))?;
            Some(resolve_property(meta, prop, body)?)
        };

        Ok(MacroExpr {
            path,
            property,
            text: body.to_string(),
        })
    }

    pub fn evaluate(&self, ctx: &Value) -> Result<Value, EngineError> {
        let mut current = ctx;
        for index in &self.path {
            let items = current.as_list().ok_or_else(|| {
                EngineError::BadParameter(format!(
                    "macro '{}': context is not a list where [{index}] applies",
                    self.text
                ))
            })?;
            current = items.get(*index).ok_or_else(|| {
                EngineError::BadParameter(format!(
                    "macro '{}': index {index} is out of bounds",
                    self.text
                ))
            })?;
        }
        match self.property {
            None => Ok(current.clone()),
            Some(id) => match current {
                Value::Event(event) => Ok(event.get(id).unwrap_or(Value::Null)),
                _ => Err(EngineError::BadParameter(format!(
                    "macro '{}': context leaf is not an event",
                    self.text
                ))),
            },
        }
    }
}

fn malformed(body: &str) -> EngineError {
    EngineError::Parse(format!("malformed macro '{MACRO_PREFIX}{body}'"))
}

fn resolve_property(meta: &SharedEvent, name: &str, body: &str) -> Result<i64, EngineError> {
    if name.is_empty() {
        return Err(malformed(body));
    }
    let id = meta.property_id(name);
    if id < 0 {
        return Err(EngineError::UnknownProperty(name.to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MapEvent;

    fn meta() -> SharedEvent {
        MapEvent::meta(["user", "path"])
    }

    #[test]
    fn context_event_property() {
        let meta = meta();
        let template =
            ParamTemplate::compile(&serde_json::json!("#MACRO#Context.Event.user"), &meta).unwrap();
        let event = MapEvent::with_props(&meta, "Login", &[("user", "root".into())]);
        let got = template.evaluate(&Value::Event(event)).unwrap();
        assert_eq!(got, Value::Str("root".into()));
    }

    #[test]
    fn nested_collection_path_with_property() {
        let meta = meta();
        let template =
            ParamTemplate::compile(&serde_json::json!("#MACRO#Contexts[1][0].Event.path"), &meta)
                .unwrap();
        let event = MapEvent::with_props(&meta, "FileCreated", &[("path", "a.ps1".into())]);
        let ctx = Value::List(vec![
            Value::Int(40),
            Value::List(vec![Value::Event(event)]),
        ]);
        assert_eq!(template.evaluate(&ctx).unwrap(), Value::Str("a.ps1".into()));
    }

    #[test]
    fn collection_path_without_property_yields_leaf() {
        let meta = meta();
        let template =
            ParamTemplate::compile(&serde_json::json!("#MACRO#Contexts[0]"), &meta).unwrap();
        let ctx = Value::List(vec![Value::Int(70)]);
        assert_eq!(template.evaluate(&ctx).unwrap(), Value::Int(70));
    }

    #[test]
    fn mixed_list_template() {
        let meta = meta();
        let template = ParamTemplate::compile(
            &serde_json::json!(["#MACRO#Context.Event.path", 1, false]),
            &meta,
        )
        .unwrap();
        let event = MapEvent::with_props(&meta, "FileCreated", &[("path", "b.ps1".into())]);
        let got = template.evaluate(&Value::Event(event)).unwrap();
        assert_eq!(
            got,
            Value::List(vec![
                Value::Str("b.ps1".into()),
                Value::Int(1),
                Value::Bool(false),
            ])
        );
    }

    #[test]
    fn unknown_property_fails_at_compile_time() {
        let meta = meta();
        let err = ParamTemplate::compile(&serde_json::json!("#MACRO#Context.Event.nope"), &meta)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownProperty(_)));
    }

    #[test]
    fn malformed_macros_fail_at_compile_time() {
        let meta = meta();
        for bad in [
            "#MACRO#Context.user",
            "#MACRO#Contexts",
            "#MACRO#Contexts[x]",
            "#MACRO#Contexts[0",
            "#MACRO#Contexts[0].user",
        ] {
            let err = ParamTemplate::compile(&serde_json::json!(bad), &meta).unwrap_err();
            assert!(matches!(err, EngineError::Parse(_)), "{bad}");
        }
    }

    #[test]
    fn evaluation_errors_surface_for_wrong_context_shapes() {
        let meta = meta();
        let template =
            ParamTemplate::compile(&serde_json::json!("#MACRO#Contexts[2]"), &meta).unwrap();
        assert!(template.evaluate(&Value::Int(1)).is_err());
        assert!(template
            .evaluate(&Value::List(vec![Value::Int(1)]))
            .is_err());
    }
}
