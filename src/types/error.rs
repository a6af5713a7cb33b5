use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to parse rule description: {0}")]
    Parse(String),

    #[error("invalid rule: {0}")]
    Validation(String),

    #[error("failed to compile rule: {0}")]
    Compile(String),

    #[error("unknown primitive type: {0}")]
    UnknownPrimitiveType(String),

    #[error("unknown event property: {0}")]
    UnknownProperty(String),

    #[error("bad signal parameter: {0}")]
    BadParameter(String),

    #[error("rule not found: {0}")]
    RuleNotFound(String),
}
