use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid entity address: {0:?}")]
    InvalidAddress(String),

    #[error("unknown {kind} value: {value}")]
    UnknownEnumValue { kind: &'static str, value: String },
}
