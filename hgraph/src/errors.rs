//! Error types for the runtime and builder layers.

use crate::types::value::{ScalarValue, StructValue};

/// An error raised by a node evaluation function or by applying its result.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("{0}")]
    Message(String),
    #[error("expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("key {0} does not exist")]
    MissingKey(String),
    #[error("cannot remove and add the same element")]
    ConflictingSetDelta,
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },
}

impl EvalError {
    /// A user-raised error with an explicit kind, e.g. `ValueError`.
    pub fn raised<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
        EvalError::Raised { kind: kind.into(), message: message.into() }
    }

    /// The error's kind name, used when publishing to an error output.
    pub fn kind(&self) -> &str {
        match self {
            EvalError::Message(_) => "RuntimeError",
            EvalError::TypeMismatch { .. } => "TypeError",
            EvalError::MissingKey(_) => "KeyError",
            EvalError::ConflictingSetDelta => "ValueError",
            EvalError::Raised { kind, .. } => kind,
        }
    }
}

impl From<String> for EvalError {
    fn from(message: String) -> Self {
        EvalError::Message(message)
    }
}

impl From<&str> for EvalError {
    fn from(message: &str) -> Self {
        EvalError::Message(message.to_string())
    }
}

/// A node evaluation failure, wrapped with the node's identity.
///
/// When the failing node's signature declares an error output the error is
/// published there as a compound scalar and the graph continues; otherwise it
/// terminates the cycle and surfaces from the run loop.
#[derive(thiserror::Error, Debug, Clone)]
#[error("node {name}<{node_id}> failed: {error}")]
pub struct NodeError {
    /// The node's signature name.
    pub name: String,
    /// The node's absolute id, rendered as a dotted path.
    pub node_id: String,
    /// The underlying evaluation error.
    pub error: EvalError,
    /// Captured input values at failure time, when configured.
    pub captured_inputs: Option<Vec<(String, String)>>,
}

impl NodeError {
    /// Renders the error as a compound scalar for an error output.
    pub fn to_scalar_value(&self) -> ScalarValue {
        let mut fields = vec![
            ("node".to_string(), ScalarValue::Str(self.name.clone())),
            ("node_id".to_string(), ScalarValue::Str(self.node_id.clone())),
            ("kind".to_string(), ScalarValue::Str(self.error.kind().to_string())),
            ("message".to_string(), ScalarValue::Str(self.error.to_string())),
        ];
        if let Some(captured) = &self.captured_inputs {
            fields.push((
                "inputs".to_string(),
                ScalarValue::Map(
                    captured
                        .iter()
                        .map(|(k, v)| (ScalarValue::Str(k.clone()), ScalarValue::Str(v.clone())))
                        .collect(),
                ),
            ));
        }
        ScalarValue::Struct(StructValue { name: "NodeError".to_string(), fields })
    }
}

/// An error raised while constructing a graph from its builders.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("edge {edge}: no output at path {path:?}")]
    UnresolvedOutputPath { edge: usize, path: Vec<usize> },
    #[error("edge {edge}: no input at path {path:?}")]
    UnresolvedInputPath { edge: usize, path: Vec<usize> },
    #[error("edge {edge}: node index {node} out of range")]
    NodeOutOfRange { edge: usize, node: usize },
    #[error("cannot bind {output} to {input}")]
    BindTypeMismatch { output: String, input: String },
    #[error("node {node}: missing required argument {argument}")]
    MissingArgument { node: String, argument: String },
    #[error("{0}")]
    Invalid(String),
}

/// A top-level engine failure.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("end time {end} must be after start time {start}")]
    InvalidRunWindow { start: crate::time::EngineTime, end: crate::time::EngineTime },
    #[error("start time {start} is out of bounds")]
    StartOutOfBounds { start: crate::time::EngineTime },
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error("configuration error: {0}")]
    Configuration(String),
}
