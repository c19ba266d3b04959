//! Errors raised while building or starting a graph.
//!
//! Failures of a running component are not errors of the graph; they end up
//! in the component's status inside `GraphResult`.

use thiserror::Error;

use rivulet_components::ComponentError;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate component id '{0}'")]
    DuplicateId(String),

    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("unknown component type '{0}'")]
    UnknownType(String),

    #[error("invalid edge {from} -> {to}: {reason}")]
    Edge {
        from: String,
        to: String,
        reason: String,
    },

    /// A component rejected its attributes or ports. Aborts the graph before
    /// anything runs.
    #[error("component '{id}' ({kind}): {source}")]
    Component {
        id: String,
        kind: String,
        #[source]
        source: ComponentError,
    },

    #[error("graph spec: {0}")]
    Spec(String),

    #[error("graph context: {0}")]
    Context(#[from] ComponentError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Spec(e.to_string())
    }
}

impl From<serde_yaml::Error> for GraphError {
    fn from(e: serde_yaml::Error) -> Self {
        GraphError::Spec(e.to_string())
    }
}
