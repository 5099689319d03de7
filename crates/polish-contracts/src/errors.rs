use thiserror::Error;

use crate::graph::PortKind;

// Manual Display/Error impls: `#[derive(Error)]` would treat the
// `InvalidConnection.source` field as an error source, which `PortKind`
// cannot satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    UnknownPort(String),
    InvalidConnection { source: PortKind, target: PortKind },
    PortOccupied(String),
    CycleDetected { from: String, to: String },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPort(name) => write!(f, "unknown port '{name}'"),
            Self::InvalidConnection { source, target } => {
                write!(f, "cannot connect a {source:?} port to a {target:?} port")
            }
            Self::PortOccupied(name) => write!(f, "port '{name}' is already connected"),
            Self::CycleDetected { from, to } => {
                write!(f, "linking '{from}' to '{to}' would close a chain loop")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A prompt was submitted while one or more placeholders had no wired text.
/// Placeholder names are reported in their original template order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("placeholders not connected: {}", .placeholders.join(", "))]
pub struct MissingBinding {
    pub placeholders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkbenchError {
    #[error("unknown card '{0}'")]
    UnknownCard(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    MissingBinding(#[from] MissingBinding),
}
