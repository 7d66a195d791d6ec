//! Error types for the flow graph engine.

use thiserror::Error;

/// Result type alias for graph/engine operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised by graph construction, validation, and scheduling.
///
/// Node-level failures never surface here — they are captured inside a
/// [`crate::node::NodeResult`] instead. Only the kinds in §7 of the
/// specification ("Validation error", "Scheduler error", "Misuse error")
/// are represented as a `FlowError`.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Malformed graph: unknown edge endpoint, cycle, missing dependency,
    /// isolated node, or any other structural problem caught by
    /// `Graph::validate_flow`.
    #[error("graph structure error: {0}")]
    GraphStructure(String),

    /// `execute_flow` was asked to start from an empty frontier.
    #[error("no entry nodes found or specified")]
    NoEntryNodes,

    /// An uncaught error escaped the wave loop itself (not a node failure).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// The whole flow exceeded its configured global timeout.
    #[error("flow execution timed out after {seconds}s")]
    Timeout {
        /// Wall-clock seconds allotted before the timeout fired.
        seconds: u64,
    },

    /// Caller misuse: missing node id, unknown node referenced by an
    /// operation, concurrent `execute_flow` calls on the same engine.
    #[error("misuse error: {0}")]
    Misuse(String),
}

impl FlowError {
    /// Construct a graph structure error.
    pub fn graph_structure<S: Into<String>>(message: S) -> Self {
        Self::GraphStructure(message.into())
    }

    /// Construct a scheduler error.
    pub fn scheduler<S: Into<String>>(message: S) -> Self {
        Self::Scheduler(message.into())
    }

    /// Construct a misuse error.
    pub fn misuse<S: Into<String>>(message: S) -> Self {
        Self::Misuse(message.into())
    }

    /// Short category tag, useful for log fields and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            FlowError::GraphStructure(_) => "graph_structure",
            FlowError::NoEntryNodes => "no_entry_nodes",
            FlowError::Scheduler(_) => "scheduler",
            FlowError::Timeout { .. } => "timeout",
            FlowError::Misuse(_) => "misuse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_non_empty() {
        let errors = vec![
            FlowError::graph_structure("bad graph"),
            FlowError::NoEntryNodes,
            FlowError::scheduler("boom"),
            FlowError::Timeout { seconds: 30 },
            FlowError::misuse("no id"),
        ];
        for error in errors {
            assert!(!error.category().is_empty());
        }
    }
}
