use chorus_model::{ErrorKind, ModelProviderError};
use thiserror::Error;

use crate::chat::RunState;

/// The text-generation collaborator of an agent failed or timed out.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    kind: ErrorKind,
    message: String,
}

impl GenerationError {
    /// Creates a new error.
    #[inline]
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Box<dyn ModelProviderError>> for GenerationError {
    fn from(err: Box<dyn ModelProviderError>) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// A run stopped because an agent could not produce its message.
///
/// The transcript up to the failed turn is kept in `partial` for
/// inspection, nothing was appended for the failed turn.
#[derive(Debug, Error)]
#[error("agent `{agent}` failed at turn {turn_count}")]
pub struct RunAgentFailure {
    /// Name of the agent whose generation failed.
    pub agent: String,
    /// Number of turns completed before the failure.
    pub turn_count: u32,
    /// The underlying generation error.
    #[source]
    pub source: GenerationError,
    /// The state of the run when it stopped.
    pub partial: Box<RunState>,
}

/// Invalid agents, rosters or policies, detected before a run starts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The roster has no agents.
    #[error("roster must contain at least one agent")]
    EmptyRoster,
    /// Two agents share a name.
    #[error("duplicate agent name `{0}`")]
    DuplicateAgent(String),
    /// A policy refers to an agent outside the roster.
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
    /// The routing table has no rule for an agent of the roster.
    #[error("no routing rule for agent `{0}`")]
    MissingRoute(String),
    /// The routing table has more than one rule for an agent.
    #[error("more than one routing rule for agent `{0}`")]
    DuplicateRoute(String),
    /// An agent is routed to itself in a roster of several agents.
    #[error("agent `{0}` would speak twice in a row")]
    SelfRoute(String),
    /// A persona enables a capability that has no registered tool.
    #[error("agent `{agent}` enables unknown capability `{capability}`")]
    UnknownCapability {
        /// The agent.
        agent: String,
        /// The capability name.
        capability: String,
    },
    /// An instruction placeholder has no value.
    #[error("agent `{agent}` has no value for placeholder `{variable}`")]
    MissingVariable {
        /// The agent.
        agent: String,
        /// The placeholder name.
        variable: String,
    },
    /// The iteration cap must be a positive number.
    #[error("max turns must be positive")]
    ZeroMaxTurns,
    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),
}
