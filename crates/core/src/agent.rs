mod builder;
mod chat_agent;
#[cfg(test)]
mod tests;

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::persona::Persona;
use crate::transcript::Transcript;
pub use builder::AgentBuilder;
pub use chat_agent::ChatAgent;

/// A callback that receives generated text as it streams in.
pub type DeltaHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-turn information handed to an agent.
#[derive(Clone, Default)]
pub struct TurnContext {
    /// Zero-based index of the turn within the current run.
    pub turn: u32,
    /// Receives the text deltas of this turn, if anyone listens.
    pub on_delta: Option<DeltaHandler>,
}

impl Debug for TurnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnContext")
            .field("turn", &self.turn)
            .field("on_delta", &self.on_delta.is_some())
            .finish()
    }
}

/// A participant of a group chat.
///
/// An agent reads the shared transcript and writes exactly one message per
/// turn. It never mutates the transcript itself, the conversation loop
/// appends the returned text under the agent's name.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the name of the agent, unique within its roster.
    fn name(&self) -> &str {
        &self.persona().name
    }

    /// Returns the persona of the agent.
    fn persona(&self) -> &Persona;

    /// Produces the content of the agent's next message.
    ///
    /// Tool failures are not reported here, they are folded into the
    /// generated text. An error means no message could be produced at all.
    async fn generate(
        &self,
        transcript: &Transcript,
        ctx: &TurnContext,
    ) -> Result<String, GenerationError>;
}
