//! Core logic of a turn-based multi-agent group chat: the shared transcript,
//! agents and their tools, speaker selection, termination, and the
//! conversation loop that drives them.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
mod chat;
mod error;
mod model_client;
pub mod persona;
mod roster;
pub mod selection;
pub mod termination;
pub mod tool;
pub mod transcript;

pub use agent::{Agent, AgentBuilder, ChatAgent, DeltaHandler, TurnContext};
pub use chat::{
    GroupChat, GroupChatBuilder, MessageHandler, RunState, TerminationReason,
    TurnHandler,
};
pub use error::{ConfigError, GenerationError, RunAgentFailure};
pub use model_client::{ModelClient, ModelClientResponse, RetryPolicy};
pub use persona::Persona;
pub use roster::Roster;
pub use selection::{Route, RoutingTable, RoutingTableBuilder, SelectionPolicy};
pub use termination::{
    KeywordSignal, StopSignal, TerminationPolicy, TerminationRule,
};
pub use tokio_util::sync::CancellationToken;
pub use tool::{Tool, ToolResult, ToolSet};
pub use transcript::{Message, Role, Transcript};
