use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::ToolCallRequest;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelRequest {
    /// The input messages, starting with the system instructions if any.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
    /// Sampling parameters for this request.
    pub sampling: SamplingParams,
}

impl ModelRequest {
    /// Returns the system instructions of this request, if the first
    /// message carries them.
    #[inline]
    pub fn instructions(&self) -> Option<&str> {
        match self.messages.first() {
            Some(ModelMessage::System(text)) => Some(text),
            _ => None,
        }
    }
}

/// Parameters that control how the model samples its output.
///
/// `None` leaves the value to the provider's default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound of generated tokens.
    pub max_tokens: Option<u32>,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User {
        /// Who wrote the message, if known.
        name: Option<String>,
        /// Text of the message.
        content: String,
    },
    /// An assistant text, possibly with the tool calls it requested.
    Assistant {
        /// The agent that produced the message, if known.
        name: Option<String>,
        /// Text of the message.
        content: String,
        /// Tool calls requested together with this message.
        tool_calls: Vec<ToolCallRequest>,
    },
    /// A tool call result.
    Tool(ToolCallResult),
}

impl ModelMessage {
    /// Creates an anonymous user message.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        ModelMessage::User {
            name: None,
            content: content.into(),
        }
    }

    /// Creates an assistant message without tool calls.
    #[inline]
    pub fn assistant<S: Into<String>>(name: Option<String>, content: S) -> Self {
        ModelMessage::Assistant {
            name,
            content: content.into(),
            tool_calls: vec![],
        }
    }
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolCallResult {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The result of the tool call.
    pub content: String,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}
