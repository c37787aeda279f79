use async_trait::async_trait;
use chorus_model::{
    ModelMessage, ModelRequest, SamplingParams, ToolCallResult,
};

use super::{Agent, TurnContext};
use crate::error::GenerationError;
use crate::model_client::ModelClient;
use crate::persona::Persona;
use crate::tool::ToolSet;
use crate::transcript::{Role, Transcript};

/// An agent backed by a text-generation model.
///
/// Each turn replays the transcript to the model behind the persona's
/// instructions. When the persona enables tools, the model may call them
/// before answering: the calls run one after another and their results are
/// sent back until the model writes its message. The last allowed round is
/// sent without tools, so a turn always ends with text.
pub struct ChatAgent {
    pub(super) persona: Persona,
    pub(super) model_client: ModelClient,
    pub(super) tools: ToolSet,
    pub(super) history_limit: Option<usize>,
    pub(super) max_tool_rounds: u32,
}

impl ChatAgent {
    /// Returns the tools enabled for this agent.
    #[inline]
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.persona.temperature,
            max_tokens: self.persona.max_tokens,
        }
    }

    fn history(&self, transcript: &Transcript) -> Vec<ModelMessage> {
        let window = match self.history_limit {
            Some(limit) => transcript.recent(limit),
            None => transcript.recent(transcript.len()),
        };

        let mut messages = Vec::with_capacity(window.len() + 1);
        if !self.persona.instructions.is_empty() {
            messages.push(ModelMessage::System(self.persona.instructions.clone()));
        }
        for msg in window {
            let name = msg.author_name().map(str::to_owned);
            messages.push(match msg.role() {
                Role::User => ModelMessage::User {
                    name,
                    content: msg.content().to_owned(),
                },
                Role::Assistant => ModelMessage::assistant(name, msg.content()),
                Role::System => ModelMessage::System(msg.content().to_owned()),
            });
        }
        messages
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn persona(&self) -> &Persona {
        &self.persona
    }

    async fn generate(
        &self,
        transcript: &Transcript,
        ctx: &TurnContext,
    ) -> Result<String, GenerationError> {
        let mut messages = self.history(transcript);
        let definitions = self.tools.definitions();
        let mut round = 0;
        loop {
            let last_round = definitions.is_empty() || round >= self.max_tool_rounds;
            let req = ModelRequest {
                messages: messages.clone(),
                tools: if last_round { vec![] } else { definitions.clone() },
                sampling: self.sampling(),
            };
            let resp = self
                .model_client
                .send_request(req, ctx.on_delta.clone())
                .await?;

            if resp.tool_calls.is_empty() || last_round {
                if !resp.tool_calls.is_empty() {
                    warn!(
                        "{} requested tools after the last round, ignored",
                        self.persona.name
                    );
                }
                return Ok(resp.text);
            }

            debug!(
                "{} requested {} tool call(s) in round {round}",
                self.persona.name,
                resp.tool_calls.len()
            );
            messages.push(ModelMessage::Assistant {
                name: Some(self.persona.name.clone()),
                content: resp.text,
                tool_calls: resp.tool_calls.clone(),
            });
            for call in &resp.tool_calls {
                let content = self.tools.call(call).await;
                messages.push(ModelMessage::Tool(ToolCallResult {
                    id: call.id.clone(),
                    content,
                }));
            }
            round += 1;
        }
    }
}
