use std::sync::Arc;

use chorus_core::tool::{Tool, ToolSet};
use chorus_core::{
    Agent, AgentBuilder, CancellationToken, ConfigError, DeltaHandler,
    GroupChat, Message, MessageHandler, ModelClient, RetryPolicy, Roster,
    RunAgentFailure, RunState, Transcript, TurnHandler,
};
use chorus_model::ModelProvider;

use crate::config::ChatConfig;
use crate::tools::*;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    model_client: ModelClient,
    config: ChatConfig,
    tools: ToolSet,
    on_message: Option<MessageHandler>,
    on_turn: Option<TurnHandler>,
    on_delta: Option<DeltaHandler>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(provider: M) -> Self {
        Self::with_model_client(ModelClient::new(provider))
    }

    /// Creates a session builder with a configured model client.
    pub fn with_model_client(model_client: ModelClient) -> Self {
        Self {
            model_client,
            config: ChatConfig::default(),
            tools: ToolSet::new(),
            on_message: None,
            on_turn: None,
            on_delta: None,
        }
    }

    /// Replaces the default reviewer and writer configuration.
    #[inline]
    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the retry policy of model requests.
    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.model_client = self.model_client.with_policy(policy);
        self
    }

    /// Registers a tool that agents may enable as a capability.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.add(tool);
        self
    }

    /// Registers the `search` tool over the given index.
    #[inline]
    pub fn with_search_index<I: SearchIndex>(self, index: I) -> Self {
        self.with_tool(SearchTool::new(index))
    }

    /// Attaches a callback to be invoked when an agent has written a
    /// message.
    #[inline]
    pub fn on_message(
        mut self,
        on_message: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(on_message));
        self
    }

    /// Attaches a callback to be invoked when an agent starts its turn.
    #[inline]
    pub fn on_turn(
        mut self,
        on_turn: impl Fn(u32, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_turn = Some(Arc::new(on_turn));
        self
    }

    /// Attaches a callback to be invoked when generated text streams in.
    #[inline]
    pub fn on_delta(mut self, on_delta: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_delta = Some(Arc::new(on_delta));
        self
    }

    /// Builds a new session.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not describe a valid chat.
    pub fn build(self) -> Result<Session, ConfigError> {
        let Self {
            model_client,
            config,
            mut tools,
            on_message,
            on_turn,
            on_delta,
        } = self;

        if !tools.contains("fetch_document") {
            let mut fetch = FetchDocumentTool::new();
            if let Some(dir) = &config.document_root {
                fetch = fetch.with_document_root(dir);
            }
            if let Some(dir) = &config.fetch_cache_dir {
                fetch = fetch.with_cache_dir(dir);
            }
            tools.add(fetch);
        }

        let mut agents: Vec<Arc<dyn Agent>> = Vec::with_capacity(config.agents.len());
        for persona in &config.agents {
            let mut builder =
                AgentBuilder::with_model_client(model_client.clone(), persona.clone())
                    .with_tools(&tools)
                    .with_variables(&config.variables);
            if let Some(limit) = config.history_limit {
                builder = builder.with_history_limit(limit);
            }
            agents.push(Arc::new(builder.build()?));
        }
        let roster = Roster::new(agents)?;

        let table = config.routing_table();
        table.validate(&roster)?;
        config.termination.validate(&roster)?;
        info!(
            "chat of {roster:?} starting with {}, stops on {}",
            table.initial(),
            config.termination
        );

        let mut chat = GroupChat::builder(roster)
            .with_selection(table)
            .with_termination(config.termination.clone())
            .with_max_turns(config.max_turns);
        if let Some(on_message) = on_message {
            chat = chat.on_message(move |msg| on_message(msg));
        }
        if let Some(on_turn) = on_turn {
            chat = chat.on_turn(move |turn, agent| on_turn(turn, agent));
        }
        if let Some(on_delta) = on_delta {
            chat = chat.on_delta(move |delta| on_delta(delta));
        }

        Ok(Session {
            chat: chat.build()?,
            transcript: Transcript::new(),
        })
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session keeps the transcript between inputs, so that every run of
/// the group chat continues the same conversation until it is reset.
pub struct Session {
    chat: GroupChat,
    transcript: Transcript,
}

impl Session {
    /// Sends a message to the session and lets the agents answer it.
    ///
    /// The messages written before a failure stay in the transcript.
    pub async fn send_message(
        &mut self,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<RunState, RunAgentFailure> {
        self.transcript.push_user(message);
        let result = self.chat.run(self.transcript.clone(), cancel).await;
        self.transcript = match &result {
            Ok(state) => state.transcript.clone(),
            Err(failure) => failure.partial.transcript.clone(),
        };
        result
    }

    /// Starts a new conversation.
    #[inline]
    pub fn reset(&mut self) {
        self.transcript.clear();
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Returns the group chat.
    #[inline]
    pub fn chat(&self) -> &GroupChat {
        &self.chat
    }
}
