use std::collections::BTreeMap;

use chorus_model::ModelProvider;

use super::ChatAgent;
use crate::error::ConfigError;
use crate::model_client::ModelClient;
use crate::persona::Persona;
use crate::tool::{Tool, ToolSet};

/// [`ChatAgent`] builder.
///
/// Registered tools form the pool an agent may draw from. Only the tools
/// named in the persona's capabilities are offered to the model.
pub struct AgentBuilder {
    persona: Persona,
    model_client: ModelClient,
    registry: ToolSet,
    variables: BTreeMap<String, String>,
    history_limit: Option<usize>,
    max_tool_rounds: u32,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model client.
    #[inline]
    pub fn with_model_client(model_client: ModelClient, persona: Persona) -> Self {
        Self {
            persona,
            model_client,
            registry: ToolSet::new(),
            variables: BTreeMap::new(),
            history_limit: None,
            max_tool_rounds: 8,
        }
    }

    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
        persona: Persona,
    ) -> Self {
        Self::with_model_client(ModelClient::new(provider), persona)
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.registry.add(tool);
        self
    }

    /// Registers every tool of a set.
    pub fn with_tools(mut self, tools: &ToolSet) -> Self {
        for name in tools.names() {
            if let Some(tool) = tools.get_object(name) {
                self.registry.insert_object(tool.clone());
            }
        }
        self
    }

    /// Sets placeholder values shared with other agents. The persona's own
    /// variables win over these.
    pub fn with_variables(mut self, variables: &BTreeMap<String, String>) -> Self {
        self.variables
            .extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Only shows the `limit` most recent messages to the model.
    #[inline]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Sets how many rounds of tool calls a single turn may take.
    #[inline]
    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Builds the agent.
    pub fn build(mut self) -> Result<ChatAgent, ConfigError> {
        self.persona.instructions =
            self.persona.render_instructions(&self.variables)?;
        let mut tools = ToolSet::new();
        for capability in &self.persona.capabilities {
            let Some(tool) = self.registry.get_object(capability) else {
                return Err(ConfigError::UnknownCapability {
                    agent: self.persona.name.clone(),
                    capability: capability.clone(),
                });
            };
            tools.insert_object(tool.clone());
        }
        debug!(
            "built agent {} with tools {tools:?}",
            self.persona.name
        );
        Ok(ChatAgent {
            persona: self.persona,
            model_client: self.model_client,
            tools,
            history_limit: self.history_limit,
            max_tool_rounds: self.max_tool_rounds,
        })
    }
}
