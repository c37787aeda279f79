use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use chorus_model::{ModelTool, ToolCallRequest};
use tracing::Instrument;

use super::{Error, Tool, ToolObject, ToolObjectImpl};

/// The tools enabled for one agent, looked up by name.
///
/// Calls never fail: an unknown tool, an invalid input or a failed
/// execution all produce a bracketed placeholder text instead of a result.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn ToolObject>>,
}

impl ToolSet {
    /// Creates an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any tool with the same name.
    pub fn add<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        self.tools.insert(name, Arc::new(ToolObjectImpl(tool)));
    }

    pub(crate) fn insert_object(&mut self, tool: Arc<dyn ToolObject>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub(crate) fn get_object(&self, name: &str) -> Option<&Arc<dyn ToolObject>> {
        self.tools.get(name)
    }

    /// Returns `true` if a tool with the given name is in the set.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Iterates the tool names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Returns `true` if the set has no tools.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the definitions of all tools, ordered by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .values()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Runs a tool call requested by the model and returns the text to hand
    /// back to it.
    pub async fn call(&self, req: &ToolCallRequest) -> String {
        let span = debug_span!("tool call", tool = %req.name, id = %req.id);
        let result = match self.tools.get(&req.name) {
            Some(tool) => {
                trace!("executing with args: {:?}", req.arguments);
                tool.execute(req.arguments.clone())
                    .instrument(span.clone())
                    .await
            }
            None => Err(Error::not_found()),
        };
        let _enter = span.enter();
        match result {
            Ok(output) => output,
            Err(err) => {
                warn!("tool call failed: {err}");
                err.placeholder(&req.name)
            }
        }
    }
}

impl Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tools.keys()).finish()
    }
}
