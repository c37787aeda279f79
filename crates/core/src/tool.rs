//! Tool call supports.
//!
//! Tools are the external capabilities a tool-using agent may invoke before
//! it writes its message, e.g. fetching a document. From the agent's point
//! of view every call is synchronous, and every call succeeds: failures are
//! turned into explanatory text so that the conversation can go on and the
//! next agent can react to them.

mod error;
mod object;
mod set;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use error::{Error, ErrorKind};
pub(crate) use object::{ToolObject, ToolObjectImpl};
pub use set::ToolSet;

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as a cache directory. To do this,
/// make the context an immutable state of the tool, which can be set during
/// initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}
