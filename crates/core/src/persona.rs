//! Agent personas.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
        .expect("PLACEHOLDER regex should compile")
});

/// The immutable description of an agent: who it is, how it should behave,
/// and which capabilities it may use.
///
/// # Example
///
/// ```yaml
/// name: Reviewer
/// description: Reviews essays
/// temperature: 0.2
/// instructions: |
///   Your responsibility is to review and identify how to improve user
///   provided content.
/// capabilities: [fetch_document]
/// ```
///
/// Instructions may contain `{{name}}` placeholders. They are filled once,
/// when the agent is built, from [`Persona::variables`] and the variables
/// shared by the whole chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Unique name of the agent within its roster.
    pub name: String,
    /// A short human-readable summary.
    #[serde(default)]
    pub description: String,
    /// Sampling temperature of the agent's model.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Upper bound of tokens per generated message.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// The system instructions of the agent.
    pub instructions: String,
    /// Names of the tools this agent may call.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Values of the placeholders in the instructions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl Persona {
    /// Creates a persona without capabilities.
    pub fn new<N: Into<String>, I: Into<String>>(name: N, instructions: I) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            temperature: None,
            max_tokens: None,
            instructions: instructions.into(),
            capabilities: vec![],
            variables: BTreeMap::new(),
        }
    }

    /// Sets the sampling temperature.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Enables a capability.
    #[inline]
    pub fn with_capability<S: Into<String>>(mut self, capability: S) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Sets the value of an instruction placeholder.
    #[inline]
    pub fn with_variable<K: Into<String>, V: Into<String>>(
        mut self,
        name: K,
        value: V,
    ) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Returns the instructions with every placeholder filled.
    ///
    /// The persona's own variables take precedence over `shared`. A
    /// placeholder without a value is an error.
    pub fn render_instructions(
        &self,
        shared: &BTreeMap<String, String>,
    ) -> Result<String, ConfigError> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&self.instructions, |caps: &Captures| {
            let name = &caps[1];
            match self.variables.get(name).or_else(|| shared.get(name)) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| name.to_owned());
                    String::new()
                }
            }
        });
        if let Some(variable) = missing {
            return Err(ConfigError::MissingVariable {
                agent: self.name.clone(),
                variable,
            });
        }
        Ok(rendered.into_owned())
    }

    /// Parses a persona from a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(source)
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }
}
