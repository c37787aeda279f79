//! Chat configuration files.
//!
//! A configuration describes the agents of a chat, who speaks after whom,
//! and when the conversation is over:
//!
//! ```yaml
//! max_turns: 10
//! history_limit: 5
//! agents:
//!   - name: Reviewer
//!     instructions: Review the content. Say APPROVED once it is good.
//!   - name: Writer
//!     instructions: Rewrite the content according to the review.
//! routing:
//!   initial: Reviewer
//!   routes:
//!     Reviewer: Writer
//!     Writer: Reviewer
//! termination:
//!   keyword:
//!     keyword: APPROVED
//!     authors: [Reviewer]
//! ```
//!
//! Instructions may use `{{name}}` placeholders, filled from the agent's
//! own `variables` or the top-level `variables` of the configuration.
//!
//! A route to `null` marks a final agent of the routing table, nobody
//! speaks after it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chorus_core::{
    ConfigError, KeywordSignal, Persona, RoutingTable, TerminationRule,
};
use serde::{Deserialize, Serialize};

const REVIEWER_INSTRUCTIONS: &str = "\
Your responsibility is to review and identify how to improve user provided content.
If the user has provided input or direction for content already provided, specify how to address this input.
Never directly perform the correction or provide an example.
Once the content has been updated in a subsequent response, review it again until it is satisfactory.
When the content is satisfactory, reply with the single word APPROVED.

RULES:
- Only identify suggestions that are specific and actionable.
- Verify previous suggestions have been addressed.
- Never repeat previous suggestions.";

const WRITER_INSTRUCTIONS: &str = "\
Your sole responsibility is to rewrite content according to review suggestions.
- Always apply all review directions.
- Always revise the content in its entirety without explanation.
- Never address the user.";

/// The speaking order of a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// The agent that answers the user.
    pub initial: String,
    /// Maps each agent to the agent that speaks after it.
    #[serde(default)]
    pub routes: BTreeMap<String, Option<String>>,
    /// Ends the conversation when the last message carries this keyword,
    /// before anybody else is selected.
    #[serde(default)]
    pub stop_on: Option<KeywordSignal>,
}

/// Everything needed to assemble a group chat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// The turn cap of a single run.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// How many recent messages agents see, all of them if unset.
    #[serde(default)]
    pub history_limit: Option<usize>,
    /// Personas of the agents, in roster order.
    pub agents: Vec<Persona>,
    /// The speaking order.
    pub routing: RoutingConfig,
    /// When a run stops.
    #[serde(default)]
    pub termination: TerminationRule,
    /// Directory holding cached copies of documents that the
    /// `fetch_document` tool falls back to.
    #[serde(default)]
    pub fetch_cache_dir: Option<PathBuf>,
    /// Directory below which `fetch_document` may read local files. Local
    /// files are off if unset.
    #[serde(default)]
    pub document_root: Option<PathBuf>,
    /// Placeholder values shared by the instructions of every agent.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

fn default_max_turns() -> u32 {
    10
}

impl ChatConfig {
    /// Parses a configuration from a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(source)
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|err| {
            ConfigError::Parse(format!("{}: {err}", path.display()))
        })?;
        Self::from_yaml(&source)
    }

    /// A reviewer and a writer improving the user's content until the
    /// reviewer approves it.
    pub fn reviewer_and_writer() -> Self {
        let routes = BTreeMap::from([
            ("Reviewer".to_owned(), Some("Writer".to_owned())),
            ("Writer".to_owned(), Some("Reviewer".to_owned())),
        ]);
        Self {
            max_turns: default_max_turns(),
            history_limit: Some(5),
            agents: vec![
                Persona::new("Reviewer", REVIEWER_INSTRUCTIONS),
                Persona::new("Writer", WRITER_INSTRUCTIONS),
            ],
            routing: RoutingConfig {
                initial: "Reviewer".to_owned(),
                routes,
                stop_on: None,
            },
            termination: TerminationRule::new().with_keyword(
                KeywordSignal::new("APPROVED").from_author("Reviewer"),
            ),
            fetch_cache_dir: None,
            document_root: None,
            variables: BTreeMap::new(),
        }
    }

    /// Builds the routing table described by this configuration.
    pub fn routing_table(&self) -> RoutingTable {
        let mut builder = RoutingTable::builder(self.routing.initial.as_str());
        for (from, to) in &self.routing.routes {
            builder = match to {
                Some(to) => builder.route(from.as_str(), to.as_str()),
                None => builder.finish(from.as_str()),
            };
        }
        if let Some(signal) = &self.routing.stop_on {
            builder = builder.stop_on(signal.clone());
        }
        builder.build()
    }
}

impl Default for ChatConfig {
    #[inline]
    fn default() -> Self {
        Self::reviewer_and_writer()
    }
}
