use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::ConfigError;

/// The fixed, ordered set of agents taking part in a chat.
#[derive(Clone)]
pub struct Roster {
    agents: Vec<Arc<dyn Agent>>,
    index: HashMap<String, usize>,
}

impl Roster {
    /// Creates a roster, rejecting empty rosters and duplicate names.
    pub fn new<I>(agents: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Arc<dyn Agent>>,
    {
        let agents: Vec<_> = agents.into_iter().collect();
        if agents.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        let mut index = HashMap::with_capacity(agents.len());
        for (idx, agent) in agents.iter().enumerate() {
            if index.insert(agent.name().to_owned(), idx).is_some() {
                return Err(ConfigError::DuplicateAgent(agent.name().to_owned()));
            }
        }
        Ok(Self { agents, index })
    }

    /// Looks up an agent by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        self.index.get(name).map(|&idx| &self.agents[idx])
    }

    /// Returns `true` if an agent with the given name takes part.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates the agent names in roster order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|agent| agent.name())
    }

    /// Iterates the agents in roster order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.iter()
    }

    /// Returns the number of agents, which is never zero.
    #[inline]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Always `false`, an empty roster cannot be built.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Debug for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
