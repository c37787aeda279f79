//! Choosing the next speaker of a group chat.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::roster::Roster;
use crate::termination::KeywordSignal;
use crate::transcript::{Role, Transcript};

/// Picks the agent that speaks next.
///
/// Returning `None` means nobody should speak anymore, which ends the run
/// gracefully.
pub trait SelectionPolicy: Send + Sync {
    /// Returns the name of the next speaker.
    fn select(
        &self,
        transcript: &Transcript,
        roster: &Roster,
        last_speaker: Option<&str>,
    ) -> Option<String>;
}

/// One row of a [`RoutingTable`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// The agent that has just spoken.
    pub from: String,
    /// The agent that speaks next, `None` if the conversation is over.
    pub to: Option<String>,
}

/// A declarative speaker selection policy.
///
/// The table maps the author of the most recent message to the next
/// speaker. A message from the user, an empty transcript, or an author the
/// roster doesn't know hand the turn to the initial agent. If a stop
/// keyword is configured and the most recent message carries it, nobody is
/// selected, whoever wrote it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    initial: String,
    routes: Vec<Route>,
    #[serde(default)]
    stop_on: Option<KeywordSignal>,
}

impl RoutingTable {
    /// Starts a table whose first speaker is `initial`.
    #[inline]
    pub fn builder<S: Into<String>>(initial: S) -> RoutingTableBuilder {
        RoutingTableBuilder {
            table: RoutingTable {
                initial: initial.into(),
                routes: vec![],
                stop_on: None,
            },
        }
    }

    /// Creates a table in which the agents take turns in roster order,
    /// forever.
    pub fn round_robin(roster: &Roster) -> Self {
        let names: Vec<_> = roster.names().collect();
        let routes = names
            .iter()
            .zip(names.iter().cycle().skip(1))
            .map(|(from, to)| Route {
                from: (*from).to_owned(),
                to: Some((*to).to_owned()),
            })
            .collect();
        Self {
            initial: names.first().map(|name| (*name).to_owned()).unwrap_or_default(),
            routes,
            stop_on: None,
        }
    }

    /// Returns the agent that speaks first.
    #[inline]
    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Returns the rows of the table in the order they were added.
    #[inline]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn route_of(&self, agent: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.from == agent)
    }

    /// Checks that the table is total over the roster.
    ///
    /// Every agent needs exactly one row, every row must name agents of
    /// the roster, and no agent may hand the turn to itself unless it is
    /// the only one.
    pub fn validate(&self, roster: &Roster) -> Result<(), ConfigError> {
        if !roster.contains(&self.initial) {
            return Err(ConfigError::UnknownAgent(self.initial.clone()));
        }
        for route in &self.routes {
            if !roster.contains(&route.from) {
                return Err(ConfigError::UnknownAgent(route.from.clone()));
            }
            if let Some(to) = &route.to {
                if !roster.contains(to) {
                    return Err(ConfigError::UnknownAgent(to.clone()));
                }
                if *to == route.from && roster.len() > 1 {
                    return Err(ConfigError::SelfRoute(to.clone()));
                }
            }
        }
        for name in roster.names() {
            match self.routes.iter().filter(|route| route.from == name).count() {
                0 => return Err(ConfigError::MissingRoute(name.to_owned())),
                1 => {}
                _ => return Err(ConfigError::DuplicateRoute(name.to_owned())),
            }
        }
        if let Some(signal) = &self.stop_on {
            if let Some(author) =
                signal.authors.iter().find(|author| !roster.contains(author))
            {
                return Err(ConfigError::UnknownAgent(author.clone()));
            }
        }
        Ok(())
    }
}

impl SelectionPolicy for RoutingTable {
    fn select(
        &self,
        transcript: &Transcript,
        roster: &Roster,
        last_speaker: Option<&str>,
    ) -> Option<String> {
        let last = transcript.last();
        if let (Some(signal), Some(msg)) = (&self.stop_on, last) {
            if signal.matches(msg) {
                debug!("stop keyword found in message {}", msg.sequence_index());
                return None;
            }
        }
        if last.is_some_and(|msg| msg.role() == Role::User) {
            return Some(self.initial.clone());
        }

        let author = last_speaker.or_else(|| {
            last.filter(|msg| msg.role() == Role::Assistant)
                .and_then(|msg| msg.author_name())
        });
        match author.filter(|author| roster.contains(author)) {
            Some(author) => match self.route_of(author) {
                Some(route) => route.to.clone(),
                None => {
                    warn!("no route for {author}, falling back to {}", self.initial);
                    Some(self.initial.clone())
                }
            },
            None => Some(self.initial.clone()),
        }
    }
}

/// [`RoutingTable`] builder.
#[derive(Clone, Debug)]
pub struct RoutingTableBuilder {
    table: RoutingTable,
}

impl RoutingTableBuilder {
    /// Lets `to` speak after `from`.
    #[inline]
    pub fn route<A: Into<String>, B: Into<String>>(mut self, from: A, to: B) -> Self {
        self.table.routes.push(Route {
            from: from.into(),
            to: Some(to.into()),
        });
        self
    }

    /// Lets nobody speak after `agent`.
    #[inline]
    pub fn finish<S: Into<String>>(mut self, agent: S) -> Self {
        self.table.routes.push(Route {
            from: agent.into(),
            to: None,
        });
        self
    }

    /// Selects nobody once the most recent message carries the keyword.
    #[inline]
    pub fn stop_on(mut self, signal: KeywordSignal) -> Self {
        self.table.stop_on = Some(signal);
        self
    }

    /// Builds the table. Use [`RoutingTable::validate`] to check it
    /// against a roster.
    #[inline]
    pub fn build(self) -> RoutingTable {
        self.table
    }
}
