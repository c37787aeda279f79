//! Deciding whether a run should stop after a turn.

use std::collections::BTreeSet;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::roster::Roster;
use crate::transcript::{Message, Transcript};

/// Why a run was stopped on purpose.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "signal", content = "value", rename_all = "snake_case")]
pub enum StopSignal {
    /// The most recent message carried the given keyword.
    Keyword(String),
    /// The named final agent has spoken.
    FinalAgent(String),
    /// The caller cancelled the run.
    Cancelled,
}

impl Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Keyword(keyword) => write!(f, "keyword `{keyword}`"),
            StopSignal::FinalAgent(agent) => write!(f, "final agent {agent}"),
            StopSignal::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A keyword that marks the end of a conversation when a message
/// contains it.
///
/// Matching is an exact substring search by default. It can be made
/// case-insensitive, and restricted to messages written by certain agents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSignal {
    /// The keyword to look for.
    pub keyword: String,
    /// Compares the lowercased message and keyword.
    #[serde(default)]
    pub ignore_case: bool,
    /// Only messages of these agents count. Empty means everybody.
    #[serde(default)]
    pub authors: Vec<String>,
}

impl KeywordSignal {
    /// Creates an exact, case-sensitive signal.
    #[inline]
    pub fn new<S: Into<String>>(keyword: S) -> Self {
        Self {
            keyword: keyword.into(),
            ignore_case: false,
            authors: vec![],
        }
    }

    /// Ignores letter case when matching.
    #[inline]
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Only accepts the signal from the named agent. May be called more
    /// than once.
    #[inline]
    pub fn from_author<S: Into<String>>(mut self, agent: S) -> Self {
        self.authors.push(agent.into());
        self
    }

    /// Returns `true` if the message carries the keyword.
    pub fn matches(&self, msg: &Message) -> bool {
        if !self.authors.is_empty()
            && !self.authors.iter().any(|author| msg.is_authored_by(author))
        {
            return false;
        }
        if self.keyword.is_empty() {
            return false;
        }
        if self.ignore_case {
            msg.content()
                .to_lowercase()
                .contains(&self.keyword.to_lowercase())
        } else {
            msg.content().contains(&self.keyword)
        }
    }
}

/// Decides, after each turn, whether the conversation is over.
///
/// Implementations must be pure: the decision may only depend on the
/// arguments, so calling it twice with the same input gives the same
/// answer.
pub trait TerminationPolicy: Send + Sync {
    /// Returns the reason to stop after `speaker` wrote the last message
    /// of `transcript`, or `None` to go on.
    fn check(&self, speaker: &str, transcript: &Transcript) -> Option<StopSignal>;

    /// Returns `true` if the run should stop.
    #[inline]
    fn should_terminate(&self, speaker: &str, transcript: &Transcript) -> bool {
        self.check(speaker, transcript).is_some()
    }
}

/// The declarative termination policy.
///
/// When both rules are configured the keyword is checked first, so a
/// final agent that also writes the keyword stops the run with
/// [`StopSignal::Keyword`]. Without any rule the run only stops at its
/// turn cap.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationRule {
    /// Agents whose message always ends the run.
    #[serde(default)]
    pub final_agents: BTreeSet<String>,
    /// A keyword that ends the run when the last message carries it.
    #[serde(default)]
    pub keyword: Option<KeywordSignal>,
}

impl TerminationRule {
    /// Creates a rule that never stops a run.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends the run once the named agent has spoken.
    #[inline]
    pub fn with_final_agent<S: Into<String>>(mut self, agent: S) -> Self {
        self.final_agents.insert(agent.into());
        self
    }

    /// Ends the run when the last message carries the keyword.
    #[inline]
    pub fn with_keyword(mut self, keyword: KeywordSignal) -> Self {
        self.keyword = Some(keyword);
        self
    }

    /// Checks that every agent the rule names is in the roster.
    pub fn validate(&self, roster: &Roster) -> Result<(), ConfigError> {
        let keyword_authors = self.keyword.iter().flat_map(|k| &k.authors);
        for agent in self.final_agents.iter().chain(keyword_authors) {
            if !roster.contains(agent) {
                return Err(ConfigError::UnknownAgent(agent.clone()));
            }
        }
        Ok(())
    }
}

impl TerminationPolicy for TerminationRule {
    fn check(&self, speaker: &str, transcript: &Transcript) -> Option<StopSignal> {
        if let Some(keyword) = &self.keyword {
            if transcript.last().is_some_and(|msg| keyword.matches(msg)) {
                return Some(StopSignal::Keyword(keyword.keyword.clone()));
            }
        }
        if self.final_agents.contains(speaker) {
            return Some(StopSignal::FinalAgent(speaker.to_owned()));
        }
        None
    }
}

impl Display for TerminationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rules = vec![];
        if let Some(keyword) = &self.keyword {
            rules.push(format!("keyword `{}`", keyword.keyword));
        }
        for agent in &self.final_agents {
            rules.push(format!("final agent {agent}"));
        }
        if rules.is_empty() {
            write!(f, "turn cap only")
        } else {
            write!(f, "{}", rules.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript_ending_with(agent: &str, content: &str) -> Transcript {
        let mut transcript = Transcript::new();
        transcript.push_user("Write a haiku");
        transcript.push_agent(agent, content);
        transcript
    }

    #[test]
    fn test_final_agent() {
        let rule = TerminationRule::new().with_final_agent("Writer");
        let transcript = transcript_ending_with("Writer", "Old pond");
        assert_eq!(
            rule.check("Writer", &transcript),
            Some(StopSignal::FinalAgent("Writer".to_owned()))
        );
        assert!(!rule.should_terminate("Reviewer", &transcript));
    }

    #[test]
    fn test_keyword_is_exact_substring() {
        let rule =
            TerminationRule::new().with_keyword(KeywordSignal::new("APPROVED"));
        let approved = transcript_ending_with("Reviewer", "Looks good. APPROVED");
        let lowercase = transcript_ending_with("Reviewer", "approved");
        assert!(rule.should_terminate("Reviewer", &approved));
        assert!(!rule.should_terminate("Reviewer", &lowercase));
    }

    #[test]
    fn test_keyword_case_and_authors() {
        let signal = KeywordSignal::new("yes").ignore_case().from_author("Reviewer");
        let rule = TerminationRule::new().with_keyword(signal);
        assert!(rule.should_terminate(
            "Reviewer",
            &transcript_ending_with("Reviewer", "YES, ship it")
        ));
        assert!(!rule.should_terminate(
            "Writer",
            &transcript_ending_with("Writer", "Yes, I revised it")
        ));
    }

    #[test]
    fn test_keyword_wins_over_final_agent() {
        let rule = TerminationRule::new()
            .with_final_agent("Writer")
            .with_keyword(KeywordSignal::new("DONE"));
        let transcript = transcript_ending_with("Writer", "DONE");
        assert_eq!(
            rule.check("Writer", &transcript),
            Some(StopSignal::Keyword("DONE".to_owned()))
        );
    }

    #[test]
    fn test_empty_transcript_and_no_rules() {
        let rule = TerminationRule::new();
        assert!(!rule.should_terminate("Writer", &Transcript::new()));
        assert_eq!(rule.to_string(), "turn cap only");

        let keyword_only =
            TerminationRule::new().with_keyword(KeywordSignal::new("DONE"));
        assert!(!keyword_only.should_terminate("Writer", &Transcript::new()));
    }

    #[test]
    fn test_idempotent() {
        let rule = TerminationRule::new()
            .with_final_agent("Writer")
            .with_keyword(KeywordSignal::new("DONE"));
        let transcript = transcript_ending_with("Reviewer", "Almost DONE");
        let first = rule.check("Reviewer", &transcript);
        assert_eq!(first, rule.check("Reviewer", &transcript));
        assert_eq!(
            rule.to_string(),
            "keyword `DONE`, final agent Writer"
        );
    }
}
