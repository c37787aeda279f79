//! The shared, append-only message history of a group chat.

use std::fmt::{self, Display};
use std::ops::Index;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Who a message comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human participant.
    User,
    /// An agent of the roster.
    Assistant,
    /// Out-of-band instructions.
    System,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A message of the transcript.
///
/// Messages can only be created by appending to a [`Transcript`], which
/// assigns their sequence index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    author_name: Option<String>,
    content: String,
    sequence_index: u64,
}

impl Message {
    /// Returns the role of the author.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the name of the author, if known.
    #[inline]
    pub fn author_name(&self) -> Option<&str> {
        self.author_name.as_deref()
    }

    /// Returns the text of the message.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the position of the message in its transcript.
    #[inline]
    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    /// Returns `true` if the message was written by the named agent.
    #[inline]
    pub fn is_authored_by(&self, agent: &str) -> bool {
        self.role == Role::Assistant && self.author_name() == Some(agent)
    }
}

/// An ordered, append-only sequence of messages.
///
/// The sequence index of every message equals its position, there is no
/// way to rewrite or remove a message once it has been appended. A
/// transcript can only be emptied as a whole with [`Transcript::clear`],
/// which starts a new conversation.
///
/// Deserializing rejects a document whose sequence indices do not match
/// the message positions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message and returns it.
    pub fn append<S: Into<String>>(
        &mut self,
        role: Role,
        author_name: Option<String>,
        content: S,
    ) -> &Message {
        let sequence_index = self.messages.len() as u64;
        self.messages.push(Message {
            role,
            author_name,
            content: content.into(),
            sequence_index,
        });
        &self.messages[self.messages.len() - 1]
    }

    /// Appends a message written by a human participant.
    #[inline]
    pub fn push_user<S: Into<String>>(&mut self, content: S) -> &Message {
        self.append(Role::User, Some("user".to_owned()), content)
    }

    /// Appends a message written by an agent.
    #[inline]
    pub fn push_agent<N: Into<String>, S: Into<String>>(
        &mut self,
        agent: N,
        content: S,
    ) -> &Message {
        self.append(Role::Assistant, Some(agent.into()), content)
    }

    /// Returns the most recent message.
    #[inline]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the transcript has no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterates the messages in order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Returns at most the `n` most recent messages, in order.
    #[inline]
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Removes every message.
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl<'de> Deserialize<'de> for Transcript {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            messages: Vec<Message>,
        }

        let Raw { messages } = Raw::deserialize(deserializer)?;
        let misplaced = messages
            .iter()
            .enumerate()
            .find(|(position, msg)| msg.sequence_index != *position as u64);
        if let Some((position, msg)) = misplaced {
            return Err(D::Error::custom(format!(
                "message at position {position} has sequence index {}",
                msg.sequence_index
            )));
        }
        Ok(Self { messages })
    }
}

impl Index<usize> for Transcript {
    type Output = Message;

    #[inline]
    fn index(&self, index: usize) -> &Message {
        &self.messages[index]
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
