#[cfg(test)]
mod proptests;

use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent::{DeltaHandler, TurnContext};
use crate::error::{ConfigError, RunAgentFailure};
use crate::roster::Roster;
use crate::selection::{RoutingTable, SelectionPolicy};
use crate::termination::{StopSignal, TerminationPolicy, TerminationRule};
use crate::transcript::{Message, Transcript};

/// A callback that receives every message an agent appends.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// A callback invoked with the turn index and the speaker's name right
/// before the speaker starts generating.
pub type TurnHandler = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Why a run stopped without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The turn cap was reached.
    MaxIterations,
    /// The termination policy or the caller asked to stop.
    ExplicitSignal,
    /// The selection policy had no eligible speaker.
    PolicySelectedNone,
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::MaxIterations => write!(f, "max iterations"),
            TerminationReason::ExplicitSignal => write!(f, "explicit signal"),
            TerminationReason::PolicySelectedNone => {
                write!(f, "policy selected none")
            }
        }
    }
}

/// The state of one run of the conversation loop.
///
/// `turn_count` always equals the number of messages appended during the
/// run. A state that comes back inside a [`RunAgentFailure`] is not
/// terminated and has no termination reason.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// The transcript, including the messages the run started with.
    pub transcript: Transcript,
    /// Number of completed turns.
    pub turn_count: u32,
    /// The agent that spoke last in this run.
    pub last_speaker: Option<String>,
    /// Whether the run has stopped.
    pub terminated: bool,
    /// Why the run stopped.
    pub termination_reason: Option<TerminationReason>,
    /// The signal behind [`TerminationReason::ExplicitSignal`].
    pub stop_signal: Option<StopSignal>,
}

impl RunState {
    /// Creates the state of a run that has not started yet.
    pub fn new(transcript: Transcript) -> Self {
        Self {
            transcript,
            turn_count: 0,
            last_speaker: None,
            terminated: false,
            termination_reason: None,
            stop_signal: None,
        }
    }

    fn stop(&mut self, reason: TerminationReason, signal: Option<StopSignal>) {
        self.terminated = true;
        self.termination_reason = Some(reason);
        self.stop_signal = signal;
    }
}

/// The conversation loop of a fixed roster.
///
/// Turns run strictly one after another: select a speaker, let it write one
/// message, then ask the termination policy whether to stop. A run always
/// stops after at most `max_turns` turns.
pub struct GroupChat {
    roster: Roster,
    selection: Box<dyn SelectionPolicy>,
    termination: Box<dyn TerminationPolicy>,
    max_turns: u32,
    on_message: Option<MessageHandler>,
    on_turn: Option<TurnHandler>,
    on_delta: Option<DeltaHandler>,
}

impl GroupChat {
    /// Starts building a chat for the roster.
    #[inline]
    pub fn builder(roster: Roster) -> GroupChatBuilder {
        GroupChatBuilder {
            roster,
            selection: None,
            termination: None,
            max_turns: 10,
            on_message: None,
            on_turn: None,
            on_delta: None,
        }
    }

    /// Returns the roster.
    #[inline]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Returns the turn cap.
    #[inline]
    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Runs the conversation on top of `transcript`.
    ///
    /// Cancellation is only observed between turns: a turn in progress is
    /// allowed to finish, then the run stops with
    /// [`StopSignal::Cancelled`].
    ///
    /// # Errors
    ///
    /// Fails if an agent cannot produce its message. The transcript written
    /// so far comes back in the error.
    pub async fn run(
        &self,
        transcript: Transcript,
        cancel: &CancellationToken,
    ) -> Result<RunState, RunAgentFailure> {
        let mut state = RunState::new(transcript);
        let several_agents = self.roster.len() > 1;

        while !state.terminated {
            if cancel.is_cancelled() {
                info!("run cancelled after {} turn(s)", state.turn_count);
                state.stop(
                    TerminationReason::ExplicitSignal,
                    Some(StopSignal::Cancelled),
                );
                break;
            }
            if state.turn_count >= self.max_turns {
                info!("reached the cap of {} turn(s)", self.max_turns);
                state.stop(TerminationReason::MaxIterations, None);
                break;
            }

            let selected = self.selection.select(
                &state.transcript,
                &self.roster,
                state.last_speaker.as_deref(),
            );
            let Some(name) = selected else {
                debug!("no further speaker");
                state.stop(TerminationReason::PolicySelectedNone, None);
                break;
            };
            let Some(agent) = self.roster.get(&name) else {
                warn!("selected agent {name} is not in the roster");
                state.stop(TerminationReason::PolicySelectedNone, None);
                break;
            };
            if several_agents && state.last_speaker.as_deref() == Some(&name) {
                warn!("{name} was selected to speak twice in a row");
                state.stop(TerminationReason::PolicySelectedNone, None);
                break;
            }

            if let Some(on_turn) = &self.on_turn {
                on_turn(state.turn_count, &name);
            }
            let ctx = TurnContext {
                turn: state.turn_count,
                on_delta: self.on_delta.clone(),
            };
            let span = info_span!("turn", turn = state.turn_count, agent = %name);
            let result = agent
                .generate(&state.transcript, &ctx)
                .instrument(span)
                .await;
            let content = match result {
                Ok(content) => content,
                Err(source) => {
                    error!("{name} failed to generate: {source}");
                    return Err(RunAgentFailure {
                        agent: name,
                        turn_count: state.turn_count,
                        source,
                        partial: Box::new(state),
                    });
                }
            };

            let msg = state.transcript.push_agent(name.as_str(), content);
            if let Some(on_message) = &self.on_message {
                on_message(msg);
            }
            state.turn_count += 1;

            if let Some(signal) = self.termination.check(&name, &state.transcript) {
                info!("stopping after {name}: {signal}");
                state.stop(TerminationReason::ExplicitSignal, Some(signal));
            }
            state.last_speaker = Some(name);
        }

        Ok(state)
    }
}

/// [`GroupChat`] builder.
pub struct GroupChatBuilder {
    roster: Roster,
    selection: Option<Box<dyn SelectionPolicy>>,
    termination: Option<Box<dyn TerminationPolicy>>,
    max_turns: u32,
    on_message: Option<MessageHandler>,
    on_turn: Option<TurnHandler>,
    on_delta: Option<DeltaHandler>,
}

impl GroupChatBuilder {
    /// Sets the selection policy. Agents take turns in roster order if
    /// none is set.
    #[inline]
    pub fn with_selection<P: SelectionPolicy + 'static>(mut self, policy: P) -> Self {
        self.selection = Some(Box::new(policy));
        self
    }

    /// Sets the termination policy. Only the turn cap stops a run if none
    /// is set.
    #[inline]
    pub fn with_termination<P: TerminationPolicy + 'static>(
        mut self,
        policy: P,
    ) -> Self {
        self.termination = Some(Box::new(policy));
        self
    }

    /// Sets the turn cap, 10 by default.
    #[inline]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Attaches a callback that observes every appended message.
    #[inline]
    pub fn on_message(
        mut self,
        on_message: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(on_message));
        self
    }

    /// Attaches a callback that is told who speaks next.
    #[inline]
    pub fn on_turn(
        mut self,
        on_turn: impl Fn(u32, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_turn = Some(Arc::new(on_turn));
        self
    }

    /// Attaches a callback that receives text deltas as they stream in.
    #[inline]
    pub fn on_delta(mut self, on_delta: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_delta = Some(Arc::new(on_delta));
        self
    }

    /// Builds the chat.
    pub fn build(self) -> Result<GroupChat, ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ZeroMaxTurns);
        }
        let selection = match self.selection {
            Some(selection) => selection,
            None => Box::new(RoutingTable::round_robin(&self.roster)),
        };
        let termination = self
            .termination
            .unwrap_or_else(|| Box::new(TerminationRule::new()));
        debug!(
            "group chat of {:?}, at most {} turn(s)",
            self.roster, self.max_turns
        );
        Ok(GroupChat {
            roster: self.roster,
            selection,
            termination,
            max_turns: self.max_turns,
            on_message: self.on_message,
            on_turn: self.on_turn,
            on_delta: self.on_delta,
        })
    }
}
