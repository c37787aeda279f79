//! Property-based tests for the conversation loop.
//!
//! These tests run random rosters through random routing tables and
//! misbehaving policies, and check the invariants every run must keep.

use proptest::prelude::*;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::roster::tests::ParrotAgent;
use crate::termination::KeywordSignal;

// ============================================================================
// Test Helpers
// ============================================================================

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn agent_name(idx: usize) -> String {
    format!("agent-{idx}")
}

fn roster_of(size: usize, replies: &[String]) -> Roster {
    Roster::new((0..size).map(|idx| {
        ParrotAgent::new(&agent_name(idx), &replies[idx % replies.len()])
    }))
    .unwrap()
}

/// Picks speakers from a fixed sequence, indexed by transcript length, so
/// it may well pick the previous speaker again or somebody unknown.
struct ScrambledSelection {
    picks: Vec<usize>,
}

impl SelectionPolicy for ScrambledSelection {
    fn select(&self, transcript: &Transcript, _: &Roster, _: Option<&str>) -> Option<String> {
        let pick = self.picks[transcript.len() % self.picks.len()];
        Some(agent_name(pick))
    }
}

fn run(chat: &GroupChat) -> RunState {
    let mut transcript = Transcript::new();
    transcript.push_user("start");
    runtime()
        .block_on(chat.run(transcript, &CancellationToken::new()))
        .unwrap()
}

fn assert_no_repeats(state: &RunState, roster_size: usize) {
    if roster_size < 2 {
        return;
    }
    let authors: Vec<_> = state
        .transcript
        .iter()
        .skip(1)
        .filter_map(|msg| msg.author_name())
        .collect();
    for pair in authors.windows(2) {
        assert_ne!(pair[0], pair[1], "{authors:?}");
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// A roster size and, for each agent, the index of its successor or `None`
/// to finish. Successors are never the agent itself when there are several.
fn arb_routing() -> impl Strategy<Value = (usize, Vec<Option<usize>>)> {
    (1usize..6).prop_flat_map(|size| {
        let successor = prop_oneof![
            4 => (1..size.max(2)).prop_map(Some),
            1 => Just(None),
        ];
        (Just(size), proptest::collection::vec(successor, size)).prop_map(
            |(size, offsets)| {
                let targets = offsets
                    .into_iter()
                    .enumerate()
                    .map(|(idx, offset)| offset.map(|offset| (idx + offset) % size))
                    .collect();
                (size, targets)
            },
        )
    })
}

fn arb_replies() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-zA-Z ]{0,12}", 1..4)
}

fn table_of(targets: &[Option<usize>]) -> RoutingTable {
    let mut builder = RoutingTable::builder(agent_name(0));
    for (idx, target) in targets.iter().enumerate() {
        builder = match target {
            Some(target) => builder.route(agent_name(idx), agent_name(*target)),
            None => builder.finish(agent_name(idx)),
        };
    }
    builder.build()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_routing_table_run_invariants(
        (size, targets) in arb_routing(),
        replies in arb_replies(),
        max_turns in 1u32..16,
        final_agent in proptest::option::of(0usize..6),
    ) {
        let roster = roster_of(size, &replies);
        let table = table_of(&targets);
        prop_assert_eq!(table.validate(&roster), Ok(()));

        let mut rule = TerminationRule::new();
        if let Some(final_agent) = final_agent.filter(|idx| *idx < size) {
            rule = rule.with_final_agent(agent_name(final_agent));
        }
        let chat = GroupChat::builder(roster)
            .with_selection(table)
            .with_termination(rule.clone())
            .with_max_turns(max_turns)
            .build()
            .unwrap();

        let state = run(&chat);
        prop_assert!(state.terminated);
        prop_assert!(state.turn_count <= max_turns);
        prop_assert_eq!(state.turn_count as usize, state.transcript.len() - 1);
        assert_no_repeats(&state, size);

        if let Some(speaker) = state.last_speaker.as_deref() {
            prop_assert_eq!(
                rule.check(speaker, &state.transcript),
                rule.check(speaker, &state.transcript)
            );
        }
    }

    #[test]
    fn prop_misbehaving_selection_is_contained(
        size in 1usize..6,
        picks in proptest::collection::vec(0usize..8, 1..10),
        max_turns in 1u32..16,
    ) {
        let replies = vec!["same thing".to_owned()];
        let chat = GroupChat::builder(roster_of(size, &replies))
            .with_selection(ScrambledSelection { picks })
            .with_max_turns(max_turns)
            .build()
            .unwrap();

        let state = run(&chat);
        prop_assert!(state.turn_count <= max_turns);
        prop_assert_eq!(state.turn_count as usize, state.transcript.len() - 1);
        assert_no_repeats(&state, size);
    }

    #[test]
    fn prop_keyword_check_is_idempotent(
        content in "[a-zA-Z ]{0,20}",
        keyword in "[a-zA-Z]{1,4}",
        ignore_case in any::<bool>(),
    ) {
        let mut signal = KeywordSignal::new(keyword);
        if ignore_case {
            signal = signal.ignore_case();
        }
        let rule = TerminationRule::new().with_keyword(signal.clone());
        let mut transcript = Transcript::new();
        transcript.push_agent("Writer", content);

        let first = rule.should_terminate("Writer", &transcript);
        prop_assert_eq!(first, rule.should_terminate("Writer", &transcript));
        prop_assert_eq!(first, signal.matches(&transcript[0]));
    }
}
