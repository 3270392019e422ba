//! Property tests for the counter invariant and the classifier.

use chrono::Utc;
use proptest::prelude::*;
use proptest::sample::Index;

use emerald_core::event::LogEvent;
use emerald_core::types::{LifecycleState, PlayerId};
use emerald_ingest::{LineClassifier, PlayerLifecycleTracker};

/// Well-formed per-player histories.
fn history(path: u8, id: &PlayerId) -> Vec<LogEvent> {
    let queue = || LogEvent::Queue {
        player_id: id.clone(),
        name: None,
    };
    let join = || LogEvent::Join {
        player_id: id.clone(),
    };
    let disconnect = || LogEvent::Disconnect {
        player_id: id.clone(),
    };
    match path {
        0 => vec![queue()],
        1 => vec![queue(), join()],
        2 => vec![queue(), join(), disconnect()],
        3 => vec![queue(), disconnect()],
        _ => vec![queue(), queue(), join(), disconnect()],
    }
}

proptest! {
    #[test]
    fn interleaved_well_formed_histories_keep_counts_non_negative(
        paths in prop::collection::vec(0u8..5, 1..20),
        picks in prop::collection::vec(any::<Index>(), 1..100),
    ) {
        let mut pending: Vec<std::collections::VecDeque<LogEvent>> = paths
            .iter()
            .enumerate()
            .map(|(i, path)| history(*path, &PlayerId::new(&format!("{i:04x}"))).into())
            .collect();

        let mut tracker = PlayerLifecycleTracker::new();
        let now = Utc::now();
        let mut step = 0usize;
        loop {
            let live: Vec<usize> = (0..pending.len()).filter(|i| !pending[*i].is_empty()).collect();
            if live.is_empty() {
                break;
            }
            let player = live[picks[step % picks.len()].index(live.len())];
            step += 1;

            let Some(event) = pending[player].pop_front() else {
                continue;
            };
            tracker.apply(&event, now);
            let counters = tracker.counters();
            prop_assert!(counters.holds_invariant(), "violated after {event}: {counters:?}");
        }

        let counters = tracker.counters();
        let by_state = tracker.sessions_by_state();
        let count = |state: LifecycleState| by_state.get(&state.to_string()).copied().unwrap_or(0) as i64;
        prop_assert_eq!(counters.raw_player_count(), count(LifecycleState::Joined));
        prop_assert_eq!(counters.raw_queue_count(), count(LifecycleState::Queued));
    }

    #[test]
    fn classification_is_deterministic(line in ".{0,200}") {
        let classifier = LineClassifier::new(3).unwrap();
        prop_assert_eq!(classifier.classify(&line), classifier.classify(&line));
    }

    #[test]
    fn world_lines_round_trip_their_id(id in "[A-Za-z0-9_-]{1,24}") {
        let classifier = LineClassifier::new(3).unwrap();
        let line = format!("LogSFPS: Trader id={id} status=Initial");
        let classification = classifier.classify(&line);
        prop_assert_eq!(
            classification,
            emerald_ingest::Classification::Event(LogEvent::Trader { event_id: id })
        );
    }
}
