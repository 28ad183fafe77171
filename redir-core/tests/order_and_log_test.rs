//! Ordering and Request Log Tests
//!
//! Adjacent-swap reordering and the bounded request log, including the
//! capacity and inverse-move properties.

use chrono::{DateTime, Duration, TimeZone, Utc};
use redir_common::{MatchedRule, RequestDetails, RequestLogEntry, RequestsState, ResourceType};
use redir_core::{order, RedirError, RequestLog};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn entry(n: usize) -> RequestLogEntry {
    RequestLogEntry::new(
        RequestDetails::new(format!("E{}", n), "http://a", ResourceType::Script),
        MatchedRule { id: 1, tag: None },
        start() + Duration::milliseconds(n as i64),
    )
}

#[test]
fn test_move_at_edges_is_noop() {
    let mut ids = vec![3, 1, 2];

    assert!(!order::move_up(&mut ids, &3));
    assert!(!order::move_down(&mut ids, &2));
    assert!(!order::move_up(&mut ids, &9));
    assert_eq!(ids, vec![3, 1, 2]);

    assert!(order::move_down(&mut ids, &3));
    assert_eq!(ids, vec![1, 3, 2]);
}

#[test]
fn test_shrinking_capacity_keeps_newest() {
    let mut log = RequestLog::from(RequestsState::new(5, true));
    for n in 0..5 {
        log.record(entry(n));
    }

    log.set_capacity(2).unwrap();
    let kept: Vec<_> = log.entries().iter().map(|e| e.request.request_id.as_str()).collect();
    assert_eq!(kept, vec!["E4", "E3"]);

    assert!(matches!(log.set_capacity(0), Err(RedirError::Validation { .. })));
    assert_eq!(log.capacity(), 2);
}

#[test]
fn test_paused_log_records_nothing() {
    let mut log = RequestLog::from(RequestsState::new(3, false));
    assert!(!log.record(entry(0)));
    assert!(log.entries().is_empty());
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_move_up_then_down_restores_order(len in 1usize..10, pick in 0usize..10) {
            let original: Vec<u32> = (1..=len as u32).collect();
            let index = pick % len;
            let id = original[index];

            let mut ids = original.clone();
            order::move_up(&mut ids, &id);
            order::move_down(&mut ids, &id);
            if index > 0 {
                prop_assert_eq!(&ids, &original);
            }

            let mut ids = original.clone();
            order::move_down(&mut ids, &id);
            order::move_up(&mut ids, &id);
            if index + 1 < len {
                prop_assert_eq!(&ids, &original);
            }
        }

        #[test]
        fn prop_moves_keep_a_permutation(len in 1usize..10, moves in prop::collection::vec((0usize..10, any::<bool>()), 0..20)) {
            let original: Vec<u32> = (1..=len as u32).collect();
            let mut ids = original.clone();

            for (pick, up) in moves {
                let id = original[pick % len];
                if up {
                    order::move_up(&mut ids, &id);
                } else {
                    order::move_down(&mut ids, &id);
                }
            }

            let mut sorted = ids.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, original);
        }

        #[test]
        fn prop_request_log_never_exceeds_capacity(capacity in 1usize..6, count in 0usize..20) {
            let mut log = RequestLog::from(RequestsState::new(capacity, true));

            for n in 0..count {
                prop_assert!(log.record(entry(n)));
                prop_assert!(log.entries().len() <= capacity);
            }

            // Newest first, exactly the most recent ones kept
            let kept: Vec<String> = log.entries().iter().map(|e| e.request.request_id.clone()).collect();
            let expected: Vec<String> = (0..count).rev().take(capacity).map(|n| format!("E{}", n)).collect();
            prop_assert_eq!(kept, expected);
        }
    }
}
