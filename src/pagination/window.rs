//! Position- and version-ordered windows over a single listing.

use uuid::Uuid;

use super::{Cursor, Edge, Page, PageError, PageRequest};
use crate::config::RunnerConfig;
use crate::event::{Notification, StoredEvent};
use crate::notification::NotificationLog;
use crate::recorder::{EventQuery, Recorder};

/// A window of one application's notification log, oldest first.
///
/// Forward windows start one past `after` (or at 0); backward windows end
/// just before `before` (or at the end of the log). Both are clamped to
/// `[0, next_position)`.
///
/// # Errors
///
/// Returns [`PageError`] for contradictory arguments, foreign cursors, or
/// a failed read.
pub fn notifications_page(
    log: &NotificationLog,
    request: &PageRequest,
    config: &RunnerConfig,
) -> Result<Page<Notification>, PageError> {
    request.validate()?;
    let next = log.next_position()?;
    let size = request.size(config) as u64;

    let (start, end) = if request.is_backward() {
        let end = match request.before.as_deref() {
            Some(token) => Cursor::decode_position(token)?.min(next),
            None => next,
        };
        (end.saturating_sub(size), end)
    } else {
        let start = match request.after.as_deref() {
            Some(token) => Cursor::decode_position(token)?.saturating_add(1).min(next),
            None => 0,
        };
        (start, start.saturating_add(size).min(next))
    };

    let edges = log
        .select(start, (end - start) as usize)?
        .into_iter()
        .map(|n| {
            Ok(Edge {
                cursor: Cursor::Position(n.position).encode()?,
                node: n,
            })
        })
        .collect::<Result<Vec<_>, PageError>>()?;

    Ok(Page::new(edges, start > 0, end < next))
}

/// A window of one aggregate's events, oldest first.
///
/// Reads one event past the window to learn whether more exist. Callers
/// are responsible for checking the aggregate belongs to the application
/// being queried.
///
/// # Errors
///
/// Returns [`PageError`] for contradictory arguments, foreign cursors, or
/// a failed read.
pub fn aggregate_events_page(
    recorder: &dyn Recorder,
    originator_id: Uuid,
    request: &PageRequest,
    config: &RunnerConfig,
) -> Result<Page<StoredEvent>, PageError> {
    request.validate()?;
    let size = request.size(config);

    let (events, has_previous, has_next) = if request.is_backward() {
        let before = request
            .before
            .as_deref()
            .map(Cursor::decode_position)
            .transpose()?;
        let mut events = recorder.read(
            originator_id,
            &EventQuery {
                lt: before,
                limit: Some(size + 1),
                descending: true,
                ..EventQuery::default()
            },
        )?;
        let has_previous = events.len() > size;
        events.truncate(size);
        events.reverse();
        let has_next = match before {
            Some(version) => recorder
                .latest(originator_id)?
                .is_some_and(|e| e.originator_version >= version),
            None => false,
        };
        (events, has_previous, has_next)
    } else {
        let after = request
            .after
            .as_deref()
            .map(Cursor::decode_position)
            .transpose()?;
        let mut events = recorder.read(
            originator_id,
            &EventQuery {
                gt: after,
                limit: Some(size + 1),
                ..EventQuery::default()
            },
        )?;
        let has_next = events.len() > size;
        events.truncate(size);
        (events, after.is_some(), has_next)
    };

    let edges = events
        .into_iter()
        .map(|e| {
            Ok(Edge {
                cursor: Cursor::Position(e.originator_version).encode()?,
                node: e,
            })
        })
        .collect::<Result<Vec<_>, PageError>>()?;

    Ok(Page::new(edges, has_previous, has_next))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::recorder::MemoryRecorder;
    use crate::recorder::test_support::new_event;

    fn log_with(count: usize) -> NotificationLog {
        let recorder = Arc::new(MemoryRecorder::new());
        for _ in 0..count {
            recorder
                .append("orders", Uuid::new_v4(), 0, vec![new_event("order.Created")])
                .expect("append");
        }
        NotificationLog::new(recorder, "orders")
    }

    fn positions(page: &Page<Notification>) -> Vec<u64> {
        page.nodes().map(|n| n.position).collect()
    }

    fn token(position: u64) -> String {
        Cursor::Position(position).encode().expect("encode")
    }

    #[test]
    fn last_without_cursor_takes_the_tail() {
        let page = notifications_page(&log_with(25), &PageRequest::last(10), &RunnerConfig::default())
            .expect("page");
        assert_eq!(positions(&page), (15..=24).collect::<Vec<_>>());
        assert!(page.page_info.has_previous_page);
        assert!(!page.page_info.has_next_page);
    }

    #[test]
    fn first_after_cursor_resumes_past_it() {
        let page = notifications_page(
            &log_with(25),
            &PageRequest::first(5).after(token(9)),
            &RunnerConfig::default(),
        )
        .expect("page");
        assert_eq!(positions(&page), (10..=14).collect::<Vec<_>>());
        assert!(page.page_info.has_previous_page);
        assert!(page.page_info.has_next_page);
        assert_eq!(page.page_info.end_cursor, Some(token(14)));
    }

    #[test]
    fn before_cursor_ends_below_it() {
        let page = notifications_page(
            &log_with(25),
            &PageRequest::last(3).before(token(5)),
            &RunnerConfig::default(),
        )
        .expect("page");
        assert_eq!(positions(&page), vec![2, 3, 4]);
        assert!(page.page_info.has_next_page);
    }

    #[test]
    fn windows_clamp_to_the_log() {
        let log = log_with(4);
        let config = RunnerConfig::default();

        let head = notifications_page(&log, &PageRequest::first(10), &config).expect("page");
        assert_eq!(positions(&head), vec![0, 1, 2, 3]);
        assert!(!head.page_info.has_previous_page);
        assert!(!head.page_info.has_next_page);

        let past_end =
            notifications_page(&log, &PageRequest::first(2).after(token(40)), &config).expect("page");
        assert!(past_end.is_empty());
        assert_eq!(past_end.page_info.start_cursor, None);
    }

    #[test]
    fn empty_log_yields_empty_page() {
        let page = notifications_page(&log_with(0), &PageRequest::default(), &RunnerConfig::default())
            .expect("page");
        assert!(page.is_empty());
        assert!(!page.page_info.has_previous_page);
    }

    #[test]
    fn merged_cursor_is_rejected_for_a_single_log() {
        let merged = Cursor::Merged(Default::default()).encode().expect("encode");
        let err = notifications_page(
            &log_with(3),
            &PageRequest::first(1).after(merged),
            &RunnerConfig::default(),
        )
        .expect_err("wrong cursor kind");
        assert!(matches!(err, PageError::InvalidCursor(_)));
    }

    fn stream_with(count: usize) -> (MemoryRecorder, Uuid) {
        let recorder = MemoryRecorder::new();
        let id = Uuid::new_v4();
        recorder
            .append(
                "orders",
                id,
                0,
                (0..count).map(|_| new_event("order.Touched")).collect(),
            )
            .expect("append");
        (recorder, id)
    }

    fn versions(page: &Page<StoredEvent>) -> Vec<u64> {
        page.nodes().map(|e| e.originator_version).collect()
    }

    #[test]
    fn aggregate_forward_pages_chain() {
        let (recorder, id) = stream_with(7);
        let config = RunnerConfig::default();

        let first = aggregate_events_page(&recorder, id, &PageRequest::first(3), &config).expect("page");
        assert_eq!(versions(&first), vec![0, 1, 2]);
        assert!(first.page_info.has_next_page);
        assert!(!first.page_info.has_previous_page);

        let end = first.page_info.end_cursor.clone().expect("cursor");
        let second =
            aggregate_events_page(&recorder, id, &PageRequest::first(3).after(end), &config).expect("page");
        assert_eq!(versions(&second), vec![3, 4, 5]);
        assert!(second.page_info.has_next_page);
        assert!(second.page_info.has_previous_page);

        let end = second.page_info.end_cursor.clone().expect("cursor");
        let third =
            aggregate_events_page(&recorder, id, &PageRequest::first(3).after(end), &config).expect("page");
        assert_eq!(versions(&third), vec![6]);
        assert!(!third.page_info.has_next_page);
    }

    #[test]
    fn aggregate_backward_pages_are_reversed() {
        let (recorder, id) = stream_with(7);
        let config = RunnerConfig::default();

        let tail = aggregate_events_page(&recorder, id, &PageRequest::last(3), &config).expect("page");
        assert_eq!(versions(&tail), vec![4, 5, 6]);
        assert!(tail.page_info.has_previous_page);
        assert!(!tail.page_info.has_next_page);

        let start = tail.page_info.start_cursor.clone().expect("cursor");
        let earlier =
            aggregate_events_page(&recorder, id, &PageRequest::last(5).before(start), &config).expect("page");
        assert_eq!(versions(&earlier), vec![0, 1, 2, 3]);
        assert!(!earlier.page_info.has_previous_page);
        assert!(earlier.page_info.has_next_page);
    }
}
