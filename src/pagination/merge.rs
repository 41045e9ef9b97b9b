//! K-way merge of several notification logs, newest first by timestamp.
//!
//! The cursor is a map from application name to a boundary position.
//! Reading forward (older items) takes, among each log's entry just below
//! its boundary, the one with the greatest timestamp and lowers that
//! boundary. Reading backward takes, among each log's entry at its
//! boundary, the one with the least timestamp and raises that boundary.
//! Ties break on application name so both directions agree.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::{Cursor, Edge, Page, PageError, PageRequest};
use crate::config::RunnerConfig;
use crate::event::Notification;
use crate::notification::NotificationLog;

fn newer(a: &Notification, b: &Notification) -> Ordering {
    a.event
        .timestamp
        .total_cmp(&b.event.timestamp)
        .then_with(|| a.application_name.cmp(&b.application_name))
}

/// The next item across all logs in the given direction, if any.
fn head(
    logs: &[NotificationLog],
    bounds: &BTreeMap<String, u64>,
    backward: bool,
) -> Result<Option<Notification>, PageError> {
    let mut heads = Vec::new();
    for log in logs {
        let bound = bounds.get(log.application()).copied().unwrap_or(0);
        let position = if backward {
            bound
        } else if let Some(below) = bound.checked_sub(1) {
            below
        } else {
            continue;
        };
        if let Some(item) = log.select(position, 1)?.pop() {
            heads.push(item);
        }
    }
    Ok(if backward {
        heads.into_iter().min_by(newer)
    } else {
        heads.into_iter().max_by(newer)
    })
}

/// A newest-first window over the union of `logs`.
///
/// With no arguments the window holds the most recent items. Applications
/// missing from a cursor contribute nothing on that side of it.
///
/// # Errors
///
/// Returns [`PageError`] for contradictory arguments, foreign cursors, or
/// a failed read.
pub fn merged_notifications_page(
    logs: &[NotificationLog],
    request: &PageRequest,
    config: &RunnerConfig,
) -> Result<Page<Notification>, PageError> {
    request.validate()?;
    let size = request.size(config);

    let mut next = BTreeMap::new();
    for log in logs {
        next.insert(log.application().to_string(), log.next_position()?);
    }

    let backward = request.before.is_some() || (request.last.is_some() && request.after.is_none());
    let anchor = match (&request.before, &request.after) {
        (Some(token), _) | (_, Some(token)) => Some(Cursor::decode_merged(token)?),
        (None, None) => None,
    };
    let mut bounds: BTreeMap<String, u64> = next
        .iter()
        .map(|(app, &end)| {
            let bound = match &anchor {
                Some(cursor) => cursor.get(app).copied().unwrap_or(end).min(end),
                // Backward with no anchor starts from the oldest items.
                None if backward => 0,
                None => end,
            };
            (app.clone(), bound)
        })
        .collect();
    let initial = bounds.clone();

    // A `before` cursor marks its own item, the oldest head at the
    // boundaries; step over it. That item still follows the page.
    let mut stepped_over = false;
    if request.before.is_some()
        && let Some(own) = head(logs, &bounds, true)?
    {
        bounds.insert(own.application_name.clone(), own.position + 1);
        stepped_over = true;
    }

    let mut edges = Vec::with_capacity(size);
    while edges.len() < size {
        let Some(item) = head(logs, &bounds, backward)? else {
            break;
        };

        // The cursor resumes as if this item had just been read forward.
        bounds.insert(item.application_name.clone(), item.position);
        let cursor = Cursor::Merged(bounds.clone()).encode()?;
        if backward {
            bounds.insert(item.application_name.clone(), item.position + 1);
        }
        edges.push(Edge { cursor, node: item });
    }

    let remaining = |bounds: &BTreeMap<String, u64>| {
        bounds
            .iter()
            .any(|(app, &b)| b < next.get(app).copied().unwrap_or(0))
    };
    let (has_previous, has_next) = if backward {
        edges.reverse();
        (
            remaining(&bounds),
            stepped_over || initial.values().any(|&b| b > 0),
        )
    } else {
        (remaining(&initial), bounds.values().any(|&b| b > 0))
    };

    Ok(Page::new(edges, has_previous, has_next))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::recorder::test_support::new_event;
    use crate::recorder::{MemoryRecorder, Recorder};

    /// Appends to `orders` and `payments` alternately; the store stamps
    /// strictly increasing timestamps, so global order is append order.
    fn interleaved(count: usize) -> (Vec<NotificationLog>, Vec<(String, u64)>) {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let mut order = Vec::new();
        for i in 0..count {
            let app = if i % 3 == 2 { "payments" } else { "orders" };
            let position = recorder
                .append(app, Uuid::new_v4(), 0, vec![new_event("order.Created")])
                .expect("append")[0];
            order.push((app.to_string(), position));
        }
        let logs = vec![
            NotificationLog::new(Arc::clone(&recorder), "orders"),
            NotificationLog::new(recorder, "payments"),
        ];
        (logs, order)
    }

    fn keys(page: &Page<Notification>) -> Vec<(String, u64)> {
        page.nodes()
            .map(|n| (n.application_name.clone(), n.position))
            .collect()
    }

    #[test]
    fn default_window_is_newest_first() {
        let (logs, appended) = interleaved(9);
        let page = merged_notifications_page(&logs, &PageRequest::first(4), &RunnerConfig::default())
            .expect("page");
        let expected: Vec<_> = appended.iter().rev().take(4).cloned().collect();
        assert_eq!(keys(&page), expected);
        assert!(!page.page_info.has_previous_page);
        assert!(page.page_info.has_next_page);
    }

    #[test]
    fn forward_pages_cover_everything_once() {
        let (logs, appended) = interleaved(10);
        let config = RunnerConfig::default();
        let mut seen = Vec::new();
        let mut request = PageRequest::first(3);
        loop {
            let page = merged_notifications_page(&logs, &request, &config).expect("page");
            seen.extend(keys(&page));
            if !page.page_info.has_next_page {
                break;
            }
            let end = page.page_info.end_cursor.clone().expect("cursor");
            request = PageRequest::first(3).after(end);
        }
        let expected: Vec<_> = appended.into_iter().rev().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn backward_from_cursor_returns_newer_items() {
        let (logs, appended) = interleaved(9);
        let config = RunnerConfig::default();
        let newest: Vec<_> = appended.iter().rev().cloned().collect();

        let first = merged_notifications_page(&logs, &PageRequest::first(5), &config).expect("page");
        let end = first.page_info.end_cursor.clone().expect("cursor");
        let second =
            merged_notifications_page(&logs, &PageRequest::first(2).after(end), &config).expect("page");
        assert_eq!(keys(&second), newest[5..7].to_vec());

        // Paging back from the second page's start returns the tail of the first.
        let start = second.page_info.start_cursor.clone().expect("cursor");
        let back =
            merged_notifications_page(&logs, &PageRequest::last(3).before(start), &config).expect("page");
        assert_eq!(keys(&back), newest[2..5].to_vec());
        assert!(back.page_info.has_previous_page);
        assert!(back.page_info.has_next_page);
    }

    #[test]
    fn backward_from_oldest_item_still_has_next() {
        let (logs, appended) = interleaved(4);
        let config = RunnerConfig::default();
        let newest: Vec<_> = appended.iter().rev().cloned().collect();

        let all = merged_notifications_page(&logs, &PageRequest::first(4), &config).expect("page");
        let oldest = all.page_info.end_cursor.clone().expect("cursor");
        let back =
            merged_notifications_page(&logs, &PageRequest::last(2).before(oldest), &config).expect("page");
        assert_eq!(keys(&back), newest[1..3].to_vec());
        assert!(back.page_info.has_previous_page);
        // The oldest item, `orders#0`, follows the page.
        assert!(back.page_info.has_next_page);

        let end = back.page_info.end_cursor.clone().expect("cursor");
        let rest =
            merged_notifications_page(&logs, &PageRequest::first(10).after(end), &config).expect("page");
        assert_eq!(keys(&rest), vec![("orders".to_string(), 0)]);
    }

    #[test]
    fn last_without_cursor_takes_the_oldest() {
        let (logs, appended) = interleaved(6);
        let page = merged_notifications_page(&logs, &PageRequest::last(2), &RunnerConfig::default())
            .expect("page");
        let expected = vec![appended[1].clone(), appended[0].clone()];
        assert_eq!(keys(&page), expected);
        assert!(page.page_info.has_previous_page);
        assert!(!page.page_info.has_next_page);
    }
}
