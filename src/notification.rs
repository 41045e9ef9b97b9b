//! Per-application notification logs and sequential readers.

use std::sync::Arc;

use crate::error::{LookupError, StoreError};
use crate::event::Notification;
use crate::recorder::Recorder;

/// Read access to one application's notification log.
///
/// Cheap to clone; all clones share the underlying recorder.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    recorder: Arc<dyn Recorder>,
    application: String,
}

impl NotificationLog {
    pub fn new(recorder: Arc<dyn Recorder>, application: impl Into<String>) -> Self {
        Self {
            recorder,
            application: application.into(),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// One past the last position in the log (0 when empty).
    pub fn next_position(&self) -> Result<u64, StoreError> {
        self.recorder.next_position(&self.application)
    }

    /// Fetch a single notification.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownNotificationPosition`] if `position` is
    /// at or past [`next_position`](Self::next_position).
    pub fn get(&self, position: u64) -> Result<Notification, LookupError> {
        self.recorder
            .notifications(&self.application, position, 1)?
            .pop()
            .ok_or_else(|| LookupError::UnknownNotificationPosition {
                application: self.application.clone(),
                position,
            })
    }

    /// A reader positioned at the start of the log.
    pub fn reader(&self) -> LogReader {
        LogReader {
            log: self.clone(),
            position: 0,
        }
    }

    /// Up to `limit` contiguous notifications starting at `start`.
    pub fn select(&self, start: u64, limit: usize) -> Result<Vec<Notification>, StoreError> {
        self.recorder.notifications(&self.application, start, limit)
    }
}

/// A cursor over a [`NotificationLog`] that never skips positions.
#[derive(Debug, Clone)]
pub struct LogReader {
    log: NotificationLog,
    position: u64,
}

impl LogReader {
    /// Move the reader to `position`.
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// The position the next [`list`](Self::list) call starts from.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Return at most `advance_by` notifications from the current position
    /// and move past them.
    ///
    /// The result holds exactly `min(advance_by, next_position - position)`
    /// items (none once the reader is at or past the end).
    pub fn list(&mut self, advance_by: usize) -> Result<Vec<Notification>, StoreError> {
        let items = self.log.select(self.position, advance_by)?;
        self.position += items.len() as u64;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use crate::recorder::test_support::new_event;
    use uuid::Uuid;

    fn log_with(count: usize) -> NotificationLog {
        let recorder = Arc::new(MemoryRecorder::new());
        for _ in 0..count {
            recorder
                .append("orders", Uuid::new_v4(), 0, vec![new_event("order.Created")])
                .expect("append should succeed");
        }
        NotificationLog::new(recorder, "orders")
    }

    #[test]
    fn empty_log_starts_at_zero() {
        let log = log_with(0);
        assert_eq!(log.next_position().expect("next"), 0);
        assert!(log.reader().list(10).expect("list").is_empty());
    }

    #[test]
    fn list_returns_min_of_advance_and_remaining() {
        let log = log_with(7);
        let mut reader = log.reader();
        reader.seek(3);

        let first = reader.list(2).expect("list");
        assert_eq!(first.iter().map(|n| n.position).collect::<Vec<_>>(), vec![3, 4]);

        let rest = reader.list(10).expect("list");
        assert_eq!(rest.iter().map(|n| n.position).collect::<Vec<_>>(), vec![5, 6]);
        assert_eq!(reader.position(), 7);
        assert!(reader.list(10).expect("list").is_empty());
    }

    #[test]
    fn get_past_end_is_unknown_position() {
        let log = log_with(2);
        assert_eq!(log.get(1).expect("exists").position, 1);

        let err = log.get(2).expect_err("past the end");
        assert!(matches!(
            err,
            LookupError::UnknownNotificationPosition { position: 2, .. }
        ));
    }

    #[test]
    fn notifications_carry_application_name() {
        let log = log_with(1);
        let notification = log.get(0).expect("exists");
        assert_eq!(notification.application_name, "orders");
        assert_eq!(notification.event.topic, "order.Created");
    }
}
