//! Cursor-based pagination over notification logs and aggregate streams.
//!
//! Requests follow the connection convention: `first`/`after` page forward,
//! `last`/`before` page backward, and cursors are opaque tokens (see
//! [`Cursor`]). Listings:
//!
//! - [`notifications_page`]: one application's log, ordered by position.
//! - [`aggregate_events_page`]: one aggregate's stream, ordered by version.
//! - [`merged_notifications_page`]: several logs merged newest-first by
//!   event timestamp.

mod cursor;
mod merge;
mod window;

pub use cursor::Cursor;
pub use merge::merged_notifications_page;
pub use window::{aggregate_events_page, notifications_page};

use serde::{Deserialize, Serialize};

use crate::config::RunnerConfig;
use crate::error::StoreError;

/// Error returned for malformed page requests or failed reads.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("'first' and 'last' cannot be combined")]
    FirstAndLast,

    #[error("'before' and 'after' cannot be combined")]
    BeforeAndAfter,

    #[error("invalid cursor '{0}'")]
    InvalidCursor(String),

    #[error("cursor encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Window arguments of a paginated query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub first: Option<usize>,
    pub last: Option<usize>,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl PageRequest {
    pub fn first(n: usize) -> Self {
        Self {
            first: Some(n),
            ..Self::default()
        }
    }

    pub fn last(n: usize) -> Self {
        Self {
            last: Some(n),
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    /// Reject contradictory arguments.
    ///
    /// # Errors
    ///
    /// [`PageError::FirstAndLast`] or [`PageError::BeforeAndAfter`].
    pub fn validate(&self) -> Result<(), PageError> {
        if self.first.is_some() && self.last.is_some() {
            return Err(PageError::FirstAndLast);
        }
        if self.before.is_some() && self.after.is_some() {
            return Err(PageError::BeforeAndAfter);
        }
        Ok(())
    }

    /// Whether the window is anchored at its end: an explicit `before`, or
    /// no forward anchor at all (the most recent items).
    pub(crate) fn is_backward(&self) -> bool {
        self.before.is_some() || (self.after.is_none() && self.first.is_none())
    }

    /// Requested size, defaulted and capped by `config`.
    pub(crate) fn size(&self, config: &RunnerConfig) -> usize {
        self.first
            .or(self.last)
            .unwrap_or(config.default_page_size)
            .min(config.max_page_size)
    }
}

/// One item of a page with the cursor that resumes right after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_previous_page: bool,
    pub has_next_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_cursor: Option<String>,
}

/// A window of items in listing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// Assemble a page, taking start and end cursors from the edges.
    pub(crate) fn new(edges: Vec<Edge<T>>, has_previous_page: bool, has_next_page: bool) -> Self {
        let page_info = PageInfo {
            has_previous_page,
            has_next_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };
        Self { edges, page_info }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contradictory_arguments_are_rejected() {
        let both_sizes = PageRequest {
            first: Some(1),
            last: Some(1),
            ..PageRequest::default()
        };
        assert!(matches!(both_sizes.validate(), Err(PageError::FirstAndLast)));

        let both_cursors = PageRequest::first(1).after("a").before("b");
        assert!(matches!(
            both_cursors.validate(),
            Err(PageError::BeforeAndAfter)
        ));
        assert!(PageRequest::last(3).before("b").validate().is_ok());
    }

    #[test]
    fn size_defaults_and_caps() {
        let config = RunnerConfig::default();
        assert_eq!(PageRequest::default().size(&config), 10);
        assert_eq!(PageRequest::first(7).size(&config), 7);
        assert_eq!(PageRequest::last(5000).size(&config), 100);
    }

    #[test]
    fn direction_follows_anchor() {
        assert!(PageRequest::default().is_backward());
        assert!(!PageRequest::first(2).is_backward());
        assert!(!PageRequest::last(2).after("a").is_backward());
        assert!(PageRequest::last(2).is_backward());
        assert!(PageRequest::first(2).before("c").is_backward());
    }

    #[test]
    fn page_info_serializes_camel_case() {
        let page: Page<u64> = Page::new(
            vec![Edge {
                cursor: "c".into(),
                node: 1,
            }],
            true,
            false,
        );
        let json = serde_json::to_value(&page).expect("serialize");
        assert_eq!(json["pageInfo"]["hasPreviousPage"], true);
        assert_eq!(json["pageInfo"]["startCursor"], "c");
    }
}
