//! Transport-facing facade over a running order system.
//!
//! [`Backstage`] is what a GraphQL or HTTP layer binds to: one method per
//! query or mutation, each returning [`ApiError`] whose serialized `kind`
//! tells the client whether to retry, fix the request, or give up.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Commands, CreateOrder, CreateOrderCommand};
use crate::error::{ExecuteError, LookupError, StoreError};
use crate::event::{Notification, StoredEvent};
use crate::pagination::{
    Page, PageError, PageRequest, aggregate_events_page, merged_notifications_page,
    notifications_page,
};
use crate::policy::Policy;
use crate::recorder::EventQuery;
use crate::runner::SystemRunner;

/// Errors returned to transport callers.
///
/// Storage and concurrency failures are logged and collapsed into
/// [`TryAgain`](ApiError::TryAgain); their details never reach clients.
#[derive(Debug, thiserror::Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "message")]
pub enum ApiError {
    /// A transient failure; the same request may succeed later.
    #[error("temporarily unavailable, try again")]
    TryAgain,

    /// The command was refused by domain logic.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The application, aggregate, or position does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed arguments, e.g. an invalid cursor.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::warn!(error = %err, "storage failure surfaced as try-again");
        Self::TryAgain
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::Store(e) => e.into(),
            other => Self::NotFound(other.to_string()),
        }
    }
}

impl From<PageError> for ApiError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::Store(e) => e.into(),
            PageError::Codec(e) => {
                tracing::error!(error = %e, "cursor encoding failed");
                Self::TryAgain
            }
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<ExecuteError<E>> for ApiError {
    fn from(err: ExecuteError<E>) -> Self {
        match err {
            ExecuteError::Domain(e) => Self::Rejected(e.to_string()),
            ExecuteError::UnknownApplication(_) | ExecuteError::UnknownAggregate(_) => {
                Self::NotFound(err.to_string())
            }
            ExecuteError::RetryExhausted { last, .. } => last.into(),
            ExecuteError::Store(e) => e.into(),
            ExecuteError::Encode(e) => {
                tracing::error!(error = %e, "command encoding failed");
                Self::TryAgain
            }
        }
    }
}

/// Queries and mutations over one [`SystemRunner`].
#[derive(Debug, Clone)]
pub struct Backstage {
    runner: Arc<SystemRunner>,
}

impl Backstage {
    pub fn new(runner: Arc<SystemRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<SystemRunner> {
        &self.runner
    }

    /// Submit a new `CreateOrder` command and return its id.
    ///
    /// The saga proceeds in the background; poll the command aggregate or
    /// the notification logs to follow it.
    pub async fn submit_command(&self) -> Result<Uuid, ApiError> {
        let id = self
            .runner
            .create::<CreateOrder>(Commands::NAME, CreateOrderCommand::Create)
            .await?;
        Ok(id)
    }

    /// A page of notifications.
    ///
    /// One application yields its log in position order. Several, or none
    /// (meaning every application), are merged newest first by timestamp.
    pub fn notifications(
        &self,
        application_names: &[&str],
        request: &PageRequest,
    ) -> Result<Page<Notification>, ApiError> {
        let config = self.runner.config();
        if let [single] = application_names {
            let log = self.runner.notification_log(single)?;
            return Ok(notifications_page(&log, request, config)?);
        }

        let names = if application_names.is_empty() {
            self.runner.applications()
        } else {
            application_names.iter().map(|s| (*s).to_string()).collect()
        };
        let logs = names
            .iter()
            .map(|name| self.runner.notification_log(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(merged_notifications_page(&logs, request, config)?)
    }

    /// A page of one aggregate's events, oldest first.
    pub fn aggregate_events(
        &self,
        application: &str,
        originator_id: Uuid,
        request: &PageRequest,
    ) -> Result<Page<StoredEvent>, ApiError> {
        self.check_owner(application, originator_id)?;
        Ok(aggregate_events_page(
            &**self.runner.recorder(),
            originator_id,
            request,
            self.runner.config(),
        )?)
    }

    /// A single event by aggregate and version, or `None` if the aggregate
    /// has no such version.
    pub fn event(
        &self,
        application: &str,
        originator_id: Uuid,
        version: u64,
    ) -> Result<Option<StoredEvent>, ApiError> {
        match self.check_owner(application, originator_id) {
            Ok(()) => {}
            Err(ApiError::NotFound(_)) if self.runner.topology().index_of(application).is_some() => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        let mut events = self.runner.recorder().read(
            originator_id,
            &EventQuery {
                gt: version.checked_sub(1),
                lt: version.checked_add(1),
                limit: Some(1),
                descending: false,
            },
        )?;
        Ok(events.pop())
    }

    /// Names of all registered applications.
    pub fn applications(&self) -> Vec<String> {
        self.runner.applications()
    }

    fn check_owner(&self, application: &str, originator_id: Uuid) -> Result<(), ApiError> {
        // Unknown applications are reported before unknown aggregates.
        self.runner.repository(application)?;
        match self.runner.recorder().owner(originator_id)? {
            Some(owner) if owner == application => Ok(()),
            _ => Err(LookupError::UnknownAggregate {
                application: application.to_string(),
                originator_id,
            }
            .into()),
        }
    }
}
