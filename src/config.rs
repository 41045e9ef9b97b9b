//! Runner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Configuration for a [`SystemRunner`](crate::SystemRunner).
///
/// All fields have defaults accessible via [`RunnerConfig::default()`], and
/// missing fields fall back to them when deserializing, so a host can load a
/// partial config from its own settings file.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use choreo_es::RunnerConfig;
///
/// let config = RunnerConfig {
///     poll_interval: Duration::from_millis(50),
///     ..RunnerConfig::default()
/// };
/// assert_eq!(config.batch_size, 100);
/// assert_eq!(config.retry.max_attempts, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Backoff for stage commits and command submissions.
    pub retry: RetryPolicy,

    /// Maximum notifications a stage processes per upstream in one service
    /// pass before yielding to the next stage.
    ///
    /// Default: 100.
    pub batch_size: usize,

    /// How long the background loop sleeps when idle before polling again.
    ///
    /// Default: 100 milliseconds.
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// Page size used when a request gives neither `first` nor `last`.
    ///
    /// Default: 10.
    pub default_page_size: usize,

    /// Upper bound on any requested page size.
    ///
    /// Default: 100.
    pub max_page_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            batch_size: 100,
            poll_interval: Duration::from_millis(100),
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// Serde for `Duration` as whole milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
