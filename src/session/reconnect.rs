//! Reconnect policy applied by the session on health samples.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::constants::{RECONNECT_INITIAL_BACKOFF, RECONNECT_MAX_BACKOFF};

/// What the session does when it finds the connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay disconnected until the user reconnects or changes language.
    #[default]
    Manual,
    /// Retry the current target with exponential backoff.
    Backoff {
        /// Delay before the first retry.
        initial: Duration,
        /// Cap for the doubling delay.
        max: Duration,
    },
}

impl ReconnectPolicy {
    /// Backoff with the default bounds.
    #[must_use]
    pub fn backoff() -> Self {
        Self::Backoff {
            initial: RECONNECT_INITIAL_BACKOFF,
            max: RECONNECT_MAX_BACKOFF,
        }
    }
}

/// Config-file spelling of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectMode {
    /// See [`ReconnectPolicy::Manual`].
    #[default]
    Manual,
    /// See [`ReconnectPolicy::Backoff`].
    Backoff,
}

impl std::str::FromStr for ReconnectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "backoff" => Ok(Self::Backoff),
            other => Err(format!("unknown reconnect mode {other:?} (expected manual or backoff)")),
        }
    }
}

/// Retry schedule state for [`ReconnectPolicy::Backoff`].
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    delay: Option<Duration>,
    next_attempt: Option<Instant>,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            delay: None,
            next_attempt: None,
        }
    }

    /// Forget any schedule (connection is healthy or target changed).
    pub(crate) fn reset(&mut self) {
        self.delay = None;
        self.next_attempt = None;
    }

    /// Called on a sample that found the connection closed.
    ///
    /// Returns `true` when a retry is due now. The first call only schedules
    /// the retry `initial` from `now`; each retry doubles the delay up to
    /// `max`.
    pub(crate) fn should_retry(&mut self, policy: ReconnectPolicy, now: Instant) -> bool {
        let ReconnectPolicy::Backoff { initial, max } = policy else {
            return false;
        };

        let Some(due) = self.next_attempt else {
            self.delay = Some(initial);
            self.next_attempt = Some(now + initial);
            return false;
        };
        if now < due {
            return false;
        }

        let next_delay = self.delay.unwrap_or(initial).saturating_mul(2).min(max);
        self.delay = Some(next_delay);
        self.next_attempt = Some(now + next_delay);
        true
    }
}
