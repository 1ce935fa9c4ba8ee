use std::time::Duration;

use serde::Serialize;

use crate::error::{PeerError, Result};

/// Delay policy between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Backoff {
    /// Every retry waits the base delay.
    #[default]
    Constant,
    /// Each retry waits `factor` times longer than the last, capped at `max`.
    Exponential { factor: f64, max: Duration },
}

impl Backoff {
    pub fn validate(&self) -> Result<()> {
        if let Backoff::Exponential { factor, max } = self {
            if !factor.is_finite() || *factor < 1.0 {
                return Err(PeerError::InvalidConfig(format!(
                    "backoff factor must be a finite number >= 1.0, got {factor}"
                )));
            }
            if max.is_zero() {
                return Err(PeerError::InvalidConfig(
                    "backoff max delay must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn after(&self, current: Duration, base: Duration) -> Duration {
        match self {
            Backoff::Constant => base,
            Backoff::Exponential { factor, max } => {
                Duration::try_from_secs_f64(current.as_secs_f64() * factor)
                    .unwrap_or(*max)
                    .min(*max)
            }
        }
    }
}

/// Retry bookkeeping for one reconnecting client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectState {
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip)]
    pub base_delay: Duration,
    #[serde(skip)]
    pub next_delay: Duration,
    #[serde(skip)]
    backoff: Backoff,
}

impl ReconnectState {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base_delay,
            next_delay: base_delay,
            backoff,
        }
    }

    /// Forget past failures. Called after a successful open and on manual
    /// connect/disconnect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay = self.base_delay;
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Claim the next retry slot.
    ///
    /// Returns the 1-based attempt number and how long to wait before
    /// dialing, or `None` once `max_attempts` retries have been used.
    pub fn schedule(&mut self) -> Option<(u32, Duration)> {
        if !self.can_retry() {
            return None;
        }
        self.attempts += 1;
        let delay = self.next_delay;
        self.next_delay = self.backoff.after(self.next_delay, self.base_delay);
        Some((self.attempts, delay))
    }
}
