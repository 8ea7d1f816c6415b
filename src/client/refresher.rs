//! Renewal timing and retry bookkeeping.
//!
//! The refresher never talks to the network itself. It answers two
//! questions for the session manager: when should the next silent renewal
//! run, and what to do after a failed attempt.

use serde::{Deserialize, Serialize};

use crate::client::token_store::TokenSet;

/// Renewal timing and retry budget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalPolicy {
    /// Renew this many seconds before the access token expires
    pub margin_secs: u64,
    /// Wait between failed attempts
    pub retry_delay_secs: u64,
    /// Consecutive failures before the session is given up
    pub max_attempts: u32,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            margin_secs: 60,
            retry_delay_secs: 10,
            max_attempts: 3,
        }
    }
}

/// What to do after a failed renewal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenewalVerdict {
    /// Try again at this Unix timestamp
    RetryAt(u64),
    /// Budget used up; the session is over
    Exhausted,
}

/// Tracks consecutive renewal failures for one session.
#[derive(Clone, Debug, Default)]
pub struct TokenRefresher {
    policy: RenewalPolicy,
    failures: u32,
}

impl TokenRefresher {
    pub fn new(policy: RenewalPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// When renewal of `tokens` should start: `margin_secs` before expiry,
    /// or right away if that moment has already passed.
    pub fn renewal_at(&self, tokens: &TokenSet, now: u64) -> u64 {
        tokens
            .expires_at
            .saturating_sub(self.policy.margin_secs)
            .max(now)
    }

    /// Resets the failure count.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Counts a failure and decides whether another attempt is allowed.
    pub fn record_failure(&mut self, now: u64) -> RenewalVerdict {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.policy.max_attempts {
            tracing::warn!(
                "Silent renewal failed {} times, giving up",
                self.failures
            );
            RenewalVerdict::Exhausted
        } else {
            tracing::debug!(
                "Silent renewal failed ({}/{}), retrying in {}s",
                self.failures,
                self.policy.max_attempts,
                self.policy.retry_delay_secs
            );
            RenewalVerdict::RetryAt(now.saturating_add(self.policy.retry_delay_secs))
        }
    }
}
