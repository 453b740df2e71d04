//! Cache entries and the freshness rule.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::responses::Evaluation;

use super::key::CacheKey;

/// Freshness of an entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

impl Freshness {
    /// `Fresh` iff `now - last_validated < ttl`.
    ///
    /// A `last_validated` in the future (clock stepped back) counts as age zero.
    pub fn of(last_validated: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let age = now
            .signed_duration_since(last_validated)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if age < ttl {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    pub fn is_fresh(self) -> bool {
        self == Freshness::Fresh
    }
}

/// Cached result for one key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key this entry belongs to.
    pub key: CacheKey,

    /// Numeric result.
    pub value: f64,

    /// Ordered explanation steps.
    pub steps: Vec<String>,

    /// First successful computation.
    pub created_at: DateTime<Utc>,

    /// Last successful (re)computation.
    pub last_validated: DateTime<Utc>,

    /// Server-imposed freshness cap.
    pub max_age: Option<Duration>,

    /// Times the entry answered a request without recomputation.
    pub hits: u64,
}

impl CacheEntry {
    /// Creates an entry from a fresh computation.
    pub fn new(key: CacheKey, evaluation: Evaluation, now: DateTime<Utc>) -> Self {
        Self {
            key,
            value: evaluation.value,
            steps: evaluation.steps,
            created_at: now,
            last_validated: now,
            max_age: evaluation.max_age,
            hits: 0,
        }
    }

    /// Overwrites value, steps and validation time in place.
    pub fn refresh(&mut self, evaluation: Evaluation, now: DateTime<Utc>) {
        self.value = evaluation.value;
        self.steps = evaluation.steps;
        self.max_age = evaluation.max_age;
        self.last_validated = now;
    }

    /// Tightest of the store TTL, the server cap and the client cap.
    pub fn effective_ttl(&self, ttl: Duration, client_max_age: Option<Duration>) -> Duration {
        [Some(ttl), self.max_age, client_max_age]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(ttl)
    }

    /// Freshness under the given windows.
    pub fn freshness(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        client_max_age: Option<Duration>,
    ) -> Freshness {
        Freshness::of(
            self.last_validated,
            now,
            self.effective_ttl(ttl, client_max_age),
        )
    }

    /// Snapshot of the cached answer.
    pub fn evaluation(&self) -> Evaluation {
        Evaluation {
            value: self.value,
            steps: self.steps.clone(),
            max_age: self.max_age,
            no_store: false,
        }
    }
}
