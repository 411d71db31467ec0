//! Cache-then-quota gate around an external model call.
//!
//! [`Gate::call`] runs the whole governed sequence for one request:
//!
//! 1. cache lookup by fingerprint (a hit consumes no quota);
//! 2. feature kill-switch;
//! 3. quota reservation, checked and counted under the governor's lock;
//! 4. the caller's model call;
//! 5. on success, cache the text and log the usage; on failure, release the
//!    reserved slot.
//!
//! A denial comes back as [`GateOutcome::Denied`] so the caller can serve its
//! rule-based fallback. Errors from the model call are returned untouched and
//! nothing is cached or recorded for them.

use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::cache::{fingerprint, ResponseCache};
use crate::config::GovernorConfig;
use crate::error::Result;
use crate::quota::{Decision, QuotaGovernor};

/// What the external call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutput {
    pub text: String,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
}

impl CallOutput {
    /// Output with no token or cost accounting.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
            cost_usd: None,
        }
    }
}

/// Result of a governed call.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Served from the cache.
    Cached(String),
    /// The external call ran and its usage was recorded.
    Fresh(CallOutput),
    /// Feature disabled or quota exhausted; the call did not run.
    Denied(Decision),
}

impl GateOutcome {
    /// Response text, if the call was not denied.
    pub fn text(&self) -> Option<&str> {
        match self {
            GateOutcome::Cached(text) => Some(text),
            GateOutcome::Fresh(out) => Some(&out.text),
            GateOutcome::Denied(_) => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, GateOutcome::Denied(_))
    }
}

/// A quota governor and response cache used together.
pub struct Gate {
    governor: QuotaGovernor,
    cache: ResponseCache,
}

impl Gate {
    pub fn new(governor: QuotaGovernor, cache: ResponseCache) -> Self {
        Self { governor, cache }
    }

    /// File-backed governor and cache from `config`.
    pub fn from_config(config: &GovernorConfig) -> Result<Self> {
        Ok(Self::new(
            QuotaGovernor::from_config(config)?,
            ResponseCache::from_config(config)?,
        ))
    }

    pub fn governor(&self) -> &QuotaGovernor {
        &self.governor
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Run `call` for `feature` unless the cache or the quota says otherwise.
    ///
    /// `payload` should contain only the fields that change the expected
    /// response; it is the cache key together with `feature` and `user_id`.
    pub fn call<F, E>(
        &self,
        feature: &str,
        user_id: Option<&str>,
        payload: &Value,
        call: F,
    ) -> std::result::Result<GateOutcome, E>
    where
        F: FnOnce() -> std::result::Result<CallOutput, E>,
    {
        let key = fingerprint(feature, user_id, payload);
        if let Some(text) = self.cache.get_by_key(&key) {
            return Ok(GateOutcome::Cached(text));
        }

        if !self.governor.feature_enabled(feature, user_id) {
            let decision = Decision::feature_disabled(feature);
            debug!(feature, reason = %decision.reason, "gate: call denied");
            return Ok(GateOutcome::Denied(decision));
        }

        let reservation = match self.governor.reserve(user_id) {
            Ok(reservation) => reservation,
            Err(decision) => {
                debug!(feature, reason = %decision.reason, "gate: call denied");
                return Ok(GateOutcome::Denied(decision));
            }
        };

        let output = match call() {
            Ok(output) => output,
            Err(e) => {
                debug!(feature, "gate: call failed, releasing reserved slot");
                self.governor.release(reservation);
                return Err(e);
            }
        };
        self.cache.put_by_key(key, feature, &output.text);
        self.governor
            .commit(reservation, Some(feature), output.tokens_used, output.cost_usd);
        Ok(GateOutcome::Fresh(output))
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("governor", &self.governor)
            .field("cache", &self.cache)
            .finish()
    }
}
