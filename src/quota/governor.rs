//! Quota governor: decides whether an external model call may happen now and
//! records it afterwards.
//!
//! Four ceilings are enforced together: global daily, global monthly,
//! per-user daily and per-user monthly. Counters live in a [`UsageLedger`]
//! that is loaded fresh from its [`DocumentStore`] on every operation, so
//! several governors (or processes) can share one ledger file.
//!
//! Resets are lazy: the first operation after midnight (or the first of the
//! month) clears the stale counters. Figures are only as fresh as the last
//! call into the governor.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use usage_governor::clock::SystemClock;
//! use usage_governor::config::QuotaLimits;
//! use usage_governor::quota::{FeatureFlags, QuotaGovernor};
//! use usage_governor::storage::MemoryStore;
//!
//! let governor = QuotaGovernor::new(
//!     QuotaLimits::default(),
//!     FeatureFlags::default(),
//!     Box::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//! )
//! .unwrap();
//!
//! let decision = governor.can_call(Some("alice"));
//! if decision.allowed {
//!     // ... call the model ...
//!     governor.record_call(Some("alice"), Some("greeting"), Some(120), Some(0.0002));
//! } else {
//!     println!("degraded: {}", decision.reason);
//! }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{GovernorConfig, QuotaLimits};
use crate::error::Result;
use crate::storage::{DocumentStore, JsonFileStore};

use super::features::FeatureFlags;
use super::ledger::{PeriodKeys, UsageLedger};
use super::usage_log::{FeatureBreakdown, UsageLog, UsageRecord};

/// One of the four enforced ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ceiling {
    GlobalDaily,
    GlobalMonthly,
    UserDaily,
    UserMonthly,
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ceiling::GlobalDaily => "global daily",
            Ceiling::GlobalMonthly => "global monthly",
            Ceiling::UserDaily => "per-user daily",
            Ceiling::UserMonthly => "per-user monthly",
        };
        f.write_str(s)
    }
}

/// Why a call was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    /// A ceiling has been reached.
    QuotaExceeded { ceiling: Ceiling, limit: u32 },
    /// The feature is switched off in the allow-list.
    FeatureDisabled { feature: String },
}

/// Outcome of a quota check. Denials are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "API call allowed".to_string(),
            denial: None,
        }
    }

    fn exceeded(ceiling: Ceiling, limit: u32) -> Self {
        let reason = match ceiling {
            Ceiling::GlobalDaily => format!("Global daily API limit reached ({limit} calls)"),
            Ceiling::GlobalMonthly => format!("Global monthly API limit reached ({limit} calls)"),
            Ceiling::UserDaily => format!("Per-user daily limit reached ({limit} calls)"),
            Ceiling::UserMonthly => format!("Per-user monthly limit reached ({limit} calls)"),
        };
        Self {
            allowed: false,
            reason,
            denial: Some(Denial::QuotaExceeded { ceiling, limit }),
        }
    }

    pub(crate) fn feature_disabled(feature: &str) -> Self {
        Self {
            allowed: false,
            reason: format!("Feature '{feature}' is disabled"),
            denial: Some(Denial::FeatureDisabled {
                feature: feature.to_string(),
            }),
        }
    }

    /// The ceiling that caused a quota denial, if any.
    pub fn ceiling(&self) -> Option<Ceiling> {
        match &self.denial {
            Some(Denial::QuotaExceeded { ceiling, .. }) => Some(*ceiling),
            _ => None,
        }
    }
}

/// Used vs limit for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub daily_used: u64,
    pub daily_limit: u32,
    pub monthly_used: u64,
    pub monthly_limit: u32,
}

impl WindowStats {
    pub fn daily_remaining(&self) -> u64 {
        u64::from(self.daily_limit).saturating_sub(self.daily_used)
    }

    pub fn monthly_remaining(&self) -> u64 {
        u64::from(self.monthly_limit).saturating_sub(self.monthly_used)
    }
}

/// Snapshot returned by [`QuotaGovernor::usage_stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub global: WindowStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<WindowStats>,
}

/// A call counted by [`QuotaGovernor::reserve`] whose outcome is not known yet.
///
/// Hand it back with [`QuotaGovernor::commit`] once the call succeeded, or
/// [`QuotaGovernor::release`] to give the slot back.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a reservation holds quota until committed or released"]
pub struct Reservation {
    user_id: Option<String>,
    keys: PeriodKeys,
}

impl Reservation {
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Quota enforcement over a shared usage ledger.
///
/// Every read-modify-write of the ledger runs under one internal mutex that
/// also owns the store, so operations on the same governor never interleave.
/// [`can_call`](Self::can_call) followed by [`record_call`](Self::record_call)
/// is still a check-then-act sequence; use [`try_acquire`](Self::try_acquire)
/// or [`reserve`](Self::reserve) when concurrent callers share the governor.
pub struct QuotaGovernor {
    store: Mutex<Box<dyn DocumentStore<UsageLedger>>>,
    limits: QuotaLimits,
    features: FeatureFlags,
    clock: Arc<dyn Clock>,
    usage_log: Option<UsageLog>,
}

impl QuotaGovernor {
    /// Build a governor. Fails on a zero limit.
    pub fn new(
        limits: QuotaLimits,
        features: FeatureFlags,
        store: Box<dyn DocumentStore<UsageLedger>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            store: Mutex::new(store),
            limits,
            features,
            clock,
            usage_log: None,
        })
    }

    /// File-backed governor using the paths and limits from `config`.
    pub fn from_config(config: &GovernorConfig) -> Result<Self> {
        let store = JsonFileStore::new(config.ledger_path());
        Ok(Self::new(
            config.limits.clone(),
            config.features.clone(),
            Box::new(store),
            Arc::new(SystemClock),
        )?
        .with_usage_log(UsageLog::new(config.usage_log_path())))
    }

    /// Also append every recorded call to `log`.
    pub fn with_usage_log(mut self, log: UsageLog) -> Self {
        self.usage_log = Some(log);
        self
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    pub fn features(&self) -> &FeatureFlags {
        &self.features
    }

    /// Whether a call may be made now. Does not change any count.
    pub fn can_call(&self, user_id: Option<&str>) -> Decision {
        self.with_ledger(|ledger, keys| (self.evaluate(ledger, keys, user_id), false))
    }

    /// Count a completed call. Never fails: persistence problems are logged
    /// and the record is dropped.
    pub fn record_call(
        &self,
        user_id: Option<&str>,
        feature: Option<&str>,
        tokens_used: Option<u64>,
        cost_usd: Option<f64>,
    ) {
        self.with_ledger(|ledger, keys| {
            ledger.record(keys, user_id);
            ((), true)
        });
        self.append_log(user_id, feature, tokens_used, cost_usd);
    }

    /// Check and record in one critical section.
    ///
    /// When the returned decision is allowed the call has already been
    /// counted; callers must not also call [`record_call`](Self::record_call).
    pub fn try_acquire(
        &self,
        user_id: Option<&str>,
        feature: Option<&str>,
        tokens_used: Option<u64>,
        cost_usd: Option<f64>,
    ) -> Decision {
        match self.reserve(user_id) {
            Ok(reservation) => {
                self.commit(reservation, feature, tokens_used, cost_usd);
                Decision::allow()
            }
            Err(denied) => denied,
        }
    }

    /// Count a call up front, before its usage is known.
    ///
    /// Checks and records in one critical section. No usage-log record is
    /// written; that happens in [`commit`](Self::commit).
    pub fn reserve(&self, user_id: Option<&str>) -> std::result::Result<Reservation, Decision> {
        self.with_ledger(|ledger, keys| {
            let decision = self.evaluate(ledger, keys, user_id);
            if !decision.allowed {
                return (Err(decision), false);
            }
            ledger.record(keys, user_id);
            let reservation = Reservation {
                user_id: user_id.map(str::to_string),
                keys: keys.clone(),
            };
            (Ok(reservation), true)
        })
    }

    /// Keep a reserved call and log its usage.
    pub fn commit(
        &self,
        reservation: Reservation,
        feature: Option<&str>,
        tokens_used: Option<u64>,
        cost_usd: Option<f64>,
    ) {
        self.append_log(reservation.user_id(), feature, tokens_used, cost_usd);
    }

    /// Give a reserved slot back, as if the call had never been counted.
    ///
    /// A reservation that outlived its day or month only returns the
    /// counters of epochs that are still current.
    pub fn release(&self, reservation: Reservation) {
        self.with_ledger(|ledger, _| {
            ledger.unrecord(&reservation.keys, reservation.user_id());
            ((), true)
        });
    }

    /// Whether `feature` is on in the allow-list.
    ///
    /// `user_id` is accepted for call-site symmetry; there are no per-user
    /// overrides.
    pub fn feature_enabled(&self, feature: &str, _user_id: Option<&str>) -> bool {
        self.features.is_enabled(feature)
    }

    /// Feature gate followed by [`can_call`](Self::can_call).
    pub fn check_feature(&self, feature: &str, user_id: Option<&str>) -> Decision {
        if !self.feature_enabled(feature, user_id) {
            return Decision::feature_disabled(feature);
        }
        self.can_call(user_id)
    }

    /// Used vs limit, globally and for `user_id` when given.
    pub fn usage_stats(&self, user_id: Option<&str>) -> UsageStats {
        self.with_ledger(|ledger, keys| {
            let global = WindowStats {
                daily_used: ledger.global_daily_total(),
                daily_limit: self.limits.global_daily,
                monthly_used: ledger.global_monthly_total(),
                monthly_limit: self.limits.global_monthly,
            };
            let user = user_id.map(|u| WindowStats {
                daily_used: ledger.user_count(u, &keys.today),
                daily_limit: self.limits.user_daily,
                monthly_used: ledger.user_count(u, &keys.month),
                monthly_limit: self.limits.user_monthly,
            });
            (UsageStats { global, user }, false)
        })
    }

    /// Current ledger after lazy resets, for reporting.
    pub fn ledger_snapshot(&self) -> UsageLedger {
        self.with_ledger(|ledger, _| (ledger.clone(), false))
    }

    /// Clear every counter.
    pub fn reset_all(&self) {
        let keys = self.keys();
        let guard = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = guard.save(&UsageLedger::new(&keys)) {
            warn!("quota: failed to persist reset ledger: {e}");
        }
    }

    /// Clear one user's counters. Global counters are unchanged.
    pub fn reset_user(&self, user_id: &str) -> bool {
        self.with_ledger(|ledger, _| {
            let removed = ledger.remove_user(user_id);
            (removed, removed)
        })
    }

    /// Per-feature totals from the usage log. Empty without a log.
    pub fn feature_breakdown(&self) -> FeatureBreakdown {
        let Some(log) = &self.usage_log else {
            return FeatureBreakdown::new();
        };
        log.breakdown().unwrap_or_else(|e| {
            warn!("quota: failed to read usage log: {e}");
            FeatureBreakdown::new()
        })
    }

    // -- private helpers ---------------------------------------------------

    fn keys(&self) -> PeriodKeys {
        PeriodKeys {
            today: self.clock.today_key(),
            month: self.clock.month_key(),
        }
    }

    /// Load → roll epochs → `f` → save when `f` or the roll changed anything.
    ///
    /// `f` returns its result and whether it mutated the ledger. Load errors
    /// start from an empty ledger; save errors are logged and dropped.
    fn with_ledger<R>(&self, f: impl FnOnce(&mut UsageLedger, &PeriodKeys) -> (R, bool)) -> R {
        let keys = self.keys();
        let guard = self.store.lock().unwrap_or_else(|e| e.into_inner());

        let mut ledger = match guard.load() {
            Ok(Some(ledger)) => ledger,
            Ok(None) => UsageLedger::new(&keys),
            Err(e) => {
                warn!("quota: failed to load usage ledger, starting empty: {e}");
                UsageLedger::new(&keys)
            }
        };

        let roll = ledger.roll_epochs(&keys);
        if roll.any() {
            debug!(
                daily = roll.daily,
                monthly = roll.monthly,
                today = %keys.today,
                "quota: epoch rolled over, counters reset"
            );
        }

        let (out, dirty) = f(&mut ledger, &keys);

        if dirty || roll.any() {
            if let Err(e) = guard.save(&ledger) {
                warn!("quota: failed to persist usage ledger: {e}");
            }
        }
        out
    }

    /// Apply the four ceilings in precedence order.
    fn evaluate(&self, ledger: &UsageLedger, keys: &PeriodKeys, user_id: Option<&str>) -> Decision {
        let limits = &self.limits;

        if ledger.global_daily_total() >= u64::from(limits.global_daily) {
            return Decision::exceeded(Ceiling::GlobalDaily, limits.global_daily);
        }
        if ledger.global_monthly_total() >= u64::from(limits.global_monthly) {
            return Decision::exceeded(Ceiling::GlobalMonthly, limits.global_monthly);
        }
        if let Some(user) = user_id {
            if ledger.user_count(user, &keys.today) >= u64::from(limits.user_daily) {
                return Decision::exceeded(Ceiling::UserDaily, limits.user_daily);
            }
            if ledger.user_count(user, &keys.month) >= u64::from(limits.user_monthly) {
                return Decision::exceeded(Ceiling::UserMonthly, limits.user_monthly);
            }
        }
        Decision::allow()
    }

    fn append_log(
        &self,
        user_id: Option<&str>,
        feature: Option<&str>,
        tokens_used: Option<u64>,
        cost_usd: Option<f64>,
    ) {
        let Some(log) = &self.usage_log else {
            return;
        };
        let timestamp = DateTime::<Utc>::from_timestamp(self.clock.now_unix() as i64, 0)
            .unwrap_or_else(Utc::now);
        let record = UsageRecord {
            timestamp,
            user_id: user_id.map(str::to_string),
            feature: feature.map(str::to_string),
            tokens_used,
            cost_usd: cost_usd.map(|c| c.max(0.0)),
        };
        if let Err(e) = log.append(&record) {
            warn!(path = %log.path().display(), "quota: failed to append usage log: {e}");
        }
    }
}

impl fmt::Debug for QuotaGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaGovernor")
            .field("limits", &self.limits)
            .field("features", &self.features.len())
            .field("usage_log", &self.usage_log.as_ref().map(UsageLog::path))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
