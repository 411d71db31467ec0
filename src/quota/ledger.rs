//! Persisted call counters and their lazy calendar resets.
//!
//! The ledger has two independent epochs, day and month. Each is either
//! current or stale; [`UsageLedger::roll_epochs`] moves a stale epoch to
//! current by clearing its counters. Nothing else ever resets a counter
//! except the explicit operator resets.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Calendar keys for "now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodKeys {
    /// `YYYY-MM-DD`
    pub today: String,
    /// `YYYY-MM`
    pub month: String,
}

/// Last day and month the ledger was reset for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastReset {
    pub daily: String,
    pub monthly: String,
}

/// Which epochs a [`UsageLedger::roll_epochs`] call cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochRoll {
    pub daily: bool,
    pub monthly: bool,
}

impl EpochRoll {
    pub fn any(self) -> bool {
        self.daily || self.monthly
    }
}

/// Process-wide usage counters as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageLedger {
    /// Date key → global call count.
    pub daily_usage: BTreeMap<String, u64>,
    /// Month key → global call count.
    pub monthly_usage: BTreeMap<String, u64>,
    /// User id → (date or month key → call count).
    pub user_usage: BTreeMap<String, BTreeMap<String, u64>>,
    pub last_reset: LastReset,
}

impl UsageLedger {
    /// Empty ledger whose epochs are already current for `keys`.
    pub fn new(keys: &PeriodKeys) -> Self {
        Self {
            last_reset: LastReset {
                daily: keys.today.clone(),
                monthly: keys.month.clone(),
            },
            ..Default::default()
        }
    }

    /// Clear whichever epochs are stale relative to `keys`.
    ///
    /// A day rollover empties `daily_usage` and drops per-user day keys; the
    /// per-user month keys survive. A month rollover empties `monthly_usage`
    /// and drops per-user month keys. Idempotent once applied.
    pub fn roll_epochs(&mut self, keys: &PeriodKeys) -> EpochRoll {
        let mut roll = EpochRoll::default();

        if self.last_reset.daily != keys.today {
            self.daily_usage.clear();
            self.retain_user_keys(|k| !is_day_key(k));
            self.last_reset.daily = keys.today.clone();
            roll.daily = true;
        }

        if self.last_reset.monthly != keys.month {
            self.monthly_usage.clear();
            self.retain_user_keys(|k| !is_month_key(k));
            self.last_reset.monthly = keys.month.clone();
            roll.monthly = true;
        }

        roll
    }

    /// Global calls in the current day epoch.
    pub fn global_daily_total(&self) -> u64 {
        self.daily_usage.values().sum()
    }

    /// Global calls in the current month epoch.
    pub fn global_monthly_total(&self) -> u64 {
        self.monthly_usage.values().sum()
    }

    /// Count stored for `user` under `key`, 0 when absent.
    pub fn user_count(&self, user: &str, key: &str) -> u64 {
        self.user_usage
            .get(user)
            .and_then(|m| m.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Count one call against the global and (optionally) per-user counters.
    pub fn record(&mut self, keys: &PeriodKeys, user: Option<&str>) {
        *self.daily_usage.entry(keys.today.clone()).or_insert(0) += 1;
        *self.monthly_usage.entry(keys.month.clone()).or_insert(0) += 1;

        if let Some(user) = user {
            let counts = self.user_usage.entry(user.to_string()).or_default();
            *counts.entry(keys.today.clone()).or_insert(0) += 1;
            *counts.entry(keys.month.clone()).or_insert(0) += 1;
        }
    }

    /// Undo one [`record`](Self::record) made under `keys`.
    ///
    /// Counters whose epoch has since rolled over are gone already and are
    /// left alone. Zeroed entries are removed.
    pub fn unrecord(&mut self, keys: &PeriodKeys, user: Option<&str>) {
        decrement(&mut self.daily_usage, &keys.today);
        decrement(&mut self.monthly_usage, &keys.month);

        if let Some(user) = user {
            if let Some(counts) = self.user_usage.get_mut(user) {
                decrement(counts, &keys.today);
                decrement(counts, &keys.month);
                if counts.is_empty() {
                    self.user_usage.remove(user);
                }
            }
        }
    }

    /// Drop every counter for `user`. Returns whether anything was removed.
    pub fn remove_user(&mut self, user: &str) -> bool {
        self.user_usage.remove(user).is_some()
    }

    fn retain_user_keys(&mut self, keep: impl Fn(&str) -> bool) {
        for counts in self.user_usage.values_mut() {
            counts.retain(|k, _| keep(k));
        }
        self.user_usage.retain(|_, counts| !counts.is_empty());
    }
}

fn decrement(counts: &mut BTreeMap<String, u64>, key: &str) {
    if let Some(n) = counts.get_mut(key) {
        *n = n.saturating_sub(1);
        if *n == 0 {
            counts.remove(key);
        }
    }
}

/// `YYYY-MM-DD`
fn is_day_key(key: &str) -> bool {
    key.len() == 10 && NaiveDate::parse_from_str(key, "%Y-%m-%d").is_ok()
}

/// `YYYY-MM`
fn is_month_key(key: &str) -> bool {
    key.len() == 7 && NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(today: &str) -> PeriodKeys {
        PeriodKeys {
            today: today.to_string(),
            month: today[..7].to_string(),
        }
    }

    #[test]
    fn test_key_shapes() {
        assert!(is_day_key("2026-03-09"));
        assert!(!is_day_key("2026-03"));
        assert!(!is_day_key("2026-13-01"));
        assert!(is_month_key("2026-03"));
        assert!(!is_month_key("2026-03-09"));
        assert!(!is_month_key("2026-00"));
    }

    #[test]
    fn test_record_counts_match_calls() {
        let k = keys("2026-03-09");
        let mut ledger = UsageLedger::new(&k);
        for _ in 0..7 {
            ledger.record(&k, None);
        }
        assert_eq!(ledger.daily_usage["2026-03-09"], 7);
        assert_eq!(ledger.global_monthly_total(), 7);
        assert!(ledger.user_usage.is_empty());
    }

    #[test]
    fn test_record_with_user_creates_both_keys() {
        let k = keys("2026-03-09");
        let mut ledger = UsageLedger::new(&k);
        ledger.record(&k, Some("alice"));
        assert_eq!(ledger.user_count("alice", "2026-03-09"), 1);
        assert_eq!(ledger.user_count("alice", "2026-03"), 1);
        assert_eq!(ledger.user_count("bob", "2026-03"), 0);
    }

    #[test]
    fn test_unrecord_restores_previous_counts() {
        let k = keys("2026-03-09");
        let mut ledger = UsageLedger::new(&k);
        ledger.record(&k, Some("alice"));
        let before = ledger.clone();

        ledger.record(&k, Some("alice"));
        ledger.unrecord(&k, Some("alice"));
        assert_eq!(ledger, before);

        ledger.unrecord(&k, Some("alice"));
        assert_eq!(ledger.global_daily_total(), 0);
        assert!(ledger.user_usage.is_empty());
    }

    #[test]
    fn test_unrecord_after_rollover_leaves_new_epoch_alone() {
        let old = keys("2026-03-09");
        let new = keys("2026-03-10");
        let mut ledger = UsageLedger::new(&old);
        ledger.record(&old, Some("alice"));
        ledger.roll_epochs(&new);
        ledger.record(&new, Some("alice"));

        ledger.unrecord(&old, Some("alice"));
        assert_eq!(ledger.daily_usage["2026-03-10"], 1);
        assert_eq!(ledger.user_count("alice", "2026-03-10"), 1);
        // Same month: the reservation's month count is handed back.
        assert_eq!(ledger.global_monthly_total(), 1);
    }

    #[test]
    fn test_same_day_roll_is_noop() {
        let k = keys("2026-03-09");
        let mut ledger = UsageLedger::new(&k);
        ledger.record(&k, Some("alice"));
        let before = ledger.clone();
        assert!(!ledger.roll_epochs(&k).any());
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_day_roll_keeps_monthly() {
        let k1 = keys("2026-03-09");
        let mut ledger = UsageLedger::new(&k1);
        ledger.record(&k1, Some("alice"));
        ledger.record(&k1, Some("alice"));

        let k2 = keys("2026-03-10");
        let roll = ledger.roll_epochs(&k2);
        assert_eq!(
            roll,
            EpochRoll {
                daily: true,
                monthly: false
            }
        );
        assert!(ledger.daily_usage.is_empty());
        assert_eq!(ledger.global_monthly_total(), 2);
        assert_eq!(ledger.user_count("alice", "2026-03-09"), 0);
        assert_eq!(ledger.user_count("alice", "2026-03"), 2);
        assert_eq!(ledger.last_reset.daily, "2026-03-10");
    }

    #[test]
    fn test_month_roll_clears_both_on_first_of_month() {
        let k1 = keys("2026-03-31");
        let mut ledger = UsageLedger::new(&k1);
        ledger.record(&k1, Some("alice"));

        let k2 = keys("2026-04-01");
        let roll = ledger.roll_epochs(&k2);
        assert!(roll.daily && roll.monthly);
        assert_eq!(ledger.global_daily_total(), 0);
        assert_eq!(ledger.global_monthly_total(), 0);
        assert!(ledger.user_usage.is_empty(), "emptied user maps are pruned");
    }

    #[test]
    fn test_month_roll_only_leaves_daily() {
        let k = keys("2026-04-01");
        let mut ledger = UsageLedger::new(&k);
        ledger.record(&k, None);
        ledger.last_reset.monthly = "2026-03".into();

        let roll = ledger.roll_epochs(&k);
        assert!(!roll.daily && roll.monthly);
        assert_eq!(ledger.global_daily_total(), 1);
        assert_eq!(ledger.global_monthly_total(), 0);
    }

    #[test]
    fn test_legacy_document_without_last_reset_loads() {
        let json = r#"{"daily_usage": {"2026-03-09": 3}}"#;
        let mut ledger: UsageLedger = serde_json::from_str(json).unwrap();
        assert_eq!(ledger.global_daily_total(), 3);
        // Empty last_reset counts as stale.
        assert!(ledger.roll_epochs(&keys("2026-03-09")).daily);
    }

    #[test]
    fn test_remove_user() {
        let k = keys("2026-03-09");
        let mut ledger = UsageLedger::new(&k);
        ledger.record(&k, Some("alice"));
        assert!(ledger.remove_user("alice"));
        assert!(!ledger.remove_user("alice"));
        assert_eq!(ledger.global_daily_total(), 1);
    }
}
