//! Call quotas: ledger, governor, feature kill-switch, usage log.

pub mod features;
pub mod governor;
pub mod ledger;
pub mod usage_log;

pub use features::FeatureFlags;
pub use governor::{Ceiling, Decision, Denial, QuotaGovernor, Reservation, UsageStats, WindowStats};
pub use ledger::{PeriodKeys, UsageLedger};
pub use usage_log::{FeatureBreakdown, FeatureUsage, UsageLog, UsageRecord};
