//! # usage-governor
//!
//! Usage governance for apps built on a hosted language-model API:
//! quota ceilings per day and month (global and per user), a feature
//! kill-switch, and a response cache keyed by a content fingerprint.
//!
//! The typical request path is [`gate::Gate::call`]: cache lookup, feature
//! check, quota reservation, the caller's model call, then cache write and
//! usage record. A failed model call hands its reserved slot back.
//! The pieces are also usable on their own through
//! [`quota::QuotaGovernor`] and [`cache::ResponseCache`].
//!
//! Persistence is best-effort. Storage failures are logged through `tracing`
//! and never reach the caller; only misconfiguration is an error.

/// Response cache and fingerprints
pub mod cache;

/// Time source
pub mod clock;

/// Configuration loading and validation
pub mod config;

/// Crate error type
pub mod error;

/// Cache-then-quota request gate
pub mod gate;

/// Quota governor, ledger, feature flags, usage log
pub mod quota;

/// Storage port and JSON file backend
pub mod storage;

pub use cache::ResponseCache;
pub use config::GovernorConfig;
pub use error::{GovernorError, Result};
pub use gate::{CallOutput, Gate, GateOutcome};
pub use quota::{Decision, QuotaGovernor};
