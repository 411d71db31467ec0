//! Static feature kill-switch.
//!
//! A name → enabled table. Names missing from the table are disabled. The
//! table comes from config; there is no per-user override.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Feature name → enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags {
    flags: BTreeMap<String, bool>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        [
            ("greeting", true),
            ("encouragement", true),
            ("productivity_tip", true),
            ("weekly_summary", true),
            ("news_summary", true),
            ("qa_suggestions", true),
            // Costly analyses stay off until the beta budget allows them.
            ("mood_analysis", false),
            ("focus_optimization", false),
            ("stress_management", false),
        ]
        .into_iter()
        .collect()
    }
}

impl FeatureFlags {
    /// Table with no features at all (everything disabled).
    pub fn empty() -> Self {
        Self {
            flags: BTreeMap::new(),
        }
    }

    /// Whether `feature` is switched on. Unknown names are off.
    pub fn is_enabled(&self, feature: &str) -> bool {
        self.flags.get(feature).copied().unwrap_or(false)
    }

    /// Set or add a feature.
    pub fn set(&mut self, feature: impl Into<String>, enabled: bool) {
        self.flags.insert(feature.into(), enabled);
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for FeatureFlags {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
