//! Append-only usage log for feature breakdown reports.
//!
//! One JSON object per line. Not consulted for quota decisions; a broken or
//! missing log never affects the ledger.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Feature label used when a call was recorded without one.
pub const UNSPECIFIED_FEATURE: &str = "unspecified";

/// One recorded external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Totals for one feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureUsage {
    pub calls: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Feature name → totals.
pub type FeatureBreakdown = BTreeMap<String, FeatureUsage>;

/// JSONL file of [`UsageRecord`]s.
#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn append(&self, record: &UsageRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read every record. Malformed lines are skipped with a warning.
    pub fn records(&self) -> Result<Vec<UsageRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(r) => records.push(r),
                Err(e) => warn!(
                    line = idx + 1,
                    path = %self.path.display(),
                    "usage log: skipping malformed record: {e}"
                ),
            }
        }
        Ok(records)
    }

    /// Aggregate calls, tokens and cost per feature.
    pub fn breakdown(&self) -> Result<FeatureBreakdown> {
        Ok(aggregate(&self.records()?))
    }
}

/// Group `records` by feature.
pub fn aggregate(records: &[UsageRecord]) -> FeatureBreakdown {
    let mut out = FeatureBreakdown::new();
    for r in records {
        let name = r.feature.as_deref().unwrap_or(UNSPECIFIED_FEATURE);
        let entry = out.entry(name.to_string()).or_default();
        entry.calls += 1;
        entry.tokens += r.tokens_used.unwrap_or(0);
        entry.cost_usd += r.cost_usd.unwrap_or(0.0).max(0.0);
    }
    out
}
