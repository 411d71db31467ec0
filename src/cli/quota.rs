//! Quota status, check, reset, features and report command handlers.

use anyhow::Result;

use usage_governor::quota::{QuotaGovernor, UsageStats, WindowStats};
use usage_governor::GovernorConfig;

/// Handle `usage-governor status`.
pub(crate) fn cmd_status(config: &GovernorConfig, user: Option<&str>, json: bool) -> Result<i32> {
    let governor = QuotaGovernor::from_config(config)?;
    let stats = governor.usage_stats(user);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", render_stats(&stats, user));
    }
    Ok(0)
}

/// Handle `usage-governor check`. Exit code 1 when the call would be denied.
pub(crate) fn cmd_check(
    config: &GovernorConfig,
    user: Option<&str>,
    feature: Option<&str>,
) -> Result<i32> {
    let governor = QuotaGovernor::from_config(config)?;
    let decision = match feature {
        Some(name) => governor.check_feature(name, user),
        None => governor.can_call(user),
    };

    if decision.allowed {
        println!("allowed: {}", decision.reason);
        Ok(0)
    } else {
        println!("denied: {}", decision.reason);
        Ok(1)
    }
}

/// Handle `usage-governor reset`.
pub(crate) fn cmd_reset(config: &GovernorConfig, user: Option<&str>) -> Result<i32> {
    let governor = QuotaGovernor::from_config(config)?;
    match user {
        Some(name) => {
            let name = name.trim();
            if governor.reset_user(name) {
                println!("Reset usage for: {name}");
            } else {
                println!("No usage recorded for: {name}");
            }
        }
        None => {
            governor.reset_all();
            println!("Reset all usage.");
        }
    }
    Ok(0)
}

/// Handle `usage-governor features`.
pub(crate) fn cmd_features(config: &GovernorConfig) -> Result<i32> {
    if config.features.is_empty() {
        println!("No features configured (all disabled).");
        return Ok(0);
    }
    println!("{:<24} {:<8}", "Feature", "Enabled");
    println!("{}", "-".repeat(33));
    for (name, enabled) in config.features.iter() {
        println!("{:<24} {:<8}", name, if enabled { "yes" } else { "no" });
    }
    Ok(0)
}

/// Handle `usage-governor report`.
pub(crate) fn cmd_report(config: &GovernorConfig) -> Result<i32> {
    let governor = QuotaGovernor::from_config(config)?;
    let breakdown = governor.feature_breakdown();

    if breakdown.is_empty() {
        println!("No usage recorded.");
        return Ok(0);
    }

    println!(
        "{:<24} {:<10} {:<14} {:<12}",
        "Feature", "Calls", "Tokens", "Cost"
    );
    println!("{}", "-".repeat(62));
    for (name, usage) in &breakdown {
        println!(
            "{:<24} {:<10} {:<14} {:<12}",
            name,
            usage.calls,
            usage.tokens,
            format!("${:.4}", usage.cost_usd),
        );
    }
    Ok(0)
}

fn render_stats(stats: &UsageStats, user: Option<&str>) -> String {
    let mut out = format!(
        "{:<16} {:<18} {:<18}\n{}\n",
        "Scope",
        "Today",
        "This month",
        "-".repeat(52)
    );
    out.push_str(&render_row("global", &stats.global));
    if let (Some(name), Some(window)) = (user, &stats.user) {
        out.push_str(&render_row(name, window));
    }
    out
}

fn render_row(scope: &str, w: &WindowStats) -> String {
    format!(
        "{:<16} {:<18} {:<18}\n",
        scope,
        format!("{}/{}", w.daily_used, w.daily_limit),
        format!("{}/{}", w.monthly_used, w.monthly_limit),
    )
}
