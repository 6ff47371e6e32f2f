use chrono::{DateTime, Utc};
use colored::{control, ColoredString, Colorize};

use crate::core::formatter::{format_age, format_count, format_latency, format_usage_bar};
use crate::core::models::status::{ProbeOutcome, ProviderStatus};
use crate::core::models::usage::QuotaUsage;
use crate::core::providers::{CostTier, Provider};
use crate::core::recommend::Candidate;
use crate::core::watchdog::{ProviderView, StatusReport};

const BAR_WIDTH: usize = 12;

/// Render one provider block.
///
/// Layout:
/// ```text
///  Groq (Llama 3.3 70B) [FREE]
///   Status    online 312ms
///   Quota     95 req, 2.4K tok  5% remaining [█░░░░░░░░░░░]
///   Limits    14400/day
///   Checked   just now
/// ```
pub fn render_provider(view: &ProviderView, now: &DateTime<Utc>, use_color: bool) -> String {
    control::set_override(use_color);

    let p = &view.provider;
    let mut lines = vec![header(p)];

    match &view.status {
        Some(status) => {
            lines.push(format!("  {}    {}", "Status".cyan(), status_line(status)));
        }
        None => lines.push(format!("  {}    {}", "Status".cyan(), "unknown".dimmed())),
    }

    lines.push(format!(
        "  {}     {}",
        "Quota".cyan(),
        quota_line(&view.quota, view.usage_percent)
    ));
    lines.push(format!("  {}    {}", "Limits".cyan(), view.limits));

    if let Some(status) = &view.status {
        lines.push(format!(
            "  {}   {}",
            "Checked".cyan(),
            format_age(&status.checked_at, now).dimmed()
        ));
    }

    lines.join("\n")
}

fn header(p: &Provider) -> String {
    let tier = match p.tier {
        CostTier::Local => p.tier.to_string().blue(),
        CostTier::Free => p.tier.to_string().green(),
        CostTier::Paid => p.tier.to_string().yellow(),
    };
    format!(" {} [{}]", p.name.bold(), tier)
}

/// "online 312ms" or "timeout  Request timed out (5s)".
pub fn status_line(status: &ProviderStatus) -> String {
    let label = status.outcome.label();
    let colored_label: ColoredString = match &status.outcome {
        ProbeOutcome::Online { .. } => label.green(),
        ProbeOutcome::Error { .. } => label.red(),
        ProbeOutcome::Timeout { .. } | ProbeOutcome::Offline { .. } => label.yellow(),
        ProbeOutcome::NoKey { .. } => label.dimmed(),
    };
    match status.outcome.error_detail() {
        None => format!("{} {}", colored_label, format_latency(status.latency_ms)),
        Some(detail) => format!("{}  {}", colored_label, detail.dimmed()),
    }
}

fn quota_line(quota: &QuotaUsage, used_percent: Option<f64>) -> String {
    let counts = format!(
        "{} req, {} tok",
        format_count(quota.requests_used),
        format_count(quota.tokens_used)
    );
    match used_percent {
        Some(used) => {
            let remaining = format!("{:.0}% remaining", 100.0 - used);
            format!(
                "{}  {} {}",
                counts,
                color_by_remaining(used, &remaining),
                format_usage_bar(used, BAR_WIDTH).magenta()
            )
        }
        None => counts,
    }
}

/// Color the text green/yellow/red based on remaining percentage.
fn color_by_remaining(used_percent: f64, text: &str) -> ColoredString {
    let remaining = 100.0 - used_percent;
    if remaining >= 25.0 {
        text.green()
    } else if remaining >= 10.0 {
        text.yellow()
    } else {
        text.red()
    }
}

/// Ranked list of online providers, best first.
pub fn render_recommendations(candidates: &[Candidate], use_color: bool) -> String {
    control::set_override(use_color);

    if candidates.is_empty() {
        return format!(" {}\n  {}", "Recommendation".bold(), "No provider online".red());
    }

    let mut lines = vec![format!(" {}", "Recommendation".bold())];
    for (i, c) in candidates.iter().enumerate() {
        let rank = format!("{}.", i + 1);
        let name = if i == 0 { c.name.green().bold() } else { c.name.normal() };
        lines.push(format!(
            "  {:<3} {}  {} capacity, {}",
            rank,
            name,
            c.capacity,
            format_latency(c.latency_ms)
        ));
    }
    lines.join("\n")
}

/// Short single-line summary used by `best`.
pub fn render_best(best: &Candidate, use_color: bool) -> String {
    control::set_override(use_color);
    format!(
        "{} ({}) [{}] {} capacity, {}",
        best.name.bold(),
        best.id,
        best.tier,
        best.capacity,
        format_latency(best.latency_ms)
    )
}

/// Full report: every provider followed by the ranking.
pub fn render_report(report: &StatusReport, now: &DateTime<Utc>, use_color: bool) -> String {
    let mut sections: Vec<String> = report
        .providers
        .iter()
        .map(|v| render_provider(v, now, use_color))
        .collect();
    sections.push(render_recommendations(&report.recommendations, use_color));
    sections.join("\n\n")
}

/// Persisted counters without status, used by `quota`.
pub fn render_quota(provider: &Provider, quota: &QuotaUsage, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines = vec![header(provider)];
    let used = quota.used_percent(provider.rate_limit.requests_per_day);
    lines.push(format!("  {}     {}", "Quota".cyan(), quota_line(quota, used)));
    lines.push(format!("  {}    {}", "Limits".cyan(), provider.describe_limits()));
    if let Some(reset) = &quota.reset_at {
        lines.push(format!("  {}     {}", "Reset".cyan(), reset));
    }
    lines.join("\n")
}
