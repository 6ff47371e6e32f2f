use chrono::{DateTime, Utc};

/// Returns "[████████░░░░]" where █ = remaining portion, ░ = used portion.
pub fn format_usage_bar(used_percent: f64, width: usize) -> String {
    let used_percent = used_percent.clamp(0.0, 100.0);
    let used_blocks = ((used_percent / 100.0) * width as f64).round() as usize;
    let remaining_blocks = width.saturating_sub(used_blocks);

    format!("[{}{}]", "█".repeat(remaining_blocks), "░".repeat(used_blocks))
}

/// "450ms" below one second, "1.2s" above.
pub fn format_latency(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

/// Compact count: 950, 14.4K, 1.2M.
pub fn format_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        format!("{}", count)
    }
}

/// "just now", "42s ago", "5m ago", "3h ago" relative to `now`.
pub fn format_age(at: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let secs = (*now - *at).num_seconds();
    if secs < 5 {
        "just now".to_string()
    } else if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_usage_bar_width() {
        assert_eq!(format_usage_bar(0.0, 12), "[████████████]");
        assert_eq!(format_usage_bar(100.0, 12), "[░░░░░░░░░░░░]");
        assert_eq!(format_usage_bar(50.0, 12), "[██████░░░░░░]");
        assert_eq!(format_usage_bar(150.0, 4), "[░░░░]");
    }

    #[test]
    fn format_latency_switches_to_seconds() {
        assert_eq!(format_latency(0), "0ms");
        assert_eq!(format_latency(999), "999ms");
        assert_eq!(format_latency(1234), "1.2s");
        assert_eq!(format_latency(5000), "5.0s");
    }

    #[test]
    fn format_count_scales() {
        assert_eq!(format_count(950), "950");
        assert_eq!(format_count(14_400), "14.4K");
        assert_eq!(format_count(1_250_000), "1.2M");
    }

    #[test]
    fn format_age_buckets() {
        let now = Utc::now();
        assert_eq!(format_age(&now, &now), "just now");
        assert_eq!(format_age(&(now - Duration::seconds(42)), &now), "42s ago");
        assert_eq!(format_age(&(now - Duration::minutes(5)), &now), "5m ago");
        assert_eq!(format_age(&(now - Duration::hours(3)), &now), "3h ago");
    }
}
