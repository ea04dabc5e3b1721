//! Wall-clock limit parsing and formatting.

use std::time::Duration;

/// Parse a wall-clock limit.
///
/// Supports:
/// - D-HH:MM:SS, D-HH:MM, D-HH (SLURM time limit with days)
/// - HH:MM:SS
/// - MM:SS
/// - Minutes as a bare integer (SLURM `--time` semantics)
/// - Suffixed values: "90s", "30m", "4h", "2d"
///
/// Returns None for "UNLIMITED", empty strings, or malformed input
/// (including negative values). Zero is returned as `Duration::ZERO` so the
/// caller can reject it with a proper message.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("UNLIMITED") || s.starts_with('-') {
        return None;
    }

    if let Some(secs) = parse_suffixed(s) {
        return Some(Duration::from_secs(secs));
    }

    // Check for day separator (D-HH:MM:SS)
    let (days, time_part) = match s.split_once('-') {
        Some((days, rest)) => (parse_number(days)?, Some(rest)),
        None => (0, None),
    };

    let seconds = match time_part {
        Some(rest) => {
            let parts = parse_fields(rest)?;
            match parts.as_slice() {
                [h] => h * 3600,
                [h, m] => h * 3600 + m * 60,
                [h, m, sec] => h * 3600 + m * 60 + sec,
                _ => return None,
            }
        }
        None => {
            let parts = parse_fields(s)?;
            match parts.as_slice() {
                [m] => m * 60,
                [m, sec] => m * 60 + sec,
                [h, m, sec] => h * 3600 + m * 60 + sec,
                _ => return None,
            }
        }
    };

    days.checked_mul(86400)?
        .checked_add(seconds)
        .map(Duration::from_secs)
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || s.len() > 9 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_fields(s: &str) -> Option<Vec<u64>> {
    s.split(':').map(parse_number).collect()
}

fn parse_suffixed(s: &str) -> Option<u64> {
    let unit = s.chars().last()?;
    let value = &s[..s.len() - unit.len_utf8()];
    let multiplier = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return None,
    };
    parse_number(value)?.checked_mul(multiplier)
}

/// Format seconds as human-readable duration (e.g., "1d 02:30:00", "01:30:00", "05:30").
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours >= 24 {
        let days = hours / 24;
        let hours = hours % 24;
        format!("{}d {:02}:{:02}:{:02}", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

/// Format seconds as SLURM duration format (D-HH:MM:SS).
pub fn format_duration_slurm(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    }
}
