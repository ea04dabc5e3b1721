//! Memory size parsing for resource flags.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Parse a memory size to bytes.
///
/// Follows SLURM `--mem` conventions: units are binary and a bare number is
/// megabytes. Accepted forms: "32G", "32GB", "32GiB", "4096M", "512K", "1T",
/// "4096".
///
/// Returns None for empty strings or unparseable values.
pub fn parse_memory_bytes(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let upper = s.to_ascii_uppercase();
    let unit_start = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (digits, unit) = upper.split_at(unit_start);
    let value: u64 = digits.parse().ok()?;

    let multiplier = match unit.trim_end_matches('B').trim_end_matches('I') {
        "" if unit.is_empty() => MIB,
        "K" => KIB,
        "M" => MIB,
        "G" => GIB,
        "T" => TIB,
        _ => return None,
    };

    value.checked_mul(multiplier)
}

/// Format bytes for SLURM `--mem` as whole megabytes, rounded up.
pub fn format_memory_slurm(bytes: u64) -> String {
    if bytes > 0 && bytes % GIB == 0 {
        format!("{}G", bytes / GIB)
    } else {
        format!("{}M", bytes.div_ceil(MIB))
    }
}

/// Format bytes for people (e.g., "32.0 GiB", "512 MiB").
pub fn format_memory_human(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else {
        format!("{} MiB", bytes.div_ceil(MIB))
    }
}
