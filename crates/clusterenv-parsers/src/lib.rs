//! Shared utilities for driving conda and scheduler commands.
//!
//! This crate provides the external-process abstraction used by
//! clusterenv-conda and clusterenv-slurm, plus the memory and duration
//! parsers behind the resource flags.

pub mod command;
pub mod memory;
pub mod shell;
pub mod time;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{
    CommandError, CommandOutput, CommandRunner, Invocation, SessionExit, SystemRunner,
    run_command,
};
pub use memory::{GIB, MIB, format_memory_human, format_memory_slurm, parse_memory_bytes};
pub use shell::{join as shell_join, quote};
pub use time::{format_duration, format_duration_slurm, parse_duration};

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "N/A" || trimmed == "(null)" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_string() {
        assert_eq!(non_empty_string("gpu"), Some("gpu".to_string()));
        assert_eq!(non_empty_string("  node01  "), Some("node01".to_string()));
        assert_eq!(non_empty_string(""), None);
        assert_eq!(non_empty_string("-"), None);
        assert_eq!(non_empty_string("N/A"), None);
        assert_eq!(non_empty_string("(null)"), None);
    }
}
