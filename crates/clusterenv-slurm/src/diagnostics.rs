//! Classification of `sbatch`/`srun` diagnostics.

use crate::error::SubmissionError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Messages SLURM prints when resources cannot be granted, as opposed to a
/// malformed or forbidden job.
static ALLOCATION_DENIED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)unable to allocate resources|requested node configuration is not available|QOSMaxGRESPerUser|job violates accounting/qos policy|\(Resources\)|allocation failure",
    )
    .expect("allocation pattern is valid")
});

/// `Submitted batch job 12345`, printed when `--parsable` is not honored.
static SUBMITTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Submitted batch job (\d+)").expect("submitted pattern is valid"));

/// Whether a diagnostic says the cluster could not grant the allocation.
pub fn is_allocation_denied(diagnostic: &str) -> bool {
    ALLOCATION_DENIED.is_match(diagnostic)
}

/// Turn a failed submission's diagnostic into a [`SubmissionError`].
pub fn classify_rejection(diagnostic: &str) -> SubmissionError {
    let diagnostic = diagnostic.trim().to_string();
    if is_allocation_denied(&diagnostic) {
        SubmissionError::AllocationDenied { diagnostic }
    } else {
        SubmissionError::QueueRejected { diagnostic }
    }
}

/// Extract the SLURM job ID from `sbatch` output.
///
/// Handles `--parsable` output (`12345` or `12345;cluster`) and the
/// human-readable form.
pub fn parse_sbatch_output(stdout: &str) -> Option<String> {
    if let Some(caps) = SUBMITTED.captures(stdout) {
        return Some(caps[1].to_string());
    }

    let line = stdout.lines().map(str::trim).rfind(|l| !l.is_empty())?;
    let id = line.split(';').next()?.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        Some(id.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubmissionErrorKind;

    #[test]
    fn test_allocation_denied_messages() {
        for msg in [
            "srun: error: Unable to allocate resources: Requested node configuration is not available",
            "sbatch: error: Batch job submission failed: Requested node configuration is not available",
            "sbatch: error: QOSMaxGRESPerUser",
            "sbatch: error: Batch job submission failed: Job violates accounting/QOS policy (job submit limit, user's size and/or time limits)",
            "srun: job 77 queued and waiting for resources (Resources)",
            "srun: error: allocation failure: Connection refused",
        ] {
            assert!(is_allocation_denied(msg), "{msg}");
            assert_eq!(classify_rejection(msg).kind(), SubmissionErrorKind::AllocationDenied);
        }
    }

    #[test]
    fn test_other_failures_are_queue_rejections() {
        let err = classify_rejection("sbatch: error: invalid partition specified: gpux\n");
        assert_eq!(
            err,
            SubmissionError::QueueRejected {
                diagnostic: "sbatch: error: invalid partition specified: gpux".to_string()
            }
        );
    }

    #[test]
    fn test_parse_sbatch_output() {
        assert_eq!(parse_sbatch_output("12345\n").as_deref(), Some("12345"));
        assert_eq!(parse_sbatch_output("12345;cluster1\n").as_deref(), Some("12345"));
        assert_eq!(
            parse_sbatch_output("Submitted batch job 987\n").as_deref(),
            Some("987")
        );
        assert_eq!(
            parse_sbatch_output("sbatch: note: something\n4242\n").as_deref(),
            Some("4242")
        );
        assert_eq!(parse_sbatch_output(""), None);
        assert_eq!(parse_sbatch_output("not a job id"), None);
    }
}
