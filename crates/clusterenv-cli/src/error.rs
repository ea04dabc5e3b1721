//! Errors reported by the command line, with their exit codes.

use crate::config::ConfigError;
use camino::Utf8PathBuf;
use clusterenv_conda::{CatalogError, EnvironmentError, EnvironmentErrorKind};
use clusterenv_slurm::{SubmissionError, SubmissionErrorKind, ValidationError, ValidationErrorKind};
use miette::Diagnostic;
use std::fmt::Display;
use thiserror::Error;

pub const EXIT_VALIDATION: u8 = 1;
pub const EXIT_ENVIRONMENT: u8 = 2;
pub const EXIT_SUBMISSION: u8 = 3;
pub const EXIT_TOOL_MISSING: u8 = 4;

/// Exit status table shown in `--help`.
pub const EXIT_STATUS_HELP: &str = "\
Exit status:
  0  success
  1  invalid request, unknown environment or unwritable output
  2  environment, configuration or verification failure; every conda failure
     (no conda, install failed, permission denied, not created) exits 2 and
     the error code printed with it names the kind
  3  allocation denied or job rejected by the queue
  4  sbatch or srun not found";

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Environment '{env}' failed verification")]
    VerificationFailed { env: String, output: String },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Write { .. } => EXIT_VALIDATION,
            Self::Catalog(CatalogError::Unknown(_)) => EXIT_VALIDATION,
            Self::Catalog(_) | Self::Config(_) => EXIT_ENVIRONMENT,
            Self::Environment(_) | Self::VerificationFailed { .. } => EXIT_ENVIRONMENT,
            Self::Submission(e) => match e.kind() {
                SubmissionErrorKind::ExternalToolUnavailable => EXIT_TOOL_MISSING,
                SubmissionErrorKind::AllocationDenied | SubmissionErrorKind::QueueRejected => {
                    EXIT_SUBMISSION
                }
            },
        }
    }

    fn code_name(&self) -> &'static str {
        match self {
            Self::Validation(e) => match e.kind() {
                ValidationErrorKind::InvalidResourceCombination => {
                    "clusterenv::validation::invalid_combination"
                }
                ValidationErrorKind::LimitExceeded => "clusterenv::validation::limit_exceeded",
                ValidationErrorKind::Malformed => "clusterenv::validation::malformed",
            },
            Self::Environment(e) => match e.kind() {
                EnvironmentErrorKind::RuntimeManagerMissing => "clusterenv::environment::no_conda",
                EnvironmentErrorKind::PackageInstallFailed => {
                    "clusterenv::environment::install_failed"
                }
                EnvironmentErrorKind::PermissionDenied => {
                    "clusterenv::environment::permission_denied"
                }
                EnvironmentErrorKind::NotCreated => "clusterenv::environment::not_created",
            },
            Self::Submission(e) => match e.kind() {
                SubmissionErrorKind::ExternalToolUnavailable => {
                    "clusterenv::submission::tool_missing"
                }
                SubmissionErrorKind::AllocationDenied => {
                    "clusterenv::submission::allocation_denied"
                }
                SubmissionErrorKind::QueueRejected => "clusterenv::submission::rejected",
            },
            Self::Catalog(_) => "clusterenv::catalog",
            Self::Config(_) => "clusterenv::config",
            Self::VerificationFailed { .. } => "clusterenv::environment::verification_failed",
            Self::Write { .. } => "clusterenv::io",
        }
    }

    fn help_text(&self) -> Option<String> {
        let text = match self {
            Self::Validation(e) => match e.kind() {
                ValidationErrorKind::InvalidResourceCombination => {
                    "GPUs need --partition gpu; use --gpus 0 for CPU-only jobs".to_string()
                }
                ValidationErrorKind::LimitExceeded => {
                    "a request equal to the maximum is allowed; lower the request or raise the limit under \"cluster\" in the configuration"
                        .to_string()
                }
                ValidationErrorKind::Malformed => {
                    "memory looks like 32G or 500M; time like 4:00:00, 1-12:00:00 or 90m"
                        .to_string()
                }
            },
            Self::Environment(e) => match e.kind() {
                EnvironmentErrorKind::RuntimeManagerMissing => {
                    "install conda, set \"conda_root\" in the configuration, or run `clusterenv setup --install-conda`"
                        .to_string()
                }
                EnvironmentErrorKind::PackageInstallFailed => {
                    "the environment was removed; check the package list and channels, then rerun setup"
                        .to_string()
                }
                EnvironmentErrorKind::PermissionDenied => {
                    "the conda installation is not writable by you; set \"conda_root\" to one in your home directory"
                        .to_string()
                }
                EnvironmentErrorKind::NotCreated => return None,
            },
            Self::Submission(e) => match e.kind() {
                SubmissionErrorKind::ExternalToolUnavailable => {
                    "run this on a cluster login node where the SLURM commands are installed"
                        .to_string()
                }
                SubmissionErrorKind::AllocationDenied => {
                    "check partition availability with `sinfo` and your limits with `sacctmgr show qos`"
                        .to_string()
                }
                SubmissionErrorKind::QueueRejected => return None,
            },
            Self::Catalog(CatalogError::Unknown(_)) => {
                "run `clusterenv list` to see the known environments".to_string()
            }
            Self::VerificationFailed { output, .. } => output.clone(),
            _ => return None,
        };
        Some(text)
    }
}

impl Diagnostic for CliError {
    fn code<'a>(&'a self) -> Option<Box<dyn Display + 'a>> {
        Some(Box::new(self.code_name()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn Display + 'a>> {
        self.help_text()
            .map(|text| Box::new(text) as Box<dyn Display + 'a>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let validation: CliError = ValidationError::InvalidResourceCombination {
            reason: "gpus on cpu".into(),
        }
        .into();
        assert_eq!(validation.exit_code(), 1);

        let env: CliError = EnvironmentError::RuntimeManagerMissing {
            reason: "nothing found".into(),
        }
        .into();
        assert_eq!(env.exit_code(), 2);

        let denied: CliError = SubmissionError::AllocationDenied {
            diagnostic: "QOSMaxGRESPerUser".into(),
        }
        .into();
        assert_eq!(denied.exit_code(), 3);

        let rejected: CliError = SubmissionError::QueueRejected {
            diagnostic: "invalid account".into(),
        }
        .into();
        assert_eq!(rejected.exit_code(), 3);

        let missing: CliError = SubmissionError::ExternalToolUnavailable {
            tool: "sbatch".into(),
            detail: "not found".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), 4);

        let unknown: CliError = CatalogError::Unknown("nope".into()).into();
        assert_eq!(unknown.exit_code(), 1);
        let duplicate: CliError = CatalogError::Duplicate("a".into()).into();
        assert_eq!(duplicate.exit_code(), 2);
    }

    #[test]
    fn test_diagnostic_carries_tool_text() {
        let err: CliError = SubmissionError::AllocationDenied {
            diagnostic: "srun: error: Unable to allocate resources: QOSMaxGRESPerUser".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Allocation denied: srun: error: Unable to allocate resources: QOSMaxGRESPerUser"
        );
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("clusterenv::submission::allocation_denied")
        );
        assert!(err.help().is_some());
    }

    #[test]
    fn test_environment_kinds_share_exit_code() {
        let errors: Vec<CliError> = vec![
            EnvironmentError::RuntimeManagerMissing { reason: "x".into() }.into(),
            EnvironmentError::PermissionDenied {
                env: "torchpy310".into(),
                diagnostic: "EACCES".into(),
            }
            .into(),
        ];
        let codes: Vec<String> = errors
            .iter()
            .map(|e| e.code().map(|c| c.to_string()).unwrap_or_default())
            .collect();
        assert!(errors.iter().all(|e| e.exit_code() == EXIT_ENVIRONMENT));
        assert_eq!(
            codes,
            ["clusterenv::environment::no_conda", "clusterenv::environment::permission_denied"]
        );
        assert!(EXIT_STATUS_HELP.contains("2  environment"));
    }

    #[test]
    fn test_limit_help_names_inclusive_maximum() {
        let err: CliError = ValidationError::LimitExceeded {
            resource: "GPU count",
            requested: "9".into(),
            maximum: "8".into(),
        }
        .into();
        let help = err.help().map(|h| h.to_string()).unwrap_or_default();
        assert!(help.starts_with("a request equal to the maximum is allowed"));
    }

    #[test]
    fn test_verification_output_as_help() {
        let err = CliError::VerificationFailed {
            env: "torchpy310".into(),
            output: "ModuleNotFoundError: No module named 'torch'".into(),
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.help().map(|h| h.to_string()).as_deref(),
            Some("ModuleNotFoundError: No module named 'torch'")
        );
    }
}
