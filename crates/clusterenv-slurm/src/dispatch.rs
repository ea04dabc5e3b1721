//! Hand job descriptors to SLURM.
//!
//! Batch jobs go through `sbatch --parsable` and return as soon as the queue
//! accepts them. Interactive jobs run `srun --pty` attached to the caller's
//! terminal and return when the session ends.

use crate::descriptor::JobDescriptor;
use crate::diagnostics::{classify_rejection, is_allocation_denied, parse_sbatch_output};
use crate::error::SubmissionError;
use crate::types::{SubmissionMode, SubmissionResult, SubmissionState};
use camino::{Utf8Path, Utf8PathBuf};
use clusterenv_parsers::{CommandError, CommandRunner, Invocation};
use std::io::Write;
use tempfile::NamedTempFile;

/// Paths of the scheduler executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmTools {
    pub sbatch: String,
    pub srun: String,
}

impl Default for SlurmTools {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            srun: "srun".to_string(),
        }
    }
}

/// Submits descriptors through a [`CommandRunner`].
#[derive(Debug)]
pub struct Dispatcher<R> {
    runner: R,
    tools: SlurmTools,
}

impl<R: CommandRunner> Dispatcher<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            tools: SlurmTools::default(),
        }
    }

    pub fn with_tools(mut self, tools: SlurmTools) -> Self {
        self.tools = tools;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub async fn submit(
        &self,
        desc: &JobDescriptor,
        mode: SubmissionMode,
    ) -> Result<SubmissionResult, SubmissionError> {
        tracing::debug!(
            job_id = %desc.job_id,
            state = %SubmissionState::Dispatching,
            "submitting {} job",
            mode
        );

        let result = match mode {
            SubmissionMode::Batch => self.submit_batch(desc).await,
            SubmissionMode::Interactive => self.run_interactive(desc).await,
        };

        match &result {
            Ok(res) => tracing::info!(
                job_id = %desc.job_id,
                state = %SubmissionState::Completed,
                "{} submission finished (slurm id: {})",
                mode,
                res.external_job_id.as_deref().unwrap_or("-")
            ),
            Err(e) => {
                tracing::warn!(job_id = %desc.job_id, state = %SubmissionState::Failed, "{}", e)
            }
        }
        result
    }

    async fn submit_batch(
        &self,
        desc: &JobDescriptor,
    ) -> Result<SubmissionResult, SubmissionError> {
        if desc.command.is_empty() {
            return Err(SubmissionError::QueueRejected {
                diagnostic: "batch jobs need a command to run".to_string(),
            });
        }

        // sbatch copies the script at submission, so it can go once we return.
        let script = write_job_file(
            desc.log_dir(),
            &desc.job_id,
            ".sbatch",
            &desc.render_batch_script(),
        )?;
        let script_path = script.path().to_string_lossy().into_owned();

        let invocation =
            Invocation::new(&self.tools.sbatch).args(["--parsable", script_path.as_str()]);
        let output = self
            .runner
            .output(&invocation)
            .await
            .map_err(|e| unavailable(&self.tools.sbatch, e))?;

        if !output.success() {
            return Err(classify_rejection(&output.diagnostic()));
        }

        let external_job_id = parse_sbatch_output(&output.stdout);
        if external_job_id.is_none() {
            tracing::warn!(
                "sbatch accepted the job but printed no job ID: {}",
                output.stdout.trim()
            );
        }

        Ok(SubmissionResult {
            mode: SubmissionMode::Batch,
            job_id: desc.job_id.clone(),
            external_job_id,
            exit_status: output.status,
            diagnostic: output.stderr.trim().to_string(),
        })
    }

    async fn run_interactive(
        &self,
        desc: &JobDescriptor,
    ) -> Result<SubmissionResult, SubmissionError> {
        // Must outlive the session: bash reads it when the shell starts.
        let rcfile =
            write_job_file(desc.log_dir(), &desc.job_id, ".rc", &desc.render_session_rc())?;
        let rc_path = Utf8PathBuf::from(rcfile.path().to_string_lossy().into_owned());

        let invocation = Invocation::new(&self.tools.srun).args(desc.srun_args(&rc_path));
        let exit = self
            .runner
            .attached(&invocation)
            .await
            .map_err(|e| unavailable(&self.tools.srun, e))?;

        if exit.status != Some(0) && is_allocation_denied(&exit.diagnostic) {
            return Err(SubmissionError::AllocationDenied {
                diagnostic: exit.diagnostic,
            });
        }

        Ok(SubmissionResult {
            mode: SubmissionMode::Interactive,
            job_id: desc.job_id.clone(),
            external_job_id: None,
            exit_status: exit.status,
            diagnostic: exit.diagnostic,
        })
    }
}

fn unavailable(tool: &str, error: CommandError) -> SubmissionError {
    let detail = match &error {
        CommandError::NotFound { .. } => {
            "not found on PATH; is this a SLURM login node?".to_string()
        }
        other => other.to_string(),
    };
    SubmissionError::ExternalToolUnavailable {
        tool: tool.to_string(),
        detail,
    }
}

fn write_job_file(
    dir: &Utf8Path,
    job_id: &str,
    suffix: &str,
    contents: &str,
) -> Result<NamedTempFile, SubmissionError> {
    let rejected = |e: std::io::Error| SubmissionError::QueueRejected {
        diagnostic: format!("cannot write job file in {dir}: {e}"),
    };

    std::fs::create_dir_all(dir).map_err(rejected)?;
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{job_id}."))
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(rejected)?;
    file.write_all(contents.as_bytes()).map_err(rejected)?;
    file.flush().map_err(rejected)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use crate::error::SubmissionErrorKind;
    use crate::limits::ClusterLimits;
    use crate::types::{Partition, ResourceRequest};
    use clusterenv_conda::{CondaInstallation, ResolvedEnvironment};
    use clusterenv_parsers::SystemRunner;
    use clusterenv_parsers::testing::ScriptedRunner;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn descriptor(log_dir: &Utf8Path, command: &[&str]) -> JobDescriptor {
        let env = ResolvedEnvironment {
            name: "torchpy310".to_string(),
            conda: CondaInstallation::new("/opt/miniconda3"),
            prefix: "/opt/miniconda3/envs/torchpy310".into(),
            created: false,
        };
        let req = ResourceRequest::new(
            Partition::Gpu,
            1,
            32_000_000_000,
            4,
            Duration::from_secs(4 * 3600),
            command.iter().map(|s| s.to_string()).collect(),
        );
        DescriptorBuilder::new(ClusterLimits {
            log_dir: log_dir.to_owned(),
            ..Default::default()
        })
        .build(&req, &env)
        .unwrap()
    }

    fn utf8(temp: &TempDir) -> Utf8PathBuf {
        Utf8Path::from_path(temp.path()).unwrap().to_owned()
    }

    fn fake_tool(dir: &Utf8Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string()
    }

    #[tokio::test]
    async fn test_batch_submission() {
        let temp = TempDir::new().unwrap();
        let desc = descriptor(&utf8(&temp).join("logs"), &["python", "train.py"]);

        let runner = ScriptedRunner::new().on("sbatch --parsable", 0, "4242\n", "");
        let result = Dispatcher::new(runner).submit(&desc, SubmissionMode::Batch).await.unwrap();

        assert_eq!(result.mode, SubmissionMode::Batch);
        assert_eq!(result.external_job_id.as_deref(), Some("4242"));
        assert_eq!(result.job_id, desc.job_id);
        assert_eq!(result.exit_status, Some(0));
    }

    #[tokio::test]
    async fn test_batch_script_is_transient() {
        let temp = TempDir::new().unwrap();
        let logs = utf8(&temp).join("logs");
        let desc = descriptor(&logs, &["python", "train.py"]);

        let runner = ScriptedRunner::new().on("sbatch", 0, "17", "");
        let dispatcher = Dispatcher::new(runner);
        dispatcher.submit(&desc, SubmissionMode::Batch).await.unwrap();

        let call = &dispatcher.runner().invocations()[0];
        let script = Utf8Path::new(&call.get_args()[1]);
        assert_eq!(script.parent(), Some(logs.as_path()));
        assert!(!script.exists());
    }

    #[tokio::test]
    async fn test_batch_rejections_are_classified() {
        let temp = TempDir::new().unwrap();
        let desc = descriptor(&utf8(&temp), &["train.py"]);

        let runner = ScriptedRunner::new().on(
            "sbatch",
            1,
            "",
            "sbatch: error: Batch job submission failed: Requested node configuration is not available",
        );
        let err = Dispatcher::new(runner).submit(&desc, SubmissionMode::Batch).await.unwrap_err();
        assert_eq!(err.kind(), SubmissionErrorKind::AllocationDenied);

        let runner = ScriptedRunner::new().on("sbatch", 1, "", "sbatch: error: invalid account");
        let err = Dispatcher::new(runner).submit(&desc, SubmissionMode::Batch).await.unwrap_err();
        assert_eq!(
            err,
            SubmissionError::QueueRejected {
                diagnostic: "sbatch: error: invalid account".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_batch_without_command_never_calls_sbatch() {
        let temp = TempDir::new().unwrap();
        let desc = descriptor(&utf8(&temp), &[]);

        let runner = ScriptedRunner::new().on("sbatch", 0, "1", "");
        let dispatcher = Dispatcher::new(runner);
        let err = dispatcher.submit(&desc, SubmissionMode::Batch).await.unwrap_err();

        assert_eq!(err.kind(), SubmissionErrorKind::QueueRejected);
        assert!(dispatcher.runner().calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tools() {
        let temp = TempDir::new().unwrap();
        let desc = descriptor(&utf8(&temp), &["train.py"]);
        let dispatcher = Dispatcher::new(ScriptedRunner::new());

        let err = dispatcher.submit(&desc, SubmissionMode::Batch).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::ExternalToolUnavailable { ref tool, .. } if tool == "sbatch"
        ));

        let err = dispatcher.submit(&desc, SubmissionMode::Interactive).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::ExternalToolUnavailable { ref tool, .. } if tool == "srun"
        ));
    }

    #[tokio::test]
    async fn test_interactive_session() {
        let temp = TempDir::new().unwrap();
        let desc = descriptor(&utf8(&temp), &[]);

        let runner = ScriptedRunner::new().on("srun", 0, "", "");
        let dispatcher = Dispatcher::new(runner);
        let result = dispatcher.submit(&desc, SubmissionMode::Interactive).await.unwrap();

        assert_eq!(result.mode, SubmissionMode::Interactive);
        assert_eq!(result.exit_status, Some(0));
        assert!(result.external_job_id.is_none());

        let args = dispatcher.runner().invocations()[0].get_args().to_vec();
        assert!(args.contains(&"--gres=gpu:1".to_string()));
        assert!(args.contains(&"--mem=30518M".to_string()));
        assert!(args.contains(&"--pty".to_string()));
    }

    #[tokio::test]
    async fn test_interactive_nonzero_exit_still_completes() {
        let temp = TempDir::new().unwrap();
        let desc = descriptor(&utf8(&temp), &[]);

        let runner = ScriptedRunner::new().on("srun", 130, "", "");
        let result = Dispatcher::new(runner)
            .submit(&desc, SubmissionMode::Interactive)
            .await
            .unwrap();
        assert_eq!(result.exit_status, Some(130));
    }

    #[tokio::test]
    async fn test_interactive_allocation_denied() {
        let temp = TempDir::new().unwrap();
        let desc = descriptor(&utf8(&temp), &[]);

        let runner = ScriptedRunner::new().on(
            "srun",
            1,
            "",
            "srun: error: Unable to allocate resources: QOSMaxGRESPerUser",
        );
        let err = Dispatcher::new(runner)
            .submit(&desc, SubmissionMode::Interactive)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SubmissionError::AllocationDenied {
                diagnostic: "srun: error: Unable to allocate resources: QOSMaxGRESPerUser"
                    .to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_real_sbatch_returns_without_waiting_for_job() {
        let temp = TempDir::new().unwrap();
        let dir = utf8(&temp);
        let captured = dir.join("captured.sh");
        let sbatch = fake_tool(
            &dir,
            "sbatch",
            &format!("cp \"$2\" {captured}\necho '555;cluster'"),
        );
        let desc = descriptor(&dir.join("logs"), &["sleep", "30"]);

        let dispatcher = Dispatcher::new(SystemRunner).with_tools(SlurmTools {
            sbatch,
            ..Default::default()
        });
        let started = Instant::now();
        let result = dispatcher.submit(&desc, SubmissionMode::Batch).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.external_job_id.as_deref(), Some("555"));
        let script = std::fs::read_to_string(&captured).unwrap();
        assert_eq!(script, desc.render_batch_script());
    }

    #[tokio::test]
    async fn test_real_srun_blocks_until_session_ends() {
        let temp = TempDir::new().unwrap();
        let dir = utf8(&temp);
        let srun = fake_tool(&dir, "srun", "sleep 0.3\nexit 3");
        let desc = descriptor(&dir.join("logs"), &[]);

        let dispatcher = Dispatcher::new(SystemRunner).with_tools(SlurmTools {
            srun,
            ..Default::default()
        });
        let started = Instant::now();
        let result = dispatcher.submit(&desc, SubmissionMode::Interactive).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(result.exit_status, Some(3));
    }
}
