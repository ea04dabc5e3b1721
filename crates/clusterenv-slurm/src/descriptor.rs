//! Job descriptors: a validated request bound to an environment.

use crate::error::ValidationError;
use crate::limits::ClusterLimits;
use crate::types::{Partition, ResourceRequest, SubmissionState};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use clusterenv_conda::ResolvedEnvironment;
use clusterenv_parsers::{
    format_duration_slurm, format_memory_human, format_memory_slurm, quote, shell_join,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a job identifier: `<label>-<YYYYmmdd-HHMMSS>-<pid>-<seq>-<random>`.
///
/// The per-process sequence keeps identifiers distinct within a process; the
/// pid and random suffix keep concurrent invocations of the same user apart.
pub fn generate_job_id(label: &str) -> String {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix: u16 = rand::random();
    format!(
        "{}-{}-{:x}-{}-{:04x}",
        label,
        Local::now().format("%Y%m%d-%H%M%S"),
        std::process::id(),
        seq,
        suffix
    )
}

/// Everything SLURM needs to run one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub job_id: String,
    pub job_name: String,
    /// Environment the command runs in
    pub environment: String,
    pub partition: Partition,
    /// Cluster partition name (`--partition`)
    pub partition_name: String,
    pub gpus: u32,
    pub cpus: u32,
    pub memory_bytes: u64,
    pub time_limit: Duration,
    pub command: Vec<String>,
    /// Shell lines activating the environment
    pub preamble: String,
    pub stdout_path: Utf8PathBuf,
    pub stderr_path: Utf8PathBuf,
    pub account: Option<String>,
    pub qos: Option<String>,
}

impl JobDescriptor {
    /// Directory receiving job output and transient job files.
    pub fn log_dir(&self) -> &Utf8Path {
        self.stdout_path.parent().unwrap_or(Utf8Path::new("."))
    }

    /// Resource flags shared by `sbatch` directives and `srun`.
    pub fn resource_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--job-name={}", self.job_name),
            format!("--partition={}", self.partition_name),
        ];
        if self.gpus > 0 {
            args.push(format!("--gres=gpu:{}", self.gpus));
        }
        args.extend([
            "--nodes=1".to_string(),
            "--ntasks=1".to_string(),
            format!("--cpus-per-task={}", self.cpus),
            format!("--mem={}", format_memory_slurm(self.memory_bytes)),
            format!("--time={}", format_duration_slurm(self.time_limit.as_secs())),
        ]);
        if let Some(account) = &self.account {
            args.push(format!("--account={account}"));
        }
        if let Some(qos) = &self.qos {
            args.push(format!("--qos={qos}"));
        }
        args
    }

    /// The `sbatch` script for this job.
    pub fn render_batch_script(&self) -> String {
        let mut lines = vec!["#!/bin/bash".to_string()];
        for arg in self.resource_args() {
            lines.push(directive(&arg));
        }
        lines.push(directive(&format!("--output={}", self.stdout_path)));
        lines.push(directive(&format!("--error={}", self.stderr_path)));
        lines.push(String::new());
        lines.push("set -eo pipefail".to_string());
        lines.push(format!("export CLUSTERENV_JOB_ID={}", quote(&self.job_id)));
        lines.push(String::new());
        lines.extend(self.preamble.lines().map(String::from));
        lines.push(String::new());
        lines.push(format!(
            "echo \"Job ${{SLURM_JOB_ID:-unknown}} ({}) on $(hostname) started $(date)\"",
            self.job_id
        ));
        if self.gpus > 0 {
            lines.push("if command -v nvidia-smi >/dev/null 2>&1; then nvidia-smi; fi".to_string());
        }
        lines.push(String::new());
        lines.push(shell_join(&self.command));
        lines.push(String::new());
        lines.join("\n")
    }

    /// The rcfile sourced by the interactive session shell.
    pub fn render_session_rc(&self) -> String {
        let mut lines = vec![
            "[ -f \"$HOME/.bashrc\" ] && source \"$HOME/.bashrc\"".to_string(),
            format!("export CLUSTERENV_JOB_ID={}", quote(&self.job_id)),
        ];
        lines.extend(self.preamble.lines().map(String::from));
        lines.push(format!(
            "echo \"Interactive session ${{SLURM_JOB_ID:-unknown}} on $(hostname): environment {}, {} GPU(s), {} CPU(s), {}\"",
            self.environment,
            self.gpus,
            self.cpus,
            format_memory_human(self.memory_bytes)
        ));
        lines.push(String::new());
        lines.join("\n")
    }

    /// `srun` arguments opening a shell that sources `rcfile`.
    pub fn srun_args(&self, rcfile: &Utf8Path) -> Vec<String> {
        let mut args = self.resource_args();
        args.extend([
            "--pty".to_string(),
            "bash".to_string(),
            "--rcfile".to_string(),
            rcfile.to_string(),
            "-i".to_string(),
        ]);
        args
    }
}

/// `#SBATCH` line for `--flag=value`; sbatch splits unquoted values at whitespace.
fn directive(arg: &str) -> String {
    match arg.split_once('=') {
        Some((flag, value)) if value.contains(char::is_whitespace) => {
            format!("#SBATCH {flag}=\"{value}\"")
        }
        _ => format!("#SBATCH {arg}"),
    }
}

/// Turns resource requests into descriptors under the cluster's limits.
#[derive(Debug, Clone, Default)]
pub struct DescriptorBuilder {
    limits: ClusterLimits,
}

impl DescriptorBuilder {
    pub fn new(limits: ClusterLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ClusterLimits {
        &self.limits
    }

    /// Validate `req` and bind it to `env`.
    ///
    /// No I/O happens here; only the job identifier is freshly generated.
    pub fn build(
        &self,
        req: &ResourceRequest,
        env: &ResolvedEnvironment,
    ) -> Result<JobDescriptor, ValidationError> {
        tracing::debug!(state = %SubmissionState::Building, "building descriptor for {}", env.name);
        self.validate(req)?;

        let job_id = generate_job_id(&env.name);
        let log_dir = &self.limits.log_dir;
        let descriptor = JobDescriptor {
            job_name: req.job_name.clone().unwrap_or_else(|| env.name.clone()),
            environment: env.name.clone(),
            partition: req.partition,
            partition_name: self.limits.partition_name(req.partition).to_string(),
            gpus: req.gpus,
            cpus: req.cpus,
            memory_bytes: req.memory_bytes,
            time_limit: req.time_limit,
            command: req.command.clone(),
            preamble: env.activation_preamble(),
            stdout_path: log_dir.join(format!("{job_id}.out")),
            stderr_path: log_dir.join(format!("{job_id}.err")),
            account: self.limits.account.clone(),
            qos: self.limits.qos.clone(),
            job_id,
        };

        tracing::info!(
            job_id = %descriptor.job_id,
            state = %SubmissionState::Validated,
            "{} GPU(s), {} CPU(s), {} for {}",
            descriptor.gpus,
            descriptor.cpus,
            format_memory_human(descriptor.memory_bytes),
            format_duration_slurm(descriptor.time_limit.as_secs())
        );
        Ok(descriptor)
    }

    /// Check `req` against the resource rules and cluster limits.
    ///
    /// Needs no environment, so callers can reject a request before
    /// resolving or creating one.
    pub fn validate(&self, req: &ResourceRequest) -> Result<(), ValidationError> {
        let limits = &self.limits;

        if req.gpus > 0 && req.partition != Partition::Gpu {
            return Err(ValidationError::invalid(format!(
                "{} GPU(s) requested on the {} partition; GPUs require the gpu partition",
                req.gpus, req.partition
            )));
        }
        if req.time_limit.is_zero() {
            return Err(ValidationError::invalid("wall-clock limit must be positive"));
        }
        if req.memory_bytes == 0 {
            return Err(ValidationError::invalid("memory must be positive"));
        }
        if req.cpus == 0 {
            return Err(ValidationError::invalid("CPU count must be positive"));
        }
        if req.command.first().is_some_and(|program| program.is_empty()) {
            return Err(ValidationError::invalid("command must not be empty"));
        }

        if req.time_limit > limits.max_time {
            return Err(ValidationError::LimitExceeded {
                resource: "wall-clock limit",
                requested: format_duration_slurm(req.time_limit.as_secs()),
                maximum: format_duration_slurm(limits.max_time.as_secs()),
            });
        }
        if req.gpus > limits.max_gpus {
            return Err(ValidationError::LimitExceeded {
                resource: "GPU count",
                requested: req.gpus.to_string(),
                maximum: limits.max_gpus.to_string(),
            });
        }
        if req.cpus > limits.max_cpus {
            return Err(ValidationError::LimitExceeded {
                resource: "CPU count",
                requested: req.cpus.to_string(),
                maximum: limits.max_cpus.to_string(),
            });
        }
        if req.memory_bytes > limits.max_memory {
            return Err(ValidationError::LimitExceeded {
                resource: "memory",
                requested: format_memory_human(req.memory_bytes),
                maximum: format_memory_human(limits.max_memory),
            });
        }

        Ok(())
    }
}
