//! SLURM request and submission types.

use crate::error::ValidationError;
use clusterenv_parsers::{parse_duration, parse_memory_bytes};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kind of node pool a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Gpu,
    Cpu,
}

impl FromStr for Partition {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            _ => Err(ValidationError::Malformed {
                field: "partition",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Resources asked for on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub partition: Partition,

    /// GPUs per node
    pub gpus: u32,

    /// Memory per node, in bytes
    pub memory_bytes: u64,

    /// CPUs per task
    pub cpus: u32,

    /// Wall-clock limit
    pub time_limit: Duration,

    /// Program and arguments; empty for an interactive shell
    pub command: Vec<String>,

    /// SLURM job name; defaults to the environment name
    pub job_name: Option<String>,
}

impl ResourceRequest {
    pub fn new(
        partition: Partition,
        gpus: u32,
        memory_bytes: u64,
        cpus: u32,
        time_limit: Duration,
        command: Vec<String>,
    ) -> Self {
        Self {
            partition,
            gpus,
            memory_bytes,
            cpus,
            time_limit,
            command,
            job_name: None,
        }
    }

    /// Build a request from raw flag values ("gpu", "32G", "4:00:00").
    ///
    /// Only parses; resource rules are checked by the descriptor builder.
    pub fn from_flags(
        partition: &str,
        gpus: u32,
        memory: &str,
        cpus: u32,
        time: &str,
        command: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let partition = partition.parse()?;
        let memory_bytes = parse_memory_bytes(memory).ok_or_else(|| ValidationError::Malformed {
            field: "memory",
            value: memory.to_string(),
        })?;
        let time_limit = parse_duration(time).ok_or_else(|| ValidationError::Malformed {
            field: "time limit",
            value: time.to_string(),
        })?;

        Ok(Self::new(partition, gpus, memory_bytes, cpus, time_limit, command))
    }

    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }
}

/// How a descriptor is handed to SLURM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// `srun --pty`, blocking for the session
    Interactive,
    /// `sbatch`, returning once the queue accepts the job
    Batch,
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Lifecycle of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Building,
    Validated,
    Dispatching,
    Completed,
    Failed,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Building => "building",
            Self::Validated => "validated",
            Self::Dispatching => "dispatching",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a submission that reached SLURM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub mode: SubmissionMode,

    /// Our identifier (also names the log files)
    pub job_id: String,

    /// SLURM job ID, batch only
    pub external_job_id: Option<String>,

    /// sbatch exit code for batch, session exit code for interactive
    pub exit_status: Option<i32>,

    /// Diagnostic text captured from the tool
    pub diagnostic: String,
}
