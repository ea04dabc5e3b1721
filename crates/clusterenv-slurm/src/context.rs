//! The SLURM job the current process runs in, if any.

use clusterenv_parsers::non_empty_string;
use std::fmt;

/// Job details SLURM exports into a job's environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: Option<String>,
    pub job_name: Option<String>,
    pub partition: Option<String>,
    pub node_list: Option<String>,
    /// GPUs visible to this process (`CUDA_VISIBLE_DEVICES`)
    pub visible_gpus: Option<String>,
}

impl JobContext {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).as_deref().and_then(non_empty_string);
        Self {
            job_id: get("SLURM_JOB_ID"),
            job_name: get("SLURM_JOB_NAME"),
            partition: get("SLURM_JOB_PARTITION"),
            node_list: get("SLURM_JOB_NODELIST"),
            visible_gpus: get("CUDA_VISIBLE_DEVICES"),
        }
    }

    /// Whether we are inside a SLURM allocation.
    pub fn in_job(&self) -> bool {
        self.job_id.is_some()
    }
}

impl fmt::Display for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "not set".to_string());
        writeln!(f, "Job ID:      {}", show(&self.job_id))?;
        writeln!(f, "Job name:    {}", show(&self.job_name))?;
        writeln!(f, "Partition:   {}", show(&self.partition))?;
        writeln!(f, "Nodes:       {}", show(&self.node_list))?;
        write!(f, "GPUs:        {}", show(&self.visible_gpus))
    }
}
