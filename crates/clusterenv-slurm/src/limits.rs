//! Cluster-wide limits and partition names.

use crate::types::Partition;
use camino::Utf8PathBuf;
use clusterenv_parsers::GIB;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits the cluster enforces, checked before anything is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterLimits {
    /// SLURM partition used for GPU jobs
    pub gpu_partition: String,

    /// SLURM partition used for CPU-only jobs
    pub cpu_partition: String,

    /// Longest wall-clock limit accepted ("7-00:00:00", "48h", ...)
    #[serde(with = "duration_str")]
    pub max_time: Duration,

    pub max_gpus: u32,

    pub max_cpus: u32,

    /// Largest memory request accepted ("512G", ...)
    #[serde(with = "memory_str")]
    pub max_memory: u64,

    /// Directory for job output and transient job files
    pub log_dir: Utf8PathBuf,

    /// Charge jobs to this account (`--account`)
    pub account: Option<String>,

    /// Quality of service (`--qos`)
    pub qos: Option<String>,
}

impl Default for ClusterLimits {
    fn default() -> Self {
        Self {
            gpu_partition: "gpu".to_string(),
            cpu_partition: "cpu".to_string(),
            max_time: Duration::from_secs(7 * 86400),
            max_gpus: 8,
            max_cpus: 64,
            max_memory: 512 * GIB,
            log_dir: Utf8PathBuf::from("logs"),
            account: None,
            qos: None,
        }
    }
}

impl ClusterLimits {
    /// SLURM partition name for a partition kind.
    pub fn partition_name(&self, partition: Partition) -> &str {
        match partition {
            Partition::Gpu => &self.gpu_partition,
            Partition::Cpu => &self.cpu_partition,
        }
    }
}

mod duration_str {
    use clusterenv_parsers::{format_duration_slurm, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration_slurm(value.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).ok_or_else(|| D::Error::custom(format!("invalid duration '{s}'")))
    }
}

mod memory_str {
    use clusterenv_parsers::{format_memory_slurm, parse_memory_bytes};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_memory_slurm(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_memory_bytes(&s).ok_or_else(|| D::Error::custom(format!("invalid memory size '{s}'")))
    }
}
