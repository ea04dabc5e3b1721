//! SLURM integration for clusterenv.
//!
//! Builds job descriptors from resource requests and hands them to `sbatch`
//! or `srun`.

pub mod context;
pub mod descriptor;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod limits;
pub mod types;

pub use context::JobContext;
pub use descriptor::{DescriptorBuilder, JobDescriptor, generate_job_id};
pub use diagnostics::{classify_rejection, is_allocation_denied, parse_sbatch_output};
pub use dispatch::{Dispatcher, SlurmTools};
pub use error::{SubmissionError, SubmissionErrorKind, ValidationError, ValidationErrorKind};
pub use limits::ClusterLimits;
pub use types::{Partition, ResourceRequest, SubmissionMode, SubmissionResult, SubmissionState};
