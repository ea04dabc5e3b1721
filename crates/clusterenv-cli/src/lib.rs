//! CLI argument parsing, configuration and errors for clusterenv.

pub mod config;
pub mod error;

pub use config::{Config, ConfigError};
pub use error::CliError;

use camino::Utf8PathBuf;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use clusterenv_slurm::{Partition, ResourceRequest, ValidationError};

#[derive(Parser, Debug)]
#[command(name = "clusterenv")]
#[command(version, about = "Set up conda environments and run jobs on a SLURM cluster")]
#[command(after_long_help = error::EXIT_STATUS_HELP)]
pub struct Args {
    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file [default: $XDG_CONFIG_HOME/clusterenv/config.json]
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the environment if it does not exist yet
    ///
    /// Any conda failure exits 2; the printed error code tells which kind.
    Setup {
        /// Environment name [default: configured default]
        env: Option<String>,

        /// Install Miniconda when no conda installation is found
        #[arg(long)]
        install_conda: bool,

        /// Conda installation searched first; where --install-conda installs
        #[arg(long)]
        conda_dir: Option<Utf8PathBuf>,

        /// Also write an activation script to this path
        #[arg(long)]
        script: Option<Utf8PathBuf>,
    },

    /// Print shell commands activating an environment (use with eval)
    Activate {
        env: Option<String>,
    },

    /// Open an interactive shell on a compute node
    Interactive(ResourceArgs),

    /// Submit a batch job
    Submit(SubmitArgs),

    /// Check that an environment works
    Test {
        env: Option<String>,

        /// Install a requirements file into the environment first
        #[arg(long, short = 'r')]
        requirements: Option<Utf8PathBuf>,
    },

    /// List known environments
    List,

    /// Write a standalone activation script
    Script {
        env: Option<String>,

        /// Output path [default: activate_<env>.sh]
        #[arg(long, short)]
        output: Option<Utf8PathBuf>,
    },

    /// Show the current SLURM job and GPU status
    Status,
}

/// Resource flags shared by `interactive` and `submit`.
#[derive(ClapArgs, Debug, Clone)]
pub struct ResourceArgs {
    /// Environment to run in [default: configured default]
    #[arg(long)]
    pub env: Option<String>,

    /// Partition kind (gpu or cpu)
    #[arg(long, short, default_value = "gpu")]
    pub partition: String,

    /// GPUs to allocate [default: 1 on gpu, 0 on cpu]
    #[arg(long, short)]
    pub gpus: Option<u32>,

    /// Memory per node (e.g. 32G, 500M)
    #[arg(long, default_value = "32G")]
    pub mem: String,

    /// CPUs per task
    #[arg(long, short, default_value_t = 4)]
    pub cpus: u32,

    /// Wall-clock limit (e.g. 4:00:00, 1-12:00:00, 90m)
    #[arg(long, short, default_value = "4:00:00")]
    pub time: String,

    /// SLURM job name [default: environment name]
    #[arg(long)]
    pub job_name: Option<String>,
}

impl ResourceArgs {
    /// Parse the flags into a request for `command`.
    pub fn request(&self, command: Vec<String>) -> Result<ResourceRequest, ValidationError> {
        let partition: Partition = self.partition.parse()?;
        let gpus = self.gpus.unwrap_or(match partition {
            Partition::Gpu => 1,
            Partition::Cpu => 0,
        });

        let req = ResourceRequest::from_flags(
            &self.partition,
            gpus,
            &self.mem,
            self.cpus,
            &self.time,
            command,
        )?;
        Ok(match &self.job_name {
            Some(name) => req.with_job_name(name),
            None => req,
        })
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,

    /// Print the batch script instead of submitting it
    #[arg(long)]
    pub dry_run: bool,

    /// Command to run, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_submit_defaults() {
        let args =
            Args::try_parse_from(["clusterenv", "submit", "--", "python", "train.py"]).unwrap();
        let Command::Submit(submit) = args.command else {
            panic!("expected submit");
        };
        assert!(!submit.dry_run);
        assert_eq!(submit.command, vec!["python", "train.py"]);

        let req = submit.resources.request(submit.command.clone()).unwrap();
        assert_eq!(req.partition, Partition::Gpu);
        assert_eq!(req.gpus, 1);
        assert_eq!(req.cpus, 4);
        assert_eq!(req.memory_bytes, 32 * 1024 * 1024 * 1024);
        assert_eq!(req.time_limit, Duration::from_secs(4 * 3600));
    }

    #[test]
    fn test_long_help_lists_exit_status() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("Exit status:"));
        assert!(help.contains("3  allocation denied"));
    }

    #[test]
    fn test_setup_flags() {
        let args = Args::try_parse_from([
            "clusterenv",
            "setup",
            "torchpy311",
            "--install-conda",
            "--conda-dir",
            "/scratch/conda",
        ])
        .unwrap();
        let Command::Setup {
            env,
            install_conda,
            conda_dir,
            script,
        } = args.command
        else {
            panic!("expected setup");
        };
        assert_eq!(env.as_deref(), Some("torchpy311"));
        assert!(install_conda);
        assert_eq!(conda_dir.as_deref().map(|p| p.as_str()), Some("/scratch/conda"));
        assert!(script.is_none());
    }

    #[test]
    fn test_submit_requires_command() {
        assert!(Args::try_parse_from(["clusterenv", "submit", "--gpus", "2"]).is_err());
    }

    #[test]
    fn test_cpu_partition_defaults_to_no_gpus() {
        let args =
            Args::try_parse_from(["clusterenv", "interactive", "-p", "cpu", "--mem", "8G"])
                .unwrap();
        let Command::Interactive(resources) = args.command else {
            panic!("expected interactive");
        };
        let req = resources.request(Vec::new()).unwrap();
        assert_eq!(req.partition, Partition::Cpu);
        assert_eq!(req.gpus, 0);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["clusterenv", "list", "-vv", "--config", "/tmp/c.json"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config.as_deref().map(|p| p.as_str()), Some("/tmp/c.json"));
    }

    #[test]
    fn test_malformed_time_flag() {
        let args =
            Args::try_parse_from(["clusterenv", "submit", "--time=-1:00:00", "--", "train.py"])
                .unwrap();
        let Command::Submit(submit) = args.command else {
            panic!("expected submit");
        };
        assert!(submit.resources.request(submit.command.clone()).is_err());
    }
}
