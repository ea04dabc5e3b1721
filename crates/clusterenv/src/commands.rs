//! Subcommand handlers.
//!
//! Handlers write their results to `out` (stdout in production) so that
//! `activate` and `submit` output stays usable from scripts; progress and
//! warnings go through `tracing` on stderr.

use camino::{Utf8Path, Utf8PathBuf};
use clusterenv_cli::{CliError, Command, Config, ResourceArgs, SubmitArgs};
use clusterenv_conda::{
    BootstrapPolicy, EnvironmentCatalog, EnvironmentResolver, ResolvedEnvironment, SearchRoots,
    install_requirements, verify_environment, write_activation_script,
};
use clusterenv_parsers::{CommandRunner, Invocation, format_memory_human};
use clusterenv_slurm::{DescriptorBuilder, Dispatcher, JobContext, SlurmTools, SubmissionMode};
use std::io::Write;

/// Everything a command needs: configuration, catalog and the process runner.
pub struct App<R> {
    config: Config,
    catalog: EnvironmentCatalog,
    roots: SearchRoots,
    runner: R,
    tools: SlurmTools,
}

impl<R: CommandRunner> App<R> {
    pub fn new(config: Config, roots: SearchRoots, runner: R) -> Result<Self, CliError> {
        let catalog = config.catalog()?;
        Ok(Self {
            config,
            catalog,
            roots,
            runner,
            tools: SlurmTools::default(),
        })
    }

    #[cfg(test)]
    fn runner(&self) -> &R {
        &self.runner
    }

    pub async fn run(&self, command: Command, out: &mut impl Write) -> Result<(), CliError> {
        match command {
            Command::Setup {
                env,
                install_conda,
                conda_dir,
                script,
            } => {
                let options = SetupOptions {
                    install_conda,
                    conda_dir,
                    script,
                };
                self.setup(env.as_deref(), options, out).await
            }
            Command::Activate { env } => self.activate(env.as_deref(), out).await,
            Command::Interactive(resources) => self.interactive(&resources).await,
            Command::Submit(args) => self.submit(&args, out).await,
            Command::Test { env, requirements } => {
                self.test(env.as_deref(), requirements.as_deref(), out).await
            }
            Command::List => self.list(out),
            Command::Script { env, output } => self.script(env.as_deref(), output, out).await,
            Command::Status => self.status(&JobContext::from_env(), out).await,
        }
    }

    async fn setup(
        &self,
        env: Option<&str>,
        options: SetupOptions,
        out: &mut impl Write,
    ) -> Result<(), CliError> {
        let policy = if options.install_conda {
            BootstrapPolicy::Auto
        } else {
            self.config.bootstrap_policy()
        };
        let roots = match options.conda_dir {
            Some(dir) => self.roots.clone().with_priority(dir),
            None => self.roots.clone(),
        };
        let resolved = self.resolve_in(roots, env, policy).await?;

        if resolved.created {
            emit(
                out,
                format_args!("Created environment {} at {}", resolved.name, resolved.prefix),
            )?;
        } else {
            emit(
                out,
                format_args!("Environment {} is ready at {}", resolved.name, resolved.prefix),
            )?;
        }

        if let Some(path) = options.script {
            write_activation_script(&resolved, &path).map_err(|source| CliError::Write {
                path: path.clone(),
                source,
            })?;
            emit(out, format_args!("Wrote {path}"))?;
        }
        emit(
            out,
            format_args!("Activate it with: eval \"$(clusterenv activate {})\"", resolved.name),
        )
    }

    async fn activate(&self, env: Option<&str>, out: &mut impl Write) -> Result<(), CliError> {
        let resolved = self.existing(env).await?;
        emit(out, format_args!("{}", resolved.activation_preamble().trim_end()))
    }

    async fn interactive(&self, resources: &ResourceArgs) -> Result<(), CliError> {
        let request = resources.request(Vec::new())?;
        self.builder().validate(&request)?;
        let env = self
            .resolve(resources.env.as_deref(), self.config.bootstrap_policy())
            .await?;
        let descriptor = self.builder().build(&request, &env)?;

        eprintln!(
            "Requesting {} GPU(s), {} CPU(s), {} on {} for {}...",
            descriptor.gpus,
            descriptor.cpus,
            format_memory_human(descriptor.memory_bytes),
            descriptor.partition_name,
            clusterenv_parsers::format_duration(descriptor.time_limit.as_secs()),
        );
        let result = self
            .dispatcher()
            .submit(&descriptor, SubmissionMode::Interactive)
            .await?;

        match result.exit_status {
            Some(0) => {}
            Some(code) => tracing::warn!("interactive session ended with exit status {}", code),
            None => tracing::warn!("interactive session was terminated by a signal"),
        }
        Ok(())
    }

    async fn submit(&self, args: &SubmitArgs, out: &mut impl Write) -> Result<(), CliError> {
        let request = args.resources.request(args.command.clone())?;
        self.builder().validate(&request)?;

        if args.dry_run {
            // Never creates anything: the environment must already exist.
            self.catalog.get(self.config.env_name(args.resources.env.as_deref()))?;
            let env = self.existing(args.resources.env.as_deref()).await?;
            let descriptor = self.builder().build(&request, &env)?;
            return emit(out, format_args!("{}", descriptor.render_batch_script().trim_end()));
        }

        let env = self
            .resolve(args.resources.env.as_deref(), self.config.bootstrap_policy())
            .await?;
        let descriptor = self.builder().build(&request, &env)?;
        let result = self
            .dispatcher()
            .submit(&descriptor, SubmissionMode::Batch)
            .await?;

        eprintln!("Job {}: output in {}", descriptor.job_id, descriptor.stdout_path);
        emit(
            out,
            format_args!("{}", result.external_job_id.as_deref().unwrap_or(&result.job_id)),
        )
    }

    async fn test(
        &self,
        env: Option<&str>,
        requirements: Option<&Utf8Path>,
        out: &mut impl Write,
    ) -> Result<(), CliError> {
        let resolved = self.existing(env).await?;

        if let Some(requirements) = requirements {
            install_requirements(&self.runner, &resolved, requirements).await?;
            emit(out, format_args!("Installed {} into {}", requirements, resolved.name))?;
        }

        let verification = verify_environment(&self.runner, &resolved).await?;
        if !verification.passed {
            return Err(CliError::VerificationFailed {
                env: resolved.name,
                output: verification.output,
            });
        }
        emit(out, format_args!("{}", verification.output))?;
        emit(out, format_args!("Environment {} passed", resolved.name))
    }

    fn list(&self, out: &mut impl Write) -> Result<(), CliError> {
        let default = self.config.env_name(None);
        for spec in self.catalog.iter() {
            let marker = if spec.name == default { "*" } else { " " };
            let cuda = spec
                .cuda
                .as_deref()
                .map(|v| format!(", CUDA {v}"))
                .unwrap_or_default();
            emit(out, format_args!("{marker} {:<16} Python {}{cuda}", spec.name, spec.python))?;
        }
        Ok(())
    }

    async fn script(
        &self,
        env: Option<&str>,
        output: Option<Utf8PathBuf>,
        out: &mut impl Write,
    ) -> Result<(), CliError> {
        let resolved = self.existing(env).await?;
        let path = output
            .unwrap_or_else(|| Utf8PathBuf::from(format!("activate_{}.sh", resolved.name)));

        write_activation_script(&resolved, &path).map_err(|source| CliError::Write {
            path: path.clone(),
            source,
        })?;
        emit(out, format_args!("Wrote {path}; run `source {path}` to activate {}", resolved.name))
    }

    async fn status(&self, context: &JobContext, out: &mut impl Write) -> Result<(), CliError> {
        emit(out, format_args!("{context}"))?;

        let version = Invocation::new(&self.tools.sbatch).arg("--version");
        match self.runner.output(&version).await {
            Ok(output) if output.success() => {
                emit(out, format_args!("SLURM:       {}", output.stdout.trim()))?
            }
            _ => emit(out, format_args!("SLURM:       not available"))?,
        }

        let smi = Invocation::new("nvidia-smi");
        match self.runner.output(&smi).await {
            Ok(output) if output.success() => {
                emit(out, format_args!("\n{}", output.stdout.trim_end()))
            }
            Ok(output) => emit(out, format_args!("\nnvidia-smi failed: {}", output.diagnostic())),
            Err(_) => emit(out, format_args!("\nnvidia-smi not available (no GPU on this node?)")),
        }
    }

    async fn resolve(
        &self,
        env: Option<&str>,
        policy: BootstrapPolicy,
    ) -> Result<ResolvedEnvironment, CliError> {
        self.resolve_in(self.roots.clone(), env, policy).await
    }

    async fn resolve_in(
        &self,
        roots: SearchRoots,
        env: Option<&str>,
        policy: BootstrapPolicy,
    ) -> Result<ResolvedEnvironment, CliError> {
        let spec = self.catalog.get(self.config.env_name(env))?;
        let resolver = EnvironmentResolver::new(&self.runner, roots).with_bootstrap(policy);
        Ok(resolver.resolve(spec).await?)
    }

    async fn existing(&self, env: Option<&str>) -> Result<ResolvedEnvironment, CliError> {
        let resolver = EnvironmentResolver::new(&self.runner, self.roots.clone());
        Ok(resolver.existing(self.config.env_name(env)).await?)
    }

    fn builder(&self) -> DescriptorBuilder {
        DescriptorBuilder::new(self.config.cluster.clone())
    }

    fn dispatcher(&self) -> Dispatcher<&R> {
        Dispatcher::new(&self.runner).with_tools(self.tools.clone())
    }
}

/// `setup` flags beyond the environment name.
struct SetupOptions {
    install_conda: bool,
    conda_dir: Option<Utf8PathBuf>,
    script: Option<Utf8PathBuf>,
}

fn emit(out: &mut impl Write, line: std::fmt::Arguments<'_>) -> Result<(), CliError> {
    writeln!(out, "{line}").map_err(|source| CliError::Write {
        path: Utf8PathBuf::from("<stdout>"),
        source,
    })
}
