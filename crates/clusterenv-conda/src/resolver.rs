//! Environment resolution: find conda, then find or create the environment.

use crate::bootstrap::{BootstrapPolicy, install_miniconda};
use crate::catalog::EnvironmentSpec;
use crate::locate::{CondaInstallation, SearchRoots};
use camino::{Utf8Path, Utf8PathBuf};
use clusterenv_parsers::{CommandError, CommandOutput, CommandRunner, Invocation, quote};
use serde::Deserialize;
use thiserror::Error;

/// Diagnostic fragments that mean the filesystem refused us.
const PERMISSION_MARKERS: &[&str] = &[
    "Permission denied",
    "EACCES",
    "NotWritableError",
    "NoWritableEnvsDirError",
    "NoWritablePkgsDirError",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentErrorKind {
    RuntimeManagerMissing,
    PackageInstallFailed,
    PermissionDenied,
    NotCreated,
}

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("conda is not available: {reason}")]
    RuntimeManagerMissing { reason: String },
    #[error("Failed to set up environment '{env}' during {step}: {diagnostic}")]
    PackageInstallFailed {
        env: String,
        step: String,
        diagnostic: String,
    },
    #[error("Permission denied while setting up environment '{env}': {diagnostic}")]
    PermissionDenied { env: String, diagnostic: String },
    #[error("Environment '{env}' does not exist; run `setup {env}` first")]
    NotCreated { env: String },
}

impl EnvironmentError {
    pub fn kind(&self) -> EnvironmentErrorKind {
        match self {
            Self::RuntimeManagerMissing { .. } => EnvironmentErrorKind::RuntimeManagerMissing,
            Self::PackageInstallFailed { .. } => EnvironmentErrorKind::PackageInstallFailed,
            Self::PermissionDenied { .. } => EnvironmentErrorKind::PermissionDenied,
            Self::NotCreated { .. } => EnvironmentErrorKind::NotCreated,
        }
    }

    pub(crate) fn missing(reason: impl Into<String>) -> Self {
        Self::RuntimeManagerMissing {
            reason: reason.into(),
        }
    }

    /// Classify a failed step by its diagnostic text.
    pub(crate) fn from_step(env: &str, step: &str, diagnostic: String) -> Self {
        if PERMISSION_MARKERS.iter().any(|m| diagnostic.contains(m)) {
            Self::PermissionDenied {
                env: env.to_string(),
                diagnostic,
            }
        } else {
            Self::PackageInstallFailed {
                env: env.to_string(),
                step: step.to_string(),
                diagnostic,
            }
        }
    }
}

/// An environment known to exist, ready to be activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub name: String,
    pub conda: CondaInstallation,
    /// Environment prefix (`<root>/envs/<name>`)
    pub prefix: Utf8PathBuf,
    /// Whether this resolve created the environment
    pub created: bool,
}

impl ResolvedEnvironment {
    /// Shell lines that activate the environment in a fresh shell.
    pub fn activation_preamble(&self) -> String {
        format!(
            "source {}\nconda activate {}\n",
            quote(self.conda.conda_sh().as_str()),
            quote(&self.name)
        )
    }

    /// `conda run -n NAME ARGS...`
    pub fn run_inside<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(self.conda.conda_bin().as_str())
            .args(["run", "-n", self.name.as_str()])
            .args(args)
    }
}

#[derive(Debug, Deserialize)]
struct EnvList {
    envs: Vec<Utf8PathBuf>,
}

/// Finds conda and makes sure named environments exist.
#[derive(Debug)]
pub struct EnvironmentResolver<R> {
    runner: R,
    roots: SearchRoots,
    bootstrap: BootstrapPolicy,
}

impl<R: CommandRunner> EnvironmentResolver<R> {
    pub fn new(runner: R, roots: SearchRoots) -> Self {
        Self {
            runner,
            roots,
            bootstrap: BootstrapPolicy::Never,
        }
    }

    pub fn with_bootstrap(mut self, policy: BootstrapPolicy) -> Self {
        self.bootstrap = policy;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Resolve `spec` to an existing environment, creating it if needed.
    ///
    /// An environment that already exists is only verified, never modified.
    /// On failure no half-built environment is left behind.
    pub async fn resolve(
        &self,
        spec: &EnvironmentSpec,
    ) -> Result<ResolvedEnvironment, EnvironmentError> {
        let conda = self.manager().await?;

        if let Some(prefix) = self.find_environment(&conda, &spec.name).await? {
            tracing::info!("environment {} present at {}", spec.name, prefix);
            return Ok(ResolvedEnvironment {
                name: spec.name.clone(),
                conda,
                prefix,
                created: false,
            });
        }

        self.create(conda, spec).await
    }

    /// Resolve an environment that must already exist, without creating it.
    pub async fn existing(&self, name: &str) -> Result<ResolvedEnvironment, EnvironmentError> {
        let conda = self
            .locate_manager()
            .await
            .ok_or_else(|| self.not_found_error())?;

        match self.find_environment(&conda, name).await? {
            Some(prefix) => Ok(ResolvedEnvironment {
                name: name.to_string(),
                conda,
                prefix,
                created: false,
            }),
            None => Err(EnvironmentError::NotCreated {
                env: name.to_string(),
            }),
        }
    }

    /// The conda installation to use, bootstrapping one if policy allows.
    pub async fn manager(&self) -> Result<CondaInstallation, EnvironmentError> {
        if let Some(found) = self.locate_manager().await {
            return Ok(found);
        }

        match self.bootstrap {
            BootstrapPolicy::Never => Err(self.not_found_error()),
            BootstrapPolicy::Auto => {
                let target = self.roots.bootstrap_target().ok_or_else(|| {
                    EnvironmentError::missing("no installation root to bootstrap into")
                })?;
                install_miniconda(&self.runner, target).await
            }
        }
    }

    /// First installation among the search roots, then a `conda` on PATH.
    pub async fn locate_manager(&self) -> Option<CondaInstallation> {
        if let Some(found) = self.roots.find_installed() {
            tracing::debug!("found conda at {}", found.root);
            return Some(found);
        }

        let probe = Invocation::new("conda").args(["info", "--base"]);
        match self.runner.output(&probe).await {
            Ok(output) if output.success() => {
                let base = output.stdout.trim();
                if base.is_empty() {
                    None
                } else {
                    tracing::debug!("using conda from PATH, base {}", base);
                    Some(CondaInstallation::new(base))
                }
            }
            Ok(output) => {
                tracing::debug!("conda info failed: {}", output.diagnostic());
                None
            }
            Err(e) => {
                tracing::debug!("no conda on PATH: {}", e);
                None
            }
        }
    }

    /// Prefix of the environment called `name`, if conda knows it.
    pub async fn find_environment(
        &self,
        conda: &CondaInstallation,
        name: &str,
    ) -> Result<Option<Utf8PathBuf>, EnvironmentError> {
        let list = Invocation::new(conda.conda_bin().as_str()).args(["env", "list", "--json"]);
        let output = self.run(name, "conda env list", &list).await?;
        if !output.success() {
            return Err(EnvironmentError::missing(format!(
                "conda env list failed: {}",
                output.diagnostic()
            )));
        }

        let parsed: EnvList = serde_json::from_str(&output.stdout).map_err(|e| {
            EnvironmentError::missing(format!("unreadable conda env list output: {e}"))
        })?;

        Ok(parsed.envs.into_iter().find(|prefix| {
            prefix.file_name() == Some(name)
                && prefix.parent().and_then(Utf8Path::file_name) == Some("envs")
        }))
    }

    async fn create(
        &self,
        conda: CondaInstallation,
        spec: &EnvironmentSpec,
    ) -> Result<ResolvedEnvironment, EnvironmentError> {
        let name = spec.name.as_str();
        let conda_bin = conda.conda_bin();
        tracing::info!("creating environment {} (python {})", name, spec.python);

        let create = Invocation::new(conda_bin.as_str()).args([
            "create".to_string(),
            "-y".to_string(),
            "-n".to_string(),
            name.to_string(),
            format!("python={}", spec.python),
        ]);
        let output = self.run(name, "conda create", &create).await?;

        if !output.success() {
            // Another process may have created it in the meantime.
            if let Some(prefix) = self.find_environment(&conda, name).await? {
                tracing::warn!("environment {} appeared while creating it, using it", name);
                return Ok(ResolvedEnvironment {
                    name: name.to_string(),
                    conda,
                    prefix,
                    created: false,
                });
            }
            return Err(EnvironmentError::from_step(name, "conda create", output.diagnostic()));
        }

        if let Err(e) = self.install_packages(&conda, spec).await {
            self.remove(&conda, name).await;
            return Err(e);
        }

        let prefix = self
            .find_environment(&conda, name)
            .await?
            .unwrap_or_else(|| conda.envs_dir().join(name));

        tracing::info!("environment {} ready at {}", name, prefix);
        Ok(ResolvedEnvironment {
            name: name.to_string(),
            conda,
            prefix,
            created: true,
        })
    }

    /// Conda layer first, then pip, each in declaration order.
    async fn install_packages(
        &self,
        conda: &CondaInstallation,
        spec: &EnvironmentSpec,
    ) -> Result<(), EnvironmentError> {
        let name = spec.name.as_str();
        let conda_bin = conda.conda_bin();

        let conda_packages = spec.conda_install_list();
        if !conda_packages.is_empty() {
            let mut install =
                Invocation::new(conda_bin.as_str()).args(["install", "-y", "-n", name]);
            for channel in &spec.channels {
                install = install.arg("-c").arg(channel.as_str());
            }
            let install = install.args(conda_packages);
            tracing::info!("installing conda packages into {}", name);
            self.checked(name, "conda install", &install).await?;
        }

        if !spec.pip_packages.is_empty() {
            let pip = Invocation::new(conda_bin.as_str())
                .args(["run", "-n", name, "python", "-m", "pip", "install"])
                .args(spec.pip_packages.iter().map(String::as_str));
            tracing::info!("installing pip packages into {}", name);
            self.checked(name, "pip install", &pip).await?;
        }

        Ok(())
    }

    /// Best effort: the install error is what gets reported.
    async fn remove(&self, conda: &CondaInstallation, name: &str) {
        tracing::warn!("removing partially created environment {}", name);
        let remove =
            Invocation::new(conda.conda_bin().as_str()).args(["env", "remove", "-y", "-n", name]);
        match self.runner.output(&remove).await {
            Ok(output) if output.success() => {}
            Ok(output) => tracing::warn!("conda env remove failed: {}", output.diagnostic()),
            Err(e) => tracing::warn!("conda env remove failed: {}", e),
        }
    }

    async fn checked(
        &self,
        env: &str,
        step: &str,
        invocation: &Invocation,
    ) -> Result<(), EnvironmentError> {
        let output = self.run(env, step, invocation).await?;
        if output.success() {
            Ok(())
        } else {
            Err(EnvironmentError::from_step(env, step, output.diagnostic()))
        }
    }

    async fn run(
        &self,
        env: &str,
        step: &str,
        invocation: &Invocation,
    ) -> Result<CommandOutput, EnvironmentError> {
        self.runner
            .output(invocation)
            .await
            .map_err(|e| match e {
                CommandError::NotFound { command } => {
                    EnvironmentError::missing(format!("{command} not found"))
                }
                other => EnvironmentError::from_step(env, step, other.to_string()),
            })
    }

    fn not_found_error(&self) -> EnvironmentError {
        let searched = self
            .roots
            .roots()
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        EnvironmentError::missing(format!(
            "no installation found in [{searched}] and no conda on PATH"
        ))
    }
}
