//! Post-setup checks run inside an environment.

use crate::resolver::{EnvironmentError, ResolvedEnvironment};
use camino::Utf8Path;
use clusterenv_parsers::{CommandError, CommandRunner};

/// Python snippet reporting interpreter, PyTorch and CUDA status.
pub const PROBE: &str = r#"import sys
print(f"python {sys.version.split()[0]}")
try:
    import torch
except ImportError:
    print("torch not installed")
else:
    print(f"torch {torch.__version__}")
    print(f"cuda available: {torch.cuda.is_available()}")
    for i in range(torch.cuda.device_count()):
        print(f"gpu {i}: {torch.cuda.get_device_name(i)}")
"#;

/// Outcome of the verification probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub passed: bool,
    /// Probe stdout on success, diagnostic text on failure
    pub output: String,
}

/// Run the probe inside `env`. A probe that runs but fails is a failed
/// verification, not an error.
pub async fn verify_environment<R: CommandRunner>(
    runner: &R,
    env: &ResolvedEnvironment,
) -> Result<Verification, EnvironmentError> {
    let probe = env.run_inside(["python", "-c", PROBE]);
    let output = runner.output(&probe).await.map_err(|e| tool_error(&env.name, e))?;

    let passed = output.success();
    let output = if passed {
        output.stdout.trim().to_string()
    } else {
        output.diagnostic()
    };
    Ok(Verification { passed, output })
}

/// `pip install -r FILE` inside `env`.
pub async fn install_requirements<R: CommandRunner>(
    runner: &R,
    env: &ResolvedEnvironment,
    requirements: &Utf8Path,
) -> Result<(), EnvironmentError> {
    if !requirements.is_file() {
        return Err(EnvironmentError::PackageInstallFailed {
            env: env.name.clone(),
            step: "pip install -r".to_string(),
            diagnostic: format!("{requirements} not found"),
        });
    }

    tracing::info!("installing {} into {}", requirements, env.name);
    let install = env.run_inside(["python", "-m", "pip", "install", "-r", requirements.as_str()]);
    let output = runner
        .output(&install)
        .await
        .map_err(|e| tool_error(&env.name, e))?;

    if output.success() {
        Ok(())
    } else {
        Err(EnvironmentError::from_step(
            &env.name,
            "pip install -r",
            output.diagnostic(),
        ))
    }
}

fn tool_error(env: &str, error: CommandError) -> EnvironmentError {
    match error {
        CommandError::NotFound { command } => {
            EnvironmentError::missing(format!("{command} not found"))
        }
        other => EnvironmentError::from_step(env, "verification", other.to_string()),
    }
}
