//! One-time Miniconda installation.

use crate::locate::CondaInstallation;
use crate::resolver::EnvironmentError;
use camino::Utf8Path;
use clusterenv_parsers::{CommandRunner, Invocation};
use serde::{Deserialize, Serialize};

const MINICONDA_BASE_URL: &str = "https://repo.anaconda.com/miniconda";

/// Whether the resolver may install conda itself when none is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapPolicy {
    #[default]
    Never,
    Auto,
}

/// Miniconda installer URL for an OS/architecture pair as reported by
/// `std::env::consts`.
pub fn installer_url(os: &str, arch: &str) -> Option<String> {
    let platform = match (os, arch) {
        ("linux", "x86_64") => "Linux-x86_64",
        ("linux", "aarch64") => "Linux-aarch64",
        ("macos", "x86_64") => "MacOSX-x86_64",
        ("macos", "aarch64") => "MacOSX-arm64",
        _ => return None,
    };
    Some(format!("{MINICONDA_BASE_URL}/Miniconda3-latest-{platform}.sh"))
}

/// Download and run the Miniconda installer into `target`.
///
/// Returns the existing installation untouched if `target` already holds one.
pub(crate) async fn install_miniconda<R: CommandRunner>(
    runner: &R,
    target: &Utf8Path,
) -> Result<CondaInstallation, EnvironmentError> {
    if CondaInstallation::is_installed_at(target) {
        return Ok(CondaInstallation::new(target));
    }

    let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
    let url = installer_url(os, arch).ok_or_else(|| {
        EnvironmentError::missing(format!("no Miniconda installer for {os} {arch}"))
    })?;

    // Removed with its contents when dropped.
    let workdir = tempfile::Builder::new()
        .prefix("clusterenv-bootstrap-")
        .tempdir()
        .map_err(|e| EnvironmentError::missing(format!("cannot create download directory: {e}")))?;
    let installer = workdir
        .path()
        .join("miniconda_installer.sh")
        .to_string_lossy()
        .into_owned();

    tracing::info!("downloading Miniconda installer from {}", url);
    step(
        runner,
        Invocation::new("curl").args(["-fsSL", "-o", installer.as_str(), url.as_str()]),
    )
    .await?;

    tracing::info!("installing Miniconda into {}", target);
    step(
        runner,
        Invocation::new("bash").args([installer.as_str(), "-b", "-p", target.as_str()]),
    )
    .await?;

    if CondaInstallation::is_installed_at(target) {
        Ok(CondaInstallation::new(target))
    } else {
        Err(EnvironmentError::missing(format!(
            "installer finished but {target} holds no conda installation"
        )))
    }
}

async fn step<R: CommandRunner>(
    runner: &R,
    invocation: Invocation,
) -> Result<(), EnvironmentError> {
    let output = runner
        .output(&invocation)
        .await
        .map_err(|e| EnvironmentError::missing(format!("bootstrap failed: {e}")))?;

    if output.success() {
        Ok(())
    } else {
        Err(EnvironmentError::missing(format!(
            "{} failed during bootstrap: {}",
            invocation.program_name(),
            output.diagnostic()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::EnvironmentErrorKind;
    use crate::testing::fake_install;
    use clusterenv_parsers::testing::ScriptedRunner;
    use tempfile::TempDir;

    #[test]
    fn test_installer_url() {
        assert_eq!(
            installer_url("linux", "x86_64").as_deref(),
            Some("https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh")
        );
        assert_eq!(
            installer_url("macos", "aarch64").as_deref(),
            Some("https://repo.anaconda.com/miniconda/Miniconda3-latest-MacOSX-arm64.sh")
        );
        assert!(installer_url("windows", "x86_64").is_none());
    }

    #[tokio::test]
    async fn test_existing_install_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap().join("miniconda3");
        let existing = fake_install(&root);

        let runner = ScriptedRunner::new();
        let conda = install_miniconda(&runner, &root).await.unwrap();
        assert_eq!(conda, existing);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_stops_before_install() {
        let temp = TempDir::new().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap().join("miniconda3");

        let runner = ScriptedRunner::new().on("curl", 22, "", "curl: (22) 404 Not Found");
        let err = install_miniconda(&runner, &root).await.unwrap_err();

        if installer_url(std::env::consts::OS, std::env::consts::ARCH).is_some() {
            assert!(runner.called("curl -fsSL"));
        }
        assert_eq!(err.kind(), EnvironmentErrorKind::RuntimeManagerMissing);
        assert!(!runner.called("bash"));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_installer_that_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap().join("miniconda3");

        let runner = ScriptedRunner::new()
            .on("curl", 0, "", "")
            .on("bash", 0, "PREFIX=...", "");
        let result = install_miniconda(&runner, &root).await;

        assert!(matches!(
            result,
            Err(EnvironmentError::RuntimeManagerMissing { .. })
        ));
    }
}
