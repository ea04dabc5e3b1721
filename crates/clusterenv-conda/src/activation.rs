//! Standalone activation scripts.

use crate::resolver::ResolvedEnvironment;
use camino::Utf8Path;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;

/// A bash script that activates `env` when sourced or run.
pub fn activation_script(env: &ResolvedEnvironment) -> String {
    format!(
        "#!/bin/bash\n\
         # Activation script for the {name} environment, generated by clusterenv\n\
         \n\
         {preamble}\
         \n\
         echo \"Environment '{name}' activated\"\n\
         echo \"Python version: $(python --version 2>&1)\"\n\
         echo \"PyTorch version: $(python -c 'import torch; print(torch.__version__)' 2>/dev/null || echo 'not installed')\"\n",
        name = env.name,
        preamble = env.activation_preamble(),
    )
}

/// Write the activation script for `env` to `path` and make it executable.
pub fn write_activation_script(env: &ResolvedEnvironment, path: &Utf8Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, activation_script(env))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::CondaInstallation;
    use tempfile::TempDir;

    fn env() -> ResolvedEnvironment {
        ResolvedEnvironment {
            name: "torchpy311".to_string(),
            conda: CondaInstallation::new("/home/u/miniconda3"),
            prefix: "/home/u/miniconda3/envs/torchpy311".into(),
            created: false,
        }
    }

    #[test]
    fn test_activation_script_contents() {
        let script = activation_script(&env());
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("source /home/u/miniconda3/etc/profile.d/conda.sh\n"));
        assert!(script.contains("conda activate torchpy311\n"));
        assert!(script.contains("Environment 'torchpy311' activated"));
    }

    #[test]
    fn test_write_activation_script_is_executable() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path())
            .unwrap()
            .join("bin")
            .join("activate_torchpy311.sh");

        write_activation_script(&env(), &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(fs::read_to_string(&path).unwrap(), activation_script(&env()));
    }
}
