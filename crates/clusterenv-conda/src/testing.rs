//! Fixtures shared by this crate's tests.

use crate::locate::CondaInstallation;
use camino::Utf8Path;
use std::fs;

/// Lay out the files that mark `root` as a conda installation.
pub(crate) fn fake_install(root: &Utf8Path) -> CondaInstallation {
    let conda = CondaInstallation::new(root);
    fs::create_dir_all(conda.conda_sh().parent().unwrap()).unwrap();
    fs::create_dir_all(conda.conda_bin().parent().unwrap()).unwrap();
    fs::write(conda.conda_sh(), "# conda shell hook\n").unwrap();
    fs::write(conda.conda_bin(), "#!/bin/sh\n").unwrap();
    conda
}

/// `conda env list --json` output naming the given prefixes.
pub(crate) fn env_list_json(prefixes: &[&str]) -> String {
    serde_json::json!({ "envs": prefixes }).to_string()
}
