//! Declarative environment specs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment used when none is named on the command line.
pub const DEFAULT_ENVIRONMENT: &str = "torchpy310";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Environment '{0}' not found in configuration")]
    Unknown(String),
    #[error("Environment '{0}' is declared more than once")]
    Duplicate(String),
    #[error("Environment names must not be empty")]
    EmptyName,
    #[error("Environment name '{0}' contains whitespace or one of / : # \" '")]
    InvalidName(String),
}

/// A conda environment as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Environment name (`conda create -n NAME`)
    pub name: String,

    /// Python version (e.g., "3.10")
    pub python: String,

    /// Conda packages, installed in the order given
    #[serde(default)]
    pub conda_packages: Vec<String>,

    /// Pip packages, installed after the conda layer
    #[serde(default)]
    pub pip_packages: Vec<String>,

    /// Conda channels, highest priority first
    #[serde(default)]
    pub channels: Vec<String>,

    /// CUDA toolkit version pinned through `pytorch-cuda`
    #[serde(default)]
    pub cuda: Option<String>,
}

impl EnvironmentSpec {
    pub fn new(name: impl Into<String>, python: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            python: python.into(),
            conda_packages: Vec::new(),
            pip_packages: Vec::new(),
            channels: Vec::new(),
            cuda: None,
        }
    }

    /// Conda packages in install order, with the CUDA toolkit pin appended
    /// unless the list already pins one.
    pub fn conda_install_list(&self) -> Vec<String> {
        let mut packages = self.conda_packages.clone();
        if let Some(cuda) = &self.cuda {
            let pinned = packages
                .iter()
                .any(|p| p.starts_with("pytorch-cuda") || p.starts_with("cudatoolkit"));
            if !pinned {
                packages.push(format!("pytorch-cuda={cuda}"));
            }
        }
        packages
    }

    fn torch(name: &str, python: &str) -> Self {
        Self {
            name: name.to_string(),
            python: python.to_string(),
            conda_packages: [
                "pytorch",
                "torchvision",
                "torchaudio",
                "numpy",
                "pandas",
                "matplotlib",
                "jupyter",
            ]
            .map(String::from)
            .to_vec(),
            pip_packages: [
                "transformers",
                "datasets",
                "accelerate",
                "wandb",
                "tensorboard",
                "scikit-learn",
                "seaborn",
            ]
            .map(String::from)
            .to_vec(),
            channels: ["pytorch", "nvidia", "conda-forge"]
                .map(String::from)
                .to_vec(),
            cuda: Some("11.8".to_string()),
        }
    }
}

/// The set of known environment specs. Names are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentCatalog {
    environments: Vec<EnvironmentSpec>,
}

impl EnvironmentCatalog {
    pub fn from_specs(environments: Vec<EnvironmentSpec>) -> Result<Self, CatalogError> {
        for (i, spec) in environments.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if spec
                .name
                .contains(|c: char| c.is_whitespace() || matches!(c, '/' | ':' | '#' | '"' | '\''))
            {
                return Err(CatalogError::InvalidName(spec.name.clone()));
            }
            if environments[..i].iter().any(|other| other.name == spec.name) {
                return Err(CatalogError::Duplicate(spec.name.clone()));
            }
        }
        Ok(Self { environments })
    }

    /// PyTorch environments for Python 3.10 and 3.11 on CUDA 11.8.
    pub fn builtin() -> Self {
        Self {
            environments: vec![
                EnvironmentSpec::torch("torchpy310", "3.10"),
                EnvironmentSpec::torch("torchpy311", "3.11"),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Result<&EnvironmentSpec, CatalogError> {
        self.environments
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| CatalogError::Unknown(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentSpec> {
        self.environments.iter()
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

impl Default for EnvironmentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = EnvironmentCatalog::builtin();
        assert_eq!(catalog.len(), 2);
        let spec = catalog.get(DEFAULT_ENVIRONMENT).unwrap();
        assert_eq!(spec.python, "3.10");
        assert_eq!(spec.channels, vec!["pytorch", "nvidia", "conda-forge"]);
        assert_eq!(catalog.get("torchpy311").unwrap().python, "3.11");
    }

    #[test]
    fn test_unknown_environment() {
        let catalog = EnvironmentCatalog::builtin();
        assert_eq!(
            catalog.get("tf2").unwrap_err(),
            CatalogError::Unknown("tf2".to_string())
        );
    }

    #[test]
    fn test_unusable_names_rejected() {
        for name in ["my env", "a/b", "tab\tname", "x:y"] {
            let specs = vec![EnvironmentSpec::new(name, "3.10")];
            assert_eq!(
                EnvironmentCatalog::from_specs(specs).unwrap_err(),
                CatalogError::InvalidName(name.to_string())
            );
        }
        let fine = vec![EnvironmentSpec::new("py3.11-cu12_a", "3.11")];
        assert!(EnvironmentCatalog::from_specs(fine).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let specs = vec![
            EnvironmentSpec::new("dl", "3.10"),
            EnvironmentSpec::new("other", "3.11"),
            EnvironmentSpec::new("dl", "3.12"),
        ];
        assert_eq!(
            EnvironmentCatalog::from_specs(specs).unwrap_err(),
            CatalogError::Duplicate("dl".to_string())
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let specs = vec![EnvironmentSpec::new(" ", "3.10")];
        assert_eq!(
            EnvironmentCatalog::from_specs(specs).unwrap_err(),
            CatalogError::EmptyName
        );
    }

    #[test]
    fn test_cuda_pin_appended_once() {
        let spec = EnvironmentCatalog::builtin().get("torchpy310").unwrap().clone();
        let packages = spec.conda_install_list();
        assert_eq!(packages.first().map(String::as_str), Some("pytorch"));
        assert_eq!(packages.last().map(String::as_str), Some("pytorch-cuda=11.8"));

        let mut pinned = spec.clone();
        pinned.conda_packages.push("pytorch-cuda=12.1".to_string());
        let packages = pinned.conda_install_list();
        assert_eq!(
            packages.iter().filter(|p| p.starts_with("pytorch-cuda")).count(),
            1
        );
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let json = r#"{"name": "minimal", "python": "3.12"}"#;
        let spec: EnvironmentSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec, EnvironmentSpec::new("minimal", "3.12"));
    }
}
