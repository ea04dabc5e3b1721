//! Conda environment management for clusterenv.
//!
//! Locates a conda installation, bootstraps one when allowed, and makes sure
//! a named environment exists before any job is built on top of it.

pub mod activation;
pub mod bootstrap;
pub mod catalog;
pub mod locate;
pub mod resolver;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use activation::{activation_script, write_activation_script};
pub use bootstrap::{BootstrapPolicy, installer_url};
pub use catalog::{CatalogError, DEFAULT_ENVIRONMENT, EnvironmentCatalog, EnvironmentSpec};
pub use locate::{CondaInstallation, DEFAULT_ROOTS, SearchRoots};
pub use resolver::{
    EnvironmentError, EnvironmentErrorKind, EnvironmentResolver, ResolvedEnvironment,
};
pub use verify::{Verification, install_requirements, verify_environment};
