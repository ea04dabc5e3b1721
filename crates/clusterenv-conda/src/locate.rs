//! Finding conda installations on disk.

use camino::{Utf8Path, Utf8PathBuf};

/// Installation roots searched when nothing is configured, in priority order.
pub const DEFAULT_ROOTS: &[&str] = &[
    "~/miniconda3",
    "~/anaconda3",
    "/opt/conda",
    "/usr/local/conda",
    "/opt/miniconda3",
    "/opt/anaconda3",
];

/// A conda installation rooted at `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaInstallation {
    pub root: Utf8PathBuf,
}

impl CondaInstallation {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Shell hook sourced before `conda activate` works in scripts.
    pub fn conda_sh(&self) -> Utf8PathBuf {
        self.root.join("etc").join("profile.d").join("conda.sh")
    }

    pub fn conda_bin(&self) -> Utf8PathBuf {
        self.root.join("bin").join("conda")
    }

    pub fn envs_dir(&self) -> Utf8PathBuf {
        self.root.join("envs")
    }

    /// Whether `root` holds a usable installation.
    pub fn is_installed_at(root: &Utf8Path) -> bool {
        let candidate = Self::new(root);
        candidate.conda_sh().is_file() && candidate.conda_bin().exists()
    }
}

/// Ordered list of installation roots. First match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoots {
    roots: Vec<Utf8PathBuf>,
}

impl SearchRoots {
    pub fn new(roots: Vec<Utf8PathBuf>) -> Self {
        Self { roots }
    }

    /// The default roots with `~` expanded against `home`.
    ///
    /// Home-relative roots are skipped when no home directory is known.
    pub fn defaults(home: Option<&Utf8Path>) -> Self {
        let roots = DEFAULT_ROOTS
            .iter()
            .filter_map(|root| expand_home(root, home))
            .collect();
        Self { roots }
    }

    /// Defaults for the current user.
    pub fn from_env() -> Self {
        Self::defaults(home_dir().as_deref())
    }

    /// Search `root` before everything else.
    pub fn with_priority(mut self, root: Utf8PathBuf) -> Self {
        self.roots.retain(|r| r != &root);
        self.roots.insert(0, root);
        self
    }

    pub fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// Where a bootstrap installs conda: the highest-priority root.
    pub fn bootstrap_target(&self) -> Option<&Utf8Path> {
        self.roots.first().map(Utf8PathBuf::as_path)
    }

    /// The first root holding an installation.
    pub fn find_installed(&self) -> Option<CondaInstallation> {
        self.roots
            .iter()
            .find(|root| CondaInstallation::is_installed_at(root))
            .map(|root| CondaInstallation::new(root.clone()))
    }
}

/// The current user's home directory, if it has a UTF-8 path.
pub fn home_dir() -> Option<Utf8PathBuf> {
    dirs::home_dir().and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
}

/// Expand a leading `~` against `home`.
///
/// Returns `None` for a home-relative path when no home directory is known.
pub fn expand_home(path: &str, home: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
    if path.starts_with('~') && home.is_none() {
        return None;
    }
    let expanded = shellexpand::tilde_with_context(path, || home.map(Utf8Path::as_str));
    Some(Utf8PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_install;
    use tempfile::TempDir;

    #[test]
    fn test_expand_home() {
        let home = Utf8Path::new("/home/alice");
        assert_eq!(
            expand_home("~/miniconda3", Some(home)),
            Some(Utf8PathBuf::from("/home/alice/miniconda3"))
        );
        assert_eq!(expand_home("~", Some(home)), Some(Utf8PathBuf::from("/home/alice")));
        assert_eq!(expand_home("~/miniconda3", None), None);
        assert_eq!(
            expand_home("/opt/conda", None),
            Some(Utf8PathBuf::from("/opt/conda"))
        );
    }

    #[test]
    fn test_defaults_order() {
        let roots = SearchRoots::defaults(Some(Utf8Path::new("/home/alice")));
        assert_eq!(roots.roots()[0], "/home/alice/miniconda3");
        assert_eq!(roots.roots()[1], "/home/alice/anaconda3");
        assert_eq!(roots.roots()[2], "/opt/conda");
        assert_eq!(roots.roots().len(), DEFAULT_ROOTS.len());

        let without_home = SearchRoots::defaults(None);
        assert_eq!(without_home.roots()[0], "/opt/conda");
    }

    #[test]
    fn test_first_installed_root_wins() {
        let temp = TempDir::new().unwrap();
        let base = Utf8Path::from_path(temp.path()).unwrap();
        let empty = base.join("empty");
        let first = fake_install(&base.join("first"));
        let second = fake_install(&base.join("second"));

        let roots = SearchRoots::new(vec![empty, first.root.clone(), second.root.clone()]);
        assert_eq!(roots.find_installed(), Some(first));
    }

    #[test]
    fn test_with_priority_moves_root_to_front() {
        let roots = SearchRoots::new(vec!["/a".into(), "/b".into()]).with_priority("/b".into());
        assert_eq!(roots.roots(), &[Utf8PathBuf::from("/b"), Utf8PathBuf::from("/a")]);
        assert_eq!(roots.bootstrap_target(), Some(Utf8Path::new("/b")));
    }

    #[test]
    fn test_partial_install_is_ignored() {
        let temp = TempDir::new().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap().join("half");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::write(root.join("bin").join("conda"), "").unwrap();
        assert!(!CondaInstallation::is_installed_at(&root));
    }
}
