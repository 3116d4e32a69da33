// ABOUTME: Host/orchestrator path translation for bind mounts
// ABOUTME: Maps between paths the Docker daemon sees and paths this process can open directly

use std::path::{Path, PathBuf};

use crate::constants::CONTAINER_WORKSPACE_ROOT;

/// Translates between two views of the same directory tree.
///
/// `local_root` is where this process reads and writes files. `mount_root` is
/// the same directory as the Docker daemon sees it, which is what bind-mount
/// arguments need. They differ when the orchestrator itself runs in a
/// container with the Docker socket mounted; otherwise they are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    local_root: PathBuf,
    mount_root: PathBuf,
}

impl PathTranslator {
    pub fn new(local_root: impl Into<PathBuf>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            mount_root: mount_root.into(),
        }
    }

    /// Translator for the common case where both views coincide
    pub fn identity(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::new(root.clone(), root)
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Local path -> daemon path. Paths outside `local_root` pass through unchanged.
    pub fn to_mount_path(&self, local: &Path) -> PathBuf {
        match local.strip_prefix(&self.local_root) {
            Ok(rest) => self.mount_root.join(rest),
            Err(_) => local.to_path_buf(),
        }
    }

    /// Daemon path -> local path. Paths outside `mount_root` pass through unchanged.
    pub fn to_local_path(&self, mount: &Path) -> PathBuf {
        match mount.strip_prefix(&self.mount_root) {
            Ok(rest) => self.local_root.join(rest),
            Err(_) => mount.to_path_buf(),
        }
    }

    /// Directory of a project as seen by this process
    pub fn project_dir(&self, project_name: &str) -> PathBuf {
        self.local_root.join(project_name)
    }

    /// Directory of a project inside the sandbox container
    pub fn container_project_dir(project_name: &str) -> String {
        format!("{}/{}", CONTAINER_WORKSPACE_ROOT, project_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identity_translation_is_a_no_op() {
        let t = PathTranslator::identity("/srv/codebox/workspace");
        let p = Path::new("/srv/codebox/workspace/demo");
        assert_eq!(t.to_mount_path(p), p);
        assert_eq!(t.to_local_path(p), p);
    }

    #[test]
    fn test_translates_between_roots() {
        let t = PathTranslator::new("/data/workspace", "/home/me/codebox/workspace");
        assert_eq!(
            t.to_mount_path(Path::new("/data/workspace/demo/src")),
            PathBuf::from("/home/me/codebox/workspace/demo/src")
        );
        assert_eq!(
            t.to_local_path(Path::new("/home/me/codebox/workspace/demo")),
            PathBuf::from("/data/workspace/demo")
        );
    }

    #[test]
    fn test_unrelated_paths_pass_through() {
        let t = PathTranslator::new("/data/workspace", "/host/workspace");
        assert_eq!(
            t.to_mount_path(Path::new("/etc/squid")),
            PathBuf::from("/etc/squid")
        );
    }

    #[test]
    fn test_project_dirs() {
        let t = PathTranslator::identity("/w");
        assert_eq!(t.project_dir("demo"), PathBuf::from("/w/demo"));
        assert_eq!(PathTranslator::container_project_dir("demo"), "/workspace/demo");
    }
}
