//! Project-root discovery and cache-directory resolution.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

/// Name of the build script marking a project root.
pub const SCRIPT_NAME: &str = "pion.rhai";

/// Cache location under the project root when `--cache-dir` is not given.
pub const DEFAULT_CACHE_DIR: &str = "build/cache";

/// Walk upward from the current directory to the nearest `pion.rhai`.
pub fn find_project_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    find_project_root_from(&cwd)
}

/// Walk upward from `start` to the nearest directory containing `pion.rhai`.
pub fn find_project_root_from(start: &Path) -> Result<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(SCRIPT_NAME).is_file() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => bail!(
                "not inside a pion project ({SCRIPT_NAME} not found in {} or any parent)",
                start.display()
            ),
        }
    }
}

/// Resolve the cache directory: an explicit override wins, otherwise the
/// default location under the project root.
pub fn cache_dir(root: &Path, override_dir: Option<&Path>) -> PathBuf {
    match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => root.join(DEFAULT_CACHE_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_found_from_nested_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(SCRIPT_NAME), "// empty").unwrap();
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let root = find_project_root_from(&nested).unwrap();
        assert_eq!(root, tmp.path());
    }

    #[test]
    fn missing_script_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = find_project_root_from(tmp.path()).unwrap_err();
        assert!(err.to_string().contains(SCRIPT_NAME));
    }

    #[test]
    fn cache_dir_override_wins() {
        let root = Path::new("/proj");
        assert_eq!(cache_dir(root, None), Path::new("/proj/build/cache"));
        assert_eq!(
            cache_dir(root, Some(Path::new("/tmp/c"))),
            Path::new("/tmp/c")
        );
    }
}
