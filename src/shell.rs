//! Shell-execution primitive for rule actions.
//!
//! Commands run through `sh -c` in the rule's working directory. The real
//! action context is the only caller; previews never reach this module.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

/// Run a shell command in `dir`, inheriting stdout/stderr.
pub fn run(command: &str, dir: &Path) -> Result<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .status()
        .with_context(|| format!("spawning `{command}`"))?;
    if !status.success() {
        bail!("`{command}` exited with {status}");
    }
    Ok(())
}

/// Run a shell command in `dir` and capture its stdout.
pub fn run_capture(command: &str, dir: &Path) -> Result<Vec<u8>> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawning `{command}`"))?;
    if !output.status.success() {
        bail!(
            "`{command}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_returns_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let out = run_capture("printf hello", tmp.path()).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(run("false", tmp.path()).is_err());
        assert!(run_capture("echo oops >&2; exit 3", tmp.path()).is_err());
    }

    #[test]
    fn runs_in_requested_directory() {
        let tmp = tempfile::tempdir().unwrap();
        run("echo data > here.txt", tmp.path()).unwrap();
        assert!(tmp.path().join("here.txt").exists());
    }
}
