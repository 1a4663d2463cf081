//! Remote worker spawn: `spawn(executableName, host)` from the scheduling
//! contract, realized by shelling out to `ssh host -- executableName
//! args...`. `host == "localhost"` execs the binary directly instead, so the
//! happy path is exercisable in tests without a real SSH configuration.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Child, Command, Stdio};

pub const LOCALHOST: &str = "localhost";

/// Spawns `executable_name` with `args` on `host`. When `capture_path` is
/// `Some`, both the child's stdout and stderr are appended to that file —
/// this is `outDir/outfile.txt`, the captured stream that stood in for the
/// cluster daemon's own stdio routing (spec §6). `None` inherits this
/// process's stdio instead, which only the tests below use.
pub fn spawn_remote(
    host: &str,
    executable_name: &str,
    args: &[String],
    capture_path: Option<&Path>,
) -> Result<Child> {
    let mut command = if host == LOCALHOST {
        Command::new(executable_name)
    } else {
        let mut cmd = Command::new("ssh");
        cmd.arg(host).arg("--").arg(executable_name);
        cmd
    };
    command.args(args).stdin(Stdio::null());

    match capture_path {
        Some(path) => {
            let out_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening `{}` to capture worker stdio", path.display()))?;
            let err_file = out_file
                .try_clone()
                .context("cloning worker stdio capture handle")?;
            command.stdout(out_file).stderr(err_file);
        }
        None => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
    }

    command
        .spawn()
        .with_context(|| format!("spawning `{executable_name}` on `{host}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_execs_directly_without_ssh() {
        let child = spawn_remote(LOCALHOST, "true", &[], None).unwrap();
        let output = child.wait_with_output().unwrap();
        assert!(output.status.success());
    }

    #[test]
    fn nonexistent_executable_on_localhost_is_a_spawn_error() {
        assert!(spawn_remote(LOCALHOST, "pbala-definitely-not-a-real-binary", &[], None).is_err());
    }

    #[test]
    fn capture_path_appends_both_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let capture_path = dir.path().join("outfile.txt");

        let child = spawn_remote(
            LOCALHOST,
            "/bin/sh",
            &["-c".to_string(), "echo out; echo err >&2".to_string()],
            Some(&capture_path),
        )
        .unwrap();
        child.wait_with_output().unwrap();

        let contents = std::fs::read_to_string(&capture_path).unwrap();
        assert!(contents.contains("out"));
        assert!(contents.contains("err"));
    }
}
