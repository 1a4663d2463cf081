//! Fork + redirect stdio + exec + reap (spec §4.3). Ordinary `fork`/`execvp`
//! rather than a namespace-isolated clone: PBala runs trusted cluster jobs,
//! and isolating them from each other is out of scope here.

use anyhow::{Context, Result};
use nix::sys::wait::WaitStatus;
use nix::unistd::ForkResult;
use pbala_base::Status;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Outcome of running one task's child process.
pub struct ExecutionOutcome {
    pub status: Status,
    /// `None` only when `status == ForkErr` (no child ever ran).
    pub exec_seconds: Option<f64>,
}

/// Runs one task to completion. `out_path`/`err_path` are the per-task
/// stdio redirection targets; `err_path` is only opened when `Some` (spec:
/// "if `createErr` is set... else discards").
pub fn run_task(
    argv: &[String],
    out_path: &Path,
    err_path: Option<&Path>,
) -> Result<ExecutionOutcome> {
    let out_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_path)
        .with_context(|| format!("opening stdout redirect `{}`", out_path.display()))?;
    let err_file = match err_path {
        Some(path) => Some(
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .with_context(|| format!("opening stderr redirect `{}`", path.display()))?,
        ),
        None => None,
    };

    let argv_cstrings = build_argv_cstrings(argv)?;
    let before_seconds = cumulative_child_seconds()?;

    // Safety: between fork and exec the child only touches async-signal-safe
    // syscalls (dup2, execvp) plus process exit; no allocation happens on
    // the child's path once past `build_argv_cstrings`, which ran before
    // the fork.
    match unsafe { nix::unistd::fork() } {
        Err(_) => Ok(ExecutionOutcome {
            status: Status::ForkErr,
            exec_seconds: None,
        }),
        Ok(ForkResult::Child) => {
            run_child(&out_file, err_file.as_ref(), &argv_cstrings);
            unreachable!("run_child never returns");
        }
        Ok(ForkResult::Parent { child }) => {
            let wait_status = nix::sys::wait::waitpid(child, None)
                .context("waiting for child task")?;
            let after_seconds = cumulative_child_seconds()?;
            let status = match wait_status {
                WaitStatus::Exited(_, 0) => Status::Ok,
                _ => Status::TaskKilled,
            };
            Ok(ExecutionOutcome {
                status,
                exec_seconds: Some((after_seconds - before_seconds).max(0.0)),
            })
        }
    }
}

fn build_argv_cstrings(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|arg| CString::new(arg.as_str()).with_context(|| format!("argument `{arg}` contains a NUL byte")))
        .collect()
}

/// Never returns: redirects stdio, execs, and `_exit`s with a non-zero code
/// if `execvp` fails.
fn run_child(out_file: &File, err_file: Option<&File>, argv: &[CString]) -> ! {
    unsafe {
        let _ = nix::unistd::dup2(out_file.as_raw_fd(), libc::STDOUT_FILENO);
        match err_file {
            Some(f) => {
                let _ = nix::unistd::dup2(f.as_raw_fd(), libc::STDERR_FILENO);
            }
            None => {
                if let Ok(devnull) = File::open("/dev/null") {
                    let _ = nix::unistd::dup2(devnull.as_raw_fd(), libc::STDERR_FILENO);
                }
            }
        }
    }
    let err = nix::unistd::execvp(&argv[0], argv).unwrap_err();
    eprintln!("exec of `{:?}` failed: {err}", argv[0]);
    std::process::exit(127);
}

/// `getrusage(RUSAGE_CHILDREN)` aggregates over every child this process has
/// ever reaped, so reading it before and after one `waitpid` and taking the
/// difference yields that child's own user+system time, and reading it
/// after every task gives the monotonically increasing `totalSeconds`
/// figure the worker reports (spec §4.3/§9: "keep it local to the worker
/// loop").
pub fn cumulative_child_seconds() -> Result<f64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) };
    anyhow::ensure!(rc == 0, "getrusage(RUSAGE_CHILDREN) failed");
    let user = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0;
    let system = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1_000_000.0;
    Ok(user + system)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serial_test::serial;
    use tempfile::tempdir;

    fn run(argv: &[&str], create_err: bool) -> (ExecutionOutcome, String, Option<String>) {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("out.txt");
        let err_path = dir.path().join("err.txt");
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let outcome = run_task(
            &argv,
            &out_path,
            create_err.then_some(err_path.as_path()),
        )
        .unwrap();
        let out = std::fs::read_to_string(&out_path).unwrap();
        let err = create_err.then(|| std::fs::read_to_string(&err_path).unwrap());
        (outcome, out, err)
    }

    #[test]
    #[serial]
    fn exits_zero_is_ok() {
        let (outcome, _, _) = run(&["/bin/sh", "-c", "exit 0"], false);
        assert_matches!(outcome.status, Status::Ok);
        assert!(outcome.exec_seconds.is_some());
    }

    #[test]
    #[serial]
    fn exits_nonzero_is_task_killed() {
        let (outcome, _, _) = run(&["/bin/sh", "-c", "exit 7"], false);
        assert_matches!(outcome.status, Status::TaskKilled);
    }

    #[test]
    #[serial]
    fn killed_by_signal_is_task_killed() {
        let (outcome, _, _) = run(&["/bin/sh", "-c", "kill -9 $$"], false);
        assert_matches!(outcome.status, Status::TaskKilled);
    }

    #[test]
    #[serial]
    fn stdout_is_redirected_to_the_out_file() {
        let (outcome, out, _) = run(&["/bin/sh", "-c", "echo hello"], false);
        assert_eq!(outcome.status, Status::Ok);
        assert_eq!(out, "hello\n");
    }

    #[test]
    #[serial]
    fn stderr_is_redirected_only_when_requested() {
        let (_, _, err) = run(&["/bin/sh", "-c", "echo oops >&2"], true);
        assert_eq!(err.unwrap(), "oops\n");
    }

    #[test]
    #[serial]
    fn exec_failure_exits_nonzero_and_is_task_killed() {
        let (outcome, _, _) = run(&["/pbala-definitely-not-a-real-binary"], false);
        assert_eq!(outcome.status, Status::TaskKilled);
    }
}
