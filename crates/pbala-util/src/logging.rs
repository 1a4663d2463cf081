//! Structured logging setup, following the prior art's `slog` + `slog-term`
//! + `slog-async` stack. `build_logger` fans every record out to two sinks:
//! a terminal drain gated by `--verbosity`, and a plain-text copy of the
//! *entire* event stream written to `outDir/report.txt` regardless of
//! verbosity, so the on-disk report always has the full operator-facing
//! history even when the terminal was run quiet.

use anyhow::{Context, Result};
use slog::{o, Drain, Level, Logger};
use std::fs::OpenOptions;
use std::path::Path;

/// Maps a `-v` repeat count (as collected by `clap`'s `ArgAction::Count`) to
/// a `slog::Level`, matching the common CLI convention of each extra `-v`
/// unlocking one more level of detail.
pub fn level_from_verbosity_count(count: u8) -> Level {
    match count {
        0 => Level::Warning,
        1 => Level::Info,
        2 => Level::Debug,
        _ => Level::Trace,
    }
}

/// Builds the dual-sink root logger. `report_path` is created if absent and
/// appended to otherwise, so re-running against the same `outDir` does not
/// clobber a previous run's report.
pub fn build_logger(terminal_level: Level, report_path: &Path) -> Result<Logger> {
    let term_decorator = slog_term::TermDecorator::new().build();
    let term_drain = slog_term::CompactFormat::new(term_decorator).build().fuse();
    let term_drain = slog::LevelFilter::new(term_drain, terminal_level).fuse();

    let report_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(report_path)
        .with_context(|| format!("opening report file `{}`", report_path.display()))?;
    let report_decorator = slog_term::PlainDecorator::new(report_file);
    let report_drain = slog_term::FullFormat::new(report_decorator).build().fuse();

    let duplicated = slog::Duplicate::new(term_drain, report_drain).fuse();
    let async_drain = slog_async::Async::new(duplicated).build().fuse();
    Ok(Logger::root(async_drain, o!()))
}

/// A terminal-only logger for the worker binary, whose stdout is already
/// inherited by the master's spawn of it (`pbala-transport::spawn_remote`)
/// and so does not need its own report file on disk.
pub fn build_terminal_logger(terminal_level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, terminal_level).fuse();
    let async_drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(async_drain, o!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::info;

    #[test]
    fn level_from_verbosity_count_escalates() {
        assert_eq!(level_from_verbosity_count(0), Level::Warning);
        assert_eq!(level_from_verbosity_count(1), Level::Info);
        assert_eq!(level_from_verbosity_count(2), Level::Debug);
        assert_eq!(level_from_verbosity_count(9), Level::Trace);
    }

    #[test]
    fn build_logger_creates_report_file_and_accepts_log_calls() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.txt");
        let logger = build_logger(Level::Info, &report_path).unwrap();
        info!(logger, "worker started"; "worker_id" => 3);
        drop(logger);
        assert!(report_path.exists());
    }

    #[test]
    fn build_logger_errors_when_report_dir_is_missing() {
        let report_path = Path::new("/nonexistent/dir/report.txt");
        assert!(build_logger(Level::Info, report_path).is_err());
    }

    #[test]
    fn build_terminal_logger_accepts_log_calls() {
        let logger = build_terminal_logger(Level::Info);
        info!(logger, "worker started"; "worker_id" => 3);
    }
}
