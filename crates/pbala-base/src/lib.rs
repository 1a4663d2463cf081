//! Core data model and wire-protocol types shared between the `pbala` master
//! and `pbala-worker` binaries.
//!
//! Nothing in this crate talks to a socket or a file descriptor; it only
//! defines the shapes that cross those boundaries, so that both sides of the
//! cluster agree on them by construction rather than by convention.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod argv;
pub mod proto;

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Which interpreter/compiler toolchain a task runs under. Determines argv
/// assembly (see [`argv`]) and whether an auxiliary script must be
/// pre-generated before the child is forked.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskType {
    Maple,
    C,
    Python,
    Pari,
    Sage,
    Octave,
}

impl TaskType {
    /// The numeric encoding used on the command line, matching the
    /// historical `taskType ∈ {0..5}` CLI argument.
    pub fn as_code(self) -> u8 {
        match self {
            TaskType::Maple => 0,
            TaskType::C => 1,
            TaskType::Python => 2,
            TaskType::Pari => 3,
            TaskType::Sage => 4,
            TaskType::Octave => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => TaskType::Maple,
            1 => TaskType::C,
            2 => TaskType::Python,
            3 => TaskType::Pari,
            4 => TaskType::Sage,
            5 => TaskType::Octave,
            _ => return None,
        })
    }

    /// Pari, Sage, and Octave tasks run a small auxiliary script, emitted
    /// before the fork, that binds the task id and arguments inside the
    /// target language. Maple, C, and Python pass those values directly as
    /// argv.
    pub fn requires_auxiliary_script(self) -> bool {
        matches!(self, TaskType::Pari | TaskType::Sage | TaskType::Octave)
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let code: u8 = s
            .parse()
            .map_err(|_| anyhow::anyhow!("task type must be an integer in 0..=5, got `{s}`"))?;
        TaskType::from_code(code).ok_or_else(|| anyhow::anyhow!("unknown task type code `{code}`"))
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Maple => "maple",
            TaskType::C => "c",
            TaskType::Python => "python",
            TaskType::Pari => "pari",
            TaskType::Sage => "sage",
            TaskType::Octave => "octave",
        };
        write!(f, "{name}")
    }
}

/// One line of the node file: a hostname and the number of cores (and thus
/// workers) to allocate there.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub cores: u32,
}

impl NodeSpec {
    pub fn new(hostname: impl Into<String>, cores: u32) -> Result<Self> {
        if cores == 0 {
            anyhow::bail!("node must have a positive core count");
        }
        Ok(NodeSpec {
            hostname: hostname.into(),
            cores,
        })
    }
}

/// Dense id in `[0, W)`, assigned at spawn time and stable for the run.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One line of the data file: `taskNumber,argsCsv`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_number: u64,
    pub args_csv: String,
}

impl WorkItem {
    /// Parses a single data-file line. The first comma-separated field is
    /// `taskNumber`; everything after the first comma is passed verbatim as
    /// `argsCsv`, so downstream fields may themselves contain commas (it is
    /// only the *argv* splitting in [`argv::build`] that is comma-sensitive).
    pub fn parse_line(line: &str) -> Result<Self> {
        let (num_str, rest) = line
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("data file line is missing a comma: `{line}`"))?;
        let task_number = num_str
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid task number `{num_str}` in line `{line}`"))?;
        Ok(WorkItem {
            task_number,
            args_csv: rest.to_string(),
        })
    }
}

/// Terminal status of one task, as reported by the worker that ran it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Status {
    /// Child exited with code 0.
    Ok,
    /// The worker could not fork.
    ForkErr,
    /// The admission gate persistently refused to let this task start.
    MemErr,
    /// Child exited non-zero, or was killed by a signal.
    TaskKilled,
}

impl Status {
    /// Per §7: only `ForkErr`, `MemErr`, and `TaskKilled` cause the master to
    /// journal the item as unfinished.
    pub fn is_unfinished(self) -> bool {
        !matches!(self, Status::Ok)
    }
}

/// One record appended to `unfinished_tasks.txt`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UnfinishedRecord {
    pub task_number: u64,
    pub args_csv: String,
}

impl fmt::Display for UnfinishedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.task_number, self.args_csv)
    }
}

impl FromStr for UnfinishedRecord {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let item = WorkItem::parse_line(line)?;
        Ok(UnfinishedRecord {
            task_number: item.task_number,
            args_csv: item.args_csv,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_code() {
        for code in 0u8..=5 {
            let tt = TaskType::from_code(code).unwrap();
            assert_eq!(tt.as_code(), code);
        }
        assert!(TaskType::from_code(6).is_none());
    }

    #[test]
    fn task_type_from_str_matches_cli_convention() {
        assert_eq!(TaskType::from_str("0").unwrap(), TaskType::Maple);
        assert_eq!(TaskType::from_str("5").unwrap(), TaskType::Octave);
        assert!(TaskType::from_str("six").is_err());
        assert!(TaskType::from_str("6").is_err());
    }

    #[test]
    fn node_spec_rejects_zero_cores() {
        assert!(NodeSpec::new("n1", 0).is_err());
        assert!(NodeSpec::new("n1", 4).is_ok());
    }

    #[test]
    fn work_item_parses_first_comma_as_boundary() {
        let item = WorkItem::parse_line("42,a,b,c").unwrap();
        assert_eq!(item.task_number, 42);
        assert_eq!(item.args_csv, "a,b,c");
    }

    #[test]
    fn work_item_requires_a_comma() {
        assert!(WorkItem::parse_line("42").is_err());
    }

    #[test]
    fn unfinished_record_display_round_trips_through_parse() {
        let rec = UnfinishedRecord {
            task_number: 7,
            args_csv: "x,y".to_string(),
        };
        let line = rec.to_string();
        assert_eq!(line.parse::<UnfinishedRecord>().unwrap(), rec);
    }

    #[test]
    fn status_unfinished_classification() {
        assert!(!Status::Ok.is_unfinished());
        assert!(Status::ForkErr.is_unfinished());
        assert!(Status::MemErr.is_unfinished());
        assert!(Status::TaskKilled.is_unfinished());
    }
}
