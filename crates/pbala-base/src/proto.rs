//! Wire-protocol messages exchanged between master and worker.
//!
//! Each message is a variant of [`Envelope`], which is what actually crosses
//! the transport (see `pbala-transport`). Modeling the wire `tag` as an enum
//! variant, rather than a side-channel integer paired with a blob, means a
//! decode failure (including "this looks like the wrong message for this
//! tag") is a single `bincode` error instead of two independent checks that
//! could disagree.

use crate::{Status, TaskType, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sent once, master to worker, immediately after the worker connects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GreetingMessage {
    pub worker_id: WorkerId,
    pub task_type: TaskType,
    /// Biggest task's estimated memory footprint, in KiB, when the
    /// admission gate runs in `Specific` mode. `None` means `Generic` mode.
    pub max_task_size_kib: Option<u64>,
    pub create_err: bool,
    pub create_mem: bool,
    pub custom_path: Option<PathBuf>,
}

/// One line of work, or the signal to quiesce.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkMessage {
    Work {
        task_number: u64,
        program_file: PathBuf,
        out_dir: PathBuf,
        args_csv: String,
    },
    Stop,
}

/// Worker to master, one per `WorkMessage::Work` received (never sent in
/// response to `Stop`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub worker_id: WorkerId,
    pub task_number: u64,
    pub status: Status,
    pub args_csv: String,
    /// Set unless `status` is `ForkErr` (the child never ran, so there is no
    /// exec time to report) or `MemErr` (the gate refused before any fork
    /// was attempted).
    pub exec_seconds: Option<f64>,
    /// Cumulative user+system time across every task this worker has run,
    /// monotonically increasing for the life of the worker.
    pub total_seconds: f64,
}

/// Every message that can cross the transport, tagged by variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    Greeting(GreetingMessage),
    Work(WorkMessage),
    Result(ResultMessage),
}

impl From<GreetingMessage> for Envelope {
    fn from(msg: GreetingMessage) -> Self {
        Envelope::Greeting(msg)
    }
}

impl From<WorkMessage> for Envelope {
    fn from(msg: WorkMessage) -> Self {
        Envelope::Work(msg)
    }
}

impl From<ResultMessage> for Envelope {
    fn from(msg: ResultMessage) -> Self {
        Envelope::Result(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_bincode() {
        let original: Envelope = ResultMessage {
            worker_id: WorkerId(3),
            task_number: 42,
            status: Status::Ok,
            args_csv: "a,b,c".to_string(),
            exec_seconds: Some(1.5),
            total_seconds: 9.0,
        }
        .into();
        let bytes = bincode::serialize(&original).unwrap();
        let decoded: Envelope = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn greeting_carries_every_field_the_worker_must_unpack() {
        let greeting = GreetingMessage {
            worker_id: WorkerId(0),
            task_type: TaskType::C,
            max_task_size_kib: Some(1024),
            create_err: true,
            create_mem: true,
            custom_path: Some(PathBuf::from("/opt/custom")),
        };
        let bytes = bincode::serialize(&Envelope::Greeting(greeting.clone())).unwrap();
        match bincode::deserialize::<Envelope>(&bytes).unwrap() {
            Envelope::Greeting(decoded) => assert_eq!(decoded, greeting),
            other => panic!("expected Greeting, got {other:?}"),
        }
    }
}
