//! The master's FIFO saturating dispatch engine (spec §4.5): spawn phase is
//! `pbala-master::spawn`'s job; this module owns the prime/steady/drain
//! dispatch loop and close-out, against an injected [`SchedulerTransport`]
//! so the phase logic is testable without real workers — mirroring the
//! prior art's pattern of splitting scheduling policy from the async
//! send/recv plumbing around it.
//!
//! Prime, steady, and drain are not three separate code paths here: a
//! single pending-item queue and an outstanding-reply counter fall
//! naturally out of "dispatch one item per idle worker, and when a pending
//! item runs out, stop that worker instead." The same loop handles `N < W`
//! (workers run dry of items and get stopped early) and a worker dying
//! mid-run of `FORK_ERR` (spec §4.3/§9: it has already replied and
//! terminated itself, so it is simply never handed another item or a
//! `Stop` it could never receive — the queue's next item waits for
//! whichever other worker frees up next, which is the "pool shrinks by
//! one" behavior spec.md documents as accepted).

use crate::journal::Journal;
use crate::report::NodeInfoWriter;
use anyhow::Result;
use pbala_base::argv;
use pbala_base::proto::{ResultMessage, WorkMessage};
use pbala_base::{Status, TaskType, WorkItem, WorkerId};
use pbala_util::aux::AuxiliaryScriptEmitter;
use slog::Logger;
use std::collections::VecDeque;
use std::path::Path;

/// One event off the transport: either a task's terminal result, or notice
/// that a worker's connection dropped without ever sending one (a protocol
/// violation distinct from the documented `FORK_ERR`-then-exit path, which
/// always delivers its result first).
pub enum SchedulerEvent {
    Result(ResultMessage),
    Disconnected(WorkerId),
}

/// What the scheduler needs from the transport: send one message to a
/// specific worker, and block for the next event from any worker. The real
/// implementation is backed by a `Vec<Connection>` for sends and the
/// `pbala-transport::FanIn` receiver for `recv_event`.
pub trait SchedulerTransport {
    fn send_work(&mut self, worker_id: WorkerId, message: WorkMessage) -> Result<()>;
    fn recv_event(&mut self) -> Result<SchedulerEvent>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub tasks_completed: u64,
    pub tasks_unfinished: u64,
    /// Sum, across every worker, of that worker's final `totalSeconds`
    /// (spec §4.5 step 4: accumulated only at drain, since `totalSeconds`
    /// is already a per-worker running total).
    pub combined_computing_seconds: f64,
}

pub struct RunParams<'a> {
    pub worker_count: u32,
    pub task_type: TaskType,
    pub program_file: &'a Path,
    pub out_dir: &'a Path,
}

/// Runs the dispatch loop to completion against `items` (the data file's
/// work items, in file order) and `worker_count` already-greeted workers
/// numbered `0..worker_count`. Returns once every still-live worker has
/// been sent `Stop` (a worker that terminated itself after a `FORK_ERR`
/// never receives one — see module docs).
pub fn run(
    transport: &mut dyn SchedulerTransport,
    emitter: &dyn AuxiliaryScriptEmitter,
    journal: &mut Journal,
    node_info: Option<&mut NodeInfoWriter>,
    logger: &Logger,
    params: &RunParams,
    items: &[WorkItem],
) -> Result<RunSummary> {
    let mut node_info = node_info;
    let w = params.worker_count;

    let mut pending: VecDeque<usize> = (0..items.len()).collect();
    let mut outstanding: u32 = 0;
    let mut summary = RunSummary::default();
    // Workers that self-terminated after a `FORK_ERR` reply. The transport's
    // reader thread for such a worker sees the connection close right after
    // delivering that result and reports a `Disconnected` event of its own;
    // that event is expected noise here, not a protocol violation.
    let mut exited_after_fork_err: std::collections::HashSet<u32> = std::collections::HashSet::new();

    for k in 0..w {
        let worker_id = WorkerId(k);
        match pending.pop_front() {
            Some(idx) => {
                dispatch(
                    transport,
                    emitter,
                    logger,
                    node_info.as_deref_mut(),
                    params,
                    worker_id,
                    &items[idx],
                )?;
                outstanding += 1;
            }
            None => transport.send_work(worker_id, WorkMessage::Stop)?,
        }
    }

    while outstanding > 0 {
        match transport.recv_event()? {
            SchedulerEvent::Result(result) => {
                outstanding -= 1;
                let worker_id = result.worker_id;
                let fork_errored = result.status == Status::ForkErr;
                record_result(&result, journal, logger, &mut summary)?;

                if fork_errored {
                    // The worker already reported this, exited on its own,
                    // and will never read another message: don't dispatch
                    // to it and don't bother sending a `Stop` it can't
                    // receive. Its share of `totalSeconds` still counts.
                    exited_after_fork_err.insert(worker_id.0);
                    summary.combined_computing_seconds += result.total_seconds;
                } else if let Some(idx) = pending.pop_front() {
                    dispatch(
                        transport,
                        emitter,
                        logger,
                        node_info.as_deref_mut(),
                        params,
                        worker_id,
                        &items[idx],
                    )?;
                    outstanding += 1;
                } else {
                    transport.send_work(worker_id, WorkMessage::Stop)?;
                    summary.combined_computing_seconds += result.total_seconds;
                }
            }
            SchedulerEvent::Disconnected(worker_id) => {
                if !exited_after_fork_err.contains(&worker_id.0) {
                    anyhow::bail!(
                        "worker {worker_id} disconnected without sending a result for its \
                         outstanding task (protocol violation)"
                    );
                }
            }
        }
    }

    Ok(summary)
}

fn dispatch(
    transport: &mut dyn SchedulerTransport,
    emitter: &dyn AuxiliaryScriptEmitter,
    logger: &Logger,
    node_info: Option<&mut NodeInfoWriter>,
    params: &RunParams,
    worker_id: WorkerId,
    item: &WorkItem,
) -> Result<()> {
    if let Some(script_path) =
        argv::auxiliary_script_path(params.out_dir, params.task_type, item.task_number)
    {
        emitter.emit(
            params.task_type,
            params.program_file,
            &script_path,
            item.task_number,
            &item.args_csv,
        )?;
        slog::info!(logger, "CREATED_SCRIPT";
            "task_number" => item.task_number, "path" => %script_path.display());
    }

    transport.send_work(
        worker_id,
        WorkMessage::Work {
            task_number: item.task_number,
            program_file: params.program_file.to_path_buf(),
            out_dir: params.out_dir.to_path_buf(),
            args_csv: item.args_csv.clone(),
        },
    )?;
    slog::info!(logger, "TASK_SENT";
        "worker_id" => worker_id.0, "task_number" => item.task_number);

    if let Some(writer) = node_info {
        writer.record_assignment(worker_id, item.task_number)?;
    }
    Ok(())
}

fn record_result(
    result: &ResultMessage,
    journal: &mut Journal,
    logger: &Logger,
    summary: &mut RunSummary,
) -> Result<()> {
    if result.status.is_unfinished() {
        journal.append(&pbala_base::UnfinishedRecord {
            task_number: result.task_number,
            args_csv: result.args_csv.clone(),
        })?;
        summary.tasks_unfinished += 1;
        slog::warn!(logger, "ERROR";
            "worker_id" => result.worker_id.0, "task_number" => result.task_number, "status" => ?result.status);
    } else {
        summary.tasks_completed += 1;
        slog::info!(logger, "TASK_COMPLETED";
            "worker_id" => result.worker_id.0, "task_number" => result.task_number,
            "exec_seconds" => result.exec_seconds);
    }
    Ok(())
}
