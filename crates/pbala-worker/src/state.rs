//! The worker state machine (spec §4.4): `AwaitingGreeting → AwaitingWork →
//! (Gating → Executing → Reporting → AwaitingWork)* → Terminated`. The
//! greeting itself is consumed by the caller before constructing
//! [`WorkerConfig`] (see `src/bin/pbala-worker.rs`), so this module only
//! covers the repeating gate/work/report cycle.
//!
//! Auxiliary scripts for Pari/Sage/Octave tasks are not written here: the
//! master pre-generates them into the shared output directory before ever
//! sending the work message (spec §4.5 step 2), so the worker only needs to
//! know the deterministic path one would live at.

use crate::executor::{self, ExecutionOutcome};
use crate::gate::{self, Admission, MemoryProbe};
use anyhow::{Context, Result};
use pbala_base::argv;
use pbala_base::proto::{Envelope, ResultMessage, WorkMessage};
use pbala_base::{Status, TaskType, WorkerId};
use pbala_transport::Connection;
use slog::Logger;
use std::path::PathBuf;
use std::time::Duration;

pub struct WorkerConfig {
    pub worker_id: WorkerId,
    pub task_type: TaskType,
    pub max_task_size_kib: Option<u64>,
    pub create_err: bool,
    pub create_mem: bool,
    pub custom_path: Option<PathBuf>,
    pub safety_floor_kib: u64,
}

/// Overridable so tests can skip the 60s sleep. Production code always
/// passes [`gate::BACK_OFF`].
pub trait BackOffSleeper {
    fn sleep(&self, duration: Duration);
}

pub struct RealSleeper;
impl BackOffSleeper for RealSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Runs the gate/work/report cycle until a `Stop` message is received.
/// Returns normally on a clean `Stop`; any other outcome (protocol error,
/// connection drop) is an `Err`.
pub fn run(
    connection: &mut Connection,
    config: &WorkerConfig,
    probe: &dyn MemoryProbe,
    sleeper: &dyn BackOffSleeper,
    logger: &Logger,
) -> Result<()> {
    loop {
        loop {
            match gate::gate(probe, config.max_task_size_kib, config.safety_floor_kib)? {
                Admission::Admit => break,
                Admission::Refuse => {
                    slog::info!(logger, "admission gate refused, backing off";
                        "worker_id" => config.worker_id.0);
                    sleeper.sleep(gate::BACK_OFF);
                }
            }
        }

        let envelope = connection
            .recv()?
            .context("connection closed while awaiting work")?;
        let work = match envelope {
            Envelope::Work(work) => work,
            other => anyhow::bail!("expected a Work envelope, got {other:?}"),
        };

        match work {
            WorkMessage::Stop => {
                slog::info!(logger, "received stop"; "worker_id" => config.worker_id.0);
                return Ok(());
            }
            WorkMessage::Work {
                task_number,
                program_file,
                out_dir,
                args_csv,
            } => {
                let result = run_one_task(
                    config,
                    task_number,
                    &program_file,
                    &out_dir,
                    &args_csv,
                    logger,
                )?;
                let fork_failed = result.status == Status::ForkErr;
                connection.send(Envelope::Result(result))?;
                if fork_failed {
                    // Spec §4.3/§9: a worker that cannot fork reports the
                    // failure once and terminates; the master's scheduler
                    // stops dispatching to this worker id for the rest of
                    // the run rather than waiting on a reply that will
                    // never come.
                    slog::warn!(logger, "fork failed, terminating worker";
                        "worker_id" => config.worker_id.0);
                    return Ok(());
                }
            }
        }
    }
}

fn run_one_task(
    config: &WorkerConfig,
    task_number: u64,
    program_file: &std::path::Path,
    out_dir: &std::path::Path,
    args_csv: &str,
    logger: &Logger,
) -> Result<ResultMessage> {
    let program_path = argv::resolve_program_path(program_file, config.custom_path.as_deref());
    let aux_script_path = argv::auxiliary_script_path(out_dir, config.task_type, task_number);

    let argv_vec = argv::build(
        config.task_type,
        program_path,
        aux_script_path.as_deref(),
        task_number,
        args_csv,
    )?;

    let out_path = out_dir.join(format!("{task_number}_out.txt"));
    let err_path = config
        .create_err
        .then(|| out_dir.join(format!("{task_number}_err.txt")));

    let ExecutionOutcome {
        status,
        exec_seconds,
    } = executor::run_task(&argv_vec, &out_path, err_path.as_deref())?;

    let total_seconds = executor::cumulative_child_seconds()?;

    if config.create_mem && status != Status::ForkErr {
        write_mem_file(out_dir, task_number, status, exec_seconds, total_seconds)?;
    }

    slog::info!(logger, "task finished";
        "task_number" => task_number, "status" => ?status, "worker_id" => config.worker_id.0);

    Ok(ResultMessage {
        worker_id: config.worker_id,
        task_number,
        status,
        args_csv: args_csv.to_string(),
        exec_seconds,
        total_seconds,
    })
}

fn write_mem_file(
    out_dir: &std::path::Path,
    task_number: u64,
    status: Status,
    exec_seconds: Option<f64>,
    total_seconds: f64,
) -> Result<()> {
    let path = out_dir.join(format!("{task_number}_mem.txt"));
    let exec_seconds_str = exec_seconds
        .map(|s| format!("{s:.3}"))
        .unwrap_or_else(|| "n/a".to_string());
    let contents = format!(
        "task {task_number}: status={status:?} execSeconds={exec_seconds_str} totalSeconds={total_seconds:.3}\n"
    );
    std::fs::write(&path, contents)
        .with_context(|| format!("writing resource-usage record `{}`", path.display()))
}
