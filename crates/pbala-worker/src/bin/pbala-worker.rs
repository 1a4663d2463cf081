//! Worker binary entry point. Connects back to the master, completes the
//! greeting handshake, then runs the gate/work/report cycle until told to
//! stop.

use anyhow::{Context, Result};
use clap::Parser;
use pbala_base::proto::Envelope;
use pbala_transport::Connection;
use pbala_util::logging::{build_terminal_logger, level_from_verbosity_count};
use pbala_worker::gate::{DEFAULT_SAFETY_FLOOR_KIB, ProcMemInfoProbe};
use pbala_worker::{run, RealSleeper, WorkerConfig};
use std::net::TcpStream;

#[derive(Parser)]
#[command(version, about = "PBala cluster worker")]
struct Args {
    /// Address of the master's listener, e.g. 10.0.0.1:4433.
    #[arg(long)]
    master_addr: String,

    /// Repeat for more detail (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logger = build_terminal_logger(level_from_verbosity_count(args.verbose));

    let stream = TcpStream::connect(&args.master_addr)
        .with_context(|| format!("connecting to master at `{}`", args.master_addr))?;
    let mut connection = Connection::new(stream)?;

    let greeting = match connection
        .recv()?
        .context("master closed the connection before sending a greeting")?
    {
        Envelope::Greeting(greeting) => greeting,
        other => anyhow::bail!("expected a Greeting envelope, got {other:?}"),
    };

    slog::info!(logger, "greeted"; "worker_id" => greeting.worker_id.0, "task_type" => %greeting.task_type);

    let config = WorkerConfig {
        worker_id: greeting.worker_id,
        task_type: greeting.task_type,
        max_task_size_kib: greeting.max_task_size_kib,
        create_err: greeting.create_err,
        create_mem: greeting.create_mem,
        custom_path: greeting.custom_path,
        safety_floor_kib: DEFAULT_SAFETY_FLOOR_KIB,
    };

    let probe = ProcMemInfoProbe;
    let sleeper = RealSleeper;

    run(&mut connection, &config, &probe, &sleeper, &logger)
}
