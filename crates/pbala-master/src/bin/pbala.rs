//! Master binary entry point (spec §4.5, §6). Parses the CLI, layers
//! configuration CLI > env > file (the prior art's `figment` convention),
//! then runs spawn → prime/steady/drain → close-out, or the standalone
//! `--kill` operator command.

use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    error::Kind,
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use pbala_base::{NodeSpec, TaskType};
use pbala_master::scheduler::{RunParams, SchedulerTransport};
use pbala_master::spawn::{kill_cluster, spawn_cluster, SpawnParams};
use pbala_master::transport::LiveTransport;
use pbala_master::{journal::Journal, parsing, report::NodeInfoWriter, scheduler};
use pbala_util::aux::DefaultAuxiliaryScriptEmitter;
use pbala_util::exit::ExitCode;
use pbala_util::logging::{build_logger, level_from_verbosity_count};
use serde::{Deserialize, Serialize};
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Instant;

/// PBala: a distributed SPMD job dispatcher for a small heterogeneous
/// compute cluster.
#[derive(Parser)]
#[command(
    version,
    about = "PBala cluster master",
    after_help = "Configuration values can be set in a config file, environment \
variables (prefixed PBALA_), or command-line options, in increasing order of \
precedence."
)]
struct CliOptions {
    /// Task type code, 0..=5 (Maple, C, Python, Pari, Sage, Octave).
    task_type: Option<TaskType>,

    /// Path to the target program.
    program_file: Option<PathBuf>,

    /// Path to the data file (one task per line, `taskNumber,argsCsv`).
    data_file: Option<PathBuf>,

    /// Path to the node file (one node per line, `hostname cores`).
    node_file: Option<PathBuf>,

    /// Directory for per-task output, logs, and the unfinished-task journal.
    out_dir: Option<PathBuf>,

    /// Refuse to admit a task unless this many KiB remain free afterward.
    #[arg(long)]
    max_mem_size: Option<u64>,

    /// Run exactly one Maple worker per node regardless of core count, since
    /// Maple kernels contend heavily for memory when several share a host.
    #[arg(long)]
    maple_single_core: bool,

    /// Capture each task's stderr to `<taskNumber>_err.txt`.
    #[arg(long)]
    create_errfiles: bool,

    /// Write a resource-usage record to `<taskNumber>_mem.txt` per task.
    #[arg(long)]
    create_memfiles: bool,

    /// Write `node_info.txt`, a node/task assignment log.
    #[arg(long)]
    create_slavefile: bool,

    /// Resolve every task's program path to this instead of `program_file`.
    #[arg(long)]
    custom_process: Option<PathBuf>,

    /// Tear down a previously spawned cluster by reading `out_dir`'s pid
    /// registry and exit; no other argument except `out_dir` is required.
    #[arg(long)]
    kill: bool,

    /// Repeat for more terminal detail (-v, -vv, -vvv). `report.txt` always
    /// gets the full event stream regardless of this setting.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file layered beneath environment variables and CLI
    /// flags.
    #[arg(short = 'c', long, default_value = ".config/pbala.toml")]
    config_file: PathBuf,
}

impl CliOptions {
    fn to_config_options(&self) -> ConfigOptions {
        ConfigOptions {
            task_type: self.task_type,
            program_file: self.program_file.clone(),
            data_file: self.data_file.clone(),
            node_file: self.node_file.clone(),
            out_dir: self.out_dir.clone(),
            max_mem_size: self.max_mem_size,
            maple_single_core: self.maple_single_core.then_some(true),
            create_errfiles: self.create_errfiles.then_some(true),
            create_memfiles: self.create_memfiles.then_some(true),
            create_slavefile: self.create_slavefile.then_some(true),
            custom_process: self.custom_process.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Config {
    task_type: TaskType,
    program_file: PathBuf,
    data_file: PathBuf,
    node_file: PathBuf,
    out_dir: PathBuf,
    max_mem_size: Option<u64>,
    #[serde(default)]
    maple_single_core: bool,
    #[serde(default)]
    create_errfiles: bool,
    #[serde(default)]
    create_memfiles: bool,
    #[serde(default)]
    create_slavefile: bool,
    custom_process: Option<PathBuf>,
}

#[derive(Default, Serialize)]
struct ConfigOptions {
    task_type: Option<TaskType>,
    program_file: Option<PathBuf>,
    data_file: Option<PathBuf>,
    node_file: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    max_mem_size: Option<u64>,
    maple_single_core: Option<bool>,
    create_errfiles: Option<bool>,
    create_memfiles: Option<bool>,
    create_slavefile: Option<bool>,
    custom_process: Option<PathBuf>,
}

fn main() -> Result<std::process::ExitCode> {
    let cli = CliOptions::parse();

    if cli.kill {
        let out_dir = cli
            .out_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--kill requires an out-dir argument"))?;
        let killed = kill_cluster(&out_dir)?;
        println!("sent kill signals to {killed} worker processes");
        return Ok(ExitCode::Success.into());
    }

    let config: Config = Figment::new()
        .merge(Serialized::defaults(ConfigOptions::default()))
        .merge(Toml::file(&cli.config_file))
        .merge(Env::prefixed("PBALA_"))
        .merge(Serialized::globals(cli.to_config_options()))
        .extract()
        .map_err(|mut e| {
            if let Kind::MissingField(field) = &e.kind {
                e.kind = Kind::Message(format!("missing required argument `{field}`"));
            }
            e
        });

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return Ok(ExitCode::ArgumentError.into());
        }
    };

    match run(&config, cli.verbose) {
        Ok(code) => Ok(code.into()),
        Err((code, err)) => {
            eprintln!("{err:#}");
            Ok(code.into())
        }
    }
}

/// The body of a run, once arguments are resolved. Returns the `ExitCode`
/// to exit with alongside any error to print, matching the taxonomy in
/// spec.md §7: argument/validation errors never touch the cluster, cluster
/// init and spawn errors halt it, and per-task failures never reach here at
/// all (they are journaled `Status` values, not `Err`s).
fn run(config: &Config, verbosity: u8) -> std::result::Result<ExitCode, (ExitCode, anyhow::Error)> {
    let start = Instant::now();

    std::fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("creating out-dir `{}`", config.out_dir.display()))
        .map_err(|e| (ExitCode::OutputDirectoryError, e))?;

    let report_path = config.out_dir.join("report.txt");
    let logger = build_logger(level_from_verbosity_count(verbosity), &report_path)
        .map_err(|e| (ExitCode::OutputDirectoryError, e))?;

    let node_contents = std::fs::read_to_string(&config.node_file)
        .with_context(|| format!("reading node file `{}`", config.node_file.display()))
        .map_err(|e| (ExitCode::NodeFileError, e))?;
    let mut nodes = parsing::parse_node_file(&node_contents).map_err(|e| (ExitCode::NodeFileError, e))?;
    parsing::apply_maple_single_core_override(&mut nodes, config.task_type, config.maple_single_core);

    let data_contents = std::fs::read_to_string(&config.data_file)
        .with_context(|| format!("reading data file `{}`", config.data_file.display()))
        .map_err(|e| (ExitCode::DataFileError, e))?;
    let items = parsing::parse_data_file(&data_contents).map_err(|e| (ExitCode::DataFileError, e))?;

    let worker_count: u32 = nodes.iter().map(|n: &NodeSpec| n.cores).sum();

    let listener = TcpListener::bind("0.0.0.0:0")
        .context("binding the master's listener")
        .map_err(|e| (ExitCode::ClusterInitError, e))?;
    let master_addr = listener
        .local_addr()
        .context("reading the listener's local address")
        .map_err(|e| (ExitCode::ClusterInitError, e))?;

    let worker_binary = worker_binary_path();

    let spawn_params = SpawnParams {
        worker_binary,
        master_addr,
        verbosity,
        task_type: config.task_type,
        max_task_size_kib: config.max_mem_size,
        create_err: config.create_errfiles,
        create_mem: config.create_memfiles,
        custom_path: config.custom_process.clone(),
    };

    let workers = spawn_cluster(&listener, &nodes, &spawn_params, &config.out_dir, &logger)
        .map_err(|e| (ExitCode::SpawnError, e))?;

    let (mut transport, children) =
        LiveTransport::new(workers).map_err(|e| (ExitCode::SpawnError, e))?;

    let mut journal = Journal::create(&config.out_dir).map_err(|e| (ExitCode::OutputDirectoryError, e))?;
    let mut node_info = if config.create_slavefile {
        Some(
            NodeInfoWriter::create(&config.out_dir, &nodes)
                .map_err(|e| (ExitCode::OutputDirectoryError, e))?,
        )
    } else {
        None
    };

    let emitter = DefaultAuxiliaryScriptEmitter;
    let run_params = RunParams {
        worker_count,
        task_type: config.task_type,
        program_file: &config.program_file,
        out_dir: &config.out_dir,
    };

    let summary = scheduler::run(
        &mut transport as &mut dyn SchedulerTransport,
        &emitter,
        &mut journal,
        node_info.as_mut(),
        &logger,
        &run_params,
        &items,
    )
    .map_err(|e| (ExitCode::SpawnError, e))?;

    drop(node_info);
    journal
        .close_out()
        .map_err(|e| (ExitCode::OutputDirectoryError, e))?;
    remove_auxiliary_scripts(&config.out_dir).map_err(|e| (ExitCode::AuxiliaryScriptError, e))?;
    reap_children(children);

    let wall_seconds = start.elapsed().as_secs_f64();
    slog::info!(logger, "INFO"; "event" => "run complete",
        "tasks_completed" => summary.tasks_completed,
        "tasks_unfinished" => summary.tasks_unfinished,
        "wall_seconds" => wall_seconds,
        "combined_computing_seconds" => summary.combined_computing_seconds);
    println!(
        "completed {} task(s), {} unfinished, wall {:.3}s, combined computing {:.3}s",
        summary.tasks_completed, summary.tasks_unfinished, wall_seconds, summary.combined_computing_seconds
    );

    Ok(ExitCode::Success)
}

/// Resolves the worker binary, preferring one installed alongside this
/// executable (the usual deployment layout) and falling back to bare
/// `pbala-worker` resolved off `PATH` by `spawn_remote`/`ssh` on the remote
/// end.
fn worker_binary_path() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("pbala-worker")))
        .filter(|path| path.exists())
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "pbala-worker".to_string())
}

/// Deletes transient auxiliary scripts per spec §4.5 step 5: any file in
/// `out_dir` whose name contains the sentinel `auxprog`.
fn remove_auxiliary_scripts(out_dir: &std::path::Path) -> Result<()> {
    for entry in std::fs::read_dir(out_dir)
        .with_context(|| format!("reading out-dir `{}`", out_dir.display()))?
    {
        let entry = entry?;
        if entry
            .file_name()
            .to_string_lossy()
            .contains(pbala_base::argv::AUXILIARY_SENTINEL)
        {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("removing auxiliary script `{}`", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Best-effort reap: a worker that quiesced cleanly has already exited by
/// the time the drain phase returns, so this mostly just collects zombies.
fn reap_children(children: Vec<std::process::Child>) {
    for mut child in children {
        let _ = child.wait();
    }
}

#[test]
fn test_cli() {
    use clap::CommandFactory;
    CliOptions::command().debug_assert()
}
