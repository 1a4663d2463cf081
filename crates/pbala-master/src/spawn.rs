//! Spawn phase (spec §4.5 step 1): launch one `pbala-worker` process per
//! core across every node, accept each one's back-connection, and assign
//! dense worker ids in acceptance order. A worker's id is not decided until
//! its greeting goes out, since accept order need not match spawn order
//! (ssh dial time varies node to node).

use anyhow::{Context, Result};
use pbala_base::proto::GreetingMessage;
use pbala_base::{NodeSpec, TaskType, WorkerId};
use pbala_transport::{spawn_remote, Connection};
use slog::Logger;
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::Child;

/// Name of the pid registry `--kill` reads back to tear down a cluster it
/// did not itself spawn (a fresh invocation of the operator's `--kill`
/// command, per spec §5's "operator command to tear down the cluster
/// externally").
pub const WORKER_PID_FILE: &str = "worker_pids.txt";

pub struct SpawnedWorker {
    pub worker_id: WorkerId,
    pub connection: Connection,
    pub child: Child,
}

pub struct SpawnParams {
    pub worker_binary: String,
    pub master_addr: SocketAddr,
    pub verbosity: u8,
    pub task_type: TaskType,
    pub max_task_size_kib: Option<u64>,
    pub create_err: bool,
    pub create_mem: bool,
    pub custom_path: Option<PathBuf>,
}

/// Abstracts over [`spawn_remote`] so the unwind-on-failure path below is
/// testable without real ssh/process plumbing.
trait WorkerSpawner {
    fn spawn(&self, hostname: &str, args: &[String]) -> Result<Child>;
}

/// Spawns through [`spawn_remote`], capturing stdio into `outfile_path`
/// (spec §6's captured worker-stdio stream, now that there is no cluster
/// daemon to route it through).
struct RealWorkerSpawner<'a> {
    worker_binary: &'a str,
    outfile_path: &'a Path,
}

impl WorkerSpawner for RealWorkerSpawner<'_> {
    fn spawn(&self, hostname: &str, args: &[String]) -> Result<Child> {
        spawn_remote(hostname, self.worker_binary, args, Some(self.outfile_path))
    }
}

/// Spawns `sum(node.cores)` worker processes across `nodes`, in node-file
/// order, then blocks accepting that many back-connections on `listener`,
/// greeting each one as it arrives. Returns one [`SpawnedWorker`] per
/// accepted connection, numbered `0..worker_count` by acceptance order.
/// Writes `outDir/worker_pids.txt` (hostname + pid, one per launched
/// process) as it goes, since that association is only available here —
/// once workers are paired to accepted connections it no longer matters
/// which `Child` is which (see [`SpawnedWorker`]'s field comment below).
pub fn spawn_cluster(
    listener: &TcpListener,
    nodes: &[NodeSpec],
    params: &SpawnParams,
    out_dir: &Path,
    logger: &Logger,
) -> Result<Vec<SpawnedWorker>> {
    let outfile_path = out_dir.join("outfile.txt");
    let spawner = RealWorkerSpawner {
        worker_binary: &params.worker_binary,
        outfile_path: &outfile_path,
    };
    spawn_cluster_with(listener, nodes, params, &spawner, out_dir, logger)
}

fn spawn_cluster_with(
    listener: &TcpListener,
    nodes: &[NodeSpec],
    params: &SpawnParams,
    spawner: &dyn WorkerSpawner,
    out_dir: &Path,
    logger: &Logger,
) -> Result<Vec<SpawnedWorker>> {
    let worker_count: u32 = nodes.iter().map(|n| n.cores).sum();
    // Paired with the hostname each child was launched on so a later spawn
    // failure can be unwound (spec §4.5 step 1: "If any spawn fails, halt
    // the cluster"): a `Child` alone isn't enough to kill a remote process,
    // since that takes an `ssh <hostname> -- kill` rather than a local wait.
    let mut children: Vec<(String, Child)> = Vec::with_capacity(worker_count as usize);

    let pid_file_path = out_dir.join(WORKER_PID_FILE);
    let mut pid_file = std::fs::File::create(&pid_file_path)
        .with_context(|| format!("creating `{}`", pid_file_path.display()))?;

    for node in nodes {
        for _ in 0..node.cores {
            let mut args = vec!["--master-addr".to_string(), params.master_addr.to_string()];
            if params.verbosity > 0 {
                args.push(format!("-{}", "v".repeat(params.verbosity as usize)));
            }
            let child = match spawner.spawn(&node.hostname, &args) {
                Ok(child) => child,
                Err(err) => {
                    // Halt the cluster: kill every worker already spawned
                    // before propagating, so a later host's failure can't
                    // leak the earlier ones running forever.
                    for (hostname, child) in &children {
                        kill_process(hostname, child.id());
                    }
                    return Err(err)
                        .with_context(|| format!("spawning worker on `{}`", node.hostname));
                }
            };
            slog::info!(logger, "CREATED_SLAVE"; "hostname" => %node.hostname);
            writeln!(pid_file, "{} {}", node.hostname, child.id())
                .context("writing worker pid registry")?;
            children.push((node.hostname.clone(), child));
        }
    }

    let mut workers = Vec::with_capacity(worker_count as usize);
    for k in 0..worker_count {
        let (stream, peer) = listener
            .accept()
            .context("accepting a worker's back-connection")?;
        let mut connection = Connection::new(stream)?;
        let worker_id = WorkerId(k);

        connection.send(GreetingMessage {
            worker_id,
            task_type: params.task_type,
            max_task_size_kib: params.max_task_size_kib,
            create_err: params.create_err,
            create_mem: params.create_mem,
            custom_path: params.custom_path.clone(),
        })?;
        slog::info!(logger, "greeted worker"; "worker_id" => worker_id.0, "peer" => %peer);

        // Which `Child` pairs with which accepted connection doesn't matter:
        // we only keep them around to reap or kill later, not to identify a
        // worker by process handle.
        workers.push(SpawnedWorker {
            worker_id,
            connection,
            child: children.remove(0).1,
        });
    }

    Ok(workers)
}

/// Signals one process by pid, localhost directly and everything else over
/// `ssh`. Shared by the spawn-failure unwind above and [`kill_cluster`]
/// below; best-effort, since a process that has already exited is not an
/// error either caller needs to report.
fn kill_process(hostname: &str, pid: u32) {
    if hostname == pbala_transport::spawn::LOCALHOST {
        let _ = std::process::Command::new("kill").arg("-9").arg(pid.to_string()).status();
    } else {
        let _ = std::process::Command::new("ssh")
            .arg(hostname)
            .arg("--")
            .arg("kill")
            .arg("-9")
            .arg(pid.to_string())
            .status();
    }
}

/// The operator `--kill` command (spec §5: "exposes the `--kill` operator
/// command to tear down the cluster externally"). Reads the pid registry a
/// prior run's [`spawn_cluster`] left in `out_dir` and signals every
/// process it names, localhost directly and everything else over `ssh`.
/// Returns the number of kill attempts issued; a process that already
/// exited is not treated as an error (the registry is best-effort, not a
/// liveness guarantee).
pub fn kill_cluster(out_dir: &Path) -> Result<u32> {
    let pid_file_path = out_dir.join(WORKER_PID_FILE);
    let contents = std::fs::read_to_string(&pid_file_path)
        .with_context(|| format!("reading `{}`", pid_file_path.display()))?;

    let mut killed = 0;
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (hostname, pid_str) = line
            .split_once(' ')
            .ok_or_else(|| anyhow::anyhow!("malformed worker pid registry line: `{line}`"))?;
        let pid: u32 = pid_str
            .parse()
            .with_context(|| format!("invalid pid `{pid_str}` in line `{line}`"))?;
        kill_process(hostname, pid);
        killed += 1;
    }
    Ok(killed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    /// Succeeds by spawning a real (trivial) local process the first
    /// `successes` calls, then fails every call after that — deterministic,
    /// unlike relying on a real ssh/binary-not-found failure.
    struct FlakySpawner {
        remaining_successes: Cell<u32>,
    }

    impl WorkerSpawner for FlakySpawner {
        fn spawn(&self, _hostname: &str, _args: &[String]) -> Result<Child> {
            let remaining = self.remaining_successes.get();
            if remaining == 0 {
                anyhow::bail!("simulated spawn failure");
            }
            self.remaining_successes.set(remaining - 1);
            std::process::Command::new("sleep")
                .arg("5")
                .spawn()
                .context("spawning the simulated worker")
        }
    }

    #[test]
    fn spawn_failure_kills_already_spawned_children() {
        let dir = tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let nodes = vec![NodeSpec::new(pbala_transport::spawn::LOCALHOST, 2).unwrap()];
        let params = SpawnParams {
            worker_binary: "unused".to_string(),
            master_addr: listener.local_addr().unwrap(),
            verbosity: 0,
            task_type: TaskType::C,
            max_task_size_kib: None,
            create_err: false,
            create_mem: false,
            custom_path: None,
        };
        let logger = Logger::root(slog::Discard, slog::o!());
        let spawner = FlakySpawner {
            remaining_successes: Cell::new(1),
        };

        let result = spawn_cluster_with(&listener, &nodes, &params, &spawner, dir.path(), &logger);
        assert!(result.is_err());

        let pid_file = std::fs::read_to_string(dir.path().join(WORKER_PID_FILE)).unwrap();
        let first_pid = pid_file.lines().next().unwrap().split_once(' ').unwrap().1;

        // SIGKILL delivery isn't synchronous with `kill` returning; poll
        // briefly rather than asserting the instant spawn_cluster_with returns.
        let mut still_alive = true;
        for _ in 0..20 {
            let status = std::process::Command::new("kill")
                .arg("-0")
                .arg(first_pid)
                .status()
                .unwrap();
            if !status.success() {
                still_alive = false;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(
            !still_alive,
            "already-spawned worker should be killed when a later spawn fails"
        );
    }

    #[test]
    fn kill_cluster_reads_the_registry_and_signals_each_pid() {
        let dir = tempdir().unwrap();
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        let pid = child.id();

        std::fs::write(
            dir.path().join(WORKER_PID_FILE),
            format!("{} {}\n", pbala_transport::spawn::LOCALHOST, pid),
        )
        .unwrap();

        let killed = kill_cluster(dir.path()).unwrap();
        assert_eq!(killed, 1);

        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn kill_cluster_errors_when_registry_is_missing() {
        let dir = tempdir().unwrap();
        assert!(kill_cluster(dir.path()).is_err());
    }
}
