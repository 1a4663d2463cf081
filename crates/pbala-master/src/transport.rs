//! The real [`SchedulerTransport`](crate::scheduler::SchedulerTransport),
//! backed by one live `Connection` per worker for sends and a
//! `pbala-transport::FanIn` for receiving results and disconnect notices.
//! Everything decision-shaped lives in `scheduler`; this module only wires
//! that trait to actual sockets.

use crate::scheduler::{SchedulerEvent, SchedulerTransport};
use crate::spawn::SpawnedWorker;
use anyhow::{Context, Result};
use pbala_base::proto::WorkMessage;
use pbala_base::WorkerId;
use pbala_transport::{Connection, FanIn, FanInEvent};
use std::process::Child;

pub struct LiveTransport {
    senders: Vec<Option<Connection>>,
    fan_in: FanIn,
}

impl LiveTransport {
    /// Takes ownership of every spawned worker's connection, handing one
    /// clone to a dedicated reader thread and keeping the other half for
    /// sends. Returns the transport plus the `Child` handles, in worker-id
    /// order, for the caller to reap at close-out.
    pub fn new(workers: Vec<SpawnedWorker>) -> Result<(Self, Vec<Child>)> {
        let mut senders = Vec::with_capacity(workers.len());
        let mut children = Vec::with_capacity(workers.len());
        let mut fan_in = FanIn::new();

        for worker in workers {
            let reader_conn = worker
                .connection
                .try_clone()
                .with_context(|| format!("cloning connection for worker {}", worker.worker_id))?;
            fan_in.spawn_reader(worker.worker_id, reader_conn);
            senders.push(Some(worker.connection));
            children.push(worker.child);
        }

        Ok((LiveTransport { senders, fan_in }, children))
    }
}

impl SchedulerTransport for LiveTransport {
    fn send_work(&mut self, worker_id: WorkerId, message: WorkMessage) -> Result<()> {
        let slot = self
            .senders
            .get_mut(worker_id.0 as usize)
            .ok_or_else(|| anyhow::anyhow!("no such worker {worker_id}"))?;
        let conn = slot
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("worker {worker_id} has already disconnected"))?;
        conn.send(message)
    }

    fn recv_event(&mut self) -> Result<SchedulerEvent> {
        match self
            .fan_in
            .receiver
            .recv()
            .context("every worker's reader thread has exited")?
        {
            FanInEvent::Result(msg) => Ok(SchedulerEvent::Result(msg)),
            FanInEvent::Disconnected { worker_id, .. } => {
                if let Some(slot) = self.senders.get_mut(worker_id.0 as usize) {
                    *slot = None;
                }
                Ok(SchedulerEvent::Disconnected(worker_id))
            }
        }
    }
}
