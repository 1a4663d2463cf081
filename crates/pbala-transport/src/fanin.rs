//! One background reader thread per worker connection, forwarding
//! `ResultMessage`s into a single `mpsc::Receiver` the master's steady loop
//! blocks on. The threads do no scheduling: they only move bytes off the
//! socket and onto the channel, so the master's decision logic stays
//! single-threaded (spec §5).

use crate::Connection;
use anyhow::Result;
use pbala_base::proto::{Envelope, ResultMessage};
use pbala_base::WorkerId;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

pub enum FanInEvent {
    Result(ResultMessage),
    /// The connection closed or errored; the worker is presumed dead.
    Disconnected { worker_id: WorkerId, error: Option<String> },
}

pub struct FanIn {
    pub receiver: mpsc::Receiver<FanInEvent>,
    sender: mpsc::Sender<FanInEvent>,
    handles: Vec<JoinHandle<()>>,
}

impl FanIn {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        FanIn {
            receiver,
            sender,
            handles: Vec::new(),
        }
    }

    /// Spawns the reader thread for one worker's connection. The connection
    /// must already have completed the greeting handshake.
    pub fn spawn_reader(&mut self, worker_id: WorkerId, mut connection: Connection) {
        let sender = self.sender.clone();
        let handle = thread::spawn(move || loop {
            match connection.recv() {
                Ok(Some(Envelope::Result(msg))) => {
                    if sender.send(FanInEvent::Result(msg)).is_err() {
                        return;
                    }
                }
                Ok(Some(other)) => {
                    let _ = sender.send(FanInEvent::Disconnected {
                        worker_id,
                        error: Some(format!("unexpected message on result channel: {other:?}")),
                    });
                    return;
                }
                Ok(None) => {
                    let _ = sender.send(FanInEvent::Disconnected {
                        worker_id,
                        error: None,
                    });
                    return;
                }
                Err(err) => {
                    let _ = sender.send(FanInEvent::Disconnected {
                        worker_id,
                        error: Some(err.to_string()),
                    });
                    return;
                }
            }
        });
        self.handles.push(handle);
    }

    pub fn join_all(self) -> Result<()> {
        drop(self.sender);
        for handle in self.handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Default for FanIn {
    fn default() -> Self {
        Self::new()
    }
}
