//! A single master-worker TCP connection, framed per [`crate::framing`].

use crate::framing::{read_frame, write_frame};
use anyhow::{Context, Result};
use pbala_base::proto::Envelope;
use std::net::TcpStream;

pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream
            .set_nodelay(true)
            .context("setting TCP_NODELAY on worker connection")?;
        Ok(Connection { stream })
    }

    pub fn send(&mut self, envelope: impl Into<Envelope>) -> Result<()> {
        write_frame(&mut self.stream, &envelope.into())
    }

    /// Blocks until a frame arrives. `Ok(None)` means the peer closed the
    /// connection cleanly between frames.
    pub fn recv(&mut self) -> Result<Option<Envelope>> {
        read_frame(&mut self.stream)
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Connection {
            stream: self.stream.try_clone().context("cloning TCP stream")?,
        })
    }

    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        self.stream.peer_addr().context("reading peer address")
    }
}
