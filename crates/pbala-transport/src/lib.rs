//! The typed, tagged, length-delimited message channel between the master
//! and its workers, plus the `ssh`-based realization of `spawn(executableName,
//! host)`. Nothing here decides *what* to send, only how to get an
//! [`pbala_base::proto::Envelope`] across the wire and how to get a worker
//! process running in the first place.

pub mod connection;
pub mod fanin;
pub mod framing;
pub mod spawn;

pub use connection::Connection;
pub use fanin::{FanIn, FanInEvent};
pub use spawn::spawn_remote;
