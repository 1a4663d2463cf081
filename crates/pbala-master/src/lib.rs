//! The `pbala` master: reads the node and data files, spawns and greets the
//! worker pool, runs the prime/steady/drain dispatch loop, and closes out
//! the run's artifacts (spec §4).

pub mod journal;
pub mod parsing;
pub mod report;
pub mod scheduler;
pub mod spawn;
pub mod transport;
