//! Worker-side supervisor: memory admission gate, task executor, and the
//! loop that ties them together (spec §4.2–4.4). Auxiliary-script emission
//! lives in `pbala-util::aux` and runs at the master, since the master
//! pre-generates the script into the (shared) output directory before ever
//! sending the work message (spec §4.5 step 2).

pub mod executor;
pub mod gate;
pub mod state;

pub use gate::{Admission, MemoryProbe, ProcMemInfoProbe};
pub use state::{run, BackOffSleeper, RealSleeper, WorkerConfig};
