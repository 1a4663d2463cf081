//! Small ambient helpers shared by the `pbala` and `pbala-worker` binaries:
//! process exit codes, the dual-sink (terminal + report file) logger, and
//! auxiliary-script emission for Pari/Sage/Octave tasks.

pub mod aux;
pub mod exit;
pub mod logging;
