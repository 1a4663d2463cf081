//! The node-assignment log (spec §4.7: "a parallel node-assignment file
//! records `(workerId, taskNumber)` pairs for post-mortem"), written to
//! `outDir/node_info.txt` when `--create-slavefile` is set. The rest of the
//! report stream (`CREATED_SLAVE`, `TASK_SENT`, ...) is ordinary `slog`
//! logging through the dual-sink logger built in `pbala-util::logging`.

use anyhow::{Context, Result};
use pbala_base::{NodeSpec, WorkerId};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub struct NodeInfoWriter {
    file: File,
}

impl NodeInfoWriter {
    pub fn create(out_dir: &Path, nodes: &[NodeSpec]) -> Result<Self> {
        let path = out_dir.join("node_info.txt");
        let mut file =
            File::create(&path).with_context(|| format!("creating `{}`", path.display()))?;
        for node in nodes {
            writeln!(file, "{} {}", node.hostname, node.cores)
                .context("writing node-assignment header")?;
        }
        Ok(NodeInfoWriter { file })
    }

    pub fn record_assignment(&mut self, worker_id: WorkerId, task_number: u64) -> Result<()> {
        writeln!(self.file, "{worker_id},{task_number}").context("writing node-assignment record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_node_header_and_assignments() {
        let dir = tempdir().unwrap();
        let nodes = vec![NodeSpec::new("n1", 2).unwrap()];
        let mut writer = NodeInfoWriter::create(dir.path(), &nodes).unwrap();
        writer.record_assignment(WorkerId(0), 7).unwrap();
        writer.record_assignment(WorkerId(1), 8).unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(dir.path().join("node_info.txt")).unwrap();
        assert_eq!(contents, "n1 2\n0,7\n1,8\n");
    }
}
