//! Node-file and data-file parsing (spec §6). Low-level enough that this is
//! the one piece of the file formats we implement directly rather than
//! leaving to an external collaborator, since it's what turns the operator's
//! two plain-text inputs into `NodeSpec`/`WorkItem` values.

use anyhow::{Context, Result};
use pbala_base::{NodeSpec, TaskType, WorkItem};

/// One line per node: `hostname cores`, whitespace-separated. Blank lines
/// are skipped.
pub fn parse_node_file(contents: &str) -> Result<Vec<NodeSpec>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            let hostname = fields
                .next()
                .ok_or_else(|| anyhow::anyhow!("node file line is missing a hostname: `{line}`"))?;
            let cores_str = fields
                .next()
                .ok_or_else(|| anyhow::anyhow!("node file line is missing a core count: `{line}`"))?;
            let cores: u32 = cores_str
                .parse()
                .with_context(|| format!("invalid core count `{cores_str}` in line `{line}`"))?;
            NodeSpec::new(hostname, cores)
        })
        .collect()
}

/// One line per task: `taskNumber,argsCsv`. Blank lines are skipped (this
/// is also how `unfinished_tasks.txt` is read back in for a re-run).
pub fn parse_data_file(contents: &str) -> Result<Vec<WorkItem>> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(WorkItem::parse_line)
        .collect()
}

/// Applies `--maple-single-core` in place: forces every node's core count to
/// 1 when the run's task type is `Maple` and the flag is set, since Maple
/// kernels contend heavily for memory when several share a host and the
/// admission gate's per-host race window only worsens with more co-located
/// workers (spec §9 open-question resolution, recorded in DESIGN.md). A
/// no-op for every other task type, regardless of the flag.
pub fn apply_maple_single_core_override(nodes: &mut [NodeSpec], task_type: TaskType, enabled: bool) {
    if enabled && task_type == TaskType::Maple {
        for node in nodes {
            node.cores = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_file_with_multiple_nodes() {
        let nodes = parse_node_file("n1 4\nn2 2\n").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].hostname, "n1");
        assert_eq!(nodes[0].cores, 4);
        assert_eq!(nodes[1].cores, 2);
    }

    #[test]
    fn parse_node_file_skips_blank_lines() {
        let nodes = parse_node_file("n1 4\n\n\nn2 2\n").unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn parse_node_file_rejects_zero_cores() {
        assert!(parse_node_file("n1 0\n").is_err());
    }

    #[test]
    fn parse_node_file_rejects_missing_core_field() {
        assert!(parse_node_file("n1\n").is_err());
    }

    #[test]
    fn parses_data_file_lines_in_order() {
        let items = parse_data_file("1,a\n2,b,c\n3,\n").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].task_number, 1);
        assert_eq!(items[1].args_csv, "b,c");
        assert_eq!(items[2].args_csv, "");
    }

    #[test]
    fn parse_data_file_skips_blank_lines() {
        let items = parse_data_file("1,a\n\n2,b\n").unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn maple_single_core_forces_every_node_to_one_core() {
        let mut nodes = parse_node_file("n1 4\nn2 8\n").unwrap();
        apply_maple_single_core_override(&mut nodes, pbala_base::TaskType::Maple, true);
        assert!(nodes.iter().all(|n| n.cores == 1));
    }

    #[test]
    fn maple_single_core_is_a_noop_for_other_task_types() {
        let mut nodes = parse_node_file("n1 4\n").unwrap();
        apply_maple_single_core_override(&mut nodes, pbala_base::TaskType::C, true);
        assert_eq!(nodes[0].cores, 4);
    }

    #[test]
    fn maple_single_core_is_a_noop_when_disabled() {
        let mut nodes = parse_node_file("n1 4\n").unwrap();
        apply_maple_single_core_override(&mut nodes, pbala_base::TaskType::Maple, false);
        assert_eq!(nodes[0].cores, 4);
    }
}
