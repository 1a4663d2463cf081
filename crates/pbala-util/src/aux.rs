//! Auxiliary-script emission for Pari/Sage/Octave tasks. The *content* of
//! these wrapper scripts is the `parifile`/`sagefile`/`octavefile` external
//! collaborator's job, not this system's; what belongs here is deciding
//! *when* one gets written and handing the emitter the task id, arguments,
//! and target program path it needs to bind.

use anyhow::{Context, Result};
use pbala_base::TaskType;
use std::io::Write;
use std::path::Path;

pub trait AuxiliaryScriptEmitter: Send + Sync {
    fn emit(
        &self,
        task_type: TaskType,
        program_file: &Path,
        script_path: &Path,
        task_number: u64,
        args_csv: &str,
    ) -> Result<()>;
}

/// A minimal stand-in for the real `parifile`/`sagefile`/`octavefile`
/// generators: writes a wrapper that sets the task id and argument list as
/// variables, then reads/loads the target program. Good enough to exercise
/// the worker end to end; a deployment with the real script generators
/// supplies its own [`AuxiliaryScriptEmitter`] instead.
pub struct DefaultAuxiliaryScriptEmitter;

impl AuxiliaryScriptEmitter for DefaultAuxiliaryScriptEmitter {
    fn emit(
        &self,
        task_type: TaskType,
        program_file: &Path,
        script_path: &Path,
        task_number: u64,
        args_csv: &str,
    ) -> Result<()> {
        let program_file = program_file.display();
        let body = match task_type {
            TaskType::Pari => format!(
                "taskId = {task_number};\ntaskArgs = [{args_csv}];\nread(\"{program_file}\");\n"
            ),
            TaskType::Sage => format!(
                "taskId = {task_number}\ntaskArgs = [{args_csv}]\nload(\"{program_file}\")\n"
            ),
            TaskType::Octave => format!(
                "taskId = {task_number};\ntaskArgs = [{args_csv}];\nsource(\"{program_file}\");\n"
            ),
            _ => anyhow::bail!("{task_type} does not use an auxiliary script"),
        };
        let mut file = std::fs::File::create(script_path)
            .with_context(|| format!("creating auxiliary script `{}`", script_path.display()))?;
        file.write_all(body.as_bytes())
            .with_context(|| format!("writing auxiliary script `{}`", script_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn emits_a_script_binding_task_id_and_args() {
        let dir = tempdir().unwrap();
        let script_path = dir.path().join("1_auxprog.gp");
        DefaultAuxiliaryScriptEmitter
            .emit(TaskType::Pari, Path::new("lib.gp"), &script_path, 1, "2,3")
            .unwrap();
        let contents = std::fs::read_to_string(&script_path).unwrap();
        assert!(contents.contains("taskId = 1"));
        assert!(contents.contains("taskArgs = [2,3]"));
        assert!(contents.contains("lib.gp"));
    }

    #[test]
    fn refuses_task_types_that_do_not_need_a_script() {
        let dir = tempdir().unwrap();
        let script_path = dir.path().join("1_auxprog.txt");
        assert!(DefaultAuxiliaryScriptEmitter
            .emit(TaskType::C, Path::new("prog"), &script_path, 1, "")
            .is_err());
    }
}
