//! Per-task-type argv assembly (spec §4.3's task-type table) and the small
//! amount of glue needed to decide which auxiliary-script emitter a task
//! needs. The auxiliary scripts' actual *contents* (the Pari/Sage/Octave
//! wrapper bodies) are an external collaborator; this module only decides
//! *whether* one is needed and where its resolved path sits in the argv.

use crate::{Result, TaskType};
use std::path::{Path, PathBuf};

/// Splits `argsCsv` on commas into owned fields, rejecting empty fields.
///
/// This replaces the source design's in-place comma-counting buffer walk
/// (sized to `strlen(arguments)`, missing the terminator, and mutating its
/// own cursor — see DESIGN.md) with an explicit, allocation-based split.
/// Note well: this means a field may never itself contain a literal comma;
/// callers must not pass quoted CSV with embedded commas to task types C or
/// Python (spec §8 boundary case).
pub fn split_args(args_csv: &str) -> Result<Vec<String>> {
    if args_csv.is_empty() {
        return Ok(vec![]);
    }
    args_csv
        .split(',')
        .map(|field| {
            if field.is_empty() {
                anyhow::bail!("argument list `{args_csv}` contains an empty field");
            }
            Ok(field.to_string())
        })
        .collect()
}

/// The file extension `parifile`/`sagefile`/`octavefile` would emit to, and
/// the sentinel substring close-out scans for when deleting transient
/// auxiliary scripts (spec §4.5, step 5).
pub const AUXILIARY_SENTINEL: &str = "auxprog";

pub fn auxiliary_script_path(out_dir: &Path, task_type: TaskType, task_number: u64) -> Option<PathBuf> {
    let ext = match task_type {
        TaskType::Pari => "gp",
        TaskType::Sage => "sage",
        TaskType::Octave => "m",
        _ => return None,
    };
    Some(out_dir.join(format!("{task_number}_{AUXILIARY_SENTINEL}.{ext}")))
}

/// Resolves the program path a child should exec, honoring the greeting's
/// `customPath` override (spec §4.3, "Program-path resolution").
pub fn resolve_program_path<'a>(program_file: &'a Path, custom_path: Option<&'a Path>) -> &'a Path {
    custom_path.unwrap_or(program_file)
}

/// Builds the argv for one task, per the task-type table in spec §4.3.
///
/// `program_path` is the resolved target program (see
/// [`resolve_program_path`]). `aux_script` must be `Some` exactly when
/// `task_type.requires_auxiliary_script()`, and is the path the auxiliary
/// emitter wrote its wrapper to.
pub fn build(
    task_type: TaskType,
    program_path: &Path,
    aux_script: Option<&Path>,
    task_number: u64,
    args_csv: &str,
) -> Result<Vec<String>> {
    let prog = program_path.to_string_lossy().into_owned();
    match task_type {
        TaskType::Maple => Ok(vec![
            "maple".to_string(),
            format!("-tc \"taskId:={task_number}\""),
            format!("-c \"taskArgs:=[{args_csv}]\""),
            prog,
        ]),
        TaskType::C => {
            let mut argv = vec![prog, task_number.to_string()];
            argv.extend(split_args(args_csv)?);
            Ok(argv)
        }
        TaskType::Python => {
            let mut argv = vec!["python".to_string(), prog, task_number.to_string()];
            argv.extend(split_args(args_csv)?);
            Ok(argv)
        }
        TaskType::Pari => {
            let script = aux_script
                .ok_or_else(|| anyhow::anyhow!("pari task is missing its auxiliary script path"))?;
            Ok(vec![
                "gp".to_string(),
                "-q".to_string(),
                script.to_string_lossy().into_owned(),
            ])
        }
        TaskType::Sage => {
            let script = aux_script
                .ok_or_else(|| anyhow::anyhow!("sage task is missing its auxiliary script path"))?;
            Ok(vec!["sage".to_string(), script.to_string_lossy().into_owned()])
        }
        TaskType::Octave => {
            let script = aux_script.ok_or_else(|| {
                anyhow::anyhow!("octave task is missing its auxiliary script path")
            })?;
            Ok(vec![
                "octave".to_string(),
                "--no-gui".to_string(),
                script.to_string_lossy().into_owned(),
            ])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_args_rejects_empty_fields() {
        assert!(split_args("a,,b").is_err());
        assert!(split_args(",a").is_err());
        assert!(split_args("a,").is_err());
    }

    #[test]
    fn split_args_empty_string_is_no_arguments() {
        assert_eq!(split_args("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn maple_argv_matches_table() {
        let argv = build(TaskType::Maple, Path::new("lib.mpl"), None, 7, "1,2,3").unwrap();
        assert_eq!(
            argv,
            vec![
                "maple",
                "-tc \"taskId:=7\"",
                "-c \"taskArgs:=[1,2,3]\"",
                "lib.mpl",
            ]
        );
    }

    #[test]
    fn c_argv_prepends_program_and_task_number() {
        let argv = build(TaskType::C, Path::new("/bin/prog"), None, 3, "a,b").unwrap();
        assert_eq!(argv, vec!["/bin/prog", "3", "a", "b"]);
    }

    #[test]
    fn python_argv_invokes_interpreter() {
        let argv = build(TaskType::Python, Path::new("script.py"), None, 9, "x").unwrap();
        assert_eq!(argv, vec!["python", "script.py", "9", "x"]);
    }

    #[test]
    fn pari_argv_requires_auxiliary_script() {
        assert!(build(TaskType::Pari, Path::new("lib.gp"), None, 1, "").is_err());
        let argv = build(
            TaskType::Pari,
            Path::new("lib.gp"),
            Some(Path::new("/out/1_auxprog.gp")),
            1,
            "",
        )
        .unwrap();
        assert_eq!(argv, vec!["gp", "-q", "/out/1_auxprog.gp"]);
    }

    #[test]
    fn resolve_program_path_prefers_custom_path() {
        let program_file = Path::new("program");
        let custom = Path::new("/custom/program");
        assert_eq!(resolve_program_path(program_file, Some(custom)), custom);
        assert_eq!(resolve_program_path(program_file, None), program_file);
    }

    #[test]
    fn auxiliary_script_path_uses_sentinel() {
        let path = auxiliary_script_path(Path::new("/out"), TaskType::Sage, 5).unwrap();
        assert!(path.to_string_lossy().contains(AUXILIARY_SENTINEL));
        assert!(auxiliary_script_path(Path::new("/out"), TaskType::C, 5).is_none());
    }
}
