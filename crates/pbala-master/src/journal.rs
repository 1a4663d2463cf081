//! Unfinished-task journal (spec §4.6): opened for append on each failure
//! and immediately closed, so durability comes from the close rather than
//! from keeping a long-lived file handle around. Removed at close-out iff
//! it never received a record.

use anyhow::{Context, Result};
use pbala_base::UnfinishedRecord;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Journal {
    path: PathBuf,
    record_count: u64,
}

impl Journal {
    /// Creates an empty journal file at `outDir/unfinished_tasks.txt`,
    /// truncating any file left over from a previous run.
    pub fn create(out_dir: &Path) -> Result<Self> {
        let path = out_dir.join("unfinished_tasks.txt");
        File::create(&path).with_context(|| format!("creating journal `{}`", path.display()))?;
        Ok(Journal {
            path,
            record_count: 0,
        })
    }

    pub fn append(&mut self, record: &UnfinishedRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening journal `{}` for append", self.path.display()))?;
        writeln!(file, "{record}").context("writing journal record")?;
        self.record_count += 1;
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Deletes the journal file if it never received a record, per spec
    /// §4.5 step 5 ("delete the unfinished-tasks file if it is empty").
    pub fn close_out(self) -> Result<()> {
        if self.record_count == 0 {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("removing empty journal `{}`", self.path.display()))?;
        }
        Ok(())
    }
}
