use crate::models::OutputSettings;
use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use std::fs::DirBuilder;

/// Directory name format: `2024-03-01_14-05-09_<name>`
const DIR_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Files belonging to one experiment run.
///
/// Every run gets a fresh directory named after its start time and the
/// operator-supplied experiment name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    dir: Utf8PathBuf,
    data_log: Utf8PathBuf,
    plot_log: Utf8PathBuf,
}

impl ExperimentLayout {
    /// Directory name for an experiment started at `started`
    pub fn dir_name(started: &NaiveDateTime, name: &str) -> String {
        format!("{}_{}", started.format(DIR_TIMESTAMP_FORMAT), name)
    }

    /// Create the experiment directory under `output.base_dir`.
    ///
    /// Fails if the directory already exists or the name would escape the
    /// base directory. On Unix the directory is created with mode 0775.
    pub fn create(output: &OutputSettings, name: &str, started: NaiveDateTime) -> Result<Self> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            bail!("Invalid experiment name: {:?}", name);
        }

        let dir = output.base_dir.join(Self::dir_name(&started, name));

        let mut builder = DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o775);
        }
        builder
            .create(&dir)
            .with_context(|| format!("Failed to create experiment directory: {}", dir))?;

        tracing::info!("Experiment directory: {}", dir);

        Ok(Self {
            data_log: dir.join(&output.data_file),
            plot_log: dir.join(&output.plot_log_file),
            dir,
        })
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// `vac.dat`
    pub fn data_log(&self) -> &Utf8Path {
        &self.data_log
    }

    /// Plot process output capture
    pub fn plot_log(&self) -> &Utf8Path {
        &self.plot_log
    }
}
