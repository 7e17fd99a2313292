use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::AccessionId;
use crate::error::KiraError;

/// Directory layout below the working directory for one run.
#[derive(Debug, Clone)]
pub struct Layout {
    working_root: Utf8PathBuf,
    run_id: String,
}

impl Layout {
    pub fn new(working_root: &Path, run_id: &str) -> Result<Self, KiraError> {
        let working_root = Utf8PathBuf::from_path_buf(working_root.to_path_buf())
            .map_err(|_| KiraError::Filesystem("invalid working directory path".to_string()))?;
        Ok(Self {
            working_root,
            run_id: run_id.to_string(),
        })
    }

    pub fn sra_dir(&self, accession: &AccessionId) -> Utf8PathBuf {
        self.working_root
            .join("sra_download")
            .join("runs")
            .join(&self.run_id)
            .join(accession.as_str())
    }

    /// Parent of the per-sample inference directories.
    pub fn inference_root(&self) -> Utf8PathBuf {
        self.working_root
            .join("htsinfer")
            .join("runs")
            .join(&self.run_id)
    }

    /// `genomes/<version|latest>/<assembly>`
    pub fn genome_dir(&self, version: Option<u32>, assembly: &str) -> Utf8PathBuf {
        let release = version
            .map(|value| value.to_string())
            .unwrap_or_else(|| "latest".to_string());
        self.working_root
            .join("genomes")
            .join(release)
            .join(assembly)
    }

    pub fn zarp_root(&self) -> Utf8PathBuf {
        self.working_root.join("zarp")
    }

    pub fn run_dir(&self) -> Utf8PathBuf {
        self.zarp_root().join("runs").join(&self.run_id)
    }

    pub fn sample_sheet_path(&self) -> Utf8PathBuf {
        self.run_dir().join("samples_zarp.tsv")
    }

    pub fn workflow_config_path(&self) -> Utf8PathBuf {
        self.run_dir().join("config.json")
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.run_dir().join("summary.json")
    }

    pub fn results_dir(&self) -> Utf8PathBuf {
        self.run_dir().join("results")
    }

    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.run_dir().join("logs")
    }

    pub fn cluster_logs_dir(&self) -> Utf8PathBuf {
        self.logs_dir().join("cluster")
    }

    pub fn index_dir(&self, tool: &str) -> Utf8PathBuf {
        self.results_dir().join(format!("{tool}_indexes"))
    }
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), KiraError> {
    fs::create_dir_all(path.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))
}

/// Writes through a temp file in the target directory, then renames it into place.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = path
        .parent()
        .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
    ensure_dir(parent)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-seqprep")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_json_atomic<T: serde::Serialize>(path: &Utf8Path, value: &T) -> Result<(), KiraError> {
    let mut content =
        serde_json::to_vec_pretty(value).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    content.push(b'\n');
    write_bytes_atomic(path, &content)
}
