use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::domain::{DependencyMode, SampleMetadata, SampleName};
use crate::error::KiraError;
use crate::sample_table::{TableOptions, read_sample_table};
use crate::snakemake::{Invocation, SAMPLE_CALL_CORES, Snakemake};

/// Extra output column carrying the longest observed read.
pub const READ_LENGTH_COLUMN: &str = "read_length";

/// Infers library metadata (organism, orientation, adapters, read lengths)
/// from read files. Any subset of fields may come back empty.
pub trait MetadataInferrer: Send + Sync {
    fn infer(
        &self,
        sample: &SampleName,
        mate1: &Path,
        mate2: Option<&Path>,
        dependency_mode: DependencyMode,
        cancel: &CancelToken,
    ) -> Result<SampleMetadata, KiraError>;
}

#[derive(Debug, Serialize)]
struct InferenceWorkflowConfig {
    samples: PathBuf,
    outdir: PathBuf,
    samples_out: PathBuf,
    log_dir: PathBuf,
    cluster_log_dir: PathBuf,
}

/// Runs the HTSinfer rules shipped with the workflow, one sample per call.
#[derive(Debug, Clone)]
pub struct SnakemakeInferrer {
    snakemake: Snakemake,
    workflow_directory: PathBuf,
    work_root: PathBuf,
}

impl SnakemakeInferrer {
    /// `work_root` receives one subdirectory per sample.
    pub fn new(
        snakemake: Snakemake,
        workflow_directory: PathBuf,
        work_root: PathBuf,
    ) -> Self {
        Self {
            snakemake,
            workflow_directory,
            work_root,
        }
    }

    fn invocation(
        &self,
        root: &Path,
        configfile: PathBuf,
        dependency_mode: DependencyMode,
    ) -> Invocation {
        Invocation {
            snakefile: self
                .workflow_directory
                .join("workflow")
                .join("rules")
                .join("htsinfer.smk"),
            configfile,
            directory: root.to_path_buf(),
            cores: SAMPLE_CALL_CORES,
            dependency_mode,
            dry_run: false,
        }
    }
}

impl MetadataInferrer for SnakemakeInferrer {
    fn infer(
        &self,
        sample: &SampleName,
        mate1: &Path,
        mate2: Option<&Path>,
        dependency_mode: DependencyMode,
        cancel: &CancelToken,
    ) -> Result<SampleMetadata, KiraError> {
        let root = self.work_root.join(sample.as_str());
        fs::create_dir_all(&root).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let log_dir = root.join("logs");
        let config = InferenceWorkflowConfig {
            samples: root.join("samples_htsinfer.tsv"),
            outdir: root.join("results"),
            samples_out: root.join("samples_result.tsv"),
            log_dir: log_dir.clone(),
            cluster_log_dir: log_dir.join("cluster"),
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&config.samples)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mate1 = mate1.display().to_string();
        let mate2 = mate2.map(|path| path.display().to_string()).unwrap_or_default();
        writer
            .write_record(["sample", "fq1", "fq2"])
            .and_then(|_| writer.write_record([sample.as_str(), &mate1, &mate2]))
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let configfile = root.join("config.json");
        let content = serde_json::to_vec_pretty(&config)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(&configfile, content).map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let invocation = self.invocation(&root, configfile, dependency_mode);
        self.snakemake.run(&invocation, &log_dir, "htsinfer", cancel)?;
        read_inferred(&config.samples_out, sample)
    }
}

/// Picks the metadata of `sample` from an inference output table.
pub fn read_inferred(path: &Path, sample: &SampleName) -> Result<SampleMetadata, KiraError> {
    let options = TableOptions {
        allow_extra_columns: true,
    };
    let rows = read_sample_table(path, options).map_err(|err| KiraError::ToolFailed {
        tool: "htsinfer".to_string(),
        message: err.to_string(),
    })?;
    let row = rows
        .into_iter()
        .find(|row| &row.name == sample)
        .ok_or_else(|| KiraError::ToolFailed {
            tool: "htsinfer".to_string(),
            message: format!("{sample} missing from {}", path.display()),
        })?;
    let mut metadata = row.metadata;
    metadata.max_read_length = row
        .extra
        .get(READ_LENGTH_COLUMN)
        .and_then(|value| value.parse().ok());
    Ok(metadata)
}
