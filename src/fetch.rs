use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::domain::{AccessionId, DependencyMode};
use crate::error::KiraError;
use crate::reference::anchor_path;
use crate::snakemake::{Invocation, SAMPLE_CALL_CORES, Snakemake};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedReads {
    pub mate1: PathBuf,
    pub mate2: Option<PathBuf>,
}

/// Materializes the reads of one SRA run into local files.
pub trait SraFetcher: Send + Sync {
    fn fetch(
        &self,
        accession: &AccessionId,
        destination: &Path,
        dependency_mode: DependencyMode,
        cancel: &CancelToken,
    ) -> Result<FetchedReads, KiraError>;
}

#[derive(Debug, Serialize)]
struct SraWorkflowConfig {
    samples: PathBuf,
    outdir: PathBuf,
    samples_out: PathBuf,
    log_dir: PathBuf,
    cluster_log_dir: PathBuf,
}

/// Runs the SRA download rules shipped with the workflow.
#[derive(Debug, Clone)]
pub struct SnakemakeSraFetcher {
    snakemake: Snakemake,
    workflow_directory: PathBuf,
}

impl SnakemakeSraFetcher {
    pub fn new(snakemake: Snakemake, workflow_directory: PathBuf) -> Self {
        Self {
            snakemake,
            workflow_directory,
        }
    }

    fn invocation(
        &self,
        destination: &Path,
        configfile: PathBuf,
        dependency_mode: DependencyMode,
    ) -> Invocation {
        Invocation {
            snakefile: self
                .workflow_directory
                .join("workflow")
                .join("rules")
                .join("sra_download.smk"),
            configfile,
            directory: destination.to_path_buf(),
            cores: SAMPLE_CALL_CORES,
            dependency_mode,
            dry_run: false,
        }
    }
}

impl SraFetcher for SnakemakeSraFetcher {
    fn fetch(
        &self,
        accession: &AccessionId,
        destination: &Path,
        dependency_mode: DependencyMode,
        cancel: &CancelToken,
    ) -> Result<FetchedReads, KiraError> {
        fs::create_dir_all(destination).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let log_dir = destination.join("logs");
        let config = SraWorkflowConfig {
            samples: destination.join("samples_remote.tsv"),
            outdir: destination.join("results"),
            samples_out: destination.join("samples_local.tsv"),
            log_dir: log_dir.clone(),
            cluster_log_dir: log_dir.join("cluster"),
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&config.samples)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        writer
            .write_record(["sample"])
            .and_then(|_| writer.write_record([accession.as_str()]))
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let configfile = destination.join("config.json");
        let content = serde_json::to_vec_pretty(&config)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(&configfile, content).map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let invocation = self.invocation(destination, configfile, dependency_mode);
        self.snakemake
            .run(&invocation, &log_dir, "sra_download", cancel)?;
        read_fetched(&config.samples_out, accession)
    }
}

/// Reads the `sample, fq1, fq2` table written by the download workflow.
pub fn read_fetched(path: &Path, accession: &AccessionId) -> Result<FetchedReads, KiraError> {
    let failed = |message: String| KiraError::ToolFailed {
        tool: "sra_download".to_string(),
        message,
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| failed(format!("no output table {}: {err}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|err| failed(err.to_string()))?
        .clone();
    let column = |name: &str| headers.iter().position(|header| header == name);
    let (Some(sample_col), Some(fq1_col)) = (column("sample"), column("fq1")) else {
        return Err(failed(format!(
            "output table {} lacks `sample` or `fq1`",
            path.display()
        )));
    };
    let fq2_col = column("fq2");
    let base_dir = path.parent().unwrap_or(Path::new("."));

    for record in reader.records() {
        let record = record.map_err(|err| failed(err.to_string()))?;
        if record.get(sample_col) != Some(accession.as_str()) {
            continue;
        }
        let mate1 = record
            .get(fq1_col)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| failed(format!("no reads downloaded for {accession}")))?;
        let mate2 = fq2_col
            .and_then(|index| record.get(index))
            .filter(|value| !value.is_empty());
        return Ok(FetchedReads {
            mate1: anchor_path(Path::new(mate1), base_dir),
            mate2: mate2.map(|value| anchor_path(Path::new(value), base_dir)),
        });
    }
    Err(failed(format!("{accession} missing from {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_paired_output_row() {
        let temp = tempfile::tempdir().unwrap();
        let table = temp.path().join("samples_local.tsv");
        fs::write(
            &table,
            "sample\tfq1\tfq2\nSRR1234567\t/data/SRR1234567_1.fastq.gz\t/data/SRR1234567_2.fastq.gz\n",
        )
        .unwrap();
        let acc: AccessionId = "SRR1234567".parse().unwrap();
        let reads = read_fetched(&table, &acc).unwrap();
        assert_eq!(reads.mate1, PathBuf::from("/data/SRR1234567_1.fastq.gz"));
        assert_eq!(
            reads.mate2,
            Some(PathBuf::from("/data/SRR1234567_2.fastq.gz"))
        );
    }

    #[test]
    fn missing_accession_is_a_tool_failure() {
        let temp = tempfile::tempdir().unwrap();
        let table = temp.path().join("samples_local.tsv");
        fs::write(&table, "sample\tfq1\tfq2\n").unwrap();
        let acc: AccessionId = "ERR0000007".parse().unwrap();
        let err = read_fetched(&table, &acc).unwrap_err();
        assert!(matches!(err, KiraError::ToolFailed { .. }));
    }

    #[test]
    fn download_call_uses_a_single_core() {
        let fetcher = SnakemakeSraFetcher::new(Snakemake::new(), PathBuf::from("/zarp"));
        let invocation = fetcher.invocation(
            Path::new("/work/sra"),
            PathBuf::from("/work/sra/config.json"),
            DependencyMode::Conda,
        );
        assert_eq!(invocation.cores, 1);
        assert_eq!(
            invocation.snakefile,
            PathBuf::from("/zarp/workflow/rules/sra_download.smk")
        );
        assert!(
            invocation
                .args()
                .windows(2)
                .any(|pair| pair == ["--cores", "1"])
        );
    }
}
