use std::path::PathBuf;

use camino::Utf8Path;
use serde::Serialize;

use crate::config::Config;
use crate::domain::{AdapterPair, Choice, SampleDescriptor};
use crate::error::KiraError;
use crate::intake::RejectedReference;
use crate::layout::{Layout, ensure_dir, write_bytes_atomic, write_json_atomic};
use crate::pipeline::StageReport;
use crate::registry::SampleRegistry;
use crate::sample_table::COLUMNS;
use crate::stages::PLACEHOLDER_SEQUENCE;

pub const ASSEMBLY_STAGE: &str = "run assembly";
const SEQMODE_COLUMN: &str = "seqmode";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub sample_sheet: PathBuf,
    pub workflow_config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleState {
    Succeeded,
    Excluded,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub name: String,
    pub layout: String,
    pub state: SampleState,
    pub stage: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub execution_mode: String,
    pub succeeded: usize,
    pub excluded: usize,
    pub samples: Vec<SampleSummary>,
    /// Reference tokens that never became samples.
    pub rejected: Vec<RejectedReference>,
    pub stages: Vec<StageReport>,
    pub artifacts: Option<RunArtifacts>,
}

impl RunSummary {
    pub fn from_registry(
        registry: &SampleRegistry,
        config: &Config,
        stages: Vec<StageReport>,
        artifacts: Option<RunArtifacts>,
    ) -> Self {
        let samples = registry
            .iter()
            .map(|entry| SampleSummary {
                name: entry.descriptor.name.to_string(),
                layout: entry.descriptor.library.layout().to_string(),
                state: if entry.is_failed() {
                    SampleState::Excluded
                } else {
                    SampleState::Succeeded
                },
                stage: entry.failure.as_ref().map(|failure| failure.stage.clone()),
                reason: entry.failure.as_ref().map(|failure| failure.reason.clone()),
            })
            .collect::<Vec<_>>();
        let succeeded = samples
            .iter()
            .filter(|sample| sample.state == SampleState::Succeeded)
            .count();
        Self {
            run_id: config.run.identifier.clone(),
            execution_mode: config.run.execution_mode.to_string(),
            succeeded,
            excluded: samples.len() - succeeded,
            samples,
            rejected: Vec::new(),
            stages,
            artifacts,
        }
    }

    pub fn with_rejected(mut self, rejected: &[RejectedReference]) -> Self {
        self.rejected = rejected.to_vec();
        self
    }
}

#[derive(Debug, Serialize)]
struct WorkflowConfig {
    samples: PathBuf,
    output_dir: PathBuf,
    log_dir: PathBuf,
    cluster_log_dir: PathBuf,
    kallisto_indexes: PathBuf,
    salmon_indexes: PathBuf,
    star_indexes: PathBuf,
    alfa_indexes: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule_config: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_email: Option<String>,
}

/// Writes the sample sheet and workflow config for every sample still in the run.
///
/// Samples lacking a field the workflow needs are excluded first. Fails when
/// no sample remains or the run directory cannot be written.
pub fn assemble(
    registry: &mut SampleRegistry,
    config: &Config,
    layout: &Layout,
) -> Result<RunArtifacts, KiraError> {
    let incomplete = registry
        .successful()
        .filter_map(|descriptor| {
            let missing = descriptor.missing_required();
            (!missing.is_empty()).then(|| (descriptor.name.clone(), missing.join(", ")))
        })
        .collect::<Vec<_>>();
    for (name, missing) in incomplete {
        registry.mark_failed(&name, ASSEMBLY_STAGE, &format!("missing {missing}"))?;
    }

    let samples = registry.successful().collect::<Vec<_>>();
    if samples.is_empty() {
        return Err(KiraError::NoSamples);
    }

    let run_dir = layout.run_dir();
    let not_writable = |err: KiraError| KiraError::OutputNotWritable {
        path: run_dir.clone().into_std_path_buf(),
        message: err.to_string(),
    };

    let sheet = render_sample_sheet(&samples)?;
    write_bytes_atomic(&layout.sample_sheet_path(), &sheet).map_err(not_writable)?;

    let user = &config.user;
    let workflow_config = WorkflowConfig {
        samples: layout.sample_sheet_path().into_std_path_buf(),
        output_dir: layout.results_dir().into_std_path_buf(),
        log_dir: layout.logs_dir().into_std_path_buf(),
        cluster_log_dir: layout.cluster_logs_dir().into_std_path_buf(),
        kallisto_indexes: layout.index_dir("kallisto").into_std_path_buf(),
        salmon_indexes: layout.index_dir("salmon").into_std_path_buf(),
        star_indexes: layout.index_dir("star").into_std_path_buf(),
        alfa_indexes: layout.index_dir("alfa").into_std_path_buf(),
        rule_config: config.run.rule_config.clone(),
        report_description: config.run.description.clone(),
        report_logo: user.logo.clone(),
        report_url: user.urls.first().cloned(),
        author_name: user.author.clone(),
        author_email: user.emails.first().cloned(),
    };
    write_json_atomic(&layout.workflow_config_path(), &workflow_config).map_err(not_writable)?;

    for dir in [
        layout.results_dir(),
        layout.cluster_logs_dir(),
        layout.index_dir("kallisto"),
        layout.index_dir("salmon"),
        layout.index_dir("star"),
        layout.index_dir("alfa"),
    ] {
        ensure_dir(&dir).map_err(not_writable)?;
    }

    tracing::info!(
        samples = samples.len(),
        run_dir = %run_dir,
        "run assembled"
    );
    Ok(RunArtifacts {
        run_dir: run_dir.into_std_path_buf(),
        sample_sheet: layout.sample_sheet_path().into_std_path_buf(),
        workflow_config: layout.workflow_config_path().into_std_path_buf(),
    })
}

pub fn write_summary(path: &Utf8Path, summary: &RunSummary) -> Result<(), KiraError> {
    write_json_atomic(path, summary)
}

/// Tab-separated sheet in sample table column order, minus `seqmode`.
pub fn render_sample_sheet(samples: &[&SampleDescriptor]) -> Result<Vec<u8>, KiraError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer
        .write_record(COLUMNS.iter().filter(|column| **column != SEQMODE_COLUMN))
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    for sample in samples {
        writer
            .write_record(sheet_row(sample))
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| KiraError::Filesystem(err.to_string()))
}

fn sheet_row(sample: &SampleDescriptor) -> Vec<String> {
    let meta = &sample.metadata;
    let (fq1, fq2) = match sample.mates() {
        Some((mate1, mate2)) => (
            mate1.display().to_string(),
            mate2
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| PLACEHOLDER_SEQUENCE.to_string()),
        ),
        None => (String::new(), String::new()),
    };
    let path = |value: &Option<PathBuf>| {
        value
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    };
    let number = |value: Option<String>| value.unwrap_or_default();
    let mates = |pair: &AdapterPair| {
        (
            pair.0.clone().unwrap_or_default(),
            pair.1.clone().unwrap_or_default(),
        )
    };
    let (a3_1, a3_2) = mates(&meta.adapter_3p);
    let (a5_1, a5_2) = mates(&meta.adapter_5p);
    let (p3_1, p3_2) = mates(&meta.adapter_poly_3p);
    let (p5_1, p5_2) = mates(&meta.adapter_poly_5p);

    vec![
        sample.name.to_string(),
        fq1,
        fq2,
        meta.source.clone().unwrap_or_default(),
        path(&meta.annotations),
        path(&meta.reference_sequences),
        number(meta.fragment_length_sd.map(|value| value.to_string())),
        number(meta.fragment_length_mean.map(|value| value.to_string())),
        meta.read_orientation
            .map(|value| value.as_str().to_string())
            .unwrap_or_default(),
        number(meta.star_sjdb_overhang.map(|value| value.to_string())),
        number(meta.salmon_kmer_size.map(|value| value.to_string())),
        a3_1,
        a3_2,
        a5_1,
        a5_2,
        p3_1,
        p3_2,
        p5_1,
        p5_2,
    ]
}
