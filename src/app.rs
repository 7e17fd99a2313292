use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::assembly::{self, RunSummary};
use crate::cancel::CancelToken;
use crate::config::{Config, ConfigLayer, LayerSource};
use crate::engine::{EngineAction, ExecutionEngine};
use crate::error::KiraError;
use crate::fetch::SraFetcher;
use crate::genome::GenomeResolver;
use crate::inference::MetadataInferrer;
use crate::intake::register_references;
use crate::layout::{Layout, write_json_atomic};
use crate::organisms::OrganismMap;
use crate::pipeline::{Pipeline, Stage, StageContext};
use crate::registry::SampleRegistry;
use crate::sample_table::TableOptions;
use crate::stages::{DefaultsStage, FetchStage, GenomeStage, InferenceStage};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Sample references of one invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub references: Vec<String>,
    /// Directory relative paths in `references` resolve against.
    pub anchor: PathBuf,
    pub table_options: TableOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub summary: RunSummary,
    /// `None` when the run stopped before the workflow was handed anything.
    pub engine: Option<EngineAction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub path: PathBuf,
}

pub struct App<F, I, G, E>
where
    F: SraFetcher,
    I: MetadataInferrer,
    G: GenomeResolver,
    E: ExecutionEngine,
{
    fetcher: F,
    inferrer: I,
    genome: G,
    engine: E,
}

impl<F, I, G, E> App<F, I, G, E>
where
    F: SraFetcher,
    I: MetadataInferrer,
    G: GenomeResolver,
    E: ExecutionEngine,
{
    pub fn new(fetcher: F, inferrer: I, genome: G, engine: E) -> Self {
        Self {
            fetcher,
            inferrer,
            genome,
            engine,
        }
    }

    /// Resolves every reference, enriches the samples, writes the run
    /// artifacts and hands them to the execution engine.
    pub fn run(
        &self,
        config: &Config,
        request: &RunRequest,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, KiraError> {
        let started = Instant::now();
        let layout = Layout::new(&config.run.working_directory, &config.run.identifier)?;
        let organisms = load_organisms(&config.run.genome_assemblies_map)?;

        sink.event(ProgressEvent {
            message: format!("phase=intake; references={}", request.references.len()),
            elapsed: None,
        });
        let mut registry = SampleRegistry::new();
        let intake = register_references(
            &mut registry,
            &request.references,
            &request.anchor,
            &config.sample,
            request.table_options,
        )?;
        tracing::info!(
            samples = intake.registered,
            rejected = intake.rejected.len(),
            run = %config.run.identifier,
            "samples registered"
        );

        let stages: Vec<Box<dyn Stage + '_>> = vec![
            Box::new(FetchStage::new(&self.fetcher)),
            Box::new(InferenceStage::new(&self.inferrer)),
            Box::new(GenomeStage::new(&self.genome)),
            Box::new(DefaultsStage),
        ];
        let pipeline = Pipeline::new(stages, config.run.cores)?;
        let ctx = StageContext {
            config,
            organisms: &organisms,
            layout: &layout,
            cancel,
        };
        let reports = pipeline.run(&mut registry, &ctx, sink)?;

        if cancel.is_cancelled() {
            let summary = RunSummary::from_registry(&registry, config, reports, None)
                .with_rejected(&intake.rejected);
            persist_summary(&layout, &summary);
            return Err(KiraError::Cancelled("run stopped before assembly".to_string()));
        }

        sink.event(ProgressEvent {
            message: "phase=assembly".to_string(),
            elapsed: None,
        });
        let artifacts = match assembly::assemble(&mut registry, config, &layout) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                let summary = RunSummary::from_registry(&registry, config, reports, None)
                    .with_rejected(&intake.rejected);
                persist_summary(&layout, &summary);
                return Err(err);
            }
        };
        let summary =
            RunSummary::from_registry(&registry, config, reports, Some(artifacts.clone()))
                .with_rejected(&intake.rejected);
        assembly::write_summary(&layout.summary_path(), &summary)?;

        cancel.check("run assembly")?;
        sink.event(ProgressEvent {
            message: format!("phase=execute; mode={}", config.run.execution_mode),
            elapsed: Some(started.elapsed()),
        });
        let action = self.engine.execute(&artifacts, config, &layout, cancel)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=done; succeeded={} excluded={}",
                summary.succeeded, summary.excluded
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(RunResult {
            summary,
            engine: Some(action),
        })
    }
}

/// Loads the organism map; a missing file is an empty map.
pub fn load_organisms(path: &Path) -> Result<OrganismMap, KiraError> {
    if !path.exists() {
        tracing::warn!(
            path = %path.display(),
            "organism map not found; genome resolution will fail for samples without genome files"
        );
        return Ok(OrganismMap::default());
    }
    OrganismMap::load(path)
}

/// Merges the user defaults, config file and command line layers and writes
/// the result as the new user defaults file.
pub fn init_user_defaults(path: &Path, layers: &[ConfigLayer]) -> Result<InitResult, KiraError> {
    let mut merged = ConfigLayer::default();
    for layer in layers {
        merged.merge(layer);
    }
    merged.validate(LayerSource::Merged)?;
    let target = Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|_| KiraError::Filesystem("invalid config path".to_string()))?;
    write_json_atomic(&target, &merged)?;
    tracing::info!(path = %target, "user defaults written");
    Ok(InitResult {
        path: path.to_path_buf(),
    })
}

fn persist_summary(layout: &Layout, summary: &RunSummary) {
    if let Err(err) = assembly::write_summary(&layout.summary_path(), summary) {
        tracing::warn!(error = %err, "failed to write run summary");
    }
}
