use std::fmt;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::domain::{SampleDescriptor, SampleName};
use crate::error::KiraError;
use crate::layout::Layout;
use crate::organisms::OrganismMap;
use crate::registry::SampleRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Fetch,
    Inference,
    Genome,
    Defaults,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Fetch => "remote fetch",
            StageKind::Inference => "metadata inference",
            StageKind::Genome => "genome resolution",
            StageKind::Defaults => "defaulting",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one stage for one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// The sample already carries this stage's output, or the stage does not apply.
    Skipped,
    Updated(SampleDescriptor),
    /// The sample stays in the run; `descriptor` holds whatever was obtained.
    Partial {
        descriptor: Option<SampleDescriptor>,
        warning: String,
    },
    Failed(String),
}

/// Read-only state shared by all samples of a stage.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub config: &'a Config,
    pub organisms: &'a OrganismMap,
    pub layout: &'a Layout,
    pub cancel: &'a CancelToken,
}

pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Whether samples may be processed concurrently.
    fn parallel(&self) -> bool {
        true
    }

    fn apply(&self, descriptor: &SampleDescriptor, ctx: &StageContext<'_>) -> StageOutcome;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub stage: Option<StageKind>,
    pub updated: usize,
    pub skipped: usize,
    pub warned: usize,
    pub failed: usize,
}

/// Fixed, ordered list of enrichment stages run over a registry.
pub struct Pipeline<'a> {
    stages: Vec<Box<dyn Stage + 'a>>,
    pool: rayon::ThreadPool,
}

impl<'a> Pipeline<'a> {
    pub fn new(stages: Vec<Box<dyn Stage + 'a>>, cores: u32) -> Result<Self, KiraError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cores.max(1) as usize)
            .thread_name(|index| format!("kira-seqprep-{index}"))
            .build()
            .map_err(|err| KiraError::Filesystem(format!("worker pool: {err}")))?;
        Ok(Self { stages, pool })
    }

    /// Runs every stage in order. Samples failed by an earlier stage are not
    /// passed to later ones. Outcomes are applied to the registry in
    /// insertion order once all samples of a stage are done.
    pub fn run(
        &self,
        registry: &mut SampleRegistry,
        ctx: &StageContext<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<StageReport>, KiraError> {
        let mut reports = Vec::new();
        for stage in &self.stages {
            let kind = stage.kind();
            let started = Instant::now();
            let pending = registry.successful().cloned().collect::<Vec<_>>();
            sink.event(ProgressEvent {
                message: format!("phase={kind}; samples={}", pending.len()),
                elapsed: None,
            });

            let apply = |descriptor: &SampleDescriptor| -> (SampleName, StageOutcome) {
                let outcome = if ctx.cancel.is_cancelled() {
                    StageOutcome::Failed(format!("cancelled during {kind}"))
                } else {
                    stage.apply(descriptor, ctx)
                };
                (descriptor.name.clone(), outcome)
            };
            let outcomes = if stage.parallel() {
                self.pool
                    .install(|| pending.par_iter().map(apply).collect::<Vec<_>>())
            } else {
                pending.iter().map(apply).collect::<Vec<_>>()
            };

            let mut report = StageReport {
                stage: Some(kind),
                ..StageReport::default()
            };
            for (name, outcome) in outcomes {
                match outcome {
                    StageOutcome::Skipped => report.skipped += 1,
                    StageOutcome::Updated(descriptor) => {
                        registry.update(descriptor)?;
                        report.updated += 1;
                    }
                    StageOutcome::Partial {
                        descriptor,
                        warning,
                    } => {
                        tracing::warn!(sample = %name, stage = %kind, "{warning}");
                        if let Some(descriptor) = descriptor {
                            registry.update(descriptor)?;
                        }
                        report.warned += 1;
                    }
                    StageOutcome::Failed(reason) => {
                        registry.mark_failed(&name, kind.as_str(), &reason)?;
                        report.failed += 1;
                    }
                }
            }
            sink.event(ProgressEvent {
                message: format!(
                    "phase={kind}; updated={} skipped={} warned={} failed={}",
                    report.updated, report.skipped, report.warned, report.failed
                ),
                elapsed: Some(started.elapsed()),
            });
            reports.push(report);
        }
        Ok(reports)
    }
}
