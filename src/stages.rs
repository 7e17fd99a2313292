//! The four enrichment stages, in pipeline order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::domain::{AdapterPair, SampleDescriptor};
use crate::error::KiraError;
use crate::fetch::SraFetcher;
use crate::genome::{GenomeRequest, GenomeResolver, GenomeResources};
use crate::inference::MetadataInferrer;
use crate::pipeline::{Stage, StageContext, StageKind, StageOutcome};

/// Written into adapter slots nobody filled; the workflow requires a value.
pub const PLACEHOLDER_SEQUENCE: &str = "XXXXXXXXXXXXXXXXXXXX";
/// STAR's own `sjdbOverhang` default, used when no read length is known.
pub const DEFAULT_STAR_SJDB_OVERHANG: u32 = 100;

pub struct FetchStage<'a, F: SraFetcher> {
    fetcher: &'a F,
}

impl<'a, F: SraFetcher> FetchStage<'a, F> {
    pub fn new(fetcher: &'a F) -> Self {
        Self { fetcher }
    }
}

impl<F: SraFetcher> Stage for FetchStage<'_, F> {
    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    fn apply(&self, descriptor: &SampleDescriptor, ctx: &StageContext<'_>) -> StageOutcome {
        let Some(accession) = descriptor.accession() else {
            return StageOutcome::Skipped;
        };
        let destination = ctx.layout.sra_dir(accession);
        tracing::info!(sample = %descriptor.name, %accession, "fetching reads");
        let fetched = self.fetcher.fetch(
            accession,
            destination.as_std_path(),
            ctx.config.run.fetch_dependency_mode,
            ctx.cancel,
        );
        match fetched {
            Ok(reads) => {
                let mut updated = descriptor.clone();
                match updated.materialize(reads.mate1, reads.mate2) {
                    Ok(()) => StageOutcome::Updated(updated),
                    Err(err) => StageOutcome::Failed(err.to_string()),
                }
            }
            Err(err) => StageOutcome::Failed(format!("{accession}: {err}")),
        }
    }
}

pub struct InferenceStage<'a, I: MetadataInferrer> {
    inferrer: &'a I,
}

impl<'a, I: MetadataInferrer> InferenceStage<'a, I> {
    pub fn new(inferrer: &'a I) -> Self {
        Self { inferrer }
    }
}

impl<I: MetadataInferrer> Stage for InferenceStage<'_, I> {
    fn kind(&self) -> StageKind {
        StageKind::Inference
    }

    fn apply(&self, descriptor: &SampleDescriptor, ctx: &StageContext<'_>) -> StageOutcome {
        let Some((mate1, mate2)) = descriptor.mates() else {
            return StageOutcome::Skipped;
        };
        let meta = &descriptor.metadata;
        if meta.source.is_some() && meta.read_orientation.is_some() {
            return StageOutcome::Skipped;
        }

        tracing::info!(sample = %descriptor.name, "inferring library metadata");
        let inferred = self.inferrer.infer(
            &descriptor.name,
            mate1,
            mate2,
            ctx.config.run.inference_dependency_mode,
            ctx.cancel,
        );
        match inferred {
            Ok(inferred) => {
                let mut updated = descriptor.clone();
                let changed = updated.metadata.fill_missing(&inferred);
                let mut missing = Vec::new();
                if updated.metadata.source.is_none() {
                    missing.push("source");
                }
                if updated.metadata.read_orientation.is_none() {
                    missing.push("read_orientation");
                }
                if missing.is_empty() {
                    StageOutcome::Updated(updated)
                } else {
                    StageOutcome::Partial {
                        descriptor: changed.then_some(updated),
                        warning: format!("inference left {} unset", missing.join(", ")),
                    }
                }
            }
            Err(KiraError::Cancelled(reason)) => StageOutcome::Failed(reason),
            Err(err) => StageOutcome::Partial {
                descriptor: None,
                warning: format!("inference failed: {err}"),
            },
        }
    }
}

type SharedGenome = Arc<OnceLock<Result<GenomeResources, String>>>;

pub struct GenomeStage<'a, G: GenomeResolver> {
    resolver: &'a G,
    assemblies: Mutex<HashMap<String, SharedGenome>>,
}

impl<'a, G: GenomeResolver> GenomeStage<'a, G> {
    pub fn new(resolver: &'a G) -> Self {
        Self {
            resolver,
            assemblies: Mutex::new(HashMap::new()),
        }
    }

    fn shared(&self, assembly: &str) -> SharedGenome {
        let mut guard = match self.assemblies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(assembly.to_string()).or_default().clone()
    }
}

impl<G: GenomeResolver> Stage for GenomeStage<'_, G> {
    fn kind(&self) -> StageKind {
        StageKind::Genome
    }

    fn apply(&self, descriptor: &SampleDescriptor, ctx: &StageContext<'_>) -> StageOutcome {
        let meta = &descriptor.metadata;
        if meta.has_genome_resources() {
            return StageOutcome::Skipped;
        }
        let Some(source) = meta.source.as_deref() else {
            return StageOutcome::Failed(
                "organism unknown; genome resources cannot be resolved".to_string(),
            );
        };
        let Some(entry) = ctx.organisms.lookup(source) else {
            return StageOutcome::Failed(KiraError::OrganismNotMapped(source.to_string()).to_string());
        };

        let version = ctx.config.run.resources_version;
        let destination = ctx.layout.genome_dir(version, &entry.assembly);
        let request = GenomeRequest {
            organism: &entry.canonical,
            assembly: &entry.assembly,
            version,
            destination: destination.as_std_path(),
        };
        // One collaborator call per assembly; concurrent samples wait for it.
        let shared = self.shared(&entry.assembly);
        let resolved = shared.get_or_init(|| {
            tracing::info!(assembly = %entry.assembly, organism = %entry.canonical, "resolving genome");
            self.resolver
                .ensure(&request, ctx.cancel)
                .map_err(|err| err.to_string())
        });

        match resolved {
            Ok(resources) => {
                let mut updated = descriptor.clone();
                let meta = &mut updated.metadata;
                meta.source = Some(entry.canonical.clone());
                meta.assembly = Some(entry.assembly.clone());
                if meta.reference_sequences.is_none() {
                    meta.reference_sequences = Some(resources.reference_sequences.clone());
                }
                if meta.annotations.is_none() {
                    meta.annotations = Some(resources.annotations.clone());
                }
                StageOutcome::Updated(updated)
            }
            Err(reason) => StageOutcome::Failed(format!("{}: {reason}", entry.assembly)),
        }
    }
}

/// Fills remaining gaps from configuration fallbacks. Never fails a sample.
pub struct DefaultsStage;

impl Stage for DefaultsStage {
    fn kind(&self) -> StageKind {
        StageKind::Defaults
    }

    fn parallel(&self) -> bool {
        false
    }

    fn apply(&self, descriptor: &SampleDescriptor, ctx: &StageContext<'_>) -> StageOutcome {
        let fallbacks = &ctx.config.fallbacks;
        let mut updated = descriptor.clone();
        let meta = &mut updated.metadata;

        meta.fragment_length_mean.get_or_insert(fallbacks.fragment_length_mean);
        meta.fragment_length_sd.get_or_insert(fallbacks.fragment_length_sd);
        meta.salmon_kmer_size.get_or_insert(fallbacks.salmon_kmer_size);
        if meta.star_sjdb_overhang.is_none() {
            let overhang = meta
                .max_read_length
                .map(|length| length.saturating_sub(1).max(1))
                .unwrap_or(DEFAULT_STAR_SJDB_OVERHANG);
            meta.star_sjdb_overhang = Some(overhang);
        }
        for pair in [
            &mut meta.adapter_3p,
            &mut meta.adapter_5p,
            &mut meta.adapter_poly_3p,
            &mut meta.adapter_poly_5p,
        ] {
            fill_placeholder(pair);
        }

        if updated == *descriptor {
            StageOutcome::Skipped
        } else {
            StageOutcome::Updated(updated)
        }
    }
}

fn fill_placeholder(pair: &mut AdapterPair) {
    pair.0.get_or_insert_with(|| PLACEHOLDER_SEQUENCE.to_string());
    pair.1.get_or_insert_with(|| PLACEHOLDER_SEQUENCE.to_string());
}
