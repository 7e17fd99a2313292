use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;

use kira_seqprep::cancel::CancelToken;
use kira_seqprep::config::{Config, ConfigLayer, ConfigMerger, LayerSource, RunSection};
use kira_seqprep::domain::{
    AccessionId, DependencyMode, Library, ReadOrientation, SampleDescriptor, SampleMetadata,
    SampleName,
};
use kira_seqprep::error::KiraError;
use kira_seqprep::fetch::{FetchedReads, SraFetcher};
use kira_seqprep::genome::{GenomeRequest, GenomeResolver, GenomeResources, genome_paths};
use kira_seqprep::inference::MetadataInferrer;
use kira_seqprep::layout::Layout;
use kira_seqprep::organisms::{OrganismEntry, OrganismMap};
use kira_seqprep::output::SilentSink;
use kira_seqprep::pipeline::{Pipeline, StageContext, StageKind};
use kira_seqprep::registry::SampleRegistry;
use kira_seqprep::stages::{
    DEFAULT_STAR_SJDB_OVERHANG, DefaultsStage, FetchStage, GenomeStage, InferenceStage,
    PLACEHOLDER_SEQUENCE,
};

#[derive(Default)]
struct MockFetcher {
    calls: Mutex<usize>,
    fail: bool,
}

impl SraFetcher for MockFetcher {
    fn fetch(
        &self,
        accession: &AccessionId,
        destination: &Path,
        dependency_mode: DependencyMode,
        _cancel: &CancelToken,
    ) -> Result<FetchedReads, KiraError> {
        *self.calls.lock().unwrap() += 1;
        assert_eq!(dependency_mode, DependencyMode::Conda);
        if self.fail {
            return Err(KiraError::ToolFailed {
                tool: "sra_download".to_string(),
                message: "prefetch exited with 3".to_string(),
            });
        }
        Ok(FetchedReads {
            mate1: destination.join(format!("{accession}_1.fastq.gz")),
            mate2: Some(destination.join(format!("{accession}_2.fastq.gz"))),
        })
    }
}

struct MockInferrer {
    calls: Mutex<usize>,
    result: Result<SampleMetadata, String>,
}

impl MockInferrer {
    fn returning(result: SampleMetadata) -> Self {
        Self {
            calls: Mutex::new(0),
            result: Ok(result),
        }
    }
}

impl MetadataInferrer for MockInferrer {
    fn infer(
        &self,
        _sample: &SampleName,
        _mate1: &Path,
        _mate2: Option<&Path>,
        _dependency_mode: DependencyMode,
        _cancel: &CancelToken,
    ) -> Result<SampleMetadata, KiraError> {
        *self.calls.lock().unwrap() += 1;
        self.result.clone().map_err(|message| KiraError::ToolFailed {
            tool: "htsinfer".to_string(),
            message,
        })
    }
}

#[derive(Default)]
struct MockGenome {
    calls: Mutex<Vec<String>>,
}

impl MockGenome {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl GenomeResolver for MockGenome {
    fn ensure(
        &self,
        request: &GenomeRequest<'_>,
        _cancel: &CancelToken,
    ) -> Result<GenomeResources, KiraError> {
        self.calls.lock().unwrap().push(request.assembly.to_string());
        Ok(genome_paths(request.destination, request.assembly))
    }
}

fn config(dir: &Path) -> Config {
    let mut merger = ConfigMerger::new(ConfigLayer::defaults(dir)).unwrap();
    let layer = ConfigLayer {
        run: RunSection {
            identifier: Some("run1".to_string()),
            working_directory: Some(dir.join("work")),
            workflow_directory: Some(dir.to_path_buf()),
            cores: Some(4),
            ..RunSection::default()
        },
        ..ConfigLayer::default()
    };
    merger.push(&layer, LayerSource::CommandLine).unwrap();
    merger.resolve().unwrap()
}

fn organisms() -> OrganismMap {
    OrganismMap::from_entries(vec![
        OrganismEntry {
            canonical: "Homo sapiens".to_string(),
            aliases: vec!["human".to_string(), "9606".to_string()],
            assembly: "GRCh38".to_string(),
        },
        OrganismEntry {
            canonical: "Mus musculus".to_string(),
            aliases: vec!["mouse".to_string()],
            assembly: "GRCm39".to_string(),
        },
    ])
    .unwrap()
}

fn inferred_mouse() -> SampleMetadata {
    let mut meta = SampleMetadata {
        source: Some("Mus musculus".to_string()),
        read_orientation: Some(ReadOrientation::SR),
        max_read_length: Some(76),
        ..SampleMetadata::default()
    };
    meta.adapter_3p.0 = Some("AGATCGGAAGAGC".to_string());
    meta
}

fn local(name: &str) -> SampleDescriptor {
    SampleDescriptor::new(
        name.parse().unwrap(),
        Library::SingleEnd {
            mate1: format!("/data/{name}.fq.gz").into(),
        },
    )
}

fn remote(name: &str, accession: &str) -> SampleDescriptor {
    SampleDescriptor::new(
        name.parse().unwrap(),
        Library::Remote {
            accession: accession.parse().unwrap(),
        },
    )
}

struct Collaborators {
    fetcher: MockFetcher,
    inferrer: MockInferrer,
    genome: MockGenome,
}

impl Collaborators {
    fn new(inferrer: MockInferrer) -> Self {
        Self {
            fetcher: MockFetcher::default(),
            inferrer,
            genome: MockGenome::default(),
        }
    }

    fn pipeline(&self, cores: u32) -> Pipeline<'_> {
        Pipeline::new(
            vec![
                Box::new(FetchStage::new(&self.fetcher)),
                Box::new(InferenceStage::new(&self.inferrer)),
                Box::new(GenomeStage::new(&self.genome)),
                Box::new(DefaultsStage),
            ],
            cores,
        )
        .unwrap()
    }
}

fn run(
    collaborators: &Collaborators,
    registry: &mut SampleRegistry,
    config: &Config,
    cancel: &CancelToken,
) -> Vec<kira_seqprep::pipeline::StageReport> {
    let organisms = organisms();
    let layout = Layout::new(&config.run.working_directory, &config.run.identifier).unwrap();
    let ctx = StageContext {
        config,
        organisms: &organisms,
        layout: &layout,
        cancel,
    };
    collaborators
        .pipeline(config.run.cores)
        .run(registry, &ctx, &SilentSink)
        .unwrap()
}

#[test]
fn remote_sample_is_fetched_inferred_and_completed() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let collaborators = Collaborators::new(MockInferrer::returning(inferred_mouse()));
    let mut registry = SampleRegistry::new();
    registry.insert(remote("mine", "SRR1234567")).unwrap();

    let reports = run(&collaborators, &mut registry, &config, &CancelToken::new());
    let stages = reports.iter().map(|report| report.stage).collect::<Vec<_>>();
    assert_eq!(
        stages,
        [
            Some(StageKind::Fetch),
            Some(StageKind::Inference),
            Some(StageKind::Genome),
            Some(StageKind::Defaults)
        ]
    );

    let sample = registry.successful().next().unwrap();
    assert!(sample.is_paired());
    assert!(sample.missing_required().is_empty());
    let meta = &sample.metadata;
    assert_eq!(meta.source.as_deref(), Some("Mus musculus"));
    assert_eq!(meta.assembly.as_deref(), Some("GRCm39"));
    assert_eq!(meta.star_sjdb_overhang, Some(75));
    assert_eq!(meta.fragment_length_mean, Some(300.0));
    assert_eq!(meta.salmon_kmer_size, Some(31));
    assert_eq!(meta.adapter_3p.0.as_deref(), Some("AGATCGGAAGAGC"));
    assert_eq!(meta.adapter_3p.1.as_deref(), Some(PLACEHOLDER_SEQUENCE));
    assert!(
        meta.reference_sequences
            .as_ref()
            .unwrap()
            .ends_with("genomes/latest/GRCm39/GRCm39.fa")
    );
}

#[test]
fn explicit_organism_survives_inference() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let collaborators = Collaborators::new(MockInferrer::returning(inferred_mouse()));
    let mut registry = SampleRegistry::new();
    let mut sample = local("patient");
    sample.metadata.source = Some("human".to_string());
    registry.insert(sample).unwrap();

    run(&collaborators, &mut registry, &config, &CancelToken::new());

    assert_eq!(*collaborators.inferrer.calls.lock().unwrap(), 1);
    let sample = registry.successful().next().unwrap();
    assert_eq!(sample.metadata.source.as_deref(), Some("Homo sapiens"));
    assert_eq!(sample.metadata.read_orientation, Some(ReadOrientation::SR));
    assert_eq!(collaborators.genome.calls(), ["GRCh38"]);
}

#[test]
fn rerun_on_enriched_registry_changes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let collaborators = Collaborators::new(MockInferrer::returning(inferred_mouse()));
    let mut registry = SampleRegistry::new();
    registry.insert(remote("r1", "ERR0000071")).unwrap();
    registry.insert(local("l1")).unwrap();

    run(&collaborators, &mut registry, &config, &CancelToken::new());
    let before = registry.successful().cloned().collect::<Vec<_>>();
    let fetches = *collaborators.fetcher.calls.lock().unwrap();
    let inferences = *collaborators.inferrer.calls.lock().unwrap();
    let genomes = collaborators.genome.calls().len();

    let reports = run(&collaborators, &mut registry, &config, &CancelToken::new());

    assert_eq!(registry.successful().cloned().collect::<Vec<_>>(), before);
    assert_eq!(*collaborators.fetcher.calls.lock().unwrap(), fetches);
    assert_eq!(*collaborators.inferrer.calls.lock().unwrap(), inferences);
    assert_eq!(collaborators.genome.calls().len(), genomes);
    assert!(reports.iter().all(|report| report.updated == 0 && report.skipped == 2));
}

#[test]
fn one_genome_call_per_assembly() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let collaborators = Collaborators::new(MockInferrer::returning(inferred_mouse()));
    let mut registry = SampleRegistry::new();
    for index in 0..8 {
        registry.insert(local(&format!("s{index}"))).unwrap();
    }
    let mut human = local("h1");
    human.metadata.source = Some("9606".to_string());
    human.metadata.read_orientation = Some(ReadOrientation::U);
    registry.insert(human).unwrap();

    run(&collaborators, &mut registry, &config, &CancelToken::new());

    let mut calls = collaborators.genome.calls();
    calls.sort();
    assert_eq!(calls, ["GRCh38", "GRCm39"]);
    assert_eq!(*collaborators.inferrer.calls.lock().unwrap(), 8);
    assert_eq!(registry.successful().count(), 9);
}

#[test]
fn failed_fetch_excludes_only_that_sample() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let mut collaborators = Collaborators::new(MockInferrer::returning(inferred_mouse()));
    collaborators.fetcher.fail = true;
    let mut registry = SampleRegistry::new();
    registry.insert(remote("gone", "SRR7654321")).unwrap();
    registry.insert(local("here")).unwrap();

    let reports = run(&collaborators, &mut registry, &config, &CancelToken::new());

    let gone: SampleName = "gone".parse().unwrap();
    let failure = registry.get(&gone).unwrap().failure.clone().unwrap();
    assert_eq!(failure.stage, "remote fetch");
    assert!(failure.reason.contains("SRR7654321"));
    assert_eq!(reports[0].failed, 1);
    // Later stages only see the surviving sample.
    assert_eq!(*collaborators.inferrer.calls.lock().unwrap(), 1);
    assert_eq!(registry.successful().count(), 1);
}

#[test]
fn inference_failure_is_not_fatal_but_unknown_organism_is() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let collaborators = Collaborators::new(MockInferrer {
        calls: Mutex::new(0),
        result: Err("no reads".to_string()),
    });
    let mut registry = SampleRegistry::new();
    registry.insert(local("blank")).unwrap();
    let mut known = local("known");
    known.metadata.source = Some("mouse".to_string());
    registry.insert(known).unwrap();
    let mut exotic = local("exotic");
    exotic.metadata.source = Some("Danio rerio".to_string());
    registry.insert(exotic).unwrap();

    let reports = run(&collaborators, &mut registry, &config, &CancelToken::new());
    assert_eq!(reports[1].warned, 3);

    let reason = |name: &str| {
        let name: SampleName = name.parse().unwrap();
        registry
            .get(&name)
            .unwrap()
            .failure
            .as_ref()
            .map(|failure| failure.reason.clone())
    };
    assert_matches!(reason("blank"), Some(text) if text.contains("organism unknown"));
    assert_matches!(reason("exotic"), Some(text) if text.contains("Danio rerio"));
    assert_eq!(reason("known"), None);

    let known = registry.successful().next().unwrap();
    assert_eq!(known.metadata.read_orientation, None);
    assert_eq!(known.metadata.star_sjdb_overhang, Some(DEFAULT_STAR_SJDB_OVERHANG));
}

#[test]
fn cancelled_run_fails_pending_samples() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let collaborators = Collaborators::new(MockInferrer::returning(inferred_mouse()));
    let mut registry = SampleRegistry::new();
    registry.insert(remote("r1", "SRR1111111")).unwrap();
    registry.insert(local("l1")).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    run(&collaborators, &mut registry, &config, &cancel);

    assert_eq!(registry.successful().count(), 0);
    for entry in registry.iter() {
        let failure = entry.failure.as_ref().unwrap();
        assert_eq!(failure.reason, "cancelled during remote fetch");
    }
    assert_eq!(*collaborators.fetcher.calls.lock().unwrap(), 0);
    assert_eq!(*collaborators.inferrer.calls.lock().unwrap(), 0);
}
