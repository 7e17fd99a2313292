use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_matches::assert_matches;

use kira_seqprep::config::{
    ConfigLayer, ConfigMerger, LayerSource, RunSection, SampleSection, UserSection,
};
use kira_seqprep::domain::{AdapterPair, DependencyMode, ExecutionMode, ReadOrientation};
use kira_seqprep::error::{ErrorClass, KiraError};

fn workflow_layer(dir: &Path) -> ConfigLayer {
    ConfigLayer {
        run: RunSection {
            workflow_directory: Some(dir.to_path_buf()),
            ..RunSection::default()
        },
        ..ConfigLayer::default()
    }
}

#[test]
fn later_layers_win_field_by_field() {
    let temp = tempfile::tempdir().unwrap();
    let custom_path = temp.path().join("custom.json");
    fs::write(
        &custom_path,
        r#"{
            "run": { "cores": 4, "execution_mode": "dry_run", "identifier": "batch-7" },
            "sample": { "source": "Mus musculus", "adapter_3p": ["AGATCGGAAG", null] },
            "user": { "emails": ["pi@lab.example.org"] }
        }"#,
    )
    .unwrap();

    let mut merger = ConfigMerger::new(ConfigLayer::defaults(Path::new("/home/u"))).unwrap();
    merger
        .push(&workflow_layer(temp.path()), LayerSource::UserDefaults)
        .unwrap();
    let custom = ConfigLayer::load(&custom_path, LayerSource::CustomFile).unwrap();
    merger.push(&custom, LayerSource::CustomFile).unwrap();
    let cli = ConfigLayer {
        run: RunSection {
            cores: Some(16),
            ..RunSection::default()
        },
        ..ConfigLayer::default()
    };
    merger.push(&cli, LayerSource::CommandLine).unwrap();
    let config = merger.resolve().unwrap();

    assert_eq!(config.run.cores, 16);
    assert_eq!(config.run.execution_mode, ExecutionMode::DryRun);
    assert_eq!(config.run.identifier, "batch-7");
    assert_eq!(config.run.working_directory, PathBuf::from("/home/u/.kira-seqprep"));
    assert_eq!(
        config.run.genome_assemblies_map,
        PathBuf::from("/home/u/.kira-seqprep/data/genome_assemblies.csv")
    );
    assert_eq!(config.sample.source.as_deref(), Some("Mus musculus"));
    assert_eq!(
        config.sample.adapter_3p,
        AdapterPair(Some("AGATCGGAAG".to_string()), None)
    );
    assert_eq!(config.fallbacks.fragment_length_mean, 300.0);
    assert_eq!(config.fallbacks.salmon_kmer_size, 31);
    assert_eq!(config.user.emails, ["pi@lab.example.org"]);
}

#[test]
fn merging_a_layer_twice_equals_merging_once() {
    let layer = ConfigLayer {
        run: RunSection {
            cores: Some(3),
            timeout_secs: Some(60),
            ..RunSection::default()
        },
        sample: SampleSection {
            read_orientation: Some("SR".to_string()),
            ..SampleSection::default()
        },
        user: UserSection {
            author: Some("Ada".to_string()),
            ..UserSection::default()
        },
    };
    let mut once = ConfigLayer::defaults(Path::new("/home/u"));
    once.merge(&layer);
    let mut twice = once.clone();
    twice.merge(&layer);
    assert_eq!(once, twice);
}

#[test]
fn unknown_enum_value_lists_accepted_values() {
    let temp = tempfile::tempdir().unwrap();
    let mut merger = ConfigMerger::new(ConfigLayer::defaults(temp.path())).unwrap();
    let layer = ConfigLayer {
        run: RunSection {
            dependency_mode: Some("docker".to_string()),
            ..RunSection::default()
        },
        ..ConfigLayer::default()
    };
    let err = merger.push(&layer, LayerSource::CommandLine).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert_matches!(
        &err,
        KiraError::UnknownEnumValue { field, layer, value, accepted }
            if field == "run.dependency_mode"
                && layer == "command line"
                && value == "docker"
                && accepted == "CONDA, SINGULARITY"
    );
}

#[test]
fn invalid_field_names_layer_and_value() {
    let temp = tempfile::tempdir().unwrap();
    let mut merger = ConfigMerger::new(ConfigLayer::defaults(temp.path())).unwrap();
    let layer = ConfigLayer {
        sample: SampleSection {
            salmon_kmer_size: Some(32),
            ..SampleSection::default()
        },
        ..ConfigLayer::default()
    };
    let err = merger.push(&layer, LayerSource::CustomFile).unwrap_err();
    assert_matches!(
        err,
        KiraError::InvalidConfigValue { field, value, .. }
            if field == "sample.salmon_kmer_size" && value == "32"
    );
}

#[test]
fn missing_workflow_directory_is_fatal() {
    let merger = ConfigMerger::new(ConfigLayer::defaults(Path::new("/home/u"))).unwrap();
    let err = merger.resolve().unwrap_err();
    assert_matches!(&err, KiraError::MissingConfigField(field) if field == "run.workflow_directory");
    assert_eq!(err.class(), ErrorClass::Configuration);

    let mut merger = ConfigMerger::new(ConfigLayer::defaults(Path::new("/home/u"))).unwrap();
    merger
        .push(
            &workflow_layer(Path::new("/definitely/not/here")),
            LayerSource::CommandLine,
        )
        .unwrap();
    assert_matches!(merger.resolve(), Err(KiraError::InvalidConfigValue { .. }));
}

#[test]
fn unknown_keys_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    fs::write(&path, r#"{ "run": { "threads": 4 } }"#).unwrap();
    assert_matches!(
        ConfigLayer::load(&path, LayerSource::CustomFile),
        Err(KiraError::ConfigParse { .. })
    );
}

#[test]
fn missing_user_file_is_an_empty_layer() {
    let temp = tempfile::tempdir().unwrap();
    let layer =
        ConfigLayer::load_optional(&temp.path().join("absent.json"), LayerSource::UserDefaults)
            .unwrap();
    assert_eq!(layer, ConfigLayer::default());
}

#[test]
fn dependency_mode_is_downgraded_per_stage() {
    let temp = tempfile::tempdir().unwrap();
    let mut merger = ConfigMerger::new(ConfigLayer::defaults(temp.path())).unwrap();
    let mut layer = workflow_layer(temp.path());
    layer.run.dependency_mode = Some("SINGULARITY".to_string());
    layer.run.timeout_secs = Some(90);
    layer.sample.read_orientation = Some("isf".to_string());
    merger.push(&layer, LayerSource::CommandLine).unwrap();
    let config = merger.resolve().unwrap();

    assert_eq!(config.run.dependency_mode, DependencyMode::Singularity);
    assert_eq!(config.run.fetch_dependency_mode, DependencyMode::Conda);
    assert_eq!(config.run.inference_dependency_mode, DependencyMode::Singularity);
    assert_eq!(config.run.timeout, Some(Duration::from_secs(90)));
    assert_eq!(config.sample.read_orientation, Some(ReadOrientation::ISF));
}
