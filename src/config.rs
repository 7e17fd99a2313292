use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AdapterPair, Choice, DependencyMode, ExecutionMode, ReadOrientation, SampleMetadata,
};
use crate::error::KiraError;
use crate::validate;

pub const APP_DIR: &str = "kira-seqprep";
pub const USER_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_CORES: u32 = 1;
pub const DEFAULT_FRAGMENT_LENGTH_MEAN: f64 = 300.0;
pub const DEFAULT_FRAGMENT_LENGTH_SD: f64 = 100.0;
pub const DEFAULT_SALMON_KMER_SIZE: u32 = 31;

/// Dependency modes the remote fetch workflow can run with.
pub const FETCH_DEPENDENCY_MODES: &[DependencyMode] = &[DependencyMode::Conda];
/// Dependency modes the metadata inference workflow can run with.
pub const INFERENCE_DEPENDENCY_MODES: &[DependencyMode] =
    &[DependencyMode::Conda, DependencyMode::Singularity];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSource {
    Defaults,
    UserDefaults,
    CustomFile,
    CommandLine,
    Merged,
}

impl fmt::Display for LayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LayerSource::Defaults => "built-in defaults",
            LayerSource::UserDefaults => "user defaults file",
            LayerSource::CustomFile => "config file",
            LayerSource::CommandLine => "command line",
            LayerSource::Merged => "merged configuration",
        };
        write!(f, "{label}")
    }
}

/// One configuration source. Every field is optional; an absent field leaves
/// the value of earlier layers untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub sample: SampleSection,
    #[serde(default)]
    pub user: UserSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub workflow_directory: Option<PathBuf>,
    pub execution_mode: Option<String>,
    pub cores: Option<u32>,
    pub dependency_mode: Option<String>,
    pub genome_assemblies_map: Option<PathBuf>,
    pub resources_version: Option<u32>,
    pub rule_config: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SampleSection {
    pub source: Option<String>,
    pub read_orientation: Option<String>,
    pub fragment_length_mean: Option<f64>,
    pub fragment_length_sd: Option<f64>,
    pub star_sjdb_overhang: Option<u32>,
    pub salmon_kmer_size: Option<u32>,
    pub annotations: Option<PathBuf>,
    pub reference_sequences: Option<PathBuf>,
    pub adapter_3p: Option<AdapterPair>,
    pub adapter_5p: Option<AdapterPair>,
    pub adapter_poly_3p: Option<AdapterPair>,
    pub adapter_poly_5p: Option<AdapterPair>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserSection {
    pub author: Option<String>,
    pub emails: Option<Vec<String>>,
    pub affiliations: Option<Vec<String>>,
    pub urls: Option<Vec<String>>,
    pub logo: Option<String>,
}

impl ConfigLayer {
    /// Hardwired defaults, the first merge layer.
    pub fn defaults(home: &Path) -> Self {
        Self {
            run: RunSection {
                working_directory: Some(home.join(format!(".{APP_DIR}"))),
                execution_mode: Some(ExecutionMode::Run.as_str().to_string()),
                cores: Some(DEFAULT_CORES),
                dependency_mode: Some(DependencyMode::Conda.as_str().to_string()),
                ..RunSection::default()
            },
            sample: SampleSection {
                fragment_length_mean: Some(DEFAULT_FRAGMENT_LENGTH_MEAN),
                fragment_length_sd: Some(DEFAULT_FRAGMENT_LENGTH_SD),
                salmon_kmer_size: Some(DEFAULT_SALMON_KMER_SIZE),
                ..SampleSection::default()
            },
            user: UserSection::default(),
        }
    }

    pub fn load(path: &Path, source: LayerSource) -> Result<Self, KiraError> {
        let content =
            fs::read_to_string(path).map_err(|_| KiraError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse {
            layer: format!("{source} {}", path.display()),
            message: err.to_string(),
        })
    }

    /// Like [`ConfigLayer::load`], but a missing file is an empty layer.
    pub fn load_optional(path: &Path, source: LayerSource) -> Result<Self, KiraError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path, source)
    }

    /// Overwrites every field that `later` sets. Applying the same layer twice
    /// gives the same result as applying it once.
    pub fn merge(&mut self, later: &ConfigLayer) {
        let run = &later.run;
        overlay(&mut self.run.identifier, &run.identifier);
        overlay(&mut self.run.description, &run.description);
        overlay(&mut self.run.working_directory, &run.working_directory);
        overlay(&mut self.run.workflow_directory, &run.workflow_directory);
        overlay(&mut self.run.execution_mode, &run.execution_mode);
        overlay(&mut self.run.cores, &run.cores);
        overlay(&mut self.run.dependency_mode, &run.dependency_mode);
        overlay(&mut self.run.genome_assemblies_map, &run.genome_assemblies_map);
        overlay(&mut self.run.resources_version, &run.resources_version);
        overlay(&mut self.run.rule_config, &run.rule_config);
        overlay(&mut self.run.timeout_secs, &run.timeout_secs);

        let sample = &later.sample;
        overlay(&mut self.sample.source, &sample.source);
        overlay(&mut self.sample.read_orientation, &sample.read_orientation);
        overlay(&mut self.sample.fragment_length_mean, &sample.fragment_length_mean);
        overlay(&mut self.sample.fragment_length_sd, &sample.fragment_length_sd);
        overlay(&mut self.sample.star_sjdb_overhang, &sample.star_sjdb_overhang);
        overlay(&mut self.sample.salmon_kmer_size, &sample.salmon_kmer_size);
        overlay(&mut self.sample.annotations, &sample.annotations);
        overlay(&mut self.sample.reference_sequences, &sample.reference_sequences);
        overlay(&mut self.sample.adapter_3p, &sample.adapter_3p);
        overlay(&mut self.sample.adapter_5p, &sample.adapter_5p);
        overlay(&mut self.sample.adapter_poly_3p, &sample.adapter_poly_3p);
        overlay(&mut self.sample.adapter_poly_5p, &sample.adapter_poly_5p);

        let user = &later.user;
        overlay(&mut self.user.author, &user.author);
        overlay(&mut self.user.emails, &user.emails);
        overlay(&mut self.user.affiliations, &user.affiliations);
        overlay(&mut self.user.urls, &user.urls);
        overlay(&mut self.user.logo, &user.logo);
    }

    /// Checks every field this layer sets; the first violation is returned.
    pub fn validate(&self, source: LayerSource) -> Result<(), KiraError> {
        let check = FieldCheck { source };
        let run = &self.run;
        check.opt("run.identifier", &run.identifier, |value| validate::identifier(value))?;
        check.opt_path("run.working_directory", &run.working_directory)?;
        check.opt_path("run.workflow_directory", &run.workflow_directory)?;
        check.choice::<ExecutionMode>("run.execution_mode", &run.execution_mode)?;
        check.opt("run.cores", &run.cores, |value| validate::cores(*value))?;
        check.choice::<DependencyMode>("run.dependency_mode", &run.dependency_mode)?;
        check.opt_path("run.genome_assemblies_map", &run.genome_assemblies_map)?;
        check.opt("run.resources_version", &run.resources_version, |value| {
            validate::at_least_one(u64::from(*value))
        })?;
        check.opt_path("run.rule_config", &run.rule_config)?;
        check.opt("run.timeout_secs", &run.timeout_secs, |value| {
            validate::at_least_one(*value)
        })?;

        let sample = &self.sample;
        check.opt("sample.source", &sample.source, |value| {
            if value.trim().is_empty() {
                Err("must not be empty".to_string())
            } else {
                Ok(())
            }
        })?;
        check.choice::<ReadOrientation>("sample.read_orientation", &sample.read_orientation)?;
        check.opt("sample.fragment_length_mean", &sample.fragment_length_mean, |value| {
            validate::fragment_mean(*value)
        })?;
        check.opt("sample.fragment_length_sd", &sample.fragment_length_sd, |value| {
            validate::fragment_sd(*value)
        })?;
        check.opt("sample.star_sjdb_overhang", &sample.star_sjdb_overhang, |value| {
            validate::overhang(*value)
        })?;
        check.opt("sample.salmon_kmer_size", &sample.salmon_kmer_size, |value| {
            validate::kmer_size(*value)
        })?;
        check.opt_path("sample.annotations", &sample.annotations)?;
        check.opt_path("sample.reference_sequences", &sample.reference_sequences)?;
        for (field, pair) in [
            ("sample.adapter_3p", &sample.adapter_3p),
            ("sample.adapter_5p", &sample.adapter_5p),
            ("sample.adapter_poly_3p", &sample.adapter_poly_3p),
            ("sample.adapter_poly_5p", &sample.adapter_poly_5p),
        ] {
            if let Some(pair) = pair {
                check.opt(field, &pair.0, |value| validate::sequence(value))?;
                check.opt(field, &pair.1, |value| validate::sequence(value))?;
            }
        }

        let user = &self.user;
        for email in user.emails.iter().flatten() {
            check.value("user.emails", email, validate::email(email))?;
        }
        for url in user.urls.iter().flatten() {
            check.value("user.urls", url, validate::url(url))?;
        }
        Ok(())
    }
}

fn overlay<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if let Some(value) = value {
        *slot = Some(value.clone());
    }
}

struct FieldCheck {
    source: LayerSource,
}

impl FieldCheck {
    fn value<V: fmt::Debug>(
        &self,
        field: &str,
        value: &V,
        outcome: Result<(), String>,
    ) -> Result<(), KiraError> {
        outcome.map_err(|reason| KiraError::InvalidConfigValue {
            field: field.to_string(),
            layer: self.source.to_string(),
            value: display_value(value),
            reason,
        })
    }

    fn opt<V: fmt::Debug>(
        &self,
        field: &str,
        value: &Option<V>,
        rule: impl Fn(&V) -> Result<(), String>,
    ) -> Result<(), KiraError> {
        match value {
            Some(value) => self.value(field, value, rule(value)),
            None => Ok(()),
        }
    }

    fn opt_path(&self, field: &str, value: &Option<PathBuf>) -> Result<(), KiraError> {
        self.opt(field, value, |path| validate::path(path))
    }

    fn choice<T: Choice>(&self, field: &str, value: &Option<String>) -> Result<(), KiraError> {
        match value {
            Some(raw) => parse_choice::<T>(field, raw, self.source).map(|_| ()),
            None => Ok(()),
        }
    }
}

fn display_value<V: fmt::Debug>(value: &V) -> String {
    let rendered = format!("{value:?}");
    rendered.trim_matches('"').to_string()
}

fn parse_choice<T: Choice>(field: &str, raw: &str, source: LayerSource) -> Result<T, KiraError> {
    T::parse_choice(raw).ok_or_else(|| KiraError::UnknownEnumValue {
        field: field.to_string(),
        layer: source.to_string(),
        value: raw.to_string(),
        accepted: T::accepted_list(),
    })
}

/// Folds configuration layers in precedence order, validating each layer
/// before it is applied.
#[derive(Debug, Clone)]
pub struct ConfigMerger {
    merged: ConfigLayer,
}

impl ConfigMerger {
    pub fn new(defaults: ConfigLayer) -> Result<Self, KiraError> {
        defaults.validate(LayerSource::Defaults)?;
        Ok(Self { merged: defaults })
    }

    pub fn push(&mut self, layer: &ConfigLayer, source: LayerSource) -> Result<(), KiraError> {
        layer.validate(source)?;
        self.merged.merge(layer);
        tracing::debug!(layer = %source, "merged configuration layer");
        Ok(())
    }

    pub fn resolve(self) -> Result<Config, KiraError> {
        Config::from_layer(self.merged)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub identifier: String,
    pub description: Option<String>,
    pub working_directory: PathBuf,
    pub workflow_directory: PathBuf,
    pub execution_mode: ExecutionMode,
    pub cores: u32,
    pub dependency_mode: DependencyMode,
    /// Dependency mode used for remote fetch after capability downgrade.
    pub fetch_dependency_mode: DependencyMode,
    /// Dependency mode used for metadata inference after capability downgrade.
    pub inference_dependency_mode: DependencyMode,
    pub genome_assemblies_map: PathBuf,
    pub resources_version: Option<u32>,
    pub rule_config: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fallbacks {
    pub fragment_length_mean: f64,
    pub fragment_length_sd: f64,
    pub salmon_kmer_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserConfig {
    pub author: Option<String>,
    pub emails: Vec<String>,
    pub affiliations: Vec<String>,
    pub urls: Vec<String>,
    pub logo: Option<String>,
}

/// Resolved run configuration. Built once, then shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub run: RunConfig,
    /// Sample values given explicitly by a configuration layer.
    pub sample: SampleMetadata,
    /// Values used only where a sample still lacks them after enrichment.
    pub fallbacks: Fallbacks,
    pub user: UserConfig,
}

impl Config {
    pub fn from_layer(layer: ConfigLayer) -> Result<Self, KiraError> {
        let source = LayerSource::Merged;
        let ConfigLayer { run, sample, user } = layer;

        let working_directory = run
            .working_directory
            .ok_or_else(|| KiraError::MissingConfigField("run.working_directory".to_string()))?;
        let workflow_directory = run
            .workflow_directory
            .ok_or_else(|| KiraError::MissingConfigField("run.workflow_directory".to_string()))?;
        if !workflow_directory.is_dir() {
            return Err(KiraError::InvalidConfigValue {
                field: "run.workflow_directory".to_string(),
                layer: source.to_string(),
                value: workflow_directory.display().to_string(),
                reason: "not an existing directory".to_string(),
            });
        }
        let execution_mode = parse_choice::<ExecutionMode>(
            "run.execution_mode",
            run.execution_mode.as_deref().unwrap_or("RUN"),
            source,
        )?;
        let dependency_mode = parse_choice::<DependencyMode>(
            "run.dependency_mode",
            run.dependency_mode.as_deref().unwrap_or("CONDA"),
            source,
        )?;
        let genome_assemblies_map = run.genome_assemblies_map.unwrap_or_else(|| {
            working_directory
                .join("data")
                .join("genome_assemblies.csv")
        });
        let identifier = run
            .identifier
            .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string());

        let read_orientation = match sample.read_orientation.as_deref() {
            Some(raw) => Some(parse_choice::<ReadOrientation>(
                "sample.read_orientation",
                raw,
                source,
            )?),
            None => None,
        };

        Ok(Self {
            run: RunConfig {
                identifier,
                description: run.description,
                working_directory,
                workflow_directory,
                execution_mode,
                cores: run.cores.unwrap_or(DEFAULT_CORES),
                dependency_mode,
                fetch_dependency_mode: downgrade("remote fetch", dependency_mode, FETCH_DEPENDENCY_MODES),
                inference_dependency_mode: downgrade(
                    "metadata inference",
                    dependency_mode,
                    INFERENCE_DEPENDENCY_MODES,
                ),
                genome_assemblies_map,
                resources_version: run.resources_version,
                rule_config: run.rule_config,
                timeout: run.timeout_secs.map(Duration::from_secs),
            },
            sample: SampleMetadata {
                source: sample.source,
                read_orientation,
                star_sjdb_overhang: sample.star_sjdb_overhang,
                annotations: sample.annotations,
                reference_sequences: sample.reference_sequences,
                adapter_3p: sample.adapter_3p.unwrap_or_default(),
                adapter_5p: sample.adapter_5p.unwrap_or_default(),
                adapter_poly_3p: sample.adapter_poly_3p.unwrap_or_default(),
                adapter_poly_5p: sample.adapter_poly_5p.unwrap_or_default(),
                ..SampleMetadata::default()
            },
            fallbacks: Fallbacks {
                fragment_length_mean: sample
                    .fragment_length_mean
                    .unwrap_or(DEFAULT_FRAGMENT_LENGTH_MEAN),
                fragment_length_sd: sample
                    .fragment_length_sd
                    .unwrap_or(DEFAULT_FRAGMENT_LENGTH_SD),
                salmon_kmer_size: sample.salmon_kmer_size.unwrap_or(DEFAULT_SALMON_KMER_SIZE),
            },
            user: UserConfig {
                author: user.author,
                emails: user.emails.unwrap_or_default(),
                affiliations: user.affiliations.unwrap_or_default(),
                urls: user.urls.unwrap_or_default(),
                logo: user.logo,
            },
        })
    }
}

fn downgrade(stage: &str, wanted: DependencyMode, supported: &[DependencyMode]) -> DependencyMode {
    if supported.contains(&wanted) {
        return wanted;
    }
    let fallback = supported.first().copied().unwrap_or(DependencyMode::Conda);
    tracing::warn!(
        stage,
        requested = %wanted,
        using = %fallback,
        "dependency mode not supported by stage; downgrading"
    );
    fallback
}

pub fn home_dir() -> Result<PathBuf, KiraError> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| KiraError::Filesystem("unable to resolve home directory".to_string()))
}

pub fn user_config_path() -> Result<PathBuf, KiraError> {
    BaseDirs::new()
        .map(|dirs| dirs.config_dir().join(APP_DIR).join(USER_CONFIG_FILE))
        .ok_or_else(|| KiraError::Filesystem("unable to resolve config directory".to_string()))
}
