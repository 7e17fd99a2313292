use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static ACCESSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[DES]RR\d{6,}$").unwrap());

const READ_FILE_SUFFIXES: &[&str] = &[".fastq.gz", ".fq.gz", ".fastq", ".fq", ".gz"];

/// Closed set of string-valued options.
///
/// Matching ignores ASCII case; the canonical spelling is upper case.
pub trait Choice: Sized + Copy + 'static {
    const ACCEPTED: &'static [Self];

    fn as_str(&self) -> &'static str;

    fn parse_choice(value: &str) -> Option<Self> {
        let wanted = value.trim();
        Self::ACCEPTED
            .iter()
            .copied()
            .find(|choice| choice.as_str().eq_ignore_ascii_case(wanted))
    }

    fn accepted_list() -> String {
        Self::ACCEPTED
            .iter()
            .map(|choice| choice.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadOrientation {
    SF,
    SR,
    U,
    ISF,
    ISR,
    IU,
}

impl Choice for ReadOrientation {
    const ACCEPTED: &'static [Self] = &[
        ReadOrientation::SF,
        ReadOrientation::SR,
        ReadOrientation::U,
        ReadOrientation::ISF,
        ReadOrientation::ISR,
        ReadOrientation::IU,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            ReadOrientation::SF => "SF",
            ReadOrientation::SR => "SR",
            ReadOrientation::U => "U",
            ReadOrientation::ISF => "ISF",
            ReadOrientation::ISR => "ISR",
            ReadOrientation::IU => "IU",
        }
    }
}

impl fmt::Display for ReadOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    DryRun,
    PrepareRun,
    Run,
}

impl Choice for ExecutionMode {
    const ACCEPTED: &'static [Self] = &[
        ExecutionMode::DryRun,
        ExecutionMode::PrepareRun,
        ExecutionMode::Run,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::DryRun => "DRY_RUN",
            ExecutionMode::PrepareRun => "PREPARE_RUN",
            ExecutionMode::Run => "RUN",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyMode {
    Conda,
    Singularity,
}

impl Choice for DependencyMode {
    const ACCEPTED: &'static [Self] = &[DependencyMode::Conda, DependencyMode::Singularity];

    fn as_str(&self) -> &'static str {
        match self {
            DependencyMode::Conda => "CONDA",
            DependencyMode::Singularity => "SINGULARITY",
        }
    }
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessionId(String);

impl AccessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(value: &str) -> bool {
        ACCESSION_PATTERN.is_match(&value.trim().to_uppercase())
    }
}

impl fmt::Display for AccessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccessionId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !ACCESSION_PATTERN.is_match(&normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleName(String);

impl SampleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds a name from a file path or accession: the basename with read-file
    /// suffixes removed, every character outside `[A-Za-z0-9._-]` replaced by `_`.
    pub fn derive(raw: &str) -> Result<Self, KiraError> {
        let base = Path::new(raw.trim())
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default();
        let stem = strip_read_suffix(base);
        let sanitized = stem
            .chars()
            .map(|ch| if is_name_char(ch) { ch } else { '_' })
            .collect::<String>();
        if sanitized.is_empty() {
            return Err(KiraError::InvalidSampleName(raw.to_string()));
        }
        Ok(Self(sanitized))
    }
}

impl fmt::Display for SampleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleName {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(is_name_char) {
            return Err(KiraError::InvalidSampleName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

pub fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')
}

fn strip_read_suffix(base: &str) -> &str {
    let lower = base.to_ascii_lowercase();
    for suffix in READ_FILE_SUFFIXES {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            return &base[..base.len() - suffix.len()];
        }
    }
    base
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Library {
    SingleEnd { mate1: PathBuf },
    PairedEnd { mate1: PathBuf, mate2: PathBuf },
    Remote { accession: AccessionId },
}

impl Library {
    pub fn layout(&self) -> &'static str {
        match self {
            Library::SingleEnd { .. } => "single-end",
            Library::PairedEnd { .. } => "paired-end",
            Library::Remote { .. } => "remote",
        }
    }

    pub fn is_local(&self) -> bool {
        !matches!(self, Library::Remote { .. })
    }
}

/// Mate 1 and mate 2 values of a per-mate setting such as an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterPair(pub Option<String>, pub Option<String>);

impl AdapterPair {
    pub fn is_empty(&self) -> bool {
        self.0.is_none() && self.1.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleMetadata {
    pub source: Option<String>,
    pub assembly: Option<String>,
    pub read_orientation: Option<ReadOrientation>,
    pub fragment_length_mean: Option<f64>,
    pub fragment_length_sd: Option<f64>,
    pub star_sjdb_overhang: Option<u32>,
    pub salmon_kmer_size: Option<u32>,
    pub max_read_length: Option<u32>,
    pub reference_sequences: Option<PathBuf>,
    pub annotations: Option<PathBuf>,
    pub adapter_3p: AdapterPair,
    pub adapter_5p: AdapterPair,
    pub adapter_poly_3p: AdapterPair,
    pub adapter_poly_5p: AdapterPair,
}

impl SampleMetadata {
    /// Copies every value of `other` into a slot that is still empty here.
    /// Values already present are never replaced. Returns whether anything changed.
    pub fn fill_missing(&mut self, other: &SampleMetadata) -> bool {
        let mut changed = false;
        fill(&mut self.source, &other.source, &mut changed);
        fill(&mut self.assembly, &other.assembly, &mut changed);
        fill(&mut self.read_orientation, &other.read_orientation, &mut changed);
        fill(
            &mut self.fragment_length_mean,
            &other.fragment_length_mean,
            &mut changed,
        );
        fill(
            &mut self.fragment_length_sd,
            &other.fragment_length_sd,
            &mut changed,
        );
        fill(
            &mut self.star_sjdb_overhang,
            &other.star_sjdb_overhang,
            &mut changed,
        );
        fill(&mut self.salmon_kmer_size, &other.salmon_kmer_size, &mut changed);
        fill(&mut self.max_read_length, &other.max_read_length, &mut changed);
        fill(
            &mut self.reference_sequences,
            &other.reference_sequences,
            &mut changed,
        );
        fill(&mut self.annotations, &other.annotations, &mut changed);
        for (slot, value) in [
            (&mut self.adapter_3p, &other.adapter_3p),
            (&mut self.adapter_5p, &other.adapter_5p),
            (&mut self.adapter_poly_3p, &other.adapter_poly_3p),
            (&mut self.adapter_poly_5p, &other.adapter_poly_5p),
        ] {
            fill(&mut slot.0, &value.0, &mut changed);
            fill(&mut slot.1, &value.1, &mut changed);
        }
        changed
    }

    pub fn has_genome_resources(&self) -> bool {
        self.reference_sequences.is_some() && self.annotations.is_some()
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>, changed: &mut bool) {
    if slot.is_none() && value.is_some() {
        *slot = value.clone();
        *changed = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleDescriptor {
    pub name: SampleName,
    pub library: Library,
    pub metadata: SampleMetadata,
    /// Passthrough columns from a sample table, kept verbatim.
    pub extra: BTreeMap<String, String>,
}

impl SampleDescriptor {
    pub fn new(name: SampleName, library: Library) -> Self {
        Self {
            name,
            library,
            metadata: SampleMetadata::default(),
            extra: BTreeMap::new(),
        }
    }

    pub fn mates(&self) -> Option<(&Path, Option<&Path>)> {
        match &self.library {
            Library::SingleEnd { mate1 } => Some((mate1.as_path(), None)),
            Library::PairedEnd { mate1, mate2 } => Some((mate1.as_path(), Some(mate2.as_path()))),
            Library::Remote { .. } => None,
        }
    }

    pub fn accession(&self) -> Option<&AccessionId> {
        match &self.library {
            Library::Remote { accession } => Some(accession),
            _ => None,
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self.library, Library::PairedEnd { .. })
    }

    /// Replaces the accession of a remote library with the fetched read files.
    pub fn materialize(&mut self, mate1: PathBuf, mate2: Option<PathBuf>) -> Result<(), KiraError> {
        if self.library.is_local() {
            return Err(KiraError::InvalidReference {
                token: self.name.to_string(),
                reason: "library already has local read files".to_string(),
            });
        }
        self.library = match mate2 {
            Some(mate2) => Library::PairedEnd { mate1, mate2 },
            None => Library::SingleEnd { mate1 },
        };
        Ok(())
    }

    /// Fields the downstream workflow cannot run without.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.library.is_local() {
            missing.push("read files");
        }
        if self.metadata.source.is_none() {
            missing.push("source");
        }
        if self.metadata.read_orientation.is_none() {
            missing.push("read_orientation");
        }
        if self.metadata.reference_sequences.is_none() {
            missing.push("reference_sequences");
        }
        if self.metadata.annotations.is_none() {
            missing.push("annotations");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accession_is_uppercased() {
        let id: AccessionId = "srr1234567".parse().unwrap();
        assert_eq!(id.as_str(), "SRR1234567");
    }

    #[test]
    fn derive_strips_read_suffixes() {
        let name = SampleName::derive("/data/run 1/sample_1.fq.gz").unwrap();
        assert_eq!(name.as_str(), "sample_1");
        let name = SampleName::derive("lib+x.FASTQ").unwrap();
        assert_eq!(name.as_str(), "lib_x");
    }

    #[test]
    fn fill_missing_keeps_present_values() {
        let mut meta = SampleMetadata {
            source: Some("Homo sapiens".to_string()),
            adapter_3p: AdapterPair(Some("AAA".to_string()), None),
            ..SampleMetadata::default()
        };
        let other = SampleMetadata {
            source: Some("Mus musculus".to_string()),
            read_orientation: Some(ReadOrientation::SR),
            adapter_3p: AdapterPair(Some("CCC".to_string()), Some("GGG".to_string())),
            ..SampleMetadata::default()
        };
        assert!(meta.fill_missing(&other));
        assert_eq!(meta.source.as_deref(), Some("Homo sapiens"));
        assert_eq!(meta.read_orientation, Some(ReadOrientation::SR));
        assert_eq!(meta.adapter_3p.0.as_deref(), Some("AAA"));
        assert_eq!(meta.adapter_3p.1.as_deref(), Some("GGG"));
        assert!(!meta.fill_missing(&other));
    }

    #[test]
    fn choice_matching_ignores_case() {
        assert_eq!(
            ExecutionMode::parse_choice("dry_run"),
            Some(ExecutionMode::DryRun)
        );
        assert_eq!(ReadOrientation::parse_choice("XX"), None);
        assert_eq!(DependencyMode::accepted_list(), "CONDA, SINGULARITY");
    }
}
