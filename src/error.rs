use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Parse,
    Configuration,
    Enrichment,
    Assembly,
    Collaborator,
    Filesystem,
    Cancelled,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Parse => "parse",
            ErrorClass::Configuration => "configuration",
            ErrorClass::Enrichment => "enrichment",
            ErrorClass::Assembly => "assembly",
            ErrorClass::Collaborator => "collaborator",
            ErrorClass::Filesystem => "filesystem",
            ErrorClass::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid sample reference `{token}`: {reason}")]
    #[diagnostic(code(kira::reference))]
    InvalidReference { token: String, reason: String },

    #[error("invalid sample name: {0}")]
    InvalidSampleName(String),

    #[error("invalid SRA accession: {0}")]
    InvalidAccession(String),

    #[error("{count} sample names are used more than once")]
    #[diagnostic(code(kira::duplicates))]
    DuplicateSamples {
        count: usize,
        #[related]
        errors: Vec<KiraError>,
    },

    #[error("sample table {path}: {reason}")]
    #[diagnostic(code(kira::table))]
    TableSchema { path: PathBuf, reason: String },

    #[error("sample table {path}, row {row}: {reason}")]
    #[diagnostic(code(kira::table::row))]
    TableRow {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("sample table {path} rejected: {count} invalid row(s)")]
    #[diagnostic(
        code(kira::table),
        help("fix the listed rows; no sample of this table was registered")
    )]
    InvalidTable {
        path: PathBuf,
        count: usize,
        #[related]
        errors: Vec<KiraError>,
    },

    #[error("duplicate sample name: {0}")]
    #[diagnostic(help("assign distinct names with the `name@reference` syntax"))]
    DuplicateSample(String),

    #[error("invalid value for `{field}` from {layer}: `{value}` ({reason})")]
    #[diagnostic(code(kira::config))]
    InvalidConfigValue {
        field: String,
        layer: String,
        value: String,
        reason: String,
    },

    #[error("unknown value for `{field}` from {layer}: `{value}` (accepted: {accepted})")]
    #[diagnostic(code(kira::config))]
    UnknownEnumValue {
        field: String,
        layer: String,
        value: String,
        accepted: String,
    },

    #[error("missing required configuration field: {0}")]
    #[diagnostic(help("set it in the user defaults (`--init`), a config file or on the command line"))]
    MissingConfigField(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse {layer}: {message}")]
    ConfigParse { layer: String, message: String },

    #[error("invalid organism map {path}: {reason}")]
    OrganismMap { path: PathBuf, reason: String },

    #[error("organism not in assembly map: {0}")]
    OrganismNotMapped(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("genome request failed: {0}")]
    GenomeHttp(String),

    #[error("genome server returned status {status}: {message}")]
    GenomeStatus { status: u16, message: String },

    #[error("no samples left to run")]
    #[diagnostic(help("every sample was excluded; see the run summary for reasons"))]
    NoSamples,

    #[error("output location not writable: {path} ({message})")]
    OutputNotWritable { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl KiraError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KiraError::InvalidReference { .. }
            | KiraError::InvalidSampleName(_)
            | KiraError::InvalidAccession(_)
            | KiraError::DuplicateSamples { .. }
            | KiraError::TableSchema { .. }
            | KiraError::TableRow { .. }
            | KiraError::InvalidTable { .. }
            | KiraError::DuplicateSample(_) => ErrorClass::Parse,
            KiraError::InvalidConfigValue { .. }
            | KiraError::UnknownEnumValue { .. }
            | KiraError::MissingConfigField(_)
            | KiraError::ConfigRead(_)
            | KiraError::ConfigParse { .. }
            | KiraError::OrganismMap { .. } => ErrorClass::Configuration,
            KiraError::OrganismNotMapped(_) => ErrorClass::Enrichment,
            KiraError::MissingTool(_)
            | KiraError::ToolFailed { .. }
            | KiraError::GenomeHttp(_)
            | KiraError::GenomeStatus { .. } => ErrorClass::Collaborator,
            KiraError::NoSamples | KiraError::OutputNotWritable { .. } => ErrorClass::Assembly,
            KiraError::Filesystem(_) => ErrorClass::Filesystem,
            KiraError::Cancelled(_) => ErrorClass::Cancelled,
        }
    }
}
