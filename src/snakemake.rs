use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::domain::DependencyMode;
use crate::error::KiraError;
use crate::process::{self, CommandSpec};

/// Cores given to one per-sample workflow call. The pipeline pool already
/// runs `run.cores` samples at a time.
pub const SAMPLE_CALL_CORES: u32 = 1;

#[derive(Debug, Clone)]
pub struct Invocation {
    pub snakefile: PathBuf,
    pub configfile: PathBuf,
    pub directory: PathBuf,
    pub cores: u32,
    pub dependency_mode: DependencyMode,
    pub dry_run: bool,
}

impl Invocation {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--snakefile".to_string(),
            self.snakefile.display().to_string(),
            "--cores".to_string(),
            self.cores.to_string(),
            "--directory".to_string(),
            self.directory.display().to_string(),
            "--configfile".to_string(),
            self.configfile.display().to_string(),
            "--rerun-incomplete".to_string(),
        ];
        args.push(
            match self.dependency_mode {
                DependencyMode::Conda => "--use-conda",
                DependencyMode::Singularity => "--use-singularity",
            }
            .to_string(),
        );
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }
}

/// Locates and runs the `snakemake` executable.
#[derive(Debug, Clone)]
pub struct Snakemake {
    program: Option<PathBuf>,
}

impl Snakemake {
    pub fn new() -> Self {
        Self {
            program: process::find_in_path("snakemake"),
        }
    }

    pub fn with_program(program: PathBuf) -> Self {
        Self {
            program: Some(program),
        }
    }

    pub fn version(&self) -> Option<String> {
        let program = self.program.as_ref()?;
        process::tool_version(program, &["--version"])
    }

    pub fn run(
        &self,
        invocation: &Invocation,
        log_dir: &Path,
        label: &str,
        cancel: &CancelToken,
    ) -> Result<(), KiraError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| KiraError::MissingTool("snakemake".to_string()))?;
        let spec = CommandSpec {
            program: program.clone(),
            args: invocation.args(),
            cwd: Some(invocation.directory.clone()),
            log_dir: log_dir.to_path_buf(),
            label: label.to_string(),
        };
        process::run_logged(&spec, cancel)
    }
}

impl Default for Snakemake {
    fn default() -> Self {
        Self::new()
    }
}
