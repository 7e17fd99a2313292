use std::path::PathBuf;

use crate::assembly::RunArtifacts;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::domain::ExecutionMode;
use crate::error::KiraError;
use crate::layout::Layout;
use crate::snakemake::{Invocation, Snakemake};

/// What the engine did with an assembled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineAction {
    /// `PREPARE_RUN`: artifacts written, nothing executed.
    Prepared,
    DryRun,
    Executed,
}

/// Hands an assembled run to the downstream workflow.
pub trait ExecutionEngine: Send + Sync {
    fn execute(
        &self,
        artifacts: &RunArtifacts,
        config: &Config,
        layout: &Layout,
        cancel: &CancelToken,
    ) -> Result<EngineAction, KiraError>;
}

#[derive(Debug, Clone, Default)]
pub struct SnakemakeEngine {
    snakemake: Snakemake,
}

impl SnakemakeEngine {
    pub fn new(snakemake: Snakemake) -> Self {
        Self { snakemake }
    }

    pub fn invocation(&self, artifacts: &RunArtifacts, config: &Config, layout: &Layout) -> Invocation {
        Invocation {
            snakefile: snakefile(&config.run.workflow_directory),
            configfile: artifacts.workflow_config.clone(),
            directory: layout.zarp_root().into_std_path_buf(),
            cores: config.run.cores,
            dependency_mode: config.run.dependency_mode,
            dry_run: config.run.execution_mode == ExecutionMode::DryRun,
        }
    }
}

impl ExecutionEngine for SnakemakeEngine {
    fn execute(
        &self,
        artifacts: &RunArtifacts,
        config: &Config,
        layout: &Layout,
        cancel: &CancelToken,
    ) -> Result<EngineAction, KiraError> {
        let action = match config.run.execution_mode {
            ExecutionMode::PrepareRun => {
                tracing::info!(run_dir = %artifacts.run_dir.display(), "run prepared; workflow not started");
                return Ok(EngineAction::Prepared);
            }
            ExecutionMode::DryRun => EngineAction::DryRun,
            ExecutionMode::Run => EngineAction::Executed,
        };
        let invocation = self.invocation(artifacts, config, layout);
        tracing::info!(
            snakefile = %invocation.snakefile.display(),
            cores = invocation.cores,
            dry_run = invocation.dry_run,
            "starting workflow"
        );
        self.snakemake.run(
            &invocation,
            layout.logs_dir().as_std_path(),
            "zarp",
            cancel,
        )?;
        Ok(action)
    }
}

fn snakefile(workflow_directory: &std::path::Path) -> PathBuf {
    workflow_directory.join("workflow").join("Snakefile")
}
