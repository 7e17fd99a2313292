use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_seqprep::app::{App, RunRequest, init_user_defaults};
use kira_seqprep::cancel::CancelToken;
use kira_seqprep::config::{
    ConfigLayer, ConfigMerger, LayerSource, RunSection, SampleSection, UserSection, home_dir,
    user_config_path,
};
use kira_seqprep::domain::AdapterPair;
use kira_seqprep::engine::SnakemakeEngine;
use kira_seqprep::error::{ErrorClass, KiraError};
use kira_seqprep::fetch::SnakemakeSraFetcher;
use kira_seqprep::genome::EnsemblGenomeClient;
use kira_seqprep::inference::SnakemakeInferrer;
use kira_seqprep::layout::Layout;
use kira_seqprep::output::{JsonOutput, OutputMode, TextOutput, TracingSink};
use kira_seqprep::reference::anchor_path;
use kira_seqprep::sample_table::TableOptions;
use kira_seqprep::snakemake::Snakemake;

#[derive(Parser)]
#[command(name = "kira-seqprep")]
#[command(about = "Resolve RNA-Seq sample references into a ready-to-run workflow configuration")]
#[command(version, author)]
struct Cli {
    /// Read files (`reads.fq.gz`, `mate1.fq.gz,mate2.fq.gz`), SRA run
    /// accessions, `name@reference` or `table:PATH`.
    #[arg(required_unless_present = "init")]
    references: Vec<String>,

    /// Additional JSON configuration file, applied after the user defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(
        long,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    verbosity: String,

    /// Write the merged configuration as the new user defaults and exit.
    #[arg(long)]
    init: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,

    /// Keep unknown sample table columns instead of rejecting the table.
    #[arg(long)]
    allow_extra_columns: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(flatten)]
    sample: SampleArgs,

    #[command(flatten)]
    user: UserArgs,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    identifier: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    working_directory: Option<PathBuf>,
    #[arg(long)]
    workflow_directory: Option<PathBuf>,
    /// DRY_RUN, PREPARE_RUN or RUN.
    #[arg(long)]
    execution_mode: Option<String>,
    #[arg(long)]
    cores: Option<u32>,
    /// CONDA or SINGULARITY.
    #[arg(long)]
    dependency_mode: Option<String>,
    #[arg(long)]
    genome_assemblies_map: Option<PathBuf>,
    /// Ensembl release to take genome resources from.
    #[arg(long)]
    resources_version: Option<u32>,
    #[arg(long)]
    rule_config: Option<PathBuf>,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args)]
struct SampleArgs {
    /// Organism, e.g. `Homo sapiens`.
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    read_orientation: Option<String>,
    #[arg(long)]
    fragment_length_mean: Option<f64>,
    #[arg(long)]
    fragment_length_sd: Option<f64>,
    #[arg(long)]
    star_sjdb_overhang: Option<u32>,
    #[arg(long)]
    salmon_kmer_size: Option<u32>,
    #[arg(long)]
    annotations: Option<PathBuf>,
    #[arg(long)]
    reference_sequences: Option<PathBuf>,
    /// `MATE1[,MATE2]`
    #[arg(long = "adapter-3p", value_parser = parse_adapter_pair)]
    adapter_3p: Option<AdapterPair>,
    #[arg(long = "adapter-5p", value_parser = parse_adapter_pair)]
    adapter_5p: Option<AdapterPair>,
    #[arg(long = "adapter-poly-3p", value_parser = parse_adapter_pair)]
    adapter_poly_3p: Option<AdapterPair>,
    #[arg(long = "adapter-poly-5p", value_parser = parse_adapter_pair)]
    adapter_poly_5p: Option<AdapterPair>,
}

#[derive(Args)]
struct UserArgs {
    #[arg(long)]
    author: Option<String>,
    #[arg(long = "email")]
    emails: Vec<String>,
    #[arg(long = "url")]
    urls: Vec<String>,
    #[arg(long = "affiliation")]
    affiliations: Vec<String>,
    #[arg(long)]
    logo: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error.class() {
        ErrorClass::Parse | ErrorClass::Configuration => 2,
        ErrorClass::Assembly => 3,
        ErrorClass::Collaborator => 4,
        ErrorClass::Cancelled => 130,
        ErrorClass::Enrichment | ErrorClass::Filesystem => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.verbosity);

    let cwd = std::env::current_dir().into_diagnostic()?;
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let user_path = user_config_path()?;
    let user_layer = ConfigLayer::load_optional(&user_path, LayerSource::UserDefaults)?;
    let custom_layer = cli
        .config
        .as_deref()
        .map(|path| ConfigLayer::load(&anchor_path(path, &cwd), LayerSource::CustomFile))
        .transpose()?;
    let cli_layer = command_line_layer(&cli, &cwd);

    if cli.init {
        let layers = [user_layer, custom_layer.unwrap_or_default(), cli_layer];
        let result = init_user_defaults(&user_path, &layers)?;
        match output_mode {
            OutputMode::Json => {
                serde_json::to_writer_pretty(std::io::stdout(), &result).into_diagnostic()?;
                println!();
            }
            OutputMode::Text => println!("user defaults written to {}", result.path.display()),
        }
        return Ok(());
    }

    let mut merger = ConfigMerger::new(ConfigLayer::defaults(&home_dir()?))?;
    merger.push(&user_layer, LayerSource::UserDefaults)?;
    if let Some(layer) = &custom_layer {
        merger.push(layer, LayerSource::CustomFile)?;
    }
    merger.push(&cli_layer, LayerSource::CommandLine)?;
    let config = merger.resolve()?;

    let cancel = CancelToken::with_timeout(config.run.timeout);
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received; stopping");
        handler_token.cancel();
    })
    .into_diagnostic()?;

    let snakemake = Snakemake::new();
    tracing::debug!(version = ?snakemake.version(), "snakemake");
    let layout = Layout::new(&config.run.working_directory, &config.run.identifier)?;
    let workflow = config.run.workflow_directory.clone();
    let app = App::new(
        SnakemakeSraFetcher::new(snakemake.clone(), workflow.clone()),
        SnakemakeInferrer::new(
            snakemake.clone(),
            workflow,
            layout.inference_root().into_std_path_buf(),
        ),
        EnsemblGenomeClient::new()?,
        SnakemakeEngine::new(snakemake),
    );
    let request = RunRequest {
        references: cli.references,
        anchor: cwd,
        table_options: TableOptions {
            allow_extra_columns: cli.allow_extra_columns,
        },
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.run(&config, &request, &cancel, &JsonOutput)?;
            JsonOutput::print_run(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.run(&config, &request, &cancel, &TracingSink)?;
            TextOutput::print_run(&result).into_diagnostic()?;
        }
    }
    Ok(())
}

fn init_tracing(verbosity: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn command_line_layer(cli: &Cli, cwd: &Path) -> ConfigLayer {
    let path = |value: &Option<PathBuf>| value.as_deref().map(|path| anchor_path(path, cwd));
    let list = |values: &Vec<String>| (!values.is_empty()).then(|| values.clone());
    let run = &cli.run;
    let sample = &cli.sample;
    let user = &cli.user;
    ConfigLayer {
        run: RunSection {
            identifier: run.identifier.clone(),
            description: run.description.clone(),
            working_directory: path(&run.working_directory),
            workflow_directory: path(&run.workflow_directory),
            execution_mode: run.execution_mode.clone(),
            cores: run.cores,
            dependency_mode: run.dependency_mode.clone(),
            genome_assemblies_map: path(&run.genome_assemblies_map),
            resources_version: run.resources_version,
            rule_config: path(&run.rule_config),
            timeout_secs: run.timeout_secs,
        },
        sample: SampleSection {
            source: sample.source.clone(),
            read_orientation: sample.read_orientation.clone(),
            fragment_length_mean: sample.fragment_length_mean,
            fragment_length_sd: sample.fragment_length_sd,
            star_sjdb_overhang: sample.star_sjdb_overhang,
            salmon_kmer_size: sample.salmon_kmer_size,
            annotations: path(&sample.annotations),
            reference_sequences: path(&sample.reference_sequences),
            adapter_3p: sample.adapter_3p.clone(),
            adapter_5p: sample.adapter_5p.clone(),
            adapter_poly_3p: sample.adapter_poly_3p.clone(),
            adapter_poly_5p: sample.adapter_poly_5p.clone(),
        },
        user: UserSection {
            author: user.author.clone(),
            emails: list(&user.emails),
            affiliations: list(&user.affiliations),
            urls: list(&user.urls),
            logo: user.logo.clone(),
        },
    }
}

fn parse_adapter_pair(value: &str) -> Result<AdapterPair, String> {
    let side = |raw: &str| {
        let raw = raw.trim();
        (!raw.is_empty()).then(|| raw.to_string())
    };
    let pair = match value.split_once(',') {
        Some((mate1, mate2)) => AdapterPair(side(mate1), side(mate2)),
        None => AdapterPair(side(value), None),
    };
    if pair.is_empty() {
        return Err("expected MATE1[,MATE2]".to_string());
    }
    Ok(pair)
}
