use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use foph_harvester::app::{self, GatherOutcome, Harvester};
use foph_harvester::catalog::CkanClient;
use foph_harvester::config::{ConfigLoader, HarvestConfig};
use foph_harvester::error::HarvestError;
use foph_harvester::output::{JsonOutput, OutputMode};
use foph_harvester::s3::S3Client;
use foph_harvester::store::Store;

#[derive(Parser)]
#[command(name = "foph-harvest")]
#[command(about = "Harvests FOPH open data metadata into a CKAN catalog")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show the harvester descriptor")]
    Info,
    #[command(about = "Gather, fetch and import in one go")]
    Run,
    #[command(about = "Read the metadata workbook and queue one object per dataset")]
    Gather,
    #[command(about = "Validate a gathered object")]
    Fetch(ObjectArgs),
    #[command(about = "Write a fetched object into the catalog")]
    Import(ObjectArgs),
    #[command(about = "List queued harvest objects")]
    Objects(ObjectsArgs),
}

#[derive(Args)]
struct ObjectArgs {
    object_id: String,
}

#[derive(Args)]
struct ObjectsArgs {
    #[arg(long)]
    job: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ObjectNotFound(_)
        | HarvestError::MissingConfig
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::MissingSetting(_) => 2,
        HarvestError::S3Http(_)
        | HarvestError::S3Status { .. }
        | HarvestError::RemoteList { .. }
        | HarvestError::CatalogHttp(_)
        | HarvestError::CatalogStatus { .. }
        | HarvestError::CatalogWrite(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    if let Commands::Info = cli.command {
        return JsonOutput::print_info(&app::info()).into_diagnostic();
    }

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = open_store(&config)?;

    if let Commands::Objects(args) = &cli.command {
        let objects = store.list_objects(args.job.as_deref())?;
        return JsonOutput::print_objects(&objects).into_diagnostic();
    }

    let objects = S3Client::new(config.bucket.clone(), config.http)?;
    let catalog = CkanClient::new(&config.catalog, config.http)?;
    let harvester = Harvester::new(config, store, objects, catalog);
    let sink = output_mode.sink();

    match cli.command {
        Commands::Run => {
            let report = harvester.run(sink)?;
            JsonOutput::print_run(&report).into_diagnostic()?;
            match report.gather_error {
                Some(error) => Err(miette::Report::msg(format!("gather failed: {error}"))),
                None => Ok(()),
            }
        }
        Commands::Gather => {
            let job = harvester.create_job()?;
            match harvester.gather(&job, sink) {
                GatherOutcome::Queued(report) => JsonOutput::print_gather(&report).into_diagnostic(),
                GatherOutcome::Failed { error, .. } => Err(error.into()),
            }
        }
        Commands::Fetch(args) => {
            let object = harvester.fetch(&args.object_id)?;
            JsonOutput::print_fetch(&object).into_diagnostic()
        }
        Commands::Import(args) => {
            let result = harvester.import(&args.object_id)?;
            JsonOutput::print_import(&result).into_diagnostic()
        }
        Commands::Info | Commands::Objects(_) => Ok(()),
    }
}

fn open_store(config: &HarvestConfig) -> Result<Store, HarvestError> {
    let store = match &config.store_dir {
        Some(dir) => Store::new_with_root(dir.clone()),
        None => Store::new()?,
    };
    store.ensure_root()?;
    Ok(store)
}
