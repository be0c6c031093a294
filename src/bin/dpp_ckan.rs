use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dpp_ckan::artifact;
use dpp_ckan::ckan::CkanHttpClient;
use dpp_ckan::config::{
    ArtifactFormat, DumperParameters, EnricherParameters, EnvResolver, ParametersLoader,
};
use dpp_ckan::domain::PackageDescriptor;
use dpp_ckan::dump::CkanDumper;
use dpp_ckan::enrich::ResourceEnricher;
use dpp_ckan::error::CkanError;
use dpp_ckan::output::{JsonOutput, PublicationSummary};
use dpp_ckan::pipeline::ResourceStream;

#[derive(Parser)]
#[command(name = "dpp-ckan")]
#[command(about = "Datapackage pipeline processors for CKAN")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Append an existing CKAN resource to a datapackage")]
    AddResource(StageArgs),
    #[command(about = "Publish a datapackage and its data to CKAN")]
    Dump(DumpArgs),
}

#[derive(Args)]
struct StageArgs {
    /// JSON object with the processor parameters
    #[arg(long)]
    parameters: PathBuf,

    /// datapackage.json to process
    #[arg(long)]
    datapackage: PathBuf,
}

#[derive(Args)]
struct DumpArgs {
    #[command(flatten)]
    stage: StageArgs,

    /// Directory streamed resource paths are relative to
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CkanError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CkanError) -> u8 {
    match error {
        CkanError::Configuration(_)
        | CkanError::Descriptor(_)
        | CkanError::ParametersRead(_)
        | CkanError::ParametersParse(_) => 2,
        CkanError::CatalogRequest { .. }
        | CkanError::NoRelatedDataset { .. }
        | CkanError::MalformedResponse { .. } => 3,
        CkanError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::AddResource(args) => run_add_resource(args),
        Commands::Dump(args) => run_dump(args),
    }
}

fn run_add_resource(args: StageArgs) -> miette::Result<()> {
    let params = EnricherParameters::from_map(ParametersLoader::load_map(&args.parameters)?)?;
    let mut package: PackageDescriptor = ParametersLoader::load(&args.datapackage)?;

    let client = CkanHttpClient::new(&params.connection, EnvResolver)?;
    let enricher = ResourceEnricher::new(client);
    enricher.enrich(&params, &mut package)?;
    JsonOutput::print_package(&package).into_diagnostic()?;
    Ok(())
}

fn run_dump(args: DumpArgs) -> miette::Result<()> {
    let params = DumperParameters::from_map(ParametersLoader::load_map(&args.stage.parameters)?)?;
    let package: PackageDescriptor = ParametersLoader::load(&args.stage.datapackage)?;
    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => args
            .stage
            .datapackage
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    let inputs = streamed_inputs(&package, &data_dir)?;

    let client = Rc::new(CkanHttpClient::new(&params.connection, EnvResolver)?);
    let dumper = CkanDumper::new(client, params);
    let mut publication = dumper.dump(package, inputs);

    let mut streams = 0usize;
    for stream in publication.by_ref() {
        let stream = stream?;
        let mut rows = 0u64;
        for row in stream.rows {
            row?;
            rows += 1;
        }
        info!(resource = %stream.spec.name, rows, "drained resource");
        streams += 1;
    }
    info!(streams, "publication finished");

    let summary = PublicationSummary::new(&publication.package(), publication.log());
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}

/// Row streams for the package's streaming resources, read from CSV or JSON
/// files under `data_dir`.
fn streamed_inputs(
    package: &PackageDescriptor,
    data_dir: &Path,
) -> Result<Vec<ResourceStream>, CkanError> {
    package
        .resources
        .iter()
        .filter(|resource| resource.streaming)
        .map(|resource| {
            let relative = resource.path.as_deref().ok_or_else(|| {
                CkanError::Descriptor(format!("streaming resource {} has no path", resource.name))
            })?;
            let path = data_dir.join(relative);
            let format = path
                .extension()
                .and_then(|extension| extension.to_str())
                .and_then(|extension| extension.parse().ok())
                .unwrap_or(ArtifactFormat::Csv);
            let rows = artifact::read_rows(&path, format)?;
            Ok(ResourceStream {
                spec: resource.clone(),
                rows,
            })
        })
        .collect()
}
