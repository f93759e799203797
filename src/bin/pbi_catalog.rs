use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use pbi_catalog::app::App;
use pbi_catalog::auth::AadTokenProvider;
use pbi_catalog::config::ConfigLoader;
use pbi_catalog::dax::DsCmdClient;
use pbi_catalog::error::CatalogError;
use pbi_catalog::export;
use pbi_catalog::rest::PowerBiRestClient;
use pbi_catalog::setup;

#[derive(Parser)]
#[command(name = "pbi-catalog")]
#[command(about = "Extract a Power BI tenant's catalog into analysis-ready tables")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run a full extraction and export the snapshot")]
    Extract(ExtractArgs),
    #[command(about = "List workspace ids the principal can access")]
    Workspaces,
    #[command(about = "Download DAX Studio portable if it is not installed")]
    Setup,
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(long, value_enum, default_value = "csv")]
    format: ExportFormat,

    /// Fail the process when anything was skipped or dropped.
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Csv,
    Xlsx,
    Json,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CatalogError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CatalogError) -> u8 {
    match error {
        CatalogError::MissingConfig
        | CatalogError::ConfigRead(_)
        | CatalogError::ConfigParse(_)
        | CatalogError::MissingCredential(_) => 2,
        CatalogError::AuthHttp(_) | CatalogError::AuthStatus { .. } => 4,
        CatalogError::ApiHttp(_)
        | CatalogError::ApiStatus { .. }
        | CatalogError::WorkspaceNotFound(_)
        | CatalogError::DaxTool { .. }
        | CatalogError::MissingTool(_) => 3,
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
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    match cli.command {
        Commands::Extract(args) => {
            let auth = AadTokenProvider::new(config.credentials.clone()).into_diagnostic()?;
            let api = PowerBiRestClient::new().into_diagnostic()?;
            let dax = DsCmdClient::new(config.dscmd_path.clone());
            let app = App::new(auth, api, dax);

            let (snapshot, report) = app.run(&config).into_diagnostic()?;

            match args.format {
                ExportFormat::Csv => {
                    export::export_csv(&snapshot, &config.output_dir).into_diagnostic()?;
                }
                ExportFormat::Xlsx => {
                    let path = config.output_dir.join("pbi_catalog.xlsx");
                    export::export_xlsx(&snapshot, &path).into_diagnostic()?;
                }
                ExportFormat::Json => {
                    let path = config.output_dir.join("pbi_catalog.json");
                    export::export_json(&snapshot, &path).into_diagnostic()?;
                }
            }

            let summary = serde_json::to_string_pretty(&report).into_diagnostic()?;
            println!("{summary}");

            if args.strict && !report.is_clean() {
                return Err(miette::Report::msg(format!(
                    "extraction incomplete: {} skipped item(s), {} failed relation(s), {} orphan row(s)",
                    report.skipped.len(),
                    report.failed_relations.len(),
                    report.merge.orphan_total(),
                )));
            }
            Ok(())
        }
        Commands::Workspaces => {
            let auth = AadTokenProvider::new(config.credentials.clone()).into_diagnostic()?;
            let api = PowerBiRestClient::new().into_diagnostic()?;
            let dax = DsCmdClient::new(config.dscmd_path.clone());
            let app = App::new(auth, api, dax);

            let ids = app.list_workspaces().into_diagnostic()?;
            for id in ids {
                println!("{id}");
            }
            Ok(())
        }
        Commands::Setup => {
            setup::ensure_dax_studio(&config.dscmd_path).into_diagnostic()?;
            Ok(())
        }
    }
}
