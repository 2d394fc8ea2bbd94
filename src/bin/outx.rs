use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use offline_update_transfer::app::{
    App, ExportRequest, ExportResult, FetchRequest, FetchResult, ImportRequest, ImportResult,
    ProgressSink,
};
use offline_update_transfer::config::{ConfigLoader, Settings};
use offline_update_transfer::console::ConsoleProgress;
use offline_update_transfer::error::TransferError;
use offline_update_transfer::fs_util::format_bytes;
use offline_update_transfer::host::ExplicitToolPath;
use offline_update_transfer::output::{JsonOutput, OutputMode};
use offline_update_transfer::prereq::{RegistryProbe, SilentMsiInstaller};
use offline_update_transfer::process::ProcessRunner;

#[derive(Parser)]
#[command(name = "outx")]
#[command(about = "Carry update payloads between offline and online machines")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// JSON settings file (defaults to ./offline-transfer.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Prepare usage data on the offline machine and package it")]
    Export(ExportArgs),
    #[command(about = "Download updates on the online machine from an export package")]
    Fetch(FetchArgs),
    #[command(about = "Import a downloaded update package on the offline machine")]
    Import(ImportArgs),
}

#[derive(Args)]
struct ExportArgs {
    /// Tool folder or executable; falls back to `tool_path` in the config
    #[arg(long)]
    tool: Option<Utf8PathBuf>,

    #[arg(long)]
    output: PathBuf,

    #[arg(long)]
    ensure_prerequisite: bool,

    #[arg(long)]
    prerequisite_installer: Option<PathBuf>,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    download_output: PathBuf,

    #[arg(long)]
    output: PathBuf,

    #[arg(long)]
    error_log: Option<PathBuf>,

    #[arg(long)]
    proxy: Option<String>,

    /// Put the prerequisite installer into the download package
    #[arg(long)]
    include_prerequisite: bool,

    #[arg(long)]
    skip_prerequisite: bool,
}

#[derive(Args)]
struct ImportArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    tool: Option<Utf8PathBuf>,

    #[arg(long)]
    skip_prerequisite: bool,

    /// CD.Latest folder; runs prereqchk.exe /LOCAL after the import
    #[arg(long)]
    prereq_check: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TransferError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TransferError) -> u8 {
    match error.root_cause() {
        TransferError::NotFound { .. } | TransferError::InstallerNotFound(_) => 2,
        TransferError::ToolFailed { .. }
        | TransferError::Timeout { .. }
        | TransferError::Spawn { .. }
        | TransferError::ArtifactNotProduced { .. }
        | TransferError::InstallFailed(_)
        | TransferError::Download(_)
        | TransferError::DownloadStatus { .. } => 3,
        _ => 1,
    }
}

fn init_tracing(log_file: Option<&PathBuf>) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let settings = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = build_app(settings);

    let console = ConsoleProgress::new();
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &console,
        OutputMode::NonInteractive => &JsonOutput,
    };

    match cli.command {
        Commands::Export(args) => {
            let locator = tool_locator(args.tool, app.settings())?;
            let request = ExportRequest {
                output_zip: args.output,
                ensure_prerequisite: args.ensure_prerequisite,
                prerequisite_installer: args.prerequisite_installer,
            };
            let result = app.export(&request, &locator, sink)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_export(&result).into_diagnostic()?,
                OutputMode::Interactive => print_export_summary(&result),
            }
        }
        Commands::Fetch(args) => {
            let error_log = args
                .error_log
                .unwrap_or_else(|| args.output.with_extension("errors.log"));
            let request = FetchRequest {
                input_zip: args.input,
                download_output: args.download_output,
                output_zip: args.output,
                error_log,
                proxy: args.proxy,
                include_prerequisite: args.include_prerequisite,
                ensure_prerequisite: !args.skip_prerequisite,
            };
            let result = app.fetch(&request, sink)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_fetch(&result).into_diagnostic()?,
                OutputMode::Interactive => print_fetch_summary(&result),
            }
        }
        Commands::Import(args) => {
            let locator = tool_locator(args.tool, app.settings())?;
            let request = ImportRequest {
                input_zip: args.input,
                ensure_prerequisite: !args.skip_prerequisite,
                prereq_check_root: args.prereq_check,
            };
            let result = app.import(&request, &locator, sink)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_import(&result).into_diagnostic()?,
                OutputMode::Interactive => print_import_summary(&result),
            }
        }
    }
    Ok(())
}

fn build_app(settings: Settings) -> App<RegistryProbe, SilentMsiInstaller> {
    let runner = ProcessRunner::new(settings.poll_interval());
    let probe = RegistryProbe::new(runner.clone(), settings.prerequisite.display_name.clone());
    let installer = SilentMsiInstaller::new(
        runner,
        settings.prerequisite.license_property.clone(),
        settings.installer_timeout(),
    );
    App::new(settings, probe, installer)
}

fn tool_locator(tool: Option<Utf8PathBuf>, settings: &Settings) -> miette::Result<ExplicitToolPath> {
    let path = tool.or_else(|| settings.tool_path.clone()).ok_or_else(|| {
        miette::Report::msg("tool location required (pass --tool or set `tool_path` in the config)")
    })?;
    Ok(ExplicitToolPath::new(path, settings.tool.executable_name.clone()))
}

fn print_export_summary(result: &ExportResult) {
    println!("Export package: {}", result.output_zip.display());
    if result.usage_data_relocated {
        println!("  usage data was found outside the expected path and moved into place");
    }
}

fn print_fetch_summary(result: &FetchResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    println!("{green}Download package:{reset} {}", result.output_zip.display());
    println!(
        "  {} in {} completed files (tool exit code {})",
        format_bytes(result.downloaded_bytes),
        result.completed_files,
        result.tool_exit_code
    );
    if let Some(log) = &result.error_log {
        println!("{yellow}  {} issue(s), see {}{reset}", result.issues, log.display());
    }
}

fn print_import_summary(result: &ImportResult) {
    println!("Import finished (tool exit code {})", result.tool_exit_code);
    if let Some(code) = result.prereq_check_exit_code {
        println!("  prerequisite check exit code {code}");
    }
}
