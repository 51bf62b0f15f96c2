use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use heatmap_weather::backoff::ThreadSleeper;
use heatmap_weather::cells::load_cells;
use heatmap_weather::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use heatmap_weather::domain::ForecastWindow;
use heatmap_weather::error::HeatmapError;
use heatmap_weather::forecast::{OpenMeteoClient, PRIMARY_MODEL};
use heatmap_weather::output::{ConsoleProgress, JsonOutput, OutputMode};
use heatmap_weather::pipeline::{self, Pipeline, ProgressSink, RunSummary, StatusReport};
use heatmap_weather::store::{CheckpointStore, ModelsUsed, StoreDocument};

#[derive(Parser)]
#[command(name = "heatmap-weather")]
#[command(about = "Enrich heatmap grid cells with daily weather forecasts, resumably")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./heatmap-weather.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch forecasts for every cell not yet in the output file")]
    Fetch(FetchArgs),
    #[command(about = "Show how many cells are already in the output file")]
    Status(PathArgs),
}

#[derive(Args, Clone)]
struct PathArgs {
    #[arg(long)]
    input: Option<Utf8PathBuf>,

    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[command(flatten)]
    paths: PathArgs,

    /// Forecast horizon in days
    #[arg(long)]
    days: Option<u32>,

    /// Only process the first N cells (0 = all)
    #[arg(long)]
    limit: Option<usize>,

    /// Abort after this many consecutive failures of one batch
    #[arg(long)]
    max_retries: Option<u32>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HeatmapError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HeatmapError) -> u8 {
    match error {
        HeatmapError::InvalidCellId(_)
        | HeatmapError::InvalidCell { .. }
        | HeatmapError::DuplicateCell(_)
        | HeatmapError::SourceRead(_)
        | HeatmapError::SourceParse(_)
        | HeatmapError::ConfigRead(_)
        | HeatmapError::ConfigParse(_)
        | HeatmapError::InvalidConfig(_) => 2,
        HeatmapError::ForecastHttp(_)
        | HeatmapError::ForecastStatus { .. }
        | HeatmapError::Provider(_)
        | HeatmapError::ForecastDecode(_)
        | HeatmapError::RetriesExhausted { .. } => 3,
        HeatmapError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(cli.config.as_deref(), args, output_mode),
        Commands::Status(args) => run_status(cli.config.as_deref(), args, output_mode),
    }
}

fn run_fetch(config: Option<&str>, args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        input_path: args.paths.input,
        output_path: args.paths.output,
        horizon_days: args.days,
        cell_limit: args.limit,
        max_retries: args.max_retries,
    };
    let config = ConfigLoader::resolve(config, overrides)?;
    let cells = load_cells(&config.input_path, config.cell_limit)?;
    let window = ForecastWindow::starting_today(config.horizon_days)?;
    let client = OpenMeteoClient::new(&config.provider)?;
    tracing::info!(
        provider = client.base_url(),
        start = %window.start(),
        end = %window.end(),
        "forecast window"
    );

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Text => &ConsoleProgress,
        OutputMode::Json => &JsonOutput,
    };
    let pipeline = Pipeline::new(config, client, ThreadSleeper, window);
    let (store, _) = pipeline.open_store(sink);
    let mut session = pipeline.new_session(&cells, store);
    let summary = pipeline.run(&cells, &mut session, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_run(&summary).into_diagnostic()?,
        OutputMode::Text => print_run_summary(&summary),
    }
    Ok(())
}

fn run_status(config: Option<&str>, args: PathArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        input_path: args.input,
        output_path: args.output,
        ..ConfigOverrides::default()
    };
    let config = ConfigLoader::resolve(config, overrides)?;
    let cells = load_cells(&config.input_path, config.cell_limit)?;
    let (store, outcome) =
        CheckpointStore::load_or_default(&config.output_path, empty_document(&config)?);
    let report = pipeline::status(&cells, &store, &outcome);

    match output_mode {
        OutputMode::Json => JsonOutput::print_status(&report).into_diagnostic()?,
        OutputMode::Text => print_status(&report),
    }
    Ok(())
}

fn empty_document(config: &ResolvedConfig) -> Result<StoreDocument, HeatmapError> {
    let window = ForecastWindow::starting_today(config.horizon_days)?;
    Ok(StoreDocument::empty(
        &window,
        ModelsUsed {
            primary: PRIMARY_MODEL.to_string(),
            gusts: config.provider.gust_model.clone(),
        },
    ))
}

fn print_run_summary(result: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}heatmap-weather summary{reset}");
    println!(
        "{green}stored cells: {} of {} ({} new){reset}",
        result.cells_stored, result.cells_total, result.cells_added
    );
    println!(
        "{cyan}batches: {} fetched, {} already done{reset}",
        result.batches_fetched, result.batches_skipped
    );
    if result.failures > 0 {
        println!("{yellow}failed attempts: {}{reset}", result.failures);
    }
    if !result.missing_cells.is_empty() {
        println!(
            "{yellow}cells without daily data: {}{reset}",
            result.missing_cells.join(", ")
        );
    }
    println!("output: {}", result.output_path);
}

fn print_status(report: &StatusReport) {
    println!(
        "{} of {} cells done, {} pending ({} days per cell)",
        report.cells_done, report.cells_total, report.cells_pending, report.day_count
    );
    if report.unknown_ids > 0 {
        println!("{} stored cells are not in the cell source", report.unknown_ids);
    }
    match &report.generated_at {
        Some(at) => println!("output: {} (written {at})", report.output_path),
        None => println!("output: {} (not written yet)", report.output_path),
    }
}
