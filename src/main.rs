use commission_report::loader::SourceLoader;
use commission_report::{FileSink, OutputFormat, ReportBuilder, ReportConfig};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "commission-report")]
#[command(about = "Per-contract commission reconciliation report")]
#[command(version)]
struct Args {
    /// Log at debug level (includes the intermediate frames)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the per-view files and the merged report
    Run {
        /// Source spreadsheet (.xlsx, .xls, .ods or .csv)
        #[arg(short, long, default_value = "Padrão.XLSX")]
        input: PathBuf,

        /// Directory that receives every output file
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// JSON config file (built-in report layout when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output file format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Xlsx)]
        format: OutputFormat,

        /// Worksheet to read (first sheet when omitted)
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Write the built-in config as JSON, as a starting point for edits
    InitConfig {
        #[arg(short, long, default_value = "report.json")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the header and category values of a source file
    Inspect {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        sheet: Option<String>,
    },
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Run {
            input,
            output_dir,
            config,
            format,
            sheet,
        } => run(input, output_dir, config, format, sheet),
        Commands::InitConfig { path, force } => init_config(path, force),
        Commands::Inspect {
            input,
            config,
            sheet,
        } => inspect(input, config, sheet),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<PathBuf>) -> Result<ReportConfig> {
    match path {
        Some(path) => ReportConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ReportConfig::default()),
    }
}

fn run(
    input: PathBuf,
    output_dir: PathBuf,
    config: Option<PathBuf>,
    format: OutputFormat,
    sheet: Option<String>,
) -> Result<()> {
    let config = load_config(config)?;
    let sink = FileSink::new(&output_dir, format).with_sheet_name(config.sheet_name.clone());

    info!("Building report from {}", input.display());
    let summary = ReportBuilder::new(&config, &sink)
        .with_input_sheet(sheet)
        .run(&input)
        .with_context(|| format!("Report run failed for {}", input.display()))?;

    println!("\nSummary:");
    println!("  Source rows: {}", summary.source_rows);
    println!("  Contracts:   {}", summary.contracts);
    for view in &summary.views {
        println!(
            "  {:<24} {:>6} rows  total {:>14.2}  -> {}",
            view.name,
            view.rows,
            view.amount_total,
            view.output.display()
        );
    }
    println!("  Report: {}", summary.report_path.display());
    Ok(())
}

fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let json = ReportConfig::default().to_json()?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn inspect(input: PathBuf, config: Option<PathBuf>, sheet: Option<String>) -> Result<()> {
    let config = load_config(config)?;
    let raw = SourceLoader::new(&config)
        .with_sheet(sheet)
        .read_raw(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    println!("{}: {} data rows", input.display(), raw.rows.len());
    println!("Columns: {}", raw.headers.iter().join(" | "));

    let missing: Vec<&str> = config
        .columns
        .required()
        .into_iter()
        .filter(|c| raw.column_index(c).is_none())
        .collect();
    if !missing.is_empty() {
        println!("Missing columns: {}", missing.join(", "));
    }

    for column in [&config.columns.receipt_type, &config.columns.observation] {
        if let Some(values) = raw.distinct_values(column, &config.date_format) {
            println!("{} values: {}", column, values.iter().join(", "));
        }
    }
    Ok(())
}
