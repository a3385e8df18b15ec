use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use mvs_table_extract::regions::STATE_REGIONS;
use mvs_table_extract::{
    CsvWriter, DEFAULT_OPEN_TIMEOUT, Document, DocumentSource, Geometry, PageRange, ParseOptions,
    ParseResult, TableKind, Writer, parse_all, reconstruct_rows, run,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "mvs-extract",
    version,
    about = "Extract multiplier tables from the Marshall Valuation Service manual"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract one table.
    Parse(ParseArgs),
    /// Extract every built-in table in parallel.
    ParseAll(ParseAllArgs),
    /// Print the reconstructed rows of one page.
    Rows(RowsArgs),
    /// Print the state to cost region mapping as CSV.
    Regions,
}

#[derive(Debug, Args)]
struct GeometryArgs {
    /// Row clustering tolerance as a fraction of line height.
    #[arg(long)]
    row_tolerance: Option<f32>,

    /// Horizontal gap in points below which fragments join into one cell.
    #[arg(long)]
    merge_gap: Option<f32>,
}

#[derive(Debug, Args)]
struct OutputArgs {
    /// Upsert records into <DIR>/<table>.csv.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print results as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Print every warning and error.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Input PDF path.
    #[arg(short, long)]
    input: PathBuf,

    /// Table name, e.g. local_multipliers.
    #[arg(short, long)]
    table: String,

    /// Page range like 719-724, replacing the table's default.
    #[arg(long)]
    pages: Option<String>,

    /// Seconds to wait for the PDF to load.
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(flatten)]
    geometry: GeometryArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
struct ParseAllArgs {
    /// Input PDF path.
    #[arg(short, long)]
    input: PathBuf,

    /// Seconds to wait for the PDF to load.
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Args)]
struct RowsArgs {
    /// Input PDF path.
    #[arg(short, long)]
    input: PathBuf,

    /// 1-based page number.
    #[arg(short, long)]
    page: u32,

    #[command(flatten)]
    geometry: GeometryArgs,
}

fn parse_geometry(args: &GeometryArgs) -> Result<Option<Geometry>> {
    if args.row_tolerance.is_none() && args.merge_gap.is_none() {
        return Ok(None);
    }

    let defaults = Geometry::default();
    let geometry = Geometry {
        row_tolerance: args.row_tolerance.unwrap_or(defaults.row_tolerance),
        merge_gap: args.merge_gap.unwrap_or(defaults.merge_gap),
    };
    geometry
        .validate()
        .map_err(|error| anyhow!("invalid geometry: {error}"))?;
    Ok(Some(geometry))
}

fn open_timeout(timeout_secs: Option<u64>) -> Duration {
    timeout_secs.map_or(DEFAULT_OPEN_TIMEOUT, Duration::from_secs)
}

fn log_result(result: &ParseResult, verbose: bool) {
    let summary = result.summary();
    eprintln!(
        "{}: {} record(s), {} warning(s), {} error(s) from {} page(s)",
        result.table_name, summary.records, summary.warnings, summary.errors, summary.pages
    );
    if !verbose {
        return;
    }

    for warning in &result.warnings {
        eprintln!(
            "  warning {:?} page={:?} row={:?} field={:?}: {}",
            warning.code, warning.page, warning.row, warning.field, warning.message
        );
    }
    for error in &result.errors {
        eprintln!(
            "  error {:?} page={:?} row={:?} field={:?}: {}",
            error.code, error.page, error.row, error.field, error.message
        );
    }
}

fn write_output(results: &[&ParseResult], output: &OutputArgs) -> Result<()> {
    if let Some(dir) = &output.output_dir {
        let mut writer = CsvWriter::new(dir)
            .with_context(|| format!("failed to prepare output directory '{}'", dir.display()))?;
        for result in results {
            let written = writer
                .upsert(&result.table_name, &result.records)
                .with_context(|| format!("failed to write table '{}'", result.table_name))?;
            eprintln!(
                "{}: {} inserted, {} updated, {} failed -> {}",
                result.table_name,
                written.inserted,
                written.updated,
                written.failed.len(),
                writer.table_path(&result.table_name).display()
            );
        }
    }

    if output.json {
        let stdout = io::stdout().lock();
        serde_json::to_writer_pretty(stdout, results).context("failed to write JSON")?;
        println!();
    }

    for result in results {
        log_result(result, output.verbose);
    }
    Ok(())
}

fn run_parse(args: &ParseArgs) -> Result<usize> {
    let kind = TableKind::from_str(&args.table).map_err(|error| anyhow!(error))?;
    let pages = args
        .pages
        .as_deref()
        .map(PageRange::from_str)
        .transpose()
        .map_err(|error| anyhow!("invalid page range: {error}"))
        .context("failed to parse --pages")?;
    let options = ParseOptions {
        pages,
        geometry: parse_geometry(&args.geometry)?,
        open_timeout: open_timeout(args.timeout_secs),
    };
    options.validate()?;

    let source = DocumentSource::from(args.input.clone());
    let result = run(&source, &kind.spec(), &options)
        .with_context(|| format!("failed to parse '{}'", args.input.display()))?;

    write_output(&[&result], &args.output)?;
    Ok(result.records.len())
}

fn run_parse_all(args: &ParseAllArgs) -> Result<usize> {
    let options = ParseOptions {
        open_timeout: open_timeout(args.timeout_secs),
        ..ParseOptions::default()
    };
    options.validate()?;
    let source = DocumentSource::from(args.input.clone());
    let outcomes = parse_all(&source, &options)
        .with_context(|| format!("failed to read '{}'", args.input.display()))?;

    let mut results = Vec::new();
    for (kind, outcome) in outcomes {
        let result = outcome.with_context(|| format!("failed to parse table '{kind}'"))?;
        results.push(result);
    }

    write_output(&results.iter().collect::<Vec<_>>(), &args.output)?;
    Ok(results.iter().map(|result| result.records.len()).sum())
}

fn run_rows(args: &RowsArgs) -> Result<usize> {
    let geometry = parse_geometry(&args.geometry)?.unwrap_or_default();
    let document = open_document(&args.input)?;
    let fragments = document
        .fragments(args.page)
        .with_context(|| format!("failed to read page {}", args.page))?;
    let (width, _) = document.page_size(args.page)?;

    let rows = reconstruct_rows(&fragments, width, &geometry);
    for row in &rows {
        let cells = row
            .cells
            .iter()
            .map(|cell| format!("{}@{:.1}", cell.text, cell.x0))
            .collect::<Vec<_>>();
        println!("{:>7.1}  {}", row.top(), cells.join(" | "));
    }
    Ok(rows.len())
}

fn open_document(path: &Path) -> Result<Document> {
    let source = DocumentSource::from(path.to_path_buf());
    Document::open(&source, DEFAULT_OPEN_TIMEOUT)
        .with_context(|| format!("failed to open '{}'", path.display()))
}

fn run_regions() -> Result<usize> {
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    writer.write_record(["state_code", "state_name", "region"])?;
    for entry in &STATE_REGIONS {
        writer.write_record([entry.code, entry.name, entry.region.as_str()])?;
    }
    writer.flush()?;
    Ok(STATE_REGIONS.len())
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mvs_table_extract=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    let outcome = match &cli.command {
        Commands::Parse(args) => run_parse(args),
        Commands::ParseAll(args) => run_parse_all(args),
        Commands::Rows(args) => run_rows(args),
        Commands::Regions => run_regions(),
    };

    match outcome {
        Ok(produced) if produced > 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
