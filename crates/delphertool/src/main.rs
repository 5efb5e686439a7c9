use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use delphertool_core::collect::collect_worklist;
use delphertool_core::config::{CliOverrides, DEFAULT_CONFIG_FILENAME, RunConfig, load_config};
use delphertool_core::mediawiki::MediaWikiClient;
use delphertool_core::observability::{LogFormat, init_logging};
use delphertool_core::runner::{RunReport, run_worklist};
use delphertool_core::table::{CsvStore, TabularStore};
use delphertool_core::urn::derive_urn;
use delphertool_core::wikitext::transform;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "delphertool",
    version,
    about = "Add Delpher resolver links to Internet Archive sourced Commons files"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "TOML config file")]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "FORMAT",
        default_value = "pretty",
        help = "Log output: pretty or json"
    )]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Rewrite every page in the worklist and record statuses")]
    Run(RunArgs),
    #[command(about = "Search File: pages and write a worklist CSV")]
    Collect(CollectArgs),
    #[command(about = "Apply the source-block rewrite to local wikitext")]
    Transform(TransformArgs),
    #[command(about = "Show the URN and resolver links for an archive identifier")]
    Urn(UrnArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, value_name = "PATH", help = "Worklist CSV (overrides WORKLIST_FILE)")]
    worklist: Option<PathBuf>,
    #[arg(long, value_name = "N", help = "Process only the first N records")]
    head: Option<usize>,
    #[arg(long, value_name = "N-M", help = "Process records N..=M (1-based)")]
    range: Option<String>,
    #[arg(long, value_name = "N", help = "Flush statuses every N successful saves")]
    checkpoint_every: Option<usize>,
    #[arg(long, value_name = "SECONDS", help = "Pause between records")]
    pause_seconds: Option<f64>,
    #[arg(long, help = "Fetch and transform only; no login, saves or status writes")]
    dry_run: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CollectArgs {
    #[arg(long, value_name = "QUERY", help = "CirrusSearch query for the File namespace")]
    query: String,
    #[arg(long, default_value_t = 500, help = "Maximum number of files")]
    limit: usize,
    #[arg(long, value_name = "PATH", help = "Worklist CSV to write")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct TransformArgs {
    #[arg(value_name = "FILE", help = "Wikitext file; reads stdin when omitted")]
    file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct UrnArgs {
    #[arg(value_name = "ARCHIVE_ID")]
    archive_id: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Run(args) => run_batch(cli.config.as_deref(), args),
        Commands::Collect(args) => run_collect(cli.config.as_deref(), args),
        Commands::Transform(args) => run_transform(args),
        Commands::Urn(args) => run_urn(&args.archive_id),
    }
}

fn resolve_config(config_path: Option<&Path>, overrides: &CliOverrides) -> Result<RunConfig> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let file = load_config(&config_path)?;
    Ok(RunConfig::from_process_env(&file, overrides)?)
}

fn run_batch(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let overrides = CliOverrides {
        worklist: args.worklist,
        head: args.head,
        range: args.range,
        checkpoint_every: args.checkpoint_every,
        pause_seconds: args.pause_seconds,
        dry_run: args.dry_run,
    };
    let config = resolve_config(config_path, &overrides)?;
    info!(
        worklist = %normalize_path(&config.worklist.path),
        api = %config.wiki.api_url,
        "starting run"
    );

    let store = CsvStore::new(&config.worklist.path);
    let mut client = MediaWikiClient::new(config.wiki.clone())?;
    let report = run_worklist(&config, &mut client, &store)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&config, &report);
    }
    Ok(())
}

fn print_report(config: &RunConfig, report: &RunReport) {
    println!("worklist: {}", normalize_path(&config.worklist.path));
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("total: {}", report.total);
    if report.dry_run {
        println!("would_process: {}", report.would_process);
    } else {
        println!("processed: {}", report.processed);
        println!("unchanged: {}", report.unchanged);
    }
    println!("skipped_no_pattern: {}", report.skipped_no_pattern);
    println!("errored: {}", report.errored);
    println!("checkpoints: {}", report.checkpoints);
    println!("flushes: {}", report.flushes);
    println!("requests: {}", report.request_count);
    for failure in &report.failures {
        println!(
            "failure: {} {}: {}",
            failure.page_id,
            failure.title.as_deref().unwrap_or("<untitled>"),
            failure.error
        );
    }
}

fn run_collect(config_path: Option<&Path>, args: CollectArgs) -> Result<()> {
    let config = resolve_config(config_path, &CliOverrides::default())?;
    let mut client = MediaWikiClient::new(config.wiki.clone())?;
    let table = collect_worklist(&mut client, &args.query, args.limit)?;
    CsvStore::new(&args.output).write_table(&table)?;

    println!("query: {}", args.query);
    println!("limit: {}", args.limit);
    println!("collected: {}", table.rows.len());
    println!("output: {}", normalize_path(&args.output));
    Ok(())
}

fn run_transform(args: TransformArgs) -> Result<()> {
    let body = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read wikitext from stdin")?;
            buffer
        }
    };

    let updated = transform(&body)?;
    if updated == body {
        eprintln!("status: no old pattern found");
    } else {
        eprintln!("status: transformed");
    }
    print!("{updated}");
    Ok(())
}

fn run_urn(archive_id: &str) -> Result<()> {
    let urn = derive_urn(archive_id)?;
    println!("archive_id: {}", archive_id.trim());
    println!("urn: {urn}");
    println!("resolver_url: {}", urn.resolver_url());
    println!("resolver_pdf_url: {}", urn.resolver_pdf_url());
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
