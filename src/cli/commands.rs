//! CLI parser and command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use console::style;
use tokio::sync::mpsc;

use rorscrape::archive::{self, RawArchive};
use rorscrape::browser::{ChromiumLauncher, SessionFactory};
use rorscrape::captcha::CaptchaResolver;
use rorscrape::config::Config;
use rorscrape::extract::RecordExtractor;
use rorscrape::ledger::{self, EntryStatus, FileLedger, Ledger};
use rorscrape::models::{Catalogue, SurveyFilter};
use rorscrape::scheduler::{Scheduler, SchedulerEvent, SchedulerOptions, StopFlag};
use rorscrape::session::SessionBuilder;

use super::progress::{format_duration, ScrapeProgress};

#[derive(Parser)]
#[command(name = "rorscrape")]
#[command(about = "Rural land-record scraper with resumable worker pool")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Args)]
struct ScrapeArgs {
    /// Location catalogue (JSON)
    #[arg(long)]
    catalogue: PathBuf,
    /// District code
    #[arg(short, long)]
    district: String,
    /// Taluka codes to include (default: all in the district)
    #[arg(short, long = "taluka")]
    talukas: Vec<String>,
    /// Village codes to include (default: all in the selected talukas)
    #[arg(long = "village")]
    villages: Vec<String>,
    /// Survey number filter (exact, partial or nearest match)
    #[arg(short, long)]
    survey: Option<String>,
    /// Number of browser workers (default: from config)
    #[arg(short, long)]
    workers: Option<usize>,
    /// Limit number of tasks dispatched (0 = unlimited)
    #[arg(short, long, default_value = "0")]
    limit: usize,
    /// Show live progress bars
    #[arg(short = 'P', long)]
    progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every village of a district (or selected talukas/villages)
    Scrape(ScrapeArgs),

    /// Show ledger totals and recent failures
    Status,

    /// Re-run record extraction on an archived raw harvest
    Extract {
        /// Raw harvest JSON written by the archive
        raw: PathBuf,
        /// Write the record here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List districts and talukas with village counts
    Catalogue {
        /// Location catalogue (JSON)
        #[arg(long)]
        catalogue: PathBuf,
        /// Only this district
        #[arg(short, long)]
        district: Option<String>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Scrape(args) => cmd_scrape(&config, args).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Extract { raw, output } => cmd_extract(&config, &raw, output.as_deref()),
        Commands::Catalogue {
            catalogue,
            district,
        } => cmd_catalogue(&catalogue, district.as_deref()),
    }
}

fn load_catalogue(path: &Path) -> anyhow::Result<Catalogue> {
    Catalogue::load(path).with_context(|| format!("failed to load catalogue {}", path.display()))
}

async fn cmd_scrape(config: &Config, args: ScrapeArgs) -> anyhow::Result<()> {
    let catalogue = load_catalogue(&args.catalogue)?;
    let survey = args.survey.as_deref().map(SurveyFilter::new);
    let tasks = catalogue.expand(&args.district, &args.talukas, &args.villages, survey.as_ref())?;
    if tasks.is_empty() {
        println!("{} No villages match the selection", style("!").yellow());
        return Ok(());
    }

    let resolver =
        CaptchaResolver::from_config(&config.captcha).context("failed to set up captcha providers")?;
    if !resolver.has_providers() {
        anyhow::bail!(
            "no captcha recognition provider available; set GEMINI_API_KEY or VERTEX_ACCESS_TOKEN, or install tesseract"
        );
    }
    let resolver = Arc::new(resolver);

    let ledger = ledger::open(config)
        .await
        .with_context(|| format!("failed to open ledger at {}", config.ledger_dir().display()))?;

    let factory: Arc<dyn SessionFactory> = Arc::new(ChromiumLauncher::new(
        config.browser.clone(),
        config.timeouts.clone(),
    ));
    let builder = SessionBuilder::from_config(config, resolver);

    let mut options = SchedulerOptions::from_config(&config.scheduler);
    if let Some(workers) = args.workers {
        options.workers = workers.max(1);
    }
    options.limit = (args.limit > 0).then_some(args.limit);
    let workers = options.workers.min(tasks.len());

    let stop = StopFlag::new();
    stop.stop_on_ctrl_c();

    let scheduler = Scheduler::new(factory, builder, ledger, options)
        .with_archive(RawArchive::from_config(config))
        .with_stop_flag(stop);

    println!(
        "{} Scraping {} village(s) in district {} with up to {} worker(s)",
        style("→").cyan(),
        tasks.len(),
        args.district,
        workers
    );

    let (event_tx, mut event_rx) = mpsc::channel::<SchedulerEvent>(100);
    let display = args
        .progress
        .then(|| Arc::new(ScrapeProgress::new(workers, tasks.len())));

    let display_clone = display.clone();
    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            handle_event(display_clone.as_deref(), event);
        }
    });

    let result = scheduler.run(tasks, Some(event_tx)).await;

    if let Err(e) = event_handler.await {
        tracing::warn!("Event handler task failed: {}", e);
    }
    if let Some(ref display) = display {
        display.finish();
    }

    let summary = result.context("scrape run aborted")?;

    println!(
        "{} {} succeeded, {} without data, {} failed in {}",
        style("✓").green(),
        summary.succeeded,
        summary.no_data,
        summary.failed,
        format_duration(summary.elapsed)
    );
    if summary.resumed > 0 {
        println!(
            "  {} {} already complete (resumed)",
            style("→").dim(),
            summary.resumed
        );
    }
    if summary.deferred > 0 {
        println!(
            "  {} {} deferred by --limit",
            style("→").dim(),
            summary.deferred
        );
    }
    if summary.stopped && summary.unfinished() > 0 {
        println!(
            "  {} Stopped with {} task(s) left; run again to resume",
            style("!").yellow(),
            summary.unfinished()
        );
    }

    Ok(())
}

fn handle_event(display: Option<&ScrapeProgress>, event: SchedulerEvent) {
    let report = |line: String| match display {
        Some(progress) => progress.println(&line),
        None => eprintln!("{}", line),
    };

    match event {
        SchedulerEvent::Started {
            worker_id, label, ..
        } => {
            if let Some(progress) = display {
                progress.start_task(worker_id, &label);
            }
        }
        SchedulerEvent::Finished {
            worker_id,
            task_id,
            outcome,
            detail,
            progress: snapshot,
        } => {
            if let Some(progress) = display {
                progress.finish_task(worker_id);
                progress.update(&snapshot);
            }
            if let Some(detail) = detail {
                report(format!(
                    "{} {} failed ({}): {}",
                    style("✗").red(),
                    task_id,
                    outcome,
                    detail
                ));
            }
        }
        SchedulerEvent::Skipped {
            progress: snapshot, ..
        } => {
            if let Some(progress) = display {
                progress.update(&snapshot);
            }
        }
        SchedulerEvent::WorkerExited { worker_id, error } => {
            if let Some(progress) = display {
                progress.worker_exited(worker_id);
            }
            if let Some(error) = error {
                report(format!(
                    "{} Worker {} stopped: {}",
                    style("!").yellow(),
                    worker_id,
                    error
                ));
            }
        }
    }
}

async fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let dir = config.ledger_dir();
    if !dir.join("ledger.json").is_file() {
        println!(
            "{} No ledger at {}. Run 'rorscrape scrape' first.",
            style("!").yellow(),
            dir.display()
        );
        return Ok(());
    }

    let ledger = FileLedger::open(&dir)
        .await
        .with_context(|| format!("failed to open ledger at {}", dir.display()))?;
    let summary = ledger.summary().await?;
    let separator = "─".repeat(50);

    println!();
    println!("{}", style("rorscrape status").bold());
    println!("{}", separator);
    println!("Ledger: {}", dir.display());
    if let Some(mirror) = &config.ledger.sqlite_mirror {
        println!("Mirror: {}", mirror.display());
    }
    println!();

    println!("{}", style("TASKS").cyan().bold());
    println!("  {:<20} {:>8}", "Total:", summary.total());
    println!("  {:<20} {:>8}", "Completed:", summary.completed);
    println!("  {:<20} {:>8}", "No data:", summary.no_data);
    println!("  {:<20} {:>8}", "Failed:", summary.failed);
    println!("  {:<20} {:>8}", "Pending:", summary.pending);

    let mut failed: Vec<_> = ledger
        .entries()
        .await?
        .into_iter()
        .filter(|e| e.status == EntryStatus::Failed)
        .collect();
    if !failed.is_empty() {
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        println!();
        println!("{}", style("RECENT FAILURES").cyan().bold());
        for entry in failed.iter().take(10) {
            println!(
                "  {:<24} {:<18} {}",
                entry.task_id,
                entry.reason.as_deref().unwrap_or("-"),
                style(entry.last_error.as_deref().unwrap_or("")).dim()
            );
        }
    }
    println!();

    Ok(())
}

fn cmd_extract(config: &Config, raw: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let harvest = archive::load(raw)?;
    let record = RecordExtractor::new(config.portal.name.clone()).extract(&harvest);
    let json = serde_json::to_string_pretty(&record)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} Extracted {} owner(s), {} encumbrance(s) to {}",
                style("✓").green(),
                record.owners.len(),
                record.encumbrances.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn cmd_catalogue(path: &Path, district: Option<&str>) -> anyhow::Result<()> {
    let catalogue = load_catalogue(path)?;

    let districts: Vec<_> = catalogue
        .districts
        .iter()
        .filter(|d| district.map_or(true, |code| d.value == code))
        .collect();
    if districts.is_empty() {
        println!("{} No matching districts", style("!").yellow());
        return Ok(());
    }

    for d in districts {
        let villages: usize = d.talukas.iter().map(|t| t.villages.len()).sum();
        println!(
            "{} {} ({} talukas, {} villages)",
            style(&d.value).bold(),
            d.label,
            d.talukas.len(),
            villages
        );
        for t in &d.talukas {
            println!("  {:<6} {:<30} {:>6}", t.value, t.label, t.villages.len());
        }
    }
    println!();
    println!("Total villages: {}", catalogue.village_count());
    Ok(())
}
