mod input;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use paperdigest_ai::{DetectionContext, backend_chain};
use paperdigest_core::{AppConfig, DigestError, ExitCode, ProcessedHistory, Resolution, Work};
use paperdigest_science::{
    AbstractFetcher, ContentEndpoints, DedupEngine, DigestPipeline, DownloadEndpoints,
    NoDownloads, PdfDownloader, PipelineOptions, RateLimitedClient, RunSummary,
    build_content_chain,
};

use crate::input::load_inputs;
use crate::sink::JsonSink;

const USER_AGENT: &str = concat!("paperdigest/", env!("CARGO_PKG_VERSION"));

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "paperdigest",
    about = "Deduplicate, enrich and summarize newly published papers",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/paperdigest/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format.
    /// Also enabled by setting PAPERDIGEST_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Digest adapter records: dedup, acquire content, summarize, deliver.
    Run {
        /// JSON array or JSON-lines file of {"source", "record"} envelopes.
        #[arg(long = "input", required = true, action = clap::ArgAction::Append)]
        inputs: Vec<PathBuf>,
        /// Output directory (overrides [storage].output_dir).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Cap on works enriched this run (overrides [sources].max_works).
        #[arg(long)]
        max_works: Option<usize>,
        /// Dedup and filter, then list the selection. Nothing is fetched,
        /// summarized, written or recorded.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run inference backend detection only.
    Detect,

    /// Processed-history maintenance.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show how many keys are recorded, by kind.
    Stats {
        #[arg(long, default_value = "10")]
        recent: usize,
    },
    /// Forget every processed work.
    Clear {
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paperdigest=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("PAPERDIGEST_JSON").as_deref() == Ok("1");

    let code = match execute(cli, json_output).await {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code_for(&err);
            if json_output {
                let _ = print_json(&serde_json::json!({
                    "status": "error",
                    "error": format!("{err:#}"),
                    "exit_code": code as i32,
                }));
            } else {
                eprintln!("error: {err:#}");
            }
            code
        }
    };
    std::process::exit(code as i32);
}

async fn execute(cli: Cli, json_output: bool) -> Result<ExitCode> {
    let start = Instant::now();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        // ── Run ────────────────────────────────────────────────────────────
        Commands::Run {
            inputs,
            max_works,
            dry_run: true,
            ..
        } => {
            let (works, summary) = plan_digest(&config, &inputs, max_works)?;
            if json_output {
                let selected: Vec<_> = works
                    .iter()
                    .map(|w| serde_json::json!({ "title": w.title, "doi": w.doi, "source": w.source_origin }))
                    .collect();
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "selected": selected, "summary": summary },
                    "meta": { "duration_ms": start.elapsed().as_millis(), "dry_run": true }
                }))?;
            } else {
                print_plan(&works, &summary);
            }
        }

        Commands::Run {
            inputs,
            output,
            max_works,
            dry_run: false,
        } => {
            let output = output.unwrap_or_else(|| config.storage.output_dir.clone());
            let summary = run_digest(&config, &inputs, &output, max_works, json_output).await?;
            let dur = start.elapsed().as_millis();

            if json_output {
                let status = if summary.cancelled { "cancelled" } else { "ok" };
                print_json(&serde_json::json!({
                    "status": status,
                    "data": summary,
                    "meta": { "duration_ms": dur, "output": output }
                }))?;
            } else {
                print_summary(&summary, &output);
            }
            if summary.cancelled {
                return Ok(ExitCode::Cancelled);
            }
        }

        // ── Detect ─────────────────────────────────────────────────────────
        Commands::Detect => {
            let chain = backend_chain(&config.backend)?;
            let ctx = DetectionContext::from_env(config.backend.clone());
            let resolution = chain.resolve(&ctx).await;
            let dur = start.elapsed().as_millis();

            if json_output {
                let status = if resolution.is_resolved() { "ok" } else { "error" };
                print_json(&serde_json::json!({
                    "status": status,
                    "data": {
                        "backend": resolution.artifact().map(|cap| cap.name().to_string()),
                        "candidate": resolution.winner(),
                        "attempts": resolution.attempts(),
                        "skipped": resolution.skipped(),
                    },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                for attempt in resolution.attempts() {
                    match attempt.reason() {
                        Some(reason) => println!("✗ {}: {reason}", attempt.strategy),
                        None => println!("✓ {}", attempt.strategy),
                    }
                }
                for skipped in resolution.skipped() {
                    println!("○ {}: {}", skipped.strategy, skipped.reason);
                }
            }

            match resolution {
                Resolution::Resolved { artifact, .. } => {
                    if !json_output {
                        println!("\nUsing {}", artifact.name());
                    }
                }
                Resolution::Exhausted { .. } => {
                    if !json_output {
                        println!(
                            "\nNo inference backend available. Install the `{}` CLI, set one of {}, \
                             or start a local server at {}.",
                            config.backend.assistant_command,
                            config
                                .backend
                                .credential_slots
                                .iter()
                                .map(|slot| slot.env.as_str())
                                .collect::<Vec<_>>()
                                .join(", "),
                            config.backend.local_url,
                        );
                    }
                    return Ok(ExitCode::ConfigError);
                }
            }
        }

        // ── History ────────────────────────────────────────────────────────
        Commands::History { action } => match action {
            HistoryAction::Stats { recent } => {
                let history = open_history(&config.storage.history_path)?;
                let by_kind = history.counts_by_kind()?;
                let latest = history.recent(recent)?;
                let dur = start.elapsed().as_millis();

                if json_output {
                    let kinds: serde_json::Map<String, serde_json::Value> = by_kind
                        .iter()
                        .map(|(kind, count)| (kind.clone(), serde_json::json!(count)))
                        .collect();
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "data": {
                            "path": config.storage.history_path,
                            "total": history.len(),
                            "by_kind": kinds,
                            "recent": latest,
                        },
                        "meta": { "duration_ms": dur }
                    }))?;
                } else {
                    println!(
                        "History: {} ({} keys)",
                        config.storage.history_path.display(),
                        history.len()
                    );
                    for (kind, count) in &by_kind {
                        println!("  {kind:<10} {count}");
                    }
                    if !latest.is_empty() {
                        println!("\nMost recent:");
                        for entry in &latest {
                            println!(
                                "  {}  {}  {}",
                                entry.added_at,
                                entry.key,
                                entry.title.as_deref().unwrap_or("")
                            );
                        }
                    }
                }
            }

            HistoryAction::Clear { confirm } => {
                if !confirm {
                    eprintln!("Add --confirm to forget every processed work.");
                    return Ok(ExitCode::GeneralError);
                }
                let mut history = open_history(&config.storage.history_path)?;
                let removed = history.clear()?;
                let dur = start.elapsed().as_millis();
                if json_output {
                    print_json(&serde_json::json!({"status":"ok","data":{"removed":removed},"meta":{"duration_ms":dur}}))?;
                } else {
                    println!("Removed {removed} keys from history");
                }
            }
        },

        // ── Config ─────────────────────────────────────────────────────────
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let dur = start.elapsed().as_millis();
                if json_output {
                    print_json(&serde_json::json!({"status":"ok","data":config,"meta":{"duration_ms":dur}}))?;
                } else {
                    let path = cli.config.unwrap_or_else(AppConfig::config_path);
                    println!("# {}", path.display());
                    print!("{}", toml::to_string_pretty(&config)?);
                }
            }
        },
    }

    Ok(ExitCode::Success)
}

// ─── Run ────────────────────────────────────────────────────────────────────

async fn run_digest(
    config: &AppConfig,
    inputs: &[PathBuf],
    output: &Path,
    max_works: Option<usize>,
    json_output: bool,
) -> Result<RunSummary> {
    let loaded = load_inputs(inputs, &config.sources.enabled)?;
    if loaded.rejected > 0 || loaded.disabled > 0 {
        tracing::warn!(
            rejected = loaded.rejected,
            disabled = loaded.disabled,
            "some input envelopes were not ingested"
        );
    }

    let client = Arc::new(RateLimitedClient::new(
        Duration::from_millis(500),
        3,
        USER_AGENT,
    )?);
    let content = build_content_chain(&config.content, Arc::clone(&client), ContentEndpoints::default())?;
    let downloader = PdfDownloader::new(&config.content, Arc::clone(&client), DownloadEndpoints::default())?
        .save_to(config.storage.papers_dir.clone());

    let history = open_history(&config.storage.history_path)?;
    let engine = DedupEngine::new(history, config.trust_table());
    let mut pipeline = DigestPipeline::new(
        engine,
        content,
        Arc::new(downloader),
        pipeline_options(config, max_works),
    )
    .with_abstract_fetcher(AbstractFetcher::new(client, ContentEndpoints::default().doi_resolver));

    let backends = backend_chain(&config.backend)?;
    let backend_ctx = DetectionContext::from_env(config.backend.clone());

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current work");
            watcher.cancel();
        }
    });

    let mut sink = JsonSink::open(output)?;
    let summary = pipeline
        .run(loaded.records, &backends, &backend_ctx, &mut sink, &cancel)
        .await?;

    if !json_output && !summary.conflicts.is_empty() {
        tracing::info!(
            conflicts = summary.conflict_count(),
            "field conflicts were resolved by source trust; rerun with --json to list them"
        );
    }
    Ok(summary)
}

fn pipeline_options(config: &AppConfig, max_works: Option<usize>) -> PipelineOptions {
    PipelineOptions {
        max_works: max_works.unwrap_or(config.sources.max_works),
        open_access_only: config.sources.open_access_only,
        translate_abstract: config.backend.translate_abstract,
    }
}

/// Selection only. The history is read when it exists and never written.
fn plan_digest(
    config: &AppConfig,
    inputs: &[PathBuf],
    max_works: Option<usize>,
) -> Result<(Vec<Work>, RunSummary)> {
    let loaded = load_inputs(inputs, &config.sources.enabled)?;
    let history = if config.storage.history_path.exists() {
        ProcessedHistory::open(&config.storage.history_path)?
    } else {
        ProcessedHistory::open_in_memory()?
    };
    let engine = DedupEngine::new(history, config.trust_table());
    // Built for the pipeline's shape; planning never resolves it.
    let client = Arc::new(RateLimitedClient::new(Duration::ZERO, 0, USER_AGENT)?);
    let content = build_content_chain(&config.content, client, ContentEndpoints::default())?;
    let mut pipeline = DigestPipeline::new(
        engine,
        content,
        Arc::new(NoDownloads),
        pipeline_options(config, max_works),
    );
    Ok(pipeline.plan(loaded.records))
}

fn print_plan(works: &[Work], summary: &RunSummary) {
    println!("Dry run: would digest {} work(s)", works.len());
    for (n, work) in works.iter().enumerate() {
        match &work.doi {
            Some(doi) => println!("  {:>3}. {} [{doi}]", n + 1, work.title),
            None => println!("  {:>3}. {}", n + 1, work.title),
        }
    }
    println!();
    println!("New:                {}", summary.new);
    println!("Merged:             {}", summary.merged);
    println!("Skipped (history):  {}", summary.skipped);
    println!("Malformed:          {}", summary.malformed);
    println!("Filtered:           {}", summary.filtered);
}

fn print_summary(summary: &RunSummary, output: &Path) {
    if let Some(backend) = &summary.backend {
        println!("Backend:            {backend}");
    }
    println!("New:                {}", summary.new);
    println!("Merged:             {}", summary.merged);
    println!("Skipped (history):  {}", summary.skipped);
    println!("Malformed:          {}", summary.malformed);
    println!("Filtered:           {}", summary.filtered);
    println!("Delivered:          {}", summary.delivered);
    println!("Failed:             {}", summary.enrichment_failed);
    println!("No figures found:   {}", summary.content_exhausted);
    println!("Strategy errors:    {}", summary.hard_failures);
    println!("Conflicts:          {}", summary.conflict_count());
    if summary.cancelled {
        println!("\nRun cancelled; remaining works will be retried next run.");
    }
    if summary.delivered > 0 {
        println!("\nDigest written to {}", output.join(sink::DIGEST_FILE).display());
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                return Err(DigestError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                ))
                .into());
            }
            AppConfig::load_from(path)?
        }
        None => AppConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

fn open_history(path: &Path) -> Result<ProcessedHistory> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(ProcessedHistory::open(path)?)
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DigestError>())
        .map(DigestError::exit_code)
        .unwrap_or(ExitCode::GeneralError)
}
