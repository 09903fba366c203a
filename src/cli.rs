use crate::engine;
use crate::model::{BoxPlotReport, FetchConfig, FetchEvent, RawResponse};
use crate::transform::{self, TransformOptions};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_BACKTEST_ID: &str = "12c9d129-3fef-4aba-9109-9921b667b218";

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "backtest-boxplot",
    version,
    about = "Fetch backtest box-plot data and summarize each subgroup"
)]
pub struct Cli {
    /// Base URL of the analytics service
    #[arg(long, default_value = "https://eventhorizonfund.net")]
    pub base_url: String,

    /// Backtest to fetch (repeat for several)
    #[arg(long = "backtest-id", default_value = DEFAULT_BACKTEST_ID)]
    pub backtest_ids: Vec<String>,

    /// Bearer token sent in the Authorization header
    #[arg(long, env = "BOXPLOT_BEARER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Summarize a local JSON document instead of fetching
    #[arg(long, conflicts_with = "history")]
    pub input: Option<PathBuf>,

    /// Print JSON result and exit
    #[arg(long, conflicts_with = "text")]
    pub json: bool,

    /// Print text summary and exit (default)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Fail on subgroups with no samples instead of reporting NaN statistics
    #[arg(long)]
    pub strict: bool,

    /// Per-request timeout
    #[arg(long, default_value = "30s")]
    pub timeout: humantime::Duration,

    /// Maximum concurrent fetches when several backtests are requested
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Export results as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export results as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Show the N most recent saved reports and exit
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if let Some(limit) = args.history {
        return run_history(&args, limit).await;
    }

    run_pipeline(args).await
}

/// Generate a random identifier for one invocation's report(s).
fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

/// Build one `FetchConfig` per requested backtest from CLI arguments.
pub fn build_configs(args: &Cli) -> Vec<FetchConfig> {
    args.backtest_ids
        .iter()
        .map(|id| FetchConfig {
            base_url: args.base_url.clone(),
            backtest_id: id.clone(),
            bearer_token: args.token.clone().filter(|t| !t.trim().is_empty()),
            timeout: Duration::from(args.timeout),
            user_agent: format!("backtest-boxplot/{}", env!("CARGO_PKG_VERSION")),
        })
        .collect()
}

fn transform_options(args: &Cli) -> TransformOptions {
    TransformOptions {
        reject_empty: args.strict,
    }
}

/// Reduce a decoded document to a timestamped report.
pub(crate) fn build_report(
    raw: &RawResponse,
    opts: TransformOptions,
    run_id: &str,
    backtest_id: &str,
    source: &str,
) -> Result<BoxPlotReport> {
    let records = if opts.reject_empty {
        transform::transform_response_with(raw, opts)
    } else {
        transform::transform_response(raw)
    }
    .with_context(|| format!("transform box-plot data for backtest {backtest_id}"))?;
    Ok(BoxPlotReport {
        timestamp_utc: now_rfc3339(),
        run_id: run_id.to_string(),
        backtest_id: backtest_id.to_string(),
        source: source.to_string(),
        records,
    })
}

async fn run_pipeline(args: Cli) -> Result<()> {
    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let run_id = gen_run_id();
    let opts = transform_options(&args);
    let mut reports = Vec::new();
    let mut failures = Vec::new();

    if let Some(path) = args.input.as_deref() {
        if let Some(tx) = out_tx.as_ref() {
            let info = crate::model::InfoEvent::ReadingFile {
                path: path.display().to_string(),
            };
            let _ = tx.send(OutputLine::Stderr(info.to_message()));
        }
        let raw = crate::storage::load_document(path)?;
        let backtest_id = args
            .backtest_ids
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_BACKTEST_ID);
        reports.push(build_report(
            &raw,
            opts,
            &run_id,
            backtest_id,
            &path.display().to_string(),
        )?);
    } else {
        let configs = build_configs(&args);
        let sources: Vec<String> = configs
            .iter()
            .map(|cfg| {
                engine::box_plot_url(cfg)
                    .map(|url| url.to_string())
                    .unwrap_or_else(|_| cfg.base_url.clone())
            })
            .collect();

        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<FetchEvent>();
        let progress_tx = out_tx.as_ref().cloned();
        let progress = tokio::spawn(async move {
            while let Some(ev) = evt_rx.recv().await {
                if let Some(tx) = progress_tx.as_ref() {
                    let _ = tx.send(OutputLine::Stderr(ev.to_message()));
                }
            }
        });

        let fetched = engine::fetch_many(configs, args.concurrency, &evt_tx).await;
        drop(evt_tx);
        let _ = progress.await;

        for ((backtest_id, res), source) in fetched.into_iter().zip(sources) {
            match res.and_then(|raw| build_report(&raw, opts, &run_id, &backtest_id, &source)) {
                Ok(report) => reports.push(report),
                Err(e) => failures.push(format!("{backtest_id}: {e:#}")),
            }
        }
    }

    // Handle exports (errors will propagate)
    handle_exports(&args, &reports)?;

    if let Some(tx) = out_tx.as_ref() {
        if args.json {
            let out = render_json(&reports, requested_many(&args))?;
            let _ = tx.send(OutputLine::Stdout(out));
        } else {
            for report in &reports {
                let summary = crate::text_summary::build_text_summary(report);
                for line in summary.lines {
                    let _ = tx.send(OutputLine::Stdout(line));
                }
            }
        }
    }

    if args.auto_save {
        for report in &reports {
            if args.silent {
                crate::storage::save_report(report).context("failed to save report")?;
            } else if let Some(tx) = out_tx.as_ref() {
                match crate::storage::save_report(report) {
                    Ok(p) => {
                        let _ = tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
                    }
                    Err(e) => {
                        let _ = tx.send(OutputLine::Stderr(format!("Save failed: {e:#}")));
                    }
                }
            }
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    if !failures.is_empty() {
        return Err(anyhow::anyhow!(
            "{} of {} backtest(s) failed:\n{}",
            failures.len(),
            failures.len() + reports.len(),
            failures.join("\n")
        ));
    }
    Ok(())
}

/// Whether more than one backtest was asked for; decides the JSON output shape.
fn requested_many(args: &Cli) -> bool {
    args.input.is_none() && args.backtest_ids.len() > 1
}

/// A single requested backtest prints as an object, several always as an array.
fn render_json(reports: &[BoxPlotReport], as_array: bool) -> Result<String> {
    let out = match reports {
        [single] if !as_array => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    Ok(out)
}

async fn run_history(args: &Cli, limit: usize) -> Result<()> {
    let history = crate::storage::load_recent(limit).context("load saved reports")?;
    if args.silent {
        return Ok(());
    }
    let (tx, handle) = spawn_output_writer();
    if args.json {
        let _ = tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&history)?));
    } else if history.is_empty() {
        let _ = tx.send(OutputLine::Stderr("No saved reports".to_string()));
    } else {
        for report in &history {
            let _ = tx.send(OutputLine::Stdout(format!(
                "[{}] run {}",
                report.timestamp_utc, report.run_id
            )));
            for line in crate::text_summary::build_text_summary(report).lines {
                let _ = tx.send(OutputLine::Stdout(line));
            }
        }
    }
    drop(tx);
    let _ = handle.await;
    Ok(())
}

/// Path for one report's export; several reports get the backtest id appended to the stem.
fn export_path(base: &Path, backtest_id: &str, multiple: bool) -> PathBuf {
    if !multiple {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}-{backtest_id}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{backtest_id}"),
    };
    base.with_file_name(name)
}

/// Handle export operations (JSON and CSV) for every report.
fn handle_exports(args: &Cli, reports: &[BoxPlotReport]) -> Result<()> {
    let multiple = reports.len() > 1;
    for report in reports {
        if let Some(p) = args.export_json.as_deref() {
            crate::storage::export_json(&export_path(p, &report.backtest_id, multiple), report)?;
        }
        if let Some(p) = args.export_csv.as_deref() {
            crate::storage::export_csv(&export_path(p, &report.backtest_id, multiple), report)?;
        }
    }
    Ok(())
}
