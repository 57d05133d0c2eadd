//! CLI binary for medbill-advocate.
//!
//! A thin shim over the library crate that copies the given files into a
//! workspace, maps CLI flags to `AdvocateConfig` and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use medbill_advocate::{
    Advocate, AdvocateConfig, AdvocateError, AnalysisKind, PipelineObserver, PipelineState,
    Workspace,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner plus one log line per finished analysis and per web search.
struct CliObserver {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving provider…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_state_change(&self, state: PipelineState) {
        match state {
            PipelineState::AwaitingInput => self.bar.set_prefix("Extracting"),
            PipelineState::Extracted => {
                self.bar.println(format!("  {} Documents extracted", green("✓")));
            }
            PipelineState::Analyzing => self.bar.set_prefix("Analyzing"),
            PipelineState::Complete => {
                self.bar.finish_and_clear();
                let failures = self.failures.load(Ordering::SeqCst);
                if failures == 0 {
                    eprintln!("{} Review complete", green("✔"));
                } else {
                    eprintln!("{} Review complete ({} analysis failed)", cyan("⚠"), red(&failures.to_string()));
                }
            }
        }
    }

    fn on_extraction_start(&self, file_count: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {file_count} document file(s)…"))
        ));
        self.bar.set_message("waiting for the model");
    }

    fn on_analysis_start(&self, kind: AnalysisKind) {
        self.bar.set_message(kind.to_string());
    }

    fn on_analysis_complete(&self, kind: AnalysisKind, error: Option<&str>) {
        match error {
            None => self.bar.println(format!("  {} {kind}", green("✓"))),
            Some(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                // Keep long provider errors on one line.
                let msg: String = if e.chars().count() > 80 {
                    format!("{}\u{2026}", e.chars().take(79).collect::<String>())
                } else {
                    e.to_string()
                };
                self.bar.println(format!("  {} {kind}  {}", red("✗"), red(&msg)));
            }
        }
    }

    fn on_search(&self, kind: AnalysisKind, query: &str) {
        self.bar.println(format!("    {} {}", dim(&format!("{kind} search:")), dim(query)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Review a bill photographed over three pages
  medbill bill_p1.jpg bill_p2.jpg bill_p3.jpg

  # A bill and the insurer's denial letter together
  medbill hospital_bill.pdf denial_letter.pdf

  # Only extract the structured records
  medbill --extract-only --json eob.png

  # Reuse a folder of uploads instead of copying files
  medbill --workspace ./uploads

  # Use a specific model
  medbill --provider openai --model gpt-4.1 bill.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  TAVILY_API_KEY          Tavily web search key; without it analyses run without search
  MEDBILL_PROVIDER        Provider (gemini, openai, anthropic, azure, ollama); same as --provider
  MEDBILL_MODEL           Model ID; same as --model. Used with MEDBILL_PROVIDER or GEMINI_API_KEY,
                          defaults to gemini-2.5-flash

  Variables can also be placed in a .env file in the working directory.

EXIT STATUS:
  0  report printed, or no supported documents were found
  1  extraction failed or the configuration is invalid
"#;

/// Review medical bills, EOBs and denial letters with a multimodal LLM.
#[derive(Parser, Debug)]
#[command(
    name = "medbill",
    version,
    about = "Review medical bills, EOBs and denial letters with a multimodal LLM",
    long_about = "Extract structured records from medical bills, insurance explanations of \
benefits and claim denial letters (JPEG, PNG or PDF), research fair prices for billed \
services and analyze denials with an appeal strategy.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document files to review (.jpg, .jpeg, .png, .pdf).
    files: Vec<PathBuf>,

    /// Workspace folder. Files are copied into it; existing documents in it
    /// are reviewed too. Default: a temporary folder removed on exit.
    #[arg(short, long, env = "MEDBILL_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// LLM model ID (e.g. gemini-2.5-flash, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "MEDBILL_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(
        long,
        env = "MEDBILL_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: gemini, openai, anthropic, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Web searches allowed per analysis (0–25).
    #[arg(long, env = "MEDBILL_SEARCH_BUDGET", default_value_t = 6,
          value_parser = clap::value_parser!(u32).range(0..=25))]
    search_budget: u32,

    /// Tavily API key for web search.
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    tavily_api_key: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "MEDBILL_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MEDBILL_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "MEDBILL_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Stop after extraction and print the records.
    #[arg(long)]
    extract_only: bool,

    /// Output structured JSON instead of Markdown.
    #[arg(long, env = "MEDBILL_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MEDBILL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MEDBILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MEDBILL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters; keep library INFO
    // logs out of its way unless --verbose.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Workspace and intake ─────────────────────────────────────────────
    let workspace = match cli.workspace {
        Some(ref dir) => Workspace::create(dir)
            .with_context(|| format!("Failed to prepare workspace {}", dir.display()))?,
        None => Workspace::temporary().context("Failed to create a temporary workspace")?,
    };

    if !cli.files.is_empty() {
        let summary = workspace.intake(&cli.files).await;
        for failure in &summary.failed {
            eprintln!(
                "{} {}: {}",
                red("✗"),
                failure.source.display(),
                failure.reason
            );
        }
    }

    // ── Build config and run ─────────────────────────────────────────────
    let observer = show_progress.then(CliObserver::new);
    let config = build_config(&cli, observer.clone())?;
    let advocate = Advocate::from_config(config).context("Failed to initialise the LLM provider")?;

    if cli.extract_only {
        let result = advocate.extract(&workspace).await;
        if let Some(ref o) = observer {
            o.clear();
        }
        match result {
            Ok(extraction) => {
                let json = serde_json::to_string_pretty(&extraction.to_payload())
                    .context("Failed to serialise records")?;
                println!("{json}");
            }
            Err(e) => {
                let code = report_error(&e, &workspace, cli.json);
                drop(workspace);
                std::process::exit(code);
            }
        }
        return Ok(());
    }

    match advocate.run(&workspace).await {
        Ok(report) => {
            if cli.json {
                let json =
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
                println!("{json}");
            } else {
                print!("{}", report.render_markdown());
            }
        }
        Err(e) => {
            if let Some(ref o) = observer {
                o.clear();
            }
            let code = report_error(&e, &workspace, cli.json);
            // Temporary workspaces are removed on drop, which `exit` skips.
            drop(workspace);
            std::process::exit(code);
        }
    }

    Ok(())
}

/// Map CLI args to `AdvocateConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<AdvocateConfig> {
    let mut builder = AdvocateConfig::builder()
        .search_budget(cli.search_budget as usize)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref key) = cli.tavily_api_key {
        builder = builder.search_api_key(key);
    }
    if let Some(o) = observer {
        builder = builder.observer(o as Arc<dyn PipelineObserver>);
    }

    builder.build().context("Invalid configuration")
}

/// Print the structured error; returns the exit code (0 for missing input).
fn report_error(error: &AdvocateError, workspace: &Workspace, json: bool) -> i32 {
    // Files stay in the workspace when extraction fails.
    let remaining = workspace
        .supported_files()
        .map(|files| files.into_iter().map(|f| f.name).collect())
        .unwrap_or_default();
    let payload = error.to_payload().with_files(remaining);

    if json {
        match serde_json::to_string_pretty(&payload) {
            Ok(s) => println!("{s}"),
            Err(_) => eprintln!("{error}"),
        }
    } else {
        eprintln!("{} {}", red("✘"), bold(&payload.error));
        eprintln!("  {}", payload.details);
        if let Some(ref raw) = payload.raw_response {
            eprintln!("  {}", dim(&format!("model said: {raw}")));
        }
        if !payload.processed_files.is_empty() {
            eprintln!("  {}", dim(&format!("files: {}", payload.processed_files.join(", "))));
        }
    }

    if error.is_fatal() {
        1
    } else {
        0
    }
}
