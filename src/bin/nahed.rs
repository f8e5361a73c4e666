//! CLI binary for nahed-extract.
//!
//! A thin shim over the library crate: `serve` runs the HTTP API, `extract`
//! runs the pipeline on local files and prints the records as JSON.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use nahed_extract::{
    document_from_path, extract_batch, server, AppState, Backend, ExtractionProgressCallback, Outcome,
    ProgressCallback, ServiceConfig, ServiceConfigBuilder, SpeechConfig,
};
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished document. Documents can
/// finish out of order, so start times are keyed by input index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_document_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, name: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {}  {}",
            green("✓"),
            index + 1,
            total,
            name,
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {}  {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {} documents extracted", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                red("✘"),
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP API on port 3000
  nahed serve --bind 0.0.0.0:3000

  # Extract one report to stdout
  nahed extract pathology.pdf

  # Several scans, four at a time, written to a file
  nahed extract scans/*.jpg --concurrency 4 -o records.json

  # Use another vision provider through edgequake-llm
  nahed --backend openai --model gpt-4.1-mini extract report.png

ENVIRONMENT VARIABLES:
  GOOGLE_GEMINI_API_KEY   Gemini API key (default backend)
  ELEVENLABS_API_KEY      ElevenLabs key for /api/tts (optional)
  NAHED_BACKEND           gemini (default) or any edgequake-llm provider
  NAHED_MODEL             Model identifier (default: gemini-2.0-flash)
  RUST_LOG                Log filter, overrides -v / -q
"#;

#[derive(Parser, Debug)]
#[command(
    name = "nahed",
    version,
    about = "Extract structured patient records from medical reports using a multimodal LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,

    /// Debug-level logs.
    #[arg(short, long, global = true, env = "NAHED_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, env = "NAHED_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Model backend: "gemini" or an edgequake-llm provider name (openai, anthropic, ollama, ...).
    #[arg(long, global = true, env = "NAHED_BACKEND", default_value = "gemini")]
    backend: String,

    #[arg(long, global = true, env = "NAHED_MODEL", default_value = "gemini-2.0-flash")]
    model: String,

    #[arg(long, global = true, env = "GOOGLE_GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, global = true, env = "NAHED_GEMINI_BASE_URL")]
    gemini_base_url: Option<String>,

    #[arg(long, global = true, env = "NAHED_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    #[arg(long, global = true, env = "NAHED_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Per-call timeout in seconds; 0 waits indefinitely.
    #[arg(long, global = true, env = "NAHED_API_TIMEOUT", default_value_t = 0)]
    api_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve POST /api/analyze-report and POST /api/tts.
    Serve {
        #[arg(long, env = "NAHED_BIND", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,

        /// Largest accepted upload in MiB.
        #[arg(long, env = "NAHED_MAX_UPLOAD_MB", default_value_t = 20)]
        max_upload_mb: usize,

        #[arg(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
        elevenlabs_api_key: Option<String>,

        #[arg(long, env = "NAHED_VOICE_ID")]
        voice_id: Option<String>,
    },

    /// Extract records from local files and print them as JSON.
    Extract {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Override the MIME type inferred from each file's extension.
        #[arg(long)]
        mime: Option<String>,

        #[arg(short, long, env = "NAHED_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, env = "NAHED_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `extract`.
    let show_progress =
        !cli.quiet && matches!(cli.command, Command::Extract { no_progress: false, .. });
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

    match cli.command {
        Command::Serve {
            bind,
            max_upload_mb,
            elevenlabs_api_key,
            voice_id,
        } => {
            let mut speech = SpeechConfig {
                api_key: elevenlabs_api_key,
                ..SpeechConfig::default()
            };
            if let Some(v) = voice_id {
                speech.voice_id = v;
            }
            let config = build_config(&cli.model)
                .max_upload_bytes(max_upload_mb.saturating_mul(1024 * 1024))
                .speech(speech)
                .build()
                .context("Invalid configuration")?;

            let invoker = config.build_invoker().context("Failed to set up model backend")?;
            let speech = config.build_speech().context("Failed to set up speech client")?;
            if speech.is_none() {
                tracing::warn!("ELEVENLABS_API_KEY not set; /api/tts will answer 500");
            }
            server::serve(bind, AppState::new(invoker, speech), config.max_upload_bytes)
                .await
                .context("Server failed")?;
        }

        Command::Extract {
            files,
            mime,
            concurrency,
            output,
            no_progress: _,
        } => {
            let config = build_config(&cli.model).build().context("Invalid configuration")?;
            let invoker = config.build_invoker().context("Failed to set up model backend")?;

            let mut documents = Vec::with_capacity(files.len());
            for path in &files {
                documents.push(
                    document_from_path(path, mime.as_deref())
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                );
            }

            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new())
            } else {
                None
            };
            let outcomes = extract_batch(invoker.as_ref(), documents, concurrency, progress).await;

            let rendered = render_outcomes(&files, &outcomes);
            let text =
                serde_json::to_string_pretty(&rendered).context("Failed to serialise output")?;
            match output {
                Some(ref path) => tokio::fs::write(path, format!("{text}\n"))
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{text}"),
            }

            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} documents failed", outcomes.len());
            }
        }
    }

    Ok(())
}

/// Map global model flags onto a config builder.
fn build_config(args: &ModelArgs) -> ServiceConfigBuilder {
    let mut builder = ServiceConfig::builder()
        .backend(Backend::parse(&args.backend))
        .model(&args.model)
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .api_timeout_secs(args.api_timeout);
    if let Some(ref key) = args.gemini_api_key {
        builder = builder.gemini_api_key(key);
    }
    if let Some(ref url) = args.gemini_base_url {
        builder = builder.gemini_base_url(url);
    }
    builder
}

/// One file → the record itself; several → `[{file, status, result}]`.
fn render_outcomes(files: &[PathBuf], outcomes: &[Outcome]) -> serde_json::Value {
    if let [only] = outcomes {
        return only.to_body();
    }
    files
        .iter()
        .zip(outcomes)
        .map(|(file, outcome)| {
            json!({
                "file": file.display().to_string(),
                "status": outcome.status_code(),
                "result": outcome.to_body(),
            })
        })
        .collect()
}
