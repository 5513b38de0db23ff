//! CLI binary for edgequake-billx.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and prints the JSON response.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_billx::extract::write_response;
use edgequake_billx::{
    BillExtractor, ExtractResponse, ExtractionConfig, ExtractionProgressCallback, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages may finish out of
/// order when more than one is in flight.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    items: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Downloading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            items: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
    }

    /// Clear the bar if no extraction-complete event did, e.g. when the
    /// download failed before any page was known.
    fn clear(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }

    fn elapsed_secs(&self, page_no: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_no))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting line items from {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_no: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_no, Instant::now());
        }
        self.bar.set_message(format!("page {page_no}"));
    }

    fn on_page_complete(&self, page_no: usize, total: usize, item_count: usize) {
        let secs = self.elapsed_secs(page_no);
        self.items.fetch_add(item_count, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_no,
            total,
            dim(&format!("{item_count:>3} items")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_no: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_no);
        let msg = if error.chars().count() > 80 {
            let mut m: String = error.chars().take(79).collect();
            m.push('\u{2026}');
            m
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_no,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let skipped = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();
        let items = self.items.load(Ordering::SeqCst);

        if skipped == 0 {
            eprintln!(
                "{} {} items from {} page(s)",
                green("✔"),
                bold(&items.to_string()),
                success_count
            );
        } else {
            eprintln!(
                "{} {} items from {}/{} page(s)  ({} skipped)",
                if skipped == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&items.to_string()),
                success_count,
                total_pages,
                red(&skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a bill and print the JSON response
  billx https://example.com/bills/discharge.pdf

  # Save the response to a file
  billx https://example.com/bills/receipt.png -o receipt.json

  # Use a specific provider and model
  billx --provider openai --model gpt-4.1-mini https://example.com/bill.pdf

  # Loosen the advisory total check to 1%
  billx --tolerance 1.0 https://example.com/bill.pdf

OUTPUT:
  {"is_success": true,
   "data": {"pagewise_line_items": [...], "total_item_count": N,
            "reconciled_amount": 1234.50},
   "error": null}

  The process exits with status 1 when is_success is false.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default model gemini-2.0-flash)
  OPENAI_API_KEY          OpenAI API key (default model gpt-4.1-nano)
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium

  A .env file in the working directory is loaded on startup.
"#;

/// Extract bill line items from a document URL using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "billx",
    version,
    about = "Extract bill line items from a document URL using Vision LLMs",
    long_about = "Download a bill or invoice (image or multi-page PDF), extract every line item \
with a vision-capable LLM and reconcile the amounts into a single total. Supports Google Gemini, \
OpenAI, Anthropic and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL of the bill (PDF or image).
    url: String,

    /// Write the JSON response to this file as well as stdout.
    #[arg(short, long, env = "BILLX_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// PDF rasterisation DPI (72–400).
    #[arg(long, env = "BILLX_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Number of pages extracted concurrently.
    #[arg(short, long, env = "BILLX_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Largest image sent to the model: `2048` or `2048x1600`.
    #[arg(long, env = "BILLX_MAX_DIMENSION", default_value = "2048x2048",
          value_parser = parse_dimension)]
    max_dimension: (u32, u32),

    /// Advisory validation tolerance, in percent.
    #[arg(long, env = "BILLX_TOLERANCE", default_value_t = 0.01)]
    tolerance: f64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "BILLX_DOWNLOAD_TIMEOUT", default_value_t = 30)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "BILLX_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print single-line JSON.
    #[arg(long)]
    compact: bool,

    /// Disable progress bar.
    #[arg(long, env = "BILLX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BILLX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON response.
    #[arg(short, long, env = "BILLX_QUIET")]
    quiet: bool,
}

/// Parse `--max-dimension` as `N` or `WxH`.
fn parse_dimension(s: &str) -> Result<(u32, u32), String> {
    let s = s.trim().to_lowercase();
    let parse = |v: &str| -> Result<u32, String> {
        match v.trim().parse::<u32>() {
            Ok(0) => Err("dimension must be greater than zero".to_string()),
            Ok(n) => Ok(n),
            Err(_) => Err(format!("invalid dimension '{}'", v.trim())),
        }
    };
    match s.split_once('x') {
        Some((w, h)) => Ok((parse(w)?, parse(h)?)),
        None => {
            let n = parse(&s)?;
            Ok((n, n))
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let cli_progress = show_progress.then(CliProgressCallback::new_dynamic);
    let progress_cb = cli_progress
        .clone()
        .map(|cb| cb as Arc<dyn ExtractionProgressCallback>);

    let config = build_config(&cli, progress_cb)?;
    let start = Instant::now();

    let response = match BillExtractor::from_config(config) {
        Ok(extractor) => extractor.extract(&cli.url).await,
        Err(e) => ExtractResponse::failure(e.to_string()),
    };
    if let Some(ref cb) = cli_progress {
        cb.clear();
    }

    let json = if cli.compact {
        serde_json::to_string(&response)
    } else {
        serde_json::to_string_pretty(&response)
    }
    .context("Failed to serialise response")?;
    println!("{json}");

    if let Some(ref path) = cli.output {
        write_response(&response, path, !cli.compact)
            .await
            .context("Failed to write output file")?;
    }

    if !cli.quiet {
        match (&response.data, &response.error) {
            (Some(data), _) => eprintln!(
                "{}  {} items  total {}  {}ms",
                green("✔"),
                data.total_item_count,
                bold(&format!("{:.2}", data.reconciled_amount)),
                start.elapsed().as_millis(),
            ),
            (None, Some(err)) => eprintln!("{}  {}", red("✘"), err),
            (None, None) => {}
        }
        if let Some(ref path) = cli.output {
            eprintln!("   →  {}", bold(&path.display().to_string()));
        }
    }

    Ok(if response.is_success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let (max_w, max_h) = cli.max_dimension;
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_image_dimension(max_w, max_h)
        .tolerance_percent(cli.tolerance)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
