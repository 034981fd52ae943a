//! CLI binary for sheet2md.
//!
//! `sheet2md serve` runs the HTTP service; `sheet2md convert` runs a batch
//! from the command line. Both map flags to `ConversionConfig` and share one
//! model backend.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sheet2md::pipeline::input::list_pdfs;
use sheet2md::{
    BatchProgressCallback, ConversionConfig, Converter, ModelBackend, OutputPackager,
    PdfiumRenderer, ProgressCallback, ServerConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress bar over every page of the batch.
///
/// The page total is not known up front: each file adds its page count to
/// the bar once it has been rendered.
struct CliProgressCallback {
    bar: ProgressBar,
    page_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix("Rendering");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_files} file(s)…"))
        ));
    }

    fn on_file_rendered(&self, file_id: &str, pages: usize) {
        self.bar.inc_length(pages as u64);
        self.bar.set_prefix("Converting");
        self.bar
            .println(format!("  {} {}  {}", cyan("▸"), file_id, dim(&format!("{pages} page(s)"))));
    }

    fn on_file_failed(&self, file_id: &str, error: &str) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), file_id, red(error)));
    }

    fn on_page_complete(&self, file_id: &str, page_index: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} {} p{:<3} {}",
            green("✓"),
            file_id,
            page_index + 1,
            dim(&format!("{text_len:>5} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, file_id: &str, page_index: usize, error: &str) {
        self.page_errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {} p{:<3} {}",
            red("✗"),
            file_id,
            page_index + 1,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, failed_files: usize) {
        self.bar.finish_and_clear();
        let page_errors = self.page_errors.load(Ordering::SeqCst);
        if failed_files == 0 && page_errors == 0 {
            eprintln!("{} {} file(s) converted", green("✔"), bold(&total_files.to_string()));
        } else {
            eprintln!(
                "{} {} file(s)  ({} unreadable, {} failed page(s))",
                cyan("⚠"),
                bold(&total_files.to_string()),
                red(&failed_files.to_string()),
                red(&page_errors.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on :8000
  sheet2md serve

  # Only allow /convert_directory/{name} below ./char_sheets
  sheet2md serve --input-root ./char_sheets --port 9000

  # Convert files and whole directories into ./output/<name>.txt
  sheet2md convert char_sheets/ extra/hero.pdf

  # Same, plus a zip archive, with the optimization pass enabled
  sheet2md --optimize convert char_sheets/ --zip sheets.zip

  # Use another provider through edgequake-llm
  sheet2md --provider anthropic --model claude-sonnet-4-20250514 convert hero.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            Credential for the default OpenAI backend (required)
  ANTHROPIC_API_KEY, ...    Read by edgequake-llm when --provider is set
  SHEET2MD_*                Fallback for every flag (see --help)
  RUST_LOG                  Overrides the log filter (e.g. sheet2md=debug)

A .env file in the working directory is loaded on startup.
"#;

/// Convert character-sheet PDFs to text using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "sheet2md",
    version,
    about = "Convert character-sheet PDFs to text using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Convert local PDFs (files or directories) to .txt files.
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Vision model ID.
    #[arg(long, global = true, env = "SHEET2MD_MODEL", default_value = sheet2md::config::DEFAULT_MODEL)]
    model: String,

    /// edgequake-llm provider (anthropic, gemini, ollama, …). Default: OpenAI via OPENAI_API_KEY.
    #[arg(long, global = true, env = "SHEET2MD_PROVIDER")]
    provider: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint.
    #[arg(long, global = true, env = "SHEET2MD_BASE_URL")]
    base_url: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, global = true, env = "SHEET2MD_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Cap on the longest rendered edge, in pixels.
    #[arg(long, global = true, env = "SHEET2MD_MAX_PIXELS")]
    max_pixels: Option<u32>,

    /// JPEG quality for page images (1–100).
    #[arg(long, global = true, env = "SHEET2MD_JPEG_QUALITY", default_value_t = 75,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Maximum model calls in flight.
    #[arg(short, long, global = true, env = "SHEET2MD_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Max output tokens per model call.
    #[arg(long, global = true, env = "SHEET2MD_MAX_TOKENS", default_value_t = 4000)]
    max_tokens: usize,

    /// Sampling temperature. Provider default when unset.
    #[arg(long, global = true, env = "SHEET2MD_TEMPERATURE")]
    temperature: Option<f32>,

    /// Per-call model timeout in seconds.
    #[arg(long, global = true, env = "SHEET2MD_API_TIMEOUT", default_value_t = 2400)]
    api_timeout: u64,

    /// Retries per call on transient errors (never on timeout).
    #[arg(long, global = true, env = "SHEET2MD_MAX_RETRIES", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Run the optimization pass on every document.
    #[arg(long, global = true, env = "SHEET2MD_OPTIMIZE")]
    optimize: bool,

    /// Text file replacing the per-page extraction instructions.
    #[arg(long, global = true, env = "SHEET2MD_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    /// Text file replacing the optimizer formatting prompt.
    #[arg(long, global = true, env = "SHEET2MD_OPTIMIZER_PROMPT")]
    optimizer_prompt: Option<PathBuf>,

    /// Password for encrypted PDFs.
    #[arg(long, global = true, env = "SHEET2MD_PASSWORD")]
    password: Option<String>,

    /// Directory containing libpdfium. System library when unset.
    #[arg(long, global = true, env = "SHEET2MD_PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SHEET2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SHEET2MD_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "SHEET2MD_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "SHEET2MD_PORT", default_value_t = 8000)]
    port: u16,

    /// Directory under which /convert_directory/{name} may read.
    #[arg(long, env = "SHEET2MD_INPUT_ROOT", default_value = ".")]
    input_root: PathBuf,

    /// Maximum multipart body size in MiB.
    #[arg(long, env = "SHEET2MD_MAX_UPLOAD_MB", default_value_t = 256)]
    max_upload_mb: usize,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// PDF files and/or directories (every *.pdf directly inside).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for <file_id>.txt outputs.
    #[arg(short, long, env = "SHEET2MD_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Also write a zip of all outputs to this path.
    #[arg(long, env = "SHEET2MD_ZIP")]
    zip: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "SHEET2MD_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded before parsing so SHEET2MD_* fallbacks see it.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `convert`.
    let show_progress = match &cli.command {
        Command::Convert(args) => !common.quiet && !args.no_progress,
        Command::Serve(_) => false,
    };
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
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

    // ── Fail fast on credentials and pdfium ──────────────────────────────
    let backend = resolve_backend(common)?;
    let renderer = Arc::new(
        PdfiumRenderer::new(common.pdfium_lib_path.clone()).context("PDF engine unavailable")?,
    );

    match cli.command {
        Command::Serve(ref args) => {
            let config = build_config(common, None).await?;
            let converter = Converter::from_backend(&backend, renderer, config)
                .context("Failed to initialise model client")?;
            let server = ServerConfig {
                host: args.host.clone(),
                port: args.port,
                input_root: args.input_root.clone(),
                max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
            };
            info!("Serving with {:?}", backend);
            sheet2md::server::serve(converter, &server)
                .await
                .context("Server stopped")?;
        }
        Command::Convert(ref args) => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
            } else {
                None
            };
            let config = build_config(common, progress).await?;
            let converter = Converter::from_backend(&backend, renderer, config)
                .context("Failed to initialise model client")?;
            run_convert(&converter, args, common.quiet).await?;
        }
    }

    Ok(())
}

/// `convert`: expand inputs, run one batch, write outputs.
async fn run_convert(converter: &Converter, args: &ConvertArgs, quiet: bool) -> Result<()> {
    let start = Instant::now();

    let mut paths = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            paths.extend(list_pdfs(input).await?);
        } else {
            paths.push(input.clone());
        }
    }
    if paths.is_empty() {
        anyhow::bail!("No PDF files found in the given inputs");
    }

    let batch = converter
        .convert_paths(&paths)
        .await
        .context("Conversion failed")?;

    let packager = OutputPackager::in_dir(&args.output_dir).await?;
    let locations = packager.write_batch(&batch).await?;

    if let Some(ref zip_path) = args.zip {
        let archive = packager.archive(&locations).await?;
        tokio::fs::write(zip_path, archive)
            .await
            .with_context(|| format!("Failed to write {}", zip_path.display()))?;
    }

    if !quiet {
        let failed_pages: usize = batch.iter().map(|d| d.failed_pages).sum();
        eprintln!(
            "{}  {} file(s)  {} failed page(s)  {}ms  →  {}",
            if batch.failed_files() == 0 && failed_pages == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            batch.len(),
            failed_pages,
            start.elapsed().as_millis(),
            bold(&args.output_dir.display().to_string()),
        );
        if let Some(ref zip_path) = args.zip {
            eprintln!("   {}", dim(&format!("archive: {}", zip_path.display())));
        }
    }

    Ok(())
}

/// `--provider` selects an edgequake-llm backend; otherwise OpenAI.
fn resolve_backend(common: &CommonArgs) -> Result<ModelBackend> {
    match common.provider.as_deref() {
        None | Some("openai") => ModelBackend::openai_from_env(common.base_url.clone())
            .context("OpenAI backend not configured"),
        Some(name) => Ok(ModelBackend::Provider {
            name: name.to_string(),
        }),
    }
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(
    common: &CommonArgs,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .model(common.model.clone())
        .dpi(common.dpi)
        .max_rendered_pixels(common.max_pixels)
        .jpeg_quality(common.jpeg_quality)
        .concurrency(common.concurrency)
        .max_tokens(common.max_tokens)
        .temperature(common.temperature)
        .api_timeout_secs(common.api_timeout)
        .max_retries(common.max_retries)
        .optimize(common.optimize);

    if let Some(ref path) = common.instructions {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions from {:?}", path))?;
        builder = builder.instructions(text);
    }
    if let Some(ref path) = common.optimizer_prompt {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read optimizer prompt from {:?}", path))?;
        builder = builder.optimizer_prompt(text);
    }
    if let Some(ref pwd) = common.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
