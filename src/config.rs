//! Configuration types for character-sheet conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The model-service credential lives in
//! [`ModelBackend`], which is resolved once at startup and handed to the
//! model client by value; nothing in the request path reads the environment.

use crate::error::Sheet2MdError;
use crate::progress::ProgressCallback;
use crate::prompts::{EXTRACTION_INSTRUCTIONS, OPTIMIZER_PROMPT};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the OpenAI credential.
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Default OpenAI-compatible endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4-vision-preview";

/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration for a batch conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use sheet2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .dpi(600)
///     .concurrency(4)
///     .optimize(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 300.
    ///
    /// Dense tabular sheets read noticeably better at 600, at the cost of
    /// roughly four times the request payload and a slower model call.
    pub dpi: u32,

    /// Optional cap on the longest rendered edge in pixels. Default: None.
    pub max_rendered_pixels: Option<u32>,

    /// JPEG quality for the encoded page image (1–100). Default: 75.
    pub jpeg_quality: u8,

    /// Maximum simultaneous model calls, extraction and optimization combined. Default: 8.
    pub concurrency: usize,

    /// Model identifier sent with every request.
    pub model: String,

    /// Maximum tokens the model may generate per request. Default: 4000.
    pub max_tokens: usize,

    /// Sampling temperature. Default: None (endpoint default).
    pub temperature: Option<f32>,

    /// Per-call timeout. Default: 2400 s.
    pub api_timeout: Duration,

    /// Retry attempts on a transient model failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt). Default: 500.
    pub retry_backoff_ms: u64,

    /// Run the optimization pass over each aggregated document. Default: false.
    pub optimize: bool,

    /// Instruction text sent with every page image.
    pub instructions: String,

    /// Formatting prompt prepended to the aggregated text in the optimization pass.
    pub optimizer_prompt: String,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Per-file and per-page event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: None,
            jpeg_quality: 75,
            concurrency: 8,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4000,
            temperature: None,
            api_timeout: Duration::from_secs(2400),
            max_retries: 2,
            retry_backoff_ms: 500,
            optimize: false,
            instructions: EXTRACTION_INSTRUCTIONS.to_string(),
            optimizer_prompt: OPTIMIZER_PROMPT.to_string(),
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_timeout", &self.api_timeout)
            .field("max_retries", &self.max_retries)
            .field("optimize", &self.optimize)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: Option<u32>) -> Self {
        self.config.max_rendered_pixels = px.map(|p| p.max(100));
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: Option<f32>) -> Self {
        self.config.temperature = t.map(|t| t.clamp(0.0, 2.0));
        self
    }

    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.config.api_timeout = timeout;
        self
    }

    pub fn api_timeout_secs(self, secs: u64) -> Self {
        self.api_timeout(Duration::from_secs(secs))
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES_LIMIT);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn optimize(mut self, v: bool) -> Self {
        self.config.optimize = v;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = text.into();
        self
    }

    pub fn optimizer_prompt(mut self, text: impl Into<String>) -> Self {
        self.config.optimizer_prompt = text.into();
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Sheet2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(Sheet2MdError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(Sheet2MdError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(Sheet2MdError::InvalidConfig("Model must not be empty".into()));
        }
        if c.max_tokens == 0 {
            return Err(Sheet2MdError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout.is_zero() {
            return Err(Sheet2MdError::InvalidConfig(
                "API timeout must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Model backend ────────────────────────────────────────────────────────

/// Which model service the [`crate::pipeline::llm::ModelClient`] talks to.
#[derive(Clone)]
pub enum ModelBackend {
    /// Direct OpenAI-compatible `chat/completions` calls.
    OpenAi { api_key: String, base_url: String },
    /// A named edgequake-llm provider (`anthropic`, `gemini`, `ollama`, …),
    /// which reads its own credential variable when constructed.
    Provider { name: String },
}

impl fmt::Debug for ModelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelBackend::OpenAi { base_url, .. } => f
                .debug_struct("OpenAi")
                .field("api_key", &"<redacted>")
                .field("base_url", base_url)
                .finish(),
            ModelBackend::Provider { name } => {
                f.debug_struct("Provider").field("name", name).finish()
            }
        }
    }
}

impl ModelBackend {
    /// Read `OPENAI_API_KEY` once, failing fast when it is absent.
    pub fn openai_from_env(base_url: Option<String>) -> Result<Self, Sheet2MdError> {
        let api_key = std::env::var(OPENAI_API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(Sheet2MdError::MissingCredential {
                var: OPENAI_API_KEY_VAR,
            })?;
        Ok(Self::openai(api_key, base_url))
    }

    /// Build an OpenAI backend from an explicit key.
    pub fn openai(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        ModelBackend::OpenAi {
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

// ── Server ───────────────────────────────────────────────────────────────

/// Settings for the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root under which `/convert_directory/{input_dir}` may look.
    pub input_root: PathBuf,
    /// Upper bound on a multipart request body.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            input_root: PathBuf::from("."),
            max_upload_bytes: 256 * 1024 * 1024,
        }
    }
}
