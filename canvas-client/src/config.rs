//! Configuration: command-line/environment arguments and library defaults.

use std::time::Duration;

use canvas_core::Size;
use clap::Parser;

/// Default cap on concurrently running generation jobs.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Command-line arguments for `canvas-headless`.
#[derive(Debug, Clone, Parser)]
#[command(name = "canvas-headless")]
#[command(about = "Drive a canvas workspace from the command line: submit prompts, wait, save")]
#[command(version)]
pub struct CliArgs {
    /// API base URL (e.g., <https://canvas.example.com>)
    #[arg(long, env = "CANVAS_API_URL")]
    pub api_base_url: String,

    /// Workspace to open
    #[arg(long, env = "CANVAS_WORKSPACE")]
    pub workspace: String,

    /// Bearer token
    #[arg(long, env = "CANVAS_TOKEN")]
    pub token: Option<String>,

    /// Maximum generation jobs running at once
    #[arg(long, env = "CANVAS_MAX_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Quiet period before an autosave fires
    #[arg(long, env = "CANVAS_AUTOSAVE_QUIET_MS", default_value_t = 1200)]
    pub autosave_quiet_ms: u64,

    /// Minimum spacing between two autosaves
    #[arg(long, env = "CANVAS_AUTOSAVE_MIN_SPACING_MS", default_value_t = 2500)]
    pub autosave_min_spacing_ms: u64,

    /// Quiet period before the viewport is saved
    #[arg(long, env = "CANVAS_VIEWPORT_QUIET_MS", default_value_t = 600)]
    pub viewport_quiet_ms: u64,

    /// Send prompts as typed instead of through the plan service
    #[arg(long, env = "CANVAS_DIRECT_PROMPT", default_value_t = true, action = clap::ArgAction::Set)]
    pub direct_prompt: bool,

    /// Size used when the prompt carries no size directive
    #[arg(long, env = "CANVAS_DEFAULT_SIZE", default_value = "1024x1024", value_parser = parse_size)]
    pub default_size: Size,

    /// Give up on a result stream after this many seconds
    #[arg(long, env = "CANVAS_STREAM_TIMEOUT_SECS", default_value_t = 600)]
    pub stream_timeout_secs: u64,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    pub print_metrics: bool,

    /// Prompts to submit, in order
    pub prompts: Vec<String>,
}

fn parse_size(s: &str) -> Result<Size, String> {
    Size::parse(s).map_err(|e| e.to_string())
}

/// Retry with exponential backoff for idempotent writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        }
    }

    /// Calculate delay for a given attempt number (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capped = base.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }
}

/// Settings for the orchestration layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// API base URL.
    pub api_base_url: String,
    /// Workspace id.
    pub workspace: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Maximum generation jobs running at once.
    pub max_concurrency: usize,
    /// Autosave quiet period.
    pub autosave_quiet: Duration,
    /// Minimum spacing between autosaves.
    pub autosave_min_spacing: Duration,
    /// Viewport save quiet period.
    pub viewport_quiet: Duration,
    /// Send prompts as typed instead of through the plan service.
    pub direct_prompt: bool,
    /// Size used when the prompt carries no size directive.
    pub default_size: Size,
    /// Result stream timeout.
    pub stream_timeout: Duration,
    /// Retry policy for saves.
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            workspace: "default".to_string(),
            token: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            autosave_quiet: Duration::from_millis(1200),
            autosave_min_spacing: Duration::from_millis(2500),
            viewport_quiet: Duration::from_millis(600),
            direct_prompt: true,
            default_size: Size::default(),
            stream_timeout: Duration::from_secs(600),
            retry: RetryConfig::default(),
        }
    }
}

impl From<CliArgs> for ClientConfig {
    fn from(args: CliArgs) -> Self {
        Self {
            api_base_url: args.api_base_url,
            workspace: args.workspace,
            token: args.token,
            max_concurrency: args.max_concurrency.max(1),
            autosave_quiet: Duration::from_millis(args.autosave_quiet_ms),
            autosave_min_spacing: Duration::from_millis(args.autosave_min_spacing_ms),
            viewport_quiet: Duration::from_millis(args.viewport_quiet_ms),
            direct_prompt: args.direct_prompt,
            default_size: args.default_size,
            stream_timeout: Duration::from_secs(args.stream_timeout_secs),
            retry: RetryConfig::default(),
        }
    }
}
