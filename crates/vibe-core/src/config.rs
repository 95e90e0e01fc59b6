//! Engine, model and sandbox configuration.
//!
//! Each config has a `Default` matching the production deployment, a
//! `from_env()` constructor reading `VIBE_*` variables, and `with_*`
//! builders for programmatic overrides.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Read and parse an environment variable, falling back to `default`.
///
/// Unparseable values are logged and ignored.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparseable environment value");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Limits and identifiers for the orchestration engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Agent turns per run before the network gives up.
    pub max_iterations: u32,
    /// Whole-run attempts before the run is marked failed.
    pub max_attempts: u32,
    /// Upper bound for a single sandbox command.
    pub command_timeout: Duration,
    /// Upper bound for a whole run across all attempts.
    pub run_timeout: Duration,
    /// Sandbox template (container image) for new sandboxes.
    pub sandbox_template: String,
    /// Sandbox lifetime requested at creation.
    pub sandbox_timeout: Duration,
    /// Port of the preview server inside the sandbox.
    pub preview_port: u16,
    /// Runs executed concurrently by one worker.
    pub max_concurrent_runs: usize,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Run the title and response agents after a successful network.
    pub generate_titles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_attempts: 3,
            command_timeout: Duration::from_secs(600),
            run_timeout: Duration::from_secs(1800),
            sandbox_template: "vibe-aii-test2".to_string(),
            sandbox_timeout: Duration::from_secs(1800),
            preview_port: 3000,
            max_concurrent_runs: 4,
            backoff_base: Duration::from_millis(500),
            generate_titles: false,
        }
    }
}

impl EngineConfig {
    /// Load from `VIBE_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_iterations: env_or("VIBE_MAX_ITERATIONS", d.max_iterations),
            max_attempts: env_or("VIBE_MAX_ATTEMPTS", d.max_attempts),
            command_timeout: Duration::from_secs(env_or(
                "VIBE_COMMAND_TIMEOUT_SECS",
                d.command_timeout.as_secs(),
            )),
            run_timeout: Duration::from_secs(env_or(
                "VIBE_RUN_TIMEOUT_SECS",
                d.run_timeout.as_secs(),
            )),
            sandbox_template: env_string("VIBE_SANDBOX_TEMPLATE").unwrap_or(d.sandbox_template),
            sandbox_timeout: Duration::from_secs(env_or(
                "VIBE_SANDBOX_TIMEOUT_SECS",
                d.sandbox_timeout.as_secs(),
            )),
            preview_port: env_or("VIBE_PREVIEW_PORT", d.preview_port),
            max_concurrent_runs: env_or("VIBE_MAX_CONCURRENT_RUNS", d.max_concurrent_runs),
            backoff_base: Duration::from_millis(env_or(
                "VIBE_STEP_BACKOFF_MS",
                d.backoff_base.as_millis() as u64,
            )),
            generate_titles: env_or("VIBE_GENERATE_TITLES", d.generate_titles),
        }
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_sandbox_template(mut self, template: impl Into<String>) -> Self {
        self.sandbox_template = template.into();
        self
    }

    pub fn with_max_concurrent_runs(mut self, n: usize) -> Self {
        self.max_concurrent_runs = n;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_generate_titles(mut self, enabled: bool) -> Self {
        self.generate_titles = enabled;
        self
    }
}

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://models.github.ai/inference".to_string(),
            api_key: None,
            model: "gpt-4.1".to_string(),
            temperature: 0.7,
            max_tokens: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl ModelConfig {
    /// Load from `VIBE_MODEL_*`; the API key falls back to `GITHUB_TOKEN`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_string("VIBE_MODEL_BASE_URL").unwrap_or(d.base_url),
            api_key: env_string("VIBE_MODEL_API_KEY").or_else(|| env_string("GITHUB_TOKEN")),
            model: env_string("VIBE_MODEL").unwrap_or(d.model),
            temperature: env_or("VIBE_MODEL_TEMPERATURE", d.temperature),
            max_tokens: env_string("VIBE_MODEL_MAX_TOKENS").and_then(|v| v.parse().ok()),
            request_timeout: Duration::from_secs(env_or(
                "VIBE_MODEL_TIMEOUT_SECS",
                d.request_timeout.as_secs(),
            )),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Settings for the Docker-backed sandbox provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerSandboxConfig {
    /// Container ports published to the host; the preview port must be one.
    pub exposed_ports: Vec<u16>,
    /// Working directory inside the container; relative file paths resolve here.
    pub workdir: String,
    /// Label attached to every container the provider creates.
    pub label: String,
}

impl Default for DockerSandboxConfig {
    fn default() -> Self {
        Self {
            exposed_ports: vec![3000],
            workdir: "/home/user".to_string(),
            label: "dev.vibe.sandbox=1".to_string(),
        }
    }
}

impl DockerSandboxConfig {
    /// The Docker endpoint itself comes from `DOCKER_HOST`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            exposed_ports: env_string("VIBE_SANDBOX_PORTS")
                .map(|v| parse_ports(&v))
                .filter(|ports| !ports.is_empty())
                .unwrap_or(d.exposed_ports),
            ..d
        }
    }

    pub fn with_exposed_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.exposed_ports = ports.into_iter().collect();
        self
    }
}

/// Comma-separated port list; entries that are not ports are skipped.
fn parse_ports(value: &str) -> Vec<u16> {
    value
        .split(',')
        .filter_map(|p| match p.trim().parse() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!(entry = p.trim(), "ignoring invalid sandbox port");
                None
            }
        })
        .collect()
}
