use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Remote Piston-compatible execution service.
    Piston {
        /// Base URL or full `/execute` URL. Supports ${ENV_VAR} substitution.
        #[serde(default = "default_endpoint")]
        endpoint: String,
        #[serde(default = "default_language")]
        language: String,
        #[serde(default = "default_language_version")]
        version: String,
    },
    /// Unsandboxed local spawn. Dev fallback only — offers no isolation.
    Local {
        #[serde(default = "default_interpreter")]
        interpreter: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Piston {
            endpoint: default_endpoint(),
            language: default_language(),
            version: default_language_version(),
        }
    }
}

fn default_endpoint() -> String {
    "https://emkc.org/api/v2/piston/execute".to_string()
}

fn default_language() -> String {
    "python".to_string()
}

fn default_language_version() -> String {
    "3.10.0".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

/// Admission-control parameters for the throughput governor.
#[derive(Debug, Deserialize, Clone)]
pub struct GovernorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Concurrent backend calls. The deployed design uses 1.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Task starts allowed per rolling window.
    #[serde(default = "default_max_starts")]
    pub max_starts_per_window: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            concurrency: default_concurrency(),
            max_starts_per_window: default_max_starts(),
            window_ms: default_window_ms(),
        }
    }
}

impl GovernorConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

fn default_max_starts() -> usize {
    5
}

fn default_window_ms() -> u64 {
    1000
}

/// Per-call timing limits.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default = "default_compile_timeout_ms")]
    pub compile_timeout_ms: u64,
    /// Longer budget for generation-assist runs (input scripts).
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    /// Grace added on top of the backend's own run timeout before the
    /// host-side deadline gives up on the call entirely.
    #[serde(default = "default_deadline_grace_ms")]
    pub deadline_grace_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: default_run_timeout_ms(),
            compile_timeout_ms: default_compile_timeout_ms(),
            generation_timeout_ms: default_generation_timeout_ms(),
            deadline_grace_ms: default_deadline_grace_ms(),
        }
    }
}

impl LimitsConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn deadline_grace(&self) -> Duration {
        Duration::from_millis(self.deadline_grace_ms)
    }
}

fn default_run_timeout_ms() -> u64 {
    5000
}

fn default_compile_timeout_ms() -> u64 {
    10_000
}

fn default_generation_timeout_ms() -> u64 {
    8000
}

fn default_deadline_grace_ms() -> u64 {
    2000
}

impl BackendConfig {
    /// Human-readable description of the execution mode
    pub fn mode_description(&self) -> String {
        match self {
            BackendConfig::Piston {
                endpoint,
                language,
                version,
            } => {
                format!("piston ({language} {version}) at {endpoint}")
            }
            BackendConfig::Local { interpreter } => {
                format!("local spawn ({interpreter}, unsandboxed)")
            }
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${PISTON_URL}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
