use std::time::Duration;

use url::Url;

use crate::errors::EngineError;

pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8000";
pub const ENGINE_URL_ENV: &str = "TETHER_ENGINE_URL";
/// Matches the engine's own default page size for `/history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Which endpoint a fresh `invoke` uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
    /// `POST /runs/stream`: SSE progress, one frame per node.
    #[default]
    Streaming,
    /// `POST /runs/invoke`: a single JSON reply once the run settles.
    Blocking,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub base_url: Option<String>,
    pub history_limit: usize,
    /// Ask the engine to pause before tool execution for human approval.
    pub use_hitl: bool,
    pub run_mode: RunMode,
    pub connect_timeout: Option<Duration>,
    /// Per-request timeout for REST calls. Run bodies are never timed out.
    pub request_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            use_hitl: true,
            run_mode: RunMode::Streaming,
            connect_timeout: Some(Duration::from_secs(10)),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl EngineConfig {
    /// Create config with env/default base URL discovery.
    /// Allocation: none. Complexity: O(1).
    pub fn new() -> Self {
        Self::default()
    }

    /// Override engine base URL explicitly.
    /// Allocation: one String move/clone from input. Complexity: O(url length).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_hitl(mut self, use_hitl: bool) -> Self {
        self.use_hitl = use_hitl;
        self
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    /// Resolve base URL from explicit config, env, then the local default.
    /// Side effects: reads process env.
    /// Allocation: one Url. Complexity: O(url length).
    pub fn resolve_base_url(&self) -> Result<Url, EngineError> {
        if let Some(explicit) = self.base_url.as_deref() {
            return parse_base_url(explicit);
        }

        let env_value = std::env::var(ENGINE_URL_ENV).ok();
        if let Some(candidate) = env_value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return parse_base_url(candidate);
        }

        parse_base_url(DEFAULT_ENGINE_URL)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.history_limit == 0 {
            return Err(EngineError::InvalidConfig(
                "history_limit must be > 0".to_owned(),
            ));
        }
        self.resolve_base_url().map(|_| ())
    }
}

/// Parse and normalize a base URL so endpoint paths are appended under it,
/// e.g. `http://host/playground` keeps its `/playground` prefix.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, EngineError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| EngineError::InvalidConfig(format!("invalid base url {raw:?}: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(EngineError::InvalidConfig(format!(
            "base url cannot carry paths: {raw}"
        )));
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::InvalidConfig(format!(
            "unsupported base url scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}
