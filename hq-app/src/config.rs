//! AI HQ configuration loader.
//!
//! Values come from an optional TOML file, then environment overrides. A
//! missing file at the default location means "all defaults".

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "AIHQ_CONFIG";

const MIN_DEBATE_CONCURRENCY: usize = 1;
const MAX_DEBATE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HqConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub proposal: ProposalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `*` or a comma-separated allow-list of origins.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
    #[serde(default = "default_app_env")]
    pub app_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
            app_env: default_app_env(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    120
}

fn default_http_max_in_flight() -> usize {
    256
}

fn default_app_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Shared model for debates and chat. When unset, debates use
    /// `gpt-5` and chat uses `chat_model_fallback`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_chat_model_fallback")]
    pub chat_model_fallback: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_agent_max_output_tokens")]
    pub agent_max_output_tokens: u32,
    #[serde(default = "default_synthesis_max_output_tokens")]
    pub synthesis_max_output_tokens: u32,
    #[serde(default = "default_proposal_max_output_tokens")]
    pub proposal_max_output_tokens: u32,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_debate_concurrency")]
    pub debate_concurrency: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            chat_model_fallback: default_chat_model_fallback(),
            base_url: None,
            agent_max_output_tokens: default_agent_max_output_tokens(),
            synthesis_max_output_tokens: default_synthesis_max_output_tokens(),
            proposal_max_output_tokens: default_proposal_max_output_tokens(),
            timeout_ms: default_llm_timeout_ms(),
            debate_concurrency: default_debate_concurrency(),
        }
    }
}

const DEFAULT_DEBATE_MODEL: &str = "gpt-5";

fn default_chat_model_fallback() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_agent_max_output_tokens() -> u32 {
    450
}

fn default_synthesis_max_output_tokens() -> u32 {
    750
}

fn default_proposal_max_output_tokens() -> u32 {
    1400
}

fn default_llm_timeout_ms() -> u64 {
    25_000
}

fn default_debate_concurrency() -> usize {
    2
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<&str> {
        non_empty(self.api_key.as_deref())
    }

    pub fn debate_model(&self) -> &str {
        non_empty(self.model.as_deref()).unwrap_or(DEFAULT_DEBATE_MODEL)
    }

    pub fn chat_model(&self) -> &str {
        non_empty(self.model.as_deref()).unwrap_or(self.chat_model_fallback.trim())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn clamped_concurrency(&self) -> usize {
        self.debate_concurrency
            .clamp(MIN_DEBATE_CONCURRENCY, MAX_DEBATE_CONCURRENCY)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Absent means the in-process store.
    #[serde(default)]
    pub database_path: Option<String>,
}

impl StoreConfig {
    pub fn database_path(&self) -> anyhow::Result<Option<PathBuf>> {
        non_empty(self.database_path.as_deref())
            .map(expand_home)
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Sent on outbound notifies; also accepted on inbound callbacks.
    #[serde(default)]
    pub webhook_token: Option<String>,
    #[serde(default)]
    pub callback_token: Option<String>,
    #[serde(default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_token: None,
            callback_token: None,
            timeout_ms: default_workflow_timeout_ms(),
        }
    }
}

fn default_workflow_timeout_ms() -> u64 {
    10_000
}

impl WorkflowConfig {
    /// Every token an inbound callback may present. Empty means callbacks
    /// are accepted unauthenticated.
    pub fn callback_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for token in [self.callback_token.as_deref(), self.webhook_token.as_deref()] {
            if let Some(token) = non_empty(token) {
                if !tokens.iter().any(|t| t == token) {
                    tokens.push(token.to_string());
                }
            }
        }
        tokens
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Bearer token required on mutating `/api/*` routes when set.
    #[serde(default)]
    pub control_api_token: Option<String>,
    #[serde(default)]
    pub ws_auth_token: Option<String>,
    /// Enables `/api/debug/*` when set.
    #[serde(default)]
    pub debug_api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposalConfig {
    #[serde(default = "default_step_count")]
    pub step_count: usize,
    #[serde(default = "default_min_tasks_per_step")]
    pub min_tasks_per_step: usize,
    #[serde(default = "default_max_tasks_per_step")]
    pub max_tasks_per_step: usize,
    #[serde(default = "default_min_kpis")]
    pub min_kpis: usize,
    #[serde(default = "default_max_kpis")]
    pub max_kpis: usize,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            step_count: default_step_count(),
            min_tasks_per_step: default_min_tasks_per_step(),
            max_tasks_per_step: default_max_tasks_per_step(),
            min_kpis: default_min_kpis(),
            max_kpis: default_max_kpis(),
        }
    }
}

fn default_step_count() -> usize {
    7
}

fn default_min_tasks_per_step() -> usize {
    3
}

fn default_max_tasks_per_step() -> usize {
    6
}

fn default_min_kpis() -> usize {
    5
}

fn default_max_kpis() -> usize {
    10
}

impl HqConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let explicit = path.or_else(|| {
            std::env::var(CONFIG_PATH_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        });
        let (path, required) = match explicit {
            Some(p) => (p, true),
            None => (default_config_path(), false),
        };

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(config_path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies environment overrides through `lookup`; blank values are
    /// ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = get("APP_ENV") {
            self.server.app_env = v;
        }
        if let Some(v) = get("CORS_ORIGIN") {
            self.server.cors_origin = v;
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.store.database_path = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.model = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = get("OPENAI_MAX_OUTPUT_TOKENS").and_then(|v| v.trim().parse().ok()) {
            self.llm.agent_max_output_tokens = v;
        }
        if let Some(v) =
            get("OPENAI_SYNTHESIS_MAX_OUTPUT_TOKENS").and_then(|v| v.trim().parse().ok())
        {
            self.llm.synthesis_max_output_tokens = v;
        }
        if let Some(v) = get("OPENAI_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.llm.timeout_ms = v;
        }
        if let Some(v) = get("OPENAI_DEBATE_CONCURRENCY").and_then(|v| v.trim().parse().ok()) {
            self.llm.debate_concurrency = v;
        }
        if let Some(v) = get("N8N_WEBHOOK_URL") {
            self.workflow.webhook_url = Some(v);
        }
        if let Some(v) = get("N8N_WEBHOOK_TOKEN") {
            self.workflow.webhook_token = Some(v);
        }
        if let Some(v) = get("N8N_CALLBACK_TOKEN") {
            self.workflow.callback_token = Some(v);
        }
        if let Some(v) = get("N8N_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.workflow.timeout_ms = v;
        }
        if let Some(v) = get("CONTROL_API_TOKEN") {
            self.security.control_api_token = Some(v);
        }
        if let Some(v) = get("WS_AUTH_TOKEN") {
            self.security.ws_auth_token = Some(v);
        }
        if let Some(v) = get("DEBUG_API_TOKEN") {
            self.security.debug_api_token = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.llm.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(anyhow::anyhow!("llm.model must not be blank when set"));
        }
        if self.llm.chat_model_fallback.trim().is_empty() {
            return Err(anyhow::anyhow!("llm.chat_model_fallback is required"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        let p = &self.proposal;
        if p.step_count == 0 {
            return Err(anyhow::anyhow!("proposal.step_count must be > 0"));
        }
        if p.min_tasks_per_step > p.max_tasks_per_step {
            return Err(anyhow::anyhow!(
                "proposal.min_tasks_per_step must be <= proposal.max_tasks_per_step"
            ));
        }
        if p.min_kpis > p.max_kpis {
            return Err(anyhow::anyhow!("proposal.min_kpis must be <= proposal.max_kpis"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind, self.server.port)
    }
}

pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".aihq").join("config.toml")
}

fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim().to_string();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen("~", &home, 1)))
}

#[cfg(test)]
mod tests {
    use super::HqConfig;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_toml_yields_documented_defaults() {
        let cfg = HqConfig::from_toml("").expect("parse");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.cors_origin, "*");
        assert_eq!(cfg.llm.debate_model(), "gpt-5");
        assert_eq!(cfg.llm.chat_model(), "gpt-4.1-mini");
        assert_eq!(cfg.llm.agent_max_output_tokens, 450);
        assert_eq!(cfg.llm.synthesis_max_output_tokens, 750);
        assert_eq!(cfg.llm.timeout_ms, 25_000);
        assert_eq!(cfg.llm.clamped_concurrency(), 2);
        assert_eq!(cfg.workflow.timeout_ms, 10_000);
        assert_eq!(cfg.proposal.step_count, 7);
        assert!(cfg.store.database_path().expect("path").is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let mut cfg = HqConfig::from_toml(
            r#"
            [llm]
            model = "gpt-4.1"
            debate_concurrency = 3

            [workflow]
            webhook_url = "https://n8n.example.com/webhook/hq"
            "#,
        )
        .expect("parse");
        cfg.apply_env_overrides(env(&[
            ("PORT", "9090"),
            ("OPENAI_MODEL", "  "),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_DEBATE_CONCURRENCY", "12"),
            ("N8N_CALLBACK_TOKEN", "cb"),
            ("N8N_WEBHOOK_TOKEN", "hook"),
        ]));
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.llm.debate_model(), "gpt-4.1");
        assert_eq!(cfg.llm.chat_model(), "gpt-4.1");
        assert_eq!(cfg.llm.api_key(), Some("sk-test"));
        assert_eq!(cfg.llm.clamped_concurrency(), 4);
        assert_eq!(cfg.workflow.callback_tokens(), vec!["cb", "hook"]);
    }

    #[test]
    fn callback_tokens_deduplicate_and_skip_blanks() {
        let mut cfg = HqConfig::default();
        assert!(cfg.workflow.callback_tokens().is_empty());
        cfg.workflow.callback_token = Some("same".to_string());
        cfg.workflow.webhook_token = Some("same".to_string());
        assert_eq!(cfg.workflow.callback_tokens(), vec!["same"]);
        cfg.workflow.callback_token = Some(" ".to_string());
        assert_eq!(cfg.workflow.callback_tokens(), vec!["same"]);
    }

    #[test]
    fn validate_rejects_inverted_proposal_bounds() {
        let mut cfg = HqConfig::default();
        cfg.proposal.min_kpis = 11;
        assert!(cfg.validate().is_err());

        let mut cfg = HqConfig::default();
        cfg.proposal.step_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = HqConfig::default();
        cfg.llm.model = Some(String::new());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_clamped_up() {
        let mut cfg = HqConfig::default();
        cfg.llm.debate_concurrency = 0;
        assert_eq!(cfg.llm.clamped_concurrency(), 1);
    }
}
