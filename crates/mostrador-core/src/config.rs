//! Process configuration
//!
//! One immutable value loaded from TOML at startup and overlaid with
//! environment variables for secrets and endpoints. Components receive it
//! explicitly (usually as `Arc<AppConfig>`).

use crate::descriptor::{AgentDescriptor, TeamDescriptor};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Toolkits the process knows how to build.
pub const KNOWN_TOOLKITS: &[&str] = &["warehouse", "catalog", "knowledge", "messaging", "report"];

/// Provider names accepted as the prefix of a `model_ref`.
pub const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai"];

const REDACTED: &str = "***";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub runtime: RuntimeConfig,
    pub cache: CacheConfig,
    pub warehouse: WarehouseConfig,
    pub backend: BackendConfig,
    pub vector: VectorConfig,
    pub blob: BlobConfig,
    pub auth: AuthConfig,
    pub stores: BTreeMap<String, StoreConfig>,
    pub agents: Vec<AgentDescriptor>,
    pub teams: Vec<TeamDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    /// Named store holding login records.
    pub auth_store: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// What a second concurrent run on the same session does.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait up to `session_wait_ms`, then fail with `session_busy`.
    #[default]
    Wait,
    /// Fail with `session_busy` immediately.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tool_timeout_s: u64,
    pub model_timeout_s: u64,
    pub turn_timeout_s: u64,
    pub max_tool_rounds: usize,
    pub session_wait_ms: u64,
    pub busy_policy: BusyPolicy,
    /// Invocation records kept in memory per session.
    pub invocation_log_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub secure: bool,
    pub verify: bool,
    pub connect_timeout_s: u64,
    pub send_receive_timeout_s: u64,
    pub row_cap: usize,
    pub cache_ttl_s: u64,
}

impl WarehouseConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// `user:password`, sent as a fixed basic-auth header. Without a
    /// colon the whole value is the user.
    pub basic_auth: Option<String>,
    pub messaging_url: Option<String>,
    pub timeout_s: u64,
    /// Per-operation path overrides, e.g. `product_by_sku = "/v2/productos/{sku}"`.
    pub paths: BTreeMap<String, String>,
    /// Per-operation cache TTL overrides in seconds; 0 disables caching.
    pub cache_ttl_s: BTreeMap<String, u64>,
}

impl BackendConfig {
    /// Basic-auth user and password, if configured.
    pub fn basic_auth_pair(&self) -> Option<(String, String)> {
        let auth = self.basic_auth.as_deref().filter(|a| !a.is_empty())?;
        Some(match auth.split_once(':') {
            Some((user, pass)) => (user.to_string(), pass.to_string()),
            None => (auth.to_string(), String::new()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Qdrant URL. Unset means the process-local store.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dim: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub container_url: Option<String>,
    pub sas_token: Option<String>,
    /// Base of the URL returned to users; defaults to `container_url`.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub identity_url: Option<String>,
    pub token_ttl_hours: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the `file` backend.
    pub path: Option<PathBuf>,
}

// ============================================================
// Defaults
// ============================================================

/// Stores every deployment has, whether or not the file declares them.
pub const DEFAULT_STORES: [&str; 2] = ["ia", "nube"];

impl Default for AppConfig {
    fn default() -> Self {
        let stores = DEFAULT_STORES
            .iter()
            .map(|name| (name.to_string(), StoreConfig::default()))
            .collect();
        Self {
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
            runtime: RuntimeConfig::default(),
            cache: CacheConfig::default(),
            warehouse: WarehouseConfig::default(),
            backend: BackendConfig::default(),
            vector: VectorConfig::default(),
            blob: BlobConfig::default(),
            auth: AuthConfig::default(),
            stores,
            agents: Vec::new(),
            teams: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            auth_store: "nube".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tool_timeout_s: 30,
            model_timeout_s: 60,
            turn_timeout_s: 120,
            max_tool_rounds: 8,
            session_wait_ms: 5_000,
            busy_policy: BusyPolicy::Wait,
            invocation_log_capacity: 256,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8123,
            user: "default".to_string(),
            password: None,
            database: "implementos".to_string(),
            secure: false,
            verify: true,
            connect_timeout_s: 10,
            send_receive_timeout_s: 30,
            row_cap: 500,
            cache_ttl_s: 300,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            basic_auth: None,
            messaging_url: None,
            timeout_s: 20,
            paths: BTreeMap::new(),
            cache_ttl_s: BTreeMap::new(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 1536,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            identity_url: None,
            token_ttl_hours: 48,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl AppConfig {
    /// Load config from a TOML file. A missing file yields defaults; a
    /// malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml_str(&content)?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse TOML. Declared stores are merged over the default ones, so a
    /// file that configures only `[stores.ia]` still has `nube`.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        for name in DEFAULT_STORES {
            config.stores.entry(name.to_string()).or_default();
        }
        Ok(config)
    }

    /// Overlay variables from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup`. Empty values are ignored.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.providers.anthropic.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.providers.openai.api_key = Some(v);
        }

        if let Some(v) = get("CLICKHOUSE_HOST") {
            self.warehouse.host = v;
        }
        if let Some(v) = get("CLICKHOUSE_PORT").and_then(|v| v.parse().ok()) {
            self.warehouse.port = v;
        }
        if let Some(v) = get("CLICKHOUSE_USER") {
            self.warehouse.user = v;
        }
        if let Some(v) = get("CLICKHOUSE_PASSWORD") {
            self.warehouse.password = Some(v);
        }
        if let Some(v) = get("CLICKHOUSE_DATABASE") {
            self.warehouse.database = v;
        }
        if let Some(v) = get("CLICKHOUSE_SECURE") {
            self.warehouse.secure = parse_flag(&v);
        }
        if let Some(v) = get("CLICKHOUSE_VERIFY") {
            self.warehouse.verify = parse_flag(&v);
        }
        if let Some(v) = get("CLICKHOUSE_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.warehouse.connect_timeout_s = v;
        }
        if let Some(v) = get("CLICKHOUSE_SEND_RECEIVE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.warehouse.send_receive_timeout_s = v;
        }

        if let Some(v) = get("QDRANT_URL") {
            self.vector.url = Some(v);
        }
        if let Some(v) = get("QDRANT_API_KEY") {
            self.vector.api_key = Some(v);
        }

        if let Some(v) = get("AZURE_STORAGE_CONTAINER_URL") {
            self.blob.container_url = Some(v);
        }
        if let Some(v) = get("AZURE_STORAGE_SAS_TOKEN") {
            self.blob.sas_token = Some(v);
        }

        if let Some(v) = get("SECRET_KEY") {
            self.auth.jwt_secret = Some(v);
        }
        if let Some(v) = get("IDENTITY_URL") {
            self.auth.identity_url = Some(v);
        }

        if let Some(v) = get("BACKEND_URL") {
            self.backend.base_url = v;
        }
        if let Some(v) = get("BACKEND_BASIC_AUTH") {
            self.backend.basic_auth = Some(v);
        }
        if let Some(v) = get("MESSAGING_URL") {
            self.backend.messaging_url = Some(v);
        }

        if let Some(v) = get("CORS_ORIGINS") {
            self.server.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        self
    }

    /// Reject configurations the process cannot serve.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.as_deref().map_or(true, str::is_empty) {
            return Err(Error::ConfigError("auth.jwt_secret (SECRET_KEY) is required".into()));
        }
        if !self.stores.contains_key(&self.server.auth_store) {
            return Err(Error::ConfigError(format!(
                "server.auth_store references unknown store '{}'",
                self.server.auth_store
            )));
        }

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.agent_id.as_str()) {
                return Err(Error::ConfigError(format!("duplicate agent id '{}'", agent.agent_id)));
            }
            check_model_ref(&agent.agent_id, &agent.model_ref)?;
            if let Some(model_ref) = &agent.memory_policy.memory_model_ref {
                check_model_ref(&agent.agent_id, model_ref)?;
            }
            if !self.stores.contains_key(&agent.store) {
                return Err(Error::ConfigError(format!(
                    "agent '{}' references unknown store '{}'",
                    agent.agent_id, agent.store
                )));
            }
            for tool_ref in &agent.tool_refs {
                let tool_id = tool_ref.split('.').next().unwrap_or_default();
                if !KNOWN_TOOLKITS.contains(&tool_id) {
                    return Err(Error::ConfigError(format!(
                        "agent '{}' references unknown tool '{}'",
                        agent.agent_id, tool_ref
                    )));
                }
            }
        }

        let mut team_ids = HashSet::new();
        for team in &self.teams {
            if !team_ids.insert(team.team_id.as_str()) || agent_ids.contains(team.team_id.as_str()) {
                return Err(Error::ConfigError(format!("duplicate team id '{}'", team.team_id)));
            }
            check_model_ref(&team.team_id, &team.model_ref)?;
            if team.members.is_empty() {
                return Err(Error::ConfigError(format!("team '{}' has no members", team.team_id)));
            }
            for member in &team.members {
                if !agent_ids.contains(member.agent_id.as_str()) {
                    return Err(Error::ConfigError(format!(
                        "team '{}' references unknown agent '{}'",
                        team.team_id, member.agent_id
                    )));
                }
            }
            if !self.stores.contains_key(&team.store) {
                return Err(Error::ConfigError(format!(
                    "team '{}' references unknown store '{}'",
                    team.team_id, team.store
                )));
            }
        }

        Ok(())
    }

    /// Copy with every secret replaced, safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let hide = |v: &mut Option<String>| {
            if v.is_some() {
                *v = Some(REDACTED.to_string());
            }
        };
        hide(&mut copy.providers.anthropic.api_key);
        hide(&mut copy.providers.openai.api_key);
        hide(&mut copy.warehouse.password);
        hide(&mut copy.backend.basic_auth);
        hide(&mut copy.vector.api_key);
        hide(&mut copy.blob.sas_token);
        hide(&mut copy.auth.jwt_secret);
        copy
    }

    /// Render as TOML (for `mostrador config`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    pub fn team(&self, team_id: &str) -> Option<&TeamDescriptor> {
        self.teams.iter().find(|t| t.team_id == team_id)
    }
}

/// Split `provider:model`.
pub fn split_model_ref(model_ref: &str) -> Option<(&str, &str)> {
    let (provider, model) = model_ref.split_once(':')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}

fn check_model_ref(owner: &str, model_ref: &str) -> Result<()> {
    match split_model_ref(model_ref) {
        Some((provider, _)) if KNOWN_PROVIDERS.contains(&provider) => Ok(()),
        _ => Err(Error::ConfigError(format!(
            "'{}' has invalid model_ref '{}' (expected anthropic:<model> or openai:<model>)",
            owner, model_ref
        ))),
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
