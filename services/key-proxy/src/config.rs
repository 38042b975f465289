//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Upstream keys and access tokens are loaded from env vars or secret files,
//! never stored in the TOML directly to avoid leaking secrets.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::{Credential, Secret, parse_secret_list};
use key_pool::{Policy, PolicyTable, PoolSettings};
use serde::Deserialize;
use tracing::warn;

/// Env var holding the comma-separated upstream API keys.
pub const KEYS_ENV: &str = "UPSTREAM_KEYS";
/// Env var holding the comma-separated client access tokens.
pub const ACCESS_TOKENS_ENV: &str = "ACCESS_TOKENS";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub store: StoreConfig,
    /// Policy for models without an entry in `models`.
    #[serde(default)]
    pub default_policy: Policy,
    #[serde(default)]
    pub models: BTreeMap<String, Policy>,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(skip)]
    pub keys: Vec<Credential>,
    #[serde(skip)]
    pub access_tokens: Vec<Secret<String>>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Header carrying the client's access token inbound and the upstream key
    /// outbound.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Key health check settings
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    #[serde(default = "default_verify_url")]
    pub url: String,
    /// Pause between two key checks.
    #[serde(default = "default_verify_delay_ms")]
    pub delay_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            url: default_verify_url(),
            delay_ms: default_verify_delay_ms(),
        }
    }
}

/// Files holding secrets, used when the env vars are unset.
#[derive(Debug, Default, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    #[serde(default)]
    pub access_tokens_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_api_key_header() -> String {
    "x-goog-api-key".to_string()
}

fn default_verify_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-lite:generateContent"
        .to_string()
}

fn default_verify_delay_ms() -> u64 {
    2000
}

impl Config {
    /// Load configuration from a TOML file, then overlay secrets.
    ///
    /// Secret resolution order, for keys and access tokens alike:
    /// 1. env var (`UPSTREAM_KEYS` / `ACCESS_TOKENS`)
    /// 2. file path from `[secrets]`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        let keys = resolve_secret_list(KEYS_ENV, config.secrets.keys_file.as_deref())?
            .ok_or(common::Error::MissingSecret { name: KEYS_ENV })?;
        config.keys = keys.into_iter().map(Credential::new).collect();

        match resolve_secret_list(
            ACCESS_TOKENS_ENV,
            config.secrets.access_tokens_file.as_deref(),
        )? {
            Some(tokens) => config.access_tokens = tokens.into_iter().map(Secret::new).collect(),
            None => warn!("no access tokens configured, every proxied request will be rejected"),
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        // Validate upstream_url is a valid URL with http(s) scheme
        if !self.proxy.upstream_url.starts_with("http://")
            && !self.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                self.proxy.upstream_url
            )));
        }

        if self.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if axum::http::HeaderName::from_bytes(self.proxy.api_key_header.as_bytes()).is_err() {
            return Err(common::Error::Config(format!(
                "api_key_header is not a valid header name: {}",
                self.proxy.api_key_header
            )));
        }

        self.pool
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(common::Error::Config(
                "store.redis_url is required when store.backend = \"redis\"".into(),
            ));
        }

        Ok(())
    }

    /// Per-model policies with the configured fallback.
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::new(self.models.clone(), self.default_policy)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("key-rotation-proxy.toml")
    }
}

/// Read a comma-separated secret list from `env`, else from `file`.
/// `None` when neither source is configured.
fn resolve_secret_list(env: &str, file: Option<&Path>) -> common::Result<Option<Vec<String>>> {
    if let Ok(raw) = std::env::var(env) {
        return Ok(Some(parse_secret_list(&raw)));
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read secret file {}: {e}", file.display()))
    })?;
    Ok(Some(parse_secret_list(&raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use key_pool::OrderingKind;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[proxy]
listen_addr = "127.0.0.1:8080"
upstream_url = "https://generativelanguage.googleapis.com"

[models."gemini-2.5-pro"]
cooldown_secs = 60
daily_quota = 100

[models."gemini-2.5-flash"]
cooldown_secs = 10
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env(KEYS_ENV, "key-one, key-two,,") };
        unsafe { set_env(ACCESS_TOKENS_ENV, "tok-a") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV) };
        unsafe { remove_env(ACCESS_TOKENS_ENV) };

        assert_eq!(config.proxy.timeout_secs, 60);
        assert_eq!(config.proxy.max_connections, 1000);
        assert_eq!(config.proxy.api_key_header, "x-goog-api-key");
        assert_eq!(config.pool.ordering, OrderingKind::Shuffle);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.verify.delay_ms, 2000);
        assert_eq!(config.keys.len(), 2);
        assert_eq!(config.keys[1].expose(), "key-two");
        assert_eq!(config.access_tokens.len(), 1);

        let table = config.policy_table();
        assert_eq!(table.get("gemini-2.5-pro").daily_quota, Some(100));
        assert_eq!(table.get("gemini-2.5-flash").daily_quota, None);
        assert_eq!(table.get("other").cooldown_secs, 30);
    }

    #[test]
    fn test_full_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "0.0.0.0:9000"
upstream_url = "http://127.0.0.1:1"
timeout_secs = 5
api_key_header = "x-api-key"

[pool]
ordering = "round_robin"
time_zone = "Asia/Shanghai"
ban_ttl_secs = 600
[pool.lock]
ttl_secs = 5

[store]
backend = "redis"
redis_url = "redis://cache:6379"

[default_policy]
cooldown_secs = 15
daily_quota = 500

[verify]
delay_ms = 0
"#,
        );

        unsafe { set_env(KEYS_ENV, "k") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV) };

        assert_eq!(config.pool.ordering, OrderingKind::RoundRobin);
        assert_eq!(config.pool.lock_ttl(), Some(Duration::from_secs(5)));
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.default_policy, Policy::new(15, Some(500)));
        assert_eq!(config.verify.delay_ms, 0);
        assert!(config.verify.url.contains("generateContent"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_missing_keys_is_reported_by_name() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { remove_env(KEYS_ENV) };
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("UPSTREAM_KEYS"), "got: {err}");
    }

    #[test]
    fn test_secrets_from_files() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let keys_path = dir.path().join("keys");
        let tokens_path = dir.path().join("tokens");
        std::fs::write(&keys_path, "file-key-1,file-key-2\n").unwrap();
        std::fs::write(&tokens_path, " tok-1 , tok-2 \n").unwrap();

        let toml_content = format!(
            r#"{}
[secrets]
keys_file = "{}"
access_tokens_file = "{}"
"#,
            valid_toml(),
            keys_path.display(),
            tokens_path.display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { remove_env(KEYS_ENV) };
        unsafe { remove_env(ACCESS_TOKENS_ENV) };
        let config = Config::load(&path).unwrap();

        assert_eq!(config.keys.len(), 2);
        assert_eq!(config.keys[0].expose(), "file-key-1");
        assert_eq!(config.access_tokens.len(), 2);
        assert_eq!(config.access_tokens[1].expose(), "tok-2");
    }

    #[test]
    fn test_env_takes_precedence_over_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let keys_path = dir.path().join("keys");
        std::fs::write(&keys_path, "from-file").unwrap();
        let toml_content = format!(
            "{}\n[secrets]\nkeys_file = \"{}\"\n",
            valid_toml(),
            keys_path.display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { set_env(KEYS_ENV, "from-env") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV) };

        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.keys[0].expose(), "from-env");
    }

    #[test]
    fn test_unreadable_secret_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let toml_content = format!(
            "{}\n[secrets]\nkeys_file = \"{}\"\n",
            valid_toml(),
            dir.path().join("missing").display()
        );
        let path = write_config(&dir, &toml_content);

        unsafe { remove_env(KEYS_ENV) };
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to read secret file"), "got: {err}");
    }

    fn assert_rejected(toml_content: &str, needle: &str) {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, toml_content);
        unsafe { set_env(KEYS_ENV, "k") };
        let result = Config::load(&path);
        unsafe { remove_env(KEYS_ENV) };
        let err = result.unwrap_err();
        assert!(err.to_string().contains(needle), "got: {err}");
    }

    #[test]
    fn test_rejects_non_http_upstream() {
        assert_rejected(
            "[proxy]\nlisten_addr = \"127.0.0.1:8080\"\nupstream_url = \"ftp://example.com\"\n",
            "upstream_url",
        );
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert_rejected(
            "[proxy]\nlisten_addr = \"127.0.0.1:8080\"\nupstream_url = \"https://x\"\ntimeout_secs = 0\n",
            "timeout_secs",
        );
    }

    #[test]
    fn test_rejects_zero_max_connections() {
        assert_rejected(
            "[proxy]\nlisten_addr = \"127.0.0.1:8080\"\nupstream_url = \"https://x\"\nmax_connections = 0\n",
            "max_connections",
        );
    }

    #[test]
    fn test_rejects_unknown_time_zone() {
        assert_rejected(
            "[proxy]\nlisten_addr = \"127.0.0.1:8080\"\nupstream_url = \"https://x\"\n[pool]\ntime_zone = \"Mars/Base\"\n",
            "unknown time zone",
        );
    }

    #[test]
    fn test_rejects_redis_without_url() {
        assert_rejected(
            "[proxy]\nlisten_addr = \"127.0.0.1:8080\"\nupstream_url = \"https://x\"\n[store]\nbackend = \"redis\"\n",
            "redis_url",
        );
    }

    #[test]
    fn test_rejects_zero_lock_ttl() {
        assert_rejected(
            "[proxy]\nlisten_addr = \"127.0.0.1:8080\"\nupstream_url = \"https://x\"\n[pool.lock]\nttl_secs = 0\n",
            "lock ttl_secs",
        );
    }

    #[test]
    fn test_resolve_path_cli_takes_precedence() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("key-rotation-proxy.toml"));
    }

    #[test]
    fn test_resolve_path_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/config.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/env/config.toml"));
    }
}
