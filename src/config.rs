use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Initial reconnect delay for the event-stream watcher, in milliseconds.
pub const SSE_RETRY_INIT_MS: u64 = 2000;

/// Maximum reconnect delay for the event-stream watcher, in milliseconds.
/// The delay doubles on each failed attempt and is capped here.
pub const SSE_RETRY_MAX_MS: u64 = 30_000;

/// How often the waiting page probes for readiness during the first
/// [`POLL_FAST_ATTEMPTS`] attempts, in milliseconds.
pub const POLL_FAST_MS: u64 = 2500;

/// Probe interval after the fast attempts are exhausted, in milliseconds.
pub const POLL_SLOW_MS: u64 = 6000;

/// Number of fast probe attempts before the waiting page slows down.
pub const POLL_FAST_ATTEMPTS: u32 = 20;

/// Total wall time before the waiting page gives up and offers a manual
/// retry, in milliseconds.
pub const POLL_GIVE_UP_MS: u64 = 300_000;

/// Advisory retry delay sent to machine-facing callers, in seconds.
pub const RETRY_AFTER_SECS: u64 = 3;

/// Environment variables copied verbatim from the proxy's own environment
/// into the backend's environment at registration time. Anything not on
/// this list is never forwarded.
pub const FORWARDED_ENV_VARS: &[&str] = &[
    "HOME",
    "PATH",
    "LANG",
    "TZ",
    "BACKEND_API_KEY",
    "BACKEND_LOG_LEVEL",
    "BACKEND_WORKSPACE",
];

/// Global configuration for the forwarding layer
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Backend instance configuration
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Singleton instance name used for handle resolution
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Address the backend serves requests on once warm
    #[serde(default = "default_backend_addr")]
    pub addr: String,

    /// Address of the lifecycle manager's control API (idle-timeout
    /// renewal, environment registration)
    #[serde(default = "default_control_addr")]
    pub control_addr: String,

    /// Path of the backend's internal event feed
    #[serde(default = "default_event_path")]
    pub event_path: String,

    /// Port value injected into the backend's environment as PORT
    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// Optional placement hint passed through to handle resolution
    pub placement_hint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            addr: default_backend_addr(),
            control_addr: default_control_addr(),
            event_path: default_event_path(),
            port: default_backend_port(),
            placement_hint: None,
        }
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_instance_name() -> String {
    "container".to_string()
}

fn default_backend_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_control_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_event_path() -> String {
    "/internal/events".to_string()
}

fn default_backend_port() -> u16 {
    3000
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl BackendConfig {
    /// Assemble the one-time environment snapshot handed to the lifecycle
    /// manager: the fixed allowlist copied from the process environment,
    /// plus the injected PORT. Assembled once at startup and treated as
    /// immutable thereafter.
    pub fn env_snapshot(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for name in FORWARDED_ENV_VARS {
            if let Ok(value) = std::env::var(name) {
                env.insert((*name).to_string(), value);
            }
        }
        env.insert("PORT".to_string(), self.port.to_string());
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 8088
bind = "127.0.0.1"

[backend]
instance_name = "sandbox"
addr = "127.0.0.1:4000"
control_addr = "127.0.0.1:9191"
event_path = "/events"
port = 4000
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.backend.instance_name, "sandbox");
        assert_eq!(config.backend.addr, "127.0.0.1:4000");
        assert_eq!(config.backend.event_path, "/events");
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.backend.instance_name, "container");
        assert_eq!(config.backend.event_path, "/internal/events");
        assert!(config.backend.placement_hint.is_none());
    }

    #[test]
    fn test_env_snapshot_injects_port() {
        let backend = BackendConfig {
            port: 4321,
            ..Default::default()
        };

        let env = backend.env_snapshot();
        assert_eq!(env.get("PORT").map(String::as_str), Some("4321"));
    }

    #[test]
    fn test_env_snapshot_only_allowlisted_vars() {
        // The test process carries plenty of ambient variables (CARGO_*,
        // RUSTUP_*); none of them may leak into the snapshot
        let env = BackendConfig::default().env_snapshot();
        for key in env.keys() {
            assert!(
                key == "PORT" || FORWARDED_ENV_VARS.contains(&key.as_str()),
                "unexpected variable in snapshot: {key}"
            );
        }
        assert!(!FORWARDED_ENV_VARS.contains(&"PORT"));
    }

    #[test]
    fn test_timing_constants() {
        assert_eq!(SSE_RETRY_INIT_MS, 2000);
        assert_eq!(SSE_RETRY_MAX_MS, 30_000);
        assert_eq!(POLL_FAST_MS, 2500);
        assert_eq!(POLL_SLOW_MS, 6000);
        assert_eq!(POLL_FAST_ATTEMPTS, 20);
        assert_eq!(POLL_GIVE_UP_MS, 300_000);
        assert_eq!(RETRY_AFTER_SECS, 3);
    }
}
