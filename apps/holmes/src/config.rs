use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use holmes_link::{BackoffPolicy, LinkPolicy, Origin};
use tracing::warn;

/// HOLMES client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host (and port) the dashboard server listens on
    pub server: String,
    /// Use `wss` instead of `ws`
    pub secure: bool,
    /// Where persisted selections live
    pub state_dir: PathBuf,
    pub policy: LinkPolicy,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let server = env::var("HOLMES_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string());
        let secure = env_truthy("HOLMES_SECURE").unwrap_or(false);
        let state_dir = env::var("HOLMES_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_state_dir());

        let defaults = LinkPolicy::default();
        let backoff = BackoffPolicy {
            initial_delay: env_millis("HOLMES_WS_INITIAL_DELAY_MS", defaults.backoff.initial_delay),
            max_delay: env_millis("HOLMES_WS_MAX_DELAY_MS", defaults.backoff.max_delay),
            backoff_factor: env_parse("HOLMES_WS_BACKOFF_FACTOR", defaults.backoff.backoff_factor),
            max_retries: env_parse("HOLMES_WS_MAX_RETRIES", defaults.backoff.max_retries),
        };
        let liveness_ms: u64 = env_parse("HOLMES_WS_LIVENESS_MS", 0);
        let jitter: f64 = env_parse("HOLMES_WS_JITTER", defaults.jitter);
        let policy = LinkPolicy {
            backoff: backoff.normalized(),
            connection_timeout: env_millis(
                "HOLMES_WS_CONNECT_TIMEOUT_MS",
                defaults.connection_timeout,
            ),
            heartbeat_interval: env_millis("HOLMES_WS_HEARTBEAT_MS", defaults.heartbeat_interval)
                .max(Duration::from_millis(1)),
            liveness_timeout: (liveness_ms > 0).then(|| Duration::from_millis(liveness_ms)),
            jitter: if jitter.is_finite() {
                jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
        };

        Self {
            server: normalize_server(server),
            secure,
            state_dir,
            policy,
        }
    }

    /// Command-line values win over the environment.
    pub fn with_overrides(mut self, server: Option<String>, secure: bool) -> Self {
        if let Some(server) = server {
            self.server = normalize_server(server);
        }
        self.secure |= secure;
        self
    }

    pub fn origin(&self) -> Origin {
        Origin::new(self.server.clone(), self.secure)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            secure: false,
            state_dir: default_state_dir(),
            policy: LinkPolicy::default(),
        }
    }
}

const DEFAULT_SERVER: &str = "127.0.0.1:8000";

// Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
fn normalize_server(server: String) -> String {
    if server == "localhost" || server.starts_with("localhost:") {
        server.replacen("localhost", "127.0.0.1", 1)
    } else {
        server
    }
}

fn default_state_dir() -> PathBuf {
    ProjectDirs::from("", "", "holmes")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".holmes"))
}

pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

fn env_parse<T: FromStr>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(target: "holmes::config", var, value = %raw, "unparseable value; using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(var: &str, default: Duration) -> Duration {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(env_parse(var, default_ms))
}
