//! Configuration for the live config mirror.

use crate::error::{LiveConfigError, LiveConfigResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default Redis URL when `REDIS_URL` is not set.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default timeout applied to every store round-trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

const PRODUCTION_NAME: &str = "live-config";
const TEST_NAME: &str = "live-config:test";

/// Which shared record and broadcast topic a mirror attaches to.
///
/// Test runs use their own namespace so they never see (or pollute)
/// production traffic on a shared Redis instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Namespace {
    #[default]
    Production,
    Test,
}

impl Namespace {
    /// Name of the persisted hash.
    pub fn record_key(&self) -> &'static str {
        match self {
            Namespace::Production => PRODUCTION_NAME,
            Namespace::Test => TEST_NAME,
        }
    }

    /// Name of the broadcast topic.
    pub fn topic(&self) -> &'static str {
        match self {
            Namespace::Production => PRODUCTION_NAME,
            Namespace::Test => TEST_NAME,
        }
    }
}

impl FromStr for Namespace {
    type Err = LiveConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Namespace::Production),
            "test" => Ok(Namespace::Test),
            other => Err(LiveConfigError::Config(format!(
                "unknown namespace '{}', expected 'production' or 'test'",
                other
            ))),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Production => write!(f, "production"),
            Namespace::Test => write!(f, "test"),
        }
    }
}

/// Live config options.
#[derive(Debug, Clone)]
pub struct LiveConfigOptions {
    /// Redis connection URL (credentials included, passed through as-is)
    pub redis_url: String,

    /// Record/topic namespace
    pub namespace: Namespace,

    /// Timeout for each store round-trip; `None` waits forever
    pub operation_timeout: Option<Duration>,
}

impl LiveConfigOptions {
    /// Options for the given Redis URL in the production namespace.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            namespace: Namespace::Production,
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
        }
    }

    /// Build options from a host, port and optional password.
    pub fn from_parts(host: &str, port: u16, password: Option<&str>) -> LiveConfigResult<Self> {
        let mut url = Url::parse(&format!("redis://{}:{}", host, port))
            .map_err(|e| LiveConfigError::Config(format!("invalid redis host '{}': {}", host, e)))?;

        if let Some(password) = password {
            url.set_password(Some(password))
                .map_err(|_| LiveConfigError::Config("cannot set redis password".to_string()))?;
        }

        Ok(Self::new(url.to_string()))
    }

    /// Load options from the environment.
    ///
    /// Reads `REDIS_URL`, `LIVE_CONFIG_NAMESPACE` and
    /// `LIVE_CONFIG_TIMEOUT_MS` (`0` disables the timeout).
    pub fn from_env() -> LiveConfigResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());

        let namespace = match std::env::var("LIVE_CONFIG_NAMESPACE") {
            Ok(value) => value.parse()?,
            Err(_) => Namespace::Production,
        };

        let operation_timeout = match std::env::var("LIVE_CONFIG_TIMEOUT_MS") {
            Ok(value) => {
                let ms: u64 = value.trim().parse().map_err(|_| {
                    LiveConfigError::Config(format!("invalid LIVE_CONFIG_TIMEOUT_MS '{}'", value))
                })?;
                timeout_from_millis(ms)
            }
            Err(_) => Some(DEFAULT_OPERATION_TIMEOUT),
        };

        Ok(Self {
            redis_url,
            namespace,
            operation_timeout,
        })
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Name of the persisted hash for this namespace.
    pub fn record_key(&self) -> &'static str {
        self.namespace.record_key()
    }

    /// Name of the broadcast topic for this namespace.
    pub fn topic(&self) -> &'static str {
        self.namespace.topic()
    }
}

impl Default for LiveConfigOptions {
    fn default() -> Self {
        Self::new(DEFAULT_REDIS_URL)
    }
}

/// Convert a millisecond setting into an optional timeout (`0` = none).
pub fn timeout_from_millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}
