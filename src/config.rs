use std::time::Duration;

use serde::Deserialize;

use crate::error::TxScopeError;

/// Name of the extension created and verified when `enable_postgis` is set.
pub const POSTGIS_EXTENSION: &str = "postgis";

const DEFAULT_MAX_SIZE: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Parameters for [`Conn::open`](crate::Conn::open).
///
/// `addr` is handed to the driver untouched; for Postgres that is either a
/// libpq key/value string or a `postgres://` URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnParams {
    pub addr: String,
    #[serde(default)]
    pub enable_postgis: bool,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_size() -> u32 {
    DEFAULT_MAX_SIZE
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl ConnParams {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            enable_postgis: false,
            max_size: DEFAULT_MAX_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn with_postgis(mut self, enable: bool) -> Self {
        self.enable_postgis = enable;
        self
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Driver-independent checks run before any pool is built.
    ///
    /// # Errors
    /// Returns `TxScopeError::ConfigError` when the address is blank or the pool settings are zero.
    pub fn validate(&self) -> Result<(), TxScopeError> {
        if self.addr.trim().is_empty() {
            return Err(TxScopeError::ConfigError("addr is required".to_string()));
        }
        if self.max_size == 0 {
            return Err(TxScopeError::ConfigError(
                "max_size must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(TxScopeError::ConfigError(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
