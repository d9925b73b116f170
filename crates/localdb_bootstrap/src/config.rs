//! Configuration for the bootstrap manager.

use crate::environment::HostEnvironment;
use crate::error::{BootstrapError, BootstrapResult};
use std::time::Duration;

/// Version-pinned location of the engine image.
pub const DEFAULT_WASM_URL: &str =
    "https://unpkg.com/@electric-sql/pglite@0.2.15/dist/postgres.wasm";

/// Database name used when none is configured.
pub const DEFAULT_DATABASE_NAME: &str = "localdb";

/// Configuration for a bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Where the engine image is fetched from.
    pub wasm_url: String,
    /// Name of the database inside the filesystem adapter.
    pub database_name: String,
    /// Expected hex SHA-256 of the image, checked after download.
    pub expected_sha256: Option<String>,
    /// Host environment, decides the filesystem adapter.
    pub environment: HostEnvironment,
    /// Whether durable adapters may buffer writes.
    pub relaxed_durability: bool,
    /// Timeout for the image request.
    pub request_timeout: Duration,
    /// User agent sent with the image request.
    pub user_agent: String,
}

impl BootstrapConfig {
    /// Creates a configuration with the pinned image URL and a detected
    /// environment.
    pub fn new() -> Self {
        Self {
            wasm_url: DEFAULT_WASM_URL.to_string(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            expected_sha256: None,
            environment: HostEnvironment::detect(),
            relaxed_durability: true,
            request_timeout: Duration::from_secs(60),
            user_agent: format!("localdb-bootstrap/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the image URL.
    pub fn with_wasm_url(mut self, url: impl Into<String>) -> Self {
        self.wasm_url = url.into();
        self
    }

    /// Sets the database name.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// Requires the image to hash to `digest`.
    pub fn with_expected_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }

    /// Sets the host environment.
    pub fn with_environment(mut self, environment: HostEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Enables or disables relaxed durability.
    pub fn with_relaxed_durability(mut self, relaxed: bool) -> Self {
        self.relaxed_durability = relaxed;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Checks the configuration for values that can never work.
    pub fn validate(&self) -> BootstrapResult<()> {
        if self.wasm_url.trim().is_empty() {
            return Err(BootstrapError::Config("wasm_url is empty".into()));
        }

        localdb_fs::validate_name(&self.database_name).map_err(|_| {
            BootstrapError::Config(format!("invalid database name {:?}", self.database_name))
        })?;

        if let Some(digest) = &self.expected_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(BootstrapError::Config(format!(
                    "expected_sha256 must be 64 hex characters, got {digest:?}"
                )));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(BootstrapError::Config("request_timeout is zero".into()));
        }

        Ok(())
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = BootstrapConfig::new()
            .with_wasm_url("https://cdn.example.com/engine.wasm")
            .with_database_name("notes")
            .with_environment(HostEnvironment::Headless)
            .with_relaxed_durability(false)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.wasm_url, "https://cdn.example.com/engine.wasm");
        assert_eq!(config.database_name, "notes");
        assert_eq!(config.environment, HostEnvironment::Headless);
        assert!(!config.relaxed_durability);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_are_pinned() {
        let config = BootstrapConfig::default();
        assert_eq!(config.wasm_url, DEFAULT_WASM_URL);
        assert_eq!(config.database_name, DEFAULT_DATABASE_NAME);
        assert!(config.relaxed_durability);
        assert!(config.expected_sha256.is_none());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = BootstrapConfig::new().with_environment(HostEnvironment::Headless);

        assert!(base.clone().with_wasm_url("  ").validate().is_err());
        assert!(base.clone().with_database_name("../up").validate().is_err());
        assert!(base.clone().with_database_name("").validate().is_err());
        assert!(base.clone().with_database_name("a\0b").validate().is_err());
        assert!(base
            .clone()
            .with_database_name("n".repeat(129))
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_database_name("n".repeat(128))
            .validate()
            .is_ok());
        assert!(base.clone().with_expected_sha256("abc").validate().is_err());
        assert!(base
            .clone()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());

        let digest = "a".repeat(64);
        assert!(base.with_expected_sha256(digest).validate().is_ok());
    }
}
