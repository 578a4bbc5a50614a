//! API server configuration.
//!
//! Only the server's own knobs live here. Provider credentials and billing
//! tunables belong to `tradelab_billing::BillingConfig`, which reads its own
//! environment on startup.

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to
    pub bind_address: String,
    /// Postgres connection string (pooled, e.g. through PgBouncer)
    pub database_url: String,
    /// Direct connection string for migrations; poolers break prepared
    /// statements, so migrations bypass them when this is set
    pub database_direct_url: Option<String>,
    /// Shared secret for the /internal routes
    pub internal_api_key: String,
    /// Origin allowlist for CORS
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Environment variable {0} must not be empty")]
    Empty(&'static str),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let database_direct_url = std::env::var("DATABASE_DIRECT_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        // Internal routes trigger sweeps and mutate plans. Refusing to start
        // without a key beats starting with those routes open.
        let internal_api_key = std::env::var("INTERNAL_API_KEY")
            .map_err(|_| ConfigError::Missing("INTERNAL_API_KEY"))?;
        if internal_api_key.trim().is_empty() {
            return Err(ConfigError::Empty("INTERNAL_API_KEY"));
        }

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // Default to localhost for development; production sets ALLOWED_ORIGINS
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bind_address,
            database_url,
            database_direct_url,
            internal_api_key,
            allowed_origins,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "DATABASE_URL",
            "DATABASE_DIRECT_URL",
            "INTERNAL_API_KEY",
            "BIND_ADDRESS",
            "ALLOWED_ORIGINS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn from_env_requires_database_url() {
        clear_env();
        std::env::set_var("INTERNAL_API_KEY", "test-internal-key");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    #[serial]
    fn from_env_rejects_blank_internal_key() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/tradelab");
        std::env::set_var("INTERNAL_API_KEY", "   ");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Empty("INTERNAL_API_KEY")));
    }

    #[test]
    #[serial]
    fn from_env_applies_defaults() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/tradelab");
        std::env::set_var("INTERNAL_API_KEY", "test-internal-key");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert!(config.database_direct_url.is_none());
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        );
    }

    #[test]
    #[serial]
    fn allowed_origins_are_split_and_trimmed() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/tradelab");
        std::env::set_var("INTERNAL_API_KEY", "test-internal-key");
        std::env::set_var(
            "ALLOWED_ORIGINS",
            "https://app.tradelab.io, https://staging.tradelab.io ,",
        );

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://app.tradelab.io", "https://staging.tradelab.io"]
        );
    }
}
