//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `TOLLGATE` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use tollgate::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on port {}", config.server.port);
//! ```

mod auth;
mod database;
mod error;
mod gateways;
mod panel;
mod reconciliation;
mod server;
mod side_effects;

pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use gateways::{GatewaySection, GatewaysConfig};
pub use panel::{PanelConfig, PanelNotificationsConfig};
pub use reconciliation::ReconciliationConfig;
pub use server::{Environment, ServerConfig};
pub use side_effects::SideEffectsConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, logging)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cabinet session tokens
    #[serde(default)]
    pub auth: AuthConfig,

    /// Payment processors
    #[serde(default)]
    pub gateways: GatewaysConfig,

    /// Provisioning panel webhook and API
    #[serde(default)]
    pub panel: PanelConfig,

    /// Payment sweep and panel sync jobs
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Post-settlement stages
    #[serde(default)]
    pub side_effects: SideEffectsConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `TOLLGATE` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `TOLLGATE__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `TOLLGATE__GATEWAYS__PAL24__API_TOKEN=...` -> `gateways.pal24.api_token = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("TOLLGATE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.auth.validate()?;
        self.gateways.validate()?;
        self.panel.validate()?;
        self.reconciliation.validate()?;
        self.side_effects.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settlement::Processor;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[(&str, &str)] = &[
        ("TOLLGATE__DATABASE__URL", "postgresql://test@localhost/test"),
        ("TOLLGATE__AUTH__JWT_SECRET", "0123456789abcdef0123456789abcdef"),
        ("TOLLGATE__GATEWAYS__PAL24__SHOP_ID", "shop-1"),
        ("TOLLGATE__GATEWAYS__PAL24__API_TOKEN", "pal-token"),
        ("TOLLGATE__GATEWAYS__PAL24__MIN_AMOUNT_MINOR", "5000"),
        ("TOLLGATE__PANEL__WEBHOOK_SECRET", "panel-secret"),
    ];

    /// Helper to set environment variables for testing
    fn set_minimal_env() {
        for (key, value) in VARS {
            env::set_var(key, value);
        }
    }

    /// Helper to clear environment variables after testing
    fn clear_env() {
        for (key, _) in VARS {
            env::remove_var(key);
        }
        env::remove_var("TOLLGATE__SERVER__PORT");
        env::remove_var("TOLLGATE__SERVER__ENVIRONMENT");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.database.connection_url(), Some("postgresql://test@localhost/test"));

        let pal24 = config.gateways.section(Processor::Pal24).unwrap();
        assert_eq!(pal24.min_amount_minor, 5000);
        assert_eq!(pal24.api_token.as_ref().unwrap().expose_secret(), "pal-token");
        assert!(config.gateways.section(Processor::Wata).is_none());
        assert_eq!(
            config.panel.webhook_secret.as_ref().unwrap().expose_secret(),
            "panel-secret"
        );
    }

    #[test]
    fn test_validate_full_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.validate().is_ok(), "{:?}", config.validate());
    }

    #[test]
    fn test_server_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.reconciliation.sweep_interval_secs, 30);
    }

    #[test]
    fn test_is_production() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("TOLLGATE__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_custom_server_port() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("TOLLGATE__SERVER__PORT", "3000");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.port, 3000);
    }
}
