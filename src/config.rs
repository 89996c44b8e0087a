//! Store and application configuration.

use crate::persist::{PersistMode, StorageBackend};
use serde::{Deserialize, Serialize};
use std::env;

/// Default storage key.
pub const DEFAULT_STORE_NAME: &str = "portfolio-store";

/// Deployment environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse an environment name. Unknown names fall back to development.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Application settings kept in the app slice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub api_base_url: String,
    pub version: String,
    pub environment: Environment,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "/api".to_string(),
            version: "1.0.0".to_string(),
            environment: Environment::Development,
        }
    }
}

impl AppConfig {
    /// Read `APP_API_URL`, `APP_VERSION` and `APP_ENV`, defaulting each.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env::var("APP_API_URL").unwrap_or(defaults.api_base_url),
            version: env::var("APP_VERSION").unwrap_or(defaults.version),
            environment: env::var("APP_ENV")
                .map(|v| Environment::parse(&v))
                .unwrap_or(defaults.environment),
        }
    }
}

/// Partial update for [`AppConfig`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub api_base_url: Option<String>,
    pub version: Option<String>,
    pub environment: Option<Environment>,
}

impl ConfigPatch {
    pub fn apply(self, config: &mut AppConfig) {
        if let Some(url) = self.api_base_url {
            config.api_base_url = url;
        }
        if let Some(version) = self.version {
            config.version = version;
        }
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
    }
}

/// Identity provider redirect settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    /// Origin the provider redirects back to after OAuth.
    pub site_origin: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            site_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl AuthConfig {
    /// Read `APP_SITE_ORIGIN`.
    pub fn from_env() -> Self {
        env::var("APP_SITE_ORIGIN")
            .map(|site_origin| Self { site_origin })
            .unwrap_or_default()
    }

    pub fn oauth_redirect(&self) -> String {
        self.site_origin.trim_end_matches('/').to_string()
    }

    pub fn password_reset_redirect(&self) -> String {
        format!("{}/auth/reset-password", self.oauth_redirect())
    }
}

/// Root store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Store name; also the storage key.
    pub name: String,

    /// Whether commits are persisted and rehydrated.
    pub persist: bool,

    pub persist_mode: PersistMode,

    /// Durable medium.
    pub storage: StorageBackend,

    /// Whether listeners are notified of commits.
    pub broadcast: bool,

    /// Whether transitions are fed to a devtools inspector.
    pub devtools: bool,

    /// Inspector buffer (transitions).
    /// Default: 256
    pub devtools_buffer: usize,

    pub auth: AuthConfig,

    pub app: AppConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let app = AppConfig::default();
        Self {
            name: DEFAULT_STORE_NAME.to_string(),
            persist: true,
            persist_mode: PersistMode::Immediate,
            storage: StorageBackend::Memory,
            broadcast: true,
            devtools: app.environment == Environment::Development,
            devtools_buffer: 256,
            auth: AuthConfig::default(),
            app,
        }
    }
}

impl StoreConfig {
    /// Defaults with app and auth settings taken from the environment.
    /// Devtools follow the environment: on in development only.
    pub fn from_env() -> Self {
        let app = AppConfig::from_env();
        Self {
            devtools: app.environment == Environment::Development,
            auth: AuthConfig::from_env(),
            app,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse(" Staging "), Environment::Staging);
        assert_eq!(Environment::parse("whatever"), Environment::Development);
    }

    #[test]
    fn test_redirects() {
        let auth = AuthConfig {
            site_origin: "https://example.com/".into(),
        };
        assert_eq!(auth.oauth_redirect(), "https://example.com");
        assert_eq!(
            auth.password_reset_redirect(),
            "https://example.com/auth/reset-password"
        );
    }

    #[test]
    fn test_config_patch() {
        let mut config = AppConfig::default();
        ConfigPatch {
            version: Some("2.0.0".into()),
            ..Default::default()
        }
        .apply(&mut config);
        assert_eq!(config.version, "2.0.0");
        assert_eq!(config.api_base_url, "/api");
    }

    #[test]
    fn test_default_store_config() {
        let config = StoreConfig::default();
        assert_eq!(config.name, DEFAULT_STORE_NAME);
        assert!(config.persist);
        assert!(config.devtools);
    }
}
