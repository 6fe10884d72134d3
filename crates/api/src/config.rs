//! Process configuration, read from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `JWT_SECRET` | `dev-secret` (with a warning) |
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `LOG_FORMAT` | `json` (`pretty`, `compact`) |

use stockledger_observability::LogFormat;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEV_JWT_SECRET: &str = "dev-secret";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Where balances and the ledger live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::InMemory => "in_memory",
            StorageConfig::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub storage: StorageConfig,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// In-memory configuration with the given signing secret (tests, local runs).
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            jwt_secret: jwt_secret.into(),
            storage: StorageConfig::InMemory,
            log_format: LogFormat::default(),
        }
    }

    /// True when no `JWT_SECRET` was supplied and the insecure default is in use.
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let log_format = lookup("LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();

        let persistent = match lookup("USE_PERSISTENT_STORES") {
            Some(value) => parse_flag("USE_PERSISTENT_STORES", &value)?,
            None => false,
        };

        let storage = if persistent {
            let database_url = lookup("DATABASE_URL")
                .filter(|s| !s.trim().is_empty())
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
                Some(value) => value.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or(
                    ConfigError::Invalid {
                        name: "DATABASE_MAX_CONNECTIONS",
                        value,
                    },
                )?,
                None => DEFAULT_MAX_CONNECTIONS,
            };
            StorageConfig::Postgres {
                database_url,
                max_connections,
            }
        } else {
            StorageConfig::InMemory
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            storage,
            log_format,
        })
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_to_in_memory_with_dev_secret() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.jwt_secret, "dev-secret");
        assert_eq!(config.storage, StorageConfig::InMemory);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn reads_log_format() {
        let config = AppConfig::from_lookup(lookup(&[("LOG_FORMAT", "pretty")])).unwrap();
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = AppConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDatabaseUrl);
    }

    #[test]
    fn reads_postgres_settings() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("JWT_SECRET", "s3cret"),
            ("USE_PERSISTENT_STORES", "TRUE"),
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.jwt_secret, "s3cret");
        assert!(!config.uses_dev_secret());
        assert_eq!(
            config.storage,
            StorageConfig::Postgres {
                database_url: "postgres://localhost/stock".to_string(),
                max_connections: 4,
            }
        );
        assert_eq!(config.storage.kind(), "postgres");
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "maybe")])),
            Err(ConfigError::Invalid { name: "USE_PERSISTENT_STORES", .. })
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[
                ("USE_PERSISTENT_STORES", "1"),
                ("DATABASE_URL", "postgres://localhost/stock"),
                ("DATABASE_MAX_CONNECTIONS", "0"),
            ])),
            Err(ConfigError::Invalid { name: "DATABASE_MAX_CONNECTIONS", .. })
        ));
    }
}
