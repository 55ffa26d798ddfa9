// ⚙️ Configuration
//
// Defaults, then an optional file (CONFIG_FILE or config/meal-ledger.*),
// then MEAL_LEDGER__SECTION__KEY environment variables.

use crate::error::Result;
use crate::money::{parse_amount, Money};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub retention: RetentionConfig,
    pub settlement: SettlementConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetentionConfig {
    /// Settled meals older than this many months are removed by cleanup
    pub months: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SettlementConfig {
    pub tolerance: String, // Decimal text, e.g. "0.01"
}

fn defaults() -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 5000)?
        .set_default("database.path", "meals.db")?
        .set_default("retention.months", 6)?
        .set_default("settlement.tolerance", "0.01")
}

impl AppConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let mut builder = defaults()?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(File::with_name("config/meal-ledger").required(false));
        }

        builder = builder.add_source(Environment::with_prefix("MEAL_LEDGER").separator("__"));

        // Common shorthands
        if let Ok(path) = env::var("DATABASE_PATH") {
            builder = builder.set_override("database.path", path)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Defaults plus one required file, no environment
    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.path.as_os_str().is_empty() {
            return Err("Database path is required".to_string());
        }

        if self.retention.months == 0 {
            return Err("Retention must keep at least one month".to_string());
        }

        match self.tolerance() {
            Ok(tolerance) if tolerance > Money::ZERO => Ok(()),
            Ok(_) => Err("Settlement tolerance must be positive".to_string()),
            Err(e) => Err(format!("Settlement tolerance: {}", e)),
        }
    }

    pub fn tolerance(&self) -> Result<Money> {
        parse_amount(&self.settlement.tolerance)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            database: DatabaseConfig {
                path: PathBuf::from("meals.db"),
            },
            retention: RetentionConfig { months: 6 },
            settlement: SettlementConfig {
                tolerance: "0.01".to_string(),
            },
        }
    }
}
