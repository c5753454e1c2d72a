// Copyright 2025 Canale Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Connector configuration.
//!
//! The configuration is loaded from a YAML file, completed from environment
//! variables (only fields the file left empty), validated, and defaulted.
//! [`Config::resolve_with`] is idempotent: applying it to an already resolved
//! tree changes nothing.
//!
//! ```yaml
//! connector:
//!   log: { level: debug }
//!   mongo: { uri: mongodb://localhost:27017 }
//!   nats: { url: nats://localhost:4222 }
//!   server: { addr: 127.0.0.1:8080 }
//!   collections:
//!     - dbName: test-connector
//!       collName: coll1
//!       changeStreamPreAndPostImages: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Log level when neither the file nor `LOG_LEVEL` sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Database holding resume cursor collections.
pub const DEFAULT_TOKENS_DB_NAME: &str = "resume-tokens";

/// Resume cursor collections are capped by default.
pub const DEFAULT_TOKENS_COLL_CAPPED: bool = true;

/// Default ring size for capped resume cursor collections.
pub const DEFAULT_TOKENS_COLL_SIZE_IN_BYTES: u64 = 4096;

/// Address of the operational HTTP surface.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";

const ACCEPTED_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Errors produced while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("could not read config file: {0}")]
    Read(#[from] std::io::Error),

    /// The config file is not valid YAML for this schema
    #[error("could not unmarshal config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A collection entry is missing `dbName`
    #[error("dbName property is missing")]
    MissingDbName,

    /// A collection entry is missing `collName`
    #[error("collName property is missing")]
    MissingCollName,

    /// Resume cursors would be stored in the watched collection itself
    #[error("cannot store resume tokens in the watched collection {db}.{coll}")]
    TokensCollide { db: String, coll: String },

    /// A capped cursor collection needs a positive size
    #[error("tokensCollSizeInBytes must be greater than zero for a capped collection")]
    InvalidCappedSize,

    /// The log level is not one of debug, info, warn, error
    #[error("unsupported log level {0:?}, expected debug|info|warn|error")]
    InvalidLogLevel(String),
}

/// Root of the configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub connector: ConnectorConfig,
}

/// Connector-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub mongo: MongoConfig,

    #[serde(default)]
    pub nats: NatsConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MongoConfig {
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NatsConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub addr: String,
}

/// One watched collection and where its cursors and messages go.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionConfig {
    /// Database of the watched collection (required)
    pub db_name: String,

    /// Watched collection (required)
    pub coll_name: String,

    /// Ask the server to capture pre/post-images
    pub change_stream_pre_and_post_images: Option<bool>,

    /// Database of the resume cursor collection
    pub tokens_db_name: String,

    /// Resume cursor collection; defaults to the watched collection's name
    pub tokens_coll_name: String,

    /// Whether the cursor collection is a fixed-size ring
    pub tokens_coll_capped: Option<bool>,

    /// Ring size; required to be positive when capped
    pub tokens_coll_size_in_bytes: Option<u64>,

    /// Destination stream; defaults to the uppercased collection name
    pub stream_name: String,
}

impl Config {
    /// Loads the configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Applies environment overrides, validates, and fills defaults.
    ///
    /// Environment variables only fill fields the file left empty:
    /// `LOG_LEVEL`, `MONGO_URI`, `NATS_URL`, `SERVER_ADDR`.
    pub fn validate_and_set_defaults(&mut self) -> Result<(), ConfigError> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::validate_and_set_defaults`] with an injectable
    /// environment lookup.
    pub fn resolve_with(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let connector = &mut self.connector;

        if connector.log.level.is_empty() {
            connector.log.level = env("LOG_LEVEL").unwrap_or_default();
        }
        if connector.log.level.is_empty() {
            connector.log.level = DEFAULT_LOG_LEVEL.to_string();
        }
        connector.log.level = connector.log.level.to_lowercase();
        if !ACCEPTED_LOG_LEVELS.contains(&connector.log.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(connector.log.level.clone()));
        }

        if connector.mongo.uri.is_empty() {
            connector.mongo.uri = env("MONGO_URI").unwrap_or_default();
        }
        if connector.nats.url.is_empty() {
            connector.nats.url = env("NATS_URL").unwrap_or_default();
        }
        if connector.server.addr.is_empty() {
            connector.server.addr = env("SERVER_ADDR").unwrap_or_default();
        }
        if connector.server.addr.is_empty() {
            connector.server.addr = DEFAULT_SERVER_ADDR.to_string();
        }

        for coll in &mut connector.collections {
            if coll.db_name.is_empty() {
                return Err(ConfigError::MissingDbName);
            }
            if coll.coll_name.is_empty() {
                return Err(ConfigError::MissingCollName);
            }

            if coll.change_stream_pre_and_post_images.is_none() {
                coll.change_stream_pre_and_post_images = Some(false);
            }
            if coll.tokens_db_name.is_empty() {
                coll.tokens_db_name = DEFAULT_TOKENS_DB_NAME.to_string();
            }
            if coll.tokens_coll_name.is_empty() {
                coll.tokens_coll_name = coll.coll_name.clone();
            }
            if coll.tokens_coll_capped.is_none() {
                coll.tokens_coll_capped = Some(DEFAULT_TOKENS_COLL_CAPPED);
            }
            if coll.tokens_coll_size_in_bytes.is_none() {
                coll.tokens_coll_size_in_bytes = Some(DEFAULT_TOKENS_COLL_SIZE_IN_BYTES);
            }
            if coll.stream_name.is_empty() {
                coll.stream_name = coll.coll_name.to_uppercase();
            }

            if coll.tokens_coll_capped == Some(true)
                && coll.tokens_coll_size_in_bytes == Some(0)
            {
                return Err(ConfigError::InvalidCappedSize);
            }

            // Checked after defaults so a defaulted cursor collection cannot
            // silently land in the watched collection either.
            if coll.db_name.eq_ignore_ascii_case(&coll.tokens_db_name)
                && coll.coll_name.eq_ignore_ascii_case(&coll.tokens_coll_name)
            {
                return Err(ConfigError::TokensCollide {
                    db: coll.db_name.clone(),
                    coll: coll.coll_name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_key: &str) -> Option<String> {
        None
    }

    fn minimal() -> Config {
        let mut cfg = Config::default();
        cfg.connector.collections.push(CollectionConfig {
            db_name: "test-connector".to_string(),
            coll_name: "coll1".to_string(),
            ..CollectionConfig::default()
        });
        cfg
    }

    #[test]
    fn test_defaults_applied() {
        let mut cfg = minimal();
        cfg.resolve_with(no_env).unwrap();

        assert_eq!(cfg.connector.log.level, "info");
        assert_eq!(cfg.connector.server.addr, DEFAULT_SERVER_ADDR);

        let coll = &cfg.connector.collections[0];
        assert_eq!(coll.change_stream_pre_and_post_images, Some(false));
        assert_eq!(coll.tokens_db_name, "resume-tokens");
        assert_eq!(coll.tokens_coll_name, "coll1");
        assert_eq!(coll.tokens_coll_capped, Some(true));
        assert_eq!(coll.tokens_coll_size_in_bytes, Some(4096));
        assert_eq!(coll.stream_name, "COLL1");
    }

    #[test]
    fn test_missing_db_name_rejected() {
        let mut cfg = minimal();
        cfg.connector.collections[0].db_name.clear();

        assert!(matches!(
            cfg.resolve_with(no_env),
            Err(ConfigError::MissingDbName)
        ));
    }

    #[test]
    fn test_missing_coll_name_rejected() {
        let mut cfg = minimal();
        cfg.connector.collections[0].coll_name.clear();

        assert!(matches!(
            cfg.resolve_with(no_env),
            Err(ConfigError::MissingCollName)
        ));
    }

    #[test]
    fn test_tokens_in_watched_collection_rejected_case_insensitively() {
        let mut cfg = minimal();
        cfg.connector.collections[0].tokens_db_name = "TEST-CONNECTOR".to_string();
        cfg.connector.collections[0].tokens_coll_name = "Coll1".to_string();

        assert!(matches!(
            cfg.resolve_with(no_env),
            Err(ConfigError::TokensCollide { .. })
        ));
    }

    #[test]
    fn test_defaulted_tokens_collection_collision_rejected() {
        let mut cfg = minimal();
        cfg.connector.collections[0].db_name = "resume-tokens".to_string();

        assert!(matches!(
            cfg.resolve_with(no_env),
            Err(ConfigError::TokensCollide { .. })
        ));
    }

    #[test]
    fn test_capped_with_zero_size_rejected() {
        let mut cfg = minimal();
        cfg.connector.collections[0].tokens_coll_capped = Some(true);
        cfg.connector.collections[0].tokens_coll_size_in_bytes = Some(0);

        assert!(matches!(
            cfg.resolve_with(no_env),
            Err(ConfigError::InvalidCappedSize)
        ));
    }

    #[test]
    fn test_uncapped_zero_size_is_fine() {
        let mut cfg = minimal();
        cfg.connector.collections[0].tokens_coll_capped = Some(false);
        cfg.connector.collections[0].tokens_coll_size_in_bytes = Some(0);

        cfg.resolve_with(no_env).unwrap();
    }

    #[test]
    fn test_env_fills_only_empty_fields() {
        let mut cfg = minimal();
        cfg.connector.mongo.uri = "mongodb://from-file:27017".to_string();

        cfg.resolve_with(|key| match key {
            "MONGO_URI" => Some("mongodb://from-env:27017".to_string()),
            "NATS_URL" => Some("nats://from-env:4222".to_string()),
            "LOG_LEVEL" => Some("DEBUG".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(cfg.connector.mongo.uri, "mongodb://from-file:27017");
        assert_eq!(cfg.connector.nats.url, "nats://from-env:4222");
        assert_eq!(cfg.connector.log.level, "debug");
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut cfg = minimal();
        cfg.connector.log.level = "verbose".to_string();

        assert!(matches!(
            cfg.resolve_with(no_env),
            Err(ConfigError::InvalidLogLevel(level)) if level == "verbose"
        ));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut cfg = minimal();
        cfg.resolve_with(no_env).unwrap();

        let resolved = cfg.clone();
        cfg.resolve_with(no_env).unwrap();

        assert_eq!(cfg, resolved);
    }
}
