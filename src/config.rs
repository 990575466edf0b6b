//! River configuration.
//!
//! A river is configured from a TOML file. Every key is optional; names of
//! the source database, collection and target index default to the river
//! name, and the checkpoint index to `river-<name>`.
//!
//! ```toml
//! [river]
//! name = "orders"
//!
//! [source]
//! host = "arango.internal"
//! min_wait = "100ms"
//! max_wait = "10s"
//! exclude_fields = ["internal_notes"]
//!
//! [source.credentials]
//! username = "river"
//! password = "secret"
//!
//! [target]
//! url = "http://es.internal:9200"
//! bulk_size = 500
//! throttle_size = -1
//!
//! [checkpoint]
//! storage = "filesystem"
//! dir = "/var/lib/river"
//! ```

mod duration;

use std::path::Path;
use std::time::Duration;

use arangodb_wal_source::{ArangoOpts, SlurperOpts};
use checkpoint::CheckpointStorage;
use elasticsearch_sink::ElasticsearchOpts;
use serde::Deserialize;
use sync_core::QueueCapacity;
use thiserror::Error;

pub use duration::parse_duration;

/// Fields stripped from every document before indexing.
pub const ALWAYS_EXCLUDED_FIELDS: [&str; 3] = ["_id", "_key", "_rev"];

pub const DEFAULT_RIVER_NAME: &str = "arangodb";
pub const DEFAULT_CHECKPOINT_DIR: &str = ".river-checkpoints";

/// Invalid or unreadable configuration. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

/// Connection and polling settings of the ArangoDB side.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub collection: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Ignore the checkpoint and replay from the start of the log.
    pub full_sync: bool,
    /// Recreate the target index when starting from the beginning.
    pub drop_target: bool,
    pub min_wait: Duration,
    pub max_wait: Duration,
    /// Always starts with `_id`, `_key`, `_rev`.
    pub exclude_fields: Vec<String>,
    /// Upper bound of one WAL tail response in bytes.
    pub chunk_size: u64,
}

/// Settings of the Elasticsearch side.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index: String,
    /// Mapping type, sent as `_type` only when set.
    pub doc_type: Option<String>,
    pub bulk_size: usize,
    pub bulk_timeout: Duration,
    /// Queue capacity; `-1` means unbounded.
    pub throttle_size: i64,
}

/// A configured document transformation script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptConfig {
    pub source: Option<String>,
    pub script_type: Option<String>,
}

/// Fully resolved configuration of one river.
#[derive(Debug, Clone, PartialEq)]
pub struct RiverConfig {
    pub name: String,
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub checkpoint: CheckpointStorage,
    pub script: Option<ScriptConfig>,
    /// How long `close` waits for the units before aborting them.
    pub join_timeout: Duration,
}

impl RiverConfig {
    /// Defaults for a river called `name`.
    pub fn for_river(name: &str) -> Self {
        let bulk_size = 100;
        Self {
            name: name.to_string(),
            source: SourceConfig {
                host: "localhost".to_string(),
                port: 8529,
                database: name.to_string(),
                collection: name.to_string(),
                username: None,
                password: None,
                full_sync: false,
                drop_target: true,
                min_wait: Duration::from_millis(100),
                max_wait: Duration::from_millis(10_000),
                exclude_fields: ALWAYS_EXCLUDED_FIELDS.iter().map(|f| f.to_string()).collect(),
                chunk_size: 1024 * 1024,
            },
            target: TargetConfig {
                url: "http://localhost:9200".to_string(),
                username: None,
                password: None,
                index: name.to_string(),
                doc_type: None,
                bulk_size,
                bulk_timeout: Duration::from_millis(10),
                throttle_size: bulk_size as i64 * 5,
            },
            checkpoint: CheckpointStorage::default_index(name),
            script: None,
            join_timeout: Duration::from_secs(5),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(s)?;
        let config = raw.resolve()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the river cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("river.name", &self.name),
            ("source.host", &self.source.host),
            ("source.database", &self.source.database),
            ("source.collection", &self.source.collection),
            ("target.url", &self.target.url),
            ("target.index", &self.target.index),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(invalid(key, "must not be blank"));
            }
        }

        if self.source.port == 0 {
            return Err(invalid("source.port", "must not be 0"));
        }
        if self.source.chunk_size == 0 {
            return Err(invalid("source.chunk_size", "must be positive"));
        }
        if self.target.bulk_size == 0 {
            return Err(invalid("target.bulk_size", "must be positive"));
        }

        let durations = [
            ("source.min_wait", self.source.min_wait),
            ("source.max_wait", self.source.max_wait),
            ("target.bulk_timeout", self.target.bulk_timeout),
            ("river.join_timeout", self.join_timeout),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(invalid(key, "must be positive"));
            }
        }
        if self.source.min_wait > self.source.max_wait {
            return Err(invalid(
                "source.min_wait",
                format!(
                    "{:?} exceeds source.max_wait {:?}",
                    self.source.min_wait, self.source.max_wait
                ),
            ));
        }

        if QueueCapacity::from_throttle_size(self.target.throttle_size).is_none() {
            return Err(invalid(
                "target.throttle_size",
                format!(
                    "{} is neither positive nor -1 (unbounded)",
                    self.target.throttle_size
                ),
            ));
        }

        match &self.checkpoint {
            CheckpointStorage::Index { index } if index.trim().is_empty() => {
                return Err(invalid("checkpoint.index", "must not be blank"))
            }
            CheckpointStorage::Filesystem { dir } if dir.trim().is_empty() => {
                return Err(invalid("checkpoint.dir", "must not be blank"))
            }
            _ => {}
        }

        if let Some(script) = &self.script {
            if let Some(script_type) = &script.script_type {
                return Err(invalid(
                    "script_type",
                    format!("unsupported script type '{script_type}'"),
                ));
            }
            return Err(invalid(
                "script",
                "no script engine is available; transform documents through the library Script trait",
            ));
        }

        Ok(())
    }

    pub fn queue_capacity(&self) -> QueueCapacity {
        QueueCapacity::from_throttle_size(self.target.throttle_size)
            .unwrap_or(QueueCapacity::Bounded(self.target.bulk_size.saturating_mul(5)))
    }

    pub fn arango_opts(&self) -> ArangoOpts {
        ArangoOpts {
            host: self.source.host.clone(),
            port: self.source.port,
            database: self.source.database.clone(),
            username: self.source.username.clone(),
            password: self.source.password.clone(),
            chunk_size: self.source.chunk_size,
            ..Default::default()
        }
    }

    pub fn slurper_opts(&self) -> SlurperOpts {
        SlurperOpts {
            min_wait: self.source.min_wait,
            max_wait: self.source.max_wait,
            scan_batch_size: self.target.bulk_size,
        }
    }

    pub fn elasticsearch_opts(&self) -> ElasticsearchOpts {
        ElasticsearchOpts {
            url: self.target.url.clone(),
            username: self.target.username.clone(),
            password: self.target.password.clone(),
            ..Default::default()
        }
    }

    /// Add configured extra fields to the always-excluded ones.
    pub fn set_exclude_fields<I, S>(&mut self, extra: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields: Vec<String> = ALWAYS_EXCLUDED_FIELDS.iter().map(|f| f.to_string()).collect();
        for field in extra {
            let field = field.into();
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        self.source.exclude_fields = fields;
    }
}

// ============================================================================
// File format
// ============================================================================

/// A duration written as bare milliseconds or as a suffixed string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Millis(u64),
    Text(String),
}

fn resolve_duration(
    key: &'static str,
    value: Option<DurationValue>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(DurationValue::Millis(ms)) => Ok(Duration::from_millis(ms)),
        Some(DurationValue::Text(text)) => {
            parse_duration(&text).map_err(|e| invalid(key, format!("{e:#}")))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    script: Option<String>,
    script_type: Option<String>,
    river: RawRiver,
    source: RawSource,
    target: RawTarget,
    checkpoint: RawCheckpoint,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRiver {
    name: Option<String>,
    join_timeout: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCredentials {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSource {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    collection: Option<String>,
    credentials: RawCredentials,
    full_sync: Option<bool>,
    drop_target: Option<bool>,
    min_wait: Option<DurationValue>,
    max_wait: Option<DurationValue>,
    exclude_fields: Vec<String>,
    chunk_size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawTarget {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    index: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
    bulk_size: Option<usize>,
    bulk_timeout: Option<DurationValue>,
    throttle_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCheckpoint {
    storage: Option<String>,
    index: Option<String>,
    dir: Option<String>,
}

impl RawConfig {
    fn resolve(self) -> Result<RiverConfig, ConfigError> {
        let name = self
            .river
            .name
            .unwrap_or_else(|| DEFAULT_RIVER_NAME.to_string());
        let mut config = RiverConfig::for_river(&name);

        config.join_timeout =
            resolve_duration("river.join_timeout", self.river.join_timeout, config.join_timeout)?;

        let source = self.source;
        let defaults = config.source.clone();
        config.source = SourceConfig {
            host: source.host.unwrap_or(defaults.host),
            port: source.port.unwrap_or(defaults.port),
            database: source.database.unwrap_or(defaults.database),
            collection: source.collection.unwrap_or(defaults.collection),
            username: source.credentials.username.filter(|u| !u.is_empty()),
            password: source.credentials.password,
            full_sync: source.full_sync.unwrap_or(defaults.full_sync),
            drop_target: source.drop_target.unwrap_or(defaults.drop_target),
            min_wait: resolve_duration("source.min_wait", source.min_wait, defaults.min_wait)?,
            max_wait: resolve_duration("source.max_wait", source.max_wait, defaults.max_wait)?,
            exclude_fields: defaults.exclude_fields,
            chunk_size: source.chunk_size.unwrap_or(defaults.chunk_size),
        };
        config.set_exclude_fields(source.exclude_fields);

        let target = self.target;
        let defaults = config.target.clone();
        let bulk_size = target.bulk_size.unwrap_or(defaults.bulk_size);
        config.target = TargetConfig {
            url: target.url.unwrap_or(defaults.url),
            username: target.username.filter(|u| !u.is_empty()),
            password: target.password,
            index: target.index.unwrap_or(defaults.index),
            doc_type: target.doc_type.filter(|t| !t.is_empty()),
            bulk_size,
            bulk_timeout: resolve_duration(
                "target.bulk_timeout",
                target.bulk_timeout,
                defaults.bulk_timeout,
            )?,
            throttle_size: target
                .throttle_size
                .unwrap_or_else(|| (bulk_size as i64).saturating_mul(5)),
        };

        config.checkpoint = match self.checkpoint.storage.as_deref().unwrap_or("index") {
            "index" => match self.checkpoint.index {
                Some(index) => CheckpointStorage::Index { index },
                None => CheckpointStorage::default_index(&name),
            },
            "filesystem" => CheckpointStorage::Filesystem {
                dir: self
                    .checkpoint
                    .dir
                    .unwrap_or_else(|| DEFAULT_CHECKPOINT_DIR.to_string()),
            },
            "memory" => CheckpointStorage::Memory,
            other => {
                return Err(invalid(
                    "checkpoint.storage",
                    format!("unknown storage '{other}' (expected index, filesystem or memory)"),
                ))
            }
        };

        if self.script.is_some() || self.script_type.is_some() {
            config.script = Some(ScriptConfig {
                source: self.script,
                script_type: self.script_type,
            });
        }

        Ok(config)
    }
}
