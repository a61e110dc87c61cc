//! Persistence of per-service enable state and configuration.
//!
//! Each service owns one [`ServiceRecord`] listing the groups where it was
//! explicitly enabled or disabled. Records are rewritten in full after every
//! mutation.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;

/// Per-service configuration mapping.
pub type ServiceConfig = Map<String, Value>;

/// The durable form of a service's enable state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    #[serde(default)]
    pub enable_group: BTreeSet<i64>,
    #[serde(default)]
    pub disable_group: BTreeSet<i64>,
}

impl ServiceRecord {
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Storage backend for service records and configs.
///
/// Operations are synchronous: they run under the service's group lock so
/// that mutation and persistence happen as one step.
pub trait ServiceStore: Send + Sync {
    /// Loads the record for `name`; a missing record yields empty sets.
    fn load(&self, name: &str) -> Result<ServiceRecord, StoreError>;

    /// Overwrites the record for `record.name`.
    fn save(&self, record: &ServiceRecord) -> Result<(), StoreError>;

    /// Reads the configuration mapping of a service.
    fn load_config(&self, name: &str) -> Result<ServiceConfig, StoreError>;
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// Stores records as `{service_dir}/{name}.json` and reads configs from
/// `{config_dir}/{name}.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    service_dir: PathBuf,
    config_dir: PathBuf,
}

impl JsonFileStore {
    /// Creates the store, creating both directories if needed.
    pub fn new(
        service_dir: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let service_dir = service_dir.into();
        let config_dir = config_dir.into();
        for dir in [&service_dir, &config_dir] {
            fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self {
            service_dir,
            config_dir,
        })
    }

    pub fn service_dir(&self) -> &Path {
        &self.service_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.service_dir.join(format!("{name}.json"))
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}.json"))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

impl ServiceStore for JsonFileStore {
    fn load(&self, name: &str) -> Result<ServiceRecord, StoreError> {
        let path = self.record_path(name);
        let record = read_json::<ServiceRecord>(&path)?;
        debug!(service = name, path = %path.display(), found = record.is_some(), "Loaded service record");
        Ok(record.unwrap_or_else(|| ServiceRecord::empty(name)))
    }

    fn save(&self, record: &ServiceRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.name);
        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Malformed {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| StoreError::Io { path, source })
    }

    fn load_config(&self, name: &str) -> Result<ServiceConfig, StoreError> {
        let path = self.config_path(name);
        match read_json::<ServiceConfig>(&path)? {
            Some(config) => Ok(config),
            None => Err(StoreError::Io {
                path,
                source: ErrorKind::NotFound.into(),
            }),
        }
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-process store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ServiceRecord>>,
    configs: RwLock<HashMap<String, ServiceConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presets the configuration of a service.
    pub fn set_config(&self, name: impl Into<String>, config: ServiceConfig) {
        self.configs.write().insert(name.into(), config);
    }

    /// Returns the last saved record, if any.
    pub fn record(&self, name: &str) -> Option<ServiceRecord> {
        self.records.read().get(name).cloned()
    }
}

impl ServiceStore for MemoryStore {
    fn load(&self, name: &str) -> Result<ServiceRecord, StoreError> {
        Ok(self
            .record(name)
            .unwrap_or_else(|| ServiceRecord::empty(name)))
    }

    fn save(&self, record: &ServiceRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn load_config(&self, name: &str) -> Result<ServiceConfig, StoreError> {
        Ok(self.configs.read().get(name).cloned().unwrap_or_default())
    }
}
