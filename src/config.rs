//! Configuration
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "scheduler": { "interval_growth_factor": 2.0 }, "store": { "batch_size": 50 } }
//! ```

use crate::review::ReviewConfig;
use crate::schedule::{SchedulerConfig, SpacedRepetitionScheduler};
use crate::state::PromptStateReducer;
use crate::store::{MemoryBackend, PromptStore, SqliteBackend, StoreConfig, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub review: ReviewConfig,
}

impl CoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.store.validate()?;
        self.review.validate()
    }

    pub fn reducer(&self) -> PromptStateReducer {
        PromptStateReducer::new(SpacedRepetitionScheduler::new(self.scheduler.clone()))
    }

    /// A prompt store persisted in the SQLite database at `path`
    pub fn open_sqlite_store(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<PromptStore<SqliteBackend>, StoreError> {
        let backend = SqliteBackend::open(path, &self.store)?;
        Ok(PromptStore::new(backend, self.reducer(), self.store.clone()))
    }

    pub fn memory_store(&self) -> PromptStore<MemoryBackend> {
        PromptStore::new(MemoryBackend::new(), self.reducer(), self.store.clone())
    }
}
