//! Append-only event store
//!
//! Events are stored immutably. Each batch of new events triggers
//! reconciliation of every entity it touches (see [`crate::reconcile`]), and
//! the resulting snapshots are written back together with the derived due
//! index, all in one backend transaction. A fatal error anywhere aborts the
//! whole batch.
//!
//! Backends only move records; they know nothing about reducers. SQLite and
//! in-memory implementations live in [`backends`].

pub mod backends;
mod query;

pub use backends::{MemoryBackend, SqliteBackend};
pub use query::{EntityField, EntityQuery, EventField, EventQuery, Predicate, QueryValue, RelOp};

use crate::actionlog::ActionLog;
use crate::addressing::{AddressingError, ContentId};
use crate::config::ConfigError;
use crate::event::{EntityRecord, Event, EventId, EventReducer};
use crate::prompt::TaskIdError;
use crate::reconcile::{reconcile_with, MergeError, UpdatePath};
use crate::state::{PromptState, PromptStateReducer};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Addressing error: {0}")]
    Addressing(#[from] AddressingError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Invalid task ID: {0}")]
    TaskId(#[from] TaskIdError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Database schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: i64, expected: i64 },
}

/// Store tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Entities reconciled per round trip to the backend
    pub batch_size: usize,
    /// How long SQLite waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("store.batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// An event as a backend stores it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: String,
    pub entity_id: String,
    pub event_type: String,
    pub timestamp_millis: i64,
    /// Payload JSON
    pub data: String,
}

/// A snapshot as a backend stores it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntity {
    pub entity_id: String,
    pub last_event_id: String,
    pub last_event_timestamp_millis: i64,
    /// `None` removes the entity from the due index
    pub due_timestamp_millis: Option<i64>,
    /// Snapshot JSON
    pub data: String,
}

/// Reads and writes within one backend transaction
pub trait BackendTx {
    fn existing_event_ids(&mut self, ids: &[&str]) -> Result<HashSet<String>, StoreError>;

    /// Append events; IDs are new
    fn insert_events(&mut self, events: &[StoredEvent]) -> Result<(), StoreError>;

    fn entity_records(&mut self, entity_ids: &[&str]) -> Result<HashMap<String, StoredEntity>, StoreError>;

    /// Every event filed under an entity, in insertion order
    fn events_for_entity(&mut self, entity_id: &str) -> Result<Vec<StoredEvent>, StoreError>;

    /// Insert or replace snapshots, keeping an existing entity's position
    fn put_entity_records(&mut self, records: &[StoredEntity]) -> Result<(), StoreError>;
}

pub trait StoreBackend {
    /// Run `f` in a transaction, committing only if it succeeds
    fn transaction<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn BackendTx) -> Result<T, StoreError>;

    /// Events by ID, skipping unknown IDs
    fn get_events(&self, ids: &[&str]) -> Result<Vec<StoredEvent>, StoreError>;

    /// Entities by ID, skipping unknown IDs
    fn get_entities(&self, entity_ids: &[&str]) -> Result<Vec<StoredEntity>, StoreError>;

    fn list_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError>;

    fn list_entities(&self, query: &EntityQuery) -> Result<Vec<StoredEntity>, StoreError>;
}

/// What a call to [`EventStore::put_events`] did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub fast_forwarded: usize,
    pub replayed: usize,
}

pub struct EventStore<B, R> {
    backend: B,
    reducer: R,
    config: StoreConfig,
}

/// The store for action logs and prompt states
pub type PromptStore<B> = EventStore<B, PromptStateReducer>;

impl<B: StoreBackend, R: EventReducer> EventStore<B, R> {
    pub fn new(backend: B, reducer: R, config: StoreConfig) -> Self {
        Self {
            backend,
            reducer,
            config,
        }
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Append events and bring every affected entity up to date
    pub fn put_events(&mut self, events: Vec<Event<R::Payload>>) -> Result<PutReport, StoreError> {
        let mut report = PutReport::default();
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(events.len());
        for event in events {
            event.verify()?;
            if seen.insert(event.id.clone()) {
                unique.push(event);
            } else {
                report.duplicates += 1;
            }
        }
        if unique.is_empty() {
            return Ok(report);
        }

        let reducer = &self.reducer;
        let batch_size = self.config.batch_size.max(1);
        self.backend.transaction(|tx| {
            let ids: Vec<&str> = unique.iter().map(|e| e.id.as_str()).collect();
            let existing = tx.existing_event_ids(&ids)?;
            let (known, fresh): (Vec<_>, Vec<_>) = unique
                .into_iter()
                .partition(|event| existing.contains(event.id.as_str()));
            report.duplicates += known.len();
            if fresh.is_empty() {
                debug!("All {} events already stored", known.len());
                return Ok(());
            }

            let stored = fresh.iter().map(to_stored_event).collect::<Result<Vec<_>, _>>()?;
            tx.insert_events(&stored)?;
            report.inserted = fresh.len();

            let mut by_entity: BTreeMap<String, Vec<Event<R::Payload>>> = BTreeMap::new();
            for event in fresh {
                by_entity.entry(event.entity_id.clone()).or_default().push(event);
            }

            let entity_ids: Vec<&String> = by_entity.keys().collect();
            for batch in entity_ids.chunks(batch_size) {
                let batch_ids: Vec<&str> = batch.iter().map(|id| id.as_str()).collect();
                let current = tx.entity_records(&batch_ids)?;

                let mut updated = Vec::with_capacity(batch.len());
                for entity_id in batch {
                    let new_events = &by_entity[*entity_id];
                    let current = current
                        .get(entity_id.as_str())
                        .map(from_stored_entity::<R::Entity>)
                        .transpose()?;
                    let reconciled = reconcile_with(
                        reducer,
                        entity_id,
                        current.as_ref(),
                        new_events,
                        || {
                            tx.events_for_entity(entity_id)?
                                .iter()
                                .map(from_stored_event)
                                .collect::<Result<Vec<_>, StoreError>>()
                        },
                    )?;
                    match reconciled.path {
                        UpdatePath::FastForward => report.fast_forwarded += 1,
                        UpdatePath::Replay => report.replayed += 1,
                    }
                    updated.push(to_stored_entity(reducer, &reconciled.record)?);
                }
                tx.put_entity_records(&updated)?;
            }
            Ok(())
        })?;

        info!(
            "Stored {} events ({} duplicates); {} entities fast-forwarded, {} replayed",
            report.inserted, report.duplicates, report.fast_forwarded, report.replayed
        );
        Ok(report)
    }

    pub fn get_events(&self, ids: &[EventId]) -> Result<Vec<Event<R::Payload>>, StoreError> {
        let ids: Vec<&str> = ids.iter().map(ContentId::as_str).collect();
        self.backend
            .get_events(&ids)?
            .iter()
            .map(from_stored_event)
            .collect()
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord<R::Entity>>, StoreError> {
        Ok(self.get_entities(&[entity_id])?.into_iter().next())
    }

    pub fn get_entities(&self, entity_ids: &[&str]) -> Result<Vec<EntityRecord<R::Entity>>, StoreError> {
        self.backend
            .get_entities(entity_ids)?
            .iter()
            .map(from_stored_entity)
            .collect()
    }

    pub fn list_events(&self, query: &EventQuery) -> Result<Vec<Event<R::Payload>>, StoreError> {
        query.validate()?;
        self.backend
            .list_events(query)?
            .iter()
            .map(from_stored_event)
            .collect()
    }

    pub fn list_entities(&self, query: &EntityQuery) -> Result<Vec<EntityRecord<R::Entity>>, StoreError> {
        query.validate()?;
        self.backend
            .list_entities(query)?
            .iter()
            .map(from_stored_entity)
            .collect()
    }
}

impl<B: StoreBackend> EventStore<B, PromptStateReducer> {
    /// Hash and store action logs
    pub fn put_action_logs(&mut self, logs: Vec<ActionLog>) -> Result<PutReport, StoreError> {
        let events = logs
            .into_iter()
            .map(ActionLog::into_event)
            .collect::<Result<Vec<_>, _>>()?;
        self.put_events(events)
    }

    /// Tasks due at or before `due_before_millis`, soonest first. Deleted tasks
    /// are not in the due index and never appear.
    pub fn list_due_tasks(
        &self,
        due_before_millis: i64,
        limit: Option<usize>,
    ) -> Result<Vec<EntityRecord<PromptState>>, StoreError> {
        let mut query = EntityQuery::due_at_or_before(due_before_millis);
        query.limit = limit;
        self.list_entities(&query)
    }
}

fn to_stored_event<P: Serialize>(event: &Event<P>) -> Result<StoredEvent, StoreError> {
    Ok(StoredEvent {
        id: event.id.to_string(),
        entity_id: event.entity_id.clone(),
        event_type: event.event_type.clone(),
        timestamp_millis: event.timestamp_millis,
        data: serde_json::to_string(&event.payload)?,
    })
}

fn from_stored_event<P: serde::de::DeserializeOwned>(stored: &StoredEvent) -> Result<Event<P>, StoreError> {
    Ok(Event {
        id: ContentId::parse(&stored.id)?,
        entity_id: stored.entity_id.clone(),
        event_type: stored.event_type.clone(),
        timestamp_millis: stored.timestamp_millis,
        payload: serde_json::from_str(&stored.data)?,
    })
}

fn to_stored_entity<R: EventReducer>(
    reducer: &R,
    record: &EntityRecord<R::Entity>,
) -> Result<StoredEntity, StoreError> {
    Ok(StoredEntity {
        entity_id: record.entity_id.clone(),
        last_event_id: record.last_event_id.to_string(),
        last_event_timestamp_millis: record.last_event_timestamp_millis,
        due_timestamp_millis: reducer.due_timestamp_millis(&record.entity),
        data: serde_json::to_string(&record.entity)?,
    })
}

fn from_stored_entity<E: serde::de::DeserializeOwned>(
    stored: &StoredEntity,
) -> Result<EntityRecord<E>, StoreError> {
    Ok(EntityRecord {
        entity_id: stored.entity_id.clone(),
        entity: serde_json::from_str(&stored.data)?,
        last_event_id: ContentId::parse(&stored.last_event_id)?,
        last_event_timestamp_millis: stored.last_event_timestamp_millis,
    })
}
