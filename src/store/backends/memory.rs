//! In-memory backend
//!
//! Writes made inside a transaction are staged and only applied to the
//! backing maps on commit, so a failed batch leaves no trace.

use crate::store::{
    BackendTx, EntityField, EntityQuery, EventField, EventQuery, QueryValue, StoreBackend,
    StoreError, StoredEntity, StoredEvent,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct MemoryState {
    /// Insertion order
    events: Vec<StoredEvent>,
    event_positions: HashMap<String, usize>,
    /// Insertion order, by first write
    entity_order: Vec<String>,
    entities: HashMap<String, StoredEntity>,
}

impl MemoryState {
    fn entity_position(&self, entity_id: &str) -> Option<usize> {
        self.entity_order.iter().position(|id| id == entity_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: MemoryState,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTx<'a> {
    base: &'a MemoryState,
    staged_events: Vec<StoredEvent>,
    staged_entities: HashMap<String, StoredEntity>,
}

impl BackendTx for MemoryTx<'_> {
    fn existing_event_ids(&mut self, ids: &[&str]) -> Result<HashSet<String>, StoreError> {
        Ok(ids
            .iter()
            .filter(|id| {
                self.base.event_positions.contains_key(**id)
                    || self.staged_events.iter().any(|e| e.id == **id)
            })
            .map(|id| id.to_string())
            .collect())
    }

    fn insert_events(&mut self, events: &[StoredEvent]) -> Result<(), StoreError> {
        self.staged_events.extend_from_slice(events);
        Ok(())
    }

    fn entity_records(&mut self, entity_ids: &[&str]) -> Result<HashMap<String, StoredEntity>, StoreError> {
        Ok(entity_ids
            .iter()
            .filter_map(|id| {
                self.staged_entities
                    .get(*id)
                    .or_else(|| self.base.entities.get(*id))
                    .map(|record| (id.to_string(), record.clone()))
            })
            .collect())
    }

    fn events_for_entity(&mut self, entity_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self
            .base
            .events
            .iter()
            .chain(self.staged_events.iter())
            .filter(|event| event.entity_id == entity_id)
            .cloned()
            .collect())
    }

    fn put_entity_records(&mut self, records: &[StoredEntity]) -> Result<(), StoreError> {
        for record in records {
            self.staged_entities
                .insert(record.entity_id.clone(), record.clone());
        }
        Ok(())
    }
}

impl StoreBackend for MemoryBackend {
    fn transaction<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn BackendTx) -> Result<T, StoreError>,
    {
        let mut tx = MemoryTx {
            base: &self.state,
            staged_events: Vec::new(),
            staged_entities: HashMap::new(),
        };
        let output = f(&mut tx)?;
        let MemoryTx {
            staged_events,
            staged_entities,
            ..
        } = tx;

        let state = &mut self.state;
        for event in staged_events {
            state.event_positions.insert(event.id.clone(), state.events.len());
            state.events.push(event);
        }
        // Sorted so entities first written in one batch get a stable order
        let mut staged: Vec<StoredEntity> = staged_entities.into_values().collect();
        staged.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        for record in staged {
            if !state.entities.contains_key(&record.entity_id) {
                state.entity_order.push(record.entity_id.clone());
            }
            state.entities.insert(record.entity_id.clone(), record);
        }
        Ok(output)
    }

    fn get_events(&self, ids: &[&str]) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.state.event_positions.get(*id))
            .map(|&position| self.state.events[position].clone())
            .collect())
    }

    fn get_entities(&self, entity_ids: &[&str]) -> Result<Vec<StoredEntity>, StoreError> {
        Ok(entity_ids
            .iter()
            .filter_map(|id| self.state.entities.get(*id).cloned())
            .collect())
    }

    fn list_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let start = match &query.after_id {
            Some(after_id) => {
                self.state
                    .event_positions
                    .get(after_id)
                    .ok_or_else(|| StoreError::InvalidQuery(format!("unknown cursor {}", after_id)))?
                    + 1
            }
            None => 0,
        };
        Ok(self.state.events[start..]
            .iter()
            .filter(|event| match &query.predicate {
                None => true,
                Some(p) => match (p.field, &p.value) {
                    (EventField::EntityId, QueryValue::Text(v)) => p.op.holds(event.entity_id.as_str(), v.as_str()),
                    (EventField::EventType, QueryValue::Text(v)) => p.op.holds(event.event_type.as_str(), v.as_str()),
                    (EventField::TimestampMillis, QueryValue::Int(v)) => p.op.holds(&event.timestamp_millis, v),
                    _ => false,
                },
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn list_entities(&self, query: &EntityQuery) -> Result<Vec<StoredEntity>, StoreError> {
        let limit = query.limit.unwrap_or(usize::MAX);
        let accepts = |entity: &StoredEntity| match &query.predicate {
            None => true,
            Some(p) => match (p.field, &p.value) {
                (EntityField::DueTimestampMillis, QueryValue::Int(v)) => entity
                    .due_timestamp_millis
                    .map_or(false, |due| p.op.holds(&due, v)),
                (EntityField::LastEventTimestampMillis, QueryValue::Int(v)) => {
                    p.op.holds(&entity.last_event_timestamp_millis, v)
                }
                _ => false,
            },
        };

        if query.orders_by_due() {
            let mut due: Vec<(i64, &StoredEntity)> = self
                .state
                .entities
                .values()
                .filter(|entity| accepts(*entity))
                .filter_map(|entity| entity.due_timestamp_millis.map(|d| (d, entity)))
                .collect();
            due.sort_by(|(a_due, a), (b_due, b)| (a_due, &a.entity_id).cmp(&(b_due, &b.entity_id)));

            let cursor = match &query.after_id {
                Some(after_id) => {
                    let due = self
                        .state
                        .entities
                        .get(after_id)
                        .and_then(|entity| entity.due_timestamp_millis)
                        .ok_or_else(|| StoreError::InvalidQuery(format!("unknown cursor {}", after_id)))?;
                    Some((due, after_id))
                }
                None => None,
            };
            return Ok(due
                .into_iter()
                .filter(|(d, entity)| match cursor {
                    Some((c_due, c_id)) => (*d, &entity.entity_id) > (c_due, c_id),
                    None => true,
                })
                .map(|(_, entity)| entity.clone())
                .take(limit)
                .collect());
        }

        let start = match &query.after_id {
            Some(after_id) => {
                self.state
                    .entity_position(after_id)
                    .ok_or_else(|| StoreError::InvalidQuery(format!("unknown cursor {}", after_id)))?
                    + 1
            }
            None => 0,
        };
        Ok(self.state.entity_order[start..]
            .iter()
            .filter_map(|id| self.state.entities.get(id))
            .filter(|entity| accepts(*entity))
            .take(limit)
            .cloned()
            .collect())
    }
}
