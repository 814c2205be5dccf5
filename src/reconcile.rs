//! Apply-or-reconcile
//!
//! New events usually extend an entity's history linearly: each names every
//! current head as a parent, so it descends from everything folded so far.
//! Those are applied straight onto the stored snapshot. Anything else
//! (concurrent branches from another device, late arrivals) means the
//! snapshot can't be patched, since scheduling depends on applying events in
//! order. The entity is then rebuilt by replaying its whole history from
//! nothing, parents before children and otherwise by timestamp.
//!
//! Both paths yield the same snapshot for the same set of events, so merge
//! is commutative and idempotent.

use crate::event::{EntityRecord, Event, EventId, EventPayload, EventReducer, ReduceError};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Event {event_id} names parent {parent_id}, which is missing from the history")]
    MissingParentLog { event_id: EventId, parent_id: EventId },

    #[error("History of {0} contains a parent cycle")]
    CyclicHistory(String),

    #[error("Failed to apply event {event_id}: {source}")]
    Reduce {
        event_id: EventId,
        #[source]
        source: ReduceError,
    },

    #[error("No events to reconcile for {0}")]
    EmptyHistory(String),

    #[error("Snapshot of {entity_id} has head {head_id}, which is missing from the history")]
    DisconnectedBase { entity_id: String, head_id: EventId },
}

/// Which way a snapshot was brought up to date
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePath {
    FastForward,
    Replay,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled<E> {
    pub record: EntityRecord<E>,
    pub path: UpdatePath,
}

/// Fold `new_events` onto `current` if they chain cleanly. Returns `None` when
/// the entity needs a full replay instead.
pub fn fast_forward<R: EventReducer>(
    reducer: &R,
    current: Option<&EntityRecord<R::Entity>>,
    new_events: &[Event<R::Payload>],
) -> Result<Option<EntityRecord<R::Entity>>, MergeError> {
    let mut ordered: Vec<&Event<R::Payload>> = new_events.iter().collect();
    ordered.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut record = current.cloned();
    for event in ordered {
        if let Some(base) = &record {
            let heads = reducer.head_ids(&base.entity);
            if heads.contains(&event.id) {
                debug!("Event {} already folded into {}", event.id, base.entity_id);
                continue;
            }
            // Replay would also fold this event last, whatever its timestamp
            if !heads.iter().all(|head| event.parent_ids().contains(head)) {
                return Ok(None);
            }
        } else if !event.parent_ids().is_empty() {
            return Ok(None);
        }

        match reducer.apply(record.as_ref().map(|r| &r.entity), event) {
            Ok(entity) => {
                record = Some(EntityRecord {
                    entity_id: event.entity_id.clone(),
                    entity,
                    last_event_id: event.id.clone(),
                    last_event_timestamp_millis: event.timestamp_millis,
                })
            }
            Err(e) if e.requires_replay() => {
                warn!("Falling back to replay for {}: {}", event.entity_id, e);
                return Ok(None);
            }
            Err(source) => {
                return Err(MergeError::Reduce {
                    event_id: event.id.clone(),
                    source,
                })
            }
        }
    }
    Ok(record)
}

/// Rebuild an entity from its complete event history
pub fn replay<R: EventReducer>(
    reducer: &R,
    entity_id: &str,
    history: &[Event<R::Payload>],
) -> Result<EntityRecord<R::Entity>, MergeError> {
    let mut by_id: BTreeMap<&EventId, &Event<R::Payload>> = BTreeMap::new();
    for event in history {
        by_id.entry(&event.id).or_insert(event);
    }

    let mut referenced: BTreeSet<&EventId> = BTreeSet::new();
    for event in by_id.values() {
        for parent_id in event.parent_ids() {
            if !by_id.contains_key(parent_id) {
                return Err(MergeError::MissingParentLog {
                    event_id: event.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
            referenced.insert(parent_id);
        }
    }

    let mut folded: Option<(R::Entity, &Event<R::Payload>)> = None;
    let mut applied = 0;
    for event in causal_order(&by_id) {
        let entity = reducer
            .apply(folded.as_ref().map(|(entity, _)| entity), event)
            .map_err(|source| MergeError::Reduce {
                event_id: event.id.clone(),
                source,
            })?;
        applied += 1;
        folded = Some((entity, event));
    }
    if applied < by_id.len() {
        return Err(MergeError::CyclicHistory(entity_id.to_string()));
    }

    let (entity, last) = folded.ok_or_else(|| MergeError::EmptyHistory(entity_id.to_string()))?;
    let heads: Vec<EventId> = by_id
        .keys()
        .filter(|id| !referenced.contains(*id))
        .map(|id| (*id).clone())
        .collect();
    debug!(
        "Replayed {} events for {} ({} heads)",
        by_id.len(),
        entity_id,
        heads.len()
    );

    Ok(EntityRecord {
        entity_id: entity_id.to_string(),
        entity: reducer.with_head_ids(entity, heads),
        last_event_id: last.id.clone(),
        last_event_timestamp_millis: last.timestamp_millis,
    })
}

/// Events with every parent before its children; among the events whose
/// parents have all been emitted, the smallest sort key goes first. A child
/// stamped earlier than its parent (skewed device clocks) still follows it.
/// Events caught in a cycle are never emitted.
fn causal_order<'a, P: EventPayload>(by_id: &BTreeMap<&'a EventId, &'a Event<P>>) -> Vec<&'a Event<P>> {
    let mut waiting: HashMap<&'a EventId, usize> = HashMap::new();
    let mut children: HashMap<&'a EventId, Vec<&'a Event<P>>> = HashMap::new();
    let mut ready: BTreeMap<(i64, u8, &'a EventId), &'a Event<P>> = BTreeMap::new();
    for &event in by_id.values() {
        let parents: BTreeSet<&'a EventId> = event.parent_ids().iter().collect();
        if parents.is_empty() {
            ready.insert(event.sort_key(), event);
        } else {
            waiting.insert(&event.id, parents.len());
        }
        for parent_id in parents {
            children.entry(parent_id).or_default().push(event);
        }
    }

    let mut ordered = Vec::with_capacity(by_id.len());
    while let Some((_, event)) = ready.pop_first() {
        ordered.push(event);
        for &child in children.get(&event.id).into_iter().flatten() {
            if let Some(remaining) = waiting.get_mut(&child.id) {
                *remaining -= 1;
                if *remaining == 0 {
                    waiting.remove(&child.id);
                    ready.insert(child.sort_key(), child);
                }
            }
        }
    }
    ordered
}

/// Bring `current` up to date with `new_events`, loading the full history only
/// if the fast path is unavailable. The loaded history must include the new
/// events.
pub fn reconcile_with<R, F, E>(
    reducer: &R,
    entity_id: &str,
    current: Option<&EntityRecord<R::Entity>>,
    new_events: &[Event<R::Payload>],
    load_history: F,
) -> Result<Reconciled<R::Entity>, E>
where
    R: EventReducer,
    F: FnOnce() -> Result<Vec<Event<R::Payload>>, E>,
    E: From<MergeError>,
{
    if new_events.is_empty() {
        return Err(MergeError::EmptyHistory(entity_id.to_string()).into());
    }
    if let Some(record) = fast_forward(reducer, current, new_events)? {
        debug!("Fast-forwarded {} by {} events", entity_id, new_events.len());
        return Ok(Reconciled {
            record,
            path: UpdatePath::FastForward,
        });
    }
    let history = load_history()?;
    let record = replay(reducer, entity_id, &history)?;
    Ok(Reconciled {
        record,
        path: UpdatePath::Replay,
    })
}

/// [`reconcile_with`] for a history already in hand
pub fn apply_or_reconcile<R: EventReducer>(
    reducer: &R,
    entity_id: &str,
    current: Option<&EntityRecord<R::Entity>>,
    new_events: &[Event<R::Payload>],
    history: &[Event<R::Payload>],
) -> Result<Reconciled<R::Entity>, MergeError> {
    reconcile_with(reducer, entity_id, current, new_events, || {
        Ok::<_, MergeError>(history.to_vec())
    })
}
