//! Query predicates for listing events and entities

use super::StoreError;
use std::cmp::Ordering;

/// Relational operator of a predicate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    pub fn sql(&self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
        }
    }

    pub fn holds<T: Ord + ?Sized>(&self, left: &T, right: &T) -> bool {
        let ordering = left.cmp(right);
        match self {
            RelOp::Eq => ordering == Ordering::Equal,
            RelOp::Lt => ordering == Ordering::Less,
            RelOp::Le => ordering != Ordering::Greater,
            RelOp::Gt => ordering == Ordering::Greater,
            RelOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryValue {
    Int(i64),
    Text(String),
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Int(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Text(value)
    }
}

/// Indexed event columns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventField {
    EntityId,
    EventType,
    TimestampMillis,
}

impl EventField {
    pub fn column(&self) -> &'static str {
        match self {
            EventField::EntityId => "entity_id",
            EventField::EventType => "event_type",
            EventField::TimestampMillis => "timestamp_millis",
        }
    }

    fn is_text(&self) -> bool {
        !matches!(self, EventField::TimestampMillis)
    }
}

/// Indexed entity columns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityField {
    /// The derived due index; entities with no due time never match
    DueTimestampMillis,
    LastEventTimestampMillis,
}

impl EntityField {
    /// Column in a query joining `entities e` with `derived_due_timestamps d`
    pub fn column(&self) -> &'static str {
        match self {
            EntityField::DueTimestampMillis => "d.due_timestamp_millis",
            EntityField::LastEventTimestampMillis => "e.last_event_timestamp_millis",
        }
    }

    fn is_text(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate<F> {
    pub field: F,
    pub op: RelOp,
    pub value: QueryValue,
}

impl<F> Predicate<F> {
    pub fn new(field: F, op: RelOp, value: impl Into<QueryValue>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }
}

fn check_value_type(field: &dyn std::fmt::Debug, is_text: bool, value: &QueryValue) -> Result<(), StoreError> {
    match (is_text, value) {
        (true, QueryValue::Text(_)) | (false, QueryValue::Int(_)) => Ok(()),
        _ => Err(StoreError::InvalidQuery(format!(
            "{:?} can't be compared with {:?}",
            field, value
        ))),
    }
}

/// Filter and page over events in insertion order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub predicate: Option<Predicate<EventField>>,
    /// Only events inserted after this one
    pub after_id: Option<String>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn for_entity(entity_id: &str) -> Self {
        Self {
            predicate: Some(Predicate::new(EventField::EntityId, RelOp::Eq, entity_id)),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        match &self.predicate {
            Some(p) => check_value_type(&p.field, p.field.is_text(), &p.value),
            None => Ok(()),
        }
    }
}

/// Filter and page over entities.
///
/// Results come in insertion order, except that a predicate on the due index
/// orders them by `(due, entity ID)` and pages by that key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityQuery {
    pub predicate: Option<Predicate<EntityField>>,
    pub after_id: Option<String>,
    pub limit: Option<usize>,
}

impl EntityQuery {
    pub fn due_at_or_before(due_timestamp_millis: i64) -> Self {
        Self {
            predicate: Some(Predicate::new(
                EntityField::DueTimestampMillis,
                RelOp::Le,
                due_timestamp_millis,
            )),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, entity_id: impl Into<String>) -> Self {
        self.after_id = Some(entity_id.into());
        self
    }

    pub fn orders_by_due(&self) -> bool {
        matches!(
            self.predicate,
            Some(Predicate {
                field: EntityField::DueTimestampMillis,
                ..
            })
        )
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        match &self.predicate {
            Some(p) => check_value_type(&p.field, p.field.is_text(), &p.value),
            None => Ok(()),
        }
    }
}
