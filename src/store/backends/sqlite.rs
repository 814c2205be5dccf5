//! SQLite backend
//!
//! Tables:
//! - `events`: append-only, `sequence` gives insertion order
//! - `entities`: one snapshot per entity; `row_id` survives updates
//! - `derived_due_timestamps`: the due index, kept in the same transaction
//!   as `entities` so a due-range query is an index scan

use crate::store::{
    BackendTx, EntityQuery, EventQuery, QueryValue, StoreBackend, StoreConfig, StoreError,
    StoredEntity, StoredEvent,
};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;

const EVENT_COLUMNS: &str = "id, entity_id, event_type, timestamp_millis, data";
const ENTITY_COLUMNS: &str =
    "e.id, e.last_event_id, e.last_event_timestamp_millis, d.due_timestamp_millis, e.data";

#[derive(Debug)]
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("Opened {} (journal mode {})", path.display(), journal_mode);
        Self::prepare(conn, config)
    }

    pub fn open_in_memory(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?, config)
    }

    fn prepare(mut conn: Connection, config: &StoreConfig) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        install_schema(&mut conn)?;
        Ok(Self { conn })
    }
}

fn install_schema(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
           key TEXT PRIMARY KEY,
           value INTEGER NOT NULL
         );",
    )?;
    let found: Option<i64> = tx
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match found {
        Some(SCHEMA_VERSION) => {}
        Some(found) => {
            return Err(StoreError::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            })
        }
        None => {
            tx.execute_batch(
                r#"
                CREATE TABLE events (
                  sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                  id TEXT NOT NULL UNIQUE,
                  entity_id TEXT NOT NULL,
                  event_type TEXT NOT NULL,
                  timestamp_millis INTEGER NOT NULL,
                  data TEXT NOT NULL
                );

                CREATE INDEX idx_events_entity ON events(entity_id, sequence);

                CREATE TABLE entities (
                  row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                  id TEXT NOT NULL UNIQUE,
                  last_event_id TEXT NOT NULL,
                  last_event_timestamp_millis INTEGER NOT NULL,
                  data TEXT NOT NULL
                );

                CREATE TABLE derived_due_timestamps (
                  entity_id TEXT PRIMARY KEY REFERENCES entities(id),
                  due_timestamp_millis INTEGER NOT NULL
                );

                CREATE INDEX idx_due_timestamps
                  ON derived_due_timestamps(due_timestamp_millis, entity_id);
                "#,
            )?;
            tx.execute(
                "INSERT INTO meta(key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )?;
            debug!("Installed schema version {}", SCHEMA_VERSION);
        }
    }
    tx.commit()?;
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        event_type: row.get(2)?,
        timestamp_millis: row.get(3)?,
        data: row.get(4)?,
    })
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEntity> {
    Ok(StoredEntity {
        entity_id: row.get(0)?,
        last_event_id: row.get(1)?,
        last_event_timestamp_millis: row.get(2)?,
        due_timestamp_millis: row.get(3)?,
        data: row.get(4)?,
    })
}

fn sql_value(value: &QueryValue) -> Value {
    match value {
        QueryValue::Int(v) => Value::Integer(*v),
        QueryValue::Text(v) => Value::Text(v.clone()),
    }
}

fn sql_limit(limit: Option<usize>) -> Value {
    // SQLite treats a negative limit as unbounded
    Value::Integer(limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX)))
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn select_entity(conn: &Connection, entity_id: &str) -> Result<Option<StoredEntity>, StoreError> {
    Ok(conn
        .prepare_cached(&format!(
            "SELECT {} FROM entities e \
             LEFT JOIN derived_due_timestamps d ON d.entity_id = e.id \
             WHERE e.id = ?1",
            ENTITY_COLUMNS
        ))?
        .query_row(params![entity_id], entity_from_row)
        .optional()?)
}

fn select_event(conn: &Connection, id: &str) -> Result<Option<StoredEvent>, StoreError> {
    Ok(conn
        .prepare_cached(&format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS))?
        .query_row(params![id], event_from_row)
        .optional()?)
}

struct SqliteTx<'a> {
    tx: Transaction<'a>,
}

impl BackendTx for SqliteTx<'_> {
    fn existing_event_ids(&mut self, ids: &[&str]) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.tx.prepare_cached("SELECT 1 FROM events WHERE id = ?1")?;
        let mut existing = HashSet::new();
        for id in ids {
            if stmt.exists(params![id])? {
                existing.insert(id.to_string());
            }
        }
        Ok(existing)
    }

    fn insert_events(&mut self, events: &[StoredEvent]) -> Result<(), StoreError> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO events(id, entity_id, event_type, timestamp_millis, data) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for event in events {
            stmt.execute(params![
                event.id,
                event.entity_id,
                event.event_type,
                event.timestamp_millis,
                event.data,
            ])?;
        }
        Ok(())
    }

    fn entity_records(&mut self, entity_ids: &[&str]) -> Result<HashMap<String, StoredEntity>, StoreError> {
        let mut records = HashMap::new();
        for entity_id in entity_ids {
            if let Some(record) = select_entity(&self.tx, entity_id)? {
                records.insert(record.entity_id.clone(), record);
            }
        }
        Ok(records)
    }

    fn events_for_entity(&mut self, entity_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let mut stmt = self.tx.prepare_cached(&format!(
            "SELECT {} FROM events WHERE entity_id = ?1 ORDER BY sequence",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map(params![entity_id], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn put_entity_records(&mut self, records: &[StoredEntity]) -> Result<(), StoreError> {
        let mut upsert = self.tx.prepare_cached(
            "INSERT INTO entities(id, last_event_id, last_event_timestamp_millis, data) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET \
               last_event_id = excluded.last_event_id, \
               last_event_timestamp_millis = excluded.last_event_timestamp_millis, \
               data = excluded.data",
        )?;
        let mut index_due = self.tx.prepare_cached(
            "INSERT INTO derived_due_timestamps(entity_id, due_timestamp_millis) \
             VALUES (?1, ?2) \
             ON CONFLICT(entity_id) DO UPDATE SET \
               due_timestamp_millis = excluded.due_timestamp_millis",
        )?;
        let mut unindex_due = self
            .tx
            .prepare_cached("DELETE FROM derived_due_timestamps WHERE entity_id = ?1")?;

        for record in records {
            upsert.execute(params![
                record.entity_id,
                record.last_event_id,
                record.last_event_timestamp_millis,
                record.data,
            ])?;
            match record.due_timestamp_millis {
                Some(due) => index_due.execute(params![record.entity_id, due])?,
                None => unindex_due.execute(params![record.entity_id])?,
            };
        }
        Ok(())
    }
}

impl StoreBackend for SqliteBackend {
    fn transaction<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn BackendTx) -> Result<T, StoreError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut backend_tx = SqliteTx { tx };
        // Dropping the transaction on error rolls it back
        let output = f(&mut backend_tx)?;
        backend_tx.tx.commit()?;
        Ok(output)
    }

    fn get_events(&self, ids: &[&str]) -> Result<Vec<StoredEvent>, StoreError> {
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = select_event(&self.conn, id)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn get_entities(&self, entity_ids: &[&str]) -> Result<Vec<StoredEntity>, StoreError> {
        let mut entities = Vec::with_capacity(entity_ids.len());
        for entity_id in entity_ids {
            if let Some(entity) = select_entity(&self.conn, entity_id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    fn list_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(predicate) = &query.predicate {
            clauses.push(format!("{} {} ?", predicate.field.column(), predicate.op.sql()));
            values.push(sql_value(&predicate.value));
        }
        if let Some(after_id) = &query.after_id {
            let sequence: i64 = self
                .conn
                .query_row(
                    "SELECT sequence FROM events WHERE id = ?1",
                    params![after_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::InvalidQuery(format!("unknown cursor {}", after_id)))?;
            clauses.push("sequence > ?".to_string());
            values.push(Value::Integer(sequence));
        }
        values.push(sql_limit(query.limit));

        let sql = format!(
            "SELECT {} FROM events{} ORDER BY sequence LIMIT ?",
            EVENT_COLUMNS,
            where_clause(&clauses)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_from_iter(values.iter()), event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn list_entities(&self, query: &EntityQuery) -> Result<Vec<StoredEntity>, StoreError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(predicate) = &query.predicate {
            clauses.push(format!("{} {} ?", predicate.field.column(), predicate.op.sql()));
            values.push(sql_value(&predicate.value));
        }

        let sql = if query.orders_by_due() {
            if let Some(after_id) = &query.after_id {
                let due: i64 = self
                    .conn
                    .query_row(
                        "SELECT due_timestamp_millis FROM derived_due_timestamps WHERE entity_id = ?1",
                        params![after_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| StoreError::InvalidQuery(format!("unknown cursor {}", after_id)))?;
                clauses.push("(d.due_timestamp_millis, d.entity_id) > (?, ?)".to_string());
                values.push(Value::Integer(due));
                values.push(Value::Text(after_id.clone()));
            }
            format!(
                "SELECT {} FROM derived_due_timestamps d \
                 JOIN entities e ON e.id = d.entity_id{} \
                 ORDER BY d.due_timestamp_millis, d.entity_id LIMIT ?",
                ENTITY_COLUMNS,
                where_clause(&clauses)
            )
        } else {
            if let Some(after_id) = &query.after_id {
                let row_id: i64 = self
                    .conn
                    .query_row(
                        "SELECT row_id FROM entities WHERE id = ?1",
                        params![after_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| StoreError::InvalidQuery(format!("unknown cursor {}", after_id)))?;
                clauses.push("e.row_id > ?".to_string());
                values.push(Value::Integer(row_id));
            }
            format!(
                "SELECT {} FROM entities e \
                 LEFT JOIN derived_due_timestamps d ON d.entity_id = e.id{} \
                 ORDER BY e.row_id LIMIT ?",
                ENTITY_COLUMNS,
                where_clause(&clauses)
            )
        };
        values.push(sql_limit(query.limit));

        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params_from_iter(values.iter()), entity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityField, EventField, Predicate, RelOp};

    fn backend() -> SqliteBackend {
        SqliteBackend::open_in_memory(&StoreConfig::default()).unwrap()
    }

    fn event(id: &str, entity_id: &str, timestamp_millis: i64) -> StoredEvent {
        StoredEvent {
            id: id.into(),
            entity_id: entity_id.into(),
            event_type: "bump".into(),
            timestamp_millis,
            data: "{}".into(),
        }
    }

    fn entity(entity_id: &str, due: Option<i64>, data: &str) -> StoredEntity {
        StoredEntity {
            entity_id: entity_id.into(),
            last_event_id: format!("{}-last", entity_id),
            last_event_timestamp_millis: 7,
            due_timestamp_millis: due,
            data: data.into(),
        }
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let mut backend = backend();
        let result: Result<(), StoreError> = backend.transaction(|tx| {
            tx.insert_events(&[event("e1", "a", 1)])?;
            Err(StoreError::InvalidQuery("abort".into()))
        });
        assert!(result.is_err());
        assert!(backend.get_events(&["e1"]).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_keeps_position_and_updates_due_index() {
        let mut backend = backend();
        backend
            .transaction(|tx| {
                tx.put_entity_records(&[entity("a", Some(10), "v1"), entity("b", Some(20), "v1")])
            })
            .unwrap();
        backend
            .transaction(|tx| tx.put_entity_records(&[entity("a", None, "v2")]))
            .unwrap();

        let all = backend.list_entities(&EntityQuery::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(all[0].data, "v2");
        assert_eq!(all[0].due_timestamp_millis, None);

        let due = backend.list_entities(&EntityQuery::due_at_or_before(100)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entity_id, "b");
    }

    #[test]
    fn test_queries_page_with_cursor() {
        let mut backend = backend();
        backend
            .transaction(|tx| {
                tx.insert_events(&[event("e1", "a", 1), event("e2", "b", 2), event("e3", "a", 3)])?;
                tx.put_entity_records(&[
                    entity("a", Some(30), "{}"),
                    entity("b", Some(10), "{}"),
                    entity("c", Some(10), "{}"),
                ])
            })
            .unwrap();

        let events = backend
            .list_events(&EventQuery {
                predicate: Some(Predicate::new(EventField::EntityId, RelOp::Eq, "a")),
                after_id: Some("e1".into()),
                limit: None,
            })
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e3");

        let page = backend
            .list_entities(&EntityQuery::due_at_or_before(30).after("b").with_limit(5))
            .unwrap();
        let ids: Vec<_> = page.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let recent = backend
            .list_entities(&EntityQuery {
                predicate: Some(Predicate::new(EntityField::LastEventTimestampMillis, RelOp::Ge, 7_i64)),
                after_id: Some("a".into()),
                limit: Some(1),
            })
            .unwrap();
        assert_eq!(recent[0].entity_id, "b");
    }

    #[test]
    fn test_reopening_checks_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        drop(SqliteBackend::open(&path, &StoreConfig::default()).unwrap());
        assert!(SqliteBackend::open(&path, &StoreConfig::default()).is_ok());

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE meta SET value = 99 WHERE key = 'schema_version'", [])
            .unwrap();
        drop(conn);
        assert!(matches!(
            SqliteBackend::open(&path, &StoreConfig::default()),
            Err(StoreError::SchemaVersion { found: 99, .. })
        ));
    }
}
