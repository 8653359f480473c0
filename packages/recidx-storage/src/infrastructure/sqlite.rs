//! SQLite-backed dependency map.
//!
//! One row per `(source, dependant, vtag, field)`. An edge whose
//! field set is empty (the source was visited but no specific field
//! was read) is stored as a single row with a NULL field; it is found
//! by the unfiltered dependant lookup only.
//!
//! Dependant lookups return a lazy cursor that pages over distinct
//! dependant ids, so large dependant sets are never materialized in
//! one read.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use recidx_model::{AbsoluteRecordId, RecordId, SchemaId};

use crate::domain::{DependantCursor, DependencyEntry, DependencyMap};
use crate::{Result, StorageError};

const CURSOR_BATCH_SIZE: usize = 100;

/// SQLite-based `DependencyMap` implementation.
#[derive(Clone)]
pub struct SqliteDependencyMap {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDependencyMap {
    /// Create or open a dependency map at the given path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let map = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        map.init_schema()?;
        Ok(map)
    }

    /// In-memory dependency map (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let map = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        map.init_schema()?;
        Ok(map)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS deref_edges (
                source_table TEXT NOT NULL,
                source_id TEXT NOT NULL,
                dependant_table TEXT NOT NULL,
                dependant_id TEXT NOT NULL,
                vtag TEXT NOT NULL,
                field TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_deref_source
             ON deref_edges (source_table, source_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_deref_dependant
             ON deref_edges (dependant_table, dependant_id, vtag)",
            [],
        )?;

        Ok(())
    }
}

impl DependencyMap for SqliteDependencyMap {
    fn replace_dependencies(
        &self,
        dependant: &AbsoluteRecordId,
        vtag: SchemaId,
        entries: &[DependencyEntry],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let dependant_id = dependant.record_id().to_string();
        tx.execute(
            "DELETE FROM deref_edges
             WHERE dependant_table = ?1 AND dependant_id = ?2 AND vtag = ?3",
            params![dependant.table(), dependant_id, vtag.to_string()],
        )?;

        for entry in entries {
            let source_id = entry.source.record_id().to_string();
            if entry.fields.is_empty() {
                tx.execute(
                    "INSERT INTO deref_edges
                     (source_table, source_id, dependant_table, dependant_id, vtag, field)
                     VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                    params![
                        entry.source.table(),
                        source_id,
                        dependant.table(),
                        dependant_id,
                        vtag.to_string()
                    ],
                )?;
            } else {
                for field in &entry.fields {
                    tx.execute(
                        "INSERT INTO deref_edges
                         (source_table, source_id, dependant_table, dependant_id, vtag, field)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            entry.source.table(),
                            source_id,
                            dependant.table(),
                            dependant_id,
                            vtag.to_string(),
                            field.to_string()
                        ],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_dependencies(&self, dependant: &AbsoluteRecordId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM deref_edges WHERE dependant_table = ?1 AND dependant_id = ?2",
            params![dependant.table(), dependant.record_id().to_string()],
        )?;
        Ok(())
    }

    fn delete_dependencies_for_vtag(
        &self,
        dependant: &AbsoluteRecordId,
        vtag: SchemaId,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM deref_edges
             WHERE dependant_table = ?1 AND dependant_id = ?2 AND vtag = ?3",
            params![
                dependant.table(),
                dependant.record_id().to_string(),
                vtag.to_string()
            ],
        )?;
        Ok(())
    }

    fn find_dependants(&self, source: &AbsoluteRecordId) -> Result<Box<dyn DependantCursor>> {
        Ok(Box::new(SqliteDependantCursor::new(
            Arc::clone(&self.conn),
            CursorFilter {
                source_table: source.table().to_string(),
                source_id: source.record_id().to_string(),
                vtag_and_fields: None,
            },
        )))
    }

    fn find_dependants_of(
        &self,
        source: &AbsoluteRecordId,
        fields: &BTreeSet<SchemaId>,
        vtag: SchemaId,
    ) -> Result<Box<dyn DependantCursor>> {
        Ok(Box::new(SqliteDependantCursor::new(
            Arc::clone(&self.conn),
            CursorFilter {
                source_table: source.table().to_string(),
                source_id: source.record_id().to_string(),
                vtag_and_fields: Some((
                    vtag.to_string(),
                    fields.iter().map(|f| f.to_string()).collect(),
                )),
            },
        )))
    }
}

struct CursorFilter {
    source_table: String,
    source_id: String,
    /// `None` for the unfiltered lookup; otherwise the vtag plus the
    /// changed field ids the edge must intersect.
    vtag_and_fields: Option<(String, Vec<String>)>,
}

/// Forward-only cursor paging over distinct dependant ids.
///
/// Exclusive access is enforced by the `&mut self` trait contract;
/// distinct cursors share the connection through its mutex only for
/// the duration of a batch fetch.
struct SqliteDependantCursor {
    conn: Arc<Mutex<Connection>>,
    filter: CursorFilter,
    buffer: VecDeque<AbsoluteRecordId>,
    /// Last `(table, id)` returned by the backing query, the resume
    /// point for the next batch.
    position: Option<(String, String)>,
    pending: Option<AbsoluteRecordId>,
    exhausted: bool,
    closed: bool,
}

impl SqliteDependantCursor {
    fn new(conn: Arc<Mutex<Connection>>, filter: CursorFilter) -> Self {
        Self {
            conn,
            filter,
            buffer: VecDeque::new(),
            position: None,
            pending: None,
            exhausted: false,
            closed: false,
        }
    }

    fn fetch_batch(&mut self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT DISTINCT dependant_table, dependant_id FROM deref_edges
             WHERE source_table = ?1 AND source_id = ?2",
        );
        let mut bind: Vec<String> = vec![
            self.filter.source_table.clone(),
            self.filter.source_id.clone(),
        ];

        if let Some((vtag, fields)) = &self.filter.vtag_and_fields {
            bind.push(vtag.clone());
            sql.push_str(&format!(" AND vtag = ?{}", bind.len()));
            if fields.is_empty() {
                // No changed fields can intersect any edge.
                sql.push_str(" AND 0");
            } else {
                let mut placeholders = Vec::with_capacity(fields.len());
                for field in fields {
                    bind.push(field.clone());
                    placeholders.push(format!("?{}", bind.len()));
                }
                sql.push_str(&format!(" AND field IN ({})", placeholders.join(", ")));
            }
        }

        if let Some((table, id)) = &self.position {
            bind.push(table.clone());
            let table_idx = bind.len();
            bind.push(id.clone());
            let id_idx = bind.len();
            sql.push_str(&format!(
                " AND (dependant_table, dependant_id) > (?{}, ?{})",
                table_idx, id_idx
            ));
        }

        sql.push_str(&format!(
            " ORDER BY dependant_table, dependant_id LIMIT {}",
            CURSOR_BATCH_SIZE
        ));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(bind.iter()))?;

        let mut fetched = 0usize;
        while let Some(row) = rows.next()? {
            let table: String = row.get(0)?;
            let id_text: String = row.get(1)?;
            let record_id = RecordId::from_bytes(id_text.as_bytes())
                .map_err(|e| StorageError::corrupt(format!("bad dependant id: {e}")))?;
            self.buffer
                .push_back(AbsoluteRecordId::new(table.clone(), record_id));
            self.position = Some((table, id_text));
            fetched += 1;
        }

        if fetched < CURSOR_BATCH_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<AbsoluteRecordId>> {
        if self.closed {
            return Err(StorageError::CursorClosed);
        }
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Ok(Some(id));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_batch()?;
        }
    }
}

impl DependantCursor for SqliteDependantCursor {
    fn has_next(&mut self) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        self.pending = self.advance()?;
        Ok(self.pending.is_some())
    }

    fn next(&mut self) -> Result<Option<AbsoluteRecordId>> {
        if let Some(id) = self.pending.take() {
            return Ok(Some(id));
        }
        self.advance()
    }

    fn close(&mut self) {
        self.closed = true;
        self.buffer.clear();
        self.pending = None;
        self.exhausted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collect_dependants;

    fn abs(table: &str, id: &str) -> AbsoluteRecordId {
        AbsoluteRecordId::new(table, RecordId::master(id))
    }

    fn fields(names: &[&str]) -> BTreeSet<SchemaId> {
        names.iter().map(|n| SchemaId::from_name(n)).collect()
    }

    #[test]
    fn dependants_are_found_by_source() {
        let map = SqliteDependencyMap::in_memory().unwrap();
        let vtag = SchemaId::from_name("live");

        map.replace_dependencies(
            &abs("records", "b"),
            vtag,
            &[DependencyEntry::new(abs("records", "a"), fields(&["name"]))],
        )
        .unwrap();

        let found = collect_dependants(map.find_dependants(&abs("records", "a")).unwrap()).unwrap();
        assert_eq!(found, vec![abs("records", "b")]);

        let none = collect_dependants(map.find_dependants(&abs("records", "x")).unwrap()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn field_filter_requires_intersection() {
        let map = SqliteDependencyMap::in_memory().unwrap();
        let vtag = SchemaId::from_name("live");

        map.replace_dependencies(
            &abs("records", "b"),
            vtag,
            &[DependencyEntry::new(abs("records", "a"), fields(&["name"]))],
        )
        .unwrap();

        let hit = collect_dependants(
            map.find_dependants_of(&abs("records", "a"), &fields(&["name", "other"]), vtag)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(hit, vec![abs("records", "b")]);

        let miss = collect_dependants(
            map.find_dependants_of(&abs("records", "a"), &fields(&["unrelated"]), vtag)
                .unwrap(),
        )
        .unwrap();
        assert!(miss.is_empty());

        let wrong_vtag = collect_dependants(
            map.find_dependants_of(
                &abs("records", "a"),
                &fields(&["name"]),
                SchemaId::from_name("preview"),
            )
            .unwrap(),
        )
        .unwrap();
        assert!(wrong_vtag.is_empty());
    }

    #[test]
    fn replace_rewrites_edges_for_the_pair() {
        let map = SqliteDependencyMap::in_memory().unwrap();
        let vtag = SchemaId::from_name("live");

        map.replace_dependencies(
            &abs("records", "b"),
            vtag,
            &[DependencyEntry::new(abs("records", "a"), fields(&["name"]))],
        )
        .unwrap();
        map.replace_dependencies(
            &abs("records", "b"),
            vtag,
            &[DependencyEntry::new(abs("records", "c"), fields(&["name"]))],
        )
        .unwrap();

        let stale =
            collect_dependants(map.find_dependants(&abs("records", "a")).unwrap()).unwrap();
        assert!(stale.is_empty(), "old edges must not accumulate");

        let fresh =
            collect_dependants(map.find_dependants(&abs("records", "c")).unwrap()).unwrap();
        assert_eq!(fresh, vec![abs("records", "b")]);
    }

    #[test]
    fn delete_dependencies_clears_all_vtags() {
        let map = SqliteDependencyMap::in_memory().unwrap();
        let live = SchemaId::from_name("live");
        let preview = SchemaId::from_name("preview");

        for vtag in [live, preview] {
            map.replace_dependencies(
                &abs("records", "b"),
                vtag,
                &[DependencyEntry::new(abs("records", "a"), fields(&["name"]))],
            )
            .unwrap();
        }

        map.delete_dependencies(&abs("records", "b")).unwrap();
        let found = collect_dependants(map.find_dependants(&abs("records", "a")).unwrap()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn empty_field_edges_only_match_unfiltered_lookup() {
        let map = SqliteDependencyMap::in_memory().unwrap();
        let vtag = SchemaId::from_name("live");

        map.replace_dependencies(
            &abs("records", "b"),
            vtag,
            &[DependencyEntry::new(abs("records", "a"), BTreeSet::new())],
        )
        .unwrap();

        let all = collect_dependants(map.find_dependants(&abs("records", "a")).unwrap()).unwrap();
        assert_eq!(all, vec![abs("records", "b")]);

        let filtered = collect_dependants(
            map.find_dependants_of(&abs("records", "a"), &fields(&["name"]), vtag)
                .unwrap(),
        )
        .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn cursor_pages_past_one_batch() {
        let map = SqliteDependencyMap::in_memory().unwrap();
        let vtag = SchemaId::from_name("live");
        let n = CURSOR_BATCH_SIZE * 2 + 7;

        for i in 0..n {
            map.replace_dependencies(
                &abs("records", &format!("dep{:05}", i)),
                vtag,
                &[DependencyEntry::new(abs("records", "a"), fields(&["name"]))],
            )
            .unwrap();
        }

        let found = collect_dependants(map.find_dependants(&abs("records", "a")).unwrap()).unwrap();
        assert_eq!(found.len(), n);
    }

    #[test]
    fn closed_cursor_rejects_further_reads() {
        let map = SqliteDependencyMap::in_memory().unwrap();
        let mut cursor = map.find_dependants(&abs("records", "a")).unwrap();
        cursor.close();
        assert!(cursor.next().is_err());
    }
}
