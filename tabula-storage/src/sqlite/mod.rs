//! SQLite storage backend
//!
//! One connection behind a `Mutex`. Composite operations run in a
//! transaction; uniqueness of table names, view names and links is enforced
//! by UNIQUE constraints and surfaced as domain errors. Cascades follow the
//! foreign keys, except stripping a deleted column's key out of every row's
//! cell map, which is one `json_remove` update.

mod codec;
mod schema;

use crate::{
    kind_changed, name_key, seeded_type, CellWrite, ColumnUpdate, NewColumn, NewRow, NewView,
    StorageTrait, TypeChange,
};
use codec::{
    cell_path, encode_column_type, encode_ts, is_unique_violation, RawColumn, RawFilter, RawLink,
    RawRow, RawTable, RawView, RawViewColumn, SqlResultExt,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tabula_core::{
    AccountId, Column, ColumnId, ColumnType, EntityType, Link, Row, RowId, StorageError, Table,
    TableId, TabulaError, TabulaResult, Timestamp, ValidationError, View, ViewColumn, ViewFilter,
    ViewId,
};
use tracing::debug;

/// SQLite-backed storage.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file and install the schema.
    pub fn open(path: impl AsRef<Path>) -> TabulaResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).sql()?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .sql()?;
        debug!(path = %path.display(), "opened sqlite storage");
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> TabulaResult<Self> {
        Self::from_connection(Connection::open_in_memory().sql()?)
    }

    fn from_connection(conn: Connection) -> TabulaResult<Self> {
        schema::migrate(&conn).sql()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> TabulaResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TabulaError::Storage(StorageError::LockPoisoned))
    }
}

// ============================================================================
// QUERY HELPERS
// ============================================================================

fn duplicate_name(entity_type: EntityType, name: &str) -> TabulaError {
    TabulaError::Validation(ValidationError::DuplicateName {
        entity_type,
        name: name.to_string(),
    })
}

/// Map a UNIQUE violation to `on_unique`, anything else to a backend error.
fn map_unique(err: rusqlite::Error, on_unique: impl FnOnce() -> TabulaError) -> TabulaError {
    if is_unique_violation(&err) {
        on_unique()
    } else {
        TabulaError::backend(err)
    }
}

fn exists(conn: &Connection, sql: &str, id: &str) -> TabulaResult<bool> {
    conn.query_row(sql, params![id], |_| Ok(()))
        .optional()
        .sql()
        .map(|found| found.is_some())
}

fn require_table(conn: &Connection, id: TableId) -> TabulaResult<()> {
    if exists(conn, "SELECT 1 FROM tables WHERE table_id=?1", &id.to_string())? {
        Ok(())
    } else {
        Err(TabulaError::not_found(EntityType::Table, id))
    }
}

fn require_row(conn: &Connection, id: RowId) -> TabulaResult<()> {
    if exists(conn, "SELECT 1 FROM rows WHERE row_id=?1", &id.to_string())? {
        Ok(())
    } else {
        Err(TabulaError::not_found(EntityType::Row, id))
    }
}

fn load_options(conn: &Connection, column_id: &str) -> TabulaResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT value FROM allowed_values WHERE column_id=?1 ORDER BY id")
        .sql()?;
    let values = stmt
        .query_map(params![column_id], |row| row.get::<_, String>(0))
        .sql()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql()?;
    Ok(values)
}

fn decode_column(conn: &Connection, raw: RawColumn) -> TabulaResult<Column> {
    let options = if raw.is_select() {
        load_options(conn, &raw.column_id)?
    } else {
        Vec::new()
    };
    raw.decode(options)
}

fn fetch_column(conn: &Connection, id: ColumnId) -> TabulaResult<Option<Column>> {
    let sql = format!("SELECT {} FROM columns WHERE column_id=?1", RawColumn::COLUMNS);
    let raw = conn
        .query_row(&sql, params![id.to_string()], RawColumn::from_row)
        .optional()
        .sql()?;
    raw.map(|raw| decode_column(conn, raw)).transpose()
}

fn require_column(conn: &Connection, id: ColumnId) -> TabulaResult<Column> {
    fetch_column(conn, id)?.ok_or_else(|| TabulaError::not_found(EntityType::Column, id))
}

fn fetch_row(conn: &Connection, id: RowId) -> TabulaResult<Option<Row>> {
    let sql = format!("SELECT {} FROM rows WHERE row_id=?1", RawRow::COLUMNS);
    conn.query_row(&sql, params![id.to_string()], RawRow::from_row)
        .optional()
        .sql()?
        .map(RawRow::decode)
        .transpose()
}

fn fetch_view(conn: &Connection, id: ViewId) -> TabulaResult<Option<View>> {
    let sql = format!("SELECT {} FROM views WHERE view_id=?1", RawView::COLUMNS);
    conn.query_row(&sql, params![id.to_string()], RawView::from_row)
        .optional()
        .sql()?
        .map(RawView::decode)
        .transpose()
}

fn query_rows(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> TabulaResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql).sql()?;
    let raws = stmt
        .query_map(args, RawRow::from_row)
        .sql()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql()?;
    raws.into_iter().map(RawRow::decode).collect()
}

fn query_links(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> TabulaResult<Vec<Link>> {
    let mut stmt = conn.prepare(sql).sql()?;
    let raws = stmt
        .query_map(args, RawLink::from_row)
        .sql()?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql()?;
    raws.into_iter().map(RawLink::decode).collect()
}

fn table_rows(conn: &Connection, table_id: TableId) -> TabulaResult<Vec<Row>> {
    let sql = format!(
        "SELECT {} FROM rows WHERE table_id=?1 ORDER BY number",
        RawRow::COLUMNS
    );
    query_rows(conn, &sql, &[&table_id.to_string()])
}

fn insert_options(tx: &Transaction<'_>, column_id: &str, options: &[String]) -> TabulaResult<()> {
    for option in options {
        tx.execute(
            "INSERT OR IGNORE INTO allowed_values(column_id, value) VALUES (?1, ?2)",
            params![column_id, option],
        )
        .sql()?;
    }
    Ok(())
}

fn next_row_number(tx: &Transaction<'_>, table_id: &str) -> TabulaResult<i64> {
    let current: i64 = tx
        .query_row(
            "SELECT value FROM row_counters WHERE table_id=?1",
            params![table_id],
            |row| row.get(0),
        )
        .optional()
        .sql()?
        .unwrap_or(0);
    let next = current + 1;
    tx.execute(
        r#"
        INSERT INTO row_counters(table_id, value) VALUES (?1, ?2)
        ON CONFLICT(table_id) DO UPDATE SET value=excluded.value
        "#,
        params![table_id, next],
    )
    .sql()?;
    Ok(next)
}

// ============================================================================
// STORAGE TRAIT IMPLEMENTATION
// ============================================================================

impl StorageTrait for SqliteStorage {
    // === Table Operations ===

    fn table_insert(&self, table: &Table, default_view: &NewView) -> TabulaResult<View> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        let table_id = table.table_id.to_string();

        tx.execute(
            r#"
            INSERT INTO tables(table_id, account_id, name, name_key, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                table_id,
                table.account_id.to_string(),
                table.name,
                name_key(&table.name),
                encode_ts(&table.created_at),
                encode_ts(&table.updated_at),
            ],
        )
        .map_err(|e| map_unique(e, || duplicate_name(EntityType::Table, &table.name)))?;

        let view = View {
            view_id: default_view.view_id,
            table_id: table.table_id,
            name: default_view.name.clone(),
            position: 0,
            is_default: default_view.is_default,
            created_at: default_view.created_at,
            updated_at: default_view.created_at,
        };
        tx.execute(
            r#"
            INSERT INTO views(view_id, table_id, name, name_key, position, is_default, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                view.view_id.to_string(),
                table_id,
                view.name,
                name_key(&view.name),
                view.position,
                view.is_default,
                encode_ts(&view.created_at),
            ],
        )
        .sql()?;

        tx.commit().sql()?;
        Ok(view)
    }

    fn table_get(&self, id: TableId) -> TabulaResult<Option<Table>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM tables WHERE table_id=?1", RawTable::COLUMNS);
        conn.query_row(&sql, params![id.to_string()], RawTable::from_row)
            .optional()
            .sql()?
            .map(RawTable::decode)
            .transpose()
    }

    fn table_list_by_account(&self, account_id: AccountId) -> TabulaResult<Vec<Table>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM tables WHERE account_id=?1 ORDER BY rowid",
            RawTable::COLUMNS
        );
        let mut stmt = conn.prepare(&sql).sql()?;
        let raws = stmt
            .query_map(params![account_id.to_string()], RawTable::from_row)
            .sql()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .sql()?;
        raws.into_iter().map(RawTable::decode).collect()
    }

    fn table_rename(&self, id: TableId, name: &str, updated_at: Timestamp) -> TabulaResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tables SET name=?1, name_key=?2, updated_at=?3 WHERE table_id=?4",
                params![name, name_key(name), encode_ts(&updated_at), id.to_string()],
            )
            .map_err(|e| map_unique(e, || duplicate_name(EntityType::Table, name)))?;
        if changed == 0 {
            return Err(TabulaError::not_found(EntityType::Table, id));
        }
        Ok(())
    }

    fn table_delete(&self, id: TableId) -> TabulaResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM tables WHERE table_id=?1", params![id.to_string()])
            .sql()?;
        if changed == 0 {
            return Err(TabulaError::not_found(EntityType::Table, id));
        }
        Ok(())
    }

    // === Column Operations ===

    fn column_insert(&self, new: &NewColumn) -> TabulaResult<Column> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        require_table(&tx, new.table_id)?;

        let table_id = new.table_id.to_string();
        let column_id = new.column_id.to_string();
        let position: i32 = tx
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM columns WHERE table_id=?1",
                params![table_id],
                |row| row.get(0),
            )
            .sql()?;
        let (kind, target, formula) = encode_column_type(&new.column_type)?;

        tx.execute(
            r#"
            INSERT INTO columns(column_id, table_id, name, kind, target_table_id, formula_json,
                                position, editable, deletable, searchable, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
            params![
                column_id,
                table_id,
                new.name,
                kind,
                target,
                formula,
                position,
                new.editable,
                new.deletable,
                new.searchable,
                encode_ts(&new.created_at),
            ],
        )
        .map_err(|e| {
            map_unique(e, || TabulaError::Validation(ValidationError::ConstraintViolation {
                constraint: "columns.column_id".to_string(),
                reason: "already exists".to_string(),
            }))
        })?;

        if let Some(options) = new.column_type.select_options() {
            insert_options(&tx, &column_id, options)?;
        }

        tx.execute(
            r#"
            INSERT INTO view_columns(view_id, column_id, position, visible)
            SELECT v.view_id, ?1,
                   (SELECT COALESCE(MAX(vc.position) + 1, 0) FROM view_columns vc
                    WHERE vc.view_id = v.view_id),
                   1
            FROM views v WHERE v.table_id=?2
            "#,
            params![column_id, table_id],
        )
        .sql()?;

        let column = require_column(&tx, new.column_id)?;
        tx.commit().sql()?;
        Ok(column)
    }

    fn column_get(&self, id: ColumnId) -> TabulaResult<Option<Column>> {
        let conn = self.lock()?;
        fetch_column(&conn, id)
    }

    fn column_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<Column>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM columns WHERE table_id=?1 ORDER BY position, column_id",
            RawColumn::COLUMNS
        );
        let mut stmt = conn.prepare(&sql).sql()?;
        let raws = stmt
            .query_map(params![table_id.to_string()], RawColumn::from_row)
            .sql()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .sql()?;
        raws.into_iter().map(|raw| decode_column(&conn, raw)).collect()
    }

    fn column_update(
        &self,
        id: ColumnId,
        update: ColumnUpdate,
        updated_at: Timestamp,
    ) -> TabulaResult<Column> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        let mut column = require_column(&tx, id)?;

        if let Some(name) = update.name {
            column.name = name;
        }
        if let Some(editable) = update.editable {
            column.editable = editable;
        }
        if let Some(deletable) = update.deletable {
            column.deletable = deletable;
        }
        if let Some(searchable) = update.searchable {
            column.searchable = searchable;
        }
        column.updated_at = updated_at;

        tx.execute(
            r#"
            UPDATE columns SET name=?1, editable=?2, deletable=?3, searchable=?4, updated_at=?5
            WHERE column_id=?6
            "#,
            params![
                column.name,
                column.editable,
                column.deletable,
                column.searchable,
                encode_ts(&updated_at),
                id.to_string(),
            ],
        )
        .sql()?;
        tx.commit().sql()?;
        Ok(column)
    }

    fn column_replace_type(
        &self,
        id: ColumnId,
        column_type: &ColumnType,
        change: TypeChange,
        updated_at: Timestamp,
    ) -> TabulaResult<Column> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        let column_id = id.to_string();
        let current = require_column(&tx, id)?;
        let rows = if change.seed_from_cells {
            table_rows(&tx, current.table_id)?
        } else {
            Vec::new()
        };
        let column_type = seeded_type(column_type, change, &id.cell_key(), &rows);
        let (kind, target, formula) = encode_column_type(&column_type)?;

        let changed = tx
            .execute(
                r#"
                UPDATE columns SET kind=?1, target_table_id=?2, formula_json=?3, updated_at=?4
                WHERE column_id=?5
                "#,
                params![kind, target, formula, encode_ts(&updated_at), column_id],
            )
            .sql()?;
        if changed == 0 {
            return Err(TabulaError::not_found(EntityType::Column, id));
        }

        tx.execute(
            "DELETE FROM allowed_values WHERE column_id=?1",
            params![column_id],
        )
        .sql()?;
        if let Some(options) = column_type.select_options() {
            insert_options(&tx, &column_id, options)?;
        }
        if change.drop_tagged_links {
            tx.execute("DELETE FROM links WHERE column_id=?1", params![column_id])
                .sql()?;
        }

        let column = require_column(&tx, id)?;
        tx.commit().sql()?;
        Ok(column)
    }

    fn column_delete(&self, id: ColumnId) -> TabulaResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        let column = require_column(&tx, id)?;
        let path = cell_path(&id.cell_key())?;

        tx.execute(
            "UPDATE rows SET cells=json_remove(cells, ?1) WHERE table_id=?2",
            params![path, column.table_id.to_string()],
        )
        .sql()?;
        // View entries, filters, allowed values and tagged links cascade.
        tx.execute(
            "DELETE FROM columns WHERE column_id=?1",
            params![id.to_string()],
        )
        .sql()?;
        tx.commit().sql()?;
        Ok(())
    }

    // === Row Operations ===

    fn row_insert(&self, new: &NewRow) -> TabulaResult<Row> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        require_table(&tx, new.table_id)?;

        let table_id = new.table_id.to_string();
        let number = next_row_number(&tx, &table_id)?;
        tx.execute(
            r#"
            INSERT INTO rows(row_id, table_id, number, cells, created_at, updated_at)
            VALUES (?1, ?2, ?3, '{}', ?4, ?4)
            "#,
            params![
                new.row_id.to_string(),
                table_id,
                number,
                encode_ts(&new.created_at)
            ],
        )
        .map_err(|e| {
            map_unique(e, || TabulaError::Validation(ValidationError::ConstraintViolation {
                constraint: "rows.row_id".to_string(),
                reason: "already exists".to_string(),
            }))
        })?;
        tx.commit().sql()?;

        Ok(Row {
            row_id: new.row_id,
            table_id: new.table_id,
            number,
            cells: Default::default(),
            created_at: new.created_at,
            updated_at: new.created_at,
        })
    }

    fn row_get(&self, id: RowId) -> TabulaResult<Option<Row>> {
        let conn = self.lock()?;
        fetch_row(&conn, id)
    }

    fn row_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<Row>> {
        let conn = self.lock()?;
        table_rows(&conn, table_id)
    }

    fn row_set_cell(&self, write: &CellWrite<'_>) -> TabulaResult<bool> {
        let path = cell_path(&write.column_id.cell_key())?;
        let row_id = write.row_id.to_string();
        let updated_at = encode_ts(&write.updated_at);
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        let column = require_column(&tx, write.column_id)?;
        if column.kind() != write.kind {
            return Err(kind_changed(&column, write.kind));
        }

        let added = match (&column.column_type, write.value) {
            (ColumnType::Select { options }, Some(Value::String(text)))
                if !options.contains(text) =>
            {
                insert_options(&tx, &write.column_id.to_string(), std::slice::from_ref(text))?;
                true
            }
            _ => false,
        };

        let changed = match write.value {
            Some(value) => {
                let encoded = serde_json::to_string(value).map_err(TabulaError::backend)?;
                tx.execute(
                    "UPDATE rows SET cells=json_set(cells, ?1, json(?2)), updated_at=?3 WHERE row_id=?4",
                    params![path, encoded, updated_at, row_id],
                )
            }
            None => tx.execute(
                "UPDATE rows SET cells=json_remove(cells, ?1), updated_at=?2 WHERE row_id=?3",
                params![path, updated_at, row_id],
            ),
        }
        .sql()?;
        if changed == 0 {
            return Err(TabulaError::not_found(EntityType::Row, write.row_id));
        }
        tx.commit().sql()?;
        Ok(added)
    }

    fn row_delete(&self, id: RowId) -> TabulaResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM rows WHERE row_id=?1", params![id.to_string()])
            .sql()?;
        if changed == 0 {
            return Err(TabulaError::not_found(EntityType::Row, id));
        }
        Ok(())
    }

    fn row_find_by_cell(
        &self,
        table_id: TableId,
        key: &str,
        value: &Value,
    ) -> TabulaResult<Vec<Row>> {
        let path = cell_path(key)?;
        let encoded = serde_json::to_string(value).map_err(TabulaError::backend)?;
        let conn = self.lock()?;
        let sql = format!(
            r#"
            SELECT {} FROM rows
            WHERE table_id=?1 AND json_extract(cells, ?2) = json_extract(?3, '$')
            ORDER BY number
            "#,
            RawRow::COLUMNS
        );
        let candidates = query_rows(&conn, &sql, &[&table_id.to_string(), &path, &encoded])?;
        // SQLite compares 10 and 10.0 as equal; keep exact JSON equality.
        Ok(candidates
            .into_iter()
            .filter(|row| row.cells.get(key) == Some(value))
            .collect())
    }

    // === Link Operations ===

    fn link_insert(&self, link: &Link) -> TabulaResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        require_row(&tx, link.source_row_id)?;
        require_row(&tx, link.target_row_id)?;

        tx.execute(
            r#"
            INSERT INTO links(link_id, source_row_id, target_row_id, column_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                link.link_id.to_string(),
                link.source_row_id.to_string(),
                link.target_row_id.to_string(),
                link.column_id.map(|c| c.to_string()),
                encode_ts(&link.created_at),
            ],
        )
        .map_err(|e| {
            map_unique(e, || TabulaError::DuplicateEdge {
                source_row: link.source_row_id,
                target_row: link.target_row_id,
            })
        })?;
        tx.commit().sql()?;
        Ok(())
    }

    fn link_delete(&self, source: RowId, target: RowId) -> TabulaResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM links WHERE source_row_id=?1 AND target_row_id=?2",
                params![source.to_string(), target.to_string()],
            )
            .sql()?;
        if changed == 0 {
            return Err(TabulaError::not_found(
                EntityType::Link,
                format!("{} -> {}", source, target),
            ));
        }
        Ok(())
    }

    fn link_outgoing(&self, source: RowId, column_id: Option<ColumnId>) -> TabulaResult<Vec<Link>> {
        let conn = self.lock()?;
        let source = source.to_string();
        match column_id {
            Some(column_id) => query_links(
                &conn,
                &format!(
                    "SELECT {} FROM links WHERE source_row_id=?1 AND column_id=?2 ORDER BY rowid",
                    RawLink::COLUMNS
                ),
                &[&source, &column_id.to_string()],
            ),
            None => query_links(
                &conn,
                &format!(
                    "SELECT {} FROM links WHERE source_row_id=?1 ORDER BY rowid",
                    RawLink::COLUMNS
                ),
                &[&source],
            ),
        }
    }

    fn link_incoming(&self, target: RowId, column_id: Option<ColumnId>) -> TabulaResult<Vec<Link>> {
        let conn = self.lock()?;
        let target = target.to_string();
        match column_id {
            Some(column_id) => query_links(
                &conn,
                &format!(
                    "SELECT {} FROM links WHERE target_row_id=?1 AND column_id=?2 ORDER BY rowid",
                    RawLink::COLUMNS
                ),
                &[&target, &column_id.to_string()],
            ),
            None => query_links(
                &conn,
                &format!(
                    "SELECT {} FROM links WHERE target_row_id=?1 ORDER BY rowid",
                    RawLink::COLUMNS
                ),
                &[&target],
            ),
        }
    }

    // === View Operations ===

    fn view_insert(&self, new: &NewView) -> TabulaResult<View> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        require_table(&tx, new.table_id)?;

        let table_id = new.table_id.to_string();
        let view_id = new.view_id.to_string();
        let position: i32 = tx
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM views WHERE table_id=?1",
                params![table_id],
                |row| row.get(0),
            )
            .sql()?;

        tx.execute(
            r#"
            INSERT INTO views(view_id, table_id, name, name_key, position, is_default, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                view_id,
                table_id,
                new.name,
                name_key(&new.name),
                position,
                new.is_default,
                encode_ts(&new.created_at),
            ],
        )
        .map_err(|e| map_unique(e, || duplicate_name(EntityType::View, &new.name)))?;

        tx.execute(
            r#"
            INSERT INTO view_columns(view_id, column_id, position, visible)
            SELECT ?1, column_id, position, 1 FROM columns WHERE table_id=?2
            "#,
            params![view_id, table_id],
        )
        .sql()?;
        tx.commit().sql()?;

        Ok(View {
            view_id: new.view_id,
            table_id: new.table_id,
            name: new.name.clone(),
            position,
            is_default: new.is_default,
            created_at: new.created_at,
            updated_at: new.created_at,
        })
    }

    fn view_get(&self, id: ViewId) -> TabulaResult<Option<View>> {
        let conn = self.lock()?;
        fetch_view(&conn, id)
    }

    fn view_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<View>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM views WHERE table_id=?1 ORDER BY position, view_id",
            RawView::COLUMNS
        );
        let mut stmt = conn.prepare(&sql).sql()?;
        let raws = stmt
            .query_map(params![table_id.to_string()], RawView::from_row)
            .sql()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .sql()?;
        raws.into_iter().map(RawView::decode).collect()
    }

    fn view_rename(&self, id: ViewId, name: &str, updated_at: Timestamp) -> TabulaResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE views SET name=?1, name_key=?2, updated_at=?3 WHERE view_id=?4",
                params![name, name_key(name), encode_ts(&updated_at), id.to_string()],
            )
            .map_err(|e| map_unique(e, || duplicate_name(EntityType::View, name)))?;
        if changed == 0 {
            return Err(TabulaError::not_found(EntityType::View, id));
        }
        Ok(())
    }

    fn view_set_positions(
        &self,
        table_id: TableId,
        positions: &[(ViewId, i32)],
    ) -> TabulaResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        for (view_id, position) in positions {
            let changed = tx
                .execute(
                    "UPDATE views SET position=?1 WHERE view_id=?2 AND table_id=?3",
                    params![position, view_id.to_string(), table_id.to_string()],
                )
                .sql()?;
            if changed == 0 {
                return Err(TabulaError::not_found(EntityType::View, view_id));
            }
        }
        tx.commit().sql()?;
        Ok(())
    }

    fn view_delete(&self, id: ViewId) -> TabulaResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        let view = fetch_view(&tx, id)?.ok_or_else(|| TabulaError::not_found(EntityType::View, id))?;
        if view.is_default {
            return Err(TabulaError::invalid_value(
                "view",
                "the default view cannot be deleted",
            ));
        }
        let remaining: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM views WHERE table_id=?1",
                params![view.table_id.to_string()],
                |row| row.get(0),
            )
            .sql()?;
        if remaining <= 1 {
            return Err(TabulaError::invalid_value(
                "view",
                "the last view of a table cannot be deleted",
            ));
        }
        // Entries and filters cascade.
        tx.execute("DELETE FROM views WHERE view_id=?1", params![id.to_string()])
            .sql()?;
        tx.commit().sql()?;
        Ok(())
    }

    // === View Column Operations ===

    fn view_column_list(&self, view_id: ViewId) -> TabulaResult<Vec<ViewColumn>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT view_id, column_id, position, visible FROM view_columns
                WHERE view_id=?1 ORDER BY position, column_id
                "#,
            )
            .sql()?;
        let raws = stmt
            .query_map(params![view_id.to_string()], RawViewColumn::from_row)
            .sql()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .sql()?;
        raws.into_iter().map(RawViewColumn::decode).collect()
    }

    fn view_column_set_positions(
        &self,
        view_id: ViewId,
        positions: &[(ColumnId, i32)],
    ) -> TabulaResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        for (column_id, position) in positions {
            let changed = tx
                .execute(
                    "UPDATE view_columns SET position=?1 WHERE view_id=?2 AND column_id=?3",
                    params![position, view_id.to_string(), column_id.to_string()],
                )
                .sql()?;
            if changed == 0 {
                return Err(TabulaError::not_found(
                    EntityType::ViewColumn,
                    format!("{}/{}", view_id, column_id),
                ));
            }
        }
        tx.commit().sql()?;
        Ok(())
    }

    fn view_column_set_visible(
        &self,
        view_id: ViewId,
        column_id: ColumnId,
        visible: bool,
    ) -> TabulaResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE view_columns SET visible=?1 WHERE view_id=?2 AND column_id=?3",
                params![visible, view_id.to_string(), column_id.to_string()],
            )
            .sql()?;
        if changed == 0 {
            return Err(TabulaError::not_found(
                EntityType::ViewColumn,
                format!("{}/{}", view_id, column_id),
            ));
        }
        Ok(())
    }

    // === Filter Operations ===

    fn filter_set(&self, filter: &ViewFilter) -> TabulaResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().sql()?;
        if fetch_view(&tx, filter.view_id)?.is_none() {
            return Err(TabulaError::not_found(EntityType::View, filter.view_id));
        }
        if fetch_column(&tx, filter.column_id)?.is_none() {
            return Err(TabulaError::not_found(EntityType::Column, filter.column_id));
        }
        tx.execute(
            r#"
            INSERT INTO filters(view_id, column_id, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(view_id, column_id) DO UPDATE SET value=excluded.value
            "#,
            params![
                filter.view_id.to_string(),
                filter.column_id.to_string(),
                filter.value
            ],
        )
        .sql()?;
        tx.commit().sql()?;
        Ok(())
    }

    fn filter_delete(&self, view_id: ViewId, column_id: ColumnId) -> TabulaResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM filters WHERE view_id=?1 AND column_id=?2",
                params![view_id.to_string(), column_id.to_string()],
            )
            .sql()?;
        Ok(changed > 0)
    }

    fn filter_list(&self, view_id: ViewId) -> TabulaResult<Vec<ViewFilter>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT f.view_id, f.column_id, f.value FROM filters f
                LEFT JOIN columns c ON c.column_id = f.column_id
                WHERE f.view_id=?1 ORDER BY c.position, f.column_id
                "#,
            )
            .sql()?;
        let raws = stmt
            .query_map(params![view_id.to_string()], RawFilter::from_row)
            .sql()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .sql()?;
        raws.into_iter().map(RawFilter::decode).collect()
    }
}
