//! TABULA Storage - Storage Trait and Backends
//!
//! Defines the durable-store boundary for the table engine. Every composite
//! mutation (table with default view, column with view entries, kind swap,
//! cascading deletes) is a single trait method so each backend can make it
//! atomic: [`InMemoryStorage`] under one write lock, [`SqliteStorage`] in one
//! transaction.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

use serde_json::Value;
use tabula_core::{
    render_text, AccountId, Column, ColumnId, ColumnKind, ColumnType, Link, Row, RowId, TableId,
    Table, TabulaError, TabulaResult, Timestamp, ValidationError, View, ViewColumn, ViewFilter,
    ViewId,
};

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Column to insert. Storage assigns the position (max + 1 within the table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumn {
    pub column_id: ColumnId,
    pub table_id: TableId,
    pub name: String,
    pub column_type: ColumnType,
    pub editable: bool,
    pub deletable: bool,
    pub searchable: bool,
    pub created_at: Timestamp,
}

/// Row to insert. Storage assigns the per-table row number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRow {
    pub row_id: RowId,
    pub table_id: TableId,
    pub created_at: Timestamp,
}

/// View to insert. Storage assigns the position (max + 1 within the table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewView {
    pub view_id: ViewId,
    pub table_id: TableId,
    pub name: String,
    pub is_default: bool,
    pub created_at: Timestamp,
}

/// Update payload for columns.
#[derive(Debug, Clone, Default)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    pub editable: Option<bool>,
    pub deletable: Option<bool>,
    pub searchable: Option<bool>,
}

/// One cell write, validated by the caller against a column of `kind`.
///
/// Storage rejects the write if the column's kind changed since, and extends
/// a select column's allowed values with a new string in the same operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite<'a> {
    pub row_id: RowId,
    pub column_id: ColumnId,
    pub kind: ColumnKind,
    /// `None` removes the key
    pub value: Option<&'a Value>,
    pub updated_at: Timestamp,
}

/// Side effects of a column kind swap, applied in the same operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeChange {
    /// Remove links tagged with the column
    pub drop_tagged_links: bool,
    /// Extend select options with the distinct values stored under the column
    pub seed_from_cells: bool,
}

/// Name comparison key: names are unique case-insensitively.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub(crate) fn kind_changed(column: &Column, expected: ColumnKind) -> TabulaError {
    TabulaError::Validation(ValidationError::ConstraintViolation {
        constraint: "column_type".to_string(),
        reason: format!(
            "column {:?} is now {}, value was checked as {}",
            column.name,
            column.kind(),
            expected
        ),
    })
}

/// The type a kind swap stores. With `seed_from_cells`, a select type gains
/// the trimmed rendered text of every distinct value under `key`, in row
/// order. Blank renderings are skipped.
pub(crate) fn seeded_type<'a>(
    column_type: &ColumnType,
    change: TypeChange,
    key: &str,
    rows: impl IntoIterator<Item = &'a Row>,
) -> ColumnType {
    match column_type {
        ColumnType::Select { options } if change.seed_from_cells => {
            let mut options = options.clone();
            for value in rows.into_iter().filter_map(|row| row.cells.get(key)) {
                let text = render_text(value).trim().to_string();
                if !text.is_empty() && !options.contains(&text) {
                    options.push(text);
                }
            }
            ColumnType::Select { options }
        }
        other => other.clone(),
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for TABULA entities.
///
/// Implementations enforce name uniqueness (tables per account, views per
/// table) and relation-edge uniqueness themselves, so concurrent callers
/// cannot race past a check-then-insert in the engine.
pub trait StorageTrait: Send + Sync {
    // === Table Operations ===

    /// Insert a table together with its default view.
    fn table_insert(&self, table: &Table, default_view: &NewView) -> TabulaResult<View>;

    fn table_get(&self, id: TableId) -> TabulaResult<Option<Table>>;

    /// Tables of an account in creation order.
    fn table_list_by_account(&self, account_id: AccountId) -> TabulaResult<Vec<Table>>;

    fn table_rename(&self, id: TableId, name: &str, updated_at: Timestamp) -> TabulaResult<()>;

    /// Delete a table and everything it owns: columns, rows, views, view
    /// entries, filters, and every link touching one of its rows.
    fn table_delete(&self, id: TableId) -> TabulaResult<()>;

    // === Column Operations ===

    /// Insert a column and a visible entry for it in every view of its table.
    fn column_insert(&self, column: &NewColumn) -> TabulaResult<Column>;

    fn column_get(&self, id: ColumnId) -> TabulaResult<Option<Column>>;

    /// Columns of a table ordered by position.
    fn column_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<Column>>;

    fn column_update(
        &self,
        id: ColumnId,
        update: ColumnUpdate,
        updated_at: Timestamp,
    ) -> TabulaResult<Column>;

    /// Swap a column's type, applying `change` in the same operation. Seeded
    /// select options are read from the rows under the same lock or
    /// transaction, so no concurrent cell write can slip in between.
    fn column_replace_type(
        &self,
        id: ColumnId,
        column_type: &ColumnType,
        change: TypeChange,
        updated_at: Timestamp,
    ) -> TabulaResult<Column>;

    /// Delete a column, its key in every row, its view entries, filters,
    /// allowed values and the links tagged with it.
    fn column_delete(&self, id: ColumnId) -> TabulaResult<()>;

    // === Row Operations ===

    fn row_insert(&self, row: &NewRow) -> TabulaResult<Row>;

    fn row_get(&self, id: RowId) -> TabulaResult<Option<Row>>;

    /// Rows of a table in creation order.
    fn row_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<Row>>;

    /// Write one cell. Returns whether the value extended the column's
    /// select options.
    fn row_set_cell(&self, write: &CellWrite<'_>) -> TabulaResult<bool>;

    /// Delete a row and every link touching it.
    fn row_delete(&self, id: RowId) -> TabulaResult<()>;

    /// Rows of a table whose cell under `key` equals `value`, in creation order.
    fn row_find_by_cell(&self, table_id: TableId, key: &str, value: &Value)
        -> TabulaResult<Vec<Row>>;

    // === Link Operations ===

    /// Insert a link; fails with `DuplicateEdge` when the pair already exists.
    fn link_insert(&self, link: &Link) -> TabulaResult<()>;

    /// Remove the link for a pair; fails with `NotFound` when absent.
    fn link_delete(&self, source: RowId, target: RowId) -> TabulaResult<()>;

    fn link_outgoing(&self, source: RowId, column_id: Option<ColumnId>) -> TabulaResult<Vec<Link>>;

    fn link_incoming(&self, target: RowId, column_id: Option<ColumnId>) -> TabulaResult<Vec<Link>>;

    // === View Operations ===

    /// Insert a view with one entry per existing column, positions mirroring
    /// the columns' positions.
    fn view_insert(&self, view: &NewView) -> TabulaResult<View>;

    fn view_get(&self, id: ViewId) -> TabulaResult<Option<View>>;

    /// Views of a table ordered by position.
    fn view_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<View>>;

    fn view_rename(&self, id: ViewId, name: &str, updated_at: Timestamp) -> TabulaResult<()>;

    /// Apply positions to views of one table in a single operation.
    fn view_set_positions(&self, table_id: TableId, positions: &[(ViewId, i32)])
        -> TabulaResult<()>;

    /// Delete a view with its entries and filters. Refuses the default view
    /// and the last remaining view of a table.
    fn view_delete(&self, id: ViewId) -> TabulaResult<()>;

    // === View Column Operations ===

    /// Entries of a view ordered by position.
    fn view_column_list(&self, view_id: ViewId) -> TabulaResult<Vec<ViewColumn>>;

    /// Apply positions to entries of one view in a single operation.
    fn view_column_set_positions(
        &self,
        view_id: ViewId,
        positions: &[(ColumnId, i32)],
    ) -> TabulaResult<()>;

    fn view_column_set_visible(
        &self,
        view_id: ViewId,
        column_id: ColumnId,
        visible: bool,
    ) -> TabulaResult<()>;

    // === Filter Operations ===

    /// Insert or replace the filter of a view on a column.
    fn filter_set(&self, filter: &ViewFilter) -> TabulaResult<()>;

    /// Remove a filter. Returns whether one existed.
    fn filter_delete(&self, view_id: ViewId, column_id: ColumnId) -> TabulaResult<bool>;

    fn filter_list(&self, view_id: ViewId) -> TabulaResult<Vec<ViewFilter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tabula_core::{now, EntityIdType};

    fn row_with(key: &str, value: Option<Value>) -> Row {
        let mut cells = tabula_core::CellMap::new();
        if let Some(value) = value {
            cells.insert(key.to_string(), value);
        }
        Row {
            row_id: RowId::now_v7(),
            table_id: TableId::now_v7(),
            number: 1,
            cells,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_seeded_type_collects_distinct_text() {
        let key = ColumnId::now_v7().cell_key();
        let rows = vec![
            row_with(&key, Some(json!(" A "))),
            row_with(&key, Some(json!(3))),
            row_with(&key, None),
            row_with(&key, Some(json!("A"))),
            row_with(&key, Some(json!(""))),
        ];
        let seed = TypeChange {
            seed_from_cells: true,
            ..TypeChange::default()
        };
        let select = ColumnType::Select { options: vec![] };
        assert_eq!(
            seeded_type(&select, seed, &key, &rows),
            ColumnType::Select {
                options: vec!["A".to_string(), "3".to_string()]
            }
        );
        assert_eq!(
            seeded_type(&select, TypeChange::default(), &key, &rows),
            select
        );
        assert_eq!(seeded_type(&ColumnType::Text, seed, &key, &rows), ColumnType::Text);
    }

    #[test]
    fn test_name_key_folds_case_and_trims() {
        assert_eq!(name_key("  Devices "), "devices");
        assert_eq!(name_key("ÉTÉ"), name_key("été"));
    }
}
