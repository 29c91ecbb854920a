//! Core entity structures

use crate::{AccountId, ColumnId, ColumnKind, LinkId, RowId, TableId, Timestamp, ViewId};
use serde::{Deserialize, Serialize};

/// Schemaless value bag of a row: column-id string → JSON value.
///
/// Keys are expected to be ids of the row's table columns, but stale keys
/// from deleted columns may linger and are ignored on display.
pub type CellMap = serde_json::Map<String, serde_json::Value>;

/// Table - account-scoped collection of rows and columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub table_id: TableId,
    pub account_id: AccountId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// FORMULA TOKENS
// ============================================================================

/// One element of a stored formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormulaToken {
    /// Literal operator text: `+`, `-`, `*`, `/`, `(`, `)`
    Operator { value: String },
    /// Literal number, stored as text
    Unit { value: String },
    /// Reference to another column of the same table
    Property { column_id: ColumnId },
}

impl FormulaToken {
    pub fn operator(value: impl Into<String>) -> Self {
        FormulaToken::Operator {
            value: value.into(),
        }
    }

    pub fn unit(value: impl Into<String>) -> Self {
        FormulaToken::Unit {
            value: value.into(),
        }
    }

    pub fn property(column_id: ColumnId) -> Self {
        FormulaToken::Property { column_id }
    }

    /// Column referenced by this token, if it is a property token.
    pub fn referenced_column(&self) -> Option<ColumnId> {
        match self {
            FormulaToken::Property { column_id } => Some(*column_id),
            _ => None,
        }
    }
}

// ============================================================================
// COLUMNS
// ============================================================================

/// Column type with its kind-specific state.
///
/// Only the matching variant carries extra state: select options, a linked
/// target table, or a formula token sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Select { options: Vec<String> },
    LinkedRow { target_table_id: TableId },
    Formula { tokens: Vec<FormulaToken> },
}

impl ColumnType {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnType::Text => ColumnKind::Text,
            ColumnType::Number => ColumnKind::Number,
            ColumnType::Date => ColumnKind::Date,
            ColumnType::Select { .. } => ColumnKind::Select,
            ColumnType::LinkedRow { .. } => ColumnKind::LinkedRow,
            ColumnType::Formula { .. } => ColumnKind::Formula,
        }
    }

    pub fn select_options(&self) -> Option<&[String]> {
        match self {
            ColumnType::Select { options } => Some(options),
            _ => None,
        }
    }

    pub fn target_table_id(&self) -> Option<TableId> {
        match self {
            ColumnType::LinkedRow { target_table_id } => Some(*target_table_id),
            _ => None,
        }
    }

    pub fn formula_tokens(&self) -> Option<&[FormulaToken]> {
        match self {
            ColumnType::Formula { tokens } => Some(tokens),
            _ => None,
        }
    }
}

/// Caller-facing description of the kind a column should have.
///
/// Select options are never supplied by the caller: they are seeded from the
/// values stored under the column when converting, and extended lazily on
/// writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKindSpec {
    Text,
    Number,
    Date,
    Select,
    LinkedRow { target_table_id: Option<TableId> },
    Formula { tokens: Vec<FormulaToken> },
}

impl ColumnKindSpec {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnKindSpec::Text => ColumnKind::Text,
            ColumnKindSpec::Number => ColumnKind::Number,
            ColumnKindSpec::Date => ColumnKind::Date,
            ColumnKindSpec::Select => ColumnKind::Select,
            ColumnKindSpec::LinkedRow { .. } => ColumnKind::LinkedRow,
            ColumnKindSpec::Formula { .. } => ColumnKind::Formula,
        }
    }
}

/// Column (property) - typed, positioned field definition on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub column_id: ColumnId,
    pub table_id: TableId,
    pub name: String,
    pub column_type: ColumnType,
    pub position: i32,
    pub editable: bool,
    pub deletable: bool,
    pub searchable: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Column {
    pub fn kind(&self) -> ColumnKind {
        self.column_type.kind()
    }

    /// Key of this column in a row's cell map.
    pub fn cell_key(&self) -> String {
        self.column_id.cell_key()
    }
}

// ============================================================================
// ROWS AND RELATIONS
// ============================================================================

/// Row (item) - one entry of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub row_id: RowId,
    pub table_id: TableId,
    /// Per-table numeric identifier, assigned in creation order starting at 1.
    pub number: i64,
    pub cells: CellMap,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Row {
    /// Value stored for a column, treating `null` as unset.
    pub fn cell(&self, column_id: &ColumnId) -> Option<&serde_json::Value> {
        self.cells
            .get(&column_id.cell_key())
            .filter(|value| !value.is_null())
    }
}

/// Relation edge between two rows, optionally tagged with a linked-row column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub link_id: LinkId,
    pub source_row_id: RowId,
    pub target_row_id: RowId,
    pub column_id: Option<ColumnId>,
    pub created_at: Timestamp,
}

/// Ordering for bulk row scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum RowOrder {
    /// Creation order (row number ascending)
    #[default]
    Created,
    /// Newest first
    CreatedDesc,
    /// By the rendered value of one column; unset cells sort last
    Column { column_id: ColumnId, descending: bool },
}

// ============================================================================
// VIEWS
// ============================================================================

/// View - saved per-table lens over columns and rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub view_id: ViewId,
    pub table_id: TableId,
    pub name: String,
    pub position: i32,
    /// Set only on the view auto-created with the table.
    pub is_default: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Per-view placement and visibility of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewColumn {
    pub view_id: ViewId,
    pub column_id: ColumnId,
    pub position: i32,
    pub visible: bool,
}

/// Saved substring filter of a view on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub view_id: ViewId,
    pub column_id: ColumnId,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;
    use serde_json::json;

    #[test]
    fn test_formula_token_serde_shape() {
        let column_id = ColumnId::now_v7();
        let tokens = vec![
            FormulaToken::property(column_id),
            FormulaToken::operator("*"),
            FormulaToken::unit("2"),
        ];
        let value = serde_json::to_value(&tokens).unwrap();
        assert_eq!(
            value,
            json!([
                {"kind": "property", "column_id": column_id.to_string()},
                {"kind": "operator", "value": "*"},
                {"kind": "unit", "value": "2"},
            ])
        );
    }

    #[test]
    fn test_column_type_payload_matches_kind() {
        let target = TableId::now_v7();
        let linked = ColumnType::LinkedRow {
            target_table_id: target,
        };
        assert_eq!(linked.kind(), ColumnKind::LinkedRow);
        assert_eq!(linked.target_table_id(), Some(target));
        assert!(linked.select_options().is_none());
        assert!(linked.formula_tokens().is_none());

        let select = ColumnType::Select {
            options: vec!["A".to_string()],
        };
        assert_eq!(select.select_options(), Some(&["A".to_string()][..]));
        assert!(select.target_table_id().is_none());
    }

    #[test]
    fn test_row_cell_treats_null_as_unset() {
        let column_id = ColumnId::now_v7();
        let mut cells = CellMap::new();
        cells.insert(column_id.cell_key(), serde_json::Value::Null);
        let now = chrono::Utc::now();
        let row = Row {
            row_id: RowId::now_v7(),
            table_id: TableId::now_v7(),
            number: 1,
            cells,
            created_at: now,
            updated_at: now,
        };
        assert!(row.cell(&column_id).is_none());
    }

    #[test]
    fn test_row_order_default_is_creation() {
        assert_eq!(RowOrder::default(), RowOrder::Created);
    }
}
