//! Row decoding and error mapping for the SQLite backend

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::ffi;
use std::str::FromStr;
use tabula_core::{
    Column, ColumnKind, ColumnType, EntityType, FormulaToken, Link, Row, StorageError, Table,
    TabulaError, TabulaResult, Timestamp, View, ViewColumn, ViewFilter,
};

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Map rusqlite results into the TABULA error taxonomy.
pub(crate) trait SqlResultExt<T> {
    fn sql(self) -> TabulaResult<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn sql(self) -> TabulaResult<T> {
        self.map_err(TabulaError::backend)
    }
}

/// Whether the error is a UNIQUE or PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || code.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

pub(crate) fn corrupt(entity_type: EntityType, id: &str, reason: impl ToString) -> TabulaError {
    TabulaError::Storage(StorageError::Corrupt {
        entity_type,
        id: id.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// SCALARS
// ============================================================================

pub(crate) fn encode_ts(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(entity_type: EntityType, id: &str, raw: &str) -> TabulaResult<Timestamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| corrupt(entity_type, id, format!("bad timestamp {:?}: {}", raw, e)))
}

fn decode_id<T>(entity_type: EntityType, id: &str, raw: &str) -> TabulaResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| corrupt(entity_type, id, format!("bad id {:?}: {}", raw, e)))
}

/// JSON path addressing one top-level key of the cell map.
pub(crate) fn cell_path(key: &str) -> TabulaResult<String> {
    if key.is_empty() || key.contains('"') || key.contains('\\') {
        return Err(TabulaError::invalid_value(
            "cell key",
            format!("{:?} cannot be addressed", key),
        ));
    }
    Ok(format!("$.\"{}\"", key))
}

// ============================================================================
// RAW RECORDS
// ============================================================================

pub(crate) struct RawTable {
    pub table_id: String,
    pub account_id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl RawTable {
    pub const COLUMNS: &'static str = "table_id, account_id, name, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            table_id: row.get(0)?,
            account_id: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    pub fn decode(self) -> TabulaResult<Table> {
        let id = self.table_id.as_str();
        let e = EntityType::Table;
        Ok(Table {
            table_id: decode_id(e, id, id)?,
            account_id: decode_id(e, id, &self.account_id)?,
            created_at: decode_ts(e, id, &self.created_at)?,
            updated_at: decode_ts(e, id, &self.updated_at)?,
            name: self.name,
        })
    }
}

pub(crate) struct RawColumn {
    pub column_id: String,
    pub table_id: String,
    pub name: String,
    pub kind: String,
    pub target_table_id: Option<String>,
    pub formula_json: Option<String>,
    pub position: i32,
    pub editable: bool,
    pub deletable: bool,
    pub searchable: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl RawColumn {
    pub const COLUMNS: &'static str = "column_id, table_id, name, kind, target_table_id, \
        formula_json, position, editable, deletable, searchable, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            column_id: row.get(0)?,
            table_id: row.get(1)?,
            name: row.get(2)?,
            kind: row.get(3)?,
            target_table_id: row.get(4)?,
            formula_json: row.get(5)?,
            position: row.get(6)?,
            editable: row.get(7)?,
            deletable: row.get(8)?,
            searchable: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    pub fn is_select(&self) -> bool {
        ColumnKind::from_db_str(&self.kind) == Ok(ColumnKind::Select)
    }

    /// Decode with the select options loaded separately from `allowed_values`.
    pub fn decode(self, options: Vec<String>) -> TabulaResult<Column> {
        let id = self.column_id.as_str();
        let e = EntityType::Column;
        let kind = ColumnKind::from_db_str(&self.kind).map_err(|err| corrupt(e, id, err))?;

        let column_type = match kind {
            ColumnKind::Text => ColumnType::Text,
            ColumnKind::Number => ColumnType::Number,
            ColumnKind::Date => ColumnType::Date,
            ColumnKind::Select => ColumnType::Select { options },
            ColumnKind::LinkedRow => {
                let raw = self
                    .target_table_id
                    .as_deref()
                    .ok_or_else(|| corrupt(e, id, "linked-row column without target table"))?;
                ColumnType::LinkedRow {
                    target_table_id: decode_id(e, id, raw)?,
                }
            }
            ColumnKind::Formula => {
                let raw = self.formula_json.as_deref().unwrap_or("[]");
                let tokens: Vec<FormulaToken> = serde_json::from_str(raw)
                    .map_err(|err| corrupt(e, id, format!("bad formula: {}", err)))?;
                ColumnType::Formula { tokens }
            }
        };

        Ok(Column {
            column_id: decode_id(e, id, id)?,
            table_id: decode_id(e, id, &self.table_id)?,
            column_type,
            position: self.position,
            editable: self.editable,
            deletable: self.deletable,
            searchable: self.searchable,
            created_at: decode_ts(e, id, &self.created_at)?,
            updated_at: decode_ts(e, id, &self.updated_at)?,
            name: self.name,
        })
    }
}

/// Split a column type into its `kind`, `target_table_id` and `formula_json`
/// columns.
pub(crate) fn encode_column_type(
    column_type: &ColumnType,
) -> TabulaResult<(&'static str, Option<String>, Option<String>)> {
    let kind = column_type.kind().as_db_str();
    let target = column_type.target_table_id().map(|t| t.to_string());
    let formula = match column_type.formula_tokens() {
        Some(tokens) => Some(serde_json::to_string(tokens).map_err(TabulaError::backend)?),
        None => None,
    };
    Ok((kind, target, formula))
}

pub(crate) struct RawRow {
    pub row_id: String,
    pub table_id: String,
    pub number: i64,
    pub cells: String,
    pub created_at: String,
    pub updated_at: String,
}

impl RawRow {
    pub const COLUMNS: &'static str = "row_id, table_id, number, cells, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            table_id: row.get(1)?,
            number: row.get(2)?,
            cells: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    pub fn decode(self) -> TabulaResult<Row> {
        let id = self.row_id.as_str();
        let e = EntityType::Row;
        Ok(Row {
            row_id: decode_id(e, id, id)?,
            table_id: decode_id(e, id, &self.table_id)?,
            number: self.number,
            cells: serde_json::from_str(&self.cells)
                .map_err(|err| corrupt(e, id, format!("bad cells: {}", err)))?,
            created_at: decode_ts(e, id, &self.created_at)?,
            updated_at: decode_ts(e, id, &self.updated_at)?,
        })
    }
}

pub(crate) struct RawLink {
    pub link_id: String,
    pub source_row_id: String,
    pub target_row_id: String,
    pub column_id: Option<String>,
    pub created_at: String,
}

impl RawLink {
    pub const COLUMNS: &'static str = "link_id, source_row_id, target_row_id, column_id, created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            link_id: row.get(0)?,
            source_row_id: row.get(1)?,
            target_row_id: row.get(2)?,
            column_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    pub fn decode(self) -> TabulaResult<Link> {
        let id = self.link_id.as_str();
        let e = EntityType::Link;
        Ok(Link {
            link_id: decode_id(e, id, id)?,
            source_row_id: decode_id(e, id, &self.source_row_id)?,
            target_row_id: decode_id(e, id, &self.target_row_id)?,
            column_id: match self.column_id.as_deref() {
                Some(raw) => Some(decode_id(e, id, raw)?),
                None => None,
            },
            created_at: decode_ts(e, id, &self.created_at)?,
        })
    }
}

pub(crate) struct RawView {
    pub view_id: String,
    pub table_id: String,
    pub name: String,
    pub position: i32,
    pub is_default: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl RawView {
    pub const COLUMNS: &'static str =
        "view_id, table_id, name, position, is_default, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            view_id: row.get(0)?,
            table_id: row.get(1)?,
            name: row.get(2)?,
            position: row.get(3)?,
            is_default: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn decode(self) -> TabulaResult<View> {
        let id = self.view_id.as_str();
        let e = EntityType::View;
        Ok(View {
            view_id: decode_id(e, id, id)?,
            table_id: decode_id(e, id, &self.table_id)?,
            position: self.position,
            is_default: self.is_default,
            created_at: decode_ts(e, id, &self.created_at)?,
            updated_at: decode_ts(e, id, &self.updated_at)?,
            name: self.name,
        })
    }
}

pub(crate) struct RawViewColumn {
    pub view_id: String,
    pub column_id: String,
    pub position: i32,
    pub visible: bool,
}

impl RawViewColumn {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            view_id: row.get(0)?,
            column_id: row.get(1)?,
            position: row.get(2)?,
            visible: row.get(3)?,
        })
    }

    pub fn decode(self) -> TabulaResult<ViewColumn> {
        let id = format!("{}/{}", self.view_id, self.column_id);
        let e = EntityType::ViewColumn;
        Ok(ViewColumn {
            view_id: decode_id(e, &id, &self.view_id)?,
            column_id: decode_id(e, &id, &self.column_id)?,
            position: self.position,
            visible: self.visible,
        })
    }
}

pub(crate) struct RawFilter {
    pub view_id: String,
    pub column_id: String,
    pub value: String,
}

impl RawFilter {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            view_id: row.get(0)?,
            column_id: row.get(1)?,
            value: row.get(2)?,
        })
    }

    pub fn decode(self) -> TabulaResult<ViewFilter> {
        let id = format!("{}/{}", self.view_id, self.column_id);
        let e = EntityType::Filter;
        Ok(ViewFilter {
            view_id: decode_id(e, &id, &self.view_id)?,
            column_id: decode_id(e, &id, &self.column_id)?,
            value: self.value,
        })
    }
}
