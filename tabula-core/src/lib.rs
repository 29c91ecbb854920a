//! TABULA Core - Entity Types
//!
//! Pure data structures for the dynamic table engine: typed ids, entities,
//! enums, the error taxonomy, configuration and cell rendering. All other
//! crates depend on this one; it holds no storage or engine logic.

mod config;
mod entities;
mod enums;
mod error;
mod filter;
mod identity;

pub use config::EngineConfig;
pub use entities::{
    CellMap, Column, ColumnKindSpec, ColumnType, FormulaToken, Link, Row, RowOrder, Table, View,
    ViewColumn, ViewFilter,
};
pub use enums::{ColumnKind, ColumnKindParseError, EntityType};
pub use error::{
    ConfigError, FormulaError, StorageError, TabulaError, TabulaResult, ValidationError,
};
pub use filter::{
    format_number, number_to_json, numeric_value, render_text, CellFilter, SearchTerm,
};
pub use identity::{
    AccountId, ColumnId, EntityIdType, LinkId, RowId, TableId, Timestamp, ViewId,
};

/// Current time as a [`Timestamp`].
pub fn now() -> Timestamp {
    chrono::Utc::now()
}
