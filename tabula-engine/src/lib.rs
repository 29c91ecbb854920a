//! TABULA Engine - Dynamic Table Engine
//!
//! [`Engine`] is the single entry point over a [`StorageTrait`] backend. It
//! owns no locks and no caches; every operation is a short sequence of guard
//! checks followed by one atomic storage call, so a failed request leaves no
//! partial state behind.
//!
//! Operations are grouped by component, each in its own module:
//! - `tables`: table lifecycle
//! - `registry`: column registry and formula validation
//! - `rows`: row store and cell validation
//! - `relations`: relation graph between rows
//! - `views`: view projection and saved filters
//! - `query`: search, filters, paging and projection
//!
//! The engine trusts the [`AccountId`] it is given and only checks that the
//! addressed table belongs to it. A table of another account is reported as
//! not found.

mod cells;
mod query;
mod registry;
mod relations;
mod rows;
mod tables;
mod views;

pub use cells::CellValue;
pub use query::{QueryRequest, QueryResult, ResultRow};
pub use registry::ColumnFlags;

pub use tabula_core::{
    AccountId, CellMap, Column, ColumnId, ColumnKind, ColumnKindSpec, ColumnType, EngineConfig,
    EntityType, FormulaToken, Link, Row, RowId, RowOrder, Table, TableId, TabulaError,
    TabulaResult, View, ViewColumn, ViewFilter, ViewId,
};
pub use tabula_storage::{InMemoryStorage, SqliteStorage, StorageTrait};

use std::sync::Arc;

/// Dynamic table engine over a storage backend.
#[derive(Debug)]
pub struct Engine<S: StorageTrait> {
    storage: Arc<S>,
    config: EngineConfig,
}

impl<S: StorageTrait> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
        }
    }
}

impl<S: StorageTrait> Engine<S> {
    /// Create an engine with the default configuration.
    pub fn new(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
            config: EngineConfig::default(),
        }
    }

    /// Create an engine with a validated configuration.
    pub fn with_config(storage: S, config: EngineConfig) -> TabulaResult<Self> {
        Self::from_shared(Arc::new(storage), config)
    }

    /// Create an engine over storage shared with other engines.
    pub fn from_shared(storage: Arc<S>, config: EngineConfig) -> TabulaResult<Self> {
        config.validate()?;
        Ok(Self { storage, config })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // OWNERSHIP GUARDS
    // ========================================================================

    pub(crate) fn owned_table(&self, account_id: AccountId, table_id: TableId) -> TabulaResult<Table> {
        match self.storage.table_get(table_id)? {
            Some(table) if table.account_id == account_id => Ok(table),
            _ => Err(TabulaError::not_found(EntityType::Table, table_id)),
        }
    }

    pub(crate) fn owned_column(
        &self,
        account_id: AccountId,
        column_id: ColumnId,
    ) -> TabulaResult<Column> {
        let column = self
            .storage
            .column_get(column_id)?
            .ok_or_else(|| TabulaError::not_found(EntityType::Column, column_id))?;
        self.owned_table(account_id, column.table_id)
            .map_err(|_| TabulaError::not_found(EntityType::Column, column_id))?;
        Ok(column)
    }

    pub(crate) fn owned_row(&self, account_id: AccountId, row_id: RowId) -> TabulaResult<Row> {
        let row = self
            .storage
            .row_get(row_id)?
            .ok_or_else(|| TabulaError::not_found(EntityType::Row, row_id))?;
        self.owned_table(account_id, row.table_id)
            .map_err(|_| TabulaError::not_found(EntityType::Row, row_id))?;
        Ok(row)
    }

    pub(crate) fn owned_view(&self, account_id: AccountId, view_id: ViewId) -> TabulaResult<View> {
        let view = self
            .storage
            .view_get(view_id)?
            .ok_or_else(|| TabulaError::not_found(EntityType::View, view_id))?;
        self.owned_table(account_id, view.table_id)
            .map_err(|_| TabulaError::not_found(EntityType::View, view_id))?;
        Ok(view)
    }

    /// Trim a user-supplied name and check it against the configured limits.
    pub(crate) fn clean_name(&self, field: &str, name: &str) -> TabulaResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TabulaError::required(field));
        }
        if name.chars().count() > self.config.max_name_len {
            return Err(TabulaError::invalid_value(
                field,
                format!("longer than {} characters", self.config.max_name_len),
            ));
        }
        Ok(name.to_string())
    }
}
