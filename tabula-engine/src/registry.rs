//! Column registry
//!
//! Columns are typed, positioned field definitions. Kind-specific payload
//! (select options, link target, formula tokens) lives only in the matching
//! [`ColumnType`] variant, so changing kind discards it.

use crate::Engine;
use serde_json::Value;
use std::collections::HashSet;
use tabula_core::{
    now, AccountId, Column, ColumnId, ColumnKind, ColumnKindSpec, ColumnType,
    EntityIdType, FormulaToken, TableId, TabulaError, TabulaResult, ValidationError,
};
use tabula_formula::{source_from_tokens, Formula};
use tabula_storage::{name_key, ColumnUpdate, NewColumn, StorageTrait, TypeChange};
use tracing::{debug, info};

/// Flag changes for [`Engine::update_column_flags`]. `None` leaves a flag as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    pub editable: Option<bool>,
    pub deletable: Option<bool>,
    pub searchable: Option<bool>,
}

impl<S: StorageTrait> Engine<S> {
    // ========================================================================
    // CREATE / READ
    // ========================================================================

    /// Add a column at the end of the table. Every view of the table gets a
    /// visible entry for it in the same storage operation.
    pub fn create_column(
        &self,
        account_id: AccountId,
        table_id: TableId,
        name: &str,
        spec: ColumnKindSpec,
    ) -> TabulaResult<Column> {
        self.owned_table(account_id, table_id)?;
        let name = self.clean_name("name", name)?;
        let column_id = ColumnId::now_v7();
        let column_type = self.resolve_type(account_id, table_id, column_id, spec)?;
        let kind = column_type.kind();

        let column = self.storage.column_insert(&NewColumn {
            column_id,
            table_id,
            name,
            column_type,
            editable: true,
            deletable: true,
            searchable: kind.searchable_by_default(),
            created_at: now(),
        })?;
        info!(
            table_id = %table_id,
            column_id = %column.column_id,
            kind = %kind,
            position = column.position,
            "column created"
        );
        Ok(column)
    }

    pub fn get_column(&self, account_id: AccountId, column_id: ColumnId) -> TabulaResult<Column> {
        self.owned_column(account_id, column_id)
    }

    /// Columns of a table by position.
    pub fn list_columns(&self, account_id: AccountId, table_id: TableId) -> TabulaResult<Vec<Column>> {
        self.owned_table(account_id, table_id)?;
        self.storage.column_list_by_table(table_id)
    }

    /// Allowed values of a select column. Other kinds have none.
    pub fn allowed_values(
        &self,
        account_id: AccountId,
        column_id: ColumnId,
    ) -> TabulaResult<Vec<String>> {
        let column = self.owned_column(account_id, column_id)?;
        Ok(column
            .column_type
            .select_options()
            .map(<[String]>::to_vec)
            .unwrap_or_default())
    }

    /// Every non-null value stored under the column, deduplicated, in
    /// first-seen order.
    pub fn distinct_values(
        &self,
        account_id: AccountId,
        column_id: ColumnId,
    ) -> TabulaResult<Vec<Value>> {
        let column = self.owned_column(account_id, column_id)?;
        let mut values: Vec<Value> = Vec::new();
        for row in self.storage.row_list_by_table(column.table_id)? {
            if let Some(value) = row.cell(&column_id) {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        debug!(column_id = %column_id, values = values.len(), "scanned distinct values");
        Ok(values)
    }

    // ========================================================================
    // UPDATE
    // ========================================================================

    pub fn rename_column(
        &self,
        account_id: AccountId,
        column_id: ColumnId,
        name: &str,
    ) -> TabulaResult<Column> {
        self.owned_column(account_id, column_id)?;
        let name = self.clean_name("name", name)?;
        let update = ColumnUpdate {
            name: Some(name),
            ..ColumnUpdate::default()
        };
        self.storage.column_update(column_id, update, now())
    }

    pub fn update_column_flags(
        &self,
        account_id: AccountId,
        column_id: ColumnId,
        flags: ColumnFlags,
    ) -> TabulaResult<Column> {
        self.owned_column(account_id, column_id)?;
        let update = ColumnUpdate {
            name: None,
            editable: flags.editable,
            deletable: flags.deletable,
            searchable: flags.searchable,
        };
        self.storage.column_update(column_id, update, now())
    }

    /// Change a column's kind.
    ///
    /// Converting into select seeds the options from the rendered text of
    /// every distinct stored value, read in the same storage operation as the
    /// swap. Converting away from linked-row, or
    /// retargeting it, drops the edges tagged with the column. Stored cell
    /// values are kept either way.
    pub fn change_column_kind(
        &self,
        account_id: AccountId,
        column_id: ColumnId,
        spec: ColumnKindSpec,
    ) -> TabulaResult<Column> {
        let column = self.owned_column(account_id, column_id)?;
        let from = column.kind();
        let to = spec.kind();
        if from == to && !matches!(to, ColumnKind::Formula | ColumnKind::LinkedRow) {
            return Err(TabulaError::Validation(ValidationError::InvalidKindTransition {
                from,
                to,
                reason: "column already has this kind".to_string(),
            }));
        }

        let column_type = self.resolve_type(account_id, column.table_id, column_id, spec)?;
        let change = TypeChange {
            drop_tagged_links: from == ColumnKind::LinkedRow
                && column.column_type.target_table_id() != column_type.target_table_id(),
            seed_from_cells: to == ColumnKind::Select,
        };

        let updated = self
            .storage
            .column_replace_type(column_id, &column_type, change, now())?;
        info!(
            column_id = %column_id,
            from = %from,
            to = %to,
            dropped_links = change.drop_tagged_links,
            "column kind changed"
        );
        Ok(updated)
    }

    /// Delete a column with its cell values, view entries, filters, allowed
    /// values and tagged edges.
    pub fn delete_column(&self, account_id: AccountId, column_id: ColumnId) -> TabulaResult<()> {
        let column = self.owned_column(account_id, column_id)?;
        if !column.deletable {
            return Err(TabulaError::Validation(ValidationError::ConstraintViolation {
                constraint: "deletable".to_string(),
                reason: format!("column {:?} cannot be deleted", column.name),
            }));
        }
        self.storage.column_delete(column_id)?;
        info!(table_id = %column.table_id, column_id = %column_id, "column deleted");
        Ok(())
    }

    // ========================================================================
    // FORMULAS
    // ========================================================================

    /// Turn formula source text such as `[Size] * 2` into stored tokens,
    /// resolving names case-insensitively against the table's columns.
    pub fn compile_formula_source(
        &self,
        account_id: AccountId,
        table_id: TableId,
        source: &str,
    ) -> TabulaResult<Vec<FormulaToken>> {
        let columns = self.list_columns(account_id, table_id)?;
        let (_, tokens) = Formula::from_source(source, |name| {
            let key = name_key(name);
            columns
                .iter()
                .find(|c| name_key(&c.name) == key)
                .map(|c| c.column_id)
        })?;
        Ok(tokens)
    }

    /// Render a formula column's tokens back to source text.
    pub fn formula_source(&self, account_id: AccountId, column_id: ColumnId) -> TabulaResult<String> {
        let column = self.owned_column(account_id, column_id)?;
        let tokens = column.column_type.formula_tokens().ok_or_else(|| {
            TabulaError::invalid_value("column_type", format!("{} column has no formula", column.kind()))
        })?;
        let columns = self.storage.column_list_by_table(column.table_id)?;
        Ok(source_from_tokens(tokens, |id| {
            columns
                .iter()
                .find(|c| c.column_id == *id)
                .map(|c| c.name.clone())
        }))
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Build a validated column type for `column_id` on `table_id`.
    fn resolve_type(
        &self,
        account_id: AccountId,
        table_id: TableId,
        column_id: ColumnId,
        spec: ColumnKindSpec,
    ) -> TabulaResult<ColumnType> {
        Ok(match spec {
            ColumnKindSpec::Text => ColumnType::Text,
            ColumnKindSpec::Number => ColumnType::Number,
            ColumnKindSpec::Date => ColumnType::Date,
            ColumnKindSpec::Select => ColumnType::Select {
                options: Vec::new(),
            },
            ColumnKindSpec::LinkedRow { target_table_id } => {
                let target = target_table_id.ok_or_else(|| TabulaError::required("target_table_id"))?;
                self.owned_table(account_id, target).map_err(|_| {
                    TabulaError::invalid_value(
                        "target_table_id",
                        format!("table {} is not available", target),
                    )
                })?;
                ColumnType::LinkedRow {
                    target_table_id: target,
                }
            }
            ColumnKindSpec::Formula { tokens } => {
                self.validate_formula(table_id, column_id, &tokens)?;
                ColumnType::Formula { tokens }
            }
        })
    }

    /// A formula must compile, reference only columns of its own table and
    /// never reference itself.
    fn validate_formula(
        &self,
        table_id: TableId,
        column_id: ColumnId,
        tokens: &[FormulaToken],
    ) -> TabulaResult<()> {
        if tokens.is_empty() {
            return Err(TabulaError::required("formula"));
        }
        let formula = Formula::compile(tokens)
            .map_err(|e| TabulaError::invalid_value("formula", e.to_string()))?;

        let siblings: HashSet<ColumnId> = self
            .storage
            .column_list_by_table(table_id)?
            .into_iter()
            .map(|c| c.column_id)
            .collect();
        for referenced in formula.references() {
            if *referenced == column_id {
                return Err(TabulaError::invalid_value(
                    "formula",
                    "a formula cannot reference its own column",
                ));
            }
            if !siblings.contains(referenced) {
                return Err(TabulaError::invalid_value(
                    "formula",
                    format!("column {} is not part of this table", referenced),
                ));
            }
        }
        Ok(())
    }
}
