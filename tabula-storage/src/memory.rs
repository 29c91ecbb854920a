//! In-memory storage backend
//!
//! All collections live behind a single `RwLock`, so every trait method is
//! atomic with respect to every other. Lock poisoning surfaces as
//! [`StorageError::LockPoisoned`].

use crate::{
    kind_changed, name_key, seeded_type, CellWrite, ColumnUpdate, NewColumn, NewRow, NewView,
    StorageTrait, TypeChange,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tabula_core::{
    AccountId, Column, ColumnId, ColumnType, EntityType, Link, Row, RowId, StorageError, Table,
    TableId, TabulaError, TabulaResult, Timestamp, ValidationError, View, ViewColumn, ViewFilter,
    ViewId,
};

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableId, Table>,
    table_order: Vec<TableId>,
    columns: HashMap<ColumnId, Column>,
    rows: HashMap<RowId, Row>,
    row_counters: HashMap<TableId, i64>,
    links: Vec<Link>,
    views: HashMap<ViewId, View>,
    view_columns: HashMap<(ViewId, ColumnId), ViewColumn>,
    filters: HashMap<(ViewId, ColumnId), ViewFilter>,
}

impl State {
    fn require_table(&self, id: TableId) -> TabulaResult<&Table> {
        self.tables
            .get(&id)
            .ok_or_else(|| TabulaError::not_found(EntityType::Table, id))
    }

    fn table_name_taken(&self, account_id: AccountId, name: &str, except: Option<TableId>) -> bool {
        let key = name_key(name);
        self.tables.values().any(|t| {
            t.account_id == account_id && Some(t.table_id) != except && name_key(&t.name) == key
        })
    }

    fn view_name_taken(&self, table_id: TableId, name: &str, except: Option<ViewId>) -> bool {
        let key = name_key(name);
        self.views.values().any(|v| {
            v.table_id == table_id && Some(v.view_id) != except && name_key(&v.name) == key
        })
    }

    fn columns_of(&self, table_id: TableId) -> Vec<&Column> {
        let mut columns: Vec<&Column> = self
            .columns
            .values()
            .filter(|c| c.table_id == table_id)
            .collect();
        columns.sort_by_key(|c| (c.position, c.column_id));
        columns
    }

    fn rows_of(&self, table_id: TableId) -> Vec<&Row> {
        let mut rows: Vec<&Row> = self
            .rows
            .values()
            .filter(|r| r.table_id == table_id)
            .collect();
        rows.sort_by_key(|r| r.number);
        rows
    }

    fn views_of(&self, table_id: TableId) -> Vec<&View> {
        let mut views: Vec<&View> = self
            .views
            .values()
            .filter(|v| v.table_id == table_id)
            .collect();
        views.sort_by_key(|v| (v.position, v.view_id));
        views
    }

    fn next_column_position(&self, table_id: TableId) -> i32 {
        self.columns
            .values()
            .filter(|c| c.table_id == table_id)
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0)
    }

    fn next_view_position(&self, table_id: TableId) -> i32 {
        self.views
            .values()
            .filter(|v| v.table_id == table_id)
            .map(|v| v.position + 1)
            .max()
            .unwrap_or(0)
    }

    fn next_entry_position(&self, view_id: ViewId) -> i32 {
        self.view_columns
            .values()
            .filter(|e| e.view_id == view_id)
            .map(|e| e.position + 1)
            .max()
            .unwrap_or(0)
    }

    fn remove_view(&mut self, view_id: ViewId) {
        self.views.remove(&view_id);
        self.view_columns.retain(|(v, _), _| *v != view_id);
        self.filters.retain(|(v, _), _| *v != view_id);
    }

    fn remove_links_touching(&mut self, rows: &HashSet<RowId>) {
        self.links
            .retain(|l| !rows.contains(&l.source_row_id) && !rows.contains(&l.target_row_id));
    }
}

/// In-memory storage for tests and embedded use.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_count(&self) -> TabulaResult<usize> {
        Ok(self.read()?.tables.len())
    }

    pub fn link_count(&self) -> TabulaResult<usize> {
        Ok(self.read()?.links.len())
    }

    fn read(&self) -> TabulaResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| TabulaError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> TabulaResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| TabulaError::Storage(StorageError::LockPoisoned))
    }
}

fn duplicate_name(entity_type: EntityType, name: &str) -> TabulaError {
    TabulaError::Validation(ValidationError::DuplicateName {
        entity_type,
        name: name.to_string(),
    })
}

fn already_exists(constraint: &str) -> TabulaError {
    TabulaError::Validation(ValidationError::ConstraintViolation {
        constraint: constraint.to_string(),
        reason: "already exists".to_string(),
    })
}

impl StorageTrait for InMemoryStorage {
    // === Table Operations ===

    fn table_insert(&self, table: &Table, default_view: &NewView) -> TabulaResult<View> {
        let mut state = self.write()?;
        if state.tables.contains_key(&table.table_id) {
            return Err(already_exists("tables.table_id"));
        }
        if state.table_name_taken(table.account_id, &table.name, None) {
            return Err(duplicate_name(EntityType::Table, &table.name));
        }

        let view = View {
            view_id: default_view.view_id,
            table_id: table.table_id,
            name: default_view.name.clone(),
            position: 0,
            is_default: default_view.is_default,
            created_at: default_view.created_at,
            updated_at: default_view.created_at,
        };
        state.tables.insert(table.table_id, table.clone());
        state.table_order.push(table.table_id);
        state.views.insert(view.view_id, view.clone());
        Ok(view)
    }

    fn table_get(&self, id: TableId) -> TabulaResult<Option<Table>> {
        Ok(self.read()?.tables.get(&id).cloned())
    }

    fn table_list_by_account(&self, account_id: AccountId) -> TabulaResult<Vec<Table>> {
        let state = self.read()?;
        Ok(state
            .table_order
            .iter()
            .filter_map(|id| state.tables.get(id))
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    fn table_rename(&self, id: TableId, name: &str, updated_at: Timestamp) -> TabulaResult<()> {
        let mut state = self.write()?;
        let account_id = state.require_table(id)?.account_id;
        if state.table_name_taken(account_id, name, Some(id)) {
            return Err(duplicate_name(EntityType::Table, name));
        }
        if let Some(table) = state.tables.get_mut(&id) {
            table.name = name.to_string();
            table.updated_at = updated_at;
        }
        Ok(())
    }

    fn table_delete(&self, id: TableId) -> TabulaResult<()> {
        let mut state = self.write()?;
        state.require_table(id)?;

        let row_ids: HashSet<RowId> = state
            .rows
            .values()
            .filter(|r| r.table_id == id)
            .map(|r| r.row_id)
            .collect();
        state.remove_links_touching(&row_ids);
        state.rows.retain(|_, r| r.table_id != id);

        let column_ids: HashSet<ColumnId> = state
            .columns
            .values()
            .filter(|c| c.table_id == id)
            .map(|c| c.column_id)
            .collect();
        state.columns.retain(|_, c| c.table_id != id);
        // Links from other tables tagged with one of these columns cannot
        // exist, but tags must never dangle.
        state
            .links
            .retain(|l| l.column_id.map_or(true, |c| !column_ids.contains(&c)));

        let view_ids: Vec<ViewId> = state.views_of(id).iter().map(|v| v.view_id).collect();
        for view_id in view_ids {
            state.remove_view(view_id);
        }

        state.row_counters.remove(&id);
        state.table_order.retain(|t| *t != id);
        state.tables.remove(&id);
        Ok(())
    }

    // === Column Operations ===

    fn column_insert(&self, new: &NewColumn) -> TabulaResult<Column> {
        let mut state = self.write()?;
        state.require_table(new.table_id)?;
        if state.columns.contains_key(&new.column_id) {
            return Err(already_exists("columns.column_id"));
        }

        let column = Column {
            column_id: new.column_id,
            table_id: new.table_id,
            name: new.name.clone(),
            column_type: new.column_type.clone(),
            position: state.next_column_position(new.table_id),
            editable: new.editable,
            deletable: new.deletable,
            searchable: new.searchable,
            created_at: new.created_at,
            updated_at: new.created_at,
        };

        let view_ids: Vec<ViewId> = state
            .views_of(new.table_id)
            .iter()
            .map(|v| v.view_id)
            .collect();
        for view_id in view_ids {
            let entry = ViewColumn {
                view_id,
                column_id: column.column_id,
                position: state.next_entry_position(view_id),
                visible: true,
            };
            state.view_columns.insert((view_id, column.column_id), entry);
        }

        state.columns.insert(column.column_id, column.clone());
        Ok(column)
    }

    fn column_get(&self, id: ColumnId) -> TabulaResult<Option<Column>> {
        Ok(self.read()?.columns.get(&id).cloned())
    }

    fn column_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<Column>> {
        let state = self.read()?;
        Ok(state.columns_of(table_id).into_iter().cloned().collect())
    }

    fn column_update(
        &self,
        id: ColumnId,
        update: ColumnUpdate,
        updated_at: Timestamp,
    ) -> TabulaResult<Column> {
        let mut state = self.write()?;
        let column = state
            .columns
            .get_mut(&id)
            .ok_or_else(|| TabulaError::not_found(EntityType::Column, id))?;

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
        Ok(column.clone())
    }

    fn column_replace_type(
        &self,
        id: ColumnId,
        column_type: &ColumnType,
        change: TypeChange,
        updated_at: Timestamp,
    ) -> TabulaResult<Column> {
        let mut state = self.write()?;
        let table_id = state
            .columns
            .get(&id)
            .map(|c| c.table_id)
            .ok_or_else(|| TabulaError::not_found(EntityType::Column, id))?;
        let column_type =
            seeded_type(column_type, change, &id.cell_key(), state.rows_of(table_id));

        let column = state
            .columns
            .get_mut(&id)
            .ok_or_else(|| TabulaError::not_found(EntityType::Column, id))?;
        column.column_type = column_type;
        column.updated_at = updated_at;
        let column = column.clone();

        if change.drop_tagged_links {
            state.links.retain(|l| l.column_id != Some(id));
        }
        Ok(column)
    }

    fn column_delete(&self, id: ColumnId) -> TabulaResult<()> {
        let mut state = self.write()?;
        let column = state
            .columns
            .remove(&id)
            .ok_or_else(|| TabulaError::not_found(EntityType::Column, id))?;

        let key = id.cell_key();
        for row in state.rows.values_mut() {
            if row.table_id == column.table_id {
                row.cells.remove(&key);
            }
        }
        state.view_columns.retain(|(_, c), _| *c != id);
        state.filters.retain(|(_, c), _| *c != id);
        state.links.retain(|l| l.column_id != Some(id));
        Ok(())
    }

    // === Row Operations ===

    fn row_insert(&self, new: &NewRow) -> TabulaResult<Row> {
        let mut state = self.write()?;
        state.require_table(new.table_id)?;
        if state.rows.contains_key(&new.row_id) {
            return Err(already_exists("rows.row_id"));
        }

        let counter = state.row_counters.entry(new.table_id).or_insert(0);
        *counter += 1;
        let row = Row {
            row_id: new.row_id,
            table_id: new.table_id,
            number: *counter,
            cells: Default::default(),
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        state.rows.insert(row.row_id, row.clone());
        Ok(row)
    }

    fn row_get(&self, id: RowId) -> TabulaResult<Option<Row>> {
        Ok(self.read()?.rows.get(&id).cloned())
    }

    fn row_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<Row>> {
        let state = self.read()?;
        Ok(state.rows_of(table_id).into_iter().cloned().collect())
    }

    fn row_set_cell(&self, write: &CellWrite<'_>) -> TabulaResult<bool> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let row = state
            .rows
            .get_mut(&write.row_id)
            .ok_or_else(|| TabulaError::not_found(EntityType::Row, write.row_id))?;
        let column = state
            .columns
            .get_mut(&write.column_id)
            .ok_or_else(|| TabulaError::not_found(EntityType::Column, write.column_id))?;
        if column.kind() != write.kind {
            return Err(kind_changed(column, write.kind));
        }

        let mut added = false;
        if let (ColumnType::Select { options }, Some(Value::String(text))) =
            (&mut column.column_type, write.value)
        {
            if !options.contains(text) {
                options.push(text.clone());
                added = true;
            }
        }

        let key = write.column_id.cell_key();
        match write.value {
            Some(value) => {
                row.cells.insert(key, value.clone());
            }
            None => {
                row.cells.remove(&key);
            }
        }
        row.updated_at = write.updated_at;
        Ok(added)
    }

    fn row_delete(&self, id: RowId) -> TabulaResult<()> {
        let mut state = self.write()?;
        if state.rows.remove(&id).is_none() {
            return Err(TabulaError::not_found(EntityType::Row, id));
        }
        state.remove_links_touching(&HashSet::from([id]));
        Ok(())
    }

    fn row_find_by_cell(
        &self,
        table_id: TableId,
        key: &str,
        value: &Value,
    ) -> TabulaResult<Vec<Row>> {
        let state = self.read()?;
        let mut rows: Vec<Row> = state
            .rows
            .values()
            .filter(|r| r.table_id == table_id && r.cells.get(key) == Some(value))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.number);
        Ok(rows)
    }

    // === Link Operations ===

    fn link_insert(&self, link: &Link) -> TabulaResult<()> {
        let mut state = self.write()?;
        for row_id in [link.source_row_id, link.target_row_id] {
            if !state.rows.contains_key(&row_id) {
                return Err(TabulaError::not_found(EntityType::Row, row_id));
            }
        }
        if state.links.iter().any(|l| {
            l.source_row_id == link.source_row_id && l.target_row_id == link.target_row_id
        }) {
            return Err(TabulaError::DuplicateEdge {
                source_row: link.source_row_id,
                target_row: link.target_row_id,
            });
        }
        state.links.push(link.clone());
        Ok(())
    }

    fn link_delete(&self, source: RowId, target: RowId) -> TabulaResult<()> {
        let mut state = self.write()?;
        let index = state
            .links
            .iter()
            .position(|l| l.source_row_id == source && l.target_row_id == target)
            .ok_or_else(|| {
                TabulaError::not_found(EntityType::Link, format!("{} -> {}", source, target))
            })?;
        state.links.remove(index);
        Ok(())
    }

    fn link_outgoing(&self, source: RowId, column_id: Option<ColumnId>) -> TabulaResult<Vec<Link>> {
        let state = self.read()?;
        Ok(state
            .links
            .iter()
            .filter(|l| l.source_row_id == source)
            .filter(|l| column_id.map_or(true, |c| l.column_id == Some(c)))
            .cloned()
            .collect())
    }

    fn link_incoming(&self, target: RowId, column_id: Option<ColumnId>) -> TabulaResult<Vec<Link>> {
        let state = self.read()?;
        Ok(state
            .links
            .iter()
            .filter(|l| l.target_row_id == target)
            .filter(|l| column_id.map_or(true, |c| l.column_id == Some(c)))
            .cloned()
            .collect())
    }

    // === View Operations ===

    fn view_insert(&self, new: &NewView) -> TabulaResult<View> {
        let mut state = self.write()?;
        state.require_table(new.table_id)?;
        if state.views.contains_key(&new.view_id) {
            return Err(already_exists("views.view_id"));
        }
        if state.view_name_taken(new.table_id, &new.name, None) {
            return Err(duplicate_name(EntityType::View, &new.name));
        }

        let view = View {
            view_id: new.view_id,
            table_id: new.table_id,
            name: new.name.clone(),
            position: state.next_view_position(new.table_id),
            is_default: new.is_default,
            created_at: new.created_at,
            updated_at: new.created_at,
        };

        let entries: Vec<ViewColumn> = state
            .columns_of(new.table_id)
            .iter()
            .map(|c| ViewColumn {
                view_id: view.view_id,
                column_id: c.column_id,
                position: c.position,
                visible: true,
            })
            .collect();
        for entry in entries {
            state
                .view_columns
                .insert((entry.view_id, entry.column_id), entry);
        }

        state.views.insert(view.view_id, view.clone());
        Ok(view)
    }

    fn view_get(&self, id: ViewId) -> TabulaResult<Option<View>> {
        Ok(self.read()?.views.get(&id).cloned())
    }

    fn view_list_by_table(&self, table_id: TableId) -> TabulaResult<Vec<View>> {
        let state = self.read()?;
        Ok(state.views_of(table_id).into_iter().cloned().collect())
    }

    fn view_rename(&self, id: ViewId, name: &str, updated_at: Timestamp) -> TabulaResult<()> {
        let mut state = self.write()?;
        let table_id = state
            .views
            .get(&id)
            .map(|v| v.table_id)
            .ok_or_else(|| TabulaError::not_found(EntityType::View, id))?;
        if state.view_name_taken(table_id, name, Some(id)) {
            return Err(duplicate_name(EntityType::View, name));
        }
        if let Some(view) = state.views.get_mut(&id) {
            view.name = name.to_string();
            view.updated_at = updated_at;
        }
        Ok(())
    }

    fn view_set_positions(
        &self,
        table_id: TableId,
        positions: &[(ViewId, i32)],
    ) -> TabulaResult<()> {
        let mut state = self.write()?;
        for (view_id, _) in positions {
            match state.views.get(view_id) {
                Some(view) if view.table_id == table_id => {}
                _ => return Err(TabulaError::not_found(EntityType::View, view_id)),
            }
        }
        for (view_id, position) in positions {
            if let Some(view) = state.views.get_mut(view_id) {
                view.position = *position;
            }
        }
        Ok(())
    }

    fn view_delete(&self, id: ViewId) -> TabulaResult<()> {
        let mut state = self.write()?;
        let view = state
            .views
            .get(&id)
            .ok_or_else(|| TabulaError::not_found(EntityType::View, id))?;
        if view.is_default {
            return Err(TabulaError::invalid_value(
                "view",
                "the default view cannot be deleted",
            ));
        }
        let table_id = view.table_id;
        if state.views_of(table_id).len() <= 1 {
            return Err(TabulaError::invalid_value(
                "view",
                "the last view of a table cannot be deleted",
            ));
        }
        state.remove_view(id);
        Ok(())
    }

    // === View Column Operations ===

    fn view_column_list(&self, view_id: ViewId) -> TabulaResult<Vec<ViewColumn>> {
        let state = self.read()?;
        let mut entries: Vec<ViewColumn> = state
            .view_columns
            .values()
            .filter(|e| e.view_id == view_id)
            .copied()
            .collect();
        entries.sort_by_key(|e| (e.position, e.column_id));
        Ok(entries)
    }

    fn view_column_set_positions(
        &self,
        view_id: ViewId,
        positions: &[(ColumnId, i32)],
    ) -> TabulaResult<()> {
        let mut state = self.write()?;
        for (column_id, _) in positions {
            if !state.view_columns.contains_key(&(view_id, *column_id)) {
                return Err(TabulaError::not_found(
                    EntityType::ViewColumn,
                    format!("{}/{}", view_id, column_id),
                ));
            }
        }
        for (column_id, position) in positions {
            if let Some(entry) = state.view_columns.get_mut(&(view_id, *column_id)) {
                entry.position = *position;
            }
        }
        Ok(())
    }

    fn view_column_set_visible(
        &self,
        view_id: ViewId,
        column_id: ColumnId,
        visible: bool,
    ) -> TabulaResult<()> {
        let mut state = self.write()?;
        let entry = state
            .view_columns
            .get_mut(&(view_id, column_id))
            .ok_or_else(|| {
                TabulaError::not_found(EntityType::ViewColumn, format!("{}/{}", view_id, column_id))
            })?;
        entry.visible = visible;
        Ok(())
    }

    // === Filter Operations ===

    fn filter_set(&self, filter: &ViewFilter) -> TabulaResult<()> {
        let mut state = self.write()?;
        if !state.views.contains_key(&filter.view_id) {
            return Err(TabulaError::not_found(EntityType::View, filter.view_id));
        }
        if !state.columns.contains_key(&filter.column_id) {
            return Err(TabulaError::not_found(EntityType::Column, filter.column_id));
        }
        state
            .filters
            .insert((filter.view_id, filter.column_id), filter.clone());
        Ok(())
    }

    fn filter_delete(&self, view_id: ViewId, column_id: ColumnId) -> TabulaResult<bool> {
        Ok(self.write()?.filters.remove(&(view_id, column_id)).is_some())
    }

    fn filter_list(&self, view_id: ViewId) -> TabulaResult<Vec<ViewFilter>> {
        let state = self.read()?;
        let mut filters: Vec<ViewFilter> = state
            .filters
            .values()
            .filter(|f| f.view_id == view_id)
            .cloned()
            .collect();
        filters.sort_by_key(|f| {
            let position = state.columns.get(&f.column_id).map(|c| c.position);
            (position, f.column_id)
        });
        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_core::{now, EntityIdType};

    fn setup() -> (InMemoryStorage, Table, View) {
        let storage = InMemoryStorage::new();
        let table = Table {
            table_id: TableId::now_v7(),
            account_id: AccountId::now_v7(),
            name: "Devices".to_string(),
            created_at: now(),
            updated_at: now(),
        };
        let view = storage
            .table_insert(
                &table,
                &NewView {
                    view_id: ViewId::now_v7(),
                    table_id: table.table_id,
                    name: "Everything".to_string(),
                    is_default: true,
                    created_at: now(),
                },
            )
            .unwrap();
        (storage, table, view)
    }

    fn text_column(table_id: TableId, name: &str) -> NewColumn {
        NewColumn {
            column_id: ColumnId::now_v7(),
            table_id,
            name: name.to_string(),
            column_type: ColumnType::Text,
            editable: true,
            deletable: true,
            searchable: true,
            created_at: now(),
        }
    }

    fn put<S: StorageTrait>(
        storage: &S,
        row_id: RowId,
        column: &Column,
        value: Option<Value>,
    ) -> TabulaResult<bool> {
        storage.row_set_cell(&CellWrite {
            row_id,
            column_id: column.column_id,
            kind: column.kind(),
            value: value.as_ref(),
            updated_at: now(),
        })
    }

    fn new_row(table_id: TableId) -> NewRow {
        NewRow {
            row_id: RowId::now_v7(),
            table_id,
            created_at: now(),
        }
    }

    #[test]
    fn test_column_insert_adds_entry_to_every_view() {
        let (storage, table, default_view) = setup();
        let second = storage
            .view_insert(&NewView {
                view_id: ViewId::now_v7(),
                table_id: table.table_id,
                name: "Second".to_string(),
                is_default: false,
                created_at: now(),
            })
            .unwrap();

        let column = storage
            .column_insert(&text_column(table.table_id, "Color"))
            .unwrap();
        assert_eq!(column.position, 0);

        for view_id in [default_view.view_id, second.view_id] {
            let entries = storage.view_column_list(view_id).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].column_id, column.column_id);
            assert!(entries[0].visible);
        }
    }

    #[test]
    fn test_row_numbers_are_sequential_and_not_reused() {
        let (storage, table, _) = setup();
        let first = storage.row_insert(&new_row(table.table_id)).unwrap();
        let second = storage.row_insert(&new_row(table.table_id)).unwrap();
        assert_eq!((first.number, second.number), (1, 2));

        storage.row_delete(second.row_id).unwrap();
        let third = storage.row_insert(&new_row(table.table_id)).unwrap();
        assert_eq!(third.number, 3);
    }

    #[test]
    fn test_duplicate_link_rejected_regardless_of_tag() {
        let (storage, table, _) = setup();
        let a = storage.row_insert(&new_row(table.table_id)).unwrap();
        let b = storage.row_insert(&new_row(table.table_id)).unwrap();
        let link = Link {
            link_id: tabula_core::LinkId::now_v7(),
            source_row_id: a.row_id,
            target_row_id: b.row_id,
            column_id: None,
            created_at: now(),
        };
        storage.link_insert(&link).unwrap();

        let tagged = Link {
            link_id: tabula_core::LinkId::now_v7(),
            column_id: Some(ColumnId::now_v7()),
            ..link.clone()
        };
        assert!(matches!(
            storage.link_insert(&tagged),
            Err(TabulaError::DuplicateEdge { .. })
        ));
        assert_eq!(storage.link_count().unwrap(), 1);
    }

    #[test]
    fn test_column_delete_strips_keys() {
        let (storage, table, view) = setup();
        let column = storage
            .column_insert(&text_column(table.table_id, "Color"))
            .unwrap();
        let row = storage.row_insert(&new_row(table.table_id)).unwrap();
        put(&storage, row.row_id, &column, Some(json!("Red"))).unwrap();
        storage
            .filter_set(&ViewFilter {
                view_id: view.view_id,
                column_id: column.column_id,
                value: "re".to_string(),
            })
            .unwrap();

        storage.column_delete(column.column_id).unwrap();

        let row = storage.row_get(row.row_id).unwrap().unwrap();
        assert!(row.cells.is_empty());
        assert!(storage.view_column_list(view.view_id).unwrap().is_empty());
        assert!(storage.filter_list(view.view_id).unwrap().is_empty());
    }

    #[test]
    fn test_replace_type_seeds_select_under_lock() {
        let (storage, table, _) = setup();
        let grade = storage
            .column_insert(&text_column(table.table_id, "Grade"))
            .unwrap();
        for value in ["A", "B", "A"] {
            let row = storage.row_insert(&new_row(table.table_id)).unwrap();
            put(&storage, row.row_id, &grade, Some(json!(value))).unwrap();
        }

        let seeded = storage
            .column_replace_type(
                grade.column_id,
                &ColumnType::Select { options: vec![] },
                TypeChange {
                    seed_from_cells: true,
                    ..TypeChange::default()
                },
                now(),
            )
            .unwrap();
        assert_eq!(
            seeded.column_type,
            ColumnType::Select {
                options: vec!["A".to_string(), "B".to_string()]
            }
        );

        // A write validated against the old text kind no longer lands.
        let row = storage.row_insert(&new_row(table.table_id)).unwrap();
        assert!(put(&storage, row.row_id, &grade, Some(json!("C")))
            .unwrap_err()
            .is_validation());
        assert!(put(&storage, row.row_id, &seeded, Some(json!("C"))).unwrap());
    }

    #[test]
    fn test_view_delete_guards() {
        let (storage, table, default_view) = setup();
        assert!(storage
            .view_delete(default_view.view_id)
            .unwrap_err()
            .is_validation());

        let extra = storage
            .view_insert(&NewView {
                view_id: ViewId::now_v7(),
                table_id: table.table_id,
                name: "Extra".to_string(),
                is_default: false,
                created_at: now(),
            })
            .unwrap();
        storage.view_delete(extra.view_id).unwrap();
        assert_eq!(storage.view_list_by_table(table.table_id).unwrap().len(), 1);
    }

    #[test]
    fn test_table_names_unique_case_insensitively() {
        let (storage, table, _) = setup();
        let clash = Table {
            table_id: TableId::now_v7(),
            name: "DEVICES".to_string(),
            ..table.clone()
        };
        let err = storage
            .table_insert(
                &clash,
                &NewView {
                    view_id: ViewId::now_v7(),
                    table_id: clash.table_id,
                    name: "Everything".to_string(),
                    is_default: true,
                    created_at: now(),
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TabulaError::Validation(ValidationError::DuplicateName { .. })
        ));
        assert_eq!(storage.table_count().unwrap(), 1);
    }

    #[test]
    fn test_poisoned_lock_is_an_error() {
        let storage = InMemoryStorage::new();
        let shared = storage.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.state.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert_eq!(
            storage.table_count().unwrap_err(),
            TabulaError::Storage(StorageError::LockPoisoned)
        );
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Row numbers grow strictly, whatever was deleted in between.
            #[test]
            fn prop_row_numbers_strictly_increase(deletes in prop::collection::vec(any::<bool>(), 1..30)) {
                let (storage, table, _) = setup();
                let mut last = 0;
                for delete in deletes {
                    let row = storage.row_insert(&new_row(table.table_id)).unwrap();
                    prop_assert!(row.number > last);
                    last = row.number;
                    if delete {
                        storage.row_delete(row.row_id).unwrap();
                    }
                }
                let listed = storage.row_list_by_table(table.table_id).unwrap();
                prop_assert!(listed.windows(2).all(|w| w[0].number < w[1].number));
            }
        }
    }
}
