//! View projection
//!
//! Views are per-table lenses. Each has its own column order, visibility and
//! saved filters; changing one view never touches another view or the
//! column's canonical position.

use crate::Engine;
use std::collections::HashSet;
use std::str::FromStr;
use tabula_core::{
    now, AccountId, CellFilter, Column, ColumnId, EntityIdType, EntityType, TableId, TabulaError,
    TabulaResult, View, ViewColumn, ViewFilter, ViewId,
};
use tabula_storage::{NewView, StorageTrait};
use tracing::{debug, info};

impl<S: StorageTrait> Engine<S> {
    // ========================================================================
    // VIEWS
    // ========================================================================

    /// Create a view with a visible entry for every column of the table.
    pub fn create_view(
        &self,
        account_id: AccountId,
        table_id: TableId,
        name: &str,
    ) -> TabulaResult<View> {
        self.owned_table(account_id, table_id)?;
        let name = self.clean_name("name", name)?;
        let view = self.storage.view_insert(&NewView {
            view_id: ViewId::now_v7(),
            table_id,
            name,
            is_default: false,
            created_at: now(),
        })?;
        info!(table_id = %table_id, view_id = %view.view_id, name = %view.name, "view created");
        Ok(view)
    }

    pub fn get_view(&self, account_id: AccountId, view_id: ViewId) -> TabulaResult<View> {
        self.owned_view(account_id, view_id)
    }

    /// Views of a table by position.
    pub fn list_views(&self, account_id: AccountId, table_id: TableId) -> TabulaResult<Vec<View>> {
        self.owned_table(account_id, table_id)?;
        self.storage.view_list_by_table(table_id)
    }

    pub fn rename_view(
        &self,
        account_id: AccountId,
        view_id: ViewId,
        name: &str,
    ) -> TabulaResult<View> {
        self.owned_view(account_id, view_id)?;
        let name = self.clean_name("name", name)?;
        self.storage.view_rename(view_id, &name, now())?;
        self.owned_view(account_id, view_id)
    }

    /// Put the listed views first, in list order. Unknown or repeated ids are
    /// ignored; unlisted views keep their relative order after the listed ones.
    pub fn reorder_views(
        &self,
        account_id: AccountId,
        table_id: TableId,
        view_ids: &[ViewId],
    ) -> TabulaResult<Vec<View>> {
        let current = self.list_views(account_id, table_id)?;
        let existing: Vec<ViewId> = current.iter().map(|v| v.view_id).collect();
        let positions = reorder(&existing, view_ids.iter().copied());
        self.storage.view_set_positions(table_id, &positions)?;
        self.storage.view_list_by_table(table_id)
    }

    /// Delete a view with its entries and filters. The default view and the
    /// last view of a table cannot be deleted.
    pub fn delete_view(&self, account_id: AccountId, view_id: ViewId) -> TabulaResult<()> {
        let view = self.owned_view(account_id, view_id)?;
        self.storage.view_delete(view_id)?;
        info!(table_id = %view.table_id, view_id = %view_id, "view deleted");
        Ok(())
    }

    // ========================================================================
    // VIEW COLUMNS
    // ========================================================================

    /// Entries of a view by position, hidden ones included.
    pub fn view_columns(&self, account_id: AccountId, view_id: ViewId) -> TabulaResult<Vec<ViewColumn>> {
        self.owned_view(account_id, view_id)?;
        self.storage.view_column_list(view_id)
    }

    /// Columns shown by a view, in the view's order.
    pub fn visible_columns(&self, account_id: AccountId, view_id: ViewId) -> TabulaResult<Vec<Column>> {
        let view = self.owned_view(account_id, view_id)?;
        self.projected_columns(&view)
    }

    /// Reorder a view's columns from client-supplied ids.
    ///
    /// Ids that do not parse, repeat, or name a column outside the view are
    /// skipped. Listed columns take positions 0.. in list order; the rest
    /// follow in their previous relative order. Only this view changes.
    pub fn reorder_view_columns(
        &self,
        account_id: AccountId,
        view_id: ViewId,
        column_ids: &[String],
    ) -> TabulaResult<Vec<ViewColumn>> {
        self.owned_view(account_id, view_id)?;
        let existing: Vec<ColumnId> = self
            .storage
            .view_column_list(view_id)?
            .into_iter()
            .map(|entry| entry.column_id)
            .collect();
        let requested = column_ids
            .iter()
            .filter_map(|raw| ColumnId::from_str(raw).ok());
        let positions = reorder(&existing, requested);

        self.storage.view_column_set_positions(view_id, &positions)?;
        debug!(view_id = %view_id, columns = positions.len(), "view columns reordered");
        self.storage.view_column_list(view_id)
    }

    pub fn set_column_visibility(
        &self,
        account_id: AccountId,
        view_id: ViewId,
        column_id: ColumnId,
        visible: bool,
    ) -> TabulaResult<()> {
        self.owned_view(account_id, view_id)?;
        self.storage
            .view_column_set_visible(view_id, column_id, visible)
    }

    // ========================================================================
    // FILTERS
    // ========================================================================

    /// Save a substring filter on a column. A blank value clears it.
    pub fn set_filter(
        &self,
        account_id: AccountId,
        view_id: ViewId,
        column_id: ColumnId,
        value: &str,
    ) -> TabulaResult<()> {
        let view = self.owned_view(account_id, view_id)?;
        let column = self.owned_column(account_id, column_id)?;
        if column.table_id != view.table_id {
            return Err(TabulaError::not_found(EntityType::Column, column_id));
        }
        if CellFilter::new(column_id, value).is_none() {
            self.storage.filter_delete(view_id, column_id)?;
            return Ok(());
        }
        self.storage.filter_set(&ViewFilter {
            view_id,
            column_id,
            value: value.trim().to_string(),
        })
    }

    /// Remove a saved filter. Returns whether one existed.
    pub fn clear_filter(
        &self,
        account_id: AccountId,
        view_id: ViewId,
        column_id: ColumnId,
    ) -> TabulaResult<bool> {
        self.owned_view(account_id, view_id)?;
        self.storage.filter_delete(view_id, column_id)
    }

    pub fn list_filters(&self, account_id: AccountId, view_id: ViewId) -> TabulaResult<Vec<ViewFilter>> {
        self.owned_view(account_id, view_id)?;
        self.storage.filter_list(view_id)
    }

    /// Visible columns of a view joined with their definitions.
    pub(crate) fn projected_columns(&self, view: &View) -> TabulaResult<Vec<Column>> {
        let columns = self.storage.column_list_by_table(view.table_id)?;
        let entries = self.storage.view_column_list(view.view_id)?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.visible)
            .filter_map(|entry| {
                columns
                    .iter()
                    .find(|c| c.column_id == entry.column_id)
                    .cloned()
            })
            .collect())
    }
}

/// Positions for `existing` ids: requested members first in request order,
/// then the rest in their current order. Non-members and repeats are skipped.
fn reorder<T, I>(existing: &[T], requested: I) -> Vec<(T, i32)>
where
    T: Copy + Eq + std::hash::Hash,
    I: IntoIterator<Item = T>,
{
    let members: HashSet<T> = existing.iter().copied().collect();
    let mut placed = HashSet::new();
    let mut order = Vec::with_capacity(existing.len());

    for id in requested {
        if members.contains(&id) && placed.insert(id) {
            order.push(id);
        }
    }
    for id in existing {
        if placed.insert(*id) {
            order.push(*id);
        }
    }
    order
        .into_iter()
        .enumerate()
        .map(|(position, id)| (id, position as i32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStorage;
    use tabula_core::{ColumnKindSpec, ValidationError};

    fn setup() -> (Engine<InMemoryStorage>, AccountId, TableId, View) {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, view) = engine.create_table(account, "Devices").unwrap();
        (engine, account, table.table_id, view)
    }

    fn ids(entries: &[ViewColumn]) -> Vec<ColumnId> {
        entries.iter().map(|e| e.column_id).collect()
    }

    #[test]
    fn test_reorder_helper() {
        let positions = reorder(&[1, 2, 3, 4], vec![3, 9, 3, 1]);
        assert_eq!(positions, vec![(3, 0), (1, 1), (2, 2), (4, 3)]);
    }

    #[test]
    fn test_entries_follow_columns_and_views() {
        let (engine, account, table, everything) = setup();
        let a = engine.create_column(account, table, "A", ColumnKindSpec::Text).unwrap();
        let second = engine.create_view(account, table, "Mine").unwrap();
        let b = engine.create_column(account, table, "B", ColumnKindSpec::Text).unwrap();

        for view in [&everything, &second] {
            let entries = engine.view_columns(account, view.view_id).unwrap();
            assert_eq!(ids(&entries), vec![a.column_id, b.column_id]);
            assert!(entries.iter().all(|e| e.visible));
        }
        assert_eq!(second.position, 1);
    }

    #[test]
    fn test_reorder_view_columns_degrades_gracefully() {
        let (engine, account, table, everything) = setup();
        let a = engine.create_column(account, table, "A", ColumnKindSpec::Text).unwrap();
        let b = engine.create_column(account, table, "B", ColumnKindSpec::Text).unwrap();
        let c = engine.create_column(account, table, "C", ColumnKindSpec::Text).unwrap();
        let other = engine.create_view(account, table, "Other").unwrap();

        let request = vec![
            c.column_id.to_string(),
            "not-an-id".to_string(),
            ColumnId::now_v7().to_string(),
            c.column_id.to_string(),
            a.column_id.to_string(),
        ];
        let entries = engine
            .reorder_view_columns(account, everything.view_id, &request)
            .unwrap();
        assert_eq!(ids(&entries), vec![c.column_id, a.column_id, b.column_id]);

        // The other view and canonical positions are untouched.
        let untouched = engine.view_columns(account, other.view_id).unwrap();
        assert_eq!(ids(&untouched), vec![a.column_id, b.column_id, c.column_id]);
        assert_eq!(engine.get_column(account, c.column_id).unwrap().position, 2);
    }

    #[test]
    fn test_visibility() {
        let (engine, account, table, view) = setup();
        let a = engine.create_column(account, table, "A", ColumnKindSpec::Text).unwrap();
        let b = engine.create_column(account, table, "B", ColumnKindSpec::Text).unwrap();
        engine
            .set_column_visibility(account, view.view_id, a.column_id, false)
            .unwrap();
        let visible: Vec<_> = engine
            .visible_columns(account, view.view_id)
            .unwrap()
            .into_iter()
            .map(|c| c.column_id)
            .collect();
        assert_eq!(visible, vec![b.column_id]);
    }

    #[test]
    fn test_view_delete_guards() {
        let (engine, account, table, everything) = setup();
        let second = engine.create_view(account, table, "Second").unwrap();

        engine.delete_view(account, second.view_id).unwrap();
        let err = engine.delete_view(account, everything.view_id).unwrap_err();
        assert!(matches!(err, TabulaError::Validation(ValidationError::InvalidValue { .. })));
    }

    #[test]
    fn test_view_names_unique_case_insensitive() {
        let (engine, account, table, _) = setup();
        engine.create_view(account, table, "Mine").unwrap();
        assert!(engine.create_view(account, table, "MINE").unwrap_err().is_validation());
        assert!(engine.create_view(account, table, "everything").unwrap_err().is_validation());
    }

    #[test]
    fn test_reorder_views() {
        let (engine, account, table, everything) = setup();
        let b = engine.create_view(account, table, "B").unwrap();
        let c = engine.create_view(account, table, "C").unwrap();
        let views = engine
            .reorder_views(account, table, &[c.view_id, ViewId::now_v7()])
            .unwrap();
        let order: Vec<_> = views.into_iter().map(|v| v.view_id).collect();
        assert_eq!(order, vec![c.view_id, everything.view_id, b.view_id]);
    }

    #[test]
    fn test_filters() {
        let (engine, account, table, view) = setup();
        let color = engine.create_column(account, table, "Color", ColumnKindSpec::Text).unwrap();

        engine.set_filter(account, view.view_id, color.column_id, " red ").unwrap();
        let filters = engine.list_filters(account, view.view_id).unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].value, "red");

        engine.set_filter(account, view.view_id, color.column_id, "  ").unwrap();
        assert!(engine.list_filters(account, view.view_id).unwrap().is_empty());
        assert!(!engine.clear_filter(account, view.view_id, color.column_id).unwrap());
    }
}
