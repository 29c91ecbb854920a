//! Table lifecycle

use crate::Engine;
use tabula_core::{
    now, AccountId, EntityIdType, Table, TableId, TabulaResult, View, ViewId,
};
use tabula_storage::{NewView, StorageTrait};
use tracing::{debug, info};

impl<S: StorageTrait> Engine<S> {
    /// Create a table together with its default view.
    pub fn create_table(&self, account_id: AccountId, name: &str) -> TabulaResult<(Table, View)> {
        let name = self.clean_name("name", name)?;
        let created_at = now();
        let table = Table {
            table_id: TableId::now_v7(),
            account_id,
            name,
            created_at,
            updated_at: created_at,
        };
        let default_view = NewView {
            view_id: ViewId::now_v7(),
            table_id: table.table_id,
            name: self.config.default_view_name.trim().to_string(),
            is_default: true,
            created_at,
        };

        let view = self.storage.table_insert(&table, &default_view)?;
        info!(
            table_id = %table.table_id,
            account_id = %account_id,
            name = %table.name,
            "table created"
        );
        Ok((table, view))
    }

    pub fn get_table(&self, account_id: AccountId, table_id: TableId) -> TabulaResult<Table> {
        self.owned_table(account_id, table_id)
    }

    /// Tables of an account in creation order.
    pub fn list_tables(&self, account_id: AccountId) -> TabulaResult<Vec<Table>> {
        let tables = self.storage.table_list_by_account(account_id)?;
        debug!(account_id = %account_id, tables = tables.len(), "listed tables");
        Ok(tables)
    }

    pub fn rename_table(
        &self,
        account_id: AccountId,
        table_id: TableId,
        name: &str,
    ) -> TabulaResult<Table> {
        self.owned_table(account_id, table_id)?;
        let name = self.clean_name("name", name)?;
        self.storage.table_rename(table_id, &name, now())?;
        info!(table_id = %table_id, name = %name, "table renamed");
        self.owned_table(account_id, table_id)
    }

    /// Delete a table with its columns, rows, links, views and filters.
    pub fn delete_table(&self, account_id: AccountId, table_id: TableId) -> TabulaResult<()> {
        self.owned_table(account_id, table_id)?;
        self.storage.table_delete(table_id)?;
        info!(table_id = %table_id, "table deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, InMemoryStorage};
    use tabula_core::{AccountId, EntityIdType, EntityType, TabulaError, ValidationError};

    #[test]
    fn test_create_table_makes_default_view() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, view) = engine.create_table(account, " Devices ").unwrap();

        assert_eq!(table.name, "Devices");
        assert!(view.is_default);
        assert_eq!(view.name, "Everything");
        assert_eq!(
            engine.list_views(account, table.table_id).unwrap(),
            vec![view]
        );
    }

    #[test]
    fn test_table_names_unique_per_account() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        engine.create_table(account, "Devices").unwrap();

        let err = engine.create_table(account, "DEVICES").unwrap_err();
        assert!(matches!(
            err,
            TabulaError::Validation(ValidationError::DuplicateName {
                entity_type: EntityType::Table,
                ..
            })
        ));

        // Another account may reuse the name.
        assert!(engine.create_table(AccountId::now_v7(), "Devices").is_ok());
    }

    #[test]
    fn test_rename_and_list() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (a, _) = engine.create_table(account, "A").unwrap();
        let (b, _) = engine.create_table(account, "B").unwrap();

        let renamed = engine.rename_table(account, a.table_id, "Assets").unwrap();
        assert_eq!(renamed.name, "Assets");
        assert!(engine.rename_table(account, b.table_id, "assets").is_err());

        let names: Vec<_> = engine
            .list_tables(account)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Assets", "B"]);
    }

    #[test]
    fn test_delete_table() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Devices").unwrap();

        assert!(engine
            .delete_table(AccountId::now_v7(), table.table_id)
            .unwrap_err()
            .is_not_found());
        engine.delete_table(account, table.table_id).unwrap();
        assert!(engine.get_table(account, table.table_id).is_err());
    }
}
