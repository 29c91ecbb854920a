//! Relation graph

use crate::Engine;
use tabula_core::{
    now, AccountId, ColumnId, ColumnType, EntityIdType, Link, LinkId, RowId, TabulaError,
    TabulaResult,
};
use tabula_storage::StorageTrait;
use tracing::debug;

impl<S: StorageTrait> Engine<S> {
    /// Link two rows. At most one edge exists per (source, target) pair,
    /// whatever its tag.
    ///
    /// A tagged link must use a linked-row column of the source row's table
    /// and point at a row of the column's target table.
    pub fn link(
        &self,
        account_id: AccountId,
        source: RowId,
        target: RowId,
        column_id: Option<ColumnId>,
    ) -> TabulaResult<Link> {
        let source_row = self.owned_row(account_id, source)?;
        let target_row = self.owned_row(account_id, target)?;

        if let Some(column_id) = column_id {
            let column = self.owned_column(account_id, column_id)?;
            let ColumnType::LinkedRow { target_table_id } = column.column_type else {
                return Err(TabulaError::invalid_value(
                    "column_id",
                    format!("{} column cannot tag a link", column.kind()),
                ));
            };
            if column.table_id != source_row.table_id {
                return Err(TabulaError::invalid_value(
                    "source",
                    "source row is not in the column's table",
                ));
            }
            if target_row.table_id != target_table_id {
                return Err(TabulaError::invalid_value(
                    "target",
                    "target row is not in the column's target table",
                ));
            }
        }

        let link = Link {
            link_id: LinkId::now_v7(),
            source_row_id: source,
            target_row_id: target,
            column_id,
            created_at: now(),
        };
        self.storage.link_insert(&link)?;
        debug!(source = %source, target = %target, "rows linked");
        Ok(link)
    }

    /// Remove the edge from `source` to `target`.
    pub fn unlink(&self, account_id: AccountId, source: RowId, target: RowId) -> TabulaResult<()> {
        self.owned_row(account_id, source)?;
        self.owned_row(account_id, target)?;
        self.storage.link_delete(source, target)?;
        debug!(source = %source, target = %target, "rows unlinked");
        Ok(())
    }

    /// Edges leaving a row, optionally only those tagged with `column_id`.
    pub fn outgoing(
        &self,
        account_id: AccountId,
        row_id: RowId,
        column_id: Option<ColumnId>,
    ) -> TabulaResult<Vec<Link>> {
        self.owned_row(account_id, row_id)?;
        self.storage.link_outgoing(row_id, column_id)
    }

    /// Edges arriving at a row, optionally only those tagged with `column_id`.
    pub fn incoming(
        &self,
        account_id: AccountId,
        row_id: RowId,
        column_id: Option<ColumnId>,
    ) -> TabulaResult<Vec<Link>> {
        self.owned_row(account_id, row_id)?;
        self.storage.link_incoming(row_id, column_id)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, InMemoryStorage};
    use tabula_core::{AccountId, ColumnKindSpec, EntityIdType, TabulaError};

    #[test]
    fn test_duplicate_edge_regardless_of_tag() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (devices, _) = engine.create_table(account, "Devices").unwrap();
        let (people, _) = engine.create_table(account, "People").unwrap();
        let owner = engine
            .create_column(
                account,
                devices.table_id,
                "Owner",
                ColumnKindSpec::LinkedRow {
                    target_table_id: Some(people.table_id),
                },
            )
            .unwrap();
        let laptop = engine.create_row(account, devices.table_id).unwrap();
        let alice = engine.create_row(account, people.table_id).unwrap();

        engine
            .link(account, laptop.row_id, alice.row_id, Some(owner.column_id))
            .unwrap();
        let err = engine
            .link(account, laptop.row_id, alice.row_id, None)
            .unwrap_err();
        assert!(matches!(err, TabulaError::DuplicateEdge { .. }));

        assert_eq!(engine.outgoing(account, laptop.row_id, None).unwrap().len(), 1);
        assert_eq!(
            engine
                .incoming(account, alice.row_id, Some(owner.column_id))
                .unwrap()
                .len(),
            1
        );
        assert!(engine.outgoing(account, alice.row_id, None).unwrap().is_empty());

        engine.unlink(account, laptop.row_id, alice.row_id).unwrap();
        assert!(engine
            .unlink(account, laptop.row_id, alice.row_id)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_tagged_link_checks_tables() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (devices, _) = engine.create_table(account, "Devices").unwrap();
        let (people, _) = engine.create_table(account, "People").unwrap();
        let owner = engine
            .create_column(
                account,
                devices.table_id,
                "Owner",
                ColumnKindSpec::LinkedRow {
                    target_table_id: Some(people.table_id),
                },
            )
            .unwrap();
        let a = engine.create_row(account, devices.table_id).unwrap();
        let b = engine.create_row(account, devices.table_id).unwrap();

        let err = engine
            .link(account, a.row_id, b.row_id, Some(owner.column_id))
            .unwrap_err();
        assert!(err.is_validation());
        // Untagged links between any rows are fine.
        engine.link(account, a.row_id, b.row_id, None).unwrap();
    }
}
