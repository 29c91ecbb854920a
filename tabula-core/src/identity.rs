//! Identity types for TABULA entities

use crate::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Common behavior of the strongly-typed entity identifiers.
///
/// Every id wraps a UUIDv7, so ids of the same type sort by creation time.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    /// Entity type this id refers to.
    const ENTITY_TYPE: EntityType;

    /// Wrap an existing UUID.
    fn new(uuid: Uuid) -> Self;

    /// Generate a fresh timestamp-sortable id.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// The underlying UUID.
    fn as_uuid(&self) -> Uuid;
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident => $entity:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_TYPE: EntityType = EntityType::$entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

define_entity_id!(
    /// Account that owns tables. Supplied by the authorization layer.
    AccountId => Account
);
define_entity_id!(
    /// User-defined table.
    TableId => Table
);
define_entity_id!(
    /// Column (property) of a table.
    ColumnId => Column
);
define_entity_id!(
    /// Row (item) of a table.
    RowId => Row
);
define_entity_id!(
    /// Saved view over a table.
    ViewId => View
);
define_entity_id!(
    /// Relation edge between two rows.
    LinkId => Link
);

impl ColumnId {
    /// Key under which this column's value is stored in a row's cell map.
    pub fn cell_key(&self) -> String {
        self.to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================
