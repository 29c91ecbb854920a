//! Enum types for TABULA entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Entity type discriminator used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Account,
    Table,
    Column,
    Row,
    View,
    ViewColumn,
    Filter,
    Link,
}

/// Data kind of a column.
///
/// This is the bare discriminant; the kind-specific payload lives in
/// [`crate::ColumnType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Free text
    Text,
    /// Numeric value
    Number,
    /// Calendar date (`YYYY-MM-DD`)
    Date,
    /// One value out of an allowed-value set
    Select,
    /// References rows of another table through relation edges
    LinkedRow,
    /// Computed from other columns of the same row
    Formula,
}

impl ColumnKind {
    /// All kinds, in declaration order.
    pub const ALL: [ColumnKind; 6] = [
        ColumnKind::Text,
        ColumnKind::Number,
        ColumnKind::Date,
        ColumnKind::Select,
        ColumnKind::LinkedRow,
        ColumnKind::Formula,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Number => "number",
            ColumnKind::Date => "date",
            ColumnKind::Select => "select",
            ColumnKind::LinkedRow => "linked_row",
            ColumnKind::Formula => "formula",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ColumnKindParseError> {
        match normalize_token(s).as_str() {
            "text" | "string" => Ok(ColumnKind::Text),
            "number" | "numeric" => Ok(ColumnKind::Number),
            "date" => Ok(ColumnKind::Date),
            "select" | "singleselect" => Ok(ColumnKind::Select),
            "linkedrow" | "link" | "relation" => Ok(ColumnKind::LinkedRow),
            "formula" => Ok(ColumnKind::Formula),
            _ => Err(ColumnKindParseError(s.to_string())),
        }
    }

    /// Whether cells of this kind are written through `set_cell`.
    pub fn stores_cell_values(&self) -> bool {
        !matches!(self, ColumnKind::LinkedRow | ColumnKind::Formula)
    }

    /// Default for the column's `searchable` flag.
    pub fn searchable_by_default(&self) -> bool {
        self.stores_cell_values()
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ColumnKind {
    type Err = ColumnKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid column kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKindParseError(pub String);

impl fmt::Display for ColumnKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid column kind: {}", self.0)
    }
}

impl std::error::Error for ColumnKindParseError {}

// ============================================================================
// STRING CONVERSIONS
// ============================================================================

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityType::Account => "Account",
            EntityType::Table => "Table",
            EntityType::Column => "Column",
            EntityType::Row => "Row",
            EntityType::View => "View",
            EntityType::ViewColumn => "ViewColumn",
            EntityType::Filter => "Filter",
            EntityType::Link => "Link",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "account" => Ok(EntityType::Account),
            "table" => Ok(EntityType::Table),
            "column" | "property" => Ok(EntityType::Column),
            "row" | "item" | "record" => Ok(EntityType::Row),
            "view" => Ok(EntityType::View),
            "viewcolumn" | "viewproperty" => Ok(EntityType::ViewColumn),
            "filter" => Ok(EntityType::Filter),
            "link" | "edge" => Ok(EntityType::Link),
            _ => Err(format!("Invalid EntityType: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kind_db_round_trip() {
        for kind in ColumnKind::ALL {
            assert_eq!(ColumnKind::from_db_str(kind.as_db_str()), Ok(kind));
        }
    }

    #[test]
    fn test_column_kind_aliases() {
        assert_eq!("Linked-Row".parse::<ColumnKind>(), Ok(ColumnKind::LinkedRow));
        assert_eq!("single_select".parse::<ColumnKind>(), Ok(ColumnKind::Select));
        assert!("currency".parse::<ColumnKind>().is_err());
    }

    #[test]
    fn test_stores_cell_values() {
        assert!(ColumnKind::Text.stores_cell_values());
        assert!(ColumnKind::Select.stores_cell_values());
        assert!(!ColumnKind::Formula.stores_cell_values());
        assert!(!ColumnKind::LinkedRow.stores_cell_values());
    }

    #[test]
    fn test_entity_type_aliases() {
        assert_eq!("property".parse::<EntityType>(), Ok(EntityType::Column));
        assert_eq!("item".parse::<EntityType>(), Ok(EntityType::Row));
    }
}
