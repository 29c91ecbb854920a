//! Error types for TABULA operations

use crate::{ColumnKind, EntityType, RowId};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Storage backend error: {reason}")]
    Backend { reason: String },

    #[error("Corrupt {entity_type:?} record {id}: {reason}")]
    Corrupt {
        entity_type: EntityType,
        id: String,
        reason: String,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate {entity_type:?} name: {name}")]
    DuplicateName { entity_type: EntityType, name: String },

    #[error("Invalid kind transition from {from} to {to}: {reason}")]
    InvalidKindTransition {
        from: ColumnKind,
        to: ColumnKind,
        reason: String,
    },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Formula compilation and evaluation errors.
///
/// These are recovered per cell: a failing formula renders as an error marker
/// for that cell only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormulaError {
    #[error("Formula operand missing: column {column} has no value")]
    MissingOperand { column: String },

    #[error("Formula operand is not numeric: column {column} holds {value:?}")]
    NonNumericOperand { column: String, value: String },

    #[error("Formula divides by zero")]
    DivisionByZero,

    #[error("Formula result is out of numeric range")]
    Overflow,

    #[error("Malformed formula at position {position}: {reason}")]
    Malformed { position: usize, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all TABULA errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TabulaError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Relation edge already exists from row {source_row} to row {target_row}")]
    DuplicateEdge { source_row: RowId, target_row: RowId },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TabulaError {
    /// Build a not-found error for any displayable id.
    pub fn not_found(entity_type: EntityType, id: impl ToString) -> Self {
        TabulaError::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`ValidationError::InvalidValue`].
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TabulaError::Validation(ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Shorthand for [`ValidationError::RequiredFieldMissing`].
    pub fn required(field: impl Into<String>) -> Self {
        TabulaError::Validation(ValidationError::RequiredFieldMissing {
            field: field.into(),
        })
    }

    /// Shorthand for [`StorageError::Backend`].
    pub fn backend(reason: impl ToString) -> Self {
        TabulaError::Storage(StorageError::Backend {
            reason: reason.to_string(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TabulaError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, TabulaError::Validation(_))
    }
}

/// Result type alias for TABULA operations.
pub type TabulaResult<T> = Result<T, TabulaError>;

// =============================================================================
// TESTS
// =============================================================================
