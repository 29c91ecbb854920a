//! Configuration types

use crate::{ConfigError, TabulaError, TabulaResult};
use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// Paging, naming and search knobs shared by every engine instance. All
/// fields have defaults, so a partial TOML document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows per page when a query does not set a limit
    pub page_size: usize,
    /// Upper bound applied to any requested limit
    pub max_page_size: usize,
    /// Name of the view created together with each table
    pub default_view_name: String,
    /// Maximum length, in characters, of table, column and view names
    pub max_name_len: usize,
    /// Whether an all-digit search term also matches the row number
    pub search_row_number: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_page_size: 1000,
            default_view_name: "Everything".to_string(),
            max_name_len: 255,
            search_row_number: true,
        }
    }
}

impl EngineConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TABULA_PAGE_SIZE`: Default page size (default: 100)
    /// - `TABULA_MAX_PAGE_SIZE`: Page size cap (default: 1000)
    /// - `TABULA_DEFAULT_VIEW_NAME`: Default view name (default: "Everything")
    /// - `TABULA_MAX_NAME_LEN`: Maximum name length (default: 255)
    /// - `TABULA_SEARCH_ROW_NUMBER`: Match row numbers in search (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            page_size: std::env::var("TABULA_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.page_size),
            max_page_size: std::env::var("TABULA_MAX_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_page_size),
            default_view_name: std::env::var("TABULA_DEFAULT_VIEW_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.default_view_name),
            max_name_len: std::env::var("TABULA_MAX_NAME_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_name_len),
            search_row_number: std::env::var("TABULA_SEARCH_ROW_NUMBER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.search_row_number),
        }
    }

    /// Parse a TOML document and validate the result.
    pub fn from_toml_str(input: &str) -> TabulaResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| {
            TabulaError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - page_size > 0
    /// - max_page_size >= page_size
    /// - default_view_name is not blank and fits max_name_len
    /// - max_name_len > 0
    pub fn validate(&self) -> TabulaResult<()> {
        if self.page_size == 0 {
            return Err(TabulaError::Config(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                value: self.page_size.to_string(),
                reason: "page_size must be greater than 0".to_string(),
            }));
        }

        if self.max_page_size < self.page_size {
            return Err(TabulaError::Config(ConfigError::InvalidValue {
                field: "max_page_size".to_string(),
                value: self.max_page_size.to_string(),
                reason: "max_page_size must be at least page_size".to_string(),
            }));
        }

        if self.max_name_len == 0 {
            return Err(TabulaError::Config(ConfigError::InvalidValue {
                field: "max_name_len".to_string(),
                value: self.max_name_len.to_string(),
                reason: "max_name_len must be greater than 0".to_string(),
            }));
        }

        let view_name = self.default_view_name.trim();
        if view_name.is_empty() {
            return Err(TabulaError::Config(ConfigError::MissingRequired {
                field: "default_view_name".to_string(),
            }));
        }
        if view_name.chars().count() > self.max_name_len {
            return Err(TabulaError::Config(ConfigError::InvalidValue {
                field: "default_view_name".to_string(),
                value: self.default_view_name.clone(),
                reason: "default_view_name exceeds max_name_len".to_string(),
            }));
        }

        Ok(())
    }

    /// Effective page length for a requested limit.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.page_size)
            .min(self.max_page_size)
    }
}
