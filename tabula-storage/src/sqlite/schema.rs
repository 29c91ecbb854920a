//! SQLite schema

use rusqlite::Connection;

/// Create every table and index if missing.
///
/// Name uniqueness is enforced on a lower-cased `name_key` column so that the
/// rule is case-insensitive for non-ASCII names too.
pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys=ON;

        CREATE TABLE IF NOT EXISTS tables (
          table_id TEXT PRIMARY KEY,
          account_id TEXT NOT NULL,
          name TEXT NOT NULL,
          name_key TEXT NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE (account_id, name_key)
        );

        CREATE TABLE IF NOT EXISTS columns (
          column_id TEXT PRIMARY KEY,
          table_id TEXT NOT NULL REFERENCES tables(table_id) ON DELETE CASCADE,
          name TEXT NOT NULL,
          kind TEXT NOT NULL,
          target_table_id TEXT,
          formula_json TEXT,
          position INTEGER NOT NULL,
          editable INTEGER NOT NULL,
          deletable INTEGER NOT NULL,
          searchable INTEGER NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_columns_table ON columns(table_id, position);

        CREATE TABLE IF NOT EXISTS allowed_values (
          id INTEGER PRIMARY KEY,
          column_id TEXT NOT NULL REFERENCES columns(column_id) ON DELETE CASCADE,
          value TEXT NOT NULL,
          UNIQUE (column_id, value)
        );

        CREATE TABLE IF NOT EXISTS row_counters (
          table_id TEXT PRIMARY KEY REFERENCES tables(table_id) ON DELETE CASCADE,
          value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rows (
          row_id TEXT PRIMARY KEY,
          table_id TEXT NOT NULL REFERENCES tables(table_id) ON DELETE CASCADE,
          number INTEGER NOT NULL,
          cells TEXT NOT NULL DEFAULT '{}',
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE (table_id, number)
        );

        CREATE TABLE IF NOT EXISTS links (
          link_id TEXT PRIMARY KEY,
          source_row_id TEXT NOT NULL REFERENCES rows(row_id) ON DELETE CASCADE,
          target_row_id TEXT NOT NULL REFERENCES rows(row_id) ON DELETE CASCADE,
          column_id TEXT REFERENCES columns(column_id) ON DELETE CASCADE,
          created_at TEXT NOT NULL,
          UNIQUE (source_row_id, target_row_id)
        );
        CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_row_id);

        CREATE TABLE IF NOT EXISTS views (
          view_id TEXT PRIMARY KEY,
          table_id TEXT NOT NULL REFERENCES tables(table_id) ON DELETE CASCADE,
          name TEXT NOT NULL,
          name_key TEXT NOT NULL,
          position INTEGER NOT NULL,
          is_default INTEGER NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE (table_id, name_key)
        );

        CREATE TABLE IF NOT EXISTS view_columns (
          view_id TEXT NOT NULL REFERENCES views(view_id) ON DELETE CASCADE,
          column_id TEXT NOT NULL REFERENCES columns(column_id) ON DELETE CASCADE,
          position INTEGER NOT NULL,
          visible INTEGER NOT NULL,
          PRIMARY KEY (view_id, column_id)
        );

        CREATE TABLE IF NOT EXISTS filters (
          view_id TEXT NOT NULL REFERENCES views(view_id) ON DELETE CASCADE,
          column_id TEXT NOT NULL REFERENCES columns(column_id) ON DELETE CASCADE,
          value TEXT NOT NULL,
          PRIMARY KEY (view_id, column_id)
        );
        "#,
    )
}
