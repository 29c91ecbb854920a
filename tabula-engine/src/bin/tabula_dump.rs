//! Table Dump Binary
//!
//! Prints every table of an account in a TABULA SQLite database as JSON, one
//! query result per table holding all of its rows, projected through each
//! table's default view.
//!
//! Usage:
//!   tabula_dump <database.sqlite> <account-id> [table-name]
//!
//! Log verbosity follows `TABULA_LOG` (default `info`). Engine settings are
//! read from the `TABULA_*` environment variables.

use std::process::ExitCode;
use tabula_core::{AccountId, EngineConfig, TabulaError, TabulaResult};
use tabula_engine::{Engine, QueryRequest, SqliteStorage};
use tabula_storage::name_key;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_env("TABULA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so stdout stays valid JSON.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(path: &str, account: &str, only: Option<&str>) -> TabulaResult<serde_json::Value> {
    let account_id: AccountId = account
        .parse()
        .map_err(|e| TabulaError::invalid_value("account-id", format!("{}", e)))?;
    let engine = Engine::with_config(SqliteStorage::open(path)?, EngineConfig::from_env())?;

    let mut dumped = Vec::new();
    for table in engine.list_tables(account_id)? {
        if only.is_some_and(|name| name_key(name) != name_key(&table.name)) {
            continue;
        }
        let views = engine.list_views(account_id, table.table_id)?;
        let mut request = QueryRequest::new(table.table_id);
        if let Some(view) = views.iter().find(|v| v.is_default).or(views.first()) {
            request = request.with_view(view.view_id);
        }

        let result = engine.query_all(account_id, request)?;
        tracing::info!(table = %table.name, rows = result.total, "dumped table");
        dumped.push(serde_json::json!({
            "table": table,
            "result": result,
        }));
    }
    Ok(serde_json::Value::Array(dumped))
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("Usage: tabula_dump <database.sqlite> <account-id> [table-name]");
        return ExitCode::from(2);
    }

    match run(&args[1], &args[2], args.get(3).map(String::as_str)) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize dump: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "dump failed");
            ExitCode::FAILURE
        }
    }
}
