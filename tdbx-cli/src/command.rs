//! The command set dispatched by the `tdbx` binary and the translation from
//! each variant into a single `tdbx::Engine` call.
//!
//! This module performs no interpretation of the engine's result beyond
//! shaping it into the JSON value (or short acknowledgment) the CLI prints:
//! every validation, permission, or storage decision belongs to the engine.

use std::path::PathBuf;

use clap::Subcommand;
use serde_json::Value;
use tdbx::{Engine, TdbxResult};

/// One invocation of the `tdbx` binary, minus the config path that selects
/// which [`Engine`] to open.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a query pipeline (filter/sort/skip/limit/project) over a collection.
    Query {
        collection: String,
        /// `{"filter": {...}, "sort": {...}, "skip": N, "limit": N, "project": [...]}`
        query_json: String,
    },
    /// Insert one record into a collection.
    Insert {
        collection: String,
        /// A JSON object.
        record_json: String,
    },
    /// Shallow-merge `changes_json` into every record matching `filter_json`.
    Update {
        collection: String,
        filter_json: String,
        changes_json: String,
    },
    /// Remove every record matching `filter_json`.
    Delete {
        collection: String,
        filter_json: String,
    },
    /// Run an aggregation pipeline (`$match`/`$group`/`$sort`/`$skip`/`$limit`).
    Aggregate {
        collection: String,
        /// A JSON array of single-key stage objects.
        pipeline_json: String,
    },
    /// Build or drop an advisory index on `field`.
    Index {
        collection: String,
        field: String,
        /// Drop the index instead of building it.
        #[arg(long)]
        drop: bool,
    },
    /// Snapshot every collection and metadata file under `target_dir`.
    Backup { target_dir: PathBuf },
    /// Restore the database from a backup directory written by `backup`.
    Restore { backup_dir: PathBuf },
}

/// What a dispatched command prints to stdout: either a JSON value (query
/// results, aggregation output, a modified/removed count, the backup
/// directory path) or a short acknowledgment for a mutation with no
/// naturally interesting return value.
pub enum Output {
    Json(Value),
    Ack,
}

/// Parses every embedded JSON argument and calls the matching `Engine`
/// method. Parse errors surface as `validation-error`, the same kind the
/// engine itself uses for malformed filters, so a caller can't tell from
/// the error kind alone whether the CLI or the engine rejected its input.
pub fn dispatch(engine: &Engine, command: Command) -> TdbxResult<Output> {
    match command {
        Command::Query { collection, query_json } => {
            let query = parse_json(&query_json)?;
            let records = engine.query(&collection, &query)?;
            Ok(Output::Json(Value::Array(records.into_iter().map(Value::Object).collect())))
        }
        Command::Insert { collection, record_json } => {
            let record = parse_json(&record_json)?;
            engine.insert(&collection, record)?;
            Ok(Output::Ack)
        }
        Command::Update { collection, filter_json, changes_json } => {
            let filter = parse_json(&filter_json)?;
            let changes = parse_json(&changes_json)?;
            let modified = engine.update(&collection, &filter, &changes)?;
            Ok(Output::Json(Value::from(modified)))
        }
        Command::Delete { collection, filter_json } => {
            let filter = parse_json(&filter_json)?;
            let removed = engine.delete(&collection, &filter)?;
            Ok(Output::Json(Value::from(removed)))
        }
        Command::Aggregate { collection, pipeline_json } => {
            let pipeline = parse_json(&pipeline_json)?;
            let records = engine.aggregate(&collection, &pipeline)?;
            Ok(Output::Json(Value::Array(records.into_iter().map(Value::Object).collect())))
        }
        Command::Index { collection, field, drop } => {
            if drop {
                engine.drop_index(&collection, &field)?;
            } else {
                engine.build_index(&collection, &field)?;
            }
            Ok(Output::Ack)
        }
        Command::Backup { target_dir } => {
            let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.fZ").to_string();
            let backup_dir = engine.backup(&target_dir, &timestamp)?;
            Ok(Output::Json(Value::String(backup_dir.display().to_string())))
        }
        Command::Restore { backup_dir } => {
            engine.restore(&backup_dir)?;
            Ok(Output::Ack)
        }
    }
}

fn parse_json(text: &str) -> TdbxResult<Value> {
    serde_json::from_str(text)
        .map_err(|e| tdbx::Error::Validation(format!("'{text}' is not valid JSON: {e}")))
}
