//! integrity-runner: line-oriented front end for the roster integrity engine.
//!
//! Reads one JSON command per line on stdin and writes one JSON response
//! per line on stdout.
//!
//! Usage:
//!   integrity-runner --db roster.db --config data/engine_config.json
//!   echo '{"type":"history","playerId":"p1"}' | integrity-runner --db roster.db

use anyhow::Result;
use roster_integrity_core::{
    config::EngineConfig,
    error::IntegrityError,
    orchestrator::{CancelToken, UpdateOrchestrator},
    record::PlayerProfile,
    store::SqliteStore,
    update::{UpdateRequest, UpdateSource},
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum IpcCommand {
    Onboard {
        player_id: String,
        #[serde(default)]
        profile:   PlayerProfile,
        #[serde(default = "default_actor")]
        actor:     String,
    },
    Submit(UpdateRequest),
    Validate(UpdateRequest),
    Impact {
        player_id: String,
        changes:   BTreeMap<String, Value>,
        #[serde(default)]
        source:    Option<UpdateSource>,
    },
    Bulk {
        rows: Vec<UpdateRequest>,
    },
    Sync {
        rows: Vec<UpdateRequest>,
    },
    History {
        player_id: String,
        #[serde(default)]
        limit:     Option<usize>,
    },
    Report {
        player_id: String,
    },
    Verify {
        player_id: String,
    },
    Quit,
}

fn default_actor() -> String {
    "integrity-runner".to_string()
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let config = match arg_value(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let store = if db == ":memory:" {
        SqliteStore::in_memory(config.store.clone())?
    } else {
        SqliteStore::open(db, config.store.clone())?
    };
    store.migrate()?;
    log::info!("integrity-runner: db={db} workers={}", config.worker_threads);

    let orchestrator = UpdateOrchestrator::new(store, config)?;
    run_ipc_loop(&orchestrator)
}

fn run_ipc_loop(orchestrator: &UpdateOrchestrator<SqliteStore>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let response = handle_command(orchestrator, cmd)?;
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(orchestrator: &UpdateOrchestrator<SqliteStore>, cmd: IpcCommand) -> Result<Value> {
    let response = match cmd {
        IpcCommand::Onboard { player_id, profile, actor } => {
            respond(orchestrator.onboard_player(&player_id, profile, &actor))?
        }
        IpcCommand::Submit(request) => serde_json::to_value(orchestrator.submit(&request))?,
        IpcCommand::Validate(request) => {
            let result = orchestrator.validate(&request);
            json!({
                "valid": result.is_valid(),
                "errors": result.errors,
                "warnings": result.warnings,
            })
        }
        IpcCommand::Impact { player_id, changes, source } => {
            respond(orchestrator.analyze_impact(&player_id, changes, source))?
        }
        IpcCommand::Bulk { rows } => {
            serde_json::to_value(orchestrator.bulk_update(&rows, &CancelToken::new()))?
        }
        IpcCommand::Sync { rows } => {
            serde_json::to_value(orchestrator.sync_external(&rows, &CancelToken::new()))?
        }
        IpcCommand::History { player_id, limit } => respond(orchestrator.history(&player_id, limit))?,
        IpcCommand::Report { player_id } => respond(orchestrator.integrity_report(&player_id))?,
        IpcCommand::Verify { player_id } => {
            respond(orchestrator.verify_player(&player_id).map(|stale| {
                json!({ "consistent": stale.is_empty(), "staleFields": stale })
            }))?
        }
        IpcCommand::Quit => Value::Null,
    };
    Ok(response)
}

/// Engine errors become an `{error, code, retryable}` response, not a crash.
fn respond<T: serde::Serialize>(result: Result<T, IntegrityError>) -> Result<Value> {
    match result {
        Ok(value) => Ok(serde_json::to_value(value)?),
        Err(IntegrityError::Validation(v)) => Ok(json!({
            "error": "validation failed",
            "code": "validation_error",
            "errors": v.errors,
            "warnings": v.warnings,
        })),
        Err(e) => Ok(json!({
            "error": e.to_string(),
            "code": e.code(),
            "retryable": e.is_retryable(),
        })),
    }
}

fn arg_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == name).map(|w| w[1].as_str())
}
