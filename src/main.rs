use std::env;
use std::io;
use std::process::ExitCode;

use teer_eng::Engine;
use teer_eng::configuration::{Backend, Settings, get_configuration};
use teer_eng::csv::{read_journal, write_accounts};
use teer_eng::store::{MemoryStore, SqliteStore, Store};
use teer_eng::telemetry::{get_subscriber, init_subscriber};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_subscriber(get_subscriber("warn", io::stderr)) {
        eprintln!("failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: teer-eng <journal.csv>");
        return ExitCode::FAILURE;
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let settings = match get_configuration() {
        Ok(settings) => settings,
        Err(e) => {
            error!(reason = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match settings.storage.backend {
        Backend::Memory => replay(MemoryStore::new(), &settings, path).await,
        Backend::Sqlite => {
            let store = settings
                .storage
                .sqlite_path()
                .map_err(|e| e.to_string())
                .and_then(|db| SqliteStore::open(db).map_err(|e| e.to_string()));
            match store {
                Ok(store) => replay(store, &settings, path).await,
                Err(reason) => {
                    error!(reason, "failed to open storage");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn replay<S: Store>(store: S, settings: &Settings, path: String) -> ExitCode {
    let schedule = match settings.schedule.schedule() {
        Ok(schedule) => schedule,
        Err(e) => {
            error!(reason = %e, "invalid schedule");
            return ExitCode::FAILURE;
        }
    };
    let commands = match read_journal(path) {
        Ok(commands) => commands,
        Err(e) => {
            error!(reason = %e, "cannot read journal");
            return ExitCode::FAILURE;
        }
    };

    let engine = Engine::new(store, schedule, settings.policy.clone());
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(cmd_receiver)).await;

    let written = engine
        .accounts()
        .map_err(|e| e.to_string())
        .and_then(|accounts| write_accounts(io::stdout().lock(), accounts).map_err(|e| e.to_string()));
    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(reason) => {
            error!(reason, "failed to write balances");
            ExitCode::FAILURE
        }
    }
}
