// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use audit_relay::{
    config::Config,
    feed::AuditFeed,
    signals,
    sink::UnixSocketConnector,
    state::StateHandle,
    supervisor::{Shutdown, Supervisor, SupervisorConfig},
};

const LOG_LEVEL_ENV: &str = "AUDIT_RELAY_LOG_LEVEL";

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var(LOG_LEVEL_ENV)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = match EnvFilter::try_new(&log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid {LOG_LEVEL_ENV} value {log_level}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let state = StateHandle::new();
    let listener = match signals::spawn_listener(state.clone()) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let supervisor = Supervisor::new(
        SupervisorConfig::new(Config::path_from_env()),
        tokio::io::stdin(),
        AuditFeed::default(),
        Arc::new(UnixSocketConnector),
        state,
    );

    let outcome = supervisor.run().await;
    listener.abort();

    match outcome {
        Ok(Shutdown::Stopped) => ExitCode::SUCCESS,
        Ok(Shutdown::EndOfInput) => {
            info!("Audit feed ended, exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Audit relay failed: {e}");
            ExitCode::FAILURE
        }
    }
}
