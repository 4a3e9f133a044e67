// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Maps process signals onto daemon state requests.
//!
//! `SIGTERM` and `SIGINT` request a stop, `SIGHUP` requests a reload. The handlers only touch the
//! state word; all work happens in the supervisor.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::state::StateHandle;

/// Installs the signal handlers and spawns the task that forwards them to `state`.
///
/// Handlers are installed before this returns, so signals sent afterwards are never lost. The task
/// ends once a stop has been requested.
pub fn spawn_listener(state: StateHandle) -> io::Result<JoinHandle<()>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = terminate.recv() => {
                    info!("Received SIGTERM, stopping");
                    state.request_stop();
                    break;
                }
                Some(()) = interrupt.recv() => {
                    info!("Received SIGINT, stopping");
                    state.request_stop();
                    break;
                }
                Some(()) = hangup.recv() => {
                    if state.request_reload() {
                        info!("Received SIGHUP, reloading");
                    } else {
                        debug!("Ignoring SIGHUP while stopping");
                    }
                }
                else => break,
            }
        }
    }))
}
