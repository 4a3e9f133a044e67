// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background worker tasks and their cooperative shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

/// How long a stopping worker is given to wind down before it is aborted.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stop request observed by a worker between its blocking operations.
#[derive(Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    drain: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the worker should finish the work already queued before exiting.
    pub fn should_drain(&self) -> bool {
        self.drain.load(Ordering::Acquire)
    }

    pub fn stop(&self, drain: bool) {
        self.drain.store(drain, Ordering::Release);
        self.token.cancel();
    }
}

/// A spawned worker together with the signal used to stop it.
pub struct Worker {
    name: &'static str,
    signal: StopSignal,
    task: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<F>(name: &'static str, signal: StopSignal, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("Starting {name} worker");
        Self {
            name,
            signal,
            task: tokio::spawn(work.in_current_span()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the worker task has ended on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Requests a stop and waits up to `timeout` for the worker to end, aborting it afterwards.
    pub async fn stop(mut self, drain: bool, timeout: Duration) {
        self.signal.stop(drain);
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => debug!("{} worker stopped", self.name),
            Ok(Err(e)) => error!("{} worker failed: {}", self.name, e),
            Err(_) => {
                warn!("{} worker did not stop within {:?}, aborting", self.name, timeout);
                self.task.abort();
            }
        }
    }
}
