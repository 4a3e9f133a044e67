// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The supervisor drives ingestion and owns the daemon state machine.
//!
//! Each reload cycle loads the configuration, stops the previous workers, replaces the sink
//! context and starts a fresh dispatcher (and stats reporter when enabled). Between reloads the
//! supervisor reads the audit feed, translates every completed event and enqueues it. When the
//! parser holds an incomplete event the read is bounded so the event can be aged out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::errors::SupervisorError;
use crate::event::RawEvent;
use crate::feed::{FeedParser, MAX_AUDIT_MESSAGE_LENGTH};
use crate::queue::{Enqueue, EventQueue, QUEUE_FULL_TIMEOUT};
use crate::sink::{Sink, SinkConnector};
use crate::state::{DaemonState, StateHandle};
use crate::stats::StatsReporter;
use crate::translator::translate;
use crate::worker::{StopSignal, Worker, WORKER_JOIN_TIMEOUT};

/// Read timeout used while the parser holds an incomplete event.
pub const AGE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// A termination notification was received.
    Stopped,
    /// The audit feed was closed.
    EndOfInput,
}

pub struct SupervisorConfig {
    /// Configuration file, re-read on every reload.
    pub config_path: PathBuf,
    /// How long translation waits for room in a full queue before dropping an event.
    pub enqueue_timeout: Duration,
    /// How long a stopping worker may take before it is aborted.
    pub join_timeout: Duration,
    pub age_poll_interval: Duration,
}

impl SupervisorConfig {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            enqueue_timeout: QUEUE_FULL_TIMEOUT,
            join_timeout: WORKER_JOIN_TIMEOUT,
            age_poll_interval: AGE_POLL_INTERVAL,
        }
    }
}

enum Input {
    Data(usize),
    Idle,
    StateChanged,
    EndOfInput,
}

pub struct Supervisor<R, P> {
    settings: SupervisorConfig,
    input: R,
    parser: P,
    connector: Arc<dyn SinkConnector>,
    state: StateHandle,
    queue: EventQueue,
    config: Option<Config>,
    sink: Option<Arc<dyn Sink>>,
    dispatcher: Option<Worker>,
    stats: Option<Worker>,
    started: bool,
}

impl<R, P> Supervisor<R, P>
where
    R: AsyncRead + Unpin + Send,
    P: FeedParser,
{
    pub fn new(
        settings: SupervisorConfig,
        input: R,
        parser: P,
        connector: Arc<dyn SinkConnector>,
        state: StateHandle,
    ) -> Self {
        Self {
            settings,
            input,
            parser,
            connector,
            state,
            queue: EventQueue::default(),
            config: None,
            sink: None,
            dispatcher: None,
            stats: None,
            started: false,
        }
    }

    /// Handle to the event queue shared with the workers.
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Runs until a termination notification, the end of the feed, or a fatal error, then shuts
    /// down.
    pub async fn run(mut self) -> Result<Shutdown, SupervisorError> {
        info!("Starting audit relay");
        let outcome = self.drive().await;
        self.shutdown().await;
        outcome
    }

    async fn drive(&mut self) -> Result<Shutdown, SupervisorError> {
        let mut buf = vec![0u8; MAX_AUDIT_MESSAGE_LENGTH];

        while matches!(self.state.get(), DaemonState::Run | DaemonState::Reload) {
            if self.state.get() == DaemonState::Reload || !self.started {
                self.reload().await?;
            }

            while self.state.get() == DaemonState::Run {
                if self.dispatcher.as_ref().is_some_and(Worker::is_finished) {
                    warn!("Dispatcher ended unexpectedly, reloading");
                    self.state.request_reload();
                    break;
                }

                match self.wait_for_input(&mut buf).await {
                    Ok(Input::Data(n)) => {
                        let events = self.parser.feed(&buf[..n]);
                        self.submit(events).await;
                    }
                    Ok(Input::Idle) => {
                        if self.parser.has_buffered_data() {
                            let events = self.parser.age_events();
                            self.submit(events).await;
                        }
                    }
                    Ok(Input::StateChanged) => {}
                    Ok(Input::EndOfInput) => {
                        info!("Audit feed closed");
                        return Ok(Shutdown::EndOfInput);
                    }
                    Err(e) => return Err(SupervisorError::Input(e)),
                }
            }
        }

        Ok(Shutdown::Stopped)
    }

    async fn wait_for_input(&mut self, buf: &mut [u8]) -> std::io::Result<Input> {
        // With a partial event pending, wake up in time to age it out.
        let limit = self
            .parser
            .has_buffered_data()
            .then_some(self.settings.age_poll_interval);
        let state = self.state.clone();
        let read = self.input.read(buf);

        tokio::select! {
            biased;
            () = state.changed() => Ok(Input::StateChanged),
            result = async move {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, read).await.ok(),
                    None => Some(read.await),
                }
            } => match result {
                None => Ok(Input::Idle),
                Some(Ok(0)) => Ok(Input::EndOfInput),
                Some(Ok(n)) => Ok(Input::Data(n)),
                Some(Err(e)) => Err(e),
            },
        }
    }

    /// Translates and enqueues completed events, one at a time and in order.
    ///
    /// Waiting for room is bounded by one queue timeout and only happens while a dispatcher is
    /// draining the queue in `Run`. A state change cuts the wait short, and the rest of the batch
    /// is then queued only where room is left.
    async fn submit(&self, events: Vec<RawEvent>) {
        for raw in events {
            let event = match translate(&raw) {
                Ok(event) => event,
                Err(e) => {
                    error!("Failed to translate audit event, skipping it: {e}");
                    continue;
                }
            };

            let outcome = if self.may_wait_for_room() {
                let left_run = async {
                    while self.state.get() == DaemonState::Run {
                        self.state.changed().await;
                    }
                };
                self.queue
                    .enqueue_until(event, self.settings.enqueue_timeout, left_run)
                    .await
            } else {
                self.queue.enqueue(event, Duration::ZERO).await
            };

            if outcome == Enqueue::Dropped {
                warn!(
                    "Audit event queue full ({} events), dropping event",
                    self.queue.capacity()
                );
            }
        }
    }

    fn may_wait_for_room(&self) -> bool {
        self.state.get() == DaemonState::Run
            && self.dispatcher.as_ref().is_some_and(|d| !d.is_finished())
    }

    async fn reload(&mut self) -> Result<(), SupervisorError> {
        let initial = !self.started;
        info!("Loading config from {}", self.settings.config_path.display());

        let config = match (Config::load(&self.settings.config_path), &self.config) {
            (Ok(config), _) => config,
            (Err(e), _) if initial => return Err(SupervisorError::InitialConfig(e)),
            (Err(e), Some(previous)) => {
                error!("Failed to reload config, keeping the previous settings: {e}");
                previous.clone()
            }
            (Err(e), None) => return Err(SupervisorError::InitialConfig(e)),
        };

        if !initial {
            self.stop_workers(false).await;
        }
        if self.sink.take().is_some() {
            debug!("Destroyed previous sink context");
        }

        self.queue.set_capacity(config.queue_max_length);

        match self.connector.connect(&config.sink_settings()).await {
            Ok(sink) => {
                self.start_workers(&config, Arc::clone(&sink));
                self.sink = Some(sink);
            }
            Err(e) if initial => return Err(SupervisorError::InitialSink(e)),
            Err(e) => error!(
                "Failed to create sink context, audit events will not be delivered until the next reload: {e}"
            ),
        }

        self.config = Some(config);
        self.started = true;
        if self.state.mark_running() == DaemonState::Run {
            info!("Audit relay running");
        }
        Ok(())
    }

    fn start_workers(&mut self, config: &Config, sink: Arc<dyn Sink>) {
        let signal = StopSignal::new();
        let dispatcher = Dispatcher::new(self.queue.clone(), sink, self.state.clone(), signal.clone());
        self.dispatcher = Some(Worker::spawn("dispatcher", signal, dispatcher.run()));

        if config.print_stats {
            let signal = StopSignal::new();
            let reporter =
                StatsReporter::new(self.queue.clone(), config.print_stats_interval, signal.clone());
            self.stats = Some(Worker::spawn("stats", signal, reporter.run()));
        }
    }

    async fn stop_workers(&mut self, drain: bool) {
        if let Some(stats) = self.stats.take() {
            stats.stop(false, self.settings.join_timeout).await;
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop(drain, self.settings.join_timeout).await;
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down audit relay");

        let remaining = self.parser.flush();
        self.submit(remaining).await;

        self.stop_workers(true).await;
        if self.sink.take().is_some() {
            debug!("Destroyed sink context");
        }

        let undelivered = self.queue.len();
        if undelivered > 0 {
            warn!("Discarding {undelivered} undelivered audit events");
        }
        info!("Audit relay stopped");
    }
}
