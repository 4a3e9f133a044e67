// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivers queued events to the sink.
//!
//! Delivery is at most once: an event is released after its submission whatever the outcome. A
//! failed submission ends the dispatcher and asks the supervisor to rebuild the sink context.

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::event::StructuredEvent;
use crate::queue::EventQueue;
use crate::sink::Sink;
use crate::state::StateHandle;
use crate::worker::StopSignal;

/// Payload submitted with every event. The sink refuses empty payloads, and the meaningful
/// content travels in the event's metadata.
pub const PAYLOAD: &[u8] = b"see app-meta";

pub struct Dispatcher {
    queue: EventQueue,
    sink: Arc<dyn Sink>,
    state: StateHandle,
    stop: StopSignal,
}

impl Dispatcher {
    pub fn new(queue: EventQueue, sink: Arc<dyn Sink>, state: StateHandle, stop: StopSignal) -> Self {
        Self {
            queue,
            sink,
            state,
            stop,
        }
    }

    pub async fn run(self) {
        debug!("Dispatcher started");
        loop {
            let event = tokio::select! {
                biased;
                () = self.stop.stopped() => break,
                event = self.queue.dequeue() => event,
            };
            if !self.deliver(event).await {
                return;
            }
        }

        if self.stop.should_drain() {
            let mut drained = 0usize;
            while let Some(event) = self.queue.try_dequeue() {
                if !self.deliver(event).await {
                    return;
                }
                drained += 1;
            }
            debug!("Dispatcher delivered {drained} queued events before stopping");
        }
        debug!("Dispatcher stopped");
    }

    /// Returns whether the dispatcher may keep going.
    async fn deliver(&self, event: StructuredEvent) -> bool {
        let result = self.sink.submit(&event, PAYLOAD).await;
        drop(event);
        match result {
            Ok(()) => {
                trace!("Submitted audit event");
                true
            }
            Err(e) => {
                error!("Failed to submit audit event: {e}");
                if self.state.request_reload() {
                    debug!("Requested sink reload after submission failure");
                }
                false
            }
        }
    }
}
