// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::queue::EventQueue;
use crate::worker::StopSignal;

/// Periodically logs the queue depth and its historical maximum.
pub struct StatsReporter {
    queue: EventQueue,
    period: Duration,
    stop: StopSignal,
}

impl StatsReporter {
    pub fn new(queue: EventQueue, period: Duration, stop: StopSignal) -> Self {
        Self {
            queue,
            period,
            stop,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;
                () = self.stop.stopped() => break,
                _ = ticker.tick() => self.report(),
            }
        }
        debug!("Stats reporter stopped");
    }

    fn report(&self) {
        info!("Max queue length seen: {}", self.queue.max_len_seen());
        info!("Current queue length: {}", self.queue.len());
    }
}
