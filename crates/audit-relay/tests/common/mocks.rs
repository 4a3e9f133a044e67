// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations for integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use audit_relay::errors::SinkError;
use audit_relay::sink::{Sink, SinkConnector, SinkSettings, UnixSocketConnector};

/// Wraps the Unix socket connector and counts the sink contexts it creates.
#[derive(Default)]
pub struct CountingConnector {
    connects: AtomicUsize,
}

impl CountingConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkConnector for CountingConnector {
    async fn connect(&self, settings: &SinkSettings) -> Result<Arc<dyn Sink>, SinkError> {
        let sink = UnixSocketConnector.connect(settings).await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(sink)
    }
}
