// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// A line received by [`SinkServer`], tagged with the index of the connection it arrived on.
#[derive(Debug)]
pub struct ReceivedLine {
    pub connection: usize,
    pub json: serde_json::Value,
}

/// A local sink listening on a Unix socket, collecting every JSON line it is sent.
pub struct SinkServer {
    pub socket_path: PathBuf,
    lines: mpsc::UnboundedReceiver<ReceivedLine>,
}

impl SinkServer {
    pub fn bind(socket_path: PathBuf) -> Self {
        let listener = UnixListener::bind(&socket_path).expect("Failed to bind sink socket");
        let (tx, lines) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(stream).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        let json = serde_json::from_str(&line).expect("Sink received invalid JSON");
                        if tx.send(ReceivedLine { connection, json }).is_err() {
                            break;
                        }
                    }
                });
                connection += 1;
            }
        });

        Self { socket_path, lines }
    }

    /// Waits for the next line, failing the test after two seconds.
    pub async fn next_line(&mut self) -> ReceivedLine {
        timeout(Duration::from_secs(2), self.lines.recv())
            .await
            .expect("Timed out waiting for the sink")
            .expect("Sink server ended")
    }

    /// Asserts nothing else arrives within a short grace period.
    pub async fn assert_idle(&mut self) {
        let extra = timeout(Duration::from_millis(100), self.lines.recv()).await;
        assert!(extra.is_err(), "unexpected sink traffic: {extra:?}");
    }
}

/// Writes a relay config pointing at `socket_path`.
pub fn write_config(path: &Path, socket_path: &Path, extra: &str) {
    let contents = format!("socket = \"{}\"\n{extra}", socket_path.display());
    std::fs::write(path, contents).expect("Failed to write config");
}
