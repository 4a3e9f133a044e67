// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The audit-logging sink.
//!
//! A [`SinkConnector`] creates one [`Sink`] context per reload cycle, loading credentials when
//! they are configured. Dropping the context destroys it. [`UnixSocketConnector`] talks to a local
//! sink over a Unix stream socket, writing one JSON document per line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::errors::SinkError;
use crate::event::{StructuredEvent, SOURCE_NAME};

/// Everything needed to build a sink context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    pub socket_path: PathBuf,
    pub schemas_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
}

/// An authenticated session with the sink.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Submits one event. `payload` must not be empty.
    async fn submit(&self, event: &StructuredEvent, payload: &[u8]) -> Result<(), SinkError>;
}

/// Builds sink contexts.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn connect(&self, settings: &SinkSettings) -> Result<Arc<dyn Sink>, SinkError>;
}

/// PEM material used to authenticate with the sink.
///
/// The private key is only checked for presence and armour; it is not kept once validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub certificate: Option<String>,
}

impl Credentials {
    pub fn load(key_path: Option<&Path>, cert_path: Option<&Path>) -> Result<Self, SinkError> {
        if let Some(path) = key_path {
            read_pem(path, "PRIVATE KEY")?;
        }
        Ok(Self {
            certificate: cert_path
                .map(|path| read_pem(path, "CERTIFICATE"))
                .transpose()?,
        })
    }
}

fn read_pem(path: &Path, label: &str) -> Result<String, SinkError> {
    let pem = std::fs::read_to_string(path).map_err(|e| SinkError::Credentials {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let armoured = pem
        .lines()
        .any(|line| line.starts_with("-----BEGIN ") && line.contains(label));
    if !armoured {
        return Err(SinkError::Credentials {
            path: path.to_path_buf(),
            reason: format!("no PEM block containing {label}"),
        });
    }
    Ok(pem)
}

#[derive(Serialize)]
struct Hello<'a> {
    source: &'a str,
    schemas: Option<&'a Path>,
    certificate: Option<&'a str>,
}

#[derive(Serialize)]
struct Record<'a> {
    event: &'a StructuredEvent,
    payload: &'a str,
}

/// Connects to a local sink listening on a Unix stream socket.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSocketConnector;

#[cfg(unix)]
#[async_trait]
impl SinkConnector for UnixSocketConnector {
    async fn connect(&self, settings: &SinkSettings) -> Result<Arc<dyn Sink>, SinkError> {
        use tokio::io::AsyncWriteExt;

        if let Some(schemas) = &settings.schemas_path {
            if !schemas.is_dir() {
                return Err(SinkError::Schemas(schemas.clone()));
            }
        }
        let credentials =
            Credentials::load(settings.key_path.as_deref(), settings.cert_path.as_deref())?;

        let mut stream = tokio::net::UnixStream::connect(&settings.socket_path)
            .await
            .map_err(|source| SinkError::Connect {
                path: settings.socket_path.clone(),
                source,
            })?;

        let mut hello = serde_json::to_vec(&Hello {
            source: SOURCE_NAME,
            schemas: settings.schemas_path.as_deref(),
            certificate: credentials.certificate.as_deref(),
        })?;
        hello.push(b'\n');
        stream
            .write_all(&hello)
            .await
            .map_err(|source| SinkError::Connect {
                path: settings.socket_path.clone(),
                source,
            })?;

        debug!(
            "Connected to sink at {}",
            settings.socket_path.display()
        );
        Ok(Arc::new(UnixSocketSink {
            stream: tokio::sync::Mutex::new(stream),
        }))
    }
}

#[cfg(unix)]
pub struct UnixSocketSink {
    stream: tokio::sync::Mutex<tokio::net::UnixStream>,
}

#[cfg(unix)]
#[async_trait]
impl Sink for UnixSocketSink {
    async fn submit(&self, event: &StructuredEvent, payload: &[u8]) -> Result<(), SinkError> {
        use tokio::io::AsyncWriteExt;

        if payload.is_empty() {
            return Err(SinkError::EmptyPayload);
        }
        let payload = String::from_utf8_lossy(payload);
        let mut line = serde_json::to_vec(&Record {
            event,
            payload: &payload,
        })?;
        line.push(b'\n');

        let mut stream = self.stream.lock().await;
        stream.write_all(&line).await.map_err(SinkError::Submit)?;
        stream.flush().await.map_err(SinkError::Submit)
    }
}
