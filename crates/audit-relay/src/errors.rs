// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the audit relay pipeline.

use std::path::PathBuf;

/// Errors raised while reading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[source] Box<figment::Error>),
}

/// Errors raised while building a sink context or submitting to it.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to connect to sink socket {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("schema directory {0} does not exist or is not a directory")]
    Schemas(PathBuf),
    #[error("failed to load credential {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to submit event: {0}")]
    Submit(std::io::Error),
    #[error("sink rejected event: {0}")]
    Rejected(String),
    #[error("payload must not be empty")]
    EmptyPayload,
}

/// Reasons a completed raw event could not be turned into a structured event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("event has no fields before the end-of-event marker")]
    Empty,
    #[error("record {record} has a field with an empty name")]
    EmptyFieldName { record: usize },
    #[error("event has more than {limit} fields")]
    TooManyParameters { limit: usize },
}

/// Unrecoverable supervisor failures. These end the daemon with a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to load initial configuration: {0}")]
    InitialConfig(#[source] ConfigError),
    #[error("failed to create initial sink context: {0}")]
    InitialSink(#[source] SinkError),
    #[error("failed to read audit feed: {0}")]
    Input(#[source] std::io::Error),
}
