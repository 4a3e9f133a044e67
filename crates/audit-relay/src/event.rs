// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Raw audit records as emitted by the feed parser, and the structured events built from them.

use serde::Serialize;

/// Field name of the end-of-event marker.
pub const SENTINEL_KEY: &str = "type";
/// Field value of the end-of-event marker.
pub const SENTINEL_VALUE: &str = "EOE";

pub const LOGGER_NAME: &str = "auditd";
pub const SOURCE_NAME: &str = "auditd";
pub const STRUCTURED_DATA_ID: &str = "audit";

/// Identifies which audit occurrence a record belongs to, parsed from `msg=audit(<ts>:<serial>):`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventId {
    pub timestamp: String,
    pub serial: u64,
}

/// One line of the audit feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// The line exactly as received, without its terminating newline.
    pub text: String,
    pub fields: Vec<(String, String)>,
    pub id: Option<EventId>,
}

impl RawRecord {
    pub fn is_sentinel(&self) -> bool {
        self.fields.iter().any(|(k, v)| is_sentinel(k, v))
    }
}

pub fn is_sentinel(key: &str, value: &str) -> bool {
    key == SENTINEL_KEY && value == SENTINEL_VALUE
}

/// A completed group of records describing one audit occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEvent {
    records: Vec<RawRecord>,
}

impl RawEvent {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn id(&self) -> Option<&EventId> {
        self.records.iter().find_map(|r| r.id.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn push(&mut self, record: RawRecord) {
        self.records.push(record);
    }
}

/// Kind of application metadata attached to a submitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    Logger,
}

/// A sink-ready representation of one audit occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredEvent {
    pub kind: MetadataKind,
    pub logger_name: &'static str,
    pub source_name: &'static str,
    pub structured_data_id: &'static str,
    pub parameters: Vec<(String, String)>,
    pub message: String,
}

impl StructuredEvent {
    pub fn new(parameters: Vec<(String, String)>, message: String) -> Self {
        Self {
            kind: MetadataKind::Logger,
            logger_name: LOGGER_NAME,
            source_name: SOURCE_NAME,
            structured_data_id: STRUCTURED_DATA_ID,
            parameters,
            message,
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
