// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Feed ingestion: turns the raw byte stream of the audit feed into completed event groups.
//!
//! The audit feed is line oriented. Each line is one record made of whitespace separated
//! `key=value` fields, and records that belong to the same audit occurrence share the event id
//! found in their `msg=audit(<timestamp>:<serial>):` header. A group is complete when its
//! end-of-event record (`type=EOE`) arrives, when a record of a different occurrence shows up, or
//! when it has been open longer than the end-of-event timeout and is aged out.

use std::time::{Duration, Instant};

use crate::event::{EventId, RawEvent, RawRecord};

/// Longest single record accepted before it is cut, matching the kernel's audit message limit.
pub const MAX_AUDIT_MESSAGE_LENGTH: usize = 8970;

/// How long a group may stay open without its end-of-event record before it is aged out.
pub const DEFAULT_EOE_TIMEOUT: Duration = Duration::from_secs(2);

/// Contract of the record parser driven by the supervisor.
///
/// Completed groups are returned in completion order from whichever call completed them.
pub trait FeedParser: Send {
    /// Appends bytes to the parser's buffer and returns the groups they complete.
    fn feed(&mut self, data: &[u8]) -> Vec<RawEvent>;

    /// Whether an incomplete record or group is pending.
    fn has_buffered_data(&self) -> bool;

    /// Emits groups that have been open for longer than the end-of-event timeout.
    fn age_events(&mut self) -> Vec<RawEvent>;

    /// Emits everything still buffered. Called once at shutdown.
    fn flush(&mut self) -> Vec<RawEvent>;
}

struct OpenGroup {
    event: RawEvent,
    id: Option<EventId>,
    opened_at: Instant,
}

/// Line oriented parser for the text audit feed.
pub struct AuditFeed {
    partial: Vec<u8>,
    open: Option<OpenGroup>,
    eoe_timeout: Duration,
}

impl Default for AuditFeed {
    fn default() -> Self {
        Self::new(DEFAULT_EOE_TIMEOUT)
    }
}

impl AuditFeed {
    pub fn new(eoe_timeout: Duration) -> Self {
        Self {
            partial: Vec::new(),
            open: None,
            eoe_timeout,
        }
    }

    fn accept_line(&mut self, line: &[u8], ready: &mut Vec<RawEvent>) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        if text.trim().is_empty() {
            return;
        }

        let record = parse_record(text);

        // A record of another occurrence closes the group that is still open.
        let closes_open = match (&self.open, &record.id) {
            (Some(open), Some(id)) => open.id.as_ref().is_some_and(|open_id| open_id != id),
            _ => false,
        };
        if closes_open {
            if let Some(group) = self.open.take() {
                ready.push(group.event);
            }
        }

        let complete = record.is_sentinel();
        let group = self.open.get_or_insert_with(|| OpenGroup {
            event: RawEvent::default(),
            id: None,
            opened_at: Instant::now(),
        });
        if group.id.is_none() {
            group.id.clone_from(&record.id);
        }
        group.event.push(record);

        if complete {
            if let Some(group) = self.open.take() {
                ready.push(group.event);
            }
        }
    }
}

impl FeedParser for AuditFeed {
    fn feed(&mut self, data: &[u8]) -> Vec<RawEvent> {
        let mut ready = Vec::new();
        let mut buf = std::mem::take(&mut self.partial);
        buf.extend_from_slice(data);

        let mut start = 0;
        while let Some(pos) = buf[start..].iter().position(|&b| b == b'\n') {
            self.accept_line(&buf[start..start + pos], &mut ready);
            start += pos + 1;
        }
        while buf.len() - start >= MAX_AUDIT_MESSAGE_LENGTH {
            self.accept_line(&buf[start..start + MAX_AUDIT_MESSAGE_LENGTH], &mut ready);
            start += MAX_AUDIT_MESSAGE_LENGTH;
        }

        buf.drain(..start);
        self.partial = buf;
        ready
    }

    fn has_buffered_data(&self) -> bool {
        !self.partial.is_empty() || self.open.is_some()
    }

    fn age_events(&mut self) -> Vec<RawEvent> {
        match &self.open {
            Some(group) if group.opened_at.elapsed() >= self.eoe_timeout => self
                .open
                .take()
                .map(|group| vec![group.event])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn flush(&mut self) -> Vec<RawEvent> {
        let mut ready = Vec::new();
        let partial = std::mem::take(&mut self.partial);
        if !partial.is_empty() {
            self.accept_line(&partial, &mut ready);
        }
        if let Some(group) = self.open.take() {
            ready.push(group.event);
        }
        ready
    }
}

/// Splits one line of the feed into its fields.
///
/// The `msg=audit(...):` header becomes the record's event id rather than a field. Userspace
/// records nest their payload as `msg='k=v k=v'`; the quoted fields are lifted to the record.
pub fn parse_record(text: &str) -> RawRecord {
    let mut fields = Vec::new();
    let mut id = None;
    let mut in_quoted_msg = false;

    for token in text.split_whitespace() {
        let mut token = token;
        if in_quoted_msg {
            if let Some(stripped) = token.strip_suffix('\'') {
                token = stripped;
                in_quoted_msg = false;
            }
        }
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key == "msg" {
            if value.starts_with("audit(") {
                id = parse_event_id(value);
                continue;
            }
            if let Some(inner) = value.strip_prefix('\'') {
                let inner = match inner.strip_suffix('\'') {
                    Some(closed) => closed,
                    None => {
                        in_quoted_msg = true;
                        inner
                    }
                };
                if let Some((k, v)) = inner.split_once('=') {
                    fields.push((k.to_string(), v.to_string()));
                }
                continue;
            }
        }
        fields.push((key.to_string(), value.to_string()));
    }

    RawRecord {
        text: text.to_string(),
        fields,
        id,
    }
}

fn parse_event_id(value: &str) -> Option<EventId> {
    let inner = value.strip_prefix("audit(")?;
    let inner = &inner[..inner.find(')')?];
    let (timestamp, serial) = inner.rsplit_once(':')?;
    Some(EventId {
        timestamp: timestamp.to_string(),
        serial: serial.parse().ok()?,
    })
}
