// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Audit Relay
//!
//! Forwards kernel audit events from the audit dispatcher feed to an audit-logging sink.
//!
//! ## Architecture
//!
//! - [`feed`]: groups the raw text feed into complete events
//! - [`translator`]: turns a completed event into a [`event::StructuredEvent`]
//! - [`queue`]: bounded hand-off between ingestion and delivery
//! - [`dispatcher`]: drains the queue into the [`sink`]
//! - [`stats`]: periodic queue statistics
//! - [`supervisor`]: reload cycles, ingestion and shutdown, driven by [`state`] and [`signals`]

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

/// Configuration file loading
pub mod config;

/// Queue-to-sink delivery worker
pub mod dispatcher;

pub mod errors;

/// Raw and structured audit event types
pub mod event;

/// Audit feed parsing and event grouping
pub mod feed;

pub mod queue;

/// Signal to state mapping
#[cfg(unix)]
pub mod signals;

pub mod sink;
pub mod state;
pub mod stats;
pub mod supervisor;
pub mod translator;

/// Worker tasks and cooperative shutdown
pub mod worker;
