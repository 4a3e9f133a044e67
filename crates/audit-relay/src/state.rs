// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The daemon state word shared by the signal listener, the supervisor and the dispatcher.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DaemonState {
    Run = 0,
    Stop = 1,
    Reload = 2,
}

impl DaemonState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Stop,
            2 => Self::Reload,
            _ => Self::Run,
        }
    }
}

struct Inner {
    state: AtomicU8,
    changed: Notify,
}

/// Cloneable handle to the daemon state.
///
/// Writers only perform atomic stores and a wake-up, so they are safe to call from the signal
/// listener. `Stop` is terminal: later reload requests are ignored.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<Inner>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(DaemonState::Run as u8),
                changed: Notify::new(),
            }),
        }
    }

    pub fn get(&self) -> DaemonState {
        DaemonState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn request_stop(&self) {
        self.inner
            .state
            .store(DaemonState::Stop as u8, Ordering::Release);
        self.inner.changed.notify_one();
    }

    /// Moves to `Reload` unless the daemon is stopping. Returns whether the request was recorded.
    pub fn request_reload(&self) -> bool {
        let recorded = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != DaemonState::Stop as u8).then_some(DaemonState::Reload as u8)
            })
            .is_ok();
        if recorded {
            self.inner.changed.notify_one();
        }
        recorded
    }

    /// Returns to `Run` after a completed reload cycle, unless a stop arrived meanwhile.
    pub(crate) fn mark_running(&self) -> DaemonState {
        let _ = self.inner.state.compare_exchange(
            DaemonState::Reload as u8,
            DaemonState::Run as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.get()
    }

    /// Resolves after the next state change notification.
    pub async fn changed(&self) {
        self.inner.changed.notified().await;
    }
}
