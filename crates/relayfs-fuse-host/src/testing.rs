// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only reply instrumentation for exercising the bridge without a
//! kernel transport.

use relayfs_proto::{Errno, OpKind, ReplyPayload, ReplySink, RequestHandle, RequestMeta};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One observed reply. `outcome` is `None` when the handle was dropped
/// without ever being answered (e.g. discarded at teardown).
#[derive(Clone, Debug)]
pub struct ReplyEvent {
    pub unique: u64,
    pub kind: OpKind,
    pub outcome: Option<Result<ReplyPayload, Errno>>,
}

/// Shared log of every reply sent (or abandoned) through recording sinks.
#[derive(Clone, Default)]
pub struct ReplyLog {
    events: Arc<Mutex<Vec<ReplyEvent>>>,
}

impl ReplyLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a consume-once handle whose sink records into this log.
    pub fn handle(&self, meta: RequestMeta, kind: OpKind) -> RequestHandle {
        RequestHandle::new(
            meta,
            kind,
            Box::new(RecordingSink {
                unique: meta.unique,
                kind,
                log: self.clone(),
                sent: false,
            }),
        )
    }

    pub fn events(&self) -> Vec<ReplyEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll until `count` events have been recorded. Returns whether the
    /// target was reached before the timeout.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn push(&self, event: ReplyEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct RecordingSink {
    unique: u64,
    kind: OpKind,
    log: ReplyLog,
    sent: bool,
}

impl ReplySink for RecordingSink {
    fn send(mut self: Box<Self>, kind: OpKind, outcome: Result<ReplyPayload, Errno>) {
        self.sent = true;
        self.log.push(ReplyEvent {
            unique: self.unique,
            kind,
            outcome: Some(outcome),
        });
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        if !self.sent {
            self.log.push(ReplyEvent {
                unique: self.unique,
                kind: self.kind,
                outcome: None,
            });
        }
    }
}
