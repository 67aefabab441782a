// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-mount state: the handoff channel, the xattr layout in force, and the
//! capability-negotiation results, which are written once during Init and
//! read-only afterwards.

use crate::channel::HandoffChannel;
use crate::envelope::RequestEnvelope;
use relayfs_proto::{CapabilityRecord, XattrLayout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

pub struct MountContext {
    channel: HandoffChannel,
    layout: XattrLayout,
    /// Connection record delivered by the transport at Init.
    capabilities: OnceLock<CapabilityRecord>,
    /// The handler's negotiated want subset.
    negotiated_want: OnceLock<u32>,
    /// Cleared when Destroy retires the mount.
    alive: AtomicBool,
    /// Raised by the owner to stop the control thread without a Destroy.
    stop: AtomicBool,
}

impl MountContext {
    pub fn new(layout: XattrLayout) -> Arc<Self> {
        Arc::new(Self {
            channel: HandoffChannel::new(),
            layout,
            capabilities: OnceLock::new(),
            negotiated_want: OnceLock::new(),
            alive: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        })
    }

    pub fn xattr_layout(&self) -> XattrLayout {
        self.layout
    }

    /// Hand one envelope to the control thread. Fails by returning the
    /// envelope if the mount has already been retired, so the caller can
    /// still answer the request.
    pub fn submit(&self, envelope: RequestEnvelope) -> Result<(), RequestEnvelope> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(envelope);
        }
        self.channel.submit(envelope);
        if !self.alive.load(Ordering::Acquire) {
            // Lost a race with retire(): its final drain may already be done,
            // so sweep the queue ourselves. Retirement is permanent, which
            // makes the sweep safe against the control thread.
            drop(self.channel.drain());
        }
        Ok(())
    }

    pub fn channel(&self) -> &HandoffChannel {
        &self.channel
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Ask the control thread to wind down without a transport Destroy.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.channel.wake().raise();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn store_negotiation(&self, record: CapabilityRecord, want: u32) {
        // Write-once; a second Init on the same mount is a transport defect
        // and the first record wins.
        if self.capabilities.set(record).is_err() {
            debug!(target: "relayfs::mount", "duplicate capability record ignored");
        }
        let _ = self.negotiated_want.set(want);
    }

    pub fn capabilities(&self) -> Option<&CapabilityRecord> {
        self.capabilities.get()
    }

    pub fn negotiated_want(&self) -> Option<u32> {
        self.negotiated_want.get().copied()
    }

    /// Retire the mount: refuse new submissions and discard everything still
    /// queued. Pending requests can no longer be answered once the transport
    /// is tearing down. Returns how many envelopes were discarded.
    pub fn retire(&self) -> usize {
        self.alive.store(false, Ordering::Release);
        let discarded = self.channel.drain().len();
        if discarded > 0 {
            info!(
                target: "relayfs::mount",
                discarded,
                "dropped pending envelopes at teardown"
            );
        }
        discarded
    }
}

impl std::fmt::Debug for MountContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountContext")
            .field("layout", &self.layout)
            .field("alive", &self.is_alive())
            .field("negotiated", &self.capabilities.get().is_some())
            .finish()
    }
}
