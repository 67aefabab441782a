// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Cross-thread handoff: a lock-free multi-producer queue plus a coalescing
//! wake signal. Producers are the transport's worker threads; the single
//! consumer is the control thread.

use crate::envelope::RequestEnvelope;
use crossbeam_queue::SegQueue;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Edge-style wake primitive. Raising an already-raised signal is a no-op,
/// so any number of submissions between drains costs one wake-up.
pub struct WakeSignal {
    raised: Mutex<bool>,
    cvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock().unwrap();
        if !*raised {
            *raised = true;
            self.cvar.notify_one();
        }
    }

    /// Block until raised, then consume the signal.
    pub fn wait(&self) {
        let mut raised = self.raised.lock().unwrap();
        while !*raised {
            raised = self.cvar.wait(raised).unwrap();
        }
        *raised = false;
    }

    /// Like `wait`, but gives up after `timeout`. Returns whether the signal
    /// fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut raised = self.raised.lock().unwrap();
        while !*raised {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cvar.wait_timeout(raised, deadline - now).unwrap();
            raised = guard;
        }
        *raised = false;
        true
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-mount handoff channel. `submit` never blocks and never loses an
/// envelope; `drain` empties the queue in FIFO order, which preserves each
/// producer's own submission order.
pub struct HandoffChannel {
    queue: SegQueue<RequestEnvelope>,
    wake: WakeSignal,
}

impl HandoffChannel {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            wake: WakeSignal::new(),
        }
    }

    /// Queue one envelope and signal the consumer. Safe from any thread.
    pub fn submit(&self, envelope: RequestEnvelope) {
        self.queue.push(envelope);
        self.wake.raise();
    }

    /// Take everything currently queued. Control thread only.
    pub fn drain(&self) -> Vec<RequestEnvelope> {
        let mut batch = Vec::with_capacity(self.queue.len());
        while let Some(envelope) = self.queue.pop() {
            batch.push(envelope);
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn wake(&self) -> &WakeSignal {
        &self.wake
    }
}

impl Default for HandoffChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayfs_proto::{OpArgs, RequestMeta};
    use std::sync::{Arc, Weak};
    use std::thread;

    fn probe_envelope(unique: u64, ino: u64) -> RequestEnvelope {
        RequestEnvelope::new(
            RequestMeta {
                unique,
                ..Default::default()
            },
            OpArgs::Access {
                ino,
                mask: libc::R_OK,
            },
            None,
            Weak::new(),
        )
    }

    #[test]
    fn drain_returns_submissions_in_fifo_order() {
        let channel = HandoffChannel::new();
        for unique in 0..8 {
            channel.submit(probe_envelope(unique, 1));
        }
        let batch = channel.drain();
        let uniques: Vec<u64> = batch.iter().map(|e| e.meta().unique).collect();
        assert_eq!(uniques, (0..8).collect::<Vec<u64>>());
        assert!(channel.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing_and_keep_their_own_order() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 250;

        let channel = Arc::new(HandoffChannel::new());
        let mut workers = Vec::new();
        for producer in 0..PRODUCERS {
            let channel = Arc::clone(&channel);
            workers.push(thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    // unique encodes (producer, seq) so the drain order can be
                    // checked per producer
                    channel.submit(probe_envelope(producer * 10_000 + seq, producer));
                }
            }));
        }

        let mut drained = Vec::new();
        while drained.len() < (PRODUCERS * PER_PRODUCER) as usize {
            channel.wake().wait_timeout(Duration::from_millis(50));
            drained.extend(channel.drain());
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(channel.is_empty());
        assert_eq!(drained.len(), (PRODUCERS * PER_PRODUCER) as usize);

        for producer in 0..PRODUCERS {
            let seqs: Vec<u64> = drained
                .iter()
                .map(|e| e.meta().unique)
                .filter(|u| u / 10_000 == producer)
                .map(|u| u % 10_000)
                .collect();
            assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<u64>>());
        }
    }

    #[test]
    fn multiple_submits_coalesce_into_one_wake() {
        let channel = HandoffChannel::new();
        for unique in 0..5 {
            channel.submit(probe_envelope(unique, 2));
        }

        // One wake-up covers all five pending envelopes...
        assert!(channel.wake().wait_timeout(Duration::from_millis(10)));
        assert_eq!(channel.drain().len(), 5);

        // ...and no second wake-up is buffered behind it.
        assert!(!channel.wake().wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn raise_after_empty_drain_still_wakes() {
        let channel = Arc::new(HandoffChannel::new());
        let consumer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                channel.wake().wait();
                channel.drain().len()
            })
        };
        // Give the consumer a moment to block, then submit.
        thread::sleep(Duration::from_millis(20));
        channel.submit(probe_envelope(1, 3));
        assert_eq!(consumer.join().unwrap(), 1);
    }
}
