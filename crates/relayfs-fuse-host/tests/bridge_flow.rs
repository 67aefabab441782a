// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end bridge flow over the public API, without a kernel transport:
//! producer threads submit envelopes, the control thread dispatches them, and
//! replies land in per-request sinks.

use relayfs_fuse_host::{ControlThread, FsHandler, MountContext, RequestEnvelope};
use relayfs_proto::{
    Errno, OpArgs, OpKind, ReplyPayload, ReplySink, RequestHandle, RequestMeta, XattrLayout,
};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct ProbeSink {
    unique: u64,
    tx: Sender<(u64, OpKind, Result<ReplyPayload, Errno>)>,
}

impl ReplySink for ProbeSink {
    fn send(self: Box<Self>, kind: OpKind, outcome: Result<ReplyPayload, Errno>) {
        let _ = self.tx.send((self.unique, kind, outcome));
    }
}

struct EchoFs;

impl FsHandler for EchoFs {
    fn read(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        _fh: u64,
        _offset: i64,
        _size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: RequestHandle,
    ) {
        let body = format!("unique={} ino={ino}", meta.unique);
        reply.ok(ReplyPayload::Data(body.into_bytes()));
    }
}

#[test]
fn many_producers_one_control_thread() {
    const PRODUCERS: u64 = 8;
    const PER_PRODUCER: u64 = 50;

    let mount = MountContext::new(XattrLayout::native());
    let control = ControlThread::spawn(Arc::clone(&mount), EchoFs).unwrap();
    let (tx, rx) = channel();

    let mut workers = Vec::new();
    for producer in 0..PRODUCERS {
        let mount = Arc::clone(&mount);
        let tx = tx.clone();
        workers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                let unique = producer * 1_000 + seq;
                let meta = RequestMeta {
                    unique,
                    ..Default::default()
                };
                let handle = RequestHandle::new(
                    meta,
                    OpKind::Read,
                    Box::new(ProbeSink {
                        unique,
                        tx: tx.clone(),
                    }),
                );
                let envelope = RequestEnvelope::new(
                    meta,
                    OpArgs::Read {
                        ino: producer,
                        fh: 1,
                        offset: seq as i64,
                        size: 64,
                        flags: 0,
                        lock_owner: None,
                    },
                    Some(handle),
                    Arc::downgrade(&mount),
                );
                mount.submit(envelope).expect("mount alive while producing");
            }
        }));
    }
    drop(tx);

    let mut replies = Vec::new();
    for _ in 0..(PRODUCERS * PER_PRODUCER) {
        let reply = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("every submitted envelope is answered");
        replies.push(reply);
    }
    for worker in workers {
        worker.join().unwrap();
    }
    control.join();

    // No envelope was lost or answered twice.
    assert_eq!(replies.len(), (PRODUCERS * PER_PRODUCER) as usize);
    let mut uniques: Vec<u64> = replies.iter().map(|(u, _, _)| *u).collect();
    uniques.sort_unstable();
    uniques.dedup();
    assert_eq!(uniques.len(), replies.len());

    // Every reply carries the payload built from its own request.
    for (unique, kind, outcome) in replies {
        assert_eq!(kind, OpKind::Read);
        match outcome.unwrap() {
            ReplyPayload::Data(data) => {
                let text = String::from_utf8(data).unwrap();
                assert!(text.starts_with(&format!("unique={unique} ")));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
