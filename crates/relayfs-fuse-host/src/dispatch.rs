// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Control-thread dispatcher
//!
//! Drains the mount's handoff channel, validates each envelope against the
//! operation catalog, and invokes the handler method bound to its kind. Runs
//! on exactly one thread per mount; the handler therefore never observes
//! concurrency. The handler's `destroy` runs exactly once when the loop winds
//! down, whether through a transport Destroy or an owner-requested stop.

use crate::envelope::RequestEnvelope;
use crate::error::{BridgeError, BridgeResult};
use crate::handler::FsHandler;
use crate::mount::MountContext;
use relayfs_proto::{check_envelope, OpArgs, RequestHandle, RequestMeta};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

enum Flow {
    Continue,
    Destroyed,
}

pub struct Dispatcher<H: FsHandler> {
    mount: Arc<MountContext>,
    handler: H,
}

impl<H: FsHandler> Dispatcher<H> {
    pub fn new(mount: Arc<MountContext>, handler: H) -> Self {
        Self { mount, handler }
    }

    /// Drive the drain loop until the mount is destroyed or a stop is
    /// requested. A stop request lets already-queued envelopes finish first.
    pub fn run(mut self) {
        info!(target: "relayfs::dispatch", "control thread entering drain loop");
        'outer: loop {
            let batch = self.mount.channel().drain();
            if batch.is_empty() {
                if self.mount.stop_requested() {
                    break;
                }
                self.mount.channel().wake().wait();
                continue;
            }
            for envelope in batch {
                if let Flow::Destroyed = self.dispatch_one(envelope) {
                    break 'outer;
                }
            }
        }

        let discarded = self.mount.retire();
        debug!(
            target: "relayfs::dispatch",
            discarded,
            "control thread winding down"
        );
        self.handler.destroy();
    }

    fn dispatch_one(&mut self, envelope: RequestEnvelope) -> Flow {
        let (meta, kind, args, reply) = envelope.into_parts();

        if let Err(err) = check_envelope(kind, &args, self.mount.xattr_layout()) {
            // Fatal to this envelope only; the loop keeps draining.
            warn!(
                target: "relayfs::dispatch",
                unique = meta.unique,
                %err,
                "undecodable envelope"
            );
            if let Some(handle) = reply {
                handle.error(err.errno());
            }
            return Flow::Continue;
        }

        debug!(
            target: "relayfs::dispatch",
            op = %kind,
            unique = meta.unique,
            "dispatching"
        );

        match args {
            OpArgs::Init { record, responder } => {
                let outcome = self.handler.init(&record);
                if let Ok(want) = outcome {
                    self.mount.store_negotiation(record, want);
                }
                if responder.send(outcome).is_err() {
                    warn!(
                        target: "relayfs::dispatch",
                        "init rendezvous abandoned by the transport"
                    );
                }
                Flow::Continue
            }
            OpArgs::Destroy => {
                info!(target: "relayfs::dispatch", "destroy received; retiring mount");
                Flow::Destroyed
            }
            args => {
                let Some(reply) = reply else {
                    warn!(
                        target: "relayfs::dispatch",
                        op = %kind,
                        unique = meta.unique,
                        "bridged envelope carries no reply handle"
                    );
                    return Flow::Continue;
                };
                self.invoke(&meta, args, reply);
                Flow::Continue
            }
        }
    }

    fn invoke(&mut self, meta: &RequestMeta, args: OpArgs, reply: RequestHandle) {
        match args {
            // Handled in dispatch_one; a copy that reaches here is malformed.
            OpArgs::Init { .. } | OpArgs::Destroy => reply.error(libc::EIO),
            OpArgs::Lookup { parent, name } => self.handler.lookup(meta, parent, &name, reply),
            OpArgs::GetAttr { ino, fh } => self.handler.getattr(meta, ino, fh, reply),
            OpArgs::SetAttr { ino, changes } => self.handler.setattr(meta, ino, changes, reply),
            OpArgs::ReadLink { ino } => self.handler.readlink(meta, ino, reply),
            OpArgs::MkNod {
                parent,
                name,
                mode,
                umask,
                rdev,
            } => self.handler.mknod(meta, parent, &name, mode, umask, rdev, reply),
            OpArgs::MkDir {
                parent,
                name,
                mode,
                umask,
            } => self.handler.mkdir(meta, parent, &name, mode, umask, reply),
            OpArgs::Unlink { parent, name } => self.handler.unlink(meta, parent, &name, reply),
            OpArgs::RmDir { parent, name } => self.handler.rmdir(meta, parent, &name, reply),
            OpArgs::SymLink {
                parent,
                name,
                target,
            } => self.handler.symlink(meta, parent, &name, &target, reply),
            OpArgs::Rename {
                parent,
                name,
                newparent,
                newname,
                flags,
            } => self
                .handler
                .rename(meta, parent, &name, newparent, &newname, flags, reply),
            OpArgs::Link {
                ino,
                newparent,
                newname,
            } => self.handler.link(meta, ino, newparent, &newname, reply),
            OpArgs::Open { ino, flags } => self.handler.open(meta, ino, flags, reply),
            OpArgs::Read {
                ino,
                fh,
                offset,
                size,
                flags,
                lock_owner,
            } => self
                .handler
                .read(meta, ino, fh, offset, size, flags, lock_owner, reply),
            OpArgs::Write {
                ino,
                fh,
                offset,
                data,
                write_flags,
                flags,
                lock_owner,
            } => self.handler.write(
                meta,
                ino,
                fh,
                offset,
                &data,
                write_flags,
                flags,
                lock_owner,
                reply,
            ),
            OpArgs::Flush {
                ino,
                fh,
                lock_owner,
            } => self.handler.flush(meta, ino, fh, lock_owner, reply),
            OpArgs::Release {
                ino,
                fh,
                flags,
                lock_owner,
                flush,
            } => self
                .handler
                .release(meta, ino, fh, flags, lock_owner, flush, reply),
            OpArgs::FSync { ino, fh, datasync } => {
                self.handler.fsync(meta, ino, fh, datasync, reply)
            }
            OpArgs::OpenDir { ino, flags } => self.handler.opendir(meta, ino, flags, reply),
            OpArgs::ReadDir { ino, fh, offset } => {
                self.handler.readdir(meta, ino, fh, offset, reply)
            }
            OpArgs::ReleaseDir { ino, fh, flags } => {
                self.handler.releasedir(meta, ino, fh, flags, reply)
            }
            OpArgs::FSyncDir { ino, fh, datasync } => {
                self.handler.fsyncdir(meta, ino, fh, datasync, reply)
            }
            OpArgs::StatFs { ino } => self.handler.statfs(meta, ino, reply),
            OpArgs::SetXAttr { ino, attr } => self.handler.setxattr(meta, ino, &attr, reply),
            OpArgs::GetXAttr { ino, attr } => self.handler.getxattr(meta, ino, &attr, reply),
            OpArgs::ListXAttr { ino, size } => self.handler.listxattr(meta, ino, size, reply),
            OpArgs::RemoveXAttr { ino, name } => {
                self.handler.removexattr(meta, ino, &name, reply)
            }
            OpArgs::Access { ino, mask } => self.handler.access(meta, ino, mask, reply),
            OpArgs::Create {
                parent,
                name,
                mode,
                umask,
                flags,
            } => self
                .handler
                .create(meta, parent, &name, mode, umask, flags, reply),
            OpArgs::GetLk {
                ino,
                fh,
                owner,
                range,
            } => self.handler.getlk(meta, ino, fh, owner, range, reply),
            OpArgs::SetLk {
                ino,
                fh,
                owner,
                range,
                sleep,
            } => self.handler.setlk(meta, ino, fh, owner, range, sleep, reply),
            OpArgs::Bmap {
                ino,
                blocksize,
                idx,
            } => self.handler.bmap(meta, ino, blocksize, idx, reply),
        }
    }
}

/// Owner of the control thread. Dropping it requests a stop, wakes the
/// dispatcher, and joins.
pub struct ControlThread {
    mount: Arc<MountContext>,
    handle: Option<JoinHandle<()>>,
}

impl ControlThread {
    pub fn spawn<H>(mount: Arc<MountContext>, handler: H) -> BridgeResult<Self>
    where
        H: FsHandler + Send + 'static,
    {
        let dispatcher = Dispatcher::new(Arc::clone(&mount), handler);
        let handle = thread::Builder::new()
            .name("relayfs-control".into())
            .spawn(move || dispatcher.run())
            .map_err(BridgeError::Spawn)?;
        Ok(Self {
            mount,
            handle: Some(handle),
        })
    }

    pub fn mount(&self) -> &Arc<MountContext> {
        &self.mount
    }

    /// Stop the dispatcher and wait for it to finish.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.mount.request_stop();
            let _ = handle.join();
        }
    }
}

impl Drop for ControlThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ReplyLog;
    use relayfs_proto::{
        caps, CapabilityRecord, Errno, OpKind, ReplyPayload, StatfsReply, XattrLayout,
    };
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn meta(unique: u64) -> RequestMeta {
        RequestMeta {
            unique,
            uid: 1000,
            gid: 1000,
            pid: 4242,
        }
    }

    fn submit(
        mount: &Arc<MountContext>,
        log: &ReplyLog,
        meta: RequestMeta,
        args: OpArgs,
    ) {
        let handle = log.handle(meta, args.kind());
        let envelope = RequestEnvelope::new(meta, args, Some(handle), Arc::downgrade(mount));
        mount.submit(envelope).expect("mount alive");
    }

    /// Handler that answers reads with per-inode content and records the
    /// order of control-thread calls.
    struct ScriptedFs {
        calls: Arc<Mutex<Vec<String>>>,
        init_record: Arc<Mutex<Option<CapabilityRecord>>>,
    }

    impl ScriptedFs {
        fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                init_record: Arc::new(Mutex::new(None)),
            }
        }

        fn note(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl FsHandler for ScriptedFs {
        fn init(&mut self, record: &CapabilityRecord) -> Result<u32, Errno> {
            self.note("init");
            *self.init_record.lock().unwrap() = Some(*record);
            Ok(record.clamp_want(caps::ASYNC_READ | caps::POSIX_LOCKS))
        }

        fn destroy(&mut self) {
            self.note("destroy");
        }

        fn read(
            &mut self,
            _meta: &RequestMeta,
            ino: u64,
            _fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: RequestHandle,
        ) {
            self.note(format!("read:{ino}"));
            let content = format!("ino={ino} off={offset} len={size}");
            reply.ok(ReplyPayload::Data(content.into_bytes()));
        }

        fn statfs(&mut self, _meta: &RequestMeta, _ino: u64, reply: RequestHandle) {
            self.note("statfs");
            reply.ok(ReplyPayload::Statfs(StatfsReply {
                blocks: 100,
                bfree: 50,
                bavail: 50,
                files: 10,
                ffree: 5,
                bsize: 4096,
                namelen: 255,
                frsize: 4096,
            }));
        }
    }

    #[test]
    fn concurrent_reads_get_distinct_replies() {
        let mount = MountContext::new(XattrLayout::Plain);
        let log = ReplyLog::new();
        let control = ControlThread::spawn(Arc::clone(&mount), ScriptedFs::new()).unwrap();

        let mut producers = Vec::new();
        for (unique, ino) in [(101u64, 7u64), (102, 8)] {
            let mount = Arc::clone(&mount);
            let log = log.clone();
            producers.push(std::thread::spawn(move || {
                submit(
                    &mount,
                    &log,
                    meta(unique),
                    OpArgs::Read {
                        ino,
                        fh: ino + 100,
                        offset: 0,
                        size: 4096,
                        flags: 0,
                        lock_owner: None,
                    },
                );
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(log.wait_for(2, Duration::from_secs(2)));
        control.join();

        let mut answered: Vec<u64> = log.events().iter().map(|e| e.unique).collect();
        answered.sort_unstable();
        assert_eq!(answered, vec![101, 102]);
        for event in log.events() {
            assert_eq!(event.kind, OpKind::Read);
            let payload = event.outcome.clone().unwrap().unwrap();
            match payload {
                ReplyPayload::Data(data) => {
                    let text = String::from_utf8(data).unwrap();
                    let expected_ino = if event.unique == 101 { 7 } else { 8 };
                    assert!(text.starts_with(&format!("ino={expected_ino} ")));
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[test]
    fn init_negotiates_before_anything_else_is_dispatched() {
        let mount = MountContext::new(XattrLayout::Plain);
        let log = ReplyLog::new();
        let handler = ScriptedFs::new();
        let calls = Arc::clone(&handler.calls);
        let seen_record = Arc::clone(&handler.init_record);

        let record = CapabilityRecord {
            proto_major: 7,
            proto_minor: 31,
            async_read: true,
            max_write: 131072,
            max_readahead: 65536,
            capable: caps::ASYNC_READ | caps::BIG_WRITES,
            want: 0,
        };

        // Queue Init and a follow-up operation before the control thread
        // starts, so both land in one drain.
        let (tx, rx) = mpsc::sync_channel(1);
        let init = RequestEnvelope::new(
            meta(1),
            OpArgs::Init {
                record,
                responder: tx,
            },
            None,
            Arc::downgrade(&mount),
        );
        mount.submit(init).unwrap();
        submit(&mount, &log, meta(2), OpArgs::StatFs { ino: 1 });

        let control = ControlThread::spawn(Arc::clone(&mount), handler).unwrap();

        // The want subset comes back through the rendezvous: ASYNC_READ is
        // offered and granted, POSIX_LOCKS is not offered and gets clamped.
        let want = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(want, caps::ASYNC_READ);

        assert!(log.wait_for(1, Duration::from_secs(2)));
        control.join();

        assert_eq!(seen_record.lock().unwrap().unwrap(), record);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["init", "statfs", "destroy"]
        );
        assert_eq!(mount.capabilities().unwrap().max_write, 131072);
        assert_eq!(mount.negotiated_want(), Some(caps::ASYNC_READ));
    }

    #[test]
    fn undecodable_envelope_fails_alone() {
        let mount = MountContext::new(XattrLayout::Plain);
        let log = ReplyLog::new();

        // Tag says Read, arguments marshal ReadLink: arity drift.
        let corrupt = RequestEnvelope::tagged(
            OpKind::Read,
            meta(11),
            OpArgs::ReadLink { ino: 3 },
            Some(log.handle(meta(11), OpKind::Read)),
            Arc::downgrade(&mount),
        );
        mount.submit(corrupt).unwrap();
        submit(&mount, &log, meta(12), OpArgs::StatFs { ino: 1 });

        let control = ControlThread::spawn(Arc::clone(&mount), ScriptedFs::new()).unwrap();
        assert!(log.wait_for(2, Duration::from_secs(2)));
        control.join();

        let events = log.events();
        let corrupt_reply = events.iter().find(|e| e.unique == 11).unwrap();
        assert_eq!(
            corrupt_reply.outcome.clone().unwrap().unwrap_err(),
            libc::EIO
        );
        // The bridge keeps draining: the well-formed follow-up succeeds.
        let good_reply = events.iter().find(|e| e.unique == 12).unwrap();
        assert!(good_reply.outcome.clone().unwrap().is_ok());
    }

    #[test]
    fn destroy_discards_everything_behind_it() {
        let mount = MountContext::new(XattrLayout::Plain);
        let log = ReplyLog::new();
        let handler = ScriptedFs::new();
        let calls = Arc::clone(&handler.calls);

        let destroy = RequestEnvelope::new(
            meta(0),
            OpArgs::Destroy,
            None,
            Arc::downgrade(&mount),
        );
        mount.submit(destroy).unwrap();
        submit(&mount, &log, meta(21), OpArgs::StatFs { ino: 1 });
        submit(&mount, &log, meta(22), OpArgs::ReadLink { ino: 4 });

        let control = ControlThread::spawn(Arc::clone(&mount), handler).unwrap();
        assert!(log.wait_for(2, Duration::from_secs(2)));
        control.join();

        // Neither queued operation was dispatched; both handles were dropped
        // unanswered because the transport is tearing down.
        for event in log.events() {
            assert!(event.outcome.is_none(), "{event:?} should be discarded");
        }
        assert_eq!(calls.lock().unwrap().as_slice(), ["destroy"]);
        assert!(!mount.is_alive());
    }

    #[test]
    fn default_handler_methods_answer_enosys() {
        struct Bare;
        impl FsHandler for Bare {}

        let mount = MountContext::new(XattrLayout::Plain);
        let log = ReplyLog::new();
        submit(
            &mount,
            &log,
            meta(31),
            OpArgs::Bmap {
                ino: 5,
                blocksize: 4096,
                idx: 9,
            },
        );

        let control = ControlThread::spawn(Arc::clone(&mount), Bare).unwrap();
        assert!(log.wait_for(1, Duration::from_secs(2)));
        control.join();

        let event = &log.events()[0];
        assert_eq!(event.kind, OpKind::Bmap);
        assert_eq!(event.outcome.clone().unwrap().unwrap_err(), libc::ENOSYS);
    }

    #[test]
    fn stop_request_finishes_queued_work_first() {
        let mount = MountContext::new(XattrLayout::Plain);
        let log = ReplyLog::new();
        let handler = ScriptedFs::new();
        let calls = Arc::clone(&handler.calls);

        submit(&mount, &log, meta(41), OpArgs::StatFs { ino: 1 });
        let control = ControlThread::spawn(Arc::clone(&mount), handler).unwrap();
        assert!(log.wait_for(1, Duration::from_secs(2)));
        control.join();

        assert_eq!(calls.lock().unwrap().as_slice(), ["statfs", "destroy"]);
        assert!(!mount.is_alive());
    }
}
