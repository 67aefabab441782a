// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Callback entry points: the `fuser::Filesystem` implementation that
//! marshals every transport invocation into an envelope and hands it to the
//! mount's channel. Entry points do no filesystem work and never block, with
//! one sanctioned exception: Init performs a once-per-mount rendezvous so the
//! negotiated capabilities reach the kernel before anything else runs.
//!
//! `ioctl` and `poll` are deliberately not implemented here; the transport
//! answers them itself and no handler capability exists for them.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use crate::config::BridgeConfig;
use crate::dispatch::ControlThread;
use crate::encode::FuserSink;
use crate::envelope::RequestEnvelope;
use crate::error::BridgeResult;
use crate::handler::FsHandler;
use crate::mount::MountContext;
use fuser::{
    KernelConfig, MountOption, ReplyAttr, ReplyBmap, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyLock, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request,
    TimeOrNow,
};
use libc::{c_int, EIO};
use relayfs_proto::{
    caps, CapabilityRecord, GetXAttrArgs, LockRange, OpArgs, RequestHandle, RequestMeta,
    SetAttrChanges, SetXAttrArgs, TimeRef, XattrLayout,
};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Protocol revision this frontend speaks.
const PROTO_MAJOR: u32 = 7;
const PROTO_MINOR: u32 = 31;

/// Capabilities the fuser transport negotiates on our behalf for this ABI.
const TRANSPORT_CAPS: u32 = caps::ASYNC_READ
    | caps::POSIX_LOCKS
    | caps::ATOMIC_O_TRUNC
    | caps::BIG_WRITES
    | caps::DONT_MASK
    | caps::FLOCK_LOCKS;

fn configure_max_write(config: &mut KernelConfig, desired: u32) -> (u32, bool) {
    match config.set_max_write(desired) {
        Ok(_) => (desired, false),
        Err(limit) => {
            let _ = config.set_max_write(limit);
            (limit, true)
        }
    }
}

fn configure_max_background(config: &mut KernelConfig, desired: u16) -> (u16, bool) {
    match config.set_max_background(desired) {
        Ok(_) => (desired, false),
        Err(limit) => {
            let _ = config.set_max_background(limit);
            (limit, true)
        }
    }
}

fn configure_congestion_threshold(config: &mut KernelConfig, desired: u16) -> (u16, bool) {
    match config.set_congestion_threshold(desired) {
        Ok(_) => (desired, false),
        Err(limit) => {
            let _ = config.set_congestion_threshold(limit);
            (limit, true)
        }
    }
}

fn time_ref(t: TimeOrNow) -> TimeRef {
    match t {
        TimeOrNow::SpecificTime(when) => TimeRef::At(when),
        TimeOrNow::Now => TimeRef::Now,
    }
}

/// The transport-facing half of the bridge.
pub struct FuseFrontend {
    mount: Arc<MountContext>,
    config: BridgeConfig,
}

impl FuseFrontend {
    pub fn new(mount: Arc<MountContext>, config: BridgeConfig) -> Self {
        Self { mount, config }
    }

    pub fn mount_context(&self) -> &Arc<MountContext> {
        &self.mount
    }

    fn meta(req: &Request<'_>) -> RequestMeta {
        RequestMeta {
            unique: req.unique(),
            uid: req.uid(),
            gid: req.gid(),
            pid: req.pid(),
        }
    }

    /// Marshal one operation and hand it off. On a retired mount the request
    /// is failed immediately; nothing may queue behind a teardown.
    fn enqueue(&self, meta: RequestMeta, args: OpArgs, sink: FuserSink) {
        let kind = args.kind();
        debug!(
            target: "relayfs::fuse",
            op = %kind,
            unique = meta.unique,
            "queueing"
        );
        let handle = RequestHandle::new(meta, kind, Box::new(sink));
        let envelope = RequestEnvelope::new(meta, args, Some(handle), Arc::downgrade(&self.mount));
        if let Err(envelope) = self.mount.submit(envelope) {
            warn!(
                target: "relayfs::fuse",
                op = %kind,
                unique = meta.unique,
                "mount retired; failing request"
            );
            let (_, _, _, reply) = envelope.into_parts();
            if let Some(handle) = reply {
                handle.error(EIO);
            }
        }
    }

    fn xattr_layout(&self) -> XattrLayout {
        self.mount.xattr_layout()
    }
}

impl fuser::Filesystem for FuseFrontend {
    fn init(&mut self, req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        let (max_write, clamped_write) = configure_max_write(config, self.config.max_write);
        if clamped_write {
            warn!(
                "Kernel limited max_write to {} bytes (desired {}).",
                max_write, self.config.max_write
            );
        } else {
            info!("Configured FUSE max_write={} bytes", max_write);
        }

        let (max_background, clamped_background) =
            configure_max_background(config, self.config.max_background);
        if clamped_background {
            warn!(
                "Kernel limited max_background to {} (desired {}).",
                max_background, self.config.max_background
            );
        } else {
            info!("Configured FUSE max_background={}", max_background);
        }

        let (congestion, clamped_congestion) = configure_congestion_threshold(
            config,
            self.config.effective_congestion_threshold().min(max_background),
        );
        if clamped_congestion {
            warn!(
                "Kernel limited congestion_threshold to {} (derived from max_background={}).",
                congestion, max_background
            );
        } else {
            info!("Configured FUSE congestion_threshold={}", congestion);
        }

        let record = CapabilityRecord {
            proto_major: PROTO_MAJOR,
            proto_minor: PROTO_MINOR,
            async_read: true,
            max_write,
            max_readahead: self.config.max_readahead,
            capable: TRANSPORT_CAPS,
            want: 0,
        };

        // Once-per-mount rendezvous: the kernel must learn the negotiated
        // capabilities before any other operation is dispatched.
        let (responder, negotiated) = mpsc::sync_channel(1);
        let envelope = RequestEnvelope::new(
            Self::meta(req),
            OpArgs::Init { record, responder },
            None,
            Arc::downgrade(&self.mount),
        );
        if self.mount.submit(envelope).is_err() {
            warn!("mount retired before init");
            return Err(EIO);
        }

        match negotiated.recv() {
            Ok(Ok(want)) => {
                info!(
                    "RelayFS bridge initialized (proto {}.{}, want=0x{:x})",
                    PROTO_MAJOR, PROTO_MINOR, want
                );
                Ok(())
            }
            Ok(Err(errno)) => {
                warn!("handler rejected capability negotiation (errno {errno})");
                Err(errno)
            }
            Err(_) => {
                warn!("control thread unavailable during init");
                Err(EIO)
            }
        }
    }

    fn destroy(&mut self) {
        info!("RelayFS bridge destroyed");
        let envelope = RequestEnvelope::new(
            RequestMeta::default(),
            OpArgs::Destroy,
            None,
            Arc::downgrade(&self.mount),
        );
        let _ = self.mount.submit(envelope);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        // Short-circuited by policy: acknowledged here, never bridged.
        debug!(
            target: "relayfs::fuse",
            ino,
            nlookup,
            "forget acknowledged at entry point"
        );
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Lookup {
                parent,
                name: name.to_os_string(),
            },
            FuserSink::Entry(reply),
        );
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        self.enqueue(
            Self::meta(req),
            OpArgs::GetAttr { ino, fh },
            FuserSink::Attr(reply),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        ctime: Option<SystemTime>,
        fh: Option<u64>,
        crtime: Option<SystemTime>,
        chgtime: Option<SystemTime>,
        bkuptime: Option<SystemTime>,
        flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = SetAttrChanges {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(time_ref),
            mtime: mtime.map(time_ref),
            ctime,
            fh,
            crtime,
            chgtime,
            bkuptime,
            flags,
        };
        self.enqueue(
            Self::meta(req),
            OpArgs::SetAttr { ino, changes },
            FuserSink::Attr(reply),
        );
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        self.enqueue(Self::meta(req), OpArgs::ReadLink { ino }, FuserSink::Data(reply));
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::MkNod {
                parent,
                name: name.to_os_string(),
                mode,
                umask,
                rdev,
            },
            FuserSink::Entry(reply),
        );
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::MkDir {
                parent,
                name: name.to_os_string(),
                mode,
                umask,
            },
            FuserSink::Entry(reply),
        );
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Unlink {
                parent,
                name: name.to_os_string(),
            },
            FuserSink::Empty(reply),
        );
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.enqueue(
            Self::meta(req),
            OpArgs::RmDir {
                parent,
                name: name.to_os_string(),
            },
            FuserSink::Empty(reply),
        );
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::SymLink {
                parent,
                name: link_name.to_os_string(),
                target: target.to_path_buf(),
            },
            FuserSink::Entry(reply),
        );
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Rename {
                parent,
                name: name.to_os_string(),
                newparent,
                newname: newname.to_os_string(),
                flags,
            },
            FuserSink::Empty(reply),
        );
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Link {
                ino,
                newparent,
                newname: newname.to_os_string(),
            },
            FuserSink::Entry(reply),
        );
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.enqueue(Self::meta(req), OpArgs::Open { ino, flags }, FuserSink::Open(reply));
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Read {
                ino,
                fh,
                offset,
                size,
                flags,
                lock_owner,
            },
            FuserSink::Data(reply),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Write {
                ino,
                fh,
                offset,
                // The transport's buffer is only valid for the duration of
                // this callback; the envelope owns a copy.
                data: data.to_vec(),
                write_flags,
                flags,
                lock_owner,
            },
            FuserSink::Write(reply),
        );
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, fh: u64, lock_owner: u64, reply: ReplyEmpty) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Flush {
                ino,
                fh,
                lock_owner,
            },
            FuserSink::Empty(reply),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
        reply: ReplyEmpty,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Release {
                ino,
                fh,
                flags,
                lock_owner,
                flush,
            },
            FuserSink::Empty(reply),
        );
    }

    fn fsync(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        self.enqueue(
            Self::meta(req),
            OpArgs::FSync { ino, fh, datasync },
            FuserSink::Empty(reply),
        );
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.enqueue(
            Self::meta(req),
            OpArgs::OpenDir { ino, flags },
            FuserSink::Open(reply),
        );
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::ReadDir { ino, fh, offset },
            FuserSink::Directory(reply),
        );
    }

    fn releasedir(&mut self, req: &Request<'_>, ino: u64, fh: u64, flags: i32, reply: ReplyEmpty) {
        self.enqueue(
            Self::meta(req),
            OpArgs::ReleaseDir { ino, fh, flags },
            FuserSink::Empty(reply),
        );
    }

    fn fsyncdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        datasync: bool,
        reply: ReplyEmpty,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::FSyncDir { ino, fh, datasync },
            FuserSink::Empty(reply),
        );
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        self.enqueue(Self::meta(req), OpArgs::StatFs { ino }, FuserSink::Statfs(reply));
    }

    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: ReplyEmpty,
    ) {
        let attr = match self.xattr_layout() {
            XattrLayout::Plain => SetXAttrArgs::Plain {
                name: name.to_os_string(),
                value: value.to_vec(),
                flags,
            },
            XattrLayout::Positional => SetXAttrArgs::Positional {
                name: name.to_os_string(),
                value: value.to_vec(),
                flags,
                position,
            },
        };
        self.enqueue(
            Self::meta(req),
            OpArgs::SetXAttr { ino, attr },
            FuserSink::Empty(reply),
        );
    }

    fn getxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let attr = match self.xattr_layout() {
            XattrLayout::Plain => GetXAttrArgs::Plain {
                name: name.to_os_string(),
                size,
            },
            XattrLayout::Positional => GetXAttrArgs::Positional {
                name: name.to_os_string(),
                size,
                // The transport does not surface a read position here;
                // positional hosts start at the fork origin.
                position: 0,
            },
        };
        self.enqueue(
            Self::meta(req),
            OpArgs::GetXAttr { ino, attr },
            FuserSink::Xattr(reply),
        );
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        self.enqueue(
            Self::meta(req),
            OpArgs::ListXAttr { ino, size },
            FuserSink::Xattr(reply),
        );
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        self.enqueue(
            Self::meta(req),
            OpArgs::RemoveXAttr {
                ino,
                name: name.to_os_string(),
            },
            FuserSink::Empty(reply),
        );
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        self.enqueue(Self::meta(req), OpArgs::Access { ino, mask }, FuserSink::Empty(reply));
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Create {
                parent,
                name: name.to_os_string(),
                mode,
                umask,
                flags,
            },
            FuserSink::Create(reply),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn getlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        reply: ReplyLock,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::GetLk {
                ino,
                fh,
                owner: lock_owner,
                range: LockRange {
                    start,
                    end,
                    typ,
                    pid,
                },
            },
            FuserSink::Lock(reply),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn setlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        sleep: bool,
        reply: ReplyEmpty,
    ) {
        self.enqueue(
            Self::meta(req),
            OpArgs::SetLk {
                ino,
                fh,
                owner: lock_owner,
                range: LockRange {
                    start,
                    end,
                    typ,
                    pid,
                },
                sleep,
            },
            FuserSink::Empty(reply),
        );
    }

    fn bmap(&mut self, req: &Request<'_>, ino: u64, blocksize: u32, idx: u64, reply: ReplyBmap) {
        self.enqueue(
            Self::meta(req),
            OpArgs::Bmap {
                ino,
                blocksize,
                idx,
            },
            FuserSink::Bmap(reply),
        );
    }
}

/// Mount a handler at `mountpoint` and block until the session ends. Spawns
/// the control thread, wires the frontend to it, and joins both on the way
/// out.
pub fn mount<H>(
    handler: H,
    mountpoint: &Path,
    options: &[MountOption],
    config: BridgeConfig,
) -> BridgeResult<()>
where
    H: FsHandler + Send + 'static,
{
    let mount = MountContext::new(config.effective_xattr_layout());
    let control = ControlThread::spawn(Arc::clone(&mount), handler)?;
    let frontend = FuseFrontend::new(mount, config);

    info!("Mounting filesystem at {}", mountpoint.display());
    fuser::mount2(frontend, mountpoint, options)?;

    control.join();
    Ok(())
}
