// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reply encoding: translates handler reply payloads into protocol-exact
//! `fuser` reply calls. One `FuserSink` wraps the typed reply object of one
//! request and is consumed by the first (and only) answer.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyBmap, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyLock, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
};
use relayfs_proto::{Errno, NodeAttr, NodeKind, OpKind, ReplyPayload, ReplySink, XattrReply};
use tracing::warn;

pub(crate) fn node_kind_to_fuse(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::NamedPipe => FileType::NamedPipe,
        NodeKind::CharDevice => FileType::CharDevice,
        NodeKind::BlockDevice => FileType::BlockDevice,
        NodeKind::Directory => FileType::Directory,
        NodeKind::RegularFile => FileType::RegularFile,
        NodeKind::Symlink => FileType::Symlink,
        NodeKind::Socket => FileType::Socket,
    }
}

pub(crate) fn node_attr_to_fuse(attr: &NodeAttr) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.crtime,
        kind: node_kind_to_fuse(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: attr.flags,
    }
}

/// The typed reply object of one in-flight transport request.
pub(crate) enum FuserSink {
    Entry(ReplyEntry),
    Attr(ReplyAttr),
    Data(ReplyData),
    Empty(ReplyEmpty),
    Open(ReplyOpen),
    Write(ReplyWrite),
    Statfs(ReplyStatfs),
    Create(ReplyCreate),
    Xattr(ReplyXattr),
    Lock(ReplyLock),
    Bmap(ReplyBmap),
    Directory(ReplyDirectory),
}

impl FuserSink {
    fn fail(self, errno: Errno) {
        match self {
            FuserSink::Entry(r) => r.error(errno),
            FuserSink::Attr(r) => r.error(errno),
            FuserSink::Data(r) => r.error(errno),
            FuserSink::Empty(r) => r.error(errno),
            FuserSink::Open(r) => r.error(errno),
            FuserSink::Write(r) => r.error(errno),
            FuserSink::Statfs(r) => r.error(errno),
            FuserSink::Create(r) => r.error(errno),
            FuserSink::Xattr(r) => r.error(errno),
            FuserSink::Lock(r) => r.error(errno),
            FuserSink::Bmap(r) => r.error(errno),
            FuserSink::Directory(r) => r.error(errno),
        }
    }
}

impl ReplySink for FuserSink {
    fn send(self: Box<Self>, kind: OpKind, outcome: Result<ReplyPayload, Errno>) {
        let payload = match outcome {
            Ok(payload) => payload,
            Err(errno) => {
                self.fail(errno);
                return;
            }
        };

        match (*self, payload) {
            (FuserSink::Entry(r), ReplyPayload::Entry(e)) => {
                r.entry(&e.ttl, &node_attr_to_fuse(&e.attr), e.generation)
            }
            (FuserSink::Attr(r), ReplyPayload::Attr(a)) => {
                r.attr(&a.ttl, &node_attr_to_fuse(&a.attr))
            }
            (FuserSink::Data(r), ReplyPayload::Data(data)) => r.data(&data),
            (FuserSink::Empty(r), ReplyPayload::Empty) => r.ok(),
            (FuserSink::Open(r), ReplyPayload::Opened(o)) => r.opened(o.fh, o.flags),
            (FuserSink::Write(r), ReplyPayload::Written(n)) => r.written(n),
            (FuserSink::Statfs(r), ReplyPayload::Statfs(s)) => r.statfs(
                s.blocks, s.bfree, s.bavail, s.files, s.ffree, s.bsize, s.namelen, s.frsize,
            ),
            (FuserSink::Create(r), ReplyPayload::Created(c)) => r.created(
                &c.entry.ttl,
                &node_attr_to_fuse(&c.entry.attr),
                c.entry.generation,
                c.open.fh,
                c.open.flags,
            ),
            (FuserSink::Xattr(r), ReplyPayload::Xattr(XattrReply::Size(n))) => r.size(n),
            (FuserSink::Xattr(r), ReplyPayload::Xattr(XattrReply::Data(data))) => r.data(&data),
            (FuserSink::Lock(r), ReplyPayload::Lock(l)) => r.locked(l.start, l.end, l.typ, l.pid),
            (FuserSink::Bmap(r), ReplyPayload::Bmap(block)) => r.bmap(block),
            (FuserSink::Directory(mut r), ReplyPayload::Directory(entries)) => {
                for entry in entries {
                    // add() returns true once the kernel buffer is full; the
                    // remaining entries belong to the next readdir call.
                    if r.add(
                        entry.ino,
                        entry.offset,
                        node_kind_to_fuse(entry.kind),
                        &entry.name,
                    ) {
                        break;
                    }
                }
                r.ok()
            }
            (sink, payload) => {
                warn!(
                    target: "relayfs::fuse",
                    op = %kind,
                    ?payload,
                    "handler payload does not fit this operation's reply"
                );
                sink.fail(libc::EIO);
            }
        }
    }
}
