// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reply payloads, the capability-negotiation record, and the reply sink
//! boundary through which the dispatcher answers the transport.

use crate::ops::OpKind;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::time::{Duration, SystemTime};

/// POSIX errno, as the transport's reply protocol carries it.
pub type Errno = i32;

/// Identity of one transport request: unique id plus caller credentials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub unique: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// Connection capability flags, numbered as the lowlevel protocol numbers them.
pub mod caps {
    pub const ASYNC_READ: u32 = 1 << 0;
    pub const POSIX_LOCKS: u32 = 1 << 1;
    pub const ATOMIC_O_TRUNC: u32 = 1 << 3;
    pub const EXPORT_SUPPORT: u32 = 1 << 4;
    pub const BIG_WRITES: u32 = 1 << 5;
    pub const DONT_MASK: u32 = 1 << 6;
    pub const FLOCK_LOCKS: u32 = 1 << 10;
}

/// Connection-negotiation record, exchanged once per mount at Init.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Major version of the transport protocol
    pub proto_major: u32,
    /// Minor version of the transport protocol
    pub proto_minor: u32,
    /// Is asynchronous read supported
    pub async_read: bool,
    /// Maximum size of the write buffer
    pub max_write: u32,
    /// Maximum readahead
    pub max_readahead: u32,
    /// Capability flags the kernel supports
    pub capable: u32,
    /// Capability flags the filesystem wants to enable
    pub want: u32,
}

impl CapabilityRecord {
    pub fn kernel_supports(&self, flag: u32) -> bool {
        self.capable & flag == flag
    }

    /// Clamp a want mask to what the kernel actually offers.
    pub fn clamp_want(&self, want: u32) -> u32 {
        want & self.capable
    }
}

/// Node type carried in attribute and directory replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    NamedPipe,
    CharDevice,
    BlockDevice,
    Directory,
    RegularFile,
    Symlink,
    Socket,
}

/// Attributes of one node, the handler-facing shape of the protocol's
/// attribute structure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeAttr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: NodeKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub flags: u32,
}

/// Lookup/link/mknod/mkdir/symlink result: an entry plus cache lifetimes.
#[derive(Clone, Debug)]
pub struct EntryReply {
    pub ttl: Duration,
    pub attr: NodeAttr,
    pub generation: u64,
}

/// getattr/setattr result.
#[derive(Clone, Debug)]
pub struct AttrReply {
    pub ttl: Duration,
    pub attr: NodeAttr,
}

/// open/opendir result.
#[derive(Clone, Copy, Debug)]
pub struct OpenReply {
    pub fh: u64,
    pub flags: u32,
}

/// create result: entry plus the open handle, atomically.
#[derive(Clone, Debug)]
pub struct CreateReply {
    pub entry: EntryReply,
    pub open: OpenReply,
}

/// statfs result.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatfsReply {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// getxattr/listxattr result: a size probe answer or the data itself.
#[derive(Clone, Debug)]
pub enum XattrReply {
    Size(u32),
    Data(Vec<u8>),
}

/// getlk result.
#[derive(Clone, Copy, Debug)]
pub struct LockReply {
    pub start: u64,
    pub end: u64,
    pub typ: i32,
    pub pid: u32,
}

/// One directory entry in a readdir reply.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub ino: u64,
    /// Offset of the NEXT entry, as the readdir protocol expects.
    pub offset: i64,
    pub kind: NodeKind,
    pub name: OsString,
}

/// Everything a handler can answer with. The reply encoder translates each
/// variant into the protocol-exact reply for the operation being answered.
#[derive(Clone, Debug)]
pub enum ReplyPayload {
    Empty,
    Entry(EntryReply),
    Attr(AttrReply),
    Data(Vec<u8>),
    Written(u32),
    Opened(OpenReply),
    Created(CreateReply),
    Statfs(StatfsReply),
    Xattr(XattrReply),
    Lock(LockReply),
    Bmap(u64),
    Directory(Vec<DirEntry>),
}

/// Consumer-side reply boundary. One sink instance answers exactly one
/// transport request; the implementation owns the protocol encoding.
pub trait ReplySink: Send {
    fn send(self: Box<Self>, kind: OpKind, outcome: Result<ReplyPayload, Errno>);
}

/// Consume-once reply capability handed to the handler alongside the decoded
/// arguments. Taking `self` by value makes a second reply unrepresentable.
pub struct RequestHandle {
    meta: RequestMeta,
    kind: OpKind,
    sink: Box<dyn ReplySink>,
}

impl RequestHandle {
    pub fn new(meta: RequestMeta, kind: OpKind, sink: Box<dyn ReplySink>) -> Self {
        Self { meta, kind, sink }
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Answer the request with a success payload.
    pub fn ok(self, payload: ReplyPayload) {
        self.sink.send(self.kind, Ok(payload));
    }

    /// Answer the request with an errno.
    pub fn error(self, errno: Errno) {
        self.sink.send(self.kind, Err(errno));
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("unique", &self.meta.unique)
            .field("kind", &self.kind)
            .finish()
    }
}
