// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The handler seam: the interface the single-threaded filesystem runtime
//! implements. Every method runs on the control thread, receives the decoded
//! arguments for one operation, and answers through the consume-once
//! `RequestHandle`. Defaults answer ENOSYS, so a handler implements only what
//! it supports.
//!
//! There is deliberately no `forget` method: lookup-count retirement is
//! acknowledged at the entry point and never crosses the thread boundary.

use relayfs_proto::{
    CapabilityRecord, Errno, GetXAttrArgs, LockRange, RequestHandle, RequestMeta, SetAttrChanges,
    SetXAttrArgs,
};
use std::ffi::OsStr;
use std::path::Path;

/// Filesystem semantics, executed entirely on the control thread.
#[allow(unused_variables)]
pub trait FsHandler {
    /// Capability negotiation. Receives the transport's connection record
    /// once per mount, before anything else is dispatched, and returns the
    /// capability flags the filesystem wants enabled.
    fn init(&mut self, record: &CapabilityRecord) -> Result<u32, Errno> {
        Ok(0)
    }

    /// The mount is being torn down; no further operations will arrive and
    /// no replies are possible.
    fn destroy(&mut self) {}

    fn lookup(&mut self, meta: &RequestMeta, parent: u64, name: &OsStr, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn getattr(&mut self, meta: &RequestMeta, ino: u64, fh: Option<u64>, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn setattr(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        changes: SetAttrChanges,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn readlink(&mut self, meta: &RequestMeta, ino: u64, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn mknod(
        &mut self,
        meta: &RequestMeta,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn mkdir(
        &mut self,
        meta: &RequestMeta,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn unlink(&mut self, meta: &RequestMeta, parent: u64, name: &OsStr, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn rmdir(&mut self, meta: &RequestMeta, parent: u64, name: &OsStr, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn symlink(
        &mut self,
        meta: &RequestMeta,
        parent: u64,
        name: &OsStr,
        target: &Path,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &mut self,
        meta: &RequestMeta,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn link(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn open(&mut self, meta: &RequestMeta, ino: u64, flags: i32, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn flush(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    #[allow(clippy::too_many_arguments)]
    fn release(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn fsync(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        datasync: bool,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn opendir(&mut self, meta: &RequestMeta, ino: u64, flags: i32, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn readdir(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn releasedir(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        flags: i32,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn fsyncdir(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        datasync: bool,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn statfs(&mut self, meta: &RequestMeta, ino: u64, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn setxattr(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        attr: &SetXAttrArgs,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn getxattr(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        attr: &GetXAttrArgs,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn listxattr(&mut self, meta: &RequestMeta, ino: u64, size: u32, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn removexattr(&mut self, meta: &RequestMeta, ino: u64, name: &OsStr, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    fn access(&mut self, meta: &RequestMeta, ino: u64, mask: i32, reply: RequestHandle) {
        reply.error(libc::ENOSYS);
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        meta: &RequestMeta,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn getlk(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        owner: u64,
        range: LockRange,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    #[allow(clippy::too_many_arguments)]
    fn setlk(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        fh: u64,
        owner: u64,
        range: LockRange,
        sleep: bool,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn bmap(
        &mut self,
        meta: &RequestMeta,
        ino: u64,
        blocksize: u32,
        idx: u64,
        reply: RequestHandle,
    ) {
        reply.error(libc::ENOSYS);
    }
}
