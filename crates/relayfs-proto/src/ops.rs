// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation catalog for the RelayFS bridge
//!
//! The closed set of operations the kernel transport can issue, the lowlevel
//! callback arity of each one, and how each is routed: bridged through the
//! handoff channel, short-circuited at the entry point, or never registered
//! with the transport at all. The catalog is built once and read-only
//! thereafter; it is safe to consult from any thread.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed tag identifying one transport operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Init,
    Destroy,
    Lookup,
    Forget,
    GetAttr,
    SetAttr,
    ReadLink,
    MkNod,
    MkDir,
    Unlink,
    RmDir,
    SymLink,
    Rename,
    Link,
    Open,
    Read,
    Write,
    Flush,
    Release,
    FSync,
    OpenDir,
    ReadDir,
    ReleaseDir,
    FSyncDir,
    StatFs,
    SetXAttr,
    GetXAttr,
    ListXAttr,
    RemoveXAttr,
    Access,
    Create,
    GetLk,
    SetLk,
    Bmap,
    Ioctl,
    Poll,
}

impl OpKind {
    /// Every catalog member, including the two unregistered ones.
    pub const ALL: [OpKind; 36] = [
        OpKind::Init,
        OpKind::Destroy,
        OpKind::Lookup,
        OpKind::Forget,
        OpKind::GetAttr,
        OpKind::SetAttr,
        OpKind::ReadLink,
        OpKind::MkNod,
        OpKind::MkDir,
        OpKind::Unlink,
        OpKind::RmDir,
        OpKind::SymLink,
        OpKind::Rename,
        OpKind::Link,
        OpKind::Open,
        OpKind::Read,
        OpKind::Write,
        OpKind::Flush,
        OpKind::Release,
        OpKind::FSync,
        OpKind::OpenDir,
        OpKind::ReadDir,
        OpKind::ReleaseDir,
        OpKind::FSyncDir,
        OpKind::StatFs,
        OpKind::SetXAttr,
        OpKind::GetXAttr,
        OpKind::ListXAttr,
        OpKind::RemoveXAttr,
        OpKind::Access,
        OpKind::Create,
        OpKind::GetLk,
        OpKind::SetLk,
        OpKind::Bmap,
        OpKind::Ioctl,
        OpKind::Poll,
    ];

    /// Lowercase protocol name, as the transport logs it.
    pub fn name(self) -> &'static str {
        spec(self).name
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of the extended-attribute argument records on the current mount.
///
/// Hosts with positional xattr access pass one extra trailing argument to
/// setxattr/getxattr. Modeled as a runtime tag rather than conditional
/// compilation so both shapes stay compiled and testable everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum XattrLayout {
    /// name/value/flags only (Linux and most hosts)
    Plain,
    /// extra trailing `position` argument (macOS resource forks)
    Positional,
}

impl XattrLayout {
    /// The layout the current platform's transport actually uses.
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            XattrLayout::Positional
        } else {
            XattrLayout::Plain
        }
    }
}

/// How the bridge routes an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Marshaled into an envelope and dispatched to the handler.
    Bridged,
    /// Acknowledged at the entry point, never enqueued (Forget).
    ShortCircuit,
    /// Not registered with the transport; the kernel never delivers it.
    Unregistered,
}

/// One catalog row: the operation, its lowlevel callback arity, and routing.
#[derive(Clone, Copy, Debug)]
pub struct OpSpec {
    pub kind: OpKind,
    pub name: &'static str,
    /// Argument count of the lowlevel callback, counting the request handle.
    arity: u8,
    /// Whether the positional xattr layout adds one trailing argument.
    extra_positional_arg: bool,
    pub mode: DispatchMode,
}

impl OpSpec {
    /// Callback argument count for the given xattr layout.
    pub fn arg_count(&self, layout: XattrLayout) -> u8 {
        match layout {
            XattrLayout::Positional if self.extra_positional_arg => self.arity + 1,
            _ => self.arity,
        }
    }
}

const fn op(kind: OpKind, name: &'static str, arity: u8, mode: DispatchMode) -> OpSpec {
    OpSpec {
        kind,
        name,
        arity,
        extra_positional_arg: false,
        mode,
    }
}

const fn xattr_op(kind: OpKind, name: &'static str, arity: u8) -> OpSpec {
    OpSpec {
        kind,
        name,
        arity,
        extra_positional_arg: true,
        mode: DispatchMode::Bridged,
    }
}

/// The catalog itself. Arities are those of the lowlevel transport callbacks,
/// with file-info bundles counted as one argument.
static SPECS: [OpSpec; 36] = [
    op(OpKind::Init, "init", 1, DispatchMode::Bridged),
    op(OpKind::Destroy, "destroy", 0, DispatchMode::Bridged),
    op(OpKind::Lookup, "lookup", 3, DispatchMode::Bridged),
    op(OpKind::Forget, "forget", 3, DispatchMode::ShortCircuit),
    op(OpKind::GetAttr, "getattr", 3, DispatchMode::Bridged),
    op(OpKind::SetAttr, "setattr", 5, DispatchMode::Bridged),
    op(OpKind::ReadLink, "readlink", 2, DispatchMode::Bridged),
    op(OpKind::MkNod, "mknod", 5, DispatchMode::Bridged),
    op(OpKind::MkDir, "mkdir", 4, DispatchMode::Bridged),
    op(OpKind::Unlink, "unlink", 3, DispatchMode::Bridged),
    op(OpKind::RmDir, "rmdir", 3, DispatchMode::Bridged),
    op(OpKind::SymLink, "symlink", 4, DispatchMode::Bridged),
    op(OpKind::Rename, "rename", 5, DispatchMode::Bridged),
    op(OpKind::Link, "link", 4, DispatchMode::Bridged),
    op(OpKind::Open, "open", 3, DispatchMode::Bridged),
    op(OpKind::Read, "read", 5, DispatchMode::Bridged),
    op(OpKind::Write, "write", 6, DispatchMode::Bridged),
    op(OpKind::Flush, "flush", 3, DispatchMode::Bridged),
    op(OpKind::Release, "release", 3, DispatchMode::Bridged),
    op(OpKind::FSync, "fsync", 4, DispatchMode::Bridged),
    op(OpKind::OpenDir, "opendir", 3, DispatchMode::Bridged),
    op(OpKind::ReadDir, "readdir", 5, DispatchMode::Bridged),
    op(OpKind::ReleaseDir, "releasedir", 3, DispatchMode::Bridged),
    op(OpKind::FSyncDir, "fsyncdir", 4, DispatchMode::Bridged),
    op(OpKind::StatFs, "statfs", 2, DispatchMode::Bridged),
    xattr_op(OpKind::SetXAttr, "setxattr", 6),
    xattr_op(OpKind::GetXAttr, "getxattr", 4),
    op(OpKind::ListXAttr, "listxattr", 3, DispatchMode::Bridged),
    op(OpKind::RemoveXAttr, "removexattr", 3, DispatchMode::Bridged),
    op(OpKind::Access, "access", 3, DispatchMode::Bridged),
    op(OpKind::Create, "create", 5, DispatchMode::Bridged),
    op(OpKind::GetLk, "getlk", 4, DispatchMode::Bridged),
    op(OpKind::SetLk, "setlk", 5, DispatchMode::Bridged),
    op(OpKind::Bmap, "bmap", 4, DispatchMode::Bridged),
    op(OpKind::Ioctl, "ioctl", 9, DispatchMode::Unregistered),
    op(OpKind::Poll, "poll", 4, DispatchMode::Unregistered),
];

lazy_static! {
    static ref INDEX: HashMap<OpKind, &'static OpSpec> =
        SPECS.iter().map(|s| (s.kind, s)).collect();
}

/// Look up the catalog row for an operation. Total over `OpKind`.
pub fn spec(kind: OpKind) -> &'static OpSpec {
    INDEX[&kind]
}

/// All operations the dispatcher can ever see.
pub fn bridged() -> impl Iterator<Item = &'static OpSpec> {
    SPECS.iter().filter(|s| s.mode == DispatchMode::Bridged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_every_kind_once() {
        assert_eq!(SPECS.len(), OpKind::ALL.len());
        for kind in OpKind::ALL {
            assert_eq!(spec(kind).kind, kind);
        }
    }

    #[test]
    fn ioctl_and_poll_are_never_registered() {
        assert_eq!(spec(OpKind::Ioctl).mode, DispatchMode::Unregistered);
        assert_eq!(spec(OpKind::Poll).mode, DispatchMode::Unregistered);
        assert!(bridged().all(|s| s.kind != OpKind::Ioctl && s.kind != OpKind::Poll));
    }

    #[test]
    fn forget_is_short_circuited() {
        assert_eq!(spec(OpKind::Forget).mode, DispatchMode::ShortCircuit);
        assert!(bridged().all(|s| s.kind != OpKind::Forget));
    }

    #[test]
    fn xattr_arity_tracks_layout() {
        let set = spec(OpKind::SetXAttr);
        assert_eq!(set.arg_count(XattrLayout::Plain), 6);
        assert_eq!(set.arg_count(XattrLayout::Positional), 7);

        let get = spec(OpKind::GetXAttr);
        assert_eq!(get.arg_count(XattrLayout::Plain), 4);
        assert_eq!(get.arg_count(XattrLayout::Positional), 5);

        // No other operation changes shape across platforms.
        for kind in OpKind::ALL {
            if kind == OpKind::SetXAttr || kind == OpKind::GetXAttr {
                continue;
            }
            let s = spec(kind);
            assert_eq!(
                s.arg_count(XattrLayout::Plain),
                s.arg_count(XattrLayout::Positional)
            );
        }
    }

    #[test]
    fn known_arities_match_the_lowlevel_protocol() {
        assert_eq!(spec(OpKind::Lookup).arg_count(XattrLayout::Plain), 3);
        assert_eq!(spec(OpKind::Read).arg_count(XattrLayout::Plain), 5);
        assert_eq!(spec(OpKind::Write).arg_count(XattrLayout::Plain), 6);
        assert_eq!(spec(OpKind::Rename).arg_count(XattrLayout::Plain), 5);
        assert_eq!(spec(OpKind::StatFs).arg_count(XattrLayout::Plain), 2);
    }

    #[test]
    fn display_uses_protocol_names() {
        assert_eq!(OpKind::ReleaseDir.to_string(), "releasedir");
        assert_eq!(OpKind::SetXAttr.to_string(), "setxattr");
    }
}
