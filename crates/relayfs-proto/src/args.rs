// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Typed argument records, one variant per catalog operation.
//!
//! Entry points build these on the transport's worker threads; the dispatcher
//! destructures them on the control thread. Replacing the original untyped
//! pointer slots with a tagged union makes decode a total, exhaustively
//! matched operation.

use crate::ops::{OpKind, XattrLayout};
use crate::replies::{CapabilityRecord, Errno};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::mpsc::SyncSender;
use std::time::SystemTime;

/// A timestamp to set: either an explicit time or "now on the control thread".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeRef {
    Now,
    At(SystemTime),
}

/// The fields a setattr request may change. Unset fields stay untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetAttrChanges {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<TimeRef>,
    pub mtime: Option<TimeRef>,
    pub ctime: Option<SystemTime>,
    pub fh: Option<u64>,
    pub crtime: Option<SystemTime>,
    pub chgtime: Option<SystemTime>,
    pub bkuptime: Option<SystemTime>,
    pub flags: Option<u32>,
}

/// POSIX byte-range lock description for getlk/setlk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockRange {
    pub start: u64,
    pub end: u64,
    pub typ: i32,
    pub pid: u32,
}

/// setxattr arguments in their two platform shapes.
#[derive(Clone, Debug)]
pub enum SetXAttrArgs {
    Plain {
        name: OsString,
        value: Vec<u8>,
        flags: i32,
    },
    Positional {
        name: OsString,
        value: Vec<u8>,
        flags: i32,
        position: u32,
    },
}

impl SetXAttrArgs {
    pub fn layout(&self) -> XattrLayout {
        match self {
            SetXAttrArgs::Plain { .. } => XattrLayout::Plain,
            SetXAttrArgs::Positional { .. } => XattrLayout::Positional,
        }
    }
}

/// getxattr arguments in their two platform shapes.
#[derive(Clone, Debug)]
pub enum GetXAttrArgs {
    Plain {
        name: OsString,
        size: u32,
    },
    Positional {
        name: OsString,
        size: u32,
        position: u32,
    },
}

impl GetXAttrArgs {
    pub fn layout(&self) -> XattrLayout {
        match self {
            GetXAttrArgs::Plain { .. } => XattrLayout::Plain,
            GetXAttrArgs::Positional { .. } => XattrLayout::Positional,
        }
    }
}

/// Rendezvous used by Init: the dispatcher sends the negotiated want flags
/// (or an errno) back to the entry point blocked inside the transport.
pub type InitResponder = SyncSender<Result<u32, Errno>>;

/// Tagged argument record for one operation invocation.
///
/// Forget, Ioctl and Poll have no variant: Forget is short-circuited at the
/// entry point and the other two are never registered, so none of the three
/// can ever reach the dispatcher.
#[derive(Debug)]
pub enum OpArgs {
    Init {
        record: CapabilityRecord,
        responder: InitResponder,
    },
    Destroy,
    Lookup {
        parent: u64,
        name: OsString,
    },
    GetAttr {
        ino: u64,
        fh: Option<u64>,
    },
    SetAttr {
        ino: u64,
        changes: SetAttrChanges,
    },
    ReadLink {
        ino: u64,
    },
    MkNod {
        parent: u64,
        name: OsString,
        mode: u32,
        umask: u32,
        rdev: u32,
    },
    MkDir {
        parent: u64,
        name: OsString,
        mode: u32,
        umask: u32,
    },
    Unlink {
        parent: u64,
        name: OsString,
    },
    RmDir {
        parent: u64,
        name: OsString,
    },
    SymLink {
        parent: u64,
        name: OsString,
        target: PathBuf,
    },
    Rename {
        parent: u64,
        name: OsString,
        newparent: u64,
        newname: OsString,
        flags: u32,
    },
    Link {
        ino: u64,
        newparent: u64,
        newname: OsString,
    },
    Open {
        ino: u64,
        flags: i32,
    },
    Read {
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
    },
    Write {
        ino: u64,
        fh: u64,
        offset: i64,
        data: Vec<u8>,
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
    },
    Flush {
        ino: u64,
        fh: u64,
        lock_owner: u64,
    },
    Release {
        ino: u64,
        fh: u64,
        flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
    },
    FSync {
        ino: u64,
        fh: u64,
        datasync: bool,
    },
    OpenDir {
        ino: u64,
        flags: i32,
    },
    ReadDir {
        ino: u64,
        fh: u64,
        offset: i64,
    },
    ReleaseDir {
        ino: u64,
        fh: u64,
        flags: i32,
    },
    FSyncDir {
        ino: u64,
        fh: u64,
        datasync: bool,
    },
    StatFs {
        ino: u64,
    },
    SetXAttr {
        ino: u64,
        attr: SetXAttrArgs,
    },
    GetXAttr {
        ino: u64,
        attr: GetXAttrArgs,
    },
    ListXAttr {
        ino: u64,
        size: u32,
    },
    RemoveXAttr {
        ino: u64,
        name: OsString,
    },
    Access {
        ino: u64,
        mask: i32,
    },
    Create {
        parent: u64,
        name: OsString,
        mode: u32,
        umask: u32,
        flags: i32,
    },
    GetLk {
        ino: u64,
        fh: u64,
        owner: u64,
        range: LockRange,
    },
    SetLk {
        ino: u64,
        fh: u64,
        owner: u64,
        range: LockRange,
        sleep: bool,
    },
    Bmap {
        ino: u64,
        blocksize: u32,
        idx: u64,
    },
}

impl OpArgs {
    /// The catalog tag this record marshals arguments for.
    pub fn kind(&self) -> OpKind {
        match self {
            OpArgs::Init { .. } => OpKind::Init,
            OpArgs::Destroy => OpKind::Destroy,
            OpArgs::Lookup { .. } => OpKind::Lookup,
            OpArgs::GetAttr { .. } => OpKind::GetAttr,
            OpArgs::SetAttr { .. } => OpKind::SetAttr,
            OpArgs::ReadLink { .. } => OpKind::ReadLink,
            OpArgs::MkNod { .. } => OpKind::MkNod,
            OpArgs::MkDir { .. } => OpKind::MkDir,
            OpArgs::Unlink { .. } => OpKind::Unlink,
            OpArgs::RmDir { .. } => OpKind::RmDir,
            OpArgs::SymLink { .. } => OpKind::SymLink,
            OpArgs::Rename { .. } => OpKind::Rename,
            OpArgs::Link { .. } => OpKind::Link,
            OpArgs::Open { .. } => OpKind::Open,
            OpArgs::Read { .. } => OpKind::Read,
            OpArgs::Write { .. } => OpKind::Write,
            OpArgs::Flush { .. } => OpKind::Flush,
            OpArgs::Release { .. } => OpKind::Release,
            OpArgs::FSync { .. } => OpKind::FSync,
            OpArgs::OpenDir { .. } => OpKind::OpenDir,
            OpArgs::ReadDir { .. } => OpKind::ReadDir,
            OpArgs::ReleaseDir { .. } => OpKind::ReleaseDir,
            OpArgs::FSyncDir { .. } => OpKind::FSyncDir,
            OpArgs::StatFs { .. } => OpKind::StatFs,
            OpArgs::SetXAttr { .. } => OpKind::SetXAttr,
            OpArgs::GetXAttr { .. } => OpKind::GetXAttr,
            OpArgs::ListXAttr { .. } => OpKind::ListXAttr,
            OpArgs::RemoveXAttr { .. } => OpKind::RemoveXAttr,
            OpArgs::Access { .. } => OpKind::Access,
            OpArgs::Create { .. } => OpKind::Create,
            OpArgs::GetLk { .. } => OpKind::GetLk,
            OpArgs::SetLk { .. } => OpKind::SetLk,
            OpArgs::Bmap { .. } => OpKind::Bmap,
        }
    }

    /// Xattr record shape, for the two operations that have one.
    pub fn xattr_layout(&self) -> Option<XattrLayout> {
        match self {
            OpArgs::SetXAttr { attr, .. } => Some(attr.layout()),
            OpArgs::GetXAttr { attr, .. } => Some(attr.layout()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_matches_variant() {
        let args = OpArgs::Lookup {
            parent: 1,
            name: OsString::from("etc"),
        };
        assert_eq!(args.kind(), OpKind::Lookup);

        let args = OpArgs::Bmap {
            ino: 9,
            blocksize: 4096,
            idx: 3,
        };
        assert_eq!(args.kind(), OpKind::Bmap);
    }

    #[test]
    fn xattr_layout_is_reported_only_for_xattr_records() {
        let plain = OpArgs::GetXAttr {
            ino: 2,
            attr: GetXAttrArgs::Plain {
                name: OsString::from("user.tag"),
                size: 0,
            },
        };
        assert_eq!(plain.xattr_layout(), Some(XattrLayout::Plain));

        let positional = OpArgs::SetXAttr {
            ino: 2,
            attr: SetXAttrArgs::Positional {
                name: OsString::from("com.apple.ResourceFork"),
                value: vec![1, 2, 3],
                flags: 0,
                position: 16,
            },
        };
        assert_eq!(positional.xattr_layout(), Some(XattrLayout::Positional));

        let read = OpArgs::ReadLink { ino: 4 };
        assert_eq!(read.xattr_layout(), None);
    }
}
