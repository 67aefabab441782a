// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Minimal read-only filesystem served through the RelayFS bridge.
//!
//! All filesystem logic runs on the bridge's control thread; the FUSE
//! session threads only marshal envelopes. Mount it somewhere and `cat
//! <mountpoint>/hello.txt`.

use anyhow::Result;
use clap::Parser;
use relayfs_fuse_host::{BridgeConfig, FsHandler};
use relayfs_proto::{
    caps, AttrReply, CapabilityRecord, DirEntry, EntryReply, Errno, NodeAttr, NodeKind, OpenReply,
    ReplyPayload, RequestHandle, RequestMeta, StatfsReply,
};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};
use tracing::info;

const ROOT_INO: u64 = 1;
const HELLO_INO: u64 = 2;
const HELLO_NAME: &str = "hello.txt";
const HELLO_CONTENT: &[u8] = b"Hello from the other side of the bridge!\n";
const TTL: Duration = Duration::from_secs(1);

#[derive(Parser)]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,
}

fn attr_for(ino: u64) -> Option<NodeAttr> {
    let template = NodeAttr {
        ino,
        size: 0,
        blocks: 0,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: NodeKind::Directory,
        perm: 0o755,
        nlink: 2,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    };
    match ino {
        ROOT_INO => Some(template),
        HELLO_INO => Some(NodeAttr {
            size: HELLO_CONTENT.len() as u64,
            blocks: 1,
            kind: NodeKind::RegularFile,
            perm: 0o644,
            nlink: 1,
            ..template
        }),
        _ => None,
    }
}

struct HelloFs;

impl FsHandler for HelloFs {
    fn init(&mut self, record: &CapabilityRecord) -> Result<u32, Errno> {
        info!(
            "hellofs negotiating against protocol {}.{}",
            record.proto_major, record.proto_minor
        );
        Ok(record.clamp_want(caps::ASYNC_READ))
    }

    fn destroy(&mut self) {
        info!("hellofs unmounted");
    }

    fn lookup(&mut self, _meta: &RequestMeta, parent: u64, name: &OsStr, reply: RequestHandle) {
        if parent == ROOT_INO && name == HELLO_NAME {
            reply.ok(ReplyPayload::Entry(EntryReply {
                ttl: TTL,
                attr: attr_for(HELLO_INO).unwrap(),
                generation: 0,
            }));
        } else {
            reply.error(libc::ENOENT);
        }
    }

    fn getattr(&mut self, _meta: &RequestMeta, ino: u64, _fh: Option<u64>, reply: RequestHandle) {
        match attr_for(ino) {
            Some(attr) => reply.ok(ReplyPayload::Attr(AttrReply { ttl: TTL, attr })),
            None => reply.error(libc::ENOENT),
        }
    }

    fn open(&mut self, _meta: &RequestMeta, ino: u64, _flags: i32, reply: RequestHandle) {
        if ino == HELLO_INO {
            reply.ok(ReplyPayload::Opened(OpenReply { fh: 0, flags: 0 }));
        } else {
            reply.error(libc::EISDIR);
        }
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
        if ino != HELLO_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let start = (offset as usize).min(HELLO_CONTENT.len());
        let end = (start + size as usize).min(HELLO_CONTENT.len());
        reply.ok(ReplyPayload::Data(HELLO_CONTENT[start..end].to_vec()));
    }

    fn release(
        &mut self,
        _meta: &RequestMeta,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: RequestHandle,
    ) {
        reply.ok(ReplyPayload::Empty);
    }

    fn opendir(&mut self, _meta: &RequestMeta, ino: u64, _flags: i32, reply: RequestHandle) {
        if ino == ROOT_INO {
            reply.ok(ReplyPayload::Opened(OpenReply { fh: 0, flags: 0 }));
        } else {
            reply.error(libc::ENOTDIR);
        }
    }

    fn readdir(
        &mut self,
        _meta: &RequestMeta,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: RequestHandle,
    ) {
        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }
        let all = [
            (ROOT_INO, NodeKind::Directory, "."),
            (ROOT_INO, NodeKind::Directory, ".."),
            (HELLO_INO, NodeKind::RegularFile, HELLO_NAME),
        ];
        let entries = all
            .iter()
            .enumerate()
            .skip(offset as usize)
            .map(|(i, &(ino, kind, name))| DirEntry {
                ino,
                offset: (i + 1) as i64,
                kind,
                name: name.into(),
            })
            .collect();
        reply.ok(ReplyPayload::Directory(entries));
    }

    fn releasedir(
        &mut self,
        _meta: &RequestMeta,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: RequestHandle,
    ) {
        reply.ok(ReplyPayload::Empty);
    }

    fn access(&mut self, _meta: &RequestMeta, ino: u64, _mask: i32, reply: RequestHandle) {
        if attr_for(ino).is_some() {
            reply.ok(ReplyPayload::Empty);
        } else {
            reply.error(libc::ENOENT);
        }
    }

    fn statfs(&mut self, _meta: &RequestMeta, _ino: u64, reply: RequestHandle) {
        reply.ok(ReplyPayload::Statfs(StatfsReply {
            blocks: 1,
            bfree: 0,
            bavail: 0,
            files: 2,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }));
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("Starting hellofs");
    info!("Mount point: {}", args.mount_point.display());

    let config = match args.config {
        Some(path) => BridgeConfig::from_file(&path)?,
        None => BridgeConfig::default(),
    };

    let mut mount_options = vec![
        fuser::MountOption::FSName("hellofs".to_string()),
        fuser::MountOption::Subtype("relayfs".to_string()),
        fuser::MountOption::RO,
    ];
    if args.allow_other {
        mount_options.push(fuser::MountOption::AllowOther);
    }
    if args.auto_unmount {
        mount_options.push(fuser::MountOption::AutoUnmount);
    }

    relayfs_fuse_host::mount(HelloFs, &args.mount_point, &mount_options, config)?;
    Ok(())
}
