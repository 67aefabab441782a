// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RelayFS Protocol — operation catalog and bridge message types
//!
//! This crate defines the closed operation catalog, the typed argument and
//! reply payloads that cross the thread boundary, the capability-negotiation
//! record, and envelope validation. It carries no I/O of its own; the FUSE
//! host crate supplies the transport and the control thread.

pub mod args;
pub mod ops;
pub mod replies;
pub mod validation;

// Re-export key types
pub use args::{
    GetXAttrArgs, InitResponder, LockRange, OpArgs, SetAttrChanges, SetXAttrArgs, TimeRef,
};
pub use ops::{DispatchMode, OpKind, OpSpec, XattrLayout};
pub use replies::{
    caps, AttrReply, CapabilityRecord, CreateReply, DirEntry, EntryReply, Errno, LockReply,
    NodeAttr, NodeKind, OpenReply, ReplyPayload, ReplySink, RequestHandle, RequestMeta,
    StatfsReply, XattrReply,
};
pub use validation::{check_envelope, DecodeError};
