// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The request envelope: one operation's tagged arguments, its reply handle,
//! and a back-reference to the mount it belongs to. An envelope is owned by
//! its producer until submitted, moves through the handoff queue, and is
//! consumed exactly once by the dispatcher.

use crate::mount::MountContext;
use relayfs_proto::{OpArgs, OpKind, RequestHandle, RequestMeta};
use std::sync::Weak;

pub struct RequestEnvelope {
    meta: RequestMeta,
    kind: OpKind,
    args: OpArgs,
    reply: Option<RequestHandle>,
    mount: Weak<MountContext>,
}

impl RequestEnvelope {
    /// Build an envelope whose tag is derived from the argument record.
    pub fn new(
        meta: RequestMeta,
        args: OpArgs,
        reply: Option<RequestHandle>,
        mount: Weak<MountContext>,
    ) -> Self {
        let kind = args.kind();
        Self {
            meta,
            kind,
            args,
            reply,
            mount,
        }
    }

    /// Build an envelope with an explicit tag. The dispatcher cross-checks
    /// the tag against the argument record, so a disagreeing tag is answered
    /// with EIO rather than dispatched.
    pub fn tagged(
        kind: OpKind,
        meta: RequestMeta,
        args: OpArgs,
        reply: Option<RequestHandle>,
        mount: Weak<MountContext>,
    ) -> Self {
        Self {
            meta,
            kind,
            args,
            reply,
            mount,
        }
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn mount(&self) -> Weak<MountContext> {
        self.mount.clone()
    }

    pub fn into_parts(self) -> (RequestMeta, OpKind, OpArgs, Option<RequestHandle>) {
        (self.meta, self.kind, self.args, self.reply)
    }
}

impl std::fmt::Debug for RequestEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("unique", &self.meta.unique)
            .field("kind", &self.kind)
            .field("has_reply", &self.reply.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn tag_is_derived_from_the_argument_record() {
        let envelope = RequestEnvelope::new(
            RequestMeta::default(),
            OpArgs::Lookup {
                parent: 1,
                name: OsString::from("home"),
            },
            None,
            Weak::new(),
        );
        assert_eq!(envelope.kind(), OpKind::Lookup);

        let (_, kind, args, reply) = envelope.into_parts();
        assert_eq!(kind, args.kind());
        assert!(reply.is_none());
    }

    #[test]
    fn explicit_tag_is_preserved_even_when_wrong() {
        let envelope = RequestEnvelope::tagged(
            OpKind::Read,
            RequestMeta::default(),
            OpArgs::ReadLink { ino: 2 },
            None,
            Weak::new(),
        );
        assert_eq!(envelope.kind(), OpKind::Read);
        assert_eq!(envelope.into_parts().2.kind(), OpKind::ReadLink);
    }
}
