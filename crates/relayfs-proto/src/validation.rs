// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Envelope validation against the operation catalog
//!
//! Decode is all-or-nothing: an envelope either passes every check here and is
//! dispatched, or fails as a whole and is answered with a generic I/O error.

use crate::args::OpArgs;
use crate::ops::{self, DispatchMode, OpKind, XattrLayout};
use crate::replies::Errno;
use thiserror::Error;

/// Why an envelope failed to decode.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("envelope tagged {tagged} but arguments marshal {actual}")]
    TagMismatch { tagged: OpKind, actual: OpKind },
    #[error("{kind} record uses {found:?} xattr layout on a {expected:?} mount")]
    LayoutMismatch {
        kind: OpKind,
        expected: XattrLayout,
        found: XattrLayout,
    },
    #[error("{kind} is not a bridged operation")]
    NotBridged { kind: OpKind },
}

impl DecodeError {
    /// Marshaling errors surface to the transport as a generic I/O error.
    pub fn errno(&self) -> Errno {
        libc::EIO
    }
}

/// Validate one envelope's tag and argument record against the catalog.
///
/// `layout` is the xattr layout of the owning mount; an argument record whose
/// shape disagrees with it indicates arity drift and fails the whole envelope.
pub fn check_envelope(
    tagged: OpKind,
    args: &OpArgs,
    layout: XattrLayout,
) -> Result<(), DecodeError> {
    if ops::spec(tagged).mode != DispatchMode::Bridged {
        return Err(DecodeError::NotBridged { kind: tagged });
    }

    let actual = args.kind();
    if actual != tagged {
        return Err(DecodeError::TagMismatch { tagged, actual });
    }

    if let Some(found) = args.xattr_layout() {
        if found != layout {
            return Err(DecodeError::LayoutMismatch {
                kind: tagged,
                expected: layout,
                found,
            });
        }
    }

    Ok(())
}
