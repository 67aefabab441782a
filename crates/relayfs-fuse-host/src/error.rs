// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the RelayFS FUSE host

/// Host-side bridge error. Only construction of the per-mount machinery is
/// fatal; everything request-scoped is answered through the reply protocol
/// instead of surfacing here.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("control thread failed to start")]
    Spawn(#[source] std::io::Error),
    #[error("invalid bridge configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
