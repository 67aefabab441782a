// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RelayFS FUSE Host — cross-thread dispatch bridge
//!
//! Bridges the multi-threaded FUSE lowlevel transport to a single-threaded
//! filesystem runtime. Transport worker threads marshal operations into typed
//! envelopes and hand them to a per-mount lock-free queue; one control thread
//! drains the queue, validates each envelope against the operation catalog,
//! and invokes the registered [`FsHandler`], which answers through a
//! consume-once reply handle.
//!
//! The FUSE transport itself is optional: enable the `fuse` feature on Linux
//! to get the [`frontend`] entry points and the reply encoder. Everything
//! else — channel, mount context, dispatcher, handler seam — is
//! platform-neutral and runs without a kernel in sight.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod mount;

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod encode;
#[cfg(all(feature = "fuse", target_os = "linux"))]
pub mod frontend;

#[cfg(test)]
pub mod testing;

pub use channel::{HandoffChannel, WakeSignal};
pub use config::BridgeConfig;
pub use dispatch::{ControlThread, Dispatcher};
pub use envelope::RequestEnvelope;
pub use error::{BridgeError, BridgeResult};
pub use handler::FsHandler;
pub use mount::MountContext;

#[cfg(all(feature = "fuse", target_os = "linux"))]
pub use frontend::{mount, FuseFrontend};
