// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bridge configuration

use crate::error::{BridgeError, BridgeResult};
use relayfs_proto::XattrLayout;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_MAX_WRITE_BYTES: u32 = 4 * 1024 * 1024;
pub const DEFAULT_MAX_READAHEAD_BYTES: u32 = 128 * 1024;
pub const DEFAULT_MAX_BACKGROUND: u16 = 64;
const MAX_SUPPORTED_WRITE_BYTES: u32 = 16 * 1024 * 1024;

/// Tunables for one mounted bridge instance.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Desired write buffer size; the kernel may clamp it at Init.
    pub max_write: u32,
    /// Desired readahead window.
    pub max_readahead: u32,
    /// Desired number of backgrounded kernel requests.
    pub max_background: u16,
    /// Congestion threshold; derived from `max_background` when unset.
    pub congestion_threshold: Option<u16>,
    /// Xattr argument layout; the platform default when unset.
    pub xattr_layout: Option<XattrLayout>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_write: DEFAULT_MAX_WRITE_BYTES,
            max_readahead: DEFAULT_MAX_READAHEAD_BYTES,
            max_background: DEFAULT_MAX_BACKGROUND,
            congestion_threshold: None,
            xattr_layout: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: BridgeConfig =
            serde_json::from_str(&content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validated()
    }

    fn validated(self) -> BridgeResult<Self> {
        if self.max_write == 0 || self.max_write > MAX_SUPPORTED_WRITE_BYTES {
            return Err(BridgeError::Config(format!(
                "max_write must be within 1..={MAX_SUPPORTED_WRITE_BYTES}"
            )));
        }
        if self.max_background == 0 {
            return Err(BridgeError::Config("max_background must be > 0".into()));
        }
        Ok(self)
    }

    pub fn effective_xattr_layout(&self) -> XattrLayout {
        self.xattr_layout.unwrap_or_else(XattrLayout::native)
    }

    /// Congestion threshold to request: explicit, or 3/4 of max_background.
    pub fn effective_congestion_threshold(&self) -> u16 {
        self.congestion_threshold
            .unwrap_or_else(|| ((3 * self.max_background as u32) / 4).max(1) as u16)
    }
}
