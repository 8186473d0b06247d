//! Tunable parameters for the multiplexer.
//!
//! `spec.md` §9 flags `SYNC_THRESHOLD` as hard-coded in the source system
//! with a TODO to derive it from framerate, and asks implementers to expose
//! it as a parameter instead of baking it in. This mirrors the
//! `#[serde(default = ...)]` pattern the teacher uses throughout
//! `rust/src/config.rs` for every tunable that has a sane fallback.

use serde::Deserialize;

/// Default sync threshold: roughly half the inter-frame interval at 30fps.
fn default_sync_threshold_ms() -> u64 {
    16
}

/// Default per-client in-flight buffer budget (`spec.md` §4.4.1).
fn default_allowed_buffers() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MuxConfig {
    #[serde(default = "default_sync_threshold_ms")]
    pub sync_threshold_ms: u64,

    #[serde(default = "default_allowed_buffers")]
    pub default_allowed_buffers: u32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        MuxConfig {
            sync_threshold_ms: default_sync_threshold_ms(),
            default_allowed_buffers: default_allowed_buffers(),
        }
    }
}

impl MuxConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
