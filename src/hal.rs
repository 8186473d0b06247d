//! Downward (hardware camera) and upward (sink) interfaces, `spec.md` §6.
//!
//! These are the narrow seams the multiplexer is consumed through; the real
//! driver and IPC transport live outside this crate's scope (`spec.md`
//! §1). A `MockHardwareCamera` test double implementing [`HardwareCamera`]
//! lives in [`crate::testing`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::EvsResult;

/// Opaque hardware buffer id.
pub type BufferId = u64;

/// A single hardware-delivered buffer. Payload is shared, never copied
/// (`spec.md` §3 "Ownership"): cloning a `HwBuffer` clones the handle, not
/// the pixels, the same zero-copy idiom the teacher applies to `Arc<Bytes>`
/// in `rust/src/streaming/frame_distributor.rs`.
#[derive(Clone, Debug)]
pub struct HwBuffer {
    pub id: BufferId,
    pub timestamp_ms: i64,
    pub data: Arc<Bytes>,
}

/// Events the hardware layer can raise (`spec.md` §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HwEvent {
    StreamStopped,
    MasterReleased,
    ParameterChanged { id: u32, applied_value: i32 },
}

impl fmt::Display for HwEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwEvent::StreamStopped => write!(f, "STREAM_STOPPED"),
            HwEvent::MasterReleased => write!(f, "MASTER_RELEASED"),
            HwEvent::ParameterChanged { id, applied_value } => {
                write!(f, "PARAMETER_CHANGED(id={id}, value={applied_value})")
            }
        }
    }
}

/// Required capabilities of the hardware camera producer (`spec.md` §6,
/// "Downward").
pub trait HardwareCamera: Send + Sync {
    fn set_max_frames_in_flight(&self, count: u32) -> EvsResult<()>;

    /// Returns the number of buffers the hardware actually accepted.
    fn import_external_buffers(&self, buffers: &[BufferId]) -> EvsResult<usize>;

    fn start_video_stream(&self, sink: Arc<dyn StreamSink>) -> EvsResult<()>;
    fn stop_video_stream(&self) -> EvsResult<()>;

    /// Batched v1.1 return path — the supported one (`spec.md` §6).
    fn done_with_frame_1_1(&self, buffers: &[BufferId]);

    /// Returns the applied value, which may differ from the requested one
    /// (hardware may clamp).
    fn set_int_parameter(&self, id: u32, value: i32) -> EvsResult<i32>;
    fn get_int_parameter(&self, id: u32) -> EvsResult<i32>;

    /// Whether the hardware layer can back fence-based delivery at all.
    /// Used for the `dump()` diagnostics surface (`spec.md` §6).
    fn supports_fences(&self) -> bool;

    /// Attempt to create the fence primitive for one client. May fail even
    /// when `supports_fences()` is true (e.g. a kernel resource is
    /// exhausted); the multiplexer downgrades that client to pull-mode
    /// delivery on failure (`spec.md` §4.1, §4.4.1).
    fn create_timeline(&self) -> bool {
        self.supports_fences()
    }
}

/// Upward sink surface the multiplexer exposes to the hardware
/// (`spec.md` §6, "Delivery callback shape").
pub trait StreamSink: Send + Sync {
    /// Legacy single-buffer path — rejected immediately per `spec.md` §6.
    fn deliver_frame_1_0(&self, _buffer: HwBuffer) {
        tracing::warn!("deliver_frame_1_0 is not supported; buffer rejected");
    }

    /// The supported delivery path. The first buffer's timestamp is
    /// authoritative.
    fn deliver_frame_1_1(&self, buffers: Vec<HwBuffer>);

    fn notify(&self, event: HwEvent);
}
