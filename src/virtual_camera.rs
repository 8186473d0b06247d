//! VirtualCamera: one per logical client (`spec.md` §4.3).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{EvsError, EvsResult};
use crate::hal::{BufferId, HwBuffer, HwEvent};
use crate::hal_camera::HalCamera;
use crate::timeline::Fence;

/// Opaque, stable identity for a client — used as the timeline map key.
pub type ClientId = u64;

struct ClientState {
    held_frames: VecDeque<HwBuffer>,
    received_events: Vec<HwEvent>,
}

/// A client-visible camera handle multiplexed over one physical producer.
pub struct VirtualCamera {
    pub id: ClientId,
    pub allowed_buffers: u32,
    streaming: AtomicBool,
    is_master: AtomicBool,
    state: Mutex<ClientState>,
    hal: Arc<HalCamera>,
}

impl VirtualCamera {
    pub(crate) fn new(id: ClientId, allowed_buffers: u32, hal: Arc<HalCamera>) -> Arc<Self> {
        assert!(allowed_buffers >= 1, "allowedBuffers must be >= 1");
        Arc::new(VirtualCamera {
            id,
            allowed_buffers,
            streaming: AtomicBool::new(false),
            is_master: AtomicBool::new(false),
            state: Mutex::new(ClientState {
                held_frames: VecDeque::new(),
                received_events: Vec::new(),
            }),
            hal,
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire)
    }

    pub(crate) fn set_master_flag(&self, value: bool) {
        self.is_master.store(value, Ordering::Release);
    }

    pub fn start_stream(self: &Arc<Self>) -> EvsResult<()> {
        if self.streaming.load(Ordering::Acquire) {
            return Err(EvsError::StreamAlreadyRunning);
        }
        self.hal.clone().client_stream_starting(self)?;
        self.streaming.store(true, Ordering::Release);
        Ok(())
    }

    /// Idempotent (`spec.md` §4.3).
    pub fn stop_stream(self: &Arc<Self>) {
        if !self.streaming.swap(false, Ordering::AcqRel) {
            return;
        }
        self.hal.clone().client_stream_ending(self);
    }

    pub fn done_with_frame(&self, buffer_id: BufferId) -> EvsResult<()> {
        let mut state = self.state.lock();
        let pos = state.held_frames.iter().position(|b| b.id == buffer_id);
        match pos {
            Some(idx) => {
                state.held_frames.remove(idx);
                drop(state);
                self.hal.release_buffer(buffer_id);
                Ok(())
            }
            None => {
                warn!(client = self.id, buffer_id, "doneWithFrame for buffer this client does not hold");
                Err(EvsError::UnknownBuffer)
            }
        }
    }

    pub fn request_next_frame(self: &Arc<Self>, last_seen_timestamp: i64) -> EvsResult<Fence> {
        self.hal.clone().request_next_frame(self, last_seen_timestamp)
    }

    pub fn set_master(self: &Arc<Self>) -> EvsResult<()> {
        self.hal.clone().set_master(self)
    }

    pub fn force_master(self: &Arc<Self>) {
        self.hal.clone().force_master(self)
    }

    pub fn unset_master(self: &Arc<Self>) -> EvsResult<()> {
        self.hal.clone().unset_master(self)
    }

    pub fn set_parameter(self: &Arc<Self>, id: u32, value: i32) -> EvsResult<i32> {
        self.hal.clone().set_parameter(self, id, value)
    }

    pub fn get_parameter(&self, id: u32) -> EvsResult<i32> {
        self.hal.get_parameter(id)
    }

    pub fn notify(&self, event: HwEvent) {
        debug!(client = self.id, event = %event, "event delivered to client");
        self.state.lock().received_events.push(event);
    }

    /// Events delivered to this client so far, oldest first. Exists for test
    /// assertions on delivery fan-out (`spec.md` §8 testable property 3),
    /// the `MockHardwareCamera::done_with_frame_calls` idea applied to the
    /// client side of the sink boundary.
    pub fn received_events(&self) -> Vec<HwEvent> {
        self.state.lock().received_events.clone()
    }

    /// Called by the multiplexer. `false` means this client does not count
    /// as a consumer for this buffer — it is at its cap (`spec.md` §4.3).
    pub(crate) fn deliver_frame(&self, buffer: HwBuffer) -> bool {
        let mut state = self.state.lock();
        if state.held_frames.len() as u32 >= self.allowed_buffers {
            return false;
        }
        state.held_frames.push_back(buffer);
        true
    }

    pub fn held_frame_count(&self) -> usize {
        self.state.lock().held_frames.len()
    }

    pub fn dump(&self, out: &mut dyn std::fmt::Write) {
        let _ = writeln!(
            out,
            "  client {}: streaming={} master={} held_frames={}/{}",
            self.id,
            self.is_streaming(),
            self.is_master(),
            self.held_frame_count(),
            self.allowed_buffers
        );
    }
}

/// Weak handle the multiplexer keeps instead of an owning reference
/// (`spec.md` §3 "Ownership", §9 "Weak back-references").
pub(crate) type WeakVirtualCamera = Weak<VirtualCamera>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal_camera::test_support::test_hal;

    #[test]
    fn deliver_frame_fails_at_cap() {
        let hal = test_hal();
        let vc = VirtualCamera::new(1, 1, hal);
        let buf = HwBuffer {
            id: 1,
            timestamp_ms: 0,
            data: Arc::new(bytes::Bytes::new()),
        };
        assert!(vc.deliver_frame(buf.clone()));
        assert!(!vc.deliver_frame(buf));
        assert_eq!(vc.held_frame_count(), 1);
    }

    #[test]
    fn stop_stream_is_idempotent() {
        let hal = test_hal();
        let vc = VirtualCamera::new(1, 2, hal);
        vc.stop_stream();
        vc.stop_stream();
    }

    #[test]
    fn done_with_frame_unknown_buffer_errors() {
        let hal = test_hal();
        let vc = VirtualCamera::new(1, 2, hal);
        assert_eq!(vc.done_with_frame(42), Err(EvsError::UnknownBuffer));
    }
}
