//! A `HardwareCamera` test double, usable from both unit and integration
//! tests. Not `cfg(test)`-gated so `tests/*.rs` can see it too.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{EvsError, EvsResult};
use crate::hal::{BufferId, HardwareCamera, HwBuffer, StreamSink};

/// Records what was called on it and hands back canned/identity answers.
/// Modeled on the teacher's `rust/src/streaming/pipeline.rs` test fakes.
pub struct MockHardwareCamera {
    max_frames_in_flight: AtomicU32,
    streaming: AtomicBool,
    fences_supported: AtomicBool,
    parameter: AtomicI32,
    sink: Mutex<Option<Arc<dyn StreamSink>>>,
    pub done_with_frame_calls: Mutex<Vec<BufferId>>,
    pub imported_buffers: Mutex<Vec<BufferId>>,
}

impl MockHardwareCamera {
    pub fn new() -> Self {
        MockHardwareCamera {
            max_frames_in_flight: AtomicU32::new(0),
            streaming: AtomicBool::new(false),
            fences_supported: AtomicBool::new(true),
            parameter: AtomicI32::new(0),
            sink: Mutex::new(None),
            done_with_frame_calls: Mutex::new(Vec::new()),
            imported_buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn without_fence_support() -> Self {
        let hw = MockHardwareCamera::new();
        hw.fences_supported.store(false, Ordering::Release);
        hw
    }

    /// Push a buffer through the sink as if the hardware had produced it.
    pub fn push_frame(&self, buffer: HwBuffer) {
        if let Some(sink) = self.sink.lock().unwrap().clone() {
            sink.deliver_frame_1_1(vec![buffer]);
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn max_frames_in_flight(&self) -> u32 {
        self.max_frames_in_flight.load(Ordering::Acquire)
    }
}

impl Default for MockHardwareCamera {
    fn default() -> Self {
        MockHardwareCamera::new()
    }
}

impl HardwareCamera for MockHardwareCamera {
    fn set_max_frames_in_flight(&self, count: u32) -> EvsResult<()> {
        self.max_frames_in_flight.store(count, Ordering::Release);
        Ok(())
    }

    fn import_external_buffers(&self, buffers: &[BufferId]) -> EvsResult<usize> {
        self.imported_buffers.lock().unwrap().extend_from_slice(buffers);
        Ok(buffers.len())
    }

    fn start_video_stream(&self, sink: Arc<dyn StreamSink>) -> EvsResult<()> {
        if self.streaming.swap(true, Ordering::AcqRel) {
            return Err(EvsError::StreamAlreadyRunning);
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop_video_stream(&self) -> EvsResult<()> {
        if !self.streaming.swap(false, Ordering::AcqRel) {
            return Err(EvsError::NotStreaming);
        }
        if let Some(sink) = self.sink.lock().unwrap().take() {
            sink.notify(crate::hal::HwEvent::StreamStopped);
        }
        Ok(())
    }

    fn done_with_frame_1_1(&self, buffers: &[BufferId]) {
        self.done_with_frame_calls.lock().unwrap().extend_from_slice(buffers);
    }

    fn set_int_parameter(&self, _id: u32, value: i32) -> EvsResult<i32> {
        self.parameter.store(value, Ordering::Release);
        Ok(value)
    }

    fn get_int_parameter(&self, _id: u32) -> EvsResult<i32> {
        Ok(self.parameter.load(Ordering::Acquire))
    }

    fn supports_fences(&self) -> bool {
        self.fences_supported.load(Ordering::Acquire)
    }
}

/// Lets callers keep an `Arc<MockHardwareCamera>` for inspection after
/// handing a boxed trait object to `HalCamera::new`.
impl HardwareCamera for Arc<MockHardwareCamera> {
    fn set_max_frames_in_flight(&self, count: u32) -> EvsResult<()> {
        (**self).set_max_frames_in_flight(count)
    }

    fn import_external_buffers(&self, buffers: &[BufferId]) -> EvsResult<usize> {
        (**self).import_external_buffers(buffers)
    }

    fn start_video_stream(&self, sink: Arc<dyn StreamSink>) -> EvsResult<()> {
        (**self).start_video_stream(sink)
    }

    fn stop_video_stream(&self) -> EvsResult<()> {
        (**self).stop_video_stream()
    }

    fn done_with_frame_1_1(&self, buffers: &[BufferId]) {
        (**self).done_with_frame_1_1(buffers)
    }

    fn set_int_parameter(&self, id: u32, value: i32) -> EvsResult<i32> {
        (**self).set_int_parameter(id, value)
    }

    fn get_int_parameter(&self, id: u32) -> EvsResult<i32> {
        (**self).get_int_parameter(id)
    }

    fn supports_fences(&self) -> bool {
        (**self).supports_fences()
    }
}
