//! HalCamera / Multiplexer — the core broker (`spec.md` §4.4).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::MuxConfig;
use crate::error::{EvsError, EvsResult};
use crate::frame_record::FrameRecordTable;
use crate::hal::{BufferId, HardwareCamera, HwBuffer, HwEvent, StreamSink};
use crate::timeline::{Fence, Timeline};
use crate::virtual_camera::{ClientId, VirtualCamera};

/// Opaque, immutable camera id (`spec.md` §3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CameraId(Arc<str>);

impl CameraId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        CameraId(id.into())
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The active stream configuration reported by `dump()` (`spec.md` §6).
#[derive(Clone, Debug)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub usage: u32,
    pub rotation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct FrameRequest {
    client: Weak<VirtualCamera>,
    last_timestamp: i64,
    #[allow(dead_code)] // retained for fidelity with spec.md §3's FrameRequest shape
    fence: Fence,
}

struct MuxState {
    clients: Vec<Weak<VirtualCamera>>,
    frame_table: FrameRecordTable,
    timelines: HashMap<ClientId, Arc<Timeline>>,
    next_requests: VecDeque<FrameRequest>,
    stream: StreamState,
}

#[derive(Default)]
struct Stats {
    frames_received: AtomicU64,
    frames_not_used: AtomicU64,
    sync_frames: AtomicU64,
}

/// The central broker: owns the hardware stream, the (weak) client list,
/// the FrameRecord table, per-client timelines, the stream state machine,
/// and the master pointer (`spec.md` §2, §4.4).
pub struct HalCamera {
    pub id: CameraId,
    hw: Box<dyn HardwareCamera>,
    config: MuxConfig,
    stream_format: StreamFormat,
    state: Mutex<MuxState>,
    master: Mutex<Option<Weak<VirtualCamera>>>,
    next_client_id: AtomicU64,
    stats: Stats,
    created_at: Instant,
}

impl HalCamera {
    pub fn new(id: CameraId, hw: Box<dyn HardwareCamera>, config: MuxConfig, stream_format: StreamFormat) -> Arc<Self> {
        Arc::new(HalCamera {
            id,
            hw,
            config,
            stream_format,
            state: Mutex::new(MuxState {
                clients: Vec::new(),
                frame_table: FrameRecordTable::new(),
                timelines: HashMap::new(),
                next_requests: VecDeque::new(),
                stream: StreamState::Stopped,
            }),
            master: Mutex::new(None),
            next_client_id: AtomicU64::new(0),
            stats: Stats::default(),
            created_at: Instant::now(),
        })
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.iter().filter(|w| w.upgrade().is_some()).count()
    }

    // ---- §4.4.1 client registration ----------------------------------

    pub fn make_virtual_camera(self: &Arc<Self>) -> EvsResult<Arc<VirtualCamera>> {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let vc = VirtualCamera::new(id, self.config.default_allowed_buffers, self.clone());
        self.own_virtual_camera(vc.clone())?;
        Ok(vc)
    }

    fn own_virtual_camera(self: &Arc<Self>, vc: Arc<VirtualCamera>) -> EvsResult<()> {
        self.change_frames_in_flight(vc.allowed_buffers as i64)?;

        if self.hw.supports_fences() {
            if self.hw.create_timeline() {
                let timeline = Timeline::new();
                self.state.lock().timelines.insert(vc.id, timeline);
            } else {
                warn!(client = vc.id, "timeline creation failed; client falls back to pull mode");
            }
        }

        self.state.lock().clients.push(Arc::downgrade(&vc));
        info!(camera = %self.id, client = vc.id, "virtual camera registered");
        Ok(())
    }

    pub fn disown_virtual_camera(&self, vc: &Arc<VirtualCamera>) {
        let found = {
            let mut state = self.state.lock();
            let before = state.clients.len();
            state.clients.retain(|w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(vc)));
            state.timelines.remove(&vc.id);
            before != state.clients.len()
        };
        if !found {
            warn!(camera = %self.id, client = vc.id, "disownVirtualCamera: client was not registered");
        }
        if let Err(e) = self.change_frames_in_flight(0) {
            warn!(camera = %self.id, error = ?e, "failed to shrink buffer pool after disown");
        }
        info!(camera = %self.id, client = vc.id, "virtual camera disowned");
    }

    // ---- §4.4.2 buffer pool negotiation -------------------------------

    fn live_allowed_buffers_sum(&self) -> i64 {
        self.state
            .lock()
            .clients
            .iter()
            .filter_map(|w| w.upgrade())
            .map(|c| c.allowed_buffers as i64)
            .sum()
    }

    /// `spec.md` §4.4.2. Hardware call happens outside the frame lock.
    pub fn change_frames_in_flight(&self, delta: i64) -> EvsResult<()> {
        let target = (self.live_allowed_buffers_sum() + delta).max(1) as u32;
        self.hw.set_max_frames_in_flight(target)?;
        self.state.lock().frame_table.compact(target as usize);
        Ok(())
    }

    /// Import caller-provided buffers; the delta is whatever the hardware
    /// accepted. Failure does not disturb existing state (`spec.md` §4.4.2).
    pub fn import_external_buffers(&self, buffers: &[BufferId]) -> EvsResult<usize> {
        let accepted = self.hw.import_external_buffers(buffers)?;
        if accepted > 0 {
            self.state.lock().frame_table.compact(
                (self.live_allowed_buffers_sum() as usize) + accepted,
            );
        }
        Ok(accepted)
    }

    // ---- §4.4.3 stream state machine ----------------------------------

    /// The STOPPED/STARTING/RUNNING/STOPPING states are all committed under
    /// `state`'s own lock, which is never held across a call into `self.hw`
    /// — claiming the STARTING/STOPPING slot and releasing the lock before
    /// touching hardware is what serializes racing clients without risking
    /// a double lock when the hardware calls back into `notify` on the same
    /// thread (`spec.md` §5).
    pub(crate) fn client_stream_starting(self: &Arc<Self>, _vc: &Arc<VirtualCamera>) -> EvsResult<()> {
        {
            let mut state = self.state.lock();
            if state.stream != StreamState::Stopped {
                return Ok(());
            }
            state.stream = StreamState::Starting;
        }
        let sink: Arc<dyn StreamSink> = self.clone();
        let result = self.hw.start_video_stream(sink);
        let mut state = self.state.lock();
        match &result {
            Ok(()) => {
                state.stream = StreamState::Running;
                drop(state);
                info!(camera = %self.id, "hardware stream started");
            }
            Err(_) => state.stream = StreamState::Stopped,
        }
        result
    }

    pub(crate) fn client_stream_ending(self: &Arc<Self>, _vc: &Arc<VirtualCamera>) {
        {
            let mut state = self.state.lock();
            let any_streaming = state.clients.iter().filter_map(|w| w.upgrade()).any(|c| c.is_streaming());
            if any_streaming || state.stream != StreamState::Running {
                return;
            }
            state.stream = StreamState::Stopping;
        }
        if let Err(e) = self.hw.stop_video_stream() {
            warn!(camera = %self.id, error = ?e, "hardware refused stream stop");
            let mut state = self.state.lock();
            if state.stream == StreamState::Stopping {
                state.stream = StreamState::Running;
            }
        }
        // On success, the hardware's STREAM_STOPPED event (possibly
        // delivered synchronously, on this same thread) drives the
        // STOPPING -> STOPPED transition via `on_stream_stopped`.
    }

    fn on_stream_stopped(&self) {
        let mut state = self.state.lock();
        if state.stream != StreamState::Stopping {
            warn!(camera = %self.id, state = ?state.stream, "STREAM_STOPPED while not STOPPING");
        }
        state.stream = StreamState::Stopped;
    }

    // ---- §4.5 master / exclusive-control protocol ----------------------

    pub(crate) fn set_master(&self, vc: &Arc<VirtualCamera>) -> EvsResult<()> {
        let mut master = self.master.lock();
        if master.as_ref().and_then(|w| w.upgrade()).is_some() {
            return Err(EvsError::OwnershipLost);
        }
        *master = Some(Arc::downgrade(vc));
        vc.set_master_flag(true);
        Ok(())
    }

    pub(crate) fn force_master(&self, vc: &Arc<VirtualCamera>) {
        let previous = {
            let mut master = self.master.lock();
            let prev = master.clone();
            *master = Some(Arc::downgrade(vc));
            prev
        };
        vc.set_master_flag(true);
        if let Some(prev_vc) = previous.and_then(|w| w.upgrade()) {
            if !Arc::ptr_eq(&prev_vc, vc) {
                prev_vc.set_master_flag(false);
                prev_vc.notify(HwEvent::MasterReleased);
            }
        }
    }

    pub(crate) fn unset_master(&self, vc: &Arc<VirtualCamera>) -> EvsResult<()> {
        {
            let mut master = self.master.lock();
            let is_current = master
                .as_ref()
                .and_then(|w| w.upgrade())
                .map_or(false, |m| Arc::ptr_eq(&m, vc));
            if !is_current {
                return Err(EvsError::InvalidArg);
            }
            *master = None;
        }
        vc.set_master_flag(false);
        // Reuses the generic hardware-event forwarder, so the released
        // master itself also receives MASTER_RELEASED — preserved per
        // spec.md §9's flagged ambiguity.
        self.forward_event_to_clients(HwEvent::MasterReleased);
        Ok(())
    }

    pub(crate) fn set_parameter(&self, vc: &Arc<VirtualCamera>, id: u32, value: i32) -> EvsResult<i32> {
        let is_master = self
            .master
            .lock()
            .as_ref()
            .and_then(|w| w.upgrade())
            .map_or(false, |m| Arc::ptr_eq(&m, vc));
        if !is_master {
            let _ = self.hw.get_int_parameter(id);
            return Err(EvsError::InvalidArg);
        }
        let applied = self.hw.set_int_parameter(id, value)?;
        self.forward_event_to_clients(HwEvent::ParameterChanged { id, applied_value: applied });
        Ok(applied)
    }

    pub(crate) fn get_parameter(&self, id: u32) -> EvsResult<i32> {
        self.hw.get_int_parameter(id)
    }

    // ---- §4.4.4 fenced delivery request --------------------------------

    pub(crate) fn request_next_frame(&self, vc: &Arc<VirtualCamera>, last_seen_timestamp: i64) -> EvsResult<Fence> {
        let mut state = self.state.lock();
        let timeline = state
            .timelines
            .get(&vc.id)
            .cloned()
            .ok_or(EvsError::SyncUnsupported)?;
        let fence = timeline.create_fence();
        state.next_requests.push_back(FrameRequest {
            client: Arc::downgrade(vc),
            last_timestamp: last_seen_timestamp,
            fence: fence.clone(),
        });
        Ok(fence)
    }

    pub(crate) fn release_buffer(&self, buffer_id: BufferId) {
        let should_return = self.state.lock().frame_table.release(buffer_id);
        if should_return {
            self.hw.done_with_frame_1_1(&[buffer_id]);
        }
    }

    fn forward_event_to_clients(&self, event: HwEvent) {
        let clients: Vec<Arc<VirtualCamera>> = {
            let state = self.state.lock();
            state.clients.iter().filter_map(|w| w.upgrade()).collect()
        };
        for c in clients {
            c.notify(event.clone());
        }
    }

    // ---- §6 diagnostics -------------------------------------------------

    pub fn dump(&self, out: &mut dyn fmt::Write) {
        let master_id = self.master.lock().as_ref().and_then(|w| w.upgrade()).map(|m| m.id);
        let state = self.state.lock();
        let _ = writeln!(
            out,
            "camera {} created {:?} ago: frames_received={} frames_not_used={} sync_frames={}",
            self.id,
            self.created_at.elapsed(),
            self.stats.frames_received.load(Ordering::Relaxed),
            self.stats.frames_not_used.load(Ordering::Relaxed),
            self.stats.sync_frames.load(Ordering::Relaxed),
        );
        let _ = writeln!(
            out,
            "  stream: state={:?} {}x{} format={} usage={} rotation={} sync_supported={}",
            state.stream,
            self.stream_format.width,
            self.stream_format.height,
            self.stream_format.format,
            self.stream_format.usage,
            self.stream_format.rotation,
            self.hw.supports_fences(),
        );
        let _ = writeln!(out, "  master: {:?}", master_id);
        for w in &state.clients {
            if let Some(c) = w.upgrade() {
                c.dump(out);
                let _ = writeln!(out, "    fenced_delivery={}", state.timelines.contains_key(&c.id));
            }
        }
    }
}

impl StreamSink for HalCamera {
    fn deliver_frame_1_1(&self, mut buffers: Vec<HwBuffer>) {
        let buffer = match buffers.drain(..).next() {
            Some(b) => b,
            None => return,
        };
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        let threshold_ms = self.config.sync_threshold_ms as i64;

        // Linearization point: a request enqueued during this dispatch
        // lands in the fresh `next_requests`, never in what we just took
        // (`spec.md` §4.4.4, §8.5).
        let (current_requests, timelines, pull_clients) = {
            let mut state = self.state.lock();
            let current = std::mem::take(&mut state.next_requests);
            let timelines = state.timelines.clone();
            let pull_clients: Vec<Arc<VirtualCamera>> = state
                .clients
                .iter()
                .filter_map(|w| w.upgrade())
                .filter(|c| !timelines.contains_key(&c.id))
                .collect();
            (current, timelines, pull_clients)
        };

        let mut total_deliveries: u32 = 0;
        let mut requeue = Vec::new();

        for req in current_requests {
            let client = match req.client.upgrade() {
                Some(c) => c,
                None => continue, // client died; drop the request
            };
            if buffer.timestamp_ms - req.last_timestamp < threshold_ms {
                self.stats.sync_frames.fetch_add(1, Ordering::Relaxed);
                requeue.push(req);
                continue;
            }
            if client.deliver_frame(buffer.clone()) {
                total_deliveries += 1;
                if let Some(timeline) = timelines.get(&client.id) {
                    timeline.bump_signal();
                }
            }
        }

        if !requeue.is_empty() {
            self.state.lock().next_requests.extend(requeue);
        }

        for client in pull_clients {
            if client.deliver_frame(buffer.clone()) {
                total_deliveries += 1;
            }
        }

        if total_deliveries == 0 {
            self.stats.frames_not_used.fetch_add(1, Ordering::Relaxed);
            self.hw.done_with_frame_1_1(&[buffer.id]);
        } else {
            self.state.lock().frame_table.track(buffer.id, total_deliveries);
        }
        debug!(camera = %self.id, buffer_id = buffer.id, total_deliveries, "frame dispatched");
    }

    fn notify(&self, event: HwEvent) {
        if event == HwEvent::StreamStopped {
            self.on_stream_stopped();
        }
        self.forward_event_to_clients(event);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::testing::MockHardwareCamera;

    pub fn test_hal() -> Arc<HalCamera> {
        HalCamera::new(
            CameraId::new("test-cam"),
            Box::new(MockHardwareCamera::new()),
            MuxConfig::default(),
            StreamFormat {
                width: 640,
                height: 480,
                format: "NV12".into(),
                usage: 0,
                rotation: 0,
            },
        )
    }
}
