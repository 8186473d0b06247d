//! End-to-end scenarios driving the broker through its public API.

use std::sync::Arc;

use assert_matches::assert_matches;
use bytes::Bytes;

use evs_camera_mux::hal::{HwBuffer, HwEvent};
use evs_camera_mux::registry::{HardwareFactory, Registry};
use evs_camera_mux::testing::MockHardwareCamera;
use evs_camera_mux::{CameraId, EvsError, EvsResult, HardwareCamera, MuxConfig, StreamFormat, StreamSink};

fn stream_format() -> StreamFormat {
    StreamFormat {
        width: 640,
        height: 480,
        format: "NV12".into(),
        usage: 0,
        rotation: 0,
    }
}

struct SingleMockFactory(Arc<MockHardwareCamera>);

impl HardwareFactory for SingleMockFactory {
    fn open(&self, _id: &CameraId) -> EvsResult<(Box<dyn HardwareCamera>, StreamFormat)> {
        Ok((Box::new(self.0.clone()), stream_format()))
    }
}

fn buffer(id: u64, timestamp_ms: i64) -> HwBuffer {
    HwBuffer {
        id,
        timestamp_ms,
        data: Arc::new(Bytes::from_static(b"x")),
    }
}

#[test]
fn s1_single_client_round_trip() {
    let mock = Arc::new(MockHardwareCamera::new());
    let registry = Registry::new(MuxConfig::default(), Box::new(SingleMockFactory(mock.clone())));
    let id = CameraId::new("cam0");

    let vc = registry.open_camera(id.clone()).unwrap();
    vc.start_stream().unwrap();

    let camera = registry.camera_for(&id).unwrap();
    camera.deliver_frame_1_1(vec![buffer(7, 100)]);
    assert_eq!(vc.held_frame_count(), 1);

    vc.done_with_frame(7).unwrap();

    assert_eq!(*mock.done_with_frame_calls.lock().unwrap(), vec![7]);
}

#[test]
fn s2_two_clients_share_one_buffer() {
    let mock = Arc::new(MockHardwareCamera::new());
    let registry = Registry::new(MuxConfig::default(), Box::new(SingleMockFactory(mock.clone())));
    let id = CameraId::new("cam0");

    let a = registry.open_camera(id.clone()).unwrap();
    let b = registry.open_camera(id.clone()).unwrap();
    assert_eq!(mock.max_frames_in_flight(), 4);

    let camera = registry.camera_for(&id).unwrap();
    camera.deliver_frame_1_1(vec![buffer(9, 100)]);
    assert_eq!(a.held_frame_count(), 1);
    assert_eq!(b.held_frame_count(), 1);

    a.done_with_frame(9).unwrap();
    assert!(mock.done_with_frame_calls.lock().unwrap().is_empty());

    b.done_with_frame(9).unwrap();
    assert_eq!(*mock.done_with_frame_calls.lock().unwrap(), vec![9]);
}

#[test]
fn s3_fenced_pacing() {
    let mock = Arc::new(MockHardwareCamera::new());
    let mut config = MuxConfig::default();
    config.sync_threshold_ms = 16;
    let registry = Registry::new(config, Box::new(SingleMockFactory(mock.clone())));
    let id = CameraId::new("cam0");

    let vc = registry.open_camera(id.clone()).unwrap();
    let fence = vc.request_next_frame(1000).unwrap();

    let camera = registry.camera_for(&id).unwrap();
    camera.deliver_frame_1_1(vec![buffer(1, 1010)]);
    assert!(!fence.is_ready());
    assert_eq!(vc.held_frame_count(), 0);

    camera.deliver_frame_1_1(vec![buffer(2, 1030)]);
    assert!(fence.is_ready());
    assert_eq!(vc.held_frame_count(), 1);
}

#[test]
fn s4_master_preemption() {
    let mock = Arc::new(MockHardwareCamera::new());
    let registry = Registry::new(MuxConfig::default(), Box::new(SingleMockFactory(mock)));
    let id = CameraId::new("cam0");

    let a = registry.open_camera(id.clone()).unwrap();
    let b = registry.open_camera(id).unwrap();

    a.set_master().unwrap();
    assert_matches!(b.set_master(), Err(EvsError::OwnershipLost));

    b.force_master();
    assert!(b.is_master());
    assert!(!a.is_master());
    assert_eq!(a.received_events(), vec![HwEvent::MasterReleased]);
    assert!(b.received_events().is_empty());

    b.unset_master().unwrap();
    assert!(!b.is_master());
    // `unsetMaster` reuses the generic hardware-event forwarder, so the
    // releasing client also receives its own MASTER_RELEASED.
    assert_eq!(
        a.received_events(),
        vec![HwEvent::MasterReleased, HwEvent::MasterReleased]
    );
    assert_eq!(b.received_events(), vec![HwEvent::MasterReleased]);
}

#[test]
fn s5_client_death_mid_stream() {
    let mock = Arc::new(MockHardwareCamera::new());
    let registry = Registry::new(MuxConfig::default(), Box::new(SingleMockFactory(mock.clone())));
    let id = CameraId::new("cam0");

    let a = registry.open_camera(id.clone()).unwrap();
    let b = registry.open_camera(id.clone()).unwrap();
    a.start_stream().unwrap();
    b.start_stream().unwrap();

    drop(a);

    let camera = registry.camera_for(&id).unwrap();
    camera.deliver_frame_1_1(vec![buffer(3, 0)]);
    assert_eq!(b.held_frame_count(), 1);

    b.done_with_frame(3).unwrap();
    assert_eq!(*mock.done_with_frame_calls.lock().unwrap(), vec![3]);
}

#[test]
fn s6_timeline_creation_failure_falls_back_to_pull() {
    let mock = Arc::new(MockHardwareCamera::without_fence_support());
    let registry = Registry::new(MuxConfig::default(), Box::new(SingleMockFactory(mock)));
    let id = CameraId::new("cam0");

    let vc = registry.open_camera(id.clone()).unwrap();
    assert!(matches!(vc.request_next_frame(0), Err(EvsError::SyncUnsupported)));

    let camera = registry.camera_for(&id).unwrap();
    camera.deliver_frame_1_1(vec![buffer(4, 0)]);
    assert_eq!(vc.held_frame_count(), 1);
}

#[test]
fn stream_starts_only_while_a_client_is_streaming() {
    let mock = Arc::new(MockHardwareCamera::new());
    let registry = Registry::new(MuxConfig::default(), Box::new(SingleMockFactory(mock.clone())));
    let id = CameraId::new("cam0");

    let vc = registry.open_camera(id).unwrap();
    assert!(!mock.is_streaming());
    vc.start_stream().unwrap();
    assert!(mock.is_streaming());
    vc.stop_stream();
    assert!(!mock.is_streaming());
}
