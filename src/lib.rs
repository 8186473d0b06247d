//! A user-space broker that multiplexes one hardware camera stream across
//! many virtual-camera clients: buffer refcounting, fence-based delivery
//! synchronization, a master/exclusive-control protocol, and the stream
//! state machine that ties hardware start/stop to client demand.
//!
//! See `SPEC_FULL.md` in the repository root for the full module map.

pub mod config;
pub mod error;
pub mod frame_record;
pub mod hal;
pub mod hal_camera;
pub mod registry;
pub mod timeline;
pub mod virtual_camera;

pub mod testing;

pub use config::MuxConfig;
pub use error::{EvsError, EvsResult};
pub use hal::{BufferId, HardwareCamera, HwBuffer, HwEvent, StreamSink};
pub use hal_camera::{CameraId, HalCamera, StreamFormat};
pub use registry::{HardwareFactory, Registry};
pub use timeline::{Fence, Timeline};
pub use virtual_camera::VirtualCamera;
