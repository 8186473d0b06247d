//! Process-wide camera registry (`spec.md` §4.6, `openCamera`).
//!
//! One `HalCamera` per physical id, created on first open and torn down
//! once its last client disappears. `Registry` is an explicitly
//! constructed, caller-owned object, not a process-wide singleton; the
//! `parking_lot::Mutex<HashMap<..>>` get-or-create body mirrors the
//! counter-guarding style `rust/src/streaming/session.rs`'s
//! `SessionManager` uses around its own mutex-guarded bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::MuxConfig;
use crate::error::{EvsError, EvsResult};
use crate::hal::HardwareCamera;
use crate::hal_camera::{CameraId, HalCamera, StreamFormat};
use crate::virtual_camera::VirtualCamera;

/// Factory for producing a `HardwareCamera` for a given id the first time
/// it is opened. Kept separate from `HalCamera` construction so tests can
/// supply a `MockHardwareCamera` per id without touching process state.
pub trait HardwareFactory: Send + Sync {
    fn open(&self, id: &CameraId) -> EvsResult<(Box<dyn HardwareCamera>, StreamFormat)>;
}

pub struct Registry {
    config: MuxConfig,
    factory: Box<dyn HardwareFactory>,
    cameras: Mutex<HashMap<CameraId, Arc<HalCamera>>>,
}

impl Registry {
    pub fn new(config: MuxConfig, factory: Box<dyn HardwareFactory>) -> Arc<Self> {
        Arc::new(Registry {
            config,
            factory,
            cameras: Mutex::new(HashMap::new()),
        })
    }

    /// `spec.md` §4.6: get-or-create the `HalCamera` for `id`, then hand
    /// back a freshly minted `VirtualCamera` on it.
    pub fn open_camera(&self, id: CameraId) -> EvsResult<Arc<VirtualCamera>> {
        self.camera_for_or_create(id)?.make_virtual_camera()
    }

    fn camera_for_or_create(&self, id: CameraId) -> EvsResult<Arc<HalCamera>> {
        let mut cameras = self.cameras.lock();
        if let Some(existing) = cameras.get(&id) {
            return Ok(existing.clone());
        }
        let (hw, format) = self.factory.open(&id)?;
        let camera = HalCamera::new(id.clone(), hw, self.config.clone(), format);
        cameras.insert(id, camera.clone());
        Ok(camera)
    }

    /// The broker behind `id`, if it has been opened — for diagnostics and
    /// teardown, not part of the client-facing surface.
    pub fn camera_for(&self, id: &CameraId) -> Option<Arc<HalCamera>> {
        self.cameras.lock().get(id).cloned()
    }

    /// Drop a camera binding once its last client has been disowned.
    pub fn close_camera(&self, id: &CameraId) -> EvsResult<()> {
        let mut cameras = self.cameras.lock();
        match cameras.get(id) {
            Some(camera) if camera.client_count() == 0 => {
                cameras.remove(id);
                Ok(())
            }
            Some(_) => Err(EvsError::InvalidArg),
            None => Err(EvsError::InvalidArg),
        }
    }

    pub fn open_count(&self) -> usize {
        self.cameras.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHardwareCamera;

    struct MockFactory;

    impl HardwareFactory for MockFactory {
        fn open(&self, _id: &CameraId) -> EvsResult<(Box<dyn HardwareCamera>, StreamFormat)> {
            Ok((
                Box::new(MockHardwareCamera::new()),
                StreamFormat {
                    width: 1280,
                    height: 720,
                    format: "NV12".into(),
                    usage: 0,
                    rotation: 0,
                },
            ))
        }
    }

    #[test]
    fn opening_same_id_twice_shares_one_broker() {
        let registry = Registry::new(MuxConfig::default(), Box::new(MockFactory));
        let _a = registry.open_camera(CameraId::new("cam0")).unwrap();
        let _b = registry.open_camera(CameraId::new("cam0")).unwrap();
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn close_with_live_clients_is_rejected() {
        let registry = Registry::new(MuxConfig::default(), Box::new(MockFactory));
        let _vc = registry.open_camera(CameraId::new("cam0")).unwrap();
        assert!(registry.close_camera(&CameraId::new("cam0")).is_err());
    }

    #[test]
    fn close_after_last_client_disowned_succeeds() {
        let registry = Registry::new(MuxConfig::default(), Box::new(MockFactory));
        let vc = registry.open_camera(CameraId::new("cam0")).unwrap();
        let id = CameraId::new("cam0");
        let camera = registry.camera_for(&id).unwrap();
        camera.disown_virtual_camera(&vc);
        drop(vc);
        assert!(registry.close_camera(&id).is_ok());
        assert_eq!(registry.open_count(), 0);
    }
}
