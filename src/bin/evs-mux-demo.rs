//! Standalone diagnostics demo: wires a mock hardware camera to a couple
//! of virtual cameras and prints the broker's `dump()` report.

use std::sync::Arc;

use clap::Parser;
use evs_camera_mux::hal::HwBuffer;
use evs_camera_mux::registry::{HardwareFactory, Registry};
use evs_camera_mux::testing::MockHardwareCamera;
use evs_camera_mux::{CameraId, EvsResult, HardwareCamera, MuxConfig, StreamFormat};

#[derive(Parser, Debug)]
struct Args {
    /// Camera id to open.
    #[arg(long, default_value = "cam0")]
    camera: String,

    /// Number of virtual-camera clients to register.
    #[arg(long, default_value_t = 2)]
    clients: u32,
}

struct MockFactory;

impl HardwareFactory for MockFactory {
    fn open(&self, _id: &CameraId) -> EvsResult<(Box<dyn HardwareCamera>, StreamFormat)> {
        Ok((
            Box::new(MockHardwareCamera::new()),
            StreamFormat {
                width: 1920,
                height: 1080,
                format: "NV12".into(),
                usage: 0,
                rotation: 0,
            },
        ))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let registry = Registry::new(MuxConfig::default(), Box::new(MockFactory));
    let id = CameraId::new(args.camera.clone());

    let mut clients = Vec::new();
    for _ in 0..args.clients {
        let vc = registry.open_camera(id.clone())?;
        vc.start_stream()?;
        clients.push(vc);
    }
    let camera = registry.camera_for(&id).expect("just opened");

    if let Some(first) = clients.first() {
        first.set_master()?;
    }

    let buffer = HwBuffer {
        id: 1,
        timestamp_ms: 0,
        data: Arc::new(bytes::Bytes::from_static(b"demo-frame")),
    };
    // Drive a frame through the hardware-facing sink directly, as the real
    // driver would via `StreamSink::deliver_frame_1_1`.
    use evs_camera_mux::StreamSink;
    camera.deliver_frame_1_1(vec![buffer]);

    let mut report = String::new();
    camera.dump(&mut report);
    print!("{report}");

    for vc in &clients {
        vc.stop_stream();
    }
    Ok(())
}
