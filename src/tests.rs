// Stratus tests
//
// The streaming server is replaced by a recorder so the callbacks can
// be driven by hand and everything sent to the encoder inspected.
use crate::hmd::TextureFormat;
use crate::{
    ConnectionState, DeliveryPolicy, InputEvent, ServerDesc, SessionConfig, SpaceRelationFlags,
    StreamCallbacks, StreamServer, StreamingHmd, StratusError, SyncEvent, TrackingState,
};
use squall::{
    create_target, vk, Delivery, GpuDevice, HeadlessDevice, PresentOrchestrator, PresentOutcome,
    StreamSink,
};
use utils::timing::NS_PER_MS;

use cgmath::{InnerSpace, Vector3};
use std::sync::{Arc, Mutex};

const SAMPLE: &str = include_str!("../config/session.json");

/// Everything the headset asked the server to do
#[derive(Default)]
struct Recorded {
    r_desc: Option<ServerDesc>,
    r_callbacks: Option<Arc<dyn StreamCallbacks>>,
    r_connects: u32,
    r_syncs: Vec<SyncEvent>,
    r_frames: Vec<(u32, vk::Image)>,
    r_resolutions: Vec<(u32, u32)>,
}

#[derive(Default)]
struct RecordingServer {
    rs_rec: Mutex<Recorded>,
    /// Fail connect with this message
    rs_refuse: Option<String>,
}

impl RecordingServer {
    fn callbacks(&self) -> Arc<dyn StreamCallbacks> {
        self.rs_rec.lock().unwrap().r_callbacks.clone().unwrap()
    }

    fn syncs(&self) -> Vec<SyncEvent> {
        self.rs_rec.lock().unwrap().r_syncs.clone()
    }

    fn frames(&self) -> Vec<(u32, vk::Image)> {
        self.rs_rec.lock().unwrap().r_frames.clone()
    }

    fn resolutions(&self) -> Vec<(u32, u32)> {
        self.rs_rec.lock().unwrap().r_resolutions.clone()
    }
}

impl StreamServer for RecordingServer {
    fn initialize(&self, desc: &ServerDesc, callbacks: Arc<dyn StreamCallbacks>) -> crate::Result<()> {
        let mut rec = self.rs_rec.lock().unwrap();
        rec.r_desc = Some(desc.clone());
        rec.r_callbacks = Some(callbacks);
        Ok(())
    }

    fn connect(&self) -> crate::Result<()> {
        self.rs_rec.lock().unwrap().r_connects += 1;
        match self.rs_refuse.as_ref() {
            Some(msg) => Err(StratusError::SERVER(msg.clone())),
            None => Ok(()),
        }
    }

    fn send_video_frame(&self, frame_id: u32, image: vk::Image) {
        self.rs_rec.lock().unwrap().r_frames.push((frame_id, image));
    }

    fn sync(&self, event: SyncEvent) {
        self.rs_rec.lock().unwrap().r_syncs.push(event);
    }

    fn update_resolution(&self, width: u32, height: u32) {
        self.rs_rec
            .lock()
            .unwrap()
            .r_resolutions
            .push((width, height));
    }
}

fn config(foveation: bool) -> SessionConfig {
    let mut config = SessionConfig::from_json(SAMPLE).unwrap();
    config.fix_foveation_render.supported = foveation;
    config
}

fn connected(foveation: bool) -> (Arc<RecordingServer>, StreamingHmd) {
    let server = Arc::new(RecordingServer::default());
    let hmd = StreamingHmd::new(config(foveation), server.clone()).unwrap();
    hmd.streaming_initialize().unwrap();
    (server, hmd)
}

fn tracking(id: u32, x: f32, y: f32, z: f32) -> TrackingState {
    TrackingState {
        device_to_absolute_tracking: [
            [1.0, 0.0, 0.0, x],
            [0.0, 1.0, 0.0, y],
            [0.0, 0.0, 1.0, z],
        ],
        pose_id: id,
    }
}

#[test]
fn initialize_registers_with_the_server() {
    let (server, _hmd) = connected(true);
    let rec = server.rs_rec.lock().unwrap();

    let desc = rec.r_desc.as_ref().unwrap();
    assert_eq!(desc.encode.width, 3840);
    assert_eq!(desc.encode.height, 1920);
    assert_eq!(desc.encode.fps, 90);
    assert_eq!(desc.encode.bitrate, 50_000_000);
    assert!(!desc.encode.auto);
    assert_eq!(desc.service.ip_addr, "127.0.0.1");
    assert_eq!(desc.service.port, 8443);
    assert!(!desc.enable_paas);
    assert!(desc.low_latency);
    assert_eq!(desc.texture_format, TextureFormat::R8G8B8A8);

    assert!(rec.r_callbacks.is_some());
    assert_eq!(rec.r_connects, 1);
}

#[test]
fn connect_failure_is_reported() {
    let server = Arc::new(RecordingServer {
        rs_refuse: Some("no route".to_string()),
        ..Default::default()
    });
    let hmd = StreamingHmd::new(config(false), server.clone()).unwrap();

    match hmd.streaming_initialize() {
        Err(StratusError::SERVER(msg)) => assert_eq!(msg, "no route"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let mut bad = config(true);
    bad.fix_foveation_render.edge_ratio_x = 0.0;

    let server = Arc::new(RecordingServer::default());
    assert!(matches!(
        StreamingHmd::new(bad, server),
        Err(StratusError::CONFIG_INVALID(_))
    ));
}

#[test]
fn config_file_errors_carry_the_path() {
    let server = Arc::new(RecordingServer::default());
    let err = StreamingHmd::from_config_file(
        std::path::Path::new("/nonexistent/stratus/session.json"),
        server,
    )
    .err()
    .unwrap();
    assert!(format!("{:#}", err).contains("/nonexistent/stratus/session.json"));
}

#[test]
fn tracked_pose_is_offset_and_correlated() {
    let (server, hmd) = connected(false);
    let callbacks = server.callbacks();
    callbacks.on_tracking_state(&tracking(42, 1.0, 2.0, 3.0), 0.0, 0.0);
    assert_eq!(hmd.pending_poses(), 1);

    let relation = hmd.get_tracked_pose(1_000);
    assert!((relation.pose.position - Vector3::new(1.0, 3.6, 3.0)).magnitude() < 1e-5);
    assert_eq!(
        relation.flags,
        SpaceRelationFlags::ORIENTATION_VALID
            | SpaceRelationFlags::POSITION_VALID
            | SpaceRelationFlags::ORIENTATION_TRACKED
    );
    assert_eq!(hmd.pending_poses(), 0);
    assert_eq!(hmd.pending_frames(), 1);

    // nothing new arrived, the last pose is reused untagged
    let again = hmd.get_tracked_pose(2_000);
    assert_eq!(again.pose, relation.pose);
    assert_eq!(hmd.pending_frames(), 2);

    let policy = DeliveryPolicy {
        latency_compensation_ns: 0,
        ..Default::default()
    };
    let hmd = hmd.with_policy(policy);
    let image = vk::Image::null();
    assert_eq!(hmd.send_frame(image, 1_000), Delivery::Sent);
    assert_eq!(hmd.send_frame(image, 2_000), Delivery::Deferred);
    assert_eq!(server.frames(), vec![(42, image)]);
}

#[test]
fn matched_frames_are_sent_after_encoding() {
    let (server, hmd) = connected(false);
    server
        .callbacks()
        .on_tracking_state(&tracking(5, 0.0, 0.0, 0.0), 0.0, 0.0);

    let display = 100 * NS_PER_MS;
    hmd.get_tracked_pose(display);

    let image = vk::Image::null();
    assert_eq!(hmd.send_frame(image, display - 4 * NS_PER_MS), Delivery::Sent);
    assert_eq!(server.syncs(), vec![SyncEvent::WaitEncoding]);
    assert_eq!(server.frames(), vec![(5, image)]);

    // nothing left to match
    assert_eq!(hmd.send_frame(image, display), Delivery::Deferred);
    assert_eq!(
        server.syncs(),
        vec![SyncEvent::WaitEncoding, SyncEvent::NewFrameReady]
    );
    assert_eq!(server.frames().len(), 1);
}

#[test]
fn reconfig_changes_resolution_and_foveation() {
    let (server, hmd) = connected(true);
    let callbacks = server.callbacks();
    assert!(hmd.foveation_enabled());

    let (mut w, mut h) = hmd.resolution();
    assert!(!hmd.check_resolution(&mut w, &mut h));

    callbacks.on_reconfig(2880, 1600, 72, false);
    assert!(hmd.check_resolution(&mut w, &mut h));
    assert_eq!((w, h), (2880, 1600));
    assert!(!hmd.check_resolution(&mut w, &mut h));
    assert!(!hmd.foveation_enabled());

    callbacks.on_reconfig(2880, 1600, 72, true);
    assert!(hmd.foveation_enabled());
}

#[test]
fn empty_reconfig_is_ignored() {
    let (server, hmd) = connected(true);
    let callbacks = server.callbacks();
    let (mut w, mut h) = hmd.resolution();

    callbacks.on_reconfig(0, 0, 90, false);
    callbacks.on_reconfig(1920, 0, 90, false);
    assert!(!hmd.check_resolution(&mut w, &mut h));
    assert_ne!(hmd.resolution(), (0, 0));
    assert!(hmd.foveation_enabled());
}

#[test]
fn unsupported_foveation_stays_off() {
    let (server, hmd) = connected(false);
    server.callbacks().on_reconfig(1920, 1080, 90, true);
    assert!(!hmd.foveation_enabled());
    assert!(hmd.foveation().is_none());
}

#[test]
fn projection_and_ipd_are_stored() {
    let (server, hmd) = connected(false);
    let callbacks = server.callbacks();

    let good = [45.0, 45.0, 50.0, 50.0, 45.0, 45.0, 50.0, 50.0];
    callbacks.on_projection(&good);
    assert_eq!(hmd.projection(), good);

    // the right eye is degenerate
    let bad = [45.0, 45.0, 50.0, 50.0, 0.0, 0.0, 50.0, 50.0];
    callbacks.on_projection(&bad);
    assert_eq!(hmd.projection(), good);

    callbacks.on_ipd(0.064);
    assert_eq!(hmd.ipd(), 0.064);

    // only logged
    callbacks.on_connection_state(ConnectionState::Connected, Some("client up"));
    callbacks.on_log(None);
    callbacks.on_input(&InputEvent {
        device_index: 1,
        buttons: 0x3,
        axes: [0.0; 4],
    });
}

#[test]
fn resolution_updates_reach_the_encoder() {
    let (server, hmd) = connected(false);
    hmd.update_resolution(1536, 864);
    assert_eq!(server.resolutions(), vec![(1536, 864)]);
}

#[test]
fn display_is_split_between_eyes() {
    let (_server, hmd) = connected(false);
    let info = hmd.display_info();
    assert_eq!(info.panel_width, 1920);
    assert_eq!(info.panel_height, 1920);
    assert_eq!(info.nominal_frame_interval_ns, 1_000_000_000 / 90);
    assert_eq!(
        hmd.create_info().nominal_frame_interval_ns,
        info.nominal_frame_interval_ns
    );
}

#[test]
fn compositor_frames_reach_the_client() {
    let (server, hmd) = connected(false);
    let hmd = Arc::new(hmd);
    let dev = Arc::new(HeadlessDevice::new());

    let (width, height) = hmd.resolution();
    let sink: Arc<dyn StreamSink> = hmd.clone();
    let target = create_target(&hmd.create_info(), dev.clone(), Some(sink)).unwrap();
    let mut orch = PresentOrchestrator::new(target, width, height).unwrap();
    assert_eq!(server.resolutions(), vec![(width, height)]);

    let callbacks = server.callbacks();
    for id in 1..=3 {
        callbacks.on_tracking_state(&tracking(id, 0.0, 0.0, 0.0), 0.0, 0.0);

        let frame = orch.begin_frame().unwrap();
        hmd.get_tracked_pose(frame.predicted_display_time_ns);
        let index = orch.acquire().unwrap();
        assert_eq!(
            orch.present(dev.graphics_queue(), index),
            Ok(PresentOutcome::Presented)
        );
    }

    let sent: Vec<u32> = server.frames().iter().map(|f| f.0).collect();
    assert_eq!(sent, vec![1, 2, 3]);
    assert_eq!(hmd.pending_frames(), 0);

    // the client asks for a smaller stream
    callbacks.on_reconfig(1920, 1080, 90, false);
    orch.begin_frame().unwrap();
    let index = orch.acquire().unwrap();
    assert_eq!(
        orch.present(dev.graphics_queue(), index),
        Ok(PresentOutcome::Recreated {
            width: 1920,
            height: 1080
        })
    );
    assert_eq!(server.resolutions().last(), Some(&(1920, 1080)));

    orch.destroy();
    assert_eq!(dev.live_handle_count(), 0);
}
