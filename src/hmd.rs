// The streaming headset
//
// StreamingHmd is the context shared by the compositor and the
// streaming server. The server reports tracking, client reconfiguration
// and connection changes through StreamCallbacks on its own threads,
// while the compositor asks for poses and hands back finished frames
// through the squall::StreamSink implementation.
use squall::{vk, CreateInfo, Delivery, FoveationConfig, StreamSink};
use utils::log;
use utils::timing::NS_PER_SEC;
use utils::Context;

use crate::config::SessionConfig;
use crate::correlation::{match_frame, DeliveryDecision, DeliveryPolicy, FrameCorrelation, FrameIdQueue};
use crate::tracking::{
    normalize, Pose, PoseQueue, PoseSample, SpaceRelation, SpaceRelationFlags, TrackingState,
};
use crate::Result;

use cgmath::{Quaternion, Vector3};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// The headset refreshes at 90Hz
pub const NOMINAL_FRAME_INTERVAL_NS: u64 = NS_PER_SEC / 90;

/// Events the encoder can be synchronized on
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A frame was produced but not sent
    NewFrameReady,
    /// Wait for the encoder before sending a frame
    WaitEncoding,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Controller input from the client
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InputEvent {
    pub device_index: u32,
    pub buttons: u64,
    pub axes: [f32; 4],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextureFormat {
    R8G8B8A8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: u32,
    /// Let the encoder pick its own parameters
    pub auto: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceParams {
    pub ip_addr: String,
    pub port: u32,
    pub config_path: PathBuf,
    pub profile_config_path: PathBuf,
}

/// Everything the streaming server needs to start
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDesc {
    pub encode: EncodeParams,
    pub service: ServiceParams,
    pub enable_paas: bool,
    pub texture_format: TextureFormat,
    pub low_latency: bool,
}

impl ServerDesc {
    /// `config_path` is where the session was loaded from, if anywhere
    pub fn from_config(config: &SessionConfig, config_path: Option<&Path>) -> Self {
        let video = &config.video_params;
        let paas = &config.paas_service;
        let path = config_path.map(Path::to_path_buf).unwrap_or_default();

        Self {
            encode: EncodeParams {
                width: video.width,
                height: video.height,
                bitrate: video.bitrate,
                fps: video.fps,
                auto: false,
            },
            service: ServiceParams {
                ip_addr: paas.signaling_server_ipaddr.clone(),
                port: paas.signaling_server_port,
                config_path: path.clone(),
                profile_config_path: path,
            },
            enable_paas: paas.enable,
            texture_format: TextureFormat::R8G8B8A8,
            low_latency: true,
        }
    }
}

/// Notifications from the streaming server
///
/// These are called from the server's threads at any time after
/// `StreamServer::initialize`.
pub trait StreamCallbacks: Send + Sync {
    /// A new headset pose arrived
    fn on_tracking_state(&self, state: &TrackingState, hmd_time_offset: f64, ctrl_time_offset: f64);

    /// The client wants a different stream
    fn on_reconfig(&self, width: u32, height: u32, fps: u32, ffr_enable: bool);

    /// Per eye projection: left, right, up, down for each eye
    fn on_projection(&self, projection: &[f32; 8]);

    fn on_ipd(&self, ipd: f32);

    fn on_connection_state(&self, state: ConnectionState, msg: Option<&str>);

    fn on_log(&self, msg: Option<&str>);

    fn on_input(&self, event: &InputEvent);
}

/// The network transport and encoder
pub trait StreamServer: Send + Sync {
    /// Set up the server. `callbacks` stays registered until the server is dropped.
    fn initialize(&self, desc: &ServerDesc, callbacks: Arc<dyn StreamCallbacks>) -> Result<()>;

    fn connect(&self) -> Result<()>;

    /// Encode `image` and send it tagged with the tracking frame it was rendered from
    fn send_video_frame(&self, frame_id: u32, image: vk::Image);

    fn sync(&self, event: SyncEvent);

    fn update_resolution(&self, width: u32, height: u32);
}

/// Panel layout of the headset
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    pub nominal_frame_interval_ns: u64,
    pub screen_width: u32,
    pub screen_height: u32,
    /// One eye gets half of the screen
    pub panel_width: u32,
    pub panel_height: u32,
}

struct Settings {
    s_width: u32,
    s_height: u32,
    s_ffr_enable: bool,
    s_projection: [f32; 8],
    s_ipd: f32,
}

/// The part of the headset the server calls back into
struct SessionState {
    ss_settings: Mutex<Settings>,
    ss_ffr_supported: bool,
    ss_poses: PoseQueue,
    ss_frames: FrameIdQueue,
}

impl SessionState {
    fn settings(&self) -> MutexGuard<Settings> {
        self.ss_settings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StreamCallbacks for SessionState {
    fn on_tracking_state(&self, state: &TrackingState, _hmd_time_offset: f64, _ctrl_time_offset: f64) {
        let sample = PoseSample::from_tracking(state);
        if let Some(old) = self.ss_poses.push(sample) {
            log::profiling!("Pose queue full, dropped tracking frame {}", old.frame_id);
        }
    }

    fn on_reconfig(&self, width: u32, height: u32, fps: u32, ffr_enable: bool) {
        if width == 0 || height == 0 {
            log::error!(
                "Ignoring client reconfiguration to an empty {}x{} stream",
                width,
                height
            );
            return;
        }

        let mut settings = self.settings();
        settings.s_width = width;
        settings.s_height = height;
        settings.s_ffr_enable = self.ss_ffr_supported && ffr_enable;
        log::info!(
            "Client reconfigured the stream to {}x{}@{} (foveation {})",
            width,
            height,
            fps,
            settings.s_ffr_enable
        );
    }

    fn on_projection(&self, projection: &[f32; 8]) {
        let valid = projection[0] + projection[1] > 0.0
            && projection[2] + projection[3] > 0.0
            && projection[4] + projection[5] > 0.0;
        if !valid {
            log::debug!("Ignoring degenerate projection {:?}", projection);
            return;
        }

        self.settings().s_projection = *projection;
        log::info!(
            "Left eye projection l = {}, r = {}, t = {}, b = {}",
            projection[0],
            projection[1],
            projection[2],
            projection[3]
        );
        log::info!(
            "Right eye projection l = {}, r = {}, t = {}, b = {}",
            projection[4],
            projection[5],
            projection[6],
            projection[7]
        );
    }

    fn on_ipd(&self, ipd: f32) {
        log::info!("ipd = {}", ipd);
        self.settings().s_ipd = ipd;
    }

    fn on_connection_state(&self, state: ConnectionState, msg: Option<&str>) {
        match msg {
            Some(msg) => log::info!("Connection {:?}: {}", state, msg),
            None => log::info!("Connection {:?}", state),
        }
    }

    fn on_log(&self, msg: Option<&str>) {
        if let Some(msg) = msg {
            log::info!("{}", msg);
        }
    }

    fn on_input(&self, _event: &InputEvent) {}
}

/// A headset on the far side of a streaming server
pub struct StreamingHmd {
    sh_config: SessionConfig,
    /// Where the session was loaded from
    sh_config_path: Option<PathBuf>,
    sh_server: Arc<dyn StreamServer>,
    sh_state: Arc<SessionState>,
    sh_policy: DeliveryPolicy,
    /// Fixed offset of the tracking origin
    sh_center_pose: Pose,
    /// Reused when no new tracking data has arrived
    sh_last_pose: Mutex<Pose>,
}

impl StreamingHmd {
    pub fn new(config: SessionConfig, server: Arc<dyn StreamServer>) -> Result<Self> {
        config.validate()?;
        log::info!("Creating streaming HMD, session version {}", config.version);

        let settings = Settings {
            s_width: config.video_params.width,
            s_height: config.video_params.height,
            s_ffr_enable: config.foveation_enabled(),
            s_projection: [0.0; 8],
            s_ipd: 0.0,
        };
        let state = SessionState {
            ss_settings: Mutex::new(settings),
            ss_ffr_supported: config.fix_foveation_render.supported,
            ss_poses: PoseQueue::new(),
            ss_frames: FrameIdQueue::new(),
        };

        Ok(Self {
            sh_config: config,
            sh_config_path: None,
            sh_server: server,
            sh_state: Arc::new(state),
            sh_policy: DeliveryPolicy::default(),
            sh_center_pose: Pose::new(
                Quaternion::new(1.0, 0.0, 0.0, 0.0),
                Vector3::new(0.0, 1.6, 0.0),
            ),
            sh_last_pose: Mutex::new(Pose::identity()),
        })
    }

    /// Load the session document at `path` and create the headset from it
    pub fn from_config_file(path: &Path, server: Arc<dyn StreamServer>) -> utils::Result<Self> {
        let config = SessionConfig::load(path)
            .with_context(|| format!("Could not load session config {}", path.display()))?;
        let mut hmd = Self::new(config, server)?;
        hmd.sh_config_path = Some(path.to_path_buf());
        Ok(hmd)
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.sh_policy = policy;
        self
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.sh_policy
    }

    pub fn config(&self) -> &SessionConfig {
        &self.sh_config
    }

    /// The callback context registered with the server
    pub fn callbacks(&self) -> Arc<dyn StreamCallbacks> {
        self.sh_state.clone()
    }

    pub fn server_desc(&self) -> ServerDesc {
        ServerDesc::from_config(&self.sh_config, self.sh_config_path.as_deref())
    }

    /// Register with the streaming server and connect to the client
    pub fn streaming_initialize(&self) -> Result<()> {
        let desc = self.server_desc();
        log::info!(
            "Starting stream at {}x{}@{} to {}:{}",
            desc.encode.width,
            desc.encode.height,
            desc.encode.fps,
            desc.service.ip_addr,
            desc.service.port
        );

        self.sh_server.initialize(&desc, self.callbacks())?;
        self.sh_server.connect()
    }

    /// Get the head pose for the frame shown at `at_timestamp_ns`
    ///
    /// Consumes the oldest queued tracking sample and records which
    /// tracking frame the upcoming render uses.
    pub fn get_tracked_pose(&self, at_timestamp_ns: u64) -> SpaceRelation {
        let (pose, frame_id) = {
            let mut last = self.sh_last_pose.lock().unwrap_or_else(|e| e.into_inner());
            match self.sh_state.ss_poses.pop() {
                Some(sample) => {
                    *last = sample.pose;
                    (sample.pose, Some(sample.frame_id))
                }
                None => (*last, None),
            }
        };

        let local = Pose::new(normalize(pose.orientation), pose.position);
        let relation = SpaceRelation {
            pose: self.sh_center_pose.transform(&local),
            flags: SpaceRelationFlags::ORIENTATION_VALID
                | SpaceRelationFlags::POSITION_VALID
                | SpaceRelationFlags::ORIENTATION_TRACKED,
        };

        let correlation = FrameCorrelation {
            frame_id: frame_id,
            desired_timestamp_ns: at_timestamp_ns,
        };
        if let Some(old) = self.sh_state.ss_frames.push(correlation) {
            log::debug!("Frame id queue full, dropped {:?}", old);
        }

        relation
    }

    /// The stream resolution most recently negotiated with the client
    pub fn resolution(&self) -> (u32, u32) {
        let settings = self.sh_state.settings();
        (settings.s_width, settings.s_height)
    }

    pub fn ipd(&self) -> f32 {
        self.sh_state.settings().s_ipd
    }

    pub fn projection(&self) -> [f32; 8] {
        self.sh_state.settings().s_projection
    }

    /// Poses received and not yet consumed
    pub fn pending_poses(&self) -> usize {
        self.sh_state.ss_poses.len()
    }

    /// Renders not yet matched with a delivery
    pub fn pending_frames(&self) -> usize {
        self.sh_state.ss_frames.len()
    }

    pub fn display_info(&self) -> DisplayInfo {
        let video = &self.sh_config.video_params;
        DisplayInfo {
            nominal_frame_interval_ns: NOMINAL_FRAME_INTERVAL_NS,
            screen_width: video.width,
            screen_height: video.height,
            panel_width: video.width / 2,
            panel_height: video.height,
        }
    }

    /// Presentation target settings for this headset
    pub fn create_info(&self) -> CreateInfo {
        CreateInfo::builder()
            .nominal_frame_interval_ns(NOMINAL_FRAME_INTERVAL_NS)
            .build()
    }
}

impl StreamSink for StreamingHmd {
    fn send_frame(&self, image: vk::Image, desired_timestamp_ns: u64) -> Delivery {
        match match_frame(&self.sh_state.ss_frames, desired_timestamp_ns, &self.sh_policy) {
            DeliveryDecision::Deliver { frame_id } => {
                self.sh_server.sync(SyncEvent::WaitEncoding);
                self.sh_server.send_video_frame(frame_id, image);
                log::profiling!("Sent tracking frame {} for {}ns", frame_id, desired_timestamp_ns);
                Delivery::Sent
            }
            DeliveryDecision::Hold(reason) => {
                self.sh_server.sync(SyncEvent::NewFrameReady);
                log::profiling!("Held frame for {}ns: {:?}", desired_timestamp_ns, reason);
                Delivery::Deferred
            }
        }
    }

    fn check_resolution(&self, width: &mut u32, height: &mut u32) -> bool {
        let settings = self.sh_state.settings();
        if *width == settings.s_width && *height == settings.s_height {
            return false;
        }

        *width = settings.s_width;
        *height = settings.s_height;
        true
    }

    fn update_resolution(&self, width: u32, height: u32) {
        log::info!("Encoder resolution is now {}x{}", width, height);
        self.sh_server.update_resolution(width, height);
    }

    fn foveation(&self) -> Option<FoveationConfig> {
        self.sh_config.foveation()
    }

    fn foveation_enabled(&self) -> bool {
        self.sh_state.settings().s_ffr_enable
    }
}
