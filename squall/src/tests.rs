// Squall tests
//
// These drive whole targets through the orchestrator on top of the
// recording HeadlessDevice, with a fake stream sink standing in for
// the encoder.
use crate as sq;
use sq::vk;
use sq::{
    create_target, CreateInfo, Delivery, FoveationConfig, FoveationParams, GpuDevice,
    HeadlessDevice, PresentOrchestrator, PresentOutcome, SquallError, StreamSink, Target,
    TargetKind, TargetState, TimingPoint,
};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const FAKE_SPV: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

/// Write a shader file the resample pass can load
///
/// The headless device never looks at the code, it only has to be
/// valid enough for `read_spv`.
fn fake_shader(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("squall-{}-{}", test, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ffr.spv");
    let bytes: Vec<u8> = FAKE_SPV
        .iter()
        .flat_map(|w| w.to_le_bytes().to_vec())
        .collect();
    std::fs::write(&path, &bytes).unwrap();
    path
}

fn ffr_params() -> FoveationParams {
    FoveationParams {
        center_size_x: 0.6,
        center_size_y: 0.6,
        center_shift_x: 0.0,
        center_shift_y: 0.0,
        edge_ratio_x: 2.0,
        edge_ratio_y: 2.0,
    }
}

/// Records everything the target hands to the encoder
struct FakeSink {
    fs_foveation: Option<FoveationConfig>,
    /// Resolution the client wants, None means whatever we have
    fs_requested: Mutex<Option<(u32, u32)>>,
    fs_updates: Mutex<Vec<(u32, u32)>>,
    fs_frames: Mutex<Vec<(vk::Image, u64)>>,
}

impl FakeSink {
    fn new(foveation: Option<FoveationConfig>) -> Self {
        Self {
            fs_foveation: foveation,
            fs_requested: Mutex::new(None),
            fs_updates: Mutex::new(Vec::new()),
            fs_frames: Mutex::new(Vec::new()),
        }
    }

    fn with_foveation(test: &str) -> Self {
        let shader = fake_shader(test);
        Self::new(Some(FoveationConfig {
            params: ffr_params(),
            vert_shader_path: shader.clone(),
            frag_shader_path: shader,
        }))
    }

    fn request(&self, width: u32, height: u32) {
        *self.fs_requested.lock().unwrap() = Some((width, height));
    }

    fn updates(&self) -> Vec<(u32, u32)> {
        self.fs_updates.lock().unwrap().clone()
    }

    fn frames(&self) -> Vec<(vk::Image, u64)> {
        self.fs_frames.lock().unwrap().clone()
    }
}

impl StreamSink for FakeSink {
    fn send_frame(&self, image: vk::Image, desired_timestamp_ns: u64) -> Delivery {
        self.fs_frames
            .lock()
            .unwrap()
            .push((image, desired_timestamp_ns));
        Delivery::Sent
    }

    fn check_resolution(&self, width: &mut u32, height: &mut u32) -> bool {
        match *self.fs_requested.lock().unwrap() {
            Some((w, h)) if (w, h) != (*width, *height) => {
                *width = w;
                *height = h;
                true
            }
            _ => false,
        }
    }

    fn update_resolution(&self, width: u32, height: u32) {
        self.fs_updates.lock().unwrap().push((width, height));
    }

    fn foveation(&self) -> Option<FoveationConfig> {
        self.fs_foveation.clone()
    }

    fn foveation_enabled(&self) -> bool {
        self.fs_foveation.is_some()
    }
}

fn offscreen(
    dev: &Arc<HeadlessDevice>,
    sink: &Arc<FakeSink>,
    width: u32,
    height: u32,
) -> PresentOrchestrator {
    let info = CreateInfo::builder().build();
    let target = create_target(&info, dev.clone(), Some(sink.clone() as Arc<dyn StreamSink>))
        .unwrap();
    PresentOrchestrator::new(target, width, height).unwrap()
}

fn headless(dev: &Arc<HeadlessDevice>) -> Box<dyn Target> {
    let info = CreateInfo::builder()
        .target_kind(TargetKind::Headless)
        .image_count(3)
        .build();
    create_target(&info, dev.clone(), None).unwrap()
}

#[test]
fn lifecycle_reports_images() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut target = headless(&dev);
    assert_eq!(target.state(), TargetState::Uninitialized);
    assert!(!target.has_images());

    target.init_pre_vulkan().unwrap();
    assert_eq!(target.state(), TargetState::PreVulkanInit);
    target.init_post_vulkan(640, 480).unwrap();
    assert_eq!(target.state(), TargetState::PostVulkanInit);
    assert!(!target.check_ready());

    target
        .create_images(640, 480, vk::Format::R8G8B8A8_SRGB)
        .unwrap();
    assert_eq!(target.state(), TargetState::Ready);
    assert!(target.has_images());
    assert!(target.check_ready());
    assert_eq!(target.images().len(), 3);
    assert_eq!(target.extent().width, 640);
    assert!(target.semaphores().is_some());

    target.destroy();
    assert_eq!(target.state(), TargetState::Destroyed);
    assert!(!target.has_images());
    assert!(!target.check_ready());
    assert!(target.semaphores().is_none());
}

#[test]
fn operations_out_of_order_are_rejected() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut target = headless(&dev);

    assert_eq!(
        target.create_images(640, 480, vk::Format::R8G8B8A8_SRGB),
        Err(SquallError::INVALID_STATE {
            op: "create_images",
            state: TargetState::Uninitialized,
        })
    );
    assert_eq!(
        target.init_post_vulkan(640, 480),
        Err(SquallError::INVALID_STATE {
            op: "init_post_vulkan",
            state: TargetState::Uninitialized,
        })
    );

    target.init_pre_vulkan().unwrap();
    assert!(target.init_pre_vulkan().is_err());
    target.init_post_vulkan(640, 480).unwrap();

    // no images yet
    assert_eq!(target.acquire(), Err(SquallError::NOT_INITIALIZED));
    assert_eq!(dev.live_handle_count(), 0);
}

#[test]
fn empty_extent_is_rejected() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut target = headless(&dev);
    target.init_pre_vulkan().unwrap();
    target.init_post_vulkan(640, 480).unwrap();

    match target.create_images(0, 480, vk::Format::R8G8B8A8_SRGB) {
        Err(SquallError::INVALID_STATE { .. }) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert!(!target.has_images());
    assert_eq!(dev.live_handle_count(), 0);
}

#[test]
fn acquire_is_stable_until_present() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut orch = PresentOrchestrator::new(headless(&dev), 640, 480).unwrap();
    let queue = dev.graphics_queue();

    let mut seen = Vec::new();
    for _ in 0..4 {
        orch.begin_frame().unwrap();
        let index = orch.acquire().unwrap();
        assert_eq!(orch.acquire().unwrap(), index);
        seen.push(index);
        assert_eq!(orch.present(queue, index), Ok(PresentOutcome::Presented));
    }
    assert_eq!(seen, vec![0, 1, 2, 0]);
    assert_eq!(orch.frames_presented(), 4);
}

#[test]
fn resize_round_trip_does_not_leak() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut target = headless(&dev);
    target.init_pre_vulkan().unwrap();
    target.init_post_vulkan(640, 480).unwrap();

    target
        .create_images(640, 480, vk::Format::R8G8B8A8_SRGB)
        .unwrap();
    let first = target.images().to_vec();
    let live = dev.live_handle_count();

    target
        .create_images(1280, 720, vk::Format::R8G8B8A8_SRGB)
        .unwrap();
    target
        .create_images(640, 480, vk::Format::R8G8B8A8_SRGB)
        .unwrap();
    assert_eq!(dev.live_handle_count(), live);
    assert!(first.iter().all(|i| !dev.is_live(i.image)));
    // the old images were still live, so the GPU was waited on
    assert_eq!(dev.wait_idle_count(), 2);

    target.destroy();
    target.destroy();
    assert_eq!(dev.live_handle_count(), 0);
    assert_eq!(dev.double_destroy_count(), 0);
}

#[test]
fn failed_allocation_leaves_no_images() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut target = headless(&dev);
    target.init_pre_vulkan().unwrap();
    target.init_post_vulkan(640, 480).unwrap();

    dev.set_alloc_failure(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    assert_eq!(
        target.create_images(640, 480, vk::Format::R8G8B8A8_SRGB),
        Err(SquallError::OUT_OF_MEMORY)
    );
    assert!(!target.has_images());
    assert_eq!(dev.live_handle_count(), 0);

    dev.set_alloc_failure(None);
    target
        .create_images(640, 480, vk::Format::R8G8B8A8_SRGB)
        .unwrap();
    assert!(target.check_ready());
}

#[test]
fn timing_points_must_match_the_current_frame() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut orch = PresentOrchestrator::new(headless(&dev), 640, 480).unwrap();

    assert_eq!(
        orch.target_mut()
            .mark_timing_point(TimingPoint::Begin, 0, 1),
        Err(SquallError::FRAME_ID_MISMATCH {
            expected: -1,
            got: 0
        })
    );

    let frame = orch.begin_frame().unwrap();
    assert_eq!(
        orch.target_mut()
            .mark_timing_point(TimingPoint::Submit, frame.frame_id + 1, 1),
        Err(SquallError::FRAME_ID_MISMATCH {
            expected: frame.frame_id,
            got: frame.frame_id + 1,
        })
    );

    let next = orch.begin_frame().unwrap();
    assert_eq!(next.frame_id, frame.frame_id + 1);
    assert!(next.desired_present_time_ns > frame.desired_present_time_ns);
}

#[test]
fn present_needs_a_paced_frame() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut orch = PresentOrchestrator::new(headless(&dev), 640, 480).unwrap();

    assert_eq!(
        orch.present(dev.graphics_queue(), 0),
        Err(SquallError::INVALID_STATE {
            op: "present before begin_frame",
            state: TargetState::Ready,
        })
    );
}

#[test]
fn run_frame_hands_out_the_acquired_image() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut orch = PresentOrchestrator::new(headless(&dev), 640, 480).unwrap();
    let images = orch.target().images().to_vec();

    let mut rendered = Vec::new();
    for _ in 0..2 {
        let outcome = orch
            .run_frame(dev.graphics_queue(), |image, index| {
                rendered.push((*image, index));
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, PresentOutcome::Presented);
    }
    assert_eq!(rendered, vec![(images[0], 0), (images[1], 1)]);

    // a failed render skips the present
    let err = orch.run_frame(dev.graphics_queue(), |_, _| Err(SquallError::DEVICE_LOST));
    assert_eq!(err, Err(SquallError::DEVICE_LOST));
    assert_eq!(orch.frames_presented(), 2);
}

#[test]
fn offscreen_without_sink_is_headless() {
    let dev = Arc::new(HeadlessDevice::new());
    let info = CreateInfo::builder().build();
    let target = create_target(&info, dev.clone(), None).unwrap();
    let mut orch = PresentOrchestrator::new(target, 640, 480).unwrap();

    let outcome = orch.run_frame(dev.graphics_queue(), |_, _| Ok(())).unwrap();
    assert_eq!(outcome, PresentOutcome::Presented);
    assert_eq!(dev.submit_count(), 0);
}

#[test]
fn plain_offscreen_sends_rendered_images() {
    let dev = Arc::new(HeadlessDevice::new());
    let sink = Arc::new(FakeSink::new(None));
    let mut orch = offscreen(&dev, &sink, 1280, 720);
    assert_eq!(sink.updates(), vec![(1280, 720)]);

    let images = orch.target().images().to_vec();
    let frame = orch.begin_frame().unwrap();
    let index = orch.acquire().unwrap();
    orch.present(dev.graphics_queue(), index).unwrap();

    assert_eq!(
        sink.frames(),
        vec![(images[index as usize].image, frame.desired_present_time_ns)]
    );
    // nothing to resample
    assert_eq!(dev.submit_count(), 0);
}

#[test]
fn foveated_present_resamples_the_acquired_image() {
    let dev = Arc::new(HeadlessDevice::new());
    let sink = Arc::new(FakeSink::with_foveation("fov-present"));
    let mut orch = offscreen(&dev, &sink, 1920, 1080);

    // the encoder is told about the packed size, not the render size
    assert_eq!(sink.updates(), vec![(1536, 864)]);
    assert_eq!(orch.target().extent().width, 1920);

    let images = orch.target().images().to_vec();
    let semas = orch.target().semaphores().unwrap();

    orch.begin_frame().unwrap();
    let index = orch.acquire().unwrap();
    assert_eq!(
        orch.present(dev.graphics_queue(), index),
        Ok(PresentOutcome::Presented)
    );

    assert_eq!(dev.sampled_view(), images[index as usize].view);
    assert_eq!(dev.last_submit_waits(), vec![semas.render_complete]);
    assert_eq!(dev.submit_count(), 1);
    assert_eq!(dev.fence_wait_count(), 1);

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    // the foveated output went out, not the render target
    assert!(images.iter().all(|i| i.image != frames[0].0));
    assert!(dev.is_live(frames[0].0));
}

#[test]
fn client_resolution_change_recreates_images() {
    let dev = Arc::new(HeadlessDevice::new());
    let sink = Arc::new(FakeSink::with_foveation("fov-resize"));
    let mut orch = offscreen(&dev, &sink, 1920, 1080);
    let queue = dev.graphics_queue();

    orch.run_frame(queue, |_, _| Ok(())).unwrap();
    let live = dev.live_handle_count();

    sink.request(2880, 1600);
    let outcome = orch.run_frame(queue, |_, _| Ok(())).unwrap();
    assert_eq!(
        outcome,
        PresentOutcome::Recreated {
            width: 2880,
            height: 1600
        }
    );
    assert_eq!(orch.recreations(), 1);
    assert_eq!(orch.target().state(), TargetState::Ready);
    assert_eq!(orch.target().extent().width, 2880);
    assert_eq!(orch.target().extent().height, 1600);

    let updates = sink.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0], (1536, 864));
    assert!(updates[1].0 > updates[0].0);
    // the dropped frame never reached the encoder
    assert_eq!(sink.frames().len(), 1);

    // the new size sticks
    assert_eq!(
        orch.run_frame(queue, |_, _| Ok(())).unwrap(),
        PresentOutcome::Presented
    );
    assert_eq!(sink.frames().len(), 2);
    assert_eq!(dev.live_handle_count(), live);

    orch.destroy();
    assert_eq!(dev.live_handle_count(), 0);
    assert_eq!(dev.double_destroy_count(), 0);
}

#[test]
fn gpu_timeout_recreates_before_the_next_submit() {
    let dev = Arc::new(HeadlessDevice::new());
    let sink = Arc::new(FakeSink::with_foveation("fov-timeout"));
    let mut orch = offscreen(&dev, &sink, 1920, 1080);
    let queue = dev.graphics_queue();
    let old_images = orch.target().images().to_vec();

    dev.set_fence_failure(Some(vk::Result::TIMEOUT));
    assert_eq!(
        orch.run_frame(queue, |_, _| Ok(())),
        Err(SquallError::TIMEOUT)
    );
    // the configured bound reached the device
    let configured = CreateInfo::builder().build().fence_timeout_ns;
    assert_eq!(dev.last_fence_timeout(), Some(configured));

    // the device was drained and the images replaced before anything
    // touched the timed out command buffer again
    assert!(dev.wait_idle_count() >= 1);
    assert_eq!(dev.pending_submission_count(), 0);
    assert_eq!(orch.recreations(), 1);
    assert_eq!(orch.target().state(), TargetState::Ready);
    assert!(old_images.iter().all(|i| !dev.is_live(i.image)));
    assert!(!orch.device_lost());

    dev.set_fence_failure(None);
    assert_eq!(
        orch.run_frame(queue, |_, _| Ok(())),
        Ok(PresentOutcome::Presented)
    );
    assert_eq!(dev.submit_count(), 2);
    assert_eq!(dev.pending_reuse_count(), 0);
    assert_eq!(sink.frames().len(), 1);

    orch.destroy();
    assert_eq!(dev.live_handle_count(), 0);
}

#[test]
fn lost_device_stops_the_orchestrator() {
    let dev = Arc::new(HeadlessDevice::new());
    let sink = Arc::new(FakeSink::with_foveation("fov-lost"));
    let mut orch = offscreen(&dev, &sink, 1920, 1080);
    let queue = dev.graphics_queue();

    dev.set_fence_failure(Some(vk::Result::ERROR_DEVICE_LOST));
    assert_eq!(
        orch.run_frame(queue, |_, _| Ok(())),
        Err(SquallError::DEVICE_LOST)
    );
    assert!(orch.device_lost());
    assert_eq!(orch.recreations(), 0);

    // nothing is submitted again even once the fence would signal
    dev.set_fence_failure(None);
    assert_eq!(orch.begin_frame(), Err(SquallError::DEVICE_LOST));
    assert_eq!(orch.acquire(), Err(SquallError::DEVICE_LOST));
    assert_eq!(
        orch.run_frame(queue, |_, _| Ok(())),
        Err(SquallError::DEVICE_LOST)
    );
    assert_eq!(dev.submit_count(), 1);
    assert!(sink.frames().is_empty());
    assert_eq!(orch.frames_presented(), 0);

    // teardown still releases everything
    orch.destroy();
    assert_eq!(dev.live_handle_count(), 0);
    assert_eq!(dev.double_destroy_count(), 0);
}

#[test]
fn lost_device_from_the_renderer_is_remembered() {
    let dev = Arc::new(HeadlessDevice::new());
    let mut orch = PresentOrchestrator::new(headless(&dev), 640, 480).unwrap();
    let queue = dev.graphics_queue();

    assert_eq!(
        orch.run_frame(queue, |_, _| Err(SquallError::DEVICE_LOST)),
        Err(SquallError::DEVICE_LOST)
    );
    assert!(orch.device_lost());
    assert_eq!(
        orch.run_frame(queue, |_, _| Ok(())),
        Err(SquallError::DEVICE_LOST)
    );
}

#[test]
fn dropping_the_orchestrator_releases_the_target() {
    let dev = Arc::new(HeadlessDevice::new());
    let sink = Arc::new(FakeSink::with_foveation("fov-drop"));
    {
        let mut orch = offscreen(&dev, &sink, 1920, 1080);
        orch.run_frame(dev.graphics_queue(), |_, _| Ok(()))
            .unwrap();
        assert!(dev.live_count_of("pipeline") > 0);
    }
    assert_eq!(dev.live_handle_count(), 0);
    assert_eq!(dev.double_destroy_count(), 0);
}
