//! Presentation targets
//!
//! A target is whatever the compositor presents to. Physical displays are
//! not supported here, instead there are two variants chosen when the
//! target is created:
//!
//! * `OffscreenSwapchain` - a pool of offscreen images standing in for a
//!   swapchain. Presented images are optionally resampled into the
//!   foveated layout and handed to a `StreamSink`.
//! * `HeadlessTarget` - the same image pool with nothing behind it.
//!
//! Both share the lifecycle in `TargetCore`:
//! `Uninitialized -> PreVulkanInit -> PostVulkanInit -> Ready`, with
//! `Ready -> Resizing -> Ready` every time the images are recreated and
//! `Destroyed` at the end.
use ash::vk;

use crate::device::GpuDevice;
use crate::foveation::FoveationConfig;
use crate::pacing::{FakePacer, FramePacer, FramePrediction, TimingPoint};
use crate::{CreateInfo, Result, SquallError, TargetKind};
use utils::log;
use utils::timing::get_monotonic_ns;

use std::sync::Arc;

pub mod headless;
pub mod offscreen;

pub use headless::HeadlessTarget;
pub use offscreen::OffscreenSwapchain;

/// Lifecycle of a target
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetState {
    Uninitialized,
    PreVulkanInit,
    PostVulkanInit,
    Ready,
    Resizing,
    Destroyed,
}

/// One render target image and the resources backing it
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TargetImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
}

impl TargetImage {
    pub fn null() -> Self {
        Self {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            memory: vk::DeviceMemory::null(),
        }
    }

    /// True if both the image and its view exist
    pub fn is_complete(&self) -> bool {
        self.image != vk::Image::null() && self.view != vk::ImageView::null()
    }

    pub(crate) fn destroy(&mut self, dev: &dyn GpuDevice) {
        dev.destroy_image_view(self.view);
        dev.destroy_image(self.image);
        dev.free_memory(self.memory);
        *self = Self::null();
    }
}

/// Semaphores handed to the renderer along with the target's images
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TargetSemaphores {
    pub present_complete: vk::Semaphore,
    /// Signaled by the renderer, waited on before the image is resampled
    pub render_complete: vk::Semaphore,
}

impl TargetSemaphores {
    fn create(dev: &dyn GpuDevice) -> Result<Self> {
        let present_complete = dev.create_semaphore()?;
        let render_complete = match dev.create_semaphore() {
            Ok(sema) => sema,
            Err(e) => {
                dev.destroy_semaphore(present_complete);
                return Err(e);
            }
        };

        Ok(Self {
            present_complete: present_complete,
            render_complete: render_complete,
        })
    }

    fn destroy(&self, dev: &dyn GpuDevice) {
        dev.destroy_semaphore(self.present_complete);
        dev.destroy_semaphore(self.render_complete);
    }
}

/// What the sink did with a frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was handed to the encoder
    Sent,
    /// The frame did not match what the client expects and was held back
    Deferred,
}

/// Where presented frames go
///
/// This is the transmission side of a streaming headset. It is called
/// from the render thread, but its resolution may be changed at any time
/// by the remote client.
pub trait StreamSink: Send + Sync {
    /// Hand off a finished frame that should be shown at `desired_timestamp_ns`
    fn send_frame(&self, image: vk::Image, desired_timestamp_ns: u64) -> Delivery;

    /// Check if the client wants a different resolution
    ///
    /// Returns false if `width` and `height` already match. Otherwise
    /// they are overwritten with the requested resolution and this
    /// returns true.
    fn check_resolution(&self, width: &mut u32, height: &mut u32) -> bool;

    /// Tell the encoder what size the frames it receives will be
    fn update_resolution(&self, width: u32, height: u32);

    /// Foveation settings, if this device supports foveation at all
    fn foveation(&self) -> Option<FoveationConfig>;

    /// If foveation should currently be applied
    fn foveation_enabled(&self) -> bool;
}

/// The operations every target variant provides
pub trait Target: Send {
    /// First stage of initialization, before any GPU resources exist
    fn init_pre_vulkan(&mut self) -> Result<()>;

    /// Second stage of initialization once the device is available
    ///
    /// The preferred extent is what `create_images` should be called
    /// with first.
    fn init_post_vulkan(&mut self, preferred_width: u32, preferred_height: u32) -> Result<()>;

    /// (Re)create the image pool
    ///
    /// All existing images are destroyed before any new ones are
    /// created. The target is Ready once this returns Ok.
    fn create_images(&mut self, width: u32, height: u32, format: vk::Format) -> Result<()>;

    /// True iff every image and view in the pool exists
    fn has_images(&self) -> bool;

    /// Same as `has_images`, used as a gate before acquiring
    fn check_ready(&self) -> bool {
        self.has_images()
    }

    /// Get the index of the next image to render into
    ///
    /// This does not wait on the GPU and calling it twice without a
    /// present in between returns the same index.
    fn acquire(&mut self) -> Result<u32>;

    /// Present the image at `index`
    ///
    /// Returns OUT_OF_DATE if the images must be recreated at
    /// `preferred_extent` before presenting again.
    fn present(
        &mut self,
        queue: vk::Queue,
        index: u32,
        desired_present_time_ns: u64,
        present_slop_ns: u64,
    ) -> Result<()>;

    /// Predict the next frame and make it the current frame
    fn calc_frame_pacing(&mut self) -> Result<FramePrediction>;

    /// Report a timing point for the current frame
    ///
    /// Reporting for any frame other than the current one is a
    /// FRAME_ID_MISMATCH.
    fn mark_timing_point(&mut self, point: TimingPoint, frame_id: i64, when_ns: u64)
        -> Result<()>;

    /// Pull in display timing information. Targets without a display have none.
    fn update_timings(&mut self) -> Result<()> {
        Ok(())
    }

    fn info_gpu(
        &mut self,
        frame_id: i64,
        gpu_start_ns: u64,
        gpu_end_ns: u64,
        when_ns: u64,
    ) -> Result<()>;

    fn flush(&mut self) {}

    fn set_title(&mut self, _title: &str) {}

    fn state(&self) -> TargetState;

    fn images(&self) -> &[TargetImage];

    /// Size of the current images
    fn extent(&self) -> vk::Extent2D;

    /// The size the images should be recreated at
    fn preferred_extent(&self) -> vk::Extent2D;

    fn format(&self) -> vk::Format;

    /// None until images have been created
    fn semaphores(&self) -> Option<TargetSemaphores>;

    /// Destroy all GPU resources. Safe to call more than once.
    fn destroy(&mut self);
}

/// Create the target described by `info`
///
/// An offscreen target without a sink has nowhere to send frames, so
/// it becomes a headless target instead.
pub fn create_target(
    info: &CreateInfo,
    dev: Arc<dyn GpuDevice>,
    sink: Option<Arc<dyn StreamSink>>,
) -> Result<Box<dyn Target>> {
    match (info.target_kind, sink) {
        (TargetKind::Offscreen, Some(sink)) => {
            log::info!("Creating offscreen streaming target");
            Ok(Box::new(OffscreenSwapchain::new(info, dev, sink)))
        }
        (TargetKind::Offscreen, None) => {
            log::info!("No stream sink available, creating a headless target");
            Ok(Box::new(HeadlessTarget::new(info, dev)))
        }
        (TargetKind::Headless, _) => {
            log::info!("Creating headless target");
            Ok(Box::new(HeadlessTarget::new(info, dev)))
        }
    }
}

/// The state shared by all target variants
///
/// This owns the image pool, the semaphores, the lifecycle state and
/// the frame pacer.
pub(crate) struct TargetCore {
    pub(crate) tc_dev: Arc<dyn GpuDevice>,
    pub(crate) tc_info: CreateInfo,
    pub(crate) tc_state: TargetState,
    pub(crate) tc_images: Vec<TargetImage>,
    pub(crate) tc_extent: vk::Extent2D,
    pub(crate) tc_preferred: vk::Extent2D,
    pub(crate) tc_format: vk::Format,
    pub(crate) tc_semaphores: Option<TargetSemaphores>,
    tc_pacer: Option<Box<dyn FramePacer>>,
    /// The frame returned by the last calc_frame_pacing
    tc_current_frame_id: Option<i64>,
    /// Round robin index returned by acquire
    pub(crate) tc_index: u32,
}

impl TargetCore {
    pub(crate) fn new(info: &CreateInfo, dev: Arc<dyn GpuDevice>) -> Self {
        Self {
            tc_dev: dev,
            tc_info: info.clone(),
            tc_state: TargetState::Uninitialized,
            tc_images: Vec::new(),
            tc_extent: vk::Extent2D::default(),
            tc_preferred: vk::Extent2D::default(),
            tc_format: info.color_format,
            tc_semaphores: None,
            tc_pacer: None,
            tc_current_frame_id: None,
            tc_index: 0,
        }
    }

    pub(crate) fn invalid(&self, op: &'static str) -> SquallError {
        log::error!("{} is not allowed while the target is {:?}", op, self.tc_state);
        SquallError::INVALID_STATE {
            op: op,
            state: self.tc_state,
        }
    }

    pub(crate) fn init_pre_vulkan(&mut self) -> Result<()> {
        if self.tc_state != TargetState::Uninitialized {
            return Err(self.invalid("init_pre_vulkan"));
        }
        self.tc_state = TargetState::PreVulkanInit;
        Ok(())
    }

    pub(crate) fn init_post_vulkan(&mut self, width: u32, height: u32) -> Result<()> {
        if self.tc_state != TargetState::PreVulkanInit {
            return Err(self.invalid("init_post_vulkan"));
        }
        self.tc_preferred = vk::Extent2D {
            width: width,
            height: height,
        };
        self.tc_state = TargetState::PostVulkanInit;
        Ok(())
    }

    /// Enter Resizing, waiting for the GPU to finish with the old images
    pub(crate) fn begin_resize(&mut self) -> Result<()> {
        match self.tc_state {
            TargetState::PostVulkanInit | TargetState::Ready | TargetState::Resizing => {}
            _ => return Err(self.invalid("create_images")),
        }

        if self.has_images() {
            self.tc_dev.wait_idle()?;
        }
        self.tc_state = TargetState::Resizing;
        Ok(())
    }

    pub(crate) fn finish_resize(&mut self) {
        self.tc_state = TargetState::Ready;
    }

    /// Replace the image pool and semaphores
    ///
    /// Everything from the previous pool is destroyed before anything new
    /// is allocated. If creation fails the target is left without images.
    pub(crate) fn create_pool(&mut self, width: u32, height: u32, format: vk::Format) -> Result<()> {
        self.destroy_pool();

        if width == 0 || height == 0 {
            return Err(self.invalid("create_images with an empty extent"));
        }

        if let Err(e) = self.fill_pool(width, height, format) {
            log::error!("Could not create target images: {}", e);
            self.destroy_pool();
            return Err(e);
        }

        // no display to take timings from
        self.pacer();

        log::info!(
            "Created {} target images of {}x{} {:?}",
            self.tc_images.len(),
            width,
            height,
            format
        );
        Ok(())
    }

    fn fill_pool(&mut self, width: u32, height: u32, format: vk::Format) -> Result<()> {
        let dev = self.tc_dev.clone();
        self.tc_semaphores = Some(TargetSemaphores::create(dev.as_ref())?);

        let extent = vk::Extent2D {
            width: width,
            height: height,
        };
        for _ in 0..self.tc_info.image_count {
            let (image, view, memory) = dev.create_image_with_view(
                &extent,
                format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                vk::ImageAspectFlags::COLOR,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::ImageTiling::OPTIMAL,
            )?;
            self.tc_images.push(TargetImage {
                image: image,
                view: view,
                memory: memory,
            });
        }

        self.tc_extent = extent;
        self.tc_format = format;
        self.tc_index = 0;
        Ok(())
    }

    pub(crate) fn destroy_pool(&mut self) {
        let dev = self.tc_dev.clone();
        for image in self.tc_images.iter_mut() {
            image.destroy(dev.as_ref());
        }
        self.tc_images.clear();

        if let Some(semas) = self.tc_semaphores.take() {
            semas.destroy(dev.as_ref());
        }
    }

    pub(crate) fn has_images(&self) -> bool {
        !self.tc_images.is_empty() && self.tc_images.iter().all(|i| i.is_complete())
    }

    pub(crate) fn acquire(&mut self) -> Result<u32> {
        if !self.has_images() {
            log::error!("Tried to acquire from a target without images");
            return Err(SquallError::NOT_INITIALIZED);
        }
        if self.tc_state != TargetState::Ready {
            return Err(self.invalid("acquire"));
        }

        log::profiling!("Acquired target image {}", self.tc_index);
        Ok(self.tc_index)
    }

    /// Validate a present of `index` and get the image being presented
    pub(crate) fn presentable(&self, index: u32) -> Result<TargetImage> {
        if !self.has_images() {
            return Err(SquallError::NOT_INITIALIZED);
        }
        if self.tc_state != TargetState::Ready {
            return Err(self.invalid("present"));
        }

        match self.tc_images.get(index as usize) {
            Some(image) => Ok(*image),
            None => Err(self.invalid("present of an unknown image index")),
        }
    }

    /// Move on to the next image in the pool
    pub(crate) fn advance(&mut self) {
        self.tc_index = (self.tc_index + 1) % self.tc_images.len().max(1) as u32;
    }

    fn pacer(&mut self) -> &mut Box<dyn FramePacer> {
        let interval = self.tc_info.nominal_frame_interval_ns;
        self.tc_pacer.get_or_insert_with(|| {
            Box::new(FakePacer::new(interval, get_monotonic_ns())) as Box<dyn FramePacer>
        })
    }

    pub(crate) fn calc_frame_pacing(&mut self) -> Result<FramePrediction> {
        if self.tc_state == TargetState::Destroyed {
            return Err(self.invalid("calc_frame_pacing"));
        }

        let prediction = self.pacer().predict(get_monotonic_ns());
        self.tc_current_frame_id = Some(prediction.frame_id);
        Ok(prediction)
    }

    pub(crate) fn mark_timing_point(
        &mut self,
        point: TimingPoint,
        frame_id: i64,
        when_ns: u64,
    ) -> Result<()> {
        match self.tc_current_frame_id {
            Some(current) if current == frame_id => {
                self.pacer().mark_point(point, frame_id, when_ns);
                Ok(())
            }
            current => {
                let expected = current.unwrap_or(-1);
                log::error!(
                    "Timing point {:?} for frame {} while pacing frame {}",
                    point,
                    frame_id,
                    expected
                );
                Err(SquallError::FRAME_ID_MISMATCH {
                    expected: expected,
                    got: frame_id,
                })
            }
        }
    }

    pub(crate) fn info_gpu(
        &mut self,
        frame_id: i64,
        gpu_start_ns: u64,
        gpu_end_ns: u64,
        when_ns: u64,
    ) -> Result<()> {
        self.pacer()
            .info_gpu(frame_id, gpu_start_ns, gpu_end_ns, when_ns);
        Ok(())
    }

    /// Wait for the GPU and release everything
    pub(crate) fn destroy(&mut self) {
        if self.tc_state == TargetState::Destroyed {
            return;
        }

        if self.has_images() {
            if let Err(e) = self.tc_dev.wait_idle() {
                log::error!("Could not wait for the device before teardown: {}", e);
            }
        }
        self.destroy_pool();
        self.tc_state = TargetState::Destroyed;
        log::info!("Destroyed target");
    }
}
