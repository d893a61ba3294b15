//! # The Squall presentation target
//!
//! Squall stands in for a display when a VR compositor's output is
//! streamed to a remote headset instead of scanned out locally. It
//! exposes the same acquire/present contract a real swapchain would,
//! but renders into a small pool of offscreen images and hands the
//! finished image to a streaming sink.
//!
//! Before handoff the stereo image can be resampled through a fixed
//! foveation pass, which packs the periphery of each eye into fewer
//! pixels. The packed resolution is derived by the `FoveationPlanner`
//! and renegotiated with the sink whenever the target is resized.
//!
//! ## Usage
//!
//! The general flow of a client is as follows:
//! * Describe the target (`CreateInfo::builder()`)
//! * Wrap the host's Vulkan device in a `GpuDevice` (`VkDevice::new`)
//! * Create the target (`create_target`) and run the two init stages
//! * Hand it to a `PresentOrchestrator`, which paces frames, acquires
//!   images, presents them and recreates images when the sink asks
//!   for a new resolution.
//!
//! ```ignore
//! let info = squall::CreateInfo::builder().build();
//! let dev = Arc::new(squall::VkDevice::new(&inst, pdev, dev, family));
//! let queue = dev.graphics_queue();
//! let target = squall::create_target(&info, dev, Some(sink))?;
//! let mut orch = squall::PresentOrchestrator::new(target, 1920, 1080)?;
//!
//! loop {
//!     orch.run_frame(queue, |image, index| render_into(image, index))?;
//! }
//! ```
#![allow(non_camel_case_types)]

mod device;
mod foveation;
mod headless;
mod pacing;
mod pipelines;
mod present;
mod target;

#[cfg(test)]
mod tests;

pub use device::{GpuDevice, VkDevice};
pub use foveation::{FoveationConfig, FoveationParams, FoveationPlan, FoveationPlanner};
pub use headless::HeadlessDevice;
pub use pacing::{FakePacer, FramePacer, FramePrediction, TimingPoint};
pub use pipelines::FoveatedResamplePass;
pub use present::{PresentOrchestrator, PresentOutcome};
pub use target::{
    create_target, Delivery, HeadlessTarget, OffscreenSwapchain, StreamSink, Target,
    TargetImage, TargetSemaphores, TargetState,
};

extern crate utils;
use utils::timing::NS_PER_SEC;

pub use ash::vk;
use thiserror::Error;

#[macro_use]
extern crate memoffset;

/// Errors reported by the presentation target
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SquallError {
    #[error("The Vulkan device was lost")]
    DEVICE_LOST,
    #[error("Ran out of host or device memory")]
    OUT_OF_MEMORY,
    #[error("Timed out waiting for the GPU")]
    TIMEOUT,
    #[error("The target resolution changed and its images must be recreated")]
    OUT_OF_DATE,
    #[error("The target has no images yet")]
    NOT_INITIALIZED,
    #[error("{op} is not allowed while the target is {state:?}")]
    INVALID_STATE { op: &'static str, state: TargetState },
    #[error("Timing point reported for frame {got} while frame {expected} is being paced")]
    FRAME_ID_MISMATCH { expected: i64, got: i64 },
    #[error("Could not load shader: {0}")]
    SHADER_LOAD(String),
    #[error("Invalid foveation parameters: {0}")]
    INVALID_FOVEATION(&'static str),
    #[error("No memory type satisfies the requested properties")]
    NO_SUITABLE_MEMORY,
    #[error("Vulkan call failed with {0}")]
    VK(vk::Result),
}

impl From<vk::Result> for SquallError {
    fn from(res: vk::Result) -> Self {
        match res {
            vk::Result::ERROR_DEVICE_LOST => SquallError::DEVICE_LOST,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                SquallError::OUT_OF_MEMORY
            }
            vk::Result::TIMEOUT => SquallError::TIMEOUT,
            vk::Result::ERROR_OUT_OF_DATE_KHR => SquallError::OUT_OF_DATE,
            other => SquallError::VK(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SquallError>;

/// Which `Target` implementation to build
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// Offscreen images, foveated resample, and handoff to a streaming sink
    Offscreen,
    /// Offscreen images only. Presenting is a no-op.
    Headless,
}

/// Parameters for target creation.
///
/// The defaults match what a 90Hz streaming headset expects.
#[derive(Debug, Clone)]
pub struct CreateInfo {
    pub target_kind: TargetKind,
    /// Number of images in the emulated swapchain
    pub image_count: u32,
    /// Number of foveated output images rotated through after resampling
    pub resample_ring_size: u32,
    pub color_format: vk::Format,
    pub nominal_frame_interval_ns: u64,
    /// Upper bound on the wait for the resample pass to finish
    pub fence_timeout_ns: u64,
}

impl CreateInfo {
    pub fn builder() -> CreateInfoBuilder {
        CreateInfoBuilder {
            ci: CreateInfo {
                target_kind: TargetKind::Offscreen,
                image_count: 2,
                resample_ring_size: 2,
                color_format: vk::Format::R8G8B8A8_SRGB,
                nominal_frame_interval_ns: NS_PER_SEC / 90,
                fence_timeout_ns: NS_PER_SEC,
            },
        }
    }
}

/// Implements the builder pattern for easier target creation
pub struct CreateInfoBuilder {
    ci: CreateInfo,
}

impl CreateInfoBuilder {
    pub fn target_kind(mut self, kind: TargetKind) -> Self {
        self.ci.target_kind = kind;
        self
    }

    pub fn image_count(mut self, count: u32) -> Self {
        self.ci.image_count = count.max(1);
        self
    }

    pub fn resample_ring_size(mut self, count: u32) -> Self {
        self.ci.resample_ring_size = count.max(1);
        self
    }

    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.ci.color_format = format;
        self
    }

    pub fn nominal_frame_interval_ns(mut self, interval: u64) -> Self {
        self.ci.nominal_frame_interval_ns = interval;
        self
    }

    pub fn fence_timeout_ns(mut self, timeout: u64) -> Self {
        self.ci.fence_timeout_ns = timeout;
        self
    }

    pub fn build(self) -> CreateInfo {
        self.ci
    }
}
