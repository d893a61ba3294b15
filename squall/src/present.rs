// Present orchestration
//
// Drives one target through the acquire -> render -> present loop and
// handles swapchain recreation when the stream sink renegotiates the
// resolution or the GPU stops keeping up.
use ash::vk;

use crate::pacing::{FramePrediction, TimingPoint};
use crate::target::{Target, TargetImage};
use crate::{Result, SquallError};
use utils::log;
use utils::timing::get_monotonic_ns;

/// The result of presenting one frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The frame was handed to the target
    Presented,
    /// The frame was dropped and the target's images were recreated
    /// at a new resolution
    Recreated { width: u32, height: u32 },
}

/// Sequences frames on a target
///
/// Every frame is `begin_frame`, `acquire`, rendering by the caller,
/// then `present`. `run_frame` does all of it around a render closure.
pub struct PresentOrchestrator {
    po_target: Box<dyn Target>,
    /// Pacing of the frame between begin_frame and present
    po_frame: Option<FramePrediction>,
    po_frames_presented: u64,
    po_recreations: u32,
    /// Set once the device is lost. Nothing runs after that.
    po_device_lost: bool,
}

impl PresentOrchestrator {
    /// Initialize `target` and create its first images at `width` x `height`
    pub fn new(mut target: Box<dyn Target>, width: u32, height: u32) -> Result<Self> {
        target.init_pre_vulkan()?;
        target.init_post_vulkan(width, height)?;

        let format = target.format();
        target.create_images(width, height, format)?;
        log::info!("Present orchestrator ready at {}x{}", width, height);

        Ok(Self {
            po_target: target,
            po_frame: None,
            po_frames_presented: 0,
            po_recreations: 0,
            po_device_lost: false,
        })
    }

    pub fn target(&self) -> &dyn Target {
        self.po_target.as_ref()
    }

    pub fn target_mut(&mut self) -> &mut dyn Target {
        self.po_target.as_mut()
    }

    /// Number of frames handed to the target
    pub fn frames_presented(&self) -> u64 {
        self.po_frames_presented
    }

    /// Number of times the images were recreated
    pub fn recreations(&self) -> u32 {
        self.po_recreations
    }

    /// True once the device was lost. Every frame operation fails after that.
    pub fn device_lost(&self) -> bool {
        self.po_device_lost
    }

    fn check_device(&self) -> Result<()> {
        match self.po_device_lost {
            true => Err(SquallError::DEVICE_LOST),
            false => Ok(()),
        }
    }

    /// Remember a lost device before handing the error back
    fn note_failure(&mut self, err: SquallError) -> SquallError {
        if err == SquallError::DEVICE_LOST && !self.po_device_lost {
            log::error!("The device was lost, the target can no longer be used");
            self.po_device_lost = true;
        }
        err
    }

    /// Start pacing a new frame
    pub fn begin_frame(&mut self) -> Result<FramePrediction> {
        self.check_device()?;
        self.po_target.update_timings()?;
        let prediction = self.po_target.calc_frame_pacing()?;

        let now = get_monotonic_ns();
        self.po_target
            .mark_timing_point(TimingPoint::WakeUp, prediction.frame_id, now)?;
        self.po_target
            .mark_timing_point(TimingPoint::Begin, prediction.frame_id, now)?;

        self.po_frame = Some(prediction);
        Ok(prediction)
    }

    /// Get the index of the image to render the current frame into
    pub fn acquire(&mut self) -> Result<u32> {
        self.check_device()?;
        if !self.po_target.check_ready() {
            log::error!("Target is not ready for acquire");
            return Err(SquallError::NOT_INITIALIZED);
        }
        self.po_target.acquire()
    }

    /// Present the current frame from image `index`
    ///
    /// An out of date target is recreated at its preferred extent and
    /// reported as `Recreated`.
    ///
    /// A GPU timeout leaves work in flight, so the images are recreated
    /// (which waits for the device) before TIMEOUT is returned. A lost
    /// device is returned as DEVICE_LOST now and for every later frame.
    /// Other failures are returned as is.
    pub fn present(&mut self, queue: vk::Queue, index: u32) -> Result<PresentOutcome> {
        self.check_device()?;
        let frame = match self.po_frame.take() {
            Some(frame) => frame,
            None => {
                return Err(SquallError::INVALID_STATE {
                    op: "present before begin_frame",
                    state: self.po_target.state(),
                })
            }
        };

        self.po_target
            .mark_timing_point(TimingPoint::Submit, frame.frame_id, get_monotonic_ns())?;

        match self.po_target.present(
            queue,
            index,
            frame.desired_present_time_ns,
            frame.present_slop_ns,
        ) {
            Ok(()) => {
                self.po_frames_presented += 1;
                Ok(PresentOutcome::Presented)
            }
            Err(SquallError::OUT_OF_DATE) => self.recreate(),
            Err(SquallError::TIMEOUT) => {
                log::error!(
                    "Frame {} timed out on the GPU, recreating the target images",
                    frame.frame_id
                );
                self.recreate().map_err(|e| self.note_failure(e))?;
                Err(SquallError::TIMEOUT)
            }
            Err(e) => {
                log::error!("Present of frame {} failed: {}", frame.frame_id, e);
                Err(self.note_failure(e))
            }
        }
    }

    fn recreate(&mut self) -> Result<PresentOutcome> {
        let extent = self.po_target.preferred_extent();
        let format = self.po_target.format();
        log::info!(
            "Recreating target images at {}x{}",
            extent.width,
            extent.height
        );

        self.po_target
            .create_images(extent.width, extent.height, format)?;
        self.po_recreations += 1;

        Ok(PresentOutcome::Recreated {
            width: extent.width,
            height: extent.height,
        })
    }

    /// Run one whole frame
    ///
    /// `render` is given the acquired image and its index and must
    /// finish recording into it before returning.
    pub fn run_frame<F>(&mut self, queue: vk::Queue, render: F) -> Result<PresentOutcome>
    where
        F: FnOnce(&TargetImage, u32) -> Result<()>,
    {
        self.begin_frame()?;
        let index = self.acquire()?;

        let image = match self.po_target.images().get(index as usize) {
            Some(image) => *image,
            None => return Err(SquallError::NOT_INITIALIZED),
        };
        if let Err(e) = render(&image, index) {
            return Err(self.note_failure(e));
        }

        self.present(queue, index)
    }

    /// Tear down the target
    pub fn destroy(&mut self) {
        self.po_frame = None;
        self.po_target.destroy();
    }
}
