// Offscreen swapchain
//
// Emulates a swapchain with a pool of offscreen images. Presenting an
// image (optionally resampled into the foveated layout) hands it to the
// stream sink instead of a display engine.
use ash::vk;

use super::{Delivery, StreamSink, Target, TargetCore, TargetImage, TargetSemaphores, TargetState};
use crate::device::GpuDevice;
use crate::foveation::FoveationConfig;
use crate::pacing::{FramePrediction, TimingPoint};
use crate::pipelines::FoveatedResamplePass;
use crate::{CreateInfo, Result, SquallError};
use utils::log;

use std::sync::Arc;

/// A swapchain made of offscreen images that feeds a `StreamSink`
pub struct OffscreenSwapchain {
    os_core: TargetCore,
    os_sink: Arc<dyn StreamSink>,
    /// Foveation settings reported by the sink at init time
    os_foveation: Option<FoveationConfig>,
    os_resample: Option<FoveatedResamplePass>,
    /// Presented images go through the resample pass
    os_foveation_active: bool,
}

impl OffscreenSwapchain {
    pub fn new(info: &CreateInfo, dev: Arc<dyn GpuDevice>, sink: Arc<dyn StreamSink>) -> Self {
        Self {
            os_core: TargetCore::new(info, dev),
            os_sink: sink,
            os_foveation: None,
            os_resample: None,
            os_foveation_active: false,
        }
    }

    /// True if presents currently go through the resample pass
    pub fn foveation_active(&self) -> bool {
        self.os_foveation_active
    }

    /// The resample pass, if the sink supports foveation
    pub fn resample_pass(&self) -> Option<&FoveatedResamplePass> {
        self.os_resample.as_ref()
    }

    fn build_resample_pass(&mut self, format: vk::Format) -> Result<()> {
        let config = match self.os_foveation.as_ref() {
            Some(config) => config,
            None => return Ok(()),
        };

        // drop the old pass before building its replacement
        self.os_resample = None;
        let info = &self.os_core.tc_info;
        self.os_resample = Some(FoveatedResamplePass::new(
            self.os_core.tc_dev.clone(),
            config,
            format,
            info.resample_ring_size,
            info.fence_timeout_ns,
        )?);
        Ok(())
    }

    /// Size the resample pass for the new images and tell the sink
    /// what it will be receiving
    fn negotiate_output(&mut self, width: u32, height: u32, format: vk::Format) -> Result<()> {
        self.os_foveation_active = false;

        let wants_foveation = self.os_sink.foveation_enabled() && self.os_foveation.is_some();
        if !wants_foveation {
            self.os_sink.update_resolution(width, height);
            return Ok(());
        }

        let stale = match self.os_resample.as_ref() {
            Some(pass) => pass.format() != format,
            None => true,
        };
        if stale {
            self.build_resample_pass(format)?;
        }

        let extent = match self.os_resample.as_mut() {
            Some(pass) => pass.resize(width, height)?,
            None => {
                self.os_sink.update_resolution(width, height);
                return Ok(());
            }
        };

        self.os_sink.update_resolution(extent.width, extent.height);
        self.os_foveation_active = true;
        Ok(())
    }
}

impl Target for OffscreenSwapchain {
    fn init_pre_vulkan(&mut self) -> Result<()> {
        self.os_core.init_pre_vulkan()
    }

    fn init_post_vulkan(&mut self, preferred_width: u32, preferred_height: u32) -> Result<()> {
        self.os_core
            .init_post_vulkan(preferred_width, preferred_height)?;

        self.os_foveation = self.os_sink.foveation();
        if self.os_foveation.is_some() {
            log::info!("Stream sink supports foveation, building the resample pass");
            let format = self.os_core.tc_format;
            self.build_resample_pass(format)?;
        }
        Ok(())
    }

    fn create_images(&mut self, width: u32, height: u32, format: vk::Format) -> Result<()> {
        self.os_core.begin_resize()?;
        self.os_core.create_pool(width, height, format)?;

        if let Err(e) = self.negotiate_output(width, height, format) {
            log::error!("Could not set up the foveated output: {}", e);
            self.os_core.destroy_pool();
            return Err(e);
        }

        self.os_core.finish_resize();
        Ok(())
    }

    fn has_images(&self) -> bool {
        self.os_core.has_images()
    }

    fn acquire(&mut self) -> Result<u32> {
        self.os_core.acquire()
    }

    fn present(
        &mut self,
        queue: vk::Queue,
        index: u32,
        desired_present_time_ns: u64,
        present_slop_ns: u64,
    ) -> Result<()> {
        let image = self.os_core.presentable(index)?;

        let output = match (self.os_foveation_active, self.os_resample.as_mut()) {
            (true, Some(pass)) => {
                let wait = self
                    .os_core
                    .tc_semaphores
                    .map(|s| s.render_complete)
                    .unwrap_or(vk::Semaphore::null());
                pass.render(queue, image.view, wait)?
            }
            _ => image.image,
        };
        self.os_core.advance();

        let mut width = self.os_core.tc_extent.width;
        let mut height = self.os_core.tc_extent.height;
        if self.os_sink.check_resolution(&mut width, &mut height) {
            log::info!(
                "Client requested {}x{}, target images are out of date",
                width,
                height
            );
            self.os_core.tc_preferred = vk::Extent2D {
                width: width,
                height: height,
            };
            return Err(SquallError::OUT_OF_DATE);
        }

        match self.os_sink.send_frame(output, desired_present_time_ns) {
            Delivery::Sent => log::profiling!(
                "Sent image {} for {}ns (slop {}ns)",
                index,
                desired_present_time_ns,
                present_slop_ns
            ),
            Delivery::Deferred => log::profiling!(
                "Held back image {} for {}ns",
                index,
                desired_present_time_ns
            ),
        }
        Ok(())
    }

    fn calc_frame_pacing(&mut self) -> Result<FramePrediction> {
        self.os_core.calc_frame_pacing()
    }

    fn mark_timing_point(&mut self, point: TimingPoint, frame_id: i64, when_ns: u64) -> Result<()> {
        self.os_core.mark_timing_point(point, frame_id, when_ns)
    }

    fn info_gpu(
        &mut self,
        frame_id: i64,
        gpu_start_ns: u64,
        gpu_end_ns: u64,
        when_ns: u64,
    ) -> Result<()> {
        self.os_core
            .info_gpu(frame_id, gpu_start_ns, gpu_end_ns, when_ns)
    }

    fn state(&self) -> TargetState {
        self.os_core.tc_state
    }

    fn images(&self) -> &[TargetImage] {
        &self.os_core.tc_images
    }

    fn extent(&self) -> vk::Extent2D {
        self.os_core.tc_extent
    }

    fn preferred_extent(&self) -> vk::Extent2D {
        self.os_core.tc_preferred
    }

    fn format(&self) -> vk::Format {
        self.os_core.tc_format
    }

    fn semaphores(&self) -> Option<TargetSemaphores> {
        self.os_core.tc_semaphores
    }

    fn destroy(&mut self) {
        if self.os_core.tc_state == TargetState::Destroyed {
            return;
        }

        // wait for the GPU before the resample pass goes away
        if self.os_core.has_images() {
            if let Err(e) = self.os_core.tc_dev.wait_idle() {
                log::error!("Could not wait for the device before teardown: {}", e);
            }
        }
        if let Some(mut pass) = self.os_resample.take() {
            pass.destroy();
        }
        self.os_foveation_active = false;
        self.os_core.destroy();
    }
}

impl Drop for OffscreenSwapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}
