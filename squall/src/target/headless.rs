// Headless target
//
// An image pool with no consumer. Images can be acquired and rendered
// into as usual, presenting just moves on to the next image.
use ash::vk;

use super::{Target, TargetCore, TargetImage, TargetSemaphores, TargetState};
use crate::device::GpuDevice;
use crate::pacing::{FramePrediction, TimingPoint};
use crate::{CreateInfo, Result};
use utils::log;

use std::sync::Arc;

pub struct HeadlessTarget {
    h_core: TargetCore,
}

impl HeadlessTarget {
    pub fn new(info: &CreateInfo, dev: Arc<dyn GpuDevice>) -> Self {
        Self {
            h_core: TargetCore::new(info, dev),
        }
    }
}

impl Target for HeadlessTarget {
    fn init_pre_vulkan(&mut self) -> Result<()> {
        self.h_core.init_pre_vulkan()
    }

    fn init_post_vulkan(&mut self, preferred_width: u32, preferred_height: u32) -> Result<()> {
        self.h_core
            .init_post_vulkan(preferred_width, preferred_height)
    }

    fn create_images(&mut self, width: u32, height: u32, format: vk::Format) -> Result<()> {
        self.h_core.begin_resize()?;
        self.h_core.create_pool(width, height, format)?;
        self.h_core.finish_resize();
        Ok(())
    }

    fn has_images(&self) -> bool {
        self.h_core.has_images()
    }

    fn acquire(&mut self) -> Result<u32> {
        self.h_core.acquire()
    }

    fn present(
        &mut self,
        _queue: vk::Queue,
        index: u32,
        desired_present_time_ns: u64,
        _present_slop_ns: u64,
    ) -> Result<()> {
        self.h_core.presentable(index)?;
        self.h_core.advance();
        log::profiling!(
            "Headless present of image {} for {}ns",
            index,
            desired_present_time_ns
        );
        Ok(())
    }

    fn calc_frame_pacing(&mut self) -> Result<FramePrediction> {
        self.h_core.calc_frame_pacing()
    }

    fn mark_timing_point(&mut self, point: TimingPoint, frame_id: i64, when_ns: u64) -> Result<()> {
        self.h_core.mark_timing_point(point, frame_id, when_ns)
    }

    fn info_gpu(
        &mut self,
        frame_id: i64,
        gpu_start_ns: u64,
        gpu_end_ns: u64,
        when_ns: u64,
    ) -> Result<()> {
        self.h_core
            .info_gpu(frame_id, gpu_start_ns, gpu_end_ns, when_ns)
    }

    fn state(&self) -> TargetState {
        self.h_core.tc_state
    }

    fn images(&self) -> &[TargetImage] {
        &self.h_core.tc_images
    }

    fn extent(&self) -> vk::Extent2D {
        self.h_core.tc_extent
    }

    fn preferred_extent(&self) -> vk::Extent2D {
        self.h_core.tc_preferred
    }

    fn format(&self) -> vk::Format {
        self.h_core.tc_format
    }

    fn semaphores(&self) -> Option<TargetSemaphores> {
        self.h_core.tc_semaphores
    }

    fn destroy(&mut self) {
        self.h_core.destroy()
    }
}

impl Drop for HeadlessTarget {
    fn drop(&mut self) {
        self.h_core.destroy();
    }
}
