//! Headless GPU backend
//!
//! This stands in for a Vulkan device when there is no GPU. Every create
//! call mints a unique fake handle, and every destroy call retires one.
//! Nothing is rendered, but the bookkeeping lets tests check that the
//! target never leaks or double frees a handle and that it submits and
//! waits the way it should.
use ash::vk;
use ash::vk::Handle;

use crate::device::GpuDevice;
use crate::{Result, SquallError};
use utils::log;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Everything we have observed so far
#[derive(Default)]
struct Recorder {
    /// Next raw handle value. Zero is reserved for null.
    r_next_handle: u64,
    /// raw handle -> the kind of object it names
    r_live: HashMap<u64, &'static str>,
    r_double_destroys: u32,
    r_submissions: u32,
    r_fence_waits: u32,
    r_wait_idles: u32,
    r_draws: u32,
    /// Last bytes written to each memory object
    r_memory_writes: HashMap<u64, Vec<u8>>,
    /// Image view most recently written into a sampler descriptor
    r_sampled_view: vk::ImageView,
    /// Framebuffers in the order render passes were begun on them
    r_framebuffers: Vec<vk::Framebuffer>,
    /// Wait semaphores of the most recent submission
    r_submit_waits: Vec<vk::Semaphore>,
    /// Submitted command buffer -> the fence that retires it
    r_pending: HashMap<u64, u64>,
    /// Command buffers or fences reused while their work was pending
    r_pending_reuses: u32,
    /// Timeout passed to the most recent fence wait
    r_last_fence_timeout: Option<u64>,
    /// Returned from fence waits instead of success when set
    r_fence_failure: Option<vk::Result>,
    /// Returned from memory allocation instead of success when set
    r_alloc_failure: Option<vk::Result>,
}

/// A `GpuDevice` that records instead of rendering
pub struct HeadlessDevice {
    hd_rec: Mutex<Recorder>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            hd_rec: Mutex::new(Recorder {
                r_next_handle: 1,
                ..Default::default()
            }),
        }
    }

    fn rec(&self) -> MutexGuard<Recorder> {
        self.hd_rec.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mint<T: Handle>(&self, kind: &'static str) -> T {
        let mut rec = self.rec();
        let raw = rec.r_next_handle;
        rec.r_next_handle += 1;
        rec.r_live.insert(raw, kind);
        T::from_raw(raw)
    }

    fn retire<T: Handle>(&self, handle: T) {
        let raw = handle.as_raw();
        if raw == 0 {
            return;
        }

        let mut rec = self.rec();
        if rec.r_live.remove(&raw).is_none() {
            log::error!("Headless device: handle {:#x} destroyed twice", raw);
            rec.r_double_destroys += 1;
        }
    }

    /// Number of handles created and not yet destroyed
    pub fn live_handle_count(&self) -> usize {
        self.rec().r_live.len()
    }

    /// Number of live handles of one kind, such as "image" or "fence"
    pub fn live_count_of(&self, kind: &str) -> usize {
        self.rec().r_live.values().filter(|k| **k == kind).count()
    }

    pub fn is_live<T: Handle>(&self, handle: T) -> bool {
        self.rec().r_live.contains_key(&handle.as_raw())
    }

    /// Number of destroy calls on handles that were not live
    pub fn double_destroy_count(&self) -> u32 {
        self.rec().r_double_destroys
    }

    pub fn submit_count(&self) -> u32 {
        self.rec().r_submissions
    }

    pub fn fence_wait_count(&self) -> u32 {
        self.rec().r_fence_waits
    }

    pub fn wait_idle_count(&self) -> u32 {
        self.rec().r_wait_idles
    }

    pub fn draw_count(&self) -> u32 {
        self.rec().r_draws
    }

    /// The bytes most recently written to `mem`
    pub fn memory_contents(&self, mem: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.rec().r_memory_writes.get(&mem.as_raw()).cloned()
    }

    /// The image view most recently bound as the sampled source
    pub fn sampled_view(&self) -> vk::ImageView {
        self.rec().r_sampled_view
    }

    /// Framebuffers render passes were begun on, oldest first
    pub fn rendered_framebuffers(&self) -> Vec<vk::Framebuffer> {
        self.rec().r_framebuffers.clone()
    }

    /// Wait semaphores of the last queue submission
    pub fn last_submit_waits(&self) -> Vec<vk::Semaphore> {
        self.rec().r_submit_waits.clone()
    }

    /// Number of submitted command buffers whose fence has not been waited on
    pub fn pending_submission_count(&self) -> usize {
        self.rec().r_pending.len()
    }

    /// Number of times a pending command buffer was recorded or submitted
    /// again, or the fence guarding it was reset
    pub fn pending_reuse_count(&self) -> u32 {
        self.rec().r_pending_reuses
    }

    /// The timeout given to the last `wait_for_fence`
    pub fn last_fence_timeout(&self) -> Option<u64> {
        self.rec().r_last_fence_timeout
    }

    /// Make every following fence wait fail with `res`, or succeed again with None
    pub fn set_fence_failure(&self, res: Option<vk::Result>) {
        self.rec().r_fence_failure = res;
    }

    /// Make every following memory allocation fail with `res`
    pub fn set_alloc_failure(&self, res: Option<vk::Result>) {
        self.rec().r_alloc_failure = res;
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessDevice {
    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn graphics_queue(&self) -> vk::Queue {
        // queues are not destroyed, so this is never tracked
        vk::Queue::from_raw(u64::MAX)
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo) -> Result<vk::Image> {
        Ok(self.mint("image"))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.retire(image)
    }

    fn get_image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: !0,
        }
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        Ok(self.mint("image view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.retire(view)
    }

    fn allocate_memory(
        &self,
        _reqs: &vk::MemoryRequirements,
        _flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        if let Some(res) = self.rec().r_alloc_failure {
            return Err(res.into());
        }
        Ok(self.mint("memory"))
    }

    fn free_memory(&self, mem: vk::DeviceMemory) {
        self.rec().r_memory_writes.remove(&mem.as_raw());
        self.retire(mem)
    }

    fn bind_image_memory(&self, _image: vk::Image, _mem: vk::DeviceMemory) -> Result<()> {
        Ok(())
    }

    fn bind_buffer_memory(&self, _buffer: vk::Buffer, _mem: vk::DeviceMemory) -> Result<()> {
        Ok(())
    }

    fn write_memory(&self, mem: vk::DeviceMemory, offset: u64, data: &[u8]) -> Result<()> {
        let mut rec = self.rec();
        if !rec.r_live.contains_key(&mem.as_raw()) {
            log::error!("Headless device: write to dead memory {:#x}", mem.as_raw());
            return Err(SquallError::VK(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }

        let contents = rec.r_memory_writes.entry(mem.as_raw()).or_default();
        let end = offset as usize + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn create_buffer(&self, _info: &vk::BufferCreateInfo) -> Result<vk::Buffer> {
        Ok(self.mint("buffer"))
    }

    fn get_buffer_memory_requirements(&self, _buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 256,
            alignment: 16,
            memory_type_bits: !0,
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.retire(buffer)
    }

    fn create_shader_module(&self, _code: &[u32]) -> Result<vk::ShaderModule> {
        Ok(self.mint("shader module"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.retire(module)
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass> {
        Ok(self.mint("render pass"))
    }

    fn destroy_render_pass(&self, pass: vk::RenderPass) {
        self.retire(pass)
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> Result<vk::DescriptorSetLayout> {
        Ok(self.mint("descriptor set layout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.retire(layout)
    }

    fn create_descriptor_pool(
        &self,
        _info: &vk::DescriptorPoolCreateInfo,
    ) -> Result<vk::DescriptorPool> {
        Ok(self.mint("descriptor pool"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.retire(pool)
    }

    fn allocate_descriptor_set(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        // Sets are freed with their pool, so they are not tracked
        let mut rec = self.rec();
        let raw = rec.r_next_handle;
        rec.r_next_handle += 1;
        Ok(vk::DescriptorSet::from_raw(raw))
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        let mut rec = self.rec();
        for write in writes.iter() {
            if write.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                && write.descriptor_count > 0
                && !write.p_image_info.is_null()
            {
                // The pointer is valid for the duration of this call
                rec.r_sampled_view = unsafe { (*write.p_image_info).image_view };
            }
        }
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo,
    ) -> Result<vk::PipelineLayout> {
        Ok(self.mint("pipeline layout"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.retire(layout)
    }

    fn create_graphics_pipeline(
        &self,
        _info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<vk::Pipeline> {
        Ok(self.mint("pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.retire(pipeline)
    }

    fn create_framebuffer(&self, _info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer> {
        Ok(self.mint("framebuffer"))
    }

    fn destroy_framebuffer(&self, fb: vk::Framebuffer) {
        self.retire(fb)
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> Result<vk::Sampler> {
        Ok(self.mint("sampler"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.retire(sampler)
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        Ok(self.mint("command pool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.retire(pool)
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        // Freed with the pool
        let mut rec = self.rec();
        let raw = rec.r_next_handle;
        rec.r_next_handle += 1;
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn begin_command_buffer(
        &self,
        cbuf: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let mut rec = self.rec();
        if rec.r_pending.contains_key(&cbuf.as_raw()) {
            log::error!(
                "Headless device: command buffer {:#x} recorded while pending",
                cbuf.as_raw()
            );
            rec.r_pending_reuses += 1;
        }
        Ok(())
    }

    fn end_command_buffer(&self, _cbuf: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn cmd_begin_render_pass(&self, _cbuf: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        self.rec().r_framebuffers.push(info.framebuffer);
    }

    fn cmd_set_viewport(&self, _cbuf: vk::CommandBuffer, _viewport: &vk::Viewport) {}
    fn cmd_set_scissor(&self, _cbuf: vk::CommandBuffer, _scissor: &vk::Rect2D) {}
    fn cmd_bind_pipeline(&self, _cbuf: vk::CommandBuffer, _pipeline: vk::Pipeline) {}
    fn cmd_bind_vertex_buffer(&self, _cbuf: vk::CommandBuffer, _buffer: vk::Buffer) {}
    fn cmd_bind_index_buffer(&self, _cbuf: vk::CommandBuffer, _buffer: vk::Buffer) {}
    fn cmd_bind_descriptor_set(
        &self,
        _cbuf: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _set: vk::DescriptorSet,
    ) {
    }

    fn cmd_draw_indexed(&self, _cbuf: vk::CommandBuffer, _index_count: u32) {
        self.rec().r_draws += 1;
    }

    fn cmd_end_render_pass(&self, _cbuf: vk::CommandBuffer) {}

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        Ok(self.mint("semaphore"))
    }

    fn destroy_semaphore(&self, sema: vk::Semaphore) {
        self.retire(sema)
    }

    fn create_fence(&self, _signaled: bool) -> Result<vk::Fence> {
        Ok(self.mint("fence"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.retire(fence)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut rec = self.rec();
        let raw = fence.as_raw();
        if rec.r_pending.values().any(|f| *f == raw) {
            log::error!("Headless device: fence {:#x} reset while pending", raw);
            rec.r_pending_reuses += 1;
        }
        Ok(())
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        let mut rec = self.rec();
        rec.r_fence_waits += 1;
        rec.r_last_fence_timeout = Some(timeout_ns);

        // the work stays pending when the wait fails
        if let Some(res) = rec.r_fence_failure {
            return Err(res.into());
        }
        if !rec.r_live.contains_key(&fence.as_raw()) {
            return Err(SquallError::VK(vk::Result::ERROR_UNKNOWN));
        }

        let raw = fence.as_raw();
        rec.r_pending.retain(|_, f| *f != raw);
        Ok(())
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        info: &vk::SubmitInfo,
        fence: vk::Fence,
    ) -> Result<()> {
        let waits = match info.p_wait_semaphores.is_null() {
            true => Vec::new(),
            // valid for wait_semaphore_count entries during this call
            false => unsafe {
                std::slice::from_raw_parts(
                    info.p_wait_semaphores,
                    info.wait_semaphore_count as usize,
                )
                .to_vec()
            },
        };
        let cbufs = match info.p_command_buffers.is_null() {
            true => Vec::new(),
            false => unsafe {
                std::slice::from_raw_parts(
                    info.p_command_buffers,
                    info.command_buffer_count as usize,
                )
                .to_vec()
            },
        };

        let mut rec = self.rec();
        rec.r_submissions += 1;
        rec.r_submit_waits = waits;
        for cbuf in cbufs.iter() {
            if rec.r_pending.insert(cbuf.as_raw(), fence.as_raw()).is_some() {
                log::error!(
                    "Headless device: command buffer {:#x} submitted while pending",
                    cbuf.as_raw()
                );
                rec.r_pending_reuses += 1;
            }
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut rec = self.rec();
        rec.r_wait_idles += 1;
        rec.r_pending.clear();
        Ok(())
    }
}
