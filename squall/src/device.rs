// Vulkan device access for the presentation target
//
// The target never owns the Vulkan instance or device, those are
// bootstrapped by the host compositor. What it needs is a handful of
// explicit create/destroy/submit operations, which are collected in the
// `GpuDevice` trait so the same target code can run against a real
// device or the recording `HeadlessDevice`.
use ash::vk;

use crate::{Result, SquallError};
use utils::log;

/// The GPU operations used by the target and the resample pass
///
/// Resources follow the usual explicit Vulkan rules: whoever creates a
/// handle destroys it, and nothing is collected implicitly. Destroying
/// a null handle is a no-op.
pub trait GpuDevice: Send + Sync {
    /// The queue family that command pools are created for
    fn graphics_queue_family(&self) -> u32;
    /// The queue the target submits resample work to
    fn graphics_queue(&self) -> vk::Queue;

    fn create_image(&self, info: &vk::ImageCreateInfo) -> Result<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Allocate memory from the first type allowed by `reqs` that has all of `flags`
    fn allocate_memory(
        &self,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory>;
    fn free_memory(&self, mem: vk::DeviceMemory);
    fn bind_image_memory(&self, image: vk::Image, mem: vk::DeviceMemory) -> Result<()>;
    fn bind_buffer_memory(&self, buffer: vk::Buffer, mem: vk::DeviceMemory) -> Result<()>;
    /// Copy `data` into host visible, host coherent `mem` at `offset`
    fn write_memory(&self, mem: vk::DeviceMemory, offset: u64, data: &[u8]) -> Result<()>;

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> Result<vk::Buffer>;
    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, pass: vk::RenderPass);
    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo,
    ) -> Result<vk::DescriptorPool>;
    /// Destroying the pool frees every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>;
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);
    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, fb: vk::Framebuffer);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    /// Create a resettable command pool on the graphics queue family
    fn create_command_pool(&self) -> Result<vk::CommandPool>;
    /// Destroying the pool frees every command buffer allocated from it
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    /// Reset `cbuf` and start recording into it
    fn begin_command_buffer(
        &self,
        cbuf: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()>;
    fn end_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()>;
    fn cmd_begin_render_pass(&self, cbuf: vk::CommandBuffer, info: &vk::RenderPassBeginInfo);
    fn cmd_set_viewport(&self, cbuf: vk::CommandBuffer, viewport: &vk::Viewport);
    fn cmd_set_scissor(&self, cbuf: vk::CommandBuffer, scissor: &vk::Rect2D);
    fn cmd_bind_pipeline(&self, cbuf: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_vertex_buffer(&self, cbuf: vk::CommandBuffer, buffer: vk::Buffer);
    /// Bind a buffer of u32 indices
    fn cmd_bind_index_buffer(&self, cbuf: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_descriptor_set(
        &self,
        cbuf: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_draw_indexed(&self, cbuf: vk::CommandBuffer, index_count: u32);
    fn cmd_end_render_pass(&self, cbuf: vk::CommandBuffer);

    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, sema: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    /// Wait at most `timeout_ns` for `fence` to signal
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn queue_submit(
        &self,
        queue: vk::Queue,
        info: &vk::SubmitInfo,
        fence: vk::Fence,
    ) -> Result<()>;
    /// Block until all work on the device has finished
    fn wait_idle(&self) -> Result<()>;

    /// Create an image along with its backing memory and a view
    ///
    /// Resolution should probably be the same size as the target's images.
    /// usage defines the role the image will serve (transfer, sampling, etc)
    /// flags defines the memory type (probably DEVICE_LOCAL + others).
    /// If any step fails everything created so far is destroyed again.
    fn create_image_with_view(
        &self,
        resolution: &vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        flags: vk::MemoryPropertyFlags,
        tiling: vk::ImageTiling,
    ) -> Result<(vk::Image, vk::ImageView, vk::DeviceMemory)> {
        // we create the image now, but will have to bind
        // some memory to it later.
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: resolution.width,
                height: resolution.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();
        let image = self.create_image(&create_info)?;

        let mem_reqs = self.get_image_memory_requirements(image);
        let memory = match self.allocate_memory(&mem_reqs, flags) {
            Ok(mem) => mem,
            Err(e) => {
                self.destroy_image(image);
                return Err(e);
            }
        };

        if let Err(e) = self.bind_image_memory(image, memory) {
            self.destroy_image(image);
            self.free_memory(memory);
            return Err(e);
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .level_count(1)
                    .layer_count(1)
                    .build(),
            )
            .image(image)
            .format(format)
            .view_type(vk::ImageViewType::TYPE_2D)
            .build();

        match self.create_image_view(&view_info) {
            Ok(view) => Ok((image, view, memory)),
            Err(e) => {
                self.destroy_image(image);
                self.free_memory(memory);
                Err(e)
            }
        }
    }

    /// Allocates a buffer/memory pair and fills it with `data`
    ///
    /// There are two components to a memory backed resource in vulkan:
    /// vkBuffer which is the actual buffer itself, and vkDeviceMemory which
    /// represents a region of allocated memory to hold the buffer contents.
    ///
    /// Both are returned, as both need to be destroyed when they are done.
    fn create_buffer_with_data(
        &self,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
        data: &[u8],
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(data.len() as u64)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();
        let buffer = self.create_buffer(&create_info)?;

        let reqs = self.get_buffer_memory_requirements(buffer);
        let memory = match self.allocate_memory(&reqs, flags) {
            Ok(mem) => mem,
            Err(e) => {
                self.destroy_buffer(buffer);
                return Err(e);
            }
        };

        let res = self
            .write_memory(memory, 0, data)
            // Until now the buffer has not had any memory assigned
            .and_then(|_| self.bind_buffer_memory(buffer, memory));
        if let Err(e) = res {
            self.destroy_buffer(buffer);
            self.free_memory(memory);
            return Err(e);
        }

        Ok((buffer, memory))
    }
}

/// Find a memory type in `props` that is compatible with `reqs`
/// and has all of `flags`
///
/// Memory types specify the location and accessability of memory. Device
/// local memory is resident on the GPU, while host visible memory can be
/// read from the system side.
pub(crate) fn find_memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    reqs: &vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    for (i, mem_type) in props.memory_types[..props.memory_type_count as usize]
        .iter()
        .enumerate()
    {
        // Bit i of memoryBitTypes will be set if the resource supports
        // the ith memory type in props.
        if (reqs.memory_type_bits >> i) & 1 == 1 && mem_type.property_flags.contains(flags) {
            return Some(i as u32);
        }
    }
    None
}

/// A `GpuDevice` backed by a real Vulkan device
///
/// The host compositor creates the instance and device and passes
/// them in. This does not destroy the device when dropped.
pub struct VkDevice {
    pub(crate) dev: ash::Device,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) graphics_queue_family: u32,
}

impl VkDevice {
    /// Wrap an existing device
    ///
    /// `queue_family` must be a graphics capable family that `dev` was
    /// created with. Its first queue is used for resample submissions.
    pub fn new(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        dev: ash::Device,
        queue_family: u32,
    ) -> Self {
        let mem_props = unsafe { inst.get_physical_device_memory_properties(pdev) };
        let queue = unsafe { dev.get_device_queue(queue_family, 0) };

        Self {
            dev: dev,
            mem_props: mem_props,
            graphics_queue: queue,
            graphics_queue_family: queue_family,
        }
    }
}

impl GpuDevice for VkDevice {
    fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    fn create_image(&self, info: &vk::ImageCreateInfo) -> Result<vk::Image> {
        unsafe { Ok(self.dev.create_image(info, None)?) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.dev.destroy_image(image, None) }
    }

    fn get_image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.dev.get_image_memory_requirements(image) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        unsafe { Ok(self.dev.create_image_view(info, None)?) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.dev.destroy_image_view(view, None) }
    }

    fn allocate_memory(
        &self,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let index = find_memory_type_index(&self.mem_props, reqs, flags).ok_or_else(|| {
            log::error!("No memory type supports {:?}", flags);
            SquallError::NO_SUITABLE_MEMORY
        })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(reqs.size)
            .memory_type_index(index);

        unsafe { Ok(self.dev.allocate_memory(&alloc_info, None)?) }
    }

    fn free_memory(&self, mem: vk::DeviceMemory) {
        unsafe { self.dev.free_memory(mem, None) }
    }

    fn bind_image_memory(&self, image: vk::Image, mem: vk::DeviceMemory) -> Result<()> {
        unsafe { Ok(self.dev.bind_image_memory(image, mem, 0)?) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, mem: vk::DeviceMemory) -> Result<()> {
        unsafe { Ok(self.dev.bind_buffer_memory(buffer, mem, 0)?) }
    }

    fn write_memory(&self, mem: vk::DeviceMemory, offset: u64, data: &[u8]) -> Result<()> {
        if data.len() == 0 {
            return Ok(());
        }

        unsafe {
            let ptr = self.dev.map_memory(
                mem,
                offset,
                data.len() as u64,
                vk::MemoryMapFlags::empty(),
            )?;

            // rust doesn't have a raw memcpy, so we need to transform the void
            // ptr to a slice. This is unsafe as the length needs to be correct
            let dst = std::slice::from_raw_parts_mut(ptr as *mut u8, data.len());
            dst.copy_from_slice(data);

            self.dev.unmap_memory(mem);
        }
        Ok(())
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> Result<vk::Buffer> {
        unsafe { Ok(self.dev.create_buffer(info, None)?) }
    }

    fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.dev.get_buffer_memory_requirements(buffer) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.dev.destroy_buffer(buffer, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { Ok(self.dev.create_shader_module(&info, None)?) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.dev.destroy_shader_module(module, None) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass> {
        unsafe { Ok(self.dev.create_render_pass(info, None)?) }
    }

    fn destroy_render_pass(&self, pass: vk::RenderPass) {
        unsafe { self.dev.destroy_render_pass(pass, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> Result<vk::DescriptorSetLayout> {
        unsafe { Ok(self.dev.create_descriptor_set_layout(info, None)?) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.dev.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo,
    ) -> Result<vk::DescriptorPool> {
        unsafe { Ok(self.dev.create_descriptor_pool(info, None)?) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.dev.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.dev.allocate_descriptor_sets(&info)? };
        sets.into_iter()
            .next()
            .ok_or(SquallError::VK(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe { self.dev.update_descriptor_sets(writes, &[]) }
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> Result<vk::PipelineLayout> {
        unsafe { Ok(self.dev.create_pipeline_layout(info, None)?) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.dev.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<vk::Pipeline> {
        let pipelines = unsafe {
            self.dev
                .create_graphics_pipelines(vk::PipelineCache::null(), &[*info], None)
                .map_err(|(_, res)| SquallError::from(res))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(SquallError::VK(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.dev.destroy_pipeline(pipeline, None) }
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer> {
        unsafe { Ok(self.dev.create_framebuffer(info, None)?) }
    }

    fn destroy_framebuffer(&self, fb: vk::Framebuffer) {
        unsafe { self.dev.destroy_framebuffer(fb, None) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> Result<vk::Sampler> {
        unsafe { Ok(self.dev.create_sampler(info, None)?) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.dev.destroy_sampler(sampler, None) }
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_queue_family);

        unsafe { Ok(self.dev.create_command_pool(&pool_create_info, None)?) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.dev.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let cbuf_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(1)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        let cbufs = unsafe { self.dev.allocate_command_buffers(&cbuf_allocate_info)? };
        cbufs
            .into_iter()
            .next()
            .ok_or(SquallError::VK(vk::Result::ERROR_UNKNOWN))
    }

    fn begin_command_buffer(
        &self,
        cbuf: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        unsafe {
            // first reset the buffer so we know it is empty
            self.dev
                .reset_command_buffer(cbuf, vk::CommandBufferResetFlags::RELEASE_RESOURCES)?;

            let record_info = vk::CommandBufferBeginInfo::builder().flags(flags);
            self.dev.begin_command_buffer(cbuf, &record_info)?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, cbuf: vk::CommandBuffer) -> Result<()> {
        unsafe { Ok(self.dev.end_command_buffer(cbuf)?) }
    }

    fn cmd_begin_render_pass(&self, cbuf: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.dev
                .cmd_begin_render_pass(cbuf, info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_set_viewport(&self, cbuf: vk::CommandBuffer, viewport: &vk::Viewport) {
        unsafe { self.dev.cmd_set_viewport(cbuf, 0, &[*viewport]) }
    }

    fn cmd_set_scissor(&self, cbuf: vk::CommandBuffer, scissor: &vk::Rect2D) {
        unsafe { self.dev.cmd_set_scissor(cbuf, 0, &[*scissor]) }
    }

    fn cmd_bind_pipeline(&self, cbuf: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.dev
                .cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_bind_vertex_buffer(&self, cbuf: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.dev.cmd_bind_vertex_buffers(
                cbuf,      // cbuf to draw in
                0,         // first vertex binding updated by the command
                &[buffer], // set of buffers to bind
                &[0],      // offsets for the above buffers
            )
        }
    }

    fn cmd_bind_index_buffer(&self, cbuf: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.dev
                .cmd_bind_index_buffer(cbuf, buffer, 0, vk::IndexType::UINT32)
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        cbuf: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.dev.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0, // first set
                &[set],
                &[], // dynamic offsets
            )
        }
    }

    fn cmd_draw_indexed(&self, cbuf: vk::CommandBuffer, index_count: u32) {
        unsafe {
            self.dev.cmd_draw_indexed(
                cbuf,
                index_count, // number of indices
                1,           // number of instances
                0,           // first index
                0,           // vertex offset
                0,           // first instance
            )
        }
    }

    fn cmd_end_render_pass(&self, cbuf: vk::CommandBuffer) {
        unsafe { self.dev.cmd_end_render_pass(cbuf) }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { Ok(self.dev.create_semaphore(&info, None)?) }
    }

    fn destroy_semaphore(&self, sema: vk::Semaphore) {
        unsafe { self.dev.destroy_semaphore(sema, None) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = match signaled {
            true => vk::FenceCreateFlags::SIGNALED,
            false => vk::FenceCreateFlags::empty(),
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { Ok(self.dev.create_fence(&info, None)?) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.dev.destroy_fence(fence, None) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { Ok(self.dev.reset_fences(&[fence])?) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        unsafe { Ok(self.dev.wait_for_fences(&[fence], true, timeout_ns)?) }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        info: &vk::SubmitInfo,
        fence: vk::Fence,
    ) -> Result<()> {
        unsafe { Ok(self.dev.queue_submit(queue, &[*info], fence)?) }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { Ok(self.dev.device_wait_idle()?) }
    }
}
