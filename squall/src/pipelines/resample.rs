// The foveated resample pass
//
// Draws one textured quad that samples the full resolution stereo image
// and writes the foveated packing into a small ring of output images.
// The fixed parts (pipeline, geometry, descriptors, command buffer) are
// created once. The output images depend on the target resolution and
// are rebuilt by `resize`.
use ash::{util, vk};
use cgmath::{Vector2, Vector3};
use serde::Serialize;

use crate::device::GpuDevice;
use crate::foveation::{FoveationConfig, FoveationParams, FoveationPlan, FoveationPlanner};
use crate::target::TargetImage;
use crate::{Result, SquallError};
use utils::log;
use utils::timing::StopWatch;

use std::ffi::CStr;
use std::fs::File;
use std::mem;
use std::path::Path;
use std::sync::Arc;

/// Contiains a vertex and its texture coordinates
#[repr(C)]
#[derive(Clone, Copy, Serialize)]
struct VertData {
    pub vertex: Vector3<f32>,
    pub tex: Vector2<f32>,
}

/// A quad covering all of clip space
static QUAD_DATA: [VertData; 4] = [
    VertData {
        vertex: Vector3::new(1.0, 1.0, 0.0),
        tex: Vector2::new(1.0, 1.0),
    },
    VertData {
        vertex: Vector3::new(1.0, -1.0, 0.0),
        tex: Vector2::new(1.0, 0.0),
    },
    VertData {
        vertex: Vector3::new(-1.0, -1.0, 0.0),
        tex: Vector2::new(0.0, 0.0),
    },
    VertData {
        vertex: Vector3::new(-1.0, 1.0, 0.0),
        tex: Vector2::new(0.0, 1.0),
    },
];

static QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Binding of the source image sampler
const SOURCE_IMAGE_BINDING: u32 = 0;
/// Binding of the foveation parameter block
const FOVEATION_UBO_BINDING: u32 = 1;

/// Read a SPIR-V binary from disk
fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path).map_err(|e| {
        log::error!("Could not open shader {:?}: {}", path, e);
        SquallError::SHADER_LOAD(format!("{}: {}", path.display(), e))
    })?;

    util::read_spv(&mut file).map_err(|e| {
        log::error!("Could not read shader {:?}: {}", path, e);
        SquallError::SHADER_LOAD(format!("{}: {}", path.display(), e))
    })
}

/// Turn static geometry into buffer contents
fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    bincode::serialize(data).map_err(|e| {
        log::error!("Could not encode resample geometry: {}", e);
        SquallError::VK(vk::Result::ERROR_INITIALIZATION_FAILED)
    })
}

/// Resources sized from the current foveation plan
struct ResampleTargets {
    rt_plan: FoveationPlan,
    rt_images: Vec<TargetImage>,
    /// One per image in `rt_images`
    rt_framebuffers: Vec<vk::Framebuffer>,
    rt_ubo: vk::Buffer,
    rt_ubo_memory: vk::DeviceMemory,
    /// The image the next resample writes to
    rt_index: usize,
}

impl ResampleTargets {
    fn destroy(&mut self, dev: &dyn GpuDevice) {
        for fb in self.rt_framebuffers.drain(..) {
            dev.destroy_framebuffer(fb);
        }
        for image in self.rt_images.iter_mut() {
            image.destroy(dev);
        }
        self.rt_images.clear();
        dev.destroy_buffer(self.rt_ubo);
        dev.free_memory(self.rt_ubo_memory);
        self.rt_ubo = vk::Buffer::null();
        self.rt_ubo_memory = vk::DeviceMemory::null();
    }
}

/// Packs a stereo image into its foveated layout
pub struct FoveatedResamplePass {
    rp_dev: Arc<dyn GpuDevice>,
    rp_planner: FoveationPlanner,
    rp_format: vk::Format,
    rp_ring_size: usize,
    /// Upper bound on waiting for a resample to finish
    rp_fence_timeout_ns: u64,
    rp_pass: vk::RenderPass,
    rp_pipeline: vk::Pipeline,
    rp_pipeline_layout: vk::PipelineLayout,
    /// This descriptor pool allocates only the one set
    rp_descriptor_pool: vk::DescriptorPool,
    rp_descriptor_layout: vk::DescriptorSetLayout,
    rp_descriptor_set: vk::DescriptorSet,
    /// vertex, fragment
    rp_shader_modules: Vec<vk::ShaderModule>,
    rp_sampler: vk::Sampler,
    rp_vert_buffer: vk::Buffer,
    rp_vert_buffer_memory: vk::DeviceMemory,
    rp_index_buffer: vk::Buffer,
    rp_index_buffer_memory: vk::DeviceMemory,
    rp_cmd_pool: vk::CommandPool,
    rp_cbuf: vk::CommandBuffer,
    /// Signaled when a submitted resample finishes
    rp_fence: vk::Fence,
    /// The last fence wait failed, so the command buffer may still be
    /// executing
    rp_stalled: bool,
    rp_targets: Option<ResampleTargets>,
}

impl FoveatedResamplePass {
    /// Build the pass with the shaders named in `config`
    ///
    /// No output images exist until `resize` is called.
    pub fn new(
        dev: Arc<dyn GpuDevice>,
        config: &FoveationConfig,
        format: vk::Format,
        ring_size: u32,
        fence_timeout_ns: u64,
    ) -> Result<Self> {
        let vert = load_spirv(&config.vert_shader_path)?;
        let frag = load_spirv(&config.frag_shader_path)?;

        Self::with_shaders(
            dev,
            config.params,
            &vert,
            &frag,
            format,
            ring_size,
            fence_timeout_ns,
        )
    }

    /// Build the pass from SPIR-V that is already in memory
    pub fn with_shaders(
        dev: Arc<dyn GpuDevice>,
        params: FoveationParams,
        vert_spv: &[u32],
        frag_spv: &[u32],
        format: vk::Format,
        ring_size: u32,
        fence_timeout_ns: u64,
    ) -> Result<Self> {
        let planner = FoveationPlanner::new(params)?;

        let mut pass = Self {
            rp_dev: dev,
            rp_planner: planner,
            rp_format: format,
            rp_ring_size: ring_size.max(1) as usize,
            rp_fence_timeout_ns: fence_timeout_ns,
            rp_pass: vk::RenderPass::null(),
            rp_pipeline: vk::Pipeline::null(),
            rp_pipeline_layout: vk::PipelineLayout::null(),
            rp_descriptor_pool: vk::DescriptorPool::null(),
            rp_descriptor_layout: vk::DescriptorSetLayout::null(),
            rp_descriptor_set: vk::DescriptorSet::null(),
            rp_shader_modules: Vec::new(),
            rp_sampler: vk::Sampler::null(),
            rp_vert_buffer: vk::Buffer::null(),
            rp_vert_buffer_memory: vk::DeviceMemory::null(),
            rp_index_buffer: vk::Buffer::null(),
            rp_index_buffer_memory: vk::DeviceMemory::null(),
            rp_cmd_pool: vk::CommandPool::null(),
            rp_cbuf: vk::CommandBuffer::null(),
            rp_fence: vk::Fence::null(),
            rp_stalled: false,
            rp_targets: None,
        };

        // Anything created before a failure is torn down again
        if let Err(e) = pass.build(vert_spv, frag_spv) {
            log::error!("Could not build the foveated resample pass: {}", e);
            pass.destroy();
            return Err(e);
        }

        log::info!("Created foveated resample pass for {:?}", format);
        Ok(pass)
    }

    /// Create everything that does not depend on the resolution
    fn build(&mut self, vert_spv: &[u32], frag_spv: &[u32]) -> Result<()> {
        let dev = self.rp_dev.clone();

        self.rp_shader_modules
            .push(dev.create_shader_module(vert_spv)?);
        self.rp_shader_modules
            .push(dev.create_shader_module(frag_spv)?);

        self.rp_pass = Self::create_pass(dev.as_ref(), self.rp_format)?;
        self.rp_descriptor_layout = Self::create_descriptor_layout(dev.as_ref())?;
        self.rp_descriptor_pool = Self::create_descriptor_pool(dev.as_ref())?;
        self.rp_descriptor_set =
            dev.allocate_descriptor_set(self.rp_descriptor_pool, self.rp_descriptor_layout)?;

        let layouts = [self.rp_descriptor_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&layouts);
        self.rp_pipeline_layout = dev.create_pipeline_layout(&layout_info)?;

        self.rp_pipeline = Self::create_pipeline(
            dev.as_ref(),
            self.rp_pipeline_layout,
            self.rp_pass,
            self.rp_shader_modules[0],
            self.rp_shader_modules[1],
        )?;
        self.rp_sampler = Self::create_sampler(dev.as_ref())?;

        let (vbuf, vmem) = dev.create_buffer_with_data(
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &encode(&QUAD_DATA)?,
        )?;
        self.rp_vert_buffer = vbuf;
        self.rp_vert_buffer_memory = vmem;

        let (ibuf, imem) = dev.create_buffer_with_data(
            vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &encode(&QUAD_INDICES)?,
        )?;
        self.rp_index_buffer = ibuf;
        self.rp_index_buffer_memory = imem;

        self.rp_cmd_pool = dev.create_command_pool()?;
        self.rp_cbuf = dev.allocate_command_buffer(self.rp_cmd_pool)?;
        self.rp_fence = dev.create_fence(false)?;

        Ok(())
    }

    /// create a renderpass for the single color attachment
    ///
    /// The output is cleared, fully overwritten by the quad, and left
    /// ready for handoff.
    fn create_pass(dev: &dyn GpuDevice, format: vk::Format) -> Result<vk::RenderPass> {
        let attachments = [vk::AttachmentDescription {
            format: format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];

        let color_refs = [vk::AttachmentReference {
            attachment: 0, // index into the attachments variable
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ..Default::default()
        }];

        let subpasses = [vk::SubpassDescription::builder()
            .color_attachments(&color_refs)
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        dev.create_render_pass(&create_info)
    }

    /// The source image sampler and the parameter block, both read by
    /// the fragment stage
    fn create_descriptor_layout(dev: &dyn GpuDevice) -> Result<vk::DescriptorSetLayout> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(SOURCE_IMAGE_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .descriptor_count(1)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(FOVEATION_UBO_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .descriptor_count(1)
                .build(),
        ];

        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        dev.create_descriptor_set_layout(&info)
    }

    fn create_descriptor_pool(dev: &dyn GpuDevice) -> Result<vk::DescriptorPool> {
        let sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .build(),
        ];

        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(1);
        dev.create_descriptor_pool(&info)
    }

    fn create_sampler(dev: &dyn GpuDevice) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .max_lod(1.0);

        dev.create_sampler(&info)
    }

    /// Configure and create the graphics pipeline
    ///
    /// Viewport and scissor are dynamic so the pipeline survives
    /// resizes. There is no depth, blending or culling of interest,
    /// the quad simply covers the whole output.
    fn create_pipeline(
        dev: &dyn GpuDevice,
        layout: vk::PipelineLayout,
        pass: vk::RenderPass,
        vert: vk::ShaderModule,
        frag: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        // The entrypoint of both shader stages
        let entrypoint = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .module(vert)
                .name(entrypoint)
                .stage(vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .module(frag)
                .name(entrypoint)
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0, // (location = 0)
            stride: mem::size_of::<VertData>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];

        let vertex_attributes = [
            // vertex location
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(VertData, vertex) as u32,
            },
            // Texture coordinates
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(VertData, tex) as u32,
            },
        ];

        let vertex_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let assembly = vk::PipelineInputAssemblyStateCreateInfo {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };

        // the real values are set while recording
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let raster_info = vk::PipelineRasterizationStateCreateInfo {
            front_face: vk::FrontFace::CLOCKWISE,
            cull_mode: vk::CullModeFlags::BACK,
            line_width: 1.0,
            polygon_mode: vk::PolygonMode::FILL,
            ..Default::default()
        };

        let multisample_info = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        let blend_attachment_states = [vk::PipelineColorBlendAttachmentState {
            blend_enable: 0,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        }];

        let blend_info =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachment_states);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_info)
            .input_assembly_state(&assembly)
            .viewport_state(&viewport_info)
            .rasterization_state(&raster_info)
            .multisample_state(&multisample_info)
            .color_blend_state(&blend_info)
            .dynamic_state(&dynamic_info)
            .layout(layout)
            .render_pass(pass)
            .build();

        dev.create_graphics_pipeline(&pipeline_info)
    }

    /// Rebuild the output images for a `width` x `height` source
    ///
    /// The previous images are destroyed first, so the caller must make
    /// sure no resample is in flight. Returns the foveated resolution,
    /// which is what the streaming sink should encode.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<vk::Extent2D> {
        let plan = self.rp_planner.plan(width, height)?;
        self.quiesce()?;
        self.destroy_targets();

        let mut targets = ResampleTargets {
            rt_plan: plan,
            rt_images: Vec::new(),
            rt_framebuffers: Vec::new(),
            rt_ubo: vk::Buffer::null(),
            rt_ubo_memory: vk::DeviceMemory::null(),
            rt_index: 0,
        };

        if let Err(e) = self.create_targets(&mut targets) {
            log::error!("Could not create foveated resample targets: {}", e);
            targets.destroy(self.rp_dev.as_ref());
            return Err(e);
        }

        self.update_ubo_descriptor(targets.rt_ubo);
        self.rp_targets = Some(targets);

        log::info!(
            "Resample targets are now {}x{}",
            plan.extent().width,
            plan.extent().height
        );
        Ok(plan.extent())
    }

    fn create_targets(&self, targets: &mut ResampleTargets) -> Result<()> {
        let dev = self.rp_dev.as_ref();
        let extent = targets.rt_plan.extent();

        for _ in 0..self.rp_ring_size {
            let (image, view, memory) = dev.create_image_with_view(
                &extent,
                self.rp_format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                vk::ImageAspectFlags::COLOR,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::ImageTiling::OPTIMAL,
            )?;
            targets.rt_images.push(TargetImage {
                image: image,
                view: view,
                memory: memory,
            });

            let attachments = [view];
            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.rp_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            targets.rt_framebuffers.push(dev.create_framebuffer(&info)?);
        }

        let (ubo, ubo_mem) = dev.create_buffer_with_data(
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &targets.rt_plan.to_ubo_bytes()?,
        )?;
        targets.rt_ubo = ubo;
        targets.rt_ubo_memory = ubo_mem;

        Ok(())
    }

    fn update_ubo_descriptor(&self, buf: vk::Buffer) {
        let info = [vk::DescriptorBufferInfo::builder()
            .buffer(buf)
            .offset(0)
            .range(mem::size_of::<FoveationPlan>() as u64)
            .build()];
        let write_info = [vk::WriteDescriptorSet::builder()
            .dst_set(self.rp_descriptor_set)
            .dst_binding(FOVEATION_UBO_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&info)
            .build()];

        self.rp_dev.update_descriptor_sets(&write_info);
    }

    /// Point the sampler at the image that was just rendered
    fn update_image_descriptor(&self, view: vk::ImageView) {
        let info = [vk::DescriptorImageInfo::builder()
            .sampler(self.rp_sampler)
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build()];
        let write_info = [vk::WriteDescriptorSet::builder()
            .dst_set(self.rp_descriptor_set)
            .dst_binding(SOURCE_IMAGE_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&info)
            .build()];

        self.rp_dev.update_descriptor_sets(&write_info);
    }

    /// Record the single draw into the current output image
    fn record(&self, targets: &ResampleTargets) -> Result<()> {
        let dev = self.rp_dev.as_ref();
        let extent = targets.rt_plan.extent();

        dev.begin_command_buffer(self.rp_cbuf, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        }];
        let pass_begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.rp_pass)
            .framebuffer(targets.rt_framebuffers[targets.rt_index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: extent,
            })
            .clear_values(&clear_values);

        dev.cmd_begin_render_pass(self.rp_cbuf, &pass_begin_info);
        dev.cmd_set_viewport(
            self.rp_cbuf,
            &vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        dev.cmd_set_scissor(
            self.rp_cbuf,
            &vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: extent,
            },
        );
        dev.cmd_bind_pipeline(self.rp_cbuf, self.rp_pipeline);
        dev.cmd_bind_vertex_buffer(self.rp_cbuf, self.rp_vert_buffer);
        dev.cmd_bind_index_buffer(self.rp_cbuf, self.rp_index_buffer);
        dev.cmd_bind_descriptor_set(
            self.rp_cbuf,
            self.rp_pipeline_layout,
            self.rp_descriptor_set,
        );
        dev.cmd_draw_indexed(self.rp_cbuf, QUAD_INDICES.len() as u32);
        dev.cmd_end_render_pass(self.rp_cbuf);

        dev.end_command_buffer(self.rp_cbuf)
    }

    /// Wait for the whole device if a resample timed out
    ///
    /// The command buffer and fence can't be touched again until the
    /// submission they belong to has retired.
    fn quiesce(&mut self) -> Result<()> {
        if !self.rp_stalled {
            return Ok(());
        }

        log::info!("Waiting for a timed out resample before reusing its resources");
        self.rp_dev.wait_idle()?;
        self.rp_stalled = false;
        Ok(())
    }

    /// True if a resample is known to be unfinished
    pub fn is_stalled(&self) -> bool {
        self.rp_stalled
    }

    /// Resample `source` into the next output image
    ///
    /// The submission waits on `wait` (usually the target's render
    /// complete semaphore, null for none) and this blocks until the
    /// GPU is done or the fence timeout passes. Returns the image that
    /// now holds the foveated frame.
    ///
    /// If the fence wait fails the pass is marked stalled, and the
    /// next `render` or `resize` waits for the device to go idle
    /// before it reuses anything.
    pub fn render(
        &mut self,
        queue: vk::Queue,
        source: vk::ImageView,
        wait: vk::Semaphore,
    ) -> Result<vk::Image> {
        self.quiesce()?;

        let targets = self.rp_targets.as_ref().ok_or(SquallError::NOT_INITIALIZED)?;
        let index = targets.rt_index;
        let dev = self.rp_dev.as_ref();

        self.update_image_descriptor(source);
        self.record(targets)?;

        let cbufs = [self.rp_cbuf];
        let wait_semas = [wait];
        let wait_stages = [vk::PipelineStageFlags::FRAGMENT_SHADER];
        let mut submit_info = vk::SubmitInfo::builder().command_buffers(&cbufs);
        if wait != vk::Semaphore::null() {
            submit_info = submit_info
                .wait_semaphores(&wait_semas)
                .wait_dst_stage_mask(&wait_stages);
        }

        dev.reset_fence(self.rp_fence)?;
        dev.queue_submit(queue, &submit_info, self.rp_fence)?;

        let mut stop = StopWatch::new();
        stop.start();
        if let Err(e) = dev.wait_for_fence(self.rp_fence, self.rp_fence_timeout_ns) {
            log::error!("Foveated resample did not finish: {}", e);
            self.rp_stalled = true;
            return Err(e);
        }
        stop.end();
        log::profiling!(
            "Foveated resample into image {} took {:?}",
            index,
            stop.get_duration()
        );

        let output = targets.rt_images[index].image;
        if let Some(targets) = self.rp_targets.as_mut() {
            targets.rt_index = (index + 1) % targets.rt_images.len();
        }
        Ok(output)
    }

    /// The current plan, if `resize` has been called
    pub fn plan(&self) -> Option<FoveationPlan> {
        self.rp_targets.as_ref().map(|t| t.rt_plan)
    }

    /// Size of the foveated output images
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.plan().map(|p| p.extent())
    }

    pub fn format(&self) -> vk::Format {
        self.rp_format
    }

    pub fn ring_size(&self) -> usize {
        self.rp_ring_size
    }

    /// The output images in ring order
    pub fn output_images(&self) -> Vec<vk::Image> {
        match self.rp_targets.as_ref() {
            Some(t) => t.rt_images.iter().map(|i| i.image).collect(),
            None => Vec::new(),
        }
    }

    /// Memory holding the parameter block
    pub fn ubo_memory(&self) -> Option<vk::DeviceMemory> {
        self.rp_targets.as_ref().map(|t| t.rt_ubo_memory)
    }

    fn destroy_targets(&mut self) {
        if let Some(mut targets) = self.rp_targets.take() {
            targets.destroy(self.rp_dev.as_ref());
        }
    }

    /// Destroy every resource owned by the pass
    ///
    /// The caller must make sure the GPU is no longer using them. This
    /// is safe to call more than once.
    pub fn destroy(&mut self) {
        if let Err(e) = self.quiesce() {
            log::error!("Could not wait for the resample before teardown: {}", e);
        }
        self.destroy_targets();

        let dev = self.rp_dev.clone();
        // pools free their sets and command buffers
        dev.destroy_fence(self.rp_fence);
        dev.destroy_command_pool(self.rp_cmd_pool);
        dev.destroy_buffer(self.rp_vert_buffer);
        dev.free_memory(self.rp_vert_buffer_memory);
        dev.destroy_buffer(self.rp_index_buffer);
        dev.free_memory(self.rp_index_buffer_memory);
        dev.destroy_sampler(self.rp_sampler);
        dev.destroy_pipeline(self.rp_pipeline);
        dev.destroy_pipeline_layout(self.rp_pipeline_layout);
        dev.destroy_descriptor_pool(self.rp_descriptor_pool);
        dev.destroy_descriptor_set_layout(self.rp_descriptor_layout);
        dev.destroy_render_pass(self.rp_pass);
        for module in self.rp_shader_modules.drain(..) {
            dev.destroy_shader_module(module);
        }

        self.rp_fence = vk::Fence::null();
        self.rp_cmd_pool = vk::CommandPool::null();
        self.rp_cbuf = vk::CommandBuffer::null();
        self.rp_vert_buffer = vk::Buffer::null();
        self.rp_vert_buffer_memory = vk::DeviceMemory::null();
        self.rp_index_buffer = vk::Buffer::null();
        self.rp_index_buffer_memory = vk::DeviceMemory::null();
        self.rp_sampler = vk::Sampler::null();
        self.rp_pipeline = vk::Pipeline::null();
        self.rp_pipeline_layout = vk::PipelineLayout::null();
        self.rp_descriptor_pool = vk::DescriptorPool::null();
        self.rp_descriptor_set = vk::DescriptorSet::null();
        self.rp_descriptor_layout = vk::DescriptorSetLayout::null();
        self.rp_pass = vk::RenderPass::null();
    }
}

impl Drop for FoveatedResamplePass {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    // The header of a SPIR-V module, enough for the headless device
    const FAKE_SPV: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

    fn params() -> FoveationParams {
        FoveationParams {
            center_size_x: 0.6,
            center_size_y: 0.6,
            center_shift_x: 0.0,
            center_shift_y: 0.0,
            edge_ratio_x: 2.0,
            edge_ratio_y: 2.0,
        }
    }

    fn new_pass(dev: &Arc<HeadlessDevice>) -> FoveatedResamplePass {
        FoveatedResamplePass::with_shaders(
            dev.clone(),
            params(),
            &FAKE_SPV,
            &FAKE_SPV,
            vk::Format::R8G8B8A8_SRGB,
            2,
            1_000_000,
        )
        .unwrap()
    }

    #[test]
    fn geometry_encodes_without_framing() {
        assert_eq!(
            encode(&QUAD_DATA).unwrap().len(),
            mem::size_of::<[VertData; 4]>()
        );
        assert_eq!(encode(&QUAD_INDICES).unwrap().len(), 6 * 4);
    }

    #[test]
    fn render_requires_resize() {
        let dev = Arc::new(HeadlessDevice::new());
        let mut pass = new_pass(&dev);
        assert_eq!(
            pass.render(dev.graphics_queue(), vk::ImageView::null(), vk::Semaphore::null()),
            Err(SquallError::NOT_INITIALIZED)
        );
    }

    #[test]
    fn output_ring_rotates() {
        let dev = Arc::new(HeadlessDevice::new());
        let mut pass = new_pass(&dev);
        let extent = pass.resize(1920, 1080).unwrap();
        assert_eq!(extent.width, 768 * 2);
        assert_eq!(extent.height, 864);

        let images = pass.output_images();
        assert_eq!(images.len(), 2);

        let source = dev.create_image_view(&Default::default()).unwrap();
        let queue = dev.graphics_queue();
        let first = pass.render(queue, source, vk::Semaphore::null()).unwrap();
        let second = pass.render(queue, source, vk::Semaphore::null()).unwrap();
        let third = pass.render(queue, source, vk::Semaphore::null()).unwrap();
        assert_eq!(first, images[0]);
        assert_eq!(second, images[1]);
        assert_eq!(third, images[0]);

        assert_eq!(dev.sampled_view(), source);
        assert_eq!(dev.submit_count(), 3);
        assert_eq!(dev.fence_wait_count(), 3);
        assert_eq!(dev.draw_count(), 3);
        assert!(dev.last_submit_waits().is_empty());

        dev.destroy_image_view(source);
    }

    #[test]
    fn parameter_block_is_uploaded() {
        let dev = Arc::new(HeadlessDevice::new());
        let mut pass = new_pass(&dev);
        pass.resize(1920, 1080).unwrap();

        let mem = pass.ubo_memory().unwrap();
        let expected = pass.plan().unwrap().to_ubo_bytes().unwrap();
        assert_eq!(dev.memory_contents(mem), Some(expected));
    }

    #[test]
    fn resize_and_drop_release_everything() {
        let dev = Arc::new(HeadlessDevice::new());
        {
            let mut pass = new_pass(&dev);
            let fixed = dev.live_handle_count();

            pass.resize(1920, 1080).unwrap();
            let sized = dev.live_handle_count();
            pass.resize(2880, 1600).unwrap();
            assert_eq!(dev.live_handle_count(), sized);

            pass.destroy_targets();
            assert_eq!(dev.live_handle_count(), fixed);
        }
        assert_eq!(dev.live_handle_count(), 0);
        assert_eq!(dev.double_destroy_count(), 0);
    }

    #[test]
    fn fence_timeout_is_reported() {
        let dev = Arc::new(HeadlessDevice::new());
        let mut pass = new_pass(&dev);
        pass.resize(1920, 1080).unwrap();

        dev.set_fence_failure(Some(vk::Result::TIMEOUT));
        assert_eq!(
            pass.render(dev.graphics_queue(), vk::ImageView::null(), vk::Semaphore::null()),
            Err(SquallError::TIMEOUT)
        );
        assert!(pass.is_stalled());
        assert_eq!(dev.last_fence_timeout(), Some(1_000_000));
    }

    #[test]
    fn timed_out_resample_is_waited_on_before_reuse() {
        let dev = Arc::new(HeadlessDevice::new());
        let mut pass = new_pass(&dev);
        pass.resize(1920, 1080).unwrap();
        let queue = dev.graphics_queue();

        dev.set_fence_failure(Some(vk::Result::TIMEOUT));
        assert!(pass
            .render(queue, vk::ImageView::null(), vk::Semaphore::null())
            .is_err());
        assert_eq!(dev.pending_submission_count(), 1);

        dev.set_fence_failure(None);
        pass.render(queue, vk::ImageView::null(), vk::Semaphore::null())
            .unwrap();
        assert!(!pass.is_stalled());
        assert_eq!(dev.wait_idle_count(), 1);
        assert_eq!(dev.submit_count(), 2);
        assert_eq!(dev.pending_reuse_count(), 0);
        assert_eq!(dev.pending_submission_count(), 0);
    }

    #[test]
    fn resize_waits_out_a_stalled_resample() {
        let dev = Arc::new(HeadlessDevice::new());
        let mut pass = new_pass(&dev);
        pass.resize(1920, 1080).unwrap();

        dev.set_fence_failure(Some(vk::Result::TIMEOUT));
        assert!(pass
            .render(dev.graphics_queue(), vk::ImageView::null(), vk::Semaphore::null())
            .is_err());

        pass.resize(2880, 1600).unwrap();
        assert!(!pass.is_stalled());
        assert_eq!(dev.wait_idle_count(), 1);
        assert_eq!(dev.pending_submission_count(), 0);
    }

    #[test]
    fn missing_shader_is_a_load_error() {
        let dev: Arc<dyn GpuDevice> = Arc::new(HeadlessDevice::new());
        let config = FoveationConfig {
            params: params(),
            vert_shader_path: "/nonexistent/squall/ffr.vert.spv".into(),
            frag_shader_path: "/nonexistent/squall/ffr.frag.spv".into(),
        };

        match FoveatedResamplePass::new(dev, &config, vk::Format::R8G8B8A8_SRGB, 2, 1) {
            Err(SquallError::SHADER_LOAD(msg)) => assert!(msg.contains("ffr.vert.spv")),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("pass was created without shaders"),
        }
    }

    #[test]
    fn shaders_load_from_disk() {
        let dir = std::env::temp_dir().join(format!("squall-resample-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quad.spv");
        let bytes: Vec<u8> = FAKE_SPV.iter().flat_map(|w| w.to_le_bytes().to_vec()).collect();
        std::fs::write(&path, &bytes).unwrap();

        let dev = Arc::new(HeadlessDevice::new());
        let config = FoveationConfig {
            params: params(),
            vert_shader_path: path.clone(),
            frag_shader_path: path.clone(),
        };
        let pass = FoveatedResamplePass::new(
            dev.clone(),
            &config,
            vk::Format::R8G8B8A8_SRGB,
            2,
            1,
        )
        .unwrap();
        assert_eq!(dev.live_count_of("shader module"), 2);
        drop(pass);
        assert_eq!(dev.live_handle_count(), 0);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
