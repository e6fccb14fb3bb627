//! Vulkan renderer: owns every GPU resource and implements the frame backend
//!
//! Startup order is context → allocator → render pass → swapchain →
//! descriptor layout → pipeline cache → pipeline → command buffers → sync →
//! geometry and texture uploads → uniforms and descriptor sets. Fields are
//! declared in the reverse order so they drop in reverse-of-creation order.

use ash::vk;

use crate::config::HarnessConfig;
use crate::frame::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::vulkan::buffer::{Allocator, Buffer};
use crate::vulkan::commands::{CommandPool, CommandRecorder};
use crate::vulkan::context::VulkanContext;
use crate::vulkan::descriptor::{DescriptorPool, DescriptorSetLayout, SetResources};
use crate::vulkan::image::{Texture, TextureData};
use crate::vulkan::pipeline::GraphicsPipeline;
use crate::vulkan::pipeline_cache::{CacheIdentity, PipelineCache};
use crate::vulkan::render_pass::RenderPass;
use crate::vulkan::swapchain::{choose_surface_format, SwapchainSupport};
use crate::vulkan::swapchain_state::SwapchainState;
use crate::vulkan::sync::FrameSyncSet;
use crate::vulkan::uniform::UniformBufferObject;
use crate::vulkan::vertex::{QUAD_INDICES, QUAD_VERTICES};
use crate::vulkan::{VulkanError, VulkanResult};
use crate::window::{SurfaceSource, Window};

/// Everything needed to draw the textured quad
pub struct VulkanRenderer {
    descriptor_pool: DescriptorPool,
    uniform_buffers: Vec<Buffer>,
    _texture: Texture,
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    sync: FrameSyncSet,
    command_buffers: Vec<vk::CommandBuffer>,
    _command_pool: CommandPool,
    pipeline: GraphicsPipeline,
    pipeline_cache: PipelineCache,
    _descriptor_layout: DescriptorSetLayout,
    swapchain: SwapchainState,
    render_pass: RenderPass,
    allocator: Allocator,
    context: VulkanContext,

    clear_color: [f32; 4],
    elapsed_secs: f32,
    /// Slots whose last acquire was abandoned
    abandoned_acquires: Vec<usize>,
}

impl VulkanRenderer {
    /// Stand up the device and every resource the quad needs
    pub fn new(window: &mut Window, config: &HarnessConfig) -> VulkanResult<Self> {
        let renderer_config = &config.renderer;
        let context = VulkanContext::new(window, renderer_config)?;
        let device = context.device().clone();
        let allocator = Allocator::new(device.clone(), context.physical_device().memory_properties);

        let support = SwapchainSupport::query(
            context.surface_loader(),
            context.physical_device().device,
            context.surface(),
        )?;
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let render_pass = RenderPass::new(device.clone(), surface_format.format)?;

        let swapchain = SwapchainState::new(
            &context,
            &render_pass,
            window.framebuffer_size(),
            renderer_config.extra_swapchain_image,
        )?;

        let descriptor_layout = DescriptorSetLayout::new(device.clone())?;
        let mut pipeline_cache = PipelineCache::load(
            device.clone(),
            &CacheIdentity::from_properties(&context.physical_device().properties),
            &renderer_config.pipeline_cache_path,
        )?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &render_pass,
            &descriptor_layout,
            &mut pipeline_cache,
            renderer_config,
        )?;

        let frames = renderer_config.max_frames_in_flight;
        let command_pool = CommandPool::new(device.clone(), context.queue_families().graphics)?;
        let command_buffers = command_pool.allocate_command_buffers(frames as u32)?;
        let sync = FrameSyncSet::new(&device, frames)?;

        let queue = context.graphics_queue();
        let vertex_buffer = allocator.create_device_local_buffer(
            &command_pool,
            queue,
            &QUAD_VERTICES,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = allocator.create_device_local_buffer(
            &command_pool,
            queue,
            &QUAD_INDICES,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let texture_data = match &renderer_config.texture_path {
            Some(path) => TextureData::load(path)?,
            None => TextureData::checkerboard(64, 8),
        };
        let physical = context.physical_device();
        let max_anisotropy = physical
            .supports_anisotropy()
            .then_some(physical.properties.limits.max_sampler_anisotropy);
        let texture = Texture::upload(&allocator, &command_pool, queue, &texture_data, max_anisotropy)?;

        let uniform_buffers = (0..frames)
            .map(|_| {
                allocator.allocate_buffer(
                    UniformBufferObject::SIZE,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let set_resources: Vec<SetResources> = uniform_buffers
            .iter()
            .map(|buffer| SetResources {
                uniform_buffer: buffer.handle(),
                uniform_range: UniformBufferObject::SIZE,
                image_view: texture.image_view(),
                sampler: texture.sampler(),
            })
            .collect();
        let descriptor_pool = DescriptorPool::new(device, &descriptor_layout, &set_resources)?;

        log::info!("Renderer ready with {} frames in flight", frames);
        Ok(Self {
            descriptor_pool,
            uniform_buffers,
            _texture: texture,
            index_buffer,
            vertex_buffer,
            sync,
            command_buffers,
            _command_pool: command_pool,
            pipeline,
            pipeline_cache,
            _descriptor_layout: descriptor_layout,
            swapchain,
            render_pass,
            allocator,
            context,
            clear_color: renderer_config.clear_color,
            elapsed_secs: 0.0,
            abandoned_acquires: Vec::new(),
        })
    }

    /// Time fed into the next uniform update
    pub fn set_elapsed(&mut self, elapsed_secs: f32) {
        self.elapsed_secs = elapsed_secs;
    }

    /// Current swapchain extent
    pub fn extent(&self) -> VulkanResult<vk::Extent2D> {
        Ok(self.swapchain.targets()?.extent())
    }

    /// The device context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Pair with the window to drive the frame loop
    pub fn with_window<'a>(&'a mut self, window: &'a mut Window) -> WindowedRenderer<'a> {
        WindowedRenderer { renderer: self, window }
    }

    fn command_buffer(&self, slot: usize) -> VulkanResult<vk::CommandBuffer> {
        self.command_buffers
            .get(slot)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No command buffer for slot {}", slot),
            })
    }

    fn update_uniforms(&self, slot: usize, extent: vk::Extent2D) -> VulkanResult<()> {
        let buffer = self.uniform_buffers.get(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("No uniform buffer for slot {}", slot),
        })?;
        let ubo = UniformBufferObject::spinning_quad(self.elapsed_secs, extent);
        buffer.write_pod(std::slice::from_ref(&ubo))
    }

    fn record_frame(&self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let targets = self.swapchain.targets()?;
        let extent = targets.extent();
        let framebuffer = targets.framebuffer(image_index)?;

        self.update_uniforms(slot, extent)?;

        let mut recorder = CommandRecorder::new(self.command_buffer(slot)?, self.allocator.device().clone());
        recorder.reset()?;
        recorder.begin(vk::CommandBufferUsageFlags::empty())?;

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        {
            let mut pass =
                recorder.begin_render_pass(self.render_pass.handle(), framebuffer, render_area, &clear_values)?;
            pass.bind_pipeline(self.pipeline.handle());
            pass.set_viewport(&vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            pass.set_scissor(&render_area);
            pass.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
            pass.bind_index_buffer(self.index_buffer.handle(), 0, vk::IndexType::UINT32);
            pass.bind_descriptor_sets(self.pipeline.layout(), &[self.descriptor_pool.set(slot)?]);
            pass.draw_indexed(QUAD_INDICES.len() as u32, 1);
        }

        recorder.end()?;
        Ok(())
    }

    fn submit_frame(&self, slot: usize) -> VulkanResult<()> {
        let frame_sync = self.sync.slot(slot)?;

        let wait_semaphores = [frame_sync.image_available.handle()];
        // Only the color write needs the image; earlier stages may overlap
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffer(slot)?];
        let signal_semaphores = [frame_sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context
                .device()
                .queue_submit(
                    self.context.graphics_queue(),
                    &[submit_info.build()],
                    frame_sync.in_flight.handle(),
                )
                .map_err(VulkanError::Api)
        }
    }

    fn acquire(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
        let semaphore = self.sync.slot(slot)?.image_available.handle();
        let chain = self.swapchain.targets()?.swapchain().handle();

        let result = unsafe {
            self.context
                .swapchain_loader()
                .acquire_next_image(chain, u64::MAX, semaphore, vk::Fence::null())
        };

        let outcome = classify_acquire(result)?;
        if outcome == AcquireOutcome::Stale {
            self.abandoned_acquires.push(slot);
        }
        Ok(outcome)
    }

    fn present(&self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [self.sync.slot(slot)?.render_finished.handle()];
        let swapchains = [self.swapchain.targets()?.swapchain().handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.context
                .swapchain_loader()
                .queue_present(self.context.present_queue(), &present_info)
        };

        classify_present(result)
    }

    fn recreate<S: SurfaceSource + ?Sized>(&mut self, source: &mut S) -> VulkanResult<()> {
        if !self.swapchain.recreate(&self.context, &self.render_pass, source)? {
            return Ok(());
        }

        // The device is idle after recreation, so swapping semaphores is safe
        for slot in std::mem::take(&mut self.abandoned_acquires) {
            self.sync
                .slot_mut(slot)?
                .replace_image_available(self.context.device().clone())?;
        }
        Ok(())
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device did not go idle before teardown: {}", e);
        }
        self.swapchain.destroy();
        self.pipeline_cache.persist();
        log::debug!("Renderer resources released (swapchain {:?})", self.swapchain.phase());
    }
}

/// Map an acquire result onto the frame loop's view of it
///
/// Suboptimal counts as stale: the image is never rendered and the chain is
/// rebuilt. Anything other than out-of-date is fatal.
pub fn classify_acquire(result: ash::prelude::VkResult<(u32, bool)>) -> VulkanResult<AcquireOutcome> {
    match result {
        Ok((image_index, false)) => Ok(AcquireOutcome::Acquired(image_index)),
        Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(e) => Err(VulkanError::Api(e)),
    }
}

/// Map a present result onto the frame loop's view of it
pub fn classify_present(result: ash::prelude::VkResult<bool>) -> VulkanResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(VulkanError::Api(e)),
    }
}

/// Renderer paired with its window for one stretch of the frame loop
pub struct WindowedRenderer<'a> {
    renderer: &'a mut VulkanRenderer,
    window: &'a mut Window,
}

impl FrameBackend for WindowedRenderer<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.sync.slot(slot)?.in_flight.wait_forever()
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
        self.renderer.acquire(slot)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.sync.slot(slot)?.in_flight.reset()
    }

    fn record(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        self.renderer.record_frame(slot, image_index)
    }

    fn submit(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.submit_frame(slot)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
        self.renderer.present(slot, image_index)
    }

    fn recreate_swapchain(&mut self) -> VulkanResult<()> {
        self.renderer.recreate(&mut *self.window)
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        self.renderer.context.wait_idle()
    }
}
