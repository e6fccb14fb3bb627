//! Graphics pipeline for the textured quad
//!
//! Viewport and scissor are dynamic, so the pipeline outlives swapchain
//! recreation; only the render pass format ties it to the chain.

use ash::{vk, Device};

use crate::config::{CullMode, FrontFace, RendererConfig};
use crate::vulkan::descriptor::DescriptorSetLayout;
use crate::vulkan::pipeline_cache::PipelineCache;
use crate::vulkan::render_pass::RenderPass;
use crate::vulkan::shader::ShaderModule;
use crate::vulkan::vertex::Vertex;
use crate::vulkan::{VulkanError, VulkanResult};

/// States set at record time rather than baked in
pub const DYNAMIC_STATES: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Rasterizer cull flags for a configured mode
pub fn cull_mode_flags(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

/// Rasterizer winding for a configured front face
pub fn front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

/// Standard "over" compositing: src * src_alpha + dst * (1 - src_alpha)
pub fn alpha_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build the quad pipeline, seeding and refreshing `cache`
    ///
    /// A build that fails with a cache seeded from disk is retried once
    /// against an empty cache.
    pub fn new(
        device: Device,
        render_pass: &RenderPass,
        descriptor_layout: &DescriptorSetLayout,
        cache: &mut PipelineCache,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        let vertex_shader = ShaderModule::from_file(device.clone(), &config.shaders.vertex_shader_path)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), &config.shaders.fragment_shader_path)?;

        let set_layouts = [descriptor_layout.handle()];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        // Owns the layout from here on so failures below release it
        let mut pipeline = Self {
            device,
            pipeline: vk::Pipeline::null(),
            layout,
        };

        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let binding_descriptions = [Vertex::binding_description()];
        let attribute_descriptions = Vertex::attribute_descriptions();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the rectangles come from the command buffer
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode_flags(config.cull_mode))
            .front_face(front_face(config.front_face))
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [alpha_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.handle())
            .subpass(0)
            .build();

        pipeline.pipeline = match pipeline.create(cache.handle(), &pipeline_info) {
            Ok(handle) => handle,
            Err(e) if cache.is_seeded() => {
                log::warn!("Pipeline build failed with the cached seed ({}), retrying uncached", e);
                cache.discard_seed()?;
                pipeline.create(cache.handle(), &pipeline_info)?
            }
            Err(e) => return Err(e),
        };

        cache.persist();
        log::debug!(
            "Created graphics pipeline (cull {:?}, front face {:?})",
            config.cull_mode,
            config.front_face
        );

        Ok(pipeline)
    }

    fn create(&self, cache: vk::PipelineCache, info: &vk::GraphicsPipelineCreateInfo) -> VulkanResult<vk::Pipeline> {
        let result = unsafe {
            self.device
                .create_graphics_pipelines(cache, std::slice::from_ref(info), None)
        };

        match result {
            Ok(pipelines) => pipelines.first().copied().ok_or_else(|| {
                VulkanError::InitializationFailed("Driver returned no pipeline".to_string())
            }),
            Err((partial, err)) => {
                for handle in partial.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                    unsafe {
                        self.device.destroy_pipeline(handle, None);
                    }
                }
                Err(VulkanError::Api(err))
            }
        }
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
