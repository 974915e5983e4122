//! Graphics pipelines with lazily recreated native state.

use super::{
    BindError, BindPoint, ExternalBindingSets, Invalidation, PipelineBindError, PipelineCore,
    PipelineLayout, PipelineLayoutError,
};
use crate::{
    backend::{DepthState, GraphicsPipelineDesc, PipelineHandle, RasterizerState,
        RenderPassHandle, ShaderStageDesc},
    command_buffer::{Command, CommandRecorder, RecordedOp},
    deferred::RetiredResource,
    device::Device,
    render_pass::{Framebuffer, FramebufferLayout},
    shader::ShaderStage,
};
use ash::vk;
use std::{error, fmt, sync::Arc};

/// Fixed-function state of a graphics pipeline.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineSettings {
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub topology: vk::PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub depth: DepthState,
    pub blend_constants: [f32; 4],
}

impl GraphicsPipelineSettings {
    /// Settings with viewport and scissor covering the whole target extent.
    pub fn for_extent(extent: [u32; 2]) -> Self {
        GraphicsPipelineSettings {
            viewport: vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent[0] as f32,
                height: extent[1] as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            scissor: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: extent[0],
                    height: extent[1],
                },
            },
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            rasterizer: RasterizerState::default(),
            depth: DepthState::default(),
            blend_constants: [0.0; 4],
        }
    }
}

/// Vertex buffer bindings and attributes.
#[derive(Clone, Debug, Default)]
pub struct VertexInputState {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Error attaching a framebuffer to a pipeline.
///
/// Carries the rejected framebuffer back to the caller; nothing about it
/// was consumed.
#[derive(Debug)]
pub enum AttachError {
    IncompatibleFramebuffer { framebuffer: Framebuffer },
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::IncompatibleFramebuffer { .. } => write!(
                f,
                "the framebuffer's attachment layout does not match the pipeline's"
            ),
        }
    }
}

impl error::Error for AttachError {}

/// A graphics pipeline: merged layout, named bind points, an attached
/// framebuffer and the lazily built native objects behind them.
#[derive(Debug)]
pub struct GraphicsPipeline {
    core: PipelineCore,
    stages: Vec<ShaderStage>,
    settings: GraphicsPipelineSettings,
    vertex_input: VertexInputState,
    fb_layout: FramebufferLayout,
    render_pass: Option<RenderPassHandle>,
    pipeline: Option<PipelineHandle>,
    attached: Option<Framebuffer>,
}

impl GraphicsPipeline {
    /// Merges the stages' bindings into a pipeline layout. No native
    /// pipeline state is created until the first bind.
    pub fn new(
        device: Device,
        stages: Vec<ShaderStage>,
        fb_layout: FramebufferLayout,
        settings: GraphicsPipelineSettings,
        vertex_input: VertexInputState,
    ) -> Result<Self, PipelineLayoutError> {
        let layout = PipelineLayout::new(device.clone(), &stages)?;
        Ok(GraphicsPipeline {
            core: PipelineCore::new(device, layout),
            stages,
            settings,
            vertex_input,
            fb_layout,
            render_pass: None,
            pipeline: None,
            attached: None,
        })
    }

    pub fn layout(&self) -> &PipelineLayout {
        self.core.layout()
    }

    pub fn framebuffer_layout(&self) -> &FramebufferLayout {
        &self.fb_layout
    }

    /// Resolves a named resource to a bind point.
    pub fn bind(&mut self, name: &str) -> Result<BindPoint<'_>, BindError> {
        self.core.bind(name)
    }

    /// Replaces the fixed-function state. The native pipeline is rebuilt on
    /// the next bind.
    pub fn set_settings(&mut self, settings: GraphicsPipelineSettings) {
        self.settings = settings;
        self.core.record_invalidation(Invalidation::pipeline());
    }

    /// Replaces the vertex input state. The native pipeline is rebuilt on
    /// the next bind.
    pub fn set_vertex_input(&mut self, vertex_input: VertexInputState) {
        self.vertex_input = vertex_input;
        self.core.record_invalidation(Invalidation::pipeline());
    }

    /// Binds descriptor sets owned outside this pipeline after its own.
    pub fn attach_external_sets(&mut self, sets: Arc<ExternalBindingSets>) {
        self.core.attach_external_sets(sets);
    }

    pub fn detach_external_sets(&mut self) -> Option<Arc<ExternalBindingSets>> {
        self.core.detach_external_sets()
    }

    /// Attaches a framebuffer whose layout must match the pipeline's.
    /// Returns the previously attached framebuffer, if any. On mismatch the
    /// rejected framebuffer is handed back inside the error.
    pub fn attach_framebuffer(
        &mut self,
        framebuffer: Framebuffer,
    ) -> Result<Option<Framebuffer>, AttachError> {
        if !framebuffer.layout().compatible(&self.fb_layout) {
            return Err(AttachError::IncompatibleFramebuffer { framebuffer });
        }
        Ok(self.attached.replace(framebuffer))
    }

    pub fn detach_framebuffer(&mut self) -> Option<Framebuffer> {
        self.attached.take()
    }

    pub fn framebuffer(&self) -> Option<&Framebuffer> {
        self.attached.as_ref()
    }

    pub fn framebuffer_mut(&mut self) -> Option<&mut Framebuffer> {
        self.attached.as_mut()
    }

    /// Brings all native state up to date and produces the bind command.
    ///
    /// This is where lazy recreation happens: staged descriptor writes are
    /// flushed, invalidated set layouts and binding sets are rebuilt, and
    /// the native pipeline is (re)created if anything it bakes in changed.
    /// Superseded objects are retired at the device's current submission
    /// generation.
    pub fn cmd_bind(&mut self) -> Result<PipelineBindCommand, PipelineBindError> {
        let device = self.core.device().clone();
        let pipeline_dirty = self.core.prebind_update()?;

        let framebuffer = self
            .attached
            .as_mut()
            .ok_or(PipelineBindError::NoAttachedFramebuffer)?;
        framebuffer.update()?;
        let fb_handle = framebuffer
            .handle()
            .ok_or(PipelineBindError::IncompleteFramebuffer)?;
        let render_area = framebuffer.render_area();
        let clear_values = framebuffer.clear_values().to_vec();

        let render_pass = match self.render_pass {
            Some(render_pass) => render_pass,
            None => {
                let render_pass = device
                    .backend()
                    .create_render_pass(&self.fb_layout.render_pass_desc())?;
                self.render_pass = Some(render_pass);
                render_pass
            }
        };
        let layout_handle = self.core.layout_mut().ensure_native()?;

        let pipeline = if let (Some(pipeline), false) = (self.pipeline, pipeline_dirty) {
            pipeline
        } else {
            if let Some(old) = self.pipeline.take() {
                device.retire(RetiredResource::Pipeline(old));
            }
            let (specialization_entries, specialization_data) =
                self.core.layout().specialization_entries();
            let desc = GraphicsPipelineDesc {
                stages: self
                    .stages
                    .iter()
                    .map(|s| ShaderStageDesc {
                        stage: s.stage,
                        module: s.module,
                        entry_point: s.entry_point.clone(),
                    })
                    .collect(),
                layout: layout_handle,
                render_pass,
                vertex_bindings: self.vertex_input.bindings.clone(),
                vertex_attributes: self.vertex_input.attributes.clone(),
                viewport: self.settings.viewport,
                scissor: self.settings.scissor,
                topology: self.settings.topology,
                rasterizer: self.settings.rasterizer,
                depth: self.settings.depth,
                attachment_blend: self.fb_layout.attachment_blends(),
                blend_constants: self.settings.blend_constants,
                specialization_entries,
                specialization_data,
            };
            let pipeline = device.backend().create_graphics_pipeline(&desc)?;
            self.pipeline = Some(pipeline);
            pipeline
        };

        let mut ops = self.core.bind_set_ops(layout_handle);
        ops.push(RecordedOp::BeginRenderPass {
            render_pass,
            framebuffer: fb_handle,
            render_area,
            clear_values,
        });
        ops.push(RecordedOp::BindPipeline {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            pipeline,
        });
        let push = self.core.layout().push_constants();
        if !push.is_empty() {
            ops.push(RecordedOp::PushConstants {
                layout: layout_handle,
                stages: push.stages(),
                offset: 0,
                data: push.data().to_vec(),
            });
        }
        Ok(PipelineBindCommand { ops })
    }

    /// The command ending the pipeline's render pass.
    pub fn cmd_unbind(&self) -> PipelineUnbindCommand {
        PipelineUnbindCommand
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        let device = self.core.device().clone();
        if let Some(pipeline) = self.pipeline.take() {
            device.retire(RetiredResource::Pipeline(pipeline));
        }
        if let Some(render_pass) = self.render_pass.take() {
            device.retire(RetiredResource::RenderPass(render_pass));
        }
    }
}

/// The recorded operations binding a graphics pipeline.
#[derive(Debug)]
pub struct PipelineBindCommand {
    ops: Vec<RecordedOp>,
}

impl PipelineBindCommand {
    pub fn ops(&self) -> &[RecordedOp] {
        &self.ops
    }
}

impl Command for PipelineBindCommand {
    fn record(self, recorder: &mut CommandRecorder) {
        for op in self.ops {
            recorder.push(op);
        }
    }
}

/// Ends the render pass begun by [`PipelineBindCommand`].
#[derive(Debug)]
pub struct PipelineUnbindCommand;

impl Command for PipelineUnbindCommand {
    fn record(self, recorder: &mut CommandRecorder) {
        recorder.push(RecordedOp::EndRenderPass);
    }
}
