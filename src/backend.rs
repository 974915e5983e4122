//! The narrow interface through which the layer reaches the low-level
//! graphics API.
//!
//! Everything above this module manipulates opaque handles; only a `Backend`
//! implementation knows what they stand for. The [`Headless`] backend
//! implements the trait without any driver and additionally counts object
//! creations and destructions, so tests can observe native-object churn.

pub mod headless;

use crate::descriptor_set::{DescriptorWrite, SetLayoutBinding};
use ash::vk;
use std::{error, fmt};

pub use headless::Headless;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// The raw handle value.
            #[inline]
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// A compiled shader module owned by the backend.
    ShaderModuleHandle
);
opaque_handle!(
    /// A native descriptor-set layout.
    DescriptorSetLayoutHandle
);
opaque_handle!(
    /// A native descriptor pool.
    DescriptorPoolHandle
);
opaque_handle!(
    /// A native descriptor set, allocated from a pool.
    DescriptorSetHandle
);
opaque_handle!(
    /// A native pipeline layout.
    PipelineLayoutHandle
);
opaque_handle!(
    /// A native render pass.
    RenderPassHandle
);
opaque_handle!(
    /// A native pipeline object.
    PipelineHandle
);
opaque_handle!(
    /// A native framebuffer object.
    FramebufferHandle
);
opaque_handle!(
    /// An image view supplied by the caller as a framebuffer attachment or a
    /// descriptor resource.
    ImageViewHandle
);
opaque_handle!(
    /// A buffer supplied by the caller as a descriptor resource.
    BufferHandle
);
opaque_handle!(
    /// A sampler supplied by the caller as a descriptor resource.
    SamplerHandle
);

/// One shader stage of a pipeline, as handed to the backend.
#[derive(Clone, Debug)]
pub struct ShaderStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub module: ShaderModuleHandle,
    pub entry_point: String,
}

/// One attachment of a render pass.
#[derive(Clone, Copy, Debug)]
pub struct RenderPassAttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub is_depth: bool,
}

/// Description of a render pass compatible with a framebuffer layout.
#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<RenderPassAttachmentDesc>,
}

/// Rasterizer configuration of a graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        RasterizerState {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
        }
    }
}

/// Depth-test configuration of a graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        DepthState {
            test_enable: false,
            write_enable: false,
            compare_op: vk::CompareOp::LESS_OR_EQUAL,
        }
    }
}

/// Blend configuration for one color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentBlend {
    pub enable: bool,
    pub src_color_factor: vk::BlendFactor,
    pub dst_color_factor: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha_factor: vk::BlendFactor,
    pub dst_alpha_factor: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
}

impl Default for AttachmentBlend {
    fn default() -> Self {
        AttachmentBlend {
            enable: false,
            src_color_factor: vk::BlendFactor::ONE,
            dst_color_factor: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha_factor: vk::BlendFactor::ONE,
            dst_alpha_factor: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
        }
    }
}

/// Everything the backend needs to build a graphics pipeline object.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub stages: Vec<ShaderStageDesc>,
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub topology: vk::PrimitiveTopology,
    pub rasterizer: RasterizerState,
    pub depth: DepthState,
    /// One entry per non-depth attachment of the target framebuffer layout,
    /// in location order.
    pub attachment_blend: Vec<AttachmentBlend>,
    pub blend_constants: [f32; 4],
    /// Serialized specialization-constant map: `(constant_id, offset, size)`
    /// entries into `specialization_data`.
    pub specialization_entries: Vec<vk::SpecializationMapEntry>,
    pub specialization_data: Vec<u8>,
}

/// The narrow device interface.
///
/// Creation methods may fail with a [`BackendError`]; destruction methods are
/// infallible, as there is nothing a caller could do about a failing
/// destroy. Handles passed to a destroy method must have been created by the
/// same backend and must not be used afterwards.
pub trait Backend: Send + Sync + fmt::Debug {
    fn create_shader_module(&self, words: &[u32]) -> Result<ShaderModuleHandle, BackendError>;
    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[SetLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, BackendError>;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<DescriptorPoolHandle, BackendError>;
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Allocates one descriptor set per given layout out of `pool`.
    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layouts: &[DescriptorSetLayoutHandle],
    ) -> Result<Vec<DescriptorSetHandle>, BackendError>;

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<PipelineLayoutHandle, BackendError>;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassHandle, BackendError>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineHandle, BackendError>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: [u32; 2],
    ) -> Result<FramebufferHandle, BackendError>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);
}

/// Error reported by a backend when native object creation fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// No more host memory is available.
    OutOfHostMemory,
    /// No more device memory is available.
    OutOfDeviceMemory,
    /// The driver rejected the creation of the named object kind.
    CreationFailed(&'static str),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::OutOfHostMemory => write!(f, "out of host memory"),
            BackendError::OutOfDeviceMemory => write!(f, "out of device memory"),
            BackendError::CreationFailed(object) => {
                write!(f, "the backend failed to create a {}", object)
            }
        }
    }
}

impl error::Error for BackendError {}
