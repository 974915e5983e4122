//! Recording of binding and render-pass commands.
//!
//! The layer does not talk to a live command buffer; instead every bind
//! operation produces a [`Command`] value whose [`record`](Command::record)
//! call appends the concrete [`RecordedOp`]s to a [`CommandRecorder`]. A
//! submission layer above this crate translates the recorded ops into actual
//! API calls; tests inspect them directly.

use crate::{
    backend::{DescriptorSetHandle, FramebufferHandle, PipelineHandle, PipelineLayoutHandle,
        RenderPassHandle},
    render_pass::ClearValue,
};
use ash::vk;

/// One low-level operation as it would be recorded into a command buffer.
#[derive(Clone, Debug)]
pub enum RecordedOp {
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        render_area: vk::Rect2D,
        clear_values: Vec<ClearValue>,
    },
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: PipelineHandle,
    },
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    EndRenderPass,
}

/// Something that knows how to append itself to a recorder.
pub trait Command {
    fn record(self, recorder: &mut CommandRecorder);
}

/// An ordered list of [`RecordedOp`]s.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    ops: Vec<RecordedOp>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        CommandRecorder::default()
    }

    pub fn push(&mut self, op: RecordedOp) {
        self.ops.push(op);
    }

    pub fn record(&mut self, command: impl Command) {
        command.record(self);
    }

    pub fn ops(&self) -> &[RecordedOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<RecordedOp> {
        self.ops
    }
}
