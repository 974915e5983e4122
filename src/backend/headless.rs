//! A backend without a driver behind it.
//!
//! `Headless` hands out unique handles from an atomic counter and records
//! how many objects of each kind were created and destroyed. It exists so
//! that the whole layer above it can run (and test itself) on machines
//! without a GPU: lazy-recreation logic, pool bookkeeping and deferred
//! deletion are all observable through [`Headless::stats`].

use super::{
    Backend, BackendError, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FramebufferHandle, GraphicsPipelineDesc, ImageViewHandle, PipelineHandle,
    PipelineLayoutHandle, RenderPassDesc, RenderPassHandle, ShaderModuleHandle,
};
use crate::descriptor_set::{DescriptorWrite, SetLayoutBinding};
use ash::vk;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Creation/destruction tallies per object kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectStats {
    pub created: u64,
    pub destroyed: u64,
}

impl ObjectStats {
    /// Number of objects currently alive.
    pub fn live(&self) -> u64 {
        self.created - self.destroyed
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeadlessStats {
    pub shader_modules: ObjectStats,
    pub descriptor_set_layouts: ObjectStats,
    pub descriptor_pools: ObjectStats,
    pub descriptor_sets_allocated: u64,
    pub descriptor_writes: u64,
    pub pipeline_layouts: ObjectStats,
    pub render_passes: ObjectStats,
    pub pipelines: ObjectStats,
    pub framebuffers: ObjectStats,
}

#[derive(Debug, Default)]
pub struct Headless {
    next_handle: AtomicU64,
    stats: Mutex<HeadlessStats>,
    // Sizes requested for the most recently created descriptor pool.
    last_pool_sizes: Mutex<Vec<(vk::DescriptorType, u32)>>,
}

impl Headless {
    pub fn new() -> Self {
        Headless::default()
    }

    /// A snapshot of the creation/destruction tallies.
    pub fn stats(&self) -> HeadlessStats {
        self.stats.lock().clone()
    }

    /// The `(type, count)` sizes of the most recently created descriptor
    /// pool.
    pub fn last_pool_sizes(&self) -> Vec<(vk::DescriptorType, u32)> {
        self.last_pool_sizes.lock().clone()
    }

    fn next(&self) -> u64 {
        // Handles start at 1; 0 stays recognizable as "never a handle".
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Backend for Headless {
    fn create_shader_module(&self, _words: &[u32]) -> Result<ShaderModuleHandle, BackendError> {
        self.stats.lock().shader_modules.created += 1;
        Ok(ShaderModuleHandle(self.next()))
    }

    fn destroy_shader_module(&self, _module: ShaderModuleHandle) {
        self.stats.lock().shader_modules.destroyed += 1;
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[SetLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, BackendError> {
        self.stats.lock().descriptor_set_layouts.created += 1;
        Ok(DescriptorSetLayoutHandle(self.next()))
    }

    fn destroy_descriptor_set_layout(&self, _layout: DescriptorSetLayoutHandle) {
        self.stats.lock().descriptor_set_layouts.destroyed += 1;
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<DescriptorPoolHandle, BackendError> {
        self.stats.lock().descriptor_pools.created += 1;
        *self.last_pool_sizes.lock() = pool_sizes
            .iter()
            .map(|s| (s.ty, s.descriptor_count))
            .collect();
        Ok(DescriptorPoolHandle(self.next()))
    }

    fn destroy_descriptor_pool(&self, _pool: DescriptorPoolHandle) {
        self.stats.lock().descriptor_pools.destroyed += 1;
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: DescriptorPoolHandle,
        layouts: &[DescriptorSetLayoutHandle],
    ) -> Result<Vec<DescriptorSetHandle>, BackendError> {
        self.stats.lock().descriptor_sets_allocated += layouts.len() as u64;
        Ok(layouts
            .iter()
            .map(|_| DescriptorSetHandle(self.next()))
            .collect())
    }

    fn update_descriptor_set(&self, _set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        self.stats.lock().descriptor_writes += writes.len() as u64;
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[DescriptorSetLayoutHandle],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<PipelineLayoutHandle, BackendError> {
        self.stats.lock().pipeline_layouts.created += 1;
        Ok(PipelineLayoutHandle(self.next()))
    }

    fn destroy_pipeline_layout(&self, _layout: PipelineLayoutHandle) {
        self.stats.lock().pipeline_layouts.destroyed += 1;
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> Result<RenderPassHandle, BackendError> {
        self.stats.lock().render_passes.created += 1;
        Ok(RenderPassHandle(self.next()))
    }

    fn destroy_render_pass(&self, _render_pass: RenderPassHandle) {
        self.stats.lock().render_passes.destroyed += 1;
    }

    fn create_graphics_pipeline(
        &self,
        _desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineHandle, BackendError> {
        self.stats.lock().pipelines.created += 1;
        Ok(PipelineHandle(self.next()))
    }

    fn destroy_pipeline(&self, _pipeline: PipelineHandle) {
        self.stats.lock().pipelines.destroyed += 1;
    }

    fn create_framebuffer(
        &self,
        _render_pass: RenderPassHandle,
        _attachments: &[ImageViewHandle],
        _extent: [u32; 2],
    ) -> Result<FramebufferHandle, BackendError> {
        self.stats.lock().framebuffers.created += 1;
        Ok(FramebufferHandle(self.next()))
    }

    fn destroy_framebuffer(&self, _framebuffer: FramebufferHandle) {
        self.stats.lock().framebuffers.destroyed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let backend = Headless::new();
        let a = backend.create_shader_module(&[]).unwrap();
        let b = backend.create_shader_module(&[]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn stats_track_live_objects() {
        let backend = Headless::new();
        let rp = backend.create_render_pass(&RenderPassDesc::default()).unwrap();
        assert_eq!(backend.stats().render_passes.live(), 1);
        backend.destroy_render_pass(rp);
        assert_eq!(backend.stats().render_passes.live(), 0);
    }
}
