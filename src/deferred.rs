//! Deferred deletion of native objects.
//!
//! A pipeline or framebuffer that rebuilds one of its native objects cannot
//! destroy the superseded object inline: a previously recorded command buffer
//! may still reference it on the GPU. Instead the object is retired into a
//! [`ResourceDisposer`] together with the submission generation that was
//! current at retirement. Once the caller learns that a generation has
//! completed on the device, draining the disposer destroys every retired
//! object whose generation is less than or equal to the completed one.

use crate::{
    backend::{
        Backend, DescriptorSetLayoutHandle, FramebufferHandle, PipelineHandle,
        PipelineLayoutHandle, RenderPassHandle, ShaderModuleHandle,
    },
    descriptor_set::BindingSet,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A native object waiting for its last referencing submission to complete.
#[derive(Debug)]
pub enum RetiredResource {
    ShaderModule(ShaderModuleHandle),
    DescriptorSetLayout(DescriptorSetLayoutHandle),
    PipelineLayout(PipelineLayoutHandle),
    RenderPass(RenderPassHandle),
    Pipeline(PipelineHandle),
    Framebuffer(FramebufferHandle),
    /// Dropping the set releases its pool reference; the pool itself is
    /// destroyed by the last set released from it.
    BindingSet(BindingSet),
}

impl RetiredResource {
    fn destroy(self, backend: &dyn Backend) {
        match self {
            RetiredResource::ShaderModule(h) => backend.destroy_shader_module(h),
            RetiredResource::DescriptorSetLayout(h) => backend.destroy_descriptor_set_layout(h),
            RetiredResource::PipelineLayout(h) => backend.destroy_pipeline_layout(h),
            RetiredResource::RenderPass(h) => backend.destroy_render_pass(h),
            RetiredResource::Pipeline(h) => backend.destroy_pipeline(h),
            RetiredResource::Framebuffer(h) => backend.destroy_framebuffer(h),
            RetiredResource::BindingSet(set) => drop(set),
        }
    }
}

/// FIFO of retired native objects, ordered by submission generation.
///
/// Generations are pushed in non-decreasing order, so draining can stop at
/// the first entry whose generation is still outstanding.
#[derive(Debug, Default)]
pub struct ResourceDisposer {
    queue: Mutex<VecDeque<(RetiredResource, u64)>>,
}

impl ResourceDisposer {
    pub fn new() -> Self {
        ResourceDisposer::default()
    }

    /// Queues `resource` for destruction once `generation` has completed.
    pub fn retire(&self, resource: RetiredResource, generation: u64) {
        let mut queue = self.queue.lock();
        debug_assert!(queue.back().is_none_or(|(_, g)| *g <= generation));
        queue.push_back((resource, generation));
    }

    /// Destroys every retired object whose generation is `<= completed`.
    pub fn drain_completed(&self, completed: u64, backend: &dyn Backend) {
        let mut destroyed = 0usize;
        loop {
            // The lock is not held across destroy; a retire from another
            // thread may interleave, which is fine.
            let resource = {
                let mut queue = self.queue.lock();
                match queue.front() {
                    Some((_, generation)) if *generation <= completed => {
                        queue.pop_front().map(|(r, _)| r)
                    }
                    _ => None,
                }
            };
            match resource {
                Some(resource) => {
                    resource.destroy(backend);
                    destroyed += 1;
                }
                None => break,
            }
        }
        if destroyed > 0 {
            log::trace!(
                "destroyed {} retired objects up to generation {}",
                destroyed,
                completed
            );
        }
    }

    /// Number of objects still waiting for their generation to complete.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Headless;

    #[test]
    fn drains_only_completed_generations() {
        let backend = Headless::new();
        let disposer = ResourceDisposer::new();

        let p1 = backend.create_render_pass(&Default::default()).unwrap();
        let p2 = backend.create_render_pass(&Default::default()).unwrap();
        disposer.retire(RetiredResource::RenderPass(p1), 1);
        disposer.retire(RetiredResource::RenderPass(p2), 3);

        disposer.drain_completed(2, &backend);
        assert_eq!(backend.stats().render_passes.destroyed, 1);
        assert_eq!(disposer.pending(), 1);

        disposer.drain_completed(3, &backend);
        assert_eq!(backend.stats().render_passes.destroyed, 2);
        assert_eq!(disposer.pending(), 0);
    }

    #[test]
    fn drain_preserves_retirement_order() {
        let backend = Headless::new();
        let disposer = ResourceDisposer::new();

        let fb = backend.create_framebuffer(
            backend.create_render_pass(&Default::default()).unwrap(),
            &[],
            [1, 1],
        )
        .unwrap();
        let pipe = backend
            .create_pipeline_layout(&[], &[])
            .unwrap();
        disposer.retire(RetiredResource::Framebuffer(fb), 5);
        disposer.retire(RetiredResource::PipelineLayout(pipe), 5);

        disposer.drain_completed(4, &backend);
        assert_eq!(disposer.pending(), 2);

        disposer.drain_completed(5, &backend);
        assert_eq!(backend.stats().framebuffers.destroyed, 1);
        assert_eq!(backend.stats().pipeline_layouts.destroyed, 1);
    }
}
