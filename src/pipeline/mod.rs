//! Pipelines: layout aggregation, named bind points and lazy recreation of
//! native state.
//!
//! A pipeline owns a [`PipelineLayout`] merged from the reflected bindings
//! of its stages, a staging queue of descriptor writes, and the binding
//! sets currently backing its descriptor sets. Mutations (specializing a
//! constant, assigning a resource) never touch native objects directly;
//! they record an [`Invalidation`] that the next bind consumes, rebuilding
//! exactly the state it names. Superseded native objects go to the device's
//! deferred-deletion queue.

pub mod bind_point;
pub mod binding_queue;
pub mod graphics;
pub mod layout;

pub use bind_point::BindPoint;
pub use binding_queue::ResourceBindingQueue;
pub use graphics::GraphicsPipeline;
pub use layout::{PipelineLayout, PipelineLayoutError};

use crate::{
    backend::{BackendError, DescriptorSetHandle, PipelineLayoutHandle},
    command_buffer::RecordedOp,
    deferred::RetiredResource,
    descriptor_set::BindingSet,
    device::Device,
    render_pass::FramebufferError,
};
use ash::vk;
use smallvec::SmallVec;
use std::{
    collections::BTreeMap,
    error, fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Native state rendered stale by a mutation.
///
/// Returned by every mutating layout call; the caller merges it into the
/// pipeline's pending invalidation, which the next bind consumes.
#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invalidation {
    sets: SmallVec<[u32; 4]>,
    pipeline: bool,
}

impl Invalidation {
    /// Nothing became stale.
    pub fn none() -> Self {
        Invalidation::default()
    }

    /// Only the native pipeline object must be rebuilt.
    pub fn pipeline() -> Self {
        Invalidation {
            sets: SmallVec::new(),
            pipeline: true,
        }
    }

    /// The named sets and the pipeline object must be rebuilt.
    pub fn sets(sets: impl IntoIterator<Item = u32>) -> Self {
        Invalidation {
            sets: sets.into_iter().collect(),
            pipeline: true,
        }
    }

    pub fn merge(&mut self, other: Invalidation) {
        for set in other.sets {
            if !self.sets.contains(&set) {
                self.sets.push(set);
            }
        }
        self.pipeline |= other.pipeline;
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && !self.pipeline
    }

    pub fn invalidated_sets(&self) -> &[u32] {
        &self.sets
    }

    pub fn invalidates_pipeline(&self) -> bool {
        self.pipeline
    }
}

/// Error resolving or assigning a named resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindError {
    /// No binding, push-constant path or specialization constant has this
    /// name.
    UnknownResourceName(String),
    /// The resource exists but cannot accept this kind of assignment.
    IncompatibleBindType(String),
    /// A value's size does not match the variable it is assigned to.
    SizeMismatch {
        name: String,
        expected: u32,
        provided: u32,
    },
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::UnknownResourceName(name) => {
                write!(f, "no resource named \"{}\"", name)
            }
            BindError::IncompatibleBindType(name) => {
                write!(f, "resource \"{}\" cannot be bound this way", name)
            }
            BindError::SizeMismatch {
                name,
                expected,
                provided,
            } => write!(
                f,
                "value for \"{}\" is {} bytes, expected {}",
                name, provided, expected
            ),
        }
    }
}

impl error::Error for BindError {}

/// Error producing the bind commands of a pipeline.
#[derive(Debug)]
pub enum PipelineBindError {
    /// The pipeline has no framebuffer attached.
    NoAttachedFramebuffer,
    /// The attached framebuffer is missing attachments and cannot build
    /// native state.
    IncompleteFramebuffer,
    /// An external binding set has writes or an invalidation pending; its
    /// owner must update it before this pipeline can bind.
    ExternalSetOutOfDate,
    /// The attached framebuffer failed to build its native state.
    Framebuffer(FramebufferError),
    Backend(BackendError),
}

impl fmt::Display for PipelineBindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineBindError::NoAttachedFramebuffer => {
                write!(f, "no framebuffer is attached to the pipeline")
            }
            PipelineBindError::IncompleteFramebuffer => {
                write!(f, "the attached framebuffer is missing attachments")
            }
            PipelineBindError::ExternalSetOutOfDate => {
                write!(f, "an external binding set is out of date")
            }
            PipelineBindError::Framebuffer(err) => write!(f, "{}", err),
            PipelineBindError::Backend(err) => write!(f, "{}", err),
        }
    }
}

impl error::Error for PipelineBindError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            PipelineBindError::Framebuffer(err) => Some(err),
            PipelineBindError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for PipelineBindError {
    fn from(err: BackendError) -> Self {
        PipelineBindError::Backend(err)
    }
}

impl From<FramebufferError> for PipelineBindError {
    fn from(err: FramebufferError) -> Self {
        PipelineBindError::Framebuffer(err)
    }
}

/// Descriptor sets owned and updated outside the pipeline, bound after the
/// pipeline's own sets.
///
/// The owner flags pending writes and invalidations; a pipeline refuses to
/// bind while either flag is raised, since binding stale external sets is
/// never recoverable on the pipeline's side.
#[derive(Debug)]
pub struct ExternalBindingSets {
    sets: Vec<DescriptorSetHandle>,
    pending_writes: AtomicBool,
    invalidated: AtomicBool,
}

impl ExternalBindingSets {
    pub fn new(sets: Vec<DescriptorSetHandle>) -> Self {
        ExternalBindingSets {
            sets,
            pending_writes: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn handles(&self) -> &[DescriptorSetHandle] {
        &self.sets
    }

    /// Flags that descriptor writes against these sets are queued.
    pub fn mark_pending_writes(&self) {
        self.pending_writes.store(true, Ordering::Release);
    }

    /// Flags that the sets' layout or contents were invalidated.
    pub fn mark_invalidated(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    /// Clears both flags once the owner has brought the sets up to date.
    pub fn mark_updated(&self) {
        self.pending_writes.store(false, Ordering::Release);
        self.invalidated.store(false, Ordering::Release);
    }

    pub fn is_up_to_date(&self) -> bool {
        !self.pending_writes.load(Ordering::Acquire) && !self.invalidated.load(Ordering::Acquire)
    }
}

/// State shared by every pipeline flavor: the layout, the staged writes and
/// the binding sets backing the descriptor sets.
#[derive(Debug)]
pub struct PipelineCore {
    device: Device,
    layout: PipelineLayout,
    binding_queue: ResourceBindingQueue,
    binding_sets: BTreeMap<u32, BindingSet>,
    external_sets: Option<Arc<ExternalBindingSets>>,
    pending: Invalidation,
}

impl PipelineCore {
    pub fn new(device: Device, layout: PipelineLayout) -> Self {
        PipelineCore {
            device,
            layout,
            binding_queue: ResourceBindingQueue::new(),
            binding_sets: BTreeMap::new(),
            external_sets: None,
            pending: Invalidation::none(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    pub fn attach_external_sets(&mut self, sets: Arc<ExternalBindingSets>) {
        self.external_sets = Some(sets);
    }

    pub fn detach_external_sets(&mut self) -> Option<Arc<ExternalBindingSets>> {
        self.external_sets.take()
    }

    pub(crate) fn record_invalidation(&mut self, invalidation: Invalidation) {
        self.pending.merge(invalidation);
    }

    /// Brings descriptor state up to date for the next bind.
    ///
    /// Consumes the pending invalidation: rebuilds the set layouts it
    /// names, reallocates their binding sets from the device pool (retiring
    /// the superseded ones), and flushes the staged descriptor writes.
    /// Returns whether the native pipeline object itself must be rebuilt.
    pub(crate) fn prebind_update(&mut self) -> Result<bool, PipelineBindError> {
        if let Some(external) = &self.external_sets {
            if !external.is_up_to_date() {
                return Err(PipelineBindError::ExternalSetOutOfDate);
            }
        }

        let pending = mem::take(&mut self.pending);

        for set_idx in pending.invalidated_sets() {
            log::debug!("rebuilding descriptor set {} after invalidation", set_idx);
            self.layout.rebuild_set_layout(*set_idx)?;
            // Writes staged against the old layout may target slots the new
            // one no longer has.
            self.binding_queue.remove_set(*set_idx);
            if let Some(old) = self.binding_sets.remove(set_idx) {
                self.device.retire(RetiredResource::BindingSet(old));
            }
        }
        if !pending.invalidated_sets().is_empty() {
            self.layout.invalidate_native();
        }

        // Allocate binding sets for every set that lacks one, in a single
        // pool.
        let missing: Vec<u32> = self
            .layout
            .set_indices()
            .filter(|set_idx| !self.binding_sets.contains_key(set_idx))
            .collect();
        if !missing.is_empty() {
            let layouts: Vec<_> = missing
                .iter()
                .filter_map(|set_idx| self.layout.set_layout(*set_idx))
                .collect();
            let sets = self
                .device
                .binding_set_pool()
                .allocate_binding_sets(&layouts)?;
            for set in sets {
                self.binding_sets.insert(set.set_idx(), set);
            }
        }

        // Flush staged writes.
        let writes: Vec<_> = self.binding_queue.drain().collect();
        for (set_idx, writes) in writes {
            if let Some(set) = self.binding_sets.get(&set_idx) {
                self.device
                    .backend()
                    .update_descriptor_set(set.handle(), &writes);
            }
        }

        Ok(pending.invalidates_pipeline())
    }

    /// The descriptor-set bind operations for the current state: the
    /// pipeline's own sets first, external sets directly after them.
    pub(crate) fn bind_set_ops(&mut self, layout: PipelineLayoutHandle) -> Vec<RecordedOp> {
        let mut ops = Vec::new();
        let own: Vec<DescriptorSetHandle> =
            self.binding_sets.values().map(|s| s.handle()).collect();
        let own_count = own.len() as u32;
        if !own.is_empty() {
            ops.push(RecordedOp::BindDescriptorSets {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set: 0,
                sets: own,
            });
        }
        if let Some(external) = &self.external_sets {
            if !external.handles().is_empty() {
                ops.push(RecordedOp::BindDescriptorSets {
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    first_set: own_count,
                    sets: external.handles().to_vec(),
                });
            }
        }
        ops
    }

    pub(crate) fn queue_write(
        &mut self,
        set_idx: u32,
        write: crate::descriptor_set::DescriptorWrite,
    ) {
        self.binding_queue.push(set_idx, write);
    }

    pub(crate) fn layout_mut(&mut self) -> &mut PipelineLayout {
        &mut self.layout
    }
}

impl Drop for PipelineCore {
    fn drop(&mut self) {
        for (_, set) in mem::take(&mut self.binding_sets) {
            self.device.retire(RetiredResource::BindingSet(set));
        }
    }
}
