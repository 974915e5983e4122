//! The device: the shared context every pipeline, framebuffer and binding
//! set hangs off.
//!
//! `Device` is a cheap clone (an `Arc` around the actual state). It owns the
//! backend, the binding-set pool and the deferred-deletion queue, and tracks
//! the submission-generation counters that drive deferred destruction.

use crate::{
    backend::{Backend, BackendError},
    deferred::{ResourceDisposer, RetiredResource},
    descriptor_set::BindingSetPool,
    shader::{reflect_bindings, spirv, ReflectError, ShaderStage},
};
use ash::vk;
use std::{
    error, fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Error loading a shader stage from SPIR-V.
#[derive(Debug)]
pub enum ShaderLoadError {
    Reflect(ReflectError),
    Backend(BackendError),
}

impl fmt::Display for ShaderLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderLoadError::Reflect(err) => write!(f, "{}", err),
            ShaderLoadError::Backend(err) => write!(f, "{}", err),
        }
    }
}

impl error::Error for ShaderLoadError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ShaderLoadError::Reflect(err) => Some(err),
            ShaderLoadError::Backend(err) => Some(err),
        }
    }
}

impl From<ReflectError> for ShaderLoadError {
    fn from(err: ReflectError) -> Self {
        ShaderLoadError::Reflect(err)
    }
}

impl From<BackendError> for ShaderLoadError {
    fn from(err: BackendError) -> Self {
        ShaderLoadError::Backend(err)
    }
}

#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    backend: Arc<dyn Backend>,
    pool: BindingSetPool,
    disposer: ResourceDisposer,
    // Monotonic counters: `submitted` advances on every submission batch,
    // `completed` trails it as the device reports batches finished.
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl Device {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let pool = BindingSetPool::new(Arc::clone(&backend));
        Device {
            inner: Arc::new(DeviceInner {
                backend,
                pool,
                disposer: ResourceDisposer::new(),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn binding_set_pool(&self) -> &BindingSetPool {
        &self.inner.pool
    }

    /// Creates a shader module from a SPIR-V binary and reflects its
    /// bindings into a stage ready for pipeline construction.
    pub fn load_shader_stage(
        &self,
        stage: vk::ShaderStageFlags,
        spirv_bytes: &[u8],
        entry_point: &str,
    ) -> Result<ShaderStage, ShaderLoadError> {
        let words = spirv::words_from_bytes(spirv_bytes).map_err(ReflectError::Parse)?;
        let bindings = reflect_bindings(&words)?;
        let module = self.backend().create_shader_module(&words)?;
        log::debug!(
            "loaded {:?} stage \"{}\": {} bindings",
            stage,
            entry_point,
            bindings.len()
        );
        Ok(ShaderStage {
            stage,
            module,
            entry_point: entry_point.to_owned(),
            bindings,
        })
    }

    /// Queues a native object for destruction once the current submission
    /// generation completes.
    pub fn retire(&self, resource: RetiredResource) {
        self.inner
            .disposer
            .retire(resource, self.current_generation());
    }

    /// The generation the next submission batch belongs to.
    pub fn current_generation(&self) -> u64 {
        self.inner.submitted.load(Ordering::Acquire)
    }

    /// Marks the start of a new submission batch and returns its generation.
    pub fn advance_generation(&self) -> u64 {
        self.inner.submitted.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Reports that every submission up to and including `generation` has
    /// finished on the device, then destroys the retired objects it covered.
    pub fn mark_completed(&self, generation: u64) {
        self.inner.completed.fetch_max(generation, Ordering::AcqRel);
        self.inner
            .disposer
            .drain_completed(generation, self.inner.backend.as_ref());
    }

    /// Number of retired objects still waiting on an outstanding generation.
    pub fn pending_retirements(&self) -> usize {
        self.inner.disposer.pending()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("submitted", &self.inner.submitted.load(Ordering::Relaxed))
            .field("completed", &self.inner.completed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        // Nothing can be in flight once the last device clone is gone.
        self.disposer
            .drain_completed(u64::MAX, self.backend.as_ref());
    }
}
