//! Reference-counted pooling of binding sets.
//!
//! Every allocation call creates one native descriptor pool sized exactly
//! for the requested layouts and allocates all sets out of it. The pool
//! registry only holds weak references; each [`BindingSet`] holds a strong
//! reference to its pool instance, so the native pool is destroyed exactly
//! when the last set allocated from it is released, no matter which thread
//! releases it.

use super::SetLayout;
use crate::backend::{Backend, BackendError, DescriptorPoolHandle, DescriptorSetHandle};
use ash::vk;
use foldhash::HashMap;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

type Registry = Mutex<HashMap<u64, Weak<PoolInstance>>>;

/// Allocator of binding sets backed by per-allocation native pools.
#[derive(Debug)]
pub struct BindingSetPool {
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    next_key: AtomicU64,
}

impl BindingSetPool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        BindingSetPool {
            backend,
            registry: Arc::new(Mutex::new(HashMap::default())),
            next_key: AtomicU64::new(0),
        }
    }

    /// Allocates one binding set per layout, all from a fresh native pool
    /// sized exactly for them.
    pub fn allocate_binding_sets(
        &self,
        layouts: &[&SetLayout],
    ) -> Result<Vec<BindingSet>, BackendError> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }

        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for layout in layouts {
            for size in layout.descriptor_counts() {
                match sizes.iter_mut().find(|s| s.ty == size.ty) {
                    Some(existing) => existing.descriptor_count += size.descriptor_count,
                    None => sizes.push(size),
                }
            }
        }

        let pool = self
            .backend
            .create_descriptor_pool(layouts.len() as u32, &sizes)?;
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "descriptor pool {}: {} sets, {} descriptor types",
            key,
            layouts.len(),
            sizes.len()
        );
        let instance = Arc::new(PoolInstance {
            key,
            pool,
            backend: Arc::clone(&self.backend),
            registry: Arc::downgrade(&self.registry),
        });
        self.registry.lock().insert(key, Arc::downgrade(&instance));

        // On allocation failure the instance drops here, deregistering the
        // key and destroying the native pool.
        let layout_handles: Vec<_> = layouts.iter().map(|l| l.handle()).collect();
        let set_handles = self
            .backend
            .allocate_descriptor_sets(pool, &layout_handles)?;

        Ok(layouts
            .iter()
            .zip(set_handles)
            .map(|(layout, handle)| BindingSet {
                set_idx: layout.set_idx(),
                handle,
                pool: Arc::clone(&instance),
            })
            .collect())
    }

    /// Whether a pool with this key is still alive.
    pub fn contains_key(&self, key: u64) -> bool {
        self.registry
            .lock()
            .get(&key)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Number of pool instances currently registered.
    pub fn registered_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// One native descriptor pool shared by the sets allocated from it.
#[derive(Debug)]
struct PoolInstance {
    key: u64,
    pool: DescriptorPoolHandle,
    backend: Arc<dyn Backend>,
    registry: Weak<Registry>,
}

impl Drop for PoolInstance {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.key);
        }
        self.backend.destroy_descriptor_pool(self.pool);
    }
}

/// A binding set holding its pool alive.
#[derive(Debug)]
pub struct BindingSet {
    set_idx: u32,
    handle: DescriptorSetHandle,
    pool: Arc<PoolInstance>,
}

impl BindingSet {
    pub fn set_idx(&self) -> u32 {
        self.set_idx
    }

    pub fn handle(&self) -> DescriptorSetHandle {
        self.handle
    }

    /// The registry key of the pool this set was allocated from.
    pub fn pool_key(&self) -> u64 {
        self.pool.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::Headless,
        shader::{Binding, BindingKind, BlockLayout, Variable, VariableLayout},
    };

    fn block_binding(bind_idx: u32) -> Binding {
        Binding {
            set_idx: 0,
            bind_idx,
            kind: BindingKind::Uniform,
            block_layout: BlockLayout::Std140,
            variable: Variable {
                name: format!("b{}", bind_idx),
                offset: 0,
                layout: VariableLayout::Struct { members: vec![] },
                default_value: None,
            },
        }
    }

    fn layout(backend: &dyn Backend, set_idx: u32) -> SetLayout {
        let binding = block_binding(0);
        SetLayout::new(
            backend,
            set_idx,
            &[(vk::ShaderStageFlags::VERTEX, &binding)],
        )
        .unwrap()
    }

    #[test]
    fn pool_lives_until_the_last_set_is_released() {
        let backend = Arc::new(Headless::new());
        let pool = BindingSetPool::new(backend.clone());

        let l0 = layout(backend.as_ref(), 0);
        let l1 = layout(backend.as_ref(), 1);
        let mut sets = pool.allocate_binding_sets(&[&l0, &l1]).unwrap();
        assert_eq!(sets.len(), 2);
        let key = sets[0].pool_key();
        assert_eq!(sets[1].pool_key(), key);
        assert!(pool.contains_key(key));

        sets.pop();
        assert!(pool.contains_key(key));
        assert_eq!(backend.stats().descriptor_pools.destroyed, 0);

        sets.pop();
        assert!(!pool.contains_key(key));
        assert_eq!(pool.registered_count(), 0);
        assert_eq!(backend.stats().descriptor_pools.destroyed, 1);
    }

    #[test]
    fn each_allocation_uses_a_fresh_pool() {
        let backend = Arc::new(Headless::new());
        let pool = BindingSetPool::new(backend.clone());
        let l0 = layout(backend.as_ref(), 0);

        let a = pool.allocate_binding_sets(&[&l0]).unwrap();
        let b = pool.allocate_binding_sets(&[&l0]).unwrap();
        assert_ne!(a[0].pool_key(), b[0].pool_key());
        assert_eq!(pool.registered_count(), 2);
    }

    #[test]
    fn pools_are_sized_exactly_for_their_layouts() {
        let backend = Arc::new(Headless::new());
        let pool = BindingSetPool::new(backend.clone());
        let l0 = layout(backend.as_ref(), 0);
        let l1 = layout(backend.as_ref(), 1);

        let _sets = pool.allocate_binding_sets(&[&l0, &l1]).unwrap();
        assert_eq!(
            backend.last_pool_sizes(),
            vec![(vk::DescriptorType::UNIFORM_BUFFER, 2)]
        );
    }

    #[test]
    fn concurrent_allocation_and_release() {
        let backend = Arc::new(Headless::new());
        let pool = BindingSetPool::new(backend.clone());
        let l0 = layout(backend.as_ref(), 0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..32 {
                        let sets = pool.allocate_binding_sets(&[&l0]).unwrap();
                        assert!(pool.contains_key(sets[0].pool_key()));
                        drop(sets);
                    }
                });
            }
        });

        assert_eq!(pool.registered_count(), 0);
        let stats = backend.stats();
        assert_eq!(stats.descriptor_pools.created, 8 * 32);
        assert_eq!(
            stats.descriptor_pools.created,
            stats.descriptor_pools.destroyed
        );
    }
}
