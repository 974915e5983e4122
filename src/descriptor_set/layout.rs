//! Native descriptor-set layouts built from reflected bindings.

use super::{descriptor_count_for_binding, descriptor_type_for_binding};
use crate::{
    backend::{Backend, BackendError, DescriptorSetLayoutHandle},
    shader::Binding,
};
use ash::vk;

/// One slot of a set layout, as handed to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// A native descriptor-set layout together with the slots it was built from.
///
/// The native handle is not destroyed on drop; the owning pipeline layout
/// retires it through the deferred-deletion queue when the layout is
/// superseded.
#[derive(Clone, Debug)]
pub struct SetLayout {
    set_idx: u32,
    bindings: Vec<SetLayoutBinding>,
    handle: DescriptorSetLayoutHandle,
}

impl SetLayout {
    /// Builds the native layout for one descriptor set of a pipeline.
    ///
    /// `bindings` are the pipeline's bindings of this set, each paired with
    /// the union of stages that reference it.
    pub fn new(
        backend: &dyn Backend,
        set_idx: u32,
        bindings: &[(vk::ShaderStageFlags, &Binding)],
    ) -> Result<Self, BackendError> {
        let slots: Vec<SetLayoutBinding> = bindings
            .iter()
            .map(|(stages, binding)| {
                let descriptor_type = descriptor_type_for_binding(binding)
                    .map_err(|_| BackendError::CreationFailed("descriptor set layout"))?;
                Ok(SetLayoutBinding {
                    binding: binding.bind_idx,
                    descriptor_type,
                    descriptor_count: descriptor_count_for_binding(binding),
                    stages: *stages,
                })
            })
            .collect::<Result<_, BackendError>>()?;

        SetLayout::from_slots(backend, set_idx, slots)
    }

    /// Builds the native layout from already-resolved slots, for callers
    /// that size arrays themselves.
    pub fn from_slots(
        backend: &dyn Backend,
        set_idx: u32,
        slots: Vec<SetLayoutBinding>,
    ) -> Result<Self, BackendError> {
        let handle = backend.create_descriptor_set_layout(&slots)?;
        Ok(SetLayout {
            set_idx,
            bindings: slots,
            handle,
        })
    }

    pub fn set_idx(&self) -> u32 {
        self.set_idx
    }

    pub fn bindings(&self) -> &[SetLayoutBinding] {
        &self.bindings
    }

    pub fn handle(&self) -> DescriptorSetLayoutHandle {
        self.handle
    }

    /// Descriptor counts aggregated by type, for pool sizing.
    pub fn descriptor_counts(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for slot in &self.bindings {
            match sizes.iter_mut().find(|s| s.ty == slot.descriptor_type) {
                Some(size) => size.descriptor_count += slot.descriptor_count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: slot.descriptor_type,
                    descriptor_count: slot.descriptor_count,
                }),
            }
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::Headless,
        shader::{BindingKind, BlockLayout, OpaqueKind, Variable, VariableLayout},
    };

    fn binding(bind_idx: u32, kind: BindingKind, layout: VariableLayout) -> Binding {
        Binding {
            set_idx: 0,
            bind_idx,
            kind,
            block_layout: BlockLayout::None,
            variable: Variable {
                name: format!("b{}", bind_idx),
                offset: 0,
                layout,
                default_value: None,
            },
        }
    }

    #[test]
    fn aggregates_descriptor_counts_by_type() {
        let backend = Headless::new();
        let ubo = binding(0, BindingKind::Uniform, VariableLayout::Struct { members: vec![] });
        let ssbo = binding(1, BindingKind::Storage, VariableLayout::Struct { members: vec![] });
        let tex = binding(
            2,
            BindingKind::Uniform,
            VariableLayout::Opaque {
                kind: OpaqueKind::CombinedImageSampler,
            },
        );

        let layout = SetLayout::new(
            &backend,
            0,
            &[
                (vk::ShaderStageFlags::VERTEX, &ubo),
                (vk::ShaderStageFlags::FRAGMENT, &ssbo),
                (vk::ShaderStageFlags::FRAGMENT, &tex),
            ],
        )
        .unwrap();

        let counts = layout.descriptor_counts();
        assert_eq!(counts.len(), 3);
        assert!(counts
            .iter()
            .any(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER && s.descriptor_count == 1));
        assert!(counts
            .iter()
            .any(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                && s.descriptor_count == 1));
    }
}
