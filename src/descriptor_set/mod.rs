//! Descriptor sets: the bridge between reflected bindings and native
//! binding-set objects.
//!
//! [`descriptor_type_for_binding`] maps a reflected [`Binding`] to the
//! descriptor type it occupies. [`layout`] builds native set layouts out of
//! those types; [`pool`] allocates binding sets from shared, reference
//! counted pools.

pub mod layout;
pub mod pool;

pub use layout::{SetLayout, SetLayoutBinding};
pub use pool::{BindingSet, BindingSetPool};

use crate::{
    backend::{BufferHandle, ImageViewHandle, SamplerHandle},
    shader::{Binding, BindingKind, OpaqueKind, VariableLayout},
};
use ash::vk;
use std::{error, fmt};

/// Error mapping a binding to a descriptor type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorTypeError {
    /// Push and specialization constants do not occupy descriptor slots.
    NotADescriptor(BindingKind),
}

impl fmt::Display for DescriptorTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorTypeError::NotADescriptor(kind) => {
                write!(f, "{:?} bindings do not occupy a descriptor slot", kind)
            }
        }
    }
}

impl error::Error for DescriptorTypeError {}

/// The descriptor type a reflected binding occupies.
pub fn descriptor_type_for_binding(
    binding: &Binding,
) -> Result<vk::DescriptorType, DescriptorTypeError> {
    // Arrays bind the element type, once per slot.
    let mut layout = &binding.variable.layout;
    if let VariableLayout::Array { element, .. } = layout {
        layout = &element.layout;
    }

    match binding.kind {
        BindingKind::Storage => Ok(vk::DescriptorType::STORAGE_BUFFER),
        BindingKind::Uniform => Ok(match layout {
            VariableLayout::Opaque { kind } => match kind {
                OpaqueKind::Sampler => vk::DescriptorType::SAMPLER,
                OpaqueKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                OpaqueKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
                OpaqueKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            },
            _ => vk::DescriptorType::UNIFORM_BUFFER,
        }),
        kind @ (BindingKind::SpecConstant | BindingKind::PushConstant) => {
            Err(DescriptorTypeError::NotADescriptor(kind))
        }
    }
}

/// Number of descriptor slots a binding occupies. Arrays take one slot per
/// element; runtime arrays reserve a single slot.
pub fn descriptor_count_for_binding(binding: &Binding) -> u32 {
    match &binding.variable.layout {
        VariableLayout::Array { elements, .. } => (*elements).max(1),
        _ => 1,
    }
}

/// The resource placed into one descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceWrite {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    Image {
        view: ImageViewHandle,
        layout: vk::ImageLayout,
    },
    CombinedImageSampler {
        sampler: SamplerHandle,
        view: ImageViewHandle,
        layout: vk::ImageLayout,
    },
    Sampler {
        sampler: SamplerHandle,
    },
}

impl ResourceWrite {
    /// Whether this resource can legally fill a slot of the given type.
    pub fn compatible_with(&self, descriptor_type: vk::DescriptorType) -> bool {
        match self {
            ResourceWrite::Buffer { .. } => matches!(
                descriptor_type,
                vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::STORAGE_BUFFER
            ),
            ResourceWrite::Image { .. } => matches!(
                descriptor_type,
                vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::STORAGE_IMAGE
            ),
            ResourceWrite::CombinedImageSampler { .. } => {
                descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            }
            ResourceWrite::Sampler { .. } => descriptor_type == vk::DescriptorType::SAMPLER,
        }
    }
}

/// A fully described descriptor update, ready for the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub write: ResourceWrite,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{BlockLayout, ScalarKind, Variable};

    fn binding(kind: BindingKind, layout: VariableLayout) -> Binding {
        Binding {
            set_idx: 0,
            bind_idx: 0,
            kind,
            block_layout: BlockLayout::None,
            variable: Variable {
                name: "b".to_owned(),
                offset: 0,
                layout,
                default_value: None,
            },
        }
    }

    #[test]
    fn blocks_map_to_buffer_descriptors() {
        let uniform = binding(BindingKind::Uniform, VariableLayout::Struct { members: vec![] });
        assert_eq!(
            descriptor_type_for_binding(&uniform),
            Ok(vk::DescriptorType::UNIFORM_BUFFER)
        );

        let storage = binding(BindingKind::Storage, VariableLayout::Struct { members: vec![] });
        assert_eq!(
            descriptor_type_for_binding(&storage),
            Ok(vk::DescriptorType::STORAGE_BUFFER)
        );
    }

    #[test]
    fn arrays_bind_their_element_type() {
        let element = Variable {
            name: String::new(),
            offset: 0,
            layout: VariableLayout::Opaque {
                kind: OpaqueKind::CombinedImageSampler,
            },
            default_value: None,
        };
        let textures = binding(
            BindingKind::Uniform,
            VariableLayout::Array {
                element: Box::new(element),
                elements: 8,
                stride: 0,
                length_spec_id: None,
            },
        );
        assert_eq!(
            descriptor_type_for_binding(&textures),
            Ok(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        );
        assert_eq!(descriptor_count_for_binding(&textures), 8);
    }

    #[test]
    fn constants_are_not_descriptors() {
        let spec = binding(
            BindingKind::SpecConstant,
            VariableLayout::Scalar {
                kind: ScalarKind::Uint,
                width: 32,
            },
        );
        assert_eq!(
            descriptor_type_for_binding(&spec),
            Err(DescriptorTypeError::NotADescriptor(BindingKind::SpecConstant))
        );
    }

    #[test]
    fn writes_check_slot_compatibility() {
        let write = ResourceWrite::Buffer {
            buffer: BufferHandle(1),
            offset: 0,
            range: 64,
        };
        assert!(write.compatible_with(vk::DescriptorType::UNIFORM_BUFFER));
        assert!(!write.compatible_with(vk::DescriptorType::SAMPLER));
    }
}
