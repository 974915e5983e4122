//! Typed, name-addressed assignment of pipeline resources.
//!
//! A [`BindPoint`] is a transient handle to one named resource of a
//! pipeline: a push-constant member (addressed `Block.member`), a
//! specialization constant, or a descriptor binding. Assignments through it
//! are validated against the resource's kind; nothing reaches the backend
//! until the next bind flushes the staged state.

use super::{BindError, PipelineCore};
use crate::{
    descriptor_set::{descriptor_type_for_binding, DescriptorWrite, ResourceWrite},
    shader::BindingKind,
};
use ash::vk;
use bytemuck::NoUninit;

#[derive(Clone, Copy, Debug)]
enum Target {
    PushConstant,
    SpecConstant,
    Descriptor {
        set_idx: u32,
        bind_idx: u32,
        descriptor_type: vk::DescriptorType,
    },
}

/// A resolved reference to one named resource of a pipeline.
#[derive(Debug)]
pub struct BindPoint<'a> {
    core: &'a mut PipelineCore,
    name: String,
    target: Target,
}

impl PipelineCore {
    /// Resolves a resource name to a bind point. Push-constant paths take
    /// precedence, then reflected bindings.
    pub fn bind(&mut self, name: &str) -> Result<BindPoint<'_>, BindError> {
        let target = if self.layout().push_constants().resolve(name).is_some() {
            Target::PushConstant
        } else if let Some(merged) = self.layout().binding(name) {
            match merged.binding.kind {
                BindingKind::SpecConstant => Target::SpecConstant,
                BindingKind::Uniform | BindingKind::Storage => {
                    let descriptor_type = descriptor_type_for_binding(&merged.binding)
                        .map_err(|_| BindError::IncompatibleBindType(name.to_owned()))?;
                    Target::Descriptor {
                        set_idx: merged.binding.set_idx,
                        bind_idx: merged.binding.bind_idx,
                        descriptor_type,
                    }
                }
                BindingKind::PushConstant => Target::PushConstant,
            }
        } else {
            return Err(BindError::UnknownResourceName(name.to_owned()));
        };
        Ok(BindPoint {
            core: self,
            name: name.to_owned(),
            target,
        })
    }
}

impl BindPoint<'_> {
    /// Assigns a plain value: a push-constant member or a specialization
    /// constant.
    pub fn set<T: NoUninit>(self, value: T) -> Result<(), BindError> {
        match self.target {
            Target::PushConstant => self
                .core
                .layout_mut()
                .push_constants_mut()
                .write(&self.name, bytemuck::bytes_of(&value)),
            Target::SpecConstant => {
                let invalidation = self
                    .core
                    .layout_mut()
                    .specialize_constant(&self.name, value)?;
                self.core.record_invalidation(invalidation);
                Ok(())
            }
            Target::Descriptor { .. } => Err(BindError::IncompatibleBindType(self.name)),
        }
    }

    /// Assigns a resource to slot 0 of a descriptor binding.
    pub fn set_resource(self, write: ResourceWrite) -> Result<(), BindError> {
        self.set_resource_at(0, write)
    }

    /// Assigns a resource to one slot of a descriptor binding.
    pub fn set_resource_at(self, array_element: u32, write: ResourceWrite) -> Result<(), BindError> {
        match self.target {
            Target::Descriptor {
                set_idx,
                bind_idx,
                descriptor_type,
            } => {
                if !write.compatible_with(descriptor_type) {
                    return Err(BindError::IncompatibleBindType(self.name));
                }
                self.core.queue_write(
                    set_idx,
                    DescriptorWrite {
                        binding: bind_idx,
                        array_element,
                        descriptor_type,
                        write,
                    },
                );
                Ok(())
            }
            Target::PushConstant | Target::SpecConstant => {
                Err(BindError::IncompatibleBindType(self.name))
            }
        }
    }

    /// Reverts a specialization constant to its declared default.
    pub fn unset(self) -> Result<(), BindError> {
        match self.target {
            Target::SpecConstant => {
                let invalidation = self.core.layout_mut().remove_specialization(&self.name)?;
                self.core.record_invalidation(invalidation);
                Ok(())
            }
            Target::PushConstant | Target::Descriptor { .. } => {
                Err(BindError::IncompatibleBindType(self.name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BufferHandle, Headless, SamplerHandle, ShaderModuleHandle},
        device::Device,
        pipeline::PipelineLayout,
        shader::{Binding, BlockLayout, OpaqueKind, ScalarKind, ShaderStage, Variable, VariableLayout},
    };
    use smallvec::SmallVec;
    use std::sync::Arc;

    fn test_core() -> PipelineCore {
        let device = Device::new(Arc::new(Headless::new()));
        let bindings = vec![
            Binding {
                set_idx: 0,
                bind_idx: 0,
                kind: BindingKind::Uniform,
                block_layout: BlockLayout::Std140,
                variable: Variable {
                    name: "UBO".to_owned(),
                    offset: 0,
                    layout: VariableLayout::Struct { members: vec![] },
                    default_value: None,
                },
            },
            Binding {
                set_idx: 0,
                bind_idx: 1,
                kind: BindingKind::SpecConstant,
                block_layout: BlockLayout::None,
                variable: Variable {
                    name: "count".to_owned(),
                    offset: 0,
                    layout: VariableLayout::Scalar {
                        kind: ScalarKind::Uint,
                        width: 32,
                    },
                    default_value: Some(SmallVec::from_slice(&4u32.to_le_bytes())),
                },
            },
            Binding {
                set_idx: 0,
                bind_idx: 2,
                kind: BindingKind::Uniform,
                block_layout: BlockLayout::None,
                variable: Variable {
                    name: "tex_sampler".to_owned(),
                    offset: 0,
                    layout: VariableLayout::Opaque {
                        kind: OpaqueKind::Sampler,
                    },
                    default_value: None,
                },
            },
        ];
        let stage = ShaderStage {
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: ShaderModuleHandle(1),
            entry_point: "main".to_owned(),
            bindings,
        };
        let layout = PipelineLayout::new(device.clone(), &[stage]).unwrap();
        PipelineCore::new(device, layout)
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut core = test_core();
        assert_eq!(
            core.bind("nope").err(),
            Some(BindError::UnknownResourceName("nope".to_owned()))
        );
    }

    #[test]
    fn descriptor_bindings_take_resources_not_values() {
        let mut core = test_core();
        assert_eq!(
            core.bind("UBO").unwrap().set(1.0f32),
            Err(BindError::IncompatibleBindType("UBO".to_owned()))
        );
        core.bind("UBO")
            .unwrap()
            .set_resource(ResourceWrite::Buffer {
                buffer: BufferHandle(3),
                offset: 0,
                range: 64,
            })
            .unwrap();
    }

    #[test]
    fn resource_kind_must_match_the_slot() {
        let mut core = test_core();
        // A buffer cannot fill a sampler slot.
        assert_eq!(
            core.bind("tex_sampler")
                .unwrap()
                .set_resource(ResourceWrite::Buffer {
                    buffer: BufferHandle(3),
                    offset: 0,
                    range: 64,
                }),
            Err(BindError::IncompatibleBindType("tex_sampler".to_owned()))
        );
        core.bind("tex_sampler")
            .unwrap()
            .set_resource(ResourceWrite::Sampler {
                sampler: SamplerHandle(5),
            })
            .unwrap();
    }

    #[test]
    fn spec_constants_take_values() {
        let mut core = test_core();
        core.bind("count").unwrap().set(9u32).unwrap();
        let (entries, data) = core.layout().specialization_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(&data[..], &9u32.to_le_bytes());

        core.bind("count").unwrap().unset().unwrap();
        let (_, data) = core.layout().specialization_entries();
        assert_eq!(&data[..], &4u32.to_le_bytes());
    }
}
