//! Pipeline layouts merged from the reflected bindings of all stages.

use super::{BindError, Invalidation};
use crate::{
    backend::{BackendError, PipelineLayoutHandle},
    deferred::RetiredResource,
    descriptor_set::{descriptor_type_for_binding, SetLayout, SetLayoutBinding},
    device::Device,
    shader::{Binding, BindingKind, ShaderStage, Variable, VariableLayout},
};
use ash::vk;
use bytemuck::NoUninit;
use foldhash::HashMap;
use smallvec::SmallVec;
use std::{collections::BTreeMap, error, fmt};

/// Error merging stage bindings into one layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineLayoutError {
    /// Two stages declare the same slot with incompatible kinds or memory
    /// layouts.
    IncompatibleBinding { name: String },
    /// Two different resources share one name, which would make bind points
    /// ambiguous.
    DuplicateResourceName { name: String },
    Backend(BackendError),
}

impl fmt::Display for PipelineLayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineLayoutError::IncompatibleBinding { name } => {
                write!(f, "stages disagree on the layout of \"{}\"", name)
            }
            PipelineLayoutError::DuplicateResourceName { name } => {
                write!(f, "two distinct resources are both named \"{}\"", name)
            }
            PipelineLayoutError::Backend(err) => write!(f, "{}", err),
        }
    }
}

impl error::Error for PipelineLayoutError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            PipelineLayoutError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for PipelineLayoutError {
    fn from(err: BackendError) -> Self {
        PipelineLayoutError::Backend(err)
    }
}

/// One merged binding with the union of stages that reference it.
#[derive(Clone, Debug)]
pub struct PipelineBinding {
    pub stages: vk::ShaderStageFlags,
    pub binding: Binding,
}

/// The push-constant block of a pipeline, with a host-side shadow copy of
/// its contents.
#[derive(Debug, Default)]
pub struct PushConstantsLayout {
    block: Option<Variable>,
    stages: vk::ShaderStageFlags,
    shadow: Vec<u8>,
}

impl PushConstantsLayout {
    fn merge_stage_block(
        &mut self,
        stages: vk::ShaderStageFlags,
        variable: &Variable,
    ) -> Result<(), PipelineLayoutError> {
        match &self.block {
            Some(block) => {
                if !block.layout_compatible(variable) {
                    return Err(PipelineLayoutError::IncompatibleBinding {
                        name: variable.name.clone(),
                    });
                }
            }
            None => {
                self.block = Some(variable.clone());
                self.shadow = vec![0; variable.size_bytes() as usize];
            }
        }
        self.stages |= stages;
        Ok(())
    }

    pub fn block(&self) -> Option<&Variable> {
        self.block.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    pub fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }

    /// Resolves a dotted path to `(offset, size)` within the block. The
    /// first segment is the block's name; the rest walk its members.
    pub fn resolve(&self, path: &str) -> Option<(u32, u32)> {
        let block = self.block.as_ref()?;
        let (first, rest) = match path.split_once('.') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path, None),
        };
        if first != block.name {
            return None;
        }
        match rest {
            Some(rest) => block.resolve_path(rest),
            None => Some((0, block.size_bytes())),
        }
    }

    /// Writes a value into the shadow copy. The size must match the
    /// resolved member exactly.
    pub fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), BindError> {
        let (offset, size) = self
            .resolve(path)
            .ok_or_else(|| BindError::UnknownResourceName(path.to_owned()))?;
        if bytes.len() as u32 != size {
            return Err(BindError::SizeMismatch {
                name: path.to_owned(),
                expected: size,
                provided: bytes.len() as u32,
            });
        }
        let offset = offset as usize;
        self.shadow[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// The current shadow contents, pushed verbatim at bind time.
    pub fn data(&self) -> &[u8] {
        &self.shadow
    }

    pub fn ranges(&self) -> Vec<vk::PushConstantRange> {
        match &self.block {
            Some(_) => vec![vk::PushConstantRange {
                stage_flags: self.stages,
                offset: 0,
                size: self.shadow.len() as u32,
            }],
            None => Vec::new(),
        }
    }
}

/// The aggregated binding interface of a pipeline.
///
/// Owns the native set layouts and (lazily) the native pipeline layout.
/// Mutations return an [`Invalidation`] naming the native state they made
/// stale; they never rebuild anything themselves.
#[derive(Debug)]
pub struct PipelineLayout {
    device: Device,
    bindings: Vec<PipelineBinding>,
    by_name: HashMap<String, usize>,
    push_constants: PushConstantsLayout,
    spec_overrides: HashMap<u32, SmallVec<[u8; 8]>>,
    set_layouts: BTreeMap<u32, SetLayout>,
    handle: Option<PipelineLayoutHandle>,
}

impl PipelineLayout {
    /// Merges the reflected bindings of all stages, checking that stages
    /// sharing a slot agree on its layout.
    pub fn new(device: Device, stages: &[ShaderStage]) -> Result<Self, PipelineLayoutError> {
        let mut bindings: Vec<PipelineBinding> = Vec::new();
        let mut push_constants = PushConstantsLayout::default();

        for stage in stages {
            for binding in &stage.bindings {
                if binding.kind == BindingKind::PushConstant {
                    push_constants.merge_stage_block(stage.stage, &binding.variable)?;
                    continue;
                }
                let existing = bindings.iter_mut().find(|b| {
                    b.binding.kind == binding.kind
                        && b.binding.set_idx == binding.set_idx
                        && b.binding.bind_idx == binding.bind_idx
                });
                match existing {
                    Some(merged) => {
                        if !merged.binding.compatible(binding) {
                            return Err(PipelineLayoutError::IncompatibleBinding {
                                name: binding.variable.name.clone(),
                            });
                        }
                        merged.stages |= stage.stage;
                    }
                    None => bindings.push(PipelineBinding {
                        stages: stage.stage,
                        binding: binding.clone(),
                    }),
                }
            }
        }

        bindings.sort_by_key(|b| {
            (
                b.binding.kind == BindingKind::SpecConstant,
                b.binding.set_idx,
                b.binding.bind_idx,
            )
        });

        let mut by_name: HashMap<String, usize> = HashMap::default();
        for (idx, merged) in bindings.iter().enumerate() {
            let name = &merged.binding.variable.name;
            if name.is_empty() {
                continue;
            }
            if by_name.insert(name.clone(), idx).is_some() {
                return Err(PipelineLayoutError::DuplicateResourceName { name: name.clone() });
            }
        }

        let mut layout = PipelineLayout {
            device,
            bindings,
            by_name,
            push_constants,
            spec_overrides: HashMap::default(),
            set_layouts: BTreeMap::new(),
            handle: None,
        };
        for set_idx in layout.descriptor_set_indices() {
            let set_layout = layout.build_set_layout(set_idx)?;
            layout.set_layouts.insert(set_idx, set_layout);
        }
        Ok(layout)
    }

    fn descriptor_set_indices(&self) -> Vec<u32> {
        let mut sets: Vec<u32> = self
            .bindings
            .iter()
            .filter(|b| {
                matches!(
                    b.binding.kind,
                    BindingKind::Uniform | BindingKind::Storage
                )
            })
            .map(|b| b.binding.set_idx)
            .collect();
        sets.sort_unstable();
        sets.dedup();
        sets
    }

    /// Descriptor slots a binding occupies, honoring any specialization of
    /// an array length.
    fn effective_descriptor_count(&self, binding: &Binding) -> u32 {
        match &binding.variable.layout {
            VariableLayout::Array {
                elements,
                length_spec_id,
                ..
            } => {
                if let Some(bytes) = length_spec_id
                    .as_ref()
                    .and_then(|id| self.spec_overrides.get(id))
                {
                    let mut value = [0u8; 4];
                    let len = bytes.len().min(4);
                    value[..len].copy_from_slice(&bytes[..len]);
                    u32::from_le_bytes(value).max(1)
                } else {
                    (*elements).max(1)
                }
            }
            _ => 1,
        }
    }

    fn build_set_layout(&self, set_idx: u32) -> Result<SetLayout, BackendError> {
        let mut slots = Vec::new();
        for merged in &self.bindings {
            if merged.binding.set_idx != set_idx
                || !matches!(
                    merged.binding.kind,
                    BindingKind::Uniform | BindingKind::Storage
                )
            {
                continue;
            }
            let descriptor_type = descriptor_type_for_binding(&merged.binding)
                .map_err(|_| BackendError::CreationFailed("descriptor set layout"))?;
            slots.push(SetLayoutBinding {
                binding: merged.binding.bind_idx,
                descriptor_type,
                descriptor_count: self.effective_descriptor_count(&merged.binding),
                stages: merged.stages,
            });
        }
        SetLayout::from_slots(self.device.backend().as_ref(), set_idx, slots)
    }

    /// Looks up a merged binding by resource name.
    pub fn binding(&self, name: &str) -> Option<&PipelineBinding> {
        self.by_name.get(name).map(|idx| &self.bindings[*idx])
    }

    pub fn bindings(&self) -> &[PipelineBinding] {
        &self.bindings
    }

    pub fn push_constants(&self) -> &PushConstantsLayout {
        &self.push_constants
    }

    pub fn push_constants_mut(&mut self) -> &mut PushConstantsLayout {
        &mut self.push_constants
    }

    pub fn set_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.set_layouts.keys().copied()
    }

    pub fn set_layout(&self, set_idx: u32) -> Option<&SetLayout> {
        self.set_layouts.get(&set_idx)
    }

    /// Overrides a specialization constant. Returns the invalidation this
    /// causes: always the pipeline object, plus every set whose array
    /// lengths the constant controls.
    pub fn specialize_constant<T: NoUninit>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<Invalidation, BindError> {
        let bytes: SmallVec<[u8; 8]> = bytemuck::bytes_of(&value).into();
        self.set_specialization_bytes(name, bytes)
    }

    fn set_specialization_bytes(
        &mut self,
        name: &str,
        bytes: SmallVec<[u8; 8]>,
    ) -> Result<Invalidation, BindError> {
        let merged = self
            .by_name
            .get(name)
            .map(|idx| &self.bindings[*idx])
            .ok_or_else(|| BindError::UnknownResourceName(name.to_owned()))?;
        if merged.binding.kind != BindingKind::SpecConstant {
            return Err(BindError::IncompatibleBindType(name.to_owned()));
        }
        let expected = merged.binding.variable.size_bytes();
        if bytes.len() as u32 != expected {
            return Err(BindError::SizeMismatch {
                name: name.to_owned(),
                expected,
                provided: bytes.len() as u32,
            });
        }

        let spec_id = merged.binding.bind_idx;
        let current = self
            .spec_overrides
            .get(&spec_id)
            .map(|b| b.as_slice())
            .or(merged.binding.variable.default_value.as_deref());
        if current == Some(bytes.as_slice()) {
            return Ok(Invalidation::none());
        }

        self.spec_overrides.insert(spec_id, bytes);
        Ok(self.spec_invalidation(spec_id))
    }

    /// Reverts a specialization constant to its declared default.
    pub fn remove_specialization(&mut self, name: &str) -> Result<Invalidation, BindError> {
        let merged = self
            .by_name
            .get(name)
            .map(|idx| &self.bindings[*idx])
            .ok_or_else(|| BindError::UnknownResourceName(name.to_owned()))?;
        if merged.binding.kind != BindingKind::SpecConstant {
            return Err(BindError::IncompatibleBindType(name.to_owned()));
        }
        let spec_id = merged.binding.bind_idx;
        if self.spec_overrides.remove(&spec_id).is_none() {
            return Ok(Invalidation::none());
        }
        Ok(self.spec_invalidation(spec_id))
    }

    fn spec_invalidation(&self, spec_id: u32) -> Invalidation {
        let mut affected: SmallVec<[u32; 4]> = SmallVec::new();
        for merged in &self.bindings {
            if matches!(
                merged.binding.kind,
                BindingKind::Uniform | BindingKind::Storage
            ) && variable_uses_spec_length(&merged.binding.variable, spec_id)
                && !affected.contains(&merged.binding.set_idx)
            {
                affected.push(merged.binding.set_idx);
            }
        }
        Invalidation::sets(affected)
    }

    /// The serialized specialization map for pipeline creation: every spec
    /// constant's override, or its declared default.
    pub fn specialization_entries(&self) -> (Vec<vk::SpecializationMapEntry>, Vec<u8>) {
        let mut entries = Vec::new();
        let mut data = Vec::new();
        for merged in &self.bindings {
            if merged.binding.kind != BindingKind::SpecConstant {
                continue;
            }
            let spec_id = merged.binding.bind_idx;
            let bytes = self
                .spec_overrides
                .get(&spec_id)
                .map(|b| b.as_slice())
                .or(merged.binding.variable.default_value.as_deref())
                .unwrap_or(&[]);
            entries.push(vk::SpecializationMapEntry {
                constant_id: spec_id,
                offset: data.len() as u32,
                size: bytes.len(),
            });
            data.extend_from_slice(bytes);
        }
        (entries, data)
    }

    /// Rebuilds one set's native layout, retiring the superseded handle.
    pub(crate) fn rebuild_set_layout(&mut self, set_idx: u32) -> Result<(), BackendError> {
        let rebuilt = self.build_set_layout(set_idx)?;
        if let Some(old) = self.set_layouts.insert(set_idx, rebuilt) {
            self.device
                .retire(RetiredResource::DescriptorSetLayout(old.handle()));
        }
        Ok(())
    }

    /// The native pipeline layout, created on first use.
    pub(crate) fn ensure_native(&mut self) -> Result<PipelineLayoutHandle, BackendError> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let set_layouts: Vec<_> = self.set_layouts.values().map(|l| l.handle()).collect();
        let handle = self
            .device
            .backend()
            .create_pipeline_layout(&set_layouts, &self.push_constants.ranges())?;
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Retires the native pipeline layout; the next bind rebuilds it.
    pub(crate) fn invalidate_native(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.retire(RetiredResource::PipelineLayout(handle));
        }
    }
}

fn variable_uses_spec_length(variable: &Variable, spec_id: u32) -> bool {
    match &variable.layout {
        VariableLayout::Array {
            element,
            length_spec_id,
            ..
        } => *length_spec_id == Some(spec_id) || variable_uses_spec_length(element, spec_id),
        VariableLayout::Struct { members } => members
            .iter()
            .any(|m| variable_uses_spec_length(m, spec_id)),
        _ => false,
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.invalidate_native();
        for (_, set_layout) in std::mem::take(&mut self.set_layouts) {
            self.device
                .retire(RetiredResource::DescriptorSetLayout(set_layout.handle()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Headless, ShaderModuleHandle},
        shader::{BlockLayout, OpaqueKind, ScalarKind},
    };
    use std::sync::Arc;

    fn scalar(name: &str, kind: ScalarKind) -> Variable {
        Variable {
            name: name.to_owned(),
            offset: 0,
            layout: VariableLayout::Scalar { kind, width: 32 },
            default_value: None,
        }
    }

    fn block_binding(name: &str, set_idx: u32, bind_idx: u32) -> Binding {
        Binding {
            set_idx,
            bind_idx,
            kind: BindingKind::Uniform,
            block_layout: BlockLayout::Std140,
            variable: Variable {
                name: name.to_owned(),
                offset: 0,
                layout: VariableLayout::Struct {
                    members: vec![scalar("x", ScalarKind::Float)],
                },
                default_value: None,
            },
        }
    }

    fn spec_binding(name: &str, spec_id: u32, default: u32) -> Binding {
        Binding {
            set_idx: 0,
            bind_idx: spec_id,
            kind: BindingKind::SpecConstant,
            block_layout: BlockLayout::None,
            variable: Variable {
                name: name.to_owned(),
                offset: 0,
                layout: VariableLayout::Scalar {
                    kind: ScalarKind::Uint,
                    width: 32,
                },
                default_value: Some(SmallVec::from_slice(&default.to_le_bytes())),
            },
        }
    }

    fn stage(flags: vk::ShaderStageFlags, bindings: Vec<Binding>) -> ShaderStage {
        ShaderStage {
            stage: flags,
            module: ShaderModuleHandle(1),
            entry_point: "main".to_owned(),
            bindings,
        }
    }

    fn device() -> (Arc<Headless>, Device) {
        let backend = Arc::new(Headless::new());
        let device = Device::new(backend.clone());
        (backend, device)
    }

    #[test]
    fn merges_shared_bindings_across_stages() {
        let (_, device) = device();
        let layout = PipelineLayout::new(
            device,
            &[
                stage(
                    vk::ShaderStageFlags::VERTEX,
                    vec![block_binding("UBO", 0, 0)],
                ),
                stage(
                    vk::ShaderStageFlags::FRAGMENT,
                    vec![block_binding("UBO", 0, 0)],
                ),
            ],
        )
        .unwrap();

        let merged = layout.binding("UBO").unwrap();
        assert_eq!(
            merged.stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(layout.bindings().len(), 1);
    }

    #[test]
    fn rejects_incompatible_stage_views_of_a_slot() {
        let (_, device) = device();
        let mut other = block_binding("UBO", 0, 0);
        other.variable = Variable {
            name: "UBO".to_owned(),
            offset: 0,
            layout: VariableLayout::Opaque {
                kind: OpaqueKind::Sampler,
            },
            default_value: None,
        };
        let result = PipelineLayout::new(
            device,
            &[
                stage(
                    vk::ShaderStageFlags::VERTEX,
                    vec![block_binding("UBO", 0, 0)],
                ),
                stage(vk::ShaderStageFlags::FRAGMENT, vec![other]),
            ],
        );
        assert_eq!(
            result.err(),
            Some(PipelineLayoutError::IncompatibleBinding {
                name: "UBO".to_owned()
            })
        );
    }

    #[test]
    fn specializing_a_constant_invalidates_the_pipeline() {
        let (_, device) = device();
        let mut layout = PipelineLayout::new(
            device,
            &[stage(
                vk::ShaderStageFlags::VERTEX,
                vec![spec_binding("count", 7, 4)],
            )],
        )
        .unwrap();

        let invalidation = layout.specialize_constant("count", 16u32).unwrap();
        assert!(invalidation.invalidates_pipeline());
        assert!(invalidation.invalidated_sets().is_empty());

        // Same value again: nothing becomes stale.
        let again = layout.specialize_constant("count", 16u32).unwrap();
        assert!(again.is_empty());

        // Setting the declared default while overridden still invalidates.
        let back = layout.specialize_constant("count", 4u32).unwrap();
        assert!(back.invalidates_pipeline());
    }

    #[test]
    fn specializing_the_default_value_is_a_noop() {
        let (_, device) = device();
        let mut layout = PipelineLayout::new(
            device,
            &[stage(
                vk::ShaderStageFlags::VERTEX,
                vec![spec_binding("count", 7, 4)],
            )],
        )
        .unwrap();
        let invalidation = layout.specialize_constant("count", 4u32).unwrap();
        assert!(invalidation.is_empty());
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let (_, device) = device();
        let mut layout = PipelineLayout::new(
            device,
            &[stage(
                vk::ShaderStageFlags::VERTEX,
                vec![spec_binding("count", 7, 4)],
            )],
        )
        .unwrap();
        assert_eq!(
            layout.specialize_constant("count", 3u16),
            Err(BindError::SizeMismatch {
                name: "count".to_owned(),
                expected: 4,
                provided: 2,
            })
        );
    }

    #[test]
    fn spec_length_arrays_invalidate_their_set() {
        let (_, device) = device();
        let element = Variable {
            name: String::new(),
            offset: 0,
            layout: VariableLayout::Opaque {
                kind: OpaqueKind::CombinedImageSampler,
            },
            default_value: None,
        };
        let textures = Binding {
            set_idx: 2,
            bind_idx: 0,
            kind: BindingKind::Uniform,
            block_layout: BlockLayout::None,
            variable: Variable {
                name: "textures".to_owned(),
                offset: 0,
                layout: VariableLayout::Array {
                    element: Box::new(element),
                    elements: 4,
                    stride: 0,
                    length_spec_id: Some(7),
                },
                default_value: None,
            },
        };
        let mut layout = PipelineLayout::new(
            device,
            &[stage(
                vk::ShaderStageFlags::FRAGMENT,
                vec![spec_binding("count", 7, 4), textures],
            )],
        )
        .unwrap();

        let invalidation = layout.specialize_constant("count", 16u32).unwrap();
        assert_eq!(invalidation.invalidated_sets(), &[2]);

        // The rebuilt layout allocates the specialized number of slots.
        layout.rebuild_set_layout(2).unwrap();
        let slots = layout.set_layout(2).unwrap().bindings();
        assert_eq!(slots[0].descriptor_count, 16);
    }

    #[test]
    fn specialization_map_serializes_overrides_over_defaults() {
        let (_, device) = device();
        let mut layout = PipelineLayout::new(
            device,
            &[stage(
                vk::ShaderStageFlags::VERTEX,
                vec![spec_binding("a", 1, 10), spec_binding("b", 2, 20)],
            )],
        )
        .unwrap();
        let _ = layout.specialize_constant("b", 99u32).unwrap();

        let (entries, data) = layout.specialization_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].constant_id, 1);
        assert_eq!(entries[1].constant_id, 2);
        assert_eq!(&data[..4], &10u32.to_le_bytes());
        assert_eq!(&data[4..], &99u32.to_le_bytes());
    }

    #[test]
    fn push_constant_paths_resolve_members() {
        let (_, device) = device();
        let push_block = Binding {
            set_idx: 0,
            bind_idx: 0,
            kind: BindingKind::PushConstant,
            block_layout: BlockLayout::Std140,
            variable: Variable {
                name: "Push".to_owned(),
                offset: 0,
                layout: VariableLayout::Struct {
                    members: vec![
                        Variable {
                            offset: 0,
                            ..scalar("time", ScalarKind::Float)
                        },
                        Variable {
                            offset: 4,
                            ..scalar("frame", ScalarKind::Uint)
                        },
                    ],
                },
                default_value: None,
            },
        };
        let mut layout = PipelineLayout::new(
            device,
            &[stage(vk::ShaderStageFlags::VERTEX, vec![push_block])],
        )
        .unwrap();

        let push = layout.push_constants_mut();
        assert_eq!(push.resolve("Push.frame"), Some((4, 4)));
        assert_eq!(push.resolve("Push"), Some((0, 8)));
        assert_eq!(push.resolve("Other.frame"), None);

        push.write("Push.frame", &7u32.to_le_bytes()).unwrap();
        assert_eq!(&push.data()[4..8], &7u32.to_le_bytes());

        assert_eq!(
            push.write("Push.frame", &[1u8; 8]),
            Err(BindError::SizeMismatch {
                name: "Push.frame".to_owned(),
                expected: 4,
                provided: 8,
            })
        );
    }
}
