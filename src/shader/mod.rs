//! Typed descriptions of shader resource bindings.
//!
//! These types are what [`reflect`](crate::shader::reflect) produces from a
//! SPIR-V binary and what the pipeline layout consumes. A [`Binding`]
//! identifies one bindable resource (a uniform or storage block, an opaque
//! image/sampler, a push-constant block or a specialization constant); its
//! [`Variable`] tree describes the memory layout of the data behind it.

pub mod reflect;
pub mod spirv;

pub use reflect::{reflect_bindings, reflect_bindings_from_bytes, ReflectError};

use ash::vk;
use smallvec::SmallVec;
use std::fmt;

/// The scalar domain of a numeric variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}

/// The flavor of an opaque (non-memory-backed) resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpaqueKind {
    Sampler,
    /// An image with a sampler fused into the same binding.
    CombinedImageSampler,
    /// An image read through a separate sampler.
    SampledImage,
    /// An image accessed with image load/store.
    StorageImage,
}

/// The shape of a variable's memory layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VariableLayout {
    Scalar {
        kind: ScalarKind,
        /// Width in bits.
        width: u16,
    },
    /// A matrix, or a vector when `columns == 1`.
    Matrix {
        kind: ScalarKind,
        width: u16,
        rows: u32,
        columns: u32,
        /// Bytes between consecutive columns; 0 when tightly packed.
        stride: u16,
    },
    Array {
        element: Box<Variable>,
        /// Element count; 0 for a runtime array.
        elements: u32,
        /// Bytes between consecutive elements; 0 when tightly packed.
        stride: u16,
        /// Specialization constant controlling the length, if any.
        length_spec_id: Option<u32>,
    },
    Struct {
        members: Vec<Variable>,
    },
    Opaque {
        kind: OpaqueKind,
    },
}

/// One variable of a reflected binding: a name, an offset within the parent
/// aggregate, a layout and (for specialization constants) a default value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Byte offset within the enclosing struct; 0 at top level.
    pub offset: u32,
    pub layout: VariableLayout,
    /// Little-endian bytes of the declared default, at the declared width.
    pub default_value: Option<SmallVec<[u8; 8]>>,
}

impl Variable {
    /// Size of the variable in bytes. Runtime arrays and opaque resources
    /// report 0.
    pub fn size_bytes(&self) -> u32 {
        match &self.layout {
            VariableLayout::Scalar { width, .. } => u32::from(*width) / 8,
            VariableLayout::Matrix {
                width,
                rows,
                columns,
                stride,
                ..
            } => {
                if *columns > 1 && *stride > 0 {
                    columns * u32::from(*stride)
                } else {
                    rows * columns * u32::from(*width) / 8
                }
            }
            VariableLayout::Array {
                element,
                elements,
                stride,
                ..
            } => {
                if *stride > 0 {
                    elements * u32::from(*stride)
                } else {
                    elements * element.size_bytes()
                }
            }
            VariableLayout::Struct { members } => members
                .last()
                .map(|m| m.offset + m.size_bytes())
                .unwrap_or(0),
            VariableLayout::Opaque { .. } => 0,
        }
    }

    /// Looks up a direct struct member by name.
    pub fn member(&self, name: &str) -> Option<&Variable> {
        match &self.layout {
            VariableLayout::Struct { members } => members.iter().find(|m| m.name == name),
            _ => None,
        }
    }

    /// Resolves a dotted member path to `(absolute offset, size)` relative to
    /// this variable. An empty path resolves to the variable itself.
    pub fn resolve_path(&self, path: &str) -> Option<(u32, u32)> {
        let mut var = self;
        let mut offset = 0;
        if !path.is_empty() {
            for segment in path.split('.') {
                var = var.member(segment)?;
                offset += var.offset;
            }
        }
        Some((offset, var.size_bytes()))
    }

    /// Whether two variables describe the same memory layout. Names are
    /// ignored; a vertex stage calling a block `ubo` and a fragment stage
    /// calling it `params` still share one binding.
    pub fn layout_compatible(&self, other: &Variable) -> bool {
        if self.offset != other.offset {
            return false;
        }
        match (&self.layout, &other.layout) {
            (
                VariableLayout::Scalar { kind, width },
                VariableLayout::Scalar {
                    kind: ok,
                    width: ow,
                },
            ) => kind == ok && width == ow,
            (
                VariableLayout::Matrix {
                    kind,
                    width,
                    rows,
                    columns,
                    stride,
                },
                VariableLayout::Matrix {
                    kind: ok,
                    width: ow,
                    rows: or,
                    columns: oc,
                    stride: os,
                },
            ) => kind == ok && width == ow && rows == or && columns == oc && stride == os,
            (
                VariableLayout::Array {
                    element,
                    elements,
                    stride,
                    length_spec_id,
                },
                VariableLayout::Array {
                    element: oe,
                    elements: on,
                    stride: os,
                    length_spec_id: ol,
                },
            ) => {
                elements == on
                    && stride == os
                    && length_spec_id == ol
                    && element.layout_compatible(oe)
            }
            (
                VariableLayout::Struct { members },
                VariableLayout::Struct { members: om },
            ) => {
                members.len() == om.len()
                    && members
                        .iter()
                        .zip(om)
                        .all(|(a, b)| a.layout_compatible(b))
            }
            (VariableLayout::Opaque { kind }, VariableLayout::Opaque { kind: ok }) => kind == ok,
            _ => false,
        }
    }
}

/// How a binding is reached from shader code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// A uniform block or an opaque resource in uniform-constant storage.
    Uniform,
    /// A storage (buffer-block) binding.
    Storage,
    /// A specialization constant; `bind_idx` carries its `SpecId`.
    SpecConstant,
    /// The push-constant block of a stage.
    PushConstant,
}

/// The memory layout rules a block was declared with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlockLayout {
    /// Not a memory block (opaque resources, spec constants).
    #[default]
    None,
    Std140,
    Std430,
}

/// One bindable resource of a shader stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    /// Descriptor-set index; 0 for push and specialization constants.
    pub set_idx: u32,
    /// Binding index within the set, or the `SpecId` for a specialization
    /// constant.
    pub bind_idx: u32,
    pub kind: BindingKind,
    pub block_layout: BlockLayout,
    pub variable: Variable,
}

impl Binding {
    /// Whether another stage's view of the same binding slot agrees with this
    /// one: same kind, same layout rules, same memory layout.
    pub fn compatible(&self, other: &Binding) -> bool {
        self.set_idx == other.set_idx
            && self.bind_idx == other.bind_idx
            && self.kind == other.kind
            && self.block_layout == other.block_layout
            && self.variable.layout_compatible(&other.variable)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            BindingKind::SpecConstant => {
                write!(f, "spec constant \"{}\" (id {})", self.variable.name, self.bind_idx)
            }
            BindingKind::PushConstant => write!(f, "push constants \"{}\"", self.variable.name),
            _ => write!(
                f,
                "binding \"{}\" (set {}, binding {})",
                self.variable.name, self.set_idx, self.bind_idx
            ),
        }
    }
}

/// A shader stage with its reflected bindings, ready for pipeline-layout
/// aggregation.
#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: crate::backend::ShaderModuleHandle,
    pub entry_point: String,
    pub bindings: Vec<Binding>,
}
