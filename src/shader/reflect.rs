//! Reflection of resource bindings out of a SPIR-V binary.
//!
//! A single pass over the instruction stream accumulates, per result id, a
//! scratch record of everything known about that id: its name, decorations
//! and (for type ids) the memory layout it describes. Composite type
//! instructions fold the scratch of their component ids into their own, so
//! by the time an `OpVariable` consumes its pointer type the whole layout
//! has already been assembled. Ids that end up both a variable and a binding
//! (or a decorated specialization constant) are emitted as [`Binding`]s.
//!
//! Member names and decorations may precede the `OpTypeStruct` that gives
//! the struct its members; such instructions are queued on the struct's id
//! and replayed once the struct type materializes.

use super::{
    spirv::{Decoration, Instruction, ParseError, Spirv, StorageClass},
    Binding, BindingKind, BlockLayout, OpaqueKind, ScalarKind, Variable, VariableLayout,
};
use smallvec::SmallVec;
use std::{error, fmt};

/// Error produced while reflecting a shader binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReflectError {
    Parse(ParseError),
    /// The module uses an instruction the reflector cannot interpret
    /// (forward pointers, specialization-constant expressions).
    UnsupportedModule(&'static str),
    /// The module is internally inconsistent: an id out of bounds, a binding
    /// whose kind or type never resolved, a non-boolean true/false constant.
    CorruptOrIncompatibleShader,
}

impl fmt::Display for ReflectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReflectError::Parse(err) => write!(f, "SPIR-V parse error: {}", err),
            ReflectError::UnsupportedModule(what) => {
                write!(f, "module uses unsupported instruction {}", what)
            }
            ReflectError::CorruptOrIncompatibleShader => {
                write!(f, "shader binary is corrupt or incompatible")
            }
        }
    }
}

impl error::Error for ReflectError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ReflectError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for ReflectError {
    fn from(err: ParseError) -> Self {
        ReflectError::Parse(err)
    }
}

/// What is known about the type behind a result id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum VarKind {
    #[default]
    Unknown,
    Void,
    Scalar(ScalarKind),
    Opaque(OpaqueKind),
    Struct,
}

/// Layout attributes accumulated for one result id.
#[derive(Clone, Debug, PartialEq)]
struct ReflectedVariable {
    name: String,
    kind: VarKind,
    /// Scalar width in bits.
    width: u16,
    rows: u32,
    columns: u32,
    matrix_stride: u16,
    /// 1 for non-arrays, 0 for runtime arrays.
    array_elements: u32,
    array_stride: u16,
    length_spec_id: Option<u32>,
    /// Member offset within the enclosing struct.
    offset: u32,
    constant_value: Option<u64>,
    members: Vec<ReflectedVariable>,
}

impl Default for ReflectedVariable {
    fn default() -> Self {
        ReflectedVariable {
            name: String::new(),
            kind: VarKind::Unknown,
            width: 0,
            rows: 1,
            columns: 1,
            matrix_stride: 0,
            array_elements: 1,
            array_stride: 0,
            length_spec_id: None,
            offset: 0,
            constant_value: None,
            members: Vec::new(),
        }
    }
}

impl ReflectedVariable {
    /// Folds another id's attributes into this one, keeping only the
    /// non-default attributes of the source.
    fn consume(&mut self, src: &ReflectedVariable) {
        if !src.name.is_empty() {
            self.name = src.name.clone();
        }
        self.rows = src.rows;
        self.columns = src.columns;
        if src.matrix_stride > 0 {
            self.matrix_stride = src.matrix_stride;
        }
        if src.kind != VarKind::Unknown {
            self.kind = src.kind;
            self.width = src.width;
        }
        if src.array_elements != 1 {
            self.array_elements = src.array_elements;
            self.length_spec_id = src.length_spec_id;
        }
        if src.array_stride > 0 {
            self.array_stride = src.array_stride;
        }
        if src.constant_value.is_some() {
            self.constant_value = src.constant_value;
        }
        if !src.members.is_empty() {
            self.members = src.members.clone();
        }
    }

    fn is_array(&self) -> bool {
        self.array_elements != 1
    }
}

/// Everything accumulated for one result id.
#[derive(Clone, Debug, Default)]
struct Scratch {
    set_idx: u32,
    bind_idx: u32,
    kind: Option<BindingKind>,
    block_layout: BlockLayout,
    is_binding: bool,
    is_variable: bool,
    var: ReflectedVariable,
    /// Indices of member name/decoration instructions seen before the
    /// struct type materialized.
    pending_member_ops: Vec<usize>,
}

impl Scratch {
    fn consume(&mut self, src: &Scratch) {
        self.var.consume(&src.var);
        if src.kind.is_some() {
            self.kind = src.kind;
        }
        if src.block_layout != BlockLayout::None {
            self.block_layout = src.block_layout;
        }
        if src.is_binding {
            self.is_binding = true;
        }
    }
}

/// Reflects the resource bindings of a SPIR-V module given as a word stream.
///
/// The returned bindings are ordered by result id, so reflecting the same
/// binary always yields the same list.
pub fn reflect_bindings(words: &[u32]) -> Result<Vec<Binding>, ReflectError> {
    let spirv = Spirv::parse(words)?;
    reflect(&spirv)
}

/// Reflects the resource bindings of a SPIR-V module given as raw bytes.
pub fn reflect_bindings_from_bytes(bytes: &[u8]) -> Result<Vec<Binding>, ReflectError> {
    let spirv = Spirv::parse_bytes(bytes)?;
    reflect(&spirv)
}

fn reflect(spirv: &Spirv) -> Result<Vec<Binding>, ReflectError> {
    let mut scratch: Vec<Scratch> = vec![Scratch::default(); spirv.bound as usize];

    for idx in 0..spirv.instructions.len() {
        process_instruction(&mut scratch, &spirv.instructions, idx)?;
    }

    let mut bindings: Vec<Binding> = Vec::new();
    for slot in &scratch {
        if !(slot.is_variable && slot.is_binding) {
            continue;
        }
        let kind = slot.kind.ok_or(ReflectError::CorruptOrIncompatibleShader)?;
        let variable = generate_variable(&slot.var, kind == BindingKind::SpecConstant)?;
        bindings.push(Binding {
            set_idx: slot.set_idx,
            bind_idx: slot.bind_idx,
            kind,
            block_layout: slot.block_layout,
            variable,
        });
    }
    Ok(bindings)
}

fn entry(scratch: &mut [Scratch], id: u32) -> Result<&mut Scratch, ReflectError> {
    scratch
        .get_mut(id as usize)
        .ok_or(ReflectError::CorruptOrIncompatibleShader)
}

fn cloned(scratch: &[Scratch], id: u32) -> Result<Scratch, ReflectError> {
    scratch
        .get(id as usize)
        .cloned()
        .ok_or(ReflectError::CorruptOrIncompatibleShader)
}

fn process_instruction(
    scratch: &mut Vec<Scratch>,
    instructions: &[Instruction],
    idx: usize,
) -> Result<(), ReflectError> {
    match &instructions[idx] {
        Instruction::Name { target, name } => {
            entry(scratch, *target)?.var.name = name.clone();
        }
        Instruction::MemberName {
            target,
            member,
            name,
        } => {
            let dst = entry(scratch, *target)?;
            if dst.var.kind == VarKind::Struct {
                let member = dst
                    .var
                    .members
                    .get_mut(*member as usize)
                    .ok_or(ReflectError::CorruptOrIncompatibleShader)?;
                member.name = name.clone();
            } else {
                dst.pending_member_ops.push(idx);
            }
        }
        Instruction::Decorate { target, decoration } => {
            let dst = entry(scratch, *target)?;
            match decoration {
                Decoration::Binding(index) | Decoration::SpecId(index) => {
                    dst.bind_idx = *index;
                    dst.is_binding = true;
                }
                Decoration::DescriptorSet(set) => dst.set_idx = *set,
                Decoration::Block => dst.block_layout = BlockLayout::Std140,
                Decoration::BufferBlock => {
                    dst.kind = Some(BindingKind::Storage);
                    dst.block_layout = BlockLayout::Std430;
                }
                Decoration::Offset(offset) => dst.var.offset = *offset,
                Decoration::ArrayStride(stride) => dst.var.array_stride = *stride as u16,
                Decoration::MatrixStride(stride) => dst.var.matrix_stride = *stride as u16,
                Decoration::Other(_) => {}
            }
        }
        Instruction::MemberDecorate {
            target,
            member,
            decoration,
        } => {
            let dst = entry(scratch, *target)?;
            if dst.var.kind == VarKind::Struct {
                let member = dst
                    .var
                    .members
                    .get_mut(*member as usize)
                    .ok_or(ReflectError::CorruptOrIncompatibleShader)?;
                match decoration {
                    Decoration::Offset(offset) => member.offset = *offset,
                    Decoration::ArrayStride(stride) => member.array_stride = *stride as u16,
                    Decoration::MatrixStride(stride) => member.matrix_stride = *stride as u16,
                    _ => {}
                }
            } else {
                dst.pending_member_ops.push(idx);
            }
        }
        Instruction::TypeVoid { result_id } => {
            entry(scratch, *result_id)?.var.kind = VarKind::Void;
        }
        Instruction::TypeBool { result_id } => {
            let var = &mut entry(scratch, *result_id)?.var;
            var.kind = VarKind::Scalar(ScalarKind::Bool);
            var.width = 32;
        }
        Instruction::TypeInt {
            result_id,
            width,
            signed,
        } => {
            let var = &mut entry(scratch, *result_id)?.var;
            var.kind = VarKind::Scalar(if *signed {
                ScalarKind::Int
            } else {
                ScalarKind::Uint
            });
            var.width = *width as u16;
        }
        Instruction::TypeFloat { result_id, width } => {
            let var = &mut entry(scratch, *result_id)?.var;
            var.kind = VarKind::Scalar(ScalarKind::Float);
            var.width = *width as u16;
        }
        Instruction::TypeVector {
            result_id,
            component_type,
            component_count,
        } => {
            let src = cloned(scratch, *component_type)?;
            let dst = entry(scratch, *result_id)?;
            dst.consume(&src);
            dst.var.rows = *component_count;
        }
        Instruction::TypeMatrix {
            result_id,
            column_type,
            column_count,
        } => {
            let src = cloned(scratch, *column_type)?;
            let dst = entry(scratch, *result_id)?;
            dst.consume(&src);
            dst.var.columns = *column_count;
        }
        Instruction::TypeImage {
            result_id, sampled, ..
        } => {
            // Operand 'sampled' distinguishes images read through a sampler
            // from storage images; 0 (known only at run time) cannot be
            // mapped to a descriptor type.
            let kind = match sampled {
                1 => OpaqueKind::SampledImage,
                2 => OpaqueKind::StorageImage,
                _ => return Err(ReflectError::CorruptOrIncompatibleShader),
            };
            entry(scratch, *result_id)?.var.kind = VarKind::Opaque(kind);
        }
        Instruction::TypeSampler { result_id } => {
            entry(scratch, *result_id)?.var.kind = VarKind::Opaque(OpaqueKind::Sampler);
        }
        Instruction::TypeSampledImage {
            result_id,
            image_type,
        } => {
            let src = cloned(scratch, *image_type)?;
            let dst = entry(scratch, *result_id)?;
            dst.consume(&src);
            dst.var.kind = VarKind::Opaque(OpaqueKind::CombinedImageSampler);
        }
        Instruction::TypeArray {
            result_id,
            element_type,
            length_id,
        } => {
            let src = cloned(scratch, *element_type)?;
            if src.var.is_array() {
                return Err(ReflectError::UnsupportedModule("nested arrays"));
            }
            let length = cloned(scratch, *length_id)?;
            let elements = length
                .var
                .constant_value
                .ok_or(ReflectError::CorruptOrIncompatibleShader)?;

            let dst = entry(scratch, *result_id)?;
            dst.consume(&src);
            dst.var.array_elements = elements as u32;
            if length.kind == Some(BindingKind::SpecConstant) {
                dst.var.length_spec_id = Some(length.bind_idx);
            }
        }
        Instruction::TypeRuntimeArray {
            result_id,
            element_type,
        } => {
            let src = cloned(scratch, *element_type)?;
            let dst = entry(scratch, *result_id)?;
            dst.consume(&src);
            dst.var.array_elements = 0;
        }
        Instruction::TypeStruct {
            result_id,
            member_types,
        } => {
            let mut members = Vec::with_capacity(member_types.len());
            for member in member_types {
                members.push(cloned(scratch, *member)?.var);
            }
            let pending = {
                let dst = entry(scratch, *result_id)?;
                dst.var.kind = VarKind::Struct;
                dst.var.members = members;
                std::mem::take(&mut dst.pending_member_ops)
            };

            // Member names and decorations that arrived before the struct
            // type existed apply now.
            for op_idx in pending {
                process_instruction(scratch, instructions, op_idx)?;
            }
        }
        Instruction::TypeOpaque { .. } => {
            return Err(ReflectError::UnsupportedModule("OpTypeOpaque"));
        }
        Instruction::TypePointer {
            result_id,
            storage_class,
            pointee,
        } => {
            let src = cloned(scratch, *pointee)?;
            let dst = entry(scratch, *result_id)?;
            dst.consume(&src);
            apply_storage_class(dst, *storage_class);
        }
        Instruction::TypeForwardPointer { .. } => {
            return Err(ReflectError::UnsupportedModule("OpTypeForwardPointer"));
        }
        Instruction::Variable {
            result_type,
            result_id,
            storage_class,
        } => {
            let src = cloned(scratch, *result_type)?;
            let dst = entry(scratch, *result_id)?;
            dst.consume(&src);
            apply_storage_class(dst, *storage_class);
            dst.is_variable = true;
        }
        Instruction::ConstantTrue {
            result_type,
            result_id,
        }
        | Instruction::SpecConstantTrue {
            result_type,
            result_id,
        } => {
            let spec = matches!(&instructions[idx], Instruction::SpecConstantTrue { .. });
            constant(scratch, *result_type, *result_id, spec, Some(1), true)?;
        }
        Instruction::ConstantFalse {
            result_type,
            result_id,
        }
        | Instruction::ConstantNull {
            result_type,
            result_id,
        }
        | Instruction::SpecConstantFalse {
            result_type,
            result_id,
        } => {
            let spec = matches!(&instructions[idx], Instruction::SpecConstantFalse { .. });
            constant(scratch, *result_type, *result_id, spec, Some(0), true)?;
        }
        Instruction::Constant {
            result_type,
            result_id,
            value,
        }
        | Instruction::SpecConstant {
            result_type,
            result_id,
            value,
        } => {
            let spec = matches!(&instructions[idx], Instruction::SpecConstant { .. });
            let mut assembled = 0u64;
            for (i, word) in value.iter().take(2).enumerate() {
                assembled |= u64::from(*word) << (32 * i);
            }
            constant(scratch, *result_type, *result_id, spec, Some(assembled), false)?;
        }
        Instruction::ConstantComposite {
            result_type,
            result_id,
            ..
        }
        | Instruction::SpecConstantComposite {
            result_type,
            result_id,
            ..
        } => {
            let spec = matches!(&instructions[idx], Instruction::SpecConstantComposite { .. });
            constant(scratch, *result_type, *result_id, spec, None, false)?;
        }
        Instruction::SpecConstantOp { .. } => {
            return Err(ReflectError::UnsupportedModule("OpSpecConstantOp"));
        }
        Instruction::Unknown { .. } => {}
    }
    Ok(())
}

fn apply_storage_class(dst: &mut Scratch, storage_class: StorageClass) {
    match storage_class {
        StorageClass::Uniform | StorageClass::UniformConstant => {
            if dst.kind.is_none() {
                dst.kind = Some(BindingKind::Uniform);
            }
        }
        StorageClass::PushConstant => {
            dst.kind = Some(BindingKind::PushConstant);
            dst.is_binding = true;
        }
        StorageClass::Other(_) => {}
    }
}

fn constant(
    scratch: &mut [Scratch],
    result_type: u32,
    result_id: u32,
    spec: bool,
    value: Option<u64>,
    requires_bool: bool,
) -> Result<(), ReflectError> {
    let src = cloned(scratch, result_type)?;
    let dst = entry(scratch, result_id)?;
    dst.consume(&src);
    if requires_bool && dst.var.kind != VarKind::Scalar(ScalarKind::Bool) {
        return Err(ReflectError::CorruptOrIncompatibleShader);
    }
    if value.is_some() {
        dst.var.constant_value = value;
    }
    if spec {
        dst.kind = Some(BindingKind::SpecConstant);
    }
    dst.is_variable = true;
    Ok(())
}

/// Materializes the accumulated layout attributes into a [`Variable`] tree.
fn generate_variable(
    reflected: &ReflectedVariable,
    is_spec_constant: bool,
) -> Result<Variable, ReflectError> {
    let layout = match reflected.kind {
        VarKind::Unknown | VarKind::Void => {
            return Err(ReflectError::CorruptOrIncompatibleShader);
        }
        VarKind::Opaque(kind) => VariableLayout::Opaque { kind },
        VarKind::Struct => {
            // Some compilers omit member offsets; with all offsets zero the
            // layout is reconstructed assuming tight packing in declaration
            // order. Otherwise members sort by their decorated offset.
            let tight = reflected.members.iter().all(|m| m.offset == 0);
            let mut members: Vec<Variable> = Vec::with_capacity(reflected.members.len());
            if tight {
                let mut offset = 0;
                for member in &reflected.members {
                    let mut var = generate_variable(member, false)?;
                    var.offset = offset;
                    offset += var.size_bytes();
                    members.push(var);
                }
            } else {
                for member in &reflected.members {
                    let var = generate_variable(member, false)?;
                    let at = members
                        .iter()
                        .position(|m| m.offset > var.offset)
                        .unwrap_or(members.len());
                    members.insert(at, var);
                }
            }
            VariableLayout::Struct { members }
        }
        VarKind::Scalar(kind) => {
            if reflected.rows > 1 || reflected.columns > 1 {
                VariableLayout::Matrix {
                    kind,
                    width: reflected.width,
                    rows: reflected.rows,
                    columns: reflected.columns,
                    stride: reflected.matrix_stride,
                }
            } else {
                VariableLayout::Scalar {
                    kind,
                    width: reflected.width,
                }
            }
        }
    };

    let mut variable = Variable {
        name: reflected.name.clone(),
        offset: reflected.offset,
        layout,
        default_value: None,
    };

    if reflected.is_array() {
        let element = Variable {
            name: variable.name.clone(),
            offset: 0,
            layout: variable.layout,
            default_value: None,
        };
        variable = Variable {
            name: reflected.name.clone(),
            offset: reflected.offset,
            layout: VariableLayout::Array {
                element: Box::new(element),
                elements: reflected.array_elements,
                stride: reflected.array_stride,
                length_spec_id: reflected.length_spec_id,
            },
            default_value: None,
        };
    }

    if is_spec_constant {
        let value = reflected
            .constant_value
            .ok_or(ReflectError::CorruptOrIncompatibleShader)?;
        let size = usize::from(reflected.width / 8).max(1);
        let bytes: SmallVec<[u8; 8]> = value.to_le_bytes()[..size.min(8)].into();
        variable.default_value = Some(bytes);
    }

    Ok(variable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::spirv::MAGIC_NUMBER;

    fn instr(opcode: u16, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | u32::from(opcode)];
        words.extend_from_slice(operands);
        words
    }

    fn name_op(opcode: u16, head: &[u32], name: &str) -> Vec<u32> {
        let mut operands = head.to_vec();
        let mut bytes: Vec<u8> = name.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        operands.extend(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        instr(opcode, &operands)
    }

    fn module(instructions: &[Vec<u32>]) -> Vec<u32> {
        let mut words = vec![MAGIC_NUMBER, 0x0001_0300, 0, 64, 0];
        for i in instructions {
            words.extend_from_slice(i);
        }
        words
    }

    /// `layout(std140, set = 0, binding = 2) uniform UBO { vec4 color; };`
    fn uniform_block_module() -> Vec<u32> {
        module(&[
            name_op(5, &[3], "UBO"),
            name_op(6, &[3, 0], "color"),
            instr(71, &[3, 2]),         // Block
            instr(72, &[3, 0, 35, 16]), // member 0 Offset 16
            instr(71, &[5, 34, 0]),     // DescriptorSet 0
            instr(71, &[5, 33, 2]),     // Binding 2
            instr(22, &[1, 32]),        // %1 = float32
            instr(23, &[2, 1, 4]),      // %2 = vec4
            instr(30, &[3, 2]),         // %3 = struct { %2 }
            instr(32, &[4, 2, 3]),      // %4 = ptr Uniform %3
            instr(59, &[4, 5, 2]),      // %5 = variable %4 Uniform
        ])
    }

    #[test]
    fn reflects_a_uniform_block() {
        let bindings = reflect_bindings(&uniform_block_module()).unwrap();
        assert_eq!(bindings.len(), 1);

        let binding = &bindings[0];
        assert_eq!(binding.set_idx, 0);
        assert_eq!(binding.bind_idx, 2);
        assert_eq!(binding.kind, BindingKind::Uniform);
        assert_eq!(binding.block_layout, BlockLayout::Std140);
        assert_eq!(binding.variable.name, "UBO");

        let member = binding.variable.member("color").unwrap();
        assert_eq!(member.offset, 16);
        assert_eq!(
            member.layout,
            VariableLayout::Matrix {
                kind: ScalarKind::Float,
                width: 32,
                rows: 4,
                columns: 1,
                stride: 0,
            }
        );
        assert_eq!(binding.variable.size_bytes(), 32);
    }

    #[test]
    fn reflection_is_deterministic() {
        let words = uniform_block_module();
        assert_eq!(
            reflect_bindings(&words).unwrap(),
            reflect_bindings(&words).unwrap()
        );
    }

    /// A storage block holding an array whose length is specialization
    /// constant 7 (default 4), plus the constant itself.
    fn spec_array_module() -> Vec<u32> {
        module(&[
            name_op(5, &[10], "count"),
            name_op(5, &[23], "Data"),
            name_op(6, &[23, 0], "data"),
            instr(71, &[10, 1, 7]),  // SpecId 7
            instr(71, &[22, 6, 4]),  // ArrayStride 4
            instr(71, &[23, 3]),     // BufferBlock
            instr(72, &[23, 0, 35, 0]),
            instr(71, &[25, 34, 1]), // DescriptorSet 1
            instr(71, &[25, 33, 3]), // Binding 3
            instr(21, &[20, 32, 0]), // %20 = uint32
            instr(50, &[20, 10, 4]), // %10 = SpecConstant %20 4
            instr(22, &[21, 32]),    // %21 = float32
            instr(28, &[22, 21, 10]),
            instr(30, &[23, 22]),
            instr(32, &[24, 2, 23]),
            instr(59, &[24, 25, 2]),
        ])
    }

    #[test]
    fn reflects_spec_constants_and_specialized_array_lengths() {
        let bindings = reflect_bindings(&spec_array_module()).unwrap();
        assert_eq!(bindings.len(), 2);

        let spec = &bindings[0];
        assert_eq!(spec.kind, BindingKind::SpecConstant);
        assert_eq!(spec.bind_idx, 7);
        assert_eq!(spec.variable.name, "count");
        assert_eq!(
            spec.variable.default_value.as_deref(),
            Some(&[4u8, 0, 0, 0][..])
        );

        let block = &bindings[1];
        assert_eq!((block.set_idx, block.bind_idx), (1, 3));
        assert_eq!(block.kind, BindingKind::Storage);
        assert_eq!(block.block_layout, BlockLayout::Std430);
        let member = block.variable.member("data").unwrap();
        match &member.layout {
            VariableLayout::Array {
                elements,
                stride,
                length_spec_id,
                element,
            } => {
                assert_eq!(*elements, 4);
                assert_eq!(*stride, 4);
                assert_eq!(*length_spec_id, Some(7));
                assert!(matches!(
                    element.layout,
                    VariableLayout::Scalar {
                        kind: ScalarKind::Float,
                        width: 32
                    }
                ));
            }
            other => panic!("expected an array, got {:?}", other),
        }
        assert_eq!(member.size_bytes(), 16);
    }

    #[test]
    fn reflects_push_constants() {
        let words = module(&[
            name_op(5, &[33], "PushData"),
            name_op(6, &[31, 0], "time"),
            instr(71, &[31, 2]), // Block
            instr(72, &[31, 0, 35, 0]),
            instr(22, &[30, 32]),
            instr(30, &[31, 30]),
            instr(32, &[32, 9, 31]), // ptr PushConstant
            instr(59, &[32, 33, 9]),
        ]);
        let bindings = reflect_bindings(&words).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].kind, BindingKind::PushConstant);
        assert!(bindings[0].variable.member("time").is_some());
    }

    #[test]
    fn reconstructs_offsets_when_all_are_zero() {
        // Two members, no offset decorations: tight packing applies.
        let words = module(&[
            name_op(6, &[3, 0], "a"),
            name_op(6, &[3, 1], "b"),
            instr(71, &[3, 2]), // Block
            instr(71, &[5, 34, 0]),
            instr(71, &[5, 33, 0]),
            instr(22, &[1, 32]),   // float32
            instr(23, &[2, 1, 2]), // vec2
            instr(30, &[3, 2, 1]), // struct { vec2, float }
            instr(32, &[4, 2, 3]),
            instr(59, &[4, 5, 2]),
        ]);
        let bindings = reflect_bindings(&words).unwrap();
        let a = bindings[0].variable.member("a").unwrap();
        let b = bindings[0].variable.member("b").unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 8);
        assert_eq!(bindings[0].variable.size_bytes(), 12);
    }

    #[test]
    fn combined_image_sampler_is_opaque() {
        let words = module(&[
            name_op(5, &[5], "tex"),
            instr(71, &[5, 34, 0]),
            instr(71, &[5, 33, 1]),
            instr(22, &[1, 32]),
            // %2 = image, sampled = 1
            instr(25, &[2, 1, 1, 0, 0, 0, 1, 0]),
            instr(27, &[3, 2]), // sampled image
            instr(32, &[4, 0, 3]),
            instr(59, &[4, 5, 0]),
        ]);
        let bindings = reflect_bindings(&words).unwrap();
        assert_eq!(bindings[0].kind, BindingKind::Uniform);
        assert_eq!(
            bindings[0].variable.layout,
            VariableLayout::Opaque {
                kind: OpaqueKind::CombinedImageSampler
            }
        );
    }

    #[test]
    fn binding_with_unresolved_kind_is_rejected() {
        // Decorated as a binding but the variable lives in an unrecognized
        // storage class, so its kind never resolves.
        let words = module(&[
            instr(71, &[5, 34, 0]),
            instr(71, &[5, 33, 0]),
            instr(22, &[1, 32]),
            instr(32, &[4, 7, 1]), // ptr, storage class 7
            instr(59, &[4, 5, 7]),
        ]);
        assert_eq!(
            reflect_bindings(&words),
            Err(ReflectError::CorruptOrIncompatibleShader)
        );
    }

    #[test]
    fn truncated_module_reports_a_parse_error() {
        let mut words = module(&[]);
        words.push((3 << 16) | 71);
        assert!(matches!(
            reflect_bindings(&words),
            Err(ReflectError::Parse(_))
        ));
    }

    #[test]
    fn forward_pointers_are_unsupported() {
        let words = module(&[instr(39, &[4, 2])]);
        assert_eq!(
            reflect_bindings(&words),
            Err(ReflectError::UnsupportedModule("OpTypeForwardPointer"))
        );
    }
}
