//! Minimal SPIR-V binary parser.
//!
//! Parses the module header and the instruction stream into a typed
//! [`Instruction`] list. Only the instructions the binding reflector cares
//! about are decoded; everything else is kept as [`Instruction::Unknown`] so
//! the reflector can skip it without losing its place in the stream.

use std::{error, fmt};

/// The SPIR-V magic number, as read in the module's own endianness.
pub const MAGIC_NUMBER: u32 = 0x0723_0203;

/// A parsed SPIR-V module: header fields plus the instruction stream.
#[derive(Clone, Debug)]
pub struct Spirv {
    /// `(major, minor)` from the version header word.
    pub version: (u8, u8),
    /// Upper bound on result ids used by the module.
    pub bound: u32,
    pub instructions: Vec<Instruction>,
}

/// Error produced while decoding a SPIR-V binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The input is shorter than the five-word module header.
    MissingHeader,
    /// The first word is not the SPIR-V magic number.
    WrongHeader,
    /// The module declares a major version this parser does not understand.
    UnsupportedVersion { major: u8, minor: u8 },
    /// An instruction's declared word count runs past the end of the input,
    /// or is zero.
    IncompleteInstruction,
    /// The byte input's length is not a multiple of four.
    MisalignedInput,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingHeader => write!(f, "input is shorter than the SPIR-V header"),
            ParseError::WrongHeader => write!(f, "input does not start with the SPIR-V magic number"),
            ParseError::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported SPIR-V version {}.{}", major, minor)
            }
            ParseError::IncompleteInstruction => {
                write!(f, "an instruction runs past the end of the input")
            }
            ParseError::MisalignedInput => {
                write!(f, "byte length is not a multiple of four")
            }
        }
    }
}

impl error::Error for ParseError {}

/// Storage class of a pointer or variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageClass {
    UniformConstant,
    Uniform,
    PushConstant,
    Other(u32),
}

impl From<u32> for StorageClass {
    fn from(value: u32) -> Self {
        match value {
            0 => StorageClass::UniformConstant,
            2 => StorageClass::Uniform,
            9 => StorageClass::PushConstant,
            other => StorageClass::Other(other),
        }
    }
}

/// A decoration together with its operand, where one is carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoration {
    SpecId(u32),
    Block,
    BufferBlock,
    ArrayStride(u32),
    MatrixStride(u32),
    Binding(u32),
    DescriptorSet(u32),
    Offset(u32),
    Other(u32),
}

impl Decoration {
    fn decode(decoration: u32, operands: &[u32]) -> Self {
        let operand = |i: usize| operands.get(i).copied().unwrap_or(0);
        match decoration {
            1 => Decoration::SpecId(operand(0)),
            2 => Decoration::Block,
            3 => Decoration::BufferBlock,
            6 => Decoration::ArrayStride(operand(0)),
            7 => Decoration::MatrixStride(operand(0)),
            33 => Decoration::Binding(operand(0)),
            34 => Decoration::DescriptorSet(operand(0)),
            35 => Decoration::Offset(operand(0)),
            other => Decoration::Other(other),
        }
    }
}

/// The subset of SPIR-V instructions the reflector interprets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Name {
        target: u32,
        name: String,
    },
    MemberName {
        target: u32,
        member: u32,
        name: String,
    },
    Decorate {
        target: u32,
        decoration: Decoration,
    },
    MemberDecorate {
        target: u32,
        member: u32,
        decoration: Decoration,
    },
    TypeVoid {
        result_id: u32,
    },
    TypeBool {
        result_id: u32,
    },
    TypeInt {
        result_id: u32,
        width: u32,
        signed: bool,
    },
    TypeFloat {
        result_id: u32,
        width: u32,
    },
    TypeVector {
        result_id: u32,
        component_type: u32,
        component_count: u32,
    },
    TypeMatrix {
        result_id: u32,
        column_type: u32,
        column_count: u32,
    },
    TypeImage {
        result_id: u32,
        sampled_type: u32,
        /// 1 if the image is read through a sampler, 2 for image load/store,
        /// 0 when only known at run time.
        sampled: u32,
    },
    TypeSampler {
        result_id: u32,
    },
    TypeSampledImage {
        result_id: u32,
        image_type: u32,
    },
    TypeArray {
        result_id: u32,
        element_type: u32,
        length_id: u32,
    },
    TypeRuntimeArray {
        result_id: u32,
        element_type: u32,
    },
    TypeStruct {
        result_id: u32,
        member_types: Vec<u32>,
    },
    TypeOpaque {
        result_id: u32,
        name: String,
    },
    TypePointer {
        result_id: u32,
        storage_class: StorageClass,
        pointee: u32,
    },
    TypeForwardPointer {
        pointer_type: u32,
        storage_class: StorageClass,
    },
    ConstantTrue {
        result_type: u32,
        result_id: u32,
    },
    ConstantFalse {
        result_type: u32,
        result_id: u32,
    },
    Constant {
        result_type: u32,
        result_id: u32,
        value: Vec<u32>,
    },
    ConstantComposite {
        result_type: u32,
        result_id: u32,
        constituents: Vec<u32>,
    },
    ConstantNull {
        result_type: u32,
        result_id: u32,
    },
    SpecConstantTrue {
        result_type: u32,
        result_id: u32,
    },
    SpecConstantFalse {
        result_type: u32,
        result_id: u32,
    },
    SpecConstant {
        result_type: u32,
        result_id: u32,
        value: Vec<u32>,
    },
    SpecConstantComposite {
        result_type: u32,
        result_id: u32,
        constituents: Vec<u32>,
    },
    SpecConstantOp {
        result_type: u32,
        result_id: u32,
        opcode: u32,
    },
    Variable {
        result_type: u32,
        result_id: u32,
        storage_class: StorageClass,
    },
    Unknown {
        opcode: u16,
        operands: Vec<u32>,
    },
}

impl Spirv {
    /// Parses a SPIR-V module from its word stream.
    pub fn parse(words: &[u32]) -> Result<Spirv, ParseError> {
        if words.len() < 5 {
            return Err(ParseError::MissingHeader);
        }
        if words[0] != MAGIC_NUMBER {
            return Err(ParseError::WrongHeader);
        }
        let major = ((words[1] >> 16) & 0xff) as u8;
        let minor = ((words[1] >> 8) & 0xff) as u8;
        if major != 1 {
            return Err(ParseError::UnsupportedVersion { major, minor });
        }
        let bound = words[3];

        let mut instructions = Vec::new();
        let mut rest = &words[5..];
        while !rest.is_empty() {
            let word_count = (rest[0] >> 16) as usize;
            if word_count == 0 || word_count > rest.len() {
                return Err(ParseError::IncompleteInstruction);
            }
            instructions.push(parse_instruction(&rest[..word_count]));
            rest = &rest[word_count..];
        }

        Ok(Spirv {
            version: (major, minor),
            bound,
            instructions,
        })
    }

    /// Parses a SPIR-V module from raw bytes, handling either endianness.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Spirv, ParseError> {
        let words = words_from_bytes(bytes)?;
        Spirv::parse(&words)
    }
}

/// Reassembles a byte stream into SPIR-V words, byte-swapping if the magic
/// number indicates the module was produced on a big-endian host.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, ParseError> {
    if bytes.len() % 4 != 0 {
        return Err(ParseError::MisalignedInput);
    }
    if bytes.len() < 4 {
        return Err(ParseError::MissingHeader);
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if words[0] == MAGIC_NUMBER {
        Ok(words)
    } else if words[0].swap_bytes() == MAGIC_NUMBER {
        Ok(words.into_iter().map(u32::swap_bytes).collect())
    } else {
        Err(ParseError::WrongHeader)
    }
}

/// Decodes a NUL-terminated UTF-8 string literal and returns it with the
/// number of words it occupied.
fn parse_string(words: &[u32]) -> (String, usize) {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    let mut consumed = 0;
    'outer: for word in words {
        consumed += 1;
        for byte in word.to_le_bytes() {
            if byte == 0 {
                break 'outer;
            }
            bytes.push(byte);
        }
    }
    (String::from_utf8_lossy(&bytes).into_owned(), consumed)
}

fn parse_instruction(words: &[u32]) -> Instruction {
    let opcode = (words[0] & 0xffff) as u16;
    let operands = &words[1..];
    let operand = |i: usize| operands.get(i).copied().unwrap_or(0);

    match opcode {
        5 => {
            let (name, _) = parse_string(&operands[1..]);
            Instruction::Name {
                target: operand(0),
                name,
            }
        }
        6 => {
            let (name, _) = parse_string(&operands[2..]);
            Instruction::MemberName {
                target: operand(0),
                member: operand(1),
                name,
            }
        }
        19 => Instruction::TypeVoid {
            result_id: operand(0),
        },
        20 => Instruction::TypeBool {
            result_id: operand(0),
        },
        21 => Instruction::TypeInt {
            result_id: operand(0),
            width: operand(1),
            signed: operand(2) != 0,
        },
        22 => Instruction::TypeFloat {
            result_id: operand(0),
            width: operand(1),
        },
        23 => Instruction::TypeVector {
            result_id: operand(0),
            component_type: operand(1),
            component_count: operand(2),
        },
        24 => Instruction::TypeMatrix {
            result_id: operand(0),
            column_type: operand(1),
            column_count: operand(2),
        },
        25 => Instruction::TypeImage {
            result_id: operand(0),
            sampled_type: operand(1),
            sampled: operand(6),
        },
        26 => Instruction::TypeSampler {
            result_id: operand(0),
        },
        27 => Instruction::TypeSampledImage {
            result_id: operand(0),
            image_type: operand(1),
        },
        28 => Instruction::TypeArray {
            result_id: operand(0),
            element_type: operand(1),
            length_id: operand(2),
        },
        29 => Instruction::TypeRuntimeArray {
            result_id: operand(0),
            element_type: operand(1),
        },
        30 => Instruction::TypeStruct {
            result_id: operand(0),
            member_types: operands[1..].to_vec(),
        },
        31 => {
            let (name, _) = parse_string(&operands[1..]);
            Instruction::TypeOpaque {
                result_id: operand(0),
                name,
            }
        }
        32 => Instruction::TypePointer {
            result_id: operand(0),
            storage_class: StorageClass::from(operand(1)),
            pointee: operand(2),
        },
        39 => Instruction::TypeForwardPointer {
            pointer_type: operand(0),
            storage_class: StorageClass::from(operand(1)),
        },
        41 => Instruction::ConstantTrue {
            result_type: operand(0),
            result_id: operand(1),
        },
        42 => Instruction::ConstantFalse {
            result_type: operand(0),
            result_id: operand(1),
        },
        43 => Instruction::Constant {
            result_type: operand(0),
            result_id: operand(1),
            value: operands[2..].to_vec(),
        },
        44 => Instruction::ConstantComposite {
            result_type: operand(0),
            result_id: operand(1),
            constituents: operands[2..].to_vec(),
        },
        46 => Instruction::ConstantNull {
            result_type: operand(0),
            result_id: operand(1),
        },
        48 => Instruction::SpecConstantTrue {
            result_type: operand(0),
            result_id: operand(1),
        },
        49 => Instruction::SpecConstantFalse {
            result_type: operand(0),
            result_id: operand(1),
        },
        50 => Instruction::SpecConstant {
            result_type: operand(0),
            result_id: operand(1),
            value: operands[2..].to_vec(),
        },
        51 => Instruction::SpecConstantComposite {
            result_type: operand(0),
            result_id: operand(1),
            constituents: operands[2..].to_vec(),
        },
        52 => Instruction::SpecConstantOp {
            result_type: operand(0),
            result_id: operand(1),
            opcode: operand(2),
        },
        59 => Instruction::Variable {
            result_type: operand(0),
            result_id: operand(1),
            storage_class: StorageClass::from(operand(2)),
        },
        71 => Instruction::Decorate {
            target: operand(0),
            decoration: Decoration::decode(operand(1), &operands[2..]),
        },
        72 => Instruction::MemberDecorate {
            target: operand(0),
            member: operand(1),
            decoration: Decoration::decode(operand(2), &operands[3..]),
        },
        _ => Instruction::Unknown {
            opcode,
            operands: operands.to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(opcode: u16, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | u32::from(opcode)];
        words.extend_from_slice(operands);
        words
    }

    fn module(instructions: &[Vec<u32>]) -> Vec<u32> {
        let mut words = vec![MAGIC_NUMBER, 0x0001_0300, 0, 100, 0];
        for i in instructions {
            words.extend_from_slice(i);
        }
        words
    }

    fn string_operands(s: &str) -> Vec<u32> {
        let mut bytes: Vec<u8> = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(
            Spirv::parse(&[MAGIC_NUMBER, 0, 0]),
            Err(ParseError::MissingHeader)
        ));
    }

    #[test]
    fn rejects_wrong_magic() {
        let words = [0xdead_beef, 0x0001_0000, 0, 1, 0];
        assert!(matches!(Spirv::parse(&words), Err(ParseError::WrongHeader)));
    }

    #[test]
    fn rejects_instruction_past_the_end() {
        let mut words = module(&[]);
        // Claims 4 words but only 1 follows.
        words.push((4 << 16) | 71);
        assert!(matches!(
            Spirv::parse(&words),
            Err(ParseError::IncompleteInstruction)
        ));
    }

    #[test]
    fn decodes_names_and_decorations() {
        let mut name_ops = vec![7];
        name_ops.extend(string_operands("color"));
        let words = module(&[
            instr(5, &name_ops),
            instr(71, &[7, 34, 2]),
            instr(71, &[7, 33, 5]),
        ]);
        let spirv = Spirv::parse(&words).unwrap();
        assert_eq!(
            spirv.instructions,
            vec![
                Instruction::Name {
                    target: 7,
                    name: "color".to_owned()
                },
                Instruction::Decorate {
                    target: 7,
                    decoration: Decoration::DescriptorSet(2)
                },
                Instruction::Decorate {
                    target: 7,
                    decoration: Decoration::Binding(5)
                },
            ]
        );
    }

    #[test]
    fn byte_swapped_modules_parse() {
        let words = module(&[instr(19, &[1])]);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.swap_bytes().to_le_bytes()).collect();
        let spirv = Spirv::parse_bytes(&bytes).unwrap();
        assert_eq!(spirv.instructions, vec![Instruction::TypeVoid { result_id: 1 }]);
    }

    #[test]
    fn misaligned_bytes_are_rejected() {
        assert!(matches!(
            Spirv::parse_bytes(&[0x03, 0x02, 0x23]),
            Err(ParseError::MisalignedInput)
        ));
    }
}
