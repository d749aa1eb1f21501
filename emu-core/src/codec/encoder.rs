//! Assembling [`Instruction`] values into the wire encoding.

use super::descriptor::Descriptor;
use super::operand::{ComplexTerm, Operand};
use super::opcode;
use super::stream::ByteSink;
use crate::registers::RegisterId;
use crate::width::Width;

/// One instruction, in the assembler's in-memory representation. `opcode`
/// and `operands.len()` must agree with [`opcode::arity`]; [`encode`]
/// checks this before writing anything.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: u8,
    pub operands: Vec<Operand>,
}

/// Failure to encode an [`Instruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    UnknownOpcode(u8),
    ArityMismatch { opcode: u8, expected: u8, got: usize },
    /// A `Complex` operand's term shape doesn't match any of the fifteen
    /// compact forms (e.g. an immediate base paired with an index term).
    InvalidComplexForm,
    /// An operand's declared width can't carry the value being encoded
    /// (caught defensively; the assembler front end should reject this
    /// earlier).
    SizeMismatch,
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::UnknownOpcode(op) => write!(f, "unknown opcode 0x{op:02X}"),
            EncodeError::ArityMismatch { opcode, expected, got } => write!(
                f,
                "opcode 0x{opcode:02X} takes {expected} operand(s), got {got}"
            ),
            EncodeError::InvalidComplexForm => write!(f, "operand shape matches no compact form"),
            EncodeError::SizeMismatch => write!(f, "operand width too narrow for its value"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// A label/sublabel reference recorded while encoding, to be resolved once
/// every block's address is known. `offset` is the byte position of the
/// 8-byte placeholder within the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationSite {
    pub offset: usize,
    pub target: RelocationTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationTarget {
    Label(u32),
    Sublabel(u32),
}

/// Placeholder written for an unresolved `Label`/`Sublabel` operand,
/// overwritten in place once the target address is known.
pub const RELOCATION_PLACEHOLDER: u64 = 0xDEAD_BEEF_DEAD_BEEF;

/// Top bit of an offset-term register-id payload byte, carrying the
/// `ComplexOffset::negative` sign (the only complex term that can be
/// negative). Every valid `RegisterId` is `< 0x80`, so the bit is
/// otherwise unused.
const OFFSET_SIGN_BIT: u8 = 0x80;

/// Encode `instr` onto `sink`, appending any label/sublabel references to
/// `relocations`.
pub fn encode(
    instr: &Instruction,
    sink: &mut impl ByteSink,
    relocations: &mut Vec<RelocationSite>,
) -> Result<(), EncodeError> {
    let expected = opcode::arity(instr.opcode).ok_or(EncodeError::UnknownOpcode(instr.opcode))?;
    if instr.operands.len() != expected as usize {
        return Err(EncodeError::ArityMismatch {
            opcode: instr.opcode,
            expected,
            got: instr.operands.len(),
        });
    }
    sink.push(instr.opcode);
    for operand in &instr.operands {
        encode_operand(operand, sink, relocations)?;
    }
    Ok(())
}

fn encode_operand(
    operand: &Operand,
    sink: &mut impl ByteSink,
    relocations: &mut Vec<RelocationSite>,
) -> Result<(), EncodeError> {
    match operand {
        Operand::Register(id, width) => {
            let (primary, _) = Descriptor {
                form: super::operand::CompactForm::Reg,
                size: *width,
                imm0_size: Width::Byte,
                imm1_size: None,
            }
            .to_bytes();
            sink.push(primary);
            sink.push(id.0);
            Ok(())
        }
        Operand::Immediate(value, width) => {
            let (primary, _) = Descriptor {
                form: super::operand::CompactForm::Imm,
                size: *width,
                imm0_size: *width,
                imm1_size: None,
            }
            .to_bytes();
            sink.push(primary);
            push_sized(sink, *value, *width);
            Ok(())
        }
        Operand::Memory(addr, width) => {
            let (primary, _) = Descriptor {
                form: super::operand::CompactForm::MemBaseImm,
                size: *width,
                imm0_size: Width::Qword,
                imm1_size: None,
            }
            .to_bytes();
            sink.push(primary);
            push_sized(sink, *addr, Width::Qword);
            Ok(())
        }
        Operand::Complex(data, width) => encode_complex(data, *width, sink),
        Operand::Label(id) => {
            encode_relocatable(sink, relocations, RelocationTarget::Label(*id));
            Ok(())
        }
        Operand::Sublabel(id) => {
            encode_relocatable(sink, relocations, RelocationTarget::Sublabel(*id));
            Ok(())
        }
    }
}

fn encode_relocatable(
    sink: &mut impl ByteSink,
    relocations: &mut Vec<RelocationSite>,
    target: RelocationTarget,
) {
    let (primary, _) = Descriptor {
        form: super::operand::CompactForm::Imm,
        size: Width::Qword,
        imm0_size: Width::Qword,
        imm1_size: None,
    }
    .to_bytes();
    sink.push(primary);
    let offset = sink.position();
    push_sized(sink, RELOCATION_PLACEHOLDER, Width::Qword);
    relocations.push(RelocationSite { offset, target });
}

fn encode_complex(
    data: &super::operand::ComplexData,
    width: Width,
    sink: &mut impl ByteSink,
) -> Result<(), EncodeError> {
    let form = super::operand::complex_form(data);
    let shape = form.shape().ok_or(EncodeError::InvalidComplexForm)?;
    if shape.base_reg != matches!(data.base, ComplexTerm::Register(_)) {
        return Err(EncodeError::InvalidComplexForm);
    }

    let imm0_size = first_immediate_width(data).unwrap_or(Width::Byte);
    let imm1_size = second_immediate_width(data);
    let (primary, extra) =
        Descriptor { form, size: width, imm0_size, imm1_size }.to_bytes();
    sink.push(primary);
    if let Some(extra) = extra {
        sink.push(extra);
    }

    encode_term(sink, data.base, None);
    if let Some(index) = data.index {
        encode_term(sink, index, None);
    }
    if let Some(offset) = data.offset {
        encode_term(sink, offset.term, Some(offset.negative));
    }
    Ok(())
}

fn first_immediate_width(data: &super::operand::ComplexData) -> Option<Width> {
    if let ComplexTerm::Immediate(_, w) = data.base {
        return Some(w);
    }
    if let Some(ComplexTerm::Immediate(_, w)) = data.index {
        return Some(w);
    }
    None
}

fn second_immediate_width(data: &super::operand::ComplexData) -> Option<Width> {
    let first_is_index = matches!(data.index, Some(ComplexTerm::Immediate(..)));
    if let Some(offset) = data.offset {
        if let ComplexTerm::Immediate(_, w) = offset.term {
            // Only the two-immediate forms (base+offset or index+offset)
            // need a second width; a lone offset immediate is imm0.
            let base_is_imm = matches!(data.base, ComplexTerm::Immediate(..));
            if base_is_imm || first_is_index {
                return Some(w);
            }
        }
    }
    None
}

fn encode_term(sink: &mut impl ByteSink, term: ComplexTerm, sign: Option<bool>) {
    match term {
        ComplexTerm::Register(id) => {
            let byte = if sign == Some(true) { id.0 | OFFSET_SIGN_BIT } else { id.0 };
            sink.push(byte);
        }
        ComplexTerm::Immediate(value, width) => push_sized(sink, value, width),
    }
}

fn push_sized(sink: &mut impl ByteSink, value: u64, width: Width) {
    let masked = value & width.mask();
    sink.extend(&masked.to_le_bytes()[..width.bytes() as usize]);
}

/// Decode the sign carried by an offset-term register payload byte, as
/// written by [`encode_term`].
#[must_use]
pub fn split_offset_register_byte(byte: u8) -> (RegisterId, bool) {
    (RegisterId(byte & !OFFSET_SIGN_BIT), byte & OFFSET_SIGN_BIT != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterId;

    #[test]
    fn rejects_arity_mismatch() {
        let instr = Instruction { opcode: opcode::misc::HLT, operands: vec![Operand::Immediate(0, Width::Byte)] };
        let mut sink = Vec::new();
        let mut relocs = Vec::new();
        assert_eq!(
            encode(&instr, &mut sink, &mut relocs),
            Err(EncodeError::ArityMismatch { opcode: opcode::misc::HLT, expected: 0, got: 1 })
        );
    }

    #[test]
    fn encodes_register_and_immediate_operands() {
        let instr = Instruction {
            opcode: opcode::alu::ADD,
            operands: vec![
                Operand::Register(RegisterId::gpr(3), Width::Qword),
                Operand::Immediate(42, Width::Byte),
            ],
        };
        let mut sink = Vec::new();
        let mut relocs = Vec::new();
        encode(&instr, &mut sink, &mut relocs).unwrap();
        assert_eq!(sink[0], opcode::alu::ADD);
        // descriptor(REG,Qword,_) then register id byte
        assert_eq!(sink[2], 3);
    }

    #[test]
    fn label_operand_emits_placeholder_and_relocation() {
        let instr = Instruction { opcode: opcode::ctrl::JMP, operands: vec![Operand::Label(7)] };
        let mut sink = Vec::new();
        let mut relocs = Vec::new();
        encode(&instr, &mut sink, &mut relocs).unwrap();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].target, RelocationTarget::Label(7));
        let bytes: [u8; 8] = sink[relocs[0].offset..relocs[0].offset + 8].try_into().unwrap();
        assert_eq!(u64::from_le_bytes(bytes), RELOCATION_PLACEHOLDER);
    }
}
