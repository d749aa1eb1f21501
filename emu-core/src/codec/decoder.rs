//! Recovering [`DecodedInstruction`] values from the wire encoding
//!. Never allocates beyond the small, fixed-capacity operand
//! list every instruction already needs.

use super::descriptor::Descriptor;
use super::encoder::split_offset_register_byte;
use super::operand::{ComplexData, ComplexOffset, ComplexTerm, Operand};
use super::opcode;
use super::stream::ByteSource;
use crate::registers::RegisterId;
use crate::width::Width;

/// Failure to decode an instruction from the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    InvalidOpcode(u8),
    InvalidOperandType,
    InvalidComplexForm,
    /// The stream ended mid-instruction. Guest-reachable (a jump into the
    /// last few bytes of mapped memory), not a host bug.
    ShortStream,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidOpcode(op) => write!(f, "invalid opcode 0x{op:02X}"),
            DecodeError::InvalidOperandType => write!(f, "operand descriptor names no known form"),
            DecodeError::InvalidComplexForm => write!(f, "complex operand form is malformed"),
            DecodeError::ShortStream => write!(f, "instruction stream ended mid-instruction"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A fully decoded instruction, plus its total on-wire length in bytes so
/// the caller can advance IP.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub opcode: u8,
    pub operands: Vec<Operand>,
    pub length: usize,
}

struct Counting<'s, S: ByteSource + ?Sized> {
    inner: &'s mut S,
    count: usize,
}

impl<S: ByteSource + ?Sized> ByteSource for Counting<'_, S> {
    fn next_u8(&mut self) -> Option<u8> {
        let byte = self.inner.next_u8()?;
        self.count += 1;
        Some(byte)
    }
}

/// Decode one instruction starting at the source's current position.
pub fn decode(source: &mut impl ByteSource) -> Result<DecodedInstruction, DecodeError> {
    let mut src = Counting { inner: source, count: 0 };
    let opcode = src.next_u8().ok_or(DecodeError::ShortStream)?;
    let arity = opcode::arity(opcode).ok_or(DecodeError::InvalidOpcode(opcode))?;
    let mut operands = Vec::with_capacity(arity as usize);
    for _ in 0..arity {
        operands.push(decode_operand(&mut src)?);
    }
    Ok(DecodedInstruction { opcode, operands, length: src.count })
}

fn decode_operand(src: &mut impl ByteSource) -> Result<Operand, DecodeError> {
    let primary = src.next_u8().ok_or(DecodeError::ShortStream)?;
    let mut descriptor = Descriptor::from_primary(primary).ok_or(DecodeError::InvalidOperandType)?;
    if descriptor.form.is_extended() {
        let extra = src.next_u8().ok_or(DecodeError::ShortStream)?;
        descriptor = descriptor.with_extra(extra);
    }

    use super::operand::CompactForm::*;
    match descriptor.form {
        Reg => {
            let id = src.next_u8().ok_or(DecodeError::ShortStream)?;
            Ok(Operand::Register(RegisterId(id), descriptor.size))
        }
        Imm => {
            let value = read_sized(src, descriptor.imm0_size)?;
            Ok(Operand::Immediate(value, descriptor.size))
        }
        MemBaseImm if descriptor.imm0_size == Width::Qword => {
            // Distinguish the absolute-address form (`Operand::Memory`)
            // from a complex operand whose base happens to be an
            // immediate at another width: the assembler always emits the
            // former with an 8-byte address regardless of access width.
            let addr = read_sized(src, Width::Qword)?;
            Ok(Operand::Memory(addr, descriptor.size))
        }
        form => decode_complex(src, form, descriptor),
    }
}

fn decode_complex(
    src: &mut impl ByteSource,
    form: super::operand::CompactForm,
    descriptor: Descriptor,
) -> Result<Operand, DecodeError> {
    let shape = form.shape().ok_or(DecodeError::InvalidComplexForm)?;

    let base = if shape.base_reg {
        ComplexTerm::Register(RegisterId(src.next_u8().ok_or(DecodeError::ShortStream)?))
    } else {
        ComplexTerm::Immediate(read_sized(src, descriptor.imm0_size)?, descriptor.imm0_size)
    };

    let index = match shape.index {
        Some(true) => Some(ComplexTerm::Register(RegisterId(
            src.next_u8().ok_or(DecodeError::ShortStream)?,
        ))),
        Some(false) => Some(ComplexTerm::Immediate(
            read_sized(src, descriptor.imm0_size)?,
            descriptor.imm0_size,
        )),
        None => None,
    };

    let offset = match shape.offset {
        Some(true) => {
            let byte = src.next_u8().ok_or(DecodeError::ShortStream)?;
            let (id, negative) = split_offset_register_byte(byte);
            Some(ComplexOffset { term: ComplexTerm::Register(id), negative })
        }
        Some(false) => {
            let width = descriptor.imm1_size.unwrap_or(descriptor.imm0_size);
            let value = read_sized(src, width)?;
            Some(ComplexOffset { term: ComplexTerm::Immediate(value, width), negative: false })
        }
        None => None,
    };

    Ok(Operand::Complex(ComplexData { base, index, offset }, descriptor.size))
}

fn read_sized(src: &mut impl ByteSource, width: Width) -> Result<u64, DecodeError> {
    Ok(match width {
        Width::Byte => src.next_u8().ok_or(DecodeError::ShortStream)? as u64,
        Width::Word => src.next_u16().ok_or(DecodeError::ShortStream)? as u64,
        Width::Dword => src.next_u32().ok_or(DecodeError::ShortStream)? as u64,
        Width::Qword => src.next_u64().ok_or(DecodeError::ShortStream)?,
    })
}
