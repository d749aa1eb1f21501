//! Operand representation: the exclusive tagged variant used for
//! in-memory instructions, and the fifteen compact wire forms used for
//! the on-disk encoding.

use crate::registers::RegisterId;
use crate::width::Width;

/// The 4-bit compact operand form tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompactForm {
    Reg = 0x0,
    Imm = 0x1,
    MemBaseReg = 0x2,
    MemBaseImm = 0x3,
    MemBaseOffReg = 0x4,
    MemBaseOffRegImm = 0x5,
    MemBaseOffImmReg = 0x6,
    MemBaseOffImm2 = 0x7,
    MemBaseIdxReg = 0x8,
    MemBaseIdxRegImm = 0x9,
    MemBaseIdxOffReg = 0xA,
    MemBaseIdxOffReg2Imm = 0xB,
    MemBaseIdxOffRegImmReg = 0xC,
    MemBaseIdxOffRegImm2 = 0xD,
}

impl CompactForm {
    /// Decode the 4-bit `type` field. Returns `None` for the reserved
    /// `0xE` id or any value `>= 0xF`.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<CompactForm> {
        Some(match bits & 0xF {
            0x0 => CompactForm::Reg,
            0x1 => CompactForm::Imm,
            0x2 => CompactForm::MemBaseReg,
            0x3 => CompactForm::MemBaseImm,
            0x4 => CompactForm::MemBaseOffReg,
            0x5 => CompactForm::MemBaseOffRegImm,
            0x6 => CompactForm::MemBaseOffImmReg,
            0x7 => CompactForm::MemBaseOffImm2,
            0x8 => CompactForm::MemBaseIdxReg,
            0x9 => CompactForm::MemBaseIdxRegImm,
            0xA => CompactForm::MemBaseIdxOffReg,
            0xB => CompactForm::MemBaseIdxOffReg2Imm,
            0xC => CompactForm::MemBaseIdxOffRegImmReg,
            0xD => CompactForm::MemBaseIdxOffRegImm2,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn to_bits(self) -> u8 {
        self as u8
    }

    /// `true` for `MEM_BASE_OFF_IMM2` / `MEM_BASE_IDX_OFF_REG_IMM2`, the
    /// two forms that carry a second, extra descriptor byte.
    #[must_use]
    pub const fn is_extended(self) -> bool {
        matches!(self, CompactForm::MemBaseOffImm2 | CompactForm::MemBaseIdxOffRegImm2)
    }

    /// The shape of a complex-memory form: whether the base is a register
    /// vs. an immediate, whether an index term is present and its kind,
    /// and whether an offset term is present and its kind. `None` for
    /// `Reg`/`Imm`, which are not memory forms.
    #[must_use]
    pub const fn shape(self) -> Option<FormShape> {
        use CompactForm::*;
        Some(match self {
            Reg | Imm => return None,
            MemBaseReg => FormShape { base_reg: true, index: None, offset: None },
            MemBaseImm => FormShape { base_reg: false, index: None, offset: None },
            MemBaseOffReg => FormShape { base_reg: true, index: None, offset: Some(true) },
            MemBaseOffRegImm => FormShape { base_reg: true, index: None, offset: Some(false) },
            MemBaseOffImmReg => FormShape { base_reg: false, index: None, offset: Some(true) },
            MemBaseOffImm2 => FormShape { base_reg: false, index: None, offset: Some(false) },
            MemBaseIdxReg => FormShape { base_reg: true, index: Some(true), offset: None },
            MemBaseIdxRegImm => FormShape { base_reg: true, index: Some(false), offset: None },
            MemBaseIdxOffReg => {
                FormShape { base_reg: true, index: Some(true), offset: Some(true) }
            }
            MemBaseIdxOffReg2Imm => {
                FormShape { base_reg: true, index: Some(true), offset: Some(false) }
            }
            MemBaseIdxOffRegImmReg => {
                FormShape { base_reg: true, index: Some(false), offset: Some(true) }
            }
            MemBaseIdxOffRegImm2 => {
                FormShape { base_reg: true, index: Some(false), offset: Some(false) }
            }
        })
    }
}

/// Describes which complex-item slots are present and whether each is a
/// register (`true`) or an immediate (`false`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormShape {
    pub base_reg: bool,
    pub index: Option<bool>,
    pub offset: Option<bool>,
}

/// One term of a complex memory operand: a register or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexTerm {
    Register(RegisterId),
    Immediate(u64, Width),
}

/// The offset term of a complex memory operand. Only the register form
/// carries an explicit sign bit; an immediate offset's sign is
/// inherent in how it was written (the encoder stores it pre-negated if the
/// source expressed subtraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexOffset {
    pub term: ComplexTerm,
    /// `true` = subtract, `false` = add. Only meaningful when `term` is a
    /// register; always `false` for an immediate term.
    pub negative: bool,
}

/// `base [* index] [± offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexData {
    pub base: ComplexTerm,
    pub index: Option<ComplexTerm>,
    pub offset: Option<ComplexOffset>,
}

/// A decoded or to-be-encoded instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(RegisterId, Width),
    Immediate(u64, Width),
    /// A 64-bit absolute address and the access width at that address
    /// (`MEM_BASE_IMM`, wire form `0x3`).
    Memory(u64, Width),
    Complex(ComplexData, Width),
    /// Resolved only during assembly; an opaque handle into the
    /// assembler's label table. Never produced by the decoder.
    Label(u32),
    /// As `Label`, for block-local sublabels.
    Sublabel(u32),
}

impl Operand {
    /// The compact wire form this operand encodes as, or `None` for
    /// `Label`/`Sublabel` (which encode as an 8-byte relocation placeholder
    /// with no form tag of their own).
    #[must_use]
    pub fn compact_form(&self) -> Option<CompactForm> {
        match self {
            Operand::Register(..) => Some(CompactForm::Reg),
            Operand::Immediate(..) => Some(CompactForm::Imm),
            Operand::Memory(..) => Some(CompactForm::MemBaseImm),
            Operand::Complex(data, _) => Some(complex_form(data)),
            Operand::Label(_) | Operand::Sublabel(_) => None,
        }
    }
}

/// Infer the compact form a [`ComplexData`] value would encode as.
#[must_use]
pub fn complex_form(data: &ComplexData) -> CompactForm {
    let base_reg = matches!(data.base, ComplexTerm::Register(_));
    let index_reg = data.index.as_ref().map(|t| matches!(t, ComplexTerm::Register(_)));
    let offset_reg = data.offset.as_ref().map(|o| matches!(o.term, ComplexTerm::Register(_)));
    match (base_reg, index_reg, offset_reg) {
        (true, None, None) => CompactForm::MemBaseReg,
        (false, None, None) => CompactForm::MemBaseImm,
        (true, None, Some(true)) => CompactForm::MemBaseOffReg,
        (true, None, Some(false)) => CompactForm::MemBaseOffRegImm,
        (false, None, Some(true)) => CompactForm::MemBaseOffImmReg,
        (false, None, Some(false)) => CompactForm::MemBaseOffImm2,
        (true, Some(true), None) => CompactForm::MemBaseIdxReg,
        (true, Some(false), None) => CompactForm::MemBaseIdxRegImm,
        (true, Some(true), Some(true)) => CompactForm::MemBaseIdxOffReg,
        (true, Some(true), Some(false)) => CompactForm::MemBaseIdxOffReg2Imm,
        (true, Some(false), Some(true)) => CompactForm::MemBaseIdxOffRegImmReg,
        (true, Some(false), Some(false)) => CompactForm::MemBaseIdxOffRegImm2,
        // Any other combination (e.g. immediate base with an index term) is
        // not representable by the fifteen compact forms; callers must
        // validate before reaching here.
        _ => CompactForm::MemBaseReg,
    }
}
