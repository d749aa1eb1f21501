//! The one-byte opcode space.
//!
//! High nibble names a class, low nibble names a variant. Arity is fixed
//! per opcode by [`arity`]; mismatches at encode time are fatal
//! (`EncodeError::ArityMismatch`).

/// ALU-1 class: `0x00..=0x0F`.
pub mod alu {
    pub const ADD: u8 = 0x00;
    pub const MUL: u8 = 0x01;
    pub const SUB: u8 = 0x02;
    pub const DIV: u8 = 0x03;
    pub const OR: u8 = 0x04;
    pub const XOR: u8 = 0x05;
    pub const NOR: u8 = 0x06;
    pub const AND: u8 = 0x07;
    pub const NAND: u8 = 0x08;
    pub const NOT: u8 = 0x09;
    pub const CMP: u8 = 0x0A;
    pub const INC: u8 = 0x0B;
    pub const DEC: u8 = 0x0C;
    pub const SHL: u8 = 0x0D;
    pub const SHR: u8 = 0x0E;
    /// Signed multiply — shares the 3-operand arity of `mul`/`div` but is
    /// addressed via the reserved high variant slot.
    pub const SMUL: u8 = 0x0F;
}

/// Control-flow class: `0x10..=0x1A`.
pub mod ctrl {
    pub const RET: u8 = 0x10;
    pub const CALL: u8 = 0x11;
    pub const JMP: u8 = 0x12;
    pub const JC: u8 = 0x13;
    pub const JNC: u8 = 0x14;
    pub const JZ: u8 = 0x15;
    pub const JNZ: u8 = 0x16;
    pub const JL: u8 = 0x17;
    pub const JLE: u8 = 0x18;
    pub const JNL: u8 = 0x19;
    pub const JNLE: u8 = 0x1A;
}

/// Misc class: `0x20..=0x2C`.
pub mod misc {
    pub const MOV: u8 = 0x20;
    pub const NOP: u8 = 0x21;
    pub const HLT: u8 = 0x22;
    pub const PUSH: u8 = 0x23;
    pub const POP: u8 = 0x24;
    pub const PUSHA: u8 = 0x25;
    pub const POPA: u8 = 0x26;
    pub const INT: u8 = 0x27;
    pub const LIDT: u8 = 0x28;
    pub const IRET: u8 = 0x29;
    pub const SYSCALL: u8 = 0x2A;
    pub const SYSRET: u8 = 0x2B;
    pub const ENTERUSER: u8 = 0x2C;
}

/// Signed divide. Fifteen ALU-1 mnemonics fill the sixteen `0x00..=0x0F`
/// slots, and signed/unsigned variants are separate opcodes, so `SMUL`
/// takes the one spare ALU-1 slot (`0x0F`) and `SDIV` is placed in
/// the first unused id after the control-flow block, since the ALU-1 block
/// itself is full (open question, recorded in DESIGN.md).
pub const SDIV: u8 = 0x1B;

/// Fixed operand count for every defined opcode, or `None` if `op` is not a
/// defined opcode.
#[must_use]
pub fn arity(op: u8) -> Option<u8> {
    use alu::*;
    use ctrl::*;
    use misc::*;
    Some(match op {
        MUL | DIV | SMUL => 3,
        SDIV => 3,
        ADD | SUB | OR | XOR | NOR | AND | NAND | CMP | SHL | SHR | MOV => 2,
        JMP | JC | JNC | JZ | JNZ | JL | JLE | JNL | JNLE | CALL | PUSH | POP | INT | LIDT
        | ENTERUSER | NOT | INC | DEC => 1,
        RET | NOP | HLT | PUSHA | POPA | IRET | SYSCALL | SYSRET => 0,
        _ => return None,
    })
}

/// `true` if `op` falls in the ALU-1 class (`0x00..=0x0F`).
#[must_use]
pub const fn is_alu(op: u8) -> bool {
    op <= 0x0F
}

/// `true` if `op` falls in the control-flow class (`0x10..=0x1A`).
#[must_use]
pub const fn is_control_flow(op: u8) -> bool {
    op >= ctrl::RET && op <= ctrl::JNLE
}

/// `true` if `op` falls in the misc class.
#[must_use]
pub const fn is_misc(op: u8) -> bool {
    op >= misc::MOV && op <= misc::ENTERUSER
}
