//! ALU opcode dispatch. Grounded on
//! libcorevm's `exec_add`/`exec_sub`/`exec_mul`/`exec_div` shape
//! (`executor/arith.rs`: read operands, compute, write back, update
//! flags) but adapted from x86's implicit AX/DX-pair widening convention
//! to this ISA's explicit three-operand `mul`/`div`/`smul`/`sdiv` forms —
//! there are no implicit registers here, so the destination and both
//! sources are named directly.

use crate::codec::operand::Operand;
use crate::codec::opcode::alu::*;
use crate::codec::opcode::SDIV;
use crate::emulator::Emulator;
use crate::error::{EmuError, Result};
use crate::exec::operand::{read, width_of, write};
use crate::flags;
use crate::width::Width;

fn apply_flags(emu: &mut Emulator, new_flags: u64) {
    let mut sts = emu.regs.status().raw();
    flags::update(&mut sts, new_flags);
    emu.regs.status_mut().force_write(sts, Width::Qword);
}

/// Sign-extend the low `width` bits of `v` to a full 64-bit two's
/// complement value.
fn sign_extend(v: u64, width: Width) -> u64 {
    let bits = width.bits();
    if bits == 64 {
        return v;
    }
    let shift = 64 - bits;
    (((v << shift) as i64) >> shift) as u64
}

fn two_operand(emu: &mut Emulator, opcode: u8, dst: &Operand, src: &Operand) -> Result<()> {
    let width = width_of(dst);
    let a = read(emu, dst)?;
    let b = read(emu, src)?;
    let (result, new_flags) = match opcode {
        ADD => {
            let r = a.wrapping_add(b);
            (r, flags::flags_add(a, b, r, width))
        }
        SUB | CMP => {
            let r = a.wrapping_sub(b);
            (r, flags::flags_sub(a, b, r, width))
        }
        OR => {
            let r = a | b;
            (r, flags::flags_logic(r, width))
        }
        XOR => {
            let r = a ^ b;
            (r, flags::flags_logic(r, width))
        }
        NOR => {
            let r = !(a | b);
            (r, flags::flags_logic(r, width))
        }
        AND => {
            let r = a & b;
            (r, flags::flags_logic(r, width))
        }
        NAND => {
            let r = !(a & b);
            (r, flags::flags_logic(r, width))
        }
        SHL => {
            let r = a.wrapping_shl((b & 0x3F) as u32);
            (r, flags::flags_logic(r, width))
        }
        SHR => {
            let r = a.wrapping_shr((b & 0x3F) as u32);
            (r, flags::flags_logic(r, width))
        }
        _ => unreachable!("two_operand only dispatched for its own opcodes"),
    };
    apply_flags(emu, new_flags);
    if opcode != CMP {
        write(emu, dst, result)?;
    }
    Ok(())
}

fn one_operand(emu: &mut Emulator, opcode: u8, dst: &Operand) -> Result<()> {
    let width = width_of(dst);
    let a = read(emu, dst)?;
    let (result, new_flags) = match opcode {
        NOT => {
            let r = !a;
            (r, flags::flags_logic(r, width))
        }
        INC => {
            let r = a.wrapping_add(1);
            (r, flags::flags_add(a, 1, r, width))
        }
        DEC => {
            let r = a.wrapping_sub(1);
            (r, flags::flags_sub(a, 1, r, width))
        }
        _ => unreachable!("one_operand only dispatched for its own opcodes"),
    };
    apply_flags(emu, new_flags);
    write(emu, dst, result)
}

/// `mul dst, src1, src2` / `smul dst, src1, src2`: `dst ← src1 * src2`,
/// widened to 128 bits so overflow past `dst`'s width sets CF and OF
/// without faulting.
fn multiply(emu: &mut Emulator, signed: bool, dst: &Operand, src1: &Operand, src2: &Operand) -> Result<()> {
    let width = width_of(dst);
    let a = read(emu, src1)?;
    let b = read(emu, src2)?;
    let (result, overflow) = if signed {
        let sa = i128::from(sign_extend(a, width) as i64);
        let sb = i128::from(sign_extend(b, width) as i64);
        let full = sa * sb;
        let truncated = (full as u64) & width.mask();
        let back_extended = i128::from(sign_extend(truncated, width) as i64);
        (truncated, back_extended != full)
    } else {
        let full = u128::from(a & width.mask()) * u128::from(b & width.mask());
        let truncated = (full as u64) & width.mask();
        (truncated, (full >> width.bits()) != 0)
    };
    let mut new_flags = flags::flags_logic(result, width);
    if overflow {
        new_flags |= flags::CF | flags::OF;
    }
    apply_flags(emu, new_flags);
    write(emu, dst, result)
}

/// `div dst, src1, src2` / `sdiv dst, src1, src2`: `dst ← src1 / src2`.
/// Faults `DivByZero` on a zero divisor, `IntegerOverflow` on the one
/// signed case whose quotient doesn't fit (`MIN / -1`).
fn divide(emu: &mut Emulator, signed: bool, dst: &Operand, src1: &Operand, src2: &Operand) -> Result<()> {
    let width = width_of(dst);
    let a = read(emu, src1)?;
    let b = read(emu, src2)?;
    if b & width.mask() == 0 {
        return Err(EmuError::DivByZero);
    }
    let result = if signed {
        let sa = sign_extend(a, width) as i64;
        let sb = sign_extend(b, width) as i64;
        if sa == i64::MIN && sb == -1 {
            return Err(EmuError::IntegerOverflow);
        }
        (sa / sb) as u64 & width.mask()
    } else {
        (a & width.mask()) / (b & width.mask())
    };
    let new_flags = flags::flags_logic(result, width);
    apply_flags(emu, new_flags);
    write(emu, dst, result)
}

/// Dispatch one ALU-class opcode, including `sdiv` which
/// shares this class's semantics despite living outside the `0x00..=0x0F`
/// opcode block (see `codec::opcode::SDIV`).
pub fn exec_alu(emu: &mut Emulator, opcode: u8, operands: &[Operand]) -> Result<()> {
    match opcode {
        ADD | SUB | OR | XOR | NOR | AND | NAND | CMP | SHL | SHR => {
            two_operand(emu, opcode, &operands[0], &operands[1])
        }
        NOT | INC | DEC => one_operand(emu, opcode, &operands[0]),
        MUL => multiply(emu, false, &operands[0], &operands[1], &operands[2]),
        SMUL => multiply(emu, true, &operands[0], &operands[1], &operands[2]),
        DIV => divide(emu, false, &operands[0], &operands[1], &operands[2]),
        SDIV => divide(emu, true, &operands[0], &operands[1], &operands[2]),
        _ => Err(EmuError::InvalidInstruction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::{PhysicalMmu, RegionKind};
    use crate::registers::RegisterId;

    fn sample() -> Emulator {
        let mut phys = PhysicalMmu::new();
        phys.add_region(RegionKind::Ram, 0, 0x1000);
        Emulator::new(phys)
    }

    #[test]
    fn add_updates_destination_and_flags() {
        let mut emu = sample();
        emu.regs.force_write(RegisterId::gpr(0), 5, Width::Qword);
        emu.regs.force_write(RegisterId::gpr(1), 7, Width::Qword);
        let dst = Operand::Register(RegisterId::gpr(0), Width::Qword);
        let src = Operand::Register(RegisterId::gpr(1), Width::Qword);
        exec_alu(&mut emu, ADD, &[dst, src]).unwrap();
        assert_eq!(emu.regs.gpr(0).raw(), 12);
    }

    #[test]
    fn cmp_does_not_write_back() {
        let mut emu = sample();
        emu.regs.force_write(RegisterId::gpr(0), 5, Width::Qword);
        emu.regs.force_write(RegisterId::gpr(1), 5, Width::Qword);
        let dst = Operand::Register(RegisterId::gpr(0), Width::Qword);
        let src = Operand::Register(RegisterId::gpr(1), Width::Qword);
        exec_alu(&mut emu, CMP, &[dst, src]).unwrap();
        assert_eq!(emu.regs.gpr(0).raw(), 5);
        assert_ne!(emu.regs.status().raw() & flags::ZF, 0);
    }

    #[test]
    fn div_by_zero_faults() {
        let mut emu = sample();
        emu.regs.force_write(RegisterId::gpr(0), 0, Width::Qword);
        emu.regs.force_write(RegisterId::gpr(1), 10, Width::Qword);
        emu.regs.force_write(RegisterId::gpr(2), 0, Width::Qword);
        let dst = Operand::Register(RegisterId::gpr(0), Width::Qword);
        let src1 = Operand::Register(RegisterId::gpr(1), Width::Qword);
        let src2 = Operand::Register(RegisterId::gpr(2), Width::Qword);
        let err = exec_alu(&mut emu, DIV, &[dst, src1, src2]).unwrap_err();
        assert_eq!(err, EmuError::DivByZero);
    }

    #[test]
    fn mul_sets_overflow_when_product_exceeds_width() {
        let mut emu = sample();
        emu.regs.force_write(RegisterId::gpr(1), 0xFFFF_FFFF, Width::Dword);
        emu.regs.force_write(RegisterId::gpr(2), 0xFFFF_FFFF, Width::Dword);
        let dst = Operand::Register(RegisterId::gpr(0), Width::Dword);
        let src1 = Operand::Register(RegisterId::gpr(1), Width::Dword);
        let src2 = Operand::Register(RegisterId::gpr(2), Width::Dword);
        exec_alu(&mut emu, MUL, &[dst, src1, src2]).unwrap();
        assert_ne!(emu.regs.status().raw() & flags::OF, 0);
    }

    #[test]
    fn sdiv_min_by_minus_one_overflows() {
        let mut emu = sample();
        emu.regs.force_write(RegisterId::gpr(1), i64::MIN as u64, Width::Qword);
        emu.regs.force_write(RegisterId::gpr(2), (-1i64) as u64, Width::Qword);
        let dst = Operand::Register(RegisterId::gpr(0), Width::Qword);
        let src1 = Operand::Register(RegisterId::gpr(1), Width::Qword);
        let src2 = Operand::Register(RegisterId::gpr(2), Width::Qword);
        let err = exec_alu(&mut emu, SDIV, &[dst, src1, src2]).unwrap_err();
        assert_eq!(err, EmuError::IntegerOverflow);
    }
}
