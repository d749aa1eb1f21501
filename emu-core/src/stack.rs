//! The stack: SCP/SBP/STP-bounded push/pop routed through the physical MMU.
//! Grounded on libcorevm's `push_val`/`pop_val` helpers
//! (`executor/stack.rs`) — decrement-then-store / load-then-increment
//! around a single memory access — generalized to route through our
//! region-list physical MMU instead of a flat `GuestMemory`, and to raise
//! the architecture's own `PhysMemViolation` rather than a stack-specific
//! fault: a stack overflow or underflow is not a distinct exception here,
//! it surfaces as a physical memory violation at the out-of-range address.

use crate::error::Result;
use crate::mmu::PhysicalMmu;
use crate::registers::{stack_index, RegisterFile};
use crate::width::Width;

/// Push `value` (masked to `width`), decrementing SCP first so the pushed
/// value lands at the new top of stack.
pub fn push(regs: &mut RegisterFile, phys: &mut PhysicalMmu, value: u64, width: Width) -> Result<()> {
    let scp = regs.stack_reg(stack_index::SCP).raw();
    let new_scp = scp.wrapping_sub(u64::from(width.bytes()));
    phys.validate_write(new_scp, u64::from(width.bytes()))?;
    write_at(phys, new_scp, value, width)?;
    regs.stack_reg_mut(stack_index::SCP).force_write(new_scp, Width::Qword);
    Ok(())
}

/// Pop a value of `width`, incrementing SCP past it.
pub fn pop(regs: &mut RegisterFile, phys: &PhysicalMmu, width: Width) -> Result<u64> {
    let scp = regs.stack_reg(stack_index::SCP).raw();
    phys.validate_read(scp, u64::from(width.bytes()))?;
    let value = read_at(phys, scp, width)?;
    let new_scp = scp.wrapping_add(u64::from(width.bytes()));
    regs.stack_reg_mut(stack_index::SCP).force_write(new_scp, Width::Qword);
    Ok(value)
}

/// `pusha`: push all sixteen general-purpose registers, R0 first, at
/// qword width.
pub fn push_all(regs: &mut RegisterFile, phys: &mut PhysicalMmu) -> Result<()> {
    for i in 0..16 {
        let value = regs.gpr(i).raw();
        push(regs, phys, value, Width::Qword)?;
    }
    Ok(())
}

/// `popa`: the reverse of [`push_all`] — R15 is popped first so every
/// register ends up holding the value it had before the matching `pusha`.
pub fn pop_all(regs: &mut RegisterFile, phys: &PhysicalMmu) -> Result<()> {
    for i in (0..16).rev() {
        let value = pop(regs, phys, Width::Qword)?;
        regs.force_write(crate::registers::RegisterId::gpr(i), value, Width::Qword);
    }
    Ok(())
}

fn write_at(phys: &mut PhysicalMmu, addr: u64, value: u64, width: Width) -> Result<()> {
    match width {
        Width::Byte => phys.write_u8(addr, value as u8),
        Width::Word => phys.write_u16(addr, value as u16),
        Width::Dword => phys.write_u32(addr, value as u32),
        Width::Qword => phys.write_u64(addr, value),
    }
}

fn read_at(phys: &PhysicalMmu, addr: u64, width: Width) -> Result<u64> {
    Ok(match width {
        Width::Byte => phys.read_u8(addr)? as u64,
        Width::Word => phys.read_u16(addr)? as u64,
        Width::Dword => phys.read_u32(addr)? as u64,
        Width::Qword => phys.read_u64(addr)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmuError;
    use crate::mmu::RegionKind;
    use crate::registers::RegisterId;

    fn setup() -> (RegisterFile, PhysicalMmu) {
        let mut regs = RegisterFile::new();
        let mut phys = PhysicalMmu::new();
        phys.add_region(RegionKind::Ram, 0, 0x10_000);
        regs.stack_reg_mut(stack_index::SCP).force_write(0x1000, Width::Qword);
        regs.stack_reg_mut(stack_index::SBP).force_write(0x0, Width::Qword);
        regs.stack_reg_mut(stack_index::STP).force_write(0x1000, Width::Qword);
        (regs, phys)
    }

    #[test]
    fn push_then_pop_round_trips() {
        let (mut regs, mut phys) = setup();
        push(&mut regs, &mut phys, 0xABCD, Width::Qword).unwrap();
        assert_eq!(regs.stack_reg(stack_index::SCP).raw(), 0x1000 - 8);
        let value = pop(&mut regs, &phys, Width::Qword).unwrap();
        assert_eq!(value, 0xABCD);
        assert_eq!(regs.stack_reg(stack_index::SCP).raw(), 0x1000);
    }

    #[test]
    fn underflow_past_mapped_memory_is_phys_mem_violation() {
        let mut regs = RegisterFile::new();
        let phys = PhysicalMmu::new();
        regs.stack_reg_mut(stack_index::SCP).force_write(0, Width::Qword);
        let err = pop(&mut regs, &phys, Width::Qword).unwrap_err();
        assert_eq!(err, EmuError::PhysMemViolation(0));
    }

    #[test]
    fn pusha_then_popa_restores_all_gprs() {
        let (mut regs, mut phys) = setup();
        for i in 0..16u8 {
            regs.force_write(RegisterId::gpr(i), u64::from(i) + 1, Width::Qword);
        }
        push_all(&mut regs, &mut phys).unwrap();
        for i in 0..16u8 {
            regs.force_write(RegisterId::gpr(i), 0, Width::Qword);
        }
        pop_all(&mut regs, &phys).unwrap();
        for i in 0..16u8 {
            assert_eq!(regs.gpr(i).raw(), u64::from(i) + 1);
        }
    }
}
