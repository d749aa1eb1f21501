//! The process-wide emulator context. Every handler in [`crate::exec`] takes `&mut Emulator`
//! rather than the individual register file, MMU, bus, and cache pieces
//! separately.

use crate::bus::IoBus;
use crate::error::{EmuError, Result};
use crate::icache::InstructionCache;
use crate::interrupts::InterruptController;
use crate::mmu::physical::RegionKind;
use crate::mmu::{Access, PageTableShape, PhysicalMmu, VirtualMmu};
use crate::registers::{cr0, RegisterFile};
use crate::width::Width;

/// Control register holding the page table root.
const CR3_ROOT: u8 = 3;
/// Control register packing the paging shape the next `CR0.PAGING_ENABLED`
/// transition should adopt: `page_size:32 | level_count:8` in the low 40
/// bits, decided here and recorded in the design ledger since nothing else
/// pins `page_size`/`level_count` to a specific register.
const CR4_PAGE_SHAPE: u8 = 4;

/// The bundled emulator state: registers, both MMUs, the interrupt
/// controller, the I/O bus, and the instruction cache.
pub struct Emulator {
    pub regs: RegisterFile,
    pub phys: PhysicalMmu,
    pub vmmu: VirtualMmu,
    pub idt: InterruptController,
    pub io: IoBus,
    pub icache: InstructionCache,
    /// Set by `hlt`; the host's run loop checks this after every
    /// instruction and exits cleanly when true.
    pub halted: bool,
}

impl Emulator {
    #[must_use]
    pub fn new(phys: PhysicalMmu) -> Self {
        Emulator {
            regs: RegisterFile::new(),
            phys,
            vmmu: VirtualMmu::new(),
            idt: InterruptController::new(),
            io: IoBus::new(),
            icache: InstructionCache::default(),
            halted: false,
        }
    }

    fn paging_enabled(&self) -> bool {
        self.regs.control(0).raw() & cr0::PAGING_ENABLED != 0
    }

    /// Resolve a guest-visible address to a physical one, walking the
    /// virtual MMU when paging is enabled.
    pub fn resolve(&self, vaddr: u64, access: Access) -> Result<u64> {
        if self.paging_enabled() {
            self.vmmu.translate(&self.phys, vaddr, access, self.regs.mode())
        } else {
            Ok(vaddr)
        }
    }

    /// Read `width` bytes from a guest-visible address, bridging to the I/O
    /// bus when the resolved physical address falls in the I/O window.
    pub fn read_mem(&mut self, vaddr: u64, width: Width) -> Result<u64> {
        let paddr = self.resolve(vaddr, Access::Read)?;
        if self.phys.kind_at(paddr) == Some(RegionKind::IoWindow) {
            return self.io.read(paddr, width);
        }
        match width {
            Width::Byte => self.phys.read_u8(paddr).map(u64::from),
            Width::Word => self.phys.read_u16(paddr).map(u64::from),
            Width::Dword => self.phys.read_u32(paddr).map(u64::from),
            Width::Qword => self.phys.read_u64(paddr),
        }
    }

    pub fn write_mem(&mut self, vaddr: u64, width: Width, value: u64) -> Result<()> {
        let paddr = self.resolve(vaddr, Access::Write)?;
        if self.phys.kind_at(paddr) == Some(RegionKind::IoWindow) {
            return self.io.write(paddr, width, value);
        }
        match width {
            Width::Byte => self.phys.write_u8(paddr, value as u8),
            Width::Word => self.phys.write_u16(paddr, value as u16),
            Width::Dword => self.phys.write_u32(paddr, value as u32),
            Width::Qword => self.phys.write_u64(paddr, value),
        }
    }

    /// Write a register under the current mode's privilege rules,
    /// special-casing CR0/CR3 so the virtual MMU and instruction cache stay
    /// in sync with paging state changes.
    pub fn write_register(
        &mut self,
        id: crate::registers::RegisterId,
        value: u64,
        width: Width,
    ) -> Result<()> {
        use crate::registers::{RegisterKind, RegisterId};
        if id.kind() == Some(RegisterKind::Control) && id.index() == 0 {
            return self.write_cr0(value, width);
        }
        if id == RegisterId(0x20 | CR3_ROOT) && self.paging_enabled() {
            self.regs.write(id, value, width, self.regs.mode())?;
            self.vmmu.set_root(self.regs.control(CR3_ROOT).raw());
            self.icache.update_mmu();
            return Ok(());
        }
        self.regs.write(id, value, width, self.regs.mode())
    }

    fn write_cr0(&mut self, value: u64, width: Width) -> Result<()> {
        let mode = self.regs.mode();
        let old = self.regs.control(0).raw();
        let masked = (old & !width.mask()) | (value & width.mask());
        let was_paging = old & cr0::PAGING_ENABLED != 0;
        let will_page = masked & cr0::PAGING_ENABLED != 0;

        if !was_paging && will_page {
            let shape_reg = self.regs.control(CR4_PAGE_SHAPE).raw();
            let page_size = shape_reg & 0xFFFF_FFFF;
            let level_count = ((shape_reg >> 32) & 0xFF) as u8;
            let shape = PageTableShape::new(page_size, level_count)
                .map_err(|_| EmuError::InvalidInstruction)?;
            self.regs.write(crate::registers::RegisterId(0x20), value, width, mode)?;
            let root = self.regs.control(CR3_ROOT).raw();
            self.vmmu.enable(shape, root);
            self.icache.update_mmu();
            return Ok(());
        }
        if was_paging && !will_page {
            self.regs.write(crate::registers::RegisterId(0x20), value, width, mode)?;
            self.vmmu.disable();
            self.icache.update_mmu();
            return Ok(());
        }
        self.regs.write(crate::registers::RegisterId(0x20), value, width, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::RegionKind as Kind;
    use crate::registers::RegisterId;

    fn sample() -> Emulator {
        let mut phys = PhysicalMmu::new();
        phys.add_region(Kind::Ram, 0, 0x10_000);
        phys.add_region(Kind::IoWindow, 0x10_000, 0x100);
        Emulator::new(phys)
    }

    #[test]
    fn read_write_ram_round_trips() {
        let mut emu = sample();
        emu.write_mem(0x10, Width::Qword, 0xABCD).unwrap();
        assert_eq!(emu.read_mem(0x10, Width::Qword).unwrap(), 0xABCD);
    }

    #[test]
    fn unmapped_io_offset_faults_not_floats() {
        let mut emu = sample();
        let err = emu.read_mem(0x10_001, Width::Byte).unwrap_err();
        assert_eq!(err, EmuError::PhysMemViolation(0x10_001));
    }

    #[test]
    fn enabling_invalid_paging_leaves_prior_state_intact() {
        let mut emu = sample();
        // page_size = 64 KiB, level_count = 5: rejected by PageTableShape::new.
        let shape_reg = (64 * 1024u64) | (5u64 << 32);
        emu.regs.force_write(RegisterId(0x24), shape_reg, Width::Qword);
        let err = emu.write_register(RegisterId(0x20), cr0::PROTECTION_ENABLED | cr0::PAGING_ENABLED, Width::Qword).unwrap_err();
        assert_eq!(err, EmuError::InvalidInstruction);
        assert!(!emu.vmmu.is_enabled());
        assert_eq!(emu.regs.control(0).raw(), 0);
    }

    #[test]
    fn enabling_valid_paging_updates_vmmu() {
        let mut emu = sample();
        let shape_reg = 4096u64 | (1u64 << 32);
        emu.regs.force_write(RegisterId(0x24), shape_reg, Width::Qword);
        emu.regs.force_write(RegisterId(0x23), 0x1000, Width::Qword); // CR3 root
        emu.write_register(RegisterId(0x20), cr0::PROTECTION_ENABLED | cr0::PAGING_ENABLED, Width::Qword).unwrap();
        assert!(emu.vmmu.is_enabled());
    }
}
