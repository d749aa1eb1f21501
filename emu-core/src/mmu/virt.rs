//! Virtual MMU: a page table walker parameterized by page size and level
//! count. Grounded on libcorevm's
//! `memory/paging.rs` multi-mode walker (2-level/PAE/4-level dispatch,
//! present/writable/user permission checks against a PTE), generalized from
//! three fixed x86 modes to an arbitrary `(page_size, level_count)` shape.

use crate::error::{EmuError, Result};
use crate::mmu::physical::PhysicalMmu;
use crate::mode::Mode;

const PTE_PRESENT: u64 = 1 << 0;
const PTE_WRITABLE: u64 = 1 << 1;
const PTE_USER: u64 = 1 << 2;

/// Intermediate (non-leaf) page tables always occupy one 4 KiB physical
/// page regardless of the final leaf page size; this bounds each level to
/// 512 eight-byte entries, i.e. 9 index bits.
const TABLE_INDEX_BITS: u32 = 9;
const TABLE_BASE_MASK: u64 = !0xFFFu64;

/// The access being attempted, for permission checks during a page walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

/// A validated `(page_size, level_count)` combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableShape {
    page_size: u64,
    level_count: u8,
    offset_bits: u32,
}

impl PageTableShape {
    /// Build a shape, rejecting any combination whose remaining
    /// address bits don't divide evenly across `level_count` levels of
    /// at most [`TABLE_INDEX_BITS`] each — this is what rules out
    /// `(64 KiB, 5)`.
    ///
    /// The [`TABLE_INDEX_BITS`] cap is only meaningful once there's an
    /// intermediate table to bound: a single-level shape has no
    /// intermediate tables at all (the one and only table is the
    /// leaf-producing table walked directly off `CR3`), so it's exempt
    /// from the cap and may index the whole remaining address width.
    pub fn new(page_size: u64, level_count: u8) -> Result<Self> {
        if !page_size.is_power_of_two() || level_count == 0 {
            return Err(EmuError::InvalidInstruction);
        }
        let offset_bits = page_size.trailing_zeros();
        if offset_bits >= 64 {
            return Err(EmuError::InvalidInstruction);
        }
        let remaining = 64 - offset_bits;
        let levels = u32::from(level_count);
        if remaining % levels != 0 {
            return Err(EmuError::InvalidInstruction);
        }
        let index_bits = remaining / levels;
        if index_bits == 0 {
            return Err(EmuError::InvalidInstruction);
        }
        if levels > 1 && index_bits > TABLE_INDEX_BITS {
            return Err(EmuError::InvalidInstruction);
        }
        Ok(PageTableShape { page_size, level_count, offset_bits })
    }

    #[must_use]
    pub const fn page_size(self) -> u64 {
        self.page_size
    }

    #[must_use]
    pub const fn level_count(self) -> u8 {
        self.level_count
    }

    fn index_bits(self) -> u32 {
        (64 - self.offset_bits) / u32::from(self.level_count)
    }

    fn offset_mask(self) -> u64 {
        self.page_size - 1
    }
}

/// The virtual MMU: current page table shape plus the CR3 root. Absent a
/// shape, paging is disabled and `translate` must not be called (the
/// execution engine checks `CR0.PAGING_ENABLED` first).
pub struct VirtualMmu {
    shape: Option<PageTableShape>,
    root: u64,
}

impl VirtualMmu {
    #[must_use]
    pub fn new() -> Self {
        VirtualMmu { shape: None, root: 0 }
    }

    /// Enable paging with the given shape and CR3 root. Called when
    /// `CR0.PAGING_ENABLED` transitions 0 -> 1.
    pub fn enable(&mut self, shape: PageTableShape, root: u64) {
        self.shape = Some(shape);
        self.root = root;
    }

    /// Tear down the walker. Called when `CR0.PAGING_ENABLED` transitions
    /// 1 -> 0; the guest's own page tables are left untouched in physical
    /// memory, only the host's cached shape is discarded.
    pub fn disable(&mut self) {
        self.shape = None;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shape.is_some()
    }

    /// Update CR3 without changing the shape (a root reseat under the
    /// same paging configuration).
    pub fn set_root(&mut self, root: u64) {
        self.root = root;
    }

    /// Translate a virtual address to a physical one, walking the guest's
    /// page tables through `phys`.
    pub fn translate(
        &self,
        phys: &PhysicalMmu,
        vaddr: u64,
        access: Access,
        mode: Mode,
    ) -> Result<u64> {
        let shape = self.shape.ok_or(EmuError::InvalidInstruction)?;
        let index_bits = shape.index_bits();
        let mut table_base = self.root;

        for level in (0..shape.level_count).rev() {
            let shift = shape.offset_bits + u32::from(level) * index_bits;
            let index = (vaddr >> shift) & ((1u64 << index_bits) - 1);
            let entry_addr = table_base + index * 8;
            let entry = phys.read_u64(entry_addr)?;

            if entry & PTE_PRESENT == 0 {
                return Err(EmuError::PhysMemViolation(vaddr));
            }
            if mode.is_user() && entry & PTE_USER == 0 {
                return Err(EmuError::PhysMemViolation(vaddr));
            }
            if access == Access::Write && entry & PTE_WRITABLE == 0 {
                return Err(EmuError::PhysMemViolation(vaddr));
            }

            if level == 0 {
                let offset_mask = shape.offset_mask();
                return Ok((entry & !offset_mask) | (vaddr & offset_mask));
            }
            table_base = entry & TABLE_BASE_MASK;
        }
        unreachable!("level_count >= 1 guaranteed by PageTableShape::new")
    }
}

impl Default for VirtualMmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::physical::RegionKind;

    #[test]
    fn rejects_64kib_five_level() {
        assert_eq!(PageTableShape::new(64 * 1024, 5), Err(EmuError::InvalidInstruction));
    }

    #[test]
    fn accepts_a_valid_multi_level_shape() {
        // offset_bits=46 leaves 18 remaining bits, dividing evenly into
        // three 6-bit levels — well under the per-level cap.
        assert!(PageTableShape::new(1u64 << 46, 3).is_ok());
    }

    #[test]
    fn single_level_shape_is_exempt_from_the_index_bit_cap() {
        // No intermediate table exists to bound, so a single 4 KiB-page
        // level may index the entire remaining 52-bit address width.
        assert!(PageTableShape::new(4096, 1).is_ok());
    }

    fn phys_with_ram() -> PhysicalMmu {
        let mut mmu = PhysicalMmu::new();
        mmu.add_region(RegionKind::Ram, 0, 0x10_0000);
        mmu
    }

    #[test]
    fn single_level_translate_applies_page_offset() {
        // level_count=1 keeps the walk to a single table read, easy to hand-verify.
        let shape = PageTableShape::new(4096, 1).unwrap();
        let mut phys = phys_with_ram();
        let pt_base = 0x1000u64;
        let page_base = 0x9000u64;
        // index 0 maps vaddr 0x0.. -> page_base
        let pte = page_base | PTE_PRESENT | PTE_WRITABLE;
        phys.write_u64(pt_base, pte).unwrap();

        let mut vmmu = VirtualMmu::new();
        vmmu.enable(shape, pt_base);

        let phys_addr = vmmu
            .translate(&phys, 0x20, Access::Read, Mode::SupervisorProtected)
            .unwrap();
        assert_eq!(phys_addr, page_base + 0x20);
    }

    #[test]
    fn not_present_entry_faults() {
        let shape = PageTableShape::new(4096, 1).unwrap();
        let phys = phys_with_ram();
        let mut vmmu = VirtualMmu::new();
        vmmu.enable(shape, 0x1000);
        let err = vmmu
            .translate(&phys, 0x0, Access::Read, Mode::SupervisorProtected)
            .unwrap_err();
        assert_eq!(err, EmuError::PhysMemViolation(0x0));
    }
}
