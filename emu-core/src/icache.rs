//! Forward-only instruction byte window, refilled from physical memory on
//! miss. Grounded on the same
//! straddle-aware byte access the physical MMU already provides
//! (`mmu::physical::PhysicalMmu::read_bytes`); the window itself is new,
//! since libcorevm reads directly from `GuestMemory` with no caching
//! layer of its own.

use crate::codec::stream::ByteSource;
use crate::mmu::PhysicalMmu;

/// Default window size in bytes.
pub const DEFAULT_WINDOW: usize = 256;

/// A forward-only byte window into physical memory, positioned by a base
/// address plus an offset into the window. [`Self::read_u8`] refills the
/// whole window from `base` whenever the offset runs past its end.
pub struct InstructionCache {
    window: Vec<u8>,
    base: u64,
    offset: usize,
    window_len: usize,
}

impl InstructionCache {
    #[must_use]
    pub fn new(window_len: usize) -> Self {
        InstructionCache { window: Vec::new(), base: 0, offset: 0, window_len }
    }

    /// Reposition the window to start fetching from `addr`, only if
    /// `addr` isn't already covered by the current window. Called before
    /// every fetch so sequential execution (the common case) never
    /// refills.
    pub fn maybe_set_base(&mut self, addr: u64) {
        let in_window = addr >= self.base && addr < self.base + self.window.len() as u64;
        if !in_window {
            self.base = addr;
            self.offset = 0;
            self.window.clear();
        } else {
            self.offset = (addr - self.base) as usize;
        }
    }

    /// Absolute address the next `read_u8` will return, without
    /// consuming it.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.base + self.offset as u64
    }

    /// Explicitly reposition to `addr`, discarding any cached window
    /// (used after a jump, where the old window is almost certainly
    /// irrelevant).
    pub fn seek(&mut self, addr: u64) {
        self.base = addr;
        self.offset = 0;
        self.window.clear();
    }

    /// Invalidate the cache after the virtual MMU's mapping changed (a
    /// CR3 reseat or a `CR0.PAGING_ENABLED` toggle): the physical backing
    /// for a given virtual fetch address may now differ.
    pub fn update_mmu(&mut self) {
        self.window.clear();
        self.offset = 0;
    }

    fn refill(&mut self, phys: &PhysicalMmu) -> crate::error::Result<()> {
        let len = self.window_len.min(u16::MAX as usize);
        let mut buf = vec![0u8; len];
        phys.read_bytes(self.base, &mut buf)?;
        self.window = buf;
        Ok(())
    }

    /// Read the next byte, refilling from `phys` on a cache miss.
    pub fn read_u8(&mut self, phys: &PhysicalMmu) -> crate::error::Result<u8> {
        if self.offset >= self.window.len() {
            self.base += self.offset as u64;
            self.offset = 0;
            self.refill(phys)?;
        }
        let byte = self.window[self.offset];
        self.offset += 1;
        Ok(byte)
    }
}

impl Default for InstructionCache {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Adapter letting the decoder read directly from a live cache + backing
/// memory pair without the decoder knowing about either.
pub struct CacheSource<'a> {
    cache: &'a mut InstructionCache,
    phys: &'a PhysicalMmu,
    fault: Option<crate::error::EmuError>,
}

impl<'a> CacheSource<'a> {
    #[must_use]
    pub fn new(cache: &'a mut InstructionCache, phys: &'a PhysicalMmu) -> Self {
        CacheSource { cache, phys, fault: None }
    }

    /// Consume the adapter, returning a MMU fault observed mid-decode, if
    /// any. The decoder's `ByteSource` trait has no room for a typed
    /// error, so faults are captured here instead of being downgraded to
    /// a generic `ShortStream`.
    pub fn take_fault(self) -> Option<crate::error::EmuError> {
        self.fault
    }
}

impl ByteSource for CacheSource<'_> {
    fn next_u8(&mut self) -> Option<u8> {
        match self.cache.read_u8(self.phys) {
            Ok(byte) => Some(byte),
            Err(e) => {
                self.fault = Some(e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::RegionKind;

    fn ram(bytes: &[u8]) -> PhysicalMmu {
        let mut phys = PhysicalMmu::new();
        phys.add_region(RegionKind::Ram, 0, 0x1000);
        phys.write_bytes(0, bytes).unwrap();
        phys
    }

    #[test]
    fn sequential_reads_do_not_refill() {
        let phys = ram(&[1, 2, 3, 4, 5]);
        let mut cache = InstructionCache::new(4);
        cache.maybe_set_base(0);
        assert_eq!(cache.read_u8(&phys).unwrap(), 1);
        assert_eq!(cache.read_u8(&phys).unwrap(), 2);
        assert_eq!(cache.read_u8(&phys).unwrap(), 3);
        // 4th byte forces a refill since window_len == 4
        assert_eq!(cache.read_u8(&phys).unwrap(), 4);
        assert_eq!(cache.read_u8(&phys).unwrap(), 5);
    }

    #[test]
    fn seek_discards_window() {
        let phys = ram(&[0xAA; 16]);
        let mut cache = InstructionCache::new(8);
        cache.maybe_set_base(0);
        cache.read_u8(&phys).unwrap();
        cache.seek(8);
        assert_eq!(cache.position(), 8);
    }

    #[test]
    fn cache_source_reports_fault_on_miss() {
        let phys = PhysicalMmu::new();
        let mut cache = InstructionCache::new(4);
        cache.maybe_set_base(0x9000);
        let mut src = CacheSource::new(&mut cache, &phys);
        assert_eq!(ByteSource::next_u8(&mut src), None);
        assert!(src.take_fault().is_some());
    }
}
