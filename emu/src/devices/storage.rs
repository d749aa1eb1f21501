//! A byte-addressable storage device backed by a flat file.

use std::fs;
use std::path::Path;

use emu_core::error::{EmuError, Result};
use emu_core::width::Width;
use emu_core::bus::IoDevice;

pub struct StorageDevice {
    bytes: Vec<u8>,
}

impl StorageDevice {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(StorageDevice { bytes: fs::read(path)? })
    }

    #[must_use]
    pub fn empty() -> Self {
        StorageDevice { bytes: Vec::new() }
    }
}

impl IoDevice for StorageDevice {
    fn read(&mut self, offset: u64, width: Width) -> Result<u64> {
        let start = offset as usize;
        let len = width.bytes() as usize;
        let end = start.checked_add(len).ok_or(EmuError::PhysMemViolation(offset))?;
        let slice = self.bytes.get(start..end).ok_or(EmuError::PhysMemViolation(offset))?;
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(slice);
        Ok(u64::from_le_bytes(buf))
    }

    fn write(&mut self, offset: u64, width: Width, value: u64) -> Result<()> {
        let start = offset as usize;
        let len = width.bytes() as usize;
        let end = start.checked_add(len).ok_or(EmuError::PhysMemViolation(offset))?;
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }
}
