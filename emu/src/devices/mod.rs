//! Minimal stub I/O device backends.
//! These are the `emu` binary's own implementations of
//! `emu_core::bus::IoDevice` — deliberately thin, since real graphics/HID
//! rendering is out of scope.

pub mod console;
pub mod storage;

use emu_core::bus::IoDevice;
use emu_core::error::Result;
use emu_core::width::Width;

/// A device with no registers of its own. Used for the video and HID
/// backends when `-d none` (or any backend, since none is implemented for
/// real) is selected — every access reads as zero and writes are dropped.
#[derive(Debug, Default)]
pub struct NoopDevice;

impl IoDevice for NoopDevice {
    fn read(&mut self, _offset: u64, _width: Width) -> Result<u64> {
        Ok(0)
    }

    fn write(&mut self, _offset: u64, _width: Width, _value: u64) -> Result<()> {
        Ok(())
    }
}
