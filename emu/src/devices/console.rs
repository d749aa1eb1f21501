//! A minimal console device: one write-only register at offset 0 that
//! writes a byte to stdout.

use std::io::Write;

use emu_core::bus::IoDevice;
use emu_core::error::Result;
use emu_core::width::Width;

#[derive(Default)]
pub struct ConsoleDevice;

impl IoDevice for ConsoleDevice {
    fn read(&mut self, _offset: u64, _width: Width) -> Result<u64> {
        Ok(0)
    }

    fn write(&mut self, offset: u64, _width: Width, value: u64) -> Result<()> {
        if offset == 0 {
            print!("{}", value as u8 as char);
            let _ = std::io::stdout().flush();
        }
        Ok(())
    }
}
