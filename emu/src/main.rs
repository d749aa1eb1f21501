//! Entry point for the `emu` binary: parses the CLI surface, builds the
//! boot-state physical memory map, attaches stub devices, and spawns the
//! execution/event/debug threads.

mod config;
mod debug_transport;
mod devices;
mod threads;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;

use emu_core::coordination::{Breakpoints, ExecutionGate, InstructionCounter};
use emu_core::mmu::{PhysicalMmu, RegionKind};
use emu_core::Emulator;

use config::Config;
use devices::{console::ConsoleDevice, storage::StorageDevice, NoopDevice};
use threads::FatalFlag;

/// BIOS region base, also the guest's initial IP at boot.
const BIOS_BASE: u64 = 0xF000_0000;
const BIOS_END: u64 = 0xFFFF_FF00;
const IO_WINDOW_BASE: u64 = BIOS_END;
const IO_WINDOW_END: u64 = 0x1_0000_0000;

fn build_physical_mmu(ram_bytes: u64, program: &[u8]) -> Result<PhysicalMmu> {
    let mut phys = PhysicalMmu::new();

    let ram1_len = ram_bytes.min(BIOS_BASE);
    if ram1_len > 0 {
        phys.add_region(RegionKind::Ram, 0, ram1_len);
    }

    phys.add_region(RegionKind::Bios, BIOS_BASE, BIOS_END - BIOS_BASE);
    if program.len() as u64 > BIOS_END - BIOS_BASE {
        anyhow::bail!("program image ({} bytes) does not fit the BIOS region", program.len());
    }
    phys.write_bytes(BIOS_BASE, program).context("loading program image into the BIOS region")?;

    phys.add_region(RegionKind::IoWindow, IO_WINDOW_BASE, IO_WINDOW_END - IO_WINDOW_BASE);

    if ram_bytes > BIOS_BASE {
        let ram2_len = ram_bytes - BIOS_BASE;
        phys.add_region(RegionKind::Ram, IO_WINDOW_END, ram2_len);
    }

    Ok(phys)
}

fn run(config: Config) -> Result<bool> {
    let program = std::fs::read(&config.program)
        .with_context(|| format!("reading program image {}", config.program.display()))?;
    let phys = build_physical_mmu(config.ram_bytes, &program)?;

    log::info!(
        "booting {} ({} bytes RAM, video={:?})",
        config.program.display(),
        config.ram_bytes,
        config.video
    );

    let mut emu = Emulator::new(phys);
    emu.regs.ip_mut().force_write(BIOS_BASE, emu_core::width::Width::Qword);

    emu.io.attach(0x1000, 0x10, Box::new(ConsoleDevice));
    let storage: Box<dyn emu_core::bus::IoDevice> = match &config.drive {
        Some(path) => Box::new(StorageDevice::open(path).with_context(|| format!("opening drive file {}", path.display()))?),
        None => Box::new(StorageDevice::empty()),
    };
    emu.io.attach(0x2000, 0x1_0000, storage);
    emu.io.attach(0x3000, 0x100, Box::new(NoopDevice)); // video/HID placeholder

    let emu = Arc::new(Mutex::new(emu));
    let gate = Arc::new(ExecutionGate::new());
    let breakpoints = Arc::new(Breakpoints::new());
    let counter = Arc::new(InstructionCounter::new());
    let fatal = Arc::new(FatalFlag::new());
    let (_event_tx, event_rx) = mpsc::channel();

    let exec_handle = threads::spawn_execution(
        Arc::clone(&emu),
        Arc::clone(&gate),
        Arc::clone(&breakpoints),
        Arc::clone(&counter),
        Arc::clone(&fatal),
    );
    let event_handle = threads::spawn_event(Arc::clone(&emu), Arc::clone(&gate), event_rx);
    let debug_handle = debug_transport::build(&config.debug)
        .context("opening debug transport")?
        .map(|transport| threads::spawn_debug(Arc::clone(&emu), Arc::clone(&gate), Arc::clone(&breakpoints), Arc::clone(&counter), transport));

    exec_handle.join().expect("execution thread panicked");
    gate.request_terminate();
    event_handle.join().expect("event thread panicked");
    if let Some(handle) = debug_handle {
        handle.join().expect("debug thread panicked");
    }

    Ok(fatal.get())
}

fn main() {
    env_logger::init();
    let config = Config::parse();

    match run(config) {
        Ok(false) => std::process::exit(0),
        Ok(true) => std::process::exit(1),
        Err(e) => {
            eprintln!("emu: {e:#}");
            std::process::exit(1);
        }
    }
}
