//! Spawns the execution, event, and debug threads. `emu-core`
//! defines the atomics and message types they share; this module owns the
//! `std::thread` plumbing since spawning OS threads is a host concern.
//!
//! Shared emulator state is a single `Arc<Mutex<Emulator>>` exposed as one
//! handle, with interior mutability confined to that lock plus the
//! existing lock-free coordination primitives, rather than literally
//! joining and respawning the execution thread on every
//! `SwitchToIp`/`NewMmu` event:
//! the mutex already serializes the execution thread against event/debug
//! writes, so a real join/respawn dance would add OS-thread overhead for
//! no extra safety.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use emu_core::coordination::{Breakpoints, EventMessage, ExecutionGate, InstructionCounter};
use emu_core::debug::DebugSession;
use emu_core::exec::{self, StepOutcome};
use emu_core::width::Width;
use emu_core::Emulator;

use crate::debug_transport::{DebugTransport, POLL_INTERVAL};

/// Set by the execution thread if it hits a host-internal error it cannot
/// route through the guest's IDT. `main` checks this after joining to pick an exit
/// code.
pub struct FatalFlag(AtomicBool);

impl FatalFlag {
    #[must_use]
    pub fn new() -> Self {
        FatalFlag(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for FatalFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The fetch-decode-dispatch loop, generalized from `emu_core::exec::run`
/// to lock around one instruction at a time instead of holding `&mut
/// Emulator` for the whole run, so the event and debug threads can
/// interleave.
pub fn spawn_execution(
    emu: Arc<Mutex<Emulator>>,
    gate: Arc<ExecutionGate>,
    breakpoints: Arc<Breakpoints>,
    counter: Arc<InstructionCounter>,
    fatal: Arc<FatalFlag>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        gate.set_running(true);
        let mut paused_at: Option<u64> = None;
        loop {
            if gate.should_terminate() {
                break;
            }
            if !gate.poll() {
                thread::yield_now();
                continue;
            }
            let ip = emu.lock().expect("emulator lock poisoned").regs.ip().raw();
            if breakpoints.hits(ip) && paused_at != Some(ip) {
                paused_at = Some(ip);
                gate.pause();
                continue;
            }
            paused_at = None;

            let outcome = {
                let mut guard = emu.lock().expect("emulator lock poisoned");
                #[cfg(feature = "debug_verbose")]
                log::trace!("step at ip=0x{:016X}", guard.regs.ip().raw());
                exec::step(&mut guard)
            };
            match outcome {
                Ok(StepOutcome::Continue) => counter.increment(),
                Ok(StepOutcome::Halted) => break,
                Err(e) => {
                    log::error!("unrecoverable fault escaped the IDT: {e}");
                    fatal.set();
                    gate.request_terminate();
                    break;
                }
            }
        }
        gate.set_running(false);
    })
}

/// Serves `SwitchToIp`/`NewMmu`/`StorageTransfer` events. Exits once the sender is dropped or termination is
/// requested.
pub fn spawn_event(
    emu: Arc<Mutex<Emulator>>,
    gate: Arc<ExecutionGate>,
    rx: Receiver<EventMessage>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        if gate.should_terminate() {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(EventMessage::SwitchToIp(ip)) => {
                let mut e = emu.lock().expect("emulator lock poisoned");
                e.regs.ip_mut().force_write(ip, Width::Qword);
                e.icache.seek(ip);
            }
            Ok(EventMessage::NewMmu) => {
                let mut e = emu.lock().expect("emulator lock poisoned");
                e.icache.update_mmu();
            }
            Ok(EventMessage::StorageTransfer { bytes }) => {
                log::info!("storage transfer completed: {bytes} bytes");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    })
}

/// Runs the debug command loop over whichever transport `--debug` selected.
/// Absent a debug thread, host SIGINT falls through to the OS default
/// (immediate process termination).
pub fn spawn_debug(
    emu: Arc<Mutex<Emulator>>,
    gate: Arc<ExecutionGate>,
    breakpoints: Arc<Breakpoints>,
    counter: Arc<InstructionCounter>,
    mut transport: Box<dyn DebugTransport>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let session = DebugSession::new(&gate, &breakpoints, &counter);
        loop {
            if gate.should_terminate() {
                break;
            }
            match transport.next_line() {
                Ok(Some(line)) => {
                    let snapshot = emu.lock().expect("emulator lock poisoned");
                    let mut out = Vec::new();
                    if session.dispatch(&line, &snapshot, &mut out).is_err() {
                        break;
                    }
                    drop(snapshot);
                    let text = String::from_utf8_lossy(&out).into_owned();
                    if transport.reply(&text).is_err() {
                        break;
                    }
                    if gate.should_terminate() {
                        break;
                    }
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    log::warn!("debug transport error: {e}");
                    break;
                }
            }
        }
    })
}
