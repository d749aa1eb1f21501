//! Shared coordination primitives between the execution, event, debug, and
//! device-I/O threads.
//!
//! `emu-core` itself is thread-agnostic — it defines the atomics and the
//! breakpoint map the threads share, not the threads themselves (those are
//! spawned by the `emu` binary). The fast-path/slow-path breakpoint check
//! is grounded on the general supervisory atomic-flag pattern used for
//! cross-thread state in `amoljassal-sis-kernel-showcase`'s QEMU
//! supervisor (`crates/daemon/src/qemu/supervisor.rs`, `AtomicBool` +
//! `Ordering::Relaxed` flags polled by a hot loop), translated here from
//! that crate's `tokio` primitives to plain `std::sync` since nothing else
//! in this workspace needs an async runtime.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// The four atomics gating the execution thread's run state.
pub struct ExecutionGate {
    /// `false` pauses the execution thread before its next fetch.
    execution_allowed: AtomicBool,
    /// `true` while the execution thread is actively inside its run loop
    /// (as opposed to blocked waiting on `execution_allowed`).
    execution_running: AtomicBool,
    /// Set once; the execution thread observes it and exits instead of
    /// looping again.
    terminate: AtomicBool,
    /// Single-step gate: sets `execution_allowed` for exactly one
    /// instruction, then clears it again.
    allow_one: AtomicBool,
}

impl ExecutionGate {
    #[must_use]
    pub fn new() -> Self {
        ExecutionGate {
            execution_allowed: AtomicBool::new(true),
            execution_running: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            allow_one: AtomicBool::new(false),
        }
    }

    /// Called by the execution thread before each instruction: returns
    /// `true` if it should proceed.
    pub fn poll(&self) -> bool {
        if self.allow_one.swap(false, Ordering::AcqRel) {
            return true;
        }
        self.execution_allowed.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.execution_allowed.store(false, Ordering::Release);
    }

    pub fn resume(&self) {
        self.execution_allowed.store(true, Ordering::Release);
    }

    /// Request exactly one more instruction be executed while paused
    /// (debug `step`).
    pub fn step_once(&self) {
        self.allow_one.store(true, Ordering::Release);
    }

    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.execution_running.store(running, Ordering::Release);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.execution_running.load(Ordering::Acquire)
    }
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The breakpoint set, with a fast-path atomic so the execution thread's
/// hot loop doesn't take a lock when there are no breakpoints at all.
pub struct Breakpoints {
    any_set: AtomicBool,
    addrs: Mutex<HashSet<u64>>,
}

impl Breakpoints {
    #[must_use]
    pub fn new() -> Self {
        Breakpoints { any_set: AtomicBool::new(false), addrs: Mutex::new(HashSet::new()) }
    }

    pub fn insert(&self, addr: u64) {
        let mut set = self.addrs.lock().expect("breakpoint set poisoned");
        set.insert(addr);
        self.any_set.store(!set.is_empty(), Ordering::Release);
    }

    pub fn remove(&self, addr: u64) -> bool {
        let mut set = self.addrs.lock().expect("breakpoint set poisoned");
        let removed = set.remove(&addr);
        self.any_set.store(!set.is_empty(), Ordering::Release);
        removed
    }

    /// Fast-path check: skip the lock entirely when no breakpoints exist.
    #[must_use]
    pub fn hits(&self, addr: u64) -> bool {
        if !self.any_set.load(Ordering::Acquire) {
            return false;
        }
        self.addrs.lock().expect("breakpoint set poisoned").contains(&addr)
    }

    #[must_use]
    pub fn list(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.addrs.lock().expect("breakpoint set poisoned").iter().copied().collect();
        v.sort_unstable();
        v
    }
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-thread notifications the event thread relays to the debug
/// interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMessage {
    /// Execution jumped to a new IP outside the normal fetch-increment
    /// path (a branch, call, or interrupt dispatch).
    SwitchToIp(u64),
    /// The virtual MMU's mapping changed (CR3 reseat or paging toggle).
    NewMmu,
    /// A storage device completed a transfer of `bytes` bytes.
    StorageTransfer { bytes: u64 },
}

/// Monotonically increasing counter of executed instructions, read by the
/// debug interface's `info` command without needing to pause execution.
pub struct InstructionCounter(AtomicU64);

impl InstructionCounter {
    #[must_use]
    pub fn new() -> Self {
        InstructionCounter(AtomicU64::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for InstructionCounter {
    fn default() -> Self {
        Self::new()
    }
}
