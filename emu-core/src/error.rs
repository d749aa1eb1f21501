//! Error types for the emulator core.
//!
//! `EmuError` serves dual purpose: it is both the Rust error type returned
//! from fallible operations and the representation of a guest exception.
//! The execution engine catches these errors and routes them to the guest's
//! IDT as hardware interrupts.

use core::fmt;

/// Errors raised while decoding or executing guest instructions, or while
/// walking guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuError {
    /// Divide with a zero divisor (`div`/`sdiv`).
    DivByZero,
    /// Quotient did not fit in the destination width.
    IntegerOverflow,
    /// Unknown opcode, malformed operand descriptor, or invalid paging
    /// configuration.
    InvalidInstruction,
    /// MMU access landed outside any region, or a page walk found no
    /// mapping, or a translation fault occurred at the given address.
    PhysMemViolation(u64),
    /// A privileged operation was attempted from user mode.
    UserModeViolation,
    /// `syscall` was attempted from supervisor mode.
    SupervisorModeViolation,
}

impl EmuError {
    /// The fixed interrupt vector this exception is delivered through.
    #[must_use]
    pub const fn vector(self) -> u8 {
        match self {
            EmuError::DivByZero => 0,
            EmuError::IntegerOverflow => 1,
            EmuError::InvalidInstruction => 2,
            EmuError::PhysMemViolation(_) => 3,
            EmuError::UserModeViolation => 4,
            EmuError::SupervisorModeViolation => 5,
        }
    }

    /// The faulting address carried by this exception, if any.
    #[must_use]
    pub const fn fault_address(self) -> Option<u64> {
        match self {
            EmuError::PhysMemViolation(addr) => Some(addr),
            _ => None,
        }
    }
}

impl fmt::Display for EmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmuError::DivByZero => write!(f, "divide by zero"),
            EmuError::IntegerOverflow => write!(f, "integer overflow in division"),
            EmuError::InvalidInstruction => write!(f, "invalid instruction"),
            EmuError::PhysMemViolation(addr) => {
                write!(f, "physical memory violation at 0x{addr:016X}")
            }
            EmuError::UserModeViolation => write!(f, "user-mode violation"),
            EmuError::SupervisorModeViolation => write!(f, "supervisor-mode violation"),
        }
    }
}

impl std::error::Error for EmuError {}

/// Host-internal errors: malformed instruction streams the decoder's
/// callback cannot recover from, signals other than SIGINT reaching the
/// debug thread, and thread-coordination invariant violations. These never
/// reach the guest; the host prints a diagnostic and exits nonzero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The decoder ran out of bytes before finishing an instruction.
    ShortStream,
    /// An operand descriptor encoded an unsupported or reserved form.
    InvalidOperandType,
    /// A signal other than SIGINT reached the debug thread.
    UnexpectedSignal(i32),
    /// A thread-coordination invariant was violated, e.g. attempting to
    /// kill the current instruction from the execution thread itself.
    CoordinationInvariant(&'static str),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::ShortStream => write!(f, "instruction stream ended unexpectedly"),
            HostError::InvalidOperandType => write!(f, "invalid operand descriptor"),
            HostError::UnexpectedSignal(sig) => write!(f, "unexpected signal {sig}"),
            HostError::CoordinationInvariant(what) => {
                write!(f, "thread-coordination invariant violated: {what}")
            }
        }
    }
}

impl std::error::Error for HostError {}

/// Convenience result alias for guest-facing operations.
pub type Result<T> = core::result::Result<T, EmuError>;
