//! The 256-entry IDT and interrupt/exception dispatch.
//!
//! Grounded on libcorevm's `InterruptController` (`interrupts.rs`): a
//! pending-vector model and IDT-entry reader. Our ISA has no segments or
//! gate types, so the entry format collapses to a single 8-byte handler
//! address per vector; delivery collapses to "push STS, push IP, clear the
//! interrupt-enable bit, jump to the handler" with no gate-type dispatch.
//! There is no double-fault chaining: a fault raised while already inside
//! a handler is dispatched exactly like any other, nesting on the stack
//! instead of escalating to a dedicated vector.

use crate::error::Result;
use crate::mmu::PhysicalMmu;
use crate::registers::{stack_index, RegisterFile};
use crate::stack;
use crate::width::Width;

/// Bit in STS gating whether interrupts may be delivered at all.
pub const STS_INTERRUPT_ENABLE: u64 = 1 << 0;

/// Outcome of attempting to dispatch an interrupt or exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Control transferred to the handler at the returned address.
    Delivered(u64),
    /// The IDT has never been loaded (`lidt` not yet executed), which
    /// terminates the emulator rather than faulting further.
    Uninitialized,
}

/// The interrupt descriptor table: 256 possible handler addresses, plus
/// whether `lidt` has ever been run.
pub struct InterruptController {
    table_base: Option<u64>,
}

impl InterruptController {
    #[must_use]
    pub fn new() -> Self {
        InterruptController { table_base: None }
    }

    /// `lidt`: record the physical base address of the guest's 256-entry,
    /// 8-byte-per-entry handler table.
    pub fn lidt(&mut self, table_base: u64) {
        self.table_base = Some(table_base);
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.table_base.is_some()
    }

    /// Raise an interrupt or exception for `vector`: save STS and IP on
    /// the stack, clear the interrupt-enable bit, and jump to the
    /// handler. Returns the IP to resume fetching from, or
    /// [`Dispatch::Uninitialized`] if no IDT has been loaded.
    pub fn raise(
        &self,
        vector: u8,
        regs: &mut RegisterFile,
        phys: &mut PhysicalMmu,
    ) -> Result<Dispatch> {
        let Some(base) = self.table_base else {
            return Ok(Dispatch::Uninitialized);
        };
        let entry_addr = base + u64::from(vector) * 8;
        let handler = phys.read_u64(entry_addr)?;

        let old_sts = regs.status().raw();
        let old_ip = regs.ip().raw();
        stack::push(regs, phys, old_sts, Width::Qword)?;
        stack::push(regs, phys, old_ip, Width::Qword)?;

        let new_sts = old_sts & !STS_INTERRUPT_ENABLE;
        regs.status_mut().force_write(new_sts, Width::Qword);
        regs.ip_mut().force_write(handler, Width::Qword);
        Ok(Dispatch::Delivered(handler))
    }

    /// `iret`: pop IP then STS, the exact reverse of [`Self::raise`]'s push
    /// order.
    pub fn iret(&self, regs: &mut RegisterFile, phys: &PhysicalMmu) -> Result<()> {
        let ip = stack::pop(regs, phys, Width::Qword)?;
        let sts = stack::pop(regs, phys, Width::Qword)?;
        regs.ip_mut().force_write(ip, Width::Qword);
        regs.status_mut().force_write(sts, Width::Qword);
        Ok(())
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

fn swap_sts_cr1(regs: &mut RegisterFile) {
    let sts = regs.status().raw();
    let cr1 = regs.control(1).raw();
    regs.status_mut().force_write(cr1, Width::Qword);
    regs.control_mut(1).force_write(sts, Width::Qword);
}

/// `syscall`: exit user mode. Swaps STS and CR1 wholesale (the supervisor's
/// last STS, parked in CR1 since the matching `sysret`/`enteruser`, becomes
/// live again; the user's STS is preserved in CR1 for the eventual
/// `sysret`), sets IP from the kernel's registered entry point in CR2, and
/// reseats SCP from R15 (the kernel stack pointer the guest staged there
/// before trapping in).
pub fn syscall(regs: &mut RegisterFile) {
    swap_sts_cr1(regs);
    let entry = regs.control(2).raw();
    regs.ip_mut().force_write(entry, Width::Qword);
    let kernel_scp = regs.gpr(15).raw();
    regs.stack_reg_mut(stack_index::SCP).force_write(kernel_scp, Width::Qword);
    regs.enter_supervisor_mode();
}

/// `sysret`: the exact reverse of [`syscall`] — swaps STS and CR1 back and
/// resumes at the IP staged in R14, without touching SCP (the user stack
/// pointer was never disturbed by `syscall`).
pub fn sysret(regs: &mut RegisterFile) {
    swap_sts_cr1(regs);
    let resume_ip = regs.gpr(14).raw();
    regs.ip_mut().force_write(resume_ip, Width::Qword);
    regs.enter_user_mode();
}

/// `enteruser addr`: a supervisor-only transition into a fresh user
/// context at `addr`, used by a kernel launching its first user task
///. Unlike `sysret`, there is no prior user STS to restore.
pub fn enteruser(regs: &mut RegisterFile, target_ip: u64) {
    regs.ip_mut().force_write(target_ip, Width::Qword);
    regs.enter_user_mode();
}
