//! Control-flow, stack, and privileged-transition opcode dispatch
//!. Grounded on libcorevm's branch-condition
//! and `call`/`ret` handling (`executor/mod.rs`, `executor/control.rs`),
//! adapted to this ISA's explicit vector-based interrupt model and its
//! whole-register `syscall`/`sysret` swap (`crate::interrupts`).

use crate::codec::opcode::{ctrl::*, misc::*};
use crate::codec::operand::Operand;
use crate::emulator::Emulator;
use crate::error::{EmuError, Result};
use crate::exec::operand::{read, width_of, write};
use crate::flags::Condition;
use crate::interrupts::{self, Dispatch};
use crate::stack;
use crate::width::Width;

/// What a dispatched instruction wants the run loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Fall through to the instruction immediately after this one.
    Continue,
    /// Resume fetching at this absolute address.
    Jump(u64),
    /// `hlt`, or an unhandled guest fault with no IDT loaded: the run
    /// loop should stop.
    Halt,
}

fn require_supervisor(emu: &Emulator) -> Result<()> {
    if emu.regs.mode().is_user() {
        Err(EmuError::UserModeViolation)
    } else {
        Ok(())
    }
}

fn branch(emu: &mut Emulator, cond: Condition, target: &Operand) -> Result<ControlOutcome> {
    if cond.eval(emu.regs.status().raw()) {
        Ok(ControlOutcome::Jump(read(emu, target)?))
    } else {
        Ok(ControlOutcome::Continue)
    }
}

fn dispatch_interrupt(emu: &mut Emulator, vector: u8) -> Result<ControlOutcome> {
    let outcome = emu.idt.raise(vector, &mut emu.regs, &mut emu.phys)?;
    match outcome {
        Dispatch::Delivered(handler) => Ok(ControlOutcome::Jump(handler)),
        Dispatch::Uninitialized => Ok(ControlOutcome::Halt),
    }
}

/// Dispatch one control-flow or misc-class opcode. `fallthrough_ip` is the
/// address immediately after this instruction, used by `call` to know
/// what to push as the return address.
pub fn exec_control(
    emu: &mut Emulator,
    opcode: u8,
    operands: &[Operand],
    fallthrough_ip: u64,
) -> Result<ControlOutcome> {
    match opcode {
        JMP => Ok(ControlOutcome::Jump(read(emu, &operands[0])?)),
        JC => branch(emu, Condition::Carry, &operands[0]),
        JNC => branch(emu, Condition::NotCarry, &operands[0]),
        JZ => branch(emu, Condition::Zero, &operands[0]),
        JNZ => branch(emu, Condition::NotZero, &operands[0]),
        JL => branch(emu, Condition::Less, &operands[0]),
        JLE => branch(emu, Condition::LessOrEqual, &operands[0]),
        JNL => branch(emu, Condition::NotLess, &operands[0]),
        JNLE => branch(emu, Condition::NotLessOrEqual, &operands[0]),

        CALL => {
            let target = read(emu, &operands[0])?;
            stack::push(&mut emu.regs, &mut emu.phys, fallthrough_ip, Width::Qword)?;
            Ok(ControlOutcome::Jump(target))
        }
        RET => {
            let ip = stack::pop(&mut emu.regs, &emu.phys, Width::Qword)?;
            Ok(ControlOutcome::Jump(ip))
        }

        MOV => {
            let value = read(emu, &operands[1])?;
            write(emu, &operands[0], value)?;
            Ok(ControlOutcome::Continue)
        }
        NOP => Ok(ControlOutcome::Continue),
        HLT => Ok(ControlOutcome::Halt),

        PUSH => {
            let width = width_of(&operands[0]);
            let value = read(emu, &operands[0])?;
            stack::push(&mut emu.regs, &mut emu.phys, value, width)?;
            Ok(ControlOutcome::Continue)
        }
        POP => {
            let width = width_of(&operands[0]);
            let value = stack::pop(&mut emu.regs, &emu.phys, width)?;
            write(emu, &operands[0], value)?;
            Ok(ControlOutcome::Continue)
        }
        PUSHA => {
            stack::push_all(&mut emu.regs, &mut emu.phys)?;
            Ok(ControlOutcome::Continue)
        }
        POPA => {
            stack::pop_all(&mut emu.regs, &emu.phys)?;
            Ok(ControlOutcome::Continue)
        }

        INT => {
            require_supervisor(emu)?;
            let vector = read(emu, &operands[0])? as u8;
            dispatch_interrupt(emu, vector)
        }
        LIDT => {
            require_supervisor(emu)?;
            let base = read(emu, &operands[0])?;
            emu.idt.lidt(base);
            Ok(ControlOutcome::Continue)
        }
        IRET => {
            require_supervisor(emu)?;
            emu.idt.iret(&mut emu.regs, &emu.phys)?;
            Ok(ControlOutcome::Jump(emu.regs.ip().raw()))
        }
        SYSCALL => {
            // syscall is the user-mode-only trap into supervisor code
            //; attempting it while already supervisor is a
            // guest programming error, not a silent no-op.
            if !emu.regs.mode().is_user() {
                return Err(EmuError::SupervisorModeViolation);
            }
            interrupts::syscall(&mut emu.regs);
            Ok(ControlOutcome::Jump(emu.regs.ip().raw()))
        }
        SYSRET => {
            interrupts::sysret(&mut emu.regs);
            Ok(ControlOutcome::Jump(emu.regs.ip().raw()))
        }
        ENTERUSER => {
            require_supervisor(emu)?;
            let target = read(emu, &operands[0])?;
            interrupts::enteruser(&mut emu.regs, target);
            Ok(ControlOutcome::Jump(target))
        }

        _ => Err(EmuError::InvalidInstruction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::{PhysicalMmu, RegionKind};
    use crate::registers::stack_index;

    fn sample() -> Emulator {
        let mut phys = PhysicalMmu::new();
        phys.add_region(RegionKind::Ram, 0, 0x10_000);
        let mut emu = Emulator::new(phys);
        emu.regs.stack_reg_mut(stack_index::SCP).force_write(0x2000, Width::Qword);
        emu
    }

    #[test]
    fn call_pushes_return_address_and_jumps() {
        let mut emu = sample();
        let target = Operand::Immediate(0x500, Width::Qword);
        let outcome = exec_control(&mut emu, CALL, &[target], 0x42).unwrap();
        assert_eq!(outcome, ControlOutcome::Jump(0x500));
        let ret = stack::pop(&mut emu.regs, &emu.phys, Width::Qword).unwrap();
        assert_eq!(ret, 0x42);
    }

    #[test]
    fn syscall_from_supervisor_faults() {
        let mut emu = sample();
        emu.regs.control_mut(0).force_write(crate::registers::cr0::PROTECTION_ENABLED, Width::Qword);
        let err = exec_control(&mut emu, SYSCALL, &[], 0).unwrap_err();
        assert_eq!(err, EmuError::SupervisorModeViolation);
    }

    #[test]
    fn int_without_idt_halts() {
        let mut emu = sample();
        let vector = Operand::Immediate(3, Width::Byte);
        let outcome = exec_control(&mut emu, INT, &[vector], 0).unwrap();
        assert_eq!(outcome, ControlOutcome::Halt);
    }

    #[test]
    fn hlt_halts() {
        let mut emu = sample();
        assert_eq!(exec_control(&mut emu, HLT, &[], 0).unwrap(), ControlOutcome::Halt);
    }

    #[test]
    fn int_from_user_mode_faults() {
        let mut emu = sample();
        emu.regs.control_mut(0).force_write(crate::registers::cr0::PROTECTION_ENABLED, Width::Qword);
        emu.regs.enter_user_mode();
        let vector = Operand::Immediate(3, Width::Byte);
        let err = exec_control(&mut emu, INT, &[vector], 0).unwrap_err();
        assert_eq!(err, EmuError::UserModeViolation);
    }
}
