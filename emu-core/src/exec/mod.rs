//! The fetch-decode-dispatch execution engine. Grounded on libcorevm's top-level `execute`/`exec_primary`
//! shape (`executor/mod.rs`): fetch one opcode, decode its fixed-arity
//! operand list, dispatch to a handler, advance IP. Generalized from a
//! single-thread call into `cpu.step()` to a loop that also polls the
//! cross-thread coordination atomics between instructions.

pub mod alu;
pub mod control;
pub mod operand;

use crate::codec::decoder::decode;
use crate::codec::opcode;
use crate::coordination::{Breakpoints, ExecutionGate, InstructionCounter};
use crate::emulator::Emulator;
use crate::error::{EmuError, Result};
use crate::icache::CacheSource;
use crate::interrupts::Dispatch;
use crate::width::Width;
use control::ControlOutcome;

/// Result of executing exactly one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halted,
}

/// Route a guest-facing fault through the IDT: delivered
/// faults jump to the handler like any other vector (there is no
/// double-fault escalation — a fault raised inside a handler just nests);
/// an uninitialized IDT halts rather than propagating further.
fn handle_fault(emu: &mut Emulator, fault: EmuError) -> Result<StepOutcome> {
    match emu.idt.raise(fault.vector(), &mut emu.regs, &mut emu.phys)? {
        Dispatch::Delivered(handler) => {
            emu.icache.seek(handler);
            Ok(StepOutcome::Continue)
        }
        Dispatch::Uninitialized => {
            emu.halted = true;
            Ok(StepOutcome::Halted)
        }
    }
}

/// Execute exactly one instruction at the current IP.
pub fn step(emu: &mut Emulator) -> Result<StepOutcome> {
    let fetch_addr = emu.regs.ip().raw();
    emu.icache.maybe_set_base(fetch_addr);

    let decoded = {
        let mut source = CacheSource::new(&mut emu.icache, &emu.phys);
        match decode(&mut source) {
            Ok(d) => d,
            Err(_) => {
                let fault = source.take_fault().unwrap_or(EmuError::InvalidInstruction);
                return handle_fault(emu, fault);
            }
        }
    };
    let next_default = fetch_addr.wrapping_add(decoded.length as u64);

    let outcome = if decoded.opcode == opcode::SDIV || opcode::is_alu(decoded.opcode) {
        alu::exec_alu(emu, decoded.opcode, &decoded.operands).map(|()| ControlOutcome::Continue)
    } else if opcode::is_control_flow(decoded.opcode) || opcode::is_misc(decoded.opcode) {
        control::exec_control(emu, decoded.opcode, &decoded.operands, next_default)
    } else {
        Err(EmuError::InvalidInstruction)
    };

    match outcome {
        Ok(ControlOutcome::Continue) => {
            emu.regs.ip_mut().force_write(next_default, Width::Qword);
            emu.icache.maybe_set_base(next_default);
            Ok(StepOutcome::Continue)
        }
        Ok(ControlOutcome::Jump(target)) => {
            emu.regs.ip_mut().force_write(target, Width::Qword);
            emu.icache.seek(target);
            Ok(StepOutcome::Continue)
        }
        Ok(ControlOutcome::Halt) => {
            emu.halted = true;
            Ok(StepOutcome::Halted)
        }
        Err(fault) => handle_fault(emu, fault),
    }
}

/// Run until `hlt`, an unhandled fault, or `gate.request_terminate()`.
/// Polls `gate` and `breakpoints` between every instruction.
pub fn run(
    emu: &mut Emulator,
    gate: &ExecutionGate,
    breakpoints: &Breakpoints,
    counter: &InstructionCounter,
) -> Result<()> {
    gate.set_running(true);
    let mut paused_at: Option<u64> = None;
    loop {
        if gate.should_terminate() {
            break;
        }
        if !gate.poll() {
            std::thread::yield_now();
            continue;
        }
        let ip = emu.regs.ip().raw();
        if breakpoints.hits(ip) && paused_at != Some(ip) {
            paused_at = Some(ip);
            gate.pause();
            continue;
        }
        paused_at = None;

        match step(emu)? {
            StepOutcome::Continue => counter.increment(),
            StepOutcome::Halted => break,
        }
    }
    gate.set_running(false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::opcode::{alu, misc};
    use crate::codec::operand::Operand;
    use crate::codec::{encode, Instruction};
    use crate::mmu::{PhysicalMmu, RegionKind};
    use crate::registers::RegisterId;

    fn assemble(program: &[Instruction]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut relocs = Vec::new();
        for instr in program {
            encode(instr, &mut bytes, &mut relocs).unwrap();
        }
        bytes
    }

    fn sample(program: &[u8]) -> Emulator {
        let mut phys = PhysicalMmu::new();
        phys.add_region(RegionKind::Ram, 0, 0x10_000);
        phys.write_bytes(0, program).unwrap();
        Emulator::new(phys)
    }

    #[test]
    fn hello_hlt_halts_on_first_instruction() {
        let program = assemble(&[Instruction { opcode: misc::HLT, operands: vec![] }]);
        let mut emu = sample(&program);
        assert_eq!(step(&mut emu).unwrap(), StepOutcome::Halted);
        assert!(emu.halted);
    }

    #[test]
    fn add_two_immediates_into_a_register() {
        let program = assemble(&[
            Instruction {
                opcode: alu::ADD,
                operands: vec![
                    Operand::Register(RegisterId::gpr(0), Width::Qword),
                    Operand::Immediate(7, Width::Qword),
                ],
            },
            Instruction { opcode: misc::HLT, operands: vec![] },
        ]);
        let mut emu = sample(&program);
        emu.regs.force_write(RegisterId::gpr(0), 35, Width::Qword);
        assert_eq!(step(&mut emu).unwrap(), StepOutcome::Continue);
        assert_eq!(emu.regs.gpr(0).raw(), 42);
        assert_eq!(step(&mut emu).unwrap(), StepOutcome::Halted);
    }

    #[test]
    fn div_by_zero_without_idt_halts_the_run_loop() {
        let program = assemble(&[Instruction {
            opcode: alu::DIV,
            operands: vec![
                Operand::Register(RegisterId::gpr(0), Width::Qword),
                Operand::Register(RegisterId::gpr(1), Width::Qword),
                Operand::Register(RegisterId::gpr(2), Width::Qword),
            ],
        }]);
        let mut emu = sample(&program);
        emu.regs.force_write(RegisterId::gpr(1), 10, Width::Qword);
        let gate = ExecutionGate::new();
        let breakpoints = Breakpoints::new();
        let counter = InstructionCounter::new();
        run(&mut emu, &gate, &breakpoints, &counter).unwrap();
        assert!(emu.halted);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn gated_single_step_advances_exactly_one_instruction() {
        let program = assemble(&[
            Instruction { opcode: misc::NOP, operands: vec![] },
            Instruction { opcode: misc::HLT, operands: vec![] },
        ]);
        let mut emu = sample(&program);
        let gate = ExecutionGate::new();
        gate.pause();
        gate.step_once();
        assert!(gate.poll());
        assert_eq!(step(&mut emu).unwrap(), StepOutcome::Continue);
        assert_eq!(emu.regs.ip().raw(), 1);
        assert!(!gate.poll(), "allow_one must not persist past the single step it granted");
    }
}
