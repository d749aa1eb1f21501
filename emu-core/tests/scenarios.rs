//! End-to-end scenarios exercising the full `Emulator`/`exec` stack rather
//! than individual opcode handlers: a program is assembled, loaded into a
//! fresh physical address space, and run to completion or to a chosen
//! stopping point.

use emu_core::codec::opcode::{alu, ctrl, misc};
use emu_core::codec::{encode, Instruction, Operand};
use emu_core::coordination::{Breakpoints, ExecutionGate, InstructionCounter};
use emu_core::debug::{DebugAction, DebugSession};
use emu_core::exec::{self, StepOutcome};
use emu_core::mmu::{Access, PageTableShape, PhysicalMmu, RegionKind};
use emu_core::registers::{stack_index, RegisterId};
use emu_core::width::Width;
use emu_core::Emulator;

fn assemble(program: &[Instruction]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut relocs = Vec::new();
    for instr in program {
        encode(instr, &mut bytes, &mut relocs).unwrap();
    }
    bytes
}

fn flat_emulator(ram_len: u64) -> Emulator {
    let mut phys = PhysicalMmu::new();
    phys.add_region(RegionKind::Ram, 0, ram_len);
    Emulator::new(phys)
}

#[test]
fn hello_hlt_halts_immediately() {
    let program = assemble(&[Instruction { opcode: misc::HLT, operands: vec![] }]);
    let mut emu = flat_emulator(0x1_000);
    emu.phys.write_bytes(0, &program).unwrap();
    let sts_before = emu.regs.status().raw();

    let gate = ExecutionGate::new();
    let breakpoints = Breakpoints::new();
    let counter = InstructionCounter::new();
    exec::run(&mut emu, &gate, &breakpoints, &counter).unwrap();

    assert!(emu.halted);
    assert_eq!(emu.regs.status().raw(), sts_before);
}

#[test]
fn add_two_immediates_leaves_the_sum_and_clear_flags() {
    let program = assemble(&[
        Instruction {
            opcode: misc::MOV,
            operands: vec![
                Operand::Register(RegisterId::gpr(0), Width::Qword),
                Operand::Immediate(5, Width::Qword),
            ],
        },
        Instruction {
            opcode: alu::ADD,
            operands: vec![
                Operand::Register(RegisterId::gpr(0), Width::Qword),
                Operand::Immediate(7, Width::Qword),
            ],
        },
        Instruction { opcode: misc::HLT, operands: vec![] },
    ]);
    let mut emu = flat_emulator(0x1_000);
    emu.phys.write_bytes(0, &program).unwrap();

    let gate = ExecutionGate::new();
    let breakpoints = Breakpoints::new();
    let counter = InstructionCounter::new();
    exec::run(&mut emu, &gate, &breakpoints, &counter).unwrap();

    assert!(emu.halted);
    assert_eq!(emu.regs.gpr(0).raw(), 12);
    assert_eq!(emu.regs.status().raw() & emu_core::flags::CF, 0);
    assert_eq!(emu.regs.status().raw() & emu_core::flags::ZF, 0);
}

#[test]
fn div_by_zero_routes_through_the_idt_and_the_handler_halts() {
    // vector 0 (DivByZero) handler: R15 <- 0xDEAD; hlt.
    let handler_base = 0x3000u64;
    let handler = assemble(&[
        Instruction {
            opcode: misc::MOV,
            operands: vec![
                Operand::Register(RegisterId::gpr(15), Width::Qword),
                Operand::Immediate(0xDEAD, Width::Qword),
            ],
        },
        Instruction { opcode: misc::HLT, operands: vec![] },
    ]);

    let idt_base = 0x2000u64;
    let main = assemble(&[
        Instruction {
            opcode: misc::LIDT,
            operands: vec![Operand::Immediate(idt_base, Width::Qword)],
        },
        Instruction {
            opcode: alu::DIV,
            operands: vec![
                Operand::Register(RegisterId::gpr(0), Width::Qword),
                Operand::Register(RegisterId::gpr(1), Width::Qword),
                Operand::Register(RegisterId::gpr(2), Width::Qword),
            ],
        },
    ]);

    let mut emu = flat_emulator(0x10_000);
    emu.phys.write_bytes(0, &main).unwrap();
    emu.phys.write_bytes(handler_base, &handler).unwrap();
    emu.phys.write_u64(idt_base, handler_base).unwrap(); // vector 0 entry

    emu.regs.force_write(RegisterId::gpr(1), 10, Width::Qword); // dividend
    // divisor (R2) stays zero

    let gate = ExecutionGate::new();
    let breakpoints = Breakpoints::new();
    let counter = InstructionCounter::new();
    exec::run(&mut emu, &gate, &breakpoints, &counter).unwrap();

    assert!(emu.halted);
    assert_eq!(emu.regs.gpr(15).raw(), 0xDEAD);
}

#[test]
fn stack_round_trip_pops_in_reverse_push_order() {
    let program = assemble(&[
        Instruction {
            opcode: misc::PUSH,
            operands: vec![Operand::Register(RegisterId::gpr(0), Width::Qword)],
        },
        Instruction {
            opcode: misc::PUSH,
            operands: vec![Operand::Register(RegisterId::gpr(1), Width::Qword)],
        },
        Instruction {
            opcode: misc::POP,
            operands: vec![Operand::Register(RegisterId::gpr(2), Width::Qword)],
        },
        Instruction {
            opcode: misc::POP,
            operands: vec![Operand::Register(RegisterId::gpr(3), Width::Qword)],
        },
        Instruction { opcode: misc::HLT, operands: vec![] },
    ]);
    let mut emu = flat_emulator(0x1_000);
    emu.phys.write_bytes(0, &program).unwrap();

    emu.regs.force_write(RegisterId::gpr(0), 0xAA, Width::Qword);
    emu.regs.force_write(RegisterId::gpr(1), 0xBB, Width::Qword);
    emu.regs.stack_reg_mut(stack_index::SBP).force_write(0x100, Width::Qword);
    emu.regs.stack_reg_mut(stack_index::STP).force_write(0x200, Width::Qword);
    emu.regs.stack_reg_mut(stack_index::SCP).force_write(0x200, Width::Qword);

    let gate = ExecutionGate::new();
    let breakpoints = Breakpoints::new();
    let counter = InstructionCounter::new();
    exec::run(&mut emu, &gate, &breakpoints, &counter).unwrap();

    assert!(emu.halted);
    assert_eq!(emu.regs.gpr(2).raw(), 0xBB);
    assert_eq!(emu.regs.gpr(3).raw(), 0xAA);
    assert_eq!(emu.regs.stack_reg(stack_index::SCP).raw(), 0x200);
}

#[test]
fn enabling_paging_translates_through_a_one_entry_table() {
    let mut emu = flat_emulator(0x10_000);

    // A single-level, 4 KiB-page table: one entry mapping vaddr 0x1000's
    // page to physical page 0x8000.
    let page_table_base = 0x100u64;
    // vaddr 0x1000 falls in page index 1 (0x1000 / 4096), so its PTE lives
    // at table_base + 1*8, not at the table's base entry.
    emu.phys.write_u64(page_table_base + 8, 0x8000 | 0b011 /* present | writable */).unwrap();
    emu.phys.write_u8(0x8000 + 0x23, 0x42).unwrap(); // byte at the mapped offset

    let shape_reg = 4096u64 | (1u64 << 32);
    emu.regs.force_write(RegisterId(0x24), shape_reg, Width::Qword); // CR4 shape
    emu.regs.force_write(RegisterId(0x23), page_table_base, Width::Qword); // CR3 root
    emu.write_register(
        RegisterId(0x20),
        emu_core::registers::cr0::PROTECTION_ENABLED | emu_core::registers::cr0::PAGING_ENABLED,
        Width::Qword,
    )
    .unwrap();
    assert!(emu.vmmu.is_enabled());

    // Sanity-check the shape is the one this test actually relies on.
    assert!(PageTableShape::new(4096, 1).is_ok());

    let value = emu.read_mem(0x1000 + 0x23, Width::Byte).unwrap();
    assert_eq!(value, 0x42);

    let paddr = emu.resolve(0x1000 + 0x23, Access::Read).unwrap();
    assert_eq!(paddr, 0x8000 + 0x23);
}

#[test]
fn breakpoint_hit_pauses_and_a_single_step_advances_exactly_one_instruction() {
    // An infinite self-loop: `jmp 0`.
    let program = assemble(&[Instruction {
        opcode: ctrl::JMP,
        operands: vec![Operand::Immediate(0, Width::Qword)],
    }]);
    let mut emu = flat_emulator(0x1_000);
    emu.phys.write_bytes(0, &program).unwrap();

    let gate = ExecutionGate::new();
    let breakpoints = Breakpoints::new();
    let counter = InstructionCounter::new();
    let session = DebugSession::new(&gate, &breakpoints, &counter);

    let mut out = Vec::new();
    let action = session.dispatch("b 0x0", &emu, &mut out).unwrap();
    assert_eq!(action, DebugAction::ContinuePrompt);
    assert!(breakpoints.hits(0));

    out.clear();
    session.dispatch("c", &emu, &mut out).unwrap();
    assert!(gate.poll(), "continue should clear the pause");

    // One iteration of the execution loop's own breakpoint check: hitting a breakpoint re-pauses the gate.
    let ip = emu.regs.ip().raw();
    if breakpoints.hits(ip) {
        gate.pause();
    }
    assert!(!gate.poll(), "landing on a breakpoint must re-pause the gate");

    out.clear();
    let action = session.dispatch("s", &emu, &mut out).unwrap();
    assert_eq!(action, DebugAction::ContinuePrompt);
    let reply = String::from_utf8(out).unwrap();
    assert!(reply.contains(&format!("0x{ip:016X}")));

    assert!(gate.poll(), "step should grant exactly one instruction");
    assert_eq!(exec::step(&mut emu).unwrap(), StepOutcome::Continue);
    assert!(!gate.poll(), "the granted step must not persist past its one instruction");
    assert_eq!(emu.regs.ip().raw(), ip, "jmp-to-self leaves IP unchanged");
}
