//! Text command loop driving the coordination primitives.
//!
//! This module is transport-agnostic: `dispatch` takes a line of input and
//! a `Write` sink for its reply. The `emu` binary owns the actual stdio /
//! file / TCP transports (see §2.11) and just feeds lines in from whichever
//! one currently holds the prompt.

use std::fmt::Write as _;
use std::io::Write;

use crate::coordination::{Breakpoints, ExecutionGate, InstructionCounter};
use crate::emulator::Emulator;
use crate::mmu::Access;

/// What the transport loop should do after a command has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugAction {
    /// Keep reading commands from this client.
    ContinuePrompt,
    /// `quit`/`q`/`exit`: stop serving this client (and, for `stdio`, the
    /// whole process).
    Quit,
}

/// Bundles the coordination primitives a debug command needs. Holds no
/// state of its own beyond the references — cheap to construct per line.
pub struct DebugSession<'a> {
    pub gate: &'a ExecutionGate,
    pub breakpoints: &'a Breakpoints,
    pub counter: &'a InstructionCounter,
}

impl<'a> DebugSession<'a> {
    #[must_use]
    pub fn new(gate: &'a ExecutionGate, breakpoints: &'a Breakpoints, counter: &'a InstructionCounter) -> Self {
        DebugSession { gate, breakpoints, counter }
    }

    /// Parse and run one command line, writing its reply to `out`.
    /// `emu` provides read access to registers and memory for `info`/`dump`;
    /// the execution thread is assumed joined while this runs.
    pub fn dispatch(&self, line: &str, emu: &Emulator, out: &mut impl Write) -> std::io::Result<DebugAction> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(DebugAction::ContinuePrompt);
        };
        let rest: Vec<&str> = words.collect();

        match cmd {
            "help" | "h" | "?" => {
                writeln!(out, "{}", HELP_TEXT)?;
            }
            "quit" | "q" | "exit" => {
                self.gate.request_terminate();
                return Ok(DebugAction::Quit);
            }
            "pause" | "p" => {
                self.gate.pause();
                writeln!(out, "paused")?;
            }
            "continue" | "c" => {
                self.gate.resume();
                writeln!(out, "continuing")?;
            }
            "step" | "s" => {
                self.gate.step_once();
                writeln!(out, "stepped to 0x{:016X}", emu.regs.ip().raw())?;
            }
            "breakpoint" | "b" => match parse_addr(rest.first()) {
                Some(addr) => {
                    self.breakpoints.insert(addr);
                    writeln!(out, "breakpoint set at 0x{addr:016X}")?;
                }
                None => writeln!(out, "usage: breakpoint <addr>")?,
            },
            "delete" | "d" => match parse_addr(rest.first()) {
                Some(addr) => {
                    if self.breakpoints.remove(addr) {
                        writeln!(out, "breakpoint removed at 0x{addr:016X}")?;
                    } else {
                        writeln!(out, "no breakpoint at 0x{addr:016X}")?;
                    }
                }
                None => writeln!(out, "usage: delete <addr>")?,
            },
            "info" | "i" => match rest.first().copied() {
                Some("registers") | Some("regs") | Some("r") => self.info_registers(emu, out)?,
                Some("memory") | Some("mem") | Some("m") => self.info_memory(out)?,
                _ => writeln!(out, "usage: info {{registers|memory}}")?,
            },
            "dump" | "dmp" => self.dump(&rest, emu, out)?,
            other => writeln!(out, "unknown command '{other}' (try 'help')")?,
        }
        Ok(DebugAction::ContinuePrompt)
    }

    fn info_registers(&self, emu: &Emulator, out: &mut impl Write) -> std::io::Result<()> {
        for i in 0..16 {
            writeln!(out, "R{i:<2} = 0x{:016X}", emu.regs.gpr(i).raw())?;
        }
        writeln!(out, "IP  = 0x{:016X}", emu.regs.ip().raw())?;
        writeln!(out, "STS = 0x{:016X}", emu.regs.status().raw())?;
        for i in 0..8 {
            writeln!(out, "CR{i} = 0x{:016X}", emu.regs.control(i).raw())?;
        }
        writeln!(out, "mode = {:?}", emu.regs.mode())?;
        Ok(())
    }

    fn info_memory(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "instructions executed: {}", self.counter.get())?;
        writeln!(out, "breakpoints: {:?}", self.breakpoints.list())?;
        Ok(())
    }

    fn dump(&self, rest: &[&str], emu: &Emulator, out: &mut impl Write) -> std::io::Result<()> {
        let (space, rest) = match rest.first().copied() {
            Some("phys") => (DumpSpace::Phys, &rest[1..]),
            Some("virt") => (DumpSpace::Virt, &rest[1..]),
            _ => (DumpSpace::Phys, rest),
        };
        let (Some(addr), Some(size)) = (parse_addr(rest.first()), rest.get(1).and_then(|s| parse_int(s))) else {
            writeln!(out, "usage: dump [phys|virt] <addr> <size>")?;
            return Ok(());
        };

        let paddr = match space {
            DumpSpace::Phys => addr,
            DumpSpace::Virt => match emu.resolve(addr, Access::Read) {
                Ok(p) => p,
                Err(e) => {
                    writeln!(out, "translation failed: {e}")?;
                    return Ok(());
                }
            },
        };

        let mut bytes = Vec::with_capacity(size as usize);
        for off in 0..size {
            match emu.phys.read_u8(paddr + off) {
                Ok(b) => bytes.push(b),
                Err(e) => {
                    writeln!(out, "read failed at 0x{:016X}: {e}", paddr + off)?;
                    return Ok(());
                }
            }
        }
        write!(out, "{}", hex_dump(paddr, &bytes))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum DumpSpace {
    Phys,
    Virt,
}

fn parse_addr(token: Option<&&str>) -> Option<u64> {
    token.and_then(|t| parse_int(t))
}

fn parse_int(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

/// Hex+ASCII view in 16-byte lines, collapsing runs of identical lines into
/// a single `*` marker — the same convention `xxd`/`hexdump -C` use.
fn hex_dump(base: u64, bytes: &[u8]) -> String {
    let mut result = String::new();
    let mut prev_line: Option<&[u8]> = None;
    let mut collapsed = false;

    for (i, chunk) in bytes.chunks(16).enumerate() {
        if Some(chunk) == prev_line {
            if !collapsed {
                let _ = writeln!(result, "*");
                collapsed = true;
            }
            continue;
        }
        collapsed = false;
        let addr = base + (i as u64) * 16;
        let _ = write!(result, "{addr:08X}  ");
        for (j, b) in chunk.iter().enumerate() {
            let _ = write!(result, "{b:02X} ");
            if j == 7 {
                let _ = write!(result, " ");
            }
        }
        for _ in chunk.len()..16 {
            let _ = write!(result, "   ");
        }
        let _ = write!(result, " |");
        for b in chunk {
            let c = if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' };
            result.push(c);
        }
        let _ = writeln!(result, "|");
        prev_line = Some(chunk);
    }
    result
}

const HELP_TEXT: &str = "\
commands: help(h,?) quit(q,exit) pause(p) continue(c) step(s)
          breakpoint <addr>(b) delete <addr>(d)
          info {registers|memory}(i) dump [phys|virt] <addr> <size>(dmp)";
