//! Command-line surface, parsed with `clap`'s
//! derive API into a [`Config`] that [`crate::main`] turns into a boot-state
//! physical memory map and an initial debug/console transport choice.

use std::path::PathBuf;

use clap::Parser;

/// Video backend selector. Only `None` is implemented — `Sdl`/`Xcb` are
/// accepted so `-d` matches the documented flag surface, but both resolve
/// to the same no-op video device (concrete device backends are out of
/// scope here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoBackend {
    Sdl,
    Xcb,
    None,
}

impl std::str::FromStr for VideoBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sdl" => Ok(VideoBackend::Sdl),
            "xcb" => Ok(VideoBackend::Xcb),
            "none" => Ok(VideoBackend::None),
            other => Err(format!("unknown video backend '{other}' (expected sdl|xcb|none)")),
        }
    }
}

/// A transport selector shared by `-c` (console) and `--debug`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Disabled,
    Stdio,
    File(PathBuf),
    Port(u16),
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "disabled" {
            return Ok(Transport::Disabled);
        }
        if s == "stdio" {
            return Ok(Transport::Stdio);
        }
        if let Some(path) = s.strip_prefix("file:") {
            return Ok(Transport::File(PathBuf::from(path)));
        }
        if let Some(port) = s.strip_prefix("port:") {
            return port.parse::<u16>().map(Transport::Port).map_err(|e| e.to_string());
        }
        Err(format!("unrecognized transport '{s}' (expected stdio|file:PATH|port:N)"))
    }
}

/// Parsed command-line configuration for one emulator run.
#[derive(Debug, Parser)]
#[command(name = "emu", about = "Register-machine emulator")]
pub struct Config {
    /// Program image to load into the BIOS region.
    #[arg(short = 'p', long = "program")]
    pub program: PathBuf,

    /// Guest RAM size in bytes.
    #[arg(short = 'm', long = "ram", default_value_t = 0x0200_0000)]
    pub ram_bytes: u64,

    /// Video backend (stub; only affects which no-op device is attached).
    #[arg(short = 'd', long = "video", default_value = "none")]
    pub video: VideoBackend,

    /// Backing file for the storage device, if any.
    #[arg(short = 'D', long = "drive")]
    pub drive: Option<PathBuf>,

    /// Console I/O transport.
    #[arg(short = 'c', long = "console", default_value = "stdio")]
    pub console: Transport,

    /// Debug interface transport.
    #[arg(long = "debug", default_value = "disabled")]
    pub debug: Transport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parses_file_and_port_forms() {
        assert_eq!("file:/tmp/x".parse::<Transport>().unwrap(), Transport::File(PathBuf::from("/tmp/x")));
        assert_eq!("port:4444".parse::<Transport>().unwrap(), Transport::Port(4444));
        assert_eq!("stdio".parse::<Transport>().unwrap(), Transport::Stdio);
        assert!("bogus".parse::<Transport>().is_err());
    }

    #[test]
    fn video_backend_rejects_unknown_values() {
        assert!("none".parse::<VideoBackend>().is_ok());
        assert!("crt".parse::<VideoBackend>().is_err());
    }
}
