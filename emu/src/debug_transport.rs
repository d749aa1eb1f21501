//! The three debug transports. `emu_core`
//! only needs something it can read commands from and write replies to —
//! these structs are the host I/O behind that contract.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::time::Duration;

/// One command line in, one reply out. `next_line` returns `Ok(None)` when
/// no command is currently available; the caller polls again rather than
/// treating it as end-of-stream (file/port transports are always
/// "still open" from the emulator's point of view).
pub trait DebugTransport: Send {
    fn next_line(&mut self) -> io::Result<Option<String>>;
    fn reply(&mut self, text: &str) -> io::Result<()>;
}

pub struct StdioTransport {
    stdin: BufReader<io::Stdin>,
}

impl StdioTransport {
    #[must_use]
    pub fn new() -> Self {
        StdioTransport { stdin: BufReader::new(io::stdin()) }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugTransport for StdioTransport {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.stdin.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }

    fn reply(&mut self, text: &str) -> io::Result<()> {
        print!("{text}");
        io::stdout().flush()
    }
}

/// `file:PATH` — commands are lines an external editor appends to the
/// file; replies are appended right back. The transport remembers how far
/// it has already read so re-polling the same file doesn't replay old
/// commands.
pub struct FileTransport {
    path: std::path::PathBuf,
    read_offset: u64,
}

impl FileTransport {
    pub fn open(path: &Path) -> io::Result<Self> {
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileTransport { path: path.to_path_buf(), read_offset: 0 })
    }
}

impl DebugTransport for FileTransport {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.read_offset))?;
        let mut buf = String::new();
        let read = file.read_to_string(&mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        let mut lines = buf.lines();
        let Some(first) = lines.next() else {
            return Ok(None);
        };
        self.read_offset += (first.len() + 1) as u64;
        Ok(Some(first.to_string()))
    }

    fn reply(&mut self, text: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(text.as_bytes())
    }
}

/// `port:N` — a TCP server where the *oldest* connected client serves the
/// prompt; closed clients are dropped and the next one promoted.
pub struct PortTransport {
    listener: TcpListener,
    clients: VecDeque<TcpStream>,
}

impl PortTransport {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(PortTransport { listener, clients: VecDeque::new() })
    }

    fn accept_pending(&mut self) {
        while let Ok((stream, _addr)) = self.listener.accept() {
            let _ = stream.set_nonblocking(true);
            self.clients.push_back(stream);
        }
    }
}

impl DebugTransport for PortTransport {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        self.accept_pending();
        loop {
            let Some(stream) = self.clients.front_mut() else {
                return Ok(None);
            };
            let mut buf = [0u8; 1024];
            match stream.read(&mut buf) {
                Ok(0) => {
                    self.clients.pop_front();
                    continue;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    let line = text.lines().next().unwrap_or("").trim().to_string();
                    return Ok(Some(line));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => {
                    self.clients.pop_front();
                    return Err(e);
                }
            }
        }
    }

    fn reply(&mut self, text: &str) -> io::Result<()> {
        if let Some(stream) = self.clients.front_mut() {
            stream.write_all(text.as_bytes())?;
        }
        Ok(())
    }
}

/// Build a transport from the parsed `--debug` flag. Returns `None` for
/// `disabled`.
pub fn build(transport: &crate::config::Transport) -> io::Result<Option<Box<dyn DebugTransport>>> {
    use crate::config::Transport;
    match transport {
        Transport::Disabled => Ok(None),
        Transport::Stdio => Ok(Some(Box::new(StdioTransport::new()))),
        Transport::File(path) => Ok(Some(Box::new(FileTransport::open(path)?))),
        Transport::Port(port) => Ok(Some(Box::new(PortTransport::bind(*port)?))),
    }
}

/// How long the debug loop sleeps between empty polls of a non-blocking
/// transport (file/port), to avoid spinning the CPU.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
