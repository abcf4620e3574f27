use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use log::warn;

/// A `Sink` is where request `Record`s end up, one line at a time.
///
/// Sinks are shared by every connection, so `emit_all` must write its lines as one uninterrupted
/// group. The default implementation only does so if nobody else is emitting at the same time;
/// implementations which can be called from several threads override it.
pub trait Sink: Send + Sync {
    /// Writes a single line.
    fn emit(&self, line: &str);

    /// Writes `lines` contiguously and in order.
    fn emit_all(&self, lines: &[String]) {
        for line in lines {
            self.emit(line)
        }
    }
}

/// Writes lines to the process's standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stdout;

impl Stdout {
    fn write_lines(lines: &[&str]) -> io::Result<()> {
        // holding the lock keeps other threads' lines out of this group
        let mut stdout = io::stdout().lock();
        for line in lines {
            writeln!(stdout, "{}", line)?;
        }
        stdout.flush()
    }
}

impl Sink for Stdout {
    fn emit(&self, line: &str) {
        if let Err(err) = Self::write_lines(&[line]) {
            warn!("[Stdout] could not write to standard output: {}", err)
        }
    }

    fn emit_all(&self, lines: &[String]) {
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        if let Err(err) = Self::write_lines(&lines) {
            warn!("[Stdout] could not write to standard output: {}", err)
        }
    }
}

/// Keeps every emitted line in memory.
///
/// Clones share the same buffer, so one clone can be handed to a `Listener` while another is
/// used to inspect what was logged.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    /// A snapshot of everything emitted so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sink for Memory {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string())
    }

    fn emit_all(&self, lines: &[String]) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(lines)
    }
}
