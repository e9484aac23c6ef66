//! Diagnostics Log
//!
//! Append-only log file behind the tracing fmt layer. The file is reset
//! once it would grow past `max_bytes`. Every I/O error is swallowed:
//! a broken log must never reach the packet path.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing_subscriber::fmt::MakeWriter;

struct Sink {
    path: PathBuf,
    file: Option<File>,
    written: u64,
    max_bytes: u64,
}

impl Sink {
    fn open(path: &Path, max_bytes: u64) -> Self {
        let mut sink = Self {
            path: path.to_path_buf(),
            file: None,
            written: 0,
            max_bytes,
        };
        sink.reopen();
        if sink.written > max_bytes {
            sink.reset();
        }
        sink
    }

    fn reopen(&mut self) {
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .ok();
        self.written = self
            .file
            .as_ref()
            .and_then(|f| f.metadata().ok())
            .map_or(0, |m| m.len());
    }

    fn reset(&mut self) {
        if self.file.is_none() {
            self.reopen();
        }
        if let Some(file) = &self.file {
            if file.set_len(0).is_ok() {
                self.written = 0;
            }
        }
    }

    fn append(&mut self, buf: &[u8]) {
        if self.written + buf.len() as u64 > self.max_bytes {
            self.reset();
        }
        if self.file.is_none() {
            self.reopen();
        }
        if let Some(file) = &mut self.file {
            match file.write_all(buf) {
                Ok(()) => self.written += buf.len() as u64,
                Err(_) => self.file = None,
            }
        }
    }
}

/// Size-bounded diagnostics file
pub struct DiagnosticsLog {
    sink: Mutex<Sink>,
}

impl DiagnosticsLog {
    /// Open (or create) the log at `path`, resetting it if already too big.
    ///
    /// Never fails; an unusable path just makes every write a no-op.
    pub fn open(path: &Path, max_bytes: u64) -> Self {
        Self {
            sink: Mutex::new(Sink::open(path, max_bytes)),
        }
    }

    /// Append one message
    pub fn append(&self, buf: &[u8]) {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(buf);
    }

    /// Bytes in the current file
    pub fn bytes_written(&self) -> u64 {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .written
    }
}

/// Writer handed out per tracing event
pub struct DiagnosticsWriter<'a> {
    log: &'a DiagnosticsLog,
}

impl Write for DiagnosticsWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DiagnosticsLog {
    type Writer = DiagnosticsWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        DiagnosticsWriter { log: self }
    }
}
