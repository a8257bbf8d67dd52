//! Input writer
//!
//! Blocking write loop onto the PTY master. A write only returns once the
//! terminal accepts the bytes, which can be never for an agent that stopped
//! reading stdin, so the loop runs on its own thread per session.

use std::io::{self, ErrorKind, Write};
use tracing::debug;

/// Why an input writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputExit {
    /// No more lines will be queued
    Closed,
    /// Writing the master failed; on Linux this is EIO once the child is gone
    WriteFailed(ErrorKind),
}

/// Write `line` followed by a newline and flush
pub fn write_line<W: Write + ?Sized>(writer: &mut W, line: &str) -> io::Result<()> {
    let mut data = Vec::with_capacity(line.len() + 1);
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');
    writer.write_all(&data)?;
    writer.flush()
}

/// Write every line `next` yields until it returns `None` or a write fails.
///
/// Blocks the calling thread.
pub fn run_input<W, F>(mut writer: W, mut next: F) -> InputExit
where
    W: Write,
    F: FnMut() -> Option<String>,
{
    while let Some(line) = next() {
        if let Err(e) = write_line(&mut writer, &line) {
            debug!(error = %e, "PTY write failed, ending input writer");
            return InputExit::WriteFailed(e.kind());
        }
    }
    InputExit::Closed
}
