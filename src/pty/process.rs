//! PTY process management
//!
//! Spawns a child attached to the secondary side of a fresh PTY pair and
//! keeps the primary side for input and output:
//! - Working directory validation before anything is opened
//! - Reader/writer taken from the master before the child is launched
//! - Termination and reaping of the child
//!
//! Reading and writing the master both block, so the reader and the writer
//! are handed out to threads owned by the caller.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during PTY operations
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY: {0}")]
    OpenFailed(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Invalid working directory: {0}")]
    InvalidWorkingDir(String),

    #[error("Failed to wait for process: {0}")]
    WaitFailed(String),

    #[error("Failed to kill process: {0}")]
    KillFailed(String),

    #[error("PTY system error: {0}")]
    SystemError(String),
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Terminal size configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code reported by the OS
    pub exit_code: u32,
    /// Whether the process exited successfully
    pub success: bool,
}

/// A child process running on the secondary side of a PTY.
///
/// The master and the child are obtained together in [`PtyProcess::spawn`]
/// and are dropped together.
pub struct PtyProcess {
    // Held so the primary side stays open as long as the child
    _master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    reader: Option<Box<dyn Read + Send>>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
    size: TerminalSize,
}

impl PtyProcess {
    /// Spawn `command args...` in `working_dir` on a new PTY.
    ///
    /// The environment is inherited. The secondary side is closed in this
    /// process once the child holds it.
    pub fn spawn(
        command: &str,
        args: &[String],
        working_dir: &Path,
        size: TerminalSize,
    ) -> PtyResult<Self> {
        // portable-pty silently falls back to $HOME for a bad cwd
        if !working_dir.is_dir() {
            return Err(PtyError::InvalidWorkingDir(
                working_dir.display().to_string(),
            ));
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size.to_pty_size())
            .map_err(|e| PtyError::OpenFailed(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SystemError(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SystemError(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.cwd(working_dir);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        drop(pair.slave);

        let pid = child.process_id();

        Ok(Self {
            _master: pair.master,
            writer: Some(writer),
            reader: Some(reader),
            child,
            pid,
            size,
        })
    }

    /// OS process id of the child, if known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the master-side reader. Only the first call returns it.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Take the master-side writer (the child's stdin). Only the first call
    /// returns it.
    pub fn take_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.writer.take()
    }

    /// Non-blocking exit check
    pub fn try_wait(&mut self) -> PtyResult<Option<ProcessExit>> {
        self.child
            .try_wait()
            .map(|status| {
                status.map(|s| ProcessExit {
                    exit_code: s.exit_code(),
                    success: s.success(),
                })
            })
            .map_err(|e| PtyError::WaitFailed(e.to_string()))
    }

    /// Block until the child exits
    pub fn wait(&mut self) -> PtyResult<ProcessExit> {
        let status = self
            .child
            .wait()
            .map_err(|e| PtyError::WaitFailed(e.to_string()))?;
        Ok(ProcessExit {
            exit_code: status.exit_code(),
            success: status.success(),
        })
    }

    /// Ask the child to terminate.
    ///
    /// On unix this is SIGHUP followed by SIGKILL after a short grace period.
    /// A child that already exited is not an error.
    pub fn kill(&mut self) -> PtyResult<()> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }
        self.child
            .kill()
            .map_err(|e| PtyError::KillFailed(e.to_string()))
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
