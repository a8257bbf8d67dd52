//! Individual agent session
//!
//! One agent child on a PTY plus the two threads bound to its master: the
//! output pump and the input writer. Handles the full lifecycle: spawn,
//! input, retirement.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::OutboundMessage;
use crate::config::BridgeConfig;
use crate::pty::{
    run_input, run_pump, OutputLimits, ProcessExit, PtyError, PtyProcess, PumpExit, TerminalSize,
};

/// Lines queued for the input writer before the agent counts as busy
const INPUT_QUEUE_CAPACITY: usize = 8;

/// Errors that can occur during agent session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to spawn agent: {0}")]
    SpawnFailed(String),

    #[error("Agent not running")]
    NotRunning,

    #[error("Agent is not reading its input")]
    InputBusy,

    #[error("Agent input is closed")]
    InputClosed,

    #[error("PTY error: {0}")]
    PtyError(#[from] PtyError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Configuration for spawning the agent
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Program to run
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Working directory of the agent
    pub working_dir: PathBuf,
    /// Terminal columns
    pub cols: u16,
    /// Terminal rows
    pub rows: u16,
    /// Pump read size and output truncation
    pub limits: OutputLimits,
}

impl SpawnConfig {
    /// Create a new spawn config with default terminal size and limits
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            cols: 80,
            rows: 24,
            limits: OutputLimits::default(),
        }
    }

    /// Build the spawn config described by the bridge configuration
    pub fn from_bridge_config(config: &BridgeConfig) -> Self {
        Self::new(config.agent.program.clone(), config.agent_dir())
            .with_args(config.agent.args.clone())
            .with_size(config.agent.cols, config.agent.rows)
            .with_limits(OutputLimits {
                read_buffer_size: config.limits.read_buffer_size,
                max_output_chars: config.limits.max_output_chars,
            })
    }

    /// Set program arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set terminal dimensions
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Set pump limits
    pub fn with_limits(mut self, limits: OutputLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Where pumped output goes: the outbound queue, addressed to the operator
#[derive(Debug, Clone)]
pub struct OutputTarget {
    tx: mpsc::Sender<OutboundMessage>,
    chat_id: i64,
}

impl OutputTarget {
    pub fn new(tx: mpsc::Sender<OutboundMessage>, chat_id: i64) -> Self {
        Self { tx, chat_id }
    }

    /// Queue one chunk, blocking while the queue is full.
    ///
    /// Must not be called from an async context.
    fn blocking_send(&self, text: String) -> bool {
        self.tx
            .blocking_send(OutboundMessage::text(self.chat_id, text))
            .is_ok()
    }
}

/// Shared view of a pump thread's outcome
#[derive(Debug, Clone, Default)]
pub struct PumpState(Arc<Mutex<Option<PumpExit>>>);

impl PumpState {
    /// How the pump ended, `None` while it is still running
    pub fn exit(&self) -> Option<PumpExit> {
        self.0.lock().ok().and_then(|guard| *guard)
    }

    pub fn is_running(&self) -> bool {
        self.exit().is_none()
    }

    fn finish(&self, exit: PumpExit) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = Some(exit);
        }
    }
}

/// A running agent with exactly one output pump and one input writer
pub struct AgentSession {
    id: Uuid,
    started_at: Instant,
    process: PtyProcess,
    /// Lines waiting for the input writer
    input: mpsc::Sender<String>,
    /// Raised when the session is retired; the pump stops forwarding
    stop: Arc<AtomicBool>,
    pump: PumpState,
}

impl AgentSession {
    /// Launch the agent and start its output pump.
    ///
    /// Returns once the child is launched; it does not wait for the agent to
    /// be ready. On error nothing is left running.
    pub fn spawn(config: &SpawnConfig, output: OutputTarget) -> SessionResult<Self> {
        let size = TerminalSize::new(config.cols, config.rows);
        let mut process =
            PtyProcess::spawn(&config.program, &config.args, &config.working_dir, size)?;

        let (Some(reader), Some(writer)) = (process.take_reader(), process.take_writer()) else {
            abandon(&mut process);
            return Err(SessionError::SpawnFailed("PTY master unavailable".into()));
        };

        let id = Uuid::new_v4();
        let stop = Arc::new(AtomicBool::new(false));
        let pump = PumpState::default();
        let (input, mut input_rx) = mpsc::channel::<String>(INPUT_QUEUE_CAPACITY);

        let pump_thread = {
            let stop = Arc::clone(&stop);
            let pump = pump.clone();
            let limits = config.limits;
            std::thread::Builder::new()
                .name(format!("pump-{}", id.simple()))
                .spawn(move || {
                    let exit = run_pump(reader, limits, &stop, |text| output.blocking_send(text));
                    debug!(session_id = %id, ?exit, "Output pump finished");
                    pump.finish(exit);
                })
        };

        let input_thread = pump_thread.and_then(|_| {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(format!("input-{}", id.simple()))
                .spawn(move || {
                    let exit = run_input(writer, || {
                        if stop.load(Ordering::Acquire) {
                            return None;
                        }
                        input_rx.blocking_recv()
                    });
                    debug!(session_id = %id, ?exit, "Input writer finished");
                })
        });

        if let Err(e) = input_thread {
            stop.store(true, Ordering::Release);
            abandon(&mut process);
            return Err(SessionError::SpawnFailed(format!(
                "failed to start session threads: {e}"
            )));
        }

        info!(
            session_id = %id,
            pid = ?process.pid(),
            program = %config.program,
            dir = %config.working_dir.display(),
            "Agent session started"
        );

        Ok(Self {
            id,
            started_at: Instant::now(),
            process,
            input,
            stop,
            pump,
        })
    }

    /// Get the session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// OS process id of the agent
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Time since launch
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Outcome handle of this session's pump
    pub fn pump_state(&self) -> PumpState {
        self.pump.clone()
    }

    /// Whether the agent process has exited on its own
    pub fn has_exited(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(Some(_)))
    }

    /// Queue `text` to be written to the agent's terminal with a newline.
    ///
    /// Never blocks. Fails with [`SessionError::InputBusy`] while the agent
    /// leaves earlier lines unread.
    pub fn send_line(&self, text: &str) -> SessionResult<()> {
        self.input
            .try_send(text.to_string())
            .map_err(|e| match e {
                TrySendError::Full(_) => SessionError::InputBusy,
                TrySendError::Closed(_) => SessionError::InputClosed,
            })
    }

    /// Stop forwarding output and terminate the agent.
    ///
    /// Returns immediately; killing and reaping the child run on the blocking
    /// pool. The returned handle resolves with the exit once it is reaped.
    pub fn retire(self) -> JoinHandle<Option<ProcessExit>> {
        self.stop.store(true, Ordering::Release);
        let mut session = self;

        tokio::task::spawn_blocking(move || {
            let id = session.id;
            if let Err(e) = session.process.kill() {
                warn!(session_id = %id, error = %e, "Failed to terminate agent");
                return None;
            }
            match session.process.wait() {
                Ok(exit) => {
                    info!(session_id = %id, exit_code = exit.exit_code, "Agent process exited");
                    Some(exit)
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to reap agent");
                    None
                }
            }
        })
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.id)
            .field("process", &self.process)
            .field("pump", &self.pump.exit())
            .finish()
    }
}

/// Kill and reap a child whose session could not be completed
fn abandon(process: &mut PtyProcess) {
    if process.kill().is_ok() {
        let _ = process.wait();
    }
}
