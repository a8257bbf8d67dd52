//! Session supervisor
//!
//! Owns the single agent session. Start, restart, input and shutdown all go
//! through one lock, so reading the current session and replacing it never
//! interleave.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AgentSession, OutputTarget, PumpState, SessionError, SessionResult, SpawnConfig};
use crate::pty::ProcessExit;

/// What a restart did
#[derive(Debug)]
pub struct RestartOutcome {
    /// Session that was terminated, if one was active
    pub terminated: Option<Uuid>,
    /// The replacement session, or why it could not be started
    pub started: SessionResult<Uuid>,
}

/// Snapshot of the active session
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub pid: Option<u32>,
    pub uptime: Duration,
    pub pump_running: bool,
}

/// Supervises the agent process
///
/// At most one session exists at a time. A new session is only recorded
/// once both its PTY and its child were obtained.
pub struct Supervisor {
    config: SpawnConfig,
    output: OutputTarget,
    session: Mutex<Option<AgentSession>>,
}

impl Supervisor {
    /// Create a supervisor with no session
    pub fn new(config: SpawnConfig, output: OutputTarget) -> Self {
        Self {
            config,
            output,
            session: Mutex::new(None),
        }
    }

    /// Launch the agent, retiring any session that is still active.
    ///
    /// Returns the new session ID once the child is launched.
    pub async fn start_session(&self) -> SessionResult<Uuid> {
        let mut slot = self.session.lock().await;
        if let Some(previous) = retire(&mut slot) {
            debug!(session_id = %previous, "Replaced active session on start");
        }
        self.install(&mut slot)
    }

    /// Terminate the active session, if any, and start a fresh one.
    ///
    /// Does not wait for the old child to exit before launching the new one.
    pub async fn restart_session(&self) -> RestartOutcome {
        let mut slot = self.session.lock().await;
        let terminated = retire(&mut slot);
        if let Some(id) = terminated {
            info!(session_id = %id, "Terminated agent for restart");
        }

        RestartOutcome {
            terminated,
            started: self.install(&mut slot),
        }
    }

    /// Queue `text` and a newline for the agent's terminal.
    ///
    /// Fails with [`SessionError::NotRunning`] without writing anything when
    /// no session is active. A session whose agent already exited is cleared.
    /// The lock is only held to queue the line, never across the PTY write.
    pub async fn send_input(&self, text: &str) -> SessionResult<()> {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            return Err(SessionError::NotRunning);
        };

        if !session.has_exited() {
            session.send_line(text)?;
            debug!(session_id = %session.id(), bytes = text.len() + 1, "Queued input for agent");
            return Ok(());
        }

        if let Some(id) = retire(&mut slot) {
            info!(session_id = %id, "Agent exited on its own, session cleared");
        }
        Err(SessionError::NotRunning)
    }

    /// Whether an agent is currently running
    #[cfg(test)]
    pub async fn is_running(&self) -> bool {
        let mut slot = self.session.lock().await;
        slot.as_mut().is_some_and(|session| !session.has_exited())
    }

    /// ID of the recorded session
    #[cfg(test)]
    pub async fn session_id(&self) -> Option<Uuid> {
        self.session.lock().await.as_ref().map(|s| s.id())
    }

    /// Status of the recorded session
    pub async fn status(&self) -> Option<SessionStatus> {
        let slot = self.session.lock().await;
        slot.as_ref().map(|s| SessionStatus {
            session_id: s.id(),
            pid: s.pid(),
            uptime: s.uptime(),
            pump_running: s.pump_state().is_running(),
        })
    }

    /// Pump handle of the recorded session
    #[cfg(test)]
    pub async fn pump_state(&self) -> Option<PumpState> {
        self.session.lock().await.as_ref().map(|s| s.pump_state())
    }

    /// Terminate the agent without replacing it and wait for it to be reaped
    pub async fn shutdown(&self) -> Option<ProcessExit> {
        let session = self.session.lock().await.take()?;
        let id = session.id();
        info!(session_id = %id, "Shutting down agent");

        match session.retire().await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Reaper task failed");
                None
            }
        }
    }

    fn install(&self, slot: &mut Option<AgentSession>) -> SessionResult<Uuid> {
        let session = AgentSession::spawn(&self.config, self.output.clone())?;
        let id = session.id();
        *slot = Some(session);
        Ok(id)
    }
}

/// Take the recorded session out of `slot` and retire it in the background
fn retire(slot: &mut Option<AgentSession>) -> Option<Uuid> {
    let session = slot.take()?;
    let id = session.id();
    // Reaping finishes on the blocking pool
    drop(session.retire());
    Some(id)
}
