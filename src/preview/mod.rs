//! Terminal preview: live camera frame, status, and keyboard commands
//!
//! Runs on its own OS thread. Each tick it redraws from the latest frame and
//! [`Status`] snapshot, then polls crossterm for a key press and forwards the
//! matching [`Command`]. It never waits on the orchestrator.

mod render;
mod terminal;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::{mpsc, watch};

pub use render::{draw, frame_lines};
pub use terminal::{TerminalGuard, restore};

use crate::capture::FrameSlot;
use crate::orchestrator::{Command, InteractionState, Status};
use crate::{Error, Result};

/// Redraw and key poll interval
const TICK: Duration = Duration::from_millis(33);

/// Map a key press to a command
#[must_use]
pub fn key_command(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
        KeyCode::Esc => Some(Command::Quit),
        KeyCode::Char(c) => Command::from_char(c),
        _ => None,
    }
}

/// Handle to the preview thread
pub struct Preview {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl Preview {
    /// Take over the terminal and start drawing
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn(
        frames: FrameSlot,
        status: watch::Receiver<Status>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("preview".to_string())
            .spawn(move || run(&frames, &status, &commands, &flag))
            .map_err(|e| Error::Preview(format!("failed to spawn preview thread: {e}")))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop drawing and give the terminal back
    ///
    /// # Errors
    ///
    /// Returns the error that ended the preview thread, if any
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::Preview("preview thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Preview {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "preview ended with error");
        }
    }
}

fn run(
    frames: &FrameSlot,
    status: &watch::Receiver<Status>,
    commands: &mpsc::UnboundedSender<Command>,
    stop: &AtomicBool,
) -> Result<()> {
    let _guard = TerminalGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;
    tracing::debug!("preview started");

    while !stop.load(Ordering::SeqCst) {
        let snapshot = status.borrow().clone();
        if snapshot.state == InteractionState::Stopped {
            break;
        }

        let frame = frames.current();
        terminal.draw(|f| draw(f, frame.as_deref(), &snapshot))?;

        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                if let Some(command) = key_command(&key) {
                    tracing::debug!(?command, "key command");
                    if commands.send(command).is_err() {
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("preview stopped");
    Ok(())
}
