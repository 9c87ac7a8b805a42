//! Lookout - voice and vision assistant client
//!
//! Press a key, speak a question, and hear an answer about what the camera
//! sees. Follow-up questions reuse the same picture and conversation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   watch    ┌──────────────┐   mpsc    ┌──────────────┐
//! │   capture    │──────────▶│ orchestrator │◀─────────│   preview    │
//! │ (OS thread)  │  frames    │ (tokio task) │ commands  │ (OS thread)  │
//! └──────────────┘            └──────┬───────┘           └──────────────┘
//!                                    │
//!            ┌───────────────────────┼───────────────────────┐
//!            ▼                       ▼                       ▼
//!     voice input (STT)        backend client        speech output (TTS)
//! ```

pub mod backend;
pub mod capture;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod preview;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{Command, Orchestrator, OrchestratorHandle};
pub use session::{Mode, SessionState};
