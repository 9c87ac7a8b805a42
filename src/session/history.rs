//! Conversation history scoped to the current topic

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::Mode;
use crate::capture::Frame;

/// One completed question/answer exchange
#[derive(Debug, Clone)]
pub struct Turn {
    pub seq: u64,
    pub question: String,
    pub answer: String,
    /// Frame the question was asked about
    pub frame: Option<Arc<Frame>>,
    pub mode: Mode,
    pub answered_at: DateTime<Utc>,
}

/// A history entry as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
}

impl From<&Turn> for HistoryEntry {
    fn from(turn: &Turn) -> Self {
        Self {
            question: turn.question.clone(),
            answer: turn.answer.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Turn sequence numbers must strictly increase
    #[error("turn {seq} is not newer than the last turn {last}")]
    OutOfOrder { seq: u64, last: u64 },
}

/// Ordered turns for the active topic, optionally capped
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    /// 0 keeps every turn
    max_turns: usize,
    /// Highest sequence number ever appended; survives eviction and clears
    last_seq: Option<u64>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
            last_seq: None,
        }
    }

    /// Append a turn, dropping the oldest when over capacity
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::OutOfOrder` if the turn is not newer than the last one
    pub fn push(&mut self, turn: Turn) -> Result<(), HistoryError> {
        if let Some(last) = self.last_seq
            && turn.seq <= last
        {
            return Err(HistoryError::OutOfOrder {
                seq: turn.seq,
                last,
            });
        }

        self.last_seq = Some(turn.seq);
        self.turns.push_back(turn);

        if self.max_turns > 0 {
            while self.turns.len() > self.max_turns {
                self.turns.pop_front();
            }
        }

        Ok(())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    /// Snapshot of the history in wire form, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.turns.iter().map(HistoryEntry::from).collect()
    }
}
