//! Backend request payload

use super::{HistoryEntry, Mode};
use crate::capture::EncodedImage;

/// A fully built question for the inference backend
///
/// Built fresh for each turn and never modified after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Turn sequence number this request answers
    pub seq: u64,
    pub mode: Mode,
    /// Mode template followed by the question
    pub prompt: String,
    pub question: String,
    /// Encoded frame, absent for text-only requests
    pub image: Option<EncodedImage>,
    /// Prior turns of the current topic, oldest first
    pub history: Vec<HistoryEntry>,
}

impl Request {
    /// Whether this request opens a new topic
    #[must_use]
    pub fn is_new_topic(&self) -> bool {
        self.history.is_empty()
    }

    /// History serialized as a JSON array of `{question, answer}` objects
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn history_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.history)?)
    }
}
