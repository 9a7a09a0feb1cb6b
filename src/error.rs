use thiserror::Error;

use crate::posts::PostId;

/// Domain errors surfaced by the repository, store and notifier.
///
/// None of these are fatal: callers either show them to the user, log them,
/// or recover to a known state.
#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("invalid post: {0}")]
    Validation(String),
    #[error("no post with id {0}")]
    NotFound(PostId),
    #[error("stored posts are unreadable: {0}")]
    StorageCorruption(String),
    #[error("audio playback failed: {0}")]
    Playback(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ReminderError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ReminderError::Validation(msg.into())
    }

    pub fn playback<S: Into<String>>(msg: S) -> Self {
        ReminderError::Playback(msg.into())
    }

    /// True for errors that came from user input rather than the environment.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ReminderError::Validation(_) | ReminderError::NotFound(_)
        )
    }
}

pub type ReminderResult<T> = Result<T, ReminderError>;
