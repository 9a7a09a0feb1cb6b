use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::ColorTag;
use crate::error::{ReminderError, ReminderResult};

mod repository;

pub use repository::{PostRepository, Reconciled, UpdateOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn generate() -> Self {
        PostId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PostId {
    fn from(value: String) -> Self {
        PostId(value)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        PostId(value.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub scheduled_at: OffsetDateTime,
    pub notified: bool,
    pub color: ColorTag,
    pub created_at: OffsetDateTime,
}

impl Post {
    pub fn is_upcoming(&self, now: OffsetDateTime) -> bool {
        self.scheduled_at > now
    }
}

/// Which list a presentation layer is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Tab {
    #[default]
    Upcoming,
    Past,
}

/// Checks a form submission and returns the trimmed text.
pub fn validate_submission(
    text: &str,
    scheduled_at: OffsetDateTime,
    now: OffsetDateTime,
) -> ReminderResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ReminderError::validation("text cannot be empty"));
    }
    if scheduled_at <= now {
        return Err(ReminderError::validation(
            "reminder time must be in the future",
        ));
    }
    Ok(text.to_owned())
}
