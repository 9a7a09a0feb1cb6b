use time::OffsetDateTime;

use crate::config::ColorTag;
use crate::posts::{Post, PostId, Tab};

/// Row handed to a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSummary {
    pub id: PostId,
    pub text: String,
    pub scheduled_at: OffsetDateTime,
    pub color: ColorTag,
    pub notified: bool,
    pub when: String,
}

impl PostSummary {
    pub fn from_post(post: &Post, now: OffsetDateTime) -> Self {
        Self {
            id: post.id.clone(),
            text: post.text.clone(),
            scheduled_at: post.scheduled_at,
            color: post.color,
            notified: post.notified,
            when: relative_label(post.scheduled_at, now),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostListView {
    pub tab: Tab,
    pub generated_at: OffsetDateTime,
    pub posts: Vec<PostSummary>,
}

impl PostListView {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

/// "in 5m", "2h ago", "now". Rounds toward zero at the largest unit.
pub fn relative_label(at: OffsetDateTime, now: OffsetDateTime) -> String {
    let delta = at - now;
    let secs = delta.whole_seconds();
    let magnitude = secs.unsigned_abs();
    let amount = match magnitude {
        0 => return "now".to_string(),
        1..=59 => format!("{magnitude}s"),
        60..=3_599 => format!("{}m", magnitude / 60),
        3_600..=86_399 => format!("{}h", magnitude / 3_600),
        _ => format!("{}d", magnitude / 86_400),
    };
    if secs > 0 {
        format!("in {amount}")
    } else {
        format!("{amount} ago")
    }
}
