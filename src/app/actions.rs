use time::OffsetDateTime;

use crate::config::ColorTag;
use crate::posts::{Post, PostId, Tab};

use super::state::PostListView;

/// A user request routed through the runtime thread.
#[derive(Debug, Clone)]
pub enum Command {
    Create {
        text: String,
        at: OffsetDateTime,
        color: Option<ColorTag>,
    },
    Update {
        id: PostId,
        text: String,
        at: OffsetDateTime,
    },
    Delete {
        id: PostId,
    },
    ClearAll,
    List {
        tab: Tab,
    },
}

#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Created(Post),
    Updated(Post),
    Deleted(Post),
    Cleared(usize),
    Listed(PostListView),
}
