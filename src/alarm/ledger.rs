use std::collections::HashSet;

use crate::posts::PostId;

/// Post ids announced during one scheduler's lifetime.
///
/// Not persisted: a fresh scheduler starts empty, the same way every stored
/// `notified` flag is cleared on load.
#[derive(Debug, Default, Clone)]
pub struct NotificationLedger {
    announced: HashSet<PostId>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.announced.contains(id)
    }

    /// Returns false when the id was already recorded.
    pub fn record(&mut self, id: PostId) -> bool {
        self.announced.insert(id)
    }

    pub fn forget(&mut self, id: &PostId) -> bool {
        self.announced.remove(id)
    }

    pub fn clear(&mut self) {
        self.announced.clear();
    }

    pub fn len(&self) -> usize {
        self.announced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.announced.is_empty()
    }
}
