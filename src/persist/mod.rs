use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::config::PersistenceConfig;
use crate::error::{ReminderError, ReminderResult};
use crate::posts::Post;
use crate::storage::KeyValueStore;

mod records;

pub use records::{decode_posts, encode_posts, DecodedPosts};

const CORRUPT_SUFFIX: &str = "corrupt";

#[derive(Debug, Default)]
pub struct LoadedPosts {
    pub posts: Vec<Post>,
    /// Problems recovered from while loading; shown to the user, never fatal.
    pub warnings: Vec<ReminderError>,
    /// Posts already behind the load time. They stay listed but are never armed.
    pub stale: usize,
}

#[derive(Debug, Clone)]
pub enum WriteStatus {
    Idle {
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        since: OffsetDateTime,
    },
    Error {
        message: String,
        occurred_at: OffsetDateTime,
    },
}

#[derive(Debug, Clone)]
pub enum WriteEvent {
    Saved {
        count: usize,
        timestamp: OffsetDateTime,
    },
    Error {
        message: String,
    },
}

#[derive(Debug)]
struct PendingWrite {
    snapshot: Vec<Post>,
    due: Instant,
    since: OffsetDateTime,
}

#[derive(Debug, Clone)]
struct WriteFailure {
    message: String,
    occurred_at: OffsetDateTime,
}

/// Persists the post collection under one key with a debounced
/// write-behind. A pending write is flushed when the store is dropped.
///
/// The store remembers the payload it last read or wrote, so a write made by
/// another process sharing the same backend can be detected.
pub struct PostStore {
    backend: Box<dyn KeyValueStore>,
    key: String,
    debounce: Duration,
    pending: Option<PendingWrite>,
    synced: Option<String>,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<WriteFailure>,
}

impl PostStore {
    pub fn new(backend: Box<dyn KeyValueStore>, config: &PersistenceConfig) -> Self {
        Self::with_debounce(backend, &config.storage_key, config.debounce_duration())
    }

    pub fn with_debounce(backend: Box<dyn KeyValueStore>, key: &str, debounce: Duration) -> Self {
        Self {
            backend,
            key: key.to_owned(),
            debounce,
            pending: None,
            synced: None,
            last_saved_at: None,
            last_error: None,
        }
    }

    /// Reads the stored collection. Damaged data degrades to fewer (or no)
    /// posts plus warnings; only a backend failure is an error.
    pub fn load(&mut self, now: OffsetDateTime) -> ReminderResult<LoadedPosts> {
        let raw = self.backend.get(&self.key)?;
        let loaded = match &raw {
            None => LoadedPosts::default(),
            Some(payload) => self.decode_payload(payload, now).unwrap_or_else(|err| {
                tracing::warn!(%err, key = %self.key, "discarding unreadable posts");
                self.keep_corrupt_copy(payload);
                LoadedPosts {
                    warnings: vec![err],
                    ..LoadedPosts::default()
                }
            }),
        };
        self.synced = raw;
        Ok(loaded)
    }

    /// Re-reads the slot and returns its posts if someone else wrote it since
    /// this store last read or wrote it. An unreadable foreign payload is
    /// kept aside and ignored; the next local write replaces it.
    pub fn reload_if_changed(&mut self, now: OffsetDateTime) -> ReminderResult<Option<LoadedPosts>> {
        let raw = self.backend.get(&self.key)?;
        if raw == self.synced {
            return Ok(None);
        }
        tracing::info!(key = %self.key, "posts changed by another writer");
        let loaded = match &raw {
            None => Some(LoadedPosts::default()),
            Some(payload) => match self.decode_payload(payload, now) {
                Ok(loaded) => Some(loaded),
                Err(err) => {
                    tracing::warn!(%err, key = %self.key, "ignoring unreadable posts from another writer");
                    self.keep_corrupt_copy(payload);
                    None
                }
            },
        };
        self.synced = raw;
        Ok(loaded)
    }

    /// Damaged records are skipped with a warning; only a payload that is
    /// not an array at all is an error.
    fn decode_payload(&self, raw: &str, now: OffsetDateTime) -> ReminderResult<LoadedPosts> {
        let decoded = decode_posts(raw, now)?;
        let mut warnings = Vec::new();
        for reason in decoded.skipped {
            tracing::warn!(%reason, "skipping stored post");
            warnings.push(ReminderError::StorageCorruption(reason));
        }

        let stale = decoded
            .posts
            .iter()
            .filter(|post| !post.is_upcoming(now))
            .count();
        tracing::info!(
            count = decoded.posts.len(),
            stale,
            warnings = warnings.len(),
            "posts loaded"
        );
        Ok(LoadedPosts {
            posts: decoded.posts,
            warnings,
            stale,
        })
    }

    fn keep_corrupt_copy(&self, raw: &str) {
        let key = format!("{}.{CORRUPT_SUFFIX}", self.key);
        if let Err(err) = self.backend.put(&key, raw) {
            tracing::warn!(?err, %key, "failed to keep a copy of the unreadable payload");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.due)
    }

    pub fn status(&self) -> WriteStatus {
        if let Some(failure) = &self.last_error {
            return WriteStatus::Error {
                message: failure.message.clone(),
                occurred_at: failure.occurred_at,
            };
        }
        if let Some(pending) = &self.pending {
            return WriteStatus::Pending {
                since: pending.since,
            };
        }
        WriteStatus::Idle {
            last_saved_at: self.last_saved_at,
        }
    }

    pub fn schedule_save(&mut self, posts: Vec<Post>) {
        self.schedule_save_at(posts, Instant::now());
    }

    /// Replaces any pending snapshot and pushes the deadline out to
    /// `at + debounce`.
    pub fn schedule_save_at(&mut self, posts: Vec<Post>, at: Instant) {
        let since = self
            .pending
            .as_ref()
            .map(|pending| pending.since)
            .unwrap_or_else(OffsetDateTime::now_utc);
        self.pending = Some(PendingWrite {
            snapshot: posts,
            due: at + self.debounce,
            since,
        });
    }

    pub fn poll_at(&mut self, at: Instant) -> Option<WriteEvent> {
        let due = self.pending.as_ref()?.due;
        if at < due {
            return None;
        }
        self.write_pending(at)
    }

    /// Writes any pending snapshot right away.
    pub fn flush(&mut self) -> Option<WriteEvent> {
        self.write_pending(Instant::now())
    }

    /// Removes the persisted collection, then drops any pending write. On
    /// failure nothing changes and the pending write is kept.
    pub fn clear(&mut self) -> ReminderResult<()> {
        self.backend.remove(&self.key)?;
        self.pending = None;
        self.synced = None;
        self.last_saved_at = Some(OffsetDateTime::now_utc());
        self.last_error = None;
        Ok(())
    }

    fn write_pending(&mut self, at: Instant) -> Option<WriteEvent> {
        let pending = self.pending.take()?;
        let timestamp = OffsetDateTime::now_utc();
        let result = encode_posts(&pending.snapshot).and_then(|payload| {
            self.backend.put(&self.key, &payload)?;
            Ok(payload)
        });
        match result {
            Ok(payload) => {
                self.synced = Some(payload);
                self.last_saved_at = Some(timestamp);
                self.last_error = None;
                tracing::debug!(count = pending.snapshot.len(), "posts saved");
                Some(WriteEvent::Saved {
                    count: pending.snapshot.len(),
                    timestamp,
                })
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(%message, "saving posts failed, will retry");
                self.last_error = Some(WriteFailure {
                    message: message.clone(),
                    occurred_at: timestamp,
                });
                self.pending = Some(PendingWrite {
                    due: at + self.debounce,
                    ..pending
                });
                Some(WriteEvent::Error { message })
            }
        }
    }
}

impl Drop for PostStore {
    fn drop(&mut self) {
        if let Some(WriteEvent::Error { message }) = self.flush() {
            tracing::error!(%message, "lost pending post write on shutdown");
        }
    }
}
