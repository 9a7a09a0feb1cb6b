use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use time::OffsetDateTime;

use crate::alarm::{AlarmScheduler, TickReport};
use crate::clock::Clock;
use crate::config::{AppConfig, ColorTag};
use crate::error::{ReminderError, ReminderResult};
use crate::notify::NotificationSink;
use crate::persist::{PostStore, WriteEvent, WriteStatus};
use crate::posts::{Post, PostId, PostRepository, Tab};
use crate::storage::KeyValueStore;

mod actions;
pub mod state;

pub use actions::{Command, CommandOutcome};
pub use state::{PostListView, PostSummary};

const IDLE_WAIT: Duration = Duration::from_secs(3_600);

pub type CommandReply = Sender<ReminderResult<CommandOutcome>>;

pub enum AppEvent {
    Command {
        command: Command,
        reply: Option<CommandReply>,
    },
    Shutdown,
}

/// Owns posts, storage, the alarm scheduler and the sink, and drives them
/// all from one thread.
pub struct ReminderApp {
    pub config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
    posts: PostRepository,
    store: PostStore,
    alarms: AlarmScheduler,
    sink: Box<dyn NotificationSink>,
    load_warnings: Vec<ReminderError>,
    active_tab: Tab,
}

impl ReminderApp {
    pub fn open(
        config: Arc<AppConfig>,
        backend: Box<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        sink: Box<dyn NotificationSink>,
    ) -> ReminderResult<Self> {
        let mut store = PostStore::new(backend, &config.persistence);
        let loaded = store.load(clock.now())?;
        if loaded.stale > 0 {
            tracing::info!(stale = loaded.stale, "past posts will not be announced");
        }
        let alarms = AlarmScheduler::new(&config.reminders);
        Ok(Self {
            config,
            clock,
            posts: PostRepository::from_loaded(loaded.posts),
            store,
            alarms,
            sink,
            load_warnings: loaded.warnings,
            active_tab: Tab::default(),
        })
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn posts(&self) -> &PostRepository {
        &self.posts
    }

    pub fn take_load_warnings(&mut self) -> Vec<ReminderError> {
        std::mem::take(&mut self.load_warnings)
    }

    pub fn write_status(&self) -> WriteStatus {
        self.store.status()
    }

    pub fn active_tab(&self) -> Tab {
        self.active_tab
    }

    pub fn set_active_tab(&mut self, tab: Tab) {
        self.active_tab = tab;
    }

    pub fn create_post(&mut self, text: &str, at: OffsetDateTime) -> ReminderResult<Post> {
        self.create_post_with_color(text, at, None)
    }

    pub fn create_post_with_color(
        &mut self,
        text: &str,
        at: OffsetDateTime,
        color: Option<ColorTag>,
    ) -> ReminderResult<Post> {
        let now = self.now();
        let post = self.posts.create_with_color(text, at, color, now)?;
        self.persist();
        Ok(post)
    }

    pub fn update_post(
        &mut self,
        id: &PostId,
        text: &str,
        at: OffsetDateTime,
    ) -> ReminderResult<Post> {
        let now = self.now();
        let outcome = self.posts.update(id, text, at, now)?;
        if outcome.rescheduled {
            self.alarms.rearm(id);
        }
        self.persist();
        Ok(outcome.post)
    }

    pub fn delete_post(&mut self, id: &PostId) -> ReminderResult<Post> {
        let post = self.posts.delete(id)?;
        self.alarms.forget(id);
        self.persist();
        Ok(post)
    }

    /// Empties storage, then memory; nothing is left pending. If storage
    /// cannot be cleared, memory is left as it was.
    pub fn clear_all(&mut self) -> ReminderResult<usize> {
        self.store.clear()?;
        let removed = self.posts.clear();
        self.alarms.forget_all();
        tracing::info!(removed, "all posts cleared");
        Ok(removed)
    }

    /// Folds in posts another process wrote to the same store since this one
    /// last read or wrote it. Unsaved local edits win over the foreign copy.
    pub fn sync_external(&mut self) {
        let now = self.now();
        let loaded = match self.store.reload_if_changed(now) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(%err, "could not check stored posts for outside changes");
                return;
            }
        };
        let report = self.posts.reconcile(loaded.posts);
        for id in report.rescheduled.iter().chain(&report.removed) {
            self.alarms.forget(id);
        }
        tracing::info!(
            count = self.posts.len(),
            rescheduled = report.rescheduled.len(),
            removed = report.removed.len(),
            kept_local_edits = self.posts.has_unsaved_edits(),
            "picked up posts written elsewhere"
        );
        if self.store.has_pending() {
            self.persist();
        }
    }

    pub fn upcoming(&self) -> Vec<&Post> {
        self.posts.upcoming(self.now())
    }

    pub fn past(&self) -> Vec<&Post> {
        self.posts.past(self.now())
    }

    pub fn view(&self, tab: Tab) -> PostListView {
        let now = self.now();
        PostListView {
            tab,
            generated_at: now,
            posts: self
                .posts
                .for_tab(tab, now)
                .into_iter()
                .map(|post| PostSummary::from_post(post, now))
                .collect(),
        }
    }

    pub fn handle(&mut self, command: Command) -> ReminderResult<CommandOutcome> {
        let outcome = match command {
            Command::Create { text, at, color } => {
                CommandOutcome::Created(self.create_post_with_color(&text, at, color)?)
            }
            Command::Update { id, text, at } => {
                CommandOutcome::Updated(self.update_post(&id, &text, at)?)
            }
            Command::Delete { id } => CommandOutcome::Deleted(self.delete_post(&id)?),
            Command::ClearAll => CommandOutcome::Cleared(self.clear_all()?),
            Command::List { tab } => {
                self.active_tab = tab;
                CommandOutcome::Listed(self.view(tab))
            }
        };
        Ok(outcome)
    }

    pub fn start_alarms(&mut self) {
        self.alarms.start(Instant::now());
    }

    pub fn stop_alarms(&mut self) {
        self.alarms.stop();
    }

    pub fn alarms_running(&self) -> bool {
        self.alarms.is_running()
    }

    /// Evaluates reminders if the scheduler deadline has passed.
    pub fn tick_at(&mut self, at: Instant) -> Option<TickReport> {
        let now = self.now();
        let report = self
            .alarms
            .tick_if_due(at, now, &mut self.posts, self.sink.as_ref())?;
        if !report.announced.is_empty() {
            self.persist();
        }
        Some(report)
    }

    /// Syncs with the store, then runs one evaluation right now regardless
    /// of the timer.
    pub fn tick_now(&mut self) -> TickReport {
        self.sync_external();
        let now = self.now();
        let report = self.alarms.tick(now, &mut self.posts, self.sink.as_ref());
        if !report.announced.is_empty() {
            self.persist();
        }
        report
    }

    pub fn poll_store(&mut self, at: Instant) -> Option<WriteEvent> {
        let event = self.store.poll_at(at);
        self.note_write(&event);
        event
    }

    /// Blocks processing events until `Shutdown` arrives or every sender is
    /// gone, then stops the alarms and flushes storage.
    pub fn run(&mut self, events: &Receiver<AppEvent>) -> Result<()> {
        self.start_alarms();
        loop {
            let timeout = self
                .next_wakeup()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);
            let event = events.recv_timeout(timeout);
            self.sync_external();
            match event {
                Ok(AppEvent::Command { command, reply }) => {
                    let result = self.handle(command);
                    if let Err(err) = &result {
                        if err.is_user_facing() {
                            tracing::debug!(%err, "command rejected");
                        } else {
                            tracing::error!(%err, "command failed");
                        }
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Ok(AppEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let at = Instant::now();
            self.tick_at(at);
            if let Some(WriteEvent::Error { message }) = self.poll_store(at) {
                tracing::warn!(%message, "post write failed");
            }
        }
        self.shutdown();
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.stop_alarms();
        if self.store.has_pending() {
            self.sync_external();
        }
        let event = self.store.flush();
        self.note_write(&event);
        match event {
            Some(WriteEvent::Error { message }) => {
                tracing::error!(%message, "final post write failed")
            }
            Some(WriteEvent::Saved { count, .. }) => tracing::debug!(count, "final post write"),
            None => {}
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        match (self.alarms.next_due(), self.store.next_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn persist(&mut self) {
        self.store.schedule_save(self.posts.snapshot());
    }

    fn note_write(&mut self, event: &Option<WriteEvent>) {
        if let Some(WriteEvent::Saved { .. }) = event {
            self.posts.mark_saved();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ReminderConfig;
    use crate::notify::testing::RecordingSink;
    use crate::storage::MemoryStore;
    use assert_matches::assert_matches;
    use time::macros::datetime;

    fn t0() -> OffsetDateTime {
        datetime!(2024-05-01 12:00 UTC)
    }

    fn open_app(
        backend: &MemoryStore,
        clock: &ManualClock,
        sink: &Arc<RecordingSink>,
        config: AppConfig,
    ) -> ReminderResult<ReminderApp> {
        ReminderApp::open(
            Arc::new(config),
            Box::new(backend.clone()),
            Arc::new(clock.clone()),
            Box::new(sink.clone()),
        )
    }

    fn fixture() -> (MemoryStore, ManualClock, Arc<RecordingSink>) {
        (
            MemoryStore::new(),
            ManualClock::new(t0()),
            Arc::new(RecordingSink::default()),
        )
    }

    #[test]
    fn scenario_ship_release_fires_once() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut app = open_app(&backend, &clock, &sink, AppConfig::default())?;
        let post = app.create_post("Ship release", t0() + time::Duration::seconds(100))?;

        clock.advance(time::Duration::seconds(31));
        assert_eq!(app.tick_now().announced, vec![post.id.clone()]);
        clock.advance(time::Duration::seconds(30));
        assert!(app.tick_now().announced.is_empty());

        assert_eq!(sink.texts(), vec!["Ship release".to_string()]);
        assert!(app.posts().get(&post.id).expect("post").notified);
        Ok(())
    }

    #[test]
    fn stale_post_from_storage_is_listed_but_never_announced() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        backend.put(
            "posts",
            r#"[{"id":"old","text":"standup","time":"2024-05-01T11:55:00Z","notified":false}]"#,
        )?;
        let mut app = open_app(&backend, &clock, &sink, AppConfig::default())?;

        assert!(app.upcoming().is_empty());
        assert_eq!(app.past().len(), 1);
        for _ in 0..4 {
            app.tick_now();
            clock.advance(time::Duration::seconds(30));
        }
        assert_eq!(sink.count(), 0);
        assert_eq!(app.view(Tab::Past).posts[0].when, "7m ago");
        Ok(())
    }

    #[test]
    fn rescheduling_a_notified_post_rearms_it() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut app = open_app(&backend, &clock, &sink, AppConfig::default())?;
        let post = app.create_post("Call", t0() + time::Duration::seconds(100))?;
        app.tick_now();
        assert_eq!(sink.count(), 1);

        let edited = app.update_post(&post.id, "Call", t0() + time::Duration::seconds(90))?;
        assert!(!edited.notified);
        assert_eq!(sink.count(), 1);

        app.tick_now();
        assert_eq!(sink.count(), 2);
        Ok(())
    }

    #[test]
    fn clear_all_empties_memory_and_storage() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut app = open_app(&backend, &clock, &sink, AppConfig::default())?;
        app.create_post("a", t0() + time::Duration::minutes(5))?;
        app.create_post("b", t0() + time::Duration::minutes(6))?;
        app.shutdown();
        assert!(backend.get("posts")?.is_some());

        assert_eq!(app.clear_all()?, 2);
        assert!(app.posts().is_empty());
        assert_eq!(backend.get("posts")?, None);
        drop(app);
        assert_eq!(backend.get("posts")?, None);
        Ok(())
    }

    struct LockedOnRemove(MemoryStore);

    impl KeyValueStore for LockedOnRemove {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.0.get(key)
        }

        fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.0.put(key, value)
        }

        fn remove(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("database is locked")
        }
    }

    #[test]
    fn failed_clear_keeps_posts_in_memory_and_storage() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut app = ReminderApp::open(
            Arc::new(AppConfig::default()),
            Box::new(LockedOnRemove(backend.clone())),
            Arc::new(clock.clone()),
            Box::new(sink.clone()),
        )?;
        let post = app.create_post("a", t0() + time::Duration::minutes(5))?;
        app.shutdown();

        assert_matches!(app.clear_all(), Err(ReminderError::Storage(_)));
        assert_eq!(app.posts().len(), 1);
        assert!(app.posts().get(&post.id).is_some());
        let stored = backend.get("posts")?.expect("still stored");
        assert!(stored.contains(post.id.as_str()));
        Ok(())
    }

    #[test]
    fn post_added_by_another_process_is_announced() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut watcher = open_app(&backend, &clock, &sink, AppConfig::default())?;
        let other_sink = Arc::new(RecordingSink::default());
        let mut one_shot = open_app(&backend, &clock, &other_sink, AppConfig::default())?;

        let post = one_shot.create_post("Ship release", t0() + time::Duration::seconds(100))?;
        one_shot.shutdown();
        drop(one_shot);

        clock.advance(time::Duration::seconds(31));
        assert_eq!(watcher.tick_now().announced, vec![post.id.clone()]);
        assert_eq!(sink.texts(), vec!["Ship release".to_string()]);
        assert_eq!(other_sink.count(), 0);
        Ok(())
    }

    #[test]
    fn unsaved_edits_survive_a_foreign_write() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut watcher = open_app(&backend, &clock, &sink, AppConfig::default())?;
        let mut one_shot = open_app(&backend, &clock, &sink, AppConfig::default())?;

        let local = watcher.create_post("local", t0() + time::Duration::minutes(10))?;
        let remote = one_shot.create_post("remote", t0() + time::Duration::minutes(20))?;
        one_shot.shutdown();
        drop(one_shot);

        watcher.shutdown();
        assert!(watcher.posts().get(&local.id).is_some());
        assert!(watcher.posts().get(&remote.id).is_some());
        let stored = backend.get("posts")?.expect("flushed on shutdown");
        assert!(stored.contains("\"local\""));
        assert!(stored.contains("\"remote\""));
        Ok(())
    }

    #[test]
    fn post_deleted_by_another_process_is_not_announced() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut watcher = open_app(&backend, &clock, &sink, AppConfig::default())?;
        let post = watcher.create_post("Call", t0() + time::Duration::seconds(100))?;
        watcher.shutdown();

        let mut one_shot = open_app(&backend, &clock, &sink, AppConfig::default())?;
        one_shot.delete_post(&post.id)?;
        one_shot.shutdown();
        drop(one_shot);

        clock.advance(time::Duration::seconds(31));
        assert!(watcher.tick_now().announced.is_empty());
        assert!(watcher.posts().is_empty());
        assert_eq!(sink.count(), 0);
        Ok(())
    }

    #[test]
    fn rejected_commands_leave_state_untouched() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut app = open_app(&backend, &clock, &sink, AppConfig::default())?;

        let result = app.handle(Command::Create {
            text: "  ".into(),
            at: t0() + time::Duration::minutes(1),
            color: None,
        });
        assert_matches!(result, Err(ReminderError::Validation(_)));
        assert_matches!(
            app.handle(Command::Delete {
                id: PostId::from("missing")
            }),
            Err(ReminderError::NotFound(_))
        );
        assert!(app.posts().is_empty());
        assert_matches!(app.write_status(), WriteStatus::Idle { last_saved_at: None });
        Ok(())
    }

    #[test]
    fn edit_between_ticks_is_seen_by_next_tick() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let mut app = open_app(&backend, &clock, &sink, AppConfig::default())?;
        let base = Instant::now();
        app.alarms.start(base);
        let post = app.create_post("Lunch", t0() + time::Duration::minutes(10))?;
        assert!(app.tick_at(base).is_some());

        app.handle(Command::Update {
            id: post.id.clone(),
            text: "Lunch".into(),
            at: t0() + time::Duration::seconds(75),
        })?;
        let report = app
            .tick_at(base + Duration::from_secs(31))
            .expect("tick due");
        assert_eq!(report.announced, vec![post.id]);
        Ok(())
    }

    #[test]
    fn run_loop_applies_commands_and_flushes_on_shutdown() -> anyhow::Result<()> {
        let (backend, clock, sink) = fixture();
        let config = AppConfig {
            reminders: ReminderConfig {
                tick_secs: 1,
                lead_minutes: 1,
            },
            ..AppConfig::default()
        };
        let mut app = open_app(&backend, &clock, &sink, config)?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = thread::spawn(move || {
            let result = app.run(&rx);
            (app, result)
        });

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        tx.send(AppEvent::Command {
            command: Command::Create {
                text: "Ship release".into(),
                at: t0() + time::Duration::seconds(100),
                color: Some(ColorTag::Mint),
            },
            reply: Some(reply_tx),
        })
        .expect("runtime listening");
        let created = reply_rx.recv_timeout(Duration::from_secs(5))??;
        assert_matches!(created, CommandOutcome::Created(ref post) if post.color == ColorTag::Mint);

        let deadline = Instant::now() + Duration::from_secs(10);
        while sink.count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        tx.send(AppEvent::Shutdown).expect("runtime listening");
        let (app, result) = worker.join().expect("runtime thread panicked");
        result?;

        assert_eq!(sink.count(), 1);
        assert!(!app.alarms_running());
        let stored = backend.get("posts")?.expect("flushed on shutdown");
        assert!(stored.contains("Ship release"));
        assert!(stored.contains("\"notified\":true"));
        Ok(())
    }
}
