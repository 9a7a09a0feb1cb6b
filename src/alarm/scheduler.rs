use std::collections::HashSet;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use super::{plan_tick, NotificationLedger};
use crate::config::ReminderConfig;
use crate::notify::{Announcement, NotificationSink};
use crate::posts::{PostId, PostRepository};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub announced: Vec<PostId>,
    /// Posts seen missing their window for the first time.
    pub expired: Vec<PostId>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.announced.is_empty() && self.expired.is_empty()
    }
}

/// Periodic reminder evaluation with a single timer slot.
///
/// The ledger lives as long as the scheduler does, so stopping and starting
/// again never re-announces a post.
#[derive(Debug)]
pub struct AlarmScheduler {
    ledger: NotificationLedger,
    expired: HashSet<PostId>,
    lead_minutes: i64,
    period: Duration,
    next_tick: Option<Instant>,
}

impl AlarmScheduler {
    pub fn new(config: &ReminderConfig) -> Self {
        Self::with_period(config.tick_interval(), config.lead_minutes)
    }

    pub fn with_period(period: Duration, lead_minutes: i64) -> Self {
        Self {
            ledger: NotificationLedger::new(),
            expired: HashSet::new(),
            lead_minutes,
            period,
            next_tick: None,
        }
    }

    pub fn ledger(&self) -> &NotificationLedger {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Arms the timer with the first evaluation at `at`. Starting a running
    /// scheduler moves the existing deadline; there is never a second one.
    pub fn start(&mut self, at: Instant) {
        if self.next_tick.replace(at).is_some() {
            tracing::debug!("alarm scheduler restarted");
        } else {
            tracing::debug!(period = ?self.period, "alarm scheduler started");
        }
    }

    pub fn stop(&mut self) {
        if self.next_tick.take().is_some() {
            tracing::debug!("alarm scheduler stopped");
        }
    }

    /// Lets a rescheduled post be announced again.
    pub fn rearm(&mut self, id: &PostId) {
        self.ledger.forget(id);
        self.expired.remove(id);
    }

    pub fn forget(&mut self, id: &PostId) {
        self.rearm(id);
    }

    pub fn forget_all(&mut self) {
        self.ledger.clear();
        self.expired.clear();
    }

    /// Runs a tick if the timer is armed and its deadline has passed. The
    /// next deadline is taken after the tick's work is done, so ticks never
    /// overlap.
    pub fn tick_if_due<S>(
        &mut self,
        at: Instant,
        now: OffsetDateTime,
        posts: &mut PostRepository,
        sink: &S,
    ) -> Option<TickReport>
    where
        S: NotificationSink + ?Sized,
    {
        let deadline = self.next_tick?;
        if at < deadline {
            return None;
        }
        let report = self.tick(now, posts, sink);
        self.next_tick = Some(Instant::now().max(at) + self.period);
        Some(report)
    }

    /// One evaluation pass over every post.
    pub fn tick<S>(
        &mut self,
        now: OffsetDateTime,
        posts: &mut PostRepository,
        sink: &S,
    ) -> TickReport
    where
        S: NotificationSink + ?Sized,
    {
        let plan = plan_tick(now, posts.iter(), &self.ledger, self.lead_minutes);
        let mut report = TickReport::default();

        for post in plan.due {
            // Recorded before the sink runs so a re-entrant tick sees it.
            if !self.ledger.record(post.id.clone()) {
                continue;
            }
            sink.announce(&Announcement::from(&post));
            posts.mark_notified(&post.id);
            report.announced.push(post.id);
        }

        for id in plan.expired {
            if self.expired.insert(id.clone()) {
                tracing::info!(%id, "reminder window missed, not announcing");
                report.expired.push(id);
            }
        }

        if !report.announced.is_empty() {
            tracing::debug!(count = report.announced.len(), "reminders announced");
        }
        report
    }
}
