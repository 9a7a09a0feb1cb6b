use time::OffsetDateTime;

use crate::posts::{Post, PostId};

mod ledger;
mod scheduler;

pub use ledger::NotificationLedger;
pub use scheduler::{AlarmScheduler, TickReport};

/// Where a post sits relative to its reminder threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    /// Threshold still ahead.
    Armed,
    /// Inside the announcement window and not yet announced.
    Due,
    /// Already announced for its current time.
    Notified,
    /// The window went by without a tick landing in it.
    Expired,
}

impl AlarmState {
    pub fn classify(
        post: &Post,
        now: OffsetDateTime,
        ledger: &NotificationLedger,
        lead_minutes: i64,
    ) -> Self {
        if post.notified || ledger.contains(&post.id) {
            return AlarmState::Notified;
        }
        let minutes = minutes_until(post.scheduled_at, now);
        if minutes == lead_minutes {
            AlarmState::Due
        } else if minutes > lead_minutes {
            AlarmState::Armed
        } else {
            AlarmState::Expired
        }
    }
}

/// Whole minutes left until `at`, rounded down.
pub fn minutes_until(at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (at - now).whole_seconds().div_euclid(60)
}

/// What one tick would do, computed without touching any state.
#[derive(Debug, Default, Clone)]
pub struct TickPlan {
    pub due: Vec<Post>,
    pub expired: Vec<PostId>,
}

pub fn plan_tick<'a, I>(
    now: OffsetDateTime,
    posts: I,
    ledger: &NotificationLedger,
    lead_minutes: i64,
) -> TickPlan
where
    I: IntoIterator<Item = &'a Post>,
{
    let mut plan = TickPlan::default();
    for post in posts {
        match AlarmState::classify(post, now, ledger, lead_minutes) {
            AlarmState::Due => plan.due.push(post.clone()),
            AlarmState::Expired => plan.expired.push(post.id.clone()),
            AlarmState::Armed | AlarmState::Notified => {}
        }
    }
    plan
}
