use std::collections::HashSet;
use std::mem;

use indexmap::IndexMap;
use time::OffsetDateTime;

use super::{validate_submission, Post, PostId, Tab};
use crate::config::ColorTag;
use crate::error::{ReminderError, ReminderResult};

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub post: Post,
    /// The scheduled time moved, so any earlier announcement no longer applies.
    pub rescheduled: bool,
}

/// What folding another writer's collection into this one changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Posts whose scheduled time no longer matches the local copy.
    pub rescheduled: Vec<PostId>,
    /// Local posts the other writer removed.
    pub removed: Vec<PostId>,
}

/// Ids created, edited or deleted here since the last successful save.
#[derive(Debug, Default)]
struct UnsavedEdits {
    touched: HashSet<PostId>,
    deleted: HashSet<PostId>,
}

/// Ordered in-memory collection of posts, newest submission first.
///
/// This is the only place posts are mutated; callers get shared references
/// or clones back.
#[derive(Debug, Default)]
pub struct PostRepository {
    posts: IndexMap<PostId, Post>,
    edits: UnsavedEdits,
}

impl PostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the collection from stored posts, soonest first.
    pub fn from_loaded(mut posts: Vec<Post>) -> Self {
        posts.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        let mut map = IndexMap::with_capacity(posts.len());
        for post in posts {
            if map.contains_key(&post.id) {
                tracing::warn!(id = %post.id, "dropping duplicate post id");
                continue;
            }
            map.insert(post.id.clone(), post);
        }
        Self {
            posts: map,
            edits: UnsavedEdits::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, id: &PostId) -> Option<&Post> {
        self.posts.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Post> {
        self.posts.values()
    }

    pub fn snapshot(&self) -> Vec<Post> {
        self.posts.values().cloned().collect()
    }

    pub fn create(
        &mut self,
        text: &str,
        scheduled_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> ReminderResult<Post> {
        self.create_with_color(text, scheduled_at, None, now)
    }

    pub fn create_with_color(
        &mut self,
        text: &str,
        scheduled_at: OffsetDateTime,
        color: Option<ColorTag>,
        now: OffsetDateTime,
    ) -> ReminderResult<Post> {
        let text = validate_submission(text, scheduled_at, now)?;
        let mut id = PostId::generate();
        while self.posts.contains_key(&id) {
            id = PostId::generate();
        }
        let post = Post {
            id: id.clone(),
            text,
            scheduled_at,
            notified: false,
            color: color.unwrap_or_else(ColorTag::random),
            created_at: now,
        };
        self.posts.shift_insert(0, id.clone(), post.clone());
        self.edits.touched.insert(id);
        tracing::debug!(id = %post.id, at = %post.scheduled_at, "post created");
        Ok(post)
    }

    pub fn update(
        &mut self,
        id: &PostId,
        text: &str,
        scheduled_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> ReminderResult<UpdateOutcome> {
        let text = validate_submission(text, scheduled_at, now)?;
        let post = self
            .posts
            .get_mut(id)
            .ok_or_else(|| ReminderError::NotFound(id.clone()))?;
        let rescheduled = post.scheduled_at != scheduled_at;
        post.text = text;
        post.scheduled_at = scheduled_at;
        post.notified = false;
        self.edits.touched.insert(id.clone());
        tracing::debug!(%id, rescheduled, "post updated");
        Ok(UpdateOutcome {
            post: post.clone(),
            rescheduled,
        })
    }

    pub fn delete(&mut self, id: &PostId) -> ReminderResult<Post> {
        let post = self
            .posts
            .shift_remove(id)
            .ok_or_else(|| ReminderError::NotFound(id.clone()))?;
        self.edits.touched.remove(id);
        self.edits.deleted.insert(id.clone());
        Ok(post)
    }

    /// Removes every post and returns how many were dropped. Callers clear
    /// the store in the same step, so nothing is left unsaved.
    pub fn clear(&mut self) -> usize {
        let count = self.posts.len();
        self.posts.clear();
        self.mark_saved();
        count
    }

    pub fn has_unsaved_edits(&self) -> bool {
        !self.edits.touched.is_empty() || !self.edits.deleted.is_empty()
    }

    /// Called once a snapshot taken after every edit has been written.
    pub fn mark_saved(&mut self) {
        self.edits.touched.clear();
        self.edits.deleted.clear();
    }

    /// Replaces the collection with one written by another process. Posts
    /// edited here and not yet saved keep their local version (and local
    /// deletions stay deleted); everything else follows `external`. A post
    /// whose time is unchanged keeps its local `notified` flag.
    pub fn reconcile(&mut self, external: Vec<Post>) -> Reconciled {
        let previous = mem::take(&mut self.posts);
        let mut merged = IndexMap::with_capacity(external.len());
        for mut post in external {
            if self.edits.touched.contains(&post.id)
                || self.edits.deleted.contains(&post.id)
                || merged.contains_key(&post.id)
            {
                continue;
            }
            if let Some(local) = previous.get(&post.id) {
                if local.scheduled_at == post.scheduled_at {
                    post.notified = local.notified;
                    post.created_at = local.created_at;
                }
            }
            merged.insert(post.id.clone(), post);
        }
        // walk backwards so head inserts keep the local order
        for (id, post) in previous.iter().rev() {
            if self.edits.touched.contains(id) {
                merged.shift_insert(0, id.clone(), post.clone());
            }
        }

        let mut report = Reconciled::default();
        for (id, old) in &previous {
            match merged.get(id) {
                None => report.removed.push(id.clone()),
                Some(new) if new.scheduled_at != old.scheduled_at => {
                    report.rescheduled.push(id.clone())
                }
                Some(_) => {}
            }
        }
        self.posts = merged;
        report
    }

    /// Flips the notified flag. Returns false if the post is gone or was
    /// already marked.
    pub fn mark_notified(&mut self, id: &PostId) -> bool {
        match self.posts.get_mut(id) {
            Some(post) if !post.notified => {
                post.notified = true;
                true
            }
            _ => false,
        }
    }

    /// Posts still ahead of `now`, soonest first.
    pub fn upcoming(&self, now: OffsetDateTime) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self
            .posts
            .values()
            .filter(|post| post.is_upcoming(now))
            .collect();
        posts.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        posts
    }

    /// Posts at or behind `now`, most recent first.
    pub fn past(&self, now: OffsetDateTime) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self
            .posts
            .values()
            .filter(|post| !post.is_upcoming(now))
            .collect();
        posts.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        posts
    }

    pub fn for_tab(&self, tab: Tab, now: OffsetDateTime) -> Vec<&Post> {
        match tab {
            Tab::Upcoming => self.upcoming(now),
            Tab::Past => self.past(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use time::macros::datetime;
    use time::Duration;

    fn now() -> OffsetDateTime {
        datetime!(2024-05-01 12:00 UTC)
    }

    #[test]
    fn create_inserts_at_head_unnotified() -> anyhow::Result<()> {
        let mut repo = PostRepository::new();
        let first = repo.create("first", now() + Duration::minutes(10), now())?;
        let second = repo.create("second", now() + Duration::minutes(5), now())?;

        assert!(!first.notified && !second.notified);
        let order: Vec<_> = repo.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(order, ["second", "first"]);
        Ok(())
    }

    #[test]
    fn create_rejects_invalid_input_without_mutation() {
        let mut repo = PostRepository::new();
        assert_matches!(
            repo.create(" ", now() + Duration::minutes(1), now()),
            Err(ReminderError::Validation(_))
        );
        assert_matches!(
            repo.create("late", now() - Duration::minutes(1), now()),
            Err(ReminderError::Validation(_))
        );
        assert!(repo.is_empty());
    }

    #[test]
    fn update_rearms_and_reports_reschedule() -> anyhow::Result<()> {
        let mut repo = PostRepository::new();
        let post = repo.create("standup", now() + Duration::minutes(3), now())?;
        assert!(repo.mark_notified(&post.id));
        assert!(!repo.mark_notified(&post.id));

        let same_time = repo.update(&post.id, "standup!", post.scheduled_at, now())?;
        assert!(!same_time.rescheduled);
        assert!(!same_time.post.notified);

        repo.mark_notified(&post.id);
        let moved = repo.update(&post.id, "standup!", now() + Duration::minutes(9), now())?;
        assert!(moved.rescheduled);
        assert!(!repo.get(&post.id).expect("post present").notified);
        assert_eq!(moved.post.id, post.id);
        Ok(())
    }

    #[test]
    fn update_and_delete_unknown_ids_are_not_found() -> anyhow::Result<()> {
        let mut repo = PostRepository::new();
        repo.create("keep", now() + Duration::minutes(2), now())?;
        let ghost = PostId::from("ghost");

        assert_matches!(
            repo.update(&ghost, "x", now() + Duration::minutes(2), now()),
            Err(ReminderError::NotFound(id)) if id == ghost
        );
        assert_matches!(repo.delete(&ghost), Err(ReminderError::NotFound(_)));
        assert_eq!(repo.len(), 1);
        Ok(())
    }

    #[test]
    fn delete_preserves_remaining_order() -> anyhow::Result<()> {
        let mut repo = PostRepository::new();
        let a = repo.create("a", now() + Duration::minutes(1), now())?;
        let b = repo.create("b", now() + Duration::minutes(2), now())?;
        let c = repo.create("c", now() + Duration::minutes(3), now())?;

        repo.delete(&b.id)?;
        let ids: Vec<_> = repo.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![c.id, a.id]);
        assert_eq!(repo.clear(), 2);
        assert!(repo.is_empty());
        Ok(())
    }

    #[test]
    fn partitions_cover_collection_exactly_once() -> anyhow::Result<()> {
        let start = now() - Duration::hours(1);
        let mut repo = PostRepository::new();
        for minutes in [5, 30, 60, 61, 90, 240] {
            repo.create(&format!("t+{minutes}"), start + Duration::minutes(minutes), start)?;
        }

        for probe in [start, now(), now() + Duration::hours(3), now() + Duration::days(1)] {
            let upcoming = repo.upcoming(probe);
            let past = repo.past(probe);
            assert_eq!(upcoming.len() + past.len(), repo.len());
            let up_ids: HashSet<_> = upcoming.iter().map(|p| &p.id).collect();
            let past_ids: HashSet<_> = past.iter().map(|p| &p.id).collect();
            assert!(up_ids.is_disjoint(&past_ids));
            assert!(upcoming.iter().all(|p| p.scheduled_at > probe));
            assert!(past.iter().all(|p| p.scheduled_at <= probe));
            assert!(upcoming
                .windows(2)
                .all(|w| w[0].scheduled_at <= w[1].scheduled_at));
        }

        // exactly at the scheduled instant a post counts as past
        let boundary = start + Duration::minutes(60);
        assert!(repo.past(boundary).iter().any(|p| p.text == "t+60"));
        assert_eq!(repo.for_tab(Tab::Upcoming, boundary).len(), 3);
        Ok(())
    }

    #[test]
    fn loaded_posts_are_sorted_soonest_first() {
        let mk = |text: &str, minutes: i64| Post {
            id: PostId::from(text),
            text: text.to_owned(),
            scheduled_at: now() + Duration::minutes(minutes),
            notified: false,
            color: ColorTag::default(),
            created_at: now(),
        };
        let repo = PostRepository::from_loaded(vec![mk("late", 30), mk("soon", 2), mk("late", 1)]);
        let order: Vec<_> = repo.iter().map(|p| p.text.as_str()).collect();
        // the second "late" sorts first and wins; the duplicate is dropped
        assert_eq!(order, ["late", "soon"]);
        assert_eq!(
            repo.get(&PostId::from("late")).map(|p| p.scheduled_at),
            Some(now() + Duration::minutes(1))
        );
    }

    #[test]
    fn reconcile_follows_external_when_nothing_is_unsaved() -> anyhow::Result<()> {
        let mut local = PostRepository::new();
        let kept = local.create("kept", now() + Duration::minutes(5), now())?;
        let moved = local.create("moved", now() + Duration::minutes(6), now())?;
        let dropped = local.create("dropped", now() + Duration::minutes(7), now())?;
        local.mark_notified(&kept.id);
        local.mark_saved();

        let mut remote = PostRepository::from_loaded(local.snapshot());
        remote.update(&moved.id, "moved", now() + Duration::minutes(9), now())?;
        remote.delete(&dropped.id)?;
        let added = remote.create("added", now() + Duration::minutes(3), now())?;

        let report = local.reconcile(remote.snapshot());
        assert_eq!(report.rescheduled, vec![moved.id.clone()]);
        assert_eq!(report.removed, vec![dropped.id]);
        assert_eq!(local.len(), 3);
        assert!(local.get(&added.id).is_some());
        assert!(local.get(&kept.id).expect("kept").notified);
        assert_eq!(
            local.get(&moved.id).map(|p| p.scheduled_at),
            Some(now() + Duration::minutes(9))
        );
        Ok(())
    }

    #[test]
    fn reconcile_keeps_unsaved_local_edits() -> anyhow::Result<()> {
        let mut local = PostRepository::new();
        let shared = local.create("shared", now() + Duration::minutes(5), now())?;
        let gone = local.create("gone", now() + Duration::minutes(6), now())?;
        let external = local.snapshot();
        local.mark_saved();

        let fresh = local.create("fresh", now() + Duration::minutes(8), now())?;
        local.update(&shared.id, "shared, edited", shared.scheduled_at, now())?;
        local.delete(&gone.id)?;
        assert!(local.has_unsaved_edits());

        let report = local.reconcile(external);
        assert_eq!(report, Reconciled::default());
        let texts: Vec<_> = local.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, ["fresh", "shared, edited"]);
        assert!(local.get(&fresh.id).is_some());

        local.mark_saved();
        assert!(!local.has_unsaved_edits());
        Ok(())
    }
}
