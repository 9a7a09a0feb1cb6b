use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{ColorTag, NotificationConfig};
use crate::posts::{Post, PostId};

mod audio;
mod banner;

pub use audio::{AudioPlayer, CommandPlayer, Silent, TerminalBell};
pub use banner::{Banner, TerminalBanner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub post_id: PostId,
    pub text: String,
    pub color: ColorTag,
}

impl From<&Post> for Announcement {
    fn from(post: &Post) -> Self {
        Self {
            post_id: post.id.clone(),
            text: post.text.clone(),
            color: post.color,
        }
    }
}

/// Receives reminders once the scheduler decides they are due.
///
/// Implementations must not fail: whatever goes wrong while presenting a
/// reminder is handled inside `announce`.
pub trait NotificationSink: Send {
    fn announce(&self, announcement: &Announcement);
}

impl<T: NotificationSink + ?Sized> NotificationSink for Box<T> {
    fn announce(&self, announcement: &Announcement) {
        (**self).announce(announcement)
    }
}

impl<T: NotificationSink + Sync + ?Sized> NotificationSink for Arc<T> {
    fn announce(&self, announcement: &Announcement) {
        (**self).announce(announcement)
    }
}

/// Whether the surface showing reminders is currently in front of the user.
pub trait SurfaceVisibility: Send {
    fn is_visible(&self) -> bool;
}

/// Visible while stdout is an interactive terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSurface;

impl SurfaceVisibility for TerminalSurface {
    fn is_visible(&self) -> bool {
        atty::is(atty::Stream::Stdout)
    }
}

/// Visibility flag flipped by the host.
#[derive(Debug, Clone)]
pub struct SharedVisibility(Arc<AtomicBool>);

impl SharedVisibility {
    pub fn new(visible: bool) -> Self {
        Self(Arc::new(AtomicBool::new(visible)))
    }

    pub fn set(&self, visible: bool) {
        self.0.store(visible, Ordering::Relaxed);
    }
}

impl SurfaceVisibility for SharedVisibility {
    fn is_visible(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Banner plus audio cue, with audio gated on surface visibility.
pub struct Notifier {
    banner: Box<dyn Banner>,
    audio: Box<dyn AudioPlayer>,
    surface: Box<dyn SurfaceVisibility>,
}

impl Notifier {
    pub fn new(
        banner: Box<dyn Banner>,
        audio: Box<dyn AudioPlayer>,
        surface: Box<dyn SurfaceVisibility>,
    ) -> Self {
        Self {
            banner,
            audio,
            surface,
        }
    }

    /// Terminal notifier configured from `[notifications]`.
    pub fn for_terminal(config: &NotificationConfig) -> Self {
        let audio: Box<dyn AudioPlayer> = if !config.audio {
            Box::new(Silent)
        } else if let Some(player) = CommandPlayer::from_argv(&config.audio_command) {
            Box::new(player)
        } else {
            Box::new(TerminalBell)
        };
        Self::new(Box::new(TerminalBanner), audio, Box::new(TerminalSurface))
    }
}

impl NotificationSink for Notifier {
    fn announce(&self, announcement: &Announcement) {
        tracing::info!(
            id = %announcement.post_id,
            color = %announcement.color,
            text = %announcement.text,
            "reminder due"
        );
        if let Err(err) = self.banner.show(announcement) {
            tracing::warn!(?err, id = %announcement.post_id, "failed to show reminder banner");
        }
        if !self.surface.is_visible() {
            tracing::debug!(id = %announcement.post_id, "surface hidden, skipping audio");
            return;
        }
        if let Err(err) = self.audio.play() {
            tracing::warn!(%err, id = %announcement.post_id, "reminder audio failed");
        }
    }
}
