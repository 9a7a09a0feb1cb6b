pub mod alarm;
pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod persist;
pub mod posts;
pub mod storage;

pub use app::{AppEvent, Command, CommandOutcome, ReminderApp};
pub use config::{AppConfig, ColorTag, ConfigLoader, ConfigPaths};
pub use error::{ReminderError, ReminderResult};
pub use posts::{Post, PostId, Tab};
