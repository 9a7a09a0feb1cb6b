use std::io::{self, Write};

use anyhow::{Context, Result};

use super::Announcement;

/// Visual half of a reminder.
pub trait Banner: Send {
    fn show(&self, announcement: &Announcement) -> Result<()>;
}

/// Prints a coloured line to stdout; colour is dropped when stdout is piped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBanner;

impl Banner for TerminalBanner {
    fn show(&self, announcement: &Announcement) -> Result<()> {
        let colored = atty::is(atty::Stream::Stdout);
        let line = render_line(announcement, colored);
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}").context("writing reminder banner")?;
        stdout.flush().context("flushing reminder banner")
    }
}

pub(crate) fn render_line(announcement: &Announcement, colored: bool) -> String {
    if colored {
        format!(
            "\x1b[1;{}m[reminder]\x1b[0m {}",
            announcement.color.ansi(),
            announcement.text
        )
    } else {
        format!("[reminder] {}", announcement.text)
    }
}
