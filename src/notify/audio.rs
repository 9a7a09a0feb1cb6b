use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use crate::error::{ReminderError, ReminderResult};

/// Plays the reminder cue. `play` returns as soon as playback has been
/// started; it never waits for the sound to finish.
pub trait AudioPlayer: Send {
    fn play(&self) -> ReminderResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl AudioPlayer for Silent {
    fn play(&self) -> ReminderResult<()> {
        Ok(())
    }
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl AudioPlayer for TerminalBell {
    fn play(&self) -> ReminderResult<()> {
        let mut stderr = io::stderr().lock();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|err| ReminderError::playback(format!("terminal bell: {err}")))
    }
}

/// Runs an external player such as `paplay` or `afplay`.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `None` for an empty argv.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl AudioPlayer for CommandPlayer {
    fn play(&self) -> ReminderResult<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ReminderError::playback(format!("spawning {}: {err}", self.program)))?;
        let program = self.program.clone();
        thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                tracing::warn!(%program, %status, "audio player exited with failure");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(?err, %program, "failed to reap audio player"),
        });
        Ok(())
    }
}
