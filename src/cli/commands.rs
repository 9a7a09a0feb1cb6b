use std::fmt::Write as _;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Args;
use crossbeam_channel::Sender;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

use crate::app::{AppEvent, Command, CommandOutcome, PostListView, ReminderApp};
use crate::clock::Clock;
use crate::config::ColorTag;
use crate::posts::{Post, PostId, Tab};

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Post text (joined with spaces)
    #[arg(required = true)]
    pub text: Vec<String>,
    /// Absolute due time in RFC 3339, e.g. 2024-05-01T12:30:00Z
    #[arg(long, conflicts_with = "delay")]
    pub at: Option<String>,
    /// Due time relative to now, e.g. 90s, 5m, 2h, 1d
    #[arg(long = "in", value_name = "DELAY")]
    pub delay: Option<String>,
    /// Colour tag (rose, amber, mint, sky, lavender); random if omitted
    #[arg(long)]
    pub color: Option<ColorTag>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Post identifier
    pub id: String,
    /// Replacement text; keeps the current text if omitted
    #[arg(long)]
    pub text: Option<String>,
    /// New absolute due time in RFC 3339
    #[arg(long, conflicts_with = "delay")]
    pub at: Option<String>,
    /// New due time relative to now
    #[arg(long = "in", value_name = "DELAY")]
    pub delay: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Post identifier
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Which list to print
    #[arg(long, default_value_t = Tab::Upcoming)]
    pub tab: Tab,
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Do not read commands from stdin
    #[arg(long)]
    pub no_stdin: bool,
}

pub fn add_post(app: &mut ReminderApp, args: AddArgs) -> Result<()> {
    println!("{}", run_add(app, args)?);
    Ok(())
}

fn run_add(app: &mut ReminderApp, args: AddArgs) -> Result<String> {
    let text = args.text.join(" ");
    let at = resolve_when(args.at.as_deref(), args.delay.as_deref(), app.now())?
        .context("either --at or --in is required")?;
    let outcome = app.handle(Command::Create {
        text,
        at,
        color: args.color,
    })?;
    Ok(describe(&outcome))
}

pub fn edit_post(app: &mut ReminderApp, args: EditArgs) -> Result<()> {
    println!("{}", run_edit(app, args)?);
    Ok(())
}

fn run_edit(app: &mut ReminderApp, args: EditArgs) -> Result<String> {
    let id = PostId::from(args.id);
    let (text, at) = {
        let current = app
            .posts()
            .get(&id)
            .with_context(|| format!("post {id} not found"))?;
        let at = resolve_when(args.at.as_deref(), args.delay.as_deref(), app.now())?
            .unwrap_or(current.scheduled_at);
        (args.text.unwrap_or_else(|| current.text.clone()), at)
    };
    let outcome = app.handle(Command::Update { id, text, at })?;
    Ok(describe(&outcome))
}

pub fn delete_post(app: &mut ReminderApp, args: DeleteArgs) -> Result<()> {
    let outcome = app.handle(Command::Delete {
        id: PostId::from(args.id),
    })?;
    println!("{}", describe(&outcome));
    Ok(())
}

pub fn clear_posts(app: &mut ReminderApp) -> Result<()> {
    let outcome = app.handle(Command::ClearAll)?;
    println!("{}", describe(&outcome));
    Ok(())
}

pub fn list_posts(app: &mut ReminderApp, args: ListArgs) -> Result<()> {
    let outcome = app.handle(Command::List { tab: args.tab })?;
    print!("{}", describe(&outcome));
    Ok(())
}

/// Runs the reminder loop until `quit` is typed on stdin.
pub fn watch(app: &mut ReminderApp, args: WatchArgs) -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let upcoming = app.upcoming().len();
    if args.no_stdin {
        eprintln!("watching {upcoming} upcoming post(s); press Ctrl-C to stop");
    } else {
        spawn_stdin_reader(tx.clone(), app.clock())?;
        eprintln!("watching {upcoming} upcoming post(s); commands: add <DELAY> <TEXT>, delete <ID>, list [past], quit");
    }
    // `tx` stays alive so that stdin EOF does not end the loop.
    let result = app.run(&rx);
    drop(tx);
    result
}

fn spawn_stdin_reader(events: Sender<AppEvent>, clock: Arc<dyn Clock>) -> Result<()> {
    thread::Builder::new()
        .name("postminder-stdin".into())
        .spawn(move || read_commands(io::stdin().lock(), &events, clock.as_ref()))
        .context("spawning stdin reader")?;
    Ok(())
}

fn read_commands<R: BufRead>(input: R, events: &Sender<AppEvent>, clock: &dyn Clock) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(?err, "failed to read stdin");
                break;
            }
        };
        match parse_stdin_line(&line, clock.now()) {
            Ok(StdinLine::Blank) => {}
            Ok(StdinLine::Quit) => {
                let _ = events.send(AppEvent::Shutdown);
                break;
            }
            Ok(StdinLine::Command(command)) => {
                let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                let event = AppEvent::Command {
                    command,
                    reply: Some(reply_tx),
                };
                if events.send(event).is_err() {
                    break;
                }
                match reply_rx.recv() {
                    Ok(Ok(outcome)) => print!("{}", with_newline(describe(&outcome))),
                    Ok(Err(err)) => eprintln!("error: {err}"),
                    Err(_) => break,
                }
            }
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
    tracing::debug!("stdin reader finished");
}

#[derive(Debug)]
enum StdinLine {
    Command(Command),
    Quit,
    Blank,
}

fn parse_stdin_line(line: &str, now: OffsetDateTime) -> Result<StdinLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StdinLine::Blank);
    }
    let (verb, rest) = line
        .split_once(char::is_whitespace)
        .map(|(verb, rest)| (verb, rest.trim()))
        .unwrap_or((line, ""));
    let parsed = match verb {
        "add" => {
            let Some((delay, text)) = rest.split_once(char::is_whitespace) else {
                bail!("usage: add <DELAY> <TEXT>");
            };
            StdinLine::Command(Command::Create {
                text: text.trim().to_owned(),
                at: after_delay(now, delay)?,
                color: None,
            })
        }
        "delete" => {
            if rest.is_empty() {
                bail!("usage: delete <ID>");
            }
            StdinLine::Command(Command::Delete {
                id: PostId::from(rest),
            })
        }
        "list" => {
            let tab = if rest.is_empty() {
                Tab::Upcoming
            } else {
                rest.parse()
                    .with_context(|| format!("unknown tab `{rest}`; expected upcoming or past"))?
            };
            StdinLine::Command(Command::List { tab })
        }
        "quit" | "exit" => StdinLine::Quit,
        other => bail!("unknown command `{other}`; expected add, delete, list or quit"),
    };
    Ok(parsed)
}

/// Parses `<n>s`, `<n>m`, `<n>h` or `<n>d`.
pub fn parse_delay(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let Some(unit) = raw.chars().last() else {
        bail!("delay cannot be empty");
    };
    let digits = &raw[..raw.len() - unit.len_utf8()];
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("invalid delay `{raw}`; expected e.g. 90s, 5m, 2h, 1d"))?;
    if amount <= 0 {
        bail!("delay must be positive");
    }
    let unit_secs: i64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        other => bail!("unknown delay unit `{other}`; expected s, m, h or d"),
    };
    let Some(secs) = amount.checked_mul(unit_secs) else {
        bail!("delay too large");
    };
    Ok(Duration::seconds(secs))
}

/// `now` pushed forward by a parsed delay.
fn after_delay(now: OffsetDateTime, raw: &str) -> Result<OffsetDateTime> {
    now.checked_add(parse_delay(raw)?)
        .context("delay too large")
}

/// `None` when neither an absolute nor a relative time was given.
fn resolve_when(
    at: Option<&str>,
    delay: Option<&str>,
    now: OffsetDateTime,
) -> Result<Option<OffsetDateTime>> {
    match (at, delay) {
        (Some(_), Some(_)) => bail!("use either --at or --in, not both"),
        (Some(at), None) => {
            let parsed = OffsetDateTime::parse(at, &Rfc3339)
                .with_context(|| format!("invalid RFC 3339 time `{at}`"))?;
            Ok(Some(parsed))
        }
        (None, Some(delay)) => after_delay(now, delay).map(Some),
        (None, None) => Ok(None),
    }
}

fn describe(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Created(post) => format!("scheduled {}", format_post(post)),
        CommandOutcome::Updated(post) => format!("updated {}", format_post(post)),
        CommandOutcome::Deleted(post) => format!("deleted {}", post.id),
        CommandOutcome::Cleared(removed) => format!("cleared {removed} post(s)"),
        CommandOutcome::Listed(view) => format_post_list(view),
    }
}

fn format_post(post: &Post) -> String {
    format!(
        "{} at {} [{}]: {}",
        post.id,
        format_timestamp(post.scheduled_at),
        post.color,
        post.text
    )
}

fn format_post_list(view: &PostListView) -> String {
    let mut out = String::new();
    let title = match view.tab {
        Tab::Upcoming => "Upcoming",
        Tab::Past => "Past",
    };
    let _ = writeln!(&mut out, "{title} ({})", view.posts.len());
    if view.is_empty() {
        let _ = writeln!(&mut out, "  (none)");
        return out;
    }
    for post in &view.posts {
        let marker = if post.notified { "*" } else { " " };
        let _ = writeln!(
            &mut out,
            "{marker} {}  {}  {:<8}  [{}]  {}",
            post.id,
            format_timestamp(post.scheduled_at),
            post.when,
            post.color,
            post.text
        );
    }
    out
}

fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn with_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
