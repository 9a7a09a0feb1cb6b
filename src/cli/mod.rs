use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::ReminderApp;
use crate::clock::SystemClock;
use crate::config::ConfigLoader;
use crate::notify::Notifier;
use crate::storage;

pub mod commands;

use self::commands::{AddArgs, DeleteArgs, EditArgs, ListArgs, WatchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "postminder",
    version,
    about = "Short posts with a reminder one minute before they are due"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over POSTMINDER_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over POSTMINDER_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reminder loop in the foreground (default)
    Watch(WatchArgs),
    /// Schedule a new post
    Add(AddArgs),
    /// Change the text or time of a post
    Edit(EditArgs),
    /// Remove a post
    Delete(DeleteArgs),
    /// Remove every post
    Clear,
    /// Print upcoming or past posts
    List(ListArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("POSTMINDER_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("POSTMINDER_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = Arc::new(loader.load_or_init()?);
    let storage = storage::init(&config.storage)?;

    let sink = Notifier::for_terminal(&config.notifications);
    let mut app = ReminderApp::open(
        config.clone(),
        Box::new(storage),
        Arc::new(SystemClock),
        Box::new(sink),
    )
    .context("loading posts")?;
    for warning in app.take_load_warnings() {
        eprintln!("warning: {warning}");
    }

    let command = cli
        .command
        .unwrap_or(Commands::Watch(WatchArgs::default()));
    let result = match command {
        Commands::Watch(args) => commands::watch(&mut app, args),
        Commands::Add(args) => commands::add_post(&mut app, args),
        Commands::Edit(args) => commands::edit_post(&mut app, args),
        Commands::Delete(args) => commands::delete_post(&mut app, args),
        Commands::Clear => commands::clear_posts(&mut app),
        Commands::List(args) => commands::list_posts(&mut app, args),
    };
    app.shutdown();
    result
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
