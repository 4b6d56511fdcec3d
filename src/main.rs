//! Cafe Chat - terminal client for a streaming coffee assistant.

mod client;
mod config;
mod controller;
mod events;
mod streaming;
mod typeset;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use crossterm::event::{self, DisableFocusChange, EnableFocusChange, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use client::ChatClient;
use config::Config;
use events::StreamEvent;
use ui::conversation::{ConversationAction, ConversationManager};

const TICK_RATE: Duration = Duration::from_millis(50);
const ANIMATION_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Parser)]
#[command(name = "cafe-chat")]
#[command(version = "0.1.0")]
#[command(about = "Chat with a coffee assistant, replies typed out as they stream", long_about = None)]
struct Cli {
    /// Chat server base URL
    #[arg(long, env = "CAFE_CHAT_SERVER")]
    server: Option<String>,

    /// Path to the config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delay between revealed characters, in milliseconds
    #[arg(long)]
    typing_delay: Option<u64>,

    /// Show math markup as raw text
    #[arg(long, default_value = "false")]
    no_math: bool,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs always go to a file; the terminal belongs to the UI
    let log_dir = Config::log_dir()?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "cafe-chat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let default_filter = if cli.debug {
        "cafe_chat=debug,warn"
    } else {
        "cafe_chat=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    if let Some(Commands::Config) = cli.command {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!(server = %config.server_url, "starting cafe-chat");
    let client = ChatClient::new(config.clone())?;
    let (mut manager, events_rx) = ConversationManager::new(&config, Arc::new(client));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, &mut manager, events_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableFocusChange)?;
    terminal.show_cursor()?;

    if let Err(e) = &result {
        tracing::error!("event loop failed: {e:#}");
    }
    result
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(delay) = cli.typing_delay {
        config.typing_delay_ms = delay.max(1);
    }
    if cli.no_math {
        config.math.enabled = false;
    }
    Ok(config)
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    manager: &mut ConversationManager,
    mut events_rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> Result<()> {
    let mut last_frame = Instant::now();

    loop {
        if last_frame.elapsed() >= ANIMATION_INTERVAL {
            manager.tick_animation();
            last_frame = Instant::now();
        }

        terminal.draw(|f| manager.render(f))?;

        let deadline = manager.next_deadline();

        tokio::select! {
            // Terminal events - poll with short timeout
            () = tokio::time::sleep(TICK_RATE) => {
                while event::poll(Duration::ZERO)? {
                    match event::read()? {
                        Event::Key(key) => {
                            if manager.handle_key(key, Instant::now()) == ConversationAction::Exit {
                                if manager.is_busy() {
                                    tracing::info!("exiting with a reply in flight");
                                }
                                return Ok(());
                            }
                        }
                        Event::FocusGained => manager.set_focus(true),
                        Event::FocusLost => manager.set_focus(false),
                        _ => {}
                    }
                }
                manager.tick(Instant::now());
            }

            Some(event) = events_rx.recv() => {
                manager.handle_stream_event(event, Instant::now());
            }

            () = wait_for(deadline) => {
                manager.tick(Instant::now());
            }
        }
    }
}

/// Sleep until the next typewriter step, or forever when nothing is buffered
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
