use std::path::PathBuf;
use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

mod api;
mod app;
mod channel;
mod config;
mod event;
mod handler;
mod picker;
mod tui;
mod ui;

use app::App;
use channel::WsConnector;
use config::Config;
use event::ClientEvent;

#[derive(Parser)]
#[command(name = "pdfchat")]
#[command(about = "Chat with your PDFs from the terminal")]
struct Cli {
    /// Backend server URL (defaults to the config file, then http://localhost:5000)
    #[arg(short, long)]
    server: Option<String>,

    /// Directory the file picker starts in
    #[arg(short, long)]
    dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let mut config = Config::load().unwrap_or_else(|_| Config::new());
    if cli.server.is_some() {
        config.server_url = cli.server;
    }
    if cli.dir.is_some() {
        config.start_dir = cli.dir;
    }

    let server_url = config.server_url();
    log::info!("starting against {}", server_url);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let connector = Box::new(WsConnector::new(&server_url));
    let mut app = App::new(&config, connector, events_tx)?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let result = run(&mut terminal, &mut app, &mut events, &mut events_rx).await;

    app.shutdown();
    tui::restore()?;
    result
}

async fn run(
    terminal: &mut tui::Tui,
    app: &mut App,
    events: &mut tui::EventHandler,
    client_events: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        tokio::select! {
            Some(event) = events.next() => handler::handle_event(app, event)?,
            Some(event) = client_events.recv() => app.apply(event),
            else => break,
        }
    }
    Ok(())
}

/// Log to a file: the terminal itself belongs to the UI.
fn init_logging() {
    let Ok(path) = Config::log_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    else {
        return;
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init();
}
