mod app;
mod config;
mod download;
mod formats;
mod history;
mod input;
mod journal;
mod paths;
mod process;
mod progress;
mod search;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use app::App;
use config::Config;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Search query or URL to start with
  query: Option<String>,

  /// Override the download directory for this session
  #[arg(long, value_name = "DIR")]
  download_path: Option<String>,

  /// Pull cookies from a browser profile (wins over --cookies)
  #[arg(long, value_name = "BROWSER")]
  cookies_from_browser: Option<String>,

  /// Netscape cookie file to pass to yt-dlp
  #[arg(long, value_name = "FILE")]
  cookies: Option<String>,

  /// Maximum number of search results
  #[arg(short, long)]
  limit: Option<usize>,

  /// Generate shell completions and exit
  #[arg(long, value_name = "SHELL")]
  completions: Option<clap_complete::Shell>,
}

/// Log to a file in the data directory — stdout belongs to the TUI.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
  let file_appender = tracing_appender::rolling::never(paths::data_dir(), "ytd.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();
  guard
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  if let Some(shell) = args.completions {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
    return Ok(());
  }

  let _guard = init_tracing();

  let default_hook = std::panic::take_hook();
  std::panic::set_hook(Box::new(move |info| {
    ratatui::restore();
    default_hook(info);
  }));

  let mut terminal = ratatui::init();
  let result = run(&mut terminal, args).await;
  ratatui::restore();
  result
}

async fn run(terminal: &mut DefaultTerminal, args: Args) -> Result<()> {
  let mut config = Config::load();
  if let Some(path) = args.download_path {
    config.download_path = path;
  }
  if let Some(browser) = args.cookies_from_browser {
    config.cookies_browser = browser;
  }
  if let Some(file) = args.cookies {
    config.cookies_file = file;
  }
  if let Some(limit) = args.limit {
    config.search_limit = limit;
  }

  let mut app = App::new(config);
  if let Some(query) = args.query {
    app.set_input(query);
    app.trigger_search();
  }

  loop {
    app.check_pending();

    terminal.draw(|frame| ui::ui(frame, &mut app))?;

    if event::poll(Duration::from_millis(100))?
      && let Event::Key(key) = event::read()?
      && key.kind == KeyEventKind::Press
    {
      input::handle_key_event(&mut app, key)?;
    }

    if app.should_quit {
      break;
    }
  }

  // Kill any live yt-dlp before handing the terminal back.
  app.shutdown();
  Ok(())
}
