mod auth;
mod client;
mod config;
mod db;
mod extract;
mod local;
mod models;
mod poller;
mod schedule;
mod server;
mod stats;
mod ui;

use crate::client::BackendClient;
use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::local::LocalContext;
use crate::poller::{EmailSource, FeedState, PollHandle, Poller};
use crate::schedule::ScheduleSource;
use crate::ui::{Action, UIMode, Update};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Terminal dashboard for categorized email, schedules and bills.
#[derive(Parser)]
#[command(name = "maildash", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Settings file
    #[arg(short, long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Overrides `backend_url` from the settings file
    #[arg(long, global = true, value_name = "URL")]
    backend_url: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    /// Forget the stored Google session and exit
    #[arg(long)]
    logout: bool,

    /// Skip sign-in (local development)
    #[arg(long)]
    no_auth: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Serve bills, schedules and email summaries over HTTP
    Serve {
        /// Overrides `listen_addr` from the settings file
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config);
    if let Some(url) = &cli.backend_url {
        config.backend_url = url.clone();
    }

    let serving = matches!(cli.command, Some(Command::Serve { .. }));
    let level = if cli.debug { "debug" } else { "info" };
    setup_logging(level, &config.log_dir, serving);

    if cli.logout {
        auth::RingStorage.clear_token().await?;
        println!("Signed out. Run maildash again to sign in.");
        return Ok(());
    }

    match cli.command {
        Some(Command::Serve { listen }) => {
            let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            run_server(&addr, &config).await
        }
        None => run_dashboard(&config, cli.no_auth).await,
    }
}

fn setup_logging(level: &str, log_dir: &Path, to_stderr: bool) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // The dashboard owns the terminal, so only `serve` writes to stderr.
    let stderr_layer =
        to_stderr.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let file_layer = std::fs::create_dir_all(log_dir).is_ok().then(|| {
        let file_appender = tracing_appender::rolling::never(log_dir, "maildash.log");
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

async fn run_server(addr: &str, config: &Config) -> Result<()> {
    let db = db::Database::new(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;
    db.run_migrations().await?;

    let ctx = Arc::new(LocalContext {
        bills_path: config.bills_path.clone(),
        db,
    });
    let shutdown = CancellationToken::new();

    let mut server = {
        let (addr, ctx, shutdown) = (addr.to_string(), ctx.clone(), shutdown.clone());
        let runtime = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || server::serve(&addr, ctx, runtime, shutdown))
    };

    let result = tokio::select! {
        joined = &mut server => joined.context("Local API thread panicked").and_then(|r| r),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            tracing::info!("shutting down local API");
            shutdown.cancel();
            server.await.context("Local API thread panicked").and_then(|r| r)
        }
    };

    ctx.db.close().await;
    result
}

type Tui = Terminal<CrosstermBackend<Stdout>>;

async fn run_dashboard(config: &Config, no_auth: bool) -> Result<()> {
    let client = Arc::new(BackendClient::new(
        &config.backend_url,
        Duration::from_secs(config.request_timeout_secs),
    )?);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = dashboard_loop(&mut terminal, config, client, no_auth).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn dashboard_loop(
    terminal: &mut Tui,
    config: &Config,
    client: Arc<BackendClient>,
    no_auth: bool,
) -> Result<()> {
    let poller = Poller::new(
        client.clone() as Arc<dyn EmailSource>,
        Arc::new(Mutex::new(FeedState::default())),
        Duration::from_secs(config.poll_interval_secs.max(1)),
    );
    let mut ui_state = ui::UIState::new(poller.state());
    tracing::info!(backend = client.base_url(), "dashboard starting");
    let schedules = Arc::new(ScheduleSource::connect(&config.database_url, client.clone()).await);

    let (url_tx, mut url_rx) = mpsc::channel::<String>(1);
    let (session_tx, mut session_rx) = mpsc::channel::<Result<auth::Session>>(1);
    let (update_tx, mut update_rx) = mpsc::channel::<Update>(16);

    if no_auth {
        let _ = session_tx.send(Ok(auth::Session::local())).await;
    } else {
        let credentials = config.credentials_path.clone();
        tokio::spawn(async move {
            let delegate = auth::TuiDelegate { tx: url_tx };
            let result = auth::Session::sign_in(&credentials, delegate).await;
            let _ = session_tx.send(result).await;
        });
    }

    let mut poll: Option<PollHandle> = None;
    let loaders = CancellationToken::new();
    let mut loader_task: Option<JoinHandle<()>> = None;

    let mut events = EventStream::new();
    let mut redraw = tokio::time::interval(Duration::from_millis(250));
    redraw.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome: Result<()> = loop {
        if let Err(e) = terminal.draw(|f| ui::render(f, &mut ui_state)) {
            break Err(e.into());
        }

        tokio::select! {
            Some(url) = url_rx.recv() => {
                ui_state.auth_url = Some(url);
            }
            Some(signed_in) = session_rx.recv() => match signed_in {
                Ok(session) => {
                    ui_state.greeting = session.greeting();
                    ui_state.auth_url = None;
                    ui_state.mode = UIMode::Browsing;
                    poll = Some(poller.start(None));
                    loader_task = Some(spawn_loaders(
                        client.clone(),
                        schedules.clone(),
                        config,
                        update_tx.clone(),
                        loaders.clone(),
                    ));
                }
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "sign-in failed");
                    ui_state.auth_error = Some(format!("{:#}", e));
                }
            },
            Some(update) = update_rx.recv() => ui_state.apply_update(update),
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    match ui_state.handle_key(key, &config.keybindings) {
                        Action::Quit => break Ok(()),
                        Action::SetFilter(filter) => {
                            if let Some(handle) = poll.take() {
                                tracing::debug!(generation = handle.generation(), "replacing poll cycle");
                                handle.stop().await;
                            }
                            poll = Some(poller.start(filter));
                        }
                        Action::Download(ids) => {
                            ui_state.status_message = Some(format!("Downloading {} attachment(s)...", ids.len()));
                            for id in ids {
                                spawn_download(client.clone(), id, config.download_dir.clone(), update_tx.clone());
                            }
                        }
                        Action::None => {}
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },
            _ = redraw.tick() => {}
        }
    };

    if let Some(handle) = poll.take() {
        handle.stop().await;
    }
    loaders.cancel();
    if let Some(task) = loader_task {
        let _ = task.await;
    }
    schedules.close().await;
    outcome
}

/// Loads the side panels once, then refreshes schedules on their own
/// interval until `token` fires.
fn spawn_loaders(
    client: Arc<BackendClient>,
    schedules: Arc<ScheduleSource>,
    config: &Config,
    updates: mpsc::Sender<Update>,
    token: CancellationToken,
) -> JoinHandle<()> {
    let bills_path = config.bills_path.clone();
    let refresh = Duration::from_secs(config.events_refresh_secs.max(1));

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = load_panels(client, schedules, bills_path, refresh, updates) => {}
        }
    })
}

async fn load_panels(
    client: Arc<BackendClient>,
    schedules: Arc<ScheduleSource>,
    bills_path: PathBuf,
    refresh: Duration,
    updates: mpsc::Sender<Update>,
) {
    let (stats, attachments, bills) = tokio::join!(
        client.dashboard_stats(),
        client.attachments(),
        local::read_bills(&bills_path),
    );
    for update in [
        Update::Stats(stats),
        Update::Attachments(attachments),
        Update::Bills(bills),
    ] {
        if updates.send(update).await.is_err() {
            return;
        }
    }

    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if updates.send(Update::Events(schedules.load().await)).await.is_err() {
            return;
        }
    }
}

fn spawn_download(
    client: Arc<BackendClient>,
    id: String,
    dir: PathBuf,
    updates: mpsc::Sender<Update>,
) {
    tokio::spawn(async move {
        let result = client
            .download_attachment(&id, &dir)
            .await
            .map_err(|e| {
                tracing::warn!(attachment = %id, error = %format!("{:#}", e), "download failed");
                format!("{:#}", e)
            });
        let _ = updates.send(Update::Downloaded(result)).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_serve_and_flags() {
        let cli = Cli::parse_from([
            "maildash",
            "--backend-url",
            "http://10.0.0.2:5001",
            "serve",
            "--listen",
            "0.0.0.0:3000",
        ]);
        assert_eq!(cli.backend_url.as_deref(), Some("http://10.0.0.2:5001"));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match cli.command {
            Some(Command::Serve { listen }) => assert_eq!(listen.as_deref(), Some("0.0.0.0:3000")),
            None => panic!("expected serve subcommand"),
        }

        let cli = Cli::parse_from(["maildash", "--no-auth", "--debug"]);
        assert!(cli.no_auth && cli.debug && !cli.logout);
        assert!(cli.command.is_none());
    }
}
