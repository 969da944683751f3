//! kima-ui: a terminal front-end for the kima package manager script.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads configuration, checks that the script is usable, and then either runs
//! the interactive event loop or a single headless invocation.

mod app;
mod classify;
mod clipboard;
mod command;
mod config;
mod events;
mod output;
mod runner;
mod tui;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use crossterm::event::KeyEventKind;
use ratatui::backend::Backend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppAction};
use crate::classify::{classify, Classified};
use crate::clipboard::Clipboard;
use crate::command::{Command, Invocation};
use crate::config::{Config, DEFAULT_MAX_LINES, DEFAULT_TICK_MS};
use crate::events::{Event, RunOutcome, RunnerEvent, ShutdownSignal};
use crate::output::LiveEcho;
use crate::runner::{ProcessRunner, RunState};

/// Exit status of a headless run that was cancelled.
const EXIT_CANCELLED: i32 = 130;
/// Exit status of a headless run whose script could not be launched.
const EXIT_LAUNCH_FAILED: i32 = 127;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "kima-ui",
    version,
    about = "Terminal front-end for the kima package manager",
    styles = help_styles(),
    color = clap::ColorChoice::Always
)]
struct Cli {
    /// Command to preselect (or to run with --no-ui).
    #[arg(value_enum)]
    command: Option<Command>,
    /// Package name or search term passed to the command.
    argument: Option<String>,
    /// Path to kima.sh (default: next to this executable).
    #[arg(long)]
    script: Option<PathBuf>,
    /// Path to a kima-ui.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any kima-ui.toml installed next to the executable.
    #[arg(long)]
    no_config: bool,
    /// Run the command once without the TUI and print its result.
    #[arg(long)]
    no_ui: bool,
    /// Print the result as JSON (with --no-ui).
    #[arg(long, requires = "no_ui")]
    json: bool,
    /// Max lines kept in the live console.
    #[arg(long)]
    max_lines: Option<usize>,
    /// Write diagnostic logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Use ASCII instead of Unicode symbols.
    #[arg(long)]
    ascii: bool,
}

/// Effective settings after merging the config file and CLI flags.
#[derive(Debug, Clone)]
struct RunSettings {
    max_lines: usize,
    use_symbols: bool,
    log_file: Option<PathBuf>,
    tick: Duration,
    no_ui: bool,
    json: bool,
}

impl RunSettings {
    fn resolve(cli: &Cli, config: Config) -> Self {
        Self {
            max_lines: cli
                .max_lines
                .or(config.max_lines)
                .unwrap_or(DEFAULT_MAX_LINES),
            use_symbols: !cli.ascii && config.symbols.unwrap_or(true),
            log_file: cli.log_file.clone().or(config.log_file),
            tick: Duration::from_millis(config.tick_ms.unwrap_or(DEFAULT_TICK_MS).max(16)),
            no_ui: cli.no_ui,
            json: cli.json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let settings = RunSettings::resolve(&cli, config);
    init_tracing(&settings)?;

    let script = runner::resolve_script(cli.script.clone())?;
    if let Err(err) = runner::preflight(&script) {
        tracing::error!(script = %script.display(), error = %err, "preflight failed");
        if settings.no_ui {
            eprintln!("Error: {:#}", err);
            std::process::exit(EXIT_LAUNCH_FAILED);
        }
        return Err(err);
    }

    if settings.no_ui {
        let code = run_headless(&cli, script, &settings).await?;
        std::process::exit(code);
    }
    run_tui(&cli, script, &settings).await
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None if cli.no_config => None,
        None => config::installed_config_path(),
    };
    match path {
        Some(path) => config::load_config(&path),
        None => Ok(Config::default()),
    }
}

fn init_tracing(settings: &RunSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    // The TUI owns the terminal, so logs only go somewhere visible when asked for.
    if let Some(path) = &settings.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let _ = builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init();
    } else if settings.no_ui {
        let _ = builder.with_writer(std::io::stderr).try_init();
    } else {
        let _ = builder.with_writer(std::io::sink).try_init();
    }
    Ok(())
}

async fn run_tui(cli: &Cli, script: PathBuf, settings: &RunSettings) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let mut runner = ProcessRunner::new(script, event_tx.clone());
    let mut app = App::new(settings.max_lines, settings.use_symbols);
    if let Some(command) = cli.command {
        app.select_command(command);
    }
    if let Some(argument) = &cli.argument {
        app.argument = argument.clone();
    }
    let mut clipboard = Clipboard::default();

    let mut terminal = tui::init_terminal()?;
    spawn_input_listener(event_tx.clone());
    spawn_signal_listener(event_tx.clone());
    tracing::info!(script = %runner.script().display(), "interactive session started");

    let mut ticker = tokio::time::interval(settings.tick);
    let mut result = Ok(());

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    Event::Runner(event) => handle_runner_event(event, &mut app, &mut runner),
                    Event::Key(key) => {
                        let action = app.handle_key(key);
                        handle_app_action(action, &mut app, &mut runner, &mut clipboard);
                    }
                    Event::Resize { .. } => handle_resize(&mut terminal),
                    Event::Shutdown { signal } => {
                        tracing::info!(signal = signal.label(), "shutdown requested");
                        app.set_status_warning_persistent(format!(
                            "received {}, shutting down",
                            signal.label()
                        ));
                        app.should_quit = true;
                    }
                }
            }
            _ = ticker.tick() => {}
        }

        if let Err(err) = tui::draw(&mut app, &mut terminal) {
            result = Err(err.into());
            break;
        }
        if app.should_quit {
            break;
        }
    }

    stop_and_drain(&mut runner, &mut event_rx).await;
    tui::restore_terminal(terminal)?;
    result
}

fn handle_resize<B: Backend>(terminal: &mut Terminal<B>) {
    if let Err(err) = terminal.autoresize() {
        tracing::warn!(error = %err, "failed to resize terminal");
    }
}

fn handle_runner_event(event: RunnerEvent, app: &mut App, runner: &mut ProcessRunner) {
    match event {
        RunnerEvent::Started { run_id, pid } => {
            tracing::debug!(run_id, ?pid, "run started");
        }
        RunnerEvent::Output { stream, text, .. } => app.on_output(stream, &text),
        RunnerEvent::Completed {
            run_id,
            command,
            record,
            outcome,
        } => {
            runner.on_completion(run_id);
            app.on_completed(command, &record, outcome);
        }
    }
}

fn handle_app_action(
    action: AppAction,
    app: &mut App,
    runner: &mut ProcessRunner,
    clipboard: &mut Clipboard,
) {
    match action {
        AppAction::Run(invocation) => match runner.start(&invocation) {
            Ok(_) => app.on_run_started(&invocation, runner.script()),
            Err(err) => {
                tracing::warn!(command = %invocation.command, error = %err, "launch failed");
                app.on_launch_failed(&invocation, &err);
            }
        },
        AppAction::Stop => {
            if runner.stop() {
                app.set_status_warning_for("stopping...", Duration::from_secs(2));
            }
        }
        AppAction::Copy => match clipboard.copy(&app.active_view_text()) {
            Ok(()) => app.set_status_warning_for("copied to clipboard", Duration::from_secs(2)),
            Err(err) => {
                app.set_status_warning_for(format!("clipboard failed: {:#}", err), Duration::from_secs(3))
            }
        },
        AppAction::Quit | AppAction::None => {}
    }
}

// Kills a run still in flight and waits briefly for its completion so no child outlives us.
async fn stop_and_drain(runner: &mut ProcessRunner, event_rx: &mut mpsc::Receiver<Event>) {
    if runner.state() != RunState::Running || !runner.stop() {
        return;
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, event_rx.recv()).await {
        if let Event::Runner(RunnerEvent::Completed { run_id, .. }) = event {
            runner.on_completion(run_id);
            return;
        }
    }
    tracing::warn!("script did not report completion before exit");
}

/// Runs one invocation without the TUI and returns the process exit status.
///
/// Live console output goes to stderr; the classified result goes to stdout.
async fn run_headless(cli: &Cli, script: PathBuf, settings: &RunSettings) -> Result<i32> {
    let Some(command) = cli.command else {
        bail!("--no-ui needs a command, e.g. `kima-ui --no-ui search vim`");
    };
    let invocation = Invocation::new(command, cli.argument.as_deref().unwrap_or_default());
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let mut runner = ProcessRunner::new(script, event_tx.clone());
    spawn_signal_listener(event_tx);

    if let Err(err) = runner.start(&invocation) {
        tracing::error!(command = %invocation.command, error = %err, "launch failed");
        eprintln!("Error: {}", err);
        return Ok(EXIT_LAUNCH_FAILED);
    }

    let mut echo = LiveEcho::default();
    while let Some(event) = event_rx.recv().await {
        match event {
            Event::Runner(RunnerEvent::Output { stream, text, .. }) => {
                eprint!("{}", echo.render(stream, &text));
            }
            Event::Runner(RunnerEvent::Completed {
                run_id,
                command,
                record,
                outcome,
            }) => {
                if let Some(newline) = echo.finish() {
                    eprint!("{}", newline);
                }
                runner.on_completion(run_id);
                print_classified(&classify(command, &record.combined()), settings.json)?;
                return Ok(match outcome {
                    RunOutcome::Cancelled => EXIT_CANCELLED,
                    RunOutcome::Exited { code } => code.unwrap_or(1),
                });
            }
            Event::Shutdown { signal } => {
                tracing::info!(signal = signal.label(), "stopping headless run");
                runner.stop();
            }
            _ => {}
        }
    }
    bail!("runner channel closed before the command completed")
}

fn print_classified(classified: &Classified, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(classified).context("failed to encode result as JSON")?;
        println!("{}", rendered);
        return Ok(());
    }
    match classified {
        Classified::Search(entries) => {
            let name_width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
            let version_width = entries.iter().map(|e| e.version.len()).max().unwrap_or(0);
            for entry in entries {
                println!(
                    "{:<name_width$}  {:<version_width$}  {}",
                    entry.name, entry.version, entry.description
                );
            }
        }
        Classified::Info(text) => println!("{}", text.to_plain_text()),
        Classified::Plain(text) => print!("{}", text),
    }
    Ok(())
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            let sent = match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    tx.blocking_send(Event::Key(key))
                }
                Ok(crossterm::event::Event::Resize(width, height)) => {
                    tx.blocking_send(Event::Resize { width, height })
                }
                _ => Ok(()),
            };
            if sent.is_err() {
                break;
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            loop {
                let signal = tokio::select! {
                    _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
                    _ = sigterm.recv() => ShutdownSignal::Terminate,
                };
                if tx.send(Event::Shutdown { signal }).await.is_err() {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            while tokio::signal::ctrl_c().await.is_ok() {
                let signal = ShutdownSignal::Interrupt;
                if tx.send(Event::Shutdown { signal }).await.is_err() {
                    break;
                }
            }
        }
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
