//! Application state and UI logic.
//!
//! `App` is the presentation shell: it holds the control panel (command selector
//! and argument field), the three result views, the live console and the modal
//! notification. Key presses become `AppAction`s for the event loop, and runner
//! events are folded in through the `on_*` methods.

use std::path::Path;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::classify::{classify, Classified, ParsedEntry, RichText};
use crate::command::{Command, Invocation, ResultView};
use crate::events::RunOutcome;
use crate::output::{ConsoleBuffer, OutputRecord, StreamKind};
use crate::runner::{LaunchError, RunState};

/// Which control receives typed keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Command,
    Argument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Failure,
}

/// Modal dialog shown once per completed (not cancelled) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

/// Actions resulting from user interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// No action required.
    None,
    /// Start the script with this invocation.
    Run(Invocation),
    /// Stop the running script.
    Stop,
    /// Exit the application.
    Quit,
    /// Copy the active result view to the clipboard.
    Copy,
}

#[derive(Debug, Clone, Copy)]
pub enum StatusLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone)]
struct StatusMessage {
    text: String,
    at: Instant,
    ttl: Option<Duration>,
    level: StatusLevel,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    command: Command,
    started_at: Instant,
}

/// The main application state container.
#[derive(Debug)]
pub struct App {
    /// Index into `Command::ALL` of the selected command.
    pub selected: usize,
    /// Free-text argument (package name or search term).
    pub argument: String,
    pub focus: Focus,
    pub run_state: RunState,
    /// Result tab currently displayed.
    pub active_tab: ResultView,
    pub search_results: Vec<ParsedEntry>,
    pub info: RichText,
    pub text: String,
    /// First visible row of the active result view.
    pub result_scroll: usize,
    /// Height of the result body area (for paging).
    pub results_height: usize,
    /// Live console; survives across runs until cleared.
    pub console: ConsoleBuffer,
    /// Console lines scrolled up from the bottom; 0 follows new output.
    pub console_scroll: usize,
    /// Height of the console area (for scrolling calculations).
    pub console_height: usize,
    pub notification: Option<Notification>,
    /// Whether to use Unicode symbols.
    pub use_symbols: bool,
    /// Whether to show the help overlay.
    pub show_help: bool,
    /// Flag indicating if the application should exit.
    pub should_quit: bool,
    /// Summary of the last finished run, shown in the status bar.
    pub last_result: Option<String>,
    active: Option<ActiveRun>,
    status_message: Option<StatusMessage>,
}

impl App {
    pub fn new(max_lines: usize, use_symbols: bool) -> Self {
        Self {
            selected: 0,
            argument: String::new(),
            focus: Focus::Command,
            run_state: RunState::Idle,
            active_tab: ResultView::Text,
            search_results: Vec::new(),
            info: RichText::default(),
            text: String::new(),
            result_scroll: 0,
            results_height: 0,
            console: ConsoleBuffer::new(max_lines),
            console_scroll: 0,
            console_height: 0,
            notification: None,
            use_symbols,
            show_help: false,
            should_quit: false,
            last_result: None,
            active: None,
            status_message: None,
        }
    }

    pub fn selected_command(&self) -> Command {
        Command::ALL[self.selected % Command::ALL.len()]
    }

    pub fn select_command(&mut self, command: Command) {
        self.selected = command.index();
    }

    /// Command of the run in flight, if any.
    pub fn running_command(&self) -> Option<Command> {
        self.active.as_ref().map(|run| run.command)
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    /// Builds the invocation for the current controls, unless a run is already active.
    pub fn request_run(&mut self) -> AppAction {
        if self.is_running() {
            let running = self
                .active
                .as_ref()
                .map(|run| run.command.as_str())
                .unwrap_or("a command");
            self.set_status_warning_for(
                format!("{} is still running; press Esc to stop it", running),
                Duration::from_secs(3),
            );
            return AppAction::None;
        }
        AppAction::Run(Invocation::new(self.selected_command(), &self.argument))
    }

    pub fn on_run_started(&mut self, invocation: &Invocation, script: &Path) {
        self.run_state = RunState::Running;
        self.active = Some(ActiveRun {
            command: invocation.command,
            started_at: Instant::now(),
        });
        self.search_results.clear();
        self.info = RichText::default();
        self.text.clear();
        self.result_scroll = 0;
        self.notification = None;
        self.push_tool(format!("$ {}", invocation.display(script)));
        self.set_status_message(format!("Running {}", invocation.command));
    }

    /// The script never started; the error is reported as output text.
    pub fn on_launch_failed(&mut self, invocation: &Invocation, error: &LaunchError) {
        let message = format!("failed to run {}: {}", invocation.command, error);
        self.push_tool(message.clone());
        if !matches!(error, LaunchError::Busy(_)) {
            self.search_results.clear();
            self.info = RichText::default();
            self.text = message.clone();
            self.active_tab = ResultView::Text;
        }
        self.set_status_warning_for(message, Duration::from_secs(5));
    }

    /// Appends a chunk of live output; a partial line is continued by the next chunk.
    pub fn on_output(&mut self, stream: StreamKind, text: &str) {
        let (added, dropped) = self.console.push_chunk(stream, text);
        self.keep_scroll_position(added, dropped);
    }

    /// Routes the finished run's output to its result view and reports the outcome.
    pub fn on_completed(&mut self, command: Command, record: &OutputRecord, outcome: RunOutcome) {
        self.run_state = RunState::Idle;
        let elapsed = self
            .active
            .take()
            .map(|run| format_duration(run.started_at.elapsed()))
            .unwrap_or_default();

        self.apply_classified(classify(command, &record.combined()));

        let summary = match outcome {
            RunOutcome::Cancelled => {
                self.push_tool(format!("{} cancelled", command));
                self.set_status_message(format!("{} cancelled", command));
                format!("{} cancelled after {}", command, elapsed)
            }
            RunOutcome::Exited { code: Some(0) } => {
                self.push_tool(format!("{} finished with exit code 0", command));
                self.set_status_message(format!("{} completed (exit code 0)", command));
                self.notification = Some(Notification {
                    kind: NotificationKind::Success,
                    message: format!("Command '{}' completed successfully.", command),
                });
                format!("{} succeeded (exit code 0) in {}", command, elapsed)
            }
            RunOutcome::Exited { code } => {
                let detail = match code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by a signal".to_string(),
                };
                self.push_tool(format!("{} failed with {}", command, detail));
                self.set_status_warning_for(
                    format!("{} failed ({})", command, detail),
                    Duration::from_secs(5),
                );
                self.notification = Some(Notification {
                    kind: NotificationKind::Failure,
                    message: format!("Command '{}' failed ({}).", command, detail),
                });
                format!("{} failed ({}) in {}", command, detail, elapsed)
            }
        };
        self.last_result = Some(summary);
    }

    fn apply_classified(&mut self, classified: Classified) {
        self.active_tab = classified.view();
        self.result_scroll = 0;
        match classified {
            Classified::Search(entries) => self.search_results = entries,
            Classified::Info(text) => self.info = text,
            Classified::Plain(text) => self.text = text,
        }
    }

    /// Plain-text rendering of the tab currently shown.
    pub fn active_view_text(&self) -> String {
        match self.active_tab {
            ResultView::Search => Classified::Search(self.search_results.clone()).to_plain_text(),
            ResultView::Info => self.info.to_plain_text(),
            ResultView::Text => self.text.clone(),
        }
    }

    /// Number of rows in the active result view.
    pub fn result_rows(&self) -> usize {
        match self.active_tab {
            ResultView::Search => self.search_results.len(),
            ResultView::Info => self.info.lines.len(),
            ResultView::Text => self.text.lines().count(),
        }
    }

    // Wrapped text can render taller than its row count, so the last row may scroll to the top.
    fn max_result_scroll(&self) -> usize {
        self.result_rows().saturating_sub(1)
    }

    pub fn scroll_results_up(&mut self, amount: usize) {
        self.result_scroll = self.result_scroll.saturating_sub(amount);
    }

    pub fn scroll_results_down(&mut self, amount: usize) {
        self.result_scroll = (self.result_scroll + amount).min(self.max_result_scroll());
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);
        if ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q')) {
            self.should_quit = true;
            return AppAction::Quit;
        }
        if self.notification.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                self.notification = None;
            }
            return AppAction::None;
        }
        if self.show_help {
            self.show_help = false;
            return AppAction::None;
        }
        if ctrl {
            return self.handle_control_key(key.code);
        }
        if shift {
            let page = self.results_height.max(1);
            match key.code {
                KeyCode::Up => self.scroll_results_up(1),
                KeyCode::Down => self.scroll_results_down(1),
                KeyCode::PageUp => self.scroll_results_up(page),
                KeyCode::PageDown => self.scroll_results_down(page),
                KeyCode::Home => self.result_scroll = 0,
                KeyCode::End => self.result_scroll = self.max_result_scroll(),
                _ => return self.handle_plain_key(key),
            }
            return AppAction::None;
        }
        self.handle_plain_key(key)
    }

    fn handle_plain_key(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Enter | KeyCode::F(5) => self.request_run(),
            KeyCode::Esc => {
                if self.is_running() {
                    AppAction::Stop
                } else {
                    AppAction::None
                }
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.focus = match self.focus {
                    Focus::Command => Focus::Argument,
                    Focus::Argument => Focus::Command,
                };
                AppAction::None
            }
            KeyCode::Up => {
                self.cycle_command(false);
                AppAction::None
            }
            KeyCode::Down => {
                self.cycle_command(true);
                AppAction::None
            }
            KeyCode::PageUp => {
                self.scroll_up(self.console_height.max(1));
                AppAction::None
            }
            KeyCode::PageDown => {
                self.scroll_down(self.console_height.max(1));
                AppAction::None
            }
            KeyCode::Home => {
                self.console_scroll = self.max_scroll();
                AppAction::None
            }
            KeyCode::End => {
                self.console_scroll = 0;
                AppAction::None
            }
            _ => match self.focus {
                Focus::Command => self.handle_command_key(key.code),
                Focus::Argument => self.handle_argument_key(key.code),
            },
        }
    }

    fn handle_control_key(&mut self, code: KeyCode) -> AppAction {
        match code {
            KeyCode::Char('l') => {
                self.console.clear();
                self.console_scroll = 0;
                self.set_status_message("console cleared");
                AppAction::None
            }
            KeyCode::Char('t') => {
                self.cycle_tab(true);
                AppAction::None
            }
            KeyCode::Char('y') => AppAction::Copy,
            _ => AppAction::None,
        }
    }

    fn handle_command_key(&mut self, code: KeyCode) -> AppAction {
        match code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Char('?') => {
                self.show_help = true;
                AppAction::None
            }
            KeyCode::Char('k') => {
                self.cycle_command(false);
                AppAction::None
            }
            KeyCode::Char('j') => {
                self.cycle_command(true);
                AppAction::None
            }
            KeyCode::Left => {
                self.cycle_tab(false);
                AppAction::None
            }
            KeyCode::Right => {
                self.cycle_tab(true);
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    fn handle_argument_key(&mut self, code: KeyCode) -> AppAction {
        match code {
            KeyCode::Backspace => {
                self.argument.pop();
            }
            KeyCode::Char(c) => self.argument.push(c),
            _ => {}
        }
        AppAction::None
    }

    fn cycle_command(&mut self, forward: bool) {
        let len = Command::ALL.len();
        self.selected = if forward {
            (self.selected + 1) % len
        } else {
            (self.selected + len - 1) % len
        };
    }

    fn cycle_tab(&mut self, forward: bool) {
        const TABS: [ResultView; 3] = [ResultView::Search, ResultView::Info, ResultView::Text];
        let current = TABS
            .iter()
            .position(|tab| *tab == self.active_tab)
            .unwrap_or_default();
        let next = if forward {
            (current + 1) % TABS.len()
        } else {
            (current + TABS.len() - 1) % TABS.len()
        };
        self.active_tab = TABS[next];
        self.result_scroll = 0;
    }

    pub fn push_tool(&mut self, text: String) {
        let message = if self.use_symbols {
            format!("◆ kima: {}", text)
        } else {
            format!("[kima] {}", text)
        };
        let dropped = self.console.push_tool(message);
        self.keep_scroll_position(1, dropped);
    }

    // A scrolled-back console stays on the same lines while output arrives.
    fn keep_scroll_position(&mut self, added: usize, dropped: bool) {
        if self.console_scroll > 0 && !dropped {
            self.console_scroll = (self.console_scroll + added).min(self.max_scroll());
        }
    }

    fn max_scroll(&self) -> usize {
        self.console.len().saturating_sub(self.console_height.max(1))
    }

    pub fn scroll_up(&mut self, amount: usize) {
        self.console_scroll = (self.console_scroll + amount).min(self.max_scroll());
    }

    pub fn scroll_down(&mut self, amount: usize) {
        self.console_scroll = self.console_scroll.saturating_sub(amount);
    }

    pub fn set_console_height(&mut self, height: usize) {
        self.console_height = height;
        self.console_scroll = self.console_scroll.min(self.max_scroll());
    }

    pub fn status_line(&self) -> String {
        let divider = if self.use_symbols { " · " } else { " | " };
        match &self.active {
            Some(run) => format!(
                "Running {}{}{}{}Esc to stop",
                run.command,
                divider,
                format_duration(run.started_at.elapsed()),
                divider
            ),
            None => match &self.last_result {
                Some(last) => format!("Idle{}last: {}", divider, last),
                None => "Idle".to_string(),
            },
        }
    }

    pub fn status_message(&self) -> Option<(&str, StatusLevel)> {
        let message = self.status_message.as_ref()?;
        if let Some(ttl) = message.ttl {
            if message.at.elapsed() > ttl {
                return None;
            }
        }
        Some((message.text.as_str(), message.level))
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Info, Some(Duration::from_secs(4)));
    }

    pub fn set_status_warning_for(&mut self, message: impl Into<String>, ttl: Duration) {
        self.set_status_message_with_level(message, StatusLevel::Warning, Some(ttl));
    }

    pub fn set_status_warning_persistent(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Warning, None);
    }

    fn set_status_message_with_level(
        &mut self,
        message: impl Into<String>,
        level: StatusLevel,
        ttl: Option<Duration>,
    ) {
        self.status_message = Some(StatusMessage {
            text: message.into(),
            at: Instant::now(),
            ttl,
            level,
        });
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let minutes = secs / 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}", minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn record(stdout: &str, stderr: &str, code: Option<i32>) -> OutputRecord {
        OutputRecord {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: code,
        }
    }

    fn start(app: &mut App) -> Invocation {
        let AppAction::Run(invocation) = app.handle_key(key(KeyCode::Enter)) else {
            panic!("expected a run action");
        };
        app.on_run_started(&invocation, &PathBuf::from("kima.sh"));
        invocation
    }

    #[test]
    fn typing_fills_the_argument_and_enter_builds_the_invocation() {
        let mut app = App::new(100, false);
        app.select_command(Command::Install);
        app.handle_key(key(KeyCode::Tab));
        for c in " vim ".chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
        app.handle_key(key(KeyCode::Backspace));
        let action = app.handle_key(key(KeyCode::Enter));
        assert_eq!(
            action,
            AppAction::Run(Invocation {
                command: Command::Install,
                argument: Some("vim".into()),
            })
        );
    }

    #[test]
    fn second_run_is_rejected_while_running() {
        let mut app = App::new(100, false);
        app.select_command(Command::Update);
        let invocation = start(&mut app);
        assert_eq!(invocation.argument, None);
        assert!(app.is_running());
        assert_eq!(app.handle_key(key(KeyCode::Enter)), AppAction::None);
        assert!(app.status_message().unwrap().0.contains("still running"));
        assert_eq!(app.handle_key(key(KeyCode::Esc)), AppAction::Stop);
    }

    #[test]
    fn failed_run_shows_failure_and_exit_code() {
        let mut app = App::new(100, false);
        app.select_command(Command::Install);
        start(&mut app);
        app.on_output(StreamKind::Stderr, "not found\n");
        app.on_completed(
            Command::Install,
            &record("", "not found\n", Some(1)),
            RunOutcome::Exited { code: Some(1) },
        );

        assert_eq!(app.run_state, RunState::Idle);
        let notification = app.notification.clone().unwrap();
        assert_eq!(notification.kind, NotificationKind::Failure);
        assert!(notification.message.contains("exit code 1"));
        assert!(app.last_result.as_deref().unwrap().contains("exit code 1"));
        assert!(app.console.iter().any(|l| l.text == "ERROR: not found"));
        assert_eq!(app.active_tab, ResultView::Text);
        assert_eq!(app.text, "\nnot found\n");
    }

    #[test]
    fn successful_search_fills_the_table() {
        let mut app = App::new(100, false);
        app.select_command(Command::Search);
        start(&mut app);
        app.on_completed(
            Command::Search,
            &record("libfoo  2.3.1  Fast foo utility\nlibbar\n", "", Some(0)),
            RunOutcome::Exited { code: Some(0) },
        );
        assert_eq!(app.active_tab, ResultView::Search);
        assert_eq!(app.search_results.len(), 2);
        assert_eq!(app.search_results[1].version, "N/A");
        assert_eq!(
            app.notification.as_ref().map(|n| n.kind),
            Some(NotificationKind::Success)
        );
        assert_eq!(
            app.active_view_text(),
            "libfoo\t2.3.1\tFast foo utility\nlibbar\tN/A\tNo description available"
        );
    }

    #[test]
    fn cancellation_returns_to_idle_without_a_dialog() {
        let mut app = App::new(100, false);
        app.select_command(Command::Upgrade);
        start(&mut app);
        app.on_output(StreamKind::Stdout, "partial\n");
        app.on_completed(
            Command::Upgrade,
            &record("partial\n", "", None),
            RunOutcome::Cancelled,
        );
        assert!(!app.is_running());
        assert!(app.notification.is_none());
        assert_eq!(app.text, "partial\n");
        assert!(matches!(app.request_run(), AppAction::Run(_)));
    }

    #[test]
    fn launch_failure_is_reported_as_output() {
        let mut app = App::new(100, false);
        let invocation = Invocation::new(Command::List, "");
        let error = LaunchError::NotFound(PathBuf::from("/nope/kima.sh"));
        app.on_launch_failed(&invocation, &error);
        assert!(!app.is_running());
        assert!(app.text.contains("script not found"));
        assert!(app.notification.is_none());
    }

    #[test]
    fn new_run_clears_previous_results_but_keeps_console() {
        let mut app = App::new(100, false);
        app.select_command(Command::Search);
        start(&mut app);
        app.on_completed(
            Command::Search,
            &record("foo 1.0 x\n", "", Some(0)),
            RunOutcome::Exited { code: Some(0) },
        );
        app.handle_key(key(KeyCode::Enter));
        start(&mut app);
        assert!(app.search_results.is_empty());
        assert!(app.notification.is_none());
        assert!(app.console.len() >= 3);
    }

    #[test]
    fn notification_swallows_keys_until_dismissed() {
        let mut app = App::new(100, false);
        app.notification = Some(Notification {
            kind: NotificationKind::Success,
            message: "done".into(),
        });
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), AppAction::None);
        assert!(app.notification.is_some());
        app.handle_key(key(KeyCode::Enter));
        assert!(app.notification.is_none());
    }

    #[test]
    fn control_keys() {
        let mut app = App::new(100, false);
        app.console.push_tool("x");
        app.handle_key(ctrl('l'));
        assert!(app.console.is_empty());
        assert_eq!(app.handle_key(ctrl('y')), AppAction::Copy);
        app.handle_key(ctrl('t'));
        assert_eq!(app.active_tab, ResultView::Search);
        assert_eq!(app.handle_key(ctrl('c')), AppAction::Quit);
        assert!(app.should_quit);
    }

    #[test]
    fn long_results_scroll_and_reset_on_a_new_run() {
        let mut app = App::new(100, false);
        app.select_command(Command::List);
        start(&mut app);
        let listing = (0..40).map(|i| format!("pkg{}\n", i)).collect::<String>();
        app.on_completed(
            Command::List,
            &record(&listing, "", Some(0)),
            RunOutcome::Exited { code: Some(0) },
        );
        app.notification = None;
        app.results_height = 10;
        assert_eq!(app.result_rows(), 40);

        let shift = |code| KeyEvent::new(code, KeyModifiers::SHIFT);
        app.handle_key(shift(KeyCode::Down));
        assert_eq!(app.result_scroll, 1);
        app.handle_key(shift(KeyCode::PageDown));
        assert_eq!(app.result_scroll, 11);
        app.handle_key(shift(KeyCode::End));
        assert_eq!(app.result_scroll, 39);
        app.handle_key(shift(KeyCode::PageDown));
        assert_eq!(app.result_scroll, 39);
        app.handle_key(shift(KeyCode::PageUp));
        assert_eq!(app.result_scroll, 29);
        // Unshifted paging still belongs to the console.
        app.handle_key(key(KeyCode::PageDown));
        assert_eq!(app.result_scroll, 29);

        app.handle_key(key(KeyCode::Enter));
        start(&mut app);
        assert_eq!(app.result_scroll, 0);
    }

    #[test]
    fn switching_tabs_resets_result_scroll() {
        let mut app = App::new(100, false);
        app.text = "a\nb\nc\n".into();
        app.scroll_results_down(5);
        assert_eq!(app.result_scroll, 2);
        app.handle_key(ctrl('t'));
        assert_eq!(app.result_scroll, 0);
    }

    #[test]
    fn command_selection_wraps() {
        let mut app = App::new(100, false);
        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.selected_command(), Command::Help);
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.selected_command(), Command::Install);
    }

    #[test]
    fn scrolled_console_holds_position() {
        let mut app = App::new(100, false);
        app.set_console_height(2);
        for i in 0..5 {
            app.on_output(StreamKind::Stdout, &format!("{}\n", i));
        }
        app.scroll_up(1);
        app.on_output(StreamKind::Stdout, "5\n");
        assert_eq!(app.console_scroll, 2);
        app.on_output(StreamKind::Stdout, "6");
        app.on_output(StreamKind::Stdout, "6 more\n");
        assert_eq!(app.console_scroll, 3);
        app.handle_key(key(KeyCode::End));
        assert_eq!(app.console_scroll, 0);
    }
}
