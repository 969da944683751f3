//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on exit,
//! and drawing the control panel, result tabs, console and dialogs with `ratatui`.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Tabs, Wrap,
};
use ratatui::{Frame, Terminal};

use crate::app::{App, Focus, NotificationKind, StatusLevel};
use crate::command::ResultView;
use crate::output::{sanitize_text, ConsoleSource, StreamKind};

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const ARGUMENT_PLACEHOLDER: &str = "Package name or search term (if applicable)";
const TAB_TITLES: [&str; 3] = ["Search Results", "Package Info", "Output"];

/// Initializes the terminal for TUI mode.
///
/// Enables raw mode, enters the alternate screen, and creates a `ratatui` Terminal instance.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws the current application state to the terminal.
pub fn draw(app: &mut App, terminal: &mut TuiTerminal) -> io::Result<()> {
    let title = window_title(app);
    execute!(terminal.backend_mut(), SetTitle(title))?;
    terminal.draw(|frame| render(app, frame))?;
    Ok(())
}

fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.size();
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(50),
            Constraint::Min(5),
            Constraint::Length(4),
        ])
        .split(area);

    render_controls(app, frame, vertical[0]);
    render_results(app, frame, vertical[1]);
    render_console(app, frame, vertical[2]);
    render_status(app, frame, vertical[3]);

    if let Some(notification) = &app.notification {
        let (title, color) = match notification.kind {
            NotificationKind::Success => ("Success", Color::Green),
            NotificationKind::Failure => ("Failure", Color::Red),
        };
        let popup = centered_rect(50, 25, area);
        let body = Paragraph::new(Text::from(vec![
            Line::from(notification.message.clone()),
            Line::from(""),
            Line::from(Span::styled(
                "Enter to dismiss",
                Style::default().fg(Color::DarkGray),
            )),
        ]))
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(color)),
        );
        frame.render_widget(Clear, popup);
        frame.render_widget(body, popup);
    } else if app.show_help {
        let popup = centered_rect(60, 60, area);
        let help_text = [
            "Controls:",
            "  Up/Down    Select command",
            "  Tab        Switch between command and argument",
            "  Enter/F5   Run the selected command",
            "  Esc        Stop the running command",
            "",
            "Results:",
            "  Left/Right Switch result tab (command focus)",
            "  Ctrl+T     Next result tab",
            "  Ctrl+Y     Copy the active tab",
            "  Shift+Up/Down, Shift+PgUp/PgDn  Scroll results",
            "",
            "Console:",
            "  PgUp/PgDn  Scroll",
            "  Home/End   Oldest / follow",
            "  Ctrl+L     Clear",
            "",
            "General:",
            "  ?          Toggle this help",
            "  q / Ctrl+Q Quit",
        ]
        .join("\n");
        let help = Paragraph::new(help_text)
            .block(
                Block::default()
                    .title("Help")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            )
            .style(Style::default().bg(Color::DarkGray).fg(Color::White));
        frame.render_widget(Clear, popup);
        frame.render_widget(help, popup);
    }
}

fn render_controls(app: &App, frame: &mut Frame, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(18),
            Constraint::Min(10),
            Constraint::Length(12),
        ])
        .split(area);

    let command = app.selected_command();
    let arrows = if app.use_symbols { ("◀ ", " ▶") } else { ("< ", " >") };
    let selector = Paragraph::new(Line::from(vec![
        Span::styled(arrows.0, Style::default().fg(Color::DarkGray)),
        Span::styled(
            command.as_str(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled(arrows.1, Style::default().fg(Color::DarkGray)),
    ]))
    .block(panel("Command", app.focus == Focus::Command));
    frame.render_widget(selector, columns[0]);

    let argument = if app.argument.is_empty() && app.focus != Focus::Argument {
        let hint = if command.takes_argument() {
            ARGUMENT_PLACEHOLDER
        } else {
            "(not needed)"
        };
        Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray)))
    } else {
        let cursor = if app.focus == Focus::Argument {
            if app.use_symbols {
                "▌"
            } else {
                "|"
            }
        } else {
            ""
        };
        Line::from(vec![Span::raw(app.argument.clone()), Span::raw(cursor)])
    };
    frame.render_widget(
        Paragraph::new(argument).block(panel("Argument", app.focus == Focus::Argument)),
        columns[1],
    );

    let (label, color) = if app.is_running() {
        ("Stop [Esc]", Color::Red)
    } else {
        ("Run [Enter]", Color::Green)
    };
    frame.render_widget(
        Paragraph::new(Span::styled(
            label,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))
        .block(panel("", false)),
        columns[2],
    );
}

fn render_results(app: &mut App, frame: &mut Frame, area: Rect) {
    let title = if app.result_scroll > 0 {
        format!("Results (row {}/{})", app.result_scroll + 1, app.result_rows())
    } else {
        "Results".to_string()
    };
    let block = panel(&title, false);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);

    let selected = match app.active_tab {
        ResultView::Search => 0,
        ResultView::Info => 1,
        ResultView::Text => 2,
    };
    let tabs = Tabs::new(TAB_TITLES.to_vec())
        .select(selected)
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, rows[0]);

    let body = rows[1];
    app.results_height = body.height as usize;
    let scroll = app.result_scroll.min(u16::MAX as usize) as u16;
    match app.active_tab {
        ResultView::Search => {
            if app.search_results.is_empty() {
                frame.render_widget(empty_hint("No results"), body);
                return;
            }
            let header = Row::new(vec!["Name", "Version", "Description"])
                .style(Style::default().add_modifier(Modifier::BOLD));
            let rows = app.search_results.iter().map(|entry| {
                Row::new(vec![
                    Cell::from(entry.name.clone()),
                    Cell::from(entry.version.clone()),
                    Cell::from(entry.description.clone()),
                ])
            });
            let table = Table::new(
                rows,
                [
                    Constraint::Percentage(25),
                    Constraint::Percentage(15),
                    Constraint::Percentage(60),
                ],
            )
            .header(header)
            .column_spacing(1);
            let mut state = TableState::default();
            *state.offset_mut() = app.result_scroll;
            frame.render_stateful_widget(table, body, &mut state);
        }
        ResultView::Info => {
            if app.info.lines.is_empty() {
                frame.render_widget(empty_hint("No package info"), body);
                return;
            }
            let lines = app
                .info
                .lines
                .iter()
                .map(|segments| {
                    Line::from(
                        segments
                            .iter()
                            .map(|segment| {
                                let style = if segment.strong {
                                    Style::default().add_modifier(Modifier::BOLD)
                                } else {
                                    Style::default()
                                };
                                Span::styled(segment.text.clone(), style)
                            })
                            .collect::<Vec<_>>(),
                    )
                })
                .collect::<Vec<_>>();
            frame.render_widget(
                Paragraph::new(lines)
                    .wrap(Wrap { trim: false })
                    .scroll((scroll, 0)),
                body,
            );
        }
        ResultView::Text => {
            if app.text.is_empty() {
                frame.render_widget(empty_hint("No output yet"), body);
                return;
            }
            let text = strip_carriage(&sanitize_text(&app.text));
            frame.render_widget(
                Paragraph::new(text)
                    .wrap(Wrap { trim: false })
                    .scroll((scroll, 0)),
                body,
            );
        }
    }
}

fn render_console(app: &mut App, frame: &mut Frame, area: Rect) {
    let title = if app.console_scroll > 0 {
        format!("Console (scrolled {} lines)", app.console_scroll)
    } else {
        "Console".to_string()
    };
    let block = panel(&title, false);
    let inner = block.inner(area);
    app.set_console_height(inner.height as usize);

    let height = inner.height as usize;
    let total = app.console.len();
    let end = total.saturating_sub(app.console_scroll);
    let start = end.saturating_sub(height);
    let lines = app
        .console
        .iter()
        .skip(start)
        .take(end - start)
        .map(|line| {
            let style = match line.source {
                ConsoleSource::Stream(StreamKind::Stdout) => Style::default(),
                ConsoleSource::Stream(StreamKind::Stderr) => Style::default().fg(Color::Red),
                ConsoleSource::Tool => Style::default().fg(Color::Cyan),
            };
            let text = truncate(
                &strip_carriage(&sanitize_text(&line.text)),
                inner.width as usize,
            );
            Line::from(Span::styled(text, style))
        })
        .collect::<Vec<_>>();

    frame.render_widget(Paragraph::new(lines).block(block), area);
    if total == 0 {
        frame.render_widget(empty_hint("Console is empty"), inner);
    }
}

fn render_status(app: &App, frame: &mut Frame, area: Rect) {
    let default_help = if app.use_symbols {
        "↑/↓ command | Tab argument | Enter run | Esc stop | Ctrl+T tab | Shift+↑/↓ scroll | Ctrl+Y copy | ? help | q quit"
    } else {
        "Up/Down command | Tab argument | Enter run | Esc stop | Ctrl+T tab | Shift+Up/Dn scroll | Ctrl+Y copy | ? help | q quit"
    };
    let help_line = match app.status_message() {
        Some((text, StatusLevel::Warning)) => {
            Span::styled(text.to_string(), Style::default().fg(Color::Yellow))
        }
        Some((text, StatusLevel::Info)) => Span::raw(text.to_string()),
        None => Span::styled(default_help, Style::default().fg(Color::DarkGray)),
    };
    let status = Paragraph::new(Text::from(vec![
        Line::from(Span::raw(app.status_line())),
        Line::from(help_line),
    ]))
    .block(panel("", false));
    frame.render_widget(status, area);
}

fn panel(title: &str, focused: bool) -> Block<'static> {
    let border = if focused {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border)
}

fn empty_hint(text: &'static str) -> Paragraph<'static> {
    Paragraph::new(text).style(Style::default().fg(Color::DarkGray))
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn window_title(app: &App) -> String {
    match app.running_command() {
        Some(command) => format!("kima {} (running)", command),
        None => "kima".to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// Progress bars redraw with bare carriage returns; keep only the last frame.
fn strip_carriage(text: &str) -> String {
    text.lines()
        .map(|line| line.rsplit('\r').next().unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
        assert_eq!(truncate("abc", 0), "");
    }

    #[test]
    fn scrolled_text_view_starts_at_the_offset() {
        let backend = ratatui::backend::TestBackend::new(60, 30);
        let mut terminal = Terminal::new(backend).unwrap();
        let mut app = App::new(100, false);
        app.text = (0..40).map(|i| format!("row{:02}\n", i)).collect();
        app.result_scroll = 5;
        terminal.draw(|frame| render(&mut app, frame)).unwrap();

        let screen: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(screen.contains("row05"));
        assert!(!screen.contains("row04"));
        assert!(app.results_height > 0);
    }

    #[test]
    fn strip_carriage_keeps_last_frame() {
        assert_eq!(strip_carriage("10%\r50%\r100%\ndone"), "100%\ndone");
    }
}
