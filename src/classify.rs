//! Routing of captured script output into the result views.
//!
//! Everything here is a pure function of `(command, raw output)`. Search output is
//! split into table rows with a whitespace heuristic, info output is marked up
//! for display, and everything else passes through verbatim.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::command::{Command, ResultView};
use crate::output::sanitize_text;

pub const MISSING_VERSION: &str = "N/A";
pub const MISSING_DESCRIPTION: &str = "No description available";

/// Field labels emphasised in `info` output.
const INFO_LABELS: [&str; 5] = ["Name", "Version", "Description", "Size", "Repository"];

/// One row of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedEntry {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// A run of text with optional emphasis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    pub strong: bool,
}

/// Preformatted text split into explicit lines of styled segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RichText {
    pub lines: Vec<Vec<Segment>>,
}

impl RichText {
    pub fn to_plain_text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.iter().map(|s| s.text.as_str()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Renderable content for one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", content = "data", rename_all = "snake_case")]
pub enum Classified {
    Search(Vec<ParsedEntry>),
    Info(RichText),
    Plain(String),
}

impl Classified {
    pub fn view(&self) -> ResultView {
        match self {
            Classified::Search(_) => ResultView::Search,
            Classified::Info(_) => ResultView::Info,
            Classified::Plain(_) => ResultView::Text,
        }
    }

    /// Tab-separated rows for search results, plain text otherwise.
    pub fn to_plain_text(&self) -> String {
        match self {
            Classified::Search(entries) => entries
                .iter()
                .map(|e| format!("{}\t{}\t{}", e.name, e.version, e.description))
                .collect::<Vec<_>>()
                .join("\n"),
            Classified::Info(text) => text.to_plain_text(),
            Classified::Plain(text) => text.clone(),
        }
    }
}

/// Classifies the full output of a run according to the command that produced it.
pub fn classify(command: Command, raw: &str) -> Classified {
    match command.view() {
        ResultView::Search => Classified::Search(parse_search_results(raw)),
        ResultView::Info => Classified::Info(format_info(raw)),
        ResultView::Text => Classified::Plain(raw.to_string()),
    }
}

/// Extracts `(name, version, description)` rows from search output.
///
/// The first token is the name, the second the version and the remaining tokens,
/// joined by single spaces, the description. Row order follows line order.
pub fn parse_search_results(raw: &str) -> Vec<ParsedEntry> {
    let cleaned = sanitize_text(raw);
    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_decoration(line) && !is_header(line))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let name = tokens.next()?.to_string();
            let version = tokens
                .next()
                .map(str::to_string)
                .unwrap_or_else(|| MISSING_VERSION.to_string());
            let rest = tokens.collect::<Vec<_>>();
            let description = if rest.is_empty() {
                MISSING_DESCRIPTION.to_string()
            } else {
                rest.join(" ")
            };
            Some(ParsedEntry {
                name,
                version,
                description,
            })
        })
        .collect()
}

/// Marks up `info` output: one rich line per output line, field labels in bold.
pub fn format_info(raw: &str) -> RichText {
    let cleaned = sanitize_text(raw);
    let pattern = label_pattern();
    let lines = cleaned
        .lines()
        .map(|line| {
            let mut segments = Vec::new();
            let mut last = 0;
            for found in pattern.find_iter(line) {
                if found.start() > last {
                    segments.push(Segment {
                        text: line[last..found.start()].to_string(),
                        strong: false,
                    });
                }
                segments.push(Segment {
                    text: found.as_str().to_string(),
                    strong: true,
                });
                last = found.end();
            }
            if last < line.len() {
                segments.push(Segment {
                    text: line[last..].to_string(),
                    strong: false,
                });
            }
            segments
        })
        .collect();
    RichText { lines }
}

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternatives = INFO_LABELS.join("|");
        Regex::new(&format!(r"\b(?:{}):", alternatives)).expect("info label pattern is valid")
    })
}

// Rules, borders and box-drawing frames.
fn is_decoration(line: &str) -> bool {
    line.chars().all(|c| {
        c.is_whitespace()
            || matches!(c, '-' | '=' | '_' | '*' | '~' | '#' | '+' | '|' | '.' | ':')
            || ('\u{2500}'..='\u{259f}').contains(&c)
    })
}

fn is_header(line: &str) -> bool {
    if line.contains("Search Results") {
        return true;
    }
    let first = line.split_whitespace().next().unwrap_or_default();
    matches!(first.trim_end_matches(':'), "Package" | "Name")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, version: &str, description: &str) -> ParsedEntry {
        ParsedEntry {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    #[test]
    fn full_search_line_splits_into_three_fields() {
        let entries = parse_search_results("libfoo  2.3.1  Fast foo utility");
        assert_eq!(entries, vec![entry("libfoo", "2.3.1", "Fast foo utility")]);
    }

    #[test]
    fn name_only_line_gets_defaults() {
        let entries = parse_search_results("libbar");
        assert_eq!(
            entries,
            vec![entry("libbar", "N/A", "No description available")]
        );
    }

    #[test]
    fn decorations_and_headers_are_skipped() {
        let raw = "\u{1b}[1;34m=== Search Results for 'foo' ===\u{1b}[0m\n\
                   Package      Version   Description\n\
                   ----------------------------------\n\
                   \n\
                   \u{1b}[32mfoo\u{1b}[0m 1.0 the   foo\n\
                   ──────────────\n\
                   foo-extra 2.0\n";
        let entries = parse_search_results(raw);
        assert_eq!(
            entries,
            vec![
                entry("foo", "1.0", "the foo"),
                entry("foo-extra", "2.0", "No description available"),
            ]
        );
        assert!(entries.iter().all(|e| !e.name.is_empty()));
    }

    #[test]
    fn name_header_is_skipped() {
        assert!(parse_search_results("Name Version Description").is_empty());
        assert!(parse_search_results("Name: something").is_empty());
    }

    #[test]
    fn info_labels_are_emphasised() {
        let text = format_info("Name: vim\nVersion: 9.1\nInstalled from: core\n");
        assert_eq!(text.lines.len(), 3);
        assert_eq!(
            text.lines[0],
            vec![
                Segment {
                    text: "Name:".into(),
                    strong: true
                },
                Segment {
                    text: " vim".into(),
                    strong: false
                },
            ]
        );
        assert!(text.lines[2].iter().all(|s| !s.strong));
        assert_eq!(
            text.to_plain_text(),
            "Name: vim\nVersion: 9.1\nInstalled from: core"
        );
    }

    #[test]
    fn info_strips_ansi_and_keeps_blank_lines() {
        let text = format_info("\u{1b}[1mSize:\u{1b}[0m 2 MiB\n\nRepository: extra");
        assert_eq!(text.lines.len(), 3);
        assert!(text.lines[1].is_empty());
        assert_eq!(text.lines[0][0].text, "Size:");
        assert!(text.lines[2][0].strong);
    }

    #[test]
    fn other_commands_pass_through_verbatim() {
        let raw = "\u{1b}[33mwarning\u{1b}[0m: stuff\n";
        assert_eq!(
            classify(Command::List, raw),
            Classified::Plain(raw.to_string())
        );
    }

    #[test]
    fn classification_is_repeatable() {
        let raw = "foo 1.0 a\nbar\n";
        assert_eq!(classify(Command::Search, raw), classify(Command::Search, raw));
        assert_eq!(classify(Command::Info, raw), classify(Command::Info, raw));
    }
}
