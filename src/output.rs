//! Output capture for script runs.
//!
//! Chunks read from the child are decoded here, tagged with their stream for the
//! live console (`ConsoleBuffer`), and accumulated verbatim into the per-run
//! `OutputRecord` that the classifier consumes once the run completes.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// Prefix marking standard-error lines in the shared console.
pub const STDERR_PREFIX: &str = "ERROR: ";

/// Indicates the source stream of a line of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

/// Where a console line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleSource {
    Stream(StreamKind),
    /// Messages emitted by the front-end itself (command echo, exit status).
    Tool,
}

/// A single line shown in the live console.
#[derive(Debug, Clone)]
pub struct ConsoleLine {
    pub text: String,
    pub source: ConsoleSource,
}

/// Append-only console with a fixed capacity; the oldest lines are dropped first.
#[derive(Debug, Clone)]
pub struct ConsoleBuffer {
    max_lines: usize,
    lines: VecDeque<ConsoleLine>,
    /// Stream whose unterminated line is the last line of the buffer.
    open: Option<StreamKind>,
}

impl ConsoleBuffer {
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            open: None,
        }
    }

    /// Adds a complete line to the console.
    ///
    /// Returns `true` if an old line was dropped to make room.
    pub fn push(&mut self, line: ConsoleLine) -> bool {
        self.open = None;
        let mut dropped = false;
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            dropped = true;
        }
        dropped
    }

    /// Appends a chunk of process output as it arrived.
    ///
    /// Text without a trailing newline stays open and later chunks from the same
    /// stream continue it. Output from the other stream, or a tool message,
    /// starts a new line. Returns `(added, dropped)`: how many lines were added
    /// and whether old lines were dropped to make room.
    pub fn push_chunk(&mut self, stream: StreamKind, text: &str) -> (usize, bool) {
        let mut added = 0;
        let mut dropped = false;
        for (segment, terminated) in split_chunk(text) {
            let continues = self.open == Some(stream);
            match self.lines.back_mut() {
                Some(last) if continues => {
                    last.text.push_str(segment);
                    if terminated && last.text.ends_with('\r') {
                        last.text.pop();
                    }
                }
                _ => {
                    dropped |= self.push(ConsoleLine {
                        text: console_text(stream, segment),
                        source: ConsoleSource::Stream(stream),
                    });
                    added += 1;
                }
            }
            self.open = if terminated { None } else { Some(stream) };
        }
        (added, dropped)
    }

    pub fn push_tool(&mut self, text: impl Into<String>) -> bool {
        self.push(ConsoleLine {
            text: text.into(),
            source: ConsoleSource::Tool,
        })
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.open = None;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConsoleLine> {
        self.lines.iter()
    }

    /// Console contents with ANSI codes removed, one line per row.
    pub fn plain_text(&self) -> String {
        self.lines
            .iter()
            .map(|line| sanitize_text(&line.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Accumulated output of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputRecord {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, once known. `None` while running or when killed by a signal.
    pub exit_code: Option<i32>,
}

impl OutputRecord {
    /// Appends decoded output to the matching stream exactly as the script wrote it.
    pub fn push(&mut self, stream: StreamKind, text: &str) {
        match stream {
            StreamKind::Stdout => self.stdout.push_str(text),
            StreamKind::Stderr => self.stderr.push_str(text),
        }
    }

    /// Stdout, followed by a newline-separated stderr block when stderr is non-empty.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Text shown in the console for a line of output.
pub fn console_text(stream: StreamKind, line: &str) -> String {
    match stream {
        StreamKind::Stdout => line.to_string(),
        StreamKind::Stderr => format!("{}{}", STDERR_PREFIX, line),
    }
}

/// Splits a chunk into line segments, each flagged with whether it ended in a newline.
///
/// The newline (and a `\r` right before it) is not part of the segment.
fn split_chunk(text: &str) -> impl Iterator<Item = (&str, bool)> {
    text.split_inclusive('\n').map(|segment| match segment.strip_suffix('\n') {
        Some(line) => (line.strip_suffix('\r').unwrap_or(line), true),
        None => (segment, false),
    })
}

/// Incremental lossy UTF-8 decoder for a byte stream read in arbitrary chunks.
///
/// A multi-byte sequence split across reads is held back until it completes;
/// invalid bytes become U+FFFD instead of ending the stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flushes a trailing incomplete sequence at end of stream.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Echoes live output to a plain terminal, tagging stderr the way the console does.
#[derive(Debug, Default)]
pub struct LiveEcho {
    open: Option<StreamKind>,
}

impl LiveEcho {
    pub fn render(&mut self, stream: StreamKind, text: &str) -> String {
        let mut out = String::new();
        for (segment, terminated) in split_chunk(text) {
            if self.open != Some(stream) {
                if self.open.is_some() {
                    out.push('\n');
                }
                out.push_str(&console_text(stream, segment));
            } else {
                out.push_str(segment);
            }
            if terminated {
                out.push('\n');
                self.open = None;
            } else {
                self.open = Some(stream);
            }
        }
        out
    }

    /// Newline that closes a line left open when the output ended.
    pub fn finish(&mut self) -> Option<&'static str> {
        self.open.take().map(|_| "\n")
    }
}

/// Removes ANSI escape codes for display.
pub fn sanitize_text(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_drops_oldest() {
        let mut console = ConsoleBuffer::new(2);
        console.push_tool("a");
        console.push_tool("b");
        let (added, dropped) = console.push_chunk(StreamKind::Stdout, "c\n");
        assert_eq!(added, 1);
        assert!(dropped);
        let lines = console.iter().map(|l| l.text.clone()).collect::<Vec<_>>();
        assert_eq!(lines, vec!["b", "c"]);
    }

    #[test]
    fn stderr_lines_are_prefixed() {
        let mut console = ConsoleBuffer::new(10);
        console.push_chunk(StreamKind::Stderr, "not found\n");
        console.push_chunk(StreamKind::Stdout, "ok\n");
        assert_eq!(console.plain_text(), "ERROR: not found\nok");
    }

    #[test]
    fn partial_lines_are_continued_by_the_same_stream() {
        let mut console = ConsoleBuffer::new(10);
        assert_eq!(console.push_chunk(StreamKind::Stdout, "Downloading... "), (1, false));
        assert_eq!(console.push_chunk(StreamKind::Stdout, "done\r\nnext"), (1, false));
        assert_eq!(console.plain_text(), "Downloading... done\nnext");
        console.push_chunk(StreamKind::Stderr, "warn\n");
        console.push_chunk(StreamKind::Stdout, " more\n");
        assert_eq!(
            console.plain_text(),
            "Downloading... done\nnext\nERROR: warn\n more"
        );
    }

    #[test]
    fn tool_lines_close_an_open_line() {
        let mut console = ConsoleBuffer::new(10);
        console.push_chunk(StreamKind::Stdout, "50%");
        console.push_tool("cancelled");
        console.push_chunk(StreamKind::Stdout, "60%");
        assert_eq!(console.len(), 3);
    }

    #[test]
    fn record_appends_stderr_block_only_when_present() {
        let mut record = OutputRecord::default();
        record.push(StreamKind::Stdout, "one\n");
        assert_eq!(record.combined(), "one\n");
        record.push(StreamKind::Stderr, "boom\n");
        assert_eq!(record.combined(), "one\n\nboom\n");
    }

    #[test]
    fn record_keeps_output_without_trailing_newline() {
        let mut record = OutputRecord::default();
        record.push(StreamKind::Stdout, "Downloading... ");
        record.push(StreamKind::Stdout, "done\ntail");
        assert_eq!(record.combined(), "Downloading... done\ntail");
    }

    #[test]
    fn decoder_holds_split_sequences_and_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        let euro = "€".as_bytes();
        assert_eq!(decoder.decode(&euro[..1]), "");
        assert_eq!(decoder.decode(&euro[1..]), "€");
        assert_eq!(decoder.decode(b"bad \xff byte"), "bad \u{fffd} byte");
        assert_eq!(decoder.decode(&euro[..2]), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[test]
    fn live_echo_tags_stderr_and_breaks_between_streams() {
        let mut echo = LiveEcho::default();
        let mut out = echo.render(StreamKind::Stdout, "50%");
        out += &echo.render(StreamKind::Stderr, "oops\n");
        out += &echo.render(StreamKind::Stdout, "tail");
        out += echo.finish().unwrap_or_default();
        assert_eq!(out, "50%\nERROR: oops\ntail\n");
        assert_eq!(echo.finish(), None);
    }

    #[test]
    fn plain_text_strips_ansi() {
        let mut console = ConsoleBuffer::new(4);
        console.push_chunk(StreamKind::Stdout, "\u{1b}[32mgreen\u{1b}[0m\n");
        assert_eq!(console.plain_text(), "green");
    }
}
