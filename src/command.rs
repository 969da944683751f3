//! Commands understood by the kima script and the invocations built from them.
//!
//! The command set is fixed; the script's own argument grammar is opaque to us,
//! so arguments are passed through verbatim after trimming.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Error};

/// A kima sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Command {
    Install,
    Uninstall,
    Search,
    Upgrade,
    Info,
    List,
    Update,
    Cleanup,
    Stats,
    Orphaned,
    Outdated,
    Help,
}

/// Which result tab a command's output is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultView {
    /// Tabular search results.
    Search,
    /// Formatted key/value package info.
    Info,
    /// Verbatim text.
    Text,
}

impl Command {
    /// All commands, in selector order.
    pub const ALL: [Command; 12] = [
        Command::Install,
        Command::Uninstall,
        Command::Search,
        Command::Upgrade,
        Command::Info,
        Command::List,
        Command::Update,
        Command::Cleanup,
        Command::Stats,
        Command::Orphaned,
        Command::Outdated,
        Command::Help,
    ];

    /// The name passed to the script.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Uninstall => "uninstall",
            Command::Search => "search",
            Command::Upgrade => "upgrade",
            Command::Info => "info",
            Command::List => "list",
            Command::Update => "update",
            Command::Cleanup => "cleanup",
            Command::Stats => "stats",
            Command::Orphaned => "orphaned",
            Command::Outdated => "outdated",
            Command::Help => "help",
        }
    }

    /// Whether the command is normally given a package name or search term.
    pub fn takes_argument(self) -> bool {
        matches!(
            self,
            Command::Install | Command::Uninstall | Command::Search | Command::Info
        )
    }

    pub fn view(self) -> ResultView {
        match self {
            Command::Search => ResultView::Search,
            Command::Info => ResultView::Info,
            _ => ResultView::Text,
        }
    }

    /// Position in [`Command::ALL`].
    pub fn index(self) -> usize {
        Command::ALL
            .iter()
            .position(|c| *c == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| anyhow!("unknown command {:?}", value))
    }
}

/// One user-triggered execution: a command plus an optional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub argument: Option<String>,
}

impl Invocation {
    /// Builds an invocation; an argument that is empty after trimming is dropped.
    pub fn new(command: Command, argument: &str) -> Self {
        let trimmed = argument.trim();
        Self {
            command,
            argument: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }

    /// Arguments passed to the script, without the script itself.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(2);
        args.push(self.command.as_str().to_string());
        if let Some(argument) = &self.argument {
            args.push(argument.clone());
        }
        args
    }

    /// Full command line: `[script, command, argument?]`.
    pub fn argv(&self, script: &Path) -> Vec<String> {
        let mut argv = Vec::with_capacity(3);
        argv.push(script.display().to_string());
        argv.extend(self.args());
        argv
    }

    /// Shell-quoted command line for display in the console.
    pub fn display(&self, script: &Path) -> String {
        shell_words::join(self.argv(script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_argument_is_omitted() {
        let invocation = Invocation::new(Command::Update, "   ");
        assert_eq!(invocation.argument, None);
        assert_eq!(
            invocation.argv(Path::new("/opt/kima/kima.sh")),
            vec!["/opt/kima/kima.sh", "update"]
        );
    }

    #[test]
    fn argument_is_trimmed_and_passed_verbatim() {
        let invocation = Invocation::new(Command::Search, "  foo bar ");
        assert_eq!(
            invocation.argv(Path::new("kima.sh")),
            vec!["kima.sh", "search", "foo bar"]
        );
        assert_eq!(
            invocation.display(Path::new("kima.sh")),
            "kima.sh search 'foo bar'"
        );
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Install".parse::<Command>().unwrap(), Command::Install);
        assert_eq!(" outdated ".parse::<Command>().unwrap(), Command::Outdated);
        assert!("frobnicate".parse::<Command>().is_err());
    }

    #[test]
    fn every_command_round_trips_through_its_name() {
        for command in Command::ALL {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
            assert_eq!(Command::ALL[command.index()], command);
        }
    }

    #[test]
    fn views_follow_command() {
        assert_eq!(Command::Search.view(), ResultView::Search);
        assert_eq!(Command::Info.view(), ResultView::Info);
        assert_eq!(Command::List.view(), ResultView::Text);
        assert_eq!(Command::Help.view(), ResultView::Text);
    }
}
