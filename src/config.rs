//! Configuration for kima-ui.
//!
//! Settings come from an optional `kima-ui.toml` installed beside the binary (or
//! given with `--config`). The script location is deliberately not configurable
//! here; it is resolved from the install directory or `--script`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// File name looked up next to the executable.
pub const CONFIG_FILE: &str = "kima-ui.toml";

pub const DEFAULT_MAX_LINES: usize = 5_000;
pub const DEFAULT_TICK_MS: u64 = 150;

/// Top-level structure of `kima-ui.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Maximum number of lines kept in the live console.
    pub max_lines: Option<usize>,
    /// Whether to use Unicode symbols in the TUI (default: true).
    pub symbols: Option<bool>,
    /// File that receives diagnostic logs.
    pub log_file: Option<PathBuf>,
    /// Redraw interval in milliseconds.
    pub tick_ms: Option<u64>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// `kima-ui.toml` beside the running executable, if present.
pub fn installed_config_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let path = exe.parent()?.join(CONFIG_FILE);
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
max_lines = 200
symbols = false
log_file = "/var/log/kima-ui.log"
tick_ms = 80
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.max_lines, Some(200));
        assert_eq!(config.symbols, Some(false));
        assert_eq!(
            config.log_file.as_deref(),
            Some(Path::new("/var/log/kima-ui.log"))
        );
        assert_eq!(config.tick_ms, Some(80));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.max_lines.is_none());
        assert!(config.symbols.is_none());
    }

    #[test]
    fn script_path_is_not_accepted() {
        assert!(toml::from_str::<Config>("script = \"/tmp/kima.sh\"").is_err());
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "max_lines = \"many\"").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }
}
