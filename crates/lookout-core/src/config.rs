//! Runtime configuration.
//!
//! Built once in `main` from command-line flags and the environment, then
//! passed by value into each component. There is no config file and no
//! global state.

use std::path::PathBuf;

/// Name of the cache directory created under the codebase root.
pub const CACHE_DIR_NAME: &str = ".lookout";

/// Default per-job timeout in seconds.
pub const DEFAULT_TIMEOUT_S: u64 = 60;

/// UI palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Default,
    Mono,
}

impl Theme {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Theme::Default),
            "mono" => Some(Theme::Mono),
            _ => None,
        }
    }

    pub fn names() -> &'static [&'static str] {
        &["default", "mono"]
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Canonicalized codebase root.
    pub root: PathBuf,
    /// Worker subprocess count.
    pub workers: usize,
    /// Editor command for the `e` key, if any.
    pub editor: Option<String>,
    pub theme: Theme,
    /// Cache blob compression level, 0..=9.
    pub compression: u32,
    /// Whether the terminal advertises 24-bit color.
    pub truecolor: bool,
    /// Raw LS_COLORS value for path coloring.
    pub ls_colors: Option<String>,
}

impl Config {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            workers: default_worker_count(),
            editor: editor_from_env(),
            theme: Theme::Default,
            compression: 1,
            truecolor: truecolor_from_env(),
            ls_colors: std::env::var("LS_COLORS").ok(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR_NAME)
    }
}

/// One worker per CPU.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
}

fn editor_from_env() -> Option<String> {
    std::env::var("EDITOR")
        .ok()
        .or_else(|| std::env::var("VISUAL").ok())
        .filter(|v| !v.trim().is_empty())
}

/// True-color support detection; the renderer falls back to the 16-color
/// palette when this is false.
fn truecolor_from_env() -> bool {
    std::env::var("COLORTERM")
        .map(|v| v.contains("truecolor") || v.contains("24bit"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_names_round_trip() {
        for name in Theme::names() {
            assert!(Theme::parse(name).is_some());
        }
        assert!(Theme::parse("solarized").is_none());
    }

    #[test]
    fn worker_default_is_positive() {
        assert!(default_worker_count() >= 1);
    }
}
