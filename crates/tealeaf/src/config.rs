//! Analysis options and host-provided seams.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use indexmap::IndexMap;

/// How much of each path's diagnostics the report keeps.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum LogLevel {
    /// No per-path records at all.
    #[strum(serialize = "none")]
    None,
    /// Verdicts only.
    #[strum(serialize = "result-only")]
    ResultOnly,
    /// Warnings and errors.
    #[default]
    #[strum(serialize = "reduced")]
    Reduced,
    /// Everything, including log-level traces and the symbolic return value.
    #[strum(serialize = "full")]
    Full,
}

/// Process-wide analysis options, set once before a run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Options {
    /// Entry module path, used for file ids and report headers.
    pub entry_path: String,
    /// Command-line values seeding `argparse.inject_argument`.
    pub cmd_args: IndexMap<String, CmdVal>,
    /// Value returned by `argparse.set_subcommand`.
    pub subcommand: Option<String>,
    pub log_level: LogLevel,
    /// Discard trivially valid obligations at `require` time.
    pub immediate_constraint_check: bool,
    /// Skip Python `assert` statements entirely.
    pub ignore_assert: bool,
    /// Emit the lowered IR next to the entry file.
    pub extract_ir: bool,
    /// Maximum live paths before a structural join.
    pub path_cap: usize,
    /// Maximum symbolic unrolling of a `for` loop with an unknown bound.
    pub max_unroll: i64,
    /// Maximum function call depth before the path degrades to a warning.
    pub max_call_depth: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            entry_path: String::new(),
            cmd_args: IndexMap::new(),
            subcommand: None,
            log_level: LogLevel::Reduced,
            immediate_constraint_check: true,
            ignore_assert: false,
            extract_ir: false,
            path_cap: 64,
            max_unroll: 32,
            max_call_depth: 64,
        }
    }
}

/// A command-line value handed to the analyzed program's argparse layer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CmdVal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl CmdVal {
    /// Parses the loosest matching tag: bool, then int, then float, then
    /// string. Mirrors how flag values arrive from a shell.
    #[must_use]
    pub fn parse_loose(raw: &str) -> Self {
        match raw {
            "True" | "true" => return Self::Bool(true),
            "False" | "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Self::Float(v);
        }
        Self::Str(raw.to_owned())
    }
}

impl fmt::Display for CmdVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for CmdVal {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_loose(s))
    }
}

/// Source of command-line-derived values for analyzed Python flags.
///
/// A missing value makes `argparse.inject_argument` mint a fresh symbol of
/// the declared type instead.
pub trait ArgSource {
    fn get(&self, name: &str) -> Option<CmdVal>;
}

/// `ArgSource` backed by a name-value map (the CLI's `--arg k=v` pairs).
#[derive(Debug, Clone, Default)]
pub struct MapArgSource {
    values: IndexMap<String, CmdVal>,
}

impl MapArgSource {
    #[must_use]
    pub fn new(values: IndexMap<String, CmdVal>) -> Self {
        Self { values }
    }
}

impl ArgSource for MapArgSource {
    fn get(&self, name: &str) -> Option<CmdVal> {
        self.values.get(name).cloned()
    }
}

/// Cooperative cancellation handle, polled between statements and paths.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse_and_order() {
        assert_eq!("reduced".parse::<LogLevel>().unwrap(), LogLevel::Reduced);
        assert!(LogLevel::ResultOnly < LogLevel::Full);
    }

    #[test]
    fn cmd_vals_parse_loosely() {
        assert_eq!(CmdVal::parse_loose("true"), CmdVal::Bool(true));
        assert_eq!(CmdVal::parse_loose("3"), CmdVal::Int(3));
        assert_eq!(CmdVal::parse_loose("0.1"), CmdVal::Float(0.1));
        assert_eq!(CmdVal::parse_loose("adam"), CmdVal::Str("adam".to_owned()));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
