//! Terminal-context reports.
//!
//! After execution, every terminal path becomes one record: its verdict, the
//! constraints it accumulated, and its diagnostics filtered by the
//! configured log level. Paths are sorted by a stable key derived from their
//! constraints so output is reproducible across runs.

use std::fmt;

use crate::{
    config::{LogLevel, Options},
    context::{Context, ContextSet},
    error::Severity,
};

/// Outcome of a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum PathVerdict {
    /// No obligations outstanding and no warnings.
    #[strum(serialize = "success")]
    Success,
    /// The path completed but reported warnings or non-fatal errors.
    #[strum(serialize = "warning")]
    Warning,
    /// An obligation was refuted or a raise reached the top.
    #[strum(serialize = "failure")]
    Failure,
}

/// One diagnostic line in a report.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReportMessage {
    pub severity: String,
    pub kind: String,
    pub message: String,
    pub location: Option<String>,
}

/// One record per terminal context.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PathReport {
    pub verdict: PathVerdict,
    /// Stable ordering key, hex of the path-constraint hash.
    pub path_key: String,
    pub constraints: Vec<String>,
    pub messages: Vec<ReportMessage>,
    /// Symbolic return value, kept only at the `full` log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ret_val: Option<String>,
}

/// The whole analysis result.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisReport {
    pub entry_path: String,
    pub log_level: LogLevel,
    pub cancelled: bool,
    pub paths: Vec<PathReport>,
}

impl AnalysisReport {
    /// Builds the report from a terminal context set.
    #[must_use]
    pub fn from_set(set: &ContextSet, opts: &Options) -> Self {
        let mut paths = Vec::new();
        if opts.log_level > LogLevel::None {
            for ctx in set.live() {
                paths.push(path_report(ctx, false, opts.log_level));
            }
            for ctx in set.failed() {
                paths.push(path_report(ctx, true, opts.log_level));
            }
            paths.sort_by(|a, b| a.path_key.cmp(&b.path_key));
        }
        Self {
            entry_path: opts.entry_path.clone(),
            log_level: opts.log_level,
            cancelled: set.cancelled,
            paths,
        }
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.paths.iter().filter(|path| path.verdict == PathVerdict::Failure).count()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.paths.iter().filter(|path| path.verdict == PathVerdict::Warning).count()
    }

    /// JSON rendering of the report.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn path_report(ctx: &Context, failed: bool, level: LogLevel) -> PathReport {
    let verdict = if failed {
        PathVerdict::Failure
    } else if ctx.logs.iter().any(|diag| diag.severity >= Severity::Warning) {
        PathVerdict::Warning
    } else {
        PathVerdict::Success
    };
    let keep = match level {
        LogLevel::Reduced => Severity::Warning,
        _ => Severity::Log,
    };
    let messages = if level >= LogLevel::Reduced {
        let mut messages: Vec<ReportMessage> = Vec::new();
        for diag in &ctx.logs {
            if diag.severity < keep && !(failed && diag.is_fatal()) {
                continue;
            }
            let message = ReportMessage {
                severity: diag.severity.to_string(),
                kind: diag.kind.to_string(),
                message: diag.message.clone(),
                location: diag.span.map(|span| span.to_string()),
            };
            // Repeated degradations from one call site (loop bodies, retried
            // handlers) collapse into a single record.
            if !messages.contains(&message) {
                messages.push(message);
            }
        }
        messages
    } else {
        Vec::new()
    };
    let constraints = if level >= LogLevel::Reduced {
        ctx.ctr_set.constraints().iter().map(ToString::to_string).collect()
    } else {
        Vec::new()
    };
    let ret_val = (level == LogLevel::Full).then(|| ctx.ret_val.value().to_string());
    PathReport {
        verdict,
        path_key: format!("{:016x}", ctx.path_key()),
        constraints,
        messages,
        ret_val,
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "analyzed {}: {} path(s), {} failure(s), {} with warnings{}",
            if self.entry_path.is_empty() { "<memory>" } else { &self.entry_path },
            self.paths.len(),
            self.failure_count(),
            self.warning_count(),
            if self.cancelled { " [cancelled]" } else { "" },
        )?;
        for (i, path) in self.paths.iter().enumerate() {
            writeln!(f, "path {} [{}] {}", i + 1, &path.path_key[..8.min(path.path_key.len())], path.verdict)?;
            if !path.constraints.is_empty() {
                writeln!(f, "  constraints: {}", path.constraints.join(" and "))?;
            }
            for message in &path.messages {
                match &message.location {
                    Some(location) => writeln!(f, "  {}: {} (at {location})", message.severity, message.message)?,
                    None => writeln!(f, "  {}: {}", message.severity, message.message)?,
                }
            }
            if let Some(ret_val) = &path.ret_val {
                writeln!(f, "  return: {ret_val}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Diagnostic, ErrorKind};

    #[test]
    fn verdicts_reflect_path_state() {
        let opts = Options::default();
        let clean = Context::new();
        let warned = Context::new().warn(ErrorKind::Unsupported, "degraded", None);
        let failed = Context::new().fail(Diagnostic::error(ErrorKind::ObligationViolated, "boom", None));
        let set = ContextSet::single(clean)
            .join(&ContextSet::single(warned))
            .join(&ContextSet::single(failed))
            .map(std::clone::Clone::clone);
        let report = AnalysisReport::from_set(&set, &opts);
        assert_eq!(report.paths.len(), 3);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn result_only_drops_messages_but_keeps_verdicts() {
        let mut opts = Options::default();
        opts.log_level = LogLevel::ResultOnly;
        let warned = Context::new().warn(ErrorKind::Unsupported, "degraded", None);
        let report = AnalysisReport::from_set(&ContextSet::single(warned), &opts);
        assert_eq!(report.paths.len(), 1);
        assert_eq!(report.paths[0].verdict, PathVerdict::Warning);
        assert!(report.paths[0].messages.is_empty());
        assert!(report.paths[0].constraints.is_empty());
    }

    #[test]
    fn json_round_trips() {
        let opts = Options::default();
        let report = AnalysisReport::from_set(&ContextSet::single(Context::new()), &opts);
        let json = report.to_json().unwrap();
        let parsed: AnalysisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn ordering_is_stable() {
        let opts = Options::default();
        let a = Context::new();
        let b = Context::new().warn(ErrorKind::Unsupported, "x", None);
        let forward = AnalysisReport::from_set(&ContextSet::single(a.clone()).join(&ContextSet::single(b.clone())), &opts);
        let backward = AnalysisReport::from_set(&ContextSet::single(b).join(&ContextSet::single(a)), &opts);
        let forward_keys: Vec<_> = forward.paths.iter().map(|p| p.path_key.clone()).collect();
        let backward_keys: Vec<_> = backward.paths.iter().map(|p| p.path_key.clone()).collect();
        assert_eq!(forward_keys, backward_keys);
    }
}
