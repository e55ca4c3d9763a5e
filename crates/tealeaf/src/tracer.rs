//! Execution tracing infrastructure.
//!
//! A trait-based tracing seam for the symbolic interpreter. All hooks have
//! default no-op bodies, so [`NoopTracer`] costs nothing; [`StderrTracer`]
//! produces a human-readable execution log for debugging runs, and
//! [`RecordingTracer`] captures events so tests can assert on the execution
//! shape (fork counts, handler dispatches) without string scraping.

use crate::parse::CodeRange;

/// Trace event emitted during symbolic execution.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A statement is about to execute over the given number of live paths.
    Stmt { live_paths: usize, span: Option<CodeRange> },
    /// A conditional split paths.
    Fork {
        then_paths: usize,
        else_paths: usize,
        span: Option<CodeRange>,
    },
    /// Obligations were introduced.
    Require { message: String, span: Option<CodeRange> },
    /// A library-call handler was dispatched.
    LibCall { func: String, span: Option<CodeRange> },
    /// A function call was entered.
    Call { name: String, depth: u32 },
}

/// Trait for interpreter execution tracing.
///
/// The interpreter carries the tracer by mutable reference; implementations
/// override only the hooks they care about.
pub trait ExecTracer: std::fmt::Debug {
    /// Called before each statement. This is the hottest hook.
    #[inline]
    fn on_stmt(&mut self, _live_paths: usize, _span: Option<CodeRange>) {}

    /// Called after a conditional split.
    #[inline]
    fn on_fork(&mut self, _then_paths: usize, _else_paths: usize, _span: Option<CodeRange>) {}

    /// Called when obligations are introduced.
    #[inline]
    fn on_require(&mut self, _message: &str, _span: Option<CodeRange>) {}

    /// Called when a library-call handler is dispatched.
    #[inline]
    fn on_libcall(&mut self, _func: &str, _span: Option<CodeRange>) {}

    /// Called when a function call is entered.
    #[inline]
    fn on_call(&mut self, _name: &str, _depth: u32) {}
}

/// Zero-cost tracer; the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl ExecTracer for NoopTracer {}

/// Logs execution events to stderr. Intended for debugging runs only.
#[derive(Debug, Default)]
pub struct StderrTracer {
    events: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecTracer for StderrTracer {
    fn on_stmt(&mut self, live_paths: usize, span: Option<CodeRange>) {
        self.events += 1;
        match span {
            Some(span) => eprintln!("[{:>6}] stmt at {span} ({live_paths} paths)", self.events),
            None => eprintln!("[{:>6}] stmt ({live_paths} paths)", self.events),
        }
    }

    fn on_fork(&mut self, then_paths: usize, else_paths: usize, span: Option<CodeRange>) {
        self.events += 1;
        match span {
            Some(span) => eprintln!("[{:>6}] fork at {span}: {then_paths} then / {else_paths} else", self.events),
            None => eprintln!("[{:>6}] fork: {then_paths} then / {else_paths} else", self.events),
        }
    }

    fn on_require(&mut self, message: &str, _span: Option<CodeRange>) {
        self.events += 1;
        eprintln!("[{:>6}] require: {message}", self.events);
    }

    fn on_libcall(&mut self, func: &str, _span: Option<CodeRange>) {
        self.events += 1;
        eprintln!("[{:>6}] libcall: {func}", self.events);
    }

    fn on_call(&mut self, name: &str, depth: u32) {
        self.events += 1;
        eprintln!("[{:>6}] call: {name} (depth {depth})", self.events);
    }
}

/// Records every event for post-mortem inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatched handler names, in order.
    #[must_use]
    pub fn libcalls(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::LibCall { func, .. } => Some(func.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Number of fork events recorded.
    #[must_use]
    pub fn fork_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, TraceEvent::Fork { .. }))
            .count()
    }
}

impl ExecTracer for RecordingTracer {
    fn on_stmt(&mut self, live_paths: usize, span: Option<CodeRange>) {
        self.events.push(TraceEvent::Stmt { live_paths, span });
    }

    fn on_fork(&mut self, then_paths: usize, else_paths: usize, span: Option<CodeRange>) {
        self.events.push(TraceEvent::Fork {
            then_paths,
            else_paths,
            span,
        });
    }

    fn on_require(&mut self, message: &str, span: Option<CodeRange>) {
        self.events.push(TraceEvent::Require {
            message: message.to_owned(),
            span,
        });
    }

    fn on_libcall(&mut self, func: &str, span: Option<CodeRange>) {
        self.events.push(TraceEvent::LibCall {
            func: func.to_owned(),
            span,
        });
    }

    fn on_call(&mut self, name: &str, depth: u32) {
        self.events.push(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_collects_events() {
        let mut tracer = RecordingTracer::new();
        tracer.on_stmt(1, None);
        tracer.on_libcall("torch.conv2d", None);
        tracer.on_fork(1, 1, None);
        assert_eq!(tracer.libcalls(), vec!["torch.conv2d"]);
        assert_eq!(tracer.fork_count(), 1);
        assert_eq!(tracer.events.len(), 3);
    }
}
