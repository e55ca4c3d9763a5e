//! Public interface for running an analysis.

use std::path::Path;

use crate::{
    builtins,
    config::{ArgSource, CancelToken, MapArgSource, Options},
    context::{Context, ContextSet},
    interp::Interp,
    ir::Stmt,
    parse::{ParseError, parse_module},
    report::AnalysisReport,
    solver::{RangeOracle, SolverOracle},
    tracer::{ExecTracer, NoopTracer},
};

/// A parsed and lowered module, ready to execute.
///
/// Lowering is deterministic, so modules can be serialized once and reloaded
/// on later runs to skip re-parsing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoweredModule {
    pub body: Stmt,
}

impl LoweredModule {
    /// Parses and lowers Python source.
    pub fn parse(code: &str, file_id: u32) -> Result<Self, ParseError> {
        Ok(Self {
            body: parse_module(code, file_id)?,
        })
    }

    /// Serializes the lowered module to a compact binary format.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a module serialized with `dump`.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// Textual IR form, as written by the `extract_ir` option.
    #[must_use]
    pub fn to_ir_text(&self) -> String {
        self.body.to_string()
    }
}

/// Primary entry point: parse, lower, execute, report.
///
/// # Example
/// ```
/// use tealeaf::{Analyzer, Options};
///
/// let analyzer = Analyzer::new(Options::default());
/// let report = analyzer.analyze_source("x = 1 + 2\n").unwrap();
/// assert_eq!(report.failure_count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    opts: Options,
}

impl Analyzer {
    #[must_use]
    pub fn new(opts: Options) -> Self {
        Self { opts }
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Analyzes a source string with default collaborators: the interval
    /// oracle, the configured command-line values, and no tracing.
    pub fn analyze_source(&self, code: &str) -> Result<AnalysisReport, ParseError> {
        let arg_source = MapArgSource::new(self.opts.cmd_args.clone());
        let mut tracer = NoopTracer;
        let (report, _) = self.analyze_with(code, &RangeOracle, &arg_source, &mut tracer, CancelToken::new())?;
        Ok(report)
    }

    /// Full-control entry: caller supplies every collaborator and receives
    /// the terminal context set alongside the report.
    pub fn analyze_with(
        &self,
        code: &str,
        oracle: &dyn SolverOracle,
        arg_source: &dyn ArgSource,
        tracer: &mut dyn ExecTracer,
        cancel: CancelToken,
    ) -> Result<(AnalysisReport, ContextSet), ParseError> {
        let module = LoweredModule::parse(code, 0)?;
        if self.opts.extract_ir {
            self.write_ir(&module);
        }
        let set = self.execute(&module, oracle, arg_source, tracer, cancel);
        let report = AnalysisReport::from_set(&set, &self.opts);
        Ok((report, set))
    }

    /// Executes an already-lowered module over a fresh built-in environment.
    #[must_use]
    pub fn execute(
        &self,
        module: &LoweredModule,
        oracle: &dyn SolverOracle,
        arg_source: &dyn ArgSource,
        tracer: &mut dyn ExecTracer,
        cancel: CancelToken,
    ) -> ContextSet {
        let ctx = builtins::install(Context::new());
        let mut interp = Interp::new(&self.opts, oracle, arg_source, tracer, cancel);
        interp.exec_module(&module.body, ContextSet::single(ctx))
    }

    /// Writes the textual IR next to the entry file. Failures only warn on
    /// stderr: IR extraction is a debugging aid, not part of the analysis.
    fn write_ir(&self, module: &LoweredModule) {
        if self.opts.entry_path.is_empty() {
            return;
        }
        let target = Path::new(&self.opts.entry_path).with_extension("ir");
        if let Err(err) = std::fs::write(&target, module.to_ir_text()) {
            eprintln!("warning: could not write {}: {err}", target.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::parse_ir, report::PathVerdict};

    #[test]
    fn analyze_source_reports_a_clean_path() {
        let analyzer = Analyzer::new(Options::default());
        let report = analyzer.analyze_source("x = 1\ny = x + 2\n").unwrap();
        assert_eq!(report.paths.len(), 1);
        assert_eq!(report.paths[0].verdict, PathVerdict::Success);
    }

    #[test]
    fn parse_errors_surface() {
        let analyzer = Analyzer::new(Options::default());
        let err = analyzer.analyze_source("def f(:\n").unwrap_err();
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn lowered_modules_round_trip_through_postcard() {
        let module = LoweredModule::parse("x = 1\nif x > 0:\n    y = 2\n", 0).unwrap();
        let bytes = module.dump().unwrap();
        let restored = LoweredModule::load(&bytes).unwrap();
        assert_eq!(restored, module);
    }

    #[test]
    fn ir_text_round_trips_through_the_reader() {
        let module = LoweredModule::parse("total = 0\nfor i in (1, 2):\n    total = total + i\n", 0).unwrap();
        let text = module.to_ir_text();
        let reparsed = parse_ir(&text).unwrap();
        assert_eq!(reparsed, module.body);
    }

    #[test]
    fn cancellation_marks_the_set() {
        let analyzer = Analyzer::new(Options::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let arg_source = MapArgSource::default();
        let mut tracer = NoopTracer;
        let (report, set) = analyzer
            .analyze_with("x = 1\ny = 2\n", &RangeOracle, &arg_source, &mut tracer, cancel)
            .unwrap();
        assert!(set.cancelled);
        assert!(report.cancelled);
    }
}
