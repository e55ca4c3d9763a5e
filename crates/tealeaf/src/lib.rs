#![doc = include_str!("../../../README.md")]

mod builtins;
mod config;
mod constraint;
mod context;
mod env;
mod error;
mod handlers;
mod heap;
mod interp;
mod ir;
mod parse;
mod rational;
mod report;
mod run;
mod simplify;
mod solver;
pub mod symexp;
pub mod tracer;
mod value;

pub use crate::{
    config::{ArgSource, CancelToken, CmdVal, LogLevel, MapArgSource, Options},
    constraint::{ConstraintSet, Entailment, Range},
    context::{Context, ContextSet, Flow, RetVal},
    env::Env,
    error::{Diagnostic, ErrorKind, Severity},
    heap::{Addr, Heap},
    ir::{BinOp, ConstVal, Expr, ExprKind, FunDef, IrReadError, Param, Stmt, StmtKind, UnOp, parse_ir},
    parse::{CodeLoc, CodeRange, ParseError, parse_module},
    rational::Rational,
    report::{AnalysisReport, PathReport, PathVerdict, ReportMessage},
    run::{Analyzer, LoweredModule},
    solver::{RangeOracle, SolverOracle, UnknownOracle},
    value::{Func, ObjGen, ObjId, Object, Value},
};
