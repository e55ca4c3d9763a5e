//! Python source to IR lowering.
//!
//! The ruff parser produces a full Python AST; this module lowers the subset
//! the analyzer understands into the small statement language in `ir.rs`.
//! Lowering is total over syntactically valid files: constructs outside the
//! supported subset become `unsupported` lib-calls, so analysis degrades to
//! warnings instead of refusing the file.
//!
//! Scoping follows the hoisting discipline of the abstract machine: every
//! name assigned anywhere in a body gets a `Let` cell wrapped around that
//! body, and plain assignments then write through the pre-allocated cell.

use std::{borrow::Cow, fmt};

use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, Expr as AstExpr, Number, Operator as AstOperator, Stmt as AstStmt, UnaryOp,
};
use ruff_python_parser::parse_module as ruff_parse_module;
use ruff_text_size::{Ranged, TextRange};

use crate::ir::{BinOp, ConstVal, Expr, ExprKind, FunDef, Param, Stmt, StmtKind, UnOp};

/// A line/column position, both zero-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub col: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.col + 1)
    }
}

/// A source span: file id plus start and end locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeRange {
    pub file_id: u32,
    pub start: CodeLoc,
    pub end: CodeLoc,
}

impl CodeRange {
    #[must_use]
    pub const fn new(file_id: u32, start: CodeLoc, end: CodeLoc) -> Self {
        Self { file_id, start, end }
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)
    }
}

/// Errors from the parse/lower phase.
#[derive(Debug, Clone)]
pub enum ParseError {
    /// Invalid Python syntax reported by the underlying parser.
    Syntax {
        msg: Cow<'static, str>,
        position: Option<CodeRange>,
    },
}

impl ParseError {
    pub(crate) fn syntax(msg: impl Into<Cow<'static, str>>, position: Option<CodeRange>) -> Self {
        Self::Syntax {
            msg: msg.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { msg, position } => match position {
                Some(position) => write!(f, "syntax error at {position}: {msg}"),
                None => write!(f, "syntax error: {msg}"),
            },
        }
    }
}

/// Parses Python source and lowers it to a single IR statement.
pub fn parse_module(code: &str, file_id: u32) -> Result<Stmt, ParseError> {
    let mut parser = Parser::new(code, file_id);
    let parsed = ruff_parse_module(code)
        .map_err(|e| ParseError::syntax(e.to_string(), Some(parser.convert_range(e.range()))))?;
    let module = parsed.into_syntax();
    Ok(parser.lower_body(module.body))
}

/// Lowers ruff AST statements into the IR, tracking source positions.
struct Parser<'a> {
    code: &'a str,
    file_id: u32,
    /// Byte offset of each newline, used to convert offsets to line/column.
    line_ends: Vec<usize>,
    /// Counter for synthetic temporaries (`$tmp0`, `$for0`).
    synthetic_counter: u32,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str, file_id: u32) -> Self {
        let mut line_ends = vec![];
        for (i, c) in code.char_indices() {
            if c == '\n' {
                line_ends.push(i);
            }
        }
        Self {
            code,
            file_id,
            line_ends,
            synthetic_counter: 0,
        }
    }

    fn convert_range(&self, range: TextRange) -> CodeRange {
        let start = range.start().to_usize();
        let (start_line, start_line_start) = self.index_to_position(start);
        let end = range.end().to_usize();
        let (end_line, end_line_start) = self.index_to_position(end);
        CodeRange::new(
            self.file_id,
            CodeLoc::new(start_line as u32, (start - start_line_start) as u32),
            CodeLoc::new(end_line as u32, (end - end_line_start) as u32),
        )
    }

    fn index_to_position(&self, index: usize) -> (usize, usize) {
        let mut line_start = 0;
        for (line_no, line_end) in self.line_ends.iter().enumerate() {
            if index <= *line_end {
                return (line_no, line_start);
            }
            line_start = *line_end + 1;
        }
        (self.line_ends.len(), line_start)
    }

    fn span(&self, range: TextRange) -> Option<CodeRange> {
        Some(self.convert_range(range))
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        let name = format!("${prefix}{}", self.synthetic_counter);
        self.synthetic_counter += 1;
        name
    }

    // -- statements ---------------------------------------------------------

    /// Lowers a statement list into one `Seq`, wrapped in `Let` cells for
    /// every name the body assigns.
    fn lower_body(&mut self, statements: ast::Suite) -> Stmt {
        let mut assigned: Vec<String> = Vec::new();
        for statement in &statements {
            collect_assigned(statement, &mut assigned);
        }
        let mut lowered = Vec::new();
        for statement in statements {
            self.lower_stmt(statement, &mut lowered);
        }
        let mut body = Stmt::seq(lowered, None);
        for name in assigned.into_iter().rev() {
            body = Stmt::new(
                StmtKind::Let {
                    name,
                    init: None,
                    scope: Box::new(body),
                },
                None,
            );
        }
        body
    }

    fn lower_stmt(&mut self, statement: AstStmt, out: &mut Vec<Stmt>) {
        match statement {
            AstStmt::Pass(p) => out.push(Stmt::pass(self.span(p.range))),
            AstStmt::Expr(ast::StmtExpr { value, range, .. }) => {
                let span = self.span(range);
                let expr = self.lower_expr(*value);
                out.push(Stmt::new(StmtKind::Expr(expr), span));
            }
            AstStmt::Return(ast::StmtReturn { value, range, .. }) => {
                let span = self.span(range);
                let value = value.map(|v| self.lower_expr(*v));
                out.push(Stmt::new(StmtKind::Return(value), span));
            }
            AstStmt::Break(b) => out.push(Stmt::new(StmtKind::Break, self.span(b.range))),
            AstStmt::Continue(c) => out.push(Stmt::new(StmtKind::Continue, self.span(c.range))),
            AstStmt::Assign(ast::StmtAssign { targets, value, range, .. }) => {
                let span = self.span(range);
                let value = self.lower_expr(*value);
                self.lower_assign_targets(targets, value, span, out);
            }
            AstStmt::AugAssign(ast::StmtAugAssign {
                target, op, value, range, ..
            }) => {
                let span = self.span(range);
                let target = self.lower_expr(*target);
                let value = self.lower_expr(*value);
                let combined = match convert_operator(op) {
                    Some(op) => Expr::new(
                        ExprKind::BinOp {
                            op,
                            left: Box::new(target.clone()),
                            right: Box::new(value),
                        },
                        span,
                    ),
                    None => self.unsupported_expr("augmented assignment operator", span),
                };
                out.push(Stmt::new(StmtKind::Assign { target, value: combined }, span));
            }
            AstStmt::AnnAssign(ast::StmtAnnAssign { target, value, range, .. }) => {
                let span = self.span(range);
                if let Some(value) = value {
                    let target = self.lower_expr(*target);
                    let value = self.lower_expr(*value);
                    out.push(Stmt::new(StmtKind::Assign { target, value }, span));
                }
            }
            AstStmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                range,
                ..
            }) => {
                let span = self.span(range);
                let cond = self.lower_expr(*test);
                let then_branch = self.lower_block(body);
                let else_branch = self.lower_elif_else(elif_else_clauses);
                out.push(Stmt::new(
                    StmtKind::If {
                        cond,
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    span,
                ));
            }
            AstStmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                range,
                ..
            }) => {
                let span = self.span(range);
                let iter = self.lower_expr(*iter);
                let body_stmt = match *target {
                    AstExpr::Name(ast::ExprName { ref id, .. }) => {
                        let target = id.to_string();
                        let body = self.lower_block(body);
                        Stmt::new(
                            StmtKind::ForIn {
                                target,
                                iter,
                                body: Box::new(body),
                            },
                            span,
                        )
                    }
                    other => {
                        // Tuple targets iterate over a synthetic name and
                        // unpack inside the body.
                        let loop_var = self.fresh_name("for");
                        let mut unpacked = Vec::new();
                        self.lower_assign_targets(vec![other], Expr::name(loop_var.clone(), span), span, &mut unpacked);
                        unpacked.push(self.lower_block(body));
                        Stmt::new(
                            StmtKind::ForIn {
                                target: loop_var,
                                iter,
                                body: Box::new(Stmt::seq(unpacked, span)),
                            },
                            span,
                        )
                    }
                };
                out.push(body_stmt);
                if !orelse.is_empty() {
                    // Loop else runs when the loop is not broken; break
                    // tracking across the joined paths is approximated by
                    // always running it.
                    out.push(self.lower_block(orelse));
                }
            }
            AstStmt::FunctionDef(function) => {
                let stmt = self.lower_fundef(function);
                out.push(stmt);
            }
            AstStmt::ClassDef(class) => self.lower_classdef(class, out),
            AstStmt::Import(ast::StmtImport { names, range, .. }) => {
                let span = self.span(range);
                for alias in names {
                    let qual = alias.name.id.to_string();
                    let (binding, import_path) = match &alias.asname {
                        Some(asname) => (asname.id.to_string(), qual.clone()),
                        // `import a.b` binds the root name `a`.
                        None => {
                            let root = qual.split('.').next().unwrap_or(&qual).to_owned();
                            (root.clone(), root)
                        }
                    };
                    let call = Expr::lib_call(
                        "import",
                        vec![("qualPath".to_owned(), Expr::constant(ConstVal::Str(import_path), span))],
                        span,
                    );
                    out.push(Stmt::new(
                        StmtKind::Assign {
                            target: Expr::name(binding, span),
                            value: call,
                        },
                        span,
                    ));
                    // Register submodules so their handlers are reachable.
                    if qual.contains('.') && alias.asname.is_none() {
                        let call = Expr::lib_call(
                            "import",
                            vec![("qualPath".to_owned(), Expr::constant(ConstVal::Str(qual), span))],
                            span,
                        );
                        out.push(Stmt::new(StmtKind::Expr(call), span));
                    }
                }
            }
            AstStmt::ImportFrom(ast::StmtImportFrom { module, names, range, .. }) => {
                let span = self.span(range);
                let Some(module) = module else {
                    out.push(self.unsupported_stmt("relative import", span));
                    return;
                };
                let qual = module.id.to_string();
                let module_call = Expr::lib_call(
                    "import",
                    vec![("qualPath".to_owned(), Expr::constant(ConstVal::Str(qual.clone()), span))],
                    span,
                );
                if names.len() == 1 && names[0].name.id.as_str() == "*" {
                    let call = Expr::lib_call(
                        "import",
                        vec![
                            ("qualPath".to_owned(), Expr::constant(ConstVal::Str(qual), span)),
                            ("wildcard".to_owned(), Expr::constant(ConstVal::Bool(true), span)),
                        ],
                        span,
                    );
                    out.push(Stmt::new(StmtKind::Expr(call), span));
                    return;
                }
                for alias in names {
                    let import_name = alias.name.id.to_string();
                    let binding = alias
                        .asname
                        .as_ref()
                        .map_or_else(|| import_name.clone(), |asname| asname.id.to_string());
                    out.push(Stmt::new(
                        StmtKind::Assign {
                            target: Expr::name(binding, span),
                            value: Expr::attr(module_call.clone(), import_name, span),
                        },
                        span,
                    ));
                }
            }
            AstStmt::Raise(ast::StmtRaise { exc, range, .. }) => {
                let span = self.span(range);
                let mut args = Vec::new();
                if let Some(exc) = exc {
                    args.push(("value".to_owned(), self.lower_expr(*exc)));
                }
                out.push(Stmt::new(StmtKind::Expr(Expr::lib_call("raise", args, span)), span));
            }
            AstStmt::Assert(ast::StmtAssert { test, msg, range, .. }) => {
                let span = self.span(range);
                let mut args = vec![("test".to_owned(), self.lower_expr(*test))];
                if let Some(msg) = msg {
                    args.push(("msg".to_owned(), self.lower_expr(*msg)));
                }
                out.push(Stmt::new(StmtKind::Expr(Expr::lib_call("assert", args, span)), span));
            }
            AstStmt::While(ast::StmtWhile { range, .. }) => {
                // Unbounded iteration has no sound finite unrolling here.
                out.push(self.unsupported_stmt("while loop", self.span(range)));
            }
            AstStmt::With(ast::StmtWith { items, body, range, .. }) => {
                let span = self.span(range);
                // Context manager protocol is skipped: the manager expression
                // itself is bound so attribute use inside the body still works.
                for item in items {
                    let context = self.lower_expr(item.context_expr);
                    match item.optional_vars {
                        Some(var) => {
                            let target = self.lower_expr(*var);
                            out.push(Stmt::new(StmtKind::Assign { target, value: context }, span));
                        }
                        None => out.push(Stmt::new(StmtKind::Expr(context), span)),
                    }
                }
                out.push(self.lower_block(body));
            }
            AstStmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                range,
                ..
            }) => {
                let span = self.span(range);
                if !handlers.is_empty() {
                    out.push(self.unsupported_stmt("except handlers are not analyzed", span));
                }
                out.push(self.lower_block(body));
                if !orelse.is_empty() {
                    out.push(self.lower_block(orelse));
                }
                if !finalbody.is_empty() {
                    out.push(self.lower_block(finalbody));
                }
            }
            AstStmt::Delete(_) | AstStmt::Global(_) | AstStmt::Nonlocal(_) | AstStmt::TypeAlias(_) => {}
            AstStmt::Match(m) => out.push(self.unsupported_stmt("match statement", self.span(m.range))),
            AstStmt::IpyEscapeCommand(i) => {
                out.push(self.unsupported_stmt("IPython escape command", self.span(i.range)));
            }
        }
    }

    fn lower_block(&mut self, statements: ast::Suite) -> Stmt {
        // Blocks inside a body share the enclosing scope; only function
        // bodies hoist their own cells.
        let mut lowered = Vec::new();
        for statement in statements {
            self.lower_stmt(statement, &mut lowered);
        }
        Stmt::seq(lowered, None)
    }

    fn lower_elif_else(&mut self, clauses: Vec<ast::ElifElseClause>) -> Stmt {
        let mut tail = Stmt::pass(None);
        for clause in clauses.into_iter().rev() {
            let span = self.span(clause.range);
            match clause.test {
                Some(test) => {
                    let cond = self.lower_expr(test);
                    let body = self.lower_block(clause.body);
                    tail = Stmt::new(
                        StmtKind::If {
                            cond,
                            then_branch: Box::new(body),
                            else_branch: Box::new(tail),
                        },
                        span,
                    );
                }
                None => {
                    tail = self.lower_block(clause.body);
                }
            }
        }
        tail
    }

    /// Lowers `a = b = value` and tuple unpacking into assignment sequences.
    fn lower_assign_targets(
        &mut self,
        targets: Vec<AstExpr>,
        value: Expr,
        span: Option<CodeRange>,
        out: &mut Vec<Stmt>,
    ) {
        if targets.len() == 1 {
            self.lower_single_target(targets.into_iter().next().expect("len checked"), value, span, out);
            return;
        }
        // Multiple targets share one evaluation of the right-hand side.
        let tmp = self.fresh_name("tmp");
        let mut stmts = Vec::new();
        for target in targets {
            self.lower_single_target(target, Expr::name(tmp.clone(), span), span, &mut stmts);
        }
        out.push(Stmt::new(
            StmtKind::Let {
                name: tmp,
                init: Some(value),
                scope: Box::new(Stmt::seq(stmts, span)),
            },
            span,
        ));
    }

    fn lower_single_target(&mut self, target: AstExpr, value: Expr, span: Option<CodeRange>, out: &mut Vec<Stmt>) {
        match target {
            AstExpr::Name(ast::ExprName { id, .. }) => {
                out.push(Stmt::new(
                    StmtKind::Assign {
                        target: Expr::name(id.to_string(), span),
                        value,
                    },
                    span,
                ));
            }
            AstExpr::Attribute(ast::ExprAttribute { value: object, attr, .. }) => {
                let object = self.lower_expr(*object);
                out.push(Stmt::new(
                    StmtKind::Assign {
                        target: Expr::attr(object, attr.id.to_string(), span),
                        value,
                    },
                    span,
                ));
            }
            AstExpr::Subscript(ast::ExprSubscript {
                value: object, slice, ..
            }) => {
                let object = self.lower_expr(*object);
                let index = self.lower_expr(*slice);
                out.push(Stmt::new(
                    StmtKind::Assign {
                        target: Expr::new(
                            ExprKind::Subscript {
                                object: Box::new(object),
                                index: Box::new(index),
                            },
                            span,
                        ),
                        value,
                    },
                    span,
                ));
            }
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) | AstExpr::List(ast::ExprList { elts, .. }) => {
                let tmp = self.fresh_name("tmp");
                let mut stmts = Vec::new();
                for (i, elt) in elts.into_iter().enumerate() {
                    let item = Expr::new(
                        ExprKind::Subscript {
                            object: Box::new(Expr::name(tmp.clone(), span)),
                            index: Box::new(Expr::constant(ConstVal::Int(i as i64), span)),
                        },
                        span,
                    );
                    self.lower_single_target(elt, item, span, &mut stmts);
                }
                out.push(Stmt::new(
                    StmtKind::Let {
                        name: tmp,
                        init: Some(value),
                        scope: Box::new(Stmt::seq(stmts, span)),
                    },
                    span,
                ));
            }
            other => {
                let span = self.span(other.range());
                out.push(self.unsupported_stmt("assignment target", span));
            }
        }
    }

    fn lower_fundef(&mut self, function: ast::StmtFunctionDef) -> Stmt {
        let span = self.span(function.range);
        let parameters = *function.parameters;
        let mut params = Vec::new();
        for p in parameters.posonlyargs.into_iter().chain(parameters.args) {
            params.push(Param {
                name: p.parameter.name.id.to_string(),
                default: p.default.map(|d| self.lower_expr(*d)),
            });
        }
        let varargs = parameters.vararg.map(|p| p.name.id.to_string());
        let key_only_count = parameters.kwonlyargs.len();
        for p in parameters.kwonlyargs {
            params.push(Param {
                name: p.parameter.name.id.to_string(),
                default: p.default.map(|d| self.lower_expr(*d)),
            });
        }
        let kwargs = parameters.kwarg.map(|p| p.name.id.to_string());
        let body = self.lower_body(function.body);
        Stmt::new(
            StmtKind::FunDef(Box::new(FunDef {
                name: function.name.id.to_string(),
                params,
                varargs,
                kwargs,
                key_only_count,
                body,
            })),
            span,
        )
    }

    /// Lowers a class definition to an `objectClass` lib-call plus attribute
    /// assignments for methods and class variables.
    fn lower_classdef(&mut self, class: ast::StmtClassDef, out: &mut Vec<Stmt>) {
        let span = self.span(class.range);
        let class_name = class.name.id.to_string();
        let mut args = vec![(
            "name".to_owned(),
            Expr::constant(ConstVal::Str(class_name.clone()), span),
        )];
        if let Some(arguments) = class.arguments {
            for (i, base) in arguments.args.iter().enumerate() {
                args.push((format!("base{i}"), self.lower_expr(base.clone())));
            }
        }
        out.push(Stmt::new(
            StmtKind::Assign {
                target: Expr::name(class_name.clone(), span),
                value: Expr::lib_call("objectClass", args, span),
            },
            span,
        ));

        for statement in class.body {
            match statement {
                AstStmt::FunctionDef(function) => {
                    let method_name = function.name.id.to_string();
                    let synthetic = format!("${class_name}${method_name}");
                    let mut lowered = self.lower_fundef(function);
                    if let StmtKind::FunDef(def) = &mut lowered.kind {
                        def.name.clone_from(&synthetic);
                    }
                    out.push(lowered);
                    out.push(Stmt::new(
                        StmtKind::Assign {
                            target: Expr::attr(Expr::name(class_name.clone(), span), method_name, span),
                            value: Expr::name(synthetic, span),
                        },
                        span,
                    ));
                }
                AstStmt::Assign(ast::StmtAssign { targets, value, range, .. }) => {
                    let stmt_span = self.span(range);
                    let value = self.lower_expr(*value);
                    for target in targets {
                        if let AstExpr::Name(ast::ExprName { id, .. }) = target {
                            out.push(Stmt::new(
                                StmtKind::Assign {
                                    target: Expr::attr(Expr::name(class_name.clone(), stmt_span), id.to_string(), stmt_span),
                                    value: value.clone(),
                                },
                                stmt_span,
                            ));
                        }
                    }
                }
                AstStmt::AnnAssign(ast::StmtAnnAssign { target, value, range, .. }) => {
                    let stmt_span = self.span(range);
                    if let (AstExpr::Name(ast::ExprName { id, .. }), Some(value)) = (*target, value) {
                        let value = self.lower_expr(*value);
                        out.push(Stmt::new(
                            StmtKind::Assign {
                                target: Expr::attr(Expr::name(class_name.clone(), stmt_span), id.to_string(), stmt_span),
                                value,
                            },
                            stmt_span,
                        ));
                    }
                }
                AstStmt::Expr(_) | AstStmt::Pass(_) => {}
                other => out.push(self.unsupported_stmt("class body statement", self.span(other.range()))),
            }
        }
    }

    // -- expressions --------------------------------------------------------

    fn lower_expr(&mut self, expression: AstExpr) -> Expr {
        match expression {
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => {
                let span = self.span(range);
                match value {
                    Number::Int(i) => match i.as_i64() {
                        Some(i) => Expr::constant(ConstVal::Int(i), span),
                        None => self.unsupported_expr("integer literal beyond i64", span),
                    },
                    Number::Float(f) => Expr::constant(ConstVal::Float(f), span),
                    Number::Complex { .. } => self.unsupported_expr("complex literal", span),
                }
            }
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, range, .. }) => {
                Expr::constant(ConstVal::Str(value.to_string()), self.span(range))
            }
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, range, .. }) => {
                Expr::constant(ConstVal::Bool(value), self.span(range))
            }
            AstExpr::NoneLiteral(ast::ExprNoneLiteral { range, .. }) => {
                Expr::constant(ConstVal::None, self.span(range))
            }
            AstExpr::Name(ast::ExprName { id, range, .. }) => Expr::name(id.to_string(), self.span(range)),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, range, .. }) => {
                let object = self.lower_expr(*value);
                Expr::attr(object, attr.id.to_string(), self.span(range))
            }
            AstExpr::Subscript(ast::ExprSubscript {
                value, slice, range, ..
            }) => {
                let span = self.span(range);
                let object = self.lower_expr(*value);
                let index = match *slice {
                    AstExpr::Slice(slice) => return self.lower_slice(object, slice, span),
                    other => self.lower_expr(other),
                };
                Expr::new(
                    ExprKind::Subscript {
                        object: Box::new(object),
                        index: Box::new(index),
                    },
                    span,
                )
            }
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) => {
                let span = self.span(range);
                let items = elts.into_iter().map(|e| self.lower_expr(e)).collect();
                Expr::new(ExprKind::Tuple(items), span)
            }
            AstExpr::List(ast::ExprList { elts, range, .. }) => {
                let span = self.span(range);
                let args = elts
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| (i.to_string(), self.lower_expr(e)))
                    .collect();
                Expr::lib_call("genList", args, span)
            }
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                let span = self.span(range);
                let mut args = Vec::new();
                for item in items {
                    let Some(key) = item.key else {
                        return self.unsupported_expr("dict unpacking", span);
                    };
                    let AstExpr::StringLiteral(ast::ExprStringLiteral { value: key, .. }) = key else {
                        return self.unsupported_expr("non-string dict key", span);
                    };
                    args.push((key.to_string(), self.lower_expr(item.value)));
                }
                Expr::lib_call("genDict", args, span)
            }
            AstExpr::BinOp(ast::ExprBinOp {
                left, op, right, range, ..
            }) => {
                let span = self.span(range);
                let left = self.lower_expr(*left);
                let right = self.lower_expr(*right);
                match convert_operator(op) {
                    Some(op) => Expr::new(
                        ExprKind::BinOp {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    ),
                    None => self.unsupported_expr("bitwise operator", span),
                }
            }
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, range, .. }) => {
                let span = self.span(range);
                let op = match op {
                    BoolOp::And => BinOp::And,
                    BoolOp::Or => BinOp::Or,
                };
                let mut values = values.into_iter();
                let first = values.next().map(|v| self.lower_expr(v));
                let Some(mut acc) = first else {
                    return self.unsupported_expr("empty boolean operation", span);
                };
                for value in values {
                    let right = self.lower_expr(value);
                    acc = Expr::new(
                        ExprKind::BinOp {
                            op,
                            left: Box::new(acc),
                            right: Box::new(right),
                        },
                        span,
                    );
                }
                acc
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, range, .. }) => {
                let span = self.span(range);
                let operand = self.lower_expr(*operand);
                let op = match op {
                    UnaryOp::Not => UnOp::Not,
                    UnaryOp::USub => UnOp::Neg,
                    UnaryOp::UAdd => UnOp::Pos,
                    UnaryOp::Invert => return self.unsupported_expr("bitwise invert", span),
                };
                Expr::new(
                    ExprKind::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                )
            }
            AstExpr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                range,
                ..
            }) => {
                let span = self.span(range);
                let ops = ops.into_vec();
                let comparators = comparators.into_vec();
                let mut operands = Vec::with_capacity(comparators.len() + 1);
                operands.push(self.lower_expr(*left));
                for comparator in comparators {
                    operands.push(self.lower_expr(comparator));
                }
                // `a < b < c` becomes `a < b and b < c`; the middle operand
                // is duplicated, which is harmless for this analysis.
                let mut conjuncts = Vec::with_capacity(ops.len());
                for (i, op) in ops.into_iter().enumerate() {
                    conjuncts.push(lower_compare_op(op, operands[i].clone(), operands[i + 1].clone(), span));
                }
                let mut iter = conjuncts.into_iter();
                let first = iter.next().expect("compare has at least one op");
                iter.fold(first, |acc, item| {
                    Expr::new(
                        ExprKind::BinOp {
                            op: BinOp::And,
                            left: Box::new(acc),
                            right: Box::new(item),
                        },
                        span,
                    )
                })
            }
            AstExpr::Call(ast::ExprCall {
                func, arguments, range, ..
            }) => {
                let span = self.span(range);
                // Zero-argument `super()` receives the enclosing method's
                // receiver explicitly, since the IR has no implicit scope.
                if let AstExpr::Name(ast::ExprName { id, .. }) = func.as_ref()
                    && id.as_str() == "super"
                    && arguments.args.is_empty()
                    && arguments.keywords.is_empty()
                {
                    return Expr::lib_call("super", vec![("self".to_owned(), Expr::name("self", span))], span);
                }
                let callee = self.lower_expr(*func);
                let ast::Arguments { args, keywords, .. } = arguments;
                let mut positional = Vec::new();
                for arg in args.into_vec() {
                    if matches!(arg, AstExpr::Starred(_)) {
                        return self.unsupported_expr("*args unpacking at call site", span);
                    }
                    positional.push(self.lower_expr(arg));
                }
                if keywords.is_empty() {
                    return Expr::call(callee, positional, span);
                }
                let mut lib_args = vec![("$func".to_owned(), callee)];
                for (i, arg) in positional.into_iter().enumerate() {
                    lib_args.push((i.to_string(), arg));
                }
                for keyword in keywords {
                    let Some(arg) = keyword.arg else {
                        return self.unsupported_expr("**kwargs unpacking at call site", span);
                    };
                    lib_args.push((arg.id.to_string(), self.lower_expr(keyword.value)));
                }
                Expr::lib_call("callKV", lib_args, span)
            }
            AstExpr::If(ast::ExprIf {
                test, body, orelse, range, ..
            }) => {
                let span = self.span(range);
                let args = vec![
                    ("test".to_owned(), self.lower_expr(*test)),
                    ("then".to_owned(), self.lower_expr(*body)),
                    ("else".to_owned(), self.lower_expr(*orelse)),
                ];
                Expr::lib_call("ifExp", args, span)
            }
            AstExpr::FString(ast::ExprFString { range, .. }) => {
                // Interpolated strings are opaque to shape analysis; a fresh
                // symbolic string is enough.
                self.unsupported_expr_of_sort("f-string", "str", self.span(range))
            }
            AstExpr::Starred(s) => self.unsupported_expr("starred expression", self.span(s.range)),
            AstExpr::Lambda(l) => self.unsupported_expr("lambda", self.span(l.range)),
            AstExpr::ListComp(c) => self.unsupported_expr_of_sort("list comprehension", "list", self.span(c.range)),
            AstExpr::SetComp(c) => self.unsupported_expr("set comprehension", self.span(c.range)),
            AstExpr::DictComp(c) => self.unsupported_expr("dict comprehension", self.span(c.range)),
            AstExpr::Generator(g) => self.unsupported_expr("generator expression", self.span(g.range)),
            AstExpr::Await(a) => self.unsupported_expr("await", self.span(a.range)),
            AstExpr::Yield(y) => self.unsupported_expr("yield", self.span(y.range)),
            AstExpr::YieldFrom(y) => self.unsupported_expr("yield from", self.span(y.range)),
            AstExpr::Named(ast::ExprNamed { range, .. }) => self.unsupported_expr("walrus operator", self.span(range)),
            AstExpr::Slice(s) => self.unsupported_expr("bare slice", self.span(s.range)),
            other => self.unsupported_expr("expression", self.span(other.range())),
        }
    }

    fn lower_slice(&mut self, object: Expr, slice: ast::ExprSlice, span: Option<CodeRange>) -> Expr {
        if slice.step.is_some() {
            return self.unsupported_expr("slice with step", span);
        }
        let mut args = vec![("object".to_owned(), object)];
        if let Some(lower) = slice.lower {
            args.push(("start".to_owned(), self.lower_expr(*lower)));
        }
        if let Some(upper) = slice.upper {
            args.push(("end".to_owned(), self.lower_expr(*upper)));
        }
        Expr::lib_call("slice", args, span)
    }

    fn unsupported_expr(&self, reason: &str, span: Option<CodeRange>) -> Expr {
        Expr::lib_call(
            "unsupported",
            vec![("reason".to_owned(), Expr::constant(ConstVal::Str(reason.to_owned()), span))],
            span,
        )
    }

    /// Unsupported expression with a sort hint so the handler can mint a
    /// fresh symbol of the right kind.
    fn unsupported_expr_of_sort(&self, reason: &str, sort: &str, span: Option<CodeRange>) -> Expr {
        Expr::lib_call(
            "unsupported",
            vec![
                ("reason".to_owned(), Expr::constant(ConstVal::Str(reason.to_owned()), span)),
                ("sort".to_owned(), Expr::constant(ConstVal::Str(sort.to_owned()), span)),
            ],
            span,
        )
    }

    fn unsupported_stmt(&self, reason: &str, span: Option<CodeRange>) -> Stmt {
        Stmt::new(StmtKind::Expr(self.unsupported_expr(reason, span)), span)
    }
}

fn lower_compare_op(op: CmpOp, left: Expr, right: Expr, span: Option<CodeRange>) -> Expr {
    let (op, left, right) = match op {
        CmpOp::Eq => (BinOp::Eq, left, right),
        CmpOp::NotEq => (BinOp::Neq, left, right),
        CmpOp::Lt => (BinOp::Lt, left, right),
        CmpOp::LtE => (BinOp::Lte, left, right),
        // `a > b` is lowered as `b < a`.
        CmpOp::Gt => (BinOp::Lt, right, left),
        CmpOp::GtE => (BinOp::Lte, right, left),
        CmpOp::Is => (BinOp::Is, left, right),
        CmpOp::IsNot => (BinOp::IsNot, left, right),
        CmpOp::In => (BinOp::In, left, right),
        CmpOp::NotIn => (BinOp::NotIn, left, right),
    };
    Expr::new(
        ExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn convert_operator(op: AstOperator) -> Option<BinOp> {
    match op {
        AstOperator::Add => Some(BinOp::Add),
        AstOperator::Sub => Some(BinOp::Sub),
        AstOperator::Mult => Some(BinOp::Mul),
        AstOperator::MatMult => Some(BinOp::MatMul),
        AstOperator::Div => Some(BinOp::TrueDiv),
        AstOperator::FloorDiv => Some(BinOp::FloorDiv),
        AstOperator::Mod => Some(BinOp::Mod),
        AstOperator::Pow => Some(BinOp::Pow),
        AstOperator::LShift
        | AstOperator::RShift
        | AstOperator::BitOr
        | AstOperator::BitXor
        | AstOperator::BitAnd => None,
    }
}

/// Collects names assigned by a statement into `out`, preserving first-seen
/// order. Does not descend into nested function or class bodies: those hoist
/// their own cells.
fn collect_assigned(statement: &AstStmt, out: &mut Vec<String>) {
    match statement {
        AstStmt::Assign(ast::StmtAssign { targets, .. }) => {
            for target in targets {
                collect_target_names(target, out);
            }
        }
        AstStmt::AugAssign(ast::StmtAugAssign { target, .. })
        | AstStmt::AnnAssign(ast::StmtAnnAssign { target, .. }) => collect_target_names(target, out),
        AstStmt::For(ast::StmtFor { target, body, orelse, .. }) => {
            collect_target_names(target, out);
            for statement in body.iter().chain(orelse) {
                collect_assigned(statement, out);
            }
        }
        AstStmt::If(ast::StmtIf {
            body, elif_else_clauses, ..
        }) => {
            for statement in body {
                collect_assigned(statement, out);
            }
            for clause in elif_else_clauses {
                for statement in &clause.body {
                    collect_assigned(statement, out);
                }
            }
        }
        AstStmt::While(ast::StmtWhile { body, orelse, .. }) => {
            for statement in body.iter().chain(orelse) {
                collect_assigned(statement, out);
            }
        }
        AstStmt::With(ast::StmtWith { items, body, .. }) => {
            for item in items {
                if let Some(var) = &item.optional_vars {
                    collect_target_names(var, out);
                }
            }
            for statement in body {
                collect_assigned(statement, out);
            }
        }
        AstStmt::Try(ast::StmtTry {
            body,
            orelse,
            finalbody,
            ..
        }) => {
            for statement in body.iter().chain(orelse).chain(finalbody) {
                collect_assigned(statement, out);
            }
        }
        AstStmt::Import(ast::StmtImport { names, .. }) => {
            for alias in names {
                match &alias.asname {
                    Some(asname) => push_name(out, asname.id.to_string()),
                    None => {
                        let qual = alias.name.id.to_string();
                        push_name(out, qual.split('.').next().unwrap_or(&qual).to_owned());
                    }
                }
            }
        }
        AstStmt::ImportFrom(ast::StmtImportFrom { names, .. }) => {
            for alias in names {
                if alias.name.id.as_str() == "*" {
                    continue;
                }
                match &alias.asname {
                    Some(asname) => push_name(out, asname.id.to_string()),
                    None => push_name(out, alias.name.id.to_string()),
                }
            }
        }
        AstStmt::ClassDef(class) => push_name(out, class.name.id.to_string()),
        _ => {}
    }
}

fn push_name(out: &mut Vec<String>, name: String) {
    if !out.contains(&name) {
        out.push(name);
    }
}

fn collect_target_names(target: &AstExpr, out: &mut Vec<String>) {
    match target {
        AstExpr::Name(ast::ExprName { id, .. }) => push_name(out, id.to_string()),
        AstExpr::Tuple(ast::ExprTuple { elts, .. }) | AstExpr::List(ast::ExprList { elts, .. }) => {
            for elt in elts {
                collect_target_names(elt, out);
            }
        }
        AstExpr::Starred(ast::ExprStarred { value, .. }) => collect_target_names(value, out),
        // Attribute and subscript targets write through existing cells.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(code: &str) -> Stmt {
        parse_module(code, 0).unwrap()
    }

    fn find_let_names(stmt: &Stmt, out: &mut Vec<String>) {
        if let StmtKind::Let { name, scope, .. } = &stmt.kind {
            out.push(name.clone());
            find_let_names(scope, out);
        }
    }

    #[test]
    fn assignments_are_hoisted_into_lets() {
        let tree = lower("x = 1\ny = x + 1\n");
        let mut names = Vec::new();
        find_let_names(&tree, &mut names);
        assert_eq!(names, vec!["x".to_owned(), "y".to_owned()]);
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = parse_module("def f(:\n", 0).unwrap_err();
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn comparison_chains_become_conjunctions() {
        let tree = lower("r = 1 < 2 < 3\n");
        let printed = tree.to_string();
        assert!(printed.contains("(bop and"), "printed: {printed}");
    }

    #[test]
    fn greater_than_is_flipped() {
        let tree = lower("r = a > b\n");
        let printed = tree.to_string();
        assert!(printed.contains("(bop < b a)"), "printed: {printed}");
    }

    #[test]
    fn import_binds_root_name() {
        let tree = lower("import torch.nn\n");
        let printed = tree.to_string();
        assert!(printed.contains("(assign torch (libcall \"import\" ((qualPath \"torch\"))))"), "printed: {printed}");
        assert!(printed.contains("\"torch.nn\""), "printed: {printed}");
    }

    #[test]
    fn keyword_calls_lower_to_call_kv() {
        let tree = lower("y = f(1, dim=0)\n");
        let printed = tree.to_string();
        assert!(printed.contains("(libcall \"callKV\" (($func f) (0 1) (dim 0)))"), "printed: {printed}");
    }

    #[test]
    fn unsupported_constructs_degrade() {
        let tree = lower("while True:\n    pass\n");
        let printed = tree.to_string();
        assert!(printed.contains("\"unsupported\""), "printed: {printed}");
    }

    #[test]
    fn tuple_unpacking_uses_a_temporary() {
        let tree = lower("a, b = pair\n");
        let printed = tree.to_string();
        assert!(printed.contains("(let $tmp0 pair"), "printed: {printed}");
        assert!(printed.contains("(assign a (subs $tmp0 0))"), "printed: {printed}");
        assert!(printed.contains("(assign b (subs $tmp0 1))"), "printed: {printed}");
    }

    #[test]
    fn spans_point_into_the_source() {
        let tree = lower("x = 1\nz = unknown\n");
        // dig out the assignment to z and check its line
        fn find_assign_span(stmt: &Stmt, name: &str) -> Option<CodeRange> {
            match &stmt.kind {
                StmtKind::Let { scope, .. } => find_assign_span(scope, name),
                StmtKind::Seq(stmts) => stmts.iter().find_map(|s| find_assign_span(s, name)),
                StmtKind::Assign { target, .. } => match &target.kind {
                    ExprKind::Name(n) if n == name => stmt.span,
                    _ => None,
                },
                _ => None,
            }
        }
        let span = find_assign_span(&tree, "z").expect("assignment to z");
        assert_eq!(span.start.line, 1);
    }
}
