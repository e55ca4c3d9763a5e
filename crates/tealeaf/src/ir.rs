//! The lowered intermediate language.
//!
//! Python source is lowered (in `parse.rs`) into this small statement and
//! expression language before execution. Every node carries a source span
//! for diagnostics; spans never participate in structural equality. The
//! module also owns the textual IR form: a pretty-printer used by the
//! `extract_ir` option and a reader that parses the printed form back, so
//! lowered trees round-trip.

use std::fmt::{self, Write};

use crate::parse::CodeRange;

/// Literal constants of the lowered language.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ConstVal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

/// Binary operators, including comparisons and the boolean connectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "@")]
    MatMul,
    #[strum(serialize = "/")]
    TrueDiv,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Neq,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "is-not")]
    IsNot,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "not-in")]
    NotIn,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
}

impl BinOp {
    /// Dunder method name consulted for operator dispatch on objects.
    #[must_use]
    pub fn dunder(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("__add__"),
            Self::Sub => Some("__sub__"),
            Self::Mul => Some("__mul__"),
            Self::MatMul => Some("__matmul__"),
            Self::TrueDiv => Some("__truediv__"),
            Self::FloorDiv => Some("__floordiv__"),
            Self::Mod => Some("__mod__"),
            Self::Pow => Some("__pow__"),
            Self::Lt => Some("__lt__"),
            Self::Lte => Some("__le__"),
            Self::Eq => Some("__eq__"),
            Self::Neq => Some("__ne__"),
            Self::In | Self::NotIn => Some("__contains__"),
            Self::Is | Self::IsNot | Self::And | Self::Or => None,
        }
    }

    /// Reflected dunder tried on the right operand when the left one does
    /// not support the operation.
    #[must_use]
    pub fn reflected_dunder(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("__radd__"),
            Self::Sub => Some("__rsub__"),
            Self::Mul => Some("__rmul__"),
            Self::MatMul => Some("__rmatmul__"),
            Self::TrueDiv => Some("__rtruediv__"),
            Self::FloorDiv => Some("__rfloordiv__"),
            Self::Mod => Some("__rmod__"),
            Self::Pow => Some("__rpow__"),
            _ => None,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize)]
pub enum UnOp {
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "+")]
    Pos,
}

/// An expression with its source span. Equality ignores the span.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Expr {
    pub span: Option<CodeRange>,
    pub kind: ExprKind,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ExprKind {
    Const(ConstVal),
    Name(String),
    Attr {
        object: Box<Expr>,
        attr: String,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Universal call form routed to a registered handler by qualified name
    /// (e.g. `torch.conv2d`, `shape.repeat`, `genList`). Arguments are
    /// keyword pairs so handlers consume typed parameters by name.
    LibCall {
        func: String,
        args: Vec<(String, Expr)>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnOp,
        operand: Box<Expr>,
    },
    Tuple(Vec<Expr>),
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, span: Option<CodeRange>) -> Self {
        Self { span, kind }
    }

    #[must_use]
    pub fn name(name: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self::new(ExprKind::Name(name.into()), span)
    }

    #[must_use]
    pub fn constant(value: ConstVal, span: Option<CodeRange>) -> Self {
        Self::new(ExprKind::Const(value), span)
    }

    #[must_use]
    pub fn lib_call(func: impl Into<String>, args: Vec<(String, Expr)>, span: Option<CodeRange>) -> Self {
        Self::new(
            ExprKind::LibCall {
                func: func.into(),
                args,
            },
            span,
        )
    }

    #[must_use]
    pub fn attr(object: Self, attr: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self::new(
            ExprKind::Attr {
                object: Box::new(object),
                attr: attr.into(),
            },
            span,
        )
    }

    #[must_use]
    pub fn call(callee: Self, args: Vec<Self>, span: Option<CodeRange>) -> Self {
        Self::new(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            span,
        )
    }
}

/// One declared parameter of a lowered function.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A statement with its source span. Equality ignores the span.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stmt {
    pub span: Option<CodeRange>,
    pub kind: StmtKind,
}

impl PartialEq for Stmt {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StmtKind {
    Pass,
    Expr(Expr),
    Seq(Vec<Stmt>),
    /// Assignment to an existing binding, attribute or subscript.
    Assign { target: Expr, value: Expr },
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Box<Stmt>,
    },
    /// Bounded iteration over a value exposing a known length.
    ForIn {
        target: String,
        iter: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    /// Fresh cell for `name`, visible only inside `scope`.
    Let {
        name: String,
        init: Option<Expr>,
        scope: Box<Stmt>,
    },
    FunDef(Box<FunDef>),
}

/// A lowered function definition.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunDef {
    pub name: String,
    pub params: Vec<Param>,
    pub varargs: Option<String>,
    pub kwargs: Option<String>,
    /// Trailing entries of `params` that are keyword-only.
    pub key_only_count: usize,
    pub body: Stmt,
}

impl Stmt {
    #[must_use]
    pub fn new(kind: StmtKind, span: Option<CodeRange>) -> Self {
        Self { span, kind }
    }

    #[must_use]
    pub fn pass(span: Option<CodeRange>) -> Self {
        Self::new(StmtKind::Pass, span)
    }

    #[must_use]
    pub fn seq(stmts: Vec<Self>, span: Option<CodeRange>) -> Self {
        match stmts.len() {
            0 => Self::pass(span),
            1 => stmts.into_iter().next().expect("len checked"),
            _ => Self::new(StmtKind::Seq(stmts), span),
        }
    }
}

// ---------------------------------------------------------------------------
// Pretty printer
// ---------------------------------------------------------------------------

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StmtKind::Pass => f.write_str("(pass)"),
            StmtKind::Expr(e) => write!(f, "(expr {e})"),
            StmtKind::Seq(stmts) => {
                f.write_str("(seq")?;
                for stmt in stmts {
                    write!(f, " {stmt}")?;
                }
                f.write_char(')')
            }
            StmtKind::Assign { target, value } => write!(f, "(assign {target} {value})"),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "(if {cond} {then_branch} {else_branch})"),
            StmtKind::ForIn { target, iter, body } => write!(f, "(for {target} {iter} {body})"),
            StmtKind::Return(None) => f.write_str("(return)"),
            StmtKind::Return(Some(e)) => write!(f, "(return {e})"),
            StmtKind::Break => f.write_str("(break)"),
            StmtKind::Continue => f.write_str("(continue)"),
            StmtKind::Let { name, init, scope } => match init {
                Some(init) => write!(f, "(let {name} {init} {scope})"),
                None => write!(f, "(let {name} {scope})"),
            },
            StmtKind::FunDef(def) => {
                write!(f, "(fundef {} (", def.name)?;
                let positional = def.params.len() - def.key_only_count;
                let mut first = true;
                let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
                    if first {
                        first = false;
                        Ok(())
                    } else {
                        f.write_char(' ')
                    }
                };
                for param in &def.params[..positional] {
                    sep(f)?;
                    write_param(f, param)?;
                }
                if def.key_only_count > 0 || def.varargs.is_some() {
                    sep(f)?;
                    match &def.varargs {
                        Some(name) => write!(f, "*{name}")?,
                        None => f.write_char('*')?,
                    }
                }
                for param in &def.params[positional..] {
                    sep(f)?;
                    write_param(f, param)?;
                }
                if let Some(name) = &def.kwargs {
                    sep(f)?;
                    write!(f, "**{name}")?;
                }
                write!(f, ") {})", def.body)
            }
        }
    }
}

fn write_param(f: &mut fmt::Formatter<'_>, param: &Param) -> fmt::Result {
    match &param.default {
        Some(default) => write!(f, "({} {default})", param.name),
        None => f.write_str(&param.name),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Const(value) => write!(f, "{value}"),
            ExprKind::Name(name) => f.write_str(name),
            ExprKind::Attr { object, attr } => write!(f, "(attr {object} {attr})"),
            ExprKind::Subscript { object, index } => write!(f, "(subs {object} {index})"),
            ExprKind::Call { callee, args } => {
                write!(f, "(call {callee}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_char(')')
            }
            ExprKind::LibCall { func, args } => {
                write!(f, "(libcall \"{func}\" (")?;
                for (i, (name, value)) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write!(f, "({name} {value})")?;
                }
                f.write_str("))")
            }
            ExprKind::BinOp { op, left, right } => write!(f, "(bop {op} {left} {right})"),
            ExprKind::UnaryOp { op, operand } => write!(f, "(uop {op} {operand})"),
            ExprKind::Tuple(items) => {
                f.write_str("(tuple")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                f.write_char(')')
            }
        }
    }
}

impl fmt::Display for ConstVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => {
                // Keep the float marker so the reader re-tags the literal.
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Bool(true) => f.write_str("true"),
            Self::Bool(false) => f.write_str("false"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::None => f.write_str("none"),
        }
    }
}

// ---------------------------------------------------------------------------
// IR reader
// ---------------------------------------------------------------------------

/// Errors produced while reading textual IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrReadError {
    pub message: String,
    pub offset: usize,
}

impl fmt::Display for IrReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IR read error at byte {}: {}", self.offset, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Atom(String),
    Str(String),
}

struct Reader {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

/// Parses the textual IR form produced by the statement printer.
pub fn parse_ir(text: &str) -> Result<Stmt, IrReadError> {
    let tokens = tokenize(text)?;
    let mut reader = Reader { tokens, pos: 0 };
    let stmt = reader.stmt()?;
    if reader.pos != reader.tokens.len() {
        return Err(reader.error("trailing tokens after statement"));
    }
    Ok(stmt)
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, IrReadError> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '(' => {
                tokens.push((i, Token::Open));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::Close));
                i += 1;
            }
            '"' => {
                let start = i;
                i += 1;
                let mut out = String::new();
                loop {
                    if i >= bytes.len() {
                        return Err(IrReadError {
                            message: "unterminated string".to_owned(),
                            offset: start,
                        });
                    }
                    match bytes[i] as char {
                        '"' => {
                            i += 1;
                            break;
                        }
                        '\\' => {
                            i += 1;
                            let esc = bytes.get(i).copied().map(|b| b as char).ok_or(IrReadError {
                                message: "dangling escape".to_owned(),
                                offset: i,
                            })?;
                            out.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => other,
                            });
                            i += 1;
                        }
                        other => {
                            out.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Str(out)));
            }
            c if c.is_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    i += 1;
                }
                tokens.push((start, Token::Atom(text[start..i].to_owned())));
            }
        }
    }
    Ok(tokens)
}

impl Reader {
    fn error(&self, message: impl Into<String>) -> IrReadError {
        let offset = self.tokens.get(self.pos).map_or(0, |(offset, _)| *offset);
        IrReadError {
            message: message.into(),
            offset,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn next(&mut self) -> Result<Token, IrReadError> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        match token {
            Some(token) => {
                self.pos += 1;
                Ok(token)
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn expect_open(&mut self) -> Result<(), IrReadError> {
        match self.next()? {
            Token::Open => Ok(()),
            _ => Err(self.error("expected '('")),
        }
    }

    fn expect_close(&mut self) -> Result<(), IrReadError> {
        match self.next()? {
            Token::Close => Ok(()),
            _ => Err(self.error("expected ')'")),
        }
    }

    fn atom(&mut self) -> Result<String, IrReadError> {
        match self.next()? {
            Token::Atom(atom) => Ok(atom),
            _ => Err(self.error("expected atom")),
        }
    }

    fn stmt(&mut self) -> Result<Stmt, IrReadError> {
        self.expect_open()?;
        let head = self.atom()?;
        let kind = match head.as_str() {
            "pass" => StmtKind::Pass,
            "expr" => StmtKind::Expr(self.expr()?),
            "seq" => {
                let mut stmts = Vec::new();
                while self.peek() != Some(&Token::Close) {
                    stmts.push(self.stmt()?);
                }
                StmtKind::Seq(stmts)
            }
            "assign" => StmtKind::Assign {
                target: self.expr()?,
                value: self.expr()?,
            },
            "if" => StmtKind::If {
                cond: self.expr()?,
                then_branch: Box::new(self.stmt()?),
                else_branch: Box::new(self.stmt()?),
            },
            "for" => StmtKind::ForIn {
                target: self.atom()?,
                iter: self.expr()?,
                body: Box::new(self.stmt()?),
            },
            "return" => {
                if self.peek() == Some(&Token::Close) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expr()?))
                }
            }
            "break" => StmtKind::Break,
            "continue" => StmtKind::Continue,
            "let" => {
                let name = self.atom()?;
                let first = self.stmt_or_expr()?;
                match first {
                    StmtOrExpr::Stmt(scope) => StmtKind::Let {
                        name,
                        init: None,
                        scope: Box::new(scope),
                    },
                    StmtOrExpr::Expr(init) => StmtKind::Let {
                        name,
                        init: Some(init),
                        scope: Box::new(self.stmt()?),
                    },
                }
            }
            "fundef" => {
                let name = self.atom()?;
                let (params, varargs, kwargs, key_only_count) = self.params()?;
                let body = self.stmt()?;
                StmtKind::FunDef(Box::new(FunDef {
                    name,
                    params,
                    varargs,
                    kwargs,
                    key_only_count,
                    body,
                }))
            }
            other => return Err(self.error(format!("unknown statement head '{other}'"))),
        };
        self.expect_close()?;
        Ok(Stmt::new(kind, None))
    }

    fn params(&mut self) -> Result<(Vec<Param>, Option<String>, Option<String>, usize), IrReadError> {
        self.expect_open()?;
        let mut params = Vec::new();
        let mut varargs = None;
        let mut kwargs = None;
        let mut key_only_count = 0;
        let mut after_star = false;
        loop {
            match self.peek() {
                Some(Token::Close) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Open) => {
                    self.pos += 1;
                    let name = self.atom()?;
                    let default = self.expr()?;
                    self.expect_close()?;
                    params.push(Param {
                        name,
                        default: Some(default),
                    });
                    if after_star {
                        key_only_count += 1;
                    }
                }
                Some(Token::Atom(_)) => {
                    let atom = self.atom()?;
                    if let Some(rest) = atom.strip_prefix("**") {
                        kwargs = Some(rest.to_owned());
                    } else if atom == "*" {
                        after_star = true;
                    } else if let Some(rest) = atom.strip_prefix('*') {
                        varargs = Some(rest.to_owned());
                        after_star = true;
                    } else {
                        params.push(Param {
                            name: atom,
                            default: None,
                        });
                        if after_star {
                            key_only_count += 1;
                        }
                    }
                }
                _ => return Err(self.error("malformed parameter list")),
            }
        }
        Ok((params, varargs, kwargs, key_only_count))
    }

    fn stmt_or_expr(&mut self) -> Result<StmtOrExpr, IrReadError> {
        // A statement always starts with '(' and a statement head; anything
        // else is an expression. Disambiguate by peeking at the head atom.
        if self.peek() == Some(&Token::Open) {
            let head = self.tokens.get(self.pos + 1).map(|(_, token)| token.clone());
            if let Some(Token::Atom(head)) = head
                && matches!(
                    head.as_str(),
                    "pass"
                        | "expr"
                        | "seq"
                        | "assign"
                        | "if"
                        | "for"
                        | "return"
                        | "break"
                        | "continue"
                        | "let"
                        | "fundef"
                )
            {
                return Ok(StmtOrExpr::Stmt(self.stmt()?));
            }
        }
        Ok(StmtOrExpr::Expr(self.expr()?))
    }

    fn expr(&mut self) -> Result<Expr, IrReadError> {
        match self.next()? {
            Token::Str(s) => Ok(Expr::constant(ConstVal::Str(s), None)),
            Token::Atom(atom) => Ok(Expr::new(atom_expr(&atom), None)),
            Token::Open => {
                let head = self.atom()?;
                let kind = match head.as_str() {
                    "attr" => {
                        let object = self.expr()?;
                        let attr = self.atom()?;
                        ExprKind::Attr {
                            object: Box::new(object),
                            attr,
                        }
                    }
                    "subs" => ExprKind::Subscript {
                        object: Box::new(self.expr()?),
                        index: Box::new(self.expr()?),
                    },
                    "call" => {
                        let callee = self.expr()?;
                        let mut args = Vec::new();
                        while self.peek() != Some(&Token::Close) {
                            args.push(self.expr()?);
                        }
                        ExprKind::Call {
                            callee: Box::new(callee),
                            args,
                        }
                    }
                    "libcall" => {
                        let func = match self.next()? {
                            Token::Str(s) => s,
                            _ => return Err(self.error("libcall name must be a string")),
                        };
                        self.expect_open()?;
                        let mut args = Vec::new();
                        while self.peek() != Some(&Token::Close) {
                            self.expect_open()?;
                            let name = self.atom()?;
                            let value = self.expr()?;
                            self.expect_close()?;
                            args.push((name, value));
                        }
                        self.expect_close()?;
                        ExprKind::LibCall { func, args }
                    }
                    "bop" => {
                        let op: BinOp = self
                            .atom()?
                            .parse()
                            .map_err(|_| self.error("unknown binary operator"))?;
                        ExprKind::BinOp {
                            op,
                            left: Box::new(self.expr()?),
                            right: Box::new(self.expr()?),
                        }
                    }
                    "uop" => {
                        let op: UnOp = self.atom()?.parse().map_err(|_| self.error("unknown unary operator"))?;
                        ExprKind::UnaryOp {
                            op,
                            operand: Box::new(self.expr()?),
                        }
                    }
                    "tuple" => {
                        let mut items = Vec::new();
                        while self.peek() != Some(&Token::Close) {
                            items.push(self.expr()?);
                        }
                        ExprKind::Tuple(items)
                    }
                    other => return Err(self.error(format!("unknown expression head '{other}'"))),
                };
                self.expect_close()?;
                Ok(Expr::new(kind, None))
            }
            Token::Close => Err(self.error("unexpected ')'")),
        }
    }
}

enum StmtOrExpr {
    Stmt(Stmt),
    Expr(Expr),
}

fn atom_expr(atom: &str) -> ExprKind {
    match atom {
        "true" => return ExprKind::Const(ConstVal::Bool(true)),
        "false" => return ExprKind::Const(ConstVal::Bool(false)),
        "none" => return ExprKind::Const(ConstVal::None),
        _ => {}
    }
    if let Ok(v) = atom.parse::<i64>() {
        return ExprKind::Const(ConstVal::Int(v));
    }
    if let Ok(v) = atom.parse::<f64>()
        && atom.contains(['.', 'e', 'E'])
    {
        return ExprKind::Const(ConstVal::Float(v));
    }
    ExprKind::Name(atom.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Expr {
        Expr::name(n, None)
    }

    #[test]
    fn print_and_reparse_round_trip() {
        let body = Stmt::new(
            StmtKind::Seq(vec![
                Stmt::new(
                    StmtKind::Assign {
                        target: name("total"),
                        value: Expr::new(
                            ExprKind::BinOp {
                                op: BinOp::Add,
                                left: Box::new(name("total")),
                                right: Box::new(name("i")),
                            },
                            None,
                        ),
                    },
                    None,
                ),
                Stmt::new(StmtKind::Return(Some(name("total"))), None),
            ]),
            None,
        );
        let tree = Stmt::new(
            StmtKind::Let {
                name: "total".to_owned(),
                init: Some(Expr::constant(ConstVal::Int(0), None)),
                scope: Box::new(Stmt::new(
                    StmtKind::ForIn {
                        target: "i".to_owned(),
                        iter: name("xs"),
                        body: Box::new(body),
                    },
                    None,
                )),
            },
            None,
        );
        let printed = tree.to_string();
        let reparsed = parse_ir(&printed).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn fundef_round_trip_keeps_signature() {
        let def = FunDef {
            name: "f".to_owned(),
            params: vec![
                Param {
                    name: "a".to_owned(),
                    default: None,
                },
                Param {
                    name: "b".to_owned(),
                    default: Some(Expr::constant(ConstVal::Int(3), None)),
                },
                Param {
                    name: "mode".to_owned(),
                    default: Some(Expr::constant(ConstVal::Str("sum".to_owned()), None)),
                },
            ],
            varargs: Some("rest".to_owned()),
            kwargs: Some("kw".to_owned()),
            key_only_count: 1,
            body: Stmt::new(StmtKind::Return(None), None),
        };
        let tree = Stmt::new(StmtKind::FunDef(Box::new(def)), None);
        let reparsed = parse_ir(&tree.to_string()).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn libcall_round_trip() {
        let call = Expr::lib_call(
            "torch.conv2d",
            vec![
                ("input".to_owned(), name("x")),
                ("weight".to_owned(), name("w")),
                ("groups".to_owned(), Expr::constant(ConstVal::Int(1), None)),
            ],
            None,
        );
        let tree = Stmt::new(StmtKind::Expr(call), None);
        let reparsed = parse_ir(&tree.to_string()).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn float_literals_keep_their_tag() {
        let tree = Stmt::new(StmtKind::Expr(Expr::constant(ConstVal::Float(2.0), None)), None);
        let reparsed = parse_ir(&tree.to_string()).unwrap();
        assert_eq!(reparsed, tree);
        let tree = Stmt::new(StmtKind::Expr(Expr::constant(ConstVal::Int(2), None)), None);
        let reparsed = parse_ir(&tree.to_string()).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn string_escapes_round_trip() {
        let tree = Stmt::new(
            StmtKind::Expr(Expr::constant(ConstVal::Str("a\"b\nc".to_owned()), None)),
            None,
        );
        let reparsed = parse_ir(&tree.to_string()).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn read_error_reports_offset() {
        let err = parse_ir("(unknownhead)").unwrap_err();
        assert!(err.message.contains("unknownhead"));
    }
}
