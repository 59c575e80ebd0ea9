//! AST node definitions and source spans for Sable.
//!
//! The parser lives outside this workspace. Type inference consumes these
//! trees read-only; every node carries a [`Span`] so that inferred types and
//! diagnostics can point back at source.

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// Create a span that covers both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        debug_assert_eq!(
            self.file, other.file,
            "cannot merge spans from different files"
        );
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// A synthetic span for compiler-generated nodes.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            start: 0,
            end: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.file == FileId(u32::MAX)
    }
}

/// A value paired with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Literal values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
    Unit,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal value.
    Lit(Lit),

    /// Variable reference.
    Var(String),

    /// Function application: `func(args)`. Zero arguments is a `Unit` call.
    Call { func: Box<Expr>, args: Vec<Expr> },

    /// Binary operator: `left op right`.
    BinaryOp {
        op: Spanned<BinOp>,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operator: `-x`, `!b`.
    UnaryOp {
        op: Spanned<UnaryOp>,
        operand: Box<Expr>,
    },

    /// `if condition -> then | else`.
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// Lambda: `fn(params) -> body`. Several parameters curry.
    Lambda { params: Vec<Param>, body: Box<Expr> },

    /// `let [rec] name[(params)][: T] = value [in body]`.
    ///
    /// A missing body only occurs for top-level bindings.
    Let {
        binding: Box<LetBinding>,
        body: Option<Box<Expr>>,
    },

    /// Record literal: `{name: e, ...spread, age: e}`. Item order is source order.
    Record(Vec<RecordItem>),

    /// Field projection: `expr.field`.
    FieldAccess {
        expr: Box<Expr>,
        field: Spanned<String>,
    },

    /// Tuple literal: `(a, b, c)`.
    Tuple(Vec<Expr>),

    /// `match scrutinee with p1 -> e1 | p2 -> e2`.
    Match {
        scrutinee: Box<Expr>,
        cases: Vec<MatchCase>,
    },

    /// Type ascription: `(expr : T)`.
    Annotated {
        expr: Box<Expr>,
        annotation: Spanned<TypeExpr>,
    },
}

/// One entry of a record literal.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordItem {
    Field(Spanned<String>, Expr),
    /// `...expr`
    Spread(Expr),
}

/// A lambda or function-sugar parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Spanned<String>,
    pub annotation: Option<Spanned<TypeExpr>>,
}

/// The binding half of a `let`, shared by expression and statement forms.
#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    pub name: Spanned<String>,
    pub recursive: bool,
    /// `Some` for function sugar: `let f(x, y) = body`.
    pub params: Option<Vec<Param>>,
    /// Type of the value, or the return type when `params` is present.
    pub annotation: Option<Spanned<TypeExpr>>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub body: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub type Pattern = Spanned<PatternKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    /// Matches anything, binds nothing.
    Wildcard,

    /// Binds the matched value to a name.
    Var(String),

    /// Matches a literal value.
    Lit(Lit),

    /// Matches a tuple: `(a, b)`.
    Tuple(Vec<Pattern>),

    /// Matches any record with at least these fields: `{tag: "ok", value: v}`.
    Record { fields: Vec<(Spanned<String>, Pattern)> },

    /// Matches an ADT constructor: `Cons(x, rest)`, `Nil()`.
    Constructor {
        name: Spanned<String>,
        args: Vec<Pattern>,
    },

    /// A pattern with an explicit type: `x: Int`.
    Annotated {
        pattern: Box<Pattern>,
        annotation: Spanned<TypeExpr>,
    },
}

impl PatternKind {
    /// Returns the variable name if this is a simple `Var` pattern.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            PatternKind::Var(name) => Some(name.as_str()),
            _ => None,
        }
    }

    /// The optional type annotation carried by this pattern.
    pub fn annotation(&self) -> Option<&Spanned<TypeExpr>> {
        match self {
            PatternKind::Annotated { annotation, .. } => Some(annotation),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Type expressions
// ---------------------------------------------------------------------------

/// A syntactic type expression (not a semantic type, which is in `sable-types`).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// `Int`, `a`, `Shape`.
    Named(String),
    /// `List(Int)`, `Pair(a, b)`.
    Applied(String, Vec<TypeExpr>),
    /// `(A, B) -> C`.
    Function(Vec<TypeExpr>, Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    /// `{name: String, age: Int | r}`.
    Record {
        fields: Vec<(String, TypeExpr)>,
        rest: Option<String>,
    },
    /// `A | B`.
    Union(Vec<TypeExpr>),
    /// `A & B`.
    Intersection(Vec<TypeExpr>),
    /// `"success"`.
    LiteralString(String),
}

// ---------------------------------------------------------------------------
// Top-level statements
// ---------------------------------------------------------------------------

pub type Stmt = Spanned<StmtKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Top-level `let` without a body; its generalized scheme is exported.
    Let(LetBinding),
    Expr(Expr),
    /// `type List(a) = Nil | Cons(a, List(a))`.
    TypeDecl(TypeDecl),
    /// `alias Result = {tag: "ok", value: Int} | {tag: "err", msg: String}`.
    Alias(AliasDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: Spanned<String>,
    pub params: Vec<String>,
    pub variants: Vec<VariantDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub name: Spanned<String>,
    pub fields: Vec<Spanned<TypeExpr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasDecl {
    pub name: Spanned<String>,
    pub params: Vec<String>,
    pub target: Spanned<TypeExpr>,
}

/// A complete script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_covers_both_spans() {
        let a = Span::new(FileId(0), 4, 9);
        let b = Span::new(FileId(0), 1, 6);
        assert_eq!(a.merge(b), Span::new(FileId(0), 1, 9));
    }

    #[test]
    fn synthetic_span_is_recognizable() {
        assert!(Span::synthetic().is_synthetic());
        assert!(!Span::new(FileId(0), 0, 0).is_synthetic());
    }

    #[test]
    fn pattern_annotation_is_exposed() {
        let span = Span::new(FileId(0), 0, 1);
        let inner = Spanned::new(PatternKind::Var("x".into()), span);
        let annotated = PatternKind::Annotated {
            pattern: Box::new(inner),
            annotation: Spanned::new(TypeExpr::Named("Int".into()), span),
        };
        assert_eq!(
            annotated.annotation().map(|a| &a.node),
            Some(&TypeExpr::Named("Int".into()))
        );
        assert_eq!(PatternKind::Var("y".into()).as_var(), Some("y"));
    }
}
