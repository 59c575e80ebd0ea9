//! Error reporting and diagnostics for Sable.
//!
//! Diagnostics are produced by the inference engine and consumed by an
//! external renderer. No unification variables appear in user-facing text:
//! callers format types with sanitized (`a`, `b`, ...) variable names.

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is. Ordering is reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// The kind of problem a diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// A referenced variable or constructor is not in scope.
    UndefinedVariable,
    /// Two types could not be unified.
    UnificationFailure,
    /// Tuple, function or constructor arity disagrees.
    ArityMismatch,
    /// Occurs check: a variable would contain itself.
    InfiniteType,
    /// A type expression mentions an undeclared type parameter.
    UndefinedTypeVariable,
    /// Generic solver failure with a reason.
    ConstraintSolvingFailure,
    /// A match does not cover every value of its scrutinee.
    NonExhaustiveMatch,
    /// A match case can never be selected.
    UnreachablePattern,
    /// A match case is fully shadowed by one earlier case.
    ContradictoryPattern,
    /// The solver exceeded its iteration budget.
    DidNotConverge,
    /// A required record field is missing.
    MissingField,
    /// A closed record has a field that is not allowed.
    ExtraField,
    /// A record literal names the same field twice.
    DuplicateField,
    /// A type, alias or constructor is declared twice.
    DuplicateDefinition,
    /// A pattern shape the checker does not support.
    UnimplementedPattern,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::UndefinedVariable,
        Category::UnificationFailure,
        Category::ArityMismatch,
        Category::InfiniteType,
        Category::UndefinedTypeVariable,
        Category::ConstraintSolvingFailure,
        Category::NonExhaustiveMatch,
        Category::UnreachablePattern,
        Category::ContradictoryPattern,
        Category::DidNotConverge,
        Category::MissingField,
        Category::ExtraField,
        Category::DuplicateField,
        Category::DuplicateDefinition,
        Category::UnimplementedPattern,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::UndefinedVariable => "undefined_variable",
            Category::UnificationFailure => "unification_failure",
            Category::ArityMismatch => "arity_mismatch",
            Category::InfiniteType => "infinite_type",
            Category::UndefinedTypeVariable => "undefined_type_variable",
            Category::ConstraintSolvingFailure => "constraint_solving_failure",
            Category::NonExhaustiveMatch => "non_exhaustive_match",
            Category::UnreachablePattern => "unreachable_pattern",
            Category::ContradictoryPattern => "contradictory_pattern",
            Category::DidNotConverge => "did_not_converge",
            Category::MissingField => "missing_field",
            Category::ExtraField => "extra_field",
            Category::DuplicateField => "duplicate_field",
            Category::DuplicateDefinition => "duplicate_definition",
            Category::UnimplementedPattern => "unimplemented_pattern",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::UndefinedVariable => "E0001",
            Category::UnificationFailure => "E0002",
            Category::ArityMismatch => "E0003",
            Category::InfiniteType => "E0004",
            Category::UndefinedTypeVariable => "E0005",
            Category::ConstraintSolvingFailure => "E0006",
            Category::NonExhaustiveMatch => "E0007",
            Category::UnreachablePattern => "E0008",
            Category::ContradictoryPattern => "E0009",
            Category::DidNotConverge => "E0010",
            Category::MissingField => "E0011",
            Category::ExtraField => "E0012",
            Category::DuplicateField => "E0013",
            Category::DuplicateDefinition => "E0014",
            Category::UnimplementedPattern => "E0015",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::UndefinedVariable => "A referenced variable or constructor is undefined.",
            Category::UnificationFailure => "Expression type does not match the expected type.",
            Category::ArityMismatch => "A tuple, function or constructor has the wrong arity.",
            Category::InfiniteType => "A type would have to contain itself.",
            Category::UndefinedTypeVariable => "A type parameter is used without being declared.",
            Category::ConstraintSolvingFailure => "A type constraint could not be satisfied.",
            Category::NonExhaustiveMatch => "Pattern matching is missing one or more cases.",
            Category::UnreachablePattern => "A match case can never be reached.",
            Category::ContradictoryPattern => "A match case is shadowed by an earlier case.",
            Category::DidNotConverge => "Constraint solving exceeded its iteration budget.",
            Category::MissingField => "A required record field is missing.",
            Category::ExtraField => "A record contains a field not allowed in this context.",
            Category::DuplicateField => "A record field is given more than once.",
            Category::DuplicateDefinition => "A type or constructor is declared more than once.",
            Category::UnimplementedPattern => "This pattern form is not supported.",
        }
    }

    pub fn example_fix(self) -> &'static str {
        match self {
            Category::UndefinedVariable => "Define the missing name or fix the spelling.",
            Category::UnificationFailure => {
                "Adjust the expression or its annotation so the types agree."
            }
            Category::ArityMismatch => "Use the declared number of elements or arguments.",
            Category::InfiniteType => "Introduce a named recursive type instead.",
            Category::UndefinedTypeVariable => "Declare the parameter on the type or alias.",
            Category::ConstraintSolvingFailure => {
                "Follow the help text to align the involved types."
            }
            Category::NonExhaustiveMatch => "Add a wildcard or the missing cases.",
            Category::UnreachablePattern => "Remove the case or move it before the cases covering it.",
            Category::ContradictoryPattern => "Remove the shadowed case or reorder the cases.",
            Category::DidNotConverge => "Simplify the definition or raise `max_iterations`.",
            Category::MissingField => "Add the missing field or accept an open record.",
            Category::ExtraField => "Remove the field or widen the expected record type.",
            Category::DuplicateField => "Remove one of the duplicated fields.",
            Category::DuplicateDefinition => "Rename or remove one of the declarations.",
            Category::UnimplementedPattern => "Match with a wildcard and test the value in the case body.",
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of sable-ast's Span)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `sable-ast` spans to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0002).
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    pub location: Option<SourceLocation>,
    /// The construct that produced the failing constraint (e.g. "function argument").
    pub context: Option<String>,
    /// Additional labeled spans.
    pub labels: Vec<DiagLabel>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

/// A labeled source span within a diagnostic.
#[derive(Debug, Clone)]
pub struct DiagLabel {
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity,
            category,
            message: message.into(),
            location: None,
            context: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push(DiagLabel {
            location,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Key used to collapse near-duplicates: same category and message shape,
    /// ignoring location and inference-variable numbering.
    pub fn dedup_key(&self) -> (Category, String) {
        (self.category, normalize_message(&self.message))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

/// Replace raw inference-variable tokens (`t12`, `r3`) with a placeholder.
pub fn normalize_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let chars: Vec<char> = message.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let boundary_before =
            i == 0 || !(chars[i - 1].is_ascii_alphanumeric() || chars[i - 1] == '_');
        if (ch == 't' || ch == 'r') && boundary_before {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            let boundary_after =
                j == chars.len() || !(chars[j].is_ascii_alphanumeric() || chars[j] == '_');
            if j > i + 1 && boundary_after {
                out.push(ch);
                out.push('_');
                i = j;
                continue;
            }
        }
        out.push(ch);
        i += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn multiple(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl From<Diagnostic> for DiagnosticError {
    fn from(diag: Diagnostic) -> Self {
        Self::single(diag)
    }
}
