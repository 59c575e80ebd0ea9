//! Constraint-based HM inference for Sable.
//!
//! This crate implements:
//! - Constraint generation over the expression AST (`typeck`)
//! - A worklist solver with Rémy-style row unification, union/intersection
//!   set-cover matching, recursive-type unfolding and alias expansion
//! - Let-generalization with class bounds carried in type schemes
//! - Match exhaustiveness and reachability analysis (`exhaustive`)
//!
//! Constraints are immutable values collected into a persistent
//! [`ConstraintSet`]; every constraint carries provenance for error reporting.

pub mod exhaustive;
pub mod program;
pub mod recovery;
pub mod registry;
pub mod trace;
pub mod typeck;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use sable_ast::Span;
use sable_diag::Severity;
use sable_types::{
    Label, RowType, RowVarId, Substitution, Type, TypeVarId, free_row_vars, free_type_vars,
    sanitize_type_display, sanitize_type_pair_display,
};

use crate::exhaustive::{Case, MatchAnalysis};
use crate::registry::TypeRegistry;
use crate::trace::{UnifyAction, UnifyStep};

// Re-export for convenience.
pub use program::{CheckedProgram, InferenceContext, check_program, infer_expr};
pub use recovery::ErrorRecovery;
pub use sable_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
pub use sable_types::TypeScheme;

/// Class satisfied by the operands of `+`.
pub const ADDABLE: &str = "Addable";
/// Class satisfied by the operands of `<`, `<=`, `>` and `>=`.
pub const COMPARABLE: &str = "Comparable";

// ---------------------------------------------------------------------------
// Fresh variables
// ---------------------------------------------------------------------------

/// Per-compilation-unit source of fresh type and row variables.
///
/// Numbering starts at zero for every unit, so repeated runs over the same
/// program produce identical variable numbers.
#[derive(Debug, Clone, Default)]
pub struct VarSupply {
    next: u32,
}

impl VarSupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_type_var(&mut self) -> TypeVarId {
        let id = TypeVarId(self.next);
        self.next += 1;
        id
    }

    pub fn fresh_type(&mut self) -> Type {
        Type::Var(self.fresh_type_var())
    }

    pub fn fresh_row_var(&mut self) -> RowVarId {
        let id = RowVarId(self.next);
        self.next += 1;
        id
    }

    /// Number of variables handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which matches receive exhaustiveness diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustivenessPolicy {
    /// Exhaustiveness constraints are discharged without analysis.
    Off,
    /// Unreachable cases are always reported; missing cases only for
    /// scrutinees with a resolved, enumerable shape.
    #[default]
    Enumerable,
    /// Every non-exhaustive match is an error.
    Strict,
}

/// Options threaded through one compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Worklist budget for a single solve.
    pub max_iterations: usize,
    /// Recent constraints quoted when the budget is exhausted.
    pub trace_limit: usize,
    pub exhaustiveness: ExhaustivenessPolicy,
    /// Record unification and inference traces.
    pub tracing: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            trace_limit: 8,
            exhaustiveness: ExhaustivenessPolicy::Enumerable,
            tracing: false,
        }
    }
}

impl CheckOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_trace_limit(mut self, trace_limit: usize) -> Self {
        self.trace_limit = trace_limit;
        self
    }

    pub fn with_exhaustiveness(mut self, policy: ExhaustivenessPolicy) -> Self {
        self.exhaustiveness = policy;
        self
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }
}

// ---------------------------------------------------------------------------
// Provenance: why a constraint exists
// ---------------------------------------------------------------------------

/// Tracks the origin of a constraint for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub span: Span,
    pub reason: Reason,
}

impl Provenance {
    pub fn new(span: Span, reason: Reason) -> Self {
        Self { span, reason }
    }
}

/// Why a constraint was generated.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// A literal has its primitive type.
    Literal,
    /// A variable use matches its instantiated scheme.
    VarUse,
    /// Callee must accept the supplied arguments.
    FunctionCall,
    /// Operands of a binary operator.
    BinaryOp(&'static str),
    /// Operand of a unary operator.
    UnaryOp(&'static str),
    /// `if` condition must be Bool.
    IfCondition,
    /// Result of an `if` covers both branches.
    IfBranches,
    /// Let binding: value type matches annotation.
    LetAnnotation,
    /// Expression type must match an explicit ascription.
    TypeAscription,
    /// A recursive binding's placeholder matches its value.
    RecursiveBinding,
    /// What solving a let value on its own learned about its variables.
    LetValue,
    /// Record field type must match.
    RecordField { label: Label },
    /// Spread operand and merged result.
    Spread,
    /// Projection requires the field.
    FieldAccess { label: Label },
    /// Pattern must match the scrutinee type.
    PatternMatch,
    /// Result of a match covers every case body.
    MatchArms,
    /// A class bound must be satisfied.
    ClassBound { class: String },
}

impl Reason {
    /// Short description of the construct, used as diagnostic context.
    pub fn context(&self) -> &'static str {
        match self {
            Reason::Literal => "literal",
            Reason::VarUse => "variable use",
            Reason::FunctionCall => "function call",
            Reason::BinaryOp(_) => "binary operator",
            Reason::UnaryOp(_) => "unary operator",
            Reason::IfCondition => "if condition",
            Reason::IfBranches => "if expression",
            Reason::LetAnnotation => "let annotation",
            Reason::TypeAscription => "type ascription",
            Reason::RecursiveBinding => "recursive binding",
            Reason::LetValue => "let binding",
            Reason::RecordField { .. } => "record field",
            Reason::Spread => "record spread",
            Reason::FieldAccess { .. } => "field access",
            Reason::PatternMatch => "pattern",
            Reason::MatchArms => "match expression",
            Reason::ClassBound { .. } => "class bound",
        }
    }
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// One entry of a record merge, in source order. Later entries win.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeEntry {
    Spread(Type),
    Field(Label, Type),
}

/// A constraint generated during inference.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Two types must unify.
    Equality {
        expected: Type,
        actual: Type,
        provenance: Provenance,
    },
    /// A type must belong to a class (`Addable`, `Comparable`).
    Instance {
        ty: Type,
        class: String,
        provenance: Provenance,
    },
    /// A type must resolve to some record.
    RecordType { ty: Type, provenance: Provenance },
    /// `result` is the left-to-right override merge of `entries`.
    Merge {
        result: Type,
        entries: Vec<MergeEntry>,
        provenance: Provenance,
    },
    /// Deferred match analysis, run once the scrutinee is resolved.
    Exhaustiveness {
        scrutinee: Type,
        cases: Vec<Case>,
        provenance: Provenance,
    },
}

impl Constraint {
    pub fn equality(expected: Type, actual: Type, span: Span, reason: Reason) -> Self {
        Constraint::Equality {
            expected,
            actual,
            provenance: Provenance::new(span, reason),
        }
    }

    pub fn instance(ty: Type, class: impl Into<String>, span: Span) -> Self {
        let class = class.into();
        Constraint::Instance {
            ty,
            provenance: Provenance::new(
                span,
                Reason::ClassBound {
                    class: class.clone(),
                },
            ),
            class,
        }
    }

    pub fn provenance(&self) -> &Provenance {
        match self {
            Constraint::Equality { provenance, .. }
            | Constraint::Instance { provenance, .. }
            | Constraint::RecordType { provenance, .. }
            | Constraint::Merge { provenance, .. }
            | Constraint::Exhaustiveness { provenance, .. } => provenance,
        }
    }
}

/// An immutable, ordered collection of constraints.
///
/// Cloning is cheap and `add`/`union` share structure with their inputs;
/// iteration yields constraints in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    root: Option<Rc<Node>>,
    len: usize,
}

#[derive(Debug)]
enum Node {
    Leaf(Constraint),
    Concat(Rc<Node>, Rc<Node>),
}

impl ConstraintSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(constraints: impl IntoIterator<Item = Constraint>) -> Self {
        constraints
            .into_iter()
            .fold(Self::empty(), |set, constraint| set.add(constraint))
    }

    pub fn add(&self, constraint: Constraint) -> Self {
        self.union(&Self {
            root: Some(Rc::new(Node::Leaf(constraint))),
            len: 1,
        })
    }

    pub fn union(&self, other: &ConstraintSet) -> Self {
        match (&self.root, &other.root) {
            (None, _) => other.clone(),
            (_, None) => self.clone(),
            (Some(left), Some(right)) => Self {
                root: Some(Rc::new(Node::Concat(left.clone(), right.clone()))),
                len: self.len + other.len,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> ConstraintIter<'_> {
        ConstraintIter {
            stack: self.root.iter().map(|node| node.as_ref()).collect(),
        }
    }

    /// Snapshot as an ordered list.
    pub fn all(&self) -> Vec<Constraint> {
        self.iter().cloned().collect()
    }
}

impl FromIterator<Constraint> for ConstraintSet {
    fn from_iter<I: IntoIterator<Item = Constraint>>(iter: I) -> Self {
        Self::of(iter)
    }
}

/// In-order traversal of a [`ConstraintSet`].
pub struct ConstraintIter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for ConstraintIter<'a> {
    type Item = &'a Constraint;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Node::Leaf(constraint) => return Some(constraint),
                Node::Concat(left, right) => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// Resolves a constraint set into a substitution.
///
/// Failures are pushed onto the unifier's diagnostic lists and never abort
/// the walk, so one solve reports every independent problem.
pub struct Unifier<'a> {
    registry: &'a TypeRegistry,
    supply: &'a mut VarSupply,
    options: CheckOptions,
    pub substitution: Substitution,
    /// Variables standing for expressions that already failed to type.
    error_vars: BTreeSet<TypeVarId>,
    /// Class obligations on variables that stayed unresolved.
    residuals: BTreeMap<TypeVarId, BTreeSet<String>>,
    /// Constraints run after the worklist quiesces.
    deferred: Vec<Constraint>,
    /// Coinductive hypotheses for recursive-type unification.
    assumptions: Vec<(Type, Type)>,
    match_reports: Vec<(Span, MatchAnalysis)>,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    tracing: bool,
    unify_trace: Vec<UnifyStep>,
}

/// Why a merge cannot be computed yet.
enum MergeBlocker {
    Operand(TypeVarId),
    Tail { rest: RowVarId, labels: Vec<Label> },
}

enum Progress {
    Done,
    Blocked(Constraint),
}

struct Snapshot {
    substitution: Substitution,
    error_len: usize,
    error_vars: BTreeSet<TypeVarId>,
}

impl<'a> Unifier<'a> {
    pub fn new(registry: &'a TypeRegistry, supply: &'a mut VarSupply, options: CheckOptions) -> Self {
        Self {
            registry,
            supply,
            options,
            substitution: Substitution::new(),
            error_vars: BTreeSet::new(),
            residuals: BTreeMap::new(),
            deferred: Vec::new(),
            assumptions: Vec::new(),
            match_reports: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            tracing: options.tracing,
            unify_trace: Vec::new(),
        }
    }

    /// Treat these variables as absorbing error placeholders.
    pub fn with_error_vars(mut self, vars: impl IntoIterator<Item = TypeVarId>) -> Self {
        self.error_vars.extend(vars);
        self
    }

    /// Disable trace recording regardless of options (used for local let solves).
    pub fn without_tracing(mut self) -> Self {
        self.tracing = false;
        self
    }

    // -----------------------------------------------------------------------
    // Solving
    // -----------------------------------------------------------------------

    /// Solve every constraint in the set.
    ///
    /// Equalities run in order. Record and merge constraints whose operands
    /// are still variables wait at the back of the worklist; when only such
    /// constraints remain, the oldest blocked operand is forced to an open
    /// record. Class obligations and match analysis run after the worklist
    /// is empty.
    pub fn solve(&mut self, constraints: &ConstraintSet) -> Result<(), DiagnosticError> {
        let mut queue: VecDeque<Constraint> = constraints.iter().cloned().collect();
        let mut recent = VecDeque::with_capacity(self.options.trace_limit.max(1));
        let mut blocked_run = 0usize;
        let mut iterations = 0usize;

        while let Some(constraint) = queue.pop_front() {
            iterations += 1;
            if self.options.trace_limit > 0 {
                if recent.len() == self.options.trace_limit {
                    recent.pop_front();
                }
                recent.push_back(constraint_trace_entry(&constraint));
            }

            if iterations > self.options.max_iterations {
                self.errors.push(did_not_converge_diag(
                    self.options.max_iterations,
                    &recent,
                    constraint.provenance().span,
                ));
                queue.clear();
                break;
            }

            match self.apply_constraint(constraint) {
                Progress::Done => blocked_run = 0,
                Progress::Blocked(constraint) => {
                    queue.push_back(constraint);
                    blocked_run += 1;
                    if blocked_run >= queue.len() {
                        self.force_blocked(&queue);
                        blocked_run = 0;
                    }
                }
            }
        }

        self.run_deferred();

        if self.has_errors() {
            Err(DiagnosticError::multiple(self.errors.clone()))
        } else {
            Ok(())
        }
    }

    fn apply_constraint(&mut self, constraint: Constraint) -> Progress {
        match constraint {
            Constraint::Equality {
                expected,
                actual,
                provenance,
            } => {
                self.unify_immediate(&expected, &actual, &provenance);
                Progress::Done
            }
            Constraint::RecordType { ty, provenance } => {
                match self.resolve_shape(&ty) {
                    Type::Var(v) if !self.error_vars.contains(&v) => {
                        return Progress::Blocked(Constraint::RecordType { ty, provenance });
                    }
                    Type::Record(_) => {}
                    resolved if self.is_error_type(&resolved) => {}
                    resolved => {
                        self.errors.push(
                            Diagnostic::error(
                                Category::ConstraintSolvingFailure,
                                format!(
                                    "spread operand must be a record, found `{}`",
                                    sanitize_type_display(&resolved)
                                ),
                            )
                            .at(span_to_location(provenance.span))
                            .with_context(provenance.reason.context()),
                        );
                    }
                }
                Progress::Done
            }
            Constraint::Merge {
                result,
                entries,
                provenance,
            } => self.apply_merge(result, entries, provenance),
            deferred @ (Constraint::Instance { .. } | Constraint::Exhaustiveness { .. }) => {
                self.deferred.push(deferred);
                Progress::Done
            }
        }
    }

    fn apply_merge(
        &mut self,
        result: Type,
        entries: Vec<MergeEntry>,
        provenance: Provenance,
    ) -> Progress {
        if self.merge_blocker(&entries).is_some() {
            return Progress::Blocked(Constraint::Merge {
                result,
                entries,
                provenance,
            });
        }

        let mut merged = RowType::empty_closed();
        for entry in &entries {
            match entry {
                MergeEntry::Field(label, ty) => merged.set(label.clone(), ty.clone()),
                MergeEntry::Spread(ty) => match self.resolve_shape(ty) {
                    Type::Record(row) => {
                        for (label, field_ty) in row.fields {
                            merged.set(label, field_ty);
                        }
                        if row.rest.is_some() {
                            merged.rest = row.rest;
                        }
                    }
                    // The spread's own RecordType constraint reports non-records.
                    _ => return Progress::Done,
                },
            }
        }

        self.push_unify_step(
            UnifyAction::Decompose,
            &result,
            &Type::Record(merged.clone()),
            format!("merge of {} entries", entries.len()),
        );
        self.unify_immediate(&result, &Type::Record(merged), &provenance);
        Progress::Done
    }

    /// What keeps a merge from being computed yet: a spread operand that is
    /// still a variable, or an open spread whose tail might override labels
    /// written before it.
    fn merge_blocker(&self, entries: &[MergeEntry]) -> Option<MergeBlocker> {
        let mut written: Vec<Label> = Vec::new();
        for entry in entries {
            match entry {
                MergeEntry::Field(label, _) => {
                    if !written.contains(label) {
                        written.push(label.clone());
                    }
                }
                MergeEntry::Spread(ty) => match self.resolve_shape(ty) {
                    Type::Var(v) if !self.error_vars.contains(&v) => {
                        return Some(MergeBlocker::Operand(v));
                    }
                    Type::Record(row) => {
                        if let Some(rest) = row.rest {
                            let shadowed: Vec<Label> = written
                                .iter()
                                .filter(|label| !row.has(label))
                                .cloned()
                                .collect();
                            if !shadowed.is_empty() {
                                return Some(MergeBlocker::Tail {
                                    rest,
                                    labels: shadowed,
                                });
                            }
                        }
                        for (label, _) in row.fields {
                            if !written.contains(&label) {
                                written.push(label);
                            }
                        }
                    }
                    _ => return None,
                },
            }
        }
        None
    }

    /// Every queued constraint is blocked. A blocked operand variable
    /// becomes an open empty record; an open spread tail that may shadow
    /// earlier labels is made to carry them, so the spread's value wins.
    fn force_blocked(&mut self, queue: &VecDeque<Constraint>) {
        for constraint in queue {
            let blocker = match constraint {
                Constraint::RecordType { ty, .. } => match self.resolve_shape(ty) {
                    Type::Var(v) if !self.error_vars.contains(&v) => {
                        Some(MergeBlocker::Operand(v))
                    }
                    _ => None,
                },
                Constraint::Merge { entries, .. } => self.merge_blocker(entries),
                _ => None,
            };
            match blocker {
                Some(MergeBlocker::Operand(v)) => {
                    let row = RowType::empty_open(self.supply.fresh_row_var());
                    self.push_unify_step(
                        UnifyAction::Bind,
                        &Type::Var(v),
                        &Type::Record(row.clone()),
                        format!("t{} := open record", v.0),
                    );
                    self.substitution.bind_type(v, Type::Record(row));
                    return;
                }
                Some(MergeBlocker::Tail { rest, labels }) => {
                    let fields = labels
                        .into_iter()
                        .map(|label| (label, Type::Var(self.supply.fresh_type_var())))
                        .collect();
                    let row = RowType::open(fields, self.supply.fresh_row_var());
                    self.push_unify_step(
                        UnifyAction::Bind,
                        &Type::Record(RowType::empty_open(rest)),
                        &Type::Record(row.clone()),
                        format!("r{} := spread supplies shadowed fields", rest.0),
                    );
                    self.substitution.bind_row(rest, row);
                    return;
                }
                None => {}
            }
        }
    }

    fn run_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for constraint in deferred {
            match constraint {
                Constraint::Instance {
                    ty,
                    class,
                    provenance,
                } => self.check_instance(&ty, &class, &provenance),
                Constraint::Exhaustiveness {
                    scrutinee,
                    cases,
                    provenance,
                } => self.check_match(&scrutinee, &cases, provenance.span),
                other => {
                    let _ = self.apply_constraint(other);
                }
            }
        }
    }

    fn check_instance(&mut self, ty: &Type, class: &str, provenance: &Provenance) {
        let resolved = self.resolve_shape(ty);
        if self.is_error_type(&resolved) {
            return;
        }
        if let Type::Var(v) = resolved {
            self.residuals.entry(v).or_default().insert(class.to_string());
            return;
        }
        match class_admits(class, &resolved, self.registry) {
            Some(true) => {}
            Some(false) => {
                let shown = sanitize_type_display(&resolved);
                let mut diag = Diagnostic::error(
                    Category::ConstraintSolvingFailure,
                    format!("type `{shown}` is not an instance of `{class}`"),
                )
                .at(span_to_location(provenance.span))
                .with_context(provenance.reason.context());
                if let Some(members) = class_members(class) {
                    diag = diag.with_help(format!("`{class}` is implemented by {members}"));
                }
                self.errors.push(diag);
            }
            None => self.errors.push(
                Diagnostic::error(
                    Category::ConstraintSolvingFailure,
                    format!("unknown class `{class}`"),
                )
                .at(span_to_location(provenance.span)),
            ),
        }
    }

    fn check_match(&mut self, scrutinee: &Type, cases: &[Case], span: Span) {
        let policy = self.options.exhaustiveness;
        if policy == ExhaustivenessPolicy::Off {
            return;
        }
        let resolved = self.resolve_shape(scrutinee);
        let analysis = exhaustive::analyze(&resolved, cases, self.registry);

        let enumerable = !resolved.is_var() && !resolved.is_infinite_primitive();
        let report_missing = match policy {
            ExhaustivenessPolicy::Strict => true,
            _ => enumerable && !self.is_error_type(&resolved),
        };
        if !analysis.exhaustive && report_missing {
            let missing = analysis
                .missing
                .iter()
                .map(|m| format!("`{m}`"))
                .collect::<Vec<_>>()
                .join(", ");
            let severity = if policy == ExhaustivenessPolicy::Strict {
                Severity::Error
            } else {
                Severity::Warning
            };
            let diag = Diagnostic::new(
                severity,
                Category::NonExhaustiveMatch,
                format!("match is not exhaustive: missing {missing}"),
            )
            .at(span_to_location(span))
            .with_help("add the missing cases or a trailing `_` case");
            self.push_diagnostic(diag);
        }

        for &index in &analysis.unreachable {
            let Some(case) = cases.get(index) else {
                continue;
            };
            let covering = analysis
                .contradictory
                .iter()
                .find(|(_, later)| *later == index)
                .and_then(|(earlier, _)| cases.get(*earlier));
            let diag = match covering {
                Some(earlier) => Diagnostic::warning(
                    Category::ContradictoryPattern,
                    format!("case {} is subsumed by an earlier case", index + 1),
                )
                .at(span_to_location(case.span))
                .with_label(span_to_location(earlier.span), "this case already matches"),
                None => Diagnostic::warning(
                    Category::UnreachablePattern,
                    format!(
                        "case {} is unreachable: earlier cases cover every value",
                        index + 1
                    ),
                )
                .at(span_to_location(case.span)),
            };
            self.push_diagnostic(diag);
        }

        self.match_reports.push((span, analysis));
    }

    // -----------------------------------------------------------------------
    // Unification
    // -----------------------------------------------------------------------

    /// Unify two types immediately.
    pub fn unify(&mut self, expected: &Type, actual: &Type, provenance: &Provenance) {
        self.unify_immediate(expected, actual, provenance);
    }

    fn unify_immediate(&mut self, expected: &Type, actual: &Type, provenance: &Provenance) {
        let expected = self.substitution.apply(expected);
        let actual = self.substitution.apply(actual);

        if self.is_error_type(&expected) || self.is_error_type(&actual) {
            self.push_unify_step(
                UnifyAction::Identity,
                &expected,
                &actual,
                "error placeholder absorbs the constraint".into(),
            );
            return;
        }

        match (&expected, &actual) {
            _ if expected == actual => {
                self.push_unify_step(
                    UnifyAction::Identity,
                    &expected,
                    &actual,
                    "types already equal".into(),
                );
            }

            (Type::Var(v), _) => {
                self.push_unify_step(
                    UnifyAction::Bind,
                    &expected,
                    &actual,
                    format!("t{} := {}", v.0, sanitize_type_display(&actual)),
                );
                self.bind_type_var(*v, &actual, provenance);
            }
            (_, Type::Var(v)) => {
                self.push_unify_step(
                    UnifyAction::Bind,
                    &expected,
                    &actual,
                    format!("t{} := {}", v.0, sanitize_type_display(&expected)),
                );
                self.bind_type_var(*v, &expected, provenance);
            }

            (Type::Alias { name, args }, _) => {
                if let Some(expanded) = self.expand_alias(name, args, provenance) {
                    self.push_unify_step(
                        UnifyAction::ExpandAlias,
                        &expected,
                        &expanded,
                        format!("expand alias `{name}`"),
                    );
                    self.unify_immediate(&expanded, &actual, provenance);
                }
            }
            (_, Type::Alias { name, args }) => {
                if let Some(expanded) = self.expand_alias(name, args, provenance) {
                    self.push_unify_step(
                        UnifyAction::ExpandAlias,
                        &actual,
                        &expanded,
                        format!("expand alias `{name}`"),
                    );
                    self.unify_immediate(&expected, &expanded, provenance);
                }
            }

            (Type::Recursive { .. }, _) | (_, Type::Recursive { .. }) => {
                self.unify_recursive(&expected, &actual, provenance);
            }

            // A literal string value fits where a String is expected, not
            // the other way round.
            (Type::String, Type::LiteralString(_)) => {
                self.push_unify_step(
                    UnifyAction::Identity,
                    &expected,
                    &actual,
                    "literal string is a String".into(),
                );
            }

            (Type::Union(_), _) | (_, Type::Union(_)) => {
                self.unify_union(&expected, &actual, provenance);
            }
            (Type::Intersection(_), _) | (_, Type::Intersection(_)) => {
                self.unify_intersection(&expected, &actual, provenance);
            }

            (Type::Function(f1), Type::Function(f2)) => {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "unify parameters and return types".into(),
                );
                if f1.params.len() == f2.params.len() {
                    for (p1, p2) in f1.params.iter().zip(&f2.params) {
                        self.unify_immediate(p1, p2, provenance);
                    }
                    self.unify_immediate(&f1.ret, &f2.ret, provenance);
                } else {
                    let (p1, r1) = f1.split_first();
                    let (p2, r2) = f2.split_first();
                    self.unify_immediate(&p1, &p2, provenance);
                    self.unify_immediate(&r1, &r2, provenance);
                }
            }

            (Type::Tuple(a), Type::Tuple(b)) => {
                if a.len() != b.len() {
                    self.push_unify_step(
                        UnifyAction::Error,
                        &expected,
                        &actual,
                        "tuple arity differs".into(),
                    );
                    let (exp, act) = sanitize_type_pair_display(&expected, &actual);
                    self.errors.push(
                        Diagnostic::error(
                            Category::ArityMismatch,
                            format!(
                                "expected a tuple of {} elements, found {} elements: `{exp}` vs `{act}`",
                                a.len(),
                                b.len()
                            ),
                        )
                        .at(span_to_location(provenance.span))
                        .with_context(provenance.reason.context()),
                    );
                    return;
                }
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "unify tuple elements pairwise".into(),
                );
                for (t1, t2) in a.iter().zip(b) {
                    self.unify_immediate(t1, t2, provenance);
                }
            }

            (Type::Record(r1), Type::Record(r2)) => {
                self.unify_rows_immediate(r1, r2, provenance);
            }

            (
                Type::Con {
                    name: n1,
                    args: a1,
                },
                Type::Con {
                    name: n2,
                    args: a2,
                },
            ) if n1 == n2 && a1.len() == a2.len() => {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    format!("unify `{n1}` arguments"),
                );
                for (t1, t2) in a1.iter().zip(a2) {
                    self.unify_immediate(t1, t2, provenance);
                }
            }

            _ => self.mismatch(&expected, &actual, provenance),
        }
    }

    fn mismatch(&mut self, expected: &Type, actual: &Type, provenance: &Provenance) {
        self.push_unify_step(
            UnifyAction::Error,
            expected,
            actual,
            "type mismatch".into(),
        );
        let (msg, help) = type_mismatch_message(expected, actual, &provenance.reason);
        let mut diag = Diagnostic::error(Category::UnificationFailure, msg)
            .at(span_to_location(provenance.span))
            .with_context(provenance.reason.context());
        if let Some(help) = help {
            diag = diag.with_help(help);
        }
        self.errors.push(diag);
    }

    fn expand_alias(&mut self, name: &str, args: &[Type], provenance: &Provenance) -> Option<Type> {
        match self.registry.expand_alias(name, args) {
            Ok(expanded) => Some(expanded),
            Err(diag) => {
                self.errors.push(diag.at(span_to_location(provenance.span)));
                None
            }
        }
    }

    /// Unify with a recursive type on at least one side by unfolding it.
    ///
    /// A pair already under comparison is assumed equal, which makes the
    /// comparison of two regular infinite trees terminate.
    fn unify_recursive(&mut self, expected: &Type, actual: &Type, provenance: &Provenance) {
        if self
            .assumptions
            .iter()
            .any(|(e, a)| e == expected && a == actual)
        {
            self.push_unify_step(
                UnifyAction::Identity,
                expected,
                actual,
                "recursive pair already assumed equal".into(),
            );
            return;
        }
        self.assumptions.push((expected.clone(), actual.clone()));
        let unfolded_expected = expected.unfold().unwrap_or_else(|| expected.clone());
        let unfolded_actual = actual.unfold().unwrap_or_else(|| actual.clone());
        self.push_unify_step(
            UnifyAction::Unfold,
            &unfolded_expected,
            &unfolded_actual,
            "unfold recursive type".into(),
        );
        self.unify_immediate(&unfolded_expected, &unfolded_actual, provenance);
        self.assumptions.pop();
    }

    /// Every alternative of `actual` must be matched by some alternative of
    /// `expected`.
    ///
    /// Partners are chosen greedily left to right, trying concrete
    /// alternatives before variables; each attempt is a trial unification
    /// that is rolled back on failure. An expected union made only of
    /// variables is unified member-wise with a single actual type.
    fn unify_union(&mut self, expected: &Type, actual: &Type, provenance: &Provenance) {
        let expected_alts = expected.alternatives().to_vec();
        let actual_alts = actual.alternatives().to_vec();

        self.push_unify_step(
            UnifyAction::UnionCover,
            expected,
            actual,
            format!(
                "cover {} alternatives with {}",
                actual_alts.len(),
                expected_alts.len()
            ),
        );

        if actual_alts.len() == 1 && expected_alts.iter().all(Type::is_var) {
            for alt in &expected_alts {
                self.unify_immediate(alt, actual, provenance);
            }
            return;
        }

        for alt in &actual_alts {
            if !self.find_partner(&expected_alts, alt, true, provenance) {
                let (alt_shown, expected_shown) = sanitize_type_pair_display(alt, expected);
                self.push_unify_step(
                    UnifyAction::Error,
                    expected,
                    alt,
                    "no alternative accepts this type".into(),
                );
                self.errors.push(
                    Diagnostic::error(
                        Category::UnificationFailure,
                        format!("type `{alt_shown}` is not a member of `{expected_shown}`"),
                    )
                    .at(span_to_location(provenance.span))
                    .with_context(provenance.reason.context()),
                );
            }
        }
    }

    /// Every conjunct of `expected` must be matched by some conjunct of
    /// `actual`.
    fn unify_intersection(&mut self, expected: &Type, actual: &Type, provenance: &Provenance) {
        let expected_conjuncts = expected.conjuncts().to_vec();
        let actual_conjuncts = actual.conjuncts().to_vec();

        self.push_unify_step(
            UnifyAction::UnionCover,
            expected,
            actual,
            format!("satisfy {} required conjuncts", expected_conjuncts.len()),
        );

        for required in &expected_conjuncts {
            if !self.find_partner(&actual_conjuncts, required, false, provenance) {
                let (actual_shown, required_shown) = sanitize_type_pair_display(actual, required);
                self.errors.push(
                    Diagnostic::error(
                        Category::UnificationFailure,
                        format!("type `{actual_shown}` does not provide `{required_shown}`"),
                    )
                    .at(span_to_location(provenance.span))
                    .with_context(provenance.reason.context()),
                );
            }
        }
    }

    /// Find a candidate that unifies with `target`. A lone candidate is
    /// unified directly so that its own mismatch is reported.
    fn find_partner(
        &mut self,
        candidates: &[Type],
        target: &Type,
        candidates_expected: bool,
        provenance: &Provenance,
    ) -> bool {
        let unify_pair = |this: &mut Self, candidate: &Type| {
            if candidates_expected {
                this.unify_immediate(candidate, target, provenance);
            } else {
                this.unify_immediate(target, candidate, provenance);
            }
        };

        if let [only] = candidates {
            unify_pair(self, only);
            return true;
        }

        let mut order: Vec<&Type> = candidates.iter().filter(|c| !c.is_var()).collect();
        order.extend(candidates.iter().filter(|c| c.is_var()));

        for candidate in order {
            let snapshot = self.snapshot();
            unify_pair(self, candidate);
            if self.errors.len() == snapshot.error_len {
                return true;
            }
            self.rollback(snapshot);
        }
        false
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            substitution: self.substitution.clone(),
            error_len: self.errors.len(),
            error_vars: self.error_vars.clone(),
        }
    }

    fn rollback(&mut self, snapshot: Snapshot) {
        self.substitution = snapshot.substitution;
        self.errors.truncate(snapshot.error_len);
        self.error_vars = snapshot.error_vars;
    }

    fn unify_rows_immediate(&mut self, expected: &RowType, actual: &RowType, provenance: &Provenance) {
        let expected = self.substitution.apply_row(expected);
        let actual = self.substitution.apply_row(actual);

        self.push_unify_step(
            UnifyAction::UnifyRows,
            &Type::Record(expected.clone()),
            &Type::Record(actual.clone()),
            "unify record rows".into(),
        );

        // Partition fields into common, only-in-expected and only-in-actual.
        let mut common = Vec::new();
        let mut only_expected = Vec::new();
        for (label, ty) in &expected.fields {
            match actual.get(label) {
                Some(other) => common.push((label.clone(), ty.clone(), other.clone())),
                None => only_expected.push((label.clone(), ty.clone())),
            }
        }
        let only_actual: Vec<(Label, Type)> = actual
            .fields
            .iter()
            .filter(|(label, _)| !expected.has(label))
            .cloned()
            .collect();

        for (label, exp_ty, act_ty) in &common {
            let field_prov = Provenance {
                span: provenance.span,
                reason: Reason::RecordField {
                    label: label.clone(),
                },
            };
            self.unify_immediate(exp_ty, act_ty, &field_prov);
        }

        match (expected.rest, actual.rest) {
            // Both closed: extra fields on either side are errors.
            (None, None) => {
                for (label, _) in &only_expected {
                    self.errors.push(missing_field_diag(
                        label,
                        &actual.fields,
                        &provenance.reason,
                        provenance.span,
                    ));
                }
                for (label, _) in &only_actual {
                    self.errors.push(extra_field_diag(
                        label,
                        &expected.fields,
                        &provenance.reason,
                        provenance.span,
                    ));
                }
            }

            // Expected is open, actual is closed: the tail takes actual's extra fields.
            (Some(r), None) => {
                self.push_unify_step(
                    UnifyAction::BindRowVar,
                    &Type::Record(expected.clone()),
                    &Type::Record(actual.clone()),
                    format!("r{} := closed({})", r.0, only_actual.len()),
                );
                self.bind_row_var(r, RowType::closed(only_actual), provenance);
                for (label, _) in &only_expected {
                    self.errors.push(missing_field_diag(
                        label,
                        &actual.fields,
                        &provenance.reason,
                        provenance.span,
                    ));
                }
            }

            // Expected is closed, actual is open: mirror of above.
            (None, Some(r)) => {
                self.push_unify_step(
                    UnifyAction::BindRowVar,
                    &Type::Record(expected.clone()),
                    &Type::Record(actual.clone()),
                    format!("r{} := closed({})", r.0, only_expected.len()),
                );
                self.bind_row_var(r, RowType::closed(only_expected), provenance);
                for (label, _) in &only_actual {
                    self.errors.push(extra_field_diag(
                        label,
                        &expected.fields,
                        &provenance.reason,
                        provenance.span,
                    ));
                }
            }

            // Same tail: extra fields on either side are errors.
            (Some(r1), Some(r2)) if r1 == r2 => {
                for (label, _) in &only_expected {
                    self.errors.push(missing_field_diag(
                        label,
                        &actual.fields,
                        &provenance.reason,
                        provenance.span,
                    ));
                }
                for (label, _) in &only_actual {
                    self.errors.push(extra_field_diag(
                        label,
                        &expected.fields,
                        &provenance.reason,
                        provenance.span,
                    ));
                }
            }

            (Some(r1), Some(r2)) if only_expected.is_empty() && only_actual.is_empty() => {
                self.push_unify_step(
                    UnifyAction::BindRowVar,
                    &Type::Record(expected.clone()),
                    &Type::Record(actual.clone()),
                    format!("r{} := r{}", r1.0, r2.0),
                );
                self.substitution.bind_row(r1, RowType::empty_open(r2));
            }

            (Some(r1), Some(r2)) => {
                // r1 ~ {only_actual | r3}, r2 ~ {only_expected | r3}
                let r3 = self.supply.fresh_row_var();
                self.push_unify_step(
                    UnifyAction::RemyDecompose,
                    &Type::Record(expected.clone()),
                    &Type::Record(actual.clone()),
                    format!(
                        "r{} ~ {{only_actual | r{}}}, r{} ~ {{only_expected | r{}}}",
                        r1.0, r3.0, r2.0, r3.0
                    ),
                );
                if self.bind_row_var(r1, RowType::open(only_actual, r3), provenance) {
                    self.bind_row_var(r2, RowType::open(only_expected, r3), provenance);
                }
            }
        }
    }

    /// Bind a row variable, refusing rows that mention it. Returns whether
    /// the binding was made.
    fn bind_row_var(&mut self, var: RowVarId, row: RowType, provenance: &Provenance) -> bool {
        let resolved = self.substitution.apply(&Type::Record(row.clone()));
        if !free_row_vars(&resolved).contains(&var) {
            self.substitution.bind_row(var, row);
            return true;
        }
        let shown = sanitize_type_display(&resolved);
        self.errors.push(
            Diagnostic::error(
                Category::InfiniteType,
                format!("infinite type: record tail occurs in `{shown}`"),
            )
            .at(span_to_location(provenance.span))
            .with_context(provenance.reason.context())
            .with_help("a value cannot contain itself; declare a recursive type instead"),
        );
        false
    }

    /// Check whether a type variable occurs free in a type.
    fn occurs_in(&self, var: TypeVarId, ty: &Type) -> bool {
        free_type_vars(&self.substitution.apply(ty)).contains(&var)
    }

    /// Bind a type variable to a type, with occurs check.
    fn bind_type_var(&mut self, var: TypeVarId, ty: &Type, provenance: &Provenance) {
        if let Type::Var(v) = ty
            && *v == var
        {
            return;
        }

        if self.occurs_in(var, ty) {
            self.push_unify_step(
                UnifyAction::OccursCheck,
                &Type::Var(var),
                ty,
                format!(
                    "t{} occurs in {}, infinite type prevented",
                    var.0,
                    sanitize_type_display(ty)
                ),
            );
            let (var_shown, ty_shown) = sanitize_type_pair_display(&Type::Var(var), ty);
            self.errors.push(
                Diagnostic::error(
                    Category::InfiniteType,
                    format!("infinite type: `{var_shown}` occurs in `{ty_shown}`"),
                )
                .at(span_to_location(provenance.span))
                .with_context(provenance.reason.context())
                .with_help("a value cannot contain itself; declare a recursive type instead"),
            );
            return;
        }

        self.substitution.bind_type(var, ty.clone());
    }

    /// Apply the substitution, expand a top-level alias and unfold a
    /// top-level recursive type.
    pub fn resolve_shape(&self, ty: &Type) -> Type {
        let mut current = self.substitution.apply(ty);
        for _ in 0..32 {
            match &current {
                Type::Alias { name, args } => match self.registry.expand_alias(name, args) {
                    Ok(expanded) => current = self.substitution.apply(&expanded),
                    Err(_) => return current,
                },
                Type::Recursive { .. } => match current.unfold() {
                    Some(unfolded) => current = unfolded,
                    None => return current,
                },
                _ => return current,
            }
        }
        current
    }

    fn is_error_type(&self, ty: &Type) -> bool {
        match ty {
            Type::Error => true,
            Type::Var(v) => self.error_vars.contains(v),
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    fn push_diagnostic(&mut self, diag: Diagnostic) {
        if diag.is_error() {
            self.errors.push(diag);
        } else {
            self.warnings.push(diag);
        }
    }

    /// Errors recorded so far.
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Check if unification has produced any errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Errors followed by warnings, draining both lists.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        let mut diags = std::mem::take(&mut self.errors);
        diags.append(&mut self.warnings);
        diags
    }

    /// Class obligations left on unresolved variables.
    pub fn residuals(&self) -> &BTreeMap<TypeVarId, BTreeSet<String>> {
        &self.residuals
    }

    /// Error placeholders known to this solve.
    pub fn error_vars(&self) -> &BTreeSet<TypeVarId> {
        &self.error_vars
    }

    pub fn take_match_reports(&mut self) -> Vec<(Span, MatchAnalysis)> {
        std::mem::take(&mut self.match_reports)
    }

    // -----------------------------------------------------------------------
    // Tracing API (zero overhead when disabled)
    // -----------------------------------------------------------------------

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    /// Get the unification trace (empty if tracing was not enabled).
    pub fn unify_trace(&self) -> &[UnifyStep] {
        &self.unify_trace
    }

    pub fn take_unify_trace(&mut self) -> Vec<UnifyStep> {
        std::mem::take(&mut self.unify_trace)
    }

    fn push_unify_step(&mut self, action: UnifyAction, left: &Type, right: &Type, detail: String) {
        if self.tracing {
            let step = self.unify_trace.len() + 1;
            self.unify_trace.push(UnifyStep {
                step,
                action,
                left: sanitize_type_display(left),
                right: sanitize_type_display(right),
                detail,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

/// Whether `ty` belongs to `class`; `None` for an unknown class.
fn class_admits(class: &str, ty: &Type, registry: &TypeRegistry) -> Option<bool> {
    let admits = match ty {
        Type::Union(members) => {
            let mut all = true;
            for member in members {
                all &= class_admits(class, member, registry)?;
            }
            return Some(all);
        }
        Type::Alias { name, args } => {
            return match registry.expand_alias(name, args) {
                Ok(expanded) => class_admits(class, &expanded, registry),
                Err(_) => Some(false),
            };
        }
        Type::Error => true,
        _ => match class {
            ADDABLE => matches!(ty, Type::Int | Type::String | Type::LiteralString(_)),
            COMPARABLE => matches!(
                ty,
                Type::Int | Type::Float | Type::Char | Type::String | Type::LiteralString(_)
            ),
            _ => return None,
        },
    };
    Some(admits)
}

fn class_members(class: &str) -> Option<&'static str> {
    match class {
        ADDABLE => Some("`Int` and `String`"),
        COMPARABLE => Some("`Int`, `Float`, `Char` and `String`"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn constraint_trace_entry(constraint: &Constraint) -> String {
    match constraint {
        Constraint::Equality {
            expected, actual, ..
        } => {
            let (expected, actual) = sanitize_type_pair_display(expected, actual);
            format!("{expected} ~ {actual}")
        }
        Constraint::Instance { ty, class, .. } => {
            format!("{}: {class}", sanitize_type_display(ty))
        }
        Constraint::RecordType { ty, .. } => {
            format!("record({})", sanitize_type_display(ty))
        }
        Constraint::Merge {
            result, entries, ..
        } => format!(
            "{} = merge of {} entries",
            sanitize_type_display(result),
            entries.len()
        ),
        Constraint::Exhaustiveness {
            scrutinee, cases, ..
        } => format!(
            "match on {} with {} cases",
            sanitize_type_display(scrutinee),
            cases.len()
        ),
    }
}

fn did_not_converge_diag(max_iterations: usize, recent: &VecDeque<String>, span: Span) -> Diagnostic {
    let trace_help = if recent.is_empty() {
        "no recent constraints captured".to_string()
    } else {
        format!(
            "recent constraints:\n- {}",
            recent.iter().cloned().collect::<Vec<_>>().join("\n- ")
        )
    };
    Diagnostic::error(
        Category::DidNotConverge,
        format!("constraint solving did not converge within {max_iterations} steps"),
    )
    .at(span_to_location(span))
    .with_help(format!("{trace_help}\nraise `max_iterations` in the check options"))
}

fn row_domain(reason: &Reason) -> &'static str {
    match reason {
        Reason::FunctionCall => "the argument",
        Reason::FieldAccess { .. } => "the value",
        _ => "the record",
    }
}

/// Format a list of field labels for display in error messages.
fn format_field_list(fields: &[(Label, Type)]) -> String {
    fields
        .iter()
        .map(|(l, _)| format!("`{l}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a missing field diagnostic with context from provenance.
fn missing_field_diag(
    label: &Label,
    available: &[(Label, Type)],
    reason: &Reason,
    span: Span,
) -> Diagnostic {
    let entity = row_domain(reason);
    let mut diag = Diagnostic::error(
        Category::MissingField,
        format!("{entity} is missing field `{label}`"),
    )
    .at(span_to_location(span))
    .with_context(reason.context());
    if !available.is_empty() {
        diag = diag.with_help(format!("available fields: {}", format_field_list(available)));
    }
    diag
}

/// Build an extra field diagnostic with context from provenance.
fn extra_field_diag(
    label: &Label,
    expected_fields: &[(Label, Type)],
    reason: &Reason,
    span: Span,
) -> Diagnostic {
    let entity = row_domain(reason);
    let mut diag = Diagnostic::error(
        Category::ExtraField,
        format!("{entity} has unexpected field `{label}`"),
    )
    .at(span_to_location(span))
    .with_context(reason.context());
    if !expected_fields.is_empty() {
        diag = diag.with_help(format!(
            "expected fields: {}",
            format_field_list(expected_fields)
        ));
    }
    diag
}

/// Produce a contextual type mismatch message using the Reason provenance.
fn type_mismatch_message(
    expected: &Type,
    actual: &Type,
    reason: &Reason,
) -> (String, Option<String>) {
    let (expected, actual) = sanitize_type_pair_display(expected, actual);
    match reason {
        Reason::BinaryOp(op) => (
            format!("operands of `{op}` do not agree: expected `{expected}`, got `{actual}`"),
            None,
        ),
        Reason::UnaryOp(op) => (
            format!("operand of `{op}` must be `{expected}`, got `{actual}`"),
            None,
        ),
        Reason::FunctionCall => (
            format!("type mismatch in function call: expected `{expected}`, got `{actual}`"),
            None,
        ),
        Reason::IfCondition => (
            format!("if condition must be `{expected}`, got `{actual}`"),
            None,
        ),
        Reason::LetAnnotation => (
            format!(
                "type annotation mismatch: declared `{expected}`, but value has type `{actual}`"
            ),
            None,
        ),
        Reason::TypeAscription => (
            format!("type mismatch in ascription: expected `{expected}`, got `{actual}`"),
            Some("ascription checks compatibility and does not convert values".into()),
        ),
        Reason::RecordField { label } => (
            format!("field `{label}` has type `{expected}`, but got `{actual}`"),
            None,
        ),
        Reason::PatternMatch => (
            format!("pattern of type `{actual}` cannot match a value of type `{expected}`"),
            None,
        ),
        Reason::RecursiveBinding => (
            format!("recursive use expects `{expected}`, but the definition has type `{actual}`"),
            None,
        ),
        _ => (
            format!("type mismatch: expected `{expected}`, got `{actual}`"),
            None,
        ),
    }
}

pub(crate) fn span_to_location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}

#[cfg(test)]
mod prop_tests;


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ast::FileId;
    use sable_types::FunctionType;

    fn arrow(param: Type, ret: Type) -> Type {
        Type::arrow(param, ret)
    }

    fn test_span() -> Span {
        Span::new(FileId(0), 0, 1)
    }

    fn test_prov() -> Provenance {
        Provenance::new(test_span(), Reason::LetAnnotation)
    }

    fn var(n: u32) -> Type {
        Type::Var(TypeVarId(n))
    }

    fn label(s: &str) -> Label {
        Label::new(s)
    }

    /// Run `f` against a unifier whose supply starts past the test's own ids.
    fn with_unifier<R>(f: impl FnOnce(&mut Unifier<'_>) -> R) -> R {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply { next: 100 };
        let mut unifier = Unifier::new(&registry, &mut supply, CheckOptions::default());
        f(&mut unifier)
    }

    #[test]
    fn type_mismatch_message_uses_joint_sanitization() {
        let (msg, _) = type_mismatch_message(
            &arrow(var(7), var(7)),
            &arrow(Type::Int, var(3)),
            &Reason::FunctionCall,
        );
        assert_eq!(
            msg,
            "type mismatch in function call: expected `a -> a`, got `Int -> b`"
        );
    }

    #[test]
    fn unify_identical_types() {
        with_unifier(|u| {
            u.unify(&Type::Int, &Type::Int, &test_prov());
            assert!(!u.has_errors());
        });
    }

    #[test]
    fn unify_type_mismatch() {
        with_unifier(|u| {
            u.unify(&Type::Int, &Type::String, &test_prov());
            assert_eq!(u.errors().len(), 1);
            assert_eq!(u.errors()[0].category, Category::UnificationFailure);
        });
    }

    #[test]
    fn unify_type_var_binds() {
        with_unifier(|u| {
            u.unify(&var(0), &Type::Int, &test_prov());
            assert_eq!(u.substitution.apply(&var(0)), Type::Int);
        });
    }

    #[test]
    fn unify_transitive() {
        with_unifier(|u| {
            u.unify(&var(0), &var(1), &test_prov());
            u.unify(&var(1), &Type::Bool, &test_prov());
            assert_eq!(u.substitution.apply(&var(0)), Type::Bool);
        });
    }

    #[test]
    fn occurs_check_prevents_infinite_type() {
        with_unifier(|u| {
            u.unify(&var(0), &arrow(var(0), Type::Int), &test_prov());
            assert_eq!(u.errors().len(), 1);
            assert_eq!(u.errors()[0].category, Category::InfiniteType);
            assert_eq!(u.substitution.lookup_type(TypeVarId(0)), None);
        });
    }

    #[test]
    fn tuple_arity_mismatch() {
        with_unifier(|u| {
            u.unify(
                &Type::Tuple(vec![Type::Int, Type::Int]),
                &Type::Tuple(vec![Type::Int]),
                &test_prov(),
            );
            assert_eq!(u.errors()[0].category, Category::ArityMismatch);
        });
    }

    #[test]
    fn multi_param_arrow_unifies_with_curried_arrow() {
        with_unifier(|u| {
            let declared = Type::Function(FunctionType::new(vec![Type::Int, Type::String], Type::Bool));
            let curried = arrow(var(0), arrow(var(1), var(2)));
            u.unify(&declared, &curried, &test_prov());
            assert!(!u.has_errors());
            assert_eq!(u.substitution.apply(&var(1)), Type::String);
            assert_eq!(u.substitution.apply(&var(2)), Type::Bool);
        });
    }

    #[test]
    fn unify_closed_rows_missing_field() {
        with_unifier(|u| {
            let required = Type::record(vec![(label("name"), Type::String), (label("age"), Type::Int)]);
            let given = Type::record(vec![(label("name"), Type::String)]);
            u.unify(&required, &given, &test_prov());
            assert_eq!(u.errors().len(), 1);
            assert_eq!(u.errors()[0].category, Category::MissingField);
            assert!(u.errors()[0].message.contains("`age`"));
        });
    }

    #[test]
    fn unify_open_row_binds_tail() {
        with_unifier(|u| {
            let open = Type::open_record(vec![(label("name"), Type::String)], RowVarId(0));
            let closed = Type::record(vec![(label("name"), Type::String), (label("age"), Type::Int)]);
            u.unify(&open, &closed, &test_prov());
            assert!(!u.has_errors());
            assert_eq!(u.substitution.apply(&open), closed);
        });
    }

    #[test]
    fn unify_open_rows_share_fresh_tail() {
        with_unifier(|u| {
            let left = Type::open_record(vec![(label("a"), Type::Int)], RowVarId(0));
            let right = Type::open_record(vec![(label("b"), Type::Bool)], RowVarId(1));
            u.unify(&left, &right, &test_prov());
            assert!(!u.has_errors());
            let l = u.substitution.apply(&left);
            let r = u.substitution.apply(&right);
            assert_eq!(l, r);
            match l {
                Type::Record(row) => {
                    assert!(row.has(&label("a")) && row.has(&label("b")));
                    assert!(row.is_open());
                }
                other => panic!("expected record, got {other}"),
            }
        });
    }

    #[test]
    fn literal_string_fits_where_string_is_expected() {
        with_unifier(|u| {
            u.unify(&Type::String, &Type::LiteralString("ok".into()), &test_prov());
            assert!(!u.has_errors());
            u.unify(&Type::LiteralString("ok".into()), &Type::String, &test_prov());
            assert_eq!(u.errors().len(), 1);
            u.unify(
                &Type::LiteralString("ok".into()),
                &Type::LiteralString("err".into()),
                &test_prov(),
            );
            assert_eq!(u.errors().len(), 2);
        });
    }

    #[test]
    fn union_cover_prefers_concrete_alternatives() {
        with_unifier(|u| {
            let expected = Type::union(vec![var(0), Type::Int]);
            u.unify(&expected, &Type::Int, &test_prov());
            assert!(!u.has_errors());
            assert_eq!(u.substitution.lookup_type(TypeVarId(0)), None);
        });
    }

    #[test]
    fn union_cover_rolls_back_failed_trials() {
        with_unifier(|u| {
            let expected = Type::union(vec![
                Type::Tuple(vec![Type::Int, var(0)]),
                Type::Tuple(vec![Type::String, var(1)]),
            ]);
            u.unify(
                &expected,
                &Type::Tuple(vec![Type::String, Type::Bool]),
                &test_prov(),
            );
            assert!(!u.has_errors());
            assert_eq!(u.substitution.lookup_type(TypeVarId(0)), None);
            assert_eq!(u.substitution.apply(&var(1)), Type::Bool);
        });
    }

    #[test]
    fn union_rejects_non_member() {
        with_unifier(|u| {
            let expected = Type::union(vec![Type::Int, Type::String]);
            u.unify(&expected, &Type::Bool, &test_prov());
            assert_eq!(u.errors().len(), 1);
            assert_eq!(
                u.errors()[0].message,
                "type `Bool` is not a member of `Int | String`"
            );
        });
    }

    #[test]
    fn all_variable_union_binds_every_member() {
        with_unifier(|u| {
            u.unify(&Type::union(vec![var(0), var(1)]), &Type::Int, &test_prov());
            assert_eq!(u.substitution.apply(&var(0)), Type::Int);
            assert_eq!(u.substitution.apply(&var(1)), Type::Int);
        });
    }

    #[test]
    fn actual_union_requires_every_alternative() {
        with_unifier(|u| {
            u.unify(
                &Type::Int,
                &Type::union(vec![Type::Int, Type::String]),
                &test_prov(),
            );
            assert_eq!(u.errors().len(), 1);
        });
    }

    #[test]
    fn intersection_requires_each_conjunct() {
        with_unifier(|u| {
            let a = Type::open_record(vec![(label("a"), Type::Int)], RowVarId(0));
            let b = Type::open_record(vec![(label("b"), Type::Bool)], RowVarId(1));
            let expected = Type::intersection(vec![a, b]);
            let ok = Type::intersection(vec![
                Type::open_record(vec![(label("a"), Type::Int)], RowVarId(2)),
                Type::open_record(vec![(label("b"), Type::Bool)], RowVarId(3)),
            ]);
            u.unify(&expected, &ok, &test_prov());
            assert!(!u.has_errors());
        });
    }

    #[test]
    fn recursive_types_unify_coinductively() {
        with_unifier(|u| {
            let list = Type::Recursive {
                var: TypeVarId(50),
                body: Box::new(Type::union(vec![
                    Type::Unit,
                    Type::Tuple(vec![Type::Int, var(50)]),
                ])),
            };
            let unfolded = list.unfold().unwrap();
            u.unify(&list, &unfolded, &test_prov());
            assert!(!u.has_errors());
        });
    }

    #[test]
    fn error_vars_absorb_mismatches() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let mut u = Unifier::new(&registry, &mut supply, CheckOptions::default())
            .with_error_vars([TypeVarId(9)]);
        u.unify(&var(9), &Type::Int, &test_prov());
        u.unify(&Type::String, &var(9), &test_prov());
        assert!(!u.has_errors());
        assert_eq!(u.substitution.lookup_type(TypeVarId(9)), None);
    }

    #[test]
    fn constraint_set_preserves_insertion_order() {
        let a = Constraint::equality(var(0), Type::Int, test_span(), Reason::Literal);
        let b = Constraint::equality(var(1), Type::Bool, test_span(), Reason::Literal);
        let c = Constraint::equality(var(2), Type::String, test_span(), Reason::Literal);
        let left = ConstraintSet::of([a.clone()]);
        let right = ConstraintSet::empty().add(b.clone()).add(c.clone());
        let both = left.union(&right);
        assert_eq!(both.len(), 3);
        assert_eq!(both.all(), vec![a.clone(), b, c]);
        // Inputs are unchanged.
        assert_eq!(left.all(), vec![a]);
        assert_eq!(right.len(), 2);
    }

    #[test]
    fn solve_defers_merge_until_spread_resolves() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply { next: 100 };
        let span = test_span();
        let r = var(0);
        let result = var(1);
        let set = ConstraintSet::of([
            Constraint::Merge {
                result: result.clone(),
                entries: vec![
                    MergeEntry::Spread(r.clone()),
                    MergeEntry::Field(label("age"), Type::Int),
                ],
                provenance: Provenance::new(span, Reason::Spread),
            },
            Constraint::equality(
                r.clone(),
                Type::record(vec![(label("name"), Type::String), (label("age"), Type::String)]),
                span,
                Reason::Literal,
            ),
        ]);
        let mut u = Unifier::new(&registry, &mut supply, CheckOptions::default());
        u.solve(&set).unwrap();
        assert_eq!(
            u.substitution.apply(&result),
            Type::record(vec![(label("name"), Type::String), (label("age"), Type::Int)])
        );
    }

    #[test]
    fn solve_forces_unresolved_spread_to_open_record() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply { next: 100 };
        let span = test_span();
        let set = ConstraintSet::of([
            Constraint::RecordType {
                ty: var(0),
                provenance: Provenance::new(span, Reason::Spread),
            },
            Constraint::Merge {
                result: var(1),
                entries: vec![MergeEntry::Spread(var(0))],
                provenance: Provenance::new(span, Reason::Spread),
            },
        ]);
        let mut u = Unifier::new(&registry, &mut supply, CheckOptions::default());
        u.solve(&set).unwrap();
        assert!(matches!(u.substitution.apply(&var(0)), Type::Record(row) if row.is_open()));
        assert_eq!(u.substitution.apply(&var(0)), u.substitution.apply(&var(1)));
    }

    #[test]
    fn spread_of_non_record_is_reported() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let set = ConstraintSet::of([Constraint::RecordType {
            ty: Type::Int,
            provenance: Provenance::new(test_span(), Reason::Spread),
        }]);
        let mut u = Unifier::new(&registry, &mut supply, CheckOptions::default());
        let err = u.solve(&set).unwrap_err();
        assert_eq!(err.diagnostics()[0].category, Category::ConstraintSolvingFailure);
    }

    #[test]
    fn instance_on_unresolved_var_becomes_residual() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let set = ConstraintSet::of([Constraint::instance(var(0), ADDABLE, test_span())]);
        let mut u = Unifier::new(&registry, &mut supply, CheckOptions::default());
        u.solve(&set).unwrap();
        assert_eq!(
            u.residuals().get(&TypeVarId(0)),
            Some(&BTreeSet::from([ADDABLE.to_string()]))
        );
    }

    #[test]
    fn instance_rejects_non_member() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let set = ConstraintSet::of([
            Constraint::equality(var(0), Type::Bool, test_span(), Reason::Literal),
            Constraint::instance(var(0), ADDABLE, test_span()),
        ]);
        let mut u = Unifier::new(&registry, &mut supply, CheckOptions::default());
        let err = u.solve(&set).unwrap_err();
        assert_eq!(
            err.diagnostics()[0].message,
            "type `Bool` is not an instance of `Addable`"
        );
    }

    #[test]
    fn solver_iteration_budget_reports_did_not_converge() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let set: ConstraintSet = (0..4)
            .map(|i| Constraint::equality(var(i), Type::Int, test_span(), Reason::Literal))
            .collect();
        let options = CheckOptions::default().with_max_iterations(2);
        let mut u = Unifier::new(&registry, &mut supply, options);
        let err = u.solve(&set).unwrap_err();
        let diag = &err.diagnostics()[0];
        assert_eq!(diag.category, Category::DidNotConverge);
        assert!(diag.help.as_deref().unwrap_or_default().contains("recent constraints"));
    }

    #[test]
    fn tracing_records_bind_steps() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let options = CheckOptions::default().with_tracing(true);
        let mut u = Unifier::new(&registry, &mut supply, options);
        u.unify(&var(0), &Type::Int, &test_prov());
        let trace = u.unify_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].action, UnifyAction::Bind);
        assert_eq!(trace[0].left, "a");
        assert_eq!(trace[0].right, "Int");
    }
}
