//! Program driver: checks one compilation unit statement by statement.
//!
//! Each statement is generated, solved on its own, and its resolved node
//! types recorded before the next statement starts. Top-level `let`s are
//! generalized and bound into the global environment; type and alias
//! declarations go to the registry.

use std::collections::{BTreeMap, BTreeSet};

use sable_ast::{Expr, Program, Span, Stmt, StmtKind};
use sable_types::{Substitution, Type, TypeScheme, TypeVarId, free_type_vars, replace_vars};

use crate::exhaustive::MatchAnalysis;
use crate::recovery::ErrorRecovery;
use crate::registry::TypeRegistry;
use crate::trace::{InferStep, UnifyStep};
use crate::typeck::{ConstraintGenerator, Generated, TypeEnv, generalize};
use crate::{CheckOptions, Diagnostic, DiagnosticError, Unifier, VarSupply};

/// Per-compilation-unit inference state.
///
/// Nothing here is global: two contexts never share variable numbering,
/// declarations or diagnostics.
#[derive(Debug)]
pub struct InferenceContext {
    pub(crate) supply: VarSupply,
    pub(crate) registry: TypeRegistry,
    pub(crate) recovery: ErrorRecovery,
    pub(crate) options: CheckOptions,
    pub(crate) env: TypeEnv,
    pub(crate) infer_trace: Vec<InferStep>,
    types: BTreeMap<Span, Type>,
    schemes: BTreeMap<String, TypeScheme>,
    matches: BTreeMap<Span, MatchAnalysis>,
    unify_trace: Vec<UnifyStep>,
}

/// What one statement's solve leaves behind.
struct Solved {
    substitution: Substitution,
    residuals: BTreeMap<TypeVarId, BTreeSet<String>>,
    error_vars: BTreeSet<TypeVarId>,
}

impl InferenceContext {
    pub fn new(options: CheckOptions) -> Self {
        Self {
            supply: VarSupply::new(),
            registry: TypeRegistry::new(),
            recovery: ErrorRecovery::new(),
            options,
            env: TypeEnv::empty(),
            infer_trace: Vec::new(),
            types: BTreeMap::new(),
            schemes: BTreeMap::new(),
            matches: BTreeMap::new(),
            unify_trace: Vec::new(),
        }
    }

    pub fn options(&self) -> CheckOptions {
        self.options
    }

    pub fn env(&self) -> &TypeEnv {
        &self.env
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.recovery.diagnostics()
    }

    pub fn check_statement(&mut self, stmt: &Stmt) {
        match &stmt.node {
            StmtKind::TypeDecl(decl) => {
                match self.registry.declare_adt(decl, &mut self.supply) {
                    Ok(constructors) => {
                        for (name, scheme) in constructors {
                            self.env = self.env.bind(name, scheme);
                        }
                    }
                    Err(diag) => {
                        self.recovery.record(diag);
                    }
                }
            }
            StmtKind::Alias(decl) => {
                if let Err(diag) = self.registry.declare_alias(decl, &mut self.supply) {
                    self.recovery.record(diag);
                }
            }
            StmtKind::Let(binding) => {
                let env = self.env.clone();
                let mut generator = ConstraintGenerator::new(self);
                let bound = generator.infer_binding(binding, &env);
                let types = generator.finish();

                let solved = self.solve_statement(&bound, types);
                let resolved = output_type(&bound.ty, &solved.substitution, &solved.error_vars);
                let scheme = generalize(
                    &resolved,
                    &env,
                    &solved.substitution,
                    &solved.residuals,
                    &solved.error_vars,
                );
                let name = binding.name.node.clone();
                self.schemes.insert(name.clone(), scheme.clone());
                self.env = env.bind(name, scheme);
            }
            StmtKind::Expr(expr) => {
                let env = self.env.clone();
                let mut generator = ConstraintGenerator::new(self);
                let generated = generator.infer(expr, &env);
                let types = generator.finish();
                self.solve_statement(&generated, types);
            }
        }
    }

    /// Solve one statement's constraints and record what the solve found:
    /// diagnostics, match analyses, traces and resolved node types.
    fn solve_statement(&mut self, generated: &Generated, types: Vec<(Span, Type)>) -> Solved {
        let error_vars: Vec<TypeVarId> = self.recovery.error_vars().iter().copied().collect();
        let mut unifier = Unifier::new(&self.registry, &mut self.supply, self.options)
            .with_error_vars(error_vars);
        // Failures are already on the unifier's diagnostic lists.
        let _ = unifier.solve(&generated.constraints);

        let diagnostics = unifier.take_diagnostics();
        let reports = unifier.take_match_reports();
        let trace = unifier.take_unify_trace();
        let solved = Solved {
            residuals: unifier.residuals().clone(),
            error_vars: unifier.error_vars().clone(),
            substitution: std::mem::take(&mut unifier.substitution),
        };

        self.recovery.record_all(diagnostics);
        self.matches.extend(reports);
        self.unify_trace.extend(trace);
        for (span, ty) in types {
            let resolved = output_type(&ty, &solved.substitution, &solved.error_vars);
            self.types.insert(span, resolved);
        }
        solved
    }

    pub fn finish(self) -> CheckedProgram {
        CheckedProgram {
            types: self.types,
            schemes: self.schemes,
            matches: self.matches,
            diagnostics: self.recovery.finish(),
            unify_trace: self.unify_trace,
            infer_trace: self.infer_trace,
        }
    }
}

impl Default for InferenceContext {
    fn default() -> Self {
        Self::new(CheckOptions::default())
    }
}

/// Result of checking a whole program.
#[derive(Debug, Clone)]
pub struct CheckedProgram {
    /// Resolved type of every expression and pattern node, keyed by span.
    pub types: BTreeMap<Span, Type>,
    /// Generalized scheme of each top-level `let`.
    pub schemes: BTreeMap<String, TypeScheme>,
    pub matches: BTreeMap<Span, MatchAnalysis>,
    /// Errors first, then warnings, each group in report order.
    pub diagnostics: Vec<Diagnostic>,
    pub unify_trace: Vec<UnifyStep>,
    pub infer_trace: Vec<InferStep>,
}

impl CheckedProgram {
    pub fn type_at(&self, span: Span) -> Option<&Type> {
        self.types.get(&span)
    }

    pub fn scheme(&self, name: &str) -> Option<&TypeScheme> {
        self.schemes.get(name)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|diag| diag.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// One line per top-level scheme, then one per diagnostic.
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .schemes
            .iter()
            .map(|(name, scheme)| format!("{name} : {scheme}"))
            .collect();
        lines.extend(self.diagnostics.iter().map(|diag| diag.to_string()));
        lines.join("\n")
    }
}

/// Check every statement of a program in order.
pub fn check_program(program: &Program, options: CheckOptions) -> CheckedProgram {
    let mut ctx = InferenceContext::new(options);
    for stmt in &program.statements {
        ctx.check_statement(stmt);
    }
    ctx.finish()
}

/// Infer the type of a single expression in an empty environment.
pub fn infer_expr(expr: &Expr) -> Result<Type, DiagnosticError> {
    let mut ctx = InferenceContext::default();
    let env = TypeEnv::empty();
    let mut generator = ConstraintGenerator::new(&mut ctx);
    let generated = generator.infer(expr, &env);
    let types = generator.finish();
    let solved = ctx.solve_statement(&generated, types);

    let errors: Vec<Diagnostic> = ctx
        .recovery
        .finish()
        .into_iter()
        .filter(Diagnostic::is_error)
        .collect();
    if !errors.is_empty() {
        return Err(DiagnosticError::multiple(errors));
    }
    Ok(output_type(
        &generated.ty,
        &solved.substitution,
        &solved.error_vars,
    ))
}

/// Apply the final substitution; error variables left unresolved read as
/// the `Error` primitive.
fn output_type(ty: &Type, subst: &Substitution, error_vars: &BTreeSet<TypeVarId>) -> Type {
    let resolved = subst.apply(ty);
    let errors: BTreeMap<TypeVarId, Type> = free_type_vars(&resolved)
        .into_iter()
        .filter(|var| error_vars.contains(var))
        .map(|var| (var, Type::Error))
        .collect();
    if errors.is_empty() {
        resolved
    } else {
        replace_vars(&resolved, &errors, &BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_types::RowVarId;

    #[test]
    fn output_type_renders_error_vars() {
        let mut subst = Substitution::new();
        subst.bind_type(TypeVarId(0), Type::arrow(Type::Int, Type::Var(TypeVarId(1))));
        let ty = output_type(
            &Type::Var(TypeVarId(0)),
            &subst,
            &BTreeSet::from([TypeVarId(1)]),
        );
        assert_eq!(ty, Type::arrow(Type::Int, Type::Error));
    }

    #[test]
    fn output_type_keeps_ordinary_vars() {
        let ty = Type::open_record(vec![], RowVarId(3));
        assert_eq!(
            output_type(&ty, &Substitution::new(), &BTreeSet::new()),
            ty
        );
    }

    #[test]
    fn empty_program_has_no_output() {
        let checked = check_program(&Program::default(), CheckOptions::default());
        assert!(checked.types.is_empty());
        assert!(checked.diagnostics.is_empty());
        assert_eq!(checked.summary(), "");
    }
}
