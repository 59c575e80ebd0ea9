//! Constraint generation with let-generalization.
//!
//! This module walks AST expressions and produces, for each, a type and the
//! set of constraints that type must satisfy. Key features:
//!
//! - Let-generalization: a `let` value's constraints are solved on the spot
//!   and the resolved type is generalized into a scheme for the body
//! - Instantiation: each use of a polymorphic binding gets fresh variables,
//!   and class bounds are re-emitted as `Instance` constraints
//! - Union-typed `if` and `match` results
//! - Deferred exhaustiveness: every match carries its lowered cases to the
//!   solver
//!
//! Generation never aborts a whole statement: a failing construct is
//! recorded through [`ErrorRecovery`](crate::ErrorRecovery) and replaced by an
//! error variable.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use sable_ast::{
    BinOp, Expr, ExprKind, LetBinding, Lit, MatchCase, Param, Pattern, PatternKind, RecordItem,
    Span, Spanned, TypeExpr, UnaryOp,
};
use sable_types::{
    Label, RowType, RowVarId, Substitution, Type, TypeScheme, TypeVarId, free_row_vars,
    free_type_vars, replace_vars, sanitize_type_display,
};

use crate::exhaustive::{Case, Pat};
use crate::program::InferenceContext;
use crate::registry::TypeScope;
use crate::trace::{InferRule, InferStep};
use crate::{
    ADDABLE, COMPARABLE, Category, Constraint, ConstraintSet, Diagnostic, ExhaustivenessPolicy,
    MergeEntry, Provenance, Reason, Unifier, VarSupply, span_to_location,
};

// ---------------------------------------------------------------------------
// Type environment
// ---------------------------------------------------------------------------

/// Maps variable names to their type schemes.
///
/// A persistent parent-pointer chain: `bind` returns a new environment that
/// shares every outer binding, and the receiver is left untouched.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    head: Option<Rc<Frame>>,
}

#[derive(Debug)]
struct Frame {
    name: String,
    scheme: TypeScheme,
    parent: Option<Rc<Frame>>,
}

impl TypeEnv {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Extend with one binding, shadowing any outer binding of `name`.
    pub fn bind(&self, name: impl Into<String>, scheme: TypeScheme) -> TypeEnv {
        TypeEnv {
            head: Some(Rc::new(Frame {
                name: name.into(),
                scheme,
                parent: self.head.clone(),
            })),
        }
    }

    /// Innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<&TypeScheme> {
        self.frames()
            .find(|frame| frame.name == name)
            .map(|frame| &frame.scheme)
    }

    /// Visible bindings, innermost first.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &TypeScheme)> {
        let mut seen = BTreeSet::new();
        self.frames()
            .filter(move |frame| seen.insert(frame.name.as_str()))
            .map(|frame| (frame.name.as_str(), &frame.scheme))
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(self.head.as_deref(), |frame| frame.parent.as_deref())
    }

    /// Type variables free in some visible binding, after substitution.
    pub fn free_type_vars(&self, subst: &Substitution) -> BTreeSet<TypeVarId> {
        let mut vars = BTreeSet::new();
        for (_, scheme) in self.bindings() {
            let resolved = subst.apply(&scheme.ty);
            let quantified: BTreeSet<_> = scheme.type_vars.iter().copied().collect();
            vars.extend(free_type_vars(&resolved).difference(&quantified));
        }
        vars
    }

    /// Row variables free in some visible binding, after substitution.
    pub fn free_row_vars(&self, subst: &Substitution) -> BTreeSet<RowVarId> {
        let mut vars = BTreeSet::new();
        for (_, scheme) in self.bindings() {
            let resolved = subst.apply(&scheme.ty);
            let quantified: BTreeSet<_> = scheme.row_vars.iter().copied().collect();
            vars.extend(free_row_vars(&resolved).difference(&quantified));
        }
        vars
    }
}

// ---------------------------------------------------------------------------
// Generalization and instantiation
// ---------------------------------------------------------------------------

/// Generalize a type into a type scheme by quantifying over variables
/// that are free in the type but not free in the environment.
///
/// `let id(x) = x` gets `forall a. a -> a` because `a` is free in
/// `a -> a` but not in the environment. Class obligations left on a
/// quantified variable become scheme bounds. Error variables are never
/// quantified.
pub fn generalize(
    ty: &Type,
    env: &TypeEnv,
    subst: &Substitution,
    residuals: &BTreeMap<TypeVarId, BTreeSet<String>>,
    excluded: &BTreeSet<TypeVarId>,
) -> TypeScheme {
    let ty = subst.apply(ty);

    let env_type_vars = env.free_type_vars(subst);
    let env_row_vars = env.free_row_vars(subst);

    let type_vars: Vec<TypeVarId> = free_type_vars(&ty)
        .into_iter()
        .filter(|var| !env_type_vars.contains(var) && !excluded.contains(var))
        .collect();
    let row_vars: Vec<RowVarId> = free_row_vars(&ty)
        .difference(&env_row_vars)
        .copied()
        .collect();

    let mut bounds = BTreeMap::new();
    for var in &type_vars {
        if let Some(classes) = residuals.get(var)
            && !classes.is_empty()
        {
            bounds.insert(*var, classes.clone());
        }
    }

    TypeScheme {
        type_vars,
        row_vars,
        bounds,
        ty,
    }
}

/// Instantiate a type scheme with fresh variables.
///
/// Returns the instantiated type and one `Instance` constraint per bound.
pub fn instantiate(
    scheme: &TypeScheme,
    supply: &mut VarSupply,
    span: Span,
) -> (Type, Vec<Constraint>) {
    if scheme.is_mono() {
        return (scheme.ty.clone(), Vec::new());
    }

    let types: BTreeMap<TypeVarId, Type> = scheme
        .type_vars
        .iter()
        .map(|&var| (var, supply.fresh_type()))
        .collect();
    let rows: BTreeMap<RowVarId, RowVarId> = scheme
        .row_vars
        .iter()
        .map(|&var| (var, supply.fresh_row_var()))
        .collect();

    let mut bounds = Vec::new();
    for (var, classes) in &scheme.bounds {
        if let Some(fresh) = types.get(var) {
            for class in classes {
                bounds.push(Constraint::instance(fresh.clone(), class.clone(), span));
            }
        }
    }

    (replace_vars(&scheme.ty, &types, &rows), bounds)
}

// ---------------------------------------------------------------------------
// Constraint generation
// ---------------------------------------------------------------------------

/// A generated type with the constraints it depends on.
#[derive(Debug, Clone)]
pub struct Generated {
    pub ty: Type,
    pub constraints: ConstraintSet,
}

impl Generated {
    pub fn new(ty: Type, constraints: ConstraintSet) -> Self {
        Self { ty, constraints }
    }
}

/// Walks one top-level statement.
///
/// Type variables named in annotations (`a`, `r`) are shared across the
/// whole statement.
pub struct ConstraintGenerator<'a> {
    ctx: &'a mut InferenceContext,
    scope: TypeScope,
    /// Unsolved type of every expression and pattern node visited.
    types: Vec<(Span, Type)>,
}

impl<'a> ConstraintGenerator<'a> {
    pub fn new(ctx: &'a mut InferenceContext) -> Self {
        Self {
            ctx,
            scope: TypeScope::implicit(),
            types: Vec::new(),
        }
    }

    /// Node types recorded so far, to be resolved once the statement is solved.
    pub fn finish(self) -> Vec<(Span, Type)> {
        self.types
    }

    /// Generate constraints for an expression, recovering from failure.
    pub fn infer(&mut self, expr: &Expr, env: &TypeEnv) -> Generated {
        match self.generate(expr, env) {
            Ok(generated) => generated,
            Err(diag) => {
                let ty = self.recover(diag);
                self.record(expr.span, &ty);
                Generated::new(ty, ConstraintSet::empty())
            }
        }
    }

    /// Generate constraints for a `let` binding, recovering from failure.
    ///
    /// For recursive bindings the returned type is the placeholder the
    /// value was checked against.
    pub fn infer_binding(&mut self, binding: &LetBinding, env: &TypeEnv) -> Generated {
        match self.binding(binding, env) {
            Ok(generated) => generated,
            Err(diag) => {
                let ty = self.recover(diag);
                self.record(binding.name.span, &ty);
                Generated::new(ty, ConstraintSet::empty())
            }
        }
    }

    /// Generate constraints for an expression.
    pub fn generate(&mut self, expr: &Expr, env: &TypeEnv) -> Result<Generated, Diagnostic> {
        let span = expr.span;
        let generated = match &expr.node {
            ExprKind::Lit(lit) => {
                let ty = self.fresh();
                let prim = literal_type(lit);
                self.trace(span, &prim, InferRule::Literal, || (describe(expr), String::new()));
                Generated::new(
                    ty.clone(),
                    ConstraintSet::of([Constraint::equality(ty, prim, span, Reason::Literal)]),
                )
            }

            ExprKind::Var(name) => {
                let Some(scheme) = env.lookup(name) else {
                    return Err(undefined_variable(name, span, env));
                };
                let (instance, bounds) = instantiate(scheme, &mut self.ctx.supply, span);
                let rule = if scheme.is_mono() {
                    InferRule::VarLookup
                } else {
                    InferRule::Instantiate
                };
                self.trace(span, &instance, rule, || {
                    (name.clone(), format!("{name}: {scheme}"))
                });
                let ty = self.fresh();
                let constraints = ConstraintSet::of(bounds).add(Constraint::equality(
                    ty.clone(),
                    instance,
                    span,
                    Reason::VarUse,
                ));
                Generated::new(ty, constraints)
            }

            ExprKind::Call { func, args } => {
                let callee = self.infer(func, env);
                let mut constraints = callee.constraints;
                let mut arg_tys = Vec::with_capacity(args.len());
                for arg in args {
                    let arg = self.infer(arg, env);
                    constraints = constraints.union(&arg.constraints);
                    arg_tys.push(arg.ty);
                }
                let result = self.fresh();
                let expected = Type::curried(arg_tys, result.clone());
                self.trace(span, &expected, InferRule::Call, || {
                    (describe(expr), format!("{} argument(s)", args.len()))
                });
                constraints = constraints.add(Constraint::equality(
                    callee.ty,
                    expected,
                    span,
                    Reason::FunctionCall,
                ));
                Generated::new(result, constraints)
            }

            ExprKind::BinaryOp { op, left, right } => self.binary(op, left, right, span, env),

            ExprKind::UnaryOp { op, operand } => {
                let inner = self.infer(operand, env);
                let (operand_ty, symbol) = match op.node {
                    UnaryOp::Neg => (Type::Int, "-"),
                    UnaryOp::Not => (Type::Bool, "!"),
                };
                let result = self.fresh();
                let constraints = inner
                    .constraints
                    .add(Constraint::equality(
                        operand_ty.clone(),
                        inner.ty,
                        operand.span,
                        Reason::UnaryOp(symbol),
                    ))
                    .add(Constraint::equality(
                        result.clone(),
                        operand_ty,
                        span,
                        Reason::UnaryOp(symbol),
                    ));
                Generated::new(result, constraints)
            }

            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.infer(condition, env);
                let then_g = self.infer(then_branch, env);
                let else_g = self.infer(else_branch, env);
                let joined = if then_g.ty == else_g.ty {
                    then_g.ty.clone()
                } else {
                    Type::union([then_g.ty.clone(), else_g.ty.clone()])
                };
                self.trace(span, &joined, InferRule::If, || {
                    (describe(expr), String::new())
                });
                let result = self.fresh();
                let constraints = cond
                    .constraints
                    .union(&then_g.constraints)
                    .union(&else_g.constraints)
                    .add(Constraint::equality(
                        Type::Bool,
                        cond.ty,
                        condition.span,
                        Reason::IfCondition,
                    ))
                    .add(Constraint::equality(
                        result.clone(),
                        joined,
                        span,
                        Reason::IfBranches,
                    ));
                Generated::new(result, constraints)
            }

            ExprKind::Lambda { params, body } => self.lambda(params, body, span, env)?.0,

            ExprKind::Let { binding, body } => {
                let bound = self.binding(binding, env)?;
                match body {
                    None => bound,
                    Some(body) => {
                        let (scheme, solved) =
                            self.solve_and_generalize(&bound, env, binding.name.span);
                        self.trace(binding.name.span, &scheme.ty, InferRule::LetGen, || {
                            (binding.name.node.clone(), scheme.to_string())
                        });
                        let inner = env.bind(binding.name.node.clone(), scheme);
                        let body_g = self.infer(body, &inner);
                        let constraints = bound
                            .constraints
                            .union(&solved)
                            .union(&body_g.constraints);
                        Generated::new(body_g.ty, constraints)
                    }
                }
            }

            ExprKind::Record(items) => self.record_literal(items, span, env)?,

            ExprKind::FieldAccess {
                expr: target,
                field,
            } => {
                let target_g = self.infer(target, env);
                let result = self.fresh();
                let rest = self.ctx.supply.fresh_row_var();
                let label = Label::new(field.node.clone());
                let required = Type::open_record(vec![(label.clone(), result.clone())], rest);
                self.trace(span, &required, InferRule::FieldAccess, || {
                    (describe(expr), String::new())
                });
                let constraints = target_g.constraints.add(Constraint::equality(
                    required,
                    target_g.ty,
                    span,
                    Reason::FieldAccess { label },
                ));
                Generated::new(result, constraints)
            }

            ExprKind::Tuple(elems) => {
                let mut constraints = ConstraintSet::empty();
                let mut tys = Vec::with_capacity(elems.len());
                for elem in elems {
                    let elem = self.infer(elem, env);
                    constraints = constraints.union(&elem.constraints);
                    tys.push(elem.ty);
                }
                let ty = Type::Tuple(tys);
                self.trace(span, &ty, InferRule::Tuple, || (describe(expr), String::new()));
                Generated::new(ty, constraints)
            }

            ExprKind::Match { scrutinee, cases } => self.match_expr(scrutinee, cases, span, env),

            ExprKind::Annotated {
                expr: inner,
                annotation,
            } => {
                let declared = self.convert(annotation)?;
                let inner_g = self.infer_against(inner, &declared, env);
                let constraints = inner_g.constraints.add(Constraint::equality(
                    declared.clone(),
                    inner_g.ty,
                    span,
                    Reason::TypeAscription,
                ));
                Generated::new(declared, constraints)
            }
        };
        self.record(span, &generated.ty);
        Ok(generated)
    }

    fn binary(
        &mut self,
        op: &Spanned<BinOp>,
        left: &Expr,
        right: &Expr,
        span: Span,
        env: &TypeEnv,
    ) -> Generated {
        let l = self.infer(left, env);
        let r = self.infer(right, env);
        let symbol = op.node.symbol();
        let reason = Reason::BinaryOp(symbol);
        let mut constraints = l.constraints.union(&r.constraints);

        let result_ty = match op.node {
            BinOp::Add => {
                constraints = constraints
                    .add(Constraint::equality(l.ty.clone(), r.ty.clone(), span, reason.clone()))
                    .add(Constraint::instance(l.ty.clone(), ADDABLE, span));
                l.ty.clone()
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                constraints = constraints
                    .add(Constraint::equality(Type::Int, l.ty.clone(), left.span, reason.clone()))
                    .add(Constraint::equality(Type::Int, r.ty.clone(), right.span, reason.clone()));
                Type::Int
            }
            BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                constraints = constraints
                    .add(Constraint::equality(l.ty.clone(), r.ty.clone(), span, reason.clone()))
                    .add(Constraint::instance(l.ty.clone(), COMPARABLE, span));
                Type::Bool
            }
            BinOp::Eq | BinOp::Neq => {
                constraints = constraints.add(Constraint::equality(
                    l.ty.clone(),
                    r.ty.clone(),
                    span,
                    reason.clone(),
                ));
                Type::Bool
            }
            BinOp::And | BinOp::Or => {
                constraints = constraints
                    .add(Constraint::equality(Type::Bool, l.ty.clone(), left.span, reason.clone()))
                    .add(Constraint::equality(Type::Bool, r.ty.clone(), right.span, reason.clone()));
                Type::Bool
            }
        };

        self.trace(span, &result_ty, InferRule::BinaryOp, || {
            (format!("_ {symbol} _"), String::new())
        });
        let result = self.fresh();
        constraints = constraints.add(Constraint::equality(result.clone(), result_ty, span, reason));
        Generated::new(result, constraints)
    }

    /// Infer a lambda. Returns the curried function type and the parameter
    /// types so that function sugar can rebuild an annotated signature.
    fn lambda(
        &mut self,
        params: &[Param],
        body: &Expr,
        span: Span,
        env: &TypeEnv,
    ) -> Result<(Generated, Vec<Type>), Diagnostic> {
        let mut seen = BTreeSet::new();
        let mut param_tys = Vec::with_capacity(params.len());
        let mut inner = env.clone();
        for param in params {
            if !seen.insert(param.name.node.as_str()) {
                return Err(Diagnostic::error(
                    Category::DuplicateDefinition,
                    format!("parameter `{}` is bound more than once", param.name.node),
                )
                .at(span_to_location(param.name.span)));
            }
            let ty = match &param.annotation {
                Some(annotation) => self.convert(annotation)?,
                None => self.fresh(),
            };
            self.record(param.name.span, &ty);
            inner = inner.bind(param.name.node.clone(), TypeScheme::mono(ty.clone()));
            param_tys.push(ty);
        }

        let body_g = self.infer(body, &inner);
        let ty = Type::curried(param_tys.clone(), body_g.ty);
        self.trace(span, &ty, InferRule::Lambda, || {
            let names: Vec<&str> = params.iter().map(|p| p.name.node.as_str()).collect();
            (format!("fn({})", names.join(", ")), String::new())
        });
        Ok((Generated::new(ty, body_g.constraints), param_tys))
    }

    fn binding(&mut self, binding: &LetBinding, env: &TypeEnv) -> Result<Generated, Diagnostic> {
        let name = &binding.name;
        let placeholder = if binding.recursive {
            Some(self.fresh())
        } else {
            None
        };
        let value_env = match &placeholder {
            Some(p) => env.bind(name.node.clone(), TypeScheme::mono(p.clone())),
            None => env.clone(),
        };

        let (value, declared) = match &binding.params {
            // `let f(x, y): R = body` is `let f = fn(x, y) -> body` with the
            // annotation folded around the parameter types.
            Some(params) => {
                let span = name.span.merge(binding.value.span);
                let (value, param_tys) = self.lambda(params, &binding.value, span, &value_env)?;
                self.record(span, &value.ty);
                let declared = match &binding.annotation {
                    Some(ret) => Some(Type::curried(param_tys, self.convert(ret)?)),
                    None => None,
                };
                (value, declared)
            }
            None => match &binding.annotation {
                Some(annotation) => {
                    let declared = self.convert(annotation)?;
                    let value = self.infer_against(&binding.value, &declared, &value_env);
                    (value, Some(declared))
                }
                None => (self.infer(&binding.value, &value_env), None),
            },
        };

        let mut constraints = value.constraints;
        let value_ty = match declared {
            Some(declared) => {
                constraints = constraints.add(Constraint::equality(
                    declared.clone(),
                    value.ty,
                    binding.value.span,
                    Reason::LetAnnotation,
                ));
                declared
            }
            None => value.ty,
        };

        let ty = match placeholder {
            Some(p) => {
                constraints = constraints.add(Constraint::equality(
                    p.clone(),
                    value_ty,
                    name.span,
                    Reason::RecursiveBinding,
                ));
                self.trace(name.span, &p, InferRule::LetRec, || {
                    (name.node.clone(), String::new())
                });
                p
            }
            None => {
                self.trace(name.span, &value_ty, InferRule::Let, || {
                    (name.node.clone(), String::new())
                });
                value_ty
            }
        };
        self.record(name.span, &ty);
        Ok(Generated::new(ty, constraints))
    }

    /// Infer a value checked against its declared type. Where the declared
    /// type has literal string members, string literals in the value (also
    /// inside record literals) keep their exact value, so `let t: "ok" = "ok"`
    /// holds and `let t: "ok" = "bad"` does not.
    fn infer_against(&mut self, value: &Expr, declared: &Type, env: &TypeEnv) -> Generated {
        if self.mentions_literal(declared, &mut Vec::new()) {
            self.infer_exact(value, env)
        } else {
            self.infer(value, env)
        }
    }

    fn infer_exact(&mut self, expr: &Expr, env: &TypeEnv) -> Generated {
        match &expr.node {
            ExprKind::Lit(Lit::String(value)) => {
                let ty = Type::LiteralString(value.clone());
                self.trace(expr.span, &ty, InferRule::Literal, || {
                    (describe(expr), "exact".to_string())
                });
                self.record(expr.span, &ty);
                Generated::new(ty, ConstraintSet::empty())
            }
            ExprKind::Record(items) if plain_fields(items) => {
                let mut constraints = ConstraintSet::empty();
                let mut fields = Vec::with_capacity(items.len());
                for item in items {
                    if let RecordItem::Field(name, value) = item {
                        let field = self.infer_exact(value, env);
                        constraints = constraints.union(&field.constraints);
                        fields.push((Label::new(name.node.clone()), field.ty));
                    }
                }
                let ty = Type::record(fields);
                self.trace(expr.span, &ty, InferRule::Record, || {
                    ("{..}".to_string(), "closed".to_string())
                });
                self.record(expr.span, &ty);
                Generated::new(ty, constraints)
            }
            _ => self.infer(expr, env),
        }
    }

    fn mentions_literal(&self, ty: &Type, expanding: &mut Vec<String>) -> bool {
        match ty {
            Type::LiteralString(_) => true,
            Type::Union(members) | Type::Intersection(members) | Type::Tuple(members) => members
                .iter()
                .any(|member| self.mentions_literal(member, expanding)),
            Type::Record(row) => row
                .fields
                .iter()
                .any(|(_, field)| self.mentions_literal(field, expanding)),
            Type::Recursive { body, .. } => self.mentions_literal(body, expanding),
            Type::Alias { name, args } => {
                if expanding.contains(name) {
                    return false;
                }
                expanding.push(name.clone());
                match self.ctx.registry.expand_alias(name, args) {
                    Ok(body) => self.mentions_literal(&body, expanding),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    /// Solve a let value on its own and generalize the result. A value
    /// whose constraints fail keeps its raw type, monomorphically.
    ///
    /// The local solve may allocate row and type variables that the scheme
    /// and the environment keep mentioning, so its bindings come back as
    /// equalities for the enclosing solve to share.
    fn solve_and_generalize(
        &mut self,
        bound: &Generated,
        env: &TypeEnv,
        span: Span,
    ) -> (TypeScheme, ConstraintSet) {
        let options = self
            .ctx
            .options
            .with_exhaustiveness(ExhaustivenessPolicy::Off);
        let error_vars: Vec<TypeVarId> = self.ctx.recovery.error_vars().iter().copied().collect();
        let mut unifier = Unifier::new(&self.ctx.registry, &mut self.ctx.supply, options)
            .with_error_vars(error_vars)
            .without_tracing();
        if unifier.solve(&bound.constraints).is_err() {
            return (TypeScheme::mono(bound.ty.clone()), ConstraintSet::empty());
        }

        let scheme = generalize(
            &bound.ty,
            env,
            &unifier.substitution,
            unifier.residuals(),
            unifier.error_vars(),
        );
        let mut solved = ConstraintSet::empty();
        for (var, ty) in unifier.substitution.type_bindings() {
            solved = solved.add(Constraint::equality(
                Type::Var(*var),
                ty.clone(),
                span,
                Reason::LetValue,
            ));
        }
        for (var, row) in unifier.substitution.row_bindings() {
            solved = solved.add(Constraint::equality(
                Type::Record(RowType::empty_open(*var)),
                Type::Record(row.clone()),
                span,
                Reason::LetValue,
            ));
        }
        (scheme, solved)
    }

    fn record_literal(
        &mut self,
        items: &[RecordItem],
        span: Span,
        env: &TypeEnv,
    ) -> Result<Generated, Diagnostic> {
        let mut constraints = ConstraintSet::empty();
        let mut entries = Vec::with_capacity(items.len());
        let mut seen = BTreeSet::new();
        let mut has_spread = false;

        for item in items {
            match item {
                RecordItem::Field(name, value) => {
                    if !seen.insert(name.node.as_str()) {
                        return Err(Diagnostic::error(
                            Category::DuplicateField,
                            format!("field `{}` is given more than once", name.node),
                        )
                        .at(span_to_location(name.span)));
                    }
                    let value = self.infer(value, env);
                    constraints = constraints.union(&value.constraints);
                    entries.push(MergeEntry::Field(Label::new(name.node.clone()), value.ty));
                }
                RecordItem::Spread(value) => {
                    has_spread = true;
                    let spread = self.infer(value, env);
                    constraints = constraints.union(&spread.constraints).add(
                        Constraint::RecordType {
                            ty: spread.ty.clone(),
                            provenance: Provenance::new(value.span, Reason::Spread),
                        },
                    );
                    entries.push(MergeEntry::Spread(spread.ty));
                }
            }
        }

        if !has_spread {
            let fields = entries
                .into_iter()
                .filter_map(|entry| match entry {
                    MergeEntry::Field(label, ty) => Some((label, ty)),
                    MergeEntry::Spread(_) => None,
                })
                .collect();
            let ty = Type::record(fields);
            self.trace(span, &ty, InferRule::Record, || {
                ("{..}".to_string(), "closed".to_string())
            });
            return Ok(Generated::new(ty, constraints));
        }

        let result = self.fresh();
        self.trace(span, &result, InferRule::Spread, || {
            ("{..}".to_string(), format!("merge of {} entries", entries.len()))
        });
        constraints = constraints.add(Constraint::Merge {
            result: result.clone(),
            entries,
            provenance: Provenance::new(span, Reason::Spread),
        });
        Ok(Generated::new(result, constraints))
    }

    fn match_expr(
        &mut self,
        scrutinee: &Expr,
        cases: &[MatchCase],
        span: Span,
        env: &TypeEnv,
    ) -> Generated {
        let scrut = self.infer(scrutinee, env);
        let mut constraints = scrut.constraints.clone();

        // Patterns first: the scrutinee's shape is known before any body.
        let mut shapes: Vec<(Option<String>, Type)> = Vec::new();
        let mut case_bindings = Vec::with_capacity(cases.len());
        for case in cases {
            let mut bindings = Vec::new();
            let mut pattern_constraints = ConstraintSet::empty();
            match self.pattern(&case.pattern, &mut bindings, &mut pattern_constraints) {
                Ok(ty) => {
                    constraints = constraints.union(&pattern_constraints);
                    if is_catch_all(&case.pattern) {
                        constraints = constraints.add(Constraint::equality(
                            scrut.ty.clone(),
                            ty,
                            case.pattern.span,
                            Reason::PatternMatch,
                        ));
                    } else {
                        let key = shape_key(&ty);
                        let existing = key.as_ref().and_then(|key| {
                            shapes
                                .iter()
                                .find(|(other, _)| other.as_ref() == Some(key))
                                .map(|(_, first)| first.clone())
                        });
                        match existing {
                            Some(first) => {
                                constraints = constraints.add(Constraint::equality(
                                    first,
                                    ty,
                                    case.pattern.span,
                                    Reason::PatternMatch,
                                ));
                            }
                            None => shapes.push((key, ty)),
                        }
                    }
                }
                Err(diag) => {
                    self.ctx.recovery.record(diag);
                    bindings = pattern_names(&case.pattern)
                        .into_iter()
                        .map(|name| {
                            let ty = self.ctx.recovery.error_var(&mut self.ctx.supply);
                            (name, ty)
                        })
                        .collect();
                }
            }
            case_bindings.push(bindings);
        }

        if !shapes.is_empty() {
            let shaped = Type::union(shapes.into_iter().map(|(_, ty)| ty));
            self.trace(scrutinee.span, &shaped, InferRule::Match, || {
                ("match".to_string(), "scrutinee covers the case patterns".to_string())
            });
            constraints = constraints.add(Constraint::equality(
                scrut.ty.clone(),
                shaped,
                scrutinee.span,
                Reason::PatternMatch,
            ));
        }

        let mut bodies = Vec::with_capacity(cases.len());
        let mut lowered = Vec::with_capacity(cases.len());
        for (case, bindings) in cases.iter().zip(case_bindings) {
            let case_env = bindings
                .into_iter()
                .fold(env.clone(), |acc, (name, ty)| acc.bind(name, TypeScheme::mono(ty)));
            let body = self.infer(&case.body, &case_env);
            constraints = constraints.union(&body.constraints);
            bodies.push(body.ty);
            lowered.push(Case {
                pat: lower_pattern(&case.pattern),
                span: case.pattern.span,
            });
        }

        let result = self.fresh();
        constraints = constraints
            .add(Constraint::equality(
                result.clone(),
                Type::union(bodies),
                span,
                Reason::MatchArms,
            ))
            .add(Constraint::Exhaustiveness {
                scrutinee: scrut.ty,
                cases: lowered,
                provenance: Provenance::new(span, Reason::PatternMatch),
            });
        Generated::new(result, constraints)
    }

    /// Type of the values a pattern matches. Variables are pushed onto
    /// `bindings`; sub-pattern constraints onto `constraints`.
    fn pattern(
        &mut self,
        pat: &Pattern,
        bindings: &mut Vec<(String, Type)>,
        constraints: &mut ConstraintSet,
    ) -> Result<Type, Diagnostic> {
        let ty = match &pat.node {
            PatternKind::Wildcard => self.fresh(),
            PatternKind::Var(name) => {
                if bindings.iter().any(|(bound, _)| bound == name) {
                    return Err(Diagnostic::error(
                        Category::DuplicateDefinition,
                        format!("variable `{name}` is bound more than once in this pattern"),
                    )
                    .at(span_to_location(pat.span)));
                }
                let ty = self.fresh();
                bindings.push((name.clone(), ty.clone()));
                ty
            }
            PatternKind::Lit(lit) => match lit {
                Lit::Int(_) => Type::Int,
                Lit::Bool(_) => Type::Bool,
                Lit::Char(_) => Type::Char,
                Lit::Unit => Type::Unit,
                Lit::String(value) => Type::LiteralString(value.clone()),
                Lit::Float(_) => {
                    return Err(Diagnostic::error(
                        Category::UnimplementedPattern,
                        "float literal patterns are not supported",
                    )
                    .at(span_to_location(pat.span))
                    .with_help("bind the value and compare it in the case body"));
                }
            },
            PatternKind::Tuple(elems) => {
                let mut tys = Vec::with_capacity(elems.len());
                for elem in elems {
                    tys.push(self.pattern(elem, bindings, constraints)?);
                }
                Type::Tuple(tys)
            }
            PatternKind::Record { fields } => {
                let mut row: Vec<(Label, Type)> = Vec::with_capacity(fields.len());
                for (name, sub) in fields {
                    let label = Label::new(name.node.clone());
                    if row.iter().any(|(existing, _)| *existing == label) {
                        return Err(Diagnostic::error(
                            Category::DuplicateField,
                            format!("field `{label}` appears more than once in this pattern"),
                        )
                        .at(span_to_location(name.span)));
                    }
                    let field_ty = self.pattern(sub, bindings, constraints)?;
                    row.push((label, field_ty));
                }
                Type::open_record(row, self.ctx.supply.fresh_row_var())
            }
            PatternKind::Constructor { name, args } => {
                let Some((owner, fields)) = self
                    .ctx
                    .registry
                    .instantiate_constructor(&name.node, &mut self.ctx.supply)
                else {
                    return Err(Diagnostic::error(
                        Category::UndefinedVariable,
                        format!("unknown constructor `{}`", name.node),
                    )
                    .at(span_to_location(name.span)));
                };
                if fields.len() != args.len() {
                    return Err(Diagnostic::error(
                        Category::ArityMismatch,
                        format!(
                            "constructor `{}` expects {} argument(s), found {}",
                            name.node,
                            fields.len(),
                            args.len()
                        ),
                    )
                    .at(span_to_location(pat.span)));
                }
                for (arg, field) in args.iter().zip(fields) {
                    let arg_ty = self.pattern(arg, bindings, constraints)?;
                    *constraints = constraints.add(Constraint::equality(
                        field,
                        arg_ty,
                        arg.span,
                        Reason::PatternMatch,
                    ));
                }
                owner
            }
            PatternKind::Annotated {
                pattern: inner,
                annotation,
            } => {
                let declared = self.convert(annotation)?;
                let inner_ty = self.pattern(inner, bindings, constraints)?;
                *constraints = constraints.add(Constraint::equality(
                    declared.clone(),
                    inner_ty,
                    inner.span,
                    Reason::PatternMatch,
                ));
                declared
            }
        };
        self.record(pat.span, &ty);
        self.trace(pat.span, &ty, InferRule::Pattern, || {
            (format!("{:?}", lower_pattern(pat)), String::new())
        });
        Ok(ty)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn fresh(&mut self) -> Type {
        self.ctx.supply.fresh_type()
    }

    fn recover(&mut self, diag: Diagnostic) -> Type {
        self.ctx.recovery.record(diag);
        self.ctx.recovery.error_var(&mut self.ctx.supply)
    }

    fn convert(&mut self, annotation: &Spanned<TypeExpr>) -> Result<Type, Diagnostic> {
        self.ctx
            .registry
            .convert(&annotation.node, &mut self.scope, &mut self.ctx.supply)
            .map_err(|diag| diag.at(span_to_location(annotation.span)))
    }

    fn record(&mut self, span: Span, ty: &Type) {
        self.types.push((span, ty.clone()));
    }

    fn trace(
        &mut self,
        span: Span,
        ty: &Type,
        rule: InferRule,
        describe: impl FnOnce() -> (String, String),
    ) {
        if !self.ctx.options.tracing {
            return;
        }
        let (expr, detail) = describe();
        self.ctx.infer_trace.push(InferStep {
            expr,
            ty: sanitize_type_display(ty),
            rule,
            detail,
            span: (!span.is_synthetic()).then_some((span.start, span.end)),
        });
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn literal_type(lit: &Lit) -> Type {
    match lit {
        Lit::Int(_) => Type::Int,
        Lit::Float(_) => Type::Float,
        Lit::Bool(_) => Type::Bool,
        Lit::Char(_) => Type::Char,
        Lit::String(_) => Type::String,
        Lit::Unit => Type::Unit,
    }
}

fn undefined_variable(name: &str, span: Span, env: &TypeEnv) -> Diagnostic {
    let mut diag = Diagnostic::error(
        Category::UndefinedVariable,
        format!("undefined variable `{name}`"),
    )
    .at(span_to_location(span));
    if let Some(candidate) = closest_name(name, env.bindings().map(|(bound, _)| bound)) {
        diag = diag.with_help(format!("a binding with a similar name exists: `{candidate}`"));
    }
    diag
}

fn closest_name<'n>(name: &str, candidates: impl Iterator<Item = &'n str>) -> Option<&'n str> {
    let limit = (name.len() / 3).clamp(1, 2);
    candidates
        .filter(|candidate| *candidate != name)
        .map(|candidate| (edit_distance(name, candidate), candidate))
        .filter(|(distance, _)| *distance <= limit)
        .min()
        .map(|(_, candidate)| candidate)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b_chars.len() + 1];
        for (j, cb) in b_chars.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            row[j + 1] = substitution.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b_chars.len()]
}

/// Short rendering of an expression for traces.
fn describe(expr: &Expr) -> String {
    match &expr.node {
        ExprKind::Lit(Lit::Int(n)) => n.to_string(),
        ExprKind::Lit(Lit::Float(f)) => f.to_string(),
        ExprKind::Lit(Lit::Bool(b)) => b.to_string(),
        ExprKind::Lit(Lit::Char(c)) => format!("{c:?}"),
        ExprKind::Lit(Lit::String(s)) => format!("{s:?}"),
        ExprKind::Lit(Lit::Unit) => "()".to_string(),
        ExprKind::Var(name) => name.clone(),
        ExprKind::Call { func, .. } => format!("{}(..)", describe(func)),
        ExprKind::BinaryOp { op, .. } => format!("_ {} _", op.node.symbol()),
        ExprKind::UnaryOp { op, .. } => match op.node {
            UnaryOp::Neg => "-_".to_string(),
            UnaryOp::Not => "!_".to_string(),
        },
        ExprKind::If { .. } => "if".to_string(),
        ExprKind::Lambda { .. } => "fn".to_string(),
        ExprKind::Let { binding, .. } => format!("let {}", binding.name.node),
        ExprKind::Record(_) => "{..}".to_string(),
        ExprKind::FieldAccess { field, .. } => format!("_.{}", field.node),
        ExprKind::Tuple(_) => "(..)".to_string(),
        ExprKind::Match { .. } => "match".to_string(),
        ExprKind::Annotated { .. } => "(_ : _)".to_string(),
    }
}

/// A record literal with no spreads and no repeated labels.
fn plain_fields(items: &[RecordItem]) -> bool {
    let mut seen = BTreeSet::new();
    items.iter().all(|item| match item {
        RecordItem::Field(name, _) => seen.insert(name.node.as_str()),
        RecordItem::Spread(_) => false,
    })
}

fn is_catch_all(pat: &Pattern) -> bool {
    matches!(pat.node, PatternKind::Wildcard | PatternKind::Var(_))
}

/// Groups case patterns whose types must agree rather than form a union:
/// all `Cons`/`Nil` patterns are one `List`, all pairs one tuple type.
/// Records are told apart by their literal-string fields.
fn shape_key(ty: &Type) -> Option<String> {
    match ty {
        Type::Con { name, .. } | Type::Alias { name, .. } => Some(name.clone()),
        Type::Tuple(elems) => Some(format!("({})", elems.len())),
        Type::Record(row) => {
            let tags: Vec<String> = row
                .fields
                .iter()
                .filter_map(|(label, field)| match field {
                    Type::LiteralString(value) => Some(format!("{label}={value:?}")),
                    _ => None,
                })
                .collect();
            Some(format!("{{{}}}", tags.join(",")))
        }
        _ => None,
    }
}

/// Variables bound by a pattern, in order of appearance.
fn pattern_names(pat: &Pattern) -> Vec<String> {
    fn walk(pat: &Pattern, out: &mut Vec<String>) {
        match &pat.node {
            PatternKind::Var(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            PatternKind::Tuple(elems) | PatternKind::Constructor { args: elems, .. } => {
                elems.iter().for_each(|elem| walk(elem, out));
            }
            PatternKind::Record { fields } => {
                fields.iter().for_each(|(_, sub)| walk(sub, out));
            }
            PatternKind::Annotated { pattern, .. } => walk(pattern, out),
            PatternKind::Wildcard | PatternKind::Lit(_) => {}
        }
    }
    let mut out = Vec::new();
    walk(pat, &mut out);
    out
}

/// Lower a source pattern for exhaustiveness analysis.
pub fn lower_pattern(pat: &Pattern) -> Pat {
    match &pat.node {
        PatternKind::Wildcard | PatternKind::Var(_) => Pat::Wild,
        PatternKind::Lit(lit) => match lit {
            Lit::Int(n) => Pat::Int(*n),
            Lit::Float(f) => Pat::Float(f.to_bits()),
            Lit::Bool(b) => Pat::Bool(*b),
            Lit::Char(c) => Pat::Char(*c),
            Lit::String(s) => Pat::Str(s.clone()),
            Lit::Unit => Pat::Unit,
        },
        PatternKind::Tuple(elems) => Pat::Tuple(elems.iter().map(lower_pattern).collect()),
        PatternKind::Record { fields } => Pat::Record(
            fields
                .iter()
                .map(|(name, sub)| (name.node.clone(), lower_pattern(sub)))
                .collect(),
        ),
        PatternKind::Constructor { name, args } => Pat::Ctor {
            name: name.node.clone(),
            args: args.iter().map(lower_pattern).collect(),
        },
        PatternKind::Annotated { pattern, .. } => lower_pattern(pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(n: u32) -> Type {
        Type::Var(TypeVarId(n))
    }

    #[test]
    fn bind_shadows_without_mutating_parent() {
        let outer = TypeEnv::empty().bind("x", TypeScheme::mono(Type::Int));
        let inner = outer.bind("x", TypeScheme::mono(Type::String));
        assert_eq!(outer.lookup("x").map(|s| &s.ty), Some(&Type::Int));
        assert_eq!(inner.lookup("x").map(|s| &s.ty), Some(&Type::String));
        assert_eq!(inner.bindings().count(), 1);
        assert!(TypeEnv::empty().lookup("x").is_none());
    }

    #[test]
    fn generalize_skips_env_vars() {
        let env = TypeEnv::empty().bind("y", TypeScheme::mono(var(1)));
        let ty = Type::arrow(var(0), var(1));
        let scheme = generalize(
            &ty,
            &env,
            &Substitution::new(),
            &BTreeMap::new(),
            &BTreeSet::new(),
        );
        assert_eq!(scheme.type_vars, vec![TypeVarId(0)]);
    }

    #[test]
    fn generalize_sees_env_through_substitution() {
        // y: t1 with t1 := t0 keeps t0 monomorphic.
        let env = TypeEnv::empty().bind("y", TypeScheme::mono(var(1)));
        let mut subst = Substitution::new();
        subst.bind_type(TypeVarId(1), var(0));
        let scheme = generalize(
            &Type::arrow(var(0), var(0)),
            &env,
            &subst,
            &BTreeMap::new(),
            &BTreeSet::new(),
        );
        assert!(scheme.is_mono());
    }

    #[test]
    fn generalize_keeps_bounds_and_excludes_error_vars() {
        let residuals = BTreeMap::from([(TypeVarId(0), BTreeSet::from([ADDABLE.to_string()]))]);
        let scheme = generalize(
            &Type::arrow(var(0), var(5)),
            &TypeEnv::empty(),
            &Substitution::new(),
            &residuals,
            &BTreeSet::from([TypeVarId(5)]),
        );
        assert_eq!(scheme.type_vars, vec![TypeVarId(0)]);
        assert_eq!(scheme.bounds.len(), 1);
    }

    #[test]
    fn instantiate_renames_and_reemits_bounds() {
        let scheme = TypeScheme {
            type_vars: vec![TypeVarId(0)],
            row_vars: vec![],
            bounds: BTreeMap::from([(TypeVarId(0), BTreeSet::from([ADDABLE.to_string()]))]),
            ty: Type::arrow(var(0), var(0)),
        };
        let mut supply = VarSupply::new();
        supply.fresh_type_var();
        let (ty, bounds) = instantiate(&scheme, &mut supply, Span::synthetic());
        assert_eq!(ty, Type::arrow(var(1), var(1)));
        assert_eq!(bounds.len(), 1);
        assert!(matches!(
            &bounds[0],
            Constraint::Instance { ty, class, .. } if *ty == var(1) && class == ADDABLE
        ));
    }

    #[test]
    fn closest_name_suggests_small_typos() {
        let names = ["length", "lenght", "map"];
        assert_eq!(closest_name("lengt", names.into_iter()), Some("length"));
        assert_eq!(closest_name("zzz", names.into_iter()), None);
    }

    #[test]
    fn shape_key_separates_tagged_records() {
        let ok = Type::open_record(
            vec![(Label::new("tag"), Type::LiteralString("ok".into()))],
            RowVarId(0),
        );
        let err = Type::open_record(
            vec![(Label::new("tag"), Type::LiteralString("err".into()))],
            RowVarId(1),
        );
        assert_ne!(shape_key(&ok), shape_key(&err));
        assert_eq!(
            shape_key(&Type::Tuple(vec![Type::Int, var(0)])),
            shape_key(&Type::Tuple(vec![var(1), Type::Int]))
        );
        assert_eq!(shape_key(&Type::Int), None);
    }
}
