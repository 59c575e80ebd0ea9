//! Type representations for Sable.
//!
//! This crate defines the semantic types used by the inference engine. These
//! are distinct from syntactic type expressions (which live in `sable-ast`).

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a type variable during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVarId(pub u32);

/// Unique identifier for a row variable during inference.
///
/// Row variables are drawn from the same counter as type variables, so a
/// `RowVarId` never shares its number with a `TypeVarId` of the same unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowVarId(pub u32);

/// A record field label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl Label {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A semantic type.
///
/// `Union` and `Intersection` members are normalized on construction through
/// [`Type::union`] and [`Type::intersection`]; equality and hashing treat them
/// as sets.
#[derive(Debug, Clone)]
pub enum Type {
    Int,
    Float,
    Bool,
    Char,
    String,
    Unit,
    /// Placeholder for an expression whose type could not be determined.
    Error,

    Var(TypeVarId),
    Function(FunctionType),
    Tuple(Vec<Type>),
    Record(RowType),
    Union(Vec<Type>),
    Intersection(Vec<Type>),
    /// Singleton string type: `"success"`.
    LiteralString(String),
    /// Nominal type applied to arguments: `List(Int)`.
    Con {
        name: String,
        args: Vec<Type>,
    },
    /// Reference to a declared alias, expanded by the type registry.
    Alias {
        name: String,
        args: Vec<Type>,
    },
    /// `rec t. body`, where `body` may mention `t`.
    Recursive {
        var: TypeVarId,
        body: Box<Type>,
    },
}

/// Function type: `(params) -> ret`.
///
/// Inference produces one parameter per arrow. Multi-parameter arrows come
/// from annotations and are curried on demand during unification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
}

impl FunctionType {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self {
            params,
            ret: Box::new(ret),
        }
    }

    /// Split off the first parameter: `(A, B) -> C` becomes `(A, B -> C)`.
    ///
    /// A parameterless arrow is treated as taking `Unit`.
    pub fn split_first(&self) -> (Type, Type) {
        match self.params.split_first() {
            None => (Type::Unit, (*self.ret).clone()),
            Some((first, [])) => (first.clone(), (*self.ret).clone()),
            Some((first, rest)) => (
                first.clone(),
                Type::Function(FunctionType::new(rest.to_vec(), (*self.ret).clone())),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A record row: labelled fields plus an optional tail.
///
/// - Closed: `rest` is `None`, the fields are exactly these.
/// - Open: `rest` is `Some(var)`, more fields may exist.
///
/// Field order is insertion order and only affects display; equality and
/// hashing ignore it.
#[derive(Debug, Clone)]
pub struct RowType {
    pub fields: Vec<(Label, Type)>,
    pub rest: Option<RowVarId>,
}

impl RowType {
    pub fn closed(fields: Vec<(Label, Type)>) -> Self {
        Self { fields, rest: None }
    }

    pub fn open(fields: Vec<(Label, Type)>, rest: RowVarId) -> Self {
        Self {
            fields,
            rest: Some(rest),
        }
    }

    /// Create an empty open row (just a row variable).
    pub fn empty_open(rest: RowVarId) -> Self {
        Self::open(Vec::new(), rest)
    }

    pub fn empty_closed() -> Self {
        Self::closed(Vec::new())
    }

    pub fn is_closed(&self) -> bool {
        self.rest.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.rest.is_some()
    }

    /// Look up a field by label.
    pub fn get(&self, label: &Label) -> Option<&Type> {
        self.fields.iter().find(|(l, _)| l == label).map(|(_, t)| t)
    }

    pub fn has(&self, label: &Label) -> bool {
        self.get(label).is_some()
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.fields.iter().map(|(l, _)| l)
    }

    /// Set a field, overriding an existing one in place.
    pub fn set(&mut self, label: Label, ty: Type) {
        match self.fields.iter_mut().find(|(l, _)| *l == label) {
            Some(slot) => slot.1 = ty,
            None => self.fields.push((label, ty)),
        }
    }

    fn sorted_fields(&self) -> Vec<&(Label, Type)> {
        let mut fields: Vec<_> = self.fields.iter().collect();
        fields.sort_by(|(a, _), (b, _)| a.cmp(b));
        fields
    }
}

impl PartialEq for RowType {
    fn eq(&self, other: &Self) -> bool {
        self.rest == other.rest
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(label, ty)| other.get(label) == Some(ty))
    }
}

impl Eq for RowType {}

impl Hash for RowType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sorted_fields().hash(state);
        self.rest.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Construction and normalization
// ---------------------------------------------------------------------------

impl Type {
    /// Build a normalized union: nested unions are flattened, duplicates
    /// removed, and a single member collapses to itself.
    pub fn union(members: impl IntoIterator<Item = Type>) -> Type {
        let flat = flatten_members(members, |ty| match ty {
            Type::Union(inner) => Ok(inner),
            other => Err(other),
        });
        match <[Type; 1]>::try_from(flat) {
            Ok([single]) => single,
            Err(flat) => Type::Union(flat),
        }
    }

    /// Build a normalized intersection (same rules as [`Type::union`]).
    pub fn intersection(members: impl IntoIterator<Item = Type>) -> Type {
        let flat = flatten_members(members, |ty| match ty {
            Type::Intersection(inner) => Ok(inner),
            other => Err(other),
        });
        match <[Type; 1]>::try_from(flat) {
            Ok([single]) => single,
            Err(flat) => Type::Intersection(flat),
        }
    }

    /// Single-parameter arrow.
    pub fn arrow(param: Type, ret: Type) -> Type {
        Type::Function(FunctionType::new(vec![param], ret))
    }

    /// Fold parameters right-to-left into nested single-parameter arrows.
    /// No parameters yields `Unit -> ret`.
    pub fn curried(params: impl IntoIterator<Item = Type>, ret: Type) -> Type {
        let params: Vec<Type> = params.into_iter().collect();
        if params.is_empty() {
            return Type::arrow(Type::Unit, ret);
        }
        params
            .into_iter()
            .rev()
            .fold(ret, |acc, param| Type::arrow(param, acc))
    }

    pub fn record(fields: Vec<(Label, Type)>) -> Type {
        Type::Record(RowType::closed(fields))
    }

    pub fn open_record(fields: Vec<(Label, Type)>, rest: RowVarId) -> Type {
        Type::Record(RowType::open(fields, rest))
    }

    pub fn con(name: impl Into<String>, args: Vec<Type>) -> Type {
        Type::Con {
            name: name.into(),
            args,
        }
    }

    pub fn as_var(&self) -> Option<TypeVarId> {
        match self {
            Type::Var(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Type::Var(_))
    }

    /// `Int`, `Float`, `Char` and `String` have unbounded value sets.
    pub fn is_infinite_primitive(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Char | Type::String)
    }

    /// Union members, or the type itself for a non-union.
    pub fn alternatives(&self) -> &[Type] {
        match self {
            Type::Union(members) => members,
            other => std::slice::from_ref(other),
        }
    }

    /// Intersection members, or the type itself for a non-intersection.
    pub fn conjuncts(&self) -> &[Type] {
        match self {
            Type::Intersection(members) => members,
            other => std::slice::from_ref(other),
        }
    }

    /// Whether any type or row variable remains free.
    pub fn has_free_vars(&self) -> bool {
        !free_type_vars(self).is_empty() || !free_row_vars(self).is_empty()
    }

    /// Unfold one level of a recursive type: `rec t. B` becomes `B[t := rec t. B]`.
    pub fn unfold(&self) -> Option<Type> {
        match self {
            Type::Recursive { var, body } => {
                let mut mapping = BTreeMap::new();
                mapping.insert(*var, self.clone());
                Some(replace_vars(body, &mapping, &BTreeMap::new()))
            }
            _ => None,
        }
    }
}

fn flatten_members(
    members: impl IntoIterator<Item = Type>,
    split: impl Fn(Type) -> Result<Vec<Type>, Type> + Copy,
) -> Vec<Type> {
    let mut out: Vec<Type> = Vec::new();
    let mut stack: Vec<Type> = members.into_iter().collect();
    stack.reverse();
    while let Some(ty) = stack.pop() {
        match split(ty) {
            Ok(inner) => stack.extend(inner.into_iter().rev()),
            Err(single) => {
                if !out.contains(&single) {
                    out.push(single);
                }
            }
        }
    }
    out
}

fn same_members(left: &[Type], right: &[Type]) -> bool {
    left.len() == right.len()
        && left.iter().all(|ty| right.contains(ty))
        && right.iter().all(|ty| left.contains(ty))
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Int, Type::Int)
            | (Type::Float, Type::Float)
            | (Type::Bool, Type::Bool)
            | (Type::Char, Type::Char)
            | (Type::String, Type::String)
            | (Type::Unit, Type::Unit)
            | (Type::Error, Type::Error) => true,
            (Type::Var(a), Type::Var(b)) => a == b,
            (Type::Function(a), Type::Function(b)) => a == b,
            (Type::Tuple(a), Type::Tuple(b)) => a == b,
            (Type::Record(a), Type::Record(b)) => a == b,
            (Type::Union(a), Type::Union(b)) | (Type::Intersection(a), Type::Intersection(b)) => {
                same_members(a, b)
            }
            (Type::LiteralString(a), Type::LiteralString(b)) => a == b,
            (
                Type::Con {
                    name: n1,
                    args: a1,
                },
                Type::Con {
                    name: n2,
                    args: a2,
                },
            )
            | (
                Type::Alias {
                    name: n1,
                    args: a1,
                },
                Type::Alias {
                    name: n2,
                    args: a2,
                },
            ) => n1 == n2 && a1 == a2,
            (
                Type::Recursive { var: v1, body: b1 },
                Type::Recursive { var: v2, body: b2 },
            ) => v1 == v2 && b1 == b2,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Type::Var(v) => v.hash(state),
            Type::Function(ft) => ft.hash(state),
            Type::Tuple(elems) => elems.hash(state),
            Type::Record(row) => row.hash(state),
            Type::Union(members) | Type::Intersection(members) => {
                let mut hashes: Vec<u64> = members.iter().map(hash_one).collect();
                hashes.sort_unstable();
                hashes.hash(state);
            }
            Type::LiteralString(s) => s.hash(state),
            Type::Con { name, args } | Type::Alias { name, args } => {
                name.hash(state);
                args.hash(state);
            }
            Type::Recursive { var, body } => {
                var.hash(state);
                body.hash(state);
            }
            Type::Int
            | Type::Float
            | Type::Bool
            | Type::Char
            | Type::String
            | Type::Unit
            | Type::Error => {}
        }
    }
}

fn hash_one(ty: &Type) -> u64 {
    let mut hasher = DefaultHasher::new();
    ty.hash(&mut hasher);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Names used when rendering variables. Raw rendering uses `t{n}` / `r{n}`.
#[derive(Debug, Default)]
struct VarNames {
    types: BTreeMap<TypeVarId, String>,
    rows: BTreeMap<RowVarId, String>,
}

impl VarNames {
    fn type_var(&self, var: TypeVarId) -> String {
        self.types
            .get(&var)
            .cloned()
            .unwrap_or_else(|| format!("t{}", var.0))
    }

    fn row_var(&self, var: RowVarId) -> String {
        self.rows
            .get(&var)
            .cloned()
            .unwrap_or_else(|| format!("r{}", var.0))
    }
}

struct Render<'a> {
    ty: &'a Type,
    names: &'a VarNames,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = VarNames::default();
        write_type(f, self, &names)
    }
}

impl fmt::Display for Render<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type(f, self.ty, self.names)
    }
}

fn needs_parens_in_arrow(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Function(_) | Type::Union(_) | Type::Intersection(_) | Type::Recursive { .. }
    )
}

fn write_type(f: &mut fmt::Formatter<'_>, ty: &Type, names: &VarNames) -> fmt::Result {
    match ty {
        Type::Int => write!(f, "Int"),
        Type::Float => write!(f, "Float"),
        Type::Bool => write!(f, "Bool"),
        Type::Char => write!(f, "Char"),
        Type::String => write!(f, "String"),
        Type::Unit => write!(f, "Unit"),
        Type::Error => write!(f, "<error>"),
        Type::Var(v) => write!(f, "{}", names.type_var(*v)),
        Type::Function(ft) => {
            match ft.params.as_slice() {
                [single] if !needs_parens_in_arrow(single) && !matches!(single, Type::Tuple(_)) => {
                    write_type(f, single, names)?
                }
                params => {
                    write!(f, "(")?;
                    for (i, param) in params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write_type(f, param, names)?;
                    }
                    write!(f, ")")?;
                }
            }
            write!(f, " -> ")?;
            if matches!(*ft.ret, Type::Union(_) | Type::Intersection(_)) {
                write!(f, "(")?;
                write_type(f, &ft.ret, names)?;
                write!(f, ")")
            } else {
                write_type(f, &ft.ret, names)
            }
        }
        Type::Tuple(elems) => {
            write!(f, "(")?;
            for (i, elem) in elems.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_type(f, elem, names)?;
            }
            if elems.len() == 1 {
                write!(f, ",")?;
            }
            write!(f, ")")
        }
        Type::Record(row) => {
            write!(f, "{{")?;
            write_row_fields(f, row, names)?;
            write!(f, "}}")
        }
        Type::Union(members) if members.is_empty() => write!(f, "Never"),
        Type::Union(members) => write_members(f, members, " | ", names),
        Type::Intersection(members) => write_members(f, members, " & ", names),
        Type::LiteralString(s) => write!(f, "{s:?}"),
        Type::Con { name, args } | Type::Alias { name, args } => {
            write!(f, "{name}")?;
            if !args.is_empty() {
                write!(f, "(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_type(f, arg, names)?;
                }
                write!(f, ")")?;
            }
            Ok(())
        }
        Type::Recursive { var, body } => {
            write!(f, "rec {}. ", names.type_var(*var))?;
            write_type(f, body, names)
        }
    }
}

fn write_members(
    f: &mut fmt::Formatter<'_>,
    members: &[Type],
    sep: &str,
    names: &VarNames,
) -> fmt::Result {
    for (i, member) in members.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        if needs_parens_in_arrow(member) {
            write!(f, "(")?;
            write_type(f, member, names)?;
            write!(f, ")")?;
        } else {
            write_type(f, member, names)?;
        }
    }
    Ok(())
}

fn write_row_fields(f: &mut fmt::Formatter<'_>, row: &RowType, names: &VarNames) -> fmt::Result {
    for (i, (label, ty)) in row.fields.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{label}: ")?;
        write_type(f, ty, names)?;
    }
    if let Some(rest) = row.rest {
        if !row.fields.is_empty() {
            write!(f, " ")?;
        }
        write!(f, "| {}", names.row_var(rest))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Type schemes (forall-quantified types)
// ---------------------------------------------------------------------------

/// A type scheme: `forall a b r. T`.
///
/// Schemes arise from let-generalization. `let id(x) = x` gets
/// `forall a. a -> a`; each use instantiates it with fresh variables.
///
/// Class bounds on quantified variables (for example `a: Addable`) transfer
/// to the fresh variables during instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeScheme {
    pub type_vars: Vec<TypeVarId>,
    pub row_vars: Vec<RowVarId>,
    pub bounds: BTreeMap<TypeVarId, BTreeSet<String>>,
    pub ty: Type,
}

impl TypeScheme {
    /// Create a monomorphic scheme (no quantified variables).
    pub fn mono(ty: Type) -> Self {
        Self {
            type_vars: Vec::new(),
            row_vars: Vec::new(),
            bounds: BTreeMap::new(),
            ty,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.type_vars.is_empty() && self.row_vars.is_empty()
    }
}

impl fmt::Display for TypeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&sanitize_type_display(&self.ty))?;
        let names = display_names(&[&self.ty]);
        let bounds: Vec<String> = self
            .bounds
            .iter()
            .flat_map(|(var, classes)| {
                let name = names.type_var(*var);
                classes.iter().map(move |class| format!("{name}: {class}"))
            })
            .collect();
        if !bounds.is_empty() {
            write!(f, " where {}", bounds.join(", "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Free variable computation
// ---------------------------------------------------------------------------

/// Collect all free type variables in a type.
pub fn free_type_vars(ty: &Type) -> BTreeSet<TypeVarId> {
    let mut vars = BTreeSet::new();
    let mut rows = BTreeSet::new();
    collect_free_vars(ty, &mut vars, &mut rows, &mut Vec::new());
    vars
}

/// Collect all free row variables in a type.
pub fn free_row_vars(ty: &Type) -> BTreeSet<RowVarId> {
    let mut vars = BTreeSet::new();
    let mut rows = BTreeSet::new();
    collect_free_vars(ty, &mut vars, &mut rows, &mut Vec::new());
    rows
}

fn collect_free_vars(
    ty: &Type,
    vars: &mut BTreeSet<TypeVarId>,
    rows: &mut BTreeSet<RowVarId>,
    bound: &mut Vec<TypeVarId>,
) {
    match ty {
        Type::Var(v) => {
            if !bound.contains(v) {
                vars.insert(*v);
            }
        }
        Type::Function(ft) => {
            for param in &ft.params {
                collect_free_vars(param, vars, rows, bound);
            }
            collect_free_vars(&ft.ret, vars, rows, bound);
        }
        Type::Tuple(elems)
        | Type::Union(elems)
        | Type::Intersection(elems)
        | Type::Con { args: elems, .. }
        | Type::Alias { args: elems, .. } => {
            for elem in elems {
                collect_free_vars(elem, vars, rows, bound);
            }
        }
        Type::Record(row) => {
            for (_, field) in &row.fields {
                collect_free_vars(field, vars, rows, bound);
            }
            if let Some(rest) = row.rest {
                rows.insert(rest);
            }
        }
        Type::Recursive { var, body } => {
            bound.push(*var);
            collect_free_vars(body, vars, rows, bound);
            bound.pop();
        }
        Type::Int
        | Type::Float
        | Type::Bool
        | Type::Char
        | Type::String
        | Type::Unit
        | Type::Error
        | Type::LiteralString(_) => {}
    }
}

/// Replace variables by the given mapping without re-visiting replacements.
///
/// Used for instantiation, alias expansion and recursive unfolding. A
/// `Recursive` binder shadows its own variable.
pub fn replace_vars(
    ty: &Type,
    types: &BTreeMap<TypeVarId, Type>,
    rows: &BTreeMap<RowVarId, RowVarId>,
) -> Type {
    match ty {
        Type::Var(v) => types.get(v).cloned().unwrap_or_else(|| ty.clone()),
        Type::Function(ft) => Type::Function(FunctionType::new(
            ft.params
                .iter()
                .map(|p| replace_vars(p, types, rows))
                .collect(),
            replace_vars(&ft.ret, types, rows),
        )),
        Type::Tuple(elems) => {
            Type::Tuple(elems.iter().map(|e| replace_vars(e, types, rows)).collect())
        }
        Type::Record(row) => Type::Record(RowType {
            fields: row
                .fields
                .iter()
                .map(|(l, t)| (l.clone(), replace_vars(t, types, rows)))
                .collect(),
            rest: row.rest.map(|r| rows.get(&r).copied().unwrap_or(r)),
        }),
        Type::Union(members) => {
            Type::union(members.iter().map(|m| replace_vars(m, types, rows)))
        }
        Type::Intersection(members) => {
            Type::intersection(members.iter().map(|m| replace_vars(m, types, rows)))
        }
        Type::Con { name, args } => Type::Con {
            name: name.clone(),
            args: args.iter().map(|a| replace_vars(a, types, rows)).collect(),
        },
        Type::Alias { name, args } => Type::Alias {
            name: name.clone(),
            args: args.iter().map(|a| replace_vars(a, types, rows)).collect(),
        },
        Type::Recursive { var, body } => {
            if types.contains_key(var) {
                let mut shadowed = types.clone();
                shadowed.remove(var);
                Type::Recursive {
                    var: *var,
                    body: Box::new(replace_vars(body, &shadowed, rows)),
                }
            } else {
                Type::Recursive {
                    var: *var,
                    body: Box::new(replace_vars(body, types, rows)),
                }
            }
        }
        Type::Int
        | Type::Float
        | Type::Bool
        | Type::Char
        | Type::String
        | Type::Unit
        | Type::Error
        | Type::LiteralString(_) => ty.clone(),
    }
}

// ---------------------------------------------------------------------------
// Sanitized display
// ---------------------------------------------------------------------------

/// Display a type with alphabetic names for type variables instead of `t0`, `t1`.
///
/// Used for every user-facing type string so that inference numbering never
/// leaks into diagnostics.
pub fn sanitize_type_display(ty: &Type) -> String {
    let names = display_names(&[ty]);
    Render { ty, names: &names }.to_string()
}

/// Display two types with one shared variable namespace.
///
/// The same source variable gets the same sanitized name on both sides of a
/// mismatch message.
pub fn sanitize_type_pair_display(left: &Type, right: &Type) -> (String, String) {
    let names = display_names(&[left, right]);
    (
        Render { ty: left, names: &names }.to_string(),
        Render { ty: right, names: &names }.to_string(),
    )
}

/// Assign `a`, `b`, ... to type variables and `ra`, `rb`, ... to row variables
/// in order of first appearance.
fn display_names(types: &[&Type]) -> VarNames {
    let mut type_order = Vec::new();
    let mut row_order = Vec::new();
    for ty in types {
        collect_vars_in_order(ty, &mut type_order, &mut row_order);
    }
    VarNames {
        types: type_order
            .into_iter()
            .enumerate()
            .map(|(i, var)| (var, alphabetic_var_name(i)))
            .collect(),
        rows: row_order
            .into_iter()
            .enumerate()
            .map(|(i, var)| (var, format!("r{}", alphabetic_var_name(i))))
            .collect(),
    }
}

fn collect_vars_in_order(ty: &Type, types: &mut Vec<TypeVarId>, rows: &mut Vec<RowVarId>) {
    match ty {
        Type::Var(v) => {
            if !types.contains(v) {
                types.push(*v);
            }
        }
        Type::Function(ft) => {
            for param in &ft.params {
                collect_vars_in_order(param, types, rows);
            }
            collect_vars_in_order(&ft.ret, types, rows);
        }
        Type::Tuple(elems)
        | Type::Union(elems)
        | Type::Intersection(elems)
        | Type::Con { args: elems, .. }
        | Type::Alias { args: elems, .. } => {
            for elem in elems {
                collect_vars_in_order(elem, types, rows);
            }
        }
        Type::Record(row) => {
            for (_, field) in &row.fields {
                collect_vars_in_order(field, types, rows);
            }
            if let Some(rest) = row.rest
                && !rows.contains(&rest)
            {
                rows.push(rest);
            }
        }
        Type::Recursive { var, body } => {
            if !types.contains(var) {
                types.push(*var);
            }
            collect_vars_in_order(body, types, rows);
        }
        _ => {}
    }
}

/// Generate alphabetic variable names: a, b, c, ..., z, a1, b1, ...
fn alphabetic_var_name(index: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    let suffix = index / 26;
    if suffix == 0 {
        letter.to_string()
    } else {
        format!("{letter}{suffix}")
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Maps type variables and row variables to their resolved types/rows.
///
/// Never mutated in place by unification rollbacks: the unifier snapshots and
/// restores whole substitutions when probing union alternatives.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    type_map: BTreeMap<TypeVarId, Type>,
    row_map: BTreeMap<RowVarId, RowType>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_type(&mut self, var: TypeVarId, ty: Type) {
        self.type_map.insert(var, ty);
    }

    pub fn bind_row(&mut self, var: RowVarId, row: RowType) {
        self.row_map.insert(var, row);
    }

    pub fn lookup_type(&self, var: TypeVarId) -> Option<&Type> {
        self.type_map.get(&var)
    }

    pub fn lookup_row(&self, var: RowVarId) -> Option<&RowType> {
        self.row_map.get(&var)
    }

    pub fn type_bindings(&self) -> &BTreeMap<TypeVarId, Type> {
        &self.type_map
    }

    pub fn row_bindings(&self) -> &BTreeMap<RowVarId, RowType> {
        &self.row_map
    }

    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty() && self.row_map.is_empty()
    }

    /// Apply this substitution to a type, replacing all bound variables.
    ///
    /// Unions and intersections are re-normalized, so `t1 | t2` with both
    /// bound to `Int` becomes `Int`.
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.lookup_type(*v) {
                Some(resolved) => self.apply(resolved),
                None => ty.clone(),
            },
            Type::Function(ft) => Type::Function(FunctionType::new(
                ft.params.iter().map(|p| self.apply(p)).collect(),
                self.apply(&ft.ret),
            )),
            Type::Tuple(elems) => Type::Tuple(elems.iter().map(|e| self.apply(e)).collect()),
            Type::Record(row) => Type::Record(self.apply_row(row)),
            Type::Union(members) => Type::union(members.iter().map(|m| self.apply(m))),
            Type::Intersection(members) => {
                Type::intersection(members.iter().map(|m| self.apply(m)))
            }
            Type::Con { name, args } => Type::Con {
                name: name.clone(),
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            Type::Alias { name, args } => Type::Alias {
                name: name.clone(),
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            // Recursive binders come fresh from the supply and are never bound.
            Type::Recursive { var, body } => Type::Recursive {
                var: *var,
                body: Box::new(self.apply(body)),
            },
            Type::Int
            | Type::Float
            | Type::Bool
            | Type::Char
            | Type::String
            | Type::Unit
            | Type::Error
            | Type::LiteralString(_) => ty.clone(),
        }
    }

    /// Apply this substitution to a row type, splicing in bound tails.
    pub fn apply_row(&self, row: &RowType) -> RowType {
        let mut fields: Vec<(Label, Type)> = row
            .fields
            .iter()
            .map(|(l, t)| (l.clone(), self.apply(t)))
            .collect();

        match row.rest {
            None => RowType { fields, rest: None },
            Some(var) => match self.lookup_row(var) {
                Some(resolved) => {
                    let resolved = self.apply_row(resolved);
                    for (label, ty) in resolved.fields {
                        if !fields.iter().any(|(l, _)| *l == label) {
                            fields.push((label, ty));
                        }
                    }
                    RowType {
                        fields,
                        rest: resolved.rest,
                    }
                }
                None => RowType {
                    fields,
                    rest: Some(var),
                },
            },
        }
    }
}
