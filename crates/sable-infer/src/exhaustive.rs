//! Exhaustiveness and reachability checking for match expressions.
//!
//! After the solver resolves the scrutinee type, this module runs a
//! usefulness analysis over the lowered case patterns. Each column of the
//! pattern matrix carries a type that decides its constructor signature:
//! Bool has `true`/`false`, an ADT has its variants, a union has one
//! constructor per alternative, tuples and records have exactly one. Int,
//! Float, Char and String are never covered without a catch-all.

use sable_ast::Span;
use sable_types::{Label, RowType, Type};

use crate::registry::TypeRegistry;

/// Witnesses reported for one non-exhaustive match.
const MAX_WITNESSES: usize = 8;

/// A case pattern reduced to what matters for coverage.
#[derive(Debug, Clone, PartialEq)]
pub enum Pat {
    /// Wildcard or variable.
    Wild,
    Bool(bool),
    Unit,
    Int(i64),
    /// Bit pattern of a float literal.
    Float(u64),
    Char(char),
    Str(String),
    Tuple(Vec<Pat>),
    /// Record pattern; unlisted fields are unconstrained.
    Record(Vec<(String, Pat)>),
    Ctor { name: String, args: Vec<Pat> },
}

/// One match case as seen by the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub pat: Pat,
    pub span: Span,
}

/// Result of analyzing one match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchAnalysis {
    pub exhaustive: bool,
    /// Rendered values no case matches, such as `Cons(_, _)` or `false`.
    pub missing: Vec<String>,
    /// Indices of cases no value can reach.
    pub unreachable: Vec<usize>,
    /// `(i, j)`: case `i` alone already matches everything case `j` does.
    pub contradictory: Vec<(usize, usize)>,
}

/// Analyze the cases of a match against a resolved scrutinee type.
pub fn analyze(scrutinee: &Type, cases: &[Case], registry: &TypeRegistry) -> MatchAnalysis {
    let matcher = Matcher { registry };
    let tys = [scrutinee.clone()];
    let mut rows: Vec<Vec<Pat>> = Vec::with_capacity(cases.len());
    let mut analysis = MatchAnalysis::default();

    for (index, case) in cases.iter().enumerate() {
        let query = vec![case.pat.clone()];
        if !matcher.useful(&rows, &query, &tys) {
            analysis.unreachable.push(index);
            if let Some(earlier) = rows
                .iter()
                .position(|row| !matcher.useful(std::slice::from_ref(row), &query, &tys))
            {
                analysis.contradictory.push((earlier, index));
            }
        }
        rows.push(query);
    }

    analysis.missing = matcher
        .witnesses(&rows, &tys, MAX_WITNESSES)
        .into_iter()
        .filter_map(|mut witness| witness.pop())
        .collect();
    analysis.exhaustive = analysis.missing.is_empty();
    analysis
}

// ---------------------------------------------------------------------------
// Usefulness
// ---------------------------------------------------------------------------

/// Head constructor of a column value.
#[derive(Debug, Clone, PartialEq)]
enum Ctor {
    Bool(bool),
    Unit,
    Int(i64),
    Float(u64),
    Char(char),
    Str(String),
    Tuple,
    Record,
    Variant(String),
    /// Alternative `k` of a union column.
    Alt(usize),
}

type Row = Vec<Pat>;

struct Matcher<'a> {
    registry: &'a TypeRegistry,
}

impl Matcher<'_> {
    /// Is there a value matched by `query` and by none of `rows`?
    fn useful(&self, rows: &[Row], query: &Row, tys: &[Type]) -> bool {
        let Some((first, rest)) = query.split_first() else {
            return rows.is_empty();
        };
        let Some(first_ty) = tys.first() else {
            return rows.is_empty();
        };
        let column: Vec<&Pat> = rows
            .iter()
            .filter_map(|row| row.first())
            .chain(std::iter::once(first))
            .collect();
        let ty = self.column_type(first_ty, &column);

        let heads = self.heads(&ty, first);
        if !heads.is_empty() {
            return heads
                .iter()
                .any(|ctor| self.useful_specialized(rows, query, &ty, ctor, tys));
        }

        match self.complete_signature(&ty, rows) {
            Some(signature) => signature
                .iter()
                .any(|ctor| self.useful_specialized(rows, query, &ty, ctor, tys)),
            None => self.useful(&default_matrix(rows), &rest.to_vec(), &tys[1..]),
        }
    }

    fn useful_specialized(
        &self,
        rows: &[Row],
        query: &Row,
        ty: &Type,
        ctor: &Ctor,
        tys: &[Type],
    ) -> bool {
        let Some(query) = self.specialize(ty, ctor, query) else {
            return false;
        };
        let rows: Vec<Row> = rows
            .iter()
            .filter_map(|row| self.specialize(ty, ctor, row))
            .collect();
        let mut sub_tys = self.fields(ty, ctor);
        sub_tys.extend(tys[1..].iter().cloned());
        self.useful(&rows, &query, &sub_tys)
    }

    /// Rendered rows of values matched by none of `rows`, at most `limit`.
    fn witnesses(&self, rows: &[Row], tys: &[Type], limit: usize) -> Vec<Vec<String>> {
        if limit == 0 {
            return Vec::new();
        }
        let Some((first_ty, rest_tys)) = tys.split_first() else {
            return if rows.is_empty() { vec![Vec::new()] } else { Vec::new() };
        };
        let column: Vec<&Pat> = rows.iter().filter_map(|row| row.first()).collect();
        let ty = self.column_type(first_ty, &column);

        if let Some(signature) = self.complete_signature(&ty, rows) {
            let mut out = Vec::new();
            for ctor in &signature {
                let fields = self.fields(&ty, ctor);
                let arity = fields.len();
                let specialized: Vec<Row> = rows
                    .iter()
                    .filter_map(|row| self.specialize(&ty, ctor, row))
                    .collect();
                let mut sub_tys = fields;
                sub_tys.extend(rest_tys.iter().cloned());
                for witness in self.witnesses(&specialized, &sub_tys, limit - out.len()) {
                    let (args, rest) = witness.split_at(arity.min(witness.len()));
                    let mut row = vec![self.render(&ty, ctor, args)];
                    row.extend(rest.iter().cloned());
                    out.push(row);
                    if out.len() >= limit {
                        return out;
                    }
                }
            }
            return out;
        }

        let tails = self.witnesses(&default_matrix(rows), rest_tys, limit);
        if tails.is_empty() {
            return tails;
        }
        let present = self.present_heads(&ty, rows);
        let missing_heads: Vec<String> = match self.signature(&ty) {
            Some(signature) if !present.is_empty() => signature
                .iter()
                .filter(|ctor| !present.contains(ctor))
                .map(|ctor| {
                    let wild = vec!["_".to_string(); self.fields(&ty, ctor).len()];
                    self.render(&ty, ctor, &wild)
                })
                .collect(),
            _ => vec!["_".to_string()],
        };

        let mut out = Vec::new();
        for head in &missing_heads {
            for tail in &tails {
                let mut row = vec![head.clone()];
                row.extend(tail.iter().cloned());
                out.push(row);
                if out.len() >= limit {
                    return out;
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Column types and signatures
    // -----------------------------------------------------------------------

    /// Expand aliases and unfold recursive types at the top level.
    fn resolve(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        for _ in 0..32 {
            current = match &current {
                Type::Alias { name, args } => match self.registry.expand_alias(name, args) {
                    Ok(expanded) => expanded,
                    Err(_) => return Type::Error,
                },
                Type::Recursive { .. } => match current.unfold() {
                    Some(unfolded) => unfolded,
                    None => return current,
                },
                _ => return current,
            };
        }
        current
    }

    /// The type of a column, completed from its patterns where the type
    /// itself is unknown or a record missing some matched labels.
    fn column_type(&self, ty: &Type, column: &[&Pat]) -> Type {
        let ty = self.resolve(ty);
        match ty {
            Type::Var(_) | Type::Error => column
                .iter()
                .find_map(|pat| self.shape_of(pat))
                .map(|shape| self.column_type(&shape, column))
                .unwrap_or(ty),
            Type::Record(mut row) => {
                for pat in column {
                    if let Pat::Record(fields) = pat {
                        for (name, _) in fields {
                            let label = Label::new(name.clone());
                            if !row.has(&label) {
                                row.fields.push((label, Type::Error));
                            }
                        }
                    }
                }
                Type::Record(row)
            }
            other => other,
        }
    }

    /// A type describing the values a pattern can match, with unknown parts
    /// left as `Error`.
    fn shape_of(&self, pat: &Pat) -> Option<Type> {
        Some(match pat {
            Pat::Wild => return None,
            Pat::Bool(_) => Type::Bool,
            Pat::Unit => Type::Unit,
            Pat::Int(_) => Type::Int,
            Pat::Float(_) => Type::Float,
            Pat::Char(_) => Type::Char,
            Pat::Str(_) => Type::String,
            Pat::Tuple(elems) => Type::Tuple(vec![Type::Error; elems.len()]),
            Pat::Record(_) => Type::Record(RowType::empty_closed()),
            Pat::Ctor { name, .. } => {
                let (adt, _) = self.registry.constructor(name)?;
                Type::con(adt.name.clone(), vec![Type::Error; adt.params.len()])
            }
        })
    }

    /// Every constructor of a type, or `None` when its values are unbounded.
    fn signature(&self, ty: &Type) -> Option<Vec<Ctor>> {
        match ty {
            Type::Bool => Some(vec![Ctor::Bool(true), Ctor::Bool(false)]),
            Type::Unit => Some(vec![Ctor::Unit]),
            Type::LiteralString(value) => Some(vec![Ctor::Str(value.clone())]),
            Type::Tuple(_) => Some(vec![Ctor::Tuple]),
            Type::Record(_) => Some(vec![Ctor::Record]),
            Type::Con { name, args } => self
                .registry
                .variants_of(name, args)
                .map(|variants| variants.into_iter().map(|(v, _)| Ctor::Variant(v)).collect()),
            Type::Union(alts) => Some((0..alts.len()).map(Ctor::Alt).collect()),
            _ => None,
        }
    }

    /// The signature, when the first column of `rows` mentions all of it.
    fn complete_signature(&self, ty: &Type, rows: &[Row]) -> Option<Vec<Ctor>> {
        let signature = self.signature(ty)?;
        let present = self.present_heads(ty, rows);
        signature
            .iter()
            .all(|ctor| present.contains(ctor))
            .then_some(signature)
    }

    fn present_heads(&self, ty: &Type, rows: &[Row]) -> Vec<Ctor> {
        let mut present = Vec::new();
        for row in rows {
            if let Some(pat) = row.first() {
                for head in self.heads(ty, pat) {
                    if !present.contains(&head) {
                        present.push(head);
                    }
                }
            }
        }
        present
    }

    /// Constructors a pattern's head covers; empty for a catch-all.
    fn heads(&self, ty: &Type, pat: &Pat) -> Vec<Ctor> {
        if matches!(pat, Pat::Wild) {
            return Vec::new();
        }
        if let Type::Union(alts) = ty {
            return alts
                .iter()
                .enumerate()
                .filter(|(_, alt)| self.compatible(pat, alt))
                .map(|(k, _)| Ctor::Alt(k))
                .collect();
        }
        vec![match pat {
            Pat::Wild => return Vec::new(),
            Pat::Bool(b) => Ctor::Bool(*b),
            Pat::Unit => Ctor::Unit,
            Pat::Int(n) => Ctor::Int(*n),
            Pat::Float(bits) => Ctor::Float(*bits),
            Pat::Char(c) => Ctor::Char(*c),
            Pat::Str(s) => Ctor::Str(s.clone()),
            Pat::Tuple(_) => Ctor::Tuple,
            Pat::Record(_) => Ctor::Record,
            Pat::Ctor { name, .. } => Ctor::Variant(name.clone()),
        }]
    }

    /// Sub-column types produced by a constructor.
    fn fields(&self, ty: &Type, ctor: &Ctor) -> Vec<Type> {
        match (ty, ctor) {
            (Type::Tuple(elems), Ctor::Tuple) => elems.clone(),
            (Type::Record(row), Ctor::Record) => row.fields.iter().map(|(_, t)| t.clone()).collect(),
            (Type::Con { name, args }, Ctor::Variant(variant)) => self
                .registry
                .variants_of(name, args)
                .and_then(|variants| variants.into_iter().find(|(v, _)| v == variant))
                .map(|(_, fields)| fields)
                .unwrap_or_default(),
            (Type::Union(alts), Ctor::Alt(k)) => alts.get(*k).cloned().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Specialize a row by a constructor, or drop it when its head differs.
    fn specialize(&self, ty: &Type, ctor: &Ctor, row: &Row) -> Option<Row> {
        let (first, rest) = row.split_first()?;
        let arity = self.fields(ty, ctor).len();
        let mut out = match (first, ctor) {
            (Pat::Wild, _) => vec![Pat::Wild; arity],
            (pat, Ctor::Alt(k)) => {
                let Type::Union(alts) = ty else {
                    return None;
                };
                if !self.compatible(pat, alts.get(*k)?) {
                    return None;
                }
                vec![pat.clone()]
            }
            (Pat::Bool(a), Ctor::Bool(b)) if a == b => Vec::new(),
            (Pat::Unit, Ctor::Unit) => Vec::new(),
            (Pat::Int(a), Ctor::Int(b)) if a == b => Vec::new(),
            (Pat::Float(a), Ctor::Float(b)) if a == b => Vec::new(),
            (Pat::Char(a), Ctor::Char(b)) if a == b => Vec::new(),
            (Pat::Str(a), Ctor::Str(b)) if a == b => Vec::new(),
            (Pat::Tuple(elems), Ctor::Tuple) if elems.len() == arity => elems.clone(),
            (Pat::Record(fields), Ctor::Record) => {
                let Type::Record(row) = ty else {
                    return None;
                };
                row.fields
                    .iter()
                    .map(|(label, _)| {
                        fields
                            .iter()
                            .find(|(name, _)| name == label.as_str())
                            .map(|(_, pat)| pat.clone())
                            .unwrap_or(Pat::Wild)
                    })
                    .collect()
            }
            (Pat::Ctor { name, args }, Ctor::Variant(variant)) if name == variant => {
                let mut args = args.clone();
                args.resize(arity, Pat::Wild);
                args
            }
            _ => return None,
        };
        out.extend(rest.iter().cloned());
        Some(out)
    }

    /// Can `pat` match some value of `ty`? Unknown types accept anything.
    fn compatible(&self, pat: &Pat, ty: &Type) -> bool {
        let ty = self.resolve(ty);
        match (pat, &ty) {
            (Pat::Wild, _) | (_, Type::Var(_) | Type::Error) => true,
            (_, Type::Union(alts)) => alts.iter().any(|alt| self.compatible(pat, alt)),
            (Pat::Bool(_), Type::Bool)
            | (Pat::Unit, Type::Unit)
            | (Pat::Int(_), Type::Int)
            | (Pat::Float(_), Type::Float)
            | (Pat::Char(_), Type::Char)
            | (Pat::Str(_), Type::String) => true,
            (Pat::Str(a), Type::LiteralString(b)) => a == b,
            (Pat::Tuple(elems), Type::Tuple(tys)) => {
                elems.len() == tys.len()
                    && elems.iter().zip(tys).all(|(p, t)| self.compatible(p, t))
            }
            (Pat::Record(fields), Type::Record(row)) => fields.iter().all(|(name, p)| {
                match row.get(&Label::new(name.clone())) {
                    Some(field_ty) => self.compatible(p, field_ty),
                    None => row.is_open(),
                }
            }),
            (Pat::Ctor { name, .. }, Type::Con { name: owner, .. }) => self
                .registry
                .constructor(name)
                .is_some_and(|(adt, _)| adt.name == *owner),
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Witness rendering
    // -----------------------------------------------------------------------

    fn render(&self, ty: &Type, ctor: &Ctor, args: &[String]) -> String {
        match ctor {
            Ctor::Bool(b) => b.to_string(),
            Ctor::Unit => "()".to_string(),
            Ctor::Int(n) => n.to_string(),
            Ctor::Float(bits) => f64::from_bits(*bits).to_string(),
            Ctor::Char(c) => format!("{c:?}"),
            Ctor::Str(s) => format!("{s:?}"),
            Ctor::Tuple if args.len() == 1 => format!("({},)", args[0]),
            Ctor::Tuple => format!("({})", args.join(", ")),
            Ctor::Record => {
                let Type::Record(row) = ty else {
                    return "{..}".to_string();
                };
                let shown: Vec<String> = row
                    .fields
                    .iter()
                    .zip(args)
                    .filter(|(_, arg)| arg.as_str() != "_")
                    .map(|((label, _), arg)| format!("{label}: {arg}"))
                    .collect();
                render_record(shown, row.fields.len(), row.is_open())
            }
            Ctor::Variant(name) => format!("{name}({})", args.join(", ")),
            Ctor::Alt(k) => match (args.first(), ty) {
                (Some(arg), _) if arg != "_" => arg.clone(),
                (_, Type::Union(alts)) => alts
                    .get(*k)
                    .map(|alt| self.type_witness(alt))
                    .unwrap_or_else(|| "_".to_string()),
                _ => "_".to_string(),
            },
        }
    }

    /// A witness standing for every value of `ty`, keeping literal tags.
    fn type_witness(&self, ty: &Type) -> String {
        match self.resolve(ty) {
            Type::LiteralString(s) => format!("{s:?}"),
            Type::Unit => "()".to_string(),
            Type::Tuple(elems) if elems.len() == 1 => {
                format!("({},)", self.type_witness(&elems[0]))
            }
            Type::Tuple(elems) => format!(
                "({})",
                elems
                    .iter()
                    .map(|elem| self.type_witness(elem))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Type::Record(row) => {
                let shown: Vec<String> = row
                    .fields
                    .iter()
                    .filter_map(|(label, field)| match self.resolve(field) {
                        Type::LiteralString(s) => Some(format!("{label}: {s:?}")),
                        _ => None,
                    })
                    .collect();
                render_record(shown, row.fields.len(), row.is_open())
            }
            _ => "_".to_string(),
        }
    }
}

fn render_record(shown: Vec<String>, total: usize, open: bool) -> String {
    let elided = shown.len() < total || open;
    match (shown.is_empty(), elided) {
        (true, true) => "{..}".to_string(),
        (true, false) => "{}".to_string(),
        (false, true) => format!("{{{}, ..}}", shown.join(", ")),
        (false, false) => format!("{{{}}}", shown.join(", ")),
    }
}

fn default_matrix(rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .filter(|row| matches!(row.first(), Some(Pat::Wild)))
        .map(|row| row[1..].to_vec())
        .collect()
}
