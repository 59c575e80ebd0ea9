//! Declared types: algebraic data types and aliases.
//!
//! The registry also converts syntactic type expressions into semantic
//! [`Type`]s, since that conversion needs to know which names are declared.

use std::collections::BTreeMap;

use sable_ast::{AliasDecl, TypeDecl, TypeExpr};
use sable_diag::{Category, Diagnostic};
use sable_types::{
    FunctionType, Label, RowType, RowVarId, Type, TypeScheme, TypeVarId, replace_vars,
};

use crate::{VarSupply, span_to_location};

/// One constructor of an ADT. Field types mention the ADT's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    pub name: String,
    pub fields: Vec<Type>,
}

/// A declared algebraic data type.
#[derive(Debug, Clone, PartialEq)]
pub struct AdtInfo {
    pub name: String,
    pub params: Vec<TypeVarId>,
    pub variants: Vec<VariantInfo>,
}

/// A declared alias. The body mentions `params` and, when the alias refers
/// to itself, is wrapped in `Type::Recursive`.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasInfo {
    pub name: String,
    pub params: Vec<TypeVarId>,
    pub body: Type,
}

/// Name resolution for type variables while converting one statement's
/// type expressions.
#[derive(Debug, Clone, Default)]
pub struct TypeScope {
    types: BTreeMap<String, TypeVarId>,
    rows: BTreeMap<String, RowVarId>,
    /// Unknown lowercase names become fresh variables instead of errors.
    implicit: bool,
    /// Alias currently being declared: name, arity and recursion binder.
    self_alias: Option<(String, usize, TypeVarId)>,
    self_used: bool,
}

impl TypeScope {
    /// Scope for annotations: lowercase names are implicitly quantified.
    pub fn implicit() -> Self {
        Self {
            implicit: true,
            ..Self::default()
        }
    }

    /// Scope for declarations: only the declared parameters are in scope.
    pub fn with_params(params: impl IntoIterator<Item = (String, TypeVarId)>) -> Self {
        Self {
            types: params.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn type_var(&self, name: &str) -> Option<TypeVarId> {
        self.types.get(name).copied()
    }
}

/// ADT and alias declarations for one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    adts: BTreeMap<String, AdtInfo>,
    /// Constructor name to owning ADT name.
    constructors: BTreeMap<String, String>,
    aliases: BTreeMap<String, AliasInfo>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adt(&self, name: &str) -> Option<&AdtInfo> {
        self.adts.get(name)
    }

    pub fn alias(&self, name: &str) -> Option<&AliasInfo> {
        self.aliases.get(name)
    }

    /// Look up a constructor and its owning ADT.
    pub fn constructor(&self, name: &str) -> Option<(&AdtInfo, &VariantInfo)> {
        let owner = self.adts.get(self.constructors.get(name)?)?;
        let variant = owner.variants.iter().find(|v| v.name == name)?;
        Some((owner, variant))
    }

    /// Instantiate a constructor with fresh type arguments.
    ///
    /// Returns the owning type (`List(t3)`) and the field types under the
    /// same instantiation.
    pub fn instantiate_constructor(
        &self,
        name: &str,
        supply: &mut VarSupply,
    ) -> Option<(Type, Vec<Type>)> {
        let (adt, variant) = self.constructor(name)?;
        let args: Vec<Type> = adt.params.iter().map(|_| supply.fresh_type()).collect();
        let mapping: BTreeMap<TypeVarId, Type> =
            adt.params.iter().copied().zip(args.iter().cloned()).collect();
        let fields = variant
            .fields
            .iter()
            .map(|field| replace_vars(field, &mapping, &BTreeMap::new()))
            .collect();
        Some((Type::con(adt.name.clone(), args), fields))
    }

    /// Variants of `name` applied to `args`, with field types instantiated.
    pub fn variants_of(&self, name: &str, args: &[Type]) -> Option<Vec<(String, Vec<Type>)>> {
        let adt = self.adts.get(name)?;
        if adt.params.len() != args.len() {
            return None;
        }
        let mapping: BTreeMap<TypeVarId, Type> =
            adt.params.iter().copied().zip(args.iter().cloned()).collect();
        Some(
            adt.variants
                .iter()
                .map(|variant| {
                    let fields = variant
                        .fields
                        .iter()
                        .map(|field| replace_vars(field, &mapping, &BTreeMap::new()))
                        .collect();
                    (variant.name.clone(), fields)
                })
                .collect(),
        )
    }

    /// Replace an alias reference by its declared body.
    pub fn expand_alias(&self, name: &str, args: &[Type]) -> Result<Type, Diagnostic> {
        let Some(alias) = self.aliases.get(name) else {
            return Err(unknown_type_diag(name));
        };
        if alias.params.len() != args.len() {
            return Err(arity_diag(name, alias.params.len(), args.len()));
        }
        let mapping: BTreeMap<TypeVarId, Type> = alias
            .params
            .iter()
            .copied()
            .zip(args.iter().cloned())
            .collect();
        Ok(replace_vars(&alias.body, &mapping, &BTreeMap::new()))
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    /// Register an ADT and return one constructor scheme per variant.
    ///
    /// `Cons : forall a. a -> List(a) -> List(a)`; nullary constructors take
    /// `Unit` so that `Nil()` is an ordinary call.
    pub fn declare_adt(
        &mut self,
        decl: &TypeDecl,
        supply: &mut VarSupply,
    ) -> Result<Vec<(String, TypeScheme)>, Diagnostic> {
        let name = decl.name.node.clone();
        if self.adts.contains_key(&name) || self.aliases.contains_key(&name) {
            return Err(duplicate_diag("type", &name).at(span_to_location(decl.name.span)));
        }
        for variant in &decl.variants {
            if self.constructors.contains_key(&variant.name.node)
                || decl
                    .variants
                    .iter()
                    .filter(|v| v.name.node == variant.name.node)
                    .count()
                    > 1
            {
                return Err(duplicate_diag("constructor", &variant.name.node)
                    .at(span_to_location(variant.name.span)));
            }
        }

        let params: Vec<TypeVarId> = decl.params.iter().map(|_| supply.fresh_type_var()).collect();

        // Registered before its variants are converted so that fields can
        // refer to the type being declared.
        self.adts.insert(
            name.clone(),
            AdtInfo {
                name: name.clone(),
                params: params.clone(),
                variants: Vec::new(),
            },
        );

        let mut scope = TypeScope::with_params(decl.params.iter().cloned().zip(params.iter().copied()));
        let mut variants = Vec::with_capacity(decl.variants.len());
        for variant in &decl.variants {
            let mut fields = Vec::with_capacity(variant.fields.len());
            for field in &variant.fields {
                match self.convert(&field.node, &mut scope, supply) {
                    Ok(ty) => fields.push(ty),
                    Err(diag) => {
                        self.adts.remove(&name);
                        return Err(diag.at(span_to_location(field.span)));
                    }
                }
            }
            variants.push(VariantInfo {
                name: variant.name.node.clone(),
                fields,
            });
        }

        let result = Type::con(name.clone(), params.iter().copied().map(Type::Var).collect());
        let schemes = variants
            .iter()
            .map(|variant| {
                let ty = Type::curried(variant.fields.iter().cloned(), result.clone());
                let scheme = TypeScheme {
                    type_vars: params.clone(),
                    row_vars: Vec::new(),
                    bounds: BTreeMap::new(),
                    ty,
                };
                (variant.name.clone(), scheme)
            })
            .collect();

        for variant in &variants {
            self.constructors.insert(variant.name.clone(), name.clone());
        }
        if let Some(adt) = self.adts.get_mut(&name) {
            adt.variants = variants;
        }
        Ok(schemes)
    }

    /// Register an alias. A body that mentions the alias itself becomes a
    /// recursive type.
    pub fn declare_alias(&mut self, decl: &AliasDecl, supply: &mut VarSupply) -> Result<(), Diagnostic> {
        let name = decl.name.node.clone();
        if self.adts.contains_key(&name) || self.aliases.contains_key(&name) {
            return Err(duplicate_diag("type", &name).at(span_to_location(decl.name.span)));
        }

        let params: Vec<TypeVarId> = decl.params.iter().map(|_| supply.fresh_type_var()).collect();
        let binder = supply.fresh_type_var();
        let mut scope = TypeScope::with_params(decl.params.iter().cloned().zip(params.iter().copied()));
        scope.self_alias = Some((name.clone(), params.len(), binder));

        let body = self
            .convert(&decl.target.node, &mut scope, supply)
            .map_err(|diag| diag.at(span_to_location(decl.target.span)))?;
        let body = if scope.self_used {
            Type::Recursive {
                var: binder,
                body: Box::new(body),
            }
        } else {
            body
        };

        self.aliases.insert(name.clone(), AliasInfo { name, params, body });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Type expression conversion
    // -----------------------------------------------------------------------

    /// Convert a type expression. Errors carry no location; callers attach
    /// the span of the annotation.
    pub fn convert(
        &self,
        texpr: &TypeExpr,
        scope: &mut TypeScope,
        supply: &mut VarSupply,
    ) -> Result<Type, Diagnostic> {
        match texpr {
            TypeExpr::Named(name) => self.convert_named(name, &[], scope, supply),
            TypeExpr::Applied(name, args) => self.convert_named(name, args, scope, supply),
            TypeExpr::Function(params, ret) => {
                let params = params
                    .iter()
                    .map(|p| self.convert(p, scope, supply))
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = self.convert(ret, scope, supply)?;
                Ok(Type::Function(FunctionType::new(params, ret)))
            }
            TypeExpr::Tuple(elems) => Ok(Type::Tuple(
                elems
                    .iter()
                    .map(|e| self.convert(e, scope, supply))
                    .collect::<Result<_, _>>()?,
            )),
            TypeExpr::Record { fields, rest } => {
                let mut row = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    let label = Label::new(name.clone());
                    if row.iter().any(|(l, _)| *l == label) {
                        return Err(Diagnostic::error(
                            Category::DuplicateField,
                            format!("duplicate field `{name}` in record type"),
                        ));
                    }
                    row.push((label, self.convert(field, scope, supply)?));
                }
                match rest {
                    None => Ok(Type::Record(RowType::closed(row))),
                    Some(rest) => {
                        let var = match scope.rows.get(rest) {
                            Some(var) => *var,
                            None if scope.implicit => {
                                let var = supply.fresh_row_var();
                                scope.rows.insert(rest.clone(), var);
                                var
                            }
                            None => return Err(undefined_type_var_diag(rest)),
                        };
                        Ok(Type::Record(RowType::open(row, var)))
                    }
                }
            }
            TypeExpr::Union(members) => Ok(Type::union(
                members
                    .iter()
                    .map(|m| self.convert(m, scope, supply))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            TypeExpr::Intersection(members) => Ok(Type::intersection(
                members
                    .iter()
                    .map(|m| self.convert(m, scope, supply))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            TypeExpr::LiteralString(value) => Ok(Type::LiteralString(value.clone())),
        }
    }

    fn convert_named(
        &self,
        name: &str,
        args: &[TypeExpr],
        scope: &mut TypeScope,
        supply: &mut VarSupply,
    ) -> Result<Type, Diagnostic> {
        if args.is_empty()
            && let Some(prim) = primitive(name)
        {
            return Ok(prim);
        }

        if let Some((alias, arity, binder)) = &scope.self_alias
            && alias == name
        {
            if *arity != args.len() {
                return Err(arity_diag(name, *arity, args.len()));
            }
            let binder = *binder;
            scope.self_used = true;
            return Ok(Type::Var(binder));
        }

        if looks_like_type_var(name) {
            if !args.is_empty() {
                return Err(Diagnostic::error(
                    Category::UnificationFailure,
                    format!("type parameter `{name}` cannot be applied to arguments"),
                ));
            }
            return match scope.types.get(name) {
                Some(var) => Ok(Type::Var(*var)),
                None if scope.implicit => {
                    let var = supply.fresh_type_var();
                    scope.types.insert(name.to_string(), var);
                    Ok(Type::Var(var))
                }
                None => Err(undefined_type_var_diag(name)),
            };
        }

        let converted = args
            .iter()
            .map(|arg| self.convert(arg, scope, supply))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(adt) = self.adts.get(name) {
            if adt.params.len() != converted.len() {
                return Err(arity_diag(name, adt.params.len(), converted.len()));
            }
            return Ok(Type::con(name, converted));
        }
        if let Some(alias) = self.aliases.get(name) {
            if alias.params.len() != converted.len() {
                return Err(arity_diag(name, alias.params.len(), converted.len()));
            }
            return Ok(Type::Alias {
                name: name.to_string(),
                args: converted,
            });
        }
        Err(unknown_type_diag(name))
    }
}

fn primitive(name: &str) -> Option<Type> {
    match name {
        "Int" => Some(Type::Int),
        "Float" => Some(Type::Float),
        "Bool" => Some(Type::Bool),
        "Char" => Some(Type::Char),
        "String" => Some(Type::String),
        "Unit" => Some(Type::Unit),
        _ => None,
    }
}

fn looks_like_type_var(name: &str) -> bool {
    name.chars().next().is_some_and(|ch| ch.is_ascii_lowercase())
}

fn undefined_type_var_diag(name: &str) -> Diagnostic {
    Diagnostic::error(
        Category::UndefinedTypeVariable,
        format!("undefined type variable `{name}`"),
    )
    .with_help("declare it as a parameter of the enclosing type")
}

fn unknown_type_diag(name: &str) -> Diagnostic {
    if looks_like_type_var(name) {
        undefined_type_var_diag(name)
    } else {
        Diagnostic::error(Category::UnificationFailure, format!("unknown type `{name}`"))
    }
}

fn arity_diag(name: &str, expected: usize, found: usize) -> Diagnostic {
    Diagnostic::error(
        Category::ArityMismatch,
        format!("type `{name}` expects {expected} argument(s), found {found}"),
    )
}

fn duplicate_diag(kind: &str, name: &str) -> Diagnostic {
    Diagnostic::error(
        Category::DuplicateDefinition,
        format!("{kind} `{name}` is already defined"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ast::{FileId, Span, Spanned, VariantDecl};

    fn sp<T>(node: T) -> Spanned<T> {
        Spanned::new(node, Span::new(FileId(0), 0, 1))
    }

    fn named(name: &str) -> TypeExpr {
        TypeExpr::Named(name.into())
    }

    fn list_decl() -> TypeDecl {
        TypeDecl {
            name: sp("List".into()),
            params: vec!["a".into()],
            variants: vec![
                VariantDecl {
                    name: sp("Nil".into()),
                    fields: vec![],
                },
                VariantDecl {
                    name: sp("Cons".into()),
                    fields: vec![
                        sp(named("a")),
                        sp(TypeExpr::Applied("List".into(), vec![named("a")])),
                    ],
                },
            ],
        }
    }

    #[test]
    fn adt_constructors_get_curried_schemes() {
        let mut registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let schemes = registry.declare_adt(&list_decl(), &mut supply).unwrap();
        assert_eq!(schemes.len(), 2);
        assert_eq!(schemes[0].0, "Nil");
        assert_eq!(schemes[0].1.to_string(), "Unit -> List(a)");
        assert_eq!(schemes[1].1.to_string(), "a -> List(a) -> List(a)");
        assert_eq!(registry.constructor("Cons").map(|(adt, _)| adt.name.as_str()), Some("List"));
    }

    #[test]
    fn instantiated_constructor_shares_fresh_args() {
        let mut registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        registry.declare_adt(&list_decl(), &mut supply).unwrap();
        let (owner, fields) = registry.instantiate_constructor("Cons", &mut supply).unwrap();
        let Type::Con { args, .. } = &owner else {
            panic!("expected constructor type, got {owner}");
        };
        assert_eq!(fields[0], args[0]);
        assert_eq!(fields[1], owner);
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let mut registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        registry.declare_adt(&list_decl(), &mut supply).unwrap();
        let err = registry.declare_adt(&list_decl(), &mut supply).unwrap_err();
        assert_eq!(err.category, Category::DuplicateDefinition);
    }

    #[test]
    fn undeclared_parameter_in_declaration_is_an_error() {
        let mut registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let decl = TypeDecl {
            name: sp("Box".into()),
            params: vec![],
            variants: vec![VariantDecl {
                name: sp("Box".into()),
                fields: vec![sp(named("b"))],
            }],
        };
        let err = registry.declare_adt(&decl, &mut supply).unwrap_err();
        assert_eq!(err.category, Category::UndefinedTypeVariable);
        assert!(registry.adt("Box").is_none());
    }

    #[test]
    fn self_referential_alias_becomes_recursive() {
        let mut registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let decl = AliasDecl {
            name: sp("IntList".into()),
            params: vec![],
            target: sp(TypeExpr::Union(vec![
                named("Unit"),
                TypeExpr::Tuple(vec![named("Int"), named("IntList")]),
            ])),
        };
        registry.declare_alias(&decl, &mut supply).unwrap();
        let expanded = registry.expand_alias("IntList", &[]).unwrap();
        assert!(matches!(expanded, Type::Recursive { .. }));
        let unfolded = expanded.unfold().unwrap();
        assert_eq!(unfolded.alternatives().len(), 2);
    }

    #[test]
    fn parametric_alias_expands_with_arguments() {
        let mut registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let decl = AliasDecl {
            name: sp("Pair".into()),
            params: vec!["a".into()],
            target: sp(TypeExpr::Tuple(vec![named("a"), named("a")])),
        };
        registry.declare_alias(&decl, &mut supply).unwrap();
        assert_eq!(
            registry.expand_alias("Pair", &[Type::Int]).unwrap(),
            Type::Tuple(vec![Type::Int, Type::Int])
        );
        assert_eq!(
            registry.expand_alias("Pair", &[]).unwrap_err().category,
            Category::ArityMismatch
        );
    }

    #[test]
    fn unknown_names_are_classified() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.expand_alias("elem", &[]).unwrap_err().category,
            Category::UndefinedTypeVariable
        );
        assert_eq!(
            registry.expand_alias("Missing", &[]).unwrap_err().message,
            "unknown type `Missing`"
        );
    }

    #[test]
    fn annotation_scope_shares_implicit_variables() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let mut scope = TypeScope::implicit();
        let ty = registry
            .convert(
                &TypeExpr::Function(vec![named("a"), named("a")], Box::new(named("a"))),
                &mut scope,
                &mut supply,
            )
            .unwrap();
        assert_eq!(ty.to_string(), "(t0, t0) -> t0");
        assert_eq!(scope.type_var("a"), Some(TypeVarId(0)));
    }

    #[test]
    fn record_type_expression_with_rest() {
        let registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        let mut scope = TypeScope::implicit();
        let ty = registry
            .convert(
                &TypeExpr::Record {
                    fields: vec![("name".into(), named("String"))],
                    rest: Some("r".into()),
                },
                &mut scope,
                &mut supply,
            )
            .unwrap();
        assert!(matches!(&ty, Type::Record(row) if row.is_open() && row.has(&Label::new("name"))));
    }

    #[test]
    fn adt_arity_is_checked_in_annotations() {
        let mut registry = TypeRegistry::new();
        let mut supply = VarSupply::new();
        registry.declare_adt(&list_decl(), &mut supply).unwrap();
        let err = registry
            .convert(&named("List"), &mut TypeScope::implicit(), &mut supply)
            .unwrap_err();
        assert_eq!(err.category, Category::ArityMismatch);
    }
}
