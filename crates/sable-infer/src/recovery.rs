//! Error recovery: diagnostic collection, deduplication and error variables.
//!
//! When a construct fails to type, its diagnostic is recorded here and the
//! construct is given a fresh *error variable*. The solver treats error
//! variables as absorbing, so one root cause produces one report.

use std::collections::{BTreeSet, HashSet};

use sable_diag::{Category, Diagnostic};
use sable_types::{Type, TypeVarId};

use crate::VarSupply;

#[derive(Debug, Default)]
pub struct ErrorRecovery {
    diagnostics: Vec<Diagnostic>,
    seen: HashSet<(Category, String)>,
    error_vars: BTreeSet<TypeVarId>,
}

impl ErrorRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic unless an equivalent one was already recorded.
    ///
    /// Equivalence ignores location and type-variable numbering. Returns
    /// whether the diagnostic was kept.
    pub fn record(&mut self, diag: Diagnostic) -> bool {
        if !self.seen.insert(diag.dedup_key()) {
            return false;
        }
        self.diagnostics.push(diag);
        true
    }

    pub fn record_all(&mut self, diags: impl IntoIterator<Item = Diagnostic>) {
        for diag in diags {
            self.record(diag);
        }
    }

    /// Allocate a fresh variable tagged as an error placeholder.
    pub fn error_var(&mut self, supply: &mut VarSupply) -> Type {
        let var = supply.fresh_type_var();
        self.error_vars.insert(var);
        Type::Var(var)
    }

    pub fn is_error_var(&self, var: TypeVarId) -> bool {
        self.error_vars.contains(&var)
    }

    pub fn error_vars(&self) -> &BTreeSet<TypeVarId> {
        &self.error_vars
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics ordered by severity, then by recording order.
    pub fn finish(self) -> Vec<Diagnostic> {
        let mut diagnostics = self.diagnostics;
        diagnostics.sort_by_key(|diag| diag.severity);
        diagnostics
    }
}
