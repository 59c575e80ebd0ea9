//! Tracing types for inference observability.
//!
//! These types capture step-by-step traces of unification and constraint
//! generation. Tracing is opt-in through `CheckOptions::tracing`; nothing is
//! recorded when it is off.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Unification trace
// ---------------------------------------------------------------------------

/// A single step in a unification trace.
#[derive(Debug, Clone, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// What action was taken during a unification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Types are already identical, or one side is an error placeholder.
    Identity,
    /// Structural recursion: `(A, B) ~ (C, D)` becomes `A ~ C`, `B ~ D`.
    Decompose,
    /// Type variable bound to a type (e.g. t0 := Int).
    Bind,
    /// Entered row unification.
    UnifyRows,
    /// Row variable bound to residual fields (e.g. r0 := {city: String}).
    BindRowVar,
    /// Both rows open, fresh tail variable created.
    RemyDecompose,
    /// Union or intersection alternatives matched against each other.
    UnionCover,
    /// One level of a recursive type unfolded.
    Unfold,
    /// Alias reference replaced by its declared body.
    ExpandAlias,
    /// Occurs check fired, infinite type prevented.
    OccursCheck,
    /// Unification failed.
    Error,
}

// ---------------------------------------------------------------------------
// Inference trace
// ---------------------------------------------------------------------------

/// A single step in an inference trace.
#[derive(Debug, Clone, Serialize)]
pub struct InferStep {
    pub expr: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub rule: InferRule,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(u32, u32)>,
}

/// Which generation rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferRule {
    Literal,
    VarLookup,
    Instantiate,
    Call,
    BinaryOp,
    If,
    Lambda,
    Let,
    LetGen,
    LetRec,
    Record,
    Spread,
    FieldAccess,
    Tuple,
    Match,
    Pattern,
}

/// Render a trace as pretty-printed JSON.
pub fn to_json<T: Serialize + ?Sized>(trace: &T) -> String {
    serde_json::to_string_pretty(trace).unwrap_or_else(|err| format!("{{\"error\": \"{err}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_step_serializes_snake_case_actions() {
        let step = UnifyStep {
            step: 1,
            action: UnifyAction::BindRowVar,
            left: "{name: String | ra}".into(),
            right: "{name: String, age: Int}".into(),
            detail: "ra := {age: Int}".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&to_json(&step)).unwrap();
        assert_eq!(json["action"], "bind_row_var");
        assert_eq!(json["step"], 1);
    }

    #[test]
    fn infer_step_renames_type_and_skips_missing_span() {
        let step = InferStep {
            expr: "42".into(),
            ty: "Int".into(),
            rule: InferRule::Literal,
            detail: String::new(),
            span: None,
        };
        let json: serde_json::Value = serde_json::from_str(&to_json(&step)).unwrap();
        assert_eq!(json["type"], "Int");
        assert_eq!(json["rule"], "literal");
        assert!(json.get("span").is_none());
    }

    #[test]
    fn let_rec_rule_name() {
        let steps = vec![InferStep {
            expr: "f".into(),
            ty: "Int -> Int".into(),
            rule: InferRule::LetRec,
            detail: String::new(),
            span: Some((0, 3)),
        }];
        let json: serde_json::Value = serde_json::from_str(&to_json(&steps)).unwrap();
        assert_eq!(json[0]["rule"], "let_rec");
        assert_eq!(json[0]["span"][1], 3);
    }
}
