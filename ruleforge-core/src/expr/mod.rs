//! Expression Evaluator (C1)
//!
//! Parses and evaluates boolean/arithmetic expressions over a
//! [`FactContext`](crate::types::FactContext). Stateless and side-effect
//! free; safe to call concurrently from any number of threads (§5).

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use crate::error::{Result, RuleForgeError};
use crate::model::{Outcome, RuleResult};
use crate::types::{FactContext, Value};
use ast::Expr;

/// An expression compiled once and evaluated many times.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
}

impl CompiledExpression {
    /// Parse `source` into a reusable compiled form.
    pub fn compile(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let ast = parser::parse(&source)?;
        Ok(CompiledExpression { source, ast })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every `#variable` token the expression references, used by the
    /// engine's up-front parameter check (§4.5 step 1).
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        ast::collect_variables(&self.ast, &mut out);
        out.sort();
        out.dedup();
        out
    }
}

/// Evaluate an expression and return its raw value (§4.1).
pub fn evaluate(expression: &str, context: &FactContext) -> Result<Value> {
    let compiled = CompiledExpression::compile(expression)?;
    evaluate_compiled(&compiled, context)
}

/// Evaluate a pre-compiled expression and return its raw value.
pub fn evaluate_compiled(expression: &CompiledExpression, context: &FactContext) -> Result<Value> {
    eval::eval(&expression.ast, context)
}

/// Evaluate an expression and map the outcome to a [`RuleResult`] per the
/// contract in §4.1: `null` → no-match, `true` → match, `false` → no-match,
/// any other non-null value → match carrying that value as the message.
pub fn evaluate_with_result(
    rule_name: &str,
    expression: &str,
    context: &FactContext,
) -> RuleResult {
    match evaluate(expression, context) {
        Ok(Value::Null) => RuleResult::no_match(rule_name),
        Ok(Value::Bool(true)) => RuleResult::matched(rule_name, String::new()),
        Ok(Value::Bool(false)) => RuleResult::no_match(rule_name),
        Ok(other) => RuleResult::matched(rule_name, describe(&other)),
        Err(e) => RuleResult::error(rule_name, e.to_string()),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// `true` if `context` binds every `#variable` the expression references,
/// without actually evaluating it (§4.5 step 1).
pub fn check_parameters(expression: &CompiledExpression, context: &FactContext) -> Result<()> {
    let missing: Vec<String> = expression
        .variables()
        .into_iter()
        .filter(|v| !context.contains(v))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RuleForgeError::MissingParameters(missing))
    }
}

/// A transformation applied to a failing expression by C3's
/// `retry-with-safe-expression` recovery strategy (§9 open question b).
///
/// Rewrites every `.` in a leading `#var` field-access chain to `?.`, then
/// wraps the whole expression in a not-null guard on that leading variable.
pub fn make_safe_expression(source: &str) -> Option<String> {
    let first_var_end = source.find('#')?;
    let rest = &source[first_var_end + 1..];
    let ident_len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let var_name = &rest[..ident_len];
    if var_name.is_empty() {
        return None;
    }

    // Safe-navigate every plain `.` that appears right after the chain
    // starting at this variable (a conservative global rewrite: any bare
    // `.field` not already safe becomes `?.field`).
    let mut safe = String::with_capacity(source.len() + 8);
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] == '.' && chars.get(i.wrapping_sub(1)) != Some(&'?') {
            safe.push_str("?.");
        } else {
            safe.push(chars[i]);
        }
        i += 1;
    }

    Some(format!("({safe}) && #{var_name} != null"))
}
