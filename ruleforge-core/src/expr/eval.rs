//! Tree-walking evaluator for the expression language (C1)

use super::ast::{BinOp, Expr, UnOp};
use crate::error::{Result, RuleForgeError};
use crate::types::{FactContext, Value};

/// Evaluate a parsed expression against a fact context.
pub fn eval(expr: &Expr, ctx: &FactContext) -> Result<Value> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Integer(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::string(s.clone())),
        Expr::Var(name) => ctx
            .get(name)
            .cloned()
            .ok_or_else(|| RuleForgeError::UndefinedVariable(name.clone())),
        Expr::Field { target, field, safe } => {
            let value = eval(target, ctx)?;
            if *safe && value.is_null() {
                return Ok(Value::Null);
            }
            match value.get_field(field) {
                Some(v) => Ok(v),
                None if *safe => Ok(Value::Null),
                None => Err(RuleForgeError::TypeError(format!(
                    "field `{field}` not found on value"
                ))),
            }
        }
        Expr::Index { target, index } => {
            let value = eval(target, ctx)?;
            let idx = eval(index, ctx)?;
            let idx = idx
                .as_f64()
                .ok_or_else(|| RuleForgeError::TypeError("index must be numeric".to_string()))?
                as i64;
            value
                .get_index(idx)
                .ok_or_else(|| RuleForgeError::TypeError(format!("index {idx} out of range")))
        }
        Expr::MethodCall { target, method, args } => {
            let receiver = eval(target, ctx)?;
            let mut arg_values = Vec::with_capacity(args.len());
            for a in args {
                arg_values.push(eval(a, ctx)?);
            }
            call_method(&receiver, method, &arg_values)
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, ctx)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnOp::Neg => match value {
                    Value::Integer(i) => Ok(Value::Integer(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(RuleForgeError::TypeError(format!(
                        "cannot negate {other:?}"
                    ))),
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary { cond, then_branch, else_branch } => {
            let c = eval(cond, ctx)?;
            if c.is_truthy() {
                eval(then_branch, ctx)
            } else {
                eval(else_branch, ctx)
            }
        }
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &FactContext) -> Result<Value> {
    // Short-circuit logical operators.
    match op {
        BinOp::And => {
            let l = eval(lhs, ctx)?;
            if !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(eval(rhs, ctx)?.is_truthy()));
        }
        BinOp::Or => {
            let l = eval(lhs, ctx)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(eval(rhs, ctx)?.is_truthy()));
        }
        _ => {}
    }

    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &l, &r),
        BinOp::Add => arithmetic(op, &l, &r),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, &l, &r),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
            *a as f64 == *b
        }
        _ => l == r,
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        let ord = a.as_ref().cmp(b.as_ref());
        return Ok(Value::Bool(match op {
            BinOp::Lt => ord.is_lt(),
            BinOp::Le => ord.is_le(),
            BinOp::Gt => ord.is_gt(),
            BinOp::Ge => ord.is_ge(),
            _ => unreachable!(),
        }));
    }
    let a = l
        .as_f64()
        .ok_or_else(|| RuleForgeError::TypeError(format!("cannot compare {l:?}")))?;
    let b = r
        .as_f64()
        .ok_or_else(|| RuleForgeError::TypeError(format!("cannot compare {r:?}")))?;
    Ok(Value::Bool(match op {
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        _ => unreachable!(),
    }))
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    if op == BinOp::Add {
        if let (Value::String(a), Value::String(b)) = (l, r) {
            return Ok(Value::string(format!("{a}{b}")));
        }
    }

    let both_int = matches!(l, Value::Integer(_)) && matches!(r, Value::Integer(_));
    let a = l
        .as_f64()
        .ok_or_else(|| RuleForgeError::TypeError(format!("cannot apply arithmetic to {l:?}")))?;
    let b = r
        .as_f64()
        .ok_or_else(|| RuleForgeError::TypeError(format!("cannot apply arithmetic to {r:?}")))?;

    if (op == BinOp::Div || op == BinOp::Mod) && b == 0.0 {
        return Err(RuleForgeError::TypeError("division by zero".to_string()));
    }

    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
        _ => unreachable!(),
    };

    if both_int && op != BinOp::Div {
        Ok(Value::Integer(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value> {
    match (receiver, method) {
        (Value::String(s), "toUpperCase") => Ok(Value::string(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Ok(Value::string(s.to_lowercase())),
        (Value::String(s), "trim") => Ok(Value::string(s.trim().to_string())),
        (Value::String(s), "length" | "size") => Ok(Value::Integer(s.chars().count() as i64)),
        (Value::String(s), "isEmpty") => Ok(Value::Bool(s.is_empty())),
        (Value::String(s), "contains") => {
            let needle = arg_str(args, 0)?;
            Ok(Value::Bool(s.contains(needle)))
        }
        (Value::String(s), "startsWith") => {
            let needle = arg_str(args, 0)?;
            Ok(Value::Bool(s.starts_with(needle)))
        }
        (Value::String(s), "endsWith") => {
            let needle = arg_str(args, 0)?;
            Ok(Value::Bool(s.ends_with(needle)))
        }
        (Value::Array(a), "length" | "size") => Ok(Value::Integer(a.len() as i64)),
        (Value::Array(a), "isEmpty") => Ok(Value::Bool(a.is_empty())),
        (Value::Array(a), "contains") => {
            let needle = args.first().ok_or_else(|| {
                RuleForgeError::TypeError("contains() requires one argument".to_string())
            })?;
            Ok(Value::Bool(a.iter().any(|v| values_equal(v, needle))))
        }
        (Value::Object(o), "containsKey") => {
            let key = arg_str(args, 0)?;
            Ok(Value::Bool(o.contains_key(key)))
        }
        (Value::Object(o), "size" | "length") => Ok(Value::Integer(o.len() as i64)),
        (Value::Null, _) => Err(RuleForgeError::TypeError(format!(
            "cannot call method `{method}` on null"
        ))),
        (other, method) => Err(RuleForgeError::TypeError(format!(
            "unsupported method `{method}` on {other:?}"
        ))),
    }
}

fn arg_str<'a>(args: &'a [Value], index: usize) -> Result<&'a str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| RuleForgeError::TypeError(format!("argument {index} must be a string")))
}
