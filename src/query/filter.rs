//! Predicate tree to remote filter string.

use super::expr::{Expr, Value};
use crate::error::{CompileError, CompileResult};
use chrono::SecondsFormat;

/// Operator names `compile_filter` understands.
pub const SUPPORTED_OPERATORS: &str = "eq, gt, gte, lt, lte, like, isNull, isUndefined, in, and, or, not";

/// Compile a predicate tree into the remote filter syntax.
///
/// `None` means "send no filter": either there was no predicate or it
/// reduced to nothing (e.g. an empty `and`).
pub fn compile_filter(expr: Option<&Expr>) -> CompileResult<Option<String>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let compiled = compile_expr(expr)?;
    Ok(if compiled.is_empty() { None } else { Some(compiled) })
}

fn compile_expr(expr: &Expr) -> CompileResult<String> {
    match expr {
        Expr::Func { name, args } => compile_func(name, args),
        Expr::Ref(path) => Err(CompileError::InvalidArguments {
            name: path.to_string(),
            reason: "a bare field reference is not a predicate".to_string(),
        }),
        Expr::Val(_) => Err(CompileError::InvalidArguments {
            name: "value".to_string(),
            reason: "a bare literal is not a predicate".to_string(),
        }),
    }
}

fn compile_func(name: &str, args: &[Expr]) -> CompileResult<String> {
    match name {
        "eq" => binary(name, args, "="),
        "gt" => binary(name, args, ">"),
        "gte" => binary(name, args, ">="),
        "lt" => binary(name, args, "<"),
        "lte" => binary(name, args, "<="),
        "like" => binary(name, args, "~"),
        "isNull" | "isUndefined" => {
            let [arg] = args else {
                return Err(arity(name, 1, args.len()));
            };
            Ok(format!("{} = null", operand(name, arg)?))
        }
        "in" => compile_in(args),
        "and" => join(args, " && "),
        "or" => join(args, " || "),
        "not" => {
            let [arg] = args else {
                return Err(arity(name, 1, args.len()));
            };
            let inner = compile_expr(arg)?;
            Ok(if inner.is_empty() {
                String::new()
            } else {
                format!("!({})", inner)
            })
        }
        other => Err(CompileError::UnsupportedOperator {
            name: other.to_string(),
            supported: SUPPORTED_OPERATORS,
        }),
    }
}

fn binary(name: &str, args: &[Expr], op: &str) -> CompileResult<String> {
    let [left, right] = args else {
        return Err(arity(name, 2, args.len()));
    };
    Ok(format!("{} {} {}", operand(name, left)?, op, operand(name, right)?))
}

fn compile_in(args: &[Expr]) -> CompileResult<String> {
    let [target, values] = args else {
        return Err(arity("in", 2, args.len()));
    };
    let target = operand("in", target)?;

    let values = match values {
        Expr::Val(Value::Array(values)) => values,
        _ => {
            return Err(CompileError::InvalidArguments {
                name: "in".to_string(),
                reason: "second argument must be an array literal".to_string(),
            })
        }
    };

    let terms: Vec<String> = values
        .iter()
        .map(|v| format!("{} = {}", target, escape_value(v)))
        .collect();

    match terms.len() {
        0 => Err(CompileError::EmptyIn { field: target }),
        1 => Ok(terms.into_iter().collect()),
        _ => Ok(format!("({})", terms.join(" || "))),
    }
}

/// `(t1 sep t2 ...)`; one term stands alone, none yields "". Terms that
/// reduce to nothing are left out.
fn join(args: &[Expr], sep: &str) -> CompileResult<String> {
    let mut terms = args
        .iter()
        .map(compile_expr)
        .collect::<CompileResult<Vec<String>>>()?;
    terms.retain(|term| !term.is_empty());

    Ok(match terms.len() {
        0 => String::new(),
        1 => terms.remove(0),
        _ => format!("({})", terms.join(sep)),
    })
}

/// Render a comparison operand: field references as dotted paths, literals
/// escaped.
fn operand(name: &str, expr: &Expr) -> CompileResult<String> {
    match expr {
        Expr::Ref(path) => Ok(path.to_string()),
        Expr::Val(value) => Ok(escape_value(value)),
        Expr::Func { name: inner, .. } => Err(CompileError::InvalidArguments {
            name: name.to_string(),
            reason: format!("operand cannot be the operator `{}`", inner),
        }),
    }
}

fn arity(name: &str, expected: usize, got: usize) -> CompileError {
    CompileError::InvalidArguments {
        name: name.to_string(),
        reason: format!("expected {} argument(s), got {}", expected, got),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render a literal in the remote filter syntax.
///
/// Strings are double-quoted with `\` and `"` backslash-escaped. Numbers use
/// Rust's `Display`, which never switches to exponent notation: `1e21`
/// renders as `1000000000000000000000` and `1e-7` as `0.0000001`. The remote
/// parses both forms to the same value.
pub fn escape_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "NaN".to_string(),
        Value::Float(f) if f.is_infinite() => {
            let s = if *f > 0.0 { "Infinity" } else { "-Infinity" };
            s.to_string()
        }
        Value::Float(f) => f.to_string(),
        Value::String(s) => quote(s),
        Value::Date(d) => quote(&d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(escape_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Json(json) => quote(&json.to_string()),
    }
}
