// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Compile-time expression evaluation.
//!
//! Evaluation is performed against an [`EvalContext`] supplied by the
//! assembler driver. A lookup of a symbol that has no value yet returns
//! [`EvalError::Unresolved`], which the fixpoint loop records without
//! treating it as an error until the final pass.

use indexmap::IndexMap;

use crate::core::parser::{expr_span, BinaryOp, Expr, UnaryOp};
use crate::core::petscii;
use crate::core::tokenizer::Span;

/// Compile-time value. Integers are the primary currency; the compound
/// variants exist for macro arguments and `!for` iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(Vec<u8>),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Callable(Builtin),
}

impl Value {
    /// Render the value for user-facing messages (`!error`, `to_string`).
    pub fn display_string(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Str(bytes) => String::from_utf8_lossy(bytes).to_string(),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::display_string).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Object(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.display_string()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Callable(builtin) => format!("<builtin {}>", builtin.name()),
        }
    }
}

/// Built-in callable functions, referenced by a fixed identifier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Lo,
    Hi,
    Len,
    Sizeof,
    Min,
    Max,
    Abs,
    Range,
    ByteArray,
    ToString,
    Petscii,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Lo => "lo",
            Builtin::Hi => "hi",
            Builtin::Len => "len",
            Builtin::Sizeof => "sizeof",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Range => "range",
            Builtin::ByteArray => "byte_array",
            Builtin::ToString => "to_string",
            Builtin::Petscii => "petscii",
        }
    }

    pub fn by_name(name: &str) -> Option<Builtin> {
        Some(match name {
            "lo" => Builtin::Lo,
            "hi" => Builtin::Hi,
            "len" => Builtin::Len,
            "sizeof" => Builtin::Sizeof,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "abs" => Builtin::Abs,
            "range" => Builtin::Range,
            "byte_array" => Builtin::ByteArray,
            "to_string" => Builtin::ToString,
            "petscii" => Builtin::Petscii,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum EvalError {
    /// The expression references a symbol that has no value yet. Not an
    /// error until the final pass.
    Unresolved { name: String, span: Span },
    /// A real evaluation error (type mismatch, division by zero, ...).
    Error { message: String, span: Span },
}

impl EvalError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        EvalError::Error {
            message: message.into(),
            span,
        }
    }

    pub fn unresolved(name: impl Into<String>, span: Span) -> Self {
        EvalError::Unresolved {
            name: name.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            EvalError::Unresolved { span, .. } | EvalError::Error { span, .. } => *span,
        }
    }

    pub fn message(&self) -> String {
        match self {
            EvalError::Unresolved { name, .. } => format!("Undefined symbol: {name}"),
            EvalError::Error { message, .. } => message.clone(),
        }
    }
}

/// Context for expression evaluation, provided by the driver.
pub trait EvalContext {
    /// Resolve a (possibly qualified) identifier to a value.
    fn lookup(&self, path: &[String], span: Span) -> Result<Value, EvalError>;

    /// The current program counter, when meaningful.
    fn current_pc(&self) -> Option<i64>;
}

/// Evaluate an expression to a value.
pub fn eval_expr(expr: &Expr, ctx: &dyn EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Int(value, _) => Ok(Value::Int(*value)),

        Expr::Str(bytes, _) => Ok(Value::Str(bytes.clone())),

        Expr::Ident(path, span) => ctx.lookup(path, *span),

        Expr::Pc(span) => ctx
            .current_pc()
            .map(Value::Int)
            .ok_or_else(|| EvalError::new("Program counter (*) not available here", *span)),

        Expr::Unary { op, expr, span } => {
            let value = eval_int_value(eval_expr(expr, ctx)?, *span)?;
            Ok(Value::Int(apply_unary(*op, value)))
        }

        Expr::Binary { op, lhs, rhs, span } => {
            let l = eval_int_value(eval_expr(lhs, ctx)?, expr_span(lhs))?;
            let r = eval_int_value(eval_expr(rhs, ctx)?, expr_span(rhs))?;
            apply_binary(*op, l, r, *span).map(Value::Int)
        }

        Expr::Call { callee, args, span } => {
            let callee_value = eval_expr(callee, ctx)?;
            let builtin = match callee_value {
                Value::Callable(builtin) => builtin,
                other => {
                    return Err(EvalError::new(
                        format!("Value is not callable: {}", other.display_string()),
                        *span,
                    ))
                }
            };
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, ctx)?);
            }
            call_builtin(builtin, &values, *span)
        }

        Expr::Member { expr, field, span } => {
            let value = eval_expr(expr, ctx)?;
            match value {
                Value::Object(fields) => fields.get(field).cloned().ok_or_else(|| {
                    EvalError::new(format!("No such member: {field}"), *span)
                }),
                other => Err(EvalError::new(
                    format!(
                        "Member access on non-object value: {}",
                        other.display_string()
                    ),
                    *span,
                )),
            }
        }

        Expr::Index { expr, index, span } => {
            let value = eval_expr(expr, ctx)?;
            let idx = eval_int_value(eval_expr(index, ctx)?, *span)?;
            match value {
                Value::Array(items) => {
                    let len = items.len() as i64;
                    if idx < 0 || idx >= len {
                        return Err(EvalError::new(
                            format!("Index {idx} out of range (length {len})"),
                            *span,
                        ));
                    }
                    Ok(items[idx as usize].clone())
                }
                Value::Str(bytes) => {
                    let len = bytes.len() as i64;
                    if idx < 0 || idx >= len {
                        return Err(EvalError::new(
                            format!("Index {idx} out of range (length {len})"),
                            *span,
                        ));
                    }
                    Ok(Value::Int(i64::from(bytes[idx as usize])))
                }
                other => Err(EvalError::new(
                    format!("Subscript on non-array value: {}", other.display_string()),
                    *span,
                )),
            }
        }
    }
}

/// Evaluate an expression that must produce an integer.
pub fn eval_int(expr: &Expr, ctx: &dyn EvalContext) -> Result<i64, EvalError> {
    let span = expr_span(expr);
    eval_int_value(eval_expr(expr, ctx)?, span)
}

fn eval_int_value(value: Value, span: Span) -> Result<i64, EvalError> {
    match value {
        Value::Int(v) => Ok(v),
        other => Err(EvalError::new(
            format!("Expected integer value, got: {}", other.display_string()),
            span,
        )),
    }
}

pub fn apply_unary(op: UnaryOp, value: i64) -> i64 {
    match op {
        UnaryOp::Minus => value.wrapping_neg(),
        UnaryOp::BitNot => !value,
        UnaryOp::LogicNot => i64::from(value == 0),
        UnaryOp::Low => value & 0xff,
        UnaryOp::High => (value >> 8) & 0xff,
    }
}

pub fn apply_binary(op: BinaryOp, l: i64, r: i64, span: Span) -> Result<i64, EvalError> {
    Ok(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Subtract => l.wrapping_sub(r),
        BinaryOp::Multiply => l.wrapping_mul(r),
        BinaryOp::Divide => {
            if r == 0 {
                return Err(EvalError::new("Division by zero", span));
            }
            l.wrapping_div(r)
        }
        BinaryOp::Mod => {
            if r == 0 {
                return Err(EvalError::new("Modulo by zero", span));
            }
            l.wrapping_rem(r)
        }
        BinaryOp::Shl => {
            check_shift_count(r, span)?;
            l.wrapping_shl(r as u32)
        }
        BinaryOp::Shr => {
            check_shift_count(r, span)?;
            ((l as u64) >> (r as u32)) as i64
        }
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitOr => l | r,
        BinaryOp::BitXor => l ^ r,
        BinaryOp::Eq => i64::from(l == r),
        BinaryOp::Ne => i64::from(l != r),
        BinaryOp::Lt => i64::from(l < r),
        BinaryOp::Le => i64::from(l <= r),
        BinaryOp::Gt => i64::from(l > r),
        BinaryOp::Ge => i64::from(l >= r),
        BinaryOp::LogicAnd => i64::from(l != 0 && r != 0),
        BinaryOp::LogicOr => i64::from(l != 0 || r != 0),
    })
}

fn check_shift_count(count: i64, span: Span) -> Result<(), EvalError> {
    if !(0..=63).contains(&count) {
        return Err(EvalError::new(
            format!("Shift count out of range 0..63: {count}"),
            span,
        ));
    }
    Ok(())
}

fn call_builtin(builtin: Builtin, args: &[Value], span: Span) -> Result<Value, EvalError> {
    let arity_err = |expected: &str| {
        EvalError::new(
            format!(
                "{}() expects {} argument(s), got {}",
                builtin.name(),
                expected,
                args.len()
            ),
            span,
        )
    };

    match builtin {
        Builtin::Lo | Builtin::Hi | Builtin::Abs | Builtin::ToString => {
            let [arg] = args else {
                return Err(arity_err("1"));
            };
            let value = eval_int_value(arg.clone(), span)?;
            Ok(match builtin {
                Builtin::Lo => Value::Int(value & 0xff),
                Builtin::Hi => Value::Int((value >> 8) & 0xff),
                Builtin::Abs => Value::Int(value.wrapping_abs()),
                Builtin::ToString => Value::Str(value.to_string().into_bytes()),
                _ => unreachable!(),
            })
        }

        Builtin::Len | Builtin::Sizeof => {
            let [arg] = args else {
                return Err(arity_err("1"));
            };
            let value = match (builtin, arg) {
                (Builtin::Len, Value::Str(bytes)) => bytes.len() as i64,
                (Builtin::Len, Value::Array(items)) => items.len() as i64,
                (Builtin::Sizeof, value) => emitted_size(value, span)?,
                (_, other) => {
                    return Err(EvalError::new(
                        format!("len() expects a string or array, got: {}", other.display_string()),
                        span,
                    ))
                }
            };
            Ok(Value::Int(value))
        }

        Builtin::Min | Builtin::Max => {
            let [a, b] = args else {
                return Err(arity_err("2"));
            };
            let a = eval_int_value(a.clone(), span)?;
            let b = eval_int_value(b.clone(), span)?;
            Ok(Value::Int(match builtin {
                Builtin::Min => a.min(b),
                _ => a.max(b),
            }))
        }

        Builtin::Range => {
            let (start, end) = match args {
                [end] => (0, eval_int_value(end.clone(), span)?),
                [start, end] => (
                    eval_int_value(start.clone(), span)?,
                    eval_int_value(end.clone(), span)?,
                ),
                _ => return Err(arity_err("1 or 2")),
            };
            let count = end.saturating_sub(start);
            if !(0..=65536).contains(&count) {
                return Err(EvalError::new(
                    format!("range() length out of range 0..65536: {count}"),
                    span,
                ));
            }
            Ok(Value::Array((start..end).map(Value::Int).collect()))
        }

        Builtin::ByteArray => {
            let [arg] = args else {
                return Err(arity_err("1"));
            };
            match arg {
                Value::Str(bytes) => Ok(Value::Array(
                    bytes.iter().map(|b| Value::Int(i64::from(*b))).collect(),
                )),
                other => Err(EvalError::new(
                    format!(
                        "byte_array() expects a string, got: {}",
                        other.display_string()
                    ),
                    span,
                )),
            }
        }

        Builtin::Petscii => {
            let [arg] = args else {
                return Err(arity_err("1"));
            };
            match arg {
                Value::Str(bytes) => Ok(Value::Str(petscii::encode(bytes))),
                other => Err(EvalError::new(
                    format!(
                        "petscii() expects a string, got: {}",
                        other.display_string()
                    ),
                    span,
                )),
            }
        }
    }
}

/// Number of bytes a value occupies when emitted with `!byte`.
fn emitted_size(value: &Value, span: Span) -> Result<i64, EvalError> {
    match value {
        Value::Int(_) => Ok(1),
        Value::Str(bytes) => Ok(bytes.len() as i64),
        Value::Array(items) => {
            let mut total = 0i64;
            for item in items {
                total += emitted_size(item, span)?;
            }
            Ok(total)
        }
        other => Err(EvalError::new(
            format!("sizeof() not defined for: {}", other.display_string()),
            span,
        )),
    }
}
