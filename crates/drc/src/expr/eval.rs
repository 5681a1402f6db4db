// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tree-walking evaluator for the DDF hook expression language
//! (`spec.md` §4.5).
//!
//! An expression is compiled once per DDF load ([`super::Compiled`]) and
//! evaluated many times against a fresh [`EvalContext`] per tick. A
//! failure is reported as an [`Error`] and must not abort the containing
//! tick — callers are expected to log it and treat the hook as a no-op.

use super::ast::{BinOp, Expr, Literal, UnOp};
use crate::error::{Error, Result};

/// A runtime value flowing through expression evaluation. `Object` values
/// are transient — only `R`, `Item`, `Attr`, and the result of
/// `R.item(...)` ever take this shape; no expression can observe one
/// directly as its final result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Str(String),
    Object(ObjectRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRef {
    R,
    Item,
    Attr,
    ItemView(String),
}

impl Value {
    fn as_num(&self) -> Result<f64> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(Error::Decode(format!("expr: expected a number, found {other:?}"))),
        }
    }

    fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Num(n) => Ok(*n != 0.0),
            other => Err(Error::Decode(format!("expr: expected a boolean, found {other:?}"))),
        }
    }

    fn as_i64(&self) -> Result<i64> {
        Ok(self.as_num()? as i64)
    }
}

/// Host surface an expression can observe and mutate, implemented by the
/// caller (a DDF hook driver) against the live resource/attribute for this
/// evaluation.
pub trait EvalContext {
    /// `Item.val` read.
    fn item_val(&self) -> Value;
    /// `Item.val = ...` is not part of the grammar; hooks instead treat
    /// the expression's overall result as the value to write. `item_val`
    /// exists so a "write" hook can reference the item's *prior* value
    /// (e.g. `Item.val + 1`).
    fn attr_val(&self) -> Option<Value>;
    /// `R.item("<suffix>").val` read. Returns `None` if the resource has
    /// no such item.
    fn resource_item_val(&self, suffix: &str) -> Option<Value>;
}

fn eval_object_field(obj: &ObjectRef, field: &str, ctx: &dyn EvalContext) -> Result<Value> {
    match (obj, field) {
        (ObjectRef::Item, "val") => Ok(ctx.item_val()),
        (ObjectRef::Attr, "val") => ctx
            .attr_val()
            .ok_or_else(|| Error::Decode("expr: Attr.val read outside a parse hook".into())),
        (ObjectRef::ItemView(suffix), "val") => ctx
            .resource_item_val(suffix)
            .ok_or_else(|| Error::Decode(format!("expr: no resource item for suffix '{suffix}'"))),
        (ObjectRef::R, field) => Err(Error::Decode(format!("expr: R has no field '{field}'"))),
        (_, field) => Err(Error::Decode(format!("expr: object has no field '{field}'"))),
    }
}

fn eval(expr: &Expr, ctx: &dyn EvalContext) -> Result<Value> {
    match expr {
        Expr::Literal(Literal::Num(n)) => Ok(Value::Num(*n)),
        Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
        Expr::Literal(Literal::Str(s)) => Ok(Value::Str(s.clone())),
        Expr::Ident(name) => match name.as_str() {
            "R" => Ok(Value::Object(ObjectRef::R)),
            "Item" => Ok(Value::Object(ObjectRef::Item)),
            "Attr" => Ok(Value::Object(ObjectRef::Attr)),
            other => Err(Error::Decode(format!("expr: unknown identifier '{other}'"))),
        },
        Expr::Field(base, field) => {
            let base_val = eval(base, ctx)?;
            match base_val {
                Value::Object(obj) => eval_object_field(&obj, field, ctx),
                other => Err(Error::Decode(format!(
                    "expr: cannot access field '{field}' on {other:?}"
                ))),
            }
        }
        Expr::Call(callee, args) => {
            let Expr::Field(base, method) = callee.as_ref() else {
                return Err(Error::Decode("expr: only method calls are supported".into()));
            };
            let base_val = eval(base, ctx)?;
            let Value::Object(ObjectRef::R) = base_val else {
                return Err(Error::Decode(format!("expr: unknown call target for '{method}'")));
            };
            if method != "item" {
                return Err(Error::Decode(format!("expr: R has no method '{method}'")));
            }
            if args.len() != 1 {
                return Err(Error::Decode("expr: R.item() takes exactly one argument".into()));
            }
            let suffix = match eval(&args[0], ctx)? {
                Value::Str(s) => s,
                other => {
                    return Err(Error::Decode(format!(
                        "expr: R.item() argument must be a string, found {other:?}"
                    )))
                }
            };
            Ok(Value::Object(ObjectRef::ItemView(suffix)))
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, ctx)?;
            match op {
                UnOp::Neg => Ok(Value::Num(-v.as_num()?)),
                UnOp::Not => Ok(Value::Bool(!v.as_bool()?)),
                UnOp::BitNot => Ok(Value::Num(!v.as_i64()? as f64)),
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary(cond, then_branch, else_branch) => {
            if eval(cond, ctx)?.as_bool()? {
                eval(then_branch, ctx)
            } else {
                eval(else_branch, ctx)
            }
        }
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &dyn EvalContext) -> Result<Value> {
    // Short-circuit operators evaluate their right side lazily.
    if op == BinOp::And {
        return Ok(Value::Bool(eval(lhs, ctx)?.as_bool()? && eval(rhs, ctx)?.as_bool()?));
    }
    if op == BinOp::Or {
        return Ok(Value::Bool(eval(lhs, ctx)?.as_bool()? || eval(rhs, ctx)?.as_bool()?));
    }

    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;

    // String equality is allowed; every other string operation is not.
    if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
        return match op {
            BinOp::Eq => Ok(Value::Bool(a == b)),
            BinOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(Error::Decode(format!("expr: operator {op:?} is not defined for strings"))),
        };
    }

    match op {
        BinOp::Add => Ok(Value::Num(l.as_num()? + r.as_num()?)),
        BinOp::Sub => Ok(Value::Num(l.as_num()? - r.as_num()?)),
        BinOp::Mul => Ok(Value::Num(l.as_num()? * r.as_num()?)),
        BinOp::Div => {
            let divisor = r.as_num()?;
            if divisor == 0.0 {
                return Err(Error::Decode("expr: division by zero".into()));
            }
            Ok(Value::Num(l.as_num()? / divisor))
        }
        BinOp::Rem => {
            let divisor = r.as_i64()?;
            if divisor == 0 {
                return Err(Error::Decode("expr: modulo by zero".into()));
            }
            Ok(Value::Num((l.as_i64()? % divisor) as f64))
        }
        BinOp::Eq => Ok(Value::Bool(l.as_num()? == r.as_num()?)),
        BinOp::Ne => Ok(Value::Bool(l.as_num()? != r.as_num()?)),
        BinOp::Lt => Ok(Value::Bool(l.as_num()? < r.as_num()?)),
        BinOp::Le => Ok(Value::Bool(l.as_num()? <= r.as_num()?)),
        BinOp::Gt => Ok(Value::Bool(l.as_num()? > r.as_num()?)),
        BinOp::Ge => Ok(Value::Bool(l.as_num()? >= r.as_num()?)),
        BinOp::BitAnd => Ok(Value::Num((l.as_i64()? & r.as_i64()?) as f64)),
        BinOp::BitOr => Ok(Value::Num((l.as_i64()? | r.as_i64()?) as f64)),
        BinOp::BitXor => Ok(Value::Num((l.as_i64()? ^ r.as_i64()?) as f64)),
        BinOp::Shl => Ok(Value::Num(((l.as_i64()? as i64) << (r.as_i64()? & 63)) as f64)),
        BinOp::Shr => Ok(Value::Num(((l.as_i64()? as i64) >> (r.as_i64()? & 63)) as f64)),
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled above"),
    }
}

/// A parsed expression ready for repeated evaluation, compiled once per
/// DDF load.
#[derive(Debug, Clone)]
pub struct Compiled {
    expr: Expr,
    source: String,
}

impl Compiled {
    pub fn compile(source: &str) -> Result<Self> {
        let expr = super::parser::parse(source)?;
        Ok(Self {
            expr,
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `ctx`. Per `spec.md` §4.5, a failure here must be
    /// reported (via the returned `Err`) and never abort the containing
    /// tick — the caller logs it and treats the hook as a no-op.
    pub fn eval(&self, ctx: &dyn EvalContext) -> Result<Value> {
        eval(&self.expr, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeContext {
        item: Value,
        attr: Option<Value>,
        others: std::collections::HashMap<String, Value>,
    }

    impl EvalContext for FakeContext {
        fn item_val(&self) -> Value {
            self.item.clone()
        }
        fn attr_val(&self) -> Option<Value> {
            self.attr.clone()
        }
        fn resource_item_val(&self, suffix: &str) -> Option<Value> {
            self.others.get(suffix).cloned()
        }
    }

    #[test]
    fn reads_item_and_attr_values() {
        let compiled = Compiled::compile("Attr.val + Item.val").unwrap();
        let ctx = FakeContext {
            item: Value::Num(10.0),
            attr: Some(Value::Num(5.0)),
            others: Default::default(),
        };
        assert_eq!(compiled.eval(&ctx).unwrap(), Value::Num(15.0));
    }

    #[test]
    fn resolves_r_item_lookup() {
        let compiled = Compiled::compile(r#"R.item("config/offset").val"#).unwrap();
        let mut others = std::collections::HashMap::new();
        others.insert("config/offset".to_string(), Value::Num(42.0));
        let ctx = FakeContext {
            item: Value::Num(0.0),
            attr: None,
            others,
        };
        assert_eq!(compiled.eval(&ctx).unwrap(), Value::Num(42.0));
    }

    #[test]
    fn ternary_and_comparison_scenario() {
        let compiled = Compiled::compile("Attr.val > 100 ? 1 : 0").unwrap();
        let ctx = FakeContext {
            item: Value::Num(0.0),
            attr: Some(Value::Num(200.0)),
            others: Default::default(),
        };
        assert_eq!(compiled.eval(&ctx).unwrap(), Value::Num(1.0));
    }

    #[test]
    fn division_by_zero_is_reported_not_panicking() {
        let compiled = Compiled::compile("1 / 0").unwrap();
        let ctx = FakeContext {
            item: Value::Num(0.0),
            attr: None,
            others: Default::default(),
        };
        assert!(compiled.eval(&ctx).is_err());
    }

    #[test]
    fn attr_val_outside_parse_hook_is_a_reported_error() {
        let compiled = Compiled::compile("Attr.val").unwrap();
        let ctx = FakeContext {
            item: Value::Num(0.0),
            attr: None,
            others: Default::default(),
        };
        assert!(compiled.eval(&ctx).is_err());
    }

    #[test]
    fn bitwise_and_shift_operators() {
        let compiled = Compiled::compile("(0x0F & 0x03) << 2").unwrap();
        let ctx = FakeContext {
            item: Value::Num(0.0),
            attr: None,
            others: Default::default(),
        };
        assert_eq!(compiled.eval(&ctx).unwrap(), Value::Num(12.0));
    }
}
