use std::cmp::Ordering;

use crate::value::{AnnotatedValue, Value};

use super::func_token;
use super::{CompareOp, Expr, FuncName, IsKind};

// Truth state used by AND / OR / NOT.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Null,
    Missing,
}

impl Truth {
    fn of(value: &Value) -> Self {
        match value {
            Value::Missing => Truth::Missing,
            Value::Null => Truth::Null,
            other if other.truth() => Truth::True,
            _ => Truth::False,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Truth::True => Value::TRUE,
            Truth::False => Value::FALSE,
            Truth::Null => Value::Null,
            Truth::Missing => Value::Missing,
        }
    }
}

impl Expr {
    /// Evaluates the expression against a row.
    ///
    /// Comparisons involving `MISSING` yield `MISSING`, those involving `NULL`
    /// yield `NULL`. When the row carries a cover for this expression the cover
    /// value is returned without touching the document.
    pub fn evaluate(&self, item: &AnnotatedValue) -> Value {
        let mut bindings = Vec::new();
        self.eval_in(item, &mut bindings)
    }

    fn eval_in(&self, item: &AnnotatedValue, bindings: &mut Vec<(String, Value)>) -> Value {
        if !item.covers().is_empty() && !self.is_constant() && bindings.is_empty() {
            if let Some(v) = item.get_cover(&self.to_string()) {
                return v.clone();
            }
        }
        match self {
            Expr::Constant(v) => v.clone(),
            Expr::Identifier(name) => {
                match bindings.iter().rev().find(|(b, _)| b == name) {
                    Some((_, v)) => v.clone(),
                    None => item.value().field(name).clone(),
                }
            }
            Expr::Field { base, name } => base.eval_in(item, bindings).field(name).clone(),
            Expr::MetaId { alias: Some(a) } => item.meta(a).field("id").clone(),
            Expr::MetaId { alias: None } => Value::Missing,
            Expr::Compare { op, lhs, rhs } => {
                let l = lhs.eval_in(item, bindings);
                let r = rhs.eval_in(item, bindings);
                compare(*op, &l, &r)
            }
            Expr::Between { expr, low, high } => {
                let v = expr.eval_in(item, bindings);
                let lo = compare(CompareOp::Ge, &v, &low.eval_in(item, bindings));
                let hi = compare(CompareOp::Le, &v, &high.eval_in(item, bindings));
                and_all([lo, hi].iter())
            }
            Expr::In { expr, list } => {
                let v = expr.eval_in(item, bindings);
                if v.is_missing() {
                    return Value::Missing;
                }
                if v.is_null() {
                    return Value::Null;
                }
                let mut saw_null = false;
                for candidate in list {
                    let c = candidate.eval_in(item, bindings);
                    if c.is_null() {
                        saw_null = true;
                    } else if !c.is_missing() && c == v {
                        return Value::TRUE;
                    }
                }
                if saw_null {
                    Value::Null
                } else {
                    Value::FALSE
                }
            }
            Expr::Like { expr, pattern } => {
                let v = expr.eval_in(item, bindings);
                let p = pattern.eval_in(item, bindings);
                if v.is_missing() || p.is_missing() {
                    return Value::Missing;
                }
                let (Some(s), Some(p)) = (v.as_str(), p.as_str()) else {
                    return Value::Null;
                };
                match func_token::like_regex(p) {
                    Ok(re) => Value::Bool(re.is_match(s)),
                    Err(_) => Value::Null,
                }
            }
            Expr::Is { kind, expr } => {
                let v = expr.eval_in(item, bindings);
                match kind {
                    IsKind::Null if v.is_missing() => Value::Missing,
                    IsKind::Null => Value::Bool(v.is_null()),
                    IsKind::NotNull if v.is_missing() => Value::Missing,
                    IsKind::NotNull => Value::Bool(!v.is_null()),
                    IsKind::Missing => Value::Bool(v.is_missing()),
                    IsKind::NotMissing => Value::Bool(!v.is_missing()),
                    IsKind::Valued => Value::Bool(!v.is_unknown()),
                    IsKind::NotValued => Value::Bool(v.is_unknown()),
                }
            }
            Expr::And(children) => {
                let values: Vec<Value> = children.iter().map(|c| c.eval_in(item, bindings)).collect();
                and_all(values.iter())
            }
            Expr::Or(children) => {
                let mut state = Truth::False;
                for child in children {
                    match Truth::of(&child.eval_in(item, bindings)) {
                        Truth::True => return Value::TRUE,
                        Truth::Null => state = Truth::Null,
                        Truth::Missing if state == Truth::False => state = Truth::Missing,
                        _ => {}
                    }
                }
                state.into_value()
            }
            Expr::Not(child) => match Truth::of(&child.eval_in(item, bindings)) {
                Truth::True => Value::FALSE,
                Truth::False => Value::TRUE,
                other => other.into_value(),
            },
            Expr::Any {
                binding,
                source,
                satisfies,
            } => {
                let src = source.eval_in(item, bindings);
                let Some(elements) = src.as_array() else {
                    return if src.is_missing() {
                        Value::Missing
                    } else {
                        Value::Null
                    };
                };
                for element in elements {
                    bindings.push((binding.clone(), element.clone()));
                    let hit = satisfies.eval_in(item, bindings).truth();
                    bindings.pop();
                    if hit {
                        return Value::TRUE;
                    }
                }
                Value::FALSE
            }
            Expr::ArrayKey {
                distinct,
                mapping,
                binding,
                source,
            } => {
                let src = source.eval_in(item, bindings);
                let Some(elements) = src.as_array() else {
                    return Value::Missing;
                };
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    bindings.push((binding.clone(), element.clone()));
                    let mapped = mapping.eval_in(item, bindings);
                    bindings.pop();
                    if mapped.is_missing() {
                        continue;
                    }
                    if *distinct && out.contains(&mapped) {
                        continue;
                    }
                    out.push(mapped);
                }
                Value::Array(out)
            }
            Expr::Function { name, args } => {
                let args: Vec<Value> = args.iter().map(|a| a.eval_in(item, bindings)).collect();
                call(*name, &args)
            }
        }
    }
}

fn and_all<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut state = Truth::True;
    for value in values {
        match Truth::of(value) {
            Truth::False => return Value::FALSE,
            Truth::Missing => state = Truth::Missing,
            Truth::Null if state == Truth::True => state = Truth::Null,
            _ => {}
        }
    }
    state.into_value()
}

pub(crate) fn compare(op: CompareOp, l: &Value, r: &Value) -> Value {
    if l.is_missing() || r.is_missing() {
        return Value::Missing;
    }
    if l.is_null() || r.is_null() {
        return Value::Null;
    }
    let ord = l.collate(r);
    Value::Bool(match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
    })
}

fn call(name: FuncName, args: &[Value]) -> Value {
    match name {
        FuncName::Lower | FuncName::Upper => match args.first() {
            Some(Value::String(s)) if name == FuncName::Lower => Value::String(s.to_lowercase()),
            Some(Value::String(s)) => Value::String(s.to_uppercase()),
            Some(Value::Missing) | None => Value::Missing,
            Some(_) => Value::Null,
        },
        FuncName::Tokens => func_token::tokens(args),
        FuncName::ContainsToken => func_token::contains_token(args),
        FuncName::ContainsTokenLike => func_token::contains_token_like(args),
        FuncName::ContainsTokenRegexp => func_token::contains_token_regexp(args),
    }
}
