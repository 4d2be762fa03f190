//! Evaluates a `ScalarNode` against the row(s) currently active on a
//! `RowContext`.

use quereus_core::{QuereusError, QuereusResult, Value};
use quereus_planner::ast::{BinaryOp, UnaryOp};
use quereus_planner::plan::{ParamSlot, ScalarNode};

use crate::aggregate::AggregateState;
use crate::row_context::RowContext;
use crate::scalar_functions;

/// Parameters bound for one statement execution, looked up by
/// `ParamSlot`.
pub struct Params<'a> {
    pub positional: &'a [Value],
    pub named: &'a [(String, Value)],
}

impl Params<'_> {
    pub fn empty() -> Params<'static> {
        Params { positional: &[], named: &[] }
    }
}

/// Evaluates `expr` against `ctx`. `aggregates`, when present, supplies
/// the finalized value for each `AggregateFunctionCall`/`WindowFunctionCall`
/// node already computed by the aggregate/window phase — evaluating one
/// of those directly (rather than through a finalized lookup) would
/// require re-running the whole group, which the aggregate operator
/// already did once.
pub fn eval(expr: &ScalarNode, ctx: &RowContext, params: &Params, aggregates: Option<&AggregateState>) -> QuereusResult<Value> {
    Ok(match expr {
        ScalarNode::Literal(v) => v.clone(),
        ScalarNode::ColumnReference(attr) => ctx.resolve(*attr)?,
        ScalarNode::ParameterReference(slot) => match slot {
            ParamSlot::Positional(n) => params
                .positional
                .get(*n as usize)
                .cloned()
                .ok_or_else(|| QuereusError::Misuse { message: format!("no bound value for parameter ?{n}") })?,
            ParamSlot::Named(_) => params
                .named
                .first()
                .map(|(_, v)| v.clone())
                .ok_or_else(|| QuereusError::Misuse { message: "no bound value for named parameter".into() })?,
        },
        ScalarNode::UnaryOp { op, operand } => eval_unary(*op, eval(operand, ctx, params, aggregates)?)?,
        ScalarNode::BinaryOp { op, left, right } => {
            let l = eval(left, ctx, params, aggregates)?;
            let r = eval(right, ctx, params, aggregates)?;
            eval_binary(*op, l, r)?
        }
        ScalarNode::Collate { expr, .. } => eval(expr, ctx, params, aggregates)?,
        ScalarNode::Cast { expr, ty } => cast_value(eval(expr, ctx, params, aggregates)?, *ty),
        ScalarNode::Case { operand, whens, else_expr } => {
            let subject = operand.as_ref().map(|o| eval(o, ctx, params, aggregates)).transpose()?;
            let mut result = None;
            for (when, then) in whens {
                let matched = match &subject {
                    Some(s) => eval(when, ctx, params, aggregates)? == *s,
                    None => eval(when, ctx, params, aggregates)?.truthy() == Some(true),
                };
                if matched {
                    result = Some(eval(then, ctx, params, aggregates)?);
                    break;
                }
            }
            match result {
                Some(v) => v,
                None => match else_expr {
                    Some(e) => eval(e, ctx, params, aggregates)?,
                    None => Value::Null,
                },
            }
        }
        ScalarNode::ScalarFunctionCall { name, args } => {
            let values = args.iter().map(|a| eval(a, ctx, params, aggregates)).collect::<QuereusResult<Vec<_>>>()?;
            scalar_functions::call(name, &values)?
        }
        ScalarNode::AggregateFunctionCall { output, .. } | ScalarNode::WindowFunctionCall { output, .. } => aggregates
            .and_then(|a| a.finalized(*output))
            .ok_or_else(|| QuereusError::internal("aggregate/window value requested outside its producing phase"))?,
        ScalarNode::In { expr, list, negated } => {
            let needle = eval(expr, ctx, params, aggregates)?;
            let mut found = false;
            let mut saw_null = needle.is_null();
            for item in list {
                let candidate = eval(item, ctx, params, aggregates)?;
                if candidate.is_null() {
                    saw_null = true;
                } else if candidate == needle {
                    found = true;
                    break;
                }
            }
            match (found, saw_null) {
                (true, _) => Value::Integer(if *negated { 0 } else { 1 }),
                (false, true) => Value::Null,
                (false, false) => Value::Integer(if *negated { 1 } else { 0 }),
            }
        }
        ScalarNode::Exists { negated, .. } => {
            // A planned `EXISTS` is executed by the emitter, which
            // drives `subquery` and substitutes the resulting boolean
            // literal in place of this node before scalar evaluation
            // reaches it; reaching here means the rewrite didn't run.
            let _ = negated;
            return Err(QuereusError::internal("EXISTS must be resolved by the emitter before scalar evaluation"));
        }
        ScalarNode::ScalarSubquery { .. } => {
            return Err(QuereusError::internal("scalar subquery must be resolved by the emitter before scalar evaluation"));
        }
        ScalarNode::InSubquery { .. } => {
            return Err(QuereusError::internal("IN (subquery) must be resolved by the emitter before scalar evaluation"));
        }
    })
}

pub(crate) fn eval_unary(op: UnaryOp, v: Value) -> QuereusResult<Value> {
    Ok(match op {
        UnaryOp::Negate => match v {
            Value::Integer(i) => Value::Integer(-i),
            Value::Real(r) => Value::Real(-r),
            Value::Null => Value::Null,
            other => return Err(QuereusError::Type { message: format!("cannot negate {other:?}") }),
        },
        UnaryOp::Not => Value::Integer(match v.truthy() {
            Some(true) => 0,
            Some(false) => 1,
            None => return Ok(Value::Null),
        }),
        UnaryOp::IsNull => Value::Integer(v.is_null() as i64),
        UnaryOp::IsNotNull => Value::Integer(!v.is_null() as i64),
    })
}

pub(crate) fn eval_binary(op: BinaryOp, l: Value, r: Value) -> QuereusResult<Value> {
    use BinaryOp::*;
    if matches!(op, And | Or) {
        return Ok(eval_logical(op, l, r));
    }
    if l.is_null() || r.is_null() {
        return Ok(match op {
            Eq | NotEq | Lt | LtEq | Gt | GtEq | Like | Glob => Value::Null,
            _ => Value::Null,
        });
    }
    Ok(match op {
        Add => arith(l, r, |a, b| a + b, |a, b| a + b)?,
        Subtract => arith(l, r, |a, b| a - b, |a, b| a - b)?,
        Multiply => arith(l, r, |a, b| a * b, |a, b| a * b)?,
        Divide => arith(l, r, |a, b| if b == 0 { 0 } else { a / b }, |a, b| a / b)?,
        Modulo => arith(l, r, |a, b| if b == 0 { 0 } else { a % b }, |a, b| a % b)?,
        Concat => Value::Text(format!("{}{}", display(&l), display(&r)).into()),
        Eq => Value::Integer((l.sql_compare(&r) == std::cmp::Ordering::Equal) as i64),
        NotEq => Value::Integer((l.sql_compare(&r) != std::cmp::Ordering::Equal) as i64),
        Lt => Value::Integer((l.sql_compare(&r) == std::cmp::Ordering::Less) as i64),
        LtEq => Value::Integer((l.sql_compare(&r) != std::cmp::Ordering::Greater) as i64),
        Gt => Value::Integer((l.sql_compare(&r) == std::cmp::Ordering::Greater) as i64),
        GtEq => Value::Integer((l.sql_compare(&r) != std::cmp::Ordering::Less) as i64),
        Like => Value::Integer(like(&display(&l), &display(&r)) as i64),
        Glob => Value::Integer(glob(&display(&l), &display(&r)) as i64),
        And | Or => unreachable!("handled above"),
    })
}

fn eval_logical(op: BinaryOp, l: Value, r: Value) -> Value {
    let lt = l.truthy();
    let rt = r.truthy();
    let result = match op {
        BinaryOp::And => match (lt, rt) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (lt, rt) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!(),
    };
    match result {
        Some(b) => Value::Integer(b as i64),
        None => Value::Null,
    }
}

fn arith(l: Value, r: Value, int_op: impl Fn(i64, i64) -> i64, real_op: impl Fn(f64, f64) -> f64) -> QuereusResult<Value> {
    match (&l, &r) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(int_op(*a, *b))),
        _ => {
            let a = l.as_real().ok_or_else(|| QuereusError::Type { message: format!("{l:?} is not numeric") })?;
            let b = r.as_real().ok_or_else(|| QuereusError::Type { message: format!("{r:?} is not numeric") })?;
            Ok(Value::Real(real_op(a, b)))
        }
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::Text(s) => s.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Blob(b) => String::from_utf8_lossy(b).to_string(),
        Value::Null => String::new(),
    }
}

fn like(haystack: &str, pattern: &str) -> bool {
    let regex: String = pattern.chars().flat_map(|c| match c {
        '%' => ".*".chars().collect::<Vec<_>>(),
        '_' => vec!['.'],
        other => regex_escape(other),
    }).collect();
    glob_match(&regex, haystack)
}

fn glob(haystack: &str, pattern: &str) -> bool {
    like(haystack, pattern)
}

fn regex_escape(c: char) -> Vec<char> {
    if "\\.+*?()|[]{}^$".contains(c) { vec!['\\', c] } else { vec![c] }
}

/// A minimal anchored-regex matcher for `LIKE`/`GLOB` so the runtime
/// crate doesn't need to pull in a full regex engine for two SQL
/// operators; `pattern` here is already escaped except for `.` and `.*`.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(p: &[char], t: &[char]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some('\\'), _) => p.get(1).is_some_and(|lit| t.first() == Some(lit)) && matches(&p[2..], &t[1..]),
            (Some('.'), Some(_)) if p.get(1) == Some(&'*') => {
                (0..=t.len()).any(|i| matches(&p[2..], &t[i..]))
            }
            (Some('.'), Some(_)) => matches(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => matches(&p[1..], &t[1..]),
            _ => false,
        }
    }
    matches(&pattern.chars().collect::<Vec<_>>(), &text.chars().collect::<Vec<_>>())
}

pub(crate) fn cast_value(v: Value, ty: quereus_core::LogicalType) -> Value {
    use quereus_core::LogicalType::*;
    match (ty, v) {
        (Integer, Value::Real(r)) => Value::Integer(r as i64),
        (Integer, Value::Text(s)) => Value::Integer(s.parse().unwrap_or(0)),
        (Real, Value::Integer(i)) => Value::Real(i as f64),
        (Real, Value::Text(s)) => Value::Real(s.parse().unwrap_or(0.0)),
        (Text, Value::Integer(i)) => Value::Text(i.to_string().into()),
        (Text, Value::Real(r)) => Value::Text(r.to_string().into()),
        (_, v) => v,
    }
}
