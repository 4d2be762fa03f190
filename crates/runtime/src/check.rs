//! Compiles a row-level `CHECK` clause's `ast::Expr` (carried on
//! `ast::CreateTableStmt::check_constraints`) into a
//! `quereus_core::CheckPredicate` the storage crate can call against a
//! candidate row without knowing anything about expression trees.
//!
//! A `CHECK` expression is evaluated against exactly one row with no
//! outer scope, so this is a smaller evaluator than `eval::eval`: column
//! references resolve by name directly against the table's column list
//! (there is no `AttrId`/`RowContext` machinery to stand up for a single
//! schema-time compilation step), and there is no parameter, aggregate,
//! window or subquery context to draw on.

use quereus_core::{CheckPredicate, ColumnDef, QuereusError, QuereusResult, Value};
use quereus_planner::ast::Expr;
use smol_str::SmolStr;

use crate::eval::{cast_value, eval_binary, eval_unary};

/// Compiles `expr` (one `CHECK` clause) into a predicate closing over a
/// column-name → index map built from `columns`. Returns `Misuse` if the
/// expression uses a construct a row-level check has no meaning for
/// (a bound parameter, a window/aggregate call, or a subquery).
pub fn compile_check(expr: &Expr, columns: &[ColumnDef]) -> QuereusResult<CheckPredicate> {
    let names: Vec<SmolStr> = columns.iter().map(|c| c.name.clone()).collect();
    validate_row_expr(expr, &names)?;
    let expr = expr.clone();
    let names = names.clone();
    Ok(CheckPredicate::new(move |row: &[Value]| {
        let value = eval_row_expr(&expr, row, &names)?;
        Ok(value.truthy().unwrap_or(true))
    }))
}

/// Walks `expr` once at compile time so a malformed `CHECK` clause fails
/// at `CREATE TABLE` rather than on the first row that happens to reach
/// the offending subexpression.
fn validate_row_expr(expr: &Expr, names: &[SmolStr]) -> QuereusResult<()> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Column { name, .. } => {
            if names.iter().any(|n| n == name) {
                Ok(())
            } else {
                Err(QuereusError::Resolution { message: format!("CHECK constraint references unknown column: {name}") })
            }
        }
        Expr::Parameter(_) => Err(QuereusError::Misuse { message: "CHECK constraints cannot reference bound parameters".into() }),
        Expr::Unary { operand, .. } => validate_row_expr(operand, names),
        Expr::Binary { left, right, .. } => {
            validate_row_expr(left, names)?;
            validate_row_expr(right, names)
        }
        Expr::Collate { expr, .. } => validate_row_expr(expr, names),
        Expr::Cast { expr, .. } => validate_row_expr(expr, names),
        Expr::Case { operand, whens, else_expr } => {
            if let Some(o) = operand {
                validate_row_expr(o, names)?;
            }
            for (when, then) in whens {
                validate_row_expr(when, names)?;
                validate_row_expr(then, names)?;
            }
            if let Some(e) = else_expr {
                validate_row_expr(e, names)?;
            }
            Ok(())
        }
        Expr::FunctionCall { over: Some(_), .. } => {
            Err(QuereusError::Misuse { message: "CHECK constraints cannot reference window functions".into() })
        }
        Expr::FunctionCall { name, args, filter, .. } => {
            if filter.is_some() {
                return Err(QuereusError::Misuse { message: "CHECK constraints cannot reference aggregate FILTER clauses".into() });
            }
            if crate::aggregate::AggregateRegistry::with_builtins().get(name).is_some() {
                return Err(QuereusError::Misuse { message: format!("CHECK constraints cannot reference aggregate function: {name}") });
            }
            for a in args {
                validate_row_expr(a, names)?;
            }
            Ok(())
        }
        Expr::In { expr, list, .. } => {
            validate_row_expr(expr, names)?;
            match list {
                quereus_planner::ast::InList::Exprs(exprs) => {
                    for e in exprs {
                        validate_row_expr(e, names)?;
                    }
                    Ok(())
                }
                quereus_planner::ast::InList::Subquery(_) => {
                    Err(QuereusError::Misuse { message: "CHECK constraints cannot reference subqueries".into() })
                }
            }
        }
        Expr::Exists { .. } | Expr::ScalarSubquery(_) => {
            Err(QuereusError::Misuse { message: "CHECK constraints cannot reference subqueries".into() })
        }
    }
}

fn eval_row_expr(expr: &Expr, row: &[Value], names: &[SmolStr]) -> QuereusResult<Value> {
    Ok(match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Column { name, .. } => {
            let idx = names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| QuereusError::Internal { message: format!("CHECK constraint column not found at evaluation time: {name}") })?;
            row[idx].clone()
        }
        Expr::Parameter(_) => return Err(QuereusError::internal("parameter reference reached CHECK evaluation")),
        Expr::Unary { op, operand } => eval_unary(*op, eval_row_expr(operand, row, names)?)?,
        Expr::Binary { op, left, right } => {
            let l = eval_row_expr(left, row, names)?;
            let r = eval_row_expr(right, row, names)?;
            eval_binary(*op, l, r)?
        }
        Expr::Collate { expr, .. } => eval_row_expr(expr, row, names)?,
        Expr::Cast { expr, ty } => cast_value(eval_row_expr(expr, row, names)?, *ty),
        Expr::Case { operand, whens, else_expr } => {
            let subject = operand.as_deref().map(|o| eval_row_expr(o, row, names)).transpose()?;
            let mut result = None;
            for (when, then) in whens {
                let matched = match &subject {
                    Some(s) => eval_row_expr(when, row, names)? == *s,
                    None => eval_row_expr(when, row, names)?.truthy().unwrap_or(false),
                };
                if matched {
                    result = Some(eval_row_expr(then, row, names)?);
                    break;
                }
            }
            match result {
                Some(v) => v,
                None => match else_expr {
                    Some(e) => eval_row_expr(e, row, names)?,
                    None => Value::Null,
                },
            }
        }
        Expr::FunctionCall { name, args, .. } => {
            let values: Vec<Value> = args.iter().map(|a| eval_row_expr(a, row, names)).collect::<QuereusResult<_>>()?;
            crate::scalar_functions::call(name, &values)?
        }
        Expr::In { expr, list, negated } => {
            let quereus_planner::ast::InList::Exprs(exprs) = list else {
                return Err(QuereusError::internal("IN (subquery) reached CHECK evaluation"));
            };
            let subject = eval_row_expr(expr, row, names)?;
            if subject.is_null() {
                Value::Null
            } else {
                let mut found = false;
                let mut saw_null = false;
                for e in exprs {
                    let v = eval_row_expr(e, row, names)?;
                    if v.is_null() {
                        saw_null = true;
                    } else if v.sql_compare(&subject) == std::cmp::Ordering::Equal {
                        found = true;
                        break;
                    }
                }
                match (found, saw_null) {
                    (true, _) => Value::Integer((!negated) as i64),
                    (false, true) => Value::Null,
                    (false, false) => Value::Integer(*negated as i64),
                }
            }
        }
        Expr::Exists { .. } | Expr::ScalarSubquery(_) => return Err(QuereusError::internal("subquery reached CHECK evaluation")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quereus_core::LogicalType;
    use quereus_planner::ast::BinaryOp;

    fn columns() -> Vec<ColumnDef> {
        vec![ColumnDef::new("id", LogicalType::Integer), ColumnDef::new("v", LogicalType::Text)]
    }

    #[test]
    fn compiles_and_evaluates_a_comparison() {
        let expr = Expr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(Expr::Column { qualifier: None, name: SmolStr::new("id") }),
            right: Box::new(Expr::Literal(Value::Integer(0))),
        };
        let predicate = compile_check(&expr, &columns()).unwrap();
        assert!(predicate.evaluate(&[Value::Integer(1), Value::from("a")]).unwrap());
        assert!(!predicate.evaluate(&[Value::Integer(-1), Value::from("a")]).unwrap());
    }

    #[test]
    fn rejects_unknown_column() {
        let expr = Expr::Column { qualifier: None, name: SmolStr::new("nope") };
        assert!(compile_check(&expr, &columns()).is_err());
    }

    #[test]
    fn null_result_is_treated_as_satisfied() {
        let expr = Expr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(Expr::Column { qualifier: None, name: SmolStr::new("id") }),
            right: Box::new(Expr::Literal(Value::Null)),
        };
        let predicate = compile_check(&expr, &columns()).unwrap();
        assert!(predicate.evaluate(&[Value::Integer(1), Value::from("a")]).unwrap());
    }
}
