//! Turns a plan tree into a lazily-pulled row stream. `emit` recurses one
//! `PlanNode` at a time, each call returning both the stream it built and
//! the attribute ids the stream publishes per row, so a parent operator
//! can build a `RowDescriptor` over its child's output without having to
//! re-derive it from the plan.
//!
//! Every operator here owns everything it closes over — no borrowed
//! lifetime threads through `RowStream` — which is what lets a `Box<dyn
//! Iterator>` work at all: a `Filter` above a `TableScan` can outlive the
//! `emit` call that built it only because its closure holds an owned
//! `ExecContext` clone, not a reference into one.

use std::collections::BTreeSet;
use std::sync::Arc;

use quereus_core::{AttrId, QuereusError, QuereusResult, Row, RowDescriptor, SortDirection, Value};
use quereus_planner::ast::{JoinKind, SetOp};
use quereus_planner::plan::{PlanNode, PlanRef, ScalarNode, ScalarRef};

use crate::aggregate::AggregateRegistry;
use crate::dml;
use crate::eval;
use crate::row_context::RowContext;

pub type RowStream = Box<dyn Iterator<Item = QuereusResult<Row>>>;

/// Parameters bound for one statement execution. Owned (not borrowed, as
/// `eval::Params` is) so it can be cheaply `Arc`-shared into every
/// closure `emit` builds.
#[derive(Default)]
pub struct BoundParams {
    pub positional: Vec<Value>,
    pub named: Vec<(String, Value)>,
}

impl BoundParams {
    pub fn empty() -> Self {
        Self::default()
    }

    fn as_eval_params(&self) -> eval::Params<'_> {
        eval::Params { positional: &self.positional, named: &self.named }
    }
}

/// Everything a node needs to evaluate scalar expressions and recurse
/// into its children. Cloning is cheap: `row_ctx` is `Rc`-based, the rest
/// `Arc`-based.
#[derive(Clone)]
pub struct ExecContext {
    pub row_ctx: RowContext,
    pub params: Arc<BoundParams>,
    pub aggregates: Arc<AggregateRegistry>,
}

impl ExecContext {
    pub fn new(params: Arc<BoundParams>, aggregates: Arc<AggregateRegistry>) -> Self {
        Self { row_ctx: RowContext::default(), params, aggregates }
    }
}

/// Evaluates `expr` against `ctx`'s current row context, first resolving
/// any nested `EXISTS`/`IN (subquery)`/scalar subquery by actually
/// running it — see `substitute_subqueries`.
pub fn eval_resolving_subqueries(expr: &ScalarRef, ctx: &ExecContext) -> QuereusResult<Value> {
    let resolved = substitute_subqueries(expr, ctx)?;
    eval::eval(&resolved, &ctx.row_ctx, &ctx.params.as_eval_params(), None)
}

fn contains_subquery(expr: &ScalarRef) -> bool {
    match &**expr {
        ScalarNode::Literal(_) | ScalarNode::ColumnReference(_) | ScalarNode::ParameterReference(_) => false,
        ScalarNode::UnaryOp { operand, .. } => contains_subquery(operand),
        ScalarNode::BinaryOp { left, right, .. } => contains_subquery(left) || contains_subquery(right),
        ScalarNode::Collate { expr, .. } | ScalarNode::Cast { expr, .. } => contains_subquery(expr),
        ScalarNode::Case { operand, whens, else_expr } => {
            operand.as_ref().is_some_and(contains_subquery)
                || whens.iter().any(|(w, t)| contains_subquery(w) || contains_subquery(t))
                || else_expr.as_ref().is_some_and(contains_subquery)
        }
        ScalarNode::ScalarFunctionCall { args, .. }
        | ScalarNode::AggregateFunctionCall { args, .. }
        | ScalarNode::WindowFunctionCall { args, .. } => args.iter().any(contains_subquery),
        ScalarNode::In { expr, list, .. } => contains_subquery(expr) || list.iter().any(contains_subquery),
        ScalarNode::InSubquery { .. } | ScalarNode::Exists { .. } | ScalarNode::ScalarSubquery { .. } => true,
    }
}

/// Rebuilds `expr`, replacing every `EXISTS`/`IN (subquery)`/scalar
/// subquery node with the `Literal` its execution produced. Subtrees with
/// no subquery are returned unchanged (an `Arc::clone`, not a rebuild).
fn substitute_subqueries(expr: &ScalarRef, ctx: &ExecContext) -> QuereusResult<ScalarRef> {
    if !contains_subquery(expr) {
        return Ok(expr.clone());
    }
    let rebuilt = match &**expr {
        ScalarNode::UnaryOp { op, operand } => ScalarNode::UnaryOp { op: *op, operand: substitute_subqueries(operand, ctx)? },
        ScalarNode::BinaryOp { op, left, right } => {
            ScalarNode::BinaryOp { op: *op, left: substitute_subqueries(left, ctx)?, right: substitute_subqueries(right, ctx)? }
        }
        ScalarNode::Collate { expr, collation } => {
            ScalarNode::Collate { expr: substitute_subqueries(expr, ctx)?, collation: collation.clone() }
        }
        ScalarNode::Cast { expr, ty } => ScalarNode::Cast { expr: substitute_subqueries(expr, ctx)?, ty: *ty },
        ScalarNode::Case { operand, whens, else_expr } => ScalarNode::Case {
            operand: operand.as_ref().map(|o| substitute_subqueries(o, ctx)).transpose()?,
            whens: whens
                .iter()
                .map(|(w, t)| Ok::<_, QuereusError>((substitute_subqueries(w, ctx)?, substitute_subqueries(t, ctx)?)))
                .collect::<QuereusResult<_>>()?,
            else_expr: else_expr.as_ref().map(|e| substitute_subqueries(e, ctx)).transpose()?,
        },
        ScalarNode::ScalarFunctionCall { name, args } => {
            ScalarNode::ScalarFunctionCall { name: name.clone(), args: substitute_args(args, ctx)? }
        }
        ScalarNode::AggregateFunctionCall { name, args, distinct, output } => {
            ScalarNode::AggregateFunctionCall { name: name.clone(), args: substitute_args(args, ctx)?, distinct: *distinct, output: *output }
        }
        ScalarNode::WindowFunctionCall { name, args, distinct, output } => {
            ScalarNode::WindowFunctionCall { name: name.clone(), args: substitute_args(args, ctx)?, distinct: *distinct, output: *output }
        }
        ScalarNode::In { expr, list, negated } => {
            ScalarNode::In { expr: substitute_subqueries(expr, ctx)?, list: substitute_args(list, ctx)?, negated: *negated }
        }
        ScalarNode::InSubquery { expr, subquery, negated } => {
            let needle = eval_resolving_subqueries(expr, ctx)?;
            let (stream, output_attrs) = emit(subquery.clone(), ctx.clone())?;
            let column = *output_attrs.first().ok_or_else(|| QuereusError::internal("IN (subquery) produced no columns"))?;
            let descriptor = RowDescriptor::from_attr_ids(&output_attrs);
            let mut found = false;
            let mut saw_null = needle.is_null();
            for row in stream {
                let row = row?;
                let guard = ctx.row_ctx.push(descriptor.clone(), row);
                let candidate = ctx.row_ctx.resolve(column)?;
                drop(guard);
                if candidate.is_null() {
                    saw_null = true;
                } else if candidate == needle {
                    found = true;
                    break;
                }
            }
            let value = match (found, saw_null) {
                (true, _) => Value::Integer(if *negated { 0 } else { 1 }),
                (false, true) => Value::Null,
                (false, false) => Value::Integer(if *negated { 1 } else { 0 }),
            };
            ScalarNode::Literal(value)
        }
        ScalarNode::Exists { subquery, negated } => {
            let (mut stream, _output_attrs) = emit(subquery.clone(), ctx.clone())?;
            let has_row = match stream.next() {
                Some(Ok(_)) => true,
                Some(Err(e)) => return Err(e),
                None => false,
            };
            ScalarNode::Literal(Value::Integer((has_row != *negated) as i64))
        }
        ScalarNode::ScalarSubquery { subquery } => {
            let (mut stream, _output_attrs) = emit(subquery.clone(), ctx.clone())?;
            let value = match stream.next() {
                Some(Ok(row)) => row.get(0).cloned().unwrap_or(Value::Null),
                Some(Err(e)) => return Err(e),
                None => Value::Null,
            };
            ScalarNode::Literal(value)
        }
        ScalarNode::Literal(_) | ScalarNode::ColumnReference(_) | ScalarNode::ParameterReference(_) => {
            unreachable!("contains_subquery returned false for this shape above")
        }
    };
    Ok(Arc::new(rebuilt))
}

fn substitute_args(args: &[ScalarRef], ctx: &ExecContext) -> QuereusResult<Vec<ScalarRef>> {
    args.iter().map(|a| substitute_subqueries(a, ctx)).collect()
}

pub(crate) fn compare_keys(a: &[Value], b: &[Value], directions: &[SortDirection]) -> std::cmp::Ordering {
    for (i, dir) in directions.iter().enumerate() {
        let ord = a[i].sql_compare(&b[i]);
        let ord = if *dir == SortDirection::Descending { ord.reverse() } else { ord };
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

/// Wraps `input` so only rows where `predicate` is truthy pass through.
/// Shared by `Filter` and `VerifyConstraints`, which differ only in where
/// the optimizer puts them in the tree, not in evaluation semantics.
fn filter_stream(input: RowStream, input_attrs: &[AttrId], predicate: ScalarRef, ctx: &ExecContext) -> RowStream {
    let descriptor = RowDescriptor::from_attr_ids(input_attrs);
    let ctx = ctx.clone();
    Box::new(input.filter_map(move |row| {
        let row = match row {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        let guard = ctx.row_ctx.push(descriptor.clone(), row.clone());
        let keep = eval_resolving_subqueries(&predicate, &ctx);
        drop(guard);
        match keep {
            Ok(v) => if v.truthy() == Some(true) { Some(Ok(row)) } else { None },
            Err(e) => Some(Err(e)),
        }
    }))
}

/// Builds the row stream `plan` describes and the attribute ids it
/// publishes per row, recursing into every child plan. Any scalar
/// expression anywhere in `plan` may itself embed a correlated subquery;
/// those are resolved lazily, on the row they're evaluated against, via
/// `eval_resolving_subqueries`.
pub fn emit(plan: PlanRef, ctx: ExecContext) -> QuereusResult<(RowStream, Vec<AttrId>)> {
    match &*plan {
        PlanNode::TableScan { table, output, filter, .. } => {
            let mut cursor = table.open_cursor()?;
            let (idx_num, idx_str, args) = match filter {
                Some(f) => {
                    let values = f.args.iter().map(|a| eval_resolving_subqueries(a, &ctx)).collect::<QuereusResult<Vec<_>>>()?;
                    (f.idx_num, f.idx_str.clone(), values)
                }
                None => (0, None, Vec::new()),
            };
            let best_index_plan = quereus_vtab::best_index::BestIndexPlan {
                idx_num,
                idx_str: idx_str.clone(),
                constraint_usage: Vec::new(),
                estimated_cost: 0.0,
                estimated_rows: 0,
                order_by_consumed: false,
            };
            cursor.filter(idx_num, idx_str.as_deref(), &args, &best_index_plan)?;
            let iter = TableScanIter { cursor, n_cols: output.len() };
            Ok((Box::new(iter), output.clone()))
        }
        PlanNode::TableFunctionCall { name, .. } => {
            Err(QuereusError::Resolution { message: format!("no such table function: {name}") })
        }
        PlanNode::Values { rows, output } => {
            let ctx2 = ctx.clone();
            let rows: Vec<QuereusResult<Row>> = rows
                .iter()
                .map(|row| row.iter().map(|e| eval_resolving_subqueries(e, &ctx2)).collect::<QuereusResult<Vec<_>>>().map(Row::new))
                .collect();
            Ok((Box::new(rows.into_iter()), output.clone()))
        }
        PlanNode::SingleRow => Ok((Box::new(std::iter::once(Ok(Row::new(Vec::new())))), Vec::new())),
        PlanNode::Filter { input, predicate } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            let stream = filter_stream(input_stream, &input_attrs, predicate.clone(), &ctx);
            Ok((stream, input_attrs))
        }
        PlanNode::VerifyConstraints { input, residual } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            let stream = filter_stream(input_stream, &input_attrs, residual.clone(), &ctx);
            Ok((stream, input_attrs))
        }
        PlanNode::Project { input, columns } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            let descriptor = RowDescriptor::from_attr_ids(&input_attrs);
            let columns = columns.clone();
            let output_attrs: Vec<AttrId> = columns.iter().map(|(_, a)| *a).collect();
            let ctx2 = ctx.clone();
            let iter = input_stream.map(move |row| {
                let row = row?;
                let guard = ctx2.row_ctx.push(descriptor.clone(), row);
                let values = columns.iter().map(|(expr, _)| eval_resolving_subqueries(expr, &ctx2)).collect::<QuereusResult<Vec<_>>>();
                drop(guard);
                values.map(Row::new)
            });
            Ok((Box::new(iter), output_attrs))
        }
        PlanNode::Distinct { input } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            let mut seen = BTreeSet::new();
            let mut out = Vec::new();
            for row in input_stream {
                let row = row?;
                if seen.insert(row.values().to_vec()) {
                    out.push(Ok(row));
                }
            }
            Ok((Box::new(out.into_iter()), input_attrs))
        }
        PlanNode::Sort { input, keys } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            let descriptor = RowDescriptor::from_attr_ids(&input_attrs);
            let mut rows = Vec::new();
            for row in input_stream {
                let row = row?;
                let guard = ctx.row_ctx.push(descriptor.clone(), row.clone());
                let key: Vec<Value> = keys.iter().map(|(e, _)| eval_resolving_subqueries(e, &ctx)).collect::<QuereusResult<_>>()?;
                drop(guard);
                rows.push((key, row));
            }
            let directions: Vec<SortDirection> = keys.iter().map(|(_, d)| *d).collect();
            rows.sort_by(|a, b| compare_keys(&a.0, &b.0, &directions));
            Ok((Box::new(rows.into_iter().map(|(_, r)| Ok(r))), input_attrs))
        }
        PlanNode::Aggregate { input, group_by, group_attrs, aggregates, having } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            crate::aggregate::run_aggregate(input_stream, input_attrs, group_by, group_attrs, aggregates, having.as_ref(), &ctx)
        }
        PlanNode::Window { input, functions } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            crate::window::run_window(input_stream, input_attrs, functions, &ctx)
        }
        PlanNode::LimitOffset { input, limit, offset } => {
            let (input_stream, input_attrs) = emit(input.clone(), ctx.clone())?;
            let offset_n = match offset {
                Some(e) => eval_resolving_subqueries(e, &ctx)?.as_integer().unwrap_or(0).max(0) as usize,
                None => 0,
            };
            let stream: RowStream = match limit {
                Some(e) => {
                    let n = eval_resolving_subqueries(e, &ctx)?.as_integer().unwrap_or(0).max(0) as usize;
                    Box::new(input_stream.skip(offset_n).take(n))
                }
                None => Box::new(input_stream.skip(offset_n)),
            };
            Ok((stream, input_attrs))
        }
        PlanNode::Join { left, right, kind, condition } => emit_join(left.clone(), right.clone(), *kind, condition.clone(), ctx),
        PlanNode::SetOperation { op, left, right } => emit_set_operation(*op, left.clone(), right.clone(), ctx),
        PlanNode::CteReference { plan, output, .. } => {
            let (stream, _inner_attrs) = emit(plan.clone(), ctx)?;
            Ok((stream, output.clone()))
        }
        PlanNode::Insert { table, schema, source, column_mapping, on_conflict } => {
            let affected = dml::run_insert(table, schema, source.clone(), column_mapping, *on_conflict, &ctx)?;
            Ok((Box::new(std::iter::once(Ok(Row::new(vec![Value::Integer(affected as i64)])))), Vec::new()))
        }
        PlanNode::Update { table, schema, source, assignments, on_conflict } => {
            let affected = dml::run_update(table, schema, source.clone(), assignments, *on_conflict, &ctx)?;
            Ok((Box::new(std::iter::once(Ok(Row::new(vec![Value::Integer(affected as i64)])))), Vec::new()))
        }
        PlanNode::Delete { table, schema, source } => {
            let affected = dml::run_delete(table, schema, source.clone(), &ctx)?;
            Ok((Box::new(std::iter::once(Ok(Row::new(vec![Value::Integer(affected as i64)])))), Vec::new()))
        }
    }
}

struct TableScanIter {
    cursor: Box<dyn quereus_vtab::Cursor>,
    n_cols: usize,
}

impl Iterator for TableScanIter {
    type Item = QuereusResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.eof() {
            return None;
        }
        let row = (0..self.n_cols).map(|i| self.cursor.column(i)).collect::<QuereusResult<Vec<_>>>().map(Row::new);
        if let Err(e) = self.cursor.next() {
            return Some(Err(e));
        }
        Some(row)
    }
}

impl Drop for TableScanIter {
    fn drop(&mut self) {
        let _ = self.cursor.close();
    }
}

fn emit_join(left: PlanRef, right: PlanRef, kind: JoinKind, condition: Option<ScalarRef>, ctx: ExecContext) -> QuereusResult<(RowStream, Vec<AttrId>)> {
    let (left_stream, left_attrs) = emit(left, ctx.clone())?;
    let (right_stream, right_attrs) = emit(right, ctx.clone())?;
    let right_rows: Vec<Row> = right_stream.collect::<QuereusResult<Vec<_>>>()?;
    let right_len = right_rows.len();
    let right_null = Row::new(vec![Value::Null; right_attrs.len()]);
    let output_attrs: Vec<AttrId> = left_attrs.iter().chain(right_attrs.iter()).copied().collect();
    let descriptor = RowDescriptor::from_attr_ids(&output_attrs);

    let mut left_iter = left_stream;
    let mut current_left: Option<Row> = None;
    let mut right_idx = 0usize;
    let mut current_left_matched = false;
    let iter = std::iter::from_fn(move || loop {
        if current_left.is_none() {
            match left_iter.next() {
                Some(Ok(row)) => {
                    current_left = Some(row);
                    right_idx = 0;
                    current_left_matched = false;
                }
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
        let left_row = current_left.clone().expect("just populated above");
        if right_idx >= right_len {
            let emit_unmatched = kind == JoinKind::Left && !current_left_matched;
            current_left = None;
            if emit_unmatched {
                let combined = Row::new(left_row.values().iter().chain(right_null.values()).cloned().collect());
                return Some(Ok(combined));
            }
            continue;
        }
        let right_row = right_rows[right_idx].clone();
        right_idx += 1;
        let combined = Row::new(left_row.values().iter().chain(right_row.values()).cloned().collect());
        let keep = match &condition {
            None => true,
            Some(predicate) => {
                let guard = ctx.row_ctx.push(descriptor.clone(), combined.clone());
                let result = eval_resolving_subqueries(predicate, &ctx);
                drop(guard);
                match result {
                    Ok(v) => v.truthy() == Some(true),
                    Err(e) => return Some(Err(e)),
                }
            }
        };
        if keep {
            current_left_matched = true;
            return Some(Ok(combined));
        }
    });
    Ok((Box::new(iter), output_attrs))
}

fn emit_set_operation(op: SetOp, left: PlanRef, right: PlanRef, ctx: ExecContext) -> QuereusResult<(RowStream, Vec<AttrId>)> {
    let (left_stream, left_attrs) = emit(left, ctx.clone())?;
    let (right_stream, _right_attrs) = emit(right, ctx)?;
    let stream: RowStream = match op {
        SetOp::UnionAll => Box::new(left_stream.chain(right_stream)),
        SetOp::Union => {
            let mut seen = BTreeSet::new();
            let mut out = Vec::new();
            for row in left_stream.chain(right_stream) {
                let row = row?;
                if seen.insert(row.values().to_vec()) {
                    out.push(Ok(row));
                }
            }
            Box::new(out.into_iter())
        }
        SetOp::Intersect => {
            let left_rows: Vec<Row> = left_stream.collect::<QuereusResult<_>>()?;
            let right_keys: BTreeSet<Vec<Value>> = right_stream.map(|r| r.map(|row| row.values().to_vec())).collect::<QuereusResult<_>>()?;
            let mut seen = BTreeSet::new();
            let mut out = Vec::new();
            for row in left_rows {
                let key = row.values().to_vec();
                if right_keys.contains(&key) && seen.insert(key) {
                    out.push(Ok(row));
                }
            }
            Box::new(out.into_iter())
        }
        SetOp::Except => {
            let left_rows: Vec<Row> = left_stream.collect::<QuereusResult<_>>()?;
            let right_keys: BTreeSet<Vec<Value>> = right_stream.map(|r| r.map(|row| row.values().to_vec())).collect::<QuereusResult<_>>()?;
            let mut seen = BTreeSet::new();
            let mut out = Vec::new();
            for row in left_rows {
                let key = row.values().to_vec();
                if !right_keys.contains(&key) && seen.insert(key) {
                    out.push(Ok(row));
                }
            }
            Box::new(out.into_iter())
        }
    };
    Ok((stream, left_attrs))
}
