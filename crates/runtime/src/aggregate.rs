//! The aggregate engine (C9): a per-name registry of step/finalize/
//! initial-value factories, plus the grouping operator that drives them
//! over an `Aggregate` plan node's input.
//!
//! The factory/schema split mirrors the virtual-table module/table split
//! in `quereus-vtab`: one `AggregateFactory` is registered per function
//! name and shared across every group, while `create()` hands back a
//! fresh logic object whose `initial_value`/`step`/`finalize` methods
//! operate on an accumulator `Row` the grouping operator owns — never
//! shared across groups, so two groups of the same query never see each
//! other's running total.

use std::collections::BTreeMap;
use std::sync::Arc;

use quereus_core::{AttrId, QuereusError, QuereusResult, Row, Value};
use quereus_helpers::IndexMap;
use quereus_planner::plan::{ScalarNode, ScalarRef};

use crate::emit::{eval_resolving_subqueries, ExecContext};

/// Finalized values for the aggregate/window calls an outer scalar
/// expression may reference by attribute. `eval::eval` checks this before
/// falling through to an error; in this runtime every `AggregateFunctionCall`/
/// `WindowFunctionCall` the builder emits is rewritten to a plain
/// `ColumnReference` before it ever reaches `eval` (see
/// `build_scalar_agg`), so no caller in this crate ever actually
/// constructs a populated one — it exists so `eval`'s signature doesn't
/// need to change if a future caller builds a plan by hand without going
/// through the bindings-substitution builder path.
#[derive(Default)]
pub struct AggregateState(BTreeMap<AttrId, Value>);

impl AggregateState {
    pub fn finalized(&self, attr: AttrId) -> Option<Value> {
        self.0.get(&attr).cloned()
    }
}

/// One aggregate function's logic, created fresh per group by its
/// `AggregateFactory`. `Row` is used as a generic accumulator container
/// rather than a dedicated type since every built-in's running state
/// (a running sum, a running count, a concatenation buffer) fits in a
/// handful of `Value`s.
pub trait AggregateSchema {
    fn initial_value(&self) -> Row;
    fn step(&self, accumulator: Row, args: &[Value]) -> QuereusResult<Row>;
    fn finalize(&self, accumulator: Row) -> QuereusResult<Value>;
}

pub trait AggregateFactory: Send + Sync {
    fn create(&self) -> Box<dyn AggregateSchema>;
}

#[derive(Default)]
pub struct AggregateRegistry {
    factories: IndexMap<String, Arc<dyn AggregateFactory>>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with `count`, `sum`, `avg`, `min`, `max`
    /// and `group_concat` — the names `quereus-planner`'s builder
    /// recognizes as aggregates outside a window (`AGGREGATE_NAMES`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("count", Arc::new(CountFactory));
        registry.register("sum", Arc::new(SumFactory));
        registry.register("avg", Arc::new(AvgFactory));
        registry.register("min", Arc::new(MinMaxFactory { want_min: true }));
        registry.register("max", Arc::new(MinMaxFactory { want_min: false }));
        registry.register("group_concat", Arc::new(GroupConcatFactory));
        registry
    }

    pub fn register(&mut self, name: &str, factory: Arc<dyn AggregateFactory>) {
        self.factories.insert(name.to_ascii_lowercase(), factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AggregateFactory>> {
        self.factories.get(&name.to_ascii_lowercase()).cloned()
    }
}

struct CountFactory;
impl AggregateFactory for CountFactory {
    fn create(&self) -> Box<dyn AggregateSchema> {
        Box::new(Count)
    }
}
struct Count;
impl AggregateSchema for Count {
    fn initial_value(&self) -> Row {
        Row::from(vec![Value::Integer(0)])
    }
    fn step(&self, accumulator: Row, args: &[Value]) -> QuereusResult<Row> {
        // `COUNT(*)` arrives with no arguments and always counts; `COUNT(x)`
        // skips rows where `x` is NULL.
        let counts = args.is_empty() || args.iter().all(|a| !a.is_null());
        let n = accumulator.get(0).and_then(Value::as_integer).unwrap_or(0);
        Ok(Row::from(vec![Value::Integer(if counts { n + 1 } else { n })]))
    }
    fn finalize(&self, accumulator: Row) -> QuereusResult<Value> {
        Ok(accumulator.get(0).cloned().unwrap_or(Value::Integer(0)))
    }
}

struct SumFactory;
impl AggregateFactory for SumFactory {
    fn create(&self) -> Box<dyn AggregateSchema> {
        Box::new(Sum)
    }
}
struct Sum;
impl AggregateSchema for Sum {
    fn initial_value(&self) -> Row {
        Row::from(vec![Value::Null])
    }
    fn step(&self, accumulator: Row, args: &[Value]) -> QuereusResult<Row> {
        let Some(arg) = args.first() else {
            return Err(QuereusError::Misuse { message: "sum() requires one argument".into() });
        };
        if arg.is_null() {
            return Ok(accumulator);
        }
        let running = accumulator.get(0).cloned().unwrap_or(Value::Null);
        let added = match (running, arg) {
            (Value::Null, v) => v.clone(),
            (Value::Integer(a), Value::Integer(b)) => Value::Integer(a + b),
            (running, v) => {
                let a = running.as_real().ok_or_else(|| QuereusError::Type { message: "sum() over non-numeric value".into() })?;
                let b = v.as_real().ok_or_else(|| QuereusError::Type { message: "sum() over non-numeric value".into() })?;
                Value::Real(a + b)
            }
        };
        Ok(Row::from(vec![added]))
    }
    fn finalize(&self, accumulator: Row) -> QuereusResult<Value> {
        Ok(accumulator.get(0).cloned().unwrap_or(Value::Null))
    }
}

struct AvgFactory;
impl AggregateFactory for AvgFactory {
    fn create(&self) -> Box<dyn AggregateSchema> {
        Box::new(Avg)
    }
}
struct Avg;
impl AggregateSchema for Avg {
    fn initial_value(&self) -> Row {
        Row::from(vec![Value::Real(0.0), Value::Integer(0)])
    }
    fn step(&self, accumulator: Row, args: &[Value]) -> QuereusResult<Row> {
        let Some(arg) = args.first() else {
            return Err(QuereusError::Misuse { message: "avg() requires one argument".into() });
        };
        if arg.is_null() {
            return Ok(accumulator);
        }
        let v = arg.as_real().ok_or_else(|| QuereusError::Type { message: "avg() over non-numeric value".into() })?;
        let running_sum = accumulator.get(0).and_then(Value::as_real).unwrap_or(0.0);
        let running_count = accumulator.get(1).and_then(Value::as_integer).unwrap_or(0);
        Ok(Row::from(vec![Value::Real(running_sum + v), Value::Integer(running_count + 1)]))
    }
    fn finalize(&self, accumulator: Row) -> QuereusResult<Value> {
        let sum = accumulator.get(0).and_then(Value::as_real).unwrap_or(0.0);
        let count = accumulator.get(1).and_then(Value::as_integer).unwrap_or(0);
        Ok(if count == 0 { Value::Null } else { Value::Real(sum / count as f64) })
    }
}

struct MinMaxFactory {
    want_min: bool,
}
impl AggregateFactory for MinMaxFactory {
    fn create(&self) -> Box<dyn AggregateSchema> {
        Box::new(MinMax { want_min: self.want_min })
    }
}
struct MinMax {
    want_min: bool,
}
impl AggregateSchema for MinMax {
    fn initial_value(&self) -> Row {
        Row::from(vec![Value::Null])
    }
    fn step(&self, accumulator: Row, args: &[Value]) -> QuereusResult<Row> {
        let Some(arg) = args.first() else {
            return Err(QuereusError::Misuse { message: "min()/max() requires one argument".into() });
        };
        if arg.is_null() {
            return Ok(accumulator);
        }
        let running = accumulator.get(0).cloned().unwrap_or(Value::Null);
        let keep = if running.is_null() {
            arg.clone()
        } else if self.want_min {
            if arg.sql_compare(&running) == std::cmp::Ordering::Less { arg.clone() } else { running }
        } else if arg.sql_compare(&running) == std::cmp::Ordering::Greater {
            arg.clone()
        } else {
            running
        };
        Ok(Row::from(vec![keep]))
    }
    fn finalize(&self, accumulator: Row) -> QuereusResult<Value> {
        Ok(accumulator.get(0).cloned().unwrap_or(Value::Null))
    }
}

struct GroupConcatFactory;
impl AggregateFactory for GroupConcatFactory {
    fn create(&self) -> Box<dyn AggregateSchema> {
        Box::new(GroupConcat)
    }
}
struct GroupConcat;
impl AggregateSchema for GroupConcat {
    fn initial_value(&self) -> Row {
        Row::from(vec![Value::Null])
    }
    fn step(&self, accumulator: Row, args: &[Value]) -> QuereusResult<Row> {
        let Some(arg) = args.first() else {
            return Err(QuereusError::Misuse { message: "group_concat() requires one argument".into() });
        };
        if arg.is_null() {
            return Ok(accumulator);
        }
        let separator = args.get(1).and_then(Value::as_text).unwrap_or(",");
        let piece = display(arg);
        let joined = match accumulator.get(0) {
            Some(Value::Text(existing)) => format!("{existing}{separator}{piece}"),
            _ => piece,
        };
        Ok(Row::from(vec![Value::from(joined)]))
    }
    fn finalize(&self, accumulator: Row) -> QuereusResult<Value> {
        Ok(accumulator.get(0).cloned().unwrap_or(Value::Null))
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

struct GroupState {
    representative: Row,
    /// False only for the implicit empty-`GROUP BY` group seeded before any
    /// row has arrived; `representative` is a placeholder until the first
    /// real row overwrites it.
    representative_seen: bool,
    accumulators: Vec<Row>,
    distinct_seen: Vec<Option<std::collections::BTreeSet<Vec<Value>>>>,
}

fn fresh_group_state(calls: &[AggCall], ctx: &ExecContext, representative: Row) -> QuereusResult<GroupState> {
    let mut accumulators = Vec::with_capacity(calls.len());
    let mut distinct_seen = Vec::with_capacity(calls.len());
    for call in calls {
        let factory = registry_lookup(ctx, &call.name)?;
        accumulators.push(factory.create().initial_value());
        distinct_seen.push(if call.distinct { Some(Default::default()) } else { None });
    }
    Ok(GroupState { representative, representative_seen: true, accumulators, distinct_seen })
}

/// One `(name, args, distinct, output attr)` per `Aggregate::aggregates`
/// entry, unpacked once so the grouping loop below doesn't re-match the
/// `ScalarNode` on every row.
struct AggCall {
    name: String,
    args: Vec<ScalarRef>,
    distinct: bool,
    output: AttrId,
}

fn unpack_calls(aggregates: &[(ScalarRef, AttrId)]) -> QuereusResult<Vec<AggCall>> {
    aggregates
        .iter()
        .map(|(node, output)| match &**node {
            ScalarNode::AggregateFunctionCall { name, args, distinct, .. } => {
                Ok(AggCall { name: name.to_string(), args: args.clone(), distinct: *distinct, output: *output })
            }
            _ => Err(QuereusError::internal("Aggregate::aggregates entry is not an AggregateFunctionCall")),
        })
        .collect()
}

/// Drives the grouping loop described by a plan's `Aggregate` node:
/// materializes every group (keyed by its `group_by` tuple) in one pass
/// over `input`, then finalizes each group — applying `having`, when
/// present — into the output stream. Groups by key rather than requiring
/// pre-sorted input (the "rewrite StreamAggregate to HashAggregate when
/// input is not pre-sorted" optimization), so no separate `Sort` needs to
/// be planned ahead of every `Aggregate`.
#[allow(clippy::too_many_arguments)]
pub fn run_aggregate(
    input: crate::emit::RowStream,
    input_attrs: Vec<AttrId>,
    group_by: &[ScalarRef],
    group_attrs: &[AttrId],
    aggregates: &[(ScalarRef, AttrId)],
    having: Option<&ScalarRef>,
    ctx: &ExecContext,
) -> QuereusResult<(crate::emit::RowStream, Vec<AttrId>)> {
    let calls = unpack_calls(aggregates)?;
    let descriptor = quereus_core::RowDescriptor::from_attr_ids(&input_attrs);
    // `Value` has no `Hash` impl (only the manual `Ord` used for SQL
    // comparison semantics), so group keys live in a `BTreeMap` rather
    // than the `IndexMap` used elsewhere in this crate; output order
    // therefore follows key order, not first-seen order, which is fine
    // since GROUP BY's output order is unspecified without an ORDER BY.
    let mut groups: BTreeMap<Vec<Value>, GroupState> = BTreeMap::new();

    // An empty `group_by` means the whole input is one implicit group, which
    // must still finalize (e.g. `count(*) = 0`) even when zero rows arrive;
    // seed it up front rather than relying on the per-row seeding below,
    // which only runs when a row shows up. A real `GROUP BY` with zero
    // groups has nothing to seed: its output is correctly empty.
    if group_by.is_empty() {
        let mut seeded = fresh_group_state(&calls, ctx, Row::new(vec![Value::Null; input_attrs.len()]))?;
        seeded.representative_seen = false;
        groups.insert(Vec::new(), seeded);
    }

    for row in input {
        let row = row?;
        let guard = ctx.row_ctx.push(descriptor.clone(), row.clone());
        let key = eval_keys(group_by, ctx)?;
        if !groups.contains_key(&key) {
            groups.insert(key.clone(), fresh_group_state(&calls, ctx, row.clone())?);
        }
        let state = groups.get_mut(&key).expect("just inserted above");
        if !state.representative_seen {
            state.representative = row.clone();
            state.representative_seen = true;
        }
        for (i, call) in calls.iter().enumerate() {
            let arg_values: Vec<Value> =
                call.args.iter().map(|a| eval_resolving_subqueries(a, ctx)).collect::<QuereusResult<Vec<_>>>()?;
            if call.distinct {
                let seen = state.distinct_seen[i].as_mut().expect("distinct flagged above");
                if !seen.insert(arg_values.clone()) {
                    continue;
                }
            }
            let factory = registry_lookup(ctx, &call.name)?;
            let current = std::mem::replace(&mut state.accumulators[i], Row::new(Vec::new()));
            state.accumulators[i] = factory.create().step(current, &arg_values)?;
        }
        drop(guard);
    }

    let mut output = Vec::with_capacity(groups.len());
    let output_attrs: Vec<AttrId> = group_attrs.iter().cloned().chain(calls.iter().map(|c| c.output)).collect();
    let output_descriptor = quereus_core::RowDescriptor::from_attr_ids(&output_attrs);
    for (key, state) in groups {
        let mut values = key;
        for (i, call) in calls.iter().enumerate() {
            let factory = registry_lookup(ctx, &call.name)?;
            values.push(factory.create().finalize(state.accumulators[i].clone())?);
        }
        let output_row = Row::new(values);
        if let Some(predicate) = having {
            let guard_output = ctx.row_ctx.push(output_descriptor.clone(), output_row.clone());
            let guard_source = ctx.row_ctx.push(descriptor.clone(), state.representative.clone());
            let keep = eval_resolving_subqueries(predicate, ctx);
            drop(guard_source);
            drop(guard_output);
            if keep?.truthy() != Some(true) {
                continue;
            }
        }
        output.push(Ok(output_row));
    }
    Ok((Box::new(output.into_iter()), output_attrs))
}

fn registry_lookup(ctx: &ExecContext, name: &str) -> QuereusResult<Arc<dyn AggregateFactory>> {
    ctx.aggregates.get(name).ok_or_else(|| QuereusError::Resolution { message: format!("no such aggregate function: {name}") })
}

fn eval_keys(group_by: &[ScalarRef], ctx: &ExecContext) -> QuereusResult<Vec<Value>> {
    group_by.iter().map(|g| eval_resolving_subqueries(g, ctx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn count_star_on_empty_group_is_zero() {
        let registry = AggregateRegistry::with_builtins();
        let count = registry.get("count").unwrap().create();
        assert_eq!(count.finalize(count.initial_value()).unwrap(), Value::Integer(0));
    }

    #[test]
    fn sum_ignores_nulls() {
        let registry = AggregateRegistry::with_builtins();
        let sum = registry.get("sum").unwrap().create();
        let acc = sum.step(sum.initial_value(), &[Value::Null]).unwrap();
        let acc = sum.step(acc, &[Value::Integer(4)]).unwrap();
        assert_eq!(sum.finalize(acc).unwrap(), Value::Integer(4));
    }

    #[test]
    fn avg_over_empty_group_is_null() {
        let registry = AggregateRegistry::with_builtins();
        let avg = registry.get("avg").unwrap().create();
        assert_eq!(avg.finalize(avg.initial_value()).unwrap(), Value::Null);
    }

    #[test]
    fn min_max_track_extremes() {
        let registry = AggregateRegistry::with_builtins();
        let max = registry.get("max").unwrap().create();
        let acc = max.step(max.initial_value(), &[Value::Integer(3)]).unwrap();
        let acc = max.step(acc, &[Value::Integer(7)]).unwrap();
        let acc = max.step(acc, &[Value::Integer(2)]).unwrap();
        assert_eq!(max.finalize(acc).unwrap(), Value::Integer(7));
    }
}
