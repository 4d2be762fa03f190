//! The window-function engine (C9's other half): materializes each
//! partition, sorts it per the window's `ORDER BY`, computes one value
//! per row over the resolved frame, then reassembles rows in their
//! original arrival order.
//!
//! `ROW_NUMBER`/`RANK`/`DENSE_RANK` are special-cased by name since they
//! have no sensible reading as a running aggregate over a frame; every
//! other window call is evaluated by re-using an `AggregateSchema` over
//! the rows the resolved `ROWS BETWEEN` frame covers. RANGE frames and
//! reusing a named window across multiple calls are both out of scope —
//! every call here gets its own resolved `ROWS` frame.

use quereus_core::{AttrId, QuereusError, QuereusResult, Row, SortDirection, Value};
use quereus_planner::ast::FrameBound;
use quereus_planner::plan::WindowFunctionSpec;

use crate::emit::{compare_keys, eval_resolving_subqueries, ExecContext};

const ROW_NUMBER_LIKE: &[&str] = &["row_number", "rank", "dense_rank"];

struct PartitionedRow {
    original_index: usize,
    key: Vec<Value>,
    order_key: Vec<Value>,
    row: Row,
}

/// Computes every `functions` entry over `input` and republishes each
/// source row with one extra value appended per function, in the same
/// order `input` produced them.
pub fn run_window(
    input: crate::emit::RowStream,
    input_attrs: Vec<AttrId>,
    functions: &[WindowFunctionSpec],
    ctx: &ExecContext,
) -> QuereusResult<(crate::emit::RowStream, Vec<AttrId>)> {
    let descriptor = quereus_core::RowDescriptor::from_attr_ids(&input_attrs);
    let mut rows = Vec::new();
    for row in input {
        let row = row?;
        rows.push(row);
    }

    // One results column per function, indexed in parallel with `rows`.
    let mut extra: Vec<Vec<Value>> = vec![vec![Value::Null; rows.len()]; functions.len()];

    for (fn_idx, spec) in functions.iter().enumerate() {
        let mut partitioned: Vec<PartitionedRow> = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let guard = ctx.row_ctx.push(descriptor.clone(), row.clone());
            let key: Vec<Value> =
                spec.partition_by.iter().map(|e| eval_resolving_subqueries(e, ctx)).collect::<QuereusResult<_>>()?;
            let order_key: Vec<Value> =
                spec.order_by.iter().map(|(e, _)| eval_resolving_subqueries(e, ctx)).collect::<QuereusResult<_>>()?;
            drop(guard);
            partitioned.push(PartitionedRow { original_index: i, key, order_key, row: row.clone() });
        }

        // Group by partition key while preserving each partition's
        // original row order, then sort each partition's rows by the
        // window's ORDER BY.
        let mut partitions: Vec<Vec<PartitionedRow>> = Vec::new();
        'outer: for item in partitioned {
            for partition in partitions.iter_mut() {
                if partition[0].key == item.key {
                    partition.push(item);
                    continue 'outer;
                }
            }
            partitions.push(vec![item]);
        }

        for partition in partitions.iter_mut() {
            let directions: Vec<SortDirection> = spec.order_by.iter().map(|(_, d)| *d).collect();
            partition.sort_by(|a, b| compare_keys(&a.order_key, &b.order_key, &directions));

            let name = function_name(&spec.function)?;
            if ROW_NUMBER_LIKE.contains(&name.as_str()) {
                compute_rank_like(&name, partition, &mut extra[fn_idx]);
                continue;
            }

            let frame = spec.frame.unwrap_or((
                FrameBound::UnboundedPreceding,
                if spec.order_by.is_empty() { FrameBound::UnboundedFollowing } else { FrameBound::CurrentRow },
            ));
            compute_aggregate_over_frame(&name, &spec.function, partition, frame, ctx, &descriptor, &mut extra[fn_idx])?;
        }
    }

    let output_attrs: Vec<AttrId> = input_attrs.iter().copied().chain(functions.iter().map(|f| f.output)).collect();
    let mut output = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let mut values: Vec<Value> = row.values().to_vec();
        for column in &extra {
            values.push(column[i].clone());
        }
        output.push(Ok(Row::new(values)));
    }
    Ok((Box::new(output.into_iter()), output_attrs))
}

fn function_name(function: &quereus_planner::plan::ScalarRef) -> QuereusResult<String> {
    match &**function {
        quereus_planner::plan::ScalarNode::WindowFunctionCall { name, .. } => Ok(name.to_ascii_lowercase()),
        _ => Err(QuereusError::internal("WindowFunctionSpec::function is not a WindowFunctionCall")),
    }
}

fn function_args(function: &quereus_planner::plan::ScalarRef) -> QuereusResult<Vec<quereus_planner::plan::ScalarRef>> {
    match &**function {
        quereus_planner::plan::ScalarNode::WindowFunctionCall { args, .. } => Ok(args.clone()),
        _ => Err(QuereusError::internal("WindowFunctionSpec::function is not a WindowFunctionCall")),
    }
}

fn compute_rank_like(name: &str, partition: &[PartitionedRow], out: &mut [Value]) {
    let mut rank = 0i64;
    let mut dense_rank = 0i64;
    let mut previous_key: Option<&[Value]> = None;
    for (position, item) in partition.iter().enumerate() {
        let tied = previous_key == Some(item.order_key.as_slice());
        if !tied {
            rank = position as i64 + 1;
            dense_rank += 1;
        }
        let value = match name {
            "row_number" => Value::Integer(position as i64 + 1),
            "rank" => Value::Integer(rank),
            "dense_rank" => Value::Integer(dense_rank),
            _ => unreachable!("checked by caller"),
        };
        out[item.original_index] = value;
        previous_key = Some(item.order_key.as_slice());
    }
}

/// Resolves `frame`'s bounds against `pos` (0-based position within a
/// partition of `len` rows): `UnboundedPreceding -> 0`,
/// `Preceding(n) -> pos.saturating_sub(n)`, `CurrentRow -> pos`,
/// `Following(n) -> min(pos+n, len-1)`, `UnboundedFollowing -> len-1`.
fn resolve_bound(bound: FrameBound, pos: usize, len: usize) -> usize {
    match bound {
        FrameBound::UnboundedPreceding => 0,
        FrameBound::Preceding(n) => pos.saturating_sub(n as usize),
        FrameBound::CurrentRow => pos,
        FrameBound::Following(n) => (pos + n as usize).min(len.saturating_sub(1)),
        FrameBound::UnboundedFollowing => len.saturating_sub(1),
    }
}

fn compute_aggregate_over_frame(
    name: &str,
    function: &quereus_planner::plan::ScalarRef,
    partition: &[PartitionedRow],
    frame: (FrameBound, FrameBound),
    ctx: &ExecContext,
    descriptor: &quereus_core::RowDescriptor,
    out: &mut [Value],
) -> QuereusResult<()> {
    let factory = ctx
        .aggregates
        .get(name)
        .ok_or_else(|| QuereusError::Resolution { message: format!("no such window function: {name}") })?;
    let args = function_args(function)?;
    let len = partition.len();
    for pos in 0..len {
        let start = resolve_bound(frame.0, pos, len);
        let end = resolve_bound(frame.1, pos, len);
        let schema = factory.create();
        let mut accumulator = schema.initial_value();
        if start <= end {
            for item in &partition[start..=end] {
                let guard = ctx.row_ctx.push(descriptor.clone(), item.row.clone());
                let arg_values: Vec<Value> =
                    args.iter().map(|a| eval_resolving_subqueries(a, ctx)).collect::<QuereusResult<_>>()?;
                drop(guard);
                accumulator = schema.step(accumulator, &arg_values)?;
            }
        }
        out[partition[pos].original_index] = schema.finalize(accumulator)?;
    }
    Ok(())
}
