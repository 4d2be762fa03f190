//! Drives `INSERT`/`UPDATE`/`DELETE` plan nodes against a table's
//! `VirtualTable::mutate`. Row-shape validation, conflict-policy
//! resolution and secondary-index maintenance all happen inside
//! `mutate` itself (see `quereus-storage`'s table manager); this module's
//! job is just to compute the `new_row`/`old_key_values` pair for each
//! source row and translate the conflict policy's failure outcome into
//! an error when the policy doesn't already absorb it.

use std::sync::Arc;

use quereus_core::{ConflictPolicy, ConstraintKind, QuereusError, QuereusResult, Row, TableSchema, Value};
use quereus_planner::plan::{PlanRef, ScalarRef};
use quereus_vtab::{MutationOp, UpdateResult, VirtualTable};

use crate::emit::{emit, eval_resolving_subqueries, ExecContext};

fn constraint_outcome(kind: ConstraintKind, message: String) -> QuereusError {
    QuereusError::Constraint { kind, message, existing: None }
}

pub fn run_insert(
    table: &Arc<dyn VirtualTable>,
    schema: &TableSchema,
    source: PlanRef,
    column_mapping: &[usize],
    on_conflict: ConflictPolicy,
    ctx: &ExecContext,
) -> QuereusResult<u64> {
    let (stream, _attrs) = emit(source, ctx.clone())?;
    let mut affected = 0u64;
    for row in stream {
        let row = row?;
        let mut values = vec![Value::Null; schema.columns.len()];
        for (i, col) in schema.columns.iter().enumerate() {
            if let Some(default) = &col.default {
                values[i] = default.clone();
            }
        }
        for (src_index, &dest_index) in column_mapping.iter().enumerate() {
            if let Some(v) = row.get(src_index) {
                values[dest_index] = v.clone();
            }
        }
        let new_row = Row::new(values);
        match table.mutate(MutationOp::Insert, Some(&new_row), None, on_conflict)? {
            UpdateResult::Applied { affected: n, .. } => affected += n,
            UpdateResult::Ignored | UpdateResult::NotFound => {}
            UpdateResult::Constraint { kind, message, .. } => return Err(constraint_outcome(kind, message)),
        }
    }
    Ok(affected)
}

pub fn run_update(
    table: &Arc<dyn VirtualTable>,
    schema: &TableSchema,
    source: PlanRef,
    assignments: &[(usize, ScalarRef)],
    on_conflict: ConflictPolicy,
    ctx: &ExecContext,
) -> QuereusResult<u64> {
    let (stream, attrs) = emit(source, ctx.clone())?;
    let descriptor = quereus_core::RowDescriptor::from_attr_ids(&attrs);
    let mut affected = 0u64;
    for row in stream {
        let old_row = row?;
        let old_keys: Vec<Value> =
            schema.primary_key.columns.iter().map(|&(c, _)| old_row.get(c).cloned().unwrap_or(Value::Null)).collect();
        let guard = ctx.row_ctx.push(descriptor.clone(), old_row.clone());
        let mut values = old_row.values().to_vec();
        let mut assignment_err = None;
        for (column, expr) in assignments {
            match eval_resolving_subqueries(expr, ctx) {
                Ok(v) => values[*column] = v,
                Err(e) => {
                    assignment_err = Some(e);
                    break;
                }
            }
        }
        drop(guard);
        if let Some(e) = assignment_err {
            return Err(e);
        }
        let new_row = Row::new(values);
        match table.mutate(MutationOp::Update, Some(&new_row), Some(&old_keys), on_conflict)? {
            UpdateResult::Applied { affected: n, .. } => affected += n,
            UpdateResult::Ignored | UpdateResult::NotFound => {}
            UpdateResult::Constraint { kind, message, .. } => return Err(constraint_outcome(kind, message)),
        }
    }
    Ok(affected)
}

pub fn run_delete(table: &Arc<dyn VirtualTable>, schema: &TableSchema, source: PlanRef, ctx: &ExecContext) -> QuereusResult<u64> {
    let (stream, _attrs) = emit(source, ctx.clone())?;
    let mut affected = 0u64;
    for row in stream {
        let row = row?;
        let old_keys: Vec<Value> = schema.primary_key.columns.iter().map(|&(c, _)| row.get(c).cloned().unwrap_or(Value::Null)).collect();
        match table.mutate(MutationOp::Delete, None, Some(&old_keys), ConflictPolicy::Abort)? {
            UpdateResult::Applied { affected: n, .. } => affected += n,
            UpdateResult::Ignored | UpdateResult::NotFound => {}
            UpdateResult::Constraint { kind, message, .. } => return Err(constraint_outcome(kind, message)),
        }
    }
    Ok(affected)
}
