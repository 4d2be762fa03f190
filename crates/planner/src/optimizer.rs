//! Optimizer passes run over a freshly built plan: mandatory predicate
//! pushdown (querying each `TableScan`'s `best_index`), then a
//! fixed-point pass of optional, non-correctness-affecting rewrites
//! mirroring the teacher's `ErasedRule` dynamic-dispatch rule-list idiom.

use std::sync::Arc;

use quereus_core::QuereusResult;
use quereus_vtab::{BestIndexInput, Constraint, ConstraintOp};

use crate::plan::{PlanNode, PlanRef, PushedFilter, ScalarNode, ScalarRef};

pub fn optimize(plan: PlanRef) -> QuereusResult<PlanRef> {
    let plan = push_down_predicates(plan)?;
    run_rewrite_passes(plan)
}

/// Recursively rewrites `Filter(TableScan)` into
/// `Filter(residual) -> VerifyConstraints -> TableScan(pushed)` (or just
/// `TableScan(pushed)` when every constraint was fully consumed and
/// `omit` for each).
fn push_down_predicates(plan: PlanRef) -> QuereusResult<PlanRef> {
    Ok(match &*plan {
        PlanNode::Filter { input, predicate } => {
            let input = push_down_predicates(input.clone())?;
            if let PlanNode::TableScan { table, schema, output, filter: None } = &*input {
                let conjuncts = split_conjuncts(predicate);
                let constraints: Vec<Constraint> = conjuncts
                    .iter()
                    .filter_map(|c| as_constraint(c, output))
                    .collect();

                if constraints.is_empty() {
                    return Ok(Arc::new(PlanNode::Filter { input, predicate: predicate.clone() }));
                }

                let plan_input = BestIndexInput { constraints: constraints.clone(), order_by: Vec::new() };
                let best = table.best_index(&plan_input)?;

                let mut omitted = vec![false; conjuncts.len()];
                let mut args: Vec<Option<ScalarRef>> = Vec::new();
                for (slot, usage) in best.constraint_usage.iter().enumerate() {
                    if let Some(argv) = usage.argv_index {
                        let conjunct_index = constraints_to_conjunct_index(&conjuncts, output, slot);
                        if let Some(ci) = conjunct_index {
                            omitted[ci] = usage.omit;
                            let argv = argv as usize;
                            if args.len() <= argv {
                                args.resize(argv + 1, None);
                            }
                            args[argv] = literal_operand(&conjuncts[ci]);
                        }
                    }
                }
                let args: Vec<ScalarRef> = args.into_iter().flatten().collect();

                let scan = Arc::new(PlanNode::TableScan {
                    table: table.clone(),
                    schema: schema.clone(),
                    output: output.clone(),
                    filter: Some(PushedFilter { idx_num: best.idx_num, idx_str: best.idx_str.clone(), args }),
                });

                let residual: Vec<ScalarRef> = conjuncts
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !omitted.get(*i).copied().unwrap_or(false))
                    .map(|(_, c)| c.clone())
                    .collect();

                match residual.len() {
                    0 => scan,
                    _ => {
                        let residual = conjoin(residual);
                        Arc::new(PlanNode::VerifyConstraints { input: scan, residual })
                    }
                }
            } else {
                Arc::new(PlanNode::Filter { input, predicate: predicate.clone() })
            }
        }
        _ => recurse(plan, push_down_predicates)?,
    })
}

/// Splits a conjunction (`a AND b AND c`) into its top-level conjuncts.
fn split_conjuncts(expr: &ScalarRef) -> Vec<ScalarRef> {
    match &**expr {
        ScalarNode::BinaryOp { op: crate::ast::BinaryOp::And, left, right } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        _ => vec![expr.clone()],
    }
}

fn conjoin(mut exprs: Vec<ScalarRef>) -> ScalarRef {
    let mut acc = exprs.remove(0);
    for e in exprs {
        acc = Arc::new(ScalarNode::BinaryOp { op: crate::ast::BinaryOp::And, left: acc, right: e });
    }
    acc
}

/// Maps a binary comparison op to the `ConstraintOp` offered to
/// `best_index`, flipping `<`/`<=`/`>`/`>=` when the column is the right-
/// hand operand (`5 < col` is the same constraint as `col > 5`).
fn binary_constraint_op(op: crate::ast::BinaryOp, column_on_right: bool) -> Option<ConstraintOp> {
    use crate::ast::BinaryOp::*;
    Some(match (op, column_on_right) {
        (Eq, _) => ConstraintOp::Eq,
        (Lt, false) | (Gt, true) => ConstraintOp::Lt,
        (LtEq, false) | (GtEq, true) => ConstraintOp::Le,
        (Gt, false) | (Lt, true) => ConstraintOp::Gt,
        (GtEq, false) | (LtEq, true) => ConstraintOp::Ge,
        (Like, _) => ConstraintOp::Like,
        (Glob, _) => ConstraintOp::Glob,
        _ => return None,
    })
}

/// Recognizes one conjunct as a pushdown-eligible constraint against one
/// of `output`'s attributes: `column <op> literal`, `literal <op> column`
/// (§4.7 step 1's `{=, <, <=, >, >=, LIKE, GLOB, ISNULL, ISNOTNULL}`
/// subset — `IS`/`IS NOT`/`REGEXP`/`MATCH` have no corresponding `ast`
/// operator in this engine's parser-facing surface and so are never
/// extracted), translated into the vtab crate's column-index space
/// (position within `output`).
fn as_constraint(expr: &ScalarRef, output: &[quereus_core::AttrId]) -> Option<Constraint> {
    match &**expr {
        ScalarNode::BinaryOp { op, left, right } => {
            let (col_expr, lit_expr, column_on_right) = match (&**left, &**right) {
                (ScalarNode::ColumnReference(_), ScalarNode::Literal(_)) => (left, right, false),
                (ScalarNode::Literal(_), ScalarNode::ColumnReference(_)) => (right, left, true),
                _ => return None,
            };
            let ScalarNode::ColumnReference(attr) = &**col_expr else { return None };
            let ScalarNode::Literal(value) = &**lit_expr else { return None };
            let column = output.iter().position(|a| a == attr)?;
            let op = binary_constraint_op(*op, column_on_right)?;
            Some(Constraint { column, op, value: Some(value.clone()), usable: true })
        }
        ScalarNode::UnaryOp { op, operand } => {
            let constraint_op = match op {
                crate::ast::UnaryOp::IsNull => ConstraintOp::IsNull,
                crate::ast::UnaryOp::IsNotNull => ConstraintOp::IsNotNull,
                _ => return None,
            };
            let ScalarNode::ColumnReference(attr) = &**operand else { return None };
            let column = output.iter().position(|a| a == attr)?;
            Some(Constraint { column, op: constraint_op, value: None, usable: true })
        }
        _ => None,
    }
}

/// The literal-valued side of a conjunct recognized by `as_constraint`,
/// i.e. what actually gets passed to `Cursor::filter`. `None` for the
/// unary `IS [NOT] NULL` constraints, which bind no value.
fn literal_operand(expr: &ScalarRef) -> Option<ScalarRef> {
    let ScalarNode::BinaryOp { left, right, .. } = &**expr else { return None };
    match (&**left, &**right) {
        (ScalarNode::ColumnReference(_), ScalarNode::Literal(_)) => Some(right.clone()),
        (ScalarNode::Literal(_), ScalarNode::ColumnReference(_)) => Some(left.clone()),
        _ => None,
    }
}

fn constraints_to_conjunct_index(conjuncts: &[ScalarRef], output: &[quereus_core::AttrId], constraint_slot: usize) -> Option<usize> {
    conjuncts
        .iter()
        .enumerate()
        .filter_map(|(i, c)| as_constraint(c, output).map(|_| i))
        .nth(constraint_slot)
}

/// A rewrite that may apply to one plan node, producing a replacement
/// when it fires. `None` means "not applicable here."
pub trait RewriteRule {
    fn apply(&self, plan: &PlanRef) -> Option<PlanRef>;
}

struct MergeAdjacentProjects;

impl RewriteRule for MergeAdjacentProjects {
    fn apply(&self, plan: &PlanRef) -> Option<PlanRef> {
        let PlanNode::Project { input, columns } = &**plan else { return None };
        let PlanNode::Project { input: inner_input, columns: inner_columns } = &**input else { return None };
        let substituted: Vec<_> = columns
            .iter()
            .map(|(expr, attr)| (substitute(expr, inner_columns), *attr))
            .collect();
        Some(Arc::new(PlanNode::Project { input: inner_input.clone(), columns: substituted }))
    }
}

fn substitute(expr: &ScalarRef, bindings: &[(ScalarRef, quereus_core::AttrId)]) -> ScalarRef {
    if let ScalarNode::ColumnReference(attr) = &**expr {
        if let Some((bound, _)) = bindings.iter().find(|(_, a)| a == attr) {
            return bound.clone();
        }
    }
    expr.clone()
}

fn rewrite_rules() -> Vec<Box<dyn RewriteRule>> {
    vec![Box::new(MergeAdjacentProjects)]
}

fn run_rewrite_passes(plan: PlanRef) -> QuereusResult<PlanRef> {
    let rules = rewrite_rules();
    let mut current = plan;
    loop {
        let next = recurse_rewrite(&current, &rules)?;
        if same_node(&next, &current) {
            return Ok(current);
        }
        current = next;
    }
}

fn recurse_rewrite(plan: &PlanRef, rules: &[Box<dyn RewriteRule>]) -> QuereusResult<PlanRef> {
    let plan = recurse(plan.clone(), |p| recurse_rewrite(&p, rules))?;
    for rule in rules {
        if let Some(rewritten) = rule.apply(&plan) {
            return Ok(rewritten);
        }
    }
    Ok(plan)
}

fn same_node(a: &PlanRef, b: &PlanRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Rebuilds `plan` with `f` applied to each direct relational child.
/// Every `PlanNode` variant that carries child plans is listed here so a
/// new variant is a compile error to forget, not a silent no-op.
fn recurse(plan: PlanRef, mut f: impl FnMut(PlanRef) -> QuereusResult<PlanRef>) -> QuereusResult<PlanRef> {
    Ok(match &*plan {
        PlanNode::TableScan { .. } | PlanNode::TableFunctionCall { .. } | PlanNode::Values { .. } | PlanNode::SingleRow => plan,
        PlanNode::CteReference { name, plan: body, output } => {
            Arc::new(PlanNode::CteReference { name: name.clone(), plan: f(body.clone())?, output: output.clone() })
        }
        PlanNode::Filter { input, predicate } => Arc::new(PlanNode::Filter { input: f(input.clone())?, predicate: predicate.clone() }),
        PlanNode::Project { input, columns } => Arc::new(PlanNode::Project { input: f(input.clone())?, columns: columns.clone() }),
        PlanNode::Distinct { input } => Arc::new(PlanNode::Distinct { input: f(input.clone())? }),
        PlanNode::Sort { input, keys } => Arc::new(PlanNode::Sort { input: f(input.clone())?, keys: keys.clone() }),
        PlanNode::Aggregate { input, group_by, group_attrs, aggregates, having } => Arc::new(PlanNode::Aggregate {
            input: f(input.clone())?,
            group_by: group_by.clone(),
            group_attrs: group_attrs.clone(),
            aggregates: aggregates.clone(),
            having: having.clone(),
        }),
        PlanNode::Window { input, functions } => Arc::new(PlanNode::Window { input: f(input.clone())?, functions: functions.clone() }),
        PlanNode::LimitOffset { input, limit, offset } => {
            Arc::new(PlanNode::LimitOffset { input: f(input.clone())?, limit: limit.clone(), offset: offset.clone() })
        }
        PlanNode::Join { left, right, kind, condition } => {
            Arc::new(PlanNode::Join { left: f(left.clone())?, right: f(right.clone())?, kind: *kind, condition: condition.clone() })
        }
        PlanNode::SetOperation { op, left, right } => Arc::new(PlanNode::SetOperation { op: *op, left: f(left.clone())?, right: f(right.clone())? }),
        PlanNode::Insert { table, schema, source, column_mapping, on_conflict } => Arc::new(PlanNode::Insert {
            table: table.clone(),
            schema: schema.clone(),
            source: f(source.clone())?,
            column_mapping: column_mapping.clone(),
            on_conflict: *on_conflict,
        }),
        PlanNode::Update { table, schema, source, assignments, on_conflict } => Arc::new(PlanNode::Update {
            table: table.clone(),
            schema: schema.clone(),
            source: f(source.clone())?,
            assignments: assignments.clone(),
            on_conflict: *on_conflict,
        }),
        PlanNode::Delete { table, schema, source } => Arc::new(PlanNode::Delete { table: table.clone(), schema: schema.clone(), source: f(source.clone())? }),
        PlanNode::VerifyConstraints { input, residual } => Arc::new(PlanNode::VerifyConstraints { input: f(input.clone())?, residual: residual.clone() }),
    })
}
