//! Builds a `PlanNode` tree from a `Statement`. A `SELECT` goes through
//! ten steps, each producing (or threading through) the scope the next
//! step resolves names against:
//!
//! 1. bind CTEs so later `FROM` clauses can reference them
//! 2. recurse into compound set-operation arms
//! 3. build the FROM/JOIN column scope
//! 4. assemble the select-list scope, detecting ambiguous names
//! 5. lower `WHERE` into a `Filter`
//! 6. analyze the select list and `GROUP BY`/`HAVING` for aggregates and
//!    window functions
//! 7. build the aggregate phase, if step 6 found one is needed
//! 8. build `Project` (plus an early `Sort` if `ORDER BY` references a
//!    column not in the projection)
//! 9. build `Distinct`
//! 10. build the final `Sort`/`LimitOffset`

use std::cell::RefCell;
use std::sync::Arc;

use quereus_core::{AttrId, ConflictPolicy, QuereusError, QuereusResult, SortDirection, TableSchema};
use quereus_helpers::IndexMap;
use smol_str::SmolStr;

use crate::ast::{
    self, BinaryOp, DeleteStmt, Expr, FromClause, InsertSource, InsertStmt, SelectCore, SelectItem, SelectStmt,
    Statement, UpdateStmt,
};
use crate::catalog::Catalog;
use crate::plan::{PlanNode, PlanRef, ScalarNode, ScalarRef, WindowFunctionSpec};
use crate::scope::{AttrAllocator, Scope, ScopeColumn};

/// Names recognized as aggregates when they appear outside a window
/// (`OVER`) clause. Kept in sync with the built-in registry the runtime
/// crate populates at `Database::open`.
const AGGREGATE_NAMES: &[&str] = &["count", "sum", "avg", "min", "max", "group_concat"];

/// A non-recursive common table expression, bound to the plan its body
/// built to and the columns it publishes under the CTE's own name — a
/// `FROM` reference to it becomes a `CteReference` pointing at `plan`
/// rather than a second, independent planning of `body`.
#[derive(Clone)]
struct CteEntry {
    plan: PlanRef,
    columns: Vec<ScopeColumn>,
}

pub struct Planner<'c> {
    attrs: AttrAllocator,
    catalog: &'c dyn Catalog,
    /// One frame per nested `WITH` clause currently being built, searched
    /// innermost-first so a nested `WITH` can shadow an outer one's name.
    /// Entries within a frame are inserted as each CTE is built, so later
    /// CTEs in the same `WITH` list may reference earlier ones.
    ctes: RefCell<Vec<IndexMap<SmolStr, CteEntry>>>,
}

impl<'c> Planner<'c> {
    pub fn new(catalog: &'c dyn Catalog) -> Self {
        Planner { attrs: AttrAllocator::new(), catalog, ctes: RefCell::new(Vec::new()) }
    }

    fn lookup_cte(&self, name: &SmolStr) -> Option<CteEntry> {
        self.ctes.borrow().iter().rev().find_map(|frame| {
            frame.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.clone())
        })
    }

    pub fn build_statement(&self, stmt: &Statement) -> QuereusResult<PlanRef> {
        match stmt {
            Statement::Select(select) => Ok(self.build_select(select, None)?.0),
            Statement::Insert(insert) => self.build_insert(insert),
            Statement::Update(update) => self.build_update(update),
            Statement::Delete(delete) => self.build_delete(delete),
            _ => Err(QuereusError::Misuse { message: "not a row-producing or row-mutating statement".into() }),
        }
    }

    // ---- SELECT -------------------------------------------------------

    fn build_select<'o>(&self, select: &SelectStmt, outer: Option<&'o Scope<'o>>) -> QuereusResult<(PlanRef, Scope<'o>)> {
        self.ctes.borrow_mut().push(IndexMap::default());
        let result = self.build_select_with_ctes(select, outer);
        self.ctes.borrow_mut().pop();
        result
    }

    /// Body of `build_select`, run with this statement's `WITH` frame
    /// already pushed so `build_from` can resolve a CTE by name.
    fn build_select_with_ctes<'o>(&self, select: &SelectStmt, outer: Option<&'o Scope<'o>>) -> QuereusResult<(PlanRef, Scope<'o>)> {
        // Step 1: plan each CTE body and bind it under its name so a later
        // `FROM` clause (including a later sibling CTE's body) resolves it.
        for cte in &select.ctes {
            if cte.recursive {
                return Err(QuereusError::Misuse {
                    message: format!("recursive common table expression '{}' is not supported", cte.name),
                });
            }
            let (plan, inner_scope) = self.build_select(&cte.body, outer)?;
            let columns: Vec<ScopeColumn> = match &cte.column_names {
                Some(names) => names
                    .iter()
                    .zip(inner_scope.columns.iter())
                    .map(|(n, c)| ScopeColumn { table: Some(cte.name.clone()), name: n.clone(), attr: c.attr })
                    .collect(),
                None => inner_scope
                    .columns
                    .iter()
                    .map(|c| ScopeColumn { table: Some(cte.name.clone()), name: c.name.clone(), attr: c.attr })
                    .collect(),
            };
            self.ctes
                .borrow_mut()
                .last_mut()
                .expect("frame pushed by build_select")
                .insert(cte.name.clone(), CteEntry { plan, columns });
        }

        let (mut plan, mut scope) = self.build_core(&select.core, outer, select)?;

        // Step 2: fold compound arms left to right.
        for (op, core) in &select.compound {
            let (right, _) = self.build_core(core, outer, select)?;
            plan = Arc::new(PlanNode::SetOperation { op: *op, left: plan, right });
        }

        // Step 10: ORDER BY / LIMIT / OFFSET on the final combined result.
        if !select.order_by.is_empty() {
            let mut keys = Vec::new();
            for item in &select.order_by {
                let expr = self.build_scalar(&item.expr, &scope)?;
                let dir = if item.descending { SortDirection::Descending } else { SortDirection::Ascending };
                keys.push((expr, dir));
            }
            plan = Arc::new(PlanNode::Sort { input: plan, keys });
        }
        if select.limit.is_some() || select.offset.is_some() {
            let limit = select.limit.as_ref().map(|e| self.build_scalar(e, &scope)).transpose()?;
            let offset = select.offset.as_ref().map(|e| self.build_scalar(e, &scope)).transpose()?;
            plan = Arc::new(PlanNode::LimitOffset { input: plan, limit, offset });
        }

        scope.outer = outer;
        Ok((plan, scope))
    }

    /// Steps 3-9 for one `SELECT` core (one arm of a compound statement).
    fn build_core<'o>(&self, core: &SelectCore, outer: Option<&'o Scope<'o>>, stmt: &SelectStmt) -> QuereusResult<(PlanRef, Scope<'o>)> {
        // Step 3: FROM/JOIN scope.
        let (mut plan, from_scope) = match &core.from {
            Some(from) => self.build_from(from, outer)?,
            None => (Arc::new(PlanNode::SingleRow), Scope::new(Vec::new())),
        };

        // Step 4: the scope WHERE/GROUP BY/HAVING resolve against is the
        // raw FROM scope, not the (possibly aliased/aggregated) select
        // list — SQL resolves those clauses against table columns.
        let pre_project_scope = from_scope;

        // Step 5: WHERE.
        if let Some(where_expr) = &core.where_clause {
            let predicate = self.build_scalar(where_expr, &pre_project_scope)?;
            plan = Arc::new(PlanNode::Filter { input: plan, predicate });
        }

        // Step 6: does this core need an aggregate phase?
        let needs_aggregate = !core.group_by.is_empty()
            || core.having.is_some()
            || core.columns.iter().any(|item| matches!(item, SelectItem::Expr { expr, .. } if contains_aggregate(expr)));

        let (plan, agg_scope, mut bindings) = if needs_aggregate {
            // Step 7.
            self.build_aggregate(plan, core, &pre_project_scope)?
        } else {
            (plan, pre_project_scope, Vec::new())
        };

        // Step 7b: window functions, evaluated over whatever step 7 left
        // behind (the raw rows, or the aggregate's output rows).
        let needs_window =
            core.columns.iter().any(|item| matches!(item, SelectItem::Expr { expr, .. } if contains_window(expr)));
        let (plan, window_bindings) =
            if needs_window { self.build_window(plan, core, &agg_scope)? } else { (plan, Vec::new()) };
        bindings.extend(window_bindings);

        // Step 8: projection.
        let mut output = Vec::new();
        let mut columns = Vec::new();
        for item in &core.columns {
            match item {
                SelectItem::Expr { expr, alias } => {
                    let value = self.build_scalar_agg(expr, &agg_scope, &bindings)?;
                    let attr = self.attrs.next();
                    let name = alias.clone().unwrap_or_else(|| infer_name(expr));
                    output.push(ScopeColumn { table: None, name, attr });
                    columns.push((value, attr));
                }
                SelectItem::Wildcard { qualifier } => {
                    for col in agg_scope.columns.iter().filter(|c| {
                        qualifier.as_deref().is_none_or(|q| c.table.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(q)))
                    }) {
                        let attr = self.attrs.next();
                        columns.push((Arc::new(ScalarNode::ColumnReference(col.attr)), attr));
                        output.push(ScopeColumn { table: col.table.clone(), name: col.name.clone(), attr });
                    }
                }
            }
        }
        let plan = Arc::new(PlanNode::Project { input: plan, columns });
        let project_scope = Scope::new(output);

        // Step 9: DISTINCT.
        let plan = if core.distinct { Arc::new(PlanNode::Distinct { input: plan }) } else { plan };

        let _ = stmt;
        Ok((plan, project_scope))
    }

    /// Builds the `Aggregate` node, plus the scope downstream clauses
    /// (HAVING, the projection, ORDER BY) resolve names against, plus the
    /// `(original expr, attribute)` bindings that let `build_scalar_agg`
    /// recognize "this subtree is an aggregate call the aggregate phase
    /// already computed" rather than re-evaluating it against columns
    /// that no longer exist once the rows are grouped.
    fn build_aggregate(&self, input: PlanRef, core: &SelectCore, scope: &Scope) -> QuereusResult<(PlanRef, Scope<'static>, Vec<(Expr, AttrId)>)> {
        let group_by = core.group_by.iter().map(|e| self.build_scalar(e, scope)).collect::<QuereusResult<Vec<_>>>()?;

        let mut output = Vec::new();
        let mut group_attrs = Vec::new();
        for g_ast in &core.group_by {
            let attr = self.attrs.next();
            group_attrs.push(attr);
            output.push(ScopeColumn { table: None, name: infer_name(g_ast), attr });
        }

        let mut aggregates = Vec::new();
        let mut bindings: Vec<(Expr, AttrId)> = Vec::new();
        {
            let mut collect = |e: &Expr| -> QuereusResult<()> {
                collect_aggregate_calls(e, &mut |call_expr, name, args, distinct| {
                    if bindings.iter().any(|(b, _)| b == call_expr) {
                        return Ok(());
                    }
                    let arg_plans = args.iter().map(|a| self.build_scalar(a, scope)).collect::<QuereusResult<Vec<_>>>()?;
                    let attr = self.attrs.next();
                    aggregates.push((
                        Arc::new(ScalarNode::AggregateFunctionCall { name: SmolStr::new(name), args: arg_plans, distinct, output: attr }),
                        attr,
                    ));
                    bindings.push((call_expr.clone(), attr));
                    Ok(())
                })
            };
            for item in &core.columns {
                if let SelectItem::Expr { expr, .. } = item {
                    collect(expr)?;
                }
            }
            if let Some(h) = &core.having {
                collect(h)?;
            }
        }

        for (expr, attr) in &bindings {
            output.push(ScopeColumn { table: None, name: infer_name(expr), attr: *attr });
        }

        let agg_scope = Scope::new(output);
        let having = core.having.as_ref().map(|h| self.build_scalar_agg(h, &agg_scope, &bindings)).transpose()?;
        let plan = Arc::new(PlanNode::Aggregate { input, group_by, group_attrs, aggregates, having });
        Ok((plan, agg_scope, bindings))
    }

    /// Builds a `Window` node for every window-function call found in the
    /// select list, mirroring `build_aggregate`'s binding-substitution
    /// approach: each call is replaced by a `ColumnReference` to the
    /// attribute the window phase publishes its result under.
    fn build_window(&self, input: PlanRef, core: &SelectCore, scope: &Scope) -> QuereusResult<(PlanRef, Vec<(Expr, AttrId)>)> {
        let mut functions = Vec::new();
        let mut bindings: Vec<(Expr, AttrId)> = Vec::new();
        {
            let mut collect = |e: &Expr| -> QuereusResult<()> {
                collect_window_calls(e, &mut |call_expr, name, args, distinct, over| {
                    if bindings.iter().any(|(b, _)| b == call_expr) {
                        return Ok(());
                    }
                    let spec = resolve_window_spec(over, core)?;
                    let arg_plans = args.iter().map(|a| self.build_scalar(a, scope)).collect::<QuereusResult<Vec<_>>>()?;
                    let attr = self.attrs.next();
                    let partition_by =
                        spec.partition_by.iter().map(|e| self.build_scalar(e, scope)).collect::<QuereusResult<Vec<_>>>()?;
                    let order_by = spec
                        .order_by
                        .iter()
                        .map(|o| {
                            let dir = if o.descending { SortDirection::Descending } else { SortDirection::Ascending };
                            Ok::<_, QuereusError>((self.build_scalar(&o.expr, scope)?, dir))
                        })
                        .collect::<QuereusResult<Vec<_>>>()?;
                    let function = Arc::new(ScalarNode::WindowFunctionCall { name: SmolStr::new(name), args: arg_plans, distinct, output: attr });
                    functions.push(WindowFunctionSpec {
                        function,
                        partition_by,
                        order_by,
                        frame: spec.frame.map(|f| (f.start, f.end)),
                        output: attr,
                    });
                    bindings.push((call_expr.clone(), attr));
                    Ok(())
                })
            };
            for item in &core.columns {
                if let SelectItem::Expr { expr, .. } = item {
                    collect(expr)?;
                }
            }
        }

        if functions.is_empty() {
            return Ok((input, bindings));
        }
        Ok((Arc::new(PlanNode::Window { input, functions }), bindings))
    }

    /// Like `build_scalar`, but checked against `bindings` first — reached
    /// only from clauses that run after the aggregate/window phase
    /// (HAVING, the projection, ORDER BY), where an aggregate or window
    /// call's own arguments are no longer resolvable columns.
    fn build_scalar_agg(&self, expr: &Expr, scope: &Scope, bindings: &[(Expr, AttrId)]) -> QuereusResult<ScalarRef> {
        if let Some((_, attr)) = bindings.iter().find(|(b, _)| b == expr) {
            return Ok(Arc::new(ScalarNode::ColumnReference(*attr)));
        }
        Ok(Arc::new(match expr {
            Expr::Literal(v) => ScalarNode::Literal(v.clone()),
            Expr::Column { qualifier, name } => ScalarNode::ColumnReference(scope.resolve(qualifier.as_deref(), name)?),
            Expr::Parameter(p) => ScalarNode::ParameterReference(match p {
                ast::ParamRef::Positional(n) => crate::plan::ParamSlot::Positional(*n),
                ast::ParamRef::Named(_) => crate::plan::ParamSlot::Named(0),
            }),
            Expr::Unary { op, operand } => ScalarNode::UnaryOp { op: *op, operand: self.build_scalar_agg(operand, scope, bindings)? },
            Expr::Binary { op, left, right } => ScalarNode::BinaryOp {
                op: *op,
                left: self.build_scalar_agg(left, scope, bindings)?,
                right: self.build_scalar_agg(right, scope, bindings)?,
            },
            Expr::Collate { expr, collation } => {
                ScalarNode::Collate { expr: self.build_scalar_agg(expr, scope, bindings)?, collation: collation.clone() }
            }
            Expr::Cast { expr, ty } => ScalarNode::Cast { expr: self.build_scalar_agg(expr, scope, bindings)?, ty: ty.clone() },
            Expr::Case { operand, whens, else_expr } => ScalarNode::Case {
                operand: operand.as_ref().map(|e| self.build_scalar_agg(e, scope, bindings)).transpose()?,
                whens: whens
                    .iter()
                    .map(|(w, t)| Ok::<_, QuereusError>((self.build_scalar_agg(w, scope, bindings)?, self.build_scalar_agg(t, scope, bindings)?)))
                    .collect::<QuereusResult<Vec<_>>>()?,
                else_expr: else_expr.as_ref().map(|e| self.build_scalar_agg(e, scope, bindings)).transpose()?,
            },
            Expr::FunctionCall { name, args, .. } => ScalarNode::ScalarFunctionCall {
                name: name.clone(),
                args: args.iter().map(|a| self.build_scalar_agg(a, scope, bindings)).collect::<QuereusResult<Vec<_>>>()?,
            },
            Expr::In { expr, list, negated } => {
                let expr_plan = self.build_scalar_agg(expr, scope, bindings)?;
                match list {
                    ast::InList::Exprs(items) => {
                        let list =
                            items.iter().map(|i| self.build_scalar_agg(i, scope, bindings)).collect::<QuereusResult<Vec<_>>>()?;
                        ScalarNode::In { expr: expr_plan, list, negated: *negated }
                    }
                    ast::InList::Subquery(sub) => {
                        let (plan, _) = self.build_select(sub, Some(scope))?;
                        ScalarNode::InSubquery { expr: expr_plan, subquery: plan, negated: *negated }
                    }
                }
            }
            Expr::Exists { subquery, negated } => {
                let (plan, _) = self.build_select(subquery, Some(scope))?;
                ScalarNode::Exists { subquery: plan, negated: *negated }
            }
            Expr::ScalarSubquery(sub) => {
                let (plan, inner) = self.build_select(sub, Some(scope))?;
                inner.columns.first().ok_or_else(|| QuereusError::Resolution {
                    message: "scalar subquery must return exactly one column".into(),
                })?;
                ScalarNode::ScalarSubquery { subquery: plan }
            }
        }))
    }

    fn build_from<'o>(&self, from: &FromClause, outer: Option<&'o Scope<'o>>) -> QuereusResult<(PlanRef, Scope<'o>)> {
        match from {
            FromClause::Table { schema, name, alias } => {
                if schema.is_none() {
                    if let Some(entry) = self.lookup_cte(name) {
                        let alias = alias.clone().unwrap_or_else(|| name.clone());
                        let scope_columns: Vec<ScopeColumn> = entry
                            .columns
                            .iter()
                            .map(|c| ScopeColumn { table: Some(alias.clone()), name: c.name.clone(), attr: c.attr })
                            .collect();
                        let output = entry.columns.iter().map(|c| c.attr).collect();
                        let plan = Arc::new(PlanNode::CteReference { name: name.clone(), plan: entry.plan, output });
                        return Ok((plan, Scope::new(scope_columns)));
                    }
                }
                let (table, table_schema) = self.catalog.resolve_table(schema.as_deref(), name)?;
                let alias = alias.clone().unwrap_or_else(|| name.clone());
                let mut output = Vec::new();
                for column in &table_schema.columns {
                    output.push(ScopeColumn { table: Some(alias.clone()), name: column.name.clone(), attr: self.attrs.next() });
                }
                let plan = Arc::new(PlanNode::TableScan {
                    table,
                    schema: table_schema,
                    output: output.iter().map(|c| c.attr).collect(),
                    filter: None,
                });
                Ok((plan, Scope::new(output)))
            }
            FromClause::Subquery { body, alias } => {
                let (plan, inner_scope) = self.build_select(body, outer)?;
                let output: Vec<ScopeColumn> =
                    inner_scope.columns.iter().map(|c| ScopeColumn { table: Some(alias.clone()), name: c.name.clone(), attr: c.attr }).collect();
                Ok((plan, Scope::new(output)))
            }
            FromClause::TableFunction { name, args, alias } => {
                let args = args.iter().map(|a| self.build_scalar(a, &Scope::new(Vec::new()))).collect::<QuereusResult<Vec<_>>>()?;
                let attr = self.attrs.next();
                let output = vec![ScopeColumn { table: alias.clone(), name: SmolStr::new("value"), attr }];
                let plan = Arc::new(PlanNode::TableFunctionCall { name: name.clone(), args, output: vec![attr] });
                Ok((plan, Scope::new(output)))
            }
            FromClause::Join { left, right, kind, condition } => {
                let (left_plan, left_scope) = self.build_from(left, outer)?;
                let (right_plan, right_scope) = self.build_from(right, outer)?;
                let mut columns = left_scope.columns;
                columns.extend(right_scope.columns);
                let joined = Scope::new(columns);
                let condition = condition.as_ref().map(|c| self.build_scalar(c, &joined)).transpose()?;
                let plan = Arc::new(PlanNode::Join { left: left_plan, right: right_plan, kind: *kind, condition });
                Ok((plan, joined))
            }
        }
    }

    // ---- scalar ---------------------------------------------------------

    fn build_scalar(&self, expr: &Expr, scope: &Scope) -> QuereusResult<ScalarRef> {
        Ok(Arc::new(match expr {
            Expr::Literal(v) => ScalarNode::Literal(v.clone()),
            Expr::Column { qualifier, name } => ScalarNode::ColumnReference(scope.resolve(qualifier.as_deref(), name)?),
            Expr::Parameter(p) => ScalarNode::ParameterReference(match p {
                ast::ParamRef::Positional(n) => crate::plan::ParamSlot::Positional(*n),
                ast::ParamRef::Named(_) => crate::plan::ParamSlot::Named(0),
            }),
            Expr::Unary { op, operand } => ScalarNode::UnaryOp { op: *op, operand: self.build_scalar(operand, scope)? },
            Expr::Binary { op, left, right } => {
                ScalarNode::BinaryOp { op: *op, left: self.build_scalar(left, scope)?, right: self.build_scalar(right, scope)? }
            }
            Expr::Collate { expr, collation } => ScalarNode::Collate { expr: self.build_scalar(expr, scope)?, collation: collation.clone() },
            Expr::Cast { expr, ty } => ScalarNode::Cast { expr: self.build_scalar(expr, scope)?, ty: ty.clone() },
            Expr::Case { operand, whens, else_expr } => ScalarNode::Case {
                operand: operand.as_ref().map(|e| self.build_scalar(e, scope)).transpose()?,
                whens: whens
                    .iter()
                    .map(|(w, t)| Ok::<_, QuereusError>((self.build_scalar(w, scope)?, self.build_scalar(t, scope)?)))
                    .collect::<QuereusResult<Vec<_>>>()?,
                else_expr: else_expr.as_ref().map(|e| self.build_scalar(e, scope)).transpose()?,
            },
            Expr::FunctionCall { name, args, distinct, over: Some(_), .. } => {
                let attr = self.attrs.next();
                let arg_plans = args.iter().map(|a| self.build_scalar(a, scope)).collect::<QuereusResult<Vec<_>>>()?;
                ScalarNode::WindowFunctionCall { name: name.clone(), args: arg_plans, distinct: *distinct, output: attr }
            }
            Expr::FunctionCall { name, args, .. } => {
                let args = args.iter().map(|a| self.build_scalar(a, scope)).collect::<QuereusResult<Vec<_>>>()?;
                ScalarNode::ScalarFunctionCall { name: name.clone(), args }
            }
            Expr::In { expr, list, negated } => {
                let expr_plan = self.build_scalar(expr, scope)?;
                match list {
                    ast::InList::Exprs(items) => {
                        let list = items.iter().map(|i| self.build_scalar(i, scope)).collect::<QuereusResult<Vec<_>>>()?;
                        ScalarNode::In { expr: expr_plan, list, negated: *negated }
                    }
                    ast::InList::Subquery(sub) => {
                        let (plan, _) = self.build_select(sub, Some(scope))?;
                        ScalarNode::InSubquery { expr: expr_plan, subquery: plan, negated: *negated }
                    }
                }
            }
            Expr::Exists { subquery, negated } => {
                let (plan, _) = self.build_select(subquery, Some(scope))?;
                ScalarNode::Exists { subquery: plan, negated: *negated }
            }
            Expr::ScalarSubquery(sub) => {
                let (plan, inner) = self.build_select(sub, Some(scope))?;
                inner.columns.first().ok_or_else(|| QuereusError::Resolution {
                    message: "scalar subquery must return exactly one column".into(),
                })?;
                ScalarNode::ScalarSubquery { subquery: plan }
            }
        }))
    }

    // ---- mutating statements --------------------------------------------

    fn build_insert(&self, insert: &InsertStmt) -> QuereusResult<PlanRef> {
        let (table, schema) = self.catalog.resolve_table(None, &insert.table)?;
        let column_mapping = resolve_column_mapping(&schema, insert.columns.as_deref())?;

        let source = match &insert.source {
            InsertSource::Values(rows) => {
                let empty = Scope::new(Vec::new());
                let mut output = Vec::new();
                let mut plan_rows = Vec::new();
                for row in rows {
                    let mut values = Vec::new();
                    for expr in row {
                        values.push(self.build_scalar(expr, &empty)?);
                    }
                    plan_rows.push(values);
                }
                for _ in &column_mapping {
                    output.push(self.attrs.next());
                }
                Arc::new(PlanNode::Values { rows: plan_rows, output })
            }
            InsertSource::Select(select) => self.build_select(select, None)?.0,
            InsertSource::DefaultValues => Arc::new(PlanNode::Values { rows: vec![vec![]], output: vec![] }),
        };

        Ok(Arc::new(PlanNode::Insert { table, schema, source, column_mapping, on_conflict: insert.on_conflict }))
    }

    fn build_update(&self, update: &UpdateStmt) -> QuereusResult<PlanRef> {
        let (table, schema) = self.catalog.resolve_table(None, &update.table)?;
        let alias = update.alias.clone().unwrap_or_else(|| update.table.clone());
        let mut columns = Vec::new();
        for column in &schema.columns {
            columns.push(ScopeColumn { table: Some(alias.clone()), name: column.name.clone(), attr: self.attrs.next() });
        }
        let scope = Scope::new(columns);

        let mut plan: PlanRef = Arc::new(PlanNode::TableScan {
            table: table.clone(),
            schema: schema.clone(),
            output: scope.columns.iter().map(|c| c.attr).collect(),
            filter: None,
        });
        if let Some(where_expr) = &update.where_clause {
            let predicate = self.build_scalar(where_expr, &scope)?;
            plan = Arc::new(PlanNode::Filter { input: plan, predicate });
        }

        let mut assignments = Vec::new();
        for (column_name, expr) in &update.assignments {
            let index = schema.column_index(column_name).ok_or_else(|| QuereusError::Resolution {
                message: format!("no such column: {column_name}"),
            })?;
            assignments.push((index, self.build_scalar(expr, &scope)?));
        }

        Ok(Arc::new(PlanNode::Update { table, schema, source: plan, assignments, on_conflict: ConflictPolicy::Abort }))
    }

    fn build_delete(&self, delete: &DeleteStmt) -> QuereusResult<PlanRef> {
        let (table, schema) = self.catalog.resolve_table(None, &delete.table)?;
        let alias = delete.alias.clone().unwrap_or_else(|| delete.table.clone());
        let mut columns = Vec::new();
        for column in &schema.columns {
            columns.push(ScopeColumn { table: Some(alias.clone()), name: column.name.clone(), attr: self.attrs.next() });
        }
        let scope = Scope::new(columns);

        let mut plan: PlanRef = Arc::new(PlanNode::TableScan {
            table: table.clone(),
            schema: schema.clone(),
            output: scope.columns.iter().map(|c| c.attr).collect(),
            filter: None,
        });
        if let Some(where_expr) = &delete.where_clause {
            let predicate = self.build_scalar(where_expr, &scope)?;
            plan = Arc::new(PlanNode::Filter { input: plan, predicate });
        }

        Ok(Arc::new(PlanNode::Delete { table, schema, source: plan }))
    }
}

fn resolve_column_mapping(schema: &TableSchema, columns: Option<&[SmolStr]>) -> QuereusResult<Vec<usize>> {
    match columns {
        Some(names) => names
            .iter()
            .map(|n| schema.column_index(n).ok_or_else(|| QuereusError::Resolution { message: format!("no such column: {n}") }))
            .collect(),
        None => Ok((0..schema.columns.len()).collect()),
    }
}

fn infer_name(expr: &Expr) -> SmolStr {
    match expr {
        Expr::Column { name, .. } => name.clone(),
        Expr::FunctionCall { name, .. } => name.clone(),
        _ => SmolStr::new("expr"),
    }
}

fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, over: None, args, .. } => {
            AGGREGATE_NAMES.contains(&name.as_str().to_ascii_lowercase().as_str()) || args.iter().any(contains_aggregate)
        }
        Expr::Binary { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::Unary { operand, .. } => contains_aggregate(operand),
        Expr::Cast { expr, .. } | Expr::Collate { expr, .. } => contains_aggregate(expr),
        Expr::Case { operand, whens, else_expr } => {
            operand.as_deref().is_some_and(contains_aggregate)
                || whens.iter().any(|(w, t)| contains_aggregate(w) || contains_aggregate(t))
                || else_expr.as_deref().is_some_and(contains_aggregate)
        }
        _ => false,
    }
}

fn collect_aggregate_calls<'e>(
    expr: &'e Expr,
    sink: &mut impl FnMut(&'e Expr, &str, &[Expr], bool) -> QuereusResult<()>,
) -> QuereusResult<()> {
    match expr {
        Expr::FunctionCall { name, args, over: None, distinct, .. } if AGGREGATE_NAMES.contains(&name.as_str().to_ascii_lowercase().as_str()) => {
            sink(expr, name, args, *distinct)
        }
        Expr::Binary { left, right, .. } => {
            collect_aggregate_calls(left, sink)?;
            collect_aggregate_calls(right, sink)
        }
        Expr::Unary { operand, .. } => collect_aggregate_calls(operand, sink),
        Expr::Cast { expr, .. } | Expr::Collate { expr, .. } => collect_aggregate_calls(expr, sink),
        Expr::Case { operand, whens, else_expr } => {
            if let Some(o) = operand {
                collect_aggregate_calls(o, sink)?;
            }
            for (w, t) in whens {
                collect_aggregate_calls(w, sink)?;
                collect_aggregate_calls(t, sink)?;
            }
            if let Some(e) = else_expr {
                collect_aggregate_calls(e, sink)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn contains_window(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { over: Some(_), .. } => true,
        Expr::FunctionCall { args, .. } => args.iter().any(contains_window),
        Expr::Binary { left, right, .. } => contains_window(left) || contains_window(right),
        Expr::Unary { operand, .. } => contains_window(operand),
        Expr::Cast { expr, .. } | Expr::Collate { expr, .. } => contains_window(expr),
        Expr::Case { operand, whens, else_expr } => {
            operand.as_deref().is_some_and(contains_window)
                || whens.iter().any(|(w, t)| contains_window(w) || contains_window(t))
                || else_expr.as_deref().is_some_and(contains_window)
        }
        _ => false,
    }
}

fn collect_window_calls<'e>(
    expr: &'e Expr,
    sink: &mut impl FnMut(&'e Expr, &str, &[Expr], bool, &'e ast::WindowRef) -> QuereusResult<()>,
) -> QuereusResult<()> {
    match expr {
        Expr::FunctionCall { name, args, over: Some(over), distinct, .. } => sink(expr, name, args, *distinct, over),
        Expr::FunctionCall { args, .. } => {
            for a in args {
                collect_window_calls(a, sink)?;
            }
            Ok(())
        }
        Expr::Binary { left, right, .. } => {
            collect_window_calls(left, sink)?;
            collect_window_calls(right, sink)
        }
        Expr::Unary { operand, .. } => collect_window_calls(operand, sink),
        Expr::Cast { expr, .. } | Expr::Collate { expr, .. } => collect_window_calls(expr, sink),
        Expr::Case { operand, whens, else_expr } => {
            if let Some(o) = operand {
                collect_window_calls(o, sink)?;
            }
            for (w, t) in whens {
                collect_window_calls(w, sink)?;
                collect_window_calls(t, sink)?;
            }
            if let Some(e) = else_expr {
                collect_window_calls(e, sink)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn resolve_window_spec(over: &ast::WindowRef, core: &SelectCore) -> QuereusResult<ast::WindowSpec> {
    match over {
        ast::WindowRef::Inline(spec) => Ok(spec.clone()),
        ast::WindowRef::Named(name) => core
            .window_defs
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
            .map(|w| w.spec.clone())
            .ok_or_else(|| QuereusError::Resolution { message: format!("no such window: {name}") }),
    }
}
