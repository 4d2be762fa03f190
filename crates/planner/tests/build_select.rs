use std::sync::Arc;

use pretty_assertions::assert_eq;
use quereus_core::{ColumnDef, KeyDef, LogicalType, QuereusError, QuereusResult, TableSchema};
use quereus_planner::ast::{BinaryOp, Expr, FromClause, SelectCore, SelectItem, SelectStmt, Statement};
use quereus_planner::catalog::Catalog;
use quereus_planner::plan::PlanNode;
use quereus_planner::{optimize, Planner};
use quereus_storage::InMemoryModule;
use quereus_vtab::{Module, VirtualTable};
use smol_str::SmolStr;

struct FixtureCatalog {
    module: InMemoryModule,
    schemas: std::collections::HashMap<String, TableSchema>,
}

impl FixtureCatalog {
    fn new() -> Self {
        FixtureCatalog { module: InMemoryModule::new(), schemas: std::collections::HashMap::new() }
    }

    fn with_table(mut self, name: &str, schema: TableSchema) -> Self {
        self.schemas.insert(name.to_string(), schema);
        self
    }
}

impl Catalog for FixtureCatalog {
    fn resolve_table(&self, _schema: Option<&str>, name: &str) -> QuereusResult<(Arc<dyn VirtualTable>, TableSchema)> {
        let schema = self.schemas.get(name).cloned().ok_or_else(|| QuereusError::Resolution {
            message: format!("no such table: {name}"),
        })?;
        let table = self.module.connect(name, &schema, &Default::default())?;
        let schema = table.schema();
        Ok((table, schema))
    }
}

fn users_schema() -> TableSchema {
    TableSchema {
        schema_name: SmolStr::new("main"),
        table_name: SmolStr::new("users"),
        columns: vec![ColumnDef::new("id", LogicalType::Integer), ColumnDef::new("name", LogicalType::Text)],
        primary_key: KeyDef::single(0),
        secondary_indexes: vec![],
        check_constraints: vec![],
        module_name: SmolStr::new("memory"),
    }
}

fn select_all_from_users() -> Statement {
    Statement::Select(SelectStmt {
        ctes: vec![],
        core: SelectCore {
            distinct: false,
            columns: vec![SelectItem::Wildcard { qualifier: None }],
            from: Some(FromClause::Table { schema: None, name: SmolStr::new("users"), alias: None }),
            where_clause: None,
            group_by: vec![],
            having: None,
            window_defs: vec![],
        },
        compound: vec![],
        order_by: vec![],
        limit: None,
        offset: None,
    })
}

#[test]
fn select_star_produces_project_over_table_scan() {
    let catalog = FixtureCatalog::new().with_table("users", users_schema());
    let planner = Planner::new(&catalog);
    let plan = planner.build_statement(&select_all_from_users()).unwrap();

    match &*plan {
        PlanNode::Project { input, columns } => {
            assert_eq!(columns.len(), 2);
            assert!(matches!(&**input, PlanNode::TableScan { .. }));
        }
        _ => panic!("expected Project at plan root"),
    }
}

#[test]
fn where_clause_with_eq_pushes_down_into_table_scan() {
    let catalog = FixtureCatalog::new().with_table("users", users_schema());
    let planner = Planner::new(&catalog);

    let mut stmt = select_all_from_users();
    let Statement::Select(select) = &mut stmt else { unreachable!() };
    select.core.where_clause = Some(Expr::Binary {
        op: BinaryOp::Eq,
        left: Box::new(Expr::Column { qualifier: None, name: SmolStr::new("id") }),
        right: Box::new(Expr::Literal(quereus_core::Value::Integer(1))),
    });

    let plan = planner.build_statement(&stmt).unwrap();
    let plan = optimize(plan).unwrap();

    fn find_scan(node: &PlanNode) -> bool {
        match node {
            PlanNode::TableScan { filter, .. } => filter.is_some(),
            PlanNode::Project { input, .. } | PlanNode::Filter { input, .. } | PlanNode::VerifyConstraints { input, .. } => find_scan(input),
            _ => false,
        }
    }
    assert!(find_scan(&plan), "expected the id = 1 predicate to push into the scan's best_index plan");
}

#[test]
fn unknown_column_is_a_resolution_error() {
    let catalog = FixtureCatalog::new().with_table("users", users_schema());
    let planner = Planner::new(&catalog);

    let mut stmt = select_all_from_users();
    let Statement::Select(select) = &mut stmt else { unreachable!() };
    select.core.where_clause = Some(Expr::Column { qualifier: None, name: SmolStr::new("nonexistent") });

    let err = planner.build_statement(&stmt).unwrap_err();
    assert!(matches!(err, QuereusError::Resolution { .. }));
}
