use quereus_core::{ConstraintKind, QuereusError, QuereusResult, Row, TableSchema, Value};

/// Applies column defaults and enforces NOT NULL, producing the row the
/// mutation actually stores. Type affinity beyond this (coercing a TEXT
/// literal into an INTEGER column, say) is the planner/emitter's concern
/// when it builds the row in the first place; this is the storage-level
/// backstop the mutation contract calls for.
pub fn prepare_row(schema: &TableSchema, row: Row) -> QuereusResult<Row> {
    if row.len() != schema.column_count() {
        return Err(QuereusError::Internal {
            message: format!(
                "row has {} values but table {} has {} columns",
                row.len(),
                schema.table_name,
                schema.column_count()
            ),
        });
    }

    let mut values: Vec<Value> = row.values().to_vec();
    for (i, column) in schema.columns.iter().enumerate() {
        if values[i].is_null() {
            if let Some(default) = &column.default {
                values[i] = default.clone();
            }
        }
        if values[i].is_null() && !column.nullable {
            return Err(QuereusError::Constraint {
                kind: ConstraintKind::NotNull,
                message: format!("NOT NULL constraint failed: {}.{}", schema.table_name, column.name),
                existing: None,
            });
        }
    }

    for check in &schema.check_constraints {
        if !check.expr.evaluate(&values)? {
            let name = check.name.as_deref().unwrap_or("<anonymous>");
            return Err(QuereusError::Constraint {
                kind: ConstraintKind::Check,
                message: format!("CHECK constraint failed: {}.{}", schema.table_name, name),
                existing: None,
            });
        }
    }

    Ok(Row::from(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quereus_core::{Collation, ColumnDef, KeyDef, LogicalType};
    use smol_str::SmolStr;

    fn schema() -> TableSchema {
        TableSchema {
            schema_name: SmolStr::new("main"),
            table_name: SmolStr::new("t"),
            columns: vec![
                ColumnDef::new("id", LogicalType::Integer),
                ColumnDef {
                    name: SmolStr::new("v"),
                    logical_type: LogicalType::Text,
                    nullable: false,
                    default: Some(Value::from("unset")),
                    collation: Collation::Binary,
                    generated: false,
                },
            ],
            primary_key: KeyDef::single(0),
            secondary_indexes: vec![],
            check_constraints: vec![],
            module_name: SmolStr::new("memory"),
        }
    }

    #[test]
    fn rejects_row_failing_a_check_constraint() {
        let mut s = schema();
        s.check_constraints.push(quereus_core::CheckConstraint {
            name: Some(SmolStr::new("id_positive")),
            expr: quereus_core::CheckPredicate::new(|row| Ok(matches!(row[0], Value::Integer(n) if n > 0))),
        });
        let ok = Row::from(vec![Value::Integer(1), Value::from("a")]);
        assert!(prepare_row(&s, ok).is_ok());
        let bad = Row::from(vec![Value::Integer(-1), Value::from("a")]);
        let err = prepare_row(&s, bad).unwrap_err();
        assert!(matches!(err, QuereusError::Constraint { kind: ConstraintKind::Check, .. }));
    }

    #[test]
    fn applies_default_for_missing_value() {
        let row = Row::from(vec![Value::Integer(1), Value::Null]);
        let prepared = prepare_row(&schema(), row).unwrap();
        assert_eq!(prepared.get(1), Some(&Value::from("unset")));
    }

    #[test]
    fn rejects_null_with_no_default_and_not_nullable() {
        let mut s = schema();
        s.columns[1].default = None;
        let row = Row::from(vec![Value::Integer(1), Value::Null]);
        assert!(prepare_row(&s, row).is_err());
    }
}
