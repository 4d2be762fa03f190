use quereus::{Connection, QuereusResult};
use quereus_core::Row;

use crate::dsl;

/// Runs every statement in `script` against `conn` in order, writing result
/// rows to stdout. Stops at the first failing statement (the CLI exit-code
/// convention in §6 is "0 on success, non-zero on SQL error", which only
/// makes sense for a script that stops there) and surfaces its error.
pub fn run_script(conn: &Connection, script: &str) -> Result<(), String> {
    let statements = dsl::parse_script(script)?;
    for stmt in &statements {
        let rows = conn.exec(stmt).map_err(|e| e.to_string())?;
        print_rows(rows).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn print_rows(rows: impl Iterator<Item = QuereusResult<Row>>) -> QuereusResult<()> {
    for row in rows {
        let row = row?;
        let rendered: Vec<String> = row.values().iter().map(format_value).collect();
        println!("{}", rendered.join("|"));
    }
    Ok(())
}

fn format_value(value: &quereus_core::Value) -> String {
    use quereus_core::Value;
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.to_string(),
        Value::Blob(b) => format!("x'{}'", b.iter().map(|byte| format!("{byte:02x}")).collect::<String>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quereus::{Database, EngineConfig};

    #[test]
    fn runs_ddl_dml_and_query_end_to_end() {
        let db = Database::open(EngineConfig::default());
        let conn = db.connect();
        run_script(&conn, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); INSERT INTO t VALUES (1, 'a');").unwrap();

        let select = dsl::parse_script("SELECT id, v FROM t").unwrap().remove(0);
        let rows: Vec<_> = conn.exec(&select).unwrap().map(|r| r.unwrap().values().to_vec()).collect();
        assert_eq!(rows, vec![vec![quereus_core::Value::Integer(1), quereus_core::Value::from("a")]]);
    }

    #[test]
    fn stops_at_first_error() {
        let db = Database::open(EngineConfig::default());
        let conn = db.connect();
        let err = run_script(&conn, "SELECT * FROM nosuchtable;").unwrap_err();
        assert!(!err.is_empty());
    }
}
