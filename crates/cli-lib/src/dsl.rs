//! The tiny statement language this shell understands. It is not SQL: the
//! engine itself never parses SQL text (that front end is out of scope,
//! per §6), so this is the minimum a terminal demo needs to build
//! `quereus::ast::Statement` values by hand — a handful of keywords
//! (`CREATE TABLE`/`CREATE INDEX`/`DROP INDEX`/`INSERT INTO`/`SELECT`/
//! `BEGIN`/`COMMIT`/`ROLLBACK`/`SAVEPOINT`/`RELEASE`/`ROLLBACK TO`) with no
//! expressions beyond a literal or a bare `column = literal` comparison.

use quereus::ast;
use quereus_core::{ColumnDef, ConflictPolicy, KeyDef, LogicalType, Value};
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Number(String),
    Punct(char),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' | '=' | '*' | ';' => {
                tokens.push(Token::Punct(c));
                chars.next();
            }
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            if chars.peek() == Some(&'\'') {
                                s.push('\'');
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.clone().nth(1).is_some_and(|d| d.is_ascii_digit())) => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(s));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(s));
            }
            other => return Err(format!("unexpected character: {other}")),
        }
    }
    Ok(tokens)
}

/// Splits a whole script into individual statements' token streams,
/// dropping empty ones (a trailing `;`, blank lines).
fn split_statements(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    tokens
        .split(|t| *t == Token::Punct(';'))
        .map(|chunk| chunk.to_vec())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

pub fn parse_script(input: &str) -> Result<Vec<ast::Statement>, String> {
    let tokens = tokenize(input)?;
    split_statements(tokens).iter().map(|stmt_tokens| Cursor::new(stmt_tokens).parse_statement()).collect()
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_word(&mut self, want: &str) -> Result<(), String> {
        match self.advance() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(want) => Ok(()),
            other => Err(format!("expected `{want}`, found {other:?}")),
        }
    }

    fn peek_word_is(&self, want: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(want))
    }

    fn eat_punct(&mut self, want: char) -> Result<(), String> {
        match self.advance() {
            Some(Token::Punct(c)) if *c == want => Ok(()),
            other => Err(format!("expected `{want}`, found {other:?}")),
        }
    }

    fn ident(&mut self) -> Result<SmolStr, String> {
        match self.advance() {
            Some(Token::Word(w)) => Ok(SmolStr::new(w)),
            other => Err(format!("expected an identifier, found {other:?}")),
        }
    }

    fn literal(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Value::from(s.as_str())),
            Some(Token::Number(n)) => {
                if n.contains('.') {
                    n.parse::<f64>().map(Value::from).map_err(|e| e.to_string())
                } else {
                    n.parse::<i64>().map(Value::from).map_err(|e| e.to_string())
                }
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("null") => Ok(Value::Null),
            other => Err(format!("expected a literal, found {other:?}")),
        }
    }

    fn parse_statement(&mut self) -> Result<ast::Statement, String> {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("begin") => {
                self.advance();
                Ok(ast::Statement::Begin)
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("commit") => {
                self.advance();
                Ok(ast::Statement::Commit)
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("rollback") => {
                self.advance();
                if self.peek_word_is("to") {
                    self.advance();
                    Ok(ast::Statement::RollbackTo { name: self.ident()? })
                } else {
                    Ok(ast::Statement::Rollback)
                }
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("savepoint") => {
                self.advance();
                Ok(ast::Statement::Savepoint { name: self.ident()? })
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("release") => {
                self.advance();
                Ok(ast::Statement::Release { name: self.ident()? })
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("create") => self.parse_create(),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("drop") => self.parse_drop_index(),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("insert") => self.parse_insert(),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("select") => self.parse_select().map(ast::Statement::Select),
            other => Err(format!("unrecognized statement, starting at {other:?}")),
        }
    }

    fn parse_create(&mut self) -> Result<ast::Statement, String> {
        self.eat_word("create")?;
        if self.peek_word_is("table") {
            self.advance();
            let mut if_not_exists = false;
            if self.peek_word_is("if") {
                self.advance();
                self.eat_word("not")?;
                self.eat_word("exists")?;
                if_not_exists = true;
            }
            let name = self.ident()?;
            self.eat_punct('(')?;
            let mut columns = Vec::new();
            let mut primary_key = None;
            loop {
                let col_name = self.ident()?;
                let ty = self.logical_type()?;
                let mut col = ColumnDef::new(col_name, ty);
                if self.peek_word_is("primary") {
                    self.advance();
                    self.eat_word("key")?;
                    primary_key = Some(columns.len());
                    col.nullable = false;
                }
                columns.push(col);
                match self.peek() {
                    Some(Token::Punct(',')) => {
                        self.advance();
                    }
                    Some(Token::Punct(')')) => break,
                    other => return Err(format!("expected `,` or `)`, found {other:?}")),
                }
            }
            self.eat_punct(')')?;
            let primary_key = match primary_key {
                Some(idx) => KeyDef::single(idx),
                None => KeyDef::single(0),
            };
            Ok(ast::Statement::CreateTable(ast::CreateTableStmt {
                name,
                columns,
                primary_key,
                check_constraints: vec![],
                if_not_exists,
            }))
        } else {
            self.eat_word("index")?;
            let name = self.ident()?;
            self.eat_word("on")?;
            let table = self.ident()?;
            self.eat_punct('(')?;
            let mut columns = Vec::new();
            loop {
                columns.push(self.ident()?);
                match self.peek() {
                    Some(Token::Punct(',')) => {
                        self.advance();
                    }
                    Some(Token::Punct(')')) => break,
                    other => return Err(format!("expected `,` or `)`, found {other:?}")),
                }
            }
            self.eat_punct(')')?;
            Ok(ast::Statement::CreateIndex(ast::CreateIndexStmt { name, table, columns }))
        }
    }

    fn parse_drop_index(&mut self) -> Result<ast::Statement, String> {
        self.eat_word("drop")?;
        self.eat_word("index")?;
        Ok(ast::Statement::DropIndex { name: self.ident()? })
    }

    fn logical_type(&mut self) -> Result<LogicalType, String> {
        let name = self.ident()?;
        match name.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" => Ok(LogicalType::Integer),
            "REAL" | "FLOAT" | "DOUBLE" => Ok(LogicalType::Real),
            "TEXT" | "VARCHAR" | "STRING" => Ok(LogicalType::Text),
            "BLOB" => Ok(LogicalType::Blob),
            "BOOLEAN" | "BOOL" => Ok(LogicalType::Boolean),
            "NUMERIC" => Ok(LogicalType::Numeric),
            other => Err(format!("unknown column type: {other}")),
        }
    }

    fn parse_insert(&mut self) -> Result<ast::Statement, String> {
        self.eat_word("insert")?;
        self.eat_word("into")?;
        let table = self.ident()?;
        let columns = if matches!(self.peek(), Some(Token::Punct('('))) {
            self.advance();
            let mut cols = Vec::new();
            loop {
                cols.push(self.ident()?);
                match self.peek() {
                    Some(Token::Punct(',')) => {
                        self.advance();
                    }
                    Some(Token::Punct(')')) => break,
                    other => return Err(format!("expected `,` or `)`, found {other:?}")),
                }
            }
            self.eat_punct(')')?;
            Some(cols)
        } else {
            None
        };
        self.eat_word("values")?;
        let mut rows = Vec::new();
        loop {
            self.eat_punct('(')?;
            let mut row = Vec::new();
            loop {
                row.push(ast::Expr::Literal(self.literal()?));
                match self.peek() {
                    Some(Token::Punct(',')) => {
                        self.advance();
                    }
                    Some(Token::Punct(')')) => break,
                    other => return Err(format!("expected `,` or `)`, found {other:?}")),
                }
            }
            self.eat_punct(')')?;
            rows.push(row);
            if matches!(self.peek(), Some(Token::Punct(','))) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(ast::Statement::Insert(ast::InsertStmt {
            table,
            columns,
            source: ast::InsertSource::Values(rows),
            on_conflict: ConflictPolicy::Abort,
        }))
    }

    fn parse_select(&mut self) -> Result<ast::SelectStmt, String> {
        self.eat_word("select")?;
        let columns = if matches!(self.peek(), Some(Token::Punct('*'))) {
            self.advance();
            vec![ast::SelectItem::Wildcard { qualifier: None }]
        } else {
            let mut items = Vec::new();
            loop {
                let name = self.ident()?;
                items.push(ast::SelectItem::Expr { expr: ast::Expr::Column { qualifier: None, name }, alias: None });
                if matches!(self.peek(), Some(Token::Punct(','))) {
                    self.advance();
                } else {
                    break;
                }
            }
            items
        };
        self.eat_word("from")?;
        let table = self.ident()?;
        let where_clause = if self.peek_word_is("where") {
            self.advance();
            Some(self.parse_conjunction()?)
        } else {
            None
        };
        let mut order_by = Vec::new();
        if self.peek_word_is("order") {
            self.advance();
            self.eat_word("by")?;
            let name = self.ident()?;
            let descending = if self.peek_word_is("desc") {
                self.advance();
                true
            } else {
                if self.peek_word_is("asc") {
                    self.advance();
                }
                false
            };
            order_by.push(ast::OrderByItem { expr: ast::Expr::Column { qualifier: None, name }, descending, nulls_first: None });
        }
        Ok(ast::SelectStmt {
            ctes: vec![],
            core: ast::SelectCore {
                distinct: false,
                columns,
                from: Some(ast::FromClause::Table { schema: None, name: table, alias: None }),
                where_clause,
                group_by: vec![],
                having: None,
                window_defs: vec![],
            },
            compound: vec![],
            order_by,
            limit: None,
            offset: None,
        })
    }

    /// `col = literal [AND col = literal]*` — the only predicate shape this
    /// shell's `WHERE` understands.
    fn parse_conjunction(&mut self) -> Result<ast::Expr, String> {
        let mut expr = self.parse_comparison()?;
        while self.peek_word_is("and") {
            self.advance();
            let rhs = self.parse_comparison()?;
            expr = ast::Expr::Binary { op: ast::BinaryOp::And, left: Box::new(expr), right: Box::new(rhs) };
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<ast::Expr, String> {
        let name = self.ident()?;
        self.eat_punct('=')?;
        let value = self.literal()?;
        Ok(ast::Expr::Binary {
            op: ast::BinaryOp::Eq,
            left: Box::new(ast::Expr::Column { qualifier: None, name }),
            right: Box::new(ast::Expr::Literal(value)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_create_table_and_insert() {
        let stmts = parse_script(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); INSERT INTO t VALUES (1, 'a'), (2, 'b');",
        )
        .unwrap();
        assert_eq!(stmts.len(), 2);
        match &stmts[0] {
            ast::Statement::CreateTable(s) => {
                assert_eq!(s.name, "t");
                assert_eq!(s.columns.len(), 2);
                assert_eq!(s.primary_key.columns, vec![(0, quereus_core::SortDirection::Ascending)]);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
        match &stmts[1] {
            ast::Statement::Insert(s) => {
                assert_eq!(s.table, "t");
                match &s.source {
                    ast::InsertSource::Values(rows) => assert_eq!(rows.len(), 2),
                    other => panic!("unexpected source: {other:?}"),
                }
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn parses_select_with_where_and_order_by() {
        let stmts = parse_script("SELECT id, v FROM t WHERE id = 1 ORDER BY id DESC").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            ast::Statement::Select(s) => {
                assert_eq!(s.core.columns.len(), 2);
                assert!(s.core.where_clause.is_some());
                assert_eq!(s.order_by.len(), 1);
                assert!(s.order_by[0].descending);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn parses_transaction_control() {
        let stmts = parse_script("BEGIN; SAVEPOINT s; ROLLBACK TO s; RELEASE s; COMMIT;").unwrap();
        assert_eq!(
            stmts,
            vec![
                ast::Statement::Begin,
                ast::Statement::Savepoint { name: SmolStr::new("s") },
                ast::Statement::RollbackTo { name: SmolStr::new("s") },
                ast::Statement::Release { name: SmolStr::new("s") },
                ast::Statement::Commit,
            ]
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_script("FROBNICATE t").is_err());
    }
}
