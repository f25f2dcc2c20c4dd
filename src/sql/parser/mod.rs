/// Recursive-descent SQL parser over the lexer's token stream.
///
/// Statement-level productions live here; expressions and SELECT are in
/// `expr_and_select`. The first error aborts parsing; errors carry the
/// offending token's line and column.
mod expr_and_select;

use crate::error::{Result, ZqError};
use crate::sql::ast::*;
use crate::sql::lexer::{Lexer, SpannedToken, Token};

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

/// Parse exactly one statement (a trailing semicolon is allowed).
pub fn parse_statement(sql: &str) -> Result<Stmt> {
    let mut parser = Parser::new(Lexer::tokenize(sql)?);
    let stmt = parser.statement()?;
    parser.eat(&Token::Semicolon);
    parser.expect_end()?;
    Ok(stmt)
}

/// Parse a semicolon-separated script.
pub fn parse_statements(sql: &str) -> Result<Vec<Stmt>> {
    let mut parser = Parser::new(Lexer::tokenize(sql)?);
    let mut stmts = Vec::new();
    loop {
        while parser.eat(&Token::Semicolon) {}
        if parser.at_end() {
            return Ok(stmts);
        }
        stmts.push(parser.statement()?);
        if !parser.at_end() && !parser.check(&Token::Semicolon) {
            return Err(parser.error_here("expected ';' between statements"));
        }
    }
}

/// Parse a bare expression (stored DEFAULT / CHECK text).
pub fn parse_expression(sql: &str) -> Result<Expr> {
    let mut parser = Parser::new(Lexer::tokenize(sql)?);
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser { tokens, pos: 0 }
    }

    // --- Token plumbing ---

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    pub(crate) fn peek_at(&self, k: usize) -> Option<&Token> {
        self.tokens.get(self.pos + k).map(|t| &t.token)
    }

    pub(crate) fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub(crate) fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the token if it matches.
    pub(crate) fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected {}", what)))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error_here("unexpected trailing input"))
        }
    }

    pub(crate) fn error_here(&self, message: &str) -> ZqError {
        match self.tokens.get(self.pos.min(self.tokens.len().saturating_sub(1))) {
            Some(spanned) => ZqError::Syntax {
                line: spanned.line,
                column: spanned.column,
                token: spanned.token.describe(),
                message: message.to_string(),
            },
            None => ZqError::Syntax {
                line: 1,
                column: 1,
                token: "<end of input>".into(),
                message: message.to_string(),
            },
        }
    }

    /// Identifier, allowing non-reserved words used as names.
    pub(crate) fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.advance() {
                Some(Token::Ident(name)) => Ok(name),
                _ => unreachable!(),
            },
            _ => Err(self.error_here("expected identifier")),
        }
    }

    // --- Statements ---

    pub(crate) fn statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Create) => self.create_statement(),
            Some(Token::Drop) => self.drop_statement(),
            Some(Token::Insert) => self.insert_statement(),
            Some(Token::Update) => self.update_statement(),
            Some(Token::Delete) => self.delete_statement(),
            Some(Token::Select) => Ok(Stmt::Select(Box::new(self.select()?))),
            Some(Token::Begin) => self.begin_statement(),
            Some(Token::Commit) => {
                self.advance();
                Ok(Stmt::Commit)
            }
            Some(Token::Rollback) => self.rollback_statement(),
            Some(Token::Savepoint) => {
                self.advance();
                Ok(Stmt::Savepoint(self.ident()?))
            }
            Some(Token::Pragma) => self.pragma_statement(),
            _ => Err(self.error_here("expected a statement")),
        }
    }

    fn create_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Create, "CREATE")?;
        let unique = self.eat(&Token::Unique);
        match self.peek() {
            Some(Token::Table) if !unique => self.create_table(),
            Some(Token::Index) => self.create_index(unique),
            _ => Err(self.error_here("expected TABLE or INDEX after CREATE")),
        }
    }

    fn if_not_exists(&mut self) -> Result<bool> {
        if self.eat(&Token::If) {
            self.expect(Token::Not, "NOT after IF")?;
            self.expect(Token::Exists, "EXISTS after IF NOT")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn create_table(&mut self) -> Result<Stmt> {
        self.expect(Token::Table, "TABLE")?;
        let if_not_exists = self.if_not_exists()?;
        let name = self.ident()?;
        self.expect(Token::LParen, "'(' before column list")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.column_spec()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "')' after column list")?;
        Ok(Stmt::CreateTable {
            name,
            if_not_exists,
            columns,
        })
    }

    /// One column definition with its constraints.
    fn column_spec(&mut self) -> Result<ColumnSpec> {
        let name = self.ident()?;
        let declared_type = self.declared_type()?;

        let mut spec = ColumnSpec {
            name,
            declared_type,
            primary_key: false,
            autoincrement: false,
            not_null: false,
            unique: false,
            default: None,
            check: None,
            references: None,
        };

        loop {
            match self.peek() {
                Some(Token::Primary) => {
                    self.advance();
                    self.expect(Token::Key, "KEY after PRIMARY")?;
                    spec.primary_key = true;
                    spec.not_null = true;
                    spec.autoincrement = self.eat(&Token::Autoincrement);
                }
                Some(Token::Not) => {
                    self.advance();
                    self.expect(Token::Null, "NULL after NOT")?;
                    spec.not_null = true;
                }
                Some(Token::Unique) => {
                    self.advance();
                    spec.unique = true;
                }
                Some(Token::Default) => {
                    self.advance();
                    // Literal, or a parenthesized expression (function call).
                    spec.default = Some(if self.eat(&Token::LParen) {
                        let expr = self.expr()?;
                        self.expect(Token::RParen, "')' after DEFAULT expression")?;
                        expr
                    } else {
                        self.literal_default()?
                    });
                }
                Some(Token::Check) => {
                    self.advance();
                    self.expect(Token::LParen, "'(' after CHECK")?;
                    spec.check = Some(self.expr()?);
                    self.expect(Token::RParen, "')' after CHECK expression")?;
                }
                Some(Token::References) => {
                    self.advance();
                    let table = self.ident()?;
                    let column = if self.eat(&Token::LParen) {
                        let col = self.ident()?;
                        self.expect(Token::RParen, "')' after referenced column")?;
                        Some(col)
                    } else {
                        None
                    };
                    spec.references = Some((table, column));
                }
                _ => break,
            }
        }
        Ok(spec)
    }

    /// A declared type: one or more name words plus an optional size suffix,
    /// e.g. VARCHAR(32) or DOUBLE PRECISION. Absent before a constraint.
    fn declared_type(&mut self) -> Result<Option<String>> {
        let mut words = Vec::new();
        while let Some(Token::Ident(word)) = self.peek() {
            words.push(word.clone());
            self.advance();
        }
        if words.is_empty() {
            return Ok(None);
        }
        let mut name = words.join(" ");
        if self.eat(&Token::LParen) {
            let mut args = Vec::new();
            loop {
                match self.advance() {
                    Some(Token::Integer(v)) => args.push(v.to_string()),
                    _ => return Err(self.error_here("expected integer in type size")),
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "')' after type size")?;
            name.push('(');
            name.push_str(&args.join(", "));
            name.push(')');
        }
        Ok(Some(name))
    }

    fn literal_default(&mut self) -> Result<Expr> {
        let negative = self.eat(&Token::Minus);
        let literal = match self.advance() {
            Some(Token::Integer(v)) => Literal::Integer(if negative { -v } else { v }),
            Some(Token::Real(v)) => Literal::Real(if negative { -v } else { v }),
            Some(Token::String(s)) if !negative => Literal::String(s),
            Some(Token::Blob(b)) if !negative => Literal::Blob(b),
            Some(Token::Null) if !negative => Literal::Null,
            _ => return Err(self.error_here("expected literal after DEFAULT")),
        };
        Ok(Expr::Literal(literal))
    }

    fn create_index(&mut self, unique: bool) -> Result<Stmt> {
        self.expect(Token::Index, "INDEX")?;
        let if_not_exists = self.if_not_exists()?;
        let name = self.ident()?;
        self.expect(Token::On, "ON")?;
        let table = self.ident()?;
        self.expect(Token::LParen, "'(' before indexed columns")?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.ident()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "')' after indexed columns")?;
        let using_hash = if self.eat(&Token::Using) {
            self.expect(Token::Hash, "HASH after USING")?;
            true
        } else {
            false
        };
        Ok(Stmt::CreateIndex {
            name,
            table,
            columns,
            unique,
            if_not_exists,
            using_hash,
        })
    }

    fn drop_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Drop, "DROP")?;
        let is_table = match self.peek() {
            Some(Token::Table) => true,
            Some(Token::Index) => false,
            _ => return Err(self.error_here("expected TABLE or INDEX after DROP")),
        };
        self.advance();
        let if_exists = if self.eat(&Token::If) {
            self.expect(Token::Exists, "EXISTS after IF")?;
            true
        } else {
            false
        };
        let name = self.ident()?;
        Ok(if is_table {
            Stmt::DropTable { name, if_exists }
        } else {
            Stmt::DropIndex { name, if_exists }
        })
    }

    fn insert_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Insert, "INSERT")?;
        self.expect(Token::Into, "INTO after INSERT")?;
        let table = self.ident()?;

        let columns = if self.check(&Token::LParen) {
            self.advance();
            let mut cols = Vec::new();
            loop {
                cols.push(self.ident()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "')' after column names")?;
            Some(cols)
        } else {
            None
        };

        let source = if self.eat(&Token::Values) {
            let mut rows = Vec::new();
            loop {
                self.expect(Token::LParen, "'(' before row values")?;
                let mut row = Vec::new();
                loop {
                    row.push(self.expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RParen, "')' after row values")?;
                rows.push(row);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else if self.check(&Token::Select) {
            InsertSource::Select(Box::new(self.select()?))
        } else {
            return Err(self.error_here("expected VALUES or SELECT"));
        };

        let on_conflict = if self.eat(&Token::On) {
            self.expect(Token::Conflict, "CONFLICT after ON")?;
            match self.advance() {
                Some(Token::Replace) => Some(ConflictAction::Replace),
                Some(Token::Ignore) => Some(ConflictAction::Ignore),
                _ => return Err(self.error_here("expected REPLACE or IGNORE")),
            }
        } else {
            None
        };

        Ok(Stmt::Insert {
            table,
            columns,
            source,
            on_conflict,
        })
    }

    fn update_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Update, "UPDATE")?;
        let table = self.ident()?;
        self.expect(Token::Set, "SET after table name")?;
        let mut sets = Vec::new();
        loop {
            let col = self.ident()?;
            self.expect(Token::Eq, "'=' in assignment")?;
            sets.push((col, self.expr()?));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let where_clause = if self.eat(&Token::Where) {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Stmt::Update {
            table,
            sets,
            where_clause,
        })
    }

    fn delete_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Delete, "DELETE")?;
        self.expect(Token::From, "FROM after DELETE")?;
        let table = self.ident()?;
        let where_clause = if self.eat(&Token::Where) {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Stmt::Delete {
            table,
            where_clause,
        })
    }

    fn begin_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Begin, "BEGIN")?;
        let mode = if self.eat(&Token::Immediate) {
            TxMode::Immediate
        } else {
            self.eat(&Token::Deferred);
            TxMode::Deferred
        };
        self.eat(&Token::Transaction);
        Ok(Stmt::Begin(mode))
    }

    fn rollback_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Rollback, "ROLLBACK")?;
        self.eat(&Token::Transaction);
        let to_savepoint = if self.eat(&Token::To) {
            self.eat(&Token::Savepoint);
            Some(self.ident()?)
        } else {
            None
        };
        Ok(Stmt::Rollback { to_savepoint })
    }

    fn pragma_statement(&mut self) -> Result<Stmt> {
        self.expect(Token::Pragma, "PRAGMA")?;
        let name = self.ident()?;
        let value = if self.eat(&Token::Eq) {
            Some(self.expr()?)
        } else if self.eat(&Token::LParen) {
            let v = self.expr()?;
            self.expect(Token::RParen, "')' after pragma value")?;
            Some(v)
        } else {
            None
        };
        Ok(Stmt::Pragma { name, value })
    }
}
