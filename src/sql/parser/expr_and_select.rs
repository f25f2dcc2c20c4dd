/// Expression and SELECT productions.
///
/// Precedence, loosest to tightest:
///   OR, AND, NOT, comparison (=, <>, <, <=, >, >=, IS NULL, IN, BETWEEN,
///   LIKE), additive (+, -, ||), multiplicative (*, /, %), unary (-, NOT),
///   postfix COLLATE, primary.
use crate::error::Result;
use crate::sql::ast::*;
use crate::sql::lexer::Token;

use super::Parser;

impl Parser {
    pub(crate) fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinOp::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinOp::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            let expr = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => Some(BinOp::Eq),
                Some(Token::NotEq) => Some(BinOp::Ne),
                Some(Token::Lt) => Some(BinOp::Lt),
                Some(Token::Le) => Some(BinOp::Le),
                Some(Token::Gt) => Some(BinOp::Gt),
                Some(Token::Ge) => Some(BinOp::Ge),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                let right = self.additive()?;
                left = Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
                continue;
            }

            if self.check(&Token::Is) {
                self.advance();
                let negated = self.eat(&Token::Not);
                self.expect(Token::Null, "NULL after IS")?;
                left = Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                };
                continue;
            }

            // NOT IN / NOT BETWEEN / NOT LIKE
            let negated = matches!(
                (self.peek(), self.peek_at(1)),
                (
                    Some(Token::Not),
                    Some(Token::In) | Some(Token::Between) | Some(Token::Like)
                )
            );
            if negated {
                self.advance();
            }

            match self.peek() {
                Some(Token::In) => {
                    self.advance();
                    self.expect(Token::LParen, "'(' after IN")?;
                    if self.check(&Token::Select) {
                        let select = self.select()?;
                        self.expect(Token::RParen, "')' after subquery")?;
                        left = Expr::InSelect {
                            expr: Box::new(left),
                            select: Box::new(select),
                            negated,
                        };
                    } else {
                        let mut list = Vec::new();
                        if !self.check(&Token::RParen) {
                            loop {
                                list.push(self.expr()?);
                                if !self.eat(&Token::Comma) {
                                    break;
                                }
                            }
                        }
                        self.expect(Token::RParen, "')' after IN list")?;
                        left = Expr::InList {
                            expr: Box::new(left),
                            list,
                            negated,
                        };
                    }
                }
                Some(Token::Between) => {
                    self.advance();
                    let low = self.additive()?;
                    self.expect(Token::And, "AND in BETWEEN")?;
                    let high = self.additive()?;
                    left = Expr::Between {
                        expr: Box::new(left),
                        low: Box::new(low),
                        high: Box::new(high),
                        negated,
                    };
                }
                Some(Token::Like) => {
                    self.advance();
                    let pattern = self.additive()?;
                    left = Expr::Like {
                        expr: Box::new(left),
                        pattern: Box::new(pattern),
                        negated,
                    };
                }
                _ if negated => return Err(self.error_here("expected IN, BETWEEN or LIKE")),
                _ => break,
            }
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                Some(Token::Concat) => BinOp::Concat,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let expr = self.unary()?;
            // Fold negation into numeric literals.
            return Ok(match expr {
                Expr::Literal(Literal::Integer(v)) => Expr::Literal(Literal::Integer(-v)),
                Expr::Literal(Literal::Real(v)) => Expr::Literal(Literal::Real(-v)),
                other => Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(other),
                },
            });
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.check(&Token::Ident("COLLATE".into()))
            || matches!(self.peek(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case("collate"))
        {
            self.advance();
            let collation = self.ident()?;
            expr = Expr::Collate {
                expr: Box::new(expr),
                collation,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Integer(v)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Integer(v)))
            }
            Some(Token::Real(v)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Real(v)))
            }
            Some(Token::String(s)) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            Some(Token::Blob(b)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Blob(b)))
            }
            Some(Token::Null) => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            Some(Token::Positional(n)) => {
                self.advance();
                Ok(Expr::Param(ParamRef::Positional(n)))
            }
            Some(Token::Named(name)) => {
                self.advance();
                Ok(Expr::Param(ParamRef::Named(name)))
            }
            Some(Token::Cast) => {
                self.advance();
                self.expect(Token::LParen, "'(' after CAST")?;
                let expr = self.expr()?;
                self.expect(Token::As, "AS in CAST")?;
                let type_name = self
                    .declared_type()?
                    .ok_or_else(|| self.error_here("expected type name in CAST"))?;
                self.expect(Token::RParen, "')' after CAST")?;
                Ok(Expr::Cast {
                    expr: Box::new(expr),
                    type_name,
                })
            }
            Some(Token::Case) => self.case_expr(),
            Some(Token::LParen) => {
                self.advance();
                if self.check(&Token::Select) {
                    let select = self.select()?;
                    self.expect(Token::RParen, "')' after subquery")?;
                    Ok(Expr::Subquery(Box::new(select)))
                } else {
                    let expr = self.expr()?;
                    self.expect(Token::RParen, "')' after expression")?;
                    Ok(expr)
                }
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.eat(&Token::LParen) {
                    return self.function_call(name);
                }
                if self.eat(&Token::Dot) {
                    let column = self.ident()?;
                    return Ok(Expr::Column {
                        table: Some(name),
                        name: column,
                    });
                }
                Ok(Expr::Column { table: None, name })
            }
            _ => Err(self.error_here("expected expression")),
        }
    }

    fn function_call(&mut self, name: String) -> Result<Expr> {
        if self.eat(&Token::Star) {
            self.expect(Token::RParen, "')' after *")?;
            return Ok(Expr::Function {
                name,
                args: Vec::new(),
                distinct: false,
                star: true,
            });
        }
        let distinct = self.eat(&Token::Distinct);
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')' after function arguments")?;
        Ok(Expr::Function {
            name,
            args,
            distinct,
            star: false,
        })
    }

    fn case_expr(&mut self) -> Result<Expr> {
        self.expect(Token::Case, "CASE")?;
        let operand = if !self.check(&Token::When) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        let mut branches = Vec::new();
        while self.eat(&Token::When) {
            let when = self.expr()?;
            self.expect(Token::Then, "THEN after WHEN")?;
            let then = self.expr()?;
            branches.push((when, then));
        }
        if branches.is_empty() {
            return Err(self.error_here("CASE requires at least one WHEN"));
        }
        let else_expr = if self.eat(&Token::Else) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect(Token::End, "END after CASE")?;
        Ok(Expr::Case {
            operand,
            branches,
            else_expr,
        })
    }

    // --- SELECT ---

    pub(crate) fn select(&mut self) -> Result<Select> {
        self.expect(Token::Select, "SELECT")?;
        let distinct = if self.eat(&Token::Distinct) {
            true
        } else {
            self.eat(&Token::All);
            false
        };

        let mut columns = Vec::new();
        loop {
            if self.eat(&Token::Star) {
                columns.push(SelectColumn::Star);
            } else {
                let expr = self.expr()?;
                let alias = if self.eat(&Token::As) {
                    Some(self.ident()?)
                } else if let Some(Token::Ident(_)) = self.peek() {
                    // Bare alias.
                    Some(self.ident()?)
                } else {
                    None
                };
                columns.push(SelectColumn::Expr { expr, alias });
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        let from = if self.eat(&Token::From) {
            Some(self.from_clause()?)
        } else {
            None
        };

        let where_clause = if self.eat(&Token::Where) {
            Some(self.expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat(&Token::Group) {
            self.expect(Token::By, "BY after GROUP")?;
            loop {
                group_by.push(self.expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let having = if self.eat(&Token::Having) {
            Some(self.expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat(&Token::Order) {
            self.expect(Token::By, "BY after ORDER")?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat(&Token::Desc) {
                    true
                } else {
                    self.eat(&Token::Asc);
                    false
                };
                order_by.push(OrderByItem { expr, descending });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let mut limit = None;
        let mut offset = None;
        if self.eat(&Token::Limit) {
            limit = Some(self.expr()?);
            if self.eat(&Token::Offset) {
                offset = Some(self.expr()?);
            } else if self.eat(&Token::Comma) {
                // LIMIT offset, count
                offset = limit.take();
                limit = Some(self.expr()?);
            }
        }

        Ok(Select {
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn table_ref(&mut self) -> Result<TableRef> {
        let name = self.ident()?;
        let alias = if self.eat(&Token::As) {
            Some(self.ident()?)
        } else if let Some(Token::Ident(_)) = self.peek() {
            Some(self.ident()?)
        } else {
            None
        };
        Ok(TableRef { name, alias })
    }

    fn from_clause(&mut self) -> Result<FromClause> {
        let table = self.table_ref()?;
        let mut joins = Vec::new();
        loop {
            let kind = match self.peek() {
                Some(Token::Join) => {
                    self.advance();
                    JoinKind::Inner
                }
                Some(Token::Inner) => {
                    self.advance();
                    self.expect(Token::Join, "JOIN after INNER")?;
                    JoinKind::Inner
                }
                Some(Token::Left) => {
                    self.advance();
                    self.eat(&Token::Outer);
                    self.expect(Token::Join, "JOIN after LEFT")?;
                    JoinKind::Left
                }
                Some(Token::Right) => {
                    self.advance();
                    self.eat(&Token::Outer);
                    self.expect(Token::Join, "JOIN after RIGHT")?;
                    JoinKind::Right
                }
                Some(Token::Full) => {
                    self.advance();
                    self.eat(&Token::Outer);
                    self.expect(Token::Join, "JOIN after FULL")?;
                    JoinKind::FullOuter
                }
                Some(Token::Cross) => {
                    self.advance();
                    self.expect(Token::Join, "JOIN after CROSS")?;
                    JoinKind::Cross
                }
                Some(Token::Comma) => {
                    // Comma join is a cross join.
                    self.advance();
                    JoinKind::Cross
                }
                _ => break,
            };
            let table = self.table_ref()?;
            let on = if kind != JoinKind::Cross && self.eat(&Token::On) {
                Some(self.expr()?)
            } else if kind != JoinKind::Cross {
                return Err(self.error_here("expected ON after joined table"));
            } else {
                None
            };
            joins.push(Join { kind, table, on });
        }
        Ok(FromClause { table, joins })
    }
}
