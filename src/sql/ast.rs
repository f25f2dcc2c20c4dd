use std::fmt;

/// Statement kinds produced by the parser.
#[derive(Debug, Clone)]
pub enum Stmt {
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnSpec>,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
        if_not_exists: bool,
        using_hash: bool,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    DropIndex {
        name: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        source: InsertSource,
        on_conflict: Option<ConflictAction>,
    },
    Update {
        table: String,
        sets: Vec<(String, Expr)>,
        where_clause: Option<Expr>,
    },
    Delete {
        table: String,
        where_clause: Option<Expr>,
    },
    Select(Box<Select>),
    Begin(TxMode),
    Commit,
    Rollback {
        to_savepoint: Option<String>,
    },
    Savepoint(String),
    Pragma {
        name: String,
        value: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Select(Box<Select>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    Replace,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Deferred,
    Immediate,
}

/// Column definition inside CREATE TABLE.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub declared_type: Option<String>,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<Expr>,
    pub check: Option<Expr>,
    pub references: Option<(String, Option<String>)>,
}

#[derive(Debug, Clone)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<SelectColumn>,
    pub from: Option<FromClause>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum SelectColumn {
    Star,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone)]
pub struct FromClause {
    pub table: TableRef,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Name rows are qualified with in scope resolution.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    FullOuter,
    Cross,
}

#[derive(Debug, Clone)]
pub struct OrderByItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Integer(i64),
    Real(f64),
    String(String),
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRef {
    Positional(u32),
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Column {
        table: Option<String>,
        name: String,
    },
    Param(ParamRef),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        star: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSelect {
        expr: Box<Expr>,
        select: Box<Select>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Scalar subquery.
    Subquery(Box<Select>),
    Collate {
        expr: Box<Expr>,
        collation: String,
    },
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },
}

// --- SQL rendering: parse -> print -> parse must round-trip ---

fn quote_ident(name: &str) -> String {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.chars().next().is_some_and(|c| !c.is_ascii_digit())
    {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Integer(v) => write!(f, "{}", v),
            Literal::Real(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Blob(b) => {
                write!(f, "x'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Concat => "||",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Column { table, name } => match table {
                Some(t) => write!(f, "{}.{}", quote_ident(t), quote_ident(name)),
                None => write!(f, "{}", quote_ident(name)),
            },
            Expr::Param(ParamRef::Positional(_)) => write!(f, "?"),
            Expr::Param(ParamRef::Named(name)) => write!(f, ":{}", name),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Neg => write!(f, "(-{})", expr),
                UnaryOp::Not => write!(f, "(NOT {})", expr),
            },
            Expr::Binary { left, op, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Function {
                name,
                args,
                distinct,
                star,
            } => {
                write!(f, "{}(", name)?;
                if *star {
                    write!(f, "*")?;
                } else {
                    if *distinct {
                        write!(f, "DISTINCT ")?;
                    }
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                }
                write!(f, ")")
            }
            Expr::Case {
                operand,
                branches,
                else_expr,
            } => {
                write!(f, "CASE")?;
                if let Some(op) = operand {
                    write!(f, " {}", op)?;
                }
                for (when, then) in branches {
                    write!(f, " WHEN {} THEN {}", when, then)?;
                }
                if let Some(e) = else_expr {
                    write!(f, " ELSE {}", e)?;
                }
                write!(f, " END")
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "({}{} IN (", expr, if *negated { " NOT" } else { "" })?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "))")
            }
            Expr::InSelect {
                expr,
                select,
                negated,
            } => write!(
                f,
                "({}{} IN ({}))",
                expr,
                if *negated { " NOT" } else { "" },
                select
            ),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "({}{} BETWEEN {} AND {})",
                expr,
                if *negated { " NOT" } else { "" },
                low,
                high
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "({}{} LIKE {})",
                expr,
                if *negated { " NOT" } else { "" },
                pattern
            ),
            Expr::IsNull { expr, negated } => write!(
                f,
                "({} IS {}NULL)",
                expr,
                if *negated { "NOT " } else { "" }
            ),
            Expr::Subquery(select) => write!(f, "({})", select),
            Expr::Collate { expr, collation } => write!(f, "({} COLLATE {})", expr, collation),
            Expr::Cast { expr, type_name } => write!(f, "CAST({} AS {})", expr, type_name),
        }
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match col {
                SelectColumn::Star => write!(f, "*")?,
                SelectColumn::Expr { expr, alias } => {
                    write!(f, "{}", expr)?;
                    if let Some(a) = alias {
                        write!(f, " AS {}", quote_ident(a))?;
                    }
                }
            }
        }
        if let Some(from) = &self.from {
            write!(f, " FROM {}", from.table)?;
            for join in &from.joins {
                let kw = match join.kind {
                    JoinKind::Inner => "INNER JOIN",
                    JoinKind::Left => "LEFT JOIN",
                    JoinKind::Right => "RIGHT JOIN",
                    JoinKind::FullOuter => "FULL OUTER JOIN",
                    JoinKind::Cross => "CROSS JOIN",
                };
                write!(f, " {} {}", kw, join.table)?;
                if let Some(on) = &join.on {
                    write!(f, " ON {}", on)?;
                }
            }
        }
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {}", w)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            for (i, g) in self.group_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", g)?;
            }
        }
        if let Some(h) = &self.having {
            write!(f, " HAVING {}", h)?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, item) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item.expr)?;
                if item.descending {
                    write!(f, " DESC")?;
                }
            }
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_ident(&self.name))?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", quote_ident(alias))?;
        }
        Ok(())
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_ident(&self.name))?;
        if let Some(t) = &self.declared_type {
            write!(f, " {}", t)?;
        }
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
            if self.autoincrement {
                write!(f, " AUTOINCREMENT")?;
            }
        }
        if self.not_null {
            write!(f, " NOT NULL")?;
        }
        if self.unique {
            write!(f, " UNIQUE")?;
        }
        if let Some(d) = &self.default {
            write!(f, " DEFAULT ({})", d)?;
        }
        if let Some(c) = &self.check {
            write!(f, " CHECK ({})", c)?;
        }
        if let Some((table, col)) = &self.references {
            write!(f, " REFERENCES {}", quote_ident(table))?;
            if let Some(c) = col {
                write!(f, "({})", quote_ident(c))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::CreateTable {
                name,
                if_not_exists,
                columns,
            } => {
                write!(f, "CREATE TABLE ")?;
                if *if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{} (", quote_ident(name))?;
                for (i, col) in columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", col)?;
                }
                write!(f, ")")
            }
            Stmt::CreateIndex {
                name,
                table,
                columns,
                unique,
                if_not_exists,
                using_hash,
            } => {
                write!(f, "CREATE ")?;
                if *unique {
                    write!(f, "UNIQUE ")?;
                }
                write!(f, "INDEX ")?;
                if *if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{} ON {}(", quote_ident(name), quote_ident(table))?;
                for (i, col) in columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", quote_ident(col))?;
                }
                write!(f, ")")?;
                if *using_hash {
                    write!(f, " USING HASH")?;
                }
                Ok(())
            }
            Stmt::DropTable { name, if_exists } => {
                write!(f, "DROP TABLE ")?;
                if *if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", quote_ident(name))
            }
            Stmt::DropIndex { name, if_exists } => {
                write!(f, "DROP INDEX ")?;
                if *if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", quote_ident(name))
            }
            Stmt::Insert {
                table,
                columns,
                source,
                on_conflict,
            } => {
                write!(f, "INSERT INTO {}", quote_ident(table))?;
                if let Some(cols) = columns {
                    write!(f, " (")?;
                    for (i, c) in cols.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", quote_ident(c))?;
                    }
                    write!(f, ")")?;
                }
                match source {
                    InsertSource::Values(rows) => {
                        write!(f, " VALUES ")?;
                        for (i, row) in rows.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "(")?;
                            for (j, expr) in row.iter().enumerate() {
                                if j > 0 {
                                    write!(f, ", ")?;
                                }
                                write!(f, "{}", expr)?;
                            }
                            write!(f, ")")?;
                        }
                    }
                    InsertSource::Select(select) => write!(f, " {}", select)?,
                }
                match on_conflict {
                    Some(ConflictAction::Replace) => write!(f, " ON CONFLICT REPLACE")?,
                    Some(ConflictAction::Ignore) => write!(f, " ON CONFLICT IGNORE")?,
                    None => {}
                }
                Ok(())
            }
            Stmt::Update {
                table,
                sets,
                where_clause,
            } => {
                write!(f, "UPDATE {} SET ", quote_ident(table))?;
                for (i, (col, expr)) in sets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", quote_ident(col), expr)?;
                }
                if let Some(w) = where_clause {
                    write!(f, " WHERE {}", w)?;
                }
                Ok(())
            }
            Stmt::Delete {
                table,
                where_clause,
            } => {
                write!(f, "DELETE FROM {}", quote_ident(table))?;
                if let Some(w) = where_clause {
                    write!(f, " WHERE {}", w)?;
                }
                Ok(())
            }
            Stmt::Select(select) => write!(f, "{}", select),
            Stmt::Begin(TxMode::Deferred) => write!(f, "BEGIN DEFERRED"),
            Stmt::Begin(TxMode::Immediate) => write!(f, "BEGIN IMMEDIATE"),
            Stmt::Commit => write!(f, "COMMIT"),
            Stmt::Rollback { to_savepoint } => match to_savepoint {
                Some(name) => write!(f, "ROLLBACK TO {}", quote_ident(name)),
                None => write!(f, "ROLLBACK"),
            },
            Stmt::Savepoint(name) => write!(f, "SAVEPOINT {}", quote_ident(name)),
            Stmt::Pragma { name, value } => {
                write!(f, "PRAGMA {}", quote_ident(name))?;
                if let Some(v) = value {
                    write!(f, " = {}", v)?;
                }
                Ok(())
            }
        }
    }
}
