/// SQL lexer (tokenizer) using nom recognizers.
///
/// The driver loop matches one token at a time and tracks line/column so
/// parse errors can point at the offending token. Keywords are
/// case-insensitive; identifiers may be double-quoted or backtick-quoted;
/// strings are single-quoted with doubled-quote escape; blob literals are
/// x'hex'; comments are `--` to end of line and nestable `/* */`.
use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    IResult,
};

use crate::error::{Result, ZqError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Real(f64),
    String(String),
    Blob(Vec<u8>),
    Ident(String),
    /// `?` positional parameter; numbered 1-based in lexical order.
    Positional(u32),
    /// `:name`, `@name` or `$name`.
    Named(String),

    // Keywords
    Create,
    Table,
    Index,
    Unique,
    Drop,
    If,
    Not,
    Exists,
    On,
    Using,
    Hash,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    From,
    Where,
    Select,
    As,
    Distinct,
    All,
    Join,
    Inner,
    Left,
    Right,
    Full,
    Outer,
    Cross,
    Group,
    By,
    Having,
    Order,
    Asc,
    Desc,
    Limit,
    Offset,
    And,
    Or,
    Null,
    Is,
    In,
    Between,
    Like,
    Case,
    When,
    Then,
    Else,
    End,
    Cast,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    To,
    Deferred,
    Immediate,
    Transaction,
    Pragma,
    Primary,
    Key,
    Autoincrement,
    Default,
    Check,
    References,
    Conflict,
    Replace,
    Ignore,

    // Operators and punctuation
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Concat,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
}

impl Token {
    /// Render for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Integer(v) => v.to_string(),
            Token::Real(v) => v.to_string(),
            Token::String(s) => format!("'{}'", s),
            Token::Blob(_) => "blob literal".into(),
            Token::Ident(s) => s.clone(),
            Token::Positional(_) => "?".into(),
            Token::Named(n) => format!(":{}", n),
            other => format!("{:?}", other).to_uppercase(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

fn keyword_for(upper: &str) -> Option<Token> {
    let token = match upper {
        "CREATE" => Token::Create,
        "TABLE" => Token::Table,
        "INDEX" => Token::Index,
        "UNIQUE" => Token::Unique,
        "DROP" => Token::Drop,
        "IF" => Token::If,
        "NOT" => Token::Not,
        "EXISTS" => Token::Exists,
        "ON" => Token::On,
        "USING" => Token::Using,
        "HASH" => Token::Hash,
        "INSERT" => Token::Insert,
        "INTO" => Token::Into,
        "VALUES" => Token::Values,
        "UPDATE" => Token::Update,
        "SET" => Token::Set,
        "DELETE" => Token::Delete,
        "FROM" => Token::From,
        "WHERE" => Token::Where,
        "SELECT" => Token::Select,
        "AS" => Token::As,
        "DISTINCT" => Token::Distinct,
        "ALL" => Token::All,
        "JOIN" => Token::Join,
        "INNER" => Token::Inner,
        "LEFT" => Token::Left,
        "RIGHT" => Token::Right,
        "FULL" => Token::Full,
        "OUTER" => Token::Outer,
        "CROSS" => Token::Cross,
        "GROUP" => Token::Group,
        "BY" => Token::By,
        "HAVING" => Token::Having,
        "ORDER" => Token::Order,
        "ASC" => Token::Asc,
        "DESC" => Token::Desc,
        "LIMIT" => Token::Limit,
        "OFFSET" => Token::Offset,
        "AND" => Token::And,
        "OR" => Token::Or,
        "NULL" => Token::Null,
        "IS" => Token::Is,
        "IN" => Token::In,
        "BETWEEN" => Token::Between,
        "LIKE" => Token::Like,
        "CASE" => Token::Case,
        "WHEN" => Token::When,
        "THEN" => Token::Then,
        "ELSE" => Token::Else,
        "END" => Token::End,
        "CAST" => Token::Cast,
        "BEGIN" => Token::Begin,
        "COMMIT" => Token::Commit,
        "ROLLBACK" => Token::Rollback,
        "SAVEPOINT" => Token::Savepoint,
        "TO" => Token::To,
        "DEFERRED" => Token::Deferred,
        "IMMEDIATE" => Token::Immediate,
        "TRANSACTION" => Token::Transaction,
        "PRAGMA" => Token::Pragma,
        "PRIMARY" => Token::Primary,
        "KEY" => Token::Key,
        "AUTOINCREMENT" => Token::Autoincrement,
        "DEFAULT" => Token::Default,
        "CHECK" => Token::Check,
        "REFERENCES" => Token::References,
        "CONFLICT" => Token::Conflict,
        "REPLACE" => Token::Replace,
        "IGNORE" => Token::Ignore,
        _ => return None,
    };
    Some(token)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex_word(input: &str) -> IResult<&str, Token> {
    let (rest, word) = take_while1(is_ident_char)(input)?;
    let upper = word.to_ascii_uppercase();
    Ok((rest, keyword_for(&upper).unwrap_or(Token::Ident(word.to_string()))))
}

fn lex_number(input: &str) -> IResult<&str, Token> {
    let (rest, int_part) = take_while1(|c: char| c.is_ascii_digit())(input)?;
    let mut end = input.len() - rest.len();
    let bytes = input.as_bytes();
    let mut is_real = false;

    if bytes.get(end) == Some(&b'.')
        && bytes.get(end + 1).is_some_and(|c| c.is_ascii_digit())
    {
        is_real = true;
        end += 1;
        while bytes.get(end).is_some_and(|c| c.is_ascii_digit()) {
            end += 1;
        }
    }
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut cursor = end + 1;
        if matches!(bytes.get(cursor), Some(b'+') | Some(b'-')) {
            cursor += 1;
        }
        if bytes.get(cursor).is_some_and(|c| c.is_ascii_digit()) {
            is_real = true;
            end = cursor;
            while bytes.get(end).is_some_and(|c| c.is_ascii_digit()) {
                end += 1;
            }
        }
    }

    let text = &input[..end];
    let rest = &input[end..];
    if is_real {
        let value: f64 = text.parse().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
        })?;
        Ok((rest, Token::Real(value)))
    } else {
        match int_part.parse::<i64>() {
            Ok(v) => Ok((rest, Token::Integer(v))),
            // Integer overflow degrades to a real literal.
            Err(_) => {
                let value: f64 = text.parse().map_err(|_| {
                    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
                })?;
                Ok((rest, Token::Real(value)))
            }
        }
    }
}

fn lex_string(input: &str) -> IResult<&str, Token> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        match rest.find('\'') {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                rest = &rest[pos + 1..];
                // Doubled quote is an escaped quote.
                if let Some(stripped) = rest.strip_prefix('\'') {
                    out.push('\'');
                    rest = stripped;
                } else {
                    return Ok((rest, Token::String(out)));
                }
            }
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
    }
}

fn lex_blob(input: &str) -> IResult<&str, Token> {
    let (rest, _) = nom::branch::alt((tag("x'"), tag("X'")))(input)?;
    let (rest, hex) = take_while(|c: char| c.is_ascii_hexdigit())(rest)?;
    let (rest, _) = char('\'')(rest)?;
    if hex.len() % 2 != 0 {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::HexDigit,
        )));
    }
    let bytes = hex
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            u8::from_str_radix(std::str::from_utf8(pair).expect("BUG: hex is ascii"), 16)
                .expect("BUG: checked hex digits")
        })
        .collect();
    Ok((rest, Token::Blob(bytes)))
}

fn lex_quoted_ident(input: &str) -> IResult<&str, Token> {
    let quote = match input.chars().next() {
        Some(c @ ('"' | '`')) => c,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Char,
            )))
        }
    };
    let rest = &input[1..];
    match rest.find(quote) {
        Some(pos) => Ok((&rest[pos + 1..], Token::Ident(rest[..pos].to_string()))),
        None => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        ))),
    }
}

pub struct Lexer;

struct Scanner<'a> {
    rest: &'a str,
    line: u32,
    column: u32,
    positional_count: u32,
}

impl<'a> Scanner<'a> {
    fn bump(&mut self, consumed: usize) {
        for c in self.rest[..consumed].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.rest = &self.rest[consumed..];
    }

    fn error(&self, message: &str) -> ZqError {
        let token: String = self.rest.chars().take(10).collect();
        ZqError::Syntax {
            line: self.line,
            column: self.column,
            token,
            message: message.to_string(),
        }
    }

    /// Skip whitespace and comments. Block comments nest.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let ws = self
                .rest
                .len()
                .saturating_sub(self.rest.trim_start().len());
            if ws > 0 {
                self.bump(ws);
                continue;
            }
            if self.rest.starts_with("--") {
                let end = self.rest.find('\n').unwrap_or(self.rest.len());
                self.bump(end);
                continue;
            }
            if self.rest.starts_with("/*") {
                let mut depth = 0usize;
                let bytes = self.rest.as_bytes();
                let mut i = 0;
                loop {
                    if i + 1 >= bytes.len() {
                        return Err(self.error("unterminated block comment"));
                    }
                    if &bytes[i..i + 2] == b"/*" {
                        depth += 1;
                        i += 2;
                    } else if &bytes[i..i + 2] == b"*/" {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
                self.bump(i);
                continue;
            }
            return Ok(());
        }
    }

    fn next_token(&mut self) -> Result<Option<SpannedToken>> {
        self.skip_trivia()?;
        if self.rest.is_empty() {
            return Ok(None);
        }
        let (line, column) = (self.line, self.column);
        let input = self.rest;

        // Multi-char operators first.
        for (text, token) in [
            ("<>", Token::NotEq),
            ("!=", Token::NotEq),
            ("<=", Token::Le),
            (">=", Token::Ge),
            ("||", Token::Concat),
            ("==", Token::Eq),
        ] {
            if let Some(stripped) = input.strip_prefix(text) {
                self.bump(input.len() - stripped.len());
                return Ok(Some(SpannedToken { token, line, column }));
            }
        }

        let c = input.chars().next().expect("BUG: nonempty input");
        let simple = match c {
            '=' => Some(Token::Eq),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            ';' => Some(Token::Semicolon),
            _ => None,
        };
        if let Some(token) = simple {
            self.bump(c.len_utf8());
            return Ok(Some(SpannedToken { token, line, column }));
        }

        if c == '?' {
            self.positional_count += 1;
            let token = Token::Positional(self.positional_count);
            self.bump(1);
            return Ok(Some(SpannedToken { token, line, column }));
        }
        if matches!(c, ':' | '@' | '$') {
            let name: String = input[1..].chars().take_while(|&c| is_ident_char(c)).collect();
            if name.is_empty() {
                return Err(self.error("expected parameter name"));
            }
            let consumed = 1 + name.len();
            self.bump(consumed);
            return Ok(Some(SpannedToken {
                token: Token::Named(name),
                line,
                column,
            }));
        }

        let result = if c == '\'' {
            lex_string(input)
        } else if (c == 'x' || c == 'X') && input[1..].starts_with('\'') {
            lex_blob(input)
        } else if c == '"' || c == '`' {
            lex_quoted_ident(input)
        } else if c.is_ascii_digit() {
            lex_number(input)
        } else if is_ident_start(c) {
            lex_word(input)
        } else {
            return Err(self.error("unrecognized character"));
        };

        match result {
            Ok((rest, token)) => {
                self.bump(input.len() - rest.len());
                Ok(Some(SpannedToken { token, line, column }))
            }
            Err(_) => Err(self.error("malformed token")),
        }
    }
}

impl Lexer {
    /// Tokenize a full statement. The first error aborts lexing.
    pub fn tokenize(sql: &str) -> Result<Vec<SpannedToken>> {
        let mut scanner = Scanner {
            rest: sql,
            line: 1,
            column: 1,
            positional_count: 0,
        };
        let mut tokens = Vec::new();
        while let Some(token) = scanner.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}
