//! Filter-expression parsing.
//!
//! The filter language is a compact boolean query language over collection
//! fields: `age >= 18 AND (status == "active" OR status == "pending")`.
//! Parsing is single-pass and schema-free; field references are resolved
//! against the schema snapshot later, by the translator.

use crate::error::{FieldStoreError, Result};

/// A reference to a field, optionally qualified by collection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub collection: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "IN",
            CompareOp::Contains => "CONTAINS",
        }
    }
}

/// A typed literal constant in a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<Literal>),
}

/// An immutable predicate tree. Consumed by the translator; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every record (the `ALL` keyword).
    All,
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Comparison {
        field: FieldRef,
        op: CompareOp,
        literal: Literal,
    },
}

/// Parse a filter string into a predicate tree.
/// Precedence: NOT binds tighter than AND, AND tighter than OR;
/// parentheses override. Keywords are case-insensitive, field names are not.
pub fn parse(input: &str) -> Result<Predicate> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };

    // `ALL` is only valid as the entire filter.
    if parser.tokens.len() == 1 {
        if let TokenKind::Keyword(Keyword::All) = parser.tokens[0].kind {
            return Ok(Predicate::All);
        }
    }

    let predicate = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected("end of filter"));
    }
    Ok(predicate)
}

// ── Tokens ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    And,
    Or,
    Not,
    In,
    Contains,
    All,
    Null,
    True,
    False,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Keyword(Keyword),
    Str(String),
    Int(i64),
    Float(f64),
    Op(CompareOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn keyword(word: &str) -> Option<Keyword> {
    match word.to_ascii_uppercase().as_str() {
        "AND" => Some(Keyword::And),
        "OR" => Some(Keyword::Or),
        "NOT" => Some(Keyword::Not),
        "IN" => Some(Keyword::In),
        "CONTAINS" => Some(Keyword::Contains),
        "ALL" => Some(Keyword::All),
        "NULL" => Some(Keyword::Null),
        "TRUE" => Some(Keyword::True),
        "FALSE" => Some(Keyword::False),
        _ => None,
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset: i });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset: i });
                i += 1;
            }
            '[' => {
                tokens.push(Token { kind: TokenKind::LBracket, offset: i });
                i += 1;
            }
            ']' => {
                tokens.push(Token { kind: TokenKind::RBracket, offset: i });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, offset: i });
                i += 1;
            }
            '.' => {
                tokens.push(Token { kind: TokenKind::Dot, offset: i });
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Op(CompareOp::Eq), offset: i });
                    i += 2;
                } else {
                    return Err(syntax(i, "'==' (single '=' is not an operator)"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Op(CompareOp::Ne), offset: i });
                    i += 2;
                } else {
                    return Err(syntax(i, "'!='"));
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Op(CompareOp::Le), offset: i });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Op(CompareOp::Lt), offset: i });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Op(CompareOp::Ge), offset: i });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Op(CompareOp::Gt), offset: i });
                    i += 1;
                }
            }
            '"' => {
                let (s, next) = scan_string(input, i)?;
                tokens.push(Token { kind: TokenKind::Str(s), offset: i });
                i = next;
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let (kind, next) = scan_number(input, i)?;
                tokens.push(Token { kind, offset: i });
                i = next;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let b = bytes[i] as char;
                    if b.is_ascii_alphanumeric() || b == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word = &input[start..i];
                let kind = match keyword(word) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident(word.to_string()),
                };
                tokens.push(Token { kind, offset: start });
            }
            _ => return Err(syntax(i, "a field name, operator, or literal")),
        }
    }

    Ok(tokens)
}

fn scan_string(input: &str, start: usize) -> Result<(String, usize)> {
    let bytes = input.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Ok((out, i + 1)),
            b'\\' => {
                match bytes.get(i + 1) {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    _ => return Err(syntax(i, "an escape sequence (\\\" or \\\\)")),
                }
                i += 2;
            }
            _ => {
                // Keep multi-byte characters intact.
                let ch_len = input[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                out.push_str(&input[i..i + ch_len]);
                i += ch_len;
            }
        }
    }
    Err(syntax(start, "a closing '\"'"))
}

fn scan_number(input: &str, start: usize) -> Result<(TokenKind, usize)> {
    let bytes = input.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(syntax(start, "a number"));
    }
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text = &input[start..i];
    let kind = if is_float {
        TokenKind::Float(
            text.parse()
                .map_err(|_| syntax(start, "a valid float literal"))?,
        )
    } else {
        TokenKind::Int(
            text.parse()
                .map_err(|_| syntax(start, "a valid integer literal"))?,
        )
    };
    Ok((kind, i))
}

fn syntax(offset: usize, expected: &str) -> FieldStoreError {
    FieldStoreError::FilterSyntax {
        offset,
        expected: expected.to_string(),
    }
}

// ── Parser ───────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn unexpected(&self, expected: &str) -> FieldStoreError {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or_else(|| self.tokens.last().map(|t| t.offset + 1).unwrap_or(0));
        syntax(offset, expected)
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while matches!(
            self.peek().map(|t| &t.kind),
            Some(TokenKind::Keyword(Keyword::Or))
        ) {
            self.next();
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_not()?;
        while matches!(
            self.peek().map(|t| &t.kind),
            Some(TokenKind::Keyword(Keyword::And))
        ) {
            self.next();
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if matches!(
            self.peek().map(|t| &t.kind),
            Some(TokenKind::Keyword(Keyword::Not))
        ) {
            self.next();
            let inner = self.parse_not()?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RParen)) {
                    self.next();
                    Ok(inner)
                } else {
                    Err(self.unexpected("')'"))
                }
            }
            Some(TokenKind::Ident(_)) => self.parse_comparison(),
            _ => Err(self.unexpected("a field name, 'NOT', or '('")),
        }
    }

    fn parse_comparison(&mut self) -> Result<Predicate> {
        let field = self.parse_field()?;
        let op = match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Op(op)) => op,
            Some(TokenKind::Keyword(Keyword::In)) => CompareOp::In,
            Some(TokenKind::Keyword(Keyword::Contains)) => CompareOp::Contains,
            _ => return Err(self.unexpected("a comparison operator")),
        };
        self.next();
        let literal = self.parse_literal()?;
        Ok(Predicate::Comparison { field, op, literal })
    }

    fn parse_field(&mut self) -> Result<FieldRef> {
        let first = match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Ident(name)) => name,
            _ => return Err(self.unexpected("a field name")),
        };
        self.next();
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Dot)) {
            self.next();
            let name = match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::Ident(name)) => name,
                _ => return Err(self.unexpected("a field name after '.'")),
            };
            self.next();
            return Ok(FieldRef {
                collection: Some(first),
                name,
            });
        }
        Ok(FieldRef {
            collection: None,
            name: first,
        })
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let kind = match self.peek().map(|t| t.kind.clone()) {
            Some(kind) => kind,
            None => return Err(self.unexpected("a literal")),
        };
        match kind {
            TokenKind::Str(s) => {
                self.next();
                Ok(Literal::String(s))
            }
            TokenKind::Int(n) => {
                self.next();
                Ok(Literal::Int(n))
            }
            TokenKind::Float(f) => {
                self.next();
                Ok(Literal::Float(f))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.next();
                Ok(Literal::Null)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.next();
                Ok(Literal::Boolean(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.next();
                Ok(Literal::Boolean(false))
            }
            TokenKind::LBracket => {
                self.next();
                let mut items = Vec::new();
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RBracket)) {
                    self.next();
                    return Ok(Literal::List(items));
                }
                loop {
                    items.push(self.parse_literal()?);
                    match self.peek().map(|t| t.kind.clone()) {
                        Some(TokenKind::Comma) => {
                            self.next();
                        }
                        Some(TokenKind::RBracket) => {
                            self.next();
                            break;
                        }
                        _ => return Err(self.unexpected("',' or ']'")),
                    }
                }
                Ok(Literal::List(items))
            }
            _ => Err(self.unexpected("a literal")),
        }
    }
}
