/*
Hand written SQL tokenizer. Keywords are case-insensitive, identifiers keep
their original case, strings are single-quoted with \' as the escape, and
"--" starts a comment running to end of line. Every token records the line
and column where it started so later stages can point at the offending spot.
*/

use crate::errors::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // keywords
    Select,
    From,
    Where,
    Insert,
    Into,
    Values,
    Create,
    Table,
    Integer,
    Text,
    Real,
    Delete,
    Update,
    Set,
    And,
    Or,
    Not,
    Null,
    Primary,
    Key,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Offset,
    Distinct,
    Drop,
    Alter,
    Add,

    // literals and identifiers
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    Identifier,

    // operators
    Equals,
    NotEquals,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,

    // delimiters
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Dot,

    Eof,
}

fn keyword_kind(upper: &str) -> Option<TokenKind> {
    match upper {
        "SELECT" => Some(TokenKind::Select),
        "FROM" => Some(TokenKind::From),
        "WHERE" => Some(TokenKind::Where),
        "INSERT" => Some(TokenKind::Insert),
        "INTO" => Some(TokenKind::Into),
        "VALUES" => Some(TokenKind::Values),
        "CREATE" => Some(TokenKind::Create),
        "TABLE" => Some(TokenKind::Table),
        "INTEGER" => Some(TokenKind::Integer),
        "TEXT" => Some(TokenKind::Text),
        "REAL" => Some(TokenKind::Real),
        "DELETE" => Some(TokenKind::Delete),
        "UPDATE" => Some(TokenKind::Update),
        "SET" => Some(TokenKind::Set),
        "AND" => Some(TokenKind::And),
        "OR" => Some(TokenKind::Or),
        "NOT" => Some(TokenKind::Not),
        "NULL" => Some(TokenKind::Null),
        "PRIMARY" => Some(TokenKind::Primary),
        "KEY" => Some(TokenKind::Key),
        "ORDER" => Some(TokenKind::Order),
        "BY" => Some(TokenKind::By),
        "ASC" => Some(TokenKind::Asc),
        "DESC" => Some(TokenKind::Desc),
        "LIMIT" => Some(TokenKind::Limit),
        "OFFSET" => Some(TokenKind::Offset),
        "DISTINCT" => Some(TokenKind::Distinct),
        "DROP" => Some(TokenKind::Drop),
        "ALTER" => Some(TokenKind::Alter),
        "ADD" => Some(TokenKind::Add),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32, column: u32) -> Token {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }
}

pub struct Lexer {
    source: Vec<char>,
    position: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer {
            source: source.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input, ending with an EOF token.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if self.current() == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.position += 1;
    }

    fn next_token(&mut self) -> Result<Token> {
        loop {
            match self.current() {
                Some(c) if c.is_whitespace() => self.advance(),
                Some('-') if self.peek() == Some('-') => {
                    while let Some(c) = self.current() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }

        let line = self.line;
        let column = self.column;
        let c = match self.current() {
            Some(c) => c,
            None => return Ok(Token::new(TokenKind::Eof, "", line, column)),
        };

        if c.is_ascii_digit() {
            return self.read_number(line, column);
        }
        if c == '\'' {
            return self.read_string(line, column);
        }
        if c.is_alphabetic() || c == '_' {
            return Ok(self.read_identifier(line, column));
        }

        self.advance();
        let token = |kind, lexeme: &str| Ok(Token::new(kind, lexeme, line, column));
        match c {
            '=' => token(TokenKind::Equals, "="),
            '!' => {
                if self.current() == Some('=') {
                    self.advance();
                    token(TokenKind::NotEquals, "!=")
                } else {
                    Err(DbError::parse("expected '=' after '!'", line, column))
                }
            }
            '<' => {
                if self.current() == Some('=') {
                    self.advance();
                    token(TokenKind::LessEqual, "<=")
                } else {
                    token(TokenKind::LessThan, "<")
                }
            }
            '>' => {
                if self.current() == Some('=') {
                    self.advance();
                    token(TokenKind::GreaterEqual, ">=")
                } else {
                    token(TokenKind::GreaterThan, ">")
                }
            }
            '+' => token(TokenKind::Plus, "+"),
            '-' => token(TokenKind::Minus, "-"),
            '*' => token(TokenKind::Star, "*"),
            '/' => token(TokenKind::Slash, "/"),
            '(' => token(TokenKind::LeftParen, "("),
            ')' => token(TokenKind::RightParen, ")"),
            ',' => token(TokenKind::Comma, ","),
            ';' => token(TokenKind::Semicolon, ";"),
            '.' => token(TokenKind::Dot, "."),
            other => Err(DbError::parse(
                format!("unexpected character '{other}'"),
                line,
                column,
            )),
        }
    }

    fn read_number(&mut self, line: u32, column: u32) -> Result<Token> {
        let mut text = String::new();
        let mut is_float = false;

        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '.' && !is_float && self.peek().map_or(false, |n| n.is_ascii_digit()) {
                is_float = true;
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = if is_float {
            TokenKind::FloatLiteral
        } else {
            TokenKind::IntegerLiteral
        };
        Ok(Token::new(kind, text, line, column))
    }

    fn read_string(&mut self, line: u32, column: u32) -> Result<Token> {
        // skip the opening quote
        self.advance();

        let mut text = String::new();
        loop {
            match self.current() {
                None => {
                    return Err(DbError::parse("unterminated string literal", line, column));
                }
                Some('\'') => {
                    self.advance();
                    return Ok(Token::new(TokenKind::StringLiteral, text, line, column));
                }
                Some('\\') if self.peek() == Some('\'') => {
                    self.advance();
                    text.push('\'');
                    self.advance();
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_identifier(&mut self, line: u32, column: u32) -> Token {
        let mut text = String::new();
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match keyword_kind(&text.to_uppercase()) {
            Some(kind) => Token::new(kind, text, line, column),
            None => Token::new(TokenKind::Identifier, text, line, column),
        }
    }
}

/// Convenience wrapper over `Lexer`.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}
