/*
Recursive descent parser for the recognized grammar:

statement  := select | insert | create | update | delete | drop | alter
select     := SELECT (DISTINCT)? ( '*' | ident (',' ident)* ) FROM ident
              (WHERE expr)? (ORDER BY ident (ASC|DESC)? (',' ...)*)?
              (LIMIT int)? (OFFSET int)?
insert     := INSERT INTO ident VALUES '(' literal (',' literal)* ')'
create     := CREATE TABLE ident '(' coldef (',' coldef)* ')'
coldef     := ident ('INTEGER'|'TEXT'|'REAL') ('PRIMARY' 'KEY')?
update     := UPDATE ident SET assign (',' assign)* (WHERE expr)?
assign     := ident '=' literal
delete     := DELETE FROM ident (WHERE expr)?
drop       := DROP TABLE ident
alter      := ALTER TABLE ident ADD ident ('INTEGER'|'TEXT'|'REAL')
expr       := or
or         := and ('OR' and)*
and        := cmp ('AND' cmp)*
cmp        := prim (('='|'!='|'<'|'<='|'>'|'>=') prim)?
prim       := ident | literal | '(' expr ')'
literal    := ('-')? int | ('-')? float | string | NULL
*/

use crate::errors::{DbError, Result};
use crate::record::Value;
use crate::schema::{ColumnDef, ColumnType};
use crate::sql::lexer::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table: String,
    pub projection: Projection,
    pub where_clause: Option<Expr>,
    pub distinct: bool,
    pub order_by: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectStatement {
    /// Anything beyond the plain scan shape is executed outside the vm.
    pub fn is_advanced(&self) -> bool {
        self.distinct || !self.order_by.is_empty() || self.limit.is_some() || self.offset.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStatement {
    pub table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableStatement {
    pub table: String,
    pub column: ColumnDef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    CreateTable(CreateTableStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    DropTable(DropTableStatement),
    AlterTable(AlterTableStatement),
}

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Parser {
        Parser {
            tokens,
            position: 0,
        }
    }

    pub fn parse(mut self) -> Result<Statement> {
        let statement = match self.current().kind {
            TokenKind::Select => Statement::Select(self.parse_select()?),
            TokenKind::Insert => Statement::Insert(self.parse_insert()?),
            TokenKind::Create => Statement::CreateTable(self.parse_create_table()?),
            TokenKind::Update => Statement::Update(self.parse_update()?),
            TokenKind::Delete => Statement::Delete(self.parse_delete()?),
            TokenKind::Drop => Statement::DropTable(self.parse_drop_table()?),
            TokenKind::Alter => Statement::AlterTable(self.parse_alter_table()?),
            _ => return Err(self.error_here("expected a statement")),
        };

        // a trailing semicolon is allowed, anything else is a syntax error
        if self.current().kind == TokenKind::Semicolon {
            self.advance();
        }
        if self.current().kind != TokenKind::Eof {
            return Err(self.error_here("unexpected input after statement"));
        }
        Ok(statement)
    }

    fn current(&self) -> &Token {
        // the token stream always ends with EOF
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn matches(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.matches(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        if !self.matches(kind) {
            return Err(self.error_here(format!(
                "expected {what}, got '{}'",
                self.describe_current()
            )));
        }
        let token = self.current().clone();
        self.advance();
        Ok(token)
    }

    fn describe_current(&self) -> String {
        let token = self.current();
        if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            token.lexeme.clone()
        }
    }

    fn error_here(&self, message: impl Into<String>) -> DbError {
        let token = self.current();
        DbError::parse(message, token.line, token.column)
    }

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect(TokenKind::Select, "SELECT")?;
        let distinct = self.accept(TokenKind::Distinct);

        let projection = if self.accept(TokenKind::Star) {
            Projection::All
        } else {
            let mut columns = vec![self.expect(TokenKind::Identifier, "a column name")?.lexeme];
            while self.accept(TokenKind::Comma) {
                columns.push(self.expect(TokenKind::Identifier, "a column name")?.lexeme);
            }
            Projection::Columns(columns)
        };

        self.expect(TokenKind::From, "FROM")?;
        let table = self.expect(TokenKind::Identifier, "a table name")?.lexeme;

        let where_clause = if self.accept(TokenKind::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.accept(TokenKind::Order) {
            self.expect(TokenKind::By, "BY")?;
            loop {
                let column = self.expect(TokenKind::Identifier, "a column name")?.lexeme;
                let direction = if self.accept(TokenKind::Desc) {
                    SortOrder::Descending
                } else {
                    self.accept(TokenKind::Asc);
                    SortOrder::Ascending
                };
                order_by.push((column, direction));
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }

        let limit = if self.accept(TokenKind::Limit) {
            Some(self.parse_unsigned("LIMIT")?)
        } else {
            None
        };
        let offset = if self.accept(TokenKind::Offset) {
            Some(self.parse_unsigned("OFFSET")?)
        } else {
            None
        };

        Ok(SelectStatement {
            table,
            projection,
            where_clause,
            distinct,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_insert(&mut self) -> Result<InsertStatement> {
        self.expect(TokenKind::Insert, "INSERT")?;
        self.expect(TokenKind::Into, "INTO")?;
        let table = self.expect(TokenKind::Identifier, "a table name")?.lexeme;
        self.expect(TokenKind::Values, "VALUES")?;
        self.expect(TokenKind::LeftParen, "'('")?;

        let mut values = vec![self.parse_literal_value()?];
        while self.accept(TokenKind::Comma) {
            values.push(self.parse_literal_value()?);
        }
        self.expect(TokenKind::RightParen, "')'")?;

        Ok(InsertStatement { table, values })
    }

    fn parse_create_table(&mut self) -> Result<CreateTableStatement> {
        self.expect(TokenKind::Create, "CREATE")?;
        self.expect(TokenKind::Table, "TABLE")?;
        let table = self.expect(TokenKind::Identifier, "a table name")?.lexeme;
        self.expect(TokenKind::LeftParen, "'('")?;

        let mut columns = vec![self.parse_column_def()?];
        while self.accept(TokenKind::Comma) {
            columns.push(self.parse_column_def()?);
        }
        self.expect(TokenKind::RightParen, "')'")?;

        Ok(CreateTableStatement { table, columns })
    }

    fn parse_update(&mut self) -> Result<UpdateStatement> {
        self.expect(TokenKind::Update, "UPDATE")?;
        let table = self.expect(TokenKind::Identifier, "a table name")?.lexeme;
        self.expect(TokenKind::Set, "SET")?;

        let mut assignments = vec![self.parse_assignment()?];
        while self.accept(TokenKind::Comma) {
            assignments.push(self.parse_assignment()?);
        }

        let where_clause = if self.accept(TokenKind::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(UpdateStatement {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_assignment(&mut self) -> Result<(String, Value)> {
        let column = self.expect(TokenKind::Identifier, "a column name")?.lexeme;
        self.expect(TokenKind::Equals, "'='")?;
        let value = self.parse_literal_value()?;
        Ok((column, value))
    }

    fn parse_delete(&mut self) -> Result<DeleteStatement> {
        self.expect(TokenKind::Delete, "DELETE")?;
        self.expect(TokenKind::From, "FROM")?;
        let table = self.expect(TokenKind::Identifier, "a table name")?.lexeme;

        let where_clause = if self.accept(TokenKind::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(DeleteStatement {
            table,
            where_clause,
        })
    }

    fn parse_drop_table(&mut self) -> Result<DropTableStatement> {
        self.expect(TokenKind::Drop, "DROP")?;
        self.expect(TokenKind::Table, "TABLE")?;
        let table = self.expect(TokenKind::Identifier, "a table name")?.lexeme;
        Ok(DropTableStatement { table })
    }

    fn parse_alter_table(&mut self) -> Result<AlterTableStatement> {
        self.expect(TokenKind::Alter, "ALTER")?;
        self.expect(TokenKind::Table, "TABLE")?;
        let table = self.expect(TokenKind::Identifier, "a table name")?.lexeme;
        self.expect(TokenKind::Add, "ADD")?;
        let name = self.expect(TokenKind::Identifier, "a column name")?.lexeme;
        let column_type = self.parse_column_type()?;

        Ok(AlterTableStatement {
            table,
            column: ColumnDef::new(name, column_type, false),
        })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.expect(TokenKind::Identifier, "a column name")?.lexeme;
        let column_type = self.parse_column_type()?;

        let mut primary_key = false;
        if self.accept(TokenKind::Primary) {
            self.expect(TokenKind::Key, "KEY")?;
            primary_key = true;
        }

        Ok(ColumnDef::new(name, column_type, primary_key))
    }

    fn parse_column_type(&mut self) -> Result<ColumnType> {
        let column_type = match self.current().kind {
            TokenKind::Integer => ColumnType::Integer,
            TokenKind::Text => ColumnType::Text,
            TokenKind::Real => ColumnType::Real,
            _ => {
                return Err(self.error_here(format!(
                    "expected a column type (INTEGER, TEXT, REAL), got '{}'",
                    self.describe_current()
                )));
            }
        };
        self.advance();
        Ok(column_type)
    }

    fn parse_unsigned(&mut self, what: &str) -> Result<u64> {
        let token = self.expect(TokenKind::IntegerLiteral, &format!("a number after {what}"))?;
        token.lexeme.parse::<u64>().map_err(|_| {
            DbError::parse(
                format!("invalid {what} value '{}'", token.lexeme),
                token.line,
                token.column,
            )
        })
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.accept(TokenKind::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOperator::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while self.accept(TokenKind::And) {
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_primary()?;

        let op = match self.current().kind {
            TokenKind::Equals => BinaryOperator::Eq,
            TokenKind::NotEquals => BinaryOperator::Ne,
            TokenKind::LessThan => BinaryOperator::Lt,
            TokenKind::LessEqual => BinaryOperator::Le,
            TokenKind::GreaterThan => BinaryOperator::Gt,
            TokenKind::GreaterEqual => BinaryOperator::Ge,
            _ => return Ok(left),
        };
        self.advance();

        let right = self.parse_primary()?;
        Ok(Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.current().kind {
            TokenKind::Identifier => {
                let name = self.current().lexeme.clone();
                self.advance();
                Ok(Expr::Column(name))
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RightParen, "')'")?;
                Ok(expr)
            }
            TokenKind::IntegerLiteral
            | TokenKind::FloatLiteral
            | TokenKind::StringLiteral
            | TokenKind::Null
            | TokenKind::Minus => Ok(Expr::Literal(self.parse_literal_value()?)),
            _ => Err(self.error_here(format!(
                "unexpected '{}' in expression",
                self.describe_current()
            ))),
        }
    }

    fn parse_literal_value(&mut self) -> Result<Value> {
        let negate = self.accept(TokenKind::Minus);
        let token = self.current().clone();

        let value = match token.kind {
            TokenKind::IntegerLiteral => {
                let parsed = token.lexeme.parse::<i64>().map_err(|_| {
                    DbError::parse(
                        format!("integer literal '{}' out of range", token.lexeme),
                        token.line,
                        token.column,
                    )
                })?;
                Value::Int(if negate { -parsed } else { parsed })
            }
            TokenKind::FloatLiteral => {
                let parsed = token.lexeme.parse::<f64>().map_err(|_| {
                    DbError::parse(
                        format!("invalid float literal '{}'", token.lexeme),
                        token.line,
                        token.column,
                    )
                })?;
                Value::Float(if negate { -parsed } else { parsed })
            }
            TokenKind::StringLiteral if !negate => Value::Text(token.lexeme.clone()),
            TokenKind::Null if !negate => Value::Null,
            _ => {
                return Err(self.error_here(format!(
                    "expected a literal, got '{}'",
                    self.describe_current()
                )));
            }
        };
        self.advance();
        Ok(value)
    }
}

/// Lex and parse one SQL statement.
pub fn parse(source: &str) -> Result<Statement> {
    let tokens = crate::sql::lexer::tokenize(source)?;
    Parser::new(tokens).parse()
}
