//! Recursive-descent parser turning AQL text into a [`Query`].
//!
//! ```text
//! items.find({"repo":"libs","$or":[{"name":{"$matches":"*.jar"}},{"license":"MIT"}]})
//!      .sort({"$asc":["name"]})
//!      .limit(10)
//! ```
//!
//! Parsing is a pure function of the input text. Property join contexts are
//! bound here, while the `$join` nesting is still visible.

use crate::error::{AqlError, Result};
use crate::query::ast::{
    Comparator, Criteria, Direction, Domain, LogicalGroup, LogicalOp, Query, QueryElement,
    SortDetails, SortField,
};
use crate::query::fields::{self, Field, Variable};
use crate::query::lexer::{Lexer, Token, TokenKind};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::tables::{self, SqlTable, TableAllocator};
use crate::query::value::Value;

/// Deepest allowed nesting of logical groups.
pub const MAX_FILTER_DEPTH: usize = 64;

/// Parses query text into a validated AST.
///
/// Logical groups nest at most [`MAX_FILTER_DEPTH`] levels, which also
/// bounds the recursion of later stages over parsed queries.
pub fn parse(text: &str) -> Result<Query> {
    let timer = profile_timer();
    let query = Parser::new(text).and_then(Parser::parse_query);
    record_profile_timer(QueryProfileKind::Parse, timer);
    query
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    tables: TableAllocator,
    join_depth: usize,
    group_depth: usize,
}

/// Modifiers that may follow the `find` chain, each at most once.
#[derive(Default)]
struct Modifiers {
    sort: bool,
    include: bool,
    limit: bool,
    offset: bool,
}

impl Modifiers {
    fn any(&self) -> bool {
        self.sort || self.include || self.limit || self.offset
    }
}

impl Parser {
    fn new(text: &str) -> Result<Self> {
        Ok(Self {
            tokens: Lexer::tokenize(text)?,
            index: 0,
            tables: TableAllocator::new(),
            join_depth: 0,
            group_depth: 0,
        })
    }

    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> AqlError {
        let token = self.peek();
        AqlError::syntax(
            token.position,
            format!("expected {expected}, found {}", token.kind),
        )
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token> {
        if self.peek().kind == kind {
            Ok(self.bump())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, usize)> {
        match &self.peek().kind {
            TokenKind::Ident(word) => {
                let word = word.clone();
                let position = self.bump().position;
                Ok((word, position))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_string(&mut self, expected: &str) -> Result<(String, usize)> {
        match &self.peek().kind {
            TokenKind::Str(s) => {
                let s = s.clone();
                let position = self.bump().position;
                Ok((s, position))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn parse_query(mut self) -> Result<Query> {
        let (name, position) = self.expect_ident("a domain name")?;
        let domain = Domain::from_name(&name)
            .ok_or_else(|| AqlError::syntax(position, format!("unknown domain '{name}'")))?;
        let mut query = Query::new(domain);

        self.expect(TokenKind::Dot, "'.'")?;
        let (method, position) = self.expect_ident("'find'")?;
        if method != "find" {
            return Err(AqlError::syntax(
                position,
                format!("query must start with find(), found '{method}'"),
            ));
        }
        self.parse_find_body(&mut query)?;

        let mut seen = Modifiers::default();
        while self.peek().kind == TokenKind::Dot {
            self.bump();
            let (method, position) = self.expect_ident("a method name")?;
            match method.as_str() {
                "find" if !seen.any() => self.parse_find_body(&mut query)?,
                "find" => {
                    return Err(AqlError::syntax(
                        position,
                        "find() cannot follow sort, include, limit or offset",
                    ))
                }
                "sort" => {
                    mark_once(&mut seen.sort, "sort", position)?;
                    query.sort = Some(self.parse_sort()?);
                }
                "include" => {
                    mark_once(&mut seen.include, "include", position)?;
                    query.include = self.parse_include()?;
                }
                "limit" => {
                    mark_once(&mut seen.limit, "limit", position)?;
                    query.limit = Some(self.parse_count("limit")?);
                }
                "offset" => {
                    mark_once(&mut seen.offset, "offset", position)?;
                    query.offset = Some(self.parse_count("offset")?);
                }
                other => {
                    return Err(AqlError::syntax(
                        position,
                        format!("unknown method '{other}'"),
                    ))
                }
            }
        }
        self.expect(TokenKind::Eof, "end of query")?;
        validate_sort_projection(&query)?;
        Ok(query)
    }

    fn parse_find_body(&mut self, query: &mut Query) -> Result<()> {
        self.expect(TokenKind::LParen, "'('")?;
        if self.peek().kind != TokenKind::RParen {
            let elements = self.parse_filter_object()?;
            query.elements.extend(elements);
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(())
    }

    /// Parses `{ pair, ... }`; the returned elements are conjunctive.
    fn parse_filter_object(&mut self) -> Result<Vec<QueryElement>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut elements = Vec::new();
        if self.peek().kind == TokenKind::RBrace {
            self.bump();
            return Ok(elements);
        }
        loop {
            let (key, position) = self.expect_string("a quoted field name")?;
            self.expect(TokenKind::Colon, "':'")?;
            self.parse_pair(&key, position, &mut elements)?;
            match self.peek().kind {
                TokenKind::Comma => {
                    self.bump();
                }
                TokenKind::RBrace => {
                    self.bump();
                    return Ok(elements);
                }
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }
    }

    fn parse_pair(
        &mut self,
        key: &str,
        position: usize,
        out: &mut Vec<QueryElement>,
    ) -> Result<()> {
        if key.starts_with('$') {
            let op = LogicalOp::from_symbol(key).ok_or_else(|| {
                AqlError::syntax(position, format!("unknown logical operator '{key}'"))
            })?;
            out.push(self.parse_group(op)?);
            return Ok(());
        }
        let variable = fields::resolve(key)?;
        match self.peek().kind {
            TokenKind::LBrace => self.parse_comparators(key, &variable, out),
            TokenKind::LBracket => Err(AqlError::illegal(format!(
                "field '{key}' does not accept an array"
            ))),
            _ => {
                let literal = self.parse_literal(&variable)?;
                let table = self.table_for(&variable)?;
                out.push(criteria(key, table, Comparator::Equals, literal)?);
                Ok(())
            }
        }
    }

    /// Parses `{"$op": literal, ...}` for one field.
    ///
    /// All comparators of one object read the same property row.
    fn parse_comparators(
        &mut self,
        key: &str,
        variable: &Variable,
        out: &mut Vec<QueryElement>,
    ) -> Result<()> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        if self.peek().kind == TokenKind::RBrace {
            return Err(AqlError::syntax(
                open.position,
                format!("comparator object for '{key}' is empty"),
            ));
        }
        let table = self.table_for(variable)?;
        loop {
            let (symbol, position) = self.expect_string("a quoted comparator such as \"$equals\"")?;
            let comparator = Comparator::from_symbol(&symbol).ok_or_else(|| {
                AqlError::syntax(position, format!("malformed comparator '{symbol}'"))
            })?;
            self.expect(TokenKind::Colon, "':'")?;
            let literal = self.parse_literal(variable)?;
            out.push(criteria(key, table, comparator, literal)?);
            match self.peek().kind {
                TokenKind::Comma => {
                    self.bump();
                }
                TokenKind::RBrace => {
                    self.bump();
                    return Ok(());
                }
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }
    }

    fn parse_group(&mut self, op: LogicalOp) -> Result<QueryElement> {
        let open = self.expect(TokenKind::LBracket, &format!("'[' after {}", op.symbol()))?;
        if self.peek().kind == TokenKind::RBracket {
            return Err(AqlError::syntax(
                open.position,
                format!("{} requires at least one filter", op.symbol()),
            ));
        }
        if self.group_depth == MAX_FILTER_DEPTH {
            return Err(AqlError::syntax(
                open.position,
                format!("filter nesting exceeds {MAX_FILTER_DEPTH} levels"),
            ));
        }
        self.group_depth += 1;
        if op == LogicalOp::Join {
            self.join_depth += 1;
        }
        let mut children = Vec::new();
        loop {
            let mut elements = self.parse_filter_object()?;
            let child = if elements.len() == 1 {
                elements.remove(0)
            } else {
                QueryElement::Group(LogicalGroup::new(LogicalOp::And, elements))
            };
            children.push(child);
            match self.peek().kind {
                TokenKind::Comma => {
                    self.bump();
                }
                TokenKind::RBracket => {
                    self.bump();
                    break;
                }
                _ => return Err(self.unexpected("',' or ']'")),
            }
        }
        self.group_depth -= 1;
        if op == LogicalOp::Join {
            self.join_depth -= 1;
            tables::bind_join_scope(&mut children, &mut self.tables)?;
        }
        Ok(QueryElement::Group(LogicalGroup::new(op, children)))
    }

    /// Numbers compared with a dynamic property keep their source spelling,
    /// since property values are stored as text.
    fn parse_literal(&mut self, variable: &Variable) -> Result<Value> {
        let token = self.peek().clone();
        let value = match token.kind {
            TokenKind::Str(s) => {
                if s.starts_with('$') && Comparator::from_symbol(&s).is_some() {
                    return Err(AqlError::syntax(
                        token.position,
                        format!("malformed comparator: use {{\"{s}\": <value>}}"),
                    ));
                }
                Value::String(s)
            }
            TokenKind::Int(_) | TokenKind::Float(_) if !variable.is_field() => {
                Value::String(token.lexeme)
            }
            TokenKind::Int(v) => Value::Int(v),
            TokenKind::Float(v) => Value::Float(v),
            TokenKind::True => Value::Bool(true),
            TokenKind::False => Value::Bool(false),
            _ => return Err(self.unexpected("a literal value")),
        };
        self.bump();
        Ok(value)
    }

    fn table_for(&mut self, variable: &Variable) -> Result<SqlTable> {
        if let Some(table) = variable.as_field().and_then(Field::fixed_table) {
            return Ok(table);
        }
        if self.join_depth > 0 {
            Ok(SqlTable::pending_properties())
        } else if variable.is_field() {
            self.tables.fixed_properties()
        } else {
            self.tables.dynamic_properties()
        }
    }

    fn parse_sort(&mut self) -> Result<SortDetails> {
        self.expect(TokenKind::LParen, "'('")?;
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        if self.peek().kind == TokenKind::RBrace {
            return Err(AqlError::syntax(open.position, "sort requires a direction"));
        }
        let mut sort = SortDetails::default();
        loop {
            let (symbol, position) = self.expect_string("\"$asc\" or \"$desc\"")?;
            let direction = Direction::from_symbol(&symbol).ok_or_else(|| {
                AqlError::syntax(position, format!("unknown sort direction '{symbol}'"))
            })?;
            self.expect(TokenKind::Colon, "':'")?;
            for field in self.parse_field_list(TokenKind::LBracket, TokenKind::RBracket)? {
                sort.fields.push(SortField { field, direction });
            }
            match self.peek().kind {
                TokenKind::Comma => {
                    self.bump();
                }
                TokenKind::RBrace => {
                    self.bump();
                    break;
                }
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(sort)
    }

    fn parse_include(&mut self) -> Result<Vec<Field>> {
        let fields = self.parse_field_list(TokenKind::LParen, TokenKind::RParen)?;
        let mut unique = Vec::with_capacity(fields.len());
        for field in fields {
            if !unique.contains(&field) {
                unique.push(field);
            }
        }
        Ok(unique)
    }

    /// Parses a non-empty, comma separated list of quoted selectable fields.
    fn parse_field_list(&mut self, open: TokenKind, close: TokenKind) -> Result<Vec<Field>> {
        let open_token = self.expect(open, "a field list")?;
        if self.peek().kind == close {
            return Err(AqlError::syntax(open_token.position, "field list is empty"));
        }
        let mut fields = Vec::new();
        loop {
            let (name, _) = self.expect_string("a quoted field name")?;
            fields.push(fields::resolve_selectable(&name)?);
            if self.peek().kind == TokenKind::Comma {
                self.bump();
                continue;
            }
            if self.peek().kind == close {
                self.bump();
                return Ok(fields);
            }
            return Err(self.unexpected("',' or the end of the field list"));
        }
    }

    fn parse_count(&mut self, what: &str) -> Result<u64> {
        self.expect(TokenKind::LParen, "'('")?;
        let token = self.bump();
        let count = match token.kind {
            TokenKind::Int(v) => u64::try_from(v)
                .map_err(|_| AqlError::illegal(format!("{what} must not be negative")))?,
            other => {
                return Err(AqlError::syntax(
                    token.position,
                    format!("expected an integer {what}, found {other}"),
                ))
            }
        };
        self.expect(TokenKind::RParen, "')'")?;
        Ok(count)
    }
}

fn criteria(
    key: &str,
    table: SqlTable,
    comparator: Comparator,
    literal: Value,
) -> Result<QueryElement> {
    let (variable, value) = fields::resolve_pair(key, literal)?;
    fields::check_comparator(&variable, comparator)?;
    Ok(QueryElement::Criteria(Criteria {
        table,
        variable,
        comparator,
        value,
    }))
}

fn mark_once(seen: &mut bool, name: &str, position: usize) -> Result<()> {
    if *seen {
        return Err(AqlError::syntax(
            position,
            format!("{name}() may only appear once"),
        ));
    }
    *seen = true;
    Ok(())
}

fn validate_sort_projection(query: &Query) -> Result<()> {
    let Some(sort) = &query.sort else {
        return Ok(());
    };
    if query.include.is_empty() {
        return Ok(());
    }
    for term in &sort.fields {
        let projected =
            Field::IDENTITY.contains(&term.field) || query.include.contains(&term.field);
        if !projected {
            return Err(AqlError::illegal(format!(
                "sorted field '{}' must also be included",
                term.field
            )));
        }
    }
    Ok(())
}
