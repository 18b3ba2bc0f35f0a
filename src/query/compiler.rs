//! Lowers a [`Query`] to parameterized SQL.
//!
//! ```text
//! SELECT DISTINCT n.repo, n.node_path, n.node_name, ...
//! FROM nodes n
//! LEFT JOIN binaries b ON b.sha1 = n.sha1_actual
//! LEFT JOIN node_props p1 ON p1.node_id = n.node_id
//! WHERE n.repo = ? AND (p1.prop_key = 'license' AND p1.prop_value LIKE ? ESCAPE '\')
//! ORDER BY n.node_name ASC
//! LIMIT 10
//! ```
//!
//! Every literal becomes a `?` parameter, appended in the order the
//! predicates are written. Property keys of named-property criteria are
//! inlined as escaped string literals, so they are not parameters.

use std::fmt::Write as _;

use tracing::{debug, trace};

use crate::error::{AqlError, Result};
use crate::query::ast::{Comparator, Criteria, Domain, LogicalOp, Query, QueryElement};
use crate::query::dialect::Dialect;
use crate::query::fields::{Field, Variable};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::tables::{SqlTable, TableKind, BINARIES_TABLE_ID, NODES_TABLE_ID};
use crate::query::value::Value;

const NODES_ALIAS: &str = "n";
const BINARIES_ALIAS: &str = "b";

/// Output of compilation, owned by the call that executes it.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledSqlQuery {
    /// SQL text with positional `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
    /// Logical field of each result column, by column index.
    pub columns: Vec<Field>,
    /// Dialect the text was rendered for.
    pub dialect: Dialect,
}

impl CompiledSqlQuery {
    /// Result column names, by column index.
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|field| field.name()).collect()
    }
}

/// Knobs that change the rendered SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Target dialect.
    pub dialect: Dialect,
    /// Row cap applied when the query has no `limit(...)`.
    pub default_limit: Option<u64>,
}

/// Compiles queries for one set of [`CompilerOptions`].
#[derive(Debug, Clone, Default)]
pub struct SqlCompiler {
    options: CompilerOptions,
}

/// Compiles `query` for SQLite with no default limit.
pub fn compile(query: &Query) -> Result<CompiledSqlQuery> {
    SqlCompiler::default().compile(query)
}

impl SqlCompiler {
    /// Creates a compiler.
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    /// Options in effect.
    pub fn options(&self) -> CompilerOptions {
        self.options
    }

    /// Renders `query` as SQL.
    pub fn compile(&self, query: &Query) -> Result<CompiledSqlQuery> {
        let timer = profile_timer();
        let result = self.compile_inner(query);
        record_profile_timer(QueryProfileKind::Compile, timer);
        result
    }

    fn compile_inner(&self, query: &Query) -> Result<CompiledSqlQuery> {
        let root = match query.domain {
            Domain::Items => TableKind::Nodes,
        };
        let dialect = self.options.dialect;
        let mut aliases = AliasAllocator::default();

        let columns = projection(query);
        for field in &columns {
            aliases.alias_for_column(*field)?;
        }
        if let Some(sort) = &query.sort {
            for term in &sort.fields {
                aliases.alias_for_column(term.field)?;
            }
        }
        for criteria in query.criteria() {
            aliases.alias(criteria.table)?;
        }

        let mut writer = PredicateWriter {
            dialect,
            aliases: &aliases,
            params: Vec::with_capacity(query.literal_count()),
        };
        let predicate = if query.elements.is_empty() {
            None
        } else {
            let mut parts = Vec::with_capacity(query.elements.len());
            for element in &query.elements {
                parts.push(writer.element(element)?);
            }
            Some(parts.join(" AND "))
        };
        let params = writer.params;

        let mut sql = String::from("SELECT DISTINCT ");
        let projected: Vec<String> = columns
            .iter()
            .map(|field| aliases.column(*field))
            .collect::<Result<_>>()?;
        sql.push_str(&projected.join(", "));
        let _ = write!(sql, " FROM {} {NODES_ALIAS}", root.table_name());
        if aliases.uses_binaries {
            let _ = write!(
                sql,
                " LEFT JOIN {} {BINARIES_ALIAS} ON {BINARIES_ALIAS}.sha1 = {NODES_ALIAS}.{}",
                TableKind::Binaries.table_name(),
                Field::ActualSha1.column()
            );
        }
        for alias in aliases.property_aliases() {
            let _ = write!(
                sql,
                " LEFT JOIN {} {alias} ON {alias}.node_id = {NODES_ALIAS}.node_id",
                TableKind::Properties.table_name()
            );
        }
        if let Some(predicate) = predicate {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }

        let limit = query.limit.or(self.options.default_limit);
        let capped = limit.is_some() || query.offset.is_some();
        if query.is_sorted() {
            let mut terms = Vec::new();
            for term in query.sort.iter().flat_map(|sort| &sort.fields) {
                terms.push(format!(
                    "{} {}",
                    aliases.column(term.field)?,
                    term.direction.sql()
                ));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        } else if capped && dialect.row_cap_requires_order() {
            let identity: Vec<String> = Field::IDENTITY
                .iter()
                .map(|field| aliases.column(*field))
                .collect::<Result<_>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&identity.join(", "));
        }
        dialect.write_row_cap(&mut sql, limit, query.offset);

        debug!(
            dialect = %dialect,
            params = params.len(),
            property_joins = aliases.properties.len(),
            binaries = aliases.uses_binaries,
            "compiled query"
        );
        trace!(sql = %sql, "compiled sql");
        Ok(CompiledSqlQuery {
            sql,
            params,
            columns,
            dialect,
        })
    }
}

/// Identity fields first, then the `include` list or every selectable field.
fn projection(query: &Query) -> Vec<Field> {
    let mut columns = Field::IDENTITY.to_vec();
    let requested: Vec<Field> = if query.include.is_empty() {
        Field::ALL.into_iter().filter(|f| f.is_selectable()).collect()
    } else {
        query.include.clone()
    };
    for field in requested {
        if !columns.contains(&field) {
            columns.push(field);
        }
    }
    columns
}

/// Request-scoped SQL alias assignment.
#[derive(Debug, Default)]
struct AliasAllocator {
    uses_binaries: bool,
    properties: Vec<SqlTable>,
}

impl AliasAllocator {
    fn alias(&mut self, table: SqlTable) -> Result<String> {
        match table.kind {
            TableKind::Nodes if table.id == NODES_TABLE_ID => Ok(NODES_ALIAS.to_owned()),
            TableKind::Binaries if table.id == BINARIES_TABLE_ID => {
                self.uses_binaries = true;
                Ok(BINARIES_ALIAS.to_owned())
            }
            TableKind::Properties if table.is_pending() => Err(AqlError::compilation(
                "property criterion was never bound to a join context",
            )),
            TableKind::Properties => {
                let index = match self.properties.iter().position(|t| *t == table) {
                    Some(index) => index,
                    None => {
                        self.properties.push(table);
                        self.properties.len() - 1
                    }
                };
                Ok(format!("p{}", index + 1))
            }
            _ => Err(AqlError::compilation(format!(
                "table {table} has no schema mapping"
            ))),
        }
    }

    fn alias_for_column(&mut self, field: Field) -> Result<()> {
        match field.fixed_table() {
            Some(table) => self.alias(table).map(drop),
            None => Err(AqlError::compilation(format!(
                "field '{field}' cannot be projected"
            ))),
        }
    }

    /// Alias of an already allocated table.
    fn lookup(&self, table: SqlTable) -> Result<String> {
        match table.kind {
            TableKind::Nodes => Ok(NODES_ALIAS.to_owned()),
            TableKind::Binaries if self.uses_binaries => Ok(BINARIES_ALIAS.to_owned()),
            TableKind::Properties => self
                .properties
                .iter()
                .position(|t| *t == table)
                .map(|index| format!("p{}", index + 1))
                .ok_or_else(|| AqlError::compilation(format!("table {table} was not joined"))),
            TableKind::Binaries => Err(AqlError::compilation("binaries table was not joined")),
        }
    }

    fn column(&self, field: Field) -> Result<String> {
        let table = field
            .fixed_table()
            .ok_or_else(|| AqlError::compilation(format!("field '{field}' has no fixed table")))?;
        Ok(format!("{}.{}", self.lookup(table)?, field.column()))
    }

    fn property_aliases(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.properties.len()).map(|index| format!("p{index}"))
    }
}

struct PredicateWriter<'a> {
    dialect: Dialect,
    aliases: &'a AliasAllocator,
    params: Vec<Value>,
}

impl PredicateWriter<'_> {
    fn element(&mut self, element: &QueryElement) -> Result<String> {
        match element {
            QueryElement::Criteria(criteria) => self.criteria(criteria),
            QueryElement::Group(group) => {
                if group.children.is_empty() {
                    return match group.op {
                        LogicalOp::Or => Err(AqlError::compilation("$or group has no children")),
                        LogicalOp::And | LogicalOp::Join => Ok("1 = 1".to_owned()),
                    };
                }
                let separator = match group.op {
                    LogicalOp::Or => " OR ",
                    LogicalOp::And | LogicalOp::Join => " AND ",
                };
                let mut parts = Vec::with_capacity(group.children.len());
                for child in &group.children {
                    parts.push(self.element(child)?);
                }
                Ok(format!("({})", parts.join(separator)))
            }
        }
    }

    fn criteria(&mut self, criteria: &Criteria) -> Result<String> {
        let alias = self.aliases.lookup(criteria.table)?;
        match &criteria.variable {
            Variable::Field(field) => {
                if field.table_kind() != criteria.table.kind {
                    return Err(AqlError::compilation(format!(
                        "field '{field}' does not belong to table {}",
                        criteria.table
                    )));
                }
                let column = format!("{alias}.{}", field.column());
                let nullable = field.is_nullable();
                self.comparison(&column, criteria.comparator, &criteria.value, nullable)
            }
            Variable::Value(key) => {
                if criteria.table.kind != TableKind::Properties {
                    return Err(AqlError::compilation(format!(
                        "property '{key}' is not read from a property table"
                    )));
                }
                let value_column = format!("{alias}.{}", Field::PropertyValue.column());
                let comparison =
                    self.comparison(&value_column, criteria.comparator, &criteria.value, true)?;
                Ok(format!(
                    "({alias}.{} = {} AND {comparison})",
                    Field::PropertyKey.column(),
                    self.dialect.string_literal(key)
                ))
            }
        }
    }

    fn comparison(
        &mut self,
        column: &str,
        comparator: Comparator,
        value: &Value,
        nullable: bool,
    ) -> Result<String> {
        let sql = match comparator {
            Comparator::Equals => format!("{column} = ?"),
            Comparator::NotEquals if nullable => format!("({column} <> ? OR {column} IS NULL)"),
            Comparator::NotEquals => format!("{column} <> ?"),
            Comparator::Less => format!("{column} < ?"),
            Comparator::LessOrEquals => format!("{column} <= ?"),
            Comparator::Greater => format!("{column} > ?"),
            Comparator::GreaterOrEquals => format!("{column} >= ?"),
            Comparator::Matches | Comparator::NotMatches => {
                let pattern = value.as_str().ok_or_else(|| {
                    AqlError::compilation(format!(
                        "{comparator} needs a string pattern, found {}",
                        value.type_name()
                    ))
                })?;
                self.params.push(Value::String(glob_to_like(pattern)));
                let escape = self.dialect.like_escape();
                return Ok(match comparator {
                    Comparator::Matches => format!("{column} LIKE ? ESCAPE {escape}"),
                    _ if nullable => format!(
                        "({column} NOT LIKE ? ESCAPE {escape} OR {column} IS NULL)"
                    ),
                    _ => format!("{column} NOT LIKE ? ESCAPE {escape}"),
                });
            }
        };
        self.params.push(value.clone());
        Ok(sql)
    }
}

/// Converts a glob (`*`, `?`) into a `LIKE` pattern escaped with `\`.
pub fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}
