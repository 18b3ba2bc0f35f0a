//! Abstract syntax tree produced by the parser.
//!
//! The tree is request-scoped: it is built by [`crate::query::parser`],
//! rewritten by the optimizer, checked by the restrictor and finally lowered
//! by the compiler. Join correlation is carried by the [`SqlTable`] stored on
//! each [`Criteria`], not by the shape of the tree.

use std::fmt;

use crate::query::fields::{Field, Variable};
use crate::query::tables::SqlTable;
use crate::query::value::Value;

/// Entity searched by a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Repository items (files and folders).
    Items,
}

impl Domain {
    /// Resolves the word in front of `.find(...)`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "items" | "artifacts" => Some(Domain::Items),
            _ => None,
        }
    }

    /// Canonical spelling.
    pub fn name(self) -> &'static str {
        match self {
            Domain::Items => "items",
        }
    }
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparator {
    /// `$equals` / `$eq`
    Equals,
    /// `$notEquals` / `$ne`
    NotEquals,
    /// `$matches` / `$match`, glob pattern
    Matches,
    /// `$notMatches` / `$nmatch`
    NotMatches,
    /// `$less` / `$lt`
    Less,
    /// `$lessOrEquals` / `$lte`
    LessOrEquals,
    /// `$greater` / `$gt`
    Greater,
    /// `$greaterOrEquals` / `$gte`
    GreaterOrEquals,
}

impl Comparator {
    /// Parses a comparator key including its `$` prefix.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "$equals" | "$eq" => Some(Comparator::Equals),
            "$notEquals" | "$ne" => Some(Comparator::NotEquals),
            "$matches" | "$match" => Some(Comparator::Matches),
            "$notMatches" | "$nmatch" => Some(Comparator::NotMatches),
            "$less" | "$lt" => Some(Comparator::Less),
            "$lessOrEquals" | "$lte" => Some(Comparator::LessOrEquals),
            "$greater" | "$gt" => Some(Comparator::Greater),
            "$greaterOrEquals" | "$gte" => Some(Comparator::GreaterOrEquals),
            _ => None,
        }
    }

    /// Canonical spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Equals => "$equals",
            Comparator::NotEquals => "$notEquals",
            Comparator::Matches => "$matches",
            Comparator::NotMatches => "$notMatches",
            Comparator::Less => "$less",
            Comparator::LessOrEquals => "$lessOrEquals",
            Comparator::Greater => "$greater",
            Comparator::GreaterOrEquals => "$greaterOrEquals",
        }
    }

    /// Whether the comparator takes a glob pattern.
    pub fn is_pattern(self) -> bool {
        matches!(self, Comparator::Matches | Comparator::NotMatches)
    }

    /// Whether the comparator relies on value ordering.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Comparator::Less
                | Comparator::LessOrEquals
                | Comparator::Greater
                | Comparator::GreaterOrEquals
        )
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Leaf predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Criteria {
    /// Join context the variable is read from.
    pub table: SqlTable,
    /// Field or dynamic property key.
    pub variable: Variable,
    /// Operator.
    pub comparator: Comparator,
    /// Literal, already typed for the variable.
    pub value: Value,
}

impl Criteria {
    /// Whether the criterion pins `type` to a single value.
    pub fn pinned_item_type(&self) -> Option<i64> {
        match (&self.variable, self.comparator, &self.value) {
            (Variable::Field(Field::Type), Comparator::Equals, Value::Int(code)) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} {} {:?}",
            self.table, self.variable, self.comparator, self.value
        )
    }
}

/// Logical operator of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// Conjunction (`$and`, or juxtaposition).
    And,
    /// Disjunction (`$or`).
    Or,
    /// Conjunction whose property criteria share one property row (`$join`).
    Join,
}

impl LogicalOp {
    /// Query-text spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "$and",
            LogicalOp::Or => "$or",
            LogicalOp::Join => "$join",
        }
    }

    /// Parses a logical key.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "$and" => Some(LogicalOp::And),
            "$or" => Some(LogicalOp::Or),
            "$join" => Some(LogicalOp::Join),
            _ => None,
        }
    }
}

/// Group of criteria and nested groups.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalGroup {
    /// How the children combine.
    pub op: LogicalOp,
    /// Children in source order.
    pub children: Vec<QueryElement>,
}

impl LogicalGroup {
    /// Creates a group.
    pub fn new(op: LogicalOp, children: Vec<QueryElement>) -> Self {
        Self { op, children }
    }
}

/// Node of the filter tree.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryElement {
    /// Leaf predicate.
    Criteria(Criteria),
    /// Nested group.
    Group(LogicalGroup),
}

impl QueryElement {
    /// Visits every criterion below this element in traversal order.
    pub fn for_each_criteria<'a>(&'a self, visit: &mut impl FnMut(&'a Criteria)) {
        match self {
            QueryElement::Criteria(criteria) => visit(criteria),
            QueryElement::Group(group) => {
                for child in &group.children {
                    child.for_each_criteria(visit);
                }
            }
        }
    }

    /// Mutable counterpart of [`QueryElement::for_each_criteria`].
    pub fn for_each_criteria_mut(&mut self, visit: &mut impl FnMut(&mut Criteria)) {
        match self {
            QueryElement::Criteria(criteria) => visit(criteria),
            QueryElement::Group(group) => {
                for child in &mut group.children {
                    child.for_each_criteria_mut(visit);
                }
            }
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// Parses `$asc` / `$desc`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "$asc" => Some(Direction::Asc),
            "$desc" => Some(Direction::Desc),
            _ => None,
        }
    }

    /// SQL keyword.
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One `ORDER BY` term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortField {
    /// Sorted field.
    pub field: Field,
    /// Direction.
    pub direction: Direction,
}

/// Ordered sort specification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortDetails {
    /// Terms in priority order.
    pub fields: Vec<SortField>,
}

impl SortDetails {
    /// Whether no term is present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Root of a parsed query.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Searched entity.
    pub domain: Domain,
    /// Filter elements, combined with AND.
    pub elements: Vec<QueryElement>,
    /// Optional sort specification.
    pub sort: Option<SortDetails>,
    /// Optional row cap.
    pub limit: Option<u64>,
    /// Optional number of leading rows to skip.
    pub offset: Option<u64>,
    /// Explicit field selection; empty means every selectable field.
    pub include: Vec<Field>,
}

impl Query {
    /// Creates a query matching the whole domain.
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            elements: Vec::new(),
            sort: None,
            limit: None,
            offset: None,
            include: Vec::new(),
        }
    }

    /// Every criterion in traversal order.
    pub fn criteria(&self) -> Vec<&Criteria> {
        let mut out = Vec::new();
        for element in &self.elements {
            element.for_each_criteria(&mut |criteria| out.push(criteria));
        }
        out
    }

    /// Number of literal values, which is also the compiled parameter count.
    pub fn literal_count(&self) -> usize {
        self.criteria().len()
    }

    /// Whether a non-empty sort specification is present.
    pub fn is_sorted(&self) -> bool {
        self.sort.as_ref().is_some_and(|sort| !sort.is_empty())
    }
}
