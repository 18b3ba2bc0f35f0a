//! Semantics-preserving AST rewrites.
//!
//! The optimizer is an ordered fold: every strategy runs exactly once, in
//! declaration order, and receives the previous strategy's output. Strategies
//! share no state and must not assume any other strategy has run.

use std::collections::HashMap;

use tracing::trace;

use crate::query::ast::{Criteria, LogicalGroup, LogicalOp, Query, QueryElement};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::tables::{SqlTable, TableKind};

/// A single AST rewrite.
pub trait OptimizationStrategy: Send + Sync {
    /// Name used in trace output.
    fn name(&self) -> &'static str;

    /// Rewrites `query`. The matched row set must not change.
    fn optimize(&self, query: Query) -> Query;
}

/// Ordered list of strategies.
pub struct Optimizer {
    strategies: Vec<Box<dyn OptimizationStrategy>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(vec![
            Box::new(FlattenGroups),
            Box::new(TypeNarrowing),
            Box::new(OrToJoin),
        ])
    }
}

impl Optimizer {
    /// Creates an optimizer running `strategies` in order.
    pub fn new(strategies: Vec<Box<dyn OptimizationStrategy>>) -> Self {
        Self { strategies }
    }

    /// An optimizer that returns queries untouched.
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Strategy names in execution order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Runs every strategy once, in order.
    pub fn optimize(&self, query: Query) -> Query {
        let timer = profile_timer();
        let optimized = self.strategies.iter().fold(query, |query, strategy| {
            let query = strategy.optimize(query);
            trace!(
                strategy = strategy.name(),
                criteria = query.literal_count(),
                "optimizer strategy applied"
            );
            query
        });
        record_profile_timer(QueryProfileKind::Optimize, timer);
        optimized
    }
}

/// Runs the default strategy list over `query`.
pub fn optimize(query: Query) -> Query {
    Optimizer::default().optimize(query)
}

fn is_conjunctive(op: LogicalOp) -> bool {
    matches!(op, LogicalOp::And | LogicalOp::Join)
}

/// Removes redundant grouping.
///
/// Single-child groups are replaced by their child and groups are spliced
/// into a parent of the same polarity. Join correlation lives on the table
/// ids, so a `$join` wrapper can be spliced into a conjunction.
pub struct FlattenGroups;

impl OptimizationStrategy for FlattenGroups {
    fn name(&self) -> &'static str {
        "flatten_groups"
    }

    fn optimize(&self, mut query: Query) -> Query {
        let mut elements = Vec::with_capacity(query.elements.len());
        for element in std::mem::take(&mut query.elements) {
            flatten_into(&mut elements, element, true);
        }
        query.elements = elements;
        query
    }
}

fn flatten_into(out: &mut Vec<QueryElement>, element: QueryElement, parent_conjunctive: bool) {
    match element {
        QueryElement::Criteria(_) => out.push(element),
        QueryElement::Group(LogicalGroup { op, children }) => {
            let conjunctive = is_conjunctive(op);
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                flatten_into(&mut flat, child, conjunctive);
            }
            if conjunctive == parent_conjunctive || flat.len() == 1 {
                out.extend(flat);
            } else {
                out.push(QueryElement::Group(LogicalGroup::new(op, flat)));
            }
        }
    }
}

/// Prunes `$or` branches that contradict a top-level `type` pin.
///
/// When the top-level conjunction requires `type == t` (and no other type),
/// any branch that itself requires a different type can never match. The
/// last branch of a group is never removed, and duplicate pins are dropped.
pub struct TypeNarrowing;

impl OptimizationStrategy for TypeNarrowing {
    fn name(&self) -> &'static str {
        "type_narrowing"
    }

    fn optimize(&self, mut query: Query) -> Query {
        let Some(pinned) = top_level_pin(&query.elements) else {
            return query;
        };
        let mut seen_pin = false;
        query.elements.retain(|element| match element {
            QueryElement::Criteria(c) if c.pinned_item_type() == Some(pinned) => {
                let keep = !seen_pin;
                seen_pin = true;
                keep
            }
            _ => true,
        });
        for element in &mut query.elements {
            narrow(element, pinned);
        }
        query
    }
}

fn top_level_pin(elements: &[QueryElement]) -> Option<i64> {
    let mut pins = Vec::new();
    collect_required_pins(elements, &mut pins);
    match pins.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

/// Type codes a conjunction of `elements` requires.
fn collect_required_pins(elements: &[QueryElement], pins: &mut Vec<i64>) {
    for element in elements {
        match element {
            QueryElement::Criteria(c) => {
                if let Some(code) = c.pinned_item_type() {
                    if !pins.contains(&code) {
                        pins.push(code);
                    }
                }
            }
            QueryElement::Group(group) if is_conjunctive(group.op) => {
                collect_required_pins(&group.children, pins);
            }
            QueryElement::Group(_) => {}
        }
    }
}

fn contradicts(element: &QueryElement, pinned: i64) -> bool {
    let mut pins = Vec::new();
    collect_required_pins(std::slice::from_ref(element), &mut pins);
    pins.iter().any(|code| *code != pinned)
}

fn narrow(element: &mut QueryElement, pinned: i64) {
    let QueryElement::Group(group) = element else {
        return;
    };
    if group.op == LogicalOp::Or {
        let survivors = group
            .children
            .iter()
            .filter(|child| !contradicts(child, pinned))
            .count();
        if survivors > 0 && survivors < group.children.len() {
            trace!(
                removed = group.children.len() - survivors,
                "pruned $or branches contradicting type pin"
            );
            group.children.retain(|child| !contradicts(child, pinned));
        }
    }
    for child in &mut group.children {
        narrow(child, pinned);
    }
}

/// Collapses an `$or` of independent property criteria onto one property join.
///
/// `∃r1 A(r1) ∨ ∃r2 B(r2)` is the same as `∃r (A(r) ∨ B(r))`, so when every
/// child of the `$or` is a property criterion whose join context is used
/// nowhere else, the children can share the first child's context. The
/// result is wrapped in a `$join` to record the shared context. Contexts of
/// different range classes are never merged.
pub struct OrToJoin;

impl OptimizationStrategy for OrToJoin {
    fn name(&self) -> &'static str {
        "or_to_join"
    }

    fn optimize(&self, mut query: Query) -> Query {
        let mut usage: HashMap<SqlTable, usize> = HashMap::new();
        for criteria in query.criteria() {
            *usage.entry(criteria.table).or_default() += 1;
        }
        for element in &mut query.elements {
            rewrite_or_groups(element, &usage);
        }
        query
    }
}

fn rewrite_or_groups(element: &mut QueryElement, usage: &HashMap<SqlTable, usize>) {
    let QueryElement::Group(group) = element else {
        return;
    };
    for child in &mut group.children {
        rewrite_or_groups(child, usage);
    }
    if group.op != LogicalOp::Or || group.children.len() < 2 {
        return;
    }
    let Some(first) = mergeable_table(&group.children, usage) else {
        return;
    };
    for child in &mut group.children {
        if let QueryElement::Criteria(criteria) = child {
            criteria.table = first;
        }
    }
    trace!(table = %first, merged = group.children.len(), "merged $or property joins");
    let or = std::mem::replace(group, LogicalGroup::new(LogicalOp::Join, Vec::new()));
    group.children.push(QueryElement::Group(or));
}

fn mergeable_table(
    children: &[QueryElement],
    usage: &HashMap<SqlTable, usize>,
) -> Option<SqlTable> {
    let mut tables = children.iter().map(|child| match child {
        QueryElement::Criteria(Criteria { table, .. })
            if table.kind == TableKind::Properties
                && !table.is_pending()
                && usage.get(table) == Some(&1) =>
        {
            Some(*table)
        }
        _ => None,
    });
    let first = tables.next()??;
    for table in tables {
        let table = table?;
        if table.is_dynamic() != first.is_dynamic() {
            return None;
        }
    }
    Some(first)
}
