//! Join-target descriptors and the request-scoped table id allocator.
//!
//! Every criterion carries the [`SqlTable`] it reads from. Two criteria that
//! carry the same property table read the *same* property row, which is how
//! `$join` correlation reaches the compiler. Ids at or above
//! [`DYNAMIC_TABLE_THRESHOLD`] mark property joins introduced by
//! named-property criteria; lower ids are either the fixed entity tables or
//! property joins addressed through the raw `key`/`value` fields.

use std::fmt;

use crate::error::{AqlError, Result};
use crate::query::ast::{LogicalGroup, QueryElement};

/// Id of the primary item table.
pub const NODES_TABLE_ID: u32 = 0;
/// Id of the checksum table.
pub const BINARIES_TABLE_ID: u32 = 1;
/// First id handed out to `key`/`value` property join contexts.
pub const FIRST_PROPERTY_TABLE_ID: u32 = 2;
/// Ids at or above this value belong to dynamically introduced property joins.
pub const DYNAMIC_TABLE_THRESHOLD: u32 = 100;
/// Placeholder id for property criteria inside a `$join` that is still open.
pub const PENDING_TABLE_ID: u32 = u32::MAX;

/// Relational tables the engine knows how to join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKind {
    /// Repository items (`nodes`).
    Nodes,
    /// Binary checksums (`binaries`), one row per sha1.
    Binaries,
    /// Item properties (`node_props`), many rows per item.
    Properties,
}

impl TableKind {
    /// Physical table name.
    pub fn table_name(self) -> &'static str {
        match self {
            TableKind::Nodes => "nodes",
            TableKind::Binaries => "binaries",
            TableKind::Properties => "node_props",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A join target: table kind plus the join context id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SqlTable {
    /// Which table is read.
    pub kind: TableKind,
    /// Join context id, unique per query.
    pub id: u32,
}

impl SqlTable {
    /// The item table.
    pub const fn nodes() -> Self {
        Self {
            kind: TableKind::Nodes,
            id: NODES_TABLE_ID,
        }
    }

    /// The checksum table.
    pub const fn binaries() -> Self {
        Self {
            kind: TableKind::Binaries,
            id: BINARIES_TABLE_ID,
        }
    }

    /// A property join context with an explicit id.
    pub const fn properties(id: u32) -> Self {
        Self {
            kind: TableKind::Properties,
            id,
        }
    }

    /// A property join context waiting for its enclosing `$join` to close.
    pub const fn pending_properties() -> Self {
        Self::properties(PENDING_TABLE_ID)
    }

    /// Whether the table id has not been bound yet.
    pub fn is_pending(&self) -> bool {
        self.id == PENDING_TABLE_ID
    }

    /// Whether this is a property join introduced by a named-property criterion.
    pub fn is_dynamic(&self) -> bool {
        self.kind == TableKind::Properties
            && self.id >= DYNAMIC_TABLE_THRESHOLD
            && !self.is_pending()
    }
}

impl fmt::Display for SqlTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pending() {
            write!(f, "{}#pending", self.kind)
        } else {
            write!(f, "{}#{}", self.kind, self.id)
        }
    }
}

/// Hands out property join context ids for a single query.
#[derive(Debug)]
pub struct TableAllocator {
    next_fixed: u32,
    next_dynamic: u32,
}

impl Default for TableAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TableAllocator {
    /// Creates an allocator with both ranges empty.
    pub fn new() -> Self {
        Self {
            next_fixed: FIRST_PROPERTY_TABLE_ID,
            next_dynamic: DYNAMIC_TABLE_THRESHOLD,
        }
    }

    /// Allocates a property context addressed through `key`/`value` fields.
    pub fn fixed_properties(&mut self) -> Result<SqlTable> {
        if self.next_fixed >= DYNAMIC_TABLE_THRESHOLD {
            return Err(AqlError::illegal(format!(
                "query uses more than {} property field join contexts",
                DYNAMIC_TABLE_THRESHOLD - FIRST_PROPERTY_TABLE_ID
            )));
        }
        let table = SqlTable::properties(self.next_fixed);
        self.next_fixed += 1;
        Ok(table)
    }

    /// Allocates a property context for a named-property criterion.
    pub fn dynamic_properties(&mut self) -> Result<SqlTable> {
        if self.next_dynamic >= PENDING_TABLE_ID {
            return Err(AqlError::illegal("query uses too many property joins"));
        }
        let table = SqlTable::properties(self.next_dynamic);
        self.next_dynamic += 1;
        Ok(table)
    }
}

/// Closes a `$join` scope: picks one table for every pending property
/// criterion in `elements` and binds them all to it.
///
/// Nested `$join` groups were closed before their parent, so their criteria
/// are no longer pending and keep their own context.
pub fn bind_join_scope(elements: &mut [QueryElement], alloc: &mut TableAllocator) -> Result<()> {
    let mut scan = PendingScan::default();
    for element in elements.iter() {
        scan.visit(element);
    }
    if scan.pending == 0 {
        return Ok(());
    }
    let table = if scan.uses_property_fields {
        alloc.fixed_properties()?
    } else {
        alloc.dynamic_properties()?
    };
    for element in elements.iter_mut() {
        bind_pending(element, table);
    }
    Ok(())
}

#[derive(Default)]
struct PendingScan {
    pending: usize,
    uses_property_fields: bool,
}

impl PendingScan {
    fn visit(&mut self, element: &QueryElement) {
        match element {
            QueryElement::Criteria(criteria) => {
                if criteria.table.is_pending() {
                    self.pending += 1;
                    if criteria.variable.is_field() {
                        self.uses_property_fields = true;
                    }
                }
            }
            QueryElement::Group(LogicalGroup { children, .. }) => {
                for child in children {
                    self.visit(child);
                }
            }
        }
    }
}

fn bind_pending(element: &mut QueryElement, table: SqlTable) {
    match element {
        QueryElement::Criteria(criteria) => {
            if criteria.table.is_pending() {
                criteria.table = table;
            }
        }
        QueryElement::Group(group) => {
            for child in &mut group.children {
                bind_pending(child, table);
            }
        }
    }
}
