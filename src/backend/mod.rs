//! Collaborator interfaces consumed by the executor.
//!
//! The engine never owns connections or authorization state. It talks to a
//! [`ConnectionProvider`] to run compiled statements, reads rows through a
//! [`RowCursor`], and asks a [`PermissionProvider`] which rows a caller may
//! see.

use std::collections::HashSet;

use crate::error::Result;
use crate::query::dialect::Dialect;
use crate::query::fields::Field;
use crate::query::result::ResultRow;
use crate::query::value::Value;

pub mod sqlite;

/// Isolation requested for one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    /// Plain read-committed execution.
    ReadCommitted,
    /// Explicit consistent-read snapshot for the lifetime of the cursor.
    ConsistentRead,
}

/// Forward-only cursor over raw result values.
///
/// `close` must release the underlying statement and connection. Callers
/// close each cursor exactly once.
pub trait RowCursor: Send {
    /// Next row, or `None` once the result set is exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>>;

    /// Releases the cursor and its connection.
    fn close(&mut self) -> Result<()>;
}

/// Source of connections for compiled statements.
pub trait ConnectionProvider: Send + Sync {
    /// Dialect the backend speaks.
    fn dialect(&self) -> Dialect;

    /// Whether the backend offers read-committed isolation.
    fn supports_read_committed(&self) -> bool {
        self.dialect().supports_read_committed()
    }

    /// Whether the calling thread is inside an active transaction.
    fn in_transaction(&self) -> bool {
        false
    }

    /// Runs `sql` with positional `params` and returns an open cursor.
    fn execute_select(
        &self,
        sql: &str,
        params: &[Value],
        isolation: IsolationMode,
    ) -> Result<Box<dyn RowCursor>>;
}

/// Caller-side authorization, consulted after SQL execution.
pub trait PermissionProvider: Send + Sync {
    /// Whether the caller runs the restricted edition.
    fn is_restricted_edition(&self) -> bool;

    /// Whether the caller may see `row`.
    fn can_see_row(&self, row: &ResultRow) -> bool;
}

/// Fixed permission set: an edition flag plus an optional repository allow-list.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    restricted_edition: bool,
    readable_repos: Option<HashSet<String>>,
}

impl StaticPermissions {
    /// Full edition, every row visible.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Restricted edition, every row visible.
    pub fn restricted_edition() -> Self {
        Self {
            restricted_edition: true,
            readable_repos: None,
        }
    }

    /// Picks the edition from a flag.
    pub fn for_edition(restricted: bool) -> Self {
        Self {
            restricted_edition: restricted,
            readable_repos: None,
        }
    }

    /// Limits visibility to rows of the given repositories.
    pub fn with_readable_repos<I, S>(mut self, repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.readable_repos = Some(repos.into_iter().map(Into::into).collect());
        self
    }
}

impl PermissionProvider for StaticPermissions {
    fn is_restricted_edition(&self) -> bool {
        self.restricted_edition
    }

    fn can_see_row(&self, row: &ResultRow) -> bool {
        let Some(repos) = &self.readable_repos else {
            return true;
        };
        row.get(Field::Repo)
            .and_then(Value::as_str)
            .is_some_and(|repo| repos.contains(repo))
    }
}
