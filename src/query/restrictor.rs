//! Capability gate run between optimization and compilation.
//!
//! Restrictions only inspect the AST; a query that passes is compiled exactly
//! as it came in.

use crate::error::{AqlError, Result};
use crate::query::ast::Query;
use crate::query::tables::{TableKind, DYNAMIC_TABLE_THRESHOLD};

/// Features a caller's edition may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Filtering on raw property keys and values through `key`/`value`.
    pub allow_property_value_filter: bool,
    /// Non-empty `sort(...)`.
    pub allow_sorting: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::unrestricted()
    }
}

impl Capabilities {
    /// Every feature enabled.
    pub const fn unrestricted() -> Self {
        Self {
            allow_property_value_filter: true,
            allow_sorting: true,
        }
    }

    /// Feature set of the restricted edition.
    pub const fn restricted_edition() -> Self {
        Self {
            allow_property_value_filter: false,
            allow_sorting: false,
        }
    }

    /// Picks the feature set for an edition flag.
    pub const fn for_edition(restricted: bool) -> Self {
        if restricted {
            Self::restricted_edition()
        } else {
            Self::unrestricted()
        }
    }
}

/// One independent check over a query.
pub trait Restriction: Send + Sync {
    /// Capability name reported on failure.
    fn capability(&self) -> &'static str;

    /// Fails with [`AqlError::Capability`] when `query` needs a missing feature.
    fn check(&self, query: &Query, capabilities: &Capabilities) -> Result<()>;
}

/// Rejects criteria on property contexts below the dynamic range.
pub struct PropertyValueFilter;

impl Restriction for PropertyValueFilter {
    fn capability(&self) -> &'static str {
        "property_value_filter"
    }

    fn check(&self, query: &Query, capabilities: &Capabilities) -> Result<()> {
        if capabilities.allow_property_value_filter {
            return Ok(());
        }
        let offending = query.criteria().into_iter().find(|c| {
            c.table.kind == TableKind::Properties && c.table.id < DYNAMIC_TABLE_THRESHOLD
        });
        match offending {
            Some(criteria) => Err(AqlError::capability(
                self.capability(),
                format!(
                    "filtering on property {} is not available in this edition",
                    criteria.variable
                ),
            )),
            None => Ok(()),
        }
    }
}

/// Rejects a non-empty sort specification.
pub struct Sorting;

impl Restriction for Sorting {
    fn capability(&self) -> &'static str {
        "sorting"
    }

    fn check(&self, query: &Query, capabilities: &Capabilities) -> Result<()> {
        if capabilities.allow_sorting || !query.is_sorted() {
            return Ok(());
        }
        Err(AqlError::capability(
            self.capability(),
            "sorting results is not available in this edition",
        ))
    }
}

/// Ordered list of restrictions; the first failure wins.
pub struct Restrictor {
    restrictions: Vec<Box<dyn Restriction>>,
}

impl Default for Restrictor {
    fn default() -> Self {
        Self {
            restrictions: vec![Box::new(PropertyValueFilter), Box::new(Sorting)],
        }
    }
}

impl Restrictor {
    /// Runs every restriction against `query`.
    pub fn restrict(&self, query: &Query, capabilities: &Capabilities) -> Result<()> {
        self.restrictions
            .iter()
            .try_for_each(|restriction| restriction.check(query, capabilities))
    }
}

/// Runs the default restrictions.
pub fn restrict(query: &Query, capabilities: &Capabilities) -> Result<()> {
    Restrictor::default().restrict(query, capabilities)
}
