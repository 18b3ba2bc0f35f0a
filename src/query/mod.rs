#![forbid(unsafe_code)]

//! Query pipeline.
//!
//! Text is tokenized and parsed into a [`Query`], rewritten by the
//! [`Optimizer`], checked against edition [`Capabilities`], compiled into a
//! [`CompiledSqlQuery`] and finally run by the [`AqlExecutor`].

/// Query tree: domains, criteria, logical groups and sort details.
pub mod ast;

/// Lowering of query trees into parameterized SQL.
pub mod compiler;

/// Per-database SQL syntax differences.
pub mod dialect;

/// Eager and lazy execution against a connection provider.
pub mod executor;

/// Logical field catalog and variable resolution.
pub mod fields;

/// Tokenizer for query text.
pub mod lexer;

/// Equivalence-preserving query rewrites.
pub mod optimizer;

/// Recursive-descent parser producing [`ast::Query`].
pub mod parser;

/// Pipeline timing counters.
///
/// Enabled with the `AQL_PROFILE` environment variable.
pub mod profile;

/// Edition capability checks.
pub mod restrictor;

/// Result rows and row factories.
pub mod result;

/// SQL table identities and allocation.
pub mod tables;

/// Literal and cell values.
pub mod value;

pub use ast::{Comparator, Criteria, Domain, LogicalGroup, LogicalOp, Query, QueryElement};
pub use compiler::{CompiledSqlQuery, CompilerOptions, SqlCompiler};
pub use dialect::Dialect;
pub use executor::{AqlExecutor, LazyResultStream};
pub use fields::{Field, ItemType, Variable};
pub use optimizer::{OptimizationStrategy, Optimizer};
pub use parser::parse;
pub use restrictor::{Capabilities, Restrictor};
pub use result::{Artifact, ArtifactFactory, ResultRow, RowFactory};
pub use tables::{SqlTable, TableKind};
pub use value::Value;
