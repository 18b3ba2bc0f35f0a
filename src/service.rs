//! End-to-end pipeline: parse, optimize, restrict, compile, execute.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{ConnectionProvider, PermissionProvider};
use crate::config::AqlConfig;
use crate::error::Result;
use crate::query::compiler::{CompiledSqlQuery, SqlCompiler};
use crate::query::executor::{AqlExecutor, LazyResultStream};
use crate::query::optimizer::Optimizer;
use crate::query::parser::parse;
use crate::query::restrictor::{Capabilities, Restrictor};
use crate::query::result::{Artifact, ArtifactFactory, ResultRow, RowFactory};

/// Compiles `text` under `config` without touching a backend.
pub fn explain(text: &str, config: &AqlConfig) -> Result<CompiledSqlQuery> {
    Pipeline::new(config).prepare(text, &Capabilities::unrestricted())
}

struct Pipeline {
    optimizer: Optimizer,
    restrictor: Restrictor,
    compiler: SqlCompiler,
}

impl Pipeline {
    fn new(config: &AqlConfig) -> Self {
        Self {
            optimizer: if config.optimize {
                Optimizer::default()
            } else {
                Optimizer::disabled()
            },
            restrictor: Restrictor::default(),
            compiler: SqlCompiler::new(config.compiler_options()),
        }
    }

    fn prepare(&self, text: &str, capabilities: &Capabilities) -> Result<CompiledSqlQuery> {
        let query = parse(text)?;
        let query = self.optimizer.optimize(query);
        self.restrictor.restrict(&query, capabilities)?;
        self.compiler.compile(&query)
    }
}

/// Query façade over one backend.
pub struct AqlService {
    config: AqlConfig,
    pipeline: Pipeline,
    executor: AqlExecutor,
}

impl AqlService {
    /// Creates a service; SQL is always compiled for the provider's dialect.
    pub fn new(provider: Arc<dyn ConnectionProvider>, mut config: AqlConfig) -> Self {
        let dialect = provider.dialect();
        if config.dialect != dialect {
            debug!(configured = %config.dialect, backend = %dialect, "using backend dialect");
            config.dialect = dialect;
        }
        let executor =
            AqlExecutor::new(provider).with_forced_read_committed(config.force_read_committed);
        Self {
            pipeline: Pipeline::new(&config),
            config,
            executor,
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &AqlConfig {
        &self.config
    }

    /// Parses, optimizes, restricts and compiles `text`.
    pub fn prepare(&self, text: &str, capabilities: &Capabilities) -> Result<CompiledSqlQuery> {
        self.pipeline.prepare(text, capabilities)
    }

    /// Compiles `text` with every capability enabled.
    pub fn explain(&self, text: &str) -> Result<CompiledSqlQuery> {
        self.prepare(text, &Capabilities::unrestricted())
    }

    /// Runs `text` and buffers the full result.
    pub fn execute_eager(
        &self,
        text: &str,
        permissions: &dyn PermissionProvider,
    ) -> Result<Vec<ResultRow>> {
        let capabilities = Capabilities::for_edition(permissions.is_restricted_edition());
        let compiled = self.prepare(text, &capabilities)?;
        let rows = self.executor.execute_eager(&compiled)?;
        info!(rows = rows.len(), "query executed");
        Ok(rows)
    }

    /// Runs `text` and returns a stream the caller must drain or close.
    pub fn execute_lazy(
        &self,
        text: &str,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<LazyResultStream> {
        let capabilities = Capabilities::for_edition(permissions.is_restricted_edition());
        let compiled = self.prepare(text, &capabilities)?;
        self.executor.execute_lazy(&compiled, permissions)
    }

    /// Runs `text` and converts every visible row into an [`Artifact`].
    pub fn find_artifacts(
        &self,
        text: &str,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<Vec<Artifact>> {
        let factory = ArtifactFactory;
        let mut stream = self.execute_lazy(text, permissions)?;
        let artifacts = stream
            .by_ref()
            .map(|row| row.and_then(|row| factory.create(&row)))
            .collect::<Result<Vec<_>>>();
        stream.close()?;
        artifacts
    }
}
