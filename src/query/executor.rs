//! Runs compiled queries against a [`ConnectionProvider`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{ConnectionProvider, IsolationMode, PermissionProvider, RowCursor};
use crate::error::{AqlError, Result};
use crate::query::compiler::CompiledSqlQuery;
use crate::query::fields::Field;
use crate::query::profile::{
    profile_timer, record_profile_timer, record_rows_fetched, QueryProfileKind,
};
use crate::query::result::{ResultRow, RowFactory};

/// Executes compiled queries eagerly or as closeable streams.
pub struct AqlExecutor {
    provider: Arc<dyn ConnectionProvider>,
    force_read_committed: bool,
}

impl AqlExecutor {
    /// Creates an executor over `provider`.
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            force_read_committed: false,
        }
    }

    /// Always executes with [`IsolationMode::ReadCommitted`].
    pub fn with_forced_read_committed(mut self, force: bool) -> Self {
        self.force_read_committed = force;
        self
    }

    /// Isolation the next statement will request.
    pub fn isolation_mode(&self) -> IsolationMode {
        if self.provider.supports_read_committed()
            || self.force_read_committed
            || self.provider.in_transaction()
        {
            IsolationMode::ReadCommitted
        } else {
            IsolationMode::ConsistentRead
        }
    }

    fn open(&self, compiled: &CompiledSqlQuery) -> Result<Box<dyn RowCursor>> {
        let dialect = self.provider.dialect();
        if compiled.dialect != dialect {
            return Err(AqlError::execution(format!(
                "query was compiled for {} but the backend speaks {dialect}",
                compiled.dialect
            )));
        }
        let isolation = self.isolation_mode();
        debug!(?isolation, params = compiled.params.len(), "executing query");
        self.provider
            .execute_select(&compiled.sql, &compiled.params, isolation)
    }

    /// Runs `compiled` and buffers every row.
    ///
    /// The cursor is closed before returning, on success and on failure.
    pub fn execute_eager(&self, compiled: &CompiledSqlQuery) -> Result<Vec<ResultRow>> {
        let timer = profile_timer();
        let mut cursor = self.open(compiled)?;
        let columns: Arc<[Field]> = Arc::from(compiled.columns.as_slice());
        let drained = drain(cursor.as_mut(), &columns);
        let closed = cursor.close();
        record_profile_timer(QueryProfileKind::Execute, timer);
        let rows = match (drained, closed) {
            (Ok(rows), Ok(())) => rows,
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "failed to close cursor after read error");
                }
                return Err(err);
            }
            (Ok(_), Err(err)) => return Err(err),
        };
        record_rows_fetched(rows.len() as u64);
        debug!(rows = rows.len(), "eager execution finished");
        Ok(rows)
    }

    /// Runs `compiled` and converts every row with `factory`.
    pub fn execute_eager_as<F: RowFactory>(
        &self,
        compiled: &CompiledSqlQuery,
        factory: &F,
    ) -> Result<Vec<F::Output>> {
        self.execute_eager(compiled)?
            .iter()
            .map(|row| factory.create(row))
            .collect()
    }

    /// Runs `compiled` and returns a stream that owns the open cursor.
    ///
    /// Rows `permissions` rejects are skipped.
    pub fn execute_lazy(
        &self,
        compiled: &CompiledSqlQuery,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<LazyResultStream> {
        let timer = profile_timer();
        let cursor = self.open(compiled)?;
        record_profile_timer(QueryProfileKind::Execute, timer);
        Ok(LazyResultStream::new(
            cursor,
            Arc::from(compiled.columns.as_slice()),
            permissions,
        ))
    }
}

fn drain(cursor: &mut dyn RowCursor, columns: &Arc<[Field]>) -> Result<Vec<ResultRow>> {
    let mut rows = Vec::new();
    while let Some(values) = cursor.next_row()? {
        rows.push(ResultRow::new(Arc::clone(columns), values)?);
    }
    Ok(rows)
}

/// Forward-only stream of permitted rows over an open cursor.
///
/// The cursor is closed exactly once: by [`LazyResultStream::close`], on
/// exhaustion, before a read error is yielded, on cancellation, or when the
/// stream is dropped.
pub struct LazyResultStream {
    cursor: Option<Box<dyn RowCursor>>,
    columns: Arc<[Field]>,
    permissions: Arc<dyn PermissionProvider>,
    cancel_token: Option<Arc<AtomicBool>>,
    fetched: u64,
    hidden: u64,
}

impl LazyResultStream {
    fn new(
        cursor: Box<dyn RowCursor>,
        columns: Arc<[Field]>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Self {
        Self {
            cursor: Some(cursor),
            columns,
            permissions,
            cancel_token: None,
            fetched: 0,
            hidden: 0,
        }
    }

    /// Attaches a flag that cancels the stream when set.
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Projected fields, by column index.
    pub fn columns(&self) -> &[Field] {
        &self.columns
    }

    /// Whether the cursor has been released.
    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Rows skipped by the permission filter so far.
    pub fn hidden_rows(&self) -> u64 {
        self.hidden
    }

    /// Releases the cursor; later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut cursor) = self.cursor.take() else {
            return Ok(());
        };
        record_rows_fetched(self.fetched);
        debug!(fetched = self.fetched, hidden = self.hidden, "closing lazy result stream");
        cursor.close()
    }

    fn close_after_error(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close cursor after stream error");
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

impl Iterator for LazyResultStream {
    type Item = Result<ResultRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor.is_none() {
                return None;
            }
            if self.cancelled() {
                self.close_after_error();
                return Some(Err(AqlError::Cancelled));
            }
            let cursor = self.cursor.as_mut()?;
            match cursor.next_row() {
                Ok(Some(values)) => {
                    self.fetched += 1;
                    let row = match ResultRow::new(Arc::clone(&self.columns), values) {
                        Ok(row) => row,
                        Err(err) => {
                            self.close_after_error();
                            return Some(Err(err));
                        }
                    };
                    if self.permissions.can_see_row(&row) {
                        return Some(Ok(row));
                    }
                    self.hidden += 1;
                }
                Ok(None) => {
                    return match self.close() {
                        Ok(()) => None,
                        Err(err) => Some(Err(err)),
                    };
                }
                Err(err) => {
                    self.close_after_error();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl Drop for LazyResultStream {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close lazy result stream on drop");
        }
    }
}
