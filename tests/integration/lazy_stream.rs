//! Lazy streams release their cursor exactly once on every exit path.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use aql::backend::{ConnectionProvider, IsolationMode, RowCursor, StaticPermissions};
use aql::query::{AqlExecutor, CompilerOptions, Dialect, SqlCompiler, Value};
use aql::{AqlConfig, AqlError, AqlService, Result};

#[derive(Default)]
struct Ledger {
    opened: AtomicUsize,
    closed: AtomicUsize,
    isolation: Mutex<Vec<IsolationMode>>,
}

struct CountingProvider {
    dialect: Dialect,
    in_transaction: bool,
    rows: usize,
    fail_at: Option<usize>,
    ledger: Arc<Ledger>,
}

impl CountingProvider {
    fn new(rows: usize) -> (Arc<Ledger>, Self) {
        let ledger = Arc::new(Ledger::default());
        let provider = Self {
            dialect: Dialect::Sqlite,
            in_transaction: false,
            rows,
            fail_at: None,
            ledger: Arc::clone(&ledger),
        };
        (ledger, provider)
    }
}

struct CountingCursor {
    next: usize,
    rows: usize,
    fail_at: Option<usize>,
    ledger: Arc<Ledger>,
}

impl RowCursor for CountingCursor {
    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if Some(self.next) == self.fail_at {
            return Err(AqlError::execution("connection reset"));
        }
        if self.next == self.rows {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(vec![
            Value::from("repo"),
            Value::from("."),
            Value::String(format!("item-{}", self.next)),
        ]))
    }

    fn close(&mut self) -> Result<()> {
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ConnectionProvider for CountingProvider {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn execute_select(
        &self,
        _sql: &str,
        _params: &[Value],
        isolation: IsolationMode,
    ) -> Result<Box<dyn RowCursor>> {
        self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        self.ledger.isolation.lock().push(isolation);
        Ok(Box::new(CountingCursor {
            next: 0,
            rows: self.rows,
            fail_at: self.fail_at,
            ledger: Arc::clone(&self.ledger),
        }))
    }
}

const IDENTITY_ONLY: &str = r#"items.find().include("name")"#;

fn lazy(provider: CountingProvider) -> aql::query::LazyResultStream {
    AqlService::new(Arc::new(provider), AqlConfig::default())
        .execute_lazy(IDENTITY_ONLY, Arc::new(StaticPermissions::allow_all()))
        .expect("stream")
}

#[test]
fn early_close_releases_once() {
    let (ledger, provider) = CountingProvider::new(10);
    let mut stream = lazy(provider);
    assert!(stream.next().expect("row").is_ok());
    stream.close().expect("close");
    stream.close().expect("second close is a no-op");
    assert!(stream.next().is_none());
    drop(stream);
    assert_eq!(ledger.opened.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_an_unconsumed_stream_releases_once() {
    let (ledger, provider) = CountingProvider::new(3);
    drop(lazy(provider));
    assert_eq!(ledger.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn exhaustion_releases_once() {
    let (ledger, provider) = CountingProvider::new(3);
    let mut stream = lazy(provider);
    assert_eq!(stream.by_ref().count(), 3);
    assert!(stream.is_closed());
    drop(stream);
    assert_eq!(ledger.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn mid_stream_error_closes_before_it_is_seen() {
    let (ledger, mut provider) = CountingProvider::new(5);
    provider.fail_at = Some(2);
    let mut stream = lazy(provider);
    assert!(stream.next().expect("first").is_ok());
    assert!(stream.next().expect("second").is_ok());
    let err = stream.next().expect("third").expect_err("failure");
    assert_eq!(err.code(), "ExecutionError");
    assert_eq!(ledger.closed.load(Ordering::SeqCst), 1);
    assert!(stream.next().is_none());
    drop(stream);
    assert_eq!(ledger.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn cancellation_closes_once() {
    let (ledger, provider) = CountingProvider::new(5);
    let token = Arc::new(AtomicBool::new(false));
    let mut stream = lazy(provider).with_cancel_token(Arc::clone(&token));
    assert!(stream.next().expect("row").is_ok());
    token.store(true, Ordering::SeqCst);
    assert!(matches!(stream.next(), Some(Err(AqlError::Cancelled))));
    assert!(stream.next().is_none());
    drop(stream);
    assert_eq!(ledger.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn isolation_follows_backend_and_transaction_state() {
    let compiled_for = |dialect| {
        SqlCompiler::new(CompilerOptions {
            dialect,
            default_limit: None,
        })
        .compile(&aql::query::parse(IDENTITY_ONLY).expect("parse"))
        .expect("compile")
    };
    let cases = [
        (Dialect::Sqlite, false, false, IsolationMode::ConsistentRead),
        (Dialect::Sqlite, true, false, IsolationMode::ReadCommitted),
        (Dialect::Sqlite, false, true, IsolationMode::ReadCommitted),
        (Dialect::Postgres, false, false, IsolationMode::ReadCommitted),
    ];
    for (dialect, in_transaction, forced, expected) in cases {
        let (ledger, mut provider) = CountingProvider::new(0);
        provider.dialect = dialect;
        provider.in_transaction = in_transaction;
        let executor = AqlExecutor::new(Arc::new(provider)).with_forced_read_committed(forced);
        assert_eq!(executor.isolation_mode(), expected);
        executor.execute_eager(&compiled_for(dialect)).expect("rows");
        assert_eq!(*ledger.isolation.lock(), vec![expected]);
        assert_eq!(ledger.closed.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn sqlite_connections_return_to_the_pool() {
    let fixture = common::catalog();
    let service = AqlService::new(fixture.provider.clone(), AqlConfig::default());
    let permissions = Arc::new(StaticPermissions::allow_all());

    let mut stream = service
        .execute_lazy("items.find()", permissions.clone())
        .expect("stream");
    assert!(stream.next().expect("row").is_ok());
    assert_eq!(fixture.provider.checked_out(), 1);
    stream.close().expect("close");
    assert_eq!(fixture.provider.checked_out(), 0);

    let stream = service
        .execute_lazy("items.find()", permissions)
        .expect("stream");
    assert_eq!(fixture.provider.checked_out(), 1);
    drop(stream);
    assert_eq!(fixture.provider.checked_out(), 0);
}
