use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query pipeline profiling metrics.
///
/// Profiling is enabled via the `AQL_PROFILE` environment variable and tracks
/// time spent in each pipeline stage plus the number of rows fetched from
/// backend cursors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent parsing query text.
    pub parse_ns: u64,
    /// Number of parse calls.
    pub parse_count: u64,
    /// Total nanoseconds spent in optimizer strategies.
    pub optimize_ns: u64,
    /// Number of optimizer runs.
    pub optimize_count: u64,
    /// Total nanoseconds spent compiling SQL.
    pub compile_ns: u64,
    /// Number of compilations.
    pub compile_count: u64,
    /// Total nanoseconds spent opening cursors and fetching rows.
    pub execute_ns: u64,
    /// Number of statement executions.
    pub execute_count: u64,
    /// Rows read from backend cursors, before permission filtering.
    pub rows_fetched: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    parse_ns: AtomicU64,
    parse_count: AtomicU64,
    optimize_ns: AtomicU64,
    optimize_count: AtomicU64,
    compile_ns: AtomicU64,
    compile_count: AtomicU64,
    execute_ns: AtomicU64,
    execute_count: AtomicU64,
    rows_fetched: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("AQL_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    Parse,
    Optimize,
    Compile,
    Execute,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Parse => (&counters.parse_ns, &counters.parse_count),
        QueryProfileKind::Optimize => (&counters.optimize_ns, &counters.optimize_count),
        QueryProfileKind::Compile => (&counters.compile_ns, &counters.compile_count),
        QueryProfileKind::Execute => (&counters.execute_ns, &counters.execute_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_rows_fetched(rows: u64) {
    if let Some(counters) = counters() {
        counters.rows_fetched.fetch_add(rows, Ordering::Relaxed);
    }
}

/// Retrieves a snapshot of current pipeline profiling metrics.
///
/// Returns `None` when `AQL_PROFILE` is not set. With `reset`, counters are
/// swapped back to zero as they are read.
///
/// ```no_run
/// use aql::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("compiled {} queries in {}ns", snapshot.compile_count, snapshot.compile_ns);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        parse_ns: load(&counters.parse_ns),
        parse_count: load(&counters.parse_count),
        optimize_ns: load(&counters.optimize_ns),
        optimize_count: load(&counters.optimize_count),
        compile_ns: load(&counters.compile_ns),
        compile_count: load(&counters.compile_count),
        execute_ns: load(&counters.execute_ns),
        execute_count: load(&counters.execute_count),
        rows_fetched: load(&counters.rows_fetched),
    })
}
