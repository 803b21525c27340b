use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::driver::SqlConnection;
use crate::error::DbError;
use crate::source::SqlSource;

/// Pool sizing and reaping knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum open connections per source, checked-out ones included.
    pub max_size: usize,
    /// Connections idle in the pool longer than this are closed.
    pub idle_time: Duration,
    /// How often the monitor thread wakes to look for idle connections.
    pub monitor_sleep: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_size: 10,
            idle_time: Duration::from_secs(30),
            monitor_sleep: Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct PoolState {
    sources: HashMap<String, SqlSource>,
    free: HashMap<String, VecDeque<SqlConnection>>,
    /// Checked-out connections per source.
    counts: HashMap<String, usize>,
    /// Opens in flight, reserved against `max_size`.
    opening: HashMap<String, usize>,
}

impl PoolState {
    fn total_open(&self, id: &str) -> usize {
        self.counts.get(id).copied().unwrap_or(0)
            + self.free.get(id).map_or(0, VecDeque::len)
            + self.opening.get(id).copied().unwrap_or(0)
    }

    fn stats(&self, id: &str) -> String {
        format!(
            "[source: {}, total open: {}, in pool: {}]",
            id,
            self.total_open(id),
            self.free.get(id).map_or(0, VecDeque::len)
        )
    }
}

struct PoolInner {
    cfg: PoolConfig,
    state: Mutex<PoolState>,
    cond: Condvar,
    /// Serializes raw opens, for client libraries that are not reentrant.
    open_mux: Mutex<()>,
    stop: Mutex<bool>,
    stop_cond: Condvar,
}

/// Bounded reservoir of connections with timed checkout and idle reaping.
///
/// A background monitor thread closes connections that sat unused past the
/// idle interval; it is stopped and joined when the pool is dropped.
pub struct SqlPool {
    inner: Arc<PoolInner>,
    monitor: Option<JoinHandle<()>>,
}

impl SqlPool {
    pub fn new(cfg: PoolConfig) -> SqlPool {
        let inner = Arc::new(PoolInner {
            cfg,
            state: Mutex::new(PoolState::default()),
            cond: Condvar::new(),
            open_mux: Mutex::new(()),
            stop: Mutex::new(false),
            stop_cond: Condvar::new(),
        });
        let monitor_inner = Arc::clone(&inner);
        let monitor = std::thread::Builder::new()
            .name("sqlweave-pool-monitor".to_string())
            .spawn(move || monitor_loop(monitor_inner))
            .ok();
        if monitor.is_none() {
            log::error!(target: "engine.pool", "failed to start pool monitor thread");
        }
        SqlPool { inner, monitor }
    }

    pub fn add_source(&self, source: SqlSource) {
        let mut state = lock_state(&self.inner);
        let id = source.id.clone();
        state.free.entry(id.clone()).or_default();
        state.counts.entry(id.clone()).or_insert(0);
        state.sources.insert(id, source);
    }

    /// Check out a connection, waiting up to `timeout`. `Ok(None)` means
    /// the wait timed out.
    pub fn get(&self, id: &str, timeout: Duration) -> Result<Option<PooledConnection>, DbError> {
        let deadline = Instant::now() + timeout;
        let mut state = lock_state(&self.inner);
        let source = state
            .sources
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::UnknownSource(id.to_string()))?;
        loop {
            if let Some(conn) = state.free.get_mut(id).and_then(VecDeque::pop_front) {
                *state.counts.entry(id.to_string()).or_insert(0) += 1;
                log::info!(target: "engine.pool", "got connection {}", state.stats(id));
                return Ok(Some(self.wrap(conn)));
            }
            if state.total_open(id) < self.inner.cfg.max_size {
                *state.opening.entry(id.to_string()).or_insert(0) += 1;
                drop(state);
                let opened = {
                    let _serialize = self.inner.open_mux.lock();
                    SqlConnection::open(source.clone())
                };
                state = lock_state(&self.inner);
                *state.opening.entry(id.to_string()).or_insert(1) -= 1;
                match opened {
                    Ok(conn) => {
                        *state.counts.entry(id.to_string()).or_insert(0) += 1;
                        log::info!(
                            target: "engine.pool",
                            "opened new connection {}",
                            state.stats(id)
                        );
                        return Ok(Some(self.wrap(conn)));
                    }
                    Err(e) => {
                        // A slot freed up for any waiter.
                        self.inner.cond.notify_one();
                        return Err(e);
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                log::info!(target: "engine.pool", "checkout timed out {}", state.stats(id));
                return Ok(None);
            }
            log::debug!(
                target: "engine.pool",
                "waiting for connection {}",
                state.stats(id)
            );
            let (guard, _timed_out) = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    /// Return a checked-out connection explicitly. Bad or force-closed
    /// connections are destroyed instead of pooled.
    pub fn put(&self, guard: PooledConnection, force_close: bool) {
        let mut guard = guard;
        if let Some(conn) = guard.conn.take() {
            put_back(&self.inner, conn, force_close);
        }
    }

    /// Connections currently idle in the pool for a source.
    pub fn idle_count(&self, id: &str) -> usize {
        let state = lock_state(&self.inner);
        state.free.get(id).map_or(0, VecDeque::len)
    }

    fn wrap(&self, conn: SqlConnection) -> PooledConnection {
        PooledConnection {
            inner: Arc::clone(&self.inner),
            id: conn.source().id.clone(),
            conn: Some(conn),
        }
    }
}

impl Drop for SqlPool {
    fn drop(&mut self) {
        {
            let mut stop = self
                .inner
                .stop
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *stop = true;
            self.inner.stop_cond.notify_all();
        }
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
        let mut state = lock_state(&self.inner);
        for (id, free) in state.free.iter_mut() {
            if !free.is_empty() {
                log::info!(target: "engine.pool", "closing all [source: {}]", id);
            }
            free.clear();
        }
    }
}

fn lock_state(inner: &PoolInner) -> std::sync::MutexGuard<'_, PoolState> {
    inner.state.lock().unwrap_or_else(|e| e.into_inner())
}

fn put_back(inner: &PoolInner, mut conn: SqlConnection, force_close: bool) {
    let id = conn.source().id.clone();
    let close_now = force_close || conn.is_bad();
    if !close_now {
        conn.clear();
    }
    let close_now = close_now || conn.is_bad();
    let mut state = lock_state(inner);
    if let Some(count) = state.counts.get_mut(&id) {
        *count = count.saturating_sub(1);
    }
    if close_now {
        log::info!(target: "engine.pool", "closed connection {}", state.stats(&id));
        drop(state);
        drop(conn);
    } else {
        conn.free_since = Some(Instant::now());
        state.free.entry(id.clone()).or_default().push_back(conn);
        log::info!(target: "engine.pool", "put connection {}", state.stats(&id));
        drop(state);
    }
    inner.cond.notify_one();
}

fn monitor_loop(inner: Arc<PoolInner>) {
    log::info!(target: "engine.pool", "monitor thread started");
    loop {
        {
            let stop = inner.stop.lock().unwrap_or_else(|e| e.into_inner());
            let (stop, _) = inner
                .stop_cond
                .wait_timeout(stop, inner.cfg.monitor_sleep)
                .unwrap_or_else(|e| e.into_inner());
            if *stop {
                break;
            }
        }
        reap_idle(&inner);
    }
    log::info!(target: "engine.pool", "monitor thread stopped");
}

fn reap_idle(inner: &PoolInner) {
    let mut expired = Vec::new();
    {
        let mut state = lock_state(inner);
        let idle_time = inner.cfg.idle_time;
        let ids: Vec<String> = state.free.keys().cloned().collect();
        for id in ids {
            let mut reaped = 0;
            if let Some(free) = state.free.get_mut(&id) {
                while let Some(front) = free.front() {
                    let idle = front
                        .free_since
                        .map(|t| t.elapsed() >= idle_time)
                        .unwrap_or(false);
                    if !idle {
                        break;
                    }
                    if let Some(conn) = free.pop_front() {
                        expired.push(conn);
                        reaped += 1;
                    }
                }
            }
            if reaped > 0 {
                log::info!(
                    target: "engine.pool",
                    "closed {} idle connection(s) {}",
                    reaped,
                    state.stats(&id)
                );
            }
        }
    }
    // Actual closes happen outside the pool lock.
    drop(expired);
}

/// Scoped checkout: the connection returns to the pool when the guard is
/// dropped, on every exit path.
pub struct PooledConnection {
    inner: Arc<PoolInner>,
    id: String,
    conn: Option<SqlConnection>,
}

impl PooledConnection {
    /// Atomically replace the underlying connection with a freshly opened
    /// one for the same source; count accounting is untouched since the
    /// slot stays checked out.
    pub fn reconnect(&mut self) -> Result<(), DbError> {
        let source = {
            let state = lock_state(&self.inner);
            state
                .sources
                .get(&self.id)
                .cloned()
                .ok_or_else(|| DbError::UnknownSource(self.id.clone()))?
        };
        let fresh = {
            let _serialize = self.inner.open_mux.lock();
            SqlConnection::open(source)?
        };
        log::info!(target: "engine.pool", "reconnected [source: {}]", self.id);
        self.conn = Some(fresh);
        Ok(())
    }
}

impl Deref for PooledConnection {
    type Target = SqlConnection;

    fn deref(&self) -> &SqlConnection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut SqlConnection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            put_back(&self.inner, conn, false);
        }
    }
}
