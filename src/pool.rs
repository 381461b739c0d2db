//! Connection pool management.
//!
//! The pool owns every connection it creates and lends them out one
//! borrower at a time. It grows on demand and never blocks waiting for a
//! free connection. Each connection is stamped with the pool generation
//! that created it; a process fork (or an explicit [`Pool::reset`]) bumps
//! the generation, so connections from a previous lineage are recognized
//! on return and closed instead of being shared across the fork boundary.

use crate::config::ConnectParams;
use crate::conn::{Connector, RawConnection};
use crate::error::DbResult;
use crate::shell::Shell;
use crate::transaction::TransactionShell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identifies one lineage of pool state. Bumped on every reset; stale
/// connections are detected by comparing their stamp against the pool's
/// current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw connection plus pool bookkeeping.
pub struct PooledConnection<C: RawConnection> {
    raw: C,
    /// Log label, e.g. "conn_1f0a...".
    id: String,
    generation: Generation,
    last_used: Instant,
    max_idle: Duration,
}

impl<C: RawConnection> PooledConnection<C> {
    fn new(raw: C, generation: Generation, max_idle: Duration) -> Self {
        Self {
            raw,
            id: format!("conn_{}", uuid::Uuid::new_v4().simple()),
            generation,
            last_used: Instant::now(),
            max_idle,
        }
    }

    /// Log label for this connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The pool generation this connection belongs to.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// How long since this connection last ran a statement.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Refresh the last-use timestamp.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Ping with transparent reconnect if the connection has sat idle
    /// longer than its idle window. Recently used connections are not
    /// pinged.
    pub fn keepalive(&mut self) -> DbResult<()> {
        if self.idle_for() > self.max_idle {
            debug!(conn = %self.id, idle_secs = self.idle_for().as_secs(), "pinging idle connection");
            self.raw.ping(true)?;
        }
        Ok(())
    }

    /// Access the underlying session.
    pub fn raw(&self) -> &C {
        &self.raw
    }

    /// Mutably access the underlying session.
    pub fn raw_mut(&mut self) -> &mut C {
        &mut self.raw
    }

    fn close(mut self) {
        self.raw.close();
    }

    #[cfg(test)]
    pub(crate) fn set_last_used(&mut self, at: Instant) {
        self.last_used = at;
    }
}

impl<C: RawConnection> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("idle_for", &self.idle_for())
            .finish_non_exhaustive()
    }
}

struct PoolState<C: RawConnection> {
    /// Idle connections, reused LIFO so the warmest one goes out first.
    available: Vec<PooledConnection<C>>,
    generation: Generation,
}

struct PoolInner<N: Connector> {
    params: ConnectParams,
    connector: N,
    /// Guards `available` and the generation check/reset region.
    state: Mutex<PoolState<N::Conn>>,
    /// Connections currently known to the pool (idle + checked out).
    created: AtomicUsize,
    /// Process that owns the current generation.
    owner_pid: AtomicU32,
}

/// Connection pool handle. Cheap to clone; all clones share one pool.
pub struct Pool<N: Connector> {
    inner: Arc<PoolInner<N>>,
}

impl<N: Connector> Clone for Pool<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Connector> Pool<N> {
    /// Create a pool that opens connections through `connector` using
    /// `params`. No connection is opened until first use.
    pub fn new(params: ConnectParams, connector: N) -> Self {
        info!(addr = %params.addr(), database = %params.database, "creating connection pool");
        Self {
            inner: Arc::new(PoolInner {
                params,
                connector,
                state: Mutex::new(PoolState {
                    available: Vec::new(),
                    generation: Generation(0),
                }),
                created: AtomicUsize::new(0),
                owner_pid: AtomicU32::new(std::process::id()),
            }),
        }
    }

    /// Create a non-transactional shell. The shell borrows a connection
    /// lazily on its first statement and returns it when dropped.
    pub fn shell(&self) -> Shell<N> {
        Shell::new(self.clone())
    }

    /// Create a transactional shell. Acquires a connection eagerly, so
    /// open failures surface here rather than on the first statement.
    pub fn transaction(&self) -> DbResult<TransactionShell<N>> {
        TransactionShell::new(self.clone())
    }

    /// Check out a connection: the most recently returned idle one, or a
    /// freshly opened one if none is idle. Never blocks on capacity; the
    /// pool grows on demand.
    pub fn get(&self) -> DbResult<PooledConnection<N::Conn>> {
        self.check_owner();

        let reused = self.lock_state().available.pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.make_connection()?,
        };

        debug!(
            conn = %conn.id,
            created = self.created_count(),
            "connection checked out"
        );
        Ok(conn)
    }

    /// Open a brand-new connection stamped with the current generation.
    /// Stamp and count move together under the state lock, so a
    /// concurrent reset cannot observe one without the other.
    fn make_connection(&self) -> DbResult<PooledConnection<N::Conn>> {
        let raw = self.inner.connector.connect(&self.inner.params)?;
        let generation = {
            let state = self.lock_state();
            self.inner.created.fetch_add(1, Ordering::SeqCst);
            state.generation
        };
        let conn = PooledConnection::new(raw, generation, self.inner.params.max_idle());

        debug!(
            conn = %conn.id,
            generation = %generation,
            created = self.created_count(),
            "connection opened"
        );
        Ok(conn)
    }

    /// Return a checked-out connection.
    ///
    /// A connection from a stale generation is closed and dropped
    /// silently; the reset that bumped the generation already excluded it
    /// from the created count. `can_reuse == false` closes the connection
    /// and shrinks the pool by one. Otherwise the connection goes back on
    /// the idle stack.
    pub fn release(&self, conn: PooledConnection<N::Conn>, can_reuse: bool) {
        self.check_owner();

        let mut state = self.lock_state();
        if conn.generation != state.generation {
            drop(state);
            debug!(conn = %conn.id, generation = %conn.generation, "dropping stale-generation connection");
            conn.close();
            return;
        }

        if can_reuse {
            debug!(
                conn = %conn.id,
                idle = state.available.len() + 1,
                created = self.created_count(),
                "connection returned to pool"
            );
            state.available.push(conn);
        } else {
            drop(state);
            self.inner.created.fetch_sub(1, Ordering::SeqCst);
            debug!(
                conn = %conn.id,
                created = self.created_count(),
                "discarding connection after non-reusable error"
            );
            conn.close();
        }
    }

    /// Detect a process-identity change (fork) and reset if one happened.
    ///
    /// The generation stamp on each connection is the actual correctness
    /// mechanism; this probe only decides when to bump it. Double-checked
    /// under the state lock so exactly one thread performs the reset.
    fn check_owner(&self) {
        let pid = std::process::id();
        if self.inner.owner_pid.load(Ordering::SeqCst) == pid {
            return;
        }

        let mut state = self.lock_state();
        if self.inner.owner_pid.load(Ordering::SeqCst) == pid {
            // another thread already did the work while we waited on the lock
            return;
        }
        warn!(pid = pid, "process identity changed, resetting pool");
        self.reset_locked(&mut state);
        self.inner.owner_pid.store(pid, Ordering::SeqCst);
    }

    /// Discard the current connection set and start a new generation.
    ///
    /// Closes every idle connection, zeroes the created count, and bumps
    /// the generation so connections still checked out are recognized as
    /// stale when they come back. Call this when the embedding runtime
    /// signals a fork or restart.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        self.reset_locked(&mut state);
        self.inner.owner_pid.store(std::process::id(), Ordering::SeqCst);
    }

    fn reset_locked(&self, state: &mut PoolState<N::Conn>) {
        let idle = state.available.len();
        for conn in state.available.drain(..) {
            conn.close();
        }
        self.inner.created.store(0, Ordering::SeqCst);
        state.generation = state.generation.next();
        info!(
            closed = idle,
            generation = %state.generation,
            "pool reset"
        );
    }

    /// Close every idle connection. Checked-out connections are untouched
    /// and still counted; use this at shutdown once shells have finished.
    pub fn disconnect(&self) {
        let mut state = self.lock_state();
        let closed = state.available.len();
        self.inner.created.fetch_sub(closed, Ordering::SeqCst);
        for conn in state.available.drain(..) {
            conn.close();
        }
        drop(state);
        info!(closed = closed, created = self.created_count(), "pool disconnected");
    }

    /// Connections currently known to the pool (idle + checked out).
    pub fn created_count(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.lock_state().available.len()
    }

    /// The pool's current generation.
    pub fn generation(&self) -> Generation {
        self.lock_state().generation
    }

    /// Connection parameters this pool opens with.
    pub fn params(&self) -> &ConnectParams {
        &self.inner.params
    }

    // A poisoned lock means another thread panicked mid-operation; the
    // pool state itself is still structurally sound, so keep going.
    fn lock_state(&self) -> MutexGuard<'_, PoolState<N::Conn>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<N: Connector> std::fmt::Debug for Pool<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("addr", &self.inner.params.addr())
            .field("database", &self.inner.params.database)
            .field("created", &self.created_count())
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}
