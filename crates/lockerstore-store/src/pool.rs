//! Connection pool
//!
//! A thin layer over `r2d2`: connections come from an
//! [`SqliteConnectionManager`] and are configured on open. Checkout honours
//! the caller's context as well as the acquire timeout.

use crate::db::{self, ConnectOptions, Configure};
use crate::errors::Result;
use lockerstore_core::{Context, StoreError, StoreErrorKind};
use r2d2_sqlite::SqliteConnectionManager;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// A checked-out connection; returns itself to the pool on drop
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

type Inner = r2d2::Pool<SqliteConnectionManager>;

/// Longest single wait before the context is looked at again
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub max_open: usize,
}

pub struct Pool {
    options: ConnectOptions,
    inner: RwLock<Inner>,
    acquire_timeout: Duration,
}

fn pool_error(err: r2d2::Error) -> StoreError {
    StoreError::new(StoreErrorKind::Driver)
        .with_op("pool.acquire")
        .with_message(err.to_string())
}

/// Build an r2d2 pool that keeps at least one connection open
///
/// An in-memory database lives only as long as one of its connections, so
/// idle connections are never reaped.
fn build(options: &ConnectOptions, max_open: usize, acquire_timeout: Duration) -> Result<Inner> {
    let max_size = u32::try_from(max_open.max(1)).unwrap_or(u32::MAX);
    Inner::builder()
        .max_size(max_size)
        .min_idle(Some(1))
        .idle_timeout(None)
        .max_lifetime(None)
        .connection_timeout(acquire_timeout.max(Duration::from_millis(1)))
        .connection_customizer(Box::new(Configure(options.clone())))
        .build(db::manager(options))
        .map_err(pool_error)
}

impl Pool {
    /// Build a pool and open its first connection
    ///
    /// A bad path fails here, before the pool starts waiting on it.
    pub fn new(
        options: ConnectOptions,
        max_open: usize,
        acquire_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let first = db::open(&options)?;
        let inner = build(&options, max_open, acquire_timeout)?;
        drop(first);
        Ok(Arc::new(Self {
            options,
            inner: RwLock::new(inner),
            acquire_timeout,
        }))
    }

    fn handle(&self) -> Inner {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check out a connection
    ///
    /// # Errors
    ///
    /// Cancelled or DeadlineExceeded when the context ends first; Driver
    /// when the acquire timeout passes.
    pub fn get(&self, ctx: &Context) -> Result<PooledConnection> {
        let pool = self.handle();
        let started = Instant::now();
        loop {
            ctx.check()?;

            let left = self.acquire_timeout.saturating_sub(started.elapsed());
            let mut slice = WAIT_SLICE.min(left);
            if let Some(remaining) = ctx.remaining() {
                slice = slice.min(remaining);
            }
            match pool.get_timeout(slice.max(Duration::from_millis(1))) {
                Ok(conn) => return Ok(conn),
                Err(err) if started.elapsed() >= self.acquire_timeout => {
                    ctx.check()?;
                    return Err(pool_error(err).with_message(format!(
                        "timed out after {}ms waiting for a connection ({} open)",
                        started.elapsed().as_millis(),
                        pool.state().connections
                    )));
                }
                Err(_) => {}
            }
        }
    }

    /// Rebuild the pool with a new cap
    ///
    /// Connections already checked out finish on the old pool and close
    /// when returned.
    pub fn set_max_open(&self, max_open: usize) -> Result<()> {
        let rebuilt = build(&self.options, max_open, self.acquire_timeout)?;
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = rebuilt;
        tracing::debug!(max_open = max_open.max(1), "pool resized");
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let pool = self.handle();
        let state = pool.state();
        PoolStats {
            open: state.connections as usize,
            idle: state.idle_connections as usize,
            max_open: pool.max_size() as usize,
        }
    }
}
