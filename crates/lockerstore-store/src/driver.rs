//! Statement execution against a pooled or transaction-bound connection
//!
//! Every round-trip goes through [`Driver::with_conn`], which checks the
//! context and pins a connection. Cancelling the context interrupts the
//! statement in flight, and so does passing its deadline.

use crate::errors::{from_rusqlite, from_rusqlite_in, internal, Result};
use crate::pool::{Pool, PoolStats, PooledConnection};
use lockerstore_core::{Context, StoreError, StoreErrorKind};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// VM instructions between deadline checks
const PROGRESS_OPS: i32 = 1000;

/// Receives every statement when debug logging is on
pub type DebugLog = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

pub(crate) struct TxConn {
    slot: Mutex<TxSlot>,
}

struct TxSlot {
    conn: Option<PooledConnection>,
    state: TxState,
}

impl TxConn {
    pub(crate) fn state(&self) -> TxState {
        self.slot
            .lock()
            .map(|s| s.state)
            .unwrap_or(TxState::RolledBack)
    }

    /// End the transaction; the connection goes back to the pool either way
    fn finish(&self, commit: bool) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| internal("transaction mutex poisoned"))?;
        let conn = slot.conn.take().ok_or_else(StoreError::not_in_transaction)?;
        let result = if commit {
            conn.execute_batch("COMMIT").map_err(from_rusqlite)
        } else {
            conn.execute_batch("ROLLBACK").map_err(from_rusqlite)
        };
        if result.is_err() && commit && !conn.is_autocommit() {
            // A failed COMMIT leaves the transaction open
            let _ = conn.execute_batch("ROLLBACK");
        }
        slot.state = if commit && result.is_ok() {
            TxState::Committed
        } else {
            TxState::RolledBack
        };
        result
    }
}

#[derive(Clone)]
enum Backend {
    Pool(Arc<Pool>),
    Tx(Arc<TxConn>),
}

#[derive(Clone)]
pub struct Driver {
    backend: Backend,
    log: Option<DebugLog>,
}

impl Driver {
    pub(crate) fn new(pool: Arc<Pool>) -> Self {
        Self {
            backend: Backend::Pool(pool),
            log: None,
        }
    }

    pub(crate) fn with_log(&self, log: DebugLog) -> Self {
        Self {
            backend: self.backend.clone(),
            log: Some(log),
        }
    }

    pub(crate) fn is_tx(&self) -> bool {
        matches!(self.backend, Backend::Tx(_))
    }

    pub(crate) fn pool(&self) -> Option<&Arc<Pool>> {
        match &self.backend {
            Backend::Pool(pool) => Some(pool),
            Backend::Tx(_) => None,
        }
    }

    pub(crate) fn pool_stats(&self) -> Option<PoolStats> {
        self.pool().map(|p| p.stats())
    }

    /// Run `f` with a connection pinned for its duration
    pub(crate) fn with_conn<T>(
        &self,
        ctx: &Context,
        f: impl FnOnce(&Conn<'_>) -> Result<T>,
    ) -> Result<T> {
        ctx.check()?;
        match &self.backend {
            Backend::Pool(pool) => {
                let conn = pool.get(ctx)?;
                self.run(ctx, &conn, f)
            }
            Backend::Tx(tx) => {
                let slot = tx
                    .slot
                    .lock()
                    .map_err(|_| internal("transaction mutex poisoned"))?;
                let conn = slot.conn.as_ref().ok_or_else(StoreError::not_in_transaction)?;
                self.run(ctx, conn, f)
            }
        }
    }

    fn run<T>(
        &self,
        ctx: &Context,
        conn: &Connection,
        f: impl FnOnce(&Conn<'_>) -> Result<T>,
    ) -> Result<T> {
        let interrupt = conn.get_interrupt_handle();
        let _cancel = ctx.on_cancel(move || interrupt.interrupt());
        let _deadline = ctx.deadline().map(|at| DeadlineGuard::arm(conn, at));
        f(&Conn {
            conn,
            ctx,
            log: self.log.as_ref(),
        })
    }

    /// Pin a connection and open a transaction on it
    pub(crate) fn begin(&self, ctx: &Context) -> Result<Driver> {
        let pool = match &self.backend {
            Backend::Pool(pool) => pool,
            Backend::Tx(_) => {
                return Err(StoreError::new(StoreErrorKind::TxStarted)
                    .with_op("begin")
                    .with_message("cannot start a transaction within a transaction"))
            }
        };
        ctx.check()?;
        let conn = pool.get(ctx)?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| from_rusqlite_in(ctx, e))?;
        Ok(Driver {
            backend: Backend::Tx(Arc::new(TxConn {
                slot: Mutex::new(TxSlot {
                    conn: Some(conn),
                    state: TxState::Open,
                }),
            })),
            log: self.log.clone(),
        })
    }

    pub(crate) fn tx_state(&self) -> Option<TxState> {
        match &self.backend {
            Backend::Tx(tx) => Some(tx.state()),
            Backend::Pool(_) => None,
        }
    }

    pub(crate) fn commit(&self) -> Result<()> {
        self.finish(true)
    }

    pub(crate) fn rollback(&self) -> Result<()> {
        self.finish(false)
    }

    fn finish(&self, commit: bool) -> Result<()> {
        match &self.backend {
            Backend::Tx(tx) => {
                if let Some(log) = &self.log {
                    log(if commit { "COMMIT" } else { "ROLLBACK" });
                }
                tx.finish(commit)
            }
            Backend::Pool(_) => Err(StoreError::not_in_transaction()),
        }
    }
}

/// Aborts the running statement once the deadline passes; disarmed on drop
struct DeadlineGuard<'c> {
    conn: &'c Connection,
}

impl<'c> DeadlineGuard<'c> {
    fn arm(conn: &'c Connection, deadline: Instant) -> Self {
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        Self { conn }
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// A connection borrowed for one [`Driver::with_conn`] call
pub(crate) struct Conn<'a> {
    conn: &'a Connection,
    ctx: &'a Context,
    log: Option<&'a DebugLog>,
}

impl Conn<'_> {
    pub(crate) fn raw(&self) -> &Connection {
        self.conn
    }

    fn before(&self, sql: &str, args: &[Value]) -> Result<()> {
        self.ctx.check()?;
        tracing::debug!(sql = sql, args = args.len(), "statement");
        if let Some(log) = self.log {
            log(&format!("{} args={:?}", sql, args));
        }
        Ok(())
    }

    /// Run a SELECT and collect every row
    pub(crate) fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Vec<Value>>> {
        self.before(sql, args)?;
        let map_err = |e| from_rusqlite_in(self.ctx, e);
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_err)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(args.iter())).map_err(map_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut record = Vec::with_capacity(width);
            for i in 0..width {
                record.push(row.get::<_, Value>(i).map_err(map_err)?);
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Run a statement and return the affected row count
    pub(crate) fn execute(&self, sql: &str, args: &[Value]) -> Result<usize> {
        self.before(sql, args)?;
        let map_err = |e| from_rusqlite_in(self.ctx, e);
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_err)?;
        stmt.execute(params_from_iter(args.iter())).map_err(map_err)
    }

    pub(crate) fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Run `f` atomically
    ///
    /// Outside a transaction this opens one with `BEGIN IMMEDIATE`; inside one
    /// it uses a savepoint, so a failure undoes only `f`'s statements.
    pub(crate) fn atomic<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let outer = self.conn.is_autocommit();
        let (open, commit, abort) = if outer {
            ("BEGIN IMMEDIATE", "COMMIT", &["ROLLBACK"][..])
        } else {
            (
                "SAVEPOINT lockerstore",
                "RELEASE lockerstore",
                &["ROLLBACK TO lockerstore", "RELEASE lockerstore"][..],
            )
        };

        self.ctx.check()?;
        self.conn
            .execute_batch(open)
            .map_err(|e| from_rusqlite_in(self.ctx, e))?;

        let result = f(self).and_then(|value| {
            self.conn
                .execute_batch(commit)
                .map_err(|e| from_rusqlite_in(self.ctx, e))
                .map(|_| value)
        });

        if result.is_err() {
            // An interrupted write may already have rolled the whole
            // transaction back, in which case these fail harmlessly
            for stmt in abort {
                let _ = self.conn.execute_batch(stmt);
            }
            if outer && !self.conn.is_autocommit() {
                let _ = self.conn.execute_batch("ROLLBACK");
            }
        }
        result
    }
}
