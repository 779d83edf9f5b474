//! Pooled connection source.
//!
//! # Responsibility
//! - Define the `ConnectionSource` seam the transaction scope depends on.
//! - Provide `SqlitePool`, an `r2d2` pool of `rusqlite` connections.
//!
//! # Invariants
//! - Leased plus idle connections never exceed the effective `max_active`.
//! - Connections returned while still inside a transaction are rolled back
//!   before reuse.
//! - In-memory targets pool exactly one connection. Callers queue on acquire
//!   instead of racing for shared-cache table locks.
//! - In-memory targets keep one anchor connection open until `close()` so the
//!   shared database outlives recycled pool connections.

use super::open::{connection_manager, open_connection, ConnectionSettings, DbTarget};
use super::{DbError, DbResult};
use log::{debug, info, warn};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Connection leased from a pool; returns to it on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const MIN_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1);

/// Supplier of pooled connections.
///
/// Implementations own connection lifecycle, health and sizing. The core only
/// acquires one connection per outermost transaction and releases it on every
/// exit path.
pub trait ConnectionSource: Send + Sync {
    fn acquire(&self) -> DbResult<PooledConnection>;

    /// Hands `conn` back, rolling back a transaction left open on it.
    fn release(&self, conn: PooledConnection) {
        if !conn.is_autocommit() {
            debug!("event=pool_release module=db status=rollback reason=open_transaction");
            if let Err(err) = conn.execute_batch("ROLLBACK;") {
                warn!("event=pool_release module=db status=error error={err}");
            }
        }
        drop(conn);
    }

    /// Url this source was configured with.
    fn url(&self) -> &str;
    /// Releases every pooled resource. Later `acquire` calls fail.
    fn close(&self) -> DbResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub min_idle: u32,
    pub max_active: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_active: 8,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolOptions {
    /// Options the pool actually runs with for `target`.
    fn effective_for(self, target: &DbTarget) -> Self {
        let max_active = if target.is_memory() {
            1
        } else {
            self.max_active.max(1)
        };
        Self {
            min_idle: self.min_idle.min(max_active),
            max_active,
            acquire_timeout: self.acquire_timeout.max(MIN_ACQUIRE_TIMEOUT),
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: u32,
    pub leased: u32,
    pub closed: bool,
}

struct OpenPool {
    pool: Pool<SqliteConnectionManager>,
    anchor: Option<Connection>,
}

pub struct SqlitePool {
    url: String,
    options: PoolOptions,
    state: Mutex<Option<OpenPool>>,
}

impl SqlitePool {
    /// Opens the pool and waits until `min_idle` connections are ready.
    ///
    /// In-memory urls run with `max_active = 1` whatever was requested.
    pub fn open(url: &str, settings: ConnectionSettings, options: PoolOptions) -> DbResult<Self> {
        let target = DbTarget::parse(url);
        let effective = options.effective_for(&target);
        if effective.max_active != options.max_active {
            info!(
                "event=pool_open module=db status=capped mode={} requested_max_active={} max_active={}",
                target.mode(),
                options.max_active,
                effective.max_active
            );
        }

        // Open and pragma failures surface as `Sqlite`, not as a build timeout.
        let first = open_connection(&target, &settings)?;
        let anchor = if target.is_memory() {
            Some(first)
        } else {
            drop(first);
            None
        };

        let started_at = Instant::now();
        let mut builder = Pool::<SqliteConnectionManager>::builder()
            .min_idle(Some(effective.min_idle))
            .max_size(effective.max_active)
            .connection_timeout(effective.acquire_timeout);
        if target.is_memory() {
            builder = builder.idle_timeout(None).max_lifetime(None);
        }
        let pool = builder
            .build(connection_manager(&target, &settings))
            .map_err(|err| {
                warn!(
                    "event=pool_open module=db status=error url={url} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                DbError::PoolTimeout {
                    waited_ms: started_at.elapsed().as_millis(),
                    max_active: effective.max_active,
                }
            })?;

        info!(
            "event=pool_open module=db status=ok url={url} min_idle={} max_active={}",
            effective.min_idle, effective.max_active
        );

        Ok(Self {
            url: url.to_string(),
            options: effective,
            state: Mutex::new(Some(OpenPool { pool, anchor })),
        })
    }

    /// Effective options, after the in-memory cap and bounds are applied.
    pub fn options(&self) -> PoolOptions {
        self.options
    }

    pub fn status(&self) -> PoolStatus {
        match self.lock().as_ref() {
            Some(open) => {
                let state = open.pool.state();
                PoolStatus {
                    idle: state.idle_connections,
                    leased: state.connections.saturating_sub(state.idle_connections),
                    closed: false,
                }
            }
            None => PoolStatus {
                idle: 0,
                leased: 0,
                closed: true,
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenPool>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionSource for SqlitePool {
    fn acquire(&self) -> DbResult<PooledConnection> {
        let pool = match self.lock().as_ref() {
            Some(open) => open.pool.clone(),
            None => return Err(DbError::PoolClosed),
        };

        let started_at = Instant::now();
        pool.get().map_err(|err| {
            let waited_ms = started_at.elapsed().as_millis();
            warn!(
                "event=pool_acquire module=db status=timeout waited_ms={waited_ms} max_active={} error={err}",
                self.options.max_active
            );
            DbError::PoolTimeout {
                waited_ms,
                max_active: self.options.max_active,
            }
        })
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn close(&self) -> DbResult<()> {
        let Some(open) = self.lock().take() else {
            return Ok(());
        };
        drop(open.pool);

        let closed = match open.anchor {
            Some(anchor) => anchor.close().map_err(|(_, err)| DbError::from(err)),
            None => Ok(()),
        };
        info!("event=pool_close module=db status=ok url={}", self.url);
        closed
    }
}
