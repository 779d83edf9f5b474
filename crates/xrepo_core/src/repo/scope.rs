//! Propagation-aware transaction boundary.
//!
//! # Responsibility
//! - Open exactly one physical transaction per outermost call chain.
//! - Let nested entries on the same thread reuse the open transaction.
//! - Commit on success, roll back on failure and always hand the connection
//!   back to its source.
//!
//! # Invariants
//! - The ambient marker is thread-local and keyed by scope id; two scopes, or
//!   two threads, never share a transaction.
//! - The marker is cleared and the connection released on every exit path,
//!   including panics inside the unit of work and failing COMMIT/ROLLBACK.
//! - Nested entries never begin, commit or roll back and ignore hooks.

use super::error::{RepoError, RepoResult};
use super::session::Session;
use crate::db::{ConnectionSource, PooledConnection};
use crate::model::entity::EntityRegistry;
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static AMBIENT: RefCell<HashMap<u64, Rc<PooledConnection>>> = RefCell::new(HashMap::new());
}

/// SQLite `BEGIN` flavor used for new transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeginMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl BeginMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deferred" | "" => Some(Self::Deferred),
            "immediate" => Some(Self::Immediate),
            "exclusive" => Some(Self::Exclusive),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED;",
            Self::Immediate => "BEGIN IMMEDIATE;",
            Self::Exclusive => "BEGIN EXCLUSIVE;",
        }
    }
}

/// Physical transaction counters of one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

/// Optional callbacks around an outermost transaction.
///
/// `on_success` runs after COMMIT. `on_failure` runs after ROLLBACK and
/// suppresses the error.
pub struct TransHooks<'h, T> {
    on_success: Option<Box<dyn FnOnce(&T) + 'h>>,
    on_failure: Option<Box<dyn FnOnce(&RepoError) + 'h>>,
}

impl<'h, T> TransHooks<'h, T> {
    pub fn new() -> Self {
        Self {
            on_success: None,
            on_failure: None,
        }
    }

    pub fn on_success(mut self, hook: impl FnOnce(&T) + 'h) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn on_failure(mut self, hook: impl FnOnce(&RepoError) + 'h) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }
}

impl<T> Default for TransHooks<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TransactionScope {
    id: u64,
    source: Arc<dyn ConnectionSource>,
    registry: Arc<EntityRegistry>,
    begin: BeginMode,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TransactionScope {
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        registry: Arc<EntityRegistry>,
        begin: BeginMode,
    ) -> Self {
        Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            source,
            registry,
            begin,
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn source(&self) -> &Arc<dyn ConnectionSource> {
        &self.source
    }

    /// Whether the current thread is inside a transaction of this scope.
    pub fn is_active(&self) -> bool {
        self.ambient().is_some()
    }

    pub fn stats(&self) -> TxStats {
        TxStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
        }
    }

    /// Runs `work` in the ambient transaction, or in a new one.
    pub fn run<T, W>(&self, work: W) -> RepoResult<T>
    where
        W: FnOnce(&Session<'_>) -> RepoResult<T>,
    {
        if let Some(conn) = self.ambient() {
            return work(&Session::new(conn, &self.registry));
        }

        let (tx, conn) = ActiveTx::begin(self)?;
        let outcome = {
            let session = Session::new(conn, &self.registry);
            work(&session)
        };
        match outcome {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                warn!(
                    "event=transaction module=repo status=rolled_back scope={} error={err}",
                    self.id
                );
                Err(err)
            }
        }
    }

    /// Like `run`, with hooks. A handled failure yields `Ok(None)`.
    pub fn run_with<T, W>(&self, work: W, hooks: TransHooks<'_, T>) -> RepoResult<Option<T>>
    where
        W: FnOnce(&Session<'_>) -> RepoResult<T>,
    {
        if self.is_active() {
            return self.run(work).map(Some);
        }

        match self.run(work) {
            Ok(value) => {
                if let Some(hook) = hooks.on_success {
                    hook(&value);
                }
                Ok(Some(value))
            }
            Err(err) => match hooks.on_failure {
                Some(hook) => {
                    hook(&err);
                    Ok(None)
                }
                None => Err(err),
            },
        }
    }

    fn ambient(&self) -> Option<Rc<PooledConnection>> {
        AMBIENT
            .try_with(|ambient| ambient.borrow().get(&self.id).cloned())
            .ok()
            .flatten()
    }
}

/// Open outermost transaction. Dropping it without `commit` rolls back.
struct ActiveTx<'s> {
    scope: &'s TransactionScope,
    conn: Option<Rc<PooledConnection>>,
}

impl<'s> ActiveTx<'s> {
    /// BEGINs on a fresh connection and publishes it as this thread's ambient
    /// connection for `scope`.
    fn begin(scope: &'s TransactionScope) -> RepoResult<(Self, Rc<PooledConnection>)> {
        let conn = scope.source.acquire()?;
        if let Err(err) = conn.execute_batch(scope.begin.sql()) {
            scope.source.release(conn);
            return Err(err.into());
        }
        scope.begun.fetch_add(1, Ordering::Relaxed);
        debug!(
            "event=tx_begin module=repo status=ok scope={} mode={:?}",
            scope.id, scope.begin
        );

        let conn = Rc::new(conn);
        AMBIENT.with(|ambient| {
            ambient.borrow_mut().insert(scope.id, conn.clone());
        });
        let tx = Self {
            scope,
            conn: Some(conn.clone()),
        };
        Ok((tx, conn))
    }

    /// COMMIT; a failing COMMIT rolls back and returns the error.
    fn commit(mut self) -> RepoResult<()> {
        let committed = self
            .conn
            .as_ref()
            .map_or(Ok(()), |conn| conn.execute_batch("COMMIT;"));
        match committed {
            Ok(()) => {
                self.scope.committed.fetch_add(1, Ordering::Relaxed);
                debug!("event=tx_commit module=repo status=ok scope={}", self.scope.id);
                self.finish();
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=tx_commit module=repo status=error scope={} error={err}",
                    self.scope.id
                );
                self.rollback_open();
                self.finish();
                Err(err.into())
            }
        }
    }

    fn rollback(mut self) {
        self.rollback_open();
        self.finish();
    }

    fn rollback_open(&self) {
        let Some(conn) = &self.conn else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK;") {
                warn!(
                    "event=tx_rollback module=repo status=error scope={} error={err}",
                    self.scope.id
                );
            }
        }
        self.scope.rolled_back.fetch_add(1, Ordering::Relaxed);
        debug!("event=tx_rollback module=repo status=ok scope={}", self.scope.id);
    }

    /// Clears the marker and returns the connection to its source.
    fn finish(&mut self) {
        let scope_id = self.scope.id;
        let _ = AMBIENT.try_with(|ambient| {
            if let Ok(mut ambient) = ambient.try_borrow_mut() {
                ambient.remove(&scope_id);
            }
        });

        if let Some(conn) = self.conn.take() {
            match Rc::try_unwrap(conn) {
                Ok(conn) => self.scope.source.release(conn),
                Err(_) => warn!(
                    "event=tx_finish module=repo status=error scope={scope_id} error=connection_still_shared"
                ),
            }
        }
    }
}

impl Drop for ActiveTx<'_> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.rollback_open();
            self.finish();
        }
    }
}
