//! Public composition root.
//!
//! # Responsibility
//! - Collect attributes and entity registrations, then build the runtime
//!   (connection source, registry, schema sync, transaction scope) on `init`.
//! - Expose every query operation wrapped in its own unit of work.
//!
//! # Invariants
//! - Lifecycle is `Created -> Initialized -> Closed`; operations require
//!   `Initialized`, registration requires `Created`.
//! - Argument validation happens before a connection is acquired.
//! - `close` never fails and is a no-op outside `Initialized`.

use super::error::{RepoError, RepoResult};
use super::scope::{TransHooks, TransactionScope, TxStats};
use super::session::{id_value, require_sql, Session};
use crate::config::RepoConfig;
use crate::db::{sync_schema, ConnectionSource, SchemaSync, SqlitePool};
use crate::model::entity::{Entity, EntityMeta, EntityRegistry};
use crate::model::page::{Page, PageRequest};
use crate::model::record::Record;
use crate::query::binder::SqlParam;
use crate::query::criteria::{Criteria, Window};
use crate::query::materialize::FromRecord;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DIALECT: &str = "SQLite";

struct Runtime {
    config: RepoConfig,
    source: Arc<dyn ConnectionSource>,
    scope: TransactionScope,
}

enum RepoState {
    Created,
    Initialized(Runtime),
    Closed,
}

/// Single entry point for transactional entity and SQL access.
pub struct Repo {
    attrs: BTreeMap<String, String>,
    entities: Vec<EntityMeta>,
    injected: Option<Arc<dyn ConnectionSource>>,
    state: RepoState,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            RepoState::Created => "Created",
            RepoState::Initialized(_) => "Initialized",
            RepoState::Closed => "Closed",
        };
        f.debug_struct("Repo")
            .field("attrs", &self.attrs)
            .field("entities", &self.entities)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl Repo {
    pub fn new(attrs: BTreeMap<String, String>) -> Self {
        Self {
            attrs,
            entities: Vec::new(),
            injected: None,
            state: RepoState::Created,
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let mut repo = Self::new(BTreeMap::new());
        repo.set_attr("url", url.into());
        repo
    }

    pub fn with_pool(url: impl Into<String>, min_idle: u32, max_active: u32) -> Self {
        let mut repo = Self::with_url(url);
        repo.set_attr("minIdle", min_idle)
            .set_attr("maxActive", max_active);
        repo
    }

    /// Private in-memory database.
    pub fn in_memory() -> Self {
        Self::with_url(crate::config::DEFAULT_URL)
    }

    /// Uses `source` instead of building a pool from the attributes.
    pub fn with_source(source: Arc<dyn ConnectionSource>) -> Self {
        let mut repo = Self::new(BTreeMap::new());
        repo.set_attr("url", source.url());
        repo.injected = Some(source);
        repo
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.attrs.insert(key.into(), value.to_string());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    /// Adds `E` to the managed entities. Only valid before `init`.
    pub fn register<E: Entity>(&mut self) -> RepoResult<&mut Self> {
        if !matches!(self.state, RepoState::Created) {
            return Err(RepoError::Config(
                "entities can only be registered before init()".to_string(),
            ));
        }
        let meta = EntityMeta::of::<E>()?;
        if self
            .entities
            .iter()
            .any(|known| known.type_id == meta.type_id || known.type_name == meta.type_name)
        {
            return Err(RepoError::Config(format!(
                "entity `{}` is already registered",
                meta.type_name
            )));
        }
        self.entities.push(meta);
        Ok(self)
    }

    /// Builds the connection source, registry and transaction scope.
    ///
    /// # Errors
    /// - `Config` when called twice, after `close`, or with invalid attributes.
    /// - `Resource`/`Db` when the pool cannot open or schema sync fails.
    pub fn init(&mut self) -> RepoResult<&mut Self> {
        match self.state {
            RepoState::Created => {}
            RepoState::Initialized(_) => {
                return Err(RepoError::Config("repo is already initialized".to_string()));
            }
            RepoState::Closed => {
                return Err(RepoError::Config("repo is closed".to_string()));
            }
        }

        let config = RepoConfig::from_attrs(&self.attrs)?;
        let source: Arc<dyn ConnectionSource> = match &self.injected {
            Some(source) => source.clone(),
            None => Arc::new(SqlitePool::open(
                &config.url,
                config.connection.clone(),
                config.pool,
            )?),
        };

        let mut registry = EntityRegistry::default();
        for meta in &self.entities {
            registry.insert(meta.clone())?;
        }

        if config.schema_sync != SchemaSync::None {
            if let Err(err) = run_schema_sync(source.as_ref(), config.schema_sync, &registry) {
                if let Err(close_err) = source.close() {
                    warn!("event=repo_init module=repo status=error error={close_err}");
                }
                return Err(err);
            }
        }

        let scope = TransactionScope::new(source.clone(), Arc::new(registry), config.begin_mode);
        info!(
            "event=repo_init module=repo status=ok dialect={DIALECT} entities={} schema_sync={:?}",
            self.entities.len(),
            config.schema_sync
        );
        self.state = RepoState::Initialized(Runtime {
            config,
            source,
            scope,
        });
        Ok(self)
    }

    /// Releases the scope, then the connection source. Errors are logged.
    pub fn close(&mut self) {
        let runtime = match std::mem::replace(&mut self.state, RepoState::Closed) {
            RepoState::Initialized(runtime) => runtime,
            other => {
                self.state = other;
                return;
            }
        };

        let Runtime { scope, source, .. } = runtime;
        drop(scope);
        match source.close() {
            Ok(()) => info!("event=repo_close module=repo status=ok"),
            Err(err) => warn!("event=repo_close module=repo status=error error={err}"),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, RepoState::Initialized(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, RepoState::Closed)
    }

    fn runtime(&self) -> RepoResult<&Runtime> {
        match &self.state {
            RepoState::Initialized(runtime) => Ok(runtime),
            RepoState::Created => Err(RepoError::Config(
                "repo is not initialized; call init() first".to_string(),
            )),
            RepoState::Closed => Err(RepoError::Config("repo is closed".to_string())),
        }
    }

    /// Runs `work` as one unit of work, reusing an enclosing one on this thread.
    pub fn trans<T, W>(&self, work: W) -> RepoResult<T>
    where
        W: FnOnce(&Session<'_>) -> RepoResult<T>,
    {
        self.runtime()?.scope.run(work)
    }

    /// `trans` with success/failure hooks; a handled failure yields `Ok(None)`.
    pub fn trans_with<T, W>(&self, work: W, hooks: TransHooks<'_, T>) -> RepoResult<Option<T>>
    where
        W: FnOnce(&Session<'_>) -> RepoResult<T>,
    {
        self.runtime()?.scope.run_with(work, hooks)
    }

    pub fn save_or_update<E: Entity>(&self, entity: E) -> RepoResult<E> {
        self.trans(|s| s.save_or_update(entity))
    }

    pub fn find_by_id<E: Entity>(&self, id: impl Into<SqlParam>) -> RepoResult<Option<E>> {
        let id = id_value(id.into())?;
        self.trans(|s| s.find_by_id::<E>(id))
    }

    pub fn find<E: Entity>(&self, criteria: &Criteria) -> RepoResult<Option<E>> {
        self.trans(|s| s.find::<E>(criteria))
    }

    pub fn find_list<E: Entity>(
        &self,
        criteria: &Criteria,
        start: Option<u64>,
        limit: Option<u64>,
    ) -> RepoResult<Vec<E>> {
        Window::new(start, limit)?;
        self.trans(|s| s.find_list::<E>(criteria, start, limit))
    }

    pub fn find_all<E: Entity>(&self) -> RepoResult<Vec<E>> {
        self.trans(|s| s.find_all::<E>())
    }

    pub fn find_page<E: Entity>(
        &self,
        page: u64,
        page_size: u64,
        criteria: &Criteria,
    ) -> RepoResult<Page<E>> {
        PageRequest::new(page, page_size)?;
        self.trans(|s| s.find_page::<E>(page, page_size, criteria))
    }

    pub fn count<E: Entity>(&self, criteria: &Criteria) -> RepoResult<u64> {
        self.trans(|s| s.count::<E>(criteria))
    }

    pub fn delete<E: Entity>(&self, entity: &E) -> RepoResult<bool> {
        self.trans(|s| s.delete(entity))
    }

    pub fn delete_by_id<E: Entity>(&self, id: impl Into<SqlParam>) -> RepoResult<bool> {
        let id = id_value(id.into())?;
        self.trans(|s| s.delete_by_id::<E>(id))
    }

    pub fn execute(&self, sql: &str, params: &[SqlParam]) -> RepoResult<usize> {
        require_sql(sql)?;
        self.trans(|s| s.execute(sql, params))
    }

    pub fn first_row(&self, sql: &str, params: &[SqlParam]) -> RepoResult<Option<Record>> {
        self.first_row_as(sql, params)
    }

    pub fn first_row_as<R: FromRecord>(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> RepoResult<Option<R>> {
        require_sql(sql)?;
        self.trans(|s| s.first_row_as(sql, params))
    }

    pub fn rows(&self, sql: &str, params: &[SqlParam]) -> RepoResult<Vec<Record>> {
        self.rows_as(sql, params)
    }

    pub fn rows_as<R: FromRecord>(&self, sql: &str, params: &[SqlParam]) -> RepoResult<Vec<R>> {
        require_sql(sql)?;
        self.trans(|s| s.rows_as(sql, params))
    }

    pub fn entity_first_row<R: FromRecord>(
        &self,
        query: &str,
        params: &[SqlParam],
    ) -> RepoResult<Option<R>> {
        require_sql(query)?;
        self.trans(|s| s.entity_first_row(query, params))
    }

    pub fn entity_rows<R: FromRecord>(&self, query: &str, params: &[SqlParam]) -> RepoResult<Vec<R>> {
        require_sql(query)?;
        self.trans(|s| s.entity_rows(query, params))
    }

    pub fn sql_page(
        &self,
        sql: &str,
        page: u64,
        page_size: u64,
        params: &[SqlParam],
    ) -> RepoResult<Page<Record>> {
        self.sql_page_as(sql, page, page_size, params)
    }

    pub fn sql_page_as<R: FromRecord>(
        &self,
        sql: &str,
        page: u64,
        page_size: u64,
        params: &[SqlParam],
    ) -> RepoResult<Page<R>> {
        PageRequest::new(page, page_size)?;
        require_sql(sql)?;
        self.trans(|s| s.sql_page_as(sql, page, page_size, params))
    }

    /// Registered table name of `E`, without quote characters.
    pub fn tb_name<E: Entity>(&self) -> RepoResult<String> {
        let meta = self.runtime()?.scope.registry().meta::<E>()?;
        Ok(meta.table.replace(['"', '`', '[', ']'], ""))
    }

    pub fn db_name(&self) -> RepoResult<String> {
        self.trans(|s| s.db_name())
    }

    pub fn dialect(&self) -> RepoResult<&'static str> {
        self.runtime()?;
        Ok(DIALECT)
    }

    pub fn db_version(&self) -> RepoResult<String> {
        self.trans(|s| s.db_version())
    }

    /// Url of the connection source.
    pub fn url(&self) -> RepoResult<&str> {
        Ok(self.runtime()?.source.url())
    }

    /// Resolved configuration in effect since `init`.
    pub fn config(&self) -> RepoResult<&RepoConfig> {
        Ok(&self.runtime()?.config)
    }

    pub fn tx_stats(&self) -> RepoResult<TxStats> {
        Ok(self.runtime()?.scope.stats())
    }

    /// Whether the current thread is inside a unit of work of this repo.
    pub fn in_transaction(&self) -> bool {
        self.runtime()
            .map(|runtime| runtime.scope.is_active())
            .unwrap_or(false)
    }
}

impl Drop for Repo {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_schema_sync(
    source: &dyn ConnectionSource,
    mode: SchemaSync,
    registry: &EntityRegistry,
) -> RepoResult<()> {
    let mut conn = source.acquire()?;
    let synced = sync_schema(&mut conn, mode, registry.entries());
    source.release(conn);
    synced.map_err(RepoError::from)
}
