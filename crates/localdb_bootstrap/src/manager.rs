//! The bootstrap manager.
//!
//! ## Phases
//!
//! ```text
//! Idle → LoadingDependencies → LoadingWasm → CompilingWasm → Initializing → Ready
//!              │                    │              │               │
//!              └────────────────────┴──────────────┴───────────────┴──→ Error
//! ```
//!
//! A bootstrap runs as one spawned Tokio task. The task is wrapped in a
//! shared future kept in a single slot, so every concurrent caller of
//! [`BootstrapManager::initialize`] awaits the same attempt and receives the
//! same outcome. The task is never cancelled: dropping every caller's future
//! leaves it running to completion.
//!
//! ## Locking
//!
//! `core` guards the state, the handle and the task slot. It is never held
//! while observers run. `dispatch` is a re-entrant lock taken around every
//! state change and its delivery, so each observer sees changes in the order
//! they happened, and a callback may call back into the manager.
//! The order is always `dispatch` then `core`.

use crate::compile::{compile_image, CompiledModule, WasmCompiler, WasmtimeCompiler};
use crate::config::BootstrapConfig;
use crate::download::fetch_image;
use crate::engine::{EngineOptions, Extension};
use crate::environment::select_adapter;
use crate::error::{BootstrapError, BootstrapResult};
use crate::facade::LazyDatabase;
use crate::handle::DatabaseHandle;
use crate::migrate::{MigrationReport, SchemaMigrator};
use crate::modules::{resolve_dependencies, Dependencies, ModuleResolver, StaticResolver};
use crate::observer::{ObserverList, StateObserver, SubscriptionId};
use crate::progress::ProgressEvent;
use crate::schema::Schema;
use crate::source::{source_for_config, ImageSource};
use crate::state::LoadingState;
use futures::future::{BoxFuture, FutureExt, Shared};
use localdb_fs::AdapterKind;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

type BootstrapTask = Shared<BoxFuture<'static, BootstrapResult<Arc<DatabaseHandle>>>>;

#[derive(Default)]
struct Core {
    state: LoadingState,
    handle: Option<Arc<DatabaseHandle>>,
    task: Option<BootstrapTask>,
    adapter: Option<AdapterKind>,
    attempts: u64,
}

/// Brings up the engine once and hands out the shared handle.
///
/// Create one per process with [`BootstrapManager::builder`] and pass it to
/// consumers.
///
/// ```rust,no_run
/// use localdb_bootstrap::{BootstrapManager, Schema, StateCallbacks};
/// use std::sync::Arc;
///
/// # async fn run() -> localdb_bootstrap::BootstrapResult<()> {
/// let schema = Schema::new().with_table("notes", "id");
/// let manager = BootstrapManager::builder(schema).build()?;
///
/// manager.register(Arc::new(
///     StateCallbacks::new().with_progress(|e| println!("{}: {}%", e.phase, e.progress)),
/// ));
/// let db = manager.initialize().await?;
/// assert_eq!(db.count("notes").unwrap_or(0), 0);
/// # Ok(())
/// # }
/// ```
pub struct BootstrapManager {
    config: BootstrapConfig,
    schema: Schema,
    resolver: Arc<dyn ModuleResolver>,
    source: Arc<dyn ImageSource>,
    compiler: Arc<dyn WasmCompiler>,
    core: Mutex<Core>,
    dispatch: ReentrantMutex<()>,
    observers: ObserverList,
    migrator: SchemaMigrator,
}

impl BootstrapManager {
    /// Starts building a manager for `schema`.
    pub fn builder(schema: Schema) -> ManagerBuilder {
        ManagerBuilder {
            schema,
            config: None,
            resolver: None,
            source: None,
            compiler: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Returns the schema handles are bound to.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the current state.
    pub fn current_state(&self) -> LoadingState {
        self.core.lock().state
    }

    /// Returns true once a handle exists.
    pub fn is_ready(&self) -> bool {
        self.core.lock().handle.is_some()
    }

    /// Returns the adapter the handle was built on, once ready.
    pub fn adapter_kind(&self) -> Option<AdapterKind> {
        self.core.lock().adapter
    }

    /// Number of bootstrap attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.core.lock().attempts
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Returns the handle.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Uninitialized`] until a bootstrap succeeded.
    pub fn db(&self) -> BootstrapResult<Arc<DatabaseHandle>> {
        self.core
            .lock()
            .handle
            .clone()
            .ok_or(BootstrapError::Uninitialized)
    }

    /// Returns a facade that resolves the handle on every access.
    pub fn lazy(self: &Arc<Self>) -> LazyDatabase {
        LazyDatabase::new(Arc::clone(self))
    }

    /// Brings the database up, or joins the bootstrap already in flight.
    ///
    /// Returns the existing handle without doing any work once ready. After
    /// a failure the next call starts a fresh attempt.
    ///
    /// # Errors
    ///
    /// Returns the error of the attempt this call joined, or
    /// [`BootstrapError::Config`] when called outside a Tokio runtime.
    pub async fn initialize(self: &Arc<Self>) -> BootstrapResult<Arc<DatabaseHandle>> {
        let task = {
            let mut core = self.core.lock();
            if let Some(handle) = &core.handle {
                return Ok(Arc::clone(handle));
            }
            if let Some(task) = core.task.clone() {
                debug!(attempt = core.attempts, "joining bootstrap in flight");
                task
            } else {
                let attempt = core.attempts + 1;
                let task = self.spawn(attempt)?;
                core.attempts = attempt;
                core.task = Some(task.clone());
                task
            }
        };
        task.await
    }

    /// Registers `observer`, then behaves like [`BootstrapManager::initialize`].
    ///
    /// The observer stays registered afterwards.
    pub async fn initialize_with(
        self: &Arc<Self>,
        observer: Arc<dyn StateObserver>,
    ) -> BootstrapResult<Arc<DatabaseHandle>> {
        self.register(observer);
        self.initialize().await
    }

    /// Registers `observer` and delivers the current state to it before
    /// returning.
    pub fn register(&self, observer: Arc<dyn StateObserver>) -> SubscriptionId {
        let _dispatch = self.dispatch.lock();
        let id = self.observers.add(Arc::clone(&observer));
        let state = self.current_state();
        observer.on_state_change(state);
        id
    }

    /// Removes a registration. Returns false if `id` was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.observers.remove(id)
    }

    /// Registers `observer` for as long as the returned guard lives.
    pub fn subscribe(self: &Arc<Self>, observer: Arc<dyn StateObserver>) -> Subscription {
        let id = self.register(observer);
        Subscription {
            manager: Arc::downgrade(self),
            id,
        }
    }

    /// Creates every schema table that does not exist yet.
    ///
    /// With `skip_if_synced` a repeated call after a successful sync does
    /// nothing and reports itself as skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Uninitialized`] before the database is
    /// ready, or [`BootstrapError::Migration`] if the sync fails.
    pub fn migrate(&self, skip_if_synced: bool) -> BootstrapResult<MigrationReport> {
        let db = self.db()?;
        self.migrator.run(&db, skip_if_synced)
    }

    fn spawn(self: &Arc<Self>, attempt: u64) -> BootstrapResult<BootstrapTask> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            BootstrapError::Config("initialize() must run inside a Tokio runtime".into())
        })?;

        let manager = Arc::clone(self);
        let join = runtime.spawn(async move {
            match AssertUnwindSafe(manager.run(attempt)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    // An observer may panic after the handle is set. The
                    // attempt has succeeded by then.
                    if let Some(handle) = manager.core.lock().handle.clone() {
                        warn!(attempt, "observer panicked after the database became ready");
                        return Ok(handle);
                    }
                    let error = BootstrapError::Construction("bootstrap task panicked".into());
                    manager.fail(attempt, &error);
                    Err(error)
                }
            }
        });

        let watcher = Arc::clone(self);
        Ok(async move {
            match join.await {
                Ok(result) => result,
                Err(e) => {
                    let error =
                        BootstrapError::Construction(format!("bootstrap task stopped: {e}"));
                    watcher.fail(attempt, &error);
                    Err(error)
                }
            }
        }
        .boxed()
        .shared())
    }

    async fn run(self: &Arc<Self>, attempt: u64) -> BootstrapResult<Arc<DatabaseHandle>> {
        info!(attempt, url = %self.config.wasm_url, "bootstrap started");
        match self.bootstrap().await {
            Ok((handle, adapter)) => {
                self.complete(attempt, Arc::clone(&handle), adapter);
                Ok(handle)
            }
            Err(error) => {
                self.fail(attempt, &error);
                Err(error)
            }
        }
    }

    async fn bootstrap(&self) -> BootstrapResult<(Arc<DatabaseHandle>, AdapterKind)> {
        self.transition(LoadingState::LoadingDependencies);
        let deps = resolve_dependencies(self.resolver.as_ref(), |e| self.notify_progress(&e)).await?;
        info!(engine = deps.engine.name(), "dependencies resolved");

        self.transition(LoadingState::LoadingWasm);
        let image = fetch_image(
            self.source.as_ref(),
            &self.config.wasm_url,
            self.config.expected_sha256.as_deref(),
            |e| self.notify_progress(&e),
        )
        .await?;

        self.transition(LoadingState::CompilingWasm);
        info!(bytes = image.bytes.len(), "compiling database image");
        let module = compile_image(Arc::clone(&self.compiler), image).await?;

        self.transition(LoadingState::Initializing);
        self.construct(deps, module).await
    }

    /// Opens the adapter, constructs the engine and binds the schema on the
    /// blocking pool, since adapters and engines may do file I/O.
    async fn construct(
        &self,
        deps: Dependencies,
        module: CompiledModule,
    ) -> BootstrapResult<(Arc<DatabaseHandle>, AdapterKind)> {
        let Dependencies {
            engine,
            vector,
            orm,
            fs: factory,
        } = deps;
        let environment = self.config.environment.clone();
        let name = self.config.database_name.clone();
        let relaxed_durability = self.config.relaxed_durability;
        let schema = self.schema.clone();

        info!(%environment, engine = engine.name(), "constructing database");

        tokio::task::spawn_blocking(move || -> BootstrapResult<(Arc<DatabaseHandle>, AdapterKind)> {
            let fs = select_adapter(factory.as_ref(), &environment, &name, relaxed_durability)
                .map_err(|e| BootstrapError::Construction(format!("filesystem adapter: {e}")))?;
            let adapter = fs.kind();

            let extensions: Vec<Arc<dyn Extension>> = vec![vector];
            let client = engine
                .construct(EngineOptions {
                    extensions,
                    fs,
                    relaxed_durability,
                    module,
                })
                .map_err(|e| {
                    BootstrapError::Construction(format!("{} engine: {e}", engine.name()))
                })?;

            let handle = orm
                .bind(client, &schema)
                .map_err(|e| BootstrapError::Construction(format!("orm binding: {e}")))?;
            Ok((Arc::new(handle), adapter))
        })
        .await
        .map_err(|e| BootstrapError::Construction(format!("construction task failed: {e}")))?
    }

    fn transition(&self, next: LoadingState) {
        let _dispatch = self.dispatch.lock();
        {
            let mut core = self.core.lock();
            let current = core.state;
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "rejected state transition");
                return;
            }
            debug!(from = %current, to = %next, "state transition");
            core.state = next;
        }
        for observer in self.observers.snapshot() {
            observer.on_state_change(next);
        }
    }

    fn notify_progress(&self, event: &ProgressEvent) {
        let _dispatch = self.dispatch.lock();
        debug!(phase = %event.phase, progress = event.progress, "progress");
        for observer in self.observers.snapshot() {
            observer.on_progress(event);
        }
    }

    fn complete(&self, attempt: u64, handle: Arc<DatabaseHandle>, adapter: AdapterKind) {
        let _dispatch = self.dispatch.lock();
        {
            let mut core = self.core.lock();
            core.handle = Some(handle);
            core.adapter = Some(adapter);
            core.task = None;
            core.state = LoadingState::Ready;
        }
        info!(attempt, %adapter, "local database ready");
        for observer in self.observers.snapshot() {
            observer.on_state_change(LoadingState::Ready);
        }
    }

    /// Ends `attempt` with `error`. Does nothing if the attempt was already
    /// settled.
    fn fail(&self, attempt: u64, error: &BootstrapError) {
        let _dispatch = self.dispatch.lock();
        {
            let mut core = self.core.lock();
            if core.attempts != attempt || core.task.is_none() || core.handle.is_some() {
                return;
            }
            core.task = None;
            core.state = LoadingState::Error;
        }
        warn!(attempt, error = %error, "bootstrap failed");
        let observers = self.observers.snapshot();
        for observer in &observers {
            observer.on_state_change(LoadingState::Error);
        }
        for observer in &observers {
            observer.on_error(error);
        }
    }
}

impl fmt::Debug for BootstrapManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("BootstrapManager")
            .field("state", &core.state)
            .field("attempts", &core.attempts)
            .field("adapter", &core.adapter)
            .field("in_flight", &core.task.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Builder for [`BootstrapManager`].
///
/// Every collaborator defaults to the standard implementation: the
/// [`StaticResolver::standard`] modules, a source chosen from the URL
/// scheme and a [`WasmtimeCompiler`].
pub struct ManagerBuilder {
    schema: Schema,
    config: Option<BootstrapConfig>,
    resolver: Option<Arc<dyn ModuleResolver>>,
    source: Option<Arc<dyn ImageSource>>,
    compiler: Option<Arc<dyn WasmCompiler>>,
}

impl ManagerBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: BootstrapConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the module resolver.
    pub fn resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the image source.
    pub fn source(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the compiler.
    pub fn compiler(mut self, compiler: Arc<dyn WasmCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Validates the configuration and builds the manager.
    pub fn build(self) -> BootstrapResult<Arc<BootstrapManager>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let source = match self.source {
            Some(source) => source,
            None => source_for_config(&config)?,
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(StaticResolver::standard()));
        let compiler = self
            .compiler
            .unwrap_or_else(|| Arc::new(WasmtimeCompiler::new()));

        debug!(
            url = %config.wasm_url,
            environment = %config.environment,
            tables = self.schema.len(),
            "bootstrap manager created"
        );

        Ok(Arc::new(BootstrapManager {
            config,
            schema: self.schema,
            resolver,
            source,
            compiler,
            core: Mutex::new(Core::default()),
            dispatch: ReentrantMutex::new(()),
            observers: ObserverList::default(),
            migrator: SchemaMigrator::default(),
        }))
    }
}

/// Keeps an observer registered until dropped.
#[derive(Debug)]
#[must_use = "dropping a Subscription unregisters its observer"]
pub struct Subscription {
    manager: Weak<BootstrapManager>,
    id: SubscriptionId,
}

impl Subscription {
    /// The registration id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister(self.id);
        }
    }
}
