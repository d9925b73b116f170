//! Runtime modules the bootstrap depends on, and their concurrent resolution.

use crate::engine::{EngineBinding, Extension, VectorExtension};
use crate::environment::{FsAdapterFactory, StandardAdapters};
use crate::error::{BootstrapError, BootstrapResult};
use crate::handle::{OrmBinding, SchemaOrm};
use crate::journal::JournalEngine;
use crate::progress::{Phase, PhaseProgress, ProgressEvent};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The modules resolved during [`crate::LoadingState::LoadingDependencies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleKind {
    /// The engine binding.
    Engine,
    /// The vector extension.
    VectorExtension,
    /// The ORM binding.
    Orm,
    /// The filesystem adapter factory.
    FsAdapters,
}

impl ModuleKind {
    /// Every module, in declaration order.
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Engine,
        ModuleKind::VectorExtension,
        ModuleKind::Orm,
        ModuleKind::FsAdapters,
    ];

    /// Module name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Engine => "engine",
            ModuleKind::VectorExtension => "vector",
            ModuleKind::Orm => "orm",
            ModuleKind::FsAdapters => "fs-adapters",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved module.
#[derive(Clone)]
pub enum ResolvedModule {
    /// An engine binding.
    Engine(Arc<dyn EngineBinding>),
    /// An extension.
    VectorExtension(Arc<dyn Extension>),
    /// An ORM binding.
    Orm(Arc<dyn OrmBinding>),
    /// A filesystem adapter factory.
    FsAdapters(Arc<dyn FsAdapterFactory>),
}

impl ResolvedModule {
    /// The kind this module satisfies.
    pub fn kind(&self) -> ModuleKind {
        match self {
            ResolvedModule::Engine(_) => ModuleKind::Engine,
            ResolvedModule::VectorExtension(_) => ModuleKind::VectorExtension,
            ResolvedModule::Orm(_) => ModuleKind::Orm,
            ResolvedModule::FsAdapters(_) => ModuleKind::FsAdapters,
        }
    }
}

impl fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolvedModule").field(&self.kind()).finish()
    }
}

/// Loads runtime modules.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    /// Resolves the module for `kind`.
    async fn resolve(&self, kind: ModuleKind) -> Result<ResolvedModule, String>;
}

/// The modules of one bootstrap attempt.
#[derive(Clone)]
pub struct Dependencies {
    /// Engine binding.
    pub engine: Arc<dyn EngineBinding>,
    /// Vector extension.
    pub vector: Arc<dyn Extension>,
    /// ORM binding.
    pub orm: Arc<dyn OrmBinding>,
    /// Filesystem adapter factory.
    pub fs: Arc<dyn FsAdapterFactory>,
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("engine", &self.engine.name())
            .field("vector", &self.vector.name())
            .finish_non_exhaustive()
    }
}

/// A resolver over a fixed module table.
#[derive(Clone)]
pub struct StaticResolver {
    modules: HashMap<ModuleKind, ResolvedModule>,
    latency: HashMap<ModuleKind, Duration>,
}

impl StaticResolver {
    /// A resolver with no modules.
    pub fn empty() -> Self {
        Self {
            modules: HashMap::new(),
            latency: HashMap::new(),
        }
    }

    /// The modules shipped with this crate: the journal engine, the vector
    /// extension, the schema ORM and the standard adapters.
    pub fn standard() -> Self {
        Self::empty()
            .with_module(ResolvedModule::Engine(Arc::new(JournalEngine)))
            .with_module(ResolvedModule::VectorExtension(Arc::new(VectorExtension)))
            .with_module(ResolvedModule::Orm(Arc::new(SchemaOrm::new())))
            .with_module(ResolvedModule::FsAdapters(Arc::new(StandardAdapters)))
    }

    /// Adds `module`, replacing any module of the same kind.
    pub fn with_module(mut self, module: ResolvedModule) -> Self {
        self.modules.insert(module.kind(), module);
        self
    }

    /// Removes the module for `kind`. Resolving it will fail.
    pub fn without(mut self, kind: ModuleKind) -> Self {
        self.modules.remove(&kind);
        self
    }

    /// Delays resolution of `kind` by `delay`.
    pub fn with_latency(mut self, kind: ModuleKind, delay: Duration) -> Self {
        self.latency.insert(kind, delay);
        self
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.modules.keys().copied().collect();
        kinds.sort();
        f.debug_struct("StaticResolver")
            .field("modules", &kinds)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModuleResolver for StaticResolver {
    async fn resolve(&self, kind: ModuleKind) -> Result<ResolvedModule, String> {
        if let Some(delay) = self.latency.get(&kind) {
            tokio::time::sleep(*delay).await;
        }
        self.modules
            .get(&kind)
            .cloned()
            .ok_or_else(|| format!("module {kind} is not available"))
    }
}

/// Resolves every module concurrently.
///
/// One [`Phase::Dependencies`] event is emitted per resolved module, in
/// completion order, followed by the terminal event. The first failure
/// aborts the phase and drops whatever was already resolved.
pub(crate) async fn resolve_dependencies(
    resolver: &dyn ModuleResolver,
    mut emit: impl FnMut(ProgressEvent),
) -> BootstrapResult<Dependencies> {
    let mut tracker = PhaseProgress::start(Phase::Dependencies, Some(ModuleKind::ALL.len() as u64));

    let mut pending: FuturesUnordered<_> = ModuleKind::ALL
        .iter()
        .map(|&kind| async move { (kind, resolver.resolve(kind).await) })
        .collect();

    let mut engine = None;
    let mut vector = None;
    let mut orm = None;
    let mut fs = None;

    while let Some((kind, result)) = pending.next().await {
        let module = result.map_err(|e| BootstrapError::dependency(kind.name(), e))?;
        if module.kind() != kind {
            return Err(BootstrapError::dependency(
                kind.name(),
                format!("resolver returned a {} module", module.kind()),
            ));
        }

        match module {
            ResolvedModule::Engine(m) => engine = Some(m),
            ResolvedModule::VectorExtension(m) => vector = Some(m),
            ResolvedModule::Orm(m) => orm = Some(m),
            ResolvedModule::FsAdapters(m) => fs = Some(m),
        }
        debug!(module = kind.name(), "dependency resolved");

        if let Some(event) = tracker.advance(1) {
            emit(event);
        }
    }

    let missing = |kind: ModuleKind| BootstrapError::dependency(kind.name(), "not resolved");
    let deps = Dependencies {
        engine: engine.ok_or_else(|| missing(ModuleKind::Engine))?,
        vector: vector.ok_or_else(|| missing(ModuleKind::VectorExtension))?,
        orm: orm.ok_or_else(|| missing(ModuleKind::Orm))?,
        fs: fs.ok_or_else(|| missing(ModuleKind::FsAdapters))?,
    };

    emit(tracker.finish());
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(resolver: &dyn ModuleResolver) -> (BootstrapResult<Dependencies>, Vec<ProgressEvent>) {
        let mut events = Vec::new();
        let result = resolve_dependencies(resolver, |e| events.push(e)).await;
        (result, events)
    }

    #[tokio::test]
    async fn standard_modules_resolve() {
        let (result, events) = run(&StaticResolver::standard()).await;
        let deps = result.unwrap();
        assert_eq!(deps.engine.name(), "journal");
        assert_eq!(deps.vector.name(), "vector");

        let percents: Vec<u8> = events.iter().map(|e| e.progress).collect();
        assert_eq!(percents, vec![25, 50, 75, 99, 100]);
        assert!(events.iter().all(|e| e.phase == Phase::Dependencies));
        assert!(events.last().unwrap().elapsed.is_some());
    }

    #[tokio::test]
    async fn missing_module_fails_the_phase() {
        let resolver = StaticResolver::standard().without(ModuleKind::Orm);
        let (result, events) = run(&resolver).await;

        match result {
            Err(BootstrapError::DependencyLoad { module, .. }) => assert_eq!(module, "orm"),
            other => panic!("expected dependency error, got {other:?}"),
        }
        assert!(events.iter().all(|e| !e.is_complete()));
    }

    #[tokio::test]
    async fn wrong_kind_is_rejected() {
        struct Confused;

        #[async_trait]
        impl ModuleResolver for Confused {
            async fn resolve(&self, _kind: ModuleKind) -> Result<ResolvedModule, String> {
                Ok(ResolvedModule::VectorExtension(Arc::new(VectorExtension)))
            }
        }

        let (result, _) = run(&Confused).await;
        assert!(matches!(result, Err(BootstrapError::DependencyLoad { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_is_concurrent() {
        let resolver = StaticResolver::standard()
            .with_latency(ModuleKind::Engine, Duration::from_secs(5))
            .with_latency(ModuleKind::Orm, Duration::from_secs(5))
            .with_latency(ModuleKind::FsAdapters, Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let (result, _) = run(&resolver).await;
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn module_names() {
        let names: Vec<&str> = ModuleKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names, vec!["engine", "vector", "orm", "fs-adapters"]);
    }
}
