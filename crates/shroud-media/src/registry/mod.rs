//! Model lifecycle management.
//!
//! The registry loads one inference session per (detector, privacy level),
//! binds it to the best execution backend that initializes, and keeps at
//! most `max_cached_sessions` resident. Sessions are handed out as
//! [`SessionLease`]s; a leased session is never evicted.
//!
//! Locking: resolved sessions are read under a `RwLock`; loads, inserts and
//! evictions are serialized by an async load lock so concurrent runs never
//! load the same key twice.

mod backend;
mod catalog;
mod ort_loader;
mod session;

pub use backend::{BackendClass, BackendProbe, BackendSelector, ExecutionBackend};
pub use catalog::{ModelCatalog, ModelKey, ModelSpec};
pub use ort_loader::OrtSessionLoader;
pub use session::{
    InferenceEngine, ModelOutputs, ModelSession, OutputTensor, SessionLease, SessionLoader,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use shroud_models::{DetectorType, PrivacyLevel};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::PrivacyConfig;
use crate::error::{MediaError, MediaResult};
use crate::metrics;

/// Registry sizing and caching behaviour.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub capacity: usize,
    /// When false, sessions are loaded per request and dropped with the
    /// last lease.
    pub caching: bool,
    pub level: PrivacyLevel,
}

impl RegistryConfig {
    pub fn from_privacy_config(config: &PrivacyConfig) -> Self {
        Self {
            capacity: config.performance.max_cached_sessions,
            caching: config.performance.model_caching,
            level: config.level,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 6,
            caching: true,
            level: PrivacyLevel::Balanced,
        }
    }
}

/// Snapshot of registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub resident: usize,
    pub capacity: usize,
    pub checked_out: usize,
    pub loads: u64,
    pub evictions: u64,
    pub cache_hits: u64,
}

/// Artifact check for one privacy level.
#[derive(Debug, Clone, Default)]
pub struct ModelValidation {
    pub level: PrivacyLevel,
    pub available: Vec<ModelKey>,
    pub missing: Vec<(ModelKey, PathBuf)>,
}

impl ModelValidation {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicU64,
    evictions: AtomicU64,
    cache_hits: AtomicU64,
}

/// Loads, caches and evicts model sessions.
pub struct ModelRegistry {
    catalog: ModelCatalog,
    loader: Arc<dyn SessionLoader>,
    backends: Vec<ExecutionBackend>,
    config: RegistryConfig,
    level: RwLock<PrivacyLevel>,
    sessions: RwLock<HashMap<ModelKey, Arc<ModelSession>>>,
    load_lock: Arc<tokio::sync::Mutex<()>>,
    clock: AtomicU64,
    counters: Counters,
}

impl ModelRegistry {
    /// Create a registry; probes execution backends once.
    pub fn new(catalog: ModelCatalog, loader: Arc<dyn SessionLoader>, mut config: RegistryConfig) -> Self {
        config.capacity = config.capacity.max(1);
        let backends = BackendSelector::prioritize(loader.available_backends());
        info!(
            base_path = %catalog.base_path().display(),
            capacity = config.capacity,
            caching = config.caching,
            backends = ?backends,
            "Model registry created"
        );

        Self {
            catalog,
            loader,
            backends,
            level: RwLock::new(config.level),
            config,
            sessions: RwLock::new(HashMap::new()),
            load_lock: Arc::new(tokio::sync::Mutex::new(())),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Backends in the order loads try them.
    pub fn backends(&self) -> &[ExecutionBackend] {
        &self.backends
    }

    pub fn current_level(&self) -> PrivacyLevel {
        self.level.read().map(|level| *level).unwrap_or_default()
    }

    /// Change the level used by level-less requests. Sessions of the old
    /// level stay resident until capacity forces them out.
    pub fn switch_privacy_level(&self, new_level: PrivacyLevel) {
        let Ok(mut level) = self.level.write() else {
            warn!("Privacy level lock poisoned; keeping previous level");
            return;
        };
        if *level != new_level {
            info!(from = %*level, to = %new_level, "Switching privacy level");
            *level = new_level;
        }
    }

    /// Check out the session for `(detector, level)`, loading it if needed.
    pub async fn get_model(&self, detector: DetectorType, level: PrivacyLevel) -> MediaResult<SessionLease> {
        let key = ModelKey::new(detector, level);

        if self.config.caching {
            if let Some(lease) = self.checkout_cached(key)? {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit(detector);
                return Ok(lease);
            }
        }

        // The guard travels into the blocking load, so a caller cancelled
        // mid-load keeps the lock held until that load has finished.
        let load_guard = self.load_lock.clone().lock_owned().await;

        if !self.config.caching {
            let (session, _load_guard) = self.load_session(key, load_guard).await?;
            let lease = SessionLease::checkout(Arc::new(session));
            lease.touch(self.tick());
            return Ok(lease);
        }

        // Another run may have loaded the key while we waited.
        if let Some(lease) = self.checkout_cached(key)? {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_hit(detector);
            return Ok(lease);
        }

        self.ensure_capacity_for_load()?;
        let (session, _load_guard) = self.load_session(key, load_guard).await?;
        let session = Arc::new(session);

        let mut sessions = self.write_sessions()?;
        let evicted = evict_idle(&mut sessions, self.config.capacity.saturating_sub(1))?;
        self.note_evictions(&evicted);

        let lease = SessionLease::checkout(session.clone());
        lease.touch(self.tick());
        sessions.insert(key, session);
        metrics::record_resident_sessions(sessions.len());

        Ok(lease)
    }

    /// Check out a session at the current privacy level.
    pub async fn get_current(&self, detector: DetectorType) -> MediaResult<SessionLease> {
        self.get_model(detector, self.current_level()).await
    }

    /// Report required artifacts that are missing at the current level.
    pub fn validate(&self) -> ModelValidation {
        self.validate_level(self.current_level(), DetectorType::ALL)
    }

    /// Report missing artifacts for `detectors` at `level`.
    pub fn validate_level(&self, level: PrivacyLevel, detectors: &[DetectorType]) -> ModelValidation {
        let keys: Vec<ModelKey> = detectors.iter().map(|&d| ModelKey::new(d, level)).collect();
        let missing = self.catalog.missing(keys.iter().copied());
        let available = keys
            .into_iter()
            .filter(|key| !missing.iter().any(|(m, _)| m == key))
            .collect();

        for (key, path) in &missing {
            warn!(model = %key, path = %path.display(), "Model artifact missing");
        }

        ModelValidation {
            level,
            available,
            missing,
        }
    }

    /// Preload sessions. Failures are logged and skipped.
    pub async fn warm_up(&self, level: PrivacyLevel, detectors: &[DetectorType]) -> usize {
        let mut loaded = 0;
        for &detector in detectors {
            match self.get_model(detector, level).await {
                Ok(lease) => {
                    debug!(model = %lease.key(), backend = %lease.backend(), "Warmed up model");
                    loaded += 1;
                }
                Err(e) => warn!(detector = %detector, level = %level, error = %e, "Model warm-up failed"),
            }
        }
        loaded
    }

    pub fn stats(&self) -> RegistryStats {
        let (resident, checked_out) = self
            .sessions
            .read()
            .map(|sessions| {
                (
                    sessions.len(),
                    sessions.values().filter(|s| !s.is_idle()).count(),
                )
            })
            .unwrap_or_default();

        RegistryStats {
            resident,
            capacity: self.config.capacity,
            checked_out,
            loads: self.counters.loads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Keys of the resident sessions.
    pub fn resident_keys(&self) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self
            .sessions
            .read()
            .map(|sessions| sessions.keys().copied().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Drop every resident session. Leased sessions are released when their
    /// last lease drops.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<ModelSession>> = match self.sessions.write() {
            Ok(mut sessions) => sessions.drain().map(|(_, session)| session).collect(),
            Err(_) => {
                warn!("Session map lock poisoned during shutdown");
                return;
            }
        };

        for session in drained.iter().filter(|s| !s.is_idle()) {
            warn!(
                model = %session.key(),
                checkouts = session.checkouts(),
                "Session still checked out at shutdown; released when its lease drops"
            );
        }

        if !drained.is_empty() {
            info!(released = drained.len(), "Model registry shut down");
        }
        metrics::record_resident_sessions(0);
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn write_sessions(&self) -> MediaResult<std::sync::RwLockWriteGuard<'_, HashMap<ModelKey, Arc<ModelSession>>>> {
        self.sessions
            .write()
            .map_err(|_| MediaError::internal("Session map lock poisoned"))
    }

    fn checkout_cached(&self, key: ModelKey) -> MediaResult<Option<SessionLease>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MediaError::internal("Session map lock poisoned"))?;

        // Checkout happens under the read lock so eviction (write lock)
        // never sees a zero count for a session being handed out.
        Ok(sessions.get(&key).map(|session| {
            let lease = SessionLease::checkout(session.clone());
            lease.touch(self.tick());
            lease
        }))
    }

    /// Fail fast when a new session could not be inserted.
    fn ensure_capacity_for_load(&self) -> MediaResult<()> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MediaError::internal("Session map lock poisoned"))?;

        let resident = sessions.len();
        if resident < self.config.capacity {
            return Ok(());
        }

        let idle = sessions.values().filter(|s| s.is_idle()).count();
        let needed = resident + 1 - self.config.capacity;
        if idle >= needed {
            return Ok(());
        }

        Err(MediaError::RegistryCapacity {
            capacity: self.config.capacity,
            resident,
            checked_out: resident - idle,
        })
    }

    /// Load `key` on the blocking pool. `load_guard` is held until the load
    /// returns, whether or not this future is still being polled.
    async fn load_session(
        &self,
        key: ModelKey,
        load_guard: OwnedMutexGuard<()>,
    ) -> MediaResult<(ModelSession, OwnedMutexGuard<()>)> {
        let path = self.catalog.resolve(key)?;
        let loader = self.loader.clone();
        let backends = self.backends.clone();
        let start = Instant::now();

        let (loaded, load_guard) = tokio::task::spawn_blocking(move || {
            let mut last_error = None;
            for backend in backends {
                match loader.load(&path, backend) {
                    Ok(engine) => return (Ok((engine, backend, path)), load_guard),
                    Err(e) => {
                        debug!(model = %key, backend = %backend, error = %e, "Backend failed to initialize");
                        last_error = Some(e);
                    }
                }
            }
            let error = MediaError::model_load(
                key.to_string(),
                last_error.map_or_else(|| "no execution backend".to_string(), |e| e.to_string()),
            );
            (Err(error), load_guard)
        })
        .await
        .map_err(|e| MediaError::model_load(key.to_string(), format!("loader task failed: {e}")))?;
        let (engine, backend, path) = loaded?;

        let load_duration = start.elapsed();
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        metrics::record_model_load(key.detector, backend, load_duration.as_secs_f64() * 1000.0);
        info!(
            model = %key,
            backend = %backend,
            load_ms = load_duration.as_millis() as u64,
            "Model session loaded"
        );

        Ok((ModelSession::new(key, engine, backend, path, load_duration), load_guard))
    }

    fn note_evictions(&self, evicted: &[Arc<ModelSession>]) {
        if evicted.is_empty() {
            return;
        }
        for session in evicted {
            info!(model = %session.key(), last_used = session.last_used(), "Evicted model session");
        }
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        metrics::record_evictions(evicted.len());
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("catalog", &self.catalog)
            .field("backends", &self.backends)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Evict idle sessions, least recently used first, until at most `target`
/// remain. Fails without evicting when too few sessions are idle.
fn evict_idle(
    sessions: &mut HashMap<ModelKey, Arc<ModelSession>>,
    target: usize,
) -> MediaResult<Vec<Arc<ModelSession>>> {
    if sessions.len() <= target {
        return Ok(Vec::new());
    }

    let mut idle: Vec<(u64, ModelKey)> = sessions
        .iter()
        .filter(|(_, s)| s.is_idle())
        .map(|(key, s)| (s.last_used(), *key))
        .collect();
    let excess = sessions.len() - target;

    if idle.len() < excess {
        return Err(MediaError::RegistryCapacity {
            capacity: target + 1,
            resident: sessions.len(),
            checked_out: sessions.len() - idle.len(),
        });
    }

    idle.sort();
    Ok(idle
        .into_iter()
        .take(excess)
        .filter_map(|(_, key)| sessions.remove(&key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_model_files, FakeLoader};

    fn registry(dir: &std::path::Path, loader: Arc<FakeLoader>, capacity: usize) -> ModelRegistry {
        ModelRegistry::new(
            ModelCatalog::new(dir),
            loader,
            RegistryConfig {
                capacity,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_cache_hit_reuses_session() {
        let dir = write_model_files();
        let loader = Arc::new(FakeLoader::new());
        let registry = registry(dir.path(), loader.clone(), 6);

        let first = registry
            .get_model(DetectorType::FaceDetection, PrivacyLevel::Balanced)
            .await
            .unwrap();
        let second = registry
            .get_model(DetectorType::FaceDetection, PrivacyLevel::Balanced)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(first.session(), second.session()));
        assert_eq!(loader.load_count(), 1);
        let stats = registry.stats();
        assert_eq!(stats.resident, 1);
        assert_eq!(stats.checked_out, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_and_reload() {
        let dir = write_model_files();
        let loader = Arc::new(FakeLoader::new());
        let registry = registry(dir.path(), loader.clone(), 2);
        let level = PrivacyLevel::Balanced;

        drop(registry.get_model(DetectorType::FaceDetection, level).await.unwrap());
        drop(registry.get_model(DetectorType::ObjectDetection, level).await.unwrap());
        drop(registry.get_model(DetectorType::TextDetection, level).await.unwrap());

        let resident = registry.resident_keys();
        assert_eq!(
            resident,
            vec![
                ModelKey::new(DetectorType::ObjectDetection, level),
                ModelKey::new(DetectorType::TextDetection, level),
            ]
        );
        assert_eq!(registry.stats().evictions, 1);

        drop(registry.get_model(DetectorType::FaceDetection, level).await.unwrap());
        assert_eq!(loader.load_count(), 4);
        assert!(!registry
            .resident_keys()
            .contains(&ModelKey::new(DetectorType::ObjectDetection, level)));
    }

    #[tokio::test]
    async fn test_recently_used_survives_eviction() {
        let dir = write_model_files();
        let registry = registry(dir.path(), Arc::new(FakeLoader::new()), 2);
        let level = PrivacyLevel::Speed;

        drop(registry.get_model(DetectorType::FaceDetection, level).await.unwrap());
        drop(registry.get_model(DetectorType::ObjectDetection, level).await.unwrap());
        // Touch face so object becomes the LRU entry.
        drop(registry.get_model(DetectorType::FaceDetection, level).await.unwrap());
        drop(registry.get_model(DetectorType::TextDetection, level).await.unwrap());

        assert_eq!(
            registry.resident_keys(),
            vec![
                ModelKey::new(DetectorType::FaceDetection, level),
                ModelKey::new(DetectorType::TextDetection, level),
            ]
        );
    }

    #[tokio::test]
    async fn test_checked_out_sessions_are_never_evicted() {
        let dir = write_model_files();
        let loader = Arc::new(FakeLoader::new());
        let registry = registry(dir.path(), loader.clone(), 2);
        let level = PrivacyLevel::Balanced;

        let face = registry.get_model(DetectorType::FaceDetection, level).await.unwrap();
        let object = registry.get_model(DetectorType::ObjectDetection, level).await.unwrap();

        let err = registry
            .get_model(DetectorType::TextDetection, level)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::RegistryCapacity { capacity: 2, .. }));
        // Refused before loading.
        assert_eq!(loader.load_count(), 2);

        drop(object);
        let text = registry.get_model(DetectorType::TextDetection, level).await.unwrap();
        assert_eq!(text.key().detector, DetectorType::TextDetection);
        assert!(registry
            .resident_keys()
            .contains(&ModelKey::new(DetectorType::FaceDetection, level)));
        drop(face);
    }

    #[tokio::test]
    async fn test_backend_fallback_order() {
        let dir = write_model_files();
        let loader = Arc::new(
            FakeLoader::new()
                .with_backends(vec![ExecutionBackend::Cuda, ExecutionBackend::Cpu])
                .failing_backend(ExecutionBackend::Cuda),
        );
        let registry = registry(dir.path(), loader.clone(), 6);
        assert_eq!(
            registry.backends(),
            &[ExecutionBackend::Cuda, ExecutionBackend::Cpu]
        );

        let lease = registry
            .get_model(DetectorType::FaceDetection, PrivacyLevel::Balanced)
            .await
            .unwrap();
        assert_eq!(lease.backend(), ExecutionBackend::Cpu);
        assert_eq!(
            loader.attempts(),
            vec![ExecutionBackend::Cuda, ExecutionBackend::Cpu]
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_is_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), Arc::new(FakeLoader::new()), 6);

        let err = registry
            .get_model(DetectorType::PiiAnalysis, PrivacyLevel::Paranoid)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ModelNotFound(_)));
        assert!(err.is_detector_local());

        let validation = registry.validate();
        assert_eq!(validation.missing.len(), 4);
        assert!(!validation.is_complete());
    }

    #[tokio::test]
    async fn test_caching_disabled_keeps_nothing_resident() {
        let dir = write_model_files();
        let loader = Arc::new(FakeLoader::new());
        let registry = ModelRegistry::new(
            ModelCatalog::new(dir.path()),
            loader.clone(),
            RegistryConfig {
                caching: false,
                ..Default::default()
            },
        );

        for _ in 0..2 {
            drop(registry.get_model(DetectorType::FaceDetection, PrivacyLevel::Balanced).await.unwrap());
        }
        assert_eq!(loader.load_count(), 2);
        assert_eq!(registry.stats().resident, 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_load_once() {
        let dir = write_model_files();
        let loader = Arc::new(FakeLoader::new().with_load_delay(std::time::Duration::from_millis(50)));
        let registry = Arc::new(registry(dir.path(), loader.clone(), 6));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .get_model(DetectorType::TextDetection, PrivacyLevel::Balanced)
                        .await
                        .map(|lease| lease.key())
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(loader.load_count(), 1);
        // Requests that queued behind the load are hits too.
        assert_eq!(registry.stats().cache_hits, 7);
    }

    #[tokio::test]
    async fn test_cancelled_load_keeps_loads_serialized() {
        let dir = write_model_files();
        let loader = Arc::new(FakeLoader::new().with_load_delay(std::time::Duration::from_millis(200)));
        let registry = registry(dir.path(), loader.clone(), 6);

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            registry.get_model(DetectorType::FaceDetection, PrivacyLevel::Balanced),
        )
        .await;
        assert!(cancelled.is_err());

        let lease = registry
            .get_model(DetectorType::FaceDetection, PrivacyLevel::Balanced)
            .await
            .unwrap();
        assert_eq!(lease.key().detector, DetectorType::FaceDetection);
        assert_eq!(loader.peak_concurrent_loads(), 1);
    }

    #[tokio::test]
    async fn test_switch_level_and_shutdown() {
        let dir = write_model_files();
        let registry = registry(dir.path(), Arc::new(FakeLoader::new()), 6);

        registry.switch_privacy_level(PrivacyLevel::Paranoid);
        assert_eq!(registry.current_level(), PrivacyLevel::Paranoid);

        let held = registry.get_current(DetectorType::FaceDetection).await.unwrap();
        assert_eq!(held.key().level, PrivacyLevel::Paranoid);
        assert_eq!(registry.warm_up(PrivacyLevel::Speed, DetectorType::ALL).await, 4);
        assert_eq!(registry.stats().resident, 5);

        registry.shutdown();
        assert_eq!(registry.stats().resident, 0);
        // The lease outlives the registry map and still works.
        assert!(held.run(ndarray::Array4::zeros((1, 3, 4, 4))).is_ok());
        registry.shutdown();
    }
}
