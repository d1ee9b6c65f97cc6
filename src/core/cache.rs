use crate::domain::model::ModelSource;
use crate::domain::ports::{CalculationEngine, LoadOptions};
use crate::utils::error::{Result, ServiceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Compiled workbook shared by every execution of one service.
pub struct CachedWorkbook<W> {
    turn: tokio::sync::Mutex<()>,
    workbook: Mutex<W>,
}

impl<W> CachedWorkbook<W> {
    fn new(workbook: W) -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            workbook: Mutex::new(workbook),
        }
    }

    /// Wait without blocking the runtime until no other whole-execution calculation
    /// holds this workbook.
    pub async fn turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    pub fn workbook(&self) -> &Mutex<W> {
        &self.workbook
    }
}

/// Shared handle to a compiled workbook.
pub type WorkbookHandle<W> = Arc<CachedWorkbook<W>>;

type BuildLock = Arc<Mutex<()>>;

struct CacheEntry<W> {
    handle: WorkbookHandle<W>,
    inserted_at: Instant,
    sequence: u64,
}

/// Process-local cache of compiled workbooks keyed by service id.
///
/// Expiry is lazy: an entry is only checked (and rebuilt) when its key is requested
/// again, unless [`WorkbookCache::purge_expired`] is called.
pub struct WorkbookCache<W> {
    entries: Mutex<HashMap<String, CacheEntry<W>>>,
    builds: Mutex<HashMap<String, BuildLock>>,
    ttl: Duration,
    max_entries: Option<usize>,
    next_sequence: AtomicU64,
}

impl<W> WorkbookCache<W> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            builds: Mutex::new(HashMap::new()),
            ttl,
            max_entries: None,
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            builds: Mutex::new(HashMap::new()),
            ttl,
            max_entries: Some(max_entries.max(1)),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry<W>>>> {
        self.entries
            .lock()
            .map_err(|_| ServiceError::engine("workbook cache lock poisoned"))
    }

    fn fresh(&self, service_id: &str) -> Result<Option<WorkbookHandle<W>>> {
        let entries = self.lock()?;
        Ok(entries
            .get(service_id)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.handle)))
    }

    fn build_lock(&self, service_id: &str) -> Result<BuildLock> {
        let mut builds = self
            .builds
            .lock()
            .map_err(|_| ServiceError::engine("workbook cache lock poisoned"))?;
        Ok(Arc::clone(builds.entry(service_id.to_string()).or_default()))
    }

    /// Return the cached workbook for `service_id`, building it from `model` on a miss
    /// or after expiry. The flag is `true` when no build was needed.
    ///
    /// Builds for one service id are serialized, so concurrent misses load the model
    /// once. Lookups for other services never wait on a build.
    ///
    /// The model is loaded with recalculation deferred; the input writes that follow
    /// every lookup trigger it anyway.
    pub fn get<E>(
        &self,
        engine: &E,
        service_id: &str,
        model: &ModelSource,
    ) -> Result<(WorkbookHandle<W>, bool)>
    where
        E: CalculationEngine<Workbook = W>,
    {
        if let Some(handle) = self.fresh(service_id)? {
            tracing::debug!("Workbook cache hit for service '{}'", service_id);
            return Ok((handle, true));
        }

        let build_lock = self.build_lock(service_id)?;
        let _building = build_lock
            .lock()
            .map_err(|_| ServiceError::engine("workbook build lock poisoned"))?;

        // 等待期間其他執行可能已完成建置
        if let Some(handle) = self.fresh(service_id)? {
            tracing::debug!("Workbook for service '{}' built by a concurrent lookup", service_id);
            return Ok((handle, true));
        }

        let started = Instant::now();
        let bytes = model.read()?;
        let workbook = engine.load(
            &bytes,
            &LoadOptions {
                recalculate_on_load: false,
            },
        )?;
        tracing::info!(
            "📦 Compiled workbook for service '{}' ({} bytes) in {:?}",
            service_id,
            bytes.len(),
            started.elapsed()
        );

        let mut entries = self.lock()?;
        if let Some(max_entries) = self.max_entries {
            while entries.len() >= max_entries && !entries.contains_key(service_id) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| (entry.inserted_at, entry.sequence))
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        tracing::debug!("Evicting workbook for service '{}' (capacity)", key);
                        entries.remove(&key);
                    }
                    None => break,
                }
            }
        }

        let handle = Arc::new(CachedWorkbook::new(workbook));
        entries.insert(
            service_id.to_string(),
            CacheEntry {
                handle: Arc::clone(&handle),
                inserted_at: Instant::now(),
                sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok((handle, false))
    }

    /// Evict one service's workbook, or every workbook when `service_id` is `None`.
    /// Returns the number of evicted entries.
    pub fn clear(&self, service_id: Option<&str>) -> usize {
        let Ok(mut entries) = self.lock() else {
            return 0;
        };
        match service_id {
            Some(id) => {
                let removed = usize::from(entries.remove(id).is_some());
                if removed > 0 {
                    tracing::info!("🧹 Cleared cached workbook for service '{}'", id);
                }
                removed
            }
            None => {
                let removed = entries.len();
                entries.clear();
                tracing::info!("🧹 Cleared {} cached workbook(s)", removed);
                removed
            }
        }
    }

    /// Drop every expired entry now instead of waiting for its next lookup.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.lock() else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.lock()
            .map(|entries| entries.contains_key(service_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<W> Default for WorkbookCache<W> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::CellValue;
    use crate::domain::ports::Workbook;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    struct StubWorkbook {
        recalculated: bool,
    }

    impl Workbook for StubWorkbook {
        fn active_sheet_name(&self) -> &str {
            "Sheet1"
        }

        fn default_sheet_name(&self) -> &str {
            "Sheet1"
        }

        fn has_sheet(&self, name: &str) -> bool {
            name == "Sheet1"
        }

        fn activate_sheet(&mut self, _name: &str) -> Result<()> {
            Ok(())
        }

        fn dimensions(&self) -> (u32, u32) {
            (10, 10)
        }

        fn cell_value(&self, _row: u32, _col: u32) -> Result<CellValue> {
            Ok(CellValue::Empty)
        }

        fn set_cell_value(&mut self, _row: u32, _col: u32, _value: CellValue) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingEngine {
        loads: AtomicUsize,
    }

    impl CalculationEngine for CountingEngine {
        type Workbook = StubWorkbook;

        fn load(&self, _model: &[u8], options: &LoadOptions) -> Result<StubWorkbook> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(StubWorkbook {
                recalculated: options.recalculate_on_load,
            })
        }
    }

    fn model() -> ModelSource {
        ModelSource::Inline("{}".to_string())
    }

    #[test]
    fn test_second_lookup_is_a_hit() {
        let engine = CountingEngine::default();
        let cache = WorkbookCache::new(DEFAULT_TTL);

        let (first, hit) = cache.get(&engine, "loan", &model()).unwrap();
        assert!(!hit);
        let (second, hit) = cache.get(&engine, "loan", &model()).unwrap();
        assert!(hit);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_workbooks_load_without_recalculation() {
        let engine = CountingEngine::default();
        let cache = WorkbookCache::new(DEFAULT_TTL);
        let (handle, _) = cache.get(&engine, "loan", &model()).unwrap();
        assert!(!handle.workbook().lock().unwrap().recalculated);
    }

    #[test]
    fn test_expired_entry_is_rebuilt() {
        let engine = CountingEngine::default();
        let cache = WorkbookCache::new(Duration::ZERO);

        let (first, _) = cache.get(&engine, "loan", &model()).unwrap();
        let (second, hit) = cache.get(&engine, "loan", &model()).unwrap();
        assert!(!hit);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_single_and_all() {
        let engine = CountingEngine::default();
        let cache = WorkbookCache::new(DEFAULT_TTL);
        cache.get(&engine, "a", &model()).unwrap();
        cache.get(&engine, "b", &model()).unwrap();

        assert_eq!(cache.clear(Some("a")), 1);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert_eq!(cache.clear(Some("missing")), 0);

        let (_, hit) = cache.get(&engine, "a", &model()).unwrap();
        assert!(!hit);
        assert_eq!(cache.clear(None), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let engine = CountingEngine::default();
        let cache = WorkbookCache::with_capacity(DEFAULT_TTL, 2);
        cache.get(&engine, "a", &model()).unwrap();
        cache.get(&engine, "b", &model()).unwrap();
        cache.get(&engine, "c", &model()).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_purge_expired() {
        let engine = CountingEngine::default();
        let cache = WorkbookCache::new(Duration::ZERO);
        cache.get(&engine, "a", &model()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_model_read_failure_is_reported() {
        let engine = CountingEngine::default();
        let cache: WorkbookCache<StubWorkbook> = WorkbookCache::new(DEFAULT_TTL);
        let missing = ModelSource::File("/nonexistent/model.json".into());
        let err = cache.get(&engine, "a", &missing).err().unwrap();
        assert!(matches!(err, ServiceError::ModelError { .. }));
        assert!(cache.is_empty());
    }

    /// Blocks inside `load` for the model `slow` until released.
    struct GatedEngine {
        loads: AtomicUsize,
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl CalculationEngine for GatedEngine {
        type Workbook = StubWorkbook;

        fn load(&self, model: &[u8], _options: &LoadOptions) -> Result<StubWorkbook> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if model == b"slow" {
                self.started.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            } else {
                std::thread::sleep(Duration::from_millis(20));
            }
            Ok(StubWorkbook { recalculated: false })
        }
    }

    fn gated() -> (GatedEngine, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let engine = GatedEngine {
            loads: AtomicUsize::new(0),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        };
        (engine, started_rx, release_tx)
    }

    #[test]
    fn test_slow_build_does_not_block_other_services() {
        let (engine, started, release) = gated();
        let cache = WorkbookCache::new(DEFAULT_TTL);

        std::thread::scope(|scope| {
            let slow = scope.spawn(|| cache.get(&engine, "slow", &ModelSource::Inline("slow".into())));
            started.recv().unwrap();

            let (_, hit) = cache.get(&engine, "fast", &model()).unwrap();
            assert!(!hit);
            assert!(cache.contains("fast"));
            assert!(!cache.contains("slow"));

            release.send(()).unwrap();
            assert!(slow.join().unwrap().is_ok());
        });
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_misses_load_once() {
        let (engine, _started, _release) = gated();
        let cache = WorkbookCache::new(DEFAULT_TTL);

        let handles: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.get(&engine, "loan", &model()).unwrap().0))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(cache.len(), 1);
    }
}
