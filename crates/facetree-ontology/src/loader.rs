//! Background catalog loading with observable progress.
//!
//! A [`CatalogLoader`] is the explicit handle callers hold while a taxonomy
//! loads. Its state is closed: `NotLoaded → Loading(p) → Ready | Failed`.
//! Observers receive strictly increasing progress fractions; nothing is
//! queryable until the state is `Ready`.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::catalog::TermCatalog;
use crate::source::TripleSource;
use crate::vocab::Vocabulary;
use crate::CatalogError;

#[derive(Debug, Clone)]
pub enum LoadState {
    NotLoaded,
    Loading(f32),
    Ready(Arc<TermCatalog>),
    Failed(Arc<CatalogError>),
}

impl LoadState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }
}

type Observer = Arc<dyn Fn(f32) + Send + Sync>;

struct Shared {
    state: RwLock<LoadState>,
    observers: Mutex<Vec<Observer>>,
    last_progress: Mutex<f32>,
}

impl Shared {
    fn report(&self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        {
            let mut last = self.last_progress.lock();
            if fraction <= *last {
                return;
            }
            *last = fraction;
        }
        {
            let mut state = self.state.write();
            if !state.is_finished() {
                *state = LoadState::Loading(fraction);
            }
        }
        // Called outside the lock so an observer may subscribe others.
        let observers: Vec<Observer> = self.observers.lock().clone();
        for observer in &observers {
            observer(fraction);
        }
    }

    fn finish(&self, outcome: LoadState) {
        *self.state.write() = outcome;
    }
}

pub struct CatalogLoader {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CatalogLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogLoader {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(LoadState::NotLoaded),
                observers: Mutex::new(Vec::new()),
                last_progress: Mutex::new(0.0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Register a progress observer. Observers only see fractions reported
    /// after they subscribed.
    pub fn subscribe(&self, observer: impl Fn(f32) + Send + Sync + 'static) {
        self.shared.observers.lock().push(Arc::new(observer));
    }

    /// Start loading on a background thread. Returns `false` (and does
    /// nothing) when a load was already started on this handle.
    pub fn start<S>(&self, sources: Vec<S>, exclude: BTreeSet<String>, vocabulary: Vocabulary) -> bool
    where
        S: TripleSource + Send + 'static,
    {
        let mut worker = self.worker.lock();
        {
            let mut state = self.shared.state.write();
            if !matches!(*state, LoadState::NotLoaded) {
                return false;
            }
            *state = LoadState::Loading(0.0);
        }

        let shared = Arc::clone(&self.shared);
        *worker = Some(std::thread::spawn(move || {
            let outcome = TermCatalog::load_with_progress(
                sources,
                &exclude,
                vocabulary,
                &mut |fraction| shared.report(fraction),
            );
            match outcome {
                Ok(catalog) => {
                    shared.report(1.0);
                    shared.finish(LoadState::Ready(Arc::new(catalog)));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "catalog load failed");
                    shared.finish(LoadState::Failed(Arc::new(err)));
                }
            }
        }));
        true
    }

    pub fn state(&self) -> LoadState {
        self.shared.state.read().clone()
    }

    /// The catalog, once `Ready`.
    pub fn catalog(&self) -> Option<Arc<TermCatalog>> {
        match &*self.shared.state.read() {
            LoadState::Ready(catalog) => Some(Arc::clone(catalog)),
            _ => None,
        }
    }

    /// Block until the load finishes. Concurrent waiters queue on the
    /// worker lock, which is held until the thread is joined.
    pub fn wait(&self) -> Result<Arc<TermCatalog>, Arc<CatalogError>> {
        {
            let mut worker = self.worker.lock();
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    self.shared
                        .finish(LoadState::Failed(Arc::new(CatalogError::LoaderPanicked)));
                }
            }
        }
        match self.state() {
            LoadState::Ready(catalog) => Ok(catalog),
            LoadState::Failed(err) => Err(err),
            LoadState::NotLoaded | LoadState::Loading(_) => Err(Arc::new(CatalogError::NotStarted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, Triple, TripleObject};
    use crate::vocab::{FACETREE_NS, RDFS_LABEL_IRI, RDFS_SUBCLASS_OF_IRI};

    fn small_source() -> MemorySource {
        MemorySource::with_triples(
            "core",
            vec![
                Triple::new("http://x/a", RDFS_LABEL_IRI, TripleObject::literal("A")),
                Triple::new("http://x/b", RDFS_LABEL_IRI, TripleObject::literal("B")),
                Triple::new("http://x/b", RDFS_SUBCLASS_OF_IRI, TripleObject::uri("http://x/a")),
            ],
        )
    }

    #[test]
    fn progress_is_monotonic_and_ends_ready() {
        let loader = CatalogLoader::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        loader.subscribe(move |p| sink.lock().push(p));

        assert!(matches!(loader.state(), LoadState::NotLoaded));
        assert!(loader.start(vec![small_source()], BTreeSet::new(), Vocabulary::default()));
        assert!(!loader.start(vec![small_source()], BTreeSet::new(), Vocabulary::default()));

        let catalog = loader.wait().expect("ready");
        assert_eq!(catalog.len(), 2);
        assert!(matches!(loader.state(), LoadState::Ready(_)));

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn remap_cycle_ends_failed() {
        let remap = format!("{FACETREE_NS}remapTo");
        let source = MemorySource::with_triples(
            "core",
            vec![
                Triple::new("http://x/a", remap.as_str(), TripleObject::uri("http://x/b")),
                Triple::new("http://x/b", remap.as_str(), TripleObject::uri("http://x/a")),
            ],
        );
        let loader = CatalogLoader::new();
        loader.start(vec![source], BTreeSet::new(), Vocabulary::default());
        let err = loader.wait().unwrap_err();
        assert!(matches!(*err, CatalogError::RemapCycle { .. }));
        assert!(loader.catalog().is_none());
    }

    struct SlowSource(MemorySource);

    impl TripleSource for SlowSource {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn read_triples(&mut self, sink: &mut dyn FnMut(Triple)) -> Result<(), CatalogError> {
            std::thread::sleep(std::time::Duration::from_millis(200));
            self.0.read_triples(sink)
        }
    }

    #[test]
    fn concurrent_waiters_all_see_ready() {
        let loader = Arc::new(CatalogLoader::new());
        loader.start(vec![SlowSource(small_source())], BTreeSet::new(), Vocabulary::default());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let loader = Arc::clone(&loader);
                std::thread::spawn(move || loader.wait().map(|c| c.len()))
            })
            .collect();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap(), 2);
        }
    }

    #[test]
    fn observer_may_subscribe_from_inside_a_callback() {
        let loader = Arc::new(CatalogLoader::new());
        let late = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::clone(&loader);
        let sink = Arc::clone(&late);
        let once = Arc::new(Mutex::new(false));
        loader.subscribe(move |_| {
            let mut done = once.lock();
            if !*done {
                *done = true;
                let sink = Arc::clone(&sink);
                handle.subscribe(move |p| sink.lock().push(p));
            }
        });
        loader.start(vec![small_source()], BTreeSet::new(), Vocabulary::default());
        loader.wait().expect("ready");
        assert_eq!(late.lock().last().copied(), Some(1.0));
    }

    #[test]
    fn wait_without_start_reports_not_started() {
        let loader = CatalogLoader::new();
        let err = loader.wait().unwrap_err();
        assert!(matches!(*err, CatalogError::NotStarted));
    }
}
