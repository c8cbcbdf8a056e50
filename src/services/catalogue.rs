use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::{
    db::SnapshotStore,
    error::{AppError, AppResult},
    models::{BucketQuery, BucketSpec, CataloguePool, CatalogueStatus, Movie, SeedTitle},
    services::providers::MetadataResolver,
};

/// Tunables for building and sampling the catalogue
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueSettings {
    /// Snapshot age after which a background rebuild is started
    pub ttl: Duration,
    /// Upper bound on the time a single bucket may take
    pub bucket_timeout: std::time::Duration,
    pub display_per_bucket: usize,
    pub display_limit: usize,
}

impl Default for CatalogueSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            bucket_timeout: std::time::Duration::from_secs(20),
            display_per_bucket: 8,
            display_limit: 60,
        }
    }
}

/// Result of one build attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built { movies: usize },
    Failed,
    /// Another build was already running
    Skipped,
}

/// Resets the building flag however the build exits
struct BuildGuard<'a>(&'a AtomicBool);

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the movie pool and its build/refresh lifecycle
///
/// The pool is swapped as a whole `Arc`, so readers hold either the old or the
/// new pool for as long as they need it, never a partially built one.
pub struct CatalogueCache {
    resolver: Arc<dyn MetadataResolver>,
    snapshots: Arc<dyn SnapshotStore>,
    buckets: Vec<BucketSpec>,
    fallback_buckets: Vec<BucketSpec>,
    settings: CatalogueSettings,
    pool: RwLock<Option<Arc<CataloguePool>>>,
    last_error: RwLock<Option<String>>,
    building: AtomicBool,
}

impl CatalogueCache {
    pub fn new(
        resolver: Arc<dyn MetadataResolver>,
        snapshots: Arc<dyn SnapshotStore>,
        buckets: Vec<BucketSpec>,
        settings: CatalogueSettings,
    ) -> Self {
        Self {
            resolver,
            snapshots,
            buckets,
            fallback_buckets: Vec::new(),
            settings,
            pool: RwLock::new(None),
            last_error: RwLock::new(None),
            building: AtomicBool::new(false),
        }
    }

    pub fn with_fallback_buckets(mut self, fallback_buckets: Vec<BucketSpec>) -> Self {
        self.fallback_buckets = fallback_buckets;
        self
    }

    pub fn settings(&self) -> &CatalogueSettings {
        &self.settings
    }

    /// Loads the persisted snapshot, or builds from scratch when there is none
    ///
    /// A stale snapshot is served immediately while a rebuild runs in the
    /// background. Without a snapshot this awaits the full build; readers see
    /// `NotReady` until it finishes.
    pub async fn initialize(self: &Arc<Self>) {
        match self.snapshots.load().await {
            Ok(Some(snapshot)) if !snapshot.is_empty() => {
                let stale = snapshot.is_stale(self.settings.ttl, Utc::now());
                tracing::info!(
                    movies = snapshot.len(),
                    updated_at = %snapshot.updated_at,
                    stale = stale,
                    store = self.snapshots.name(),
                    "Loaded catalogue snapshot"
                );
                self.install(snapshot).await;

                if stale {
                    self.spawn_refresh();
                }
            }
            Ok(_) => {
                tracing::info!("No catalogue snapshot found, building");
                self.build().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load catalogue snapshot, building");
                self.build().await;
            }
        }
    }

    /// Starts a rebuild in the background, current pool stays readable
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<BuildOutcome> {
        let catalogue = Arc::clone(self);
        tokio::spawn(async move { catalogue.build().await })
    }

    /// Rebuilds on a fixed schedule; the first rebuild happens one interval from now
    pub fn spawn_refresh_loop(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let catalogue = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                tracing::info!("Scheduled catalogue refresh");
                catalogue.build().await;
            }
        })
    }

    /// Resolves every bucket and replaces the pool
    ///
    /// Never fails: bucket errors contribute no movies, and a build that ends
    /// with an empty pool is recorded in `last_error` while the previous pool
    /// (if any) keeps serving.
    pub async fn build(&self) -> BuildOutcome {
        if self.building.swap(true, Ordering::SeqCst) {
            tracing::info!("Catalogue build already running, skipping");
            return BuildOutcome::Skipped;
        }
        let _guard = BuildGuard(&self.building);

        let started = std::time::Instant::now();
        tracing::info!(
            buckets = self.buckets.len(),
            provider = self.resolver.name(),
            "Catalogue build started"
        );

        let results = self.resolve_buckets(&self.buckets).await;
        let mut pool = CataloguePool::from_buckets(results, Utc::now());

        if pool.is_empty() && !self.fallback_buckets.is_empty() {
            tracing::warn!(
                fallback_buckets = self.fallback_buckets.len(),
                "Primary buckets yielded no movies, trying fallback discovery"
            );
            let results = self.resolve_buckets(&self.fallback_buckets).await;
            pool = CataloguePool::from_buckets(results, Utc::now());
        }

        if pool.is_empty() {
            let message = "Catalogue build produced no movies".to_string();
            tracing::error!(elapsed_ms = started.elapsed().as_millis() as u64, "{}", message);
            *self.last_error.write().await = Some(message);
            return BuildOutcome::Failed;
        }

        let movies = pool.len();
        if let Err(e) = self.snapshots.save(&pool).await {
            tracing::warn!(
                error = %e,
                store = self.snapshots.name(),
                "Failed to persist catalogue snapshot"
            );
        }

        self.install(pool).await;
        *self.last_error.write().await = None;

        tracing::info!(
            movies = movies,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Catalogue build completed"
        );

        BuildOutcome::Built { movies }
    }

    /// Resolves buckets concurrently, keeping bucket order in the output
    async fn resolve_buckets(&self, buckets: &[BucketSpec]) -> Vec<(String, Vec<Movie>)> {
        let mut tasks = Vec::new();

        for bucket in buckets {
            let resolver = Arc::clone(&self.resolver);
            let bucket = bucket.clone();
            let timeout = self.settings.bucket_timeout;
            let task = tokio::spawn(async move {
                tokio::time::timeout(timeout, resolve_bucket(resolver.as_ref(), &bucket)).await
            });
            tasks.push(task);
        }

        let mut results = Vec::new();
        let mut failed = 0;

        for (bucket, task) in buckets.iter().zip(tasks) {
            let movies = match task.await {
                Ok(Ok(Ok(movies))) => movies,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(bucket = %bucket.name, error = %e, "Bucket resolution failed");
                    failed += 1;
                    Vec::new()
                }
                Ok(Err(_)) => {
                    tracing::warn!(
                        bucket = %bucket.name,
                        timeout_secs = self.settings.bucket_timeout.as_secs(),
                        "Bucket resolution timed out"
                    );
                    failed += 1;
                    Vec::new()
                }
                Err(e) => {
                    tracing::error!(bucket = %bucket.name, error = %e, "Bucket task join error");
                    failed += 1;
                    Vec::new()
                }
            };
            results.push((bucket.name.clone(), movies));
        }

        if failed > 0 {
            tracing::warn!(
                failed = failed,
                total = buckets.len(),
                "Partial catalogue resolution failure"
            );
        }

        results
    }

    async fn install(&self, pool: CataloguePool) {
        *self.pool.write().await = Some(Arc::new(pool));
    }

    /// The current pool, or `NotReady` before the first successful load
    pub async fn pool(&self) -> AppResult<Arc<CataloguePool>> {
        self.pool.read().await.clone().ok_or(AppError::NotReady)
    }

    pub async fn is_ready(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Shuffled cross-bucket sample for browsing views
    pub async fn sample_display(&self, per_bucket: usize, limit: usize) -> AppResult<Vec<Movie>> {
        let pool = self.pool().await?;
        Ok(sample_display(&pool, per_bucket, limit, &mut rand::thread_rng()))
    }

    pub async fn status(&self) -> CatalogueStatus {
        let pool = self.pool.read().await.clone();
        let last_error = self.last_error.read().await.clone();

        CatalogueStatus {
            ready: pool.is_some(),
            building: self.building.load(Ordering::SeqCst),
            movie_count: pool.as_ref().map(|p| p.len()).unwrap_or(0),
            bucket_counts: pool
                .as_ref()
                .map(|p| {
                    p.grouped_by_bucket
                        .iter()
                        .map(|(name, movies)| (name.clone(), movies.len()))
                        .collect()
                })
                .unwrap_or_default(),
            updated_at: pool.as_ref().map(|p| p.updated_at),
            last_error,
        }
    }
}

/// Runs a bucket's list query and resolves its seed titles
///
/// Fails only when every lookup the bucket attempted failed.
async fn resolve_bucket(
    resolver: &dyn MetadataResolver,
    bucket: &BucketSpec,
) -> AppResult<Vec<Movie>> {
    let mut movies = Vec::new();
    let mut attempts = 0;
    let mut failures = 0;

    if bucket.query != BucketQuery::SeedsOnly {
        attempts += 1;
        match resolver.discover_by_bucket(bucket).await {
            Ok(found) => movies.extend(found),
            Err(e) => {
                failures += 1;
                tracing::warn!(bucket = %bucket.name, error = %e, "Bucket discovery failed");
            }
        }
    }

    for seed in &bucket.seeds {
        attempts += 1;
        let resolved = match seed {
            SeedTitle::ByTitle { title, year } => resolver.resolve_by_title(title, *year).await,
            SeedTitle::ById(id) => resolver.resolve_by_id(*id).await,
        };

        match resolved {
            Ok(Some(movie)) => movies.push(movie),
            Ok(None) => {
                tracing::debug!(bucket = %bucket.name, seed = ?seed, "Seed title not found")
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    bucket = %bucket.name,
                    seed = ?seed,
                    error = %e,
                    "Seed resolution failed"
                );
            }
        }
    }

    if attempts > 0 && failures == attempts {
        return Err(AppError::UpstreamResolution(format!(
            "all {} lookups failed for bucket {}",
            attempts, bucket.name
        )));
    }

    Ok(movies)
}

/// Takes up to `per_bucket` random movies from each bucket, then shuffles the
/// union and caps it at `limit`. The pool itself is untouched.
pub fn sample_display<R: Rng + ?Sized>(
    pool: &CataloguePool,
    per_bucket: usize,
    limit: usize,
    rng: &mut R,
) -> Vec<Movie> {
    let mut sample: Vec<Movie> = Vec::new();

    for movies in pool.grouped_by_bucket.values() {
        let picked = movies.choose_multiple(rng, per_bucket.min(movies.len()));
        sample.extend(picked.cloned());
    }

    sample.shuffle(rng);
    sample.truncate(limit);
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemorySnapshotStore;
    use mockall::mock;
    use std::collections::{HashMap, HashSet};

    mock! {
        pub Resolver {}

        #[async_trait::async_trait]
        impl MetadataResolver for Resolver {
            async fn resolve_by_title(
                &self,
                title: &str,
                year: Option<i32>,
            ) -> AppResult<Option<Movie>>;
            async fn resolve_by_id(&self, id: u64) -> AppResult<Option<Movie>>;
            async fn discover_by_bucket(&self, bucket: &BucketSpec) -> AppResult<Vec<Movie>>;
            fn name(&self) -> &'static str;
        }
    }

    fn movie(tmdb_id: u64, genre: &str) -> Movie {
        Movie {
            id: tmdb_id,
            tmdb_id,
            title: format!("Movie {}", tmdb_id),
            year: Some(2001),
            poster_path: None,
            backdrop_path: None,
            overview: String::new(),
            genres: vec![genre.to_string()],
            rating: Some(7.5),
            list_source: String::new(),
            director: None,
            cast: Vec::new(),
            runtime: None,
            keywords: Vec::new(),
        }
    }

    fn movies(ids: std::ops::Range<u64>, genre: &str) -> Vec<Movie> {
        ids.map(|id| movie(id, genre)).collect()
    }

    /// Resolver answering from a fixed table keyed by bucket name
    struct TableResolver {
        buckets: HashMap<String, Result<Vec<Movie>, String>>,
        delay: Option<std::time::Duration>,
    }

    #[async_trait::async_trait]
    impl MetadataResolver for TableResolver {
        async fn resolve_by_title(
            &self,
            title: &str,
            _year: Option<i32>,
        ) -> AppResult<Option<Movie>> {
            Ok(Some(movie(title.len() as u64 + 1000, "Drama")))
        }

        async fn resolve_by_id(&self, id: u64) -> AppResult<Option<Movie>> {
            Ok(Some(movie(id, "Drama")))
        }

        async fn discover_by_bucket(&self, bucket: &BucketSpec) -> AppResult<Vec<Movie>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.buckets.get(&bucket.name) {
                Some(Ok(found)) => Ok(found.clone()),
                Some(Err(msg)) => Err(AppError::UpstreamResolution(msg.clone())),
                None => Ok(Vec::new()),
            }
        }

        fn name(&self) -> &'static str {
            "table"
        }
    }

    fn catalogue_with(
        resolver: impl MetadataResolver + 'static,
        snapshots: Arc<MemorySnapshotStore>,
        bucket_names: &[&str],
    ) -> Arc<CatalogueCache> {
        let buckets = bucket_names
            .iter()
            .map(|name| BucketSpec::new(name, BucketQuery::Popular))
            .collect();
        Arc::new(CatalogueCache::new(
            Arc::new(resolver),
            snapshots,
            buckets,
            CatalogueSettings {
                bucket_timeout: std::time::Duration::from_millis(200),
                ..CatalogueSettings::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_not_ready_before_build() {
        let catalogue = catalogue_with(
            TableResolver {
                buckets: HashMap::new(),
                delay: None,
            },
            Arc::new(MemorySnapshotStore::new()),
            &["Popular"],
        );

        assert!(matches!(catalogue.pool().await, Err(AppError::NotReady)));
        assert!(!catalogue.status().await.ready);
    }

    #[tokio::test]
    async fn test_build_dedups_across_buckets() {
        let mut table = HashMap::new();
        table.insert("Top Rated".to_string(), Ok(movies(0..10, "Drama")));
        table.insert("Horror".to_string(), Ok(movies(5..15, "Horror")));

        let snapshots = Arc::new(MemorySnapshotStore::new());
        let catalogue = catalogue_with(
            TableResolver {
                buckets: table,
                delay: None,
            },
            snapshots.clone(),
            &["Top Rated", "Horror"],
        );

        assert_eq!(catalogue.build().await, BuildOutcome::Built { movies: 15 });

        let pool = catalogue.pool().await.unwrap();
        let unique: HashSet<u64> = pool.movies.iter().map(|m| m.tmdb_id).collect();
        assert_eq!(unique.len(), pool.len());
        assert_eq!(pool.get(7).unwrap().list_source, "Top Rated");
        assert_eq!(pool.get(12).unwrap().list_source, "Horror");

        // Successful builds are persisted
        assert_eq!(snapshots.load().await.unwrap().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn test_failing_bucket_contributes_nothing() {
        let mut table = HashMap::new();
        table.insert("Popular".to_string(), Ok(movies(0..4, "Comedy")));
        table.insert("Horror".to_string(), Err("503 from upstream".to_string()));

        let catalogue = catalogue_with(
            TableResolver {
                buckets: table,
                delay: None,
            },
            Arc::new(MemorySnapshotStore::new()),
            &["Popular", "Horror"],
        );

        assert_eq!(catalogue.build().await, BuildOutcome::Built { movies: 4 });
        let status = catalogue.status().await;
        assert!(status.ready);
        assert_eq!(status.last_error, None);
        assert!(!status.bucket_counts.contains_key("Horror"));
    }

    #[tokio::test]
    async fn test_slow_bucket_times_out() {
        let mut table = HashMap::new();
        table.insert("Popular".to_string(), Ok(movies(0..4, "Comedy")));

        let catalogue = catalogue_with(
            TableResolver {
                buckets: table,
                delay: Some(std::time::Duration::from_secs(5)),
            },
            Arc::new(MemorySnapshotStore::new()),
            &["Popular"],
        );

        assert_eq!(catalogue.build().await, BuildOutcome::Failed);
        let status = catalogue.status().await;
        assert!(!status.ready);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_empty_build_keeps_previous_pool() {
        let previous = CataloguePool::from_buckets(
            vec![("Popular".to_string(), movies(0..3, "Drama"))],
            Utc::now(),
        );
        let catalogue = catalogue_with(
            TableResolver {
                buckets: HashMap::new(),
                delay: None,
            },
            Arc::new(MemorySnapshotStore::new()),
            &["Popular"],
        );
        catalogue.install(previous).await;

        assert_eq!(catalogue.build().await, BuildOutcome::Failed);
        assert_eq!(catalogue.pool().await.unwrap().len(), 3);
        assert!(catalogue.status().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_fallback_strategy_used_when_all_buckets_fail() {
        let mut resolver = MockResolver::new();
        resolver.expect_name().return_const("mock");
        resolver
            .expect_discover_by_bucket()
            .returning(|bucket| match bucket.query {
                BucketQuery::Discover { .. } => Ok(vec![movie(1, "Drama"), movie(2, "Comedy")]),
                _ => Err(AppError::UpstreamResolution("scrape blocked".to_string())),
            });

        let catalogue = Arc::new(
            CatalogueCache::new(
                Arc::new(resolver),
                Arc::new(MemorySnapshotStore::new()),
                vec![BucketSpec::new("Top Rated", BucketQuery::TopRated)],
                CatalogueSettings::default(),
            )
            .with_fallback_buckets(vec![BucketSpec::new(
                "Popular",
                BucketQuery::Discover {
                    sort_by: "popularity.desc".to_string(),
                    min_votes: 1000,
                },
            )]),
        );

        assert_eq!(catalogue.build().await, BuildOutcome::Built { movies: 2 });
        let pool = catalogue.pool().await.unwrap();
        assert!(pool.movies.iter().all(|m| m.list_source == "Popular"));
    }

    #[tokio::test]
    async fn test_seed_titles_resolved_individually() {
        let mut resolver = MockResolver::new();
        resolver.expect_name().return_const("mock");
        resolver.expect_discover_by_bucket().never();
        resolver
            .expect_resolve_by_title()
            .withf(|title, year| title.to_string() == "Heat" && *year == Some(1995))
            .times(1)
            .returning(|_, _| Ok(Some(movie(949, "Crime"))));
        resolver
            .expect_resolve_by_id()
            .times(1)
            .returning(|_| Ok(None));

        let bucket = BucketSpec::new("Staff Picks", BucketQuery::SeedsOnly).with_seeds(vec![
            SeedTitle::ByTitle {
                title: "Heat".to_string(),
                year: Some(1995),
            },
            SeedTitle::ById(42),
        ]);

        let found = resolve_bucket(&resolver, &bucket).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tmdb_id, 949);
    }

    #[tokio::test]
    async fn test_initialize_uses_fresh_snapshot_without_building() {
        let snapshot = CataloguePool::from_buckets(
            vec![("Popular".to_string(), movies(0..6, "Drama"))],
            Utc::now(),
        );

        let mut resolver = MockResolver::new();
        resolver.expect_name().return_const("mock");
        resolver.expect_discover_by_bucket().never();

        let catalogue = catalogue_with(
            resolver,
            Arc::new(MemorySnapshotStore::with_snapshot(snapshot)),
            &["Popular"],
        );
        catalogue.initialize().await;

        let status = catalogue.status().await;
        assert!(status.ready);
        assert_eq!(status.movie_count, 6);
    }

    #[tokio::test]
    async fn test_initialize_stale_snapshot_serves_then_refreshes() {
        let stale_at = Utc::now() - Duration::hours(48);
        let snapshot = CataloguePool::from_buckets(
            vec![("Popular".to_string(), movies(0..3, "Drama"))],
            stale_at,
        );

        let mut table = HashMap::new();
        table.insert("Popular".to_string(), Ok(movies(100..110, "Comedy")));

        let catalogue = catalogue_with(
            TableResolver {
                buckets: table,
                delay: Some(std::time::Duration::from_millis(20)),
            },
            Arc::new(MemorySnapshotStore::with_snapshot(snapshot)),
            &["Popular"],
        );
        catalogue.initialize().await;

        // Stale data is served immediately
        assert!(catalogue.is_ready().await);

        let mut refreshed = false;
        for _ in 0..50 {
            if catalogue.status().await.movie_count == 10 {
                refreshed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(refreshed);
        assert!(catalogue.status().await.updated_at.unwrap() > stale_at);
    }

    #[tokio::test]
    async fn test_initialize_without_snapshot_builds() {
        let mut table = HashMap::new();
        table.insert("Popular".to_string(), Ok(movies(0..5, "Drama")));

        let catalogue = catalogue_with(
            TableResolver {
                buckets: table,
                delay: None,
            },
            Arc::new(MemorySnapshotStore::new()),
            &["Popular"],
        );
        catalogue.initialize().await;

        assert_eq!(catalogue.pool().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_build_is_skipped() {
        let mut table = HashMap::new();
        table.insert("Popular".to_string(), Ok(movies(0..5, "Drama")));

        let catalogue = catalogue_with(
            TableResolver {
                buckets: table,
                delay: Some(std::time::Duration::from_millis(50)),
            },
            Arc::new(MemorySnapshotStore::new()),
            &["Popular"],
        );

        let first = catalogue.spawn_refresh();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(catalogue.build().await, BuildOutcome::Skipped);
        assert_eq!(first.await.unwrap(), BuildOutcome::Built { movies: 5 });
    }

    #[test]
    fn test_sample_display_caps_per_bucket_and_total() {
        let pool = CataloguePool::from_buckets(
            vec![
                ("Horror".to_string(), movies(0..20, "Horror")),
                ("Comedy".to_string(), movies(20..40, "Comedy")),
                ("Indie".to_string(), movies(40..42, "Drama")),
            ],
            Utc::now(),
        );
        let mut rng = rand::thread_rng();

        let sample = sample_display(&pool, 5, 100, &mut rng);
        assert_eq!(sample.len(), 12);
        assert_eq!(sample.iter().filter(|m| m.list_source == "Horror").count(), 5);
        assert_eq!(sample.iter().filter(|m| m.list_source == "Indie").count(), 2);

        let capped = sample_display(&pool, 5, 7, &mut rng);
        assert_eq!(capped.len(), 7);

        // Sampling leaves the pool as it was
        assert_eq!(pool.len(), 42);
    }

    #[test]
    fn test_sample_display_covers_every_movie_over_many_draws() {
        let pool = CataloguePool::from_buckets(
            vec![("Horror".to_string(), movies(0..10, "Horror"))],
            Utc::now(),
        );
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::new();

        for _ in 0..200 {
            for movie in sample_display(&pool, 2, 2, &mut rng) {
                seen.insert(movie.id);
            }
        }

        assert_eq!(seen.len(), 10);
    }
}
