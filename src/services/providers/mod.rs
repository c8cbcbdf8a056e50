/// Movie metadata provider abstraction
///
/// The catalogue never sees raw upstream shapes. Every provider normalizes its
/// responses into [`Movie`] before returning, and callers treat any error as a
/// partial failure of the bucket being resolved.
use crate::{
    error::AppResult,
    models::{BucketSpec, Movie},
};

pub mod tmdb;

pub use tmdb::TmdbResolver;

/// Resolves titles and bucket queries into normalized movies
#[async_trait::async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Best match for a title, optionally narrowed by release year
    async fn resolve_by_title(&self, title: &str, year: Option<i32>) -> AppResult<Option<Movie>>;

    /// Full record for a known id, including credits and keywords when available
    async fn resolve_by_id(&self, id: u64) -> AppResult<Option<Movie>>;

    /// Every movie the bucket's query yields, tagged with the bucket name
    ///
    /// Seed titles are not handled here; the catalogue resolves those one by one.
    async fn discover_by_bucket(&self, bucket: &BucketSpec) -> AppResult<Vec<Movie>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
