/// TMDb metadata provider
///
/// API Flow:
/// 1. Title lookup: /search/movie → first result, preferring an exact year match
/// 2. Details: /movie/{id}?append_to_response=credits,keywords
/// 3. Buckets: /movie/top_rated, /movie/popular, /movie/now_playing and
///    /discover/movie for genre, keyword and popularity queries
use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{BucketQuery, BucketSpec, Movie, TmdbMovie, TmdbMovieDetails, TmdbPage},
    services::providers::MetadataResolver,
};
use reqwest::{Client as HttpClient, StatusCode};

const TITLE_CACHE_TTL: u64 = 86400; // 1 day
const DETAILS_CACHE_TTL: u64 = 604800; // 1 week
const PAGE_CACHE_TTL: u64 = 21600; // 6 hours

#[derive(Clone)]
pub struct TmdbResolver {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    cache: Cache,
    pages_per_bucket: u32,
}

impl TmdbResolver {
    pub fn new(cache: Cache, api_key: String, api_url: String, pages_per_bucket: u32) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            cache,
            pages_per_bucket: pages_per_bucket.max(1),
        }
    }

    /// Path and extra query parameters for a bucket query
    fn endpoint_for(query: &BucketQuery) -> Option<(&'static str, Vec<(&'static str, String)>)> {
        let endpoint = match query {
            BucketQuery::TopRated => ("/movie/top_rated", vec![]),
            BucketQuery::Popular => ("/movie/popular", vec![]),
            BucketQuery::NowPlaying => ("/movie/now_playing", vec![]),
            BucketQuery::Genre { genre_id } => (
                "/discover/movie",
                vec![
                    ("with_genres", genre_id.to_string()),
                    ("sort_by", "vote_average.desc".to_string()),
                    ("vote_count.gte", "500".to_string()),
                ],
            ),
            BucketQuery::Keyword { keyword_id } => (
                "/discover/movie",
                vec![
                    ("with_keywords", keyword_id.to_string()),
                    ("sort_by", "vote_average.desc".to_string()),
                    ("vote_count.gte", "200".to_string()),
                ],
            ),
            BucketQuery::Discover { sort_by, min_votes } => (
                "/discover/movie",
                vec![
                    ("sort_by", sort_by.clone()),
                    ("vote_count.gte", min_votes.to_string()),
                ],
            ),
            BucketQuery::SeedsOnly => return None,
        };
        Some(endpoint)
    }

    /// Issues a GET against TMDb and decodes the JSON body
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> AppResult<T> {
        self.find_json(path, params).await?.ok_or_else(|| {
            AppError::UpstreamResolution(format!("TMDb returned status 404 Not Found for {}", path))
        })
    }

    /// Like `get_json`, but a 404 from TMDb is `Ok(None)`
    async fn find_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> AppResult<Option<T>> {
        let url = format!("{}{}", self.api_url, path);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", "en-US")])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return match status_failure(status, path, &body) {
                Some(e) => Err(e),
                None => Ok(None),
            };
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map(Some).map_err(|e| {
            tracing::error!(error = %e, path = %path, "Failed to deserialize TMDb response");
            AppError::UpstreamResolution(format!("Failed to parse TMDb response: {}", e))
        })
    }

    async fn fetch_page(&self, bucket: &BucketSpec, page: u32) -> AppResult<Vec<Movie>> {
        let Some((path, mut params)) = Self::endpoint_for(&bucket.query) else {
            return Ok(Vec::new());
        };
        params.push(("page", page.to_string()));

        cached!(
            self.cache,
            CacheKey::BucketPage {
                bucket: bucket.name.clone(),
                page,
            },
            PAGE_CACHE_TTL,
            async {
                let page: TmdbPage<TmdbMovie> = self.get_json(path, &params).await?;
                let movies: Vec<Movie> = page
                    .results
                    .into_iter()
                    .map(|m| m.into_movie(&bucket.name))
                    .collect();
                Ok::<_, AppError>(movies)
            }
        )
    }
}

/// Error for a non-success status; `None` only when TMDb reports the
/// resource missing, which callers may cache as absent
fn status_failure(status: StatusCode, path: &str, body: &str) -> Option<AppError> {
    if status == StatusCode::NOT_FOUND {
        return None;
    }
    Some(AppError::UpstreamResolution(format!(
        "TMDb returned status {} for {}: {}",
        status, path, body
    )))
}

/// Prefers a result whose release year matches, otherwise the first hit
fn pick_search_result(results: Vec<TmdbMovie>, year: Option<i32>) -> Option<TmdbMovie> {
    let wanted = year.map(|y| y.to_string());
    let exact = wanted.as_ref().and_then(|y| {
        results.iter().position(|m| {
            m.release_date
                .as_deref()
                .is_some_and(|date| date.starts_with(y.as_str()))
        })
    });

    let index = exact.unwrap_or(0);
    results.into_iter().nth(index)
}

#[async_trait::async_trait]
impl MetadataResolver for TmdbResolver {
    async fn resolve_by_title(&self, title: &str, year: Option<i32>) -> AppResult<Option<Movie>> {
        if title.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Title lookup cannot be empty".to_string(),
            ));
        }

        cached!(
            self.cache,
            CacheKey::TitleLookup {
                title: title.to_string(),
                year,
            },
            TITLE_CACHE_TTL,
            async {
                let mut params = vec![("query", title.to_string())];
                if let Some(year) = year {
                    params.push(("year", year.to_string()));
                }

                let page: TmdbPage<TmdbMovie> = self.get_json("/search/movie", &params).await?;
                let movie = pick_search_result(page.results, year).map(|m| m.into_movie(""));

                tracing::debug!(
                    title = %title,
                    year = ?year,
                    found = movie.is_some(),
                    provider = "tmdb",
                    "Title lookup completed"
                );

                Ok::<_, AppError>(movie)
            }
        )
    }

    async fn resolve_by_id(&self, id: u64) -> AppResult<Option<Movie>> {
        cached!(
            self.cache,
            CacheKey::MovieDetails(id),
            DETAILS_CACHE_TTL,
            async {
                let path = format!("/movie/{}", id);
                let params = vec![("append_to_response", "credits,keywords".to_string())];

                let details = self.find_json::<TmdbMovieDetails>(&path, &params).await?;
                if details.is_none() {
                    tracing::debug!(id = id, "TMDb has no movie with this id");
                }
                Ok::<_, AppError>(details.map(|d| d.into_movie("")))
            }
        )
    }

    async fn discover_by_bucket(&self, bucket: &BucketSpec) -> AppResult<Vec<Movie>> {
        let mut movies = Vec::new();

        for page in 1..=self.pages_per_bucket {
            match self.fetch_page(bucket, page).await {
                Ok(page_movies) if page_movies.is_empty() => break,
                Ok(page_movies) => movies.extend(page_movies),
                // Later pages failing still leaves the earlier ones usable
                Err(e) if !movies.is_empty() => {
                    tracing::warn!(
                        error = %e,
                        bucket = %bucket.name,
                        page = page,
                        "Bucket page failed"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            bucket = %bucket.name,
            movies = movies.len(),
            provider = "tmdb",
            "Bucket discovered"
        );

        Ok(movies)
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}
