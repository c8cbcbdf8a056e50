use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub mod recommendation;
pub mod session;

pub use recommendation::{
    ChoiceProfile, GenreAffinity, PreferenceProfile, Recommendation, RecommendationSet,
    RejectedChoice, ReplacementRequest, WeightedChoice,
};
pub use session::{ChoiceRecord, PairFilters, PendingPair, RoundView, Session};

/// Internal movie identifier. Resolved movies reuse their TMDb id.
pub type MovieId = u64;

/// Bucket names with special meaning for pair filters
pub const TOP_RATED_SOURCE: &str = "Top Rated";
pub const POPULAR_SOURCE: &str = "Popular";
pub const STAFF_PICKS_SOURCE: &str = "Staff Picks";
pub const NEW_RELEASES_SOURCE: &str = "New Releases";
pub const INDIE_SOURCE: &str = "Indie";

/// Buckets that satisfy the "include top picks" flag
pub const TOP_PICK_SOURCES: &[&str] = &[TOP_RATED_SOURCE, POPULAR_SOURCE, STAFF_PICKS_SOURCE];

pub fn is_top_pick_source(list_source: &str) -> bool {
    TOP_PICK_SOURCES.contains(&list_source)
}

pub fn is_new_release_source(list_source: &str) -> bool {
    list_source == NEW_RELEASES_SOURCE
}

/// A resolved movie, normalized from whichever upstream produced it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movie {
    pub id: MovieId,
    /// Canonical TMDb id; two movies with the same value are the same film
    pub tmdb_id: u64,
    pub title: String,
    pub year: Option<i32>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub overview: String,
    /// Ordered, first entry is the primary genre
    #[serde(default)]
    pub genres: Vec<String>,
    pub rating: Option<f32>,
    /// Name of the bucket that produced this movie
    pub list_source: String,
    #[serde(default)]
    pub director: Option<String>,
    /// Most-billed first
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Movie {
    pub fn primary_genre(&self) -> Option<&str> {
        self.genres.first().map(String::as_str)
    }

    pub fn with_list_source(mut self, list_source: &str) -> Self {
        self.list_source = list_source.to_string();
        self
    }
}

// ============================================================================
// Catalogue Types
// ============================================================================

/// A title to resolve individually rather than through a list query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedTitle {
    ByTitle { title: String, year: Option<i32> },
    ById(u64),
}

impl SeedTitle {
    /// Parses `Title (Year)` or a bare title
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(open) = raw.rfind('(') {
            if raw.ends_with(')') {
                let inner = &raw[open + 1..raw.len() - 1];
                if let Ok(year) = inner.trim().parse::<i32>() {
                    let title = raw[..open].trim();
                    if !title.is_empty() {
                        return Some(SeedTitle::ByTitle {
                            title: title.to_string(),
                            year: Some(year),
                        });
                    }
                }
            }
        }

        Some(SeedTitle::ByTitle {
            title: raw.to_string(),
            year: None,
        })
    }
}

/// Upstream query shape used to fill a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketQuery {
    TopRated,
    Popular,
    NowPlaying,
    Genre { genre_id: u32 },
    Keyword { keyword_id: u32 },
    Discover { sort_by: String, min_votes: u32 },
    /// Only the bucket's seed titles are resolved
    SeedsOnly,
}

/// A named catalogue bucket; its name becomes each movie's `list_source`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    pub query: BucketQuery,
    #[serde(default)]
    pub seeds: Vec<SeedTitle>,
}

impl BucketSpec {
    pub fn new(name: &str, query: BucketQuery) -> Self {
        Self {
            name: name.to_string(),
            query,
            seeds: Vec::new(),
        }
    }

    pub fn with_seeds(mut self, seeds: Vec<SeedTitle>) -> Self {
        self.seeds = seeds;
        self
    }
}

/// The full deduplicated movie pool. Replaced wholesale on rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CataloguePool {
    pub movies: Vec<Movie>,
    pub grouped_by_bucket: HashMap<String, Vec<Movie>>,
    pub updated_at: DateTime<Utc>,
}

impl CataloguePool {
    /// Merges bucket results in order, keeping the first occurrence of each TMDb id
    pub fn from_buckets(buckets: Vec<(String, Vec<Movie>)>, updated_at: DateTime<Utc>) -> Self {
        let mut seen: HashSet<u64> = HashSet::new();
        let mut movies = Vec::new();
        let mut grouped_by_bucket: HashMap<String, Vec<Movie>> = HashMap::new();

        for (bucket, bucket_movies) in buckets {
            for movie in bucket_movies {
                if !seen.insert(movie.tmdb_id) {
                    continue;
                }
                let movie = movie.with_list_source(&bucket);
                grouped_by_bucket
                    .entry(bucket.clone())
                    .or_default()
                    .push(movie.clone());
                movies.push(movie);
            }
        }

        Self {
            movies,
            grouped_by_bucket,
            updated_at,
        }
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    pub fn get(&self, id: MovieId) -> Option<&Movie> {
        self.movies.iter().find(|m| m.id == id)
    }

    pub fn is_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > ttl
    }
}

/// Catalogue readiness report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogueStatus {
    pub ready: bool,
    pub building: bool,
    pub movie_count: usize,
    pub bucket_counts: HashMap<String, usize>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ============================================================================
// TMDb API Types
// ============================================================================

/// Paged list response from TMDb
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbPage<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
}

/// Movie entry as it appears in TMDb list and search results
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovie {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
    #[serde(default)]
    pub vote_average: Option<f32>,
}

impl TmdbMovie {
    pub fn into_movie(self, list_source: &str) -> Movie {
        Movie {
            id: self.id,
            tmdb_id: self.id,
            title: self.title,
            year: parse_release_year(self.release_date.as_deref()),
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            overview: self.overview.unwrap_or_default(),
            genres: self
                .genre_ids
                .iter()
                .filter_map(|id| tmdb_genre_name(*id))
                .map(str::to_string)
                .collect(),
            rating: normalize_rating(self.vote_average),
            list_source: list_source.to_string(),
            director: None,
            cast: Vec::new(),
            runtime: None,
            keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbGenre {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbCastMember {
    pub name: String,
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbCrewMember {
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbCredits {
    #[serde(default)]
    pub cast: Vec<TmdbCastMember>,
    #[serde(default)]
    pub crew: Vec<TmdbCrewMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbKeyword {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbKeywords {
    #[serde(default)]
    pub keywords: Vec<TmdbKeyword>,
}

/// Response from GET /movie/{id}?append_to_response=credits,keywords
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovieDetails {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
    #[serde(default)]
    pub vote_average: Option<f32>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub credits: Option<TmdbCredits>,
    #[serde(default)]
    pub keywords: Option<TmdbKeywords>,
}

const MAX_CAST: usize = 5;

impl TmdbMovieDetails {
    pub fn into_movie(self, list_source: &str) -> Movie {
        let credits = self.credits.unwrap_or_default();

        let director = credits
            .crew
            .iter()
            .find(|member| member.job.as_deref() == Some("Director"))
            .map(|member| member.name.clone());

        let mut cast = credits.cast;
        cast.sort_by_key(|member| member.order.unwrap_or(u32::MAX));

        Movie {
            id: self.id,
            tmdb_id: self.id,
            title: self.title,
            year: parse_release_year(self.release_date.as_deref()),
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            overview: self.overview.unwrap_or_default(),
            genres: self.genres.into_iter().map(|g| g.name).collect(),
            rating: normalize_rating(self.vote_average),
            list_source: list_source.to_string(),
            director,
            cast: cast.into_iter().take(MAX_CAST).map(|m| m.name).collect(),
            runtime: self.runtime.filter(|r| *r > 0),
            keywords: self
                .keywords
                .unwrap_or_default()
                .keywords
                .into_iter()
                .map(|k| k.name)
                .collect(),
        }
    }
}

fn parse_release_year(release_date: Option<&str>) -> Option<i32> {
    release_date
        .and_then(|date| date.get(..4))
        .and_then(|year| year.parse().ok())
}

/// TMDb reports 0.0 for unrated titles
fn normalize_rating(vote_average: Option<f32>) -> Option<f32> {
    vote_average.filter(|r| *r > 0.0 && *r <= 10.0)
}

/// TMDb's fixed movie genre table
pub fn tmdb_genre_name(id: u32) -> Option<&'static str> {
    let name = match id {
        28 => "Action",
        12 => "Adventure",
        16 => "Animation",
        35 => "Comedy",
        80 => "Crime",
        99 => "Documentary",
        18 => "Drama",
        10751 => "Family",
        14 => "Fantasy",
        36 => "History",
        27 => "Horror",
        10402 => "Music",
        9648 => "Mystery",
        10749 => "Romance",
        878 => "Science Fiction",
        10770 => "TV Movie",
        53 => "Thriller",
        10752 => "War",
        37 => "Western",
        _ => return None,
    };
    Some(name)
}
