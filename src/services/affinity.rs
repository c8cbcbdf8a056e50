//! Deterministic recommender scoring catalogue movies against a session's picks.
//!
//! Score for a candidate:
//! - each of its genres adds the learned affinity for that genre, doubled for
//!   the candidate's primary genre
//! - a director the user picked adds [`DIRECTOR_BONUS`]
//! - rating adds a tenth of its value, enough to break ties

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    models::{
        ChoiceProfile, GenreAffinity, Movie, MovieId, PreferenceProfile, Recommendation,
        RecommendationSet, ReplacementRequest,
    },
    services::{catalogue::CatalogueCache, recommendations::Recommender},
};

const PRIMARY_GENRE_FACTOR: f32 = 2.0;
const REJECTED_GENRE_PENALTY: f32 = 0.5;
const DIRECTOR_BONUS: f32 = 2.0;
const TOP_GENRE_COUNT: usize = 3;

/// Genre and director preferences learned from one session
#[derive(Debug, Clone, Default)]
pub struct TasteModel {
    genre_scores: HashMap<String, f32>,
    directors: HashSet<String>,
}

impl TasteModel {
    pub fn from_profile(profile: &ChoiceProfile) -> Self {
        let mut genre_scores: HashMap<String, f32> = HashMap::new();
        let mut directors = HashSet::new();

        for choice in &profile.chosen {
            for (index, genre) in choice.movie.genres.iter().enumerate() {
                let factor = if index == 0 { PRIMARY_GENRE_FACTOR } else { 1.0 };
                *genre_scores.entry(genre.clone()).or_default() += choice.weight * factor;
            }
            if let Some(director) = &choice.movie.director {
                directors.insert(director.clone());
            }
        }

        let rejected_only: BTreeSet<&String> = profile
            .rejected
            .iter()
            .flat_map(|r| r.movie.genres.iter())
            .filter(|genre| !genre_scores.contains_key(*genre))
            .collect();
        for genre in rejected_only {
            *genre_scores.entry(genre.clone()).or_default() -= REJECTED_GENRE_PENALTY;
        }

        Self {
            genre_scores,
            directors,
        }
    }

    pub fn score(&self, movie: &Movie) -> f32 {
        let genre_score: f32 = movie
            .genres
            .iter()
            .enumerate()
            .map(|(index, genre)| {
                let factor = if index == 0 { PRIMARY_GENRE_FACTOR } else { 1.0 };
                self.genre_scores.get(genre).copied().unwrap_or(0.0) * factor
            })
            .sum();

        let director_score = match &movie.director {
            Some(director) if self.directors.contains(director) => DIRECTOR_BONUS,
            _ => 0.0,
        };

        genre_score + director_score + movie.rating.unwrap_or(0.0) / 10.0
    }

    /// Positive genre affinities, strongest first
    pub fn top_genres(&self, limit: usize) -> Vec<GenreAffinity> {
        let mut genres: Vec<GenreAffinity> = self
            .genre_scores
            .iter()
            .filter(|(_, score)| **score > 0.0)
            .map(|(genre, score)| GenreAffinity {
                genre: genre.clone(),
                score: *score,
            })
            .collect();

        genres.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.genre.cmp(&b.genre))
        });
        genres.truncate(limit);
        genres
    }

    fn reason_for(&self, movie: &Movie) -> String {
        if let Some(director) = movie
            .director
            .as_ref()
            .filter(|d| self.directors.contains(*d))
        {
            return format!("Directed by {}, like one of your picks", director);
        }

        let shared: Vec<&str> = movie
            .genres
            .iter()
            .filter(|g| self.genre_scores.get(*g).is_some_and(|s| *s > 0.0))
            .map(String::as_str)
            .take(2)
            .collect();

        match shared.as_slice() {
            [] => "Highly rated pick outside your usual genres".to_string(),
            [one] => format!("Matches your taste for {}", one),
            [first, second, ..] => format!("Matches your taste for {} and {}", first, second),
        }
    }
}

fn summarize(top_genres: &[GenreAffinity]) -> String {
    let names: Vec<&str> = top_genres.iter().map(|g| g.genre.as_str()).collect();
    match names.as_slice() {
        [] => "Your picks span many genres".to_string(),
        [one] => format!("You lean towards {}", one),
        [init @ .., last] => format!("You lean towards {} and {}", init.join(", "), last),
    }
}

/// Ranks unseen catalogue movies, best first
fn rank<'a>(
    model: &TasteModel,
    movies: &'a [Movie],
    exclude_ids: &BTreeSet<MovieId>,
) -> Vec<(&'a Movie, f32)> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<(&Movie, f32)> = movies
        .iter()
        .filter(|m| !exclude_ids.contains(&m.id))
        .filter(|m| seen.insert(m.id))
        .map(|m| (m, model.score(m)))
        .collect();

    ranked.sort_by(|(a, a_score), (b, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

/// Recommends from the live catalogue pool
pub struct GenreAffinityRecommender {
    catalogue: Arc<CatalogueCache>,
    count: usize,
}

impl GenreAffinityRecommender {
    pub fn new(catalogue: Arc<CatalogueCache>, count: usize) -> Self {
        Self {
            catalogue,
            count: count.max(1),
        }
    }

    fn recommend(model: &TasteModel, movie: &Movie, score: f32) -> Recommendation {
        Recommendation {
            movie: movie.clone(),
            score,
            reason: model.reason_for(movie),
        }
    }
}

#[async_trait::async_trait]
impl Recommender for GenreAffinityRecommender {
    async fn generate(&self, profile: &ChoiceProfile) -> AppResult<RecommendationSet> {
        let pool = self.catalogue.pool().await?;
        let model = TasteModel::from_profile(profile);

        let recommendations: Vec<Recommendation> = rank(&model, &pool.movies, &profile.shown_ids())
            .into_iter()
            .take(self.count)
            .map(|(movie, score)| Self::recommend(&model, movie, score))
            .collect();

        let top_genres = model.top_genres(TOP_GENRE_COUNT);
        let mut favorite_directors: Vec<String> = model.directors.iter().cloned().collect();
        favorite_directors.sort();

        Ok(RecommendationSet {
            recommendations,
            preference_profile: PreferenceProfile {
                summary: summarize(&top_genres),
                top_genres,
                favorite_directors,
            },
        })
    }

    async fn replace(&self, request: &ReplacementRequest) -> AppResult<Recommendation> {
        let pool = self.catalogue.pool().await?;
        let model = TasteModel::from_profile(&request.profile);

        rank(&model, &pool.movies, &request.exclude_ids)
            .into_iter()
            .next()
            .map(|(movie, score)| Self::recommend(&model, movie, score))
            .ok_or(AppError::NoMoreCandidates)
    }

    fn name(&self) -> &'static str {
        "genre_affinity"
    }
}
