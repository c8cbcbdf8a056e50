//! Pair selection with a filter relaxation cascade.
//!
//! Each [`MatchStage`] is a predicate over a movie and the session filters.
//! Stages run from strictest to loosest and the first one leaving at least two
//! unseen movies supplies the pair.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

use crate::models::{
    is_new_release_source, is_top_pick_source, CataloguePool, Movie, MovieId, PairFilters,
};

/// How many leading genres the strict stage looks at
const STRICT_GENRE_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    /// Primary genres, bucket names and provenance flags
    Strict,
    /// Same as strict but over every genre
    Relaxed,
    /// Ignores filters entirely
    Fallback,
}

impl MatchStage {
    pub const CASCADE: [MatchStage; 3] =
        [MatchStage::Strict, MatchStage::Relaxed, MatchStage::Fallback];

    pub fn name(&self) -> &'static str {
        match self {
            MatchStage::Strict => "strict",
            MatchStage::Relaxed => "relaxed",
            MatchStage::Fallback => "fallback",
        }
    }

    pub fn matches(&self, movie: &Movie, filters: &PairFilters) -> bool {
        match self {
            MatchStage::Strict => matches_filters(movie, filters, STRICT_GENRE_DEPTH),
            MatchStage::Relaxed => matches_filters(movie, filters, usize::MAX),
            MatchStage::Fallback => true,
        }
    }
}

/// Bucket and flag matches are OR'd with genre matches, never AND'd
fn matches_filters(movie: &Movie, filters: &PairFilters, genre_depth: usize) -> bool {
    if filters.is_empty() {
        return true;
    }

    let genre_match = movie
        .genres
        .iter()
        .take(genre_depth)
        .any(|genre| filters.genres.iter().any(|f| f.eq_ignore_ascii_case(genre)));

    // Bucket names such as "Indie" are requested through the genre list
    let bucket_match = filters
        .genres
        .iter()
        .any(|f| f.eq_ignore_ascii_case(&movie.list_source));

    let top_pick_match = filters.include_top_picks && is_top_pick_source(&movie.list_source);
    let new_release_match =
        filters.include_new_releases && is_new_release_source(&movie.list_source);

    genre_match || bucket_match || top_pick_match || new_release_match
}

/// Two distinct movies and the stage that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedPair {
    pub left: Movie,
    pub right: Movie,
    pub stage: MatchStage,
}

/// Picks two unseen movies, relaxing filters until enough candidates remain
#[derive(Debug, Clone)]
pub struct PairSelector {
    stages: Vec<MatchStage>,
}

impl Default for PairSelector {
    fn default() -> Self {
        Self {
            stages: MatchStage::CASCADE.to_vec(),
        }
    }
}

impl PairSelector {
    pub fn new(stages: Vec<MatchStage>) -> Self {
        Self { stages }
    }

    /// Movies the stage accepts that are not excluded, unique by id
    pub fn eligible<'a>(
        stage: MatchStage,
        pool: &'a CataloguePool,
        exclude_ids: &HashSet<MovieId>,
        filters: &PairFilters,
    ) -> Vec<&'a Movie> {
        let mut seen = HashSet::new();
        pool.movies
            .iter()
            .filter(|m| !exclude_ids.contains(&m.id))
            .filter(|m| stage.matches(m, filters))
            .filter(|m| seen.insert(m.id))
            .collect()
    }

    pub fn select_pair(
        &self,
        pool: &CataloguePool,
        exclude_ids: &HashSet<MovieId>,
        filters: &PairFilters,
    ) -> Option<SelectedPair> {
        self.select_pair_with(pool, exclude_ids, filters, &mut rand::thread_rng())
    }

    /// Returns `None` only when even the loosest stage has fewer than two movies
    pub fn select_pair_with<R: Rng + ?Sized>(
        &self,
        pool: &CataloguePool,
        exclude_ids: &HashSet<MovieId>,
        filters: &PairFilters,
        rng: &mut R,
    ) -> Option<SelectedPair> {
        for stage in &self.stages {
            let mut candidates = Self::eligible(*stage, pool, exclude_ids, filters);

            if candidates.len() < 2 {
                tracing::debug!(
                    stage = stage.name(),
                    candidates = candidates.len(),
                    "Not enough candidates, relaxing filters"
                );
                continue;
            }

            let (picked, _) = candidates.partial_shuffle(rng, 2);
            let pair = SelectedPair {
                left: picked[0].clone(),
                right: picked[1].clone(),
                stage: *stage,
            };

            if *stage != MatchStage::Strict {
                tracing::info!(
                    stage = stage.name(),
                    genres = ?filters.genres,
                    "Pair selected after relaxing filters"
                );
            }

            return Some(pair);
        }

        tracing::warn!(
            pool = pool.len(),
            excluded = exclude_ids.len(),
            "Pool exhausted, no pair available"
        );
        None
    }
}
