use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Movie, MovieId};

/// A picked movie with its round and recency weight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightedChoice {
    pub round: u32,
    pub movie: Movie,
    pub weight: f32,
}

/// A passed-on movie and the movie it lost to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedChoice {
    pub round: u32,
    pub movie: Movie,
    pub lost_to: Movie,
}

/// Everything the recommender needs from a completed session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChoiceProfile {
    pub session_id: String,
    pub total_rounds: u32,
    pub chosen: Vec<WeightedChoice>,
    pub rejected: Vec<RejectedChoice>,
}

impl ChoiceProfile {
    /// Ids of every movie that appeared on either side of a completed round
    pub fn shown_ids(&self) -> BTreeSet<MovieId> {
        self.chosen
            .iter()
            .map(|c| c.movie.id)
            .chain(self.rejected.iter().map(|r| r.movie.id))
            .collect()
    }
}

/// A request for exactly one substitute recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplacementRequest {
    pub profile: ChoiceProfile,
    pub exclude_ids: BTreeSet<MovieId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub movie: Movie,
    pub score: f32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenreAffinity {
    pub genre: String,
    pub score: f32,
}

/// Summary of the taste a session revealed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferenceProfile {
    pub top_genres: Vec<GenreAffinity>,
    pub favorite_directors: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationSet {
    pub recommendations: Vec<Recommendation>,
    pub preference_profile: PreferenceProfile,
}
