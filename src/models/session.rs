use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Movie, MovieId};

/// Filters chosen at session start, applied when building each pair
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairFilters {
    /// Genre names or bucket names (e.g. "Horror", "Indie")
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub include_top_picks: bool,
    #[serde(default)]
    pub include_new_releases: bool,
}

impl PairFilters {
    /// True when nothing was requested, meaning every movie matches
    pub fn is_empty(&self) -> bool {
        self.genres.is_empty() && !self.include_top_picks && !self.include_new_releases
    }
}

/// One completed round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChoiceRecord {
    pub round: u32,
    pub left_movie: Movie,
    pub right_movie: Movie,
    pub chosen_movie_id: MovieId,
}

impl ChoiceRecord {
    pub fn chosen(&self) -> &Movie {
        if self.left_movie.id == self.chosen_movie_id {
            &self.left_movie
        } else {
            &self.right_movie
        }
    }

    pub fn rejected(&self) -> &Movie {
        if self.left_movie.id == self.chosen_movie_id {
            &self.right_movie
        } else {
            &self.left_movie
        }
    }
}

/// The two movies currently offered for a session's active round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPair {
    pub round: u32,
    pub left: Movie,
    pub right: Movie,
}

impl PendingPair {
    pub fn contains(&self, movie_id: MovieId) -> bool {
        self.left.id == movie_id || self.right.id == movie_id
    }
}

/// Per-session game state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    /// 1-based
    pub current_round: u32,
    /// Base rounds plus one per skip
    pub total_rounds: u32,
    /// Rounds requested at creation, before any skip
    pub base_total_rounds: u32,
    pub choices: Vec<ChoiceRecord>,
    pub is_complete: bool,
    pub filters: PairFilters,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, filters: PairFilters, total_rounds: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            current_round: 1,
            total_rounds,
            base_total_rounds: total_rounds,
            choices: Vec::new(),
            is_complete: false,
            filters,
            created_at: now,
        }
    }

    pub fn choices_made(&self) -> usize {
        self.choices.len()
    }

    /// Fraction of the original round count completed, never moves backward on skip
    pub fn progress(&self) -> f64 {
        if self.base_total_rounds == 0 {
            return 1.0;
        }
        (self.choices.len() as f64 / self.base_total_rounds as f64).min(1.0)
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > ttl
    }

    /// Picked movies in round order
    pub fn chosen_movies(&self) -> Vec<Movie> {
        self.choices.iter().map(|c| c.chosen().clone()).collect()
    }

    /// Passed-on movies in round order
    pub fn rejected_movies(&self) -> Vec<Movie> {
        self.choices.iter().map(|c| c.rejected().clone()).collect()
    }
}

/// What a client sees for the active round
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoundView {
    pub session_id: String,
    pub round: u32,
    pub total_rounds: u32,
    pub base_total_rounds: u32,
    pub choices_made: usize,
    pub progress: f64,
    pub left_movie: Option<Movie>,
    pub right_movie: Option<Movie>,
    pub is_complete: bool,
}

impl RoundView {
    pub fn new(session: &Session, pair: Option<&PendingPair>) -> Self {
        Self {
            session_id: session.id.clone(),
            round: session.current_round,
            total_rounds: session.total_rounds,
            base_total_rounds: session.base_total_rounds,
            choices_made: session.choices_made(),
            progress: session.progress(),
            left_movie: pair.map(|p| p.left.clone()),
            right_movie: pair.map(|p| p.right.clone()),
            is_complete: session.is_complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: MovieId) -> Movie {
        Movie {
            id,
            tmdb_id: id,
            title: format!("Movie {}", id),
            year: None,
            poster_path: None,
            backdrop_path: None,
            overview: String::new(),
            genres: Vec::new(),
            rating: None,
            list_source: "Popular".to_string(),
            director: None,
            cast: Vec::new(),
            runtime: None,
            keywords: Vec::new(),
        }
    }

    #[test]
    fn test_choice_record_sides() {
        let record = ChoiceRecord {
            round: 1,
            left_movie: movie(1),
            right_movie: movie(2),
            chosen_movie_id: 2,
        };
        assert_eq!(record.chosen().id, 2);
        assert_eq!(record.rejected().id, 1);
    }

    #[test]
    fn test_progress_uses_base_rounds() {
        let mut session = Session::new("s".to_string(), PairFilters::default(), 4, Utc::now());
        session.total_rounds = 6;
        session.choices.push(ChoiceRecord {
            round: 1,
            left_movie: movie(1),
            right_movie: movie(2),
            chosen_movie_id: 1,
        });
        assert_eq!(session.progress(), 0.25);
    }

    #[test]
    fn test_filters_empty() {
        assert!(PairFilters::default().is_empty());
        assert!(!PairFilters {
            include_new_releases: true,
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let session = Session::new(
            "s".to_string(),
            PairFilters::default(),
            7,
            now - Duration::minutes(61),
        );
        assert!(session.is_expired(Duration::hours(1), now));
        assert!(!session.is_expired(Duration::hours(2), now));
    }
}
