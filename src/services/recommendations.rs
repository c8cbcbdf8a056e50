use std::collections::BTreeSet;
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    models::{
        ChoiceProfile, MovieId, Recommendation, RecommendationSet, RejectedChoice,
        ReplacementRequest, Session, WeightedChoice,
    },
    services::session_engine::SessionEngine,
};

/// Weight applied to picks made after the session midpoint
///
/// The midpoint is taken over the rounds actually played, skips included, so
/// a skipped round pushes the midpoint later.
pub const LATE_ROUND_WEIGHT: f32 = 1.5;

/// Produces recommendations from a completed session's choices
#[async_trait::async_trait]
pub trait Recommender: Send + Sync {
    /// Full recommendation set for a completed session
    async fn generate(&self, profile: &ChoiceProfile) -> AppResult<RecommendationSet>;

    /// Exactly one substitute outside `request.exclude_ids`, or `NoMoreCandidates`
    async fn replace(&self, request: &ReplacementRequest) -> AppResult<Recommendation>;

    fn name(&self) -> &'static str;
}

pub fn recency_weight(round: u32, total_rounds: u32) -> f32 {
    if round as f32 > total_rounds as f32 / 2.0 {
        LATE_ROUND_WEIGHT
    } else {
        1.0
    }
}

/// Ordered, weighted view of a completed session
///
/// Derived only from `session.choices`, so calling it twice on the same
/// session yields the same profile.
pub fn build_profile(session: &Session) -> AppResult<ChoiceProfile> {
    if !session.is_complete {
        return Err(AppError::SessionIncomplete);
    }

    let total_rounds = session.total_rounds;
    let chosen = session
        .choices
        .iter()
        .map(|choice| WeightedChoice {
            round: choice.round,
            movie: choice.chosen().clone(),
            weight: recency_weight(choice.round, total_rounds),
        })
        .collect();

    let rejected = session
        .choices
        .iter()
        .map(|choice| RejectedChoice {
            round: choice.round,
            movie: choice.rejected().clone(),
            lost_to: choice.chosen().clone(),
        })
        .collect();

    Ok(ChoiceProfile {
        session_id: session.id.clone(),
        total_rounds,
        chosen,
        rejected,
    })
}

/// Request for one substitute, excluding the caller's ids and every movie the
/// session already showed
pub fn replacement_request(
    profile: ChoiceProfile,
    exclude_ids: impl IntoIterator<Item = MovieId>,
) -> ReplacementRequest {
    let mut excluded: BTreeSet<MovieId> = exclude_ids.into_iter().collect();
    excluded.extend(profile.shown_ids());

    ReplacementRequest {
        profile,
        exclude_ids: excluded,
    }
}

/// Connects completed sessions to a [`Recommender`]
///
/// The recommender call happens outside any session mutation; only the finished
/// set is written back.
pub struct RecommendationService {
    sessions: Arc<SessionEngine>,
    recommender: Arc<dyn Recommender>,
}

impl RecommendationService {
    pub fn new(sessions: Arc<SessionEngine>, recommender: Arc<dyn Recommender>) -> Self {
        Self {
            sessions,
            recommender,
        }
    }

    /// Generates once per session, then serves the memoized set
    pub async fn recommendations(&self, session_id: &str) -> AppResult<RecommendationSet> {
        if let Some(set) = self.sessions.recommendations(session_id)? {
            return Ok(set);
        }

        let session = self.sessions.session(session_id)?;
        let profile = build_profile(&session)?;

        let set = self.recommender.generate(&profile).await?;
        tracing::info!(
            session_id = %session_id,
            recommender = self.recommender.name(),
            count = set.recommendations.len(),
            "Recommendations generated"
        );

        self.sessions.store_recommendations(session_id, set)
    }

    /// One substitute for a "seen it" action; session state is left untouched
    pub async fn replace(
        &self,
        session_id: &str,
        exclude_ids: Vec<MovieId>,
    ) -> AppResult<Recommendation> {
        let session = self.sessions.session(session_id)?;
        let profile = build_profile(&session)?;

        let already_recommended = self
            .sessions
            .recommendations(session_id)?
            .map(|set| {
                set.recommendations
                    .into_iter()
                    .map(|r| r.movie.id)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let request = replacement_request(
            profile,
            exclude_ids.into_iter().chain(already_recommended),
        );

        tracing::debug!(
            session_id = %session_id,
            excluded = request.exclude_ids.len(),
            "Requesting replacement"
        );

        self.recommender.replace(&request).await
    }
}
