use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        CataloguePool, ChoiceRecord, Movie, MovieId, PairFilters, PendingPair, RecommendationSet,
        RoundView, Session,
    },
    services::pair_selector::PairSelector,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Base rounds per session, before skips
    pub total_rounds: u32,
    /// Lifetime measured from creation
    pub ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            total_rounds: 7,
            ttl: Duration::hours(1),
        }
    }
}

/// Everything stored per session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session: Session,
    /// Pair offered for `session.current_round`, if generated
    pub pending: Option<PendingPair>,
    /// Every movie offered so far, including pairs that were skipped
    pub shown_ids: HashSet<MovieId>,
    /// Memoized output of the recommender
    pub recommendations: Option<RecommendationSet>,
}

impl SessionRecord {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            pending: None,
            shown_ids: HashSet::new(),
            recommendations: None,
        }
    }
}

/// Storage for session records
///
/// `update` runs its closure while the record is exclusively held, so a
/// validate-then-commit closure can never interleave with another update of
/// the same session.
pub trait SessionStore: Send + Sync {
    fn insert(&self, record: SessionRecord) -> AppResult<()>;

    fn get(&self, id: &str) -> AppResult<Option<SessionRecord>>;

    /// Fails with `SessionNotFound` when the id is unknown
    fn update<T, F>(&self, id: &str, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut SessionRecord) -> AppResult<T>;

    /// Drops every record the predicate rejects, returning how many were dropped
    fn retain<F>(&self, keep: F) -> AppResult<usize>
    where
        F: Fn(&SessionRecord) -> bool;

    fn len(&self) -> AppResult<usize>;
}

/// Process-local session store
///
/// The map lock is only held to find or replace an entry; each record has its
/// own lock, so updates to different sessions run in parallel.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionRecord>>>>,
}

type Sessions = HashMap<String, Arc<Mutex<SessionRecord>>>;

fn poisoned<E: std::fmt::Display>(e: E) -> AppError {
    AppError::Internal(format!("Session store lock poisoned: {}", e))
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, Sessions>> {
        self.sessions.read().map_err(poisoned)
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, Sessions>> {
        self.sessions.write().map_err(poisoned)
    }

    fn entry(&self, id: &str) -> AppResult<Option<Arc<Mutex<SessionRecord>>>> {
        Ok(self.read()?.get(id).cloned())
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, record: SessionRecord) -> AppResult<()> {
        let id = record.session.id.clone();
        self.write()?.insert(id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    fn get(&self, id: &str) -> AppResult<Option<SessionRecord>> {
        match self.entry(id)? {
            Some(entry) => Ok(Some(entry.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    fn update<T, F>(&self, id: &str, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut SessionRecord) -> AppResult<T>,
    {
        let entry = self
            .entry(id)?
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        let mut record = entry.lock().map_err(poisoned)?;
        f(&mut record)
    }

    fn retain<F>(&self, keep: F) -> AppResult<usize>
    where
        F: Fn(&SessionRecord) -> bool,
    {
        let mut sessions = self.write()?;
        let before = sessions.len();
        // Poisoned records are dropped along with expired ones
        sessions.retain(|_, entry| entry.lock().map(|record| keep(&record)).unwrap_or(false));
        Ok(before - sessions.len())
    }

    fn len(&self) -> AppResult<usize> {
        Ok(self.read()?.len())
    }
}

/// Result of a submitted choice
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChoiceOutcome {
    pub is_complete: bool,
    /// The next round with its pair already generated; `None` when complete,
    /// or when no pair could be built (the next round read reports why)
    pub next_round: Option<RoundView>,
}

/// Round/choice state machine for every live session
pub struct SessionEngine<S: SessionStore = InMemorySessionStore> {
    store: S,
    selector: PairSelector,
    settings: SessionSettings,
}

impl SessionEngine<InMemorySessionStore> {
    pub fn in_memory(settings: SessionSettings) -> Self {
        Self::new(InMemorySessionStore::new(), PairSelector::default(), settings)
    }
}

impl<S: SessionStore> SessionEngine<S> {
    pub fn new(store: S, selector: PairSelector, settings: SessionSettings) -> Self {
        Self {
            store,
            selector,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn create_session(&self, filters: PairFilters) -> AppResult<Session> {
        let session = Session::new(
            Uuid::new_v4().to_string(),
            filters,
            self.settings.total_rounds.max(1),
            Utc::now(),
        );

        self.store.insert(SessionRecord::new(session.clone()))?;

        tracing::info!(
            session_id = %session.id,
            total_rounds = session.total_rounds,
            genres = ?session.filters.genres,
            "Session created"
        );

        Ok(session)
    }

    /// Runs `f` against a live session; expired sessions read as missing
    fn with_live<T, F>(&self, id: &str, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut SessionRecord) -> AppResult<T>,
    {
        let ttl = self.settings.ttl;
        self.store.update(id, |record| {
            if record.session.is_expired(ttl, Utc::now()) {
                return Err(AppError::SessionNotFound(id.to_string()));
            }
            f(record)
        })
    }

    pub fn session(&self, id: &str) -> AppResult<Session> {
        self.with_live(id, |record| Ok(record.session.clone()))
    }

    /// Picks a pair for the current round and records it as pending
    fn generate_pair(
        &self,
        record: &mut SessionRecord,
        pool: &CataloguePool,
    ) -> AppResult<PendingPair> {
        let selected = self
            .selector
            .select_pair(pool, &record.shown_ids, &record.session.filters)
            .ok_or(AppError::PoolExhausted)?;

        Ok(self.commit_pair(record, selected.left, selected.right))
    }

    fn commit_pair(&self, record: &mut SessionRecord, left: Movie, right: Movie) -> PendingPair {
        record.shown_ids.insert(left.id);
        record.shown_ids.insert(right.id);

        let pending = PendingPair {
            round: record.session.current_round,
            left,
            right,
        };
        record.pending = Some(pending.clone());
        pending
    }

    /// The pending pair for the current round, generating one if needed
    pub fn get_or_create_pair(&self, id: &str, pool: &CataloguePool) -> AppResult<RoundView> {
        self.with_live(id, |record| {
            if record.session.is_complete {
                return Err(AppError::SessionComplete);
            }

            let current = record.session.current_round;
            if let Some(pending) = record.pending.as_ref().filter(|p| p.round == current) {
                return Ok(RoundView::new(&record.session, Some(pending)));
            }

            let pending = self.generate_pair(record, pool)?;
            tracing::debug!(
                session_id = %id,
                round = current,
                left = pending.left.id,
                right = pending.right.id,
                "Pair generated"
            );
            Ok(RoundView::new(&record.session, Some(&pending)))
        })
    }

    /// Records the pick for the current round and advances
    ///
    /// The next round's pair is generated eagerly; if the pool is exhausted the
    /// choice still stands and the next round read reports `PoolExhausted`.
    pub fn submit_choice(
        &self,
        id: &str,
        chosen_movie_id: MovieId,
        pool: &CataloguePool,
    ) -> AppResult<ChoiceOutcome> {
        self.with_live(id, |record| {
            if record.session.is_complete {
                return Err(AppError::SessionComplete);
            }

            let current = record.session.current_round;
            let pending = match record.pending.as_ref() {
                Some(pending) if pending.round == current && pending.contains(chosen_movie_id) => {
                    pending.clone()
                }
                Some(_) => {
                    return Err(AppError::InvalidChoice(format!(
                        "movie {} is not in the pair for round {}",
                        chosen_movie_id, current
                    )))
                }
                None => {
                    return Err(AppError::InvalidChoice(format!(
                        "no pair has been offered for round {}",
                        current
                    )))
                }
            };

            record.session.choices.push(ChoiceRecord {
                round: current,
                left_movie: pending.left,
                right_movie: pending.right,
                chosen_movie_id,
            });
            record.pending = None;

            if current >= record.session.total_rounds {
                record.session.is_complete = true;
                tracing::info!(
                    session_id = %id,
                    choices = record.session.choices.len(),
                    "Session complete"
                );
                return Ok(ChoiceOutcome {
                    is_complete: true,
                    next_round: None,
                });
            }

            record.session.current_round += 1;

            let next_round = match self.generate_pair(record, pool) {
                Ok(pending) => Some(RoundView::new(&record.session, Some(&pending))),
                Err(e) => {
                    tracing::warn!(
                        session_id = %id,
                        round = record.session.current_round,
                        error = %e,
                        "Could not pre-generate next pair"
                    );
                    None
                }
            };

            Ok(ChoiceOutcome {
                is_complete: false,
                next_round,
            })
        })
    }

    /// Replaces the current pair and adds one round to the session
    ///
    /// Nothing changes if no replacement pair exists.
    pub fn skip(&self, id: &str, pool: &CataloguePool) -> AppResult<RoundView> {
        self.with_live(id, |record| {
            if record.session.is_complete {
                return Err(AppError::SessionComplete);
            }

            let selected = self
                .selector
                .select_pair(pool, &record.shown_ids, &record.session.filters)
                .ok_or(AppError::PoolExhausted)?;

            record.session.total_rounds += 1;
            let pending = self.commit_pair(record, selected.left, selected.right);

            tracing::info!(
                session_id = %id,
                round = record.session.current_round,
                total_rounds = record.session.total_rounds,
                "Round skipped"
            );

            Ok(RoundView::new(&record.session, Some(&pending)))
        })
    }

    /// Round view without generating anything
    pub fn round_view(&self, id: &str) -> AppResult<RoundView> {
        self.with_live(id, |record| {
            let current = record.session.current_round;
            let pending = record.pending.as_ref().filter(|p| p.round == current);
            Ok(RoundView::new(&record.session, pending))
        })
    }

    pub fn chosen_movies(&self, id: &str) -> AppResult<Vec<Movie>> {
        self.with_live(id, |record| Ok(record.session.chosen_movies()))
    }

    pub fn rejected_movies(&self, id: &str) -> AppResult<Vec<Movie>> {
        self.with_live(id, |record| Ok(record.session.rejected_movies()))
    }

    pub fn recommendations(&self, id: &str) -> AppResult<Option<RecommendationSet>> {
        self.with_live(id, |record| Ok(record.recommendations.clone()))
    }

    /// Memoizes a recommendation set; the first stored set wins
    pub fn store_recommendations(
        &self,
        id: &str,
        set: RecommendationSet,
    ) -> AppResult<RecommendationSet> {
        self.with_live(id, |record| {
            Ok(record.recommendations.get_or_insert(set).clone())
        })
    }

    /// Removes sessions created more than the TTL before `now`
    pub fn evict_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let ttl = self.settings.ttl;
        let evicted = self
            .store
            .retain(|record| !record.session.is_expired(ttl, now))?;

        if evicted > 0 {
            tracing::info!(evicted = evicted, "Evicted expired sessions");
        }

        Ok(evicted)
    }

    pub fn session_count(&self) -> AppResult<usize> {
        self.store.len()
    }
}

impl<S: SessionStore + 'static> SessionEngine<S> {
    /// Evicts expired sessions on a fixed interval
    pub fn spawn_sweeper(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = engine.evict_expired(Utc::now()) {
                    tracing::error!(error = %e, "Session sweep failed");
                }
            }
        })
    }
}
