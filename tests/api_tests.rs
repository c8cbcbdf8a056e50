use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use cinepair_api::{
    db::MemorySnapshotStore,
    error::AppResult,
    models::{BucketQuery, BucketSpec, CataloguePool, Movie},
    routes::{create_router, AppState},
    services::{
        providers::MetadataResolver, CatalogueCache, CatalogueSettings, GenreAffinityRecommender,
        RecommendationService, SessionEngine, SessionSettings,
    },
};

const ROUNDS: u32 = 3;

fn movie(id: u64, genre: &str) -> Movie {
    Movie {
        id,
        tmdb_id: id,
        title: format!("{} Movie {}", genre, id),
        year: Some(2000 + (id % 20) as i32),
        poster_path: Some(format!("/poster{}.jpg", id)),
        backdrop_path: None,
        overview: String::new(),
        genres: vec![genre.to_string()],
        rating: Some(6.0 + (id % 4) as f32 * 0.5),
        list_source: genre.to_string(),
        director: None,
        cast: Vec::new(),
        runtime: Some(100),
        keywords: Vec::new(),
    }
}

fn bucket(ids: std::ops::Range<u64>, genre: &str) -> (String, Vec<Movie>) {
    (genre.to_string(), ids.map(|id| movie(id, genre)).collect())
}

fn pool() -> CataloguePool {
    CataloguePool::from_buckets(
        vec![bucket(0..20, "Horror"), bucket(20..40, "Comedy")],
        Utc::now(),
    )
}

/// Serves a fixed list for every bucket
struct StaticResolver;

#[async_trait::async_trait]
impl MetadataResolver for StaticResolver {
    async fn resolve_by_title(&self, _title: &str, _year: Option<i32>) -> AppResult<Option<Movie>> {
        Ok(None)
    }

    async fn resolve_by_id(&self, _id: u64) -> AppResult<Option<Movie>> {
        Ok(None)
    }

    async fn discover_by_bucket(&self, bucket: &BucketSpec) -> AppResult<Vec<Movie>> {
        Ok((100..110).map(|id| movie(id, &bucket.name)).collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

async fn create_test_server(snapshot: Option<CataloguePool>) -> TestServer {
    let loaded = snapshot.is_some();
    let snapshots = match snapshot {
        Some(pool) => MemorySnapshotStore::with_snapshot(pool),
        None => MemorySnapshotStore::new(),
    };

    let catalogue = Arc::new(CatalogueCache::new(
        Arc::new(StaticResolver),
        Arc::new(snapshots),
        vec![BucketSpec::new("Drama", BucketQuery::Popular)],
        CatalogueSettings::default(),
    ));
    if loaded {
        catalogue.initialize().await;
    }

    let sessions = Arc::new(SessionEngine::in_memory(SessionSettings {
        total_rounds: ROUNDS,
        ..SessionSettings::default()
    }));
    let recommender = Arc::new(GenreAffinityRecommender::new(Arc::clone(&catalogue), 5));

    let state = Arc::new(AppState {
        catalogue,
        recommendations: RecommendationService::new(Arc::clone(&sessions), recommender),
        sessions,
    });

    TestServer::new(create_router(state)).unwrap()
}

async fn start_session(server: &TestServer, filters: Value) -> String {
    let response = server.post("/api/v1/sessions").json(&filters).await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    body["session_id"].as_str().unwrap().to_string()
}

fn pair_ids(round: &Value) -> (u64, u64) {
    (
        round["left_movie"]["id"].as_u64().unwrap(),
        round["right_movie"]["id"].as_u64().unwrap(),
    )
}

/// Plays every round picking the left movie, returns every id shown
async fn play_to_completion(server: &TestServer, session_id: &str) -> HashSet<u64> {
    let mut shown = HashSet::new();
    let mut round: Value = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await
        .json();

    loop {
        let (left, right) = pair_ids(&round);
        shown.insert(left);
        shown.insert(right);

        let response = server
            .post(&format!("/api/v1/sessions/{}/choice", session_id))
            .json(&json!({ "movie_id": left }))
            .await;
        response.assert_status_ok();
        let outcome: Value = response.json();

        if outcome["is_complete"].as_bool().unwrap() {
            return shown;
        }
        round = outcome["next_round"].clone();
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = create_test_server(None).await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "status": "healthy" }));
}

#[tokio::test]
async fn test_responses_are_not_cacheable() {
    let server = create_test_server(Some(pool())).await;
    let response = server.get("/api/v1/catalogue/status").await;

    assert_eq!(
        response.header("cache-control"),
        "no-store, no-cache, must-revalidate"
    );
}

#[tokio::test]
async fn test_request_id_echoed() {
    let server = create_test_server(None).await;
    let response = server
        .get("/health")
        .add_header(
            "x-request-id".parse::<axum::http::HeaderName>().unwrap(),
            "test-request-1".parse::<axum::http::HeaderValue>().unwrap(),
        )
        .await;

    assert_eq!(response.header("x-request-id"), "test-request-1");
}

#[tokio::test]
async fn test_round_before_catalogue_ready() {
    let server = create_test_server(None).await;

    let status: Value = server.get("/api/v1/catalogue/status").await.json();
    assert_eq!(status["ready"], false);

    let session_id = start_session(&server, json!({})).await;
    let response = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "not_ready");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_catalogue_status_and_display() {
    let server = create_test_server(Some(pool())).await;

    let status: Value = server.get("/api/v1/catalogue/status").await.json();
    assert_eq!(status["ready"], true);
    assert_eq!(status["movie_count"], 40);
    assert_eq!(status["bucket_counts"]["Horror"], 20);

    let response = server
        .get("/api/v1/catalogue/display")
        .add_query_param("per_bucket", 3)
        .add_query_param("limit", 5)
        .await;
    response.assert_status_ok();
    let display: Value = response.json();
    assert_eq!(display["count"], 5);
    assert_eq!(display["movies"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_refresh_builds_catalogue() {
    let server = create_test_server(None).await;

    let response = server.post("/api/v1/catalogue/refresh").await;
    response.assert_status(StatusCode::ACCEPTED);

    let mut ready = false;
    for _ in 0..100 {
        let status: Value = server.get("/api/v1/catalogue/status").await.json();
        if status["ready"] == true {
            assert_eq!(status["movie_count"], 10);
            ready = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(ready);
}

#[tokio::test]
async fn test_start_session_returns_rounds() {
    let server = create_test_server(Some(pool())).await;

    let response = server
        .post("/api/v1/sessions")
        .json(&json!({ "genres": ["Horror"], "include_top_picks": true }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    assert_eq!(body["total_rounds"], ROUNDS);
    assert_eq!(body["filters"]["genres"], json!(["Horror"]));
    assert!(body["session_id"].as_str().is_some());
}

#[tokio::test]
async fn test_round_respects_genre_filter() {
    let server = create_test_server(Some(pool())).await;
    let session_id = start_session(&server, json!({ "genres": ["Horror"] })).await;

    let response = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await;
    response.assert_status_ok();

    let round: Value = response.json();
    assert_eq!(round["round"], 1);
    assert_eq!(round["total_rounds"], ROUNDS);
    assert_eq!(round["is_complete"], false);

    let (left, right) = pair_ids(&round);
    assert_ne!(left, right);
    assert!(left < 20 && right < 20);

    // Reading again returns the same pair
    let again: Value = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await
        .json();
    assert_eq!(pair_ids(&again), (left, right));
}

#[tokio::test]
async fn test_full_session_flow() {
    let server = create_test_server(Some(pool())).await;
    let session_id = start_session(&server, json!({ "genres": ["Horror"] })).await;

    let shown = play_to_completion(&server, &session_id).await;
    assert_eq!(shown.len(), (ROUNDS * 2) as usize);

    let round: Value = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await
        .json();
    assert_eq!(round["is_complete"], true);
    assert_eq!(round["progress"], 1.0);

    let response = server
        .get(&format!("/api/v1/sessions/{}/recommendations", session_id))
        .await;
    response.assert_status_ok();
    let set: Value = response.json();

    let recommended: Vec<u64> = set["recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["movie"]["id"].as_u64().unwrap())
        .collect();
    assert_eq!(recommended.len(), 5);
    assert!(recommended.iter().all(|id| !shown.contains(id)));
    assert_eq!(set["preference_profile"]["top_genres"][0]["genre"], "Horror");

    // Memoized
    let again: Value = server
        .get(&format!("/api/v1/sessions/{}/recommendations", session_id))
        .await
        .json();
    assert_eq!(again, set);

    let response = server
        .post(&format!(
            "/api/v1/sessions/{}/recommendations/replace",
            session_id
        ))
        .json(&json!({ "exclude_ids": [recommended[0]] }))
        .await;
    response.assert_status_ok();
    let replacement: Value = response.json();
    let replacement_id = replacement["movie"]["id"].as_u64().unwrap();
    assert!(!recommended.contains(&replacement_id));
    assert!(!shown.contains(&replacement_id));
}

#[tokio::test]
async fn test_choice_on_completed_session_is_noop() {
    let server = create_test_server(Some(pool())).await;
    let session_id = start_session(&server, json!({})).await;
    play_to_completion(&server, &session_id).await;

    let response = server
        .post(&format!("/api/v1/sessions/{}/choice", session_id))
        .json(&json!({ "movie_id": 1 }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["is_complete"], true);
    assert_eq!(body["code"], "session_complete");
}

#[tokio::test]
async fn test_invalid_choice() {
    let server = create_test_server(Some(pool())).await;
    let session_id = start_session(&server, json!({ "genres": ["Comedy"] })).await;

    let round: Value = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await
        .json();
    let (left, right) = pair_ids(&round);
    let outsider = (20..40).find(|id| *id != left && *id != right).unwrap();

    let response = server
        .post(&format!("/api/v1/sessions/{}/choice", session_id))
        .json(&json!({ "movie_id": outsider }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "invalid_choice");

    // Round did not advance
    let round: Value = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await
        .json();
    assert_eq!(round["round"], 1);
    assert_eq!(pair_ids(&round), (left, right));
}

#[tokio::test]
async fn test_skip_adds_round() {
    let server = create_test_server(Some(pool())).await;
    let session_id = start_session(&server, json!({})).await;

    let before: Value = server
        .get(&format!("/api/v1/sessions/{}/round", session_id))
        .await
        .json();

    let response = server
        .post(&format!("/api/v1/sessions/{}/skip", session_id))
        .await;
    response.assert_status_ok();
    let after: Value = response.json();

    assert_eq!(after["round"], 1);
    assert_eq!(after["total_rounds"], ROUNDS + 1);
    assert_eq!(after["base_total_rounds"], ROUNDS);

    let (old_left, old_right) = pair_ids(&before);
    let (new_left, new_right) = pair_ids(&after);
    for id in [new_left, new_right] {
        assert_ne!(id, old_left);
        assert_ne!(id, old_right);
    }
}

#[tokio::test]
async fn test_recommendations_before_completion() {
    let server = create_test_server(Some(pool())).await;
    let session_id = start_session(&server, json!({})).await;

    let response = server
        .get(&format!("/api/v1/sessions/{}/recommendations", session_id))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "session_incomplete");
}

#[tokio::test]
async fn test_unknown_session() {
    let server = create_test_server(Some(pool())).await;

    let response = server.get("/api/v1/sessions/missing/round").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "session_not_found");
    assert_eq!(body["retryable"], false);

    let response = server
        .post("/api/v1/sessions/missing/choice")
        .json(&json!({ "movie_id": 1 }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}
