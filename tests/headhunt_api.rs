// HTTP-level tests for the headhunt tracker, the operator calculator and
// API key auth, driving the full router against an in-memory database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use zerosanity_backend::api::{self, AppState};
use zerosanity_backend::cache::{TtlCache, DEFAULT_MAX_ENTRIES};
use zerosanity_backend::calculator::StatTable;
use zerosanity_backend::config::Config;
use zerosanity_backend::db::Database;
use zerosanity_backend::headhunt::{self, SubmitPullsRequest};

async fn test_state() -> AppState {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let table = StatTable::from_json_str(include_str!("../data/operator_stats.json")).unwrap();
    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        port: 0,
        operator_stats_path: PathBuf::new(),
        stats_cache_ttl: Duration::from_secs(60),
        rate_limits_enabled: true,
    };
    AppState::new(db, table, &config)
}

async fn test_app() -> Router {
    api::app(test_state().await)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn register(app: &Router, username: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "endfield-pass",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["token"].as_str().unwrap().to_string()
}

fn pulls(rarities: &[i64]) -> Value {
    Value::Array(
        rarities
            .iter()
            .enumerate()
            .map(|(i, r)| json!({ "name": format!("item{i}"), "rarity": r }))
            .collect(),
    )
}

async fn submit(app: &Router, token: &str, banner: &str, rarities: &[i64]) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/headhunt/pulls",
        Some(token),
        Some(json!({ "banner": banner, "bannerType": "operator", "pulls": pulls(rarities) })),
    )
    .await
}

#[tokio::test]
async fn test_empty_stats_are_zeroed() {
    let app = test_app().await;
    let (status, stats) = send(&app, "GET", "/api/headhunt/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalPulls"], 0);
    assert_eq!(stats["contributors"], 0);
    assert_eq!(stats["sixStarRate"].as_f64(), Some(0.0));
    assert_eq!(stats["fiveStarRate"].as_f64(), Some(0.0));
    assert_eq!(stats["fourStarRate"].as_f64(), Some(0.0));
    assert_eq!(stats["mostPulledSixStar"], json!([]));
    assert_eq!(stats["bannerBreakdown"], json!([]));

    let (status, board) = send(&app, "GET", "/api/headhunt/leaderboard", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board["totalPlayers"], 0);
    assert_eq!(board["entries"], json!([]));
}

#[tokio::test]
async fn test_submit_requires_auth() {
    let app = test_app().await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/headhunt/pulls",
        None,
        Some(json!({ "banner": "b1", "bannerType": "operator", "pulls": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/headhunt/pulls",
        Some("not-a-token"),
        Some(json!({ "banner": "b1", "bannerType": "operator", "pulls": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/api/headhunt/history", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_validation_errors_leave_no_record() {
    let app = test_app().await;
    let token = register(&app, "validator").await;

    for body in [
        json!({ "bannerType": "operator", "pulls": [] }),
        json!({ "banner": "b1", "pulls": [] }),
        json!({ "banner": "b1", "bannerType": "limited", "pulls": [] }),
        json!({ "banner": "b1", "bannerType": "operator", "pulls": "lots" }),
        json!({ "banner": "b1", "bannerType": "operator" }),
        json!({ "banner": "b1", "bannerType": "operator", "pulls": [{ "rarity": 9 }] }),
    ] {
        let (status, err) =
            send(&app, "POST", "/api/headhunt/pulls", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{err}");
        assert!(err["error"].is_string());
    }

    let (_, history) = send(&app, "GET", "/api/headhunt/history", Some(&token), None).await;
    assert_eq!(history["banners"], json!([]));
    assert_eq!(history["summary"]["bannersTracked"], 0);
}

#[tokio::test]
async fn test_resubmission_overwrites_and_refreshes_stats() {
    let app = test_app().await;
    let token = register(&app, "puller").await;

    let (status, saved) = submit(&app, &token, "b1", &[6, 4, 6]).await;
    assert_eq!(status, StatusCode::OK, "{saved}");
    assert_eq!(saved["banner"], "b1");
    assert_eq!(saved["totalPulls"], 3);
    assert_eq!(saved["sixStarCount"], 2);

    // Warm the cache, then check that the next submission invalidates it
    let (_, stats) = send(&app, "GET", "/api/headhunt/stats", None, None).await;
    assert_eq!(stats["totalPulls"], 3);
    assert_eq!(stats["totalSixStar"], 2);

    let (_, again) = submit(&app, &token, "b1", &[4, 6, 3, 3]).await;
    assert_eq!(again["id"], saved["id"]);
    assert_eq!(again["totalPulls"], 4);
    assert_eq!(again["sixStarCount"], 1);

    let (_, stats) = send(&app, "GET", "/api/headhunt/stats", None, None).await;
    assert_eq!(stats["totalPulls"], 4);
    assert_eq!(stats["totalSixStar"], 1);
    assert_eq!(stats["contributors"], 1);
    assert_eq!(stats["sixStarRate"].as_f64(), Some(25.0));

    let (status, history) = send(&app, "GET", "/api/headhunt/history", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let banners = history["banners"].as_array().unwrap();
    assert_eq!(banners.len(), 1);
    assert_eq!(banners[0]["currentPity"], 3);
    assert_eq!(banners[0]["importSource"], "manual");
    assert_eq!(banners[0]["sixStarNames"], json!(["item1"]));
    assert_eq!(history["summary"]["totalPulls"], 4);
    assert_eq!(history["summary"]["sixStarRate"].as_f64(), Some(25.0));
}

#[tokio::test]
async fn test_stats_banner_filter() {
    let app = test_app().await;
    let a = register(&app, "alpha").await;
    let b = register(&app, "bravo").await;
    submit(&app, &a, "b1", &[6, 3]).await;
    submit(&app, &b, "b1", &[5, 3, 3, 3]).await;
    submit(&app, &a, "b2", &[4]).await;

    let (_, all) = send(&app, "GET", "/api/headhunt/stats", None, None).await;
    assert_eq!(all["totalPulls"], 7);
    assert_eq!(all["contributors"], 2);
    assert_eq!(all["bannerBreakdown"].as_array().unwrap().len(), 2);

    let (_, b1) = send(&app, "GET", "/api/headhunt/stats?banner=b1", None, None).await;
    assert_eq!(b1["totalPulls"], 6);
    assert_eq!(b1["mostPulledSixStar"], json!([{ "name": "item0", "count": 1 }]));
    let breakdown = b1["bannerBreakdown"].as_array().unwrap();
    assert_eq!(breakdown.len(), 1);
    assert_eq!(breakdown[0]["users"], 2);
    assert_eq!(breakdown[0]["sixStarRate"].as_f64(), Some(16.67));
}

#[tokio::test]
async fn test_leaderboard_sorts_and_filters() {
    let app = test_app().await;
    let small = register(&app, "smallsample").await;
    let steady = register(&app, "steady").await;
    let whale = register(&app, "whale").await;

    submit(&app, &small, "b1", &[6; 9]).await;
    let mut steady_pulls = vec![3; 10];
    steady_pulls[0] = 6;
    steady_pulls[1] = 6;
    submit(&app, &steady, "b1", &steady_pulls).await;
    submit(&app, &whale, "b1", &[3; 30]).await;
    submit(&app, &whale, "b2", &[6, 3, 3, 3, 3]).await;

    let (_, board) = send(&app, "GET", "/api/headhunt/leaderboard", None, None).await;
    assert_eq!(board["totalPlayers"], 3);
    assert_eq!(board["totalPulls"], 54);
    let names: Vec<&str> = board["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["whale", "steady", "smallsample"]);
    assert_eq!(board["entries"][0]["bannersTracked"], 2);
    assert_eq!(board["entries"][0]["rank"], 1);

    let (_, lucky) = send(
        &app,
        "GET",
        "/api/headhunt/leaderboard?sort=lucky",
        None,
        None,
    )
    .await;
    let names: Vec<&str> = lucky["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["steady", "whale"]);
    assert_eq!(lucky["entries"][0]["sixStarRate"].as_f64(), Some(20.0));

    let (_, limited) = send(
        &app,
        "GET",
        "/api/headhunt/leaderboard?limit=1",
        None,
        None,
    )
    .await;
    assert_eq!(limited["entries"].as_array().unwrap().len(), 1);
    assert_eq!(limited["totalPlayers"], 3);

    let (status, _) = send(
        &app,
        "GET",
        "/api/headhunt/leaderboard?sort=unlucky",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_operator_calculator() {
    let app = test_app().await;

    let (status, body) = send(
        &app,
        "GET",
        "/api/operators/Perlica/stats?level=30&breakthrough=1&talent=2",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["level"], 30);
    assert_eq!(body["maxLevel"], 40);
    // halfway between lv20 (1410) and lv40 (2370)
    assert_eq!(body["stats"]["hp"], 1890);
    assert_eq!(body["talentBonus"], json!({ "attribute": "intellect", "value": 25 }));

    let (_, capped) = send(
        &app,
        "GET",
        "/api/operators/Perlica/stats?level=75&breakthrough=0",
        None,
        None,
    )
    .await;
    assert_eq!(capped["level"], 20);
    assert_eq!(capped["stats"]["hp"], 1410);
    assert_eq!(capped["talentBonus"], Value::Null);

    let (status, _) = send(&app, "GET", "/api/operators/Nobody/stats", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "GET",
        "/api/operators/Perlica/stats?breakthrough=5",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_key_import_flow() {
    let app = test_app().await;
    let jwt = register(&app, "importer").await;

    let (status, key) = send(
        &app,
        "POST",
        "/api/api-keys",
        Some(&jwt),
        Some(json!({ "name": "pull exporter" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{key}");
    let raw = key["token"].as_str().unwrap().to_string();
    assert!(raw.starts_with("zs_"));

    let (status, saved) = send(
        &app,
        "POST",
        "/api/headhunt/pulls",
        Some(&raw),
        Some(json!({
            "banner": "w1",
            "bannerType": "weapon",
            "pulls": [{ "name": "Blade", "rarity": 6, "itemType": "weapon" }],
            "importSource": "exporter",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{saved}");

    let (_, history) = send(&app, "GET", "/api/headhunt/history", Some(&jwt), None).await;
    assert_eq!(history["banners"][0]["importSource"], "exporter");
    assert_eq!(history["banners"][0]["bannerType"], "weapon");

    // Keys cannot mint keys, and read-only keys cannot submit
    let (status, _) = send(
        &app,
        "POST",
        "/api/api-keys",
        Some(&raw),
        Some(json!({ "name": "nested" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, read_only) = send(
        &app,
        "POST",
        "/api/api-keys",
        Some(&jwt),
        Some(json!({ "name": "viewer", "scopes": "pulls:read" })),
    )
    .await;
    let read_only = read_only["token"].as_str().unwrap().to_string();
    let (status, _) = submit(&app, &read_only, "w1", &[3]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "GET", "/api/headhunt/history", Some(&read_only), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, keys) = send(&app, "GET", "/api/api-keys", Some(&jwt), None).await;
    let keys = keys.as_array().unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys[0].get("token_hash").is_none());

    let id = keys[0]["id"].as_i64().unwrap();
    let (status, _) = send(&app, "DELETE", &format!("/api/api-keys/{id}"), Some(&jwt), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = submit(&app, &raw, "w1", &[3]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_and_docs() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = send(&app, "GET", "/llms.txt", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_mistyped_body_is_json_error_after_auth() {
    let app = test_app().await;
    let body = json!({ "banner": 5, "bannerType": "operator", "pulls": [] });

    let (status, err) = send(&app, "POST", "/api/headhunt/pulls", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(err["error"].is_string());

    let token = register(&app, "typo").await;
    let (status, err) = send(&app, "POST", "/api/headhunt/pulls", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("banner"), "{err}");

    // Not JSON at all
    let request = Request::builder()
        .method("POST")
        .uri("/api/headhunt/pulls")
        .header("Authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_aggregate_caches_stay_bounded() {
    let state = test_state().await;
    let app = api::app(state.clone());

    for i in 0..300 {
        let uri = format!("/api/headhunt/leaderboard?banner=junk{i}&limit={i}");
        let (status, _) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", &format!("/api/headhunt/stats?banner=junk{i}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert!(state.leaderboard_cache.len() <= DEFAULT_MAX_ENTRIES);
    assert!(state.stats_cache.len() <= DEFAULT_MAX_ENTRIES);

    // Limits that clamp to the same value share one entry
    state.leaderboard_cache.clear();
    for limit in [100, 1000, 5000] {
        send(&app, "GET", &format!("/api/headhunt/leaderboard?banner=b1&limit={limit}"), None, None)
            .await;
    }
    assert_eq!(state.leaderboard_cache.len(), 1);
}

#[tokio::test]
async fn test_stats_loaded_before_a_write_are_not_cached() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let user = db
        .create_user("late", "late@example.com", "hash", "Late")
        .await
        .unwrap();
    let cache: TtlCache<headhunt::GlobalStats> =
        TtlCache::new("global_stats", Duration::from_secs(60));

    // Reader misses and loads the empty population
    let generation = cache.generation();
    assert!(cache.get("*").is_none());
    let before = headhunt::get_global_stats(&db, None).await.unwrap();

    // A submission lands and clears the cache before the reader stores its result
    let req: SubmitPullsRequest = serde_json::from_value(json!({
        "banner": "b1",
        "bannerType": "operator",
        "pulls": [{ "name": "Ardelia", "rarity": 6 }],
    }))
    .unwrap();
    headhunt::submit_pulls(&db, Some(user.id), req).await.unwrap();
    cache.clear();

    assert!(!cache.insert("*".into(), before, generation));
    assert!(cache.get("*").is_none());

    let fresh = headhunt::get_global_stats(&db, None).await.unwrap();
    assert_eq!(fresh.total_pulls, 1);
}

#[tokio::test]
async fn test_api_key_rate_limit_sets_retry_after() {
    let app = test_app().await;
    let jwt = register(&app, "keysmith").await;

    for i in 0..10 {
        let (status, _) = send(
            &app,
            "POST",
            "/api/api-keys",
            Some(&jwt),
            Some(json!({ "name": format!("key{i}") })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let request = Request::builder()
        .method("POST")
        .uri("/api/api-keys")
        .header("Authorization", format!("Bearer {jwt}"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name":"one too many"}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 3600);
}
