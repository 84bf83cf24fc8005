#![cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use serde_json::Value;

use velo::auth::Role;
use velo::config::{AppConfig, RateLimitSettings};
use velo::rate_limit::{RateLimit, RateLimiter};
use velo::repo::inmem::InMemRepo;
use velo::routes::{self, AppState};
use velo::token;

const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".into(),
        token_secret: SECRET.into(),
        cors_origins: vec![],
        bootstrap_admin_emails: vec![],
        enable_hsts: false,
        rate_limit: RateLimitSettings::default(),
        data_dir: None,
    }
}

fn settings(points: u32, write_cost: u32, penalize_failures_only: bool) -> RateLimitSettings {
    RateLimitSettings {
        enabled: true,
        points,
        window: Duration::from_secs(60),
        write_cost,
        penalize_failures_only,
    }
}

macro_rules! limited_app {
    ($settings:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState { repo: Arc::new(InMemRepo::new()) }))
                .app_data(web::Data::new(test_config()))
                .service(
                    web::scope("/api/v1")
                        .wrap(RateLimit::new(RateLimiter::in_memory($settings), SECRET))
                        .configure(routes::api),
                ),
        )
        .await
    };
}

fn peer(addr: &str) -> SocketAddr {
    addr.parse().unwrap()
}

#[actix_web::test]
async fn budget_exhaustion_returns_429_with_retry_hint() {
    let app = limited_app!(settings(2, 1, false));
    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/api/v1/bikes")
            .peer_addr(peer("1.2.3.4:40000"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("1.2.3.4:40000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().contains_key("Retry-After"));
    let body: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("too many requests"));
    let retry_after = body["retryAfter"].as_u64().unwrap();
    assert!(retry_after >= 1 && retry_after <= 60, "retryAfter = {retry_after}");
}

#[actix_web::test]
async fn endpoint_families_have_independent_budgets() {
    let app = limited_app!(settings(1, 1, false));
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("1.2.3.4:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("1.2.3.4:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
    // Same caller, different path template: fresh budget.
    let req = test::TestRequest::get()
        .uri("/api/v1/vendors/1")
        .peer_addr(peer("1.2.3.4:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn distinct_callers_never_share_budget() {
    let app = limited_app!(settings(1, 1, false));
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("1.1.1.1:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("1.1.1.1:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("2.2.2.2:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
async fn authenticated_subjects_are_keyed_by_user_not_ip() {
    let app = limited_app!(settings(1, 1, false));
    // Exhaust the anonymous (ip-keyed) budget.
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("9.9.9.9:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("9.9.9.9:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
    // A token from the same address gets its own budget.
    let t = token::issue(SECRET, "42", Role::User);
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("9.9.9.9:40000"))
        .insert_header(("Authorization", format!("Bearer {t}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
async fn writes_cost_more_than_reads() {
    // points=3, write cost=2: the second write to the same endpoint family
    // would need 2 of the remaining 1.
    let app = limited_app!(settings(3, 2, false));
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .peer_addr(peer("3.3.3.3:40000"))
        .set_json(serde_json::json!({"email": "a@b.c", "password": "nope-nope"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .peer_addr(peer("3.3.3.3:40000"))
        .set_json(serde_json::json!({"email": "a@b.c", "password": "nope-nope"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
}

#[actix_web::test]
async fn penalize_failures_only_spares_successful_requests() {
    let app = limited_app!(settings(1, 1, true));
    // Successful reads consume nothing.
    for _ in 0..5 {
        let req = test::TestRequest::get()
            .uri("/api/v1/bikes")
            .peer_addr(peer("4.4.4.4:40000"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
    // A failing request burns the budget for its endpoint family...
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes/999")
        .peer_addr(peer("4.4.4.4:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    // ...so the next hit on that family is rejected up front.
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes/999")
        .peer_addr(peer("4.4.4.4:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
    // The healthy family is untouched.
    let req = test::TestRequest::get()
        .uri("/api/v1/bikes")
        .peer_addr(peer("4.4.4.4:40000"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
async fn disabled_limiter_lets_everything_through() {
    let mut s = settings(1, 1, false);
    s.enabled = false;
    let app = limited_app!(s);
    for _ in 0..10 {
        let req = test::TestRequest::get()
            .uri("/api/v1/bikes")
            .peer_addr(peer("5.5.5.5:40000"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
}
