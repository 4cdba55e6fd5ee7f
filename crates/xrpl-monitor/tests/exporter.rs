//! HTTP surface of the exporter, driven through actix's test service.

mod common;

use std::sync::Arc;

use actix_web::{test, web, App};
use common::{info, thresholds, Harness, ScriptedApi};
use xrpl_monitor::collector::{now_ms, FastCollector};
use xrpl_monitor::routes;
use xrpl_monitor::state::AppState;
use xrpl_monitor::tracker::TrackerConfig;

async fn body_text(resp: actix_web::dev::ServiceResponse) -> String {
    let bytes = test::read_body(resp).await;
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[actix_rt::test]
async fn test_metrics_on_empty_store() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(h.db.clone(), h.counters.clone())))
            .configure(routes::health::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = body_text(resp).await;
    assert!(body.contains("xrpl_monitor_uptime_seconds"));
    assert!(body.contains("xrpl_validation_agreement_pct_1h NaN"));
    assert!(body.contains("xrpl_validation_agreement_pct_24h NaN"));
    assert!(!body.contains("xrpl_validator_state_value"));
    assert!(!body.contains("xrpl_upstream_up"));
}

#[actix_rt::test]
async fn test_metrics_after_collection() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([
        info("proposing", 100, 21),
        info("proposing", 101, 21),
    ]));
    let mut collector =
        FastCollector::new(api, h.ctx(), TrackerConfig::default(), thresholds()).unwrap();
    let t0 = now_ms();
    collector.tick_at(t0 - 5_000).await;
    collector.tick_at(t0).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(h.db.clone(), h.counters.clone())))
            .configure(routes::health::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = body_text(resp).await;

    assert!(body.contains("xrpl_validator_state_value 6"));
    assert!(body.contains("xrpl_ledger_sequence 101"));
    assert!(body.contains("xrpl_peer_count 21"));
    assert!(body.contains("xrpl_validation_agreement_pct_1h 100"));
    assert!(body.contains("xrpl_upstream_up 1"));
    assert!(body.contains(r#"xrpl_validator_state{state="proposing"} 1"#));
    assert!(body.contains(r#"xrpl_monitor_polls_total{collector="fast"} 2"#));
    assert!(body.contains("xrpl_validations_checked_total 2"));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "xrpl-monitor");
    assert_eq!(body["lastSnapshot"]["state"], "proposing");
    assert_eq!(body["lastSnapshot"]["ledgerSeq"], 101);
}

#[actix_rt::test]
async fn test_health_without_snapshots() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(h.db.clone(), h.counters.clone())))
            .configure(routes::health::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["lastSnapshot"].is_null());
}

#[actix_rt::test]
async fn test_store_loss_degrades_gracefully() {
    let h = Harness::new();
    h.counters.polls.with_label_values(&["fast"]).inc();
    std::fs::remove_file(h.db.path()).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(h.db.clone(), h.counters.clone())))
            .configure(routes::health::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = body_text(resp).await;
    assert!(body.contains("xrpl_monitor_uptime_seconds"));
    assert!(body.contains(r#"xrpl_monitor_polls_total{collector="fast"} 1"#));
    assert!(!body.contains("xrpl_validation_agreement_pct_1h"));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "store_unavailable");
}
