use actix_web::{web, HttpResponse};

use crate::collector::now_ms;
use crate::error::MonitorError;
use crate::exporter;
use crate::state::AppState;

/// GET /health - liveness plus the freshness of the latest snapshot
pub async fn health(state: web::Data<AppState>) -> Result<HttpResponse, MonitorError> {
    let db = state.db.clone();
    let latest = web::block(move || db.reader()?.latest_snapshot())
        .await
        .map_err(|e| MonitorError::Io(std::io::Error::other(e.to_string())))??;

    let now = now_ms();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "xrpl-monitor",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": (now - state.started_at_ms).max(0) / 1000,
        "lastSnapshot": latest.map(|s| serde_json::json!({
            "timestampMs": s.timestamp_ms,
            "ageSecs": (now - s.timestamp_ms).max(0) / 1000,
            "state": s.state,
            "ledgerSeq": s.ledger_seq,
        })),
    })))
}

/// GET /metrics - Prometheus exposition rendered from the store
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    let state = state.into_inner();
    let rendered = web::block(move || {
        exporter::render(&state.db, &state.counters, state.started_at_ms, now_ms())
    })
    .await;

    match rendered {
        Ok(Ok(body)) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Ok(Err(e)) => {
            tracing::error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to encode metrics")
        }
        Err(e) => {
            tracing::error!("Metrics render task failed: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
