use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use socketioxide::SocketIo;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use stranger_match::config::AppConfig;
use stranger_match::matching::MatchingEngine;
use stranger_match::pairing::{PairRegistry, TeardownReason};
use stranger_match::relay::Relay;
use stranger_match::session::SessionRegistry;
use stranger_match::{socket, AppState};

fn init_tracing(service_name: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{service_name}=debug,tower_http=debug")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true))
        .init();

    tracing::info!(service = service_name, "tracing initialized");
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "stranger-match",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
}

/// Periodic rematch sweep: refreshes the whole score index to pick up
/// elapsed wait time, then tries to commit a match for every still-searching
/// peer, on top of the opportunistic attempt each peer already makes right
/// after it starts searching.
async fn rematch_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.rematch_interval_secs));
    loop {
        ticker.tick().await;
        let now = Utc::now();
        state.engine.refresh_scores(now);

        for peer_id in state.engine.waiting_peers() {
            let Some(candidate_id) = state.engine.find_match(peer_id, now) else {
                continue;
            };
            // Only one side drives the commit per candidate pair to avoid a
            // duplicate attempt from the candidate's own loop iteration.
            if peer_id > candidate_id {
                continue;
            }
            let score = state.engine.score_between(peer_id, candidate_id).unwrap_or(0.0);
            let Some(outcome) = state.pairs.commit(&state.sessions, &state.engine, peer_id, candidate_id, score, now).await else {
                continue;
            };
            socket::handlers::emit_matched(&state, &outcome).await;
        }
    }
}

/// Inactivity sweep plus search-timeout (`maxWaitTime`, default 45 s) and
/// video-call-request TTL expiry, all driven by one cooperative loop rather
/// than per-peer timers.
async fn sweep_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.cleanup_interval_secs));
    loop {
        ticker.tick().await;
        let now = Utc::now();

        for peer_id in state.engine.waiting_peers() {
            let Some(joined_at) = state.engine.wait_started_at(peer_id) else {
                continue;
            };
            if (now - joined_at).num_seconds() as u64 > state.config.max_wait_secs {
                state.engine.remove(peer_id);
                if let Some(handle) = state.sessions.get(peer_id) {
                    handle.lock().await.stop_search(now);
                }
                state.io.to(format!("peer:{peer_id}")).emit("search-timeout", &serde_json::json!({})).ok();
            }
        }

        for peer_id in state.sessions.peer_ids() {
            let Some(handle) = state.sessions.get(peer_id) else { continue };
            let is_stale = handle.lock().await.is_stale(now, state.config.inactive_threshold_secs);
            if !is_stale {
                continue;
            }
            state.engine.remove(peer_id);
            if let Some(partner_id) = state.pairs.partner_of(peer_id) {
                state
                    .pairs
                    .teardown(&state.sessions, &state.engine, &state.relay, peer_id, partner_id, TeardownReason::Inactive, now)
                    .await;
                state
                    .io
                    .to(format!("peer:{partner_id}"))
                    .emit("partnerDisconnected", &serde_json::json!({ "reason": TeardownReason::Inactive.as_str() }))
                    .ok();
            }
            state.sessions.remove(peer_id);
        }

        for peer_id in state.relay.sweep_expired_video_requests(now, state.config.video_call_request_ttl_secs) {
            tracing::debug!(peer_id = %peer_id, "video-call-request expired");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("stranger-match");

    let config = AppConfig::load()?;
    let port = config.port;
    let origins = config.cors_origins.clone();
    let video_threshold = config.video_threshold;
    let text_threshold = config.text_threshold;
    let scoring = config.scoring.clone();

    // AppState carries the SocketIo handle so the background loops in this
    // file can emit into a room without a live socket to hand. socketioxide's
    // own `State<T>` extractor can't be used for that (it would need `io`
    // before `io` exists), so handlers are wired via state-capturing closures
    // instead.
    let (sio_layer, io) = SocketIo::builder().build_layer();

    let state = Arc::new(AppState {
        io: io.clone(),
        sessions: SessionRegistry::new(),
        engine: MatchingEngine::new(scoring, video_threshold, text_threshold),
        pairs: PairRegistry::new(),
        relay: Relay::new(),
        config,
    });

    io.ns("/", {
        let state = state.clone();
        move |socket: socketioxide::extract::SocketRef| {
            let state = state.clone();
            async move { socket::handlers::on_connect(socket, state).await }
        }
    });

    tokio::spawn(rematch_loop(state.clone()));
    tokio::spawn(sweep_loop(state.clone()));

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(sio_layer)
        .layer(cors_layer(&origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "stranger-match starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
