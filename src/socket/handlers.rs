//! Socket.IO event handlers. One typed handler per inbound event tag,
//! wired up in `on_connect` before any `.await` point — registering late
//! risks the client's first events (e.g. `register`) arriving before the
//! handlers exist and being silently dropped. State is threaded through
//! closures rather than socketioxide's `State<T>` extractor, since
//! `AppState` itself carries the `SocketIo` handle (needed to emit into a
//! room from the periodic background loops in `main.rs`, not just from a
//! live socket).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use socketioxide::extract::{Data, SocketRef};
use uuid::Uuid;

use crate::errors::AppError;
use crate::pairing::TeardownReason;
use crate::profile::{ChatMode, Gender, PeerId, Profile, RegistrationInput};
use crate::stats;
use crate::AppState;

fn peer_room(peer_id: PeerId) -> String {
    format!("peer:{peer_id}")
}

fn peer_id(socket: &SocketRef) -> Option<PeerId> {
    socket.extensions.get::<PeerId>()
}

fn emit_error(socket: &SocketRef, event: &str, err: &AppError) {
    if let Some(payload) = err.to_payload() {
        let _ = socket.emit(event, &payload);
    } else {
        tracing::error!(?err, "internal error, not forwarded to peer");
    }
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SearchPayload {
    pub mode: Option<ChatMode>,
}

#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    pub text: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReasonPayload {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebRtcOfferPayload {
    pub to: PeerId,
    pub sdp: serde_json::Value,
    pub call_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WebRtcAnswerPayload {
    pub to: PeerId,
    pub sdp: serde_json::Value,
    pub call_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct WebRtcIceCandidatePayload {
    pub to: PeerId,
    pub candidate: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct WebRtcEndPayload {
    pub to: PeerId,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebRtcRejectPayload {
    pub to: PeerId,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct VideoCallRequestPayload {
    pub call_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct RegisteredPayload {
    peer_id: PeerId,
}

#[derive(Debug, Serialize)]
struct PartnerSummary {
    peer_id: PeerId,
    username: String,
    gender: Gender,
    age: i32,
    interests: Vec<String>,
    chat_mode: ChatMode,
}

impl From<&Profile> for PartnerSummary {
    fn from(p: &Profile) -> Self {
        Self {
            peer_id: p.id,
            username: p.username.clone(),
            gender: p.gender,
            age: p.age,
            interests: p.interests.clone(),
            chat_mode: p.chat_mode,
        }
    }
}

#[derive(Debug, Serialize)]
struct MatchedPayload {
    partner: PartnerSummary,
    compatibility: f64,
    shared_interests: Vec<String>,
    matched_at: chrono::DateTime<Utc>,
    match_mode: ChatMode,
    room_id: Uuid,
}

#[derive(Debug, Serialize)]
struct VideoMatchReadyPayload {
    room_id: Uuid,
    call_id: Uuid,
}

#[derive(Debug, Serialize)]
struct PartnerDisconnectedPayload {
    reason: String,
}

#[derive(Debug, Serialize)]
struct MessagePayloadOut {
    id: Uuid,
    from: PeerId,
    username: String,
    text: String,
    sent_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct MessageSentPayload {
    id: Uuid,
    sent_at: chrono::DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

pub async fn on_connect(socket: SocketRef, state: Arc<AppState>) {
    let id: PeerId = Uuid::new_v4();
    socket.extensions.insert(id);
    socket.join(peer_room(id)).ok();

    socket.on("register", {
        let state = state.clone();
        move |socket: SocketRef, Data(input): Data<RegistrationInput>| {
            let state = state.clone();
            async move { on_register(socket, input, &state).await }
        }
    });

    socket.on("search", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<SearchPayload>| {
            let state = state.clone();
            async move { on_search(socket, payload, &state).await }
        }
    });

    socket.on("cancel-search", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_cancel_search(socket, &state).await }
        }
    });

    socket.on("message", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<MessagePayload>| {
            let state = state.clone();
            async move { on_message(socket, payload, &state).await }
        }
    });

    socket.on("typing", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_typing(socket, &state).await }
        }
    });

    socket.on("typingStopped", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_typing_stopped(socket, &state).await }
        }
    });

    socket.on("next", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_next(socket, &state).await }
        }
    });

    socket.on("disconnect-partner", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<ReasonPayload>| {
            let state = state.clone();
            async move { on_disconnect_partner(socket, payload, &state).await }
        }
    });

    socket.on("webrtc-offer", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<WebRtcOfferPayload>| {
            let state = state.clone();
            async move { on_webrtc_offer(socket, payload, &state).await }
        }
    });

    socket.on("webrtc-answer", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<WebRtcAnswerPayload>| {
            let state = state.clone();
            async move { on_webrtc_answer(socket, payload, &state).await }
        }
    });

    socket.on("webrtc-ice-candidate", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<WebRtcIceCandidatePayload>| {
            let state = state.clone();
            async move { on_webrtc_ice_candidate(socket, payload, &state).await }
        }
    });

    socket.on("webrtc-end", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<WebRtcEndPayload>| {
            let state = state.clone();
            async move { on_webrtc_end(socket, payload, &state).await }
        }
    });

    socket.on("webrtc-reject", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<WebRtcRejectPayload>| {
            let state = state.clone();
            async move { on_webrtc_reject(socket, payload, &state).await }
        }
    });

    socket.on("video-call-status", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<serde_json::Value>| {
            let state = state.clone();
            async move { opaque_forward(&socket, &state, "video-call-status", payload).await }
        }
    });

    socket.on("call-toggle-media", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<serde_json::Value>| {
            let state = state.clone();
            async move { opaque_forward(&socket, &state, "call-toggle-media", payload).await }
        }
    });

    socket.on("screen-share-status", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<serde_json::Value>| {
            let state = state.clone();
            async move { opaque_forward(&socket, &state, "screen-share-status", payload).await }
        }
    });

    socket.on("video-call-request", {
        let state = state.clone();
        move |socket: SocketRef, Data(payload): Data<VideoCallRequestPayload>| {
            let state = state.clone();
            async move { on_video_call_request(socket, payload, &state).await }
        }
    });

    socket.on("get-partner-info", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_get_partner_info(socket, &state).await }
        }
    });

    socket.on("get-stats", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_get_stats(socket, &state).await }
        }
    });

    socket.on("heartbeat", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_heartbeat(socket, &state).await }
        }
    });

    socket.on_disconnect({
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_disconnect(socket, &state).await }
        }
    });

    tracing::info!(peer_id = %id, sid = %socket.id, "peer connected");
}

async fn on_register(socket: SocketRef, input: RegistrationInput, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let now = Utc::now();

    let profile = match Profile::from_registration(id, input) {
        Ok(p) => p,
        Err(err) => {
            emit_error(&socket, "register-error", &err);
            return;
        }
    };

    state.sessions.register(profile, now);
    let _ = socket.emit("registered", &RegisteredPayload { peer_id: id });
    tracing::info!(peer_id = %id, "peer registered");
}

// ---------------------------------------------------------------------------
// Search lifecycle
// ---------------------------------------------------------------------------

async fn on_search(socket: SocketRef, payload: SearchPayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let now = Utc::now();

    let Some(handle) = state.sessions.get(id) else {
        emit_error(&socket, "search-error", &AppError::not_registered());
        return;
    };

    let (profile, attempts) = {
        let mut session = handle.lock().await;
        if session.status == crate::session::Status::Chatting {
            drop(session);
            emit_error(&socket, "search-error", &AppError::already_paired());
            return;
        }
        if session.status == crate::session::Status::Searching {
            drop(session);
            emit_error(&socket, "search-error", &AppError::already_searching());
            return;
        }
        session.begin_search(payload.mode, now);
        (session.profile.clone(), session.attempts)
    };

    state.engine.add(profile, now, attempts);
    let _ = socket.emit("searching", &serde_json::json!({ "status": "searching" }));
    try_commit_match(&socket, state, id).await;
}

async fn on_cancel_search(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let now = Utc::now();
    state.engine.remove(id);
    if let Some(handle) = state.sessions.get(id) {
        handle.lock().await.stop_search(now);
    }
    let _ = socket.emit("search-cancelled", &serde_json::json!({}));
}

/// Attempts to find and commit a match for `id` right after it enters the
/// pool.
async fn try_commit_match(socket: &SocketRef, state: &Arc<AppState>, id: PeerId) {
    let now = Utc::now();
    let Some(candidate_id) = state.engine.find_match(id, now) else {
        return;
    };
    let score = state.engine.score_between(id, candidate_id).unwrap_or(0.0);

    let Some(outcome) = state.pairs.commit(&state.sessions, &state.engine, id, candidate_id, score, now).await else {
        return; // RaceLost — matching engine's next pass will retry
    };

    emit_matched(state, &outcome).await;
    let _ = socket; // both sides are notified via room broadcast, not directly
}

/// Broadcasts a freshly-committed match to both peers. Shared between the
/// opportunistic commit attempt here and the periodic rematch loop in
/// `main.rs`, since both paths produce the same `MatchOutcome`.
pub async fn emit_matched(state: &Arc<AppState>, outcome: &crate::pairing::MatchOutcome) {
    let (Some(a), Some(b)) = (state.sessions.get(outcome.peer_a), state.sessions.get(outcome.peer_b)) else {
        return;
    };
    let a_profile = a.lock().await.profile.clone();
    let b_profile = b.lock().await.profile.clone();

    let a_payload = MatchedPayload {
        partner: PartnerSummary::from(&b_profile),
        compatibility: outcome.score,
        shared_interests: outcome.shared_interests.clone(),
        matched_at: outcome.matched_at,
        match_mode: outcome.mode,
        room_id: outcome.room_id,
    };
    let b_payload = MatchedPayload {
        partner: PartnerSummary::from(&a_profile),
        compatibility: outcome.score,
        shared_interests: outcome.shared_interests.clone(),
        matched_at: outcome.matched_at,
        match_mode: outcome.mode,
        room_id: outcome.room_id,
    };

    let _ = state.io.to(peer_room(outcome.peer_a)).emit("matched", &a_payload);
    let _ = state.io.to(peer_room(outcome.peer_b)).emit("matched", &b_payload);

    if let Some(call_id) = outcome.call_id {
        let ready = VideoMatchReadyPayload { room_id: outcome.room_id, call_id };
        let _ = state.io.to(peer_room(outcome.peer_a)).emit("video-match-ready", &ready);
        let _ = state.io.to(peer_room(outcome.peer_b)).emit("video-match-ready", &ready);
    }
}

async fn on_next(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let now = Utc::now();

    let Some(handle) = state.sessions.get(id) else {
        emit_error(&socket, "search-error", &AppError::not_registered());
        return;
    };

    {
        let session = handle.lock().await;
        if session.status != crate::session::Status::Chatting {
            drop(session);
            emit_error(&socket, "search-error", &AppError::not_paired());
            return;
        }
    }

    if let Some(partner_id) = state.pairs.partner_of(id) {
        state
            .pairs
            .teardown(&state.sessions, &state.engine, &state.relay, id, partner_id, TeardownReason::NextRequested, now)
            .await;
        let _ = state
            .io
            .to(peer_room(partner_id))
            .emit("partnerDisconnected", &PartnerDisconnectedPayload { reason: TeardownReason::NextRequested.as_str().to_string() });
    }

    let (profile, attempts) = {
        let mut session = handle.lock().await;
        session.next(now);
        (session.profile.clone(), session.attempts)
    };
    state.engine.add(profile, now, attempts);
    let _ = socket.emit("searching", &serde_json::json!({ "status": "searching" }));
    try_commit_match(&socket, state, id).await;
}

async fn on_disconnect_partner(socket: SocketRef, payload: ReasonPayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let now = Utc::now();
    let Some(partner_id) = state.pairs.partner_of(id) else {
        emit_error(&socket, "search-error", &AppError::not_paired());
        return;
    };

    state
        .pairs
        .teardown(&state.sessions, &state.engine, &state.relay, id, partner_id, TeardownReason::ManualDisconnect, now)
        .await;

    let reason = payload.reason.unwrap_or_else(|| TeardownReason::ManualDisconnect.as_str().to_string());
    let _ = state
        .io
        .to(peer_room(partner_id))
        .emit("partnerDisconnected", &PartnerDisconnectedPayload { reason });
}

// ---------------------------------------------------------------------------
// Chat + typing
// ---------------------------------------------------------------------------

async fn on_message(socket: SocketRef, payload: MessagePayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let Some(partner_id) = state.pairs.partner_of(id) else {
        emit_error(&socket, "message-error", &AppError::not_paired());
        return;
    };

    let message = match state.relay.send_message(&state.pairs, id, partner_id, &payload.text, Utc::now()) {
        Ok(m) => m,
        Err(err) => {
            emit_error(&socket, "message-error", &err);
            return;
        }
    };

    let username = match state.sessions.get(id) {
        Some(handle) => handle.lock().await.profile.username.clone(),
        None => String::new(),
    };

    let out = MessagePayloadOut { id: message.id, from: id, username, text: message.text, sent_at: message.sent_at };
    let _ = state.io.to(peer_room(partner_id)).emit("message", &out);
    let _ = socket.emit("message-sent", &MessageSentPayload { id: message.id, sent_at: message.sent_at });
}

async fn on_typing(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let Some(partner_id) = state.pairs.partner_of(id) else { return };
    let now = Utc::now();
    if state.relay.start_typing(&state.pairs, id, partner_id, now).is_err() {
        return;
    }
    let _ = state.io.to(peer_room(partner_id)).emit("partnerTyping", &serde_json::json!({ "from": id }));

    let state = state.clone();
    let typing_stop_secs = state.config.typing_stop_secs;
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(typing_stop_secs)).await;
        if state.relay.stop_typing(id, now) {
            if let Some(partner_id) = state.pairs.partner_of(id) {
                let _ = state
                    .io
                    .to(peer_room(partner_id))
                    .emit("partnerTypingStopped", &serde_json::json!({ "from": id }));
            }
        }
    });
}

async fn on_typing_stopped(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let Some(since) = state.relay.typing_since(id) else { return };
    if !state.relay.stop_typing(id, since) {
        return;
    }
    if let Some(partner_id) = state.pairs.partner_of(id) {
        let _ = state.io.to(peer_room(partner_id)).emit("partnerTypingStopped", &serde_json::json!({ "from": id }));
    }
}

// ---------------------------------------------------------------------------
// WebRTC signaling
// ---------------------------------------------------------------------------

async fn on_webrtc_offer(socket: SocketRef, payload: WebRtcOfferPayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    match state.relay.offer(&state.pairs, id, payload.to, payload.call_id) {
        Ok(outcome) => {
            let forward = serde_json::json!({
                "from": id,
                "sdp": payload.sdp,
                "callId": outcome.call_id,
                "roomId": outcome.room_id,
                "metadata": payload.metadata,
            });
            let _ = state.io.to(peer_room(payload.to)).emit("webrtc-offer", &forward);
        }
        Err(err) => emit_error(&socket, "webrtc-error", &err),
    }
}

async fn on_webrtc_answer(socket: SocketRef, payload: WebRtcAnswerPayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    match state.relay.answer(&state.pairs, id, payload.to, payload.call_id) {
        Ok(outcome) => {
            let forward = serde_json::json!({
                "from": id,
                "sdp": payload.sdp,
                "callId": payload.call_id,
                "roomId": outcome.room_id,
            });
            let _ = state.io.to(peer_room(payload.to)).emit("webrtc-answer", &forward);
        }
        Err(err) => emit_error(&socket, "webrtc-error", &err),
    }
}

async fn on_webrtc_ice_candidate(socket: SocketRef, payload: WebRtcIceCandidatePayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    if let Err(err) = state.relay.ice_candidate(&state.pairs, id, payload.to) {
        emit_error(&socket, "webrtc-error", &err);
        return;
    }
    let forward = serde_json::json!({ "from": id, "candidate": payload.candidate });
    let _ = state.io.to(peer_room(payload.to)).emit("webrtc-ice-candidate", &forward);
}

async fn on_webrtc_end(socket: SocketRef, payload: WebRtcEndPayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    match state.relay.end_call(&state.pairs, id, payload.to, false) {
        Ok(_) => {
            let forward = serde_json::json!({ "from": id, "reason": payload.reason });
            let _ = state.io.to(peer_room(payload.to)).emit("webrtc-end", &forward);
        }
        Err(err) => emit_error(&socket, "webrtc-error", &err),
    }
}

async fn on_webrtc_reject(socket: SocketRef, payload: WebRtcRejectPayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    match state.relay.end_call(&state.pairs, id, payload.to, true) {
        Ok(_) => {
            let forward = serde_json::json!({ "from": id, "reason": payload.reason });
            let _ = state.io.to(peer_room(payload.to)).emit("webrtc-reject", &forward);
        }
        Err(err) => emit_error(&socket, "webrtc-error", &err),
    }
}

/// Opaque-forward events: only containment is enforced, the payload passes through
/// untouched.
async fn opaque_forward(socket: &SocketRef, state: &Arc<AppState>, event: &str, payload: serde_json::Value) {
    let Some(id) = peer_id(socket) else { return };
    let Some(partner_id) = state.pairs.partner_of(id) else { return };
    if state.relay.opaque_forward(&state.pairs, id, partner_id).is_err() {
        return;
    }
    let _ = state.io.to(peer_room(partner_id)).emit(event, &payload);
}

async fn on_video_call_request(socket: SocketRef, payload: VideoCallRequestPayload, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let Some(partner_id) = state.pairs.partner_of(id) else { return };
    let now = Utc::now();
    if state.relay.request_video_call(&state.pairs, id, partner_id, payload.call_id, now).is_err() {
        return;
    }
    let forward = serde_json::json!({ "from": id, "callId": payload.call_id });
    let _ = state.io.to(peer_room(partner_id)).emit("video-call-request", &forward);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

async fn on_get_partner_info(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let Some(partner_id) = state.pairs.partner_of(id) else {
        emit_error(&socket, "search-error", &AppError::not_paired());
        return;
    };
    let Some(handle) = state.sessions.get(partner_id) else { return };
    let profile = handle.lock().await.profile.clone();
    let _ = socket.emit("partner-info", &PartnerSummary::from(&profile));
}

async fn on_get_stats(socket: SocketRef, state: &Arc<AppState>) {
    let snapshot = stats::snapshot(&state.sessions, &state.engine, &state.pairs, &state.relay, Utc::now());
    let _ = socket.emit("stats", &snapshot);
}

async fn on_heartbeat(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let now = Utc::now();
    if let Some(handle) = state.sessions.get(id) {
        handle.lock().await.touch(now);
    }
    let _ = socket.emit("heartbeat-response", &serde_json::json!({ "at": now }));
}

// ---------------------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------------------

async fn on_disconnect(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = peer_id(&socket) else { return };
    let now = Utc::now();

    state.engine.remove(id);
    if let Some(partner_id) = state.pairs.partner_of(id) {
        state
            .pairs
            .teardown(&state.sessions, &state.engine, &state.relay, id, partner_id, TeardownReason::Disconnected, now)
            .await;
        let _ = state
            .io
            .to(peer_room(partner_id))
            .emit("partnerDisconnected", &PartnerDisconnectedPayload { reason: TeardownReason::Disconnected.as_str().to_string() });
    }
    state.sessions.remove(id);
    tracing::info!(peer_id = %id, "peer disconnected");
}
