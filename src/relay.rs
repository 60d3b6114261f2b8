//! Signaling Relay. Every operation here first proves the two
//! peers are currently paired with each other — "no cross-pair forwarding
//! ever" — then either mutates the `CallRecord` owned by the `PairRegistry`
//! or just hands back the data the transport layer should forward. One
//! typed function per event tag, not one opaque catch-all (see DESIGN.md).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::AppError;
use crate::pairing::{CallId, CallRecord, CallStatus, PairRegistry, RoomId};
use crate::profile::PeerId;

const MAX_MESSAGE_LEN: usize = 1000;
const MAX_HISTORY_PER_ROOM: usize = 200;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: Uuid,
    pub from: PeerId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// A `video-call-request`, distinct from a WebRTC offer: an out-of-band
/// ring with its own 30 s TTL, tracked outside the `CallRecord` the WebRTC
/// offer/answer flow owns.
#[derive(Debug, Clone)]
pub struct PendingVideoRequest {
    pub from: PeerId,
    pub call_id: Option<CallId>,
    pub requested_at: DateTime<Utc>,
}

fn verify_pairing(pairs: &PairRegistry, from: PeerId, to: PeerId) -> Result<RoomId, AppError> {
    let room = pairs.room_of_peer(from).ok_or_else(AppError::not_paired)?;
    match room.partner_of(from) {
        Some(partner) if partner == to => Ok(room.id),
        _ => Err(AppError::not_paired()),
    }
}

/// Sanitizes an inbound chat message.
pub fn sanitize_message(text: &str) -> Result<String, AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_message("message text must not be empty"));
    }
    Ok(trimmed.chars().take(MAX_MESSAGE_LEN).collect())
}

#[derive(Debug, Clone)]
pub struct OfferOutcome {
    pub room_id: RoomId,
    pub call_id: CallId,
}

#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub room_id: RoomId,
}

/// Owns message history, typing state and out-of-band video-call-request
/// pings — everything the relay needs beyond the `PairRegistry`'s rooms and
/// call records.
#[derive(Debug, Default)]
pub struct Relay {
    history: DashMap<RoomId, Vec<ChatMessage>>,
    typing: DashMap<PeerId, DateTime<Utc>>,
    pending_video_requests: DashMap<PeerId, PendingVideoRequest>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relays a chat message. Returns the message to forward to the
    /// partner as `message`, and to the sender as the ack for
    /// `message-sent`.
    pub fn send_message(
        &self,
        pairs: &PairRegistry,
        from: PeerId,
        to: PeerId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatMessage, AppError> {
        let room_id = verify_pairing(pairs, from, to)?;
        let text = sanitize_message(text)?;
        let message = ChatMessage { id: Uuid::new_v4(), from, text, sent_at: now };

        let mut entry = self.history.entry(room_id).or_default();
        entry.push(message.clone());
        if entry.len() > MAX_HISTORY_PER_ROOM {
            let excess = entry.len() - MAX_HISTORY_PER_ROOM;
            entry.drain(0..excess);
        }
        Ok(message)
    }

    pub fn clear_history(&self, room_id: RoomId) {
        self.history.remove(&room_id);
    }

    /// Marks `from` as typing. Caller is responsible for arming the 3 s
    /// inactivity timer and calling `stop_typing` either when it elapses
    /// or on explicit `typingStopped`.
    pub fn start_typing(&self, pairs: &PairRegistry, from: PeerId, to: PeerId, now: DateTime<Utc>) -> Result<(), AppError> {
        verify_pairing(pairs, from, to)?;
        self.typing.insert(from, now);
        Ok(())
    }

    /// Clears typing state. Returns `true` if `from` was still marked typing
    /// as of `since` — lets a timer fired for a stale keystroke recognize it
    /// has been superseded by a newer one and skip emitting `partnerTypingStopped`.
    pub fn stop_typing(&self, from: PeerId, since: DateTime<Utc>) -> bool {
        match self.typing.get(&from) {
            Some(last) if *last == since => {
                drop(last);
                self.typing.remove(&from);
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    pub fn typing_since(&self, peer_id: PeerId) -> Option<DateTime<Utc>> {
        self.typing.get(&peer_id).map(|e| *e)
    }

    pub fn is_typing(&self, peer_id: PeerId) -> bool {
        self.typing.contains_key(&peer_id)
    }

    /// Handles `webrtc-offer`. Allocates `callId` if absent, marks the
    /// call offered.
    pub fn offer(
        &self,
        pairs: &PairRegistry,
        from: PeerId,
        to: PeerId,
        call_id: Option<CallId>,
    ) -> Result<OfferOutcome, AppError> {
        let room_id = verify_pairing(pairs, from, to)?;
        let call_id = call_id.unwrap_or_else(Uuid::new_v4);
        pairs.set_call_record(room_id, CallRecord { call_id, status: CallStatus::Offered });
        Ok(OfferOutcome { room_id, call_id })
    }

    /// Handles `webrtc-answer`. Synthesizes a `CallRecord` if the offer
    /// never passed through this relay.
    pub fn answer(
        &self,
        pairs: &PairRegistry,
        from: PeerId,
        to: PeerId,
        call_id: CallId,
    ) -> Result<AnswerOutcome, AppError> {
        let room_id = verify_pairing(pairs, from, to)?;
        pairs.set_call_record(room_id, CallRecord { call_id, status: CallStatus::Answered });
        Ok(AnswerOutcome { room_id })
    }

    /// `webrtc-ice-candidate` — opaque forward, no `CallRecord` mutation.
    pub fn ice_candidate(&self, pairs: &PairRegistry, from: PeerId, to: PeerId) -> Result<(), AppError> {
        verify_pairing(pairs, from, to).map(|_| ())
    }

    /// Handles `webrtc-end` / `webrtc-reject`. Clears the call record but
    /// keeps the pair (and room) alive.
    pub fn end_call(&self, pairs: &PairRegistry, from: PeerId, to: PeerId, rejected: bool) -> Result<RoomId, AppError> {
        let room_id = verify_pairing(pairs, from, to)?;
        if let Some(room) = pairs.room(room_id) {
            if let Some(call) = room.call {
                let status = if rejected { CallStatus::Rejected } else { CallStatus::Ended };
                pairs.set_call_record(room_id, CallRecord { call_id: call.call_id, status });
            }
        }
        pairs.clear_call(room_id);
        Ok(room_id)
    }

    /// Media toggle / screen-share status / call-status — opaque forward,
    /// only containment is enforced.
    pub fn opaque_forward(&self, pairs: &PairRegistry, from: PeerId, to: PeerId) -> Result<(), AppError> {
        verify_pairing(pairs, from, to).map(|_| ())
    }

    /// Handles `video-call-request`. Records the ping in a map distinct
    /// from `CallRecord` and returns it for forwarding.
    pub fn request_video_call(
        &self,
        pairs: &PairRegistry,
        from: PeerId,
        to: PeerId,
        call_id: Option<CallId>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        verify_pairing(pairs, from, to)?;
        self.pending_video_requests.insert(to, PendingVideoRequest { from, call_id, requested_at: now });
        Ok(())
    }

    pub fn take_pending_video_request(&self, peer_id: PeerId) -> Option<PendingVideoRequest> {
        self.pending_video_requests.remove(&peer_id).map(|(_, v)| v)
    }

    /// Drops any pending `video-call-request` keyed by or sent by either
    /// peer. Called at pair teardown so a stale ping from the old pairing
    /// can't be consumed by an unrelated future pairing of the same peer id.
    pub fn clear_peer_video_requests(&self, a: PeerId, b: PeerId) {
        self.pending_video_requests.retain(|to, req| *to != a && *to != b && req.from != a && req.from != b);
    }

    /// Drops `video-call-request`s older than `ttl_secs`. Driven by the
    /// same periodic sweep as session inactivity.
    pub fn sweep_expired_video_requests(&self, now: DateTime<Utc>, ttl_secs: u64) -> Vec<PeerId> {
        let expired: Vec<PeerId> = self
            .pending_video_requests
            .iter()
            .filter(|e| (now - e.value().requested_at).num_seconds() as u64 > ttl_secs)
            .map(|e| *e.key())
            .collect();
        for peer_id in &expired {
            self.pending_video_requests.remove(peer_id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchingEngine;
    use crate::config::ScoringWeights;
    use crate::profile::{AgeRange, ChatMode, Gender, GenderPreference, Profile};
    use crate::session::SessionRegistry;

    fn profile(mode: ChatMode) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            username: "u".into(),
            gender: Gender::NotSpecified,
            age: 25,
            interests: vec![],
            chat_mode: mode,
            gender_preference: GenderPreference::Any,
            age_range: AgeRange::default(),
            priority: 1.0,
        }
    }

    async fn paired(mode: ChatMode) -> (PairRegistry, PeerId, PeerId) {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let now = Utc::now();
        let a = profile(mode);
        let b = profile(mode);
        let (a_id, b_id) = (a.id, b.id);
        sessions.register(a, now);
        sessions.register(b, now);
        let pairs = PairRegistry::new();
        pairs.commit(&sessions, &engine, a_id, b_id, 80.0, now).await.unwrap();
        (pairs, a_id, b_id)
    }

    #[test]
    fn sanitize_message_trims_and_rejects_empty() {
        assert_eq!(sanitize_message("  hi  ").unwrap(), "hi");
        assert!(sanitize_message("   ").is_err());
    }

    #[test]
    fn sanitize_message_caps_length() {
        let long = "a".repeat(2000);
        let out = sanitize_message(&long).unwrap();
        assert_eq!(out.len(), MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn send_message_requires_current_pairing() {
        let (pairs, a_id, _b_id) = paired(ChatMode::Text).await;
        let relay = Relay::new();
        let stranger = Uuid::new_v4();
        let err = relay.send_message(&pairs, a_id, stranger, "hi", Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Known { code: crate::errors::ErrorCode::NotPaired, .. }));
    }

    #[tokio::test]
    async fn send_message_succeeds_between_paired_peers() {
        let (pairs, a_id, b_id) = paired(ChatMode::Text).await;
        let relay = Relay::new();
        let msg = relay.send_message(&pairs, a_id, b_id, "hello", Utc::now()).unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.from, a_id);
    }

    #[tokio::test]
    async fn offer_then_answer_transitions_call_status() {
        let (pairs, a_id, b_id) = paired(ChatMode::Video).await;
        let relay = Relay::new();
        let offer = relay.offer(&pairs, a_id, b_id, None).unwrap();
        assert_eq!(pairs.room(offer.room_id).unwrap().call.unwrap().status, CallStatus::Offered);

        relay.answer(&pairs, b_id, a_id, offer.call_id).unwrap();
        assert_eq!(pairs.room(offer.room_id).unwrap().call.unwrap().status, CallStatus::Answered);
    }

    #[tokio::test]
    async fn end_call_clears_record_but_keeps_room() {
        let (pairs, a_id, b_id) = paired(ChatMode::Video).await;
        let relay = Relay::new();
        let offer = relay.offer(&pairs, a_id, b_id, None).unwrap();
        relay.end_call(&pairs, a_id, b_id, false).unwrap();
        let room = pairs.room(offer.room_id).unwrap();
        assert!(room.call.is_none());
        // the room itself is still there — chat isn't torn down by a call end
        assert_eq!(pairs.room_id_of(a_id), Some(offer.room_id));
    }

    #[tokio::test]
    async fn video_call_request_expires_after_ttl() {
        let (pairs, a_id, b_id) = paired(ChatMode::Video).await;
        let relay = Relay::new();
        let start = Utc::now();
        relay.request_video_call(&pairs, a_id, b_id, None, start).unwrap();
        assert!(relay.take_pending_video_request(b_id).is_some());

        relay.request_video_call(&pairs, a_id, b_id, None, start).unwrap();
        let later = start + chrono::Duration::seconds(31);
        let expired = relay.sweep_expired_video_requests(later, 30);
        assert_eq!(expired, vec![b_id]);
        assert!(relay.take_pending_video_request(b_id).is_none());
    }
}
