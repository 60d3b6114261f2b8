//! Pair & Room Registry plus the `CallRecord` bookkeeping the signaling
//! relay reads and updates. Pair commit/teardown take both peers' session
//! locks in a fixed, globally-consistent order — the in-process analogue
//! of a distributed per-user lock extended to two parties at once.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::matching::MatchingEngine;
use crate::profile::{ChatMode, PeerId};
use crate::relay::Relay;
use crate::session::{SessionRegistry, Status};

pub type RoomId = Uuid;
pub type CallId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Pending,
    Offered,
    Answered,
    Ended,
    Rejected,
}

#[derive(Debug, Clone, Copy)]
pub struct CallRecord {
    pub call_id: CallId,
    pub status: CallStatus,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub peer_a: PeerId,
    pub peer_b: PeerId,
    pub mode: ChatMode,
    pub call: Option<CallRecord>,
}

impl Room {
    pub fn partner_of(&self, peer_id: PeerId) -> Option<PeerId> {
        if peer_id == self.peer_a {
            Some(self.peer_b)
        } else if peer_id == self.peer_b {
            Some(self.peer_a)
        } else {
            None
        }
    }
}

/// Outcome of a successful pair commit. Carries
/// everything the caller needs to build the two `matched` / optional
/// `video-match-ready` payloads; the registry itself never touches the
/// transport.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub peer_a: PeerId,
    pub peer_b: PeerId,
    pub room_id: RoomId,
    pub mode: ChatMode,
    pub call_id: Option<CallId>,
    pub score: f64,
    pub shared_interests: Vec<String>,
    pub matched_at: DateTime<Utc>,
}

/// Reasons a pairing is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    NextRequested,
    ManualDisconnect,
    NewSearch,
    Inactive,
    Disconnected,
}

impl TeardownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NextRequested => "next_requested",
            Self::ManualDisconnect => "manual_disconnect",
            Self::NewSearch => "new_search",
            Self::Inactive => "inactive",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether the session itself should be dropped rather than returned
    /// to `ready`.
    pub fn drops_session(&self) -> bool {
        matches!(self, Self::Inactive | Self::Disconnected)
    }
}

#[derive(Debug, Clone)]
pub struct TeardownOutcome {
    pub had_pairing: bool,
    pub room_id: Option<RoomId>,
}

/// Owns every active `Room`, keyed both by id and by
/// member peer for O(1) lookup from either side.
#[derive(Debug, Default)]
pub struct PairRegistry {
    rooms: DashMap<RoomId, Room>,
    room_of_peer: DashMap<PeerId, RoomId>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_id_of(&self, peer_id: PeerId) -> Option<RoomId> {
        self.room_of_peer.get(&peer_id).map(|e| *e)
    }

    pub fn room(&self, room_id: RoomId) -> Option<Room> {
        self.rooms.get(&room_id).map(|e| e.clone())
    }

    pub fn room_of_peer(&self, peer_id: PeerId) -> Option<Room> {
        self.room_id_of(peer_id).and_then(|id| self.room(id))
    }

    pub fn partner_of(&self, peer_id: PeerId) -> Option<PeerId> {
        self.room_of_peer(peer_id).and_then(|r| r.partner_of(peer_id))
    }

    pub fn set_call_record(&self, room_id: RoomId, record: CallRecord) {
        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.call = Some(record);
        }
    }

    pub fn clear_call(&self, room_id: RoomId) {
        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.call = None;
        }
    }

    /// Commits a pair. Re-verifies under lock
    /// that both peers are still `searching`; returns `None` (`RaceLost`)
    /// if not, leaving both sessions untouched for the matching engine to
    /// retry on its next pass.
    pub async fn commit(
        &self,
        sessions: &SessionRegistry,
        engine: &MatchingEngine,
        a_id: PeerId,
        b_id: PeerId,
        score: f64,
        now: DateTime<Utc>,
    ) -> Option<MatchOutcome> {
        let (first_id, second_id) = SessionRegistry::lock_order(a_id, b_id);
        let first_handle = sessions.get(first_id)?;
        let second_handle = sessions.get(second_id)?;

        let mut first = first_handle.lock().await;
        let mut second = second_handle.lock().await;

        if first.status != Status::Searching || second.status != Status::Searching {
            return None;
        }

        let room_id = Uuid::new_v4();
        let mode = first.profile.chat_mode;

        first.enter_pair(second_id, room_id, now);
        second.enter_pair(first_id, room_id, now);

        let shared_interests: Vec<String> = first
            .profile
            .interests
            .iter()
            .filter(|i| second.profile.interests.contains(i))
            .cloned()
            .collect();

        let call_id = if mode == ChatMode::Video {
            let call_id = Uuid::new_v4();
            self.rooms.insert(
                room_id,
                Room {
                    id: room_id,
                    peer_a: first_id,
                    peer_b: second_id,
                    mode,
                    call: Some(CallRecord { call_id, status: CallStatus::Pending }),
                },
            );
            Some(call_id)
        } else {
            self.rooms.insert(
                room_id,
                Room { id: room_id, peer_a: first_id, peer_b: second_id, mode, call: None },
            );
            None
        };
        self.room_of_peer.insert(first_id, room_id);
        self.room_of_peer.insert(second_id, room_id);

        drop(first);
        drop(second);
        engine.remove(a_id);
        engine.remove(b_id);
        engine.record_match(a_id, b_id);

        Some(MatchOutcome {
            peer_a: first_id,
            peer_b: second_id,
            room_id,
            mode,
            call_id,
            score,
            shared_interests,
            matched_at: now,
        })
    }

    /// Tears down a pairing. Idempotent: safe
    /// to call on a peer with no active room. Clears the room's message
    /// history and any pending video-call request mentioning either peer,
    /// so nothing from this pairing can leak into either peer's next one.
    pub async fn teardown(
        &self,
        sessions: &SessionRegistry,
        engine: &MatchingEngine,
        relay: &Relay,
        a_id: PeerId,
        b_id: PeerId,
        reason: TeardownReason,
        now: DateTime<Utc>,
    ) -> TeardownOutcome {
        let (first_id, second_id) = SessionRegistry::lock_order(a_id, b_id);
        let first_handle = sessions.get(first_id);
        let second_handle = sessions.get(second_id);

        if let Some(h) = &first_handle {
            let mut s = h.lock().await;
            if !reason.drops_session() {
                s.leave_pair(now);
            }
        }
        if let Some(h) = &second_handle {
            let mut s = h.lock().await;
            if !reason.drops_session() {
                s.leave_pair(now);
            }
        }

        let room_id = self.room_of_peer.remove(&first_id).map(|(_, v)| v);
        self.room_of_peer.remove(&second_id);
        let had_pairing = if let Some(id) = room_id {
            self.rooms.remove(&id).is_some()
        } else {
            false
        };

        if let Some(id) = room_id {
            relay.clear_history(id);
        }
        relay.clear_peer_video_requests(a_id, b_id);

        engine.remove(a_id);
        engine.remove(b_id);

        TeardownOutcome { had_pairing, room_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringWeights;
    use crate::profile::{AgeRange, Gender, GenderPreference, Profile};

    fn profile(mode: ChatMode) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            username: "u".into(),
            gender: Gender::NotSpecified,
            age: 25,
            interests: vec!["music".into(), "travel".into()],
            chat_mode: mode,
            gender_preference: GenderPreference::Any,
            age_range: AgeRange::default(),
            priority: 1.0,
        }
    }

    #[tokio::test]
    async fn commit_sets_both_sessions_chatting_with_shared_room() {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let now = Utc::now();
        let a = profile(ChatMode::Text);
        let b = profile(ChatMode::Text);
        let (a_id, b_id) = (a.id, b.id);

        let a_handle = sessions.register(a.clone(), now);
        let b_handle = sessions.register(b.clone(), now);
        a_handle.lock().await.begin_search(None, now);
        b_handle.lock().await.begin_search(None, now);
        engine.add(a, now, 0);
        engine.add(b, now, 0);

        let registry = PairRegistry::new();
        let outcome = registry.commit(&sessions, &engine, a_id, b_id, 80.0, now).await.unwrap();
        assert_eq!(outcome.shared_interests, vec!["music".to_string(), "travel".to_string()]);
        assert!(outcome.call_id.is_none());

        let a_session = a_handle.lock().await;
        let b_session = b_handle.lock().await;
        assert_eq!(a_session.status, Status::Chatting);
        assert_eq!(a_session.partner_id, Some(b_id));
        assert_eq!(a_session.room_id, b_session.room_id);
        assert!(!engine.contains(a_id));
        assert!(!engine.contains(b_id));
    }

    #[tokio::test]
    async fn commit_allocates_call_record_for_video_mode() {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let now = Utc::now();
        let a = profile(ChatMode::Video);
        let b = profile(ChatMode::Video);
        let (a_id, b_id) = (a.id, b.id);
        sessions.register(a, now);
        sessions.register(b, now);

        let registry = PairRegistry::new();
        let outcome = registry.commit(&sessions, &engine, a_id, b_id, 90.0, now).await.unwrap();
        assert!(outcome.call_id.is_some());
        let room = registry.room(outcome.room_id).unwrap();
        assert_eq!(room.call.unwrap().status, CallStatus::Pending);
    }

    #[tokio::test]
    async fn commit_aborts_if_a_peer_already_left_searching() {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let now = Utc::now();
        let a = profile(ChatMode::Text);
        let b = profile(ChatMode::Text);
        let (a_id, b_id) = (a.id, b.id);
        let a_handle = sessions.register(a, now);
        sessions.register(b, now);
        a_handle.lock().await.stop_search(now); // never entered searching

        let registry = PairRegistry::new();
        let outcome = registry.commit(&sessions, &engine, a_id, b_id, 80.0, now).await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn teardown_returns_both_to_ready_and_clears_room() {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let relay = Relay::new();
        let now = Utc::now();
        let a = profile(ChatMode::Text);
        let b = profile(ChatMode::Text);
        let (a_id, b_id) = (a.id, b.id);
        let a_handle = sessions.register(a, now);
        let b_handle = sessions.register(b, now);

        let registry = PairRegistry::new();
        registry.commit(&sessions, &engine, a_id, b_id, 80.0, now).await.unwrap();

        let outcome = registry
            .teardown(&sessions, &engine, &relay, a_id, b_id, TeardownReason::ManualDisconnect, now)
            .await;
        assert!(outcome.had_pairing);
        assert!(registry.room_of_peer(a_id).is_none());

        let a_session = a_handle.lock().await;
        let b_session = b_handle.lock().await;
        assert_eq!(a_session.status, Status::Ready);
        assert_eq!(b_session.status, Status::Ready);
    }

    #[tokio::test]
    async fn teardown_clears_pending_video_requests_between_the_pair() {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let relay = Relay::new();
        let now = Utc::now();
        let a = profile(ChatMode::Video);
        let b = profile(ChatMode::Video);
        let (a_id, b_id) = (a.id, b.id);
        sessions.register(a, now);
        sessions.register(b, now);

        let registry = PairRegistry::new();
        registry.commit(&sessions, &engine, a_id, b_id, 80.0, now).await.unwrap();
        relay.request_video_call(&registry, a_id, b_id, None, now).unwrap();

        registry
            .teardown(&sessions, &engine, &relay, a_id, b_id, TeardownReason::ManualDisconnect, now)
            .await;

        assert!(relay.take_pending_video_request(b_id).is_none());
    }

    #[tokio::test]
    async fn teardown_is_idempotent_on_unpaired_peers() {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let relay = Relay::new();
        let now = Utc::now();
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();

        let registry = PairRegistry::new();
        let outcome = registry
            .teardown(&sessions, &engine, &relay, a_id, b_id, TeardownReason::Disconnected, now)
            .await;
        assert!(!outcome.had_pairing);
    }
}
