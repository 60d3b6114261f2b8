//! Stats & Introspection. Pure aggregation over the other
//! components' live state — no state of its own beyond what `MatchingStats`
//! already reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::matching::MatchingEngine;
use crate::pairing::{CallStatus, PairRegistry};
use crate::relay::Relay;
use crate::session::SessionRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub online: usize,
    pub searching: usize,
    pub active_pairs: usize,
    pub active_calls: usize,
    pub waiting_video: usize,
    pub waiting_text: usize,
    pub typing: usize,
    pub avg_wait_secs: f64,
}

/// Snapshot across Session/Pairing/Relay/Matching, for `get-stats` and the
/// periodic `stats`/`stats-updated` broadcast.
pub fn snapshot(
    sessions: &SessionRegistry,
    engine: &MatchingEngine,
    pairs: &PairRegistry,
    relay: &Relay,
    now: DateTime<Utc>,
) -> Stats {
    let peer_ids = sessions.peer_ids();
    let online = peer_ids.len();
    let typing = peer_ids.iter().filter(|id| relay.is_typing(**id)).count();

    let matching = engine.stats(now);

    let mut active_pairs = 0usize;
    let mut active_calls = 0usize;
    let mut counted_rooms = std::collections::HashSet::new();
    for peer_id in &peer_ids {
        if let Some(room) = pairs.room_of_peer(*peer_id) {
            if counted_rooms.insert(room.id) {
                active_pairs += 1;
                if matches!(room.call.map(|c| c.status), Some(CallStatus::Offered) | Some(CallStatus::Answered)) {
                    active_calls += 1;
                }
            }
        }
    }

    Stats {
        online,
        searching: matching.waiting_total,
        active_pairs,
        active_calls,
        waiting_video: matching.waiting_video,
        waiting_text: matching.waiting_text,
        typing,
        avg_wait_secs: matching.avg_wait_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringWeights;
    use crate::profile::{AgeRange, ChatMode, Gender, GenderPreference, Profile};
    use uuid::Uuid;

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

    #[tokio::test]
    async fn snapshot_counts_waiting_and_paired_peers_separately() {
        let sessions = SessionRegistry::new();
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let pairs = PairRegistry::new();
        let relay = Relay::new();
        let now = Utc::now();

        let waiter = profile(ChatMode::Text);
        sessions.register(waiter.clone(), now);
        engine.add(waiter, now, 0);

        let a = profile(ChatMode::Video);
        let b = profile(ChatMode::Video);
        let (a_id, b_id) = (a.id, b.id);
        sessions.register(a, now);
        sessions.register(b, now);
        pairs.commit(&sessions, &engine, a_id, b_id, 90.0, now).await.unwrap();

        let stats = snapshot(&sessions, &engine, &pairs, &relay, now);
        assert_eq!(stats.online, 3);
        assert_eq!(stats.searching, 1);
        assert_eq!(stats.active_pairs, 1);
        assert_eq!(stats.waiting_text, 1);
    }
}
