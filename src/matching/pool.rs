//! In-memory state owned by the `MatchingEngine`: the waiting pool, the
//! pairwise compatibility-score index, the block list and match history.
//! Plain in-process collections behind one lock, since this system has no
//! second process to share state with.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::profile::{PeerId, Profile};

/// A peer currently searching for a partner.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub profile: Profile,
    pub joined_at: DateTime<Utc>,
    pub attempts: u32,
}

impl WaitingEntry {
    pub fn wait_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.joined_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Match count between one unordered pair of peers, stored under the
/// canonical `(min, max)` key ordering so lookups don't care which side
/// asks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairHistory {
    pub times_matched: u32,
}

fn canonical_pair(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Waiting pool + compatibility cache/score index + block list + match
/// history. Guarded by a single lock in `MatchingEngine` — every method
/// here assumes exclusive access and does no I/O, so the critical section
/// is always short.
#[derive(Debug, Default)]
pub struct PoolState {
    waiting: HashMap<PeerId, WaitingEntry>,
    /// `peerId -> (partnerId -> score)`, precomputed by `add` and refreshed
    /// periodically by the matching engine's rematch loop.
    score_index: HashMap<PeerId, HashMap<PeerId, f64>>,
    blocks: HashMap<PeerId, HashSet<PeerId>>,
    history: HashMap<(PeerId, PeerId), u32>,
}

impl PoolState {
    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.waiting.contains_key(&peer_id)
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&WaitingEntry> {
        self.waiting.get(&peer_id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.waiting.keys().copied()
    }

    pub fn insert(&mut self, entry: WaitingEntry) {
        self.waiting.insert(entry.profile.id, entry);
    }

    /// Removes `peer_id` from the pool and evicts every score-index entry
    /// mentioning it, in either direction.
    pub fn remove(&mut self, peer_id: PeerId) -> Option<WaitingEntry> {
        self.score_index.remove(&peer_id);
        for (_, row) in self.score_index.iter_mut() {
            row.remove(&peer_id);
        }
        self.waiting.remove(&peer_id)
    }

    pub fn set_score(&mut self, a: PeerId, b: PeerId, score: f64) {
        self.score_index.entry(a).or_default().insert(b, score);
    }

    pub fn scores_for(&self, peer_id: PeerId) -> Option<&HashMap<PeerId, f64>> {
        self.score_index.get(&peer_id)
    }

    /// Symmetric block: inserts both directions and evicts the pair's
    /// score-index entries.
    pub fn block(&mut self, peer_id: PeerId, other_id: PeerId) {
        self.blocks.entry(peer_id).or_default().insert(other_id);
        self.blocks.entry(other_id).or_default().insert(peer_id);
        if let Some(row) = self.score_index.get_mut(&peer_id) {
            row.remove(&other_id);
        }
        if let Some(row) = self.score_index.get_mut(&other_id) {
            row.remove(&peer_id);
        }
    }

    pub fn is_blocked(&self, a: PeerId, b: PeerId) -> bool {
        self.blocks.get(&a).is_some_and(|s| s.contains(&b))
    }

    pub fn history_of(&self, a: PeerId, b: PeerId) -> PairHistory {
        let times_matched = self.history.get(&canonical_pair(a, b)).copied().unwrap_or(0);
        PairHistory { times_matched }
    }

    pub fn record_match(&mut self, a: PeerId, b: PeerId) {
        *self.history.entry(canonical_pair(a, b)).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AgeRange, ChatMode, Gender, GenderPreference};
    use uuid::Uuid;

    fn entry(id: PeerId) -> WaitingEntry {
        WaitingEntry {
            profile: Profile {
                id,
                username: "u".into(),
                gender: Gender::NotSpecified,
                age: 25,
                interests: vec![],
                chat_mode: ChatMode::Text,
                gender_preference: GenderPreference::Any,
                age_range: AgeRange::default(),
                priority: 1.0,
            },
            joined_at: Utc::now(),
            attempts: 0,
        }
    }

    #[test]
    fn remove_evicts_score_index_both_directions() {
        let mut pool = PoolState::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        pool.insert(entry(a));
        pool.insert(entry(b));
        pool.set_score(a, b, 80.0);
        pool.set_score(b, a, 80.0);

        pool.remove(a);

        assert!(pool.scores_for(a).is_none());
        assert!(pool.scores_for(b).unwrap().get(&a).is_none());
    }

    #[test]
    fn block_is_symmetric_and_evicts_cache() {
        let mut pool = PoolState::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        pool.insert(entry(a));
        pool.insert(entry(b));
        pool.set_score(a, b, 90.0);
        pool.set_score(b, a, 90.0);

        pool.block(a, b);

        assert!(pool.is_blocked(a, b));
        assert!(pool.is_blocked(b, a));
        assert!(pool.scores_for(a).unwrap().get(&b).is_none());
        assert!(pool.scores_for(b).unwrap().get(&a).is_none());
    }

    #[test]
    fn history_key_is_unordered() {
        let mut pool = PoolState::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        pool.record_match(a, b);
        pool.record_match(b, a);
        assert_eq!(pool.history_of(a, b).times_matched, 2);
        assert_eq!(pool.history_of(b, a).times_matched, 2);
    }
}
