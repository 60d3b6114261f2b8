pub mod pool;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ScoringWeights;
use crate::profile::{ChatMode, PeerId, Profile};
use crate::scoring::{calculate_score, ScoringContext};

use pool::{PoolState, WaitingEntry};

fn basic_compatible(pool: &PoolState, a: &Profile, b: &Profile) -> bool {
    if pool.is_blocked(a.id, b.id) {
        return false;
    }
    let age_ok = a.age_range.contains(b.age) && b.age_range.contains(a.age);
    let gender_ok = a.gender_preference.satisfied_by(b.gender) && b.gender_preference.satisfied_by(a.gender);
    age_ok && gender_ok
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchingStats {
    pub waiting_total: usize,
    pub waiting_video: usize,
    pub waiting_text: usize,
    pub avg_wait_secs: f64,
}

/// Scored, preference-filtered pairing engine. Owns the waiting
/// pool, compatibility cache/score index, block list and match history
/// behind one `Mutex` — every public method here does no `.await` while
/// holding it, so the critical section is always short (see DESIGN.md).
pub struct MatchingEngine {
    pool: Mutex<PoolState>,
    weights: ScoringWeights,
    video_threshold: f64,
    text_threshold: f64,
}

impl MatchingEngine {
    pub fn new(weights: ScoringWeights, video_threshold: f64, text_threshold: f64) -> Self {
        Self {
            pool: Mutex::new(PoolState::default()),
            weights,
            video_threshold,
            text_threshold,
        }
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.pool.lock().unwrap().contains(peer_id)
    }

    /// Adds `profile` to the waiting pool and precomputes its compatibility
    /// against every other waiting peer (`add`, O(N)).
    pub fn add(&self, profile: Profile, now: DateTime<Utc>, attempts: u32) {
        let mut pool = self.pool.lock().unwrap();
        let peer_id = profile.id;
        let entry = WaitingEntry { profile, joined_at: now, attempts };

        let candidates: Vec<PeerId> = pool.peers().filter(|id| *id != peer_id).collect();
        pool.insert(entry);

        for other_id in candidates {
            Self::score_pair(&mut pool, peer_id, other_id, now, &self.weights);
        }
    }

    fn score_pair(pool: &mut PoolState, a_id: PeerId, b_id: PeerId, now: DateTime<Utc>, weights: &ScoringWeights) {
        let (a, b) = match (pool.get(a_id), pool.get(b_id)) {
            (Some(a), Some(b)) => (a.clone(), b.clone()),
            _ => return,
        };
        if !basic_compatible(pool, &a.profile, &b.profile) {
            return;
        }
        let history = pool.history_of(a_id, b_id);
        let ctx_a = ScoringContext { profile: &a.profile, wait_secs: a.wait_secs(now), attempts: a.attempts };
        let ctx_b = ScoringContext { profile: &b.profile, wait_secs: b.wait_secs(now), attempts: b.attempts };
        let score = calculate_score(&ctx_a, &ctx_b, &history, weights);
        pool.set_score(a_id, b_id, score);
        pool.set_score(b_id, a_id, score);
    }

    /// Removes `peer_id` from the pool. Idempotent.
    pub fn remove(&self, peer_id: PeerId) -> bool {
        self.pool.lock().unwrap().remove(peer_id).is_some()
    }

    /// Symmetric block between two peers.
    pub fn block(&self, peer_id: PeerId, other_id: PeerId) {
        self.pool.lock().unwrap().block(peer_id, other_id);
    }

    pub fn record_match(&self, a: PeerId, b: PeerId) {
        self.pool.lock().unwrap().record_match(a, b);
    }

    /// Finds the best eligible partner for `peer_id`, or `None`. Does
    /// **not** mutate the pool — committing the pair and removing both
    /// peers is the caller's job, performed under the pair registry's own
    /// critical section.
    pub fn find_match(&self, peer_id: PeerId, now: DateTime<Utc>) -> Option<PeerId> {
        let pool = self.pool.lock().unwrap();
        let me = pool.get(peer_id)?;
        let threshold = match me.profile.chat_mode {
            ChatMode::Video => self.video_threshold,
            ChatMode::Text => self.text_threshold,
        };

        let scores = pool.scores_for(peer_id)?;
        // Tie-break key, highest wins: (score, priority, -joined_at, !id) so
        // greater score > greater priority > longer wait > lexicographically
        // smaller id.
        let mut best: Option<(PeerId, f64, f64, DateTime<Utc>)> = None; // id, score, priority, joined_at

        for (&candidate_id, &score) in scores.iter() {
            let candidate = match pool.get(candidate_id) {
                Some(c) => c,
                None => continue, // left the pool since the score was cached
            };
            // Mode strictness: never pair a video seeker with a text seeker,
            // even if a mixed pairing scores above threshold.
            if candidate.profile.chat_mode != me.profile.chat_mode {
                continue;
            }
            if score < threshold {
                continue;
            }

            let priority = candidate.profile.priority;
            let joined_at = candidate.joined_at;
            let is_better = match best {
                None => true,
                Some((best_id, best_score, best_priority, best_joined_at)) => {
                    (score, priority, std::cmp::Reverse(joined_at), std::cmp::Reverse(candidate_id))
                        > (best_score, best_priority, std::cmp::Reverse(best_joined_at), std::cmp::Reverse(best_id))
                }
            };

            if is_better {
                best = Some((candidate_id, score, priority, joined_at));
            }
        }

        best.map(|(id, ..)| id)
    }

    /// Looks up the cached score between two waiting peers, if both are
    /// still in the pool. Used when committing a match found via
    /// `find_match` to carry its `compatibility` into the `matched` event.
    pub fn score_between(&self, a: PeerId, b: PeerId) -> Option<f64> {
        self.pool.lock().unwrap().scores_for(a)?.get(&b).copied()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> MatchingStats {
        let pool = self.pool.lock().unwrap();
        let mut waiting_video = 0usize;
        let mut waiting_text = 0usize;
        let mut total_wait = 0.0;
        let mut count = 0usize;
        for id in pool.peers() {
            if let Some(entry) = pool.get(id) {
                match entry.profile.chat_mode {
                    ChatMode::Video => waiting_video += 1,
                    ChatMode::Text => waiting_text += 1,
                }
                total_wait += entry.wait_secs(now);
                count += 1;
            }
        }
        MatchingStats {
            waiting_total: pool.len(),
            waiting_video,
            waiting_text,
            avg_wait_secs: if count == 0 { 0.0 } else { total_wait / count as f64 },
        }
    }

    /// Recomputes the whole score index from scratch, picking up elapsed
    /// wait time for every waiting peer. Driven by the ~5s periodic
    /// rematch loop.
    pub fn refresh_scores(&self, now: DateTime<Utc>) {
        let mut pool = self.pool.lock().unwrap();
        let ids: Vec<PeerId> = pool.peers().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                Self::score_pair(&mut pool, ids[i], ids[j], now, &self.weights);
            }
        }
    }

    pub fn waiting_peers(&self) -> Vec<PeerId> {
        self.pool.lock().unwrap().peers().collect()
    }

    pub fn wait_started_at(&self, peer_id: PeerId) -> Option<DateTime<Utc>> {
        self.pool.lock().unwrap().get(peer_id).map(|e| e.joined_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AgeRange, ChatMode, Gender, GenderPreference};
    use uuid::Uuid;

    fn profile(age: i32, interests: &[&str], mode: ChatMode) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            username: "u".into(),
            gender: Gender::NotSpecified,
            age,
            interests: interests.iter().map(|s| s.to_string()).collect(),
            chat_mode: mode,
            gender_preference: GenderPreference::Any,
            age_range: AgeRange::default(),
            priority: 1.0,
        }
    }

    #[test]
    fn happy_path_text_pair_matches_above_threshold() {
        let engine = MatchingEngine::new(ScoringWeights::default(), 70.0, 65.0);
        let now = Utc::now();
        let a = profile(25, &["music", "travel"], ChatMode::Text);
        let b = profile(27, &["music"], ChatMode::Text);
        let (a_id, b_id) = (a.id, b.id);
        engine.add(a, now, 0);
        engine.add(b, now, 0);

        assert_eq!(engine.find_match(a_id, now), Some(b_id));
        assert_eq!(engine.find_match(b_id, now), Some(a_id));
    }

    #[test]
    fn mode_strictness_never_pairs_mismatched_modes() {
        let engine = MatchingEngine::new(ScoringWeights::default(), 0.0, 0.0);
        let now = Utc::now();
        let a = profile(25, &["music"], ChatMode::Text);
        let b = profile(25, &["music"], ChatMode::Video);
        let a_id = a.id;
        engine.add(a, now, 0);
        engine.add(b, now, 0);

        assert_eq!(engine.find_match(a_id, now), None);
    }

    #[test]
    fn age_range_rejects_out_of_range_candidate() {
        let engine = MatchingEngine::new(ScoringWeights::default(), 0.0, 0.0);
        let now = Utc::now();
        let mut a = profile(22, &["music"], ChatMode::Text);
        a.age_range = AgeRange { min: 30, max: 60 };
        let b = profile(25, &["music"], ChatMode::Text);
        let a_id = a.id;
        engine.add(a, now, 0);
        engine.add(b, now, 0);

        assert_eq!(engine.find_match(a_id, now), None);
    }

    #[test]
    fn blocked_peers_never_match() {
        let engine = MatchingEngine::new(ScoringWeights::default(), 0.0, 0.0);
        let now = Utc::now();
        let a = profile(25, &["music"], ChatMode::Text);
        let b = profile(25, &["music"], ChatMode::Text);
        let (a_id, b_id) = (a.id, b.id);
        engine.block(a_id, b_id);
        engine.add(a, now, 0);
        engine.add(b, now, 0);

        assert_eq!(engine.find_match(a_id, now), None);
        assert_eq!(engine.find_match(b_id, now), None);
    }

    #[test]
    fn remove_makes_peer_unmatchable() {
        let engine = MatchingEngine::new(ScoringWeights::default(), 0.0, 0.0);
        let now = Utc::now();
        let a = profile(25, &["music"], ChatMode::Text);
        let b = profile(25, &["music"], ChatMode::Text);
        let (a_id, b_id) = (a.id, b.id);
        engine.add(a, now, 0);
        engine.add(b, now, 0);
        engine.remove(b_id);

        assert_eq!(engine.find_match(a_id, now), None);
    }
}
