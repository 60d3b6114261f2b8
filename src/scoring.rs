//! Compatibility scorer. Pure, deterministic given its inputs —
//! no I/O, no clock reads beyond what the caller passes in as `now`.

use crate::config::ScoringWeights;
use crate::matching::pool::PairHistory;
use crate::profile::{ChatMode, Gender, Profile};

/// Everything about a waiting peer the scorer needs beyond the bare
/// `Profile`: how long it has waited and how many times it has tried.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub profile: &'a Profile,
    pub wait_secs: f64,
    pub attempts: u32,
}

fn jaccard(a: &[String], b: &[String]) -> (f64, bool) {
    if a.is_empty() && b.is_empty() {
        return (0.0, false);
    }
    let intersection = a.iter().filter(|x| b.contains(x)).count();
    let union = a.len() + b.len() - intersection;
    let sim = if union == 0 { 0.0 } else { intersection as f64 / union as f64 };
    (sim, intersection > 0)
}

fn interest_term(a: &Profile, b: &Profile, weight: f64) -> f64 {
    let (sim, has_overlap) = jaccard(&a.interests, &b.interests);
    let raw = (sim + if has_overlap { 0.3 } else { 0.0 }).min(1.0);
    raw * weight * 50.0
}

fn demographic_term(a: &Profile, b: &Profile, w: &ScoringWeights) -> f64 {
    let diff = (a.age - b.age).abs() as f64;
    let optimal = w.optimal_age_diff as f64;
    let max_diff = w.max_age_diff as f64;
    let age_component = if diff <= optimal {
        0.3
    } else if diff >= max_diff {
        0.0
    } else {
        0.3 * (1.0 - (diff - optimal) / (max_diff - optimal))
    };

    let gender_pref_component = (a.gender_preference.satisfied_by(b.gender) as i32 as f64) * 0.15
        + (b.gender_preference.satisfied_by(a.gender) as i32 as f64) * 0.15;

    let same_gender_bonus = if a.gender != Gender::NotSpecified
        && b.gender != Gender::NotSpecified
        && a.gender == b.gender
    {
        w.same_gender_bonus
    } else {
        0.0
    };

    let raw = 0.5 + age_component + gender_pref_component + same_gender_bonus;
    raw * w.demographic * 50.0
}

fn chat_mode_term(a: &Profile, b: &Profile, weight: f64) -> f64 {
    let raw = match (a.chat_mode, b.chat_mode) {
        (ChatMode::Video, ChatMode::Video) => 1.0,
        (ChatMode::Text, ChatMode::Text) => 0.8,
        _ => 0.4,
    };
    raw * weight * 50.0
}

fn behavior_term(ctx_a: &ScoringContext, ctx_b: &ScoringContext, w: &ScoringWeights) -> f64 {
    let avg_wait = (ctx_a.wait_secs + ctx_b.wait_secs) / 2.0;
    let wait_boost = if avg_wait <= 5.0 {
        0.0
    } else {
        let span = (w.priority_time_secs - 5.0).max(1.0);
        (0.3 * ((avg_wait - 5.0) / span)).min(0.3)
    };

    let avg_attempts = (ctx_a.attempts as f64 + ctx_b.attempts as f64) / 2.0;
    let attempts_boost = (0.05 * avg_attempts).min(0.2);

    (wait_boost + attempts_boost) * w.behavior * 50.0
}

fn age_in_range_contribution(a: &Profile, b: &Profile, bonus: f64) -> f64 {
    let mut total = 0.0;
    if b.age_range.contains(a.age) {
        total += bonus / 2.0;
    }
    if a.age_range.contains(b.age) {
        total += bonus / 2.0;
    }
    total
}

/// Computes the 0-100 compatibility score between two peers.
/// `history` is the pair's prior match count, looked up under the
/// canonical unordered key.
pub fn calculate_score(
    ctx_a: &ScoringContext,
    ctx_b: &ScoringContext,
    history: &PairHistory,
    w: &ScoringWeights,
) -> f64 {
    let a = ctx_a.profile;
    let b = ctx_b.profile;

    let base = 50.0;
    let weighted = interest_term(a, b, w.interest)
        + demographic_term(a, b, w)
        + chat_mode_term(a, b, w.chat_mode)
        + behavior_term(ctx_a, ctx_b, w);

    let mut adjustment = 0.0;
    if a.is_premium() || b.is_premium() {
        adjustment += w.premium_bonus;
    }
    match (a.chat_mode, b.chat_mode) {
        (ChatMode::Video, ChatMode::Video) => adjustment += w.video_mode_bonus,
        (ChatMode::Video, ChatMode::Text) | (ChatMode::Text, ChatMode::Video) => {
            adjustment -= w.video_text_penalty
        }
        _ => {}
    }
    adjustment += age_in_range_contribution(a, b, w.age_range_bonus);
    adjustment -= (0.1 * history.times_matched as f64).min(0.3);
    adjustment = adjustment.clamp(-0.3, 0.3);

    let raw = (base + weighted) * (1.0 + adjustment);
    (raw.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AgeRange, ChatMode, Gender, GenderPreference, PeerId};
    use uuid::Uuid;

    fn profile(id: PeerId, age: i32, interests: &[&str], mode: ChatMode) -> Profile {
        Profile {
            id,
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

    fn ctx(p: &Profile) -> ScoringContext {
        ScoringContext { profile: p, wait_secs: 0.0, attempts: 0 }
    }

    #[test]
    fn symmetric_under_swap() {
        let w = ScoringWeights::default();
        let a = profile(Uuid::new_v4(), 25, &["music", "travel"], ChatMode::Text);
        let b = profile(Uuid::new_v4(), 27, &["music"], ChatMode::Text);
        let hist = PairHistory::default();
        let s_ab = calculate_score(&ctx(&a), &ctx(&b), &hist, &w);
        let s_ba = calculate_score(&ctx(&b), &ctx(&a), &hist, &w);
        assert_eq!(s_ab, s_ba);
    }

    #[test]
    fn shared_interest_scores_above_threshold_for_text() {
        let w = ScoringWeights::default();
        let a = profile(Uuid::new_v4(), 25, &["music", "travel"], ChatMode::Text);
        let b = profile(Uuid::new_v4(), 27, &["music"], ChatMode::Text);
        let score = calculate_score(&ctx(&a), &ctx(&b), &PairHistory::default(), &w);
        assert!(score >= 65.0, "expected >= 65, got {score}");
    }

    #[test]
    fn mixed_mode_never_scores_as_high_as_matched_mode() {
        let w = ScoringWeights::default();
        let a = profile(Uuid::new_v4(), 25, &["music"], ChatMode::Video);
        let b_video = profile(Uuid::new_v4(), 25, &["music"], ChatMode::Video);
        let b_text = profile(Uuid::new_v4(), 25, &["music"], ChatMode::Text);
        let hist = PairHistory::default();
        let matched = calculate_score(&ctx(&a), &ctx(&b_video), &hist, &w);
        let mixed = calculate_score(&ctx(&a), &ctx(&b_text), &hist, &w);
        assert!(matched > mixed);
    }

    #[test]
    fn repeat_pairing_is_penalized() {
        let w = ScoringWeights::default();
        let a = profile(Uuid::new_v4(), 25, &["music"], ChatMode::Text);
        let b = profile(Uuid::new_v4(), 25, &["music"], ChatMode::Text);
        let fresh = calculate_score(&ctx(&a), &ctx(&b), &PairHistory::default(), &w);
        let repeat = calculate_score(
            &ctx(&a),
            &ctx(&b),
            &PairHistory { times_matched: 3, ..Default::default() },
            &w,
        );
        assert!(repeat < fresh);
    }
}
