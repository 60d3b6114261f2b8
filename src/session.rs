//! Session Manager. Per-peer state machine with activity tracking and
//! inactivity sweep. `SessionRegistry` is a
//! `DashMap<PeerId, Arc<Mutex<Session>>>` — lock-free across peers, with
//! an inner `Mutex` so every transition on one peer is serialized while
//! different peers proceed fully concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::profile::{ChatMode, PeerId, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Searching,
    Chatting,
}

/// Per-peer state. Invariant enforced by construction:
/// `status == Chatting <=> partner_id.is_some() <=> room_id.is_some()`.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile: Profile,
    pub status: Status,
    pub partner_id: Option<PeerId>,
    pub room_id: Option<uuid::Uuid>,
    pub search_start: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(profile: Profile, now: DateTime<Utc>) -> Self {
        Self {
            profile,
            status: Status::Ready,
            partner_id: None,
            room_id: None,
            search_start: None,
            attempts: 0,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// `ready -> searching`. Optionally overrides `chat_mode`.
    pub fn begin_search(&mut self, mode: Option<ChatMode>, now: DateTime<Utc>) {
        if let Some(m) = mode {
            self.profile.chat_mode = m;
        }
        self.status = Status::Searching;
        self.search_start = Some(now);
        self.touch(now);
    }

    /// `searching -> ready` via `cancel` or `SearchTimeout`.
    pub fn stop_search(&mut self, now: DateTime<Utc>) {
        self.status = Status::Ready;
        self.search_start = None;
        self.touch(now);
    }

    /// `searching -> chatting` on a successful pair commit.
    pub fn enter_pair(&mut self, partner_id: PeerId, room_id: uuid::Uuid, now: DateTime<Utc>) {
        self.status = Status::Chatting;
        self.partner_id = Some(partner_id);
        self.room_id = Some(room_id);
        self.search_start = None;
        self.touch(now);
    }

    /// `chatting -> searching` on `next` — re-enters the pool with
    /// `attempts` incremented.
    pub fn next(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.partner_id = None;
        self.room_id = None;
        self.status = Status::Searching;
        self.search_start = Some(now);
        self.touch(now);
    }

    /// `chatting -> ready` on `disconnectPartner`.
    pub fn leave_pair(&mut self, now: DateTime<Utc>) {
        self.partner_id = None;
        self.room_id = None;
        self.status = Status::Ready;
        self.touch(now);
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold_secs: u64) -> bool {
        (now - self.last_activity).num_seconds() as u64 > threshold_secs
    }
}

/// Owns every connected peer's `Session`. Lock ordering for any
/// operation touching two peers at once: always acquire the
/// lexicographically smaller `PeerId`'s mutex first.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<PeerId, Arc<Mutex<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, profile: Profile, now: DateTime<Utc>) -> Arc<Mutex<Session>> {
        let handle = Arc::new(Mutex::new(Session::new(profile.clone(), now)));
        self.sessions.insert(profile.id, handle.clone());
        handle
    }

    pub fn get(&self, peer_id: PeerId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&peer_id).map(|e| e.clone())
    }

    pub fn remove(&self, peer_id: PeerId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.remove(&peer_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Returns the two peer ids in the global lock order used throughout
    /// the server to avoid deadlock on cross-peer operations.
    pub fn lock_order(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
        if a <= b { (a, b) } else { (b, a) }
    }
}
