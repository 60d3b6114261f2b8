pub mod config;
pub mod errors;
pub mod matching;
pub mod pairing;
pub mod profile;
pub mod relay;
pub mod scoring;
pub mod session;
pub mod socket;
pub mod stats;

use socketioxide::SocketIo;

use config::AppConfig;
use matching::MatchingEngine;
use pairing::PairRegistry;
use relay::Relay;
use session::SessionRegistry;

/// Shared server state. Carries the `SocketIo` handle itself (not just a
/// `SocketRef`) so the periodic background loops in `main.rs` can emit into
/// a peer's room without a live socket to hand.
pub struct AppState {
    pub config: AppConfig,
    pub io: SocketIo,
    pub sessions: SessionRegistry,
    pub engine: MatchingEngine,
    pub pairs: PairRegistry,
    pub relay: Relay,
}
