use serde::Deserialize;

/// Scoring weights feeding the compatibility scorer. Kept as
/// config rather than `const` so an operator can retune without a rebuild.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScoringWeights {
    #[serde(default = "default_w_interest")]
    pub interest: f64,
    #[serde(default = "default_w_demographic")]
    pub demographic: f64,
    #[serde(default = "default_w_chat_mode")]
    pub chat_mode: f64,
    #[serde(default = "default_w_behavior")]
    pub behavior: f64,
    #[serde(default = "default_optimal_age_diff")]
    pub optimal_age_diff: i32,
    #[serde(default = "default_max_age_diff")]
    pub max_age_diff: i32,
    #[serde(default = "default_same_gender_bonus")]
    pub same_gender_bonus: f64,
    #[serde(default = "default_premium_bonus")]
    pub premium_bonus: f64,
    #[serde(default = "default_video_mode_bonus")]
    pub video_mode_bonus: f64,
    #[serde(default = "default_video_text_penalty")]
    pub video_text_penalty: f64,
    #[serde(default = "default_age_range_bonus")]
    pub age_range_bonus: f64,
    #[serde(default = "default_priority_time_secs")]
    pub priority_time_secs: f64,
}

fn default_w_interest() -> f64 { 0.35 }
fn default_w_demographic() -> f64 { 0.25 }
fn default_w_chat_mode() -> f64 { 0.30 }
fn default_w_behavior() -> f64 { 0.10 }
fn default_optimal_age_diff() -> i32 { 5 }
fn default_max_age_diff() -> i32 { 25 }
fn default_same_gender_bonus() -> f64 { 0.10 }
fn default_premium_bonus() -> f64 { 0.10 }
fn default_video_mode_bonus() -> f64 { 0.05 }
fn default_video_text_penalty() -> f64 { 0.10 }
fn default_age_range_bonus() -> f64 { 0.10 }
fn default_priority_time_secs() -> f64 { 15.0 }

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            interest: default_w_interest(),
            demographic: default_w_demographic(),
            chat_mode: default_w_chat_mode(),
            behavior: default_w_behavior(),
            optimal_age_diff: default_optimal_age_diff(),
            max_age_diff: default_max_age_diff(),
            same_gender_bonus: default_same_gender_bonus(),
            premium_bonus: default_premium_bonus(),
            video_mode_bonus: default_video_mode_bonus(),
            video_text_penalty: default_video_text_penalty(),
            age_range_bonus: default_age_range_bonus(),
            priority_time_secs: default_priority_time_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_inactive_threshold_secs")]
    pub inactive_threshold_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_rematch_interval_secs")]
    pub rematch_interval_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_video_threshold")]
    pub video_threshold: f64,
    #[serde(default = "default_text_threshold")]
    pub text_threshold: f64,
    #[serde(default = "default_typing_stop_secs")]
    pub typing_stop_secs: u64,
    #[serde(default = "default_video_call_request_ttl_secs")]
    pub video_call_request_ttl_secs: u64,
    #[serde(default)]
    pub scoring: ScoringWeights,
}

fn default_port() -> u16 { 3003 }
fn default_cors_origins() -> Vec<String> { vec!["*".into()] }
fn default_inactive_threshold_secs() -> u64 { 300 }
fn default_cleanup_interval_secs() -> u64 { 60 }
fn default_rematch_interval_secs() -> u64 { 5 }
fn default_max_wait_secs() -> u64 { 45 }
fn default_video_threshold() -> f64 { 70.0 }
fn default_text_threshold() -> f64 { 65.0 }
fn default_typing_stop_secs() -> u64 { 3 }
fn default_video_call_request_ttl_secs() -> u64 { 30 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_origins: default_cors_origins(),
            inactive_threshold_secs: default_inactive_threshold_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            rematch_interval_secs: default_rematch_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
            video_threshold: default_video_threshold(),
            text_threshold: default_text_threshold(),
            typing_stop_secs: default_typing_stop_secs(),
            video_call_request_ttl_secs: default_video_call_request_ttl_secs(),
            scoring: ScoringWeights::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("STRANGER_MATCH").separator("__"))
            .build()?;
        Ok(config.try_deserialize().unwrap_or_default())
    }
}
