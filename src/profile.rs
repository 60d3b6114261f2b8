use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

pub type PeerId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    #[serde(rename = "not-specified")]
    NotSpecified,
}

impl Default for Gender {
    fn default() -> Self {
        Gender::NotSpecified
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderPreference {
    Any,
    Male,
    Female,
    Other,
}

impl Default for GenderPreference {
    fn default() -> Self {
        GenderPreference::Any
    }
}

impl GenderPreference {
    /// Whether `gender` satisfies this preference.
    pub fn satisfied_by(&self, gender: Gender) -> bool {
        match self {
            GenderPreference::Any => true,
            GenderPreference::Male => gender == Gender::Male,
            GenderPreference::Female => gender == Gender::Female,
            GenderPreference::Other => gender == Gender::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Text,
    Video,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: i32,
    pub max: i32,
}

impl Default for AgeRange {
    fn default() -> Self {
        Self { min: 13, max: 120 }
    }
}

impl AgeRange {
    pub fn contains(&self, age: i32) -> bool {
        age >= self.min && age <= self.max
    }
}

/// Raw registration payload as received from the transport, before
/// normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationInput {
    pub username: String,
    #[serde(default)]
    pub gender: Gender,
    pub age: i32,
    #[serde(default)]
    pub interests: Vec<String>,
    pub chat_mode: ChatMode,
    #[serde(default)]
    pub gender_preference: GenderPreference,
    #[serde(default)]
    pub age_range: AgeRange,
    #[serde(default = "default_priority")]
    pub priority: f64,
}

fn default_priority() -> f64 {
    1.0
}

/// Normalized, immutable-after-registration profile.
/// `chat_mode` is the sole exception — it may be re-set at search time.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: PeerId,
    pub username: String,
    pub gender: Gender,
    pub age: i32,
    pub interests: Vec<String>,
    pub chat_mode: ChatMode,
    pub gender_preference: GenderPreference,
    pub age_range: AgeRange,
    pub priority: f64,
}

impl Profile {
    /// Normalizes `input` into a `Profile`, failing with `InvalidProfile`
    /// on malformed required fields.
    pub fn from_registration(id: PeerId, input: RegistrationInput) -> Result<Self, AppError> {
        if input.username.trim().is_empty() {
            return Err(AppError::invalid_profile("username must not be empty"));
        }
        if input.age_range.min > input.age_range.max {
            return Err(AppError::invalid_profile("ageRange.min must be <= ageRange.max"));
        }

        let age = input.age.clamp(13, 120);
        let age_range = AgeRange {
            min: input.age_range.min.clamp(13, 120),
            max: input.age_range.max.clamp(13, 120),
        };

        let mut interests: Vec<String> = input
            .interests
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        interests.sort();
        interests.dedup();

        Ok(Self {
            id,
            username: input.username.trim().to_string(),
            gender: input.gender,
            age,
            interests,
            chat_mode: input.chat_mode,
            gender_preference: input.gender_preference,
            age_range,
            priority: input.priority.max(0.0),
        })
    }

    pub fn is_premium(&self) -> bool {
        self.priority > 1.0
    }
}
