use serde::Serialize;

/// Error codes a peer can actually observe, plus the internal-only variants
/// used for control flow inside the server. Ranges mirror the convention the
/// rest of this family of services uses (E0xxx shared, E3xxx matching) even
/// though there is only one service here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    InvalidProfile,
    InvalidMessage,
    NotRegistered,
    NotPaired,
    AlreadySearching,
    AlreadyPaired,
    SearchTimeout,
    RaceLost,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidProfile => "E3101",
            Self::InvalidMessage => "E3102",
            Self::NotRegistered => "E3103",
            Self::NotPaired => "E3104",
            Self::AlreadySearching => "E3105",
            Self::AlreadyPaired => "E3106",
            Self::SearchTimeout => "E3107",
            Self::RaceLost => "E0090",
            Self::Internal => "E0001",
        }
    }
}

/// Client-facing error payload, shape shared by every `*-error` socket event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known { code: ErrorCode, message: String },

    /// Internal bookkeeping failure (e.g. pair commit lost the race to
    /// re-verification). Never serialized to a peer; logged and swallowed
    /// by the caller.
    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_profile(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidProfile, message)
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidMessage, message)
    }

    pub fn not_registered() -> Self {
        Self::new(ErrorCode::NotRegistered, "register before performing this action")
    }

    pub fn not_paired() -> Self {
        Self::new(ErrorCode::NotPaired, "you are not currently paired")
    }

    pub fn already_searching() -> Self {
        Self::new(ErrorCode::AlreadySearching, "already searching for a partner")
    }

    pub fn already_paired() -> Self {
        Self::new(ErrorCode::AlreadyPaired, "already paired with someone")
    }

    /// Converts a client-visible error into the payload emitted on the
    /// corresponding `*-error` event. Internal errors never reach this path.
    pub fn to_payload(&self) -> Option<ErrorPayload> {
        match self {
            Self::Known { code, message } => Some(ErrorPayload {
                code: code.as_str(),
                message: message.clone(),
            }),
            Self::Internal(_) => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
