use sea_orm::DbErr;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("auth message not found")]
    ChallengeNotFound,
    #[error("auth message expired")]
    ChallengeExpired,
    #[error("wrong signature")]
    WrongSignature,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("already got faucet")]
    AlreadyGranted,
    #[error("balance is not equal to 0")]
    BalanceNonZero,
    #[error("reward limit reached")]
    LimitReached,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("internal error")]
    InternalError,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation_failed",
            Self::ChallengeNotFound => "challenge_not_found",
            Self::ChallengeExpired => "challenge_expired",
            Self::WrongSignature => "wrong_signature",
            Self::InvalidCredential => "invalid_credential",
            Self::AlreadyGranted => "already_granted",
            Self::BalanceNonZero => "balance_non_zero",
            Self::LimitReached => "limit_reached",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalError => "internal_error",
        }
    }
}

/// Logs the storage failure and hides it behind `InternalError`.
pub fn database_error(err: DbErr) -> ServiceError {
    error!("database error: {err}");
    ServiceError::InternalError
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        database_error(err)
    }
}
