use thiserror::Error;

use super::retry::Throttle;
use crate::db::StoreError;
use crate::sms::TransportError;

/// Errors returned by the verification flow
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("SMS login is not configured")]
    NotConfigured,
    #[error("Phone number lookup failed: {0}")]
    LookupFailed(#[source] TransportError),
    #[error("Phone number is not a mobile number")]
    NotMobile,
    #[error("Too often retries, try again in {seconds} seconds.")]
    TooFrequent { seconds: i64 },
    #[error("Too many retries, try again in {minutes} minutes.")]
    TooManyRetries { minutes: i64 },
    #[error("Failed to deliver verification code: {0}")]
    DeliveryFailed(#[source] TransportError),
    #[error("Invalid verification code")]
    InvalidCode,
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl VerificationError {
    /// Stable identifier for callers and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::NotConfigured => "not_configured",
            VerificationError::LookupFailed(_) => "lookup_failed",
            VerificationError::NotMobile => "not_mobile",
            VerificationError::TooFrequent { .. } => "too_frequent",
            VerificationError::TooManyRetries { .. } => "too_many_retries",
            VerificationError::DeliveryFailed(_) => "delivery_failed",
            VerificationError::InvalidCode => "invalid_code",
            VerificationError::Storage(_) => "storage",
        }
    }

    /// Seconds until a throttled request may be retried.
    pub fn retry_after_secs(&self) -> Option<i64> {
        match self {
            VerificationError::TooFrequent { seconds } => Some(*seconds),
            VerificationError::TooManyRetries { minutes } => Some(minutes.saturating_mul(60)),
            _ => None,
        }
    }
}

impl From<Throttle> for VerificationError {
    fn from(throttle: Throttle) -> Self {
        match throttle {
            Throttle::TooFrequent { seconds } => VerificationError::TooFrequent { seconds },
            Throttle::TooManyRetries { minutes } => VerificationError::TooManyRetries { minutes },
        }
    }
}
