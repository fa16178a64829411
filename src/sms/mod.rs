//! SMS transport abstraction.
//!
//! The verification service reaches the carrier network only through
//! [`SmsTransport`]: a lookup that validates and normalizes a phone number,
//! and a send that delivers a message body. The Twilio client implements it
//! for production and [`local::LocalTransport`] for development.
//!
//! @author Joseph G Noonan
//! @copyright 2025

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod local;

pub use local::LocalTransport;

/// Carrier type reported for mobile lines
pub const MOBILE_CARRIER: &str = "mobile";

/// Result of a carrier lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneLookup {
    /// Phone number in the carrier's canonical (E.164) form
    pub phone_number: String,
    /// Line type, when the carrier reports one
    pub carrier_type: Option<String>,
}

impl PhoneLookup {
    /// True when the carrier reported a line type other than mobile.
    /// A missing or empty type is not treated as a rejection.
    pub fn is_non_mobile(&self) -> bool {
        matches!(self.carrier_type.as_deref(), Some(kind) if !kind.is_empty() && kind != MOBILE_CARRIER)
    }
}

/// Errors raised by SMS transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid phone number: {0}")]
    InvalidNumber(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Validates `phone` and returns its normalized form and line type.
    async fn lookup(&self, phone: &str) -> Result<PhoneLookup, TransportError>;

    /// Sends `body` to `to` from the sender number `from`.
    async fn send(&self, to: &str, from: &str, body: &str) -> Result<(), TransportError>;
}

/// Masks a phone number for logging, keeping the last four digits.
///
/// ```
/// use rust_sms_login::sms::mask_phone_number;
///
/// assert_eq!(mask_phone_number("+15551234567"), "+*******4567");
/// ```
pub fn mask_phone_number(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }

    let visible: String = chars[chars.len() - 4..].iter().collect();
    if chars[0] == '+' {
        format!("+{}{}", "*".repeat(chars.len() - 5), visible)
    } else {
        format!("{}{}", "*".repeat(chars.len() - 4), visible)
    }
}
