//! In-process SMS transport for local development.
//!
//! Numbers are validated and normalized to E.164 with the `phonenumber`
//! crate, no carrier type is reported, and messages are logged and kept in
//! an outbox instead of being delivered.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use super::{mask_phone_number, PhoneLookup, SmsTransport, TransportError};

/// Messages kept in the outbox; older ones are dropped first.
pub const OUTBOX_CAPACITY: usize = 100;

/// A message accepted by [`LocalTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub from: String,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    outbox: Arc<Mutex<VecDeque<SentMessage>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last [`OUTBOX_CAPACITY`] messages sent, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Most recent message sent to `to`.
    pub fn last_sent_to(&self, to: &str) -> Option<SentMessage> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|message| message.to == to)
            .cloned()
    }

    /// Validates and formats a phone number according to E.164 format
    fn validate_phone_number(phone: &str) -> Result<String, TransportError> {
        let phone_number = phonenumber::parse(None, phone)
            .map_err(|e| TransportError::InvalidNumber(e.to_string()))?;

        if !phonenumber::is_valid(&phone_number) {
            return Err(TransportError::InvalidNumber(
                "Invalid phone number format".to_string(),
            ));
        }

        Ok(phone_number.format().mode(phonenumber::Mode::E164).to_string())
    }
}

#[async_trait]
impl SmsTransport for LocalTransport {
    async fn lookup(&self, phone: &str) -> Result<PhoneLookup, TransportError> {
        let phone_number = Self::validate_phone_number(phone)?;
        debug!(phone = %mask_phone_number(&phone_number), "Normalized phone number locally");

        Ok(PhoneLookup {
            phone_number,
            carrier_type: None,
        })
    }

    async fn send(&self, to: &str, from: &str, body: &str) -> Result<(), TransportError> {
        info!(to = %mask_phone_number(to), from = %from, body = %body, "Local SMS");

        let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        if outbox.len() == OUTBOX_CAPACITY {
            outbox.pop_front();
        }
        outbox.push_back(SentMessage {
            to: to.to_string(),
            from: from.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
