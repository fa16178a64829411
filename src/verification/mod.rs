//! Verification Code Lifecycle
//!
//! Issues one-time codes by SMS and redeems them for a user identity.
//! A code request normalizes the phone number through the transport, applies
//! the retry policy to the stored request history, replaces the stored code
//! and sends it. A verification matches the submitted code against the stored
//! one, resolves the user identity and then consumes the code so it can be
//! redeemed exactly once.
//!
//! # Copyright
//! Copyright (c) 2025 Signal Messenger, LLC
//! All rights reserved.
//!
//! # License
//! Licensed under the AGPLv3 license.
//! Please see the LICENSE file in the root directory for details.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod code;
pub mod error;
pub mod locks;
pub mod retry;

pub use code::CodeGenerator;
pub use error::VerificationError;
pub use locks::PhoneLocks;
pub use retry::{RetryPolicy, RetryState, Throttle};

use crate::clock::{Clock, SystemClock};
use crate::config::{PhoneTemplate, VerificationConfig};
use crate::db::{CodeStore, IdentityStore, UserIdentity, VerificationRecord};
use crate::sms::{mask_phone_number, SmsTransport, TransportError};

/// Successful login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResult {
    pub user_id: String,
}

/// Operations behind the SMS login facade.
///
/// [`VerificationService`] is the built-in implementation. A deployment can
/// supply its own to bypass the built-in code lifecycle entirely.
#[async_trait]
pub trait SmsHandlers: Send + Sync {
    /// Returns the normalized form of `phone`.
    async fn lookup(&self, phone: &str) -> Result<String, VerificationError>;

    /// Issues and sends a new code, returning the normalized phone.
    async fn send_verification_code(&self, phone: &str) -> Result<String, VerificationError>;

    async fn verify_code(&self, phone: &str, code: &str) -> Result<LoginResult, VerificationError>;
}

pub struct VerificationService {
    transport: Arc<dyn SmsTransport>,
    codes: Arc<dyn CodeStore>,
    identities: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    generator: CodeGenerator,
    template: PhoneTemplate,
    sender: String,
    send_timeout: Duration,
    phone_locks: PhoneLocks,
}

impl VerificationService {
    pub fn new(
        config: &VerificationConfig,
        transport: Arc<dyn SmsTransport>,
        codes: Arc<dyn CodeStore>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self::with_clock(config, transport, codes, identities, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &VerificationConfig,
        transport: Arc<dyn SmsTransport>,
        codes: Arc<dyn CodeStore>,
        identities: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = RetryPolicy::from(config);
        info!(
            code_length = config.verification_code_length,
            wait_time_secs = config.verification_wait_time_secs,
            retries_wait_time_secs = config.verification_retries_wait_time_secs,
            max_retry_counts = config.verification_max_retry_counts,
            master_code = config.phone_verification_master_code.is_some(),
            "Verification service initialized"
        );

        Self {
            transport,
            codes,
            identities,
            clock,
            policy,
            generator: CodeGenerator::new(
                config.verification_code_length,
                config.phone_verification_master_code.clone(),
            ),
            template: config.phone_template.clone(),
            sender: config.phone_template.from.clone().unwrap_or_default(),
            send_timeout: config.send_timeout(),
            phone_locks: PhoneLocks::new(),
        }
    }

    /// Normalizes `phone` through the transport and rejects non-mobile lines.
    pub async fn lookup(&self, phone: &str) -> Result<String, VerificationError> {
        let lookup = self.transport.lookup(phone).await.map_err(|e| {
            warn!(phone = %mask_phone_number(phone), error = %e, "Phone number lookup failed");
            VerificationError::LookupFailed(e)
        })?;

        if lookup.is_non_mobile() {
            warn!(
                phone = %mask_phone_number(&lookup.phone_number),
                carrier_type = ?lookup.carrier_type,
                "Rejected non-mobile phone number"
            );
            return Err(VerificationError::NotMobile);
        }

        Ok(lookup.phone_number)
    }

    /// Issues a new code for `phone` and sends it by SMS.
    ///
    /// Returns the normalized phone number. The new code replaces any earlier
    /// one immediately. A failed send still counts as a retry.
    pub async fn request_code(&self, phone: &str) -> Result<String, VerificationError> {
        let phone = self.lookup(phone).await?;
        let _guard = self.phone_locks.lock(&phone).await;

        let now = self.clock.now();
        let retry = self
            .codes
            .find_by_phone(&phone)
            .await?
            .map(|record| record.retry)
            .unwrap_or_default();

        if let Err(throttle) = self.policy.check(&retry, now) {
            warn!(
                phone = %mask_phone_number(&phone),
                retries = retry.num_of_retries,
                throttle = ?throttle,
                "Verification code request throttled"
            );
            return Err(throttle.into());
        }

        let record = VerificationRecord {
            phone: phone.clone(),
            code: self.generator.next_code(),
            retry: retry.record_attempt(now),
        };
        self.codes.replace(&record).await?;

        let body = self.template.text(&record.code);
        let sent = tokio::time::timeout(
            self.send_timeout,
            self.transport.send(&phone, &self.sender, &body),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(self.send_timeout)));

        if let Err(e) = sent {
            warn!(
                phone = %mask_phone_number(&phone),
                error = %e,
                "Failed to send verification code"
            );
            return Err(VerificationError::DeliveryFailed(e));
        }

        info!(
            phone = %mask_phone_number(&phone),
            retries = record.retry.num_of_retries,
            "Sent verification code"
        );
        Ok(phone)
    }

    /// Redeems `code` for the identity registered to `phone`, creating the
    /// identity on first login. `phone` must be in the normalized form
    /// returned by [`VerificationService::request_code`].
    pub async fn verify_code(&self, phone: &str, code: &str) -> Result<LoginResult, VerificationError> {
        let master = self.generator.is_master_code(code);

        if !master {
            let matches = self
                .codes
                .find_by_phone(phone)
                .await?
                .is_some_and(|record| record.code == code);
            if !matches {
                debug!(phone = %mask_phone_number(phone), "Verification code mismatch");
                return Err(VerificationError::InvalidCode);
            }
        }

        let identity = self.resolve_identity(phone).await?;

        if master {
            self.codes.delete_by_phone(phone).await?;
            info!(phone = %mask_phone_number(phone), "Verified with master code");
        } else if !self.codes.consume(phone, code).await? {
            // Replaced or redeemed since it was read.
            debug!(phone = %mask_phone_number(phone), "Verification code already consumed");
            return Err(VerificationError::InvalidCode);
        }

        info!(
            phone = %mask_phone_number(phone),
            user_id = %identity.id,
            "Phone number verified"
        );
        Ok(LoginResult {
            user_id: identity.id,
        })
    }

    async fn resolve_identity(&self, phone: &str) -> Result<UserIdentity, VerificationError> {
        if let Some(identity) = self.identities.find_by_phone(phone).await? {
            return Ok(identity);
        }

        Ok(self
            .identities
            .create_with_phone(phone, self.clock.now())
            .await?)
    }
}

#[async_trait]
impl SmsHandlers for VerificationService {
    async fn lookup(&self, phone: &str) -> Result<String, VerificationError> {
        VerificationService::lookup(self, phone).await
    }

    async fn send_verification_code(&self, phone: &str) -> Result<String, VerificationError> {
        self.request_code(phone).await
    }

    async fn verify_code(&self, phone: &str, code: &str) -> Result<LoginResult, VerificationError> {
        VerificationService::verify_code(self, phone, code).await
    }
}
