//! SMS login facade.
//!
//! Holds the configured backend and is the only entry point used by the gRPC
//! layer. Without a backend every operation fails with
//! [`VerificationError::NotConfigured`].
//!
//! @author Joseph G Noonan
//! @copyright 2025

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{CodeStore, IdentityStore};
use crate::sms::{LocalTransport, SmsTransport};
use crate::twilio::TwilioClient;
use crate::verification::{LoginResult, SmsHandlers, VerificationError, VerificationService};

#[derive(Clone, Default)]
pub struct SmsAccounts {
    backend: Option<Arc<dyn SmsHandlers>>,
}

impl std::fmt::Debug for SmsAccounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsAccounts")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl SmsAccounts {
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn builtin(service: VerificationService) -> Self {
        Self {
            backend: Some(Arc::new(service)),
        }
    }

    /// Uses caller-supplied handlers instead of the built-in service.
    pub fn custom(handlers: Arc<dyn SmsHandlers>) -> Self {
        Self {
            backend: Some(handlers),
        }
    }

    /// Builds the facade from configuration. Twilio credentials take
    /// precedence over the local transport.
    pub fn from_config(
        config: &Config,
        codes: Arc<dyn CodeStore>,
        identities: Arc<dyn IdentityStore>,
    ) -> Result<Self> {
        let transport: Arc<dyn SmsTransport> = match (&config.twilio, config.local_transport) {
            (Some(twilio), _) => Arc::new(TwilioClient::new(twilio.clone())?),
            (None, true) => {
                info!("Using local SMS transport, messages will not be delivered");
                Arc::new(LocalTransport::new())
            }
            (None, false) => {
                warn!("No SMS transport configured, SMS login is disabled");
                return Ok(Self::unconfigured());
            }
        };

        Ok(Self::builtin(VerificationService::new(
            &config.verification,
            transport,
            codes,
            identities,
        )))
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    fn backend(&self) -> Result<&Arc<dyn SmsHandlers>, VerificationError> {
        self.backend.as_ref().ok_or(VerificationError::NotConfigured)
    }

    pub async fn lookup(&self, phone: &str) -> Result<String, VerificationError> {
        self.backend()?.lookup(phone).await
    }

    pub async fn request_verification_code(&self, phone: &str) -> Result<String, VerificationError> {
        self.backend()?.send_verification_code(phone).await
    }

    /// Verifies `code` after coercing it to canonical decimal form, so
    /// `" 1234 "` and `"01234"` are both submitted as `"1234"`.
    ///
    /// `phone` is used as given. Pass the normalized number returned by
    /// [`SmsAccounts::request_verification_code`]; codes are stored under
    /// that form and any other spelling of the number is `InvalidCode`.
    pub async fn login_with_code(&self, phone: &str, code: &str) -> Result<LoginResult, VerificationError> {
        let backend = self.backend()?;
        let code = canonical_code(code).ok_or(VerificationError::InvalidCode)?;
        backend.verify_code(phone, &code).await
    }
}

fn canonical_code(code: &str) -> Option<String> {
    code.trim().parse::<u64>().ok().map(|n| n.to_string())
}
