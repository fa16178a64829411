use tonic::metadata::MetadataValue;
use tonic::{Code, Request, Response, Status};
use crate::accounts::SmsAccounts;
use crate::proto::sms_login::{
    LoginWithCodeRequest,
    LoginWithCodeResponse,
    RequestVerificationCodeRequest,
    RequestVerificationCodeResponse,
    sms_login_service_server::SmsLoginService,
};
use crate::sms::mask_phone_number;
use crate::verification::VerificationError;
use tracing::{debug, error, warn};
use std::sync::Arc;

/// Metadata key carrying [`VerificationError::kind`]
pub const ERROR_KIND_KEY: &str = "x-error-kind";
/// Metadata key carrying the throttle wait in seconds
pub const RETRY_AFTER_KEY: &str = "retry-after";

/// Maps verification errors to gRPC status codes
impl From<VerificationError> for Status {
    fn from(error: VerificationError) -> Self {
        let code = match &error {
            VerificationError::NotConfigured => Code::FailedPrecondition,
            VerificationError::LookupFailed(_) => Code::NotFound,
            VerificationError::NotMobile => Code::InvalidArgument,
            VerificationError::TooFrequent { .. } | VerificationError::TooManyRetries { .. } => {
                Code::ResourceExhausted
            }
            VerificationError::DeliveryFailed(_) => Code::Unavailable,
            VerificationError::InvalidCode => Code::Unauthenticated,
            VerificationError::Storage(_) => Code::Internal,
        };
        let message = match &error {
            // Store details stay in the logs.
            VerificationError::Storage(_) => "Storage error".to_string(),
            other => other.to_string(),
        };

        let mut status = Status::new(code, message);
        status
            .metadata_mut()
            .insert(ERROR_KIND_KEY, MetadataValue::from_static(error.kind()));
        if let Some(seconds) = error.retry_after_secs() {
            if let Ok(value) = seconds.to_string().parse() {
                status.metadata_mut().insert(RETRY_AFTER_KEY, value);
            }
        }
        status
    }
}

fn log_failure(operation: &str, phone: &str, error: &VerificationError) {
    match error {
        VerificationError::Storage(_) | VerificationError::NotConfigured => {
            error!(phone = %mask_phone_number(phone), kind = error.kind(), "{} failed: {}", operation, error)
        }
        _ => warn!(phone = %mask_phone_number(phone), kind = error.kind(), "{} failed: {}", operation, error),
    }
}

/// Implementation of the SMS login gRPC service
#[derive(Debug, Clone)]
pub struct SmsLoginServer {
    accounts: Arc<SmsAccounts>,
}

impl SmsLoginServer {
    pub fn new(accounts: SmsAccounts) -> Self {
        Self {
            accounts: Arc::new(accounts),
        }
    }
}

#[tonic::async_trait]
impl SmsLoginService for SmsLoginServer {
    async fn request_verification_code(
        &self,
        request: Request<RequestVerificationCodeRequest>,
    ) -> Result<Response<RequestVerificationCodeResponse>, Status> {
        let req = request.into_inner();
        if req.phone.trim().is_empty() {
            return Err(Status::invalid_argument("phone is required"));
        }

        debug!("Received verification code request for: {}", mask_phone_number(&req.phone));

        let phone = self
            .accounts
            .request_verification_code(&req.phone)
            .await
            .map_err(|e| {
                log_failure("Verification code request", &req.phone, &e);
                Status::from(e)
            })?;

        Ok(Response::new(RequestVerificationCodeResponse { phone }))
    }

    async fn login_with_code(
        &self,
        request: Request<LoginWithCodeRequest>,
    ) -> Result<Response<LoginWithCodeResponse>, Status> {
        let req = request.into_inner();
        if req.phone.trim().is_empty() {
            return Err(Status::invalid_argument("phone is required"));
        }
        if req.code.trim().is_empty() {
            return Err(Status::invalid_argument("code is required"));
        }

        debug!("Received login for: {}", mask_phone_number(&req.phone));

        let login = self
            .accounts
            .login_with_code(&req.phone, &req.code)
            .await
            .map_err(|e| {
                log_failure("Login", &req.phone, &e);
                Status::from(e)
            })?;

        Ok(Response::new(LoginWithCodeResponse {
            user_id: login.user_id,
        }))
    }
}
