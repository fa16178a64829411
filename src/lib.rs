/// SMS Login Service Library
///
/// This library provides phone number login with one-time codes sent by SMS:
/// code issuance with retry throttling, single-use redemption, and user
/// identity resolution by phone number.
///
/// # Modules
/// - `accounts`: Configured entry facade used by the gRPC layer
/// - `verification`: Code generation, retry policy and the verification service
/// - `sms`: SMS transport abstraction and the local development transport
/// - `twilio`: Twilio Lookup and Messaging transport
/// - `db`: Verification code and user identity stores (DynamoDB and in-memory)
/// - `grpc`: gRPC service implementation
/// - `config`: Configuration management
/// - `clock`: Time source
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use rust_sms_login::{
///     accounts::SmsAccounts,
///     config::Config,
///     db::{MemoryCodeStore, MemoryIdentityStore},
/// };
///
/// async fn setup_service() -> anyhow::Result<()> {
///     let config = Config::new()?;
///     let accounts = SmsAccounts::from_config(
///         &config,
///         Arc::new(MemoryCodeStore::new()),
///         Arc::new(MemoryIdentityStore::new()),
///     )?;
///     let phone = accounts.request_verification_code("+16502530000").await?;
///     println!("Code sent to {}", phone);
///     Ok(())
/// }
/// ```
///
/// # Copyright
/// Copyright (c) 2025 Signal Messenger, LLC
/// All rights reserved.
///
/// # License
/// Licensed under the AGPLv3 license.

pub mod accounts;
pub mod clock;
pub mod config;
pub mod db;
pub mod grpc;
pub mod sms;
pub mod twilio;
pub mod verification;

/// Generated protocol buffer code
pub mod proto {
    pub mod sms_login {
        tonic::include_proto!("sms_login");
    }
}
