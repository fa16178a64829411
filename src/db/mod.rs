//! Persistence for verification records and user identities.
//!
//! Both stores are keyed by the normalized phone number, which makes the
//! storage layer itself enforce at most one outstanding code and one
//! identity per phone.
//!
//! @author Joseph G Noonan
//! @copyright 2025

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::verification::retry::RetryState;

pub mod dynamodb;
pub mod memory;

pub use memory::{MemoryCodeStore, MemoryIdentityStore};

/// The outstanding verification code for one phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Normalized phone number (unique key)
    pub phone: String,
    /// Current code; replaced on every new request
    pub code: String,
    /// Request history used for throttling
    pub retry: RetryState,
}

/// A user known by phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(#[from] dynamodb::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Creates the backing table when the store needs one.
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<VerificationRecord>, StoreError>;

    /// Stores `record`, replacing any record for the same phone.
    async fn replace(&self, record: &VerificationRecord) -> Result<(), StoreError>;

    async fn delete_by_phone(&self, phone: &str) -> Result<(), StoreError>;

    /// Deletes the record for `phone` only if its code is still `code`.
    /// Returns whether a record was deleted.
    async fn consume(&self, phone: &str, code: &str) -> Result<bool, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Creates the backing table when the store needs one.
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserIdentity>, StoreError>;

    /// Creates an identity for `phone`. If one already exists it is returned
    /// unchanged.
    async fn create_with_phone(
        &self,
        phone: &str,
        created_at: DateTime<Utc>,
    ) -> Result<UserIdentity, StoreError>;
}
