//! In-memory stores for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CodeStore, IdentityStore, StoreError, UserIdentity, VerificationRecord};

#[derive(Debug, Clone, Default)]
pub struct MemoryCodeStore {
    records: Arc<Mutex<HashMap<String, VerificationRecord>>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<VerificationRecord>, StoreError> {
        Ok(self.records.lock().await.get(phone).cloned())
    }

    async fn replace(&self, record: &VerificationRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(record.phone.clone(), record.clone());
        Ok(())
    }

    async fn delete_by_phone(&self, phone: &str) -> Result<(), StoreError> {
        self.records.lock().await.remove(phone);
        Ok(())
    }

    async fn consume(&self, phone: &str, code: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        match records.get(phone) {
            Some(record) if record.code == code => {
                records.remove(phone);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    users: Arc<Mutex<HashMap<String, UserIdentity>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.users.lock().await.get(phone).cloned())
    }

    async fn create_with_phone(
        &self,
        phone: &str,
        created_at: DateTime<Utc>,
    ) -> Result<UserIdentity, StoreError> {
        let mut users = self.users.lock().await;
        let user = users
            .entry(phone.to_string())
            .or_insert_with(|| UserIdentity {
                id: Uuid::new_v4().to_string(),
                phone: phone.to_string(),
                created_at,
            });
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::retry::RetryState;

    fn record(phone: &str, code: &str) -> VerificationRecord {
        VerificationRecord {
            phone: phone.to_string(),
            code: code.to_string(),
            retry: RetryState {
                num_of_retries: 1,
                last_retry: Some(Utc::now()),
            },
        }
    }

    #[tokio::test]
    async fn test_replace_keeps_one_record_per_phone() {
        let store = MemoryCodeStore::new();

        store.replace(&record("+15551234567", "1111")).await.unwrap();
        store.replace(&record("+15551234567", "2222")).await.unwrap();
        store.replace(&record("+15557654321", "3333")).await.unwrap();

        assert_eq!(store.len().await, 2);
        let found = store.find_by_phone("+15551234567").await.unwrap().unwrap();
        assert_eq!(found.code, "2222");
    }

    #[tokio::test]
    async fn test_consume_requires_current_code() {
        let store = MemoryCodeStore::new();
        store.replace(&record("+15551234567", "1111")).await.unwrap();

        assert!(!store.consume("+15551234567", "9999").await.unwrap());
        assert!(!store.consume("+15550000000", "1111").await.unwrap());
        assert!(store.consume("+15551234567", "1111").await.unwrap());
        assert!(!store.consume("+15551234567", "1111").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_by_phone() {
        let store = MemoryCodeStore::new();
        store.replace(&record("+15551234567", "1111")).await.unwrap();

        store.delete_by_phone("+15551234567").await.unwrap();
        store.delete_by_phone("+15551234567").await.unwrap();

        assert!(store.find_by_phone("+15551234567").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_with_phone_is_idempotent() {
        let store = MemoryIdentityStore::new();
        let created_at = Utc::now();

        let first = store.create_with_phone("+15551234567", created_at).await.unwrap();
        let second = store.create_with_phone("+15551234567", Utc::now()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.created_at, created_at);
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.find_by_phone("+15551234567").await.unwrap(),
            Some(first)
        );
    }
}
