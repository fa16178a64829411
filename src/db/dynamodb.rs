//! DynamoDB implementation of the code and identity stores.
//!
//! Both tables use the normalized phone number as their partition key, so a
//! `PutItem` is an atomic upsert and DynamoDB itself guarantees a single live
//! code and a single identity per phone. One-time redemption of a code is a
//! conditional `DeleteItem` on the stored code.
//!
//! @author Joseph G Noonan
//! @copyright 2025
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::Region;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::delete_item::{DeleteItemError, DeleteItemInput, DeleteItemOutput};
use aws_sdk_dynamodb::operation::get_item::{GetItemError, GetItemInput, GetItemOutput};
use aws_sdk_dynamodb::operation::put_item::{PutItemError, PutItemInput, PutItemOutput};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use aws_sdk_dynamodb::Client as AwsDynamoDbClient;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CodeStore, IdentityStore, StoreError, UserIdentity, VerificationRecord};
use crate::config::DynamoDbConfig;
use crate::sms::mask_phone_number;
use crate::verification::retry::RetryState;

const PHONE: &str = "phone";
const CODE: &str = "code";
const NUM_OF_RETRIES: &str = "num_of_retries";
const LAST_RETRY: &str = "last_retry";
const USER_ID: &str = "user_id";
const CREATED_AT: &str = "created_at";

/// Thin seam over the DynamoDB client. SDK errors are folded into [`Error`],
/// with a failed condition expression reported as
/// [`Error::ConditionalCheckFailed`].
#[async_trait]
pub trait DynamoDbOps: std::fmt::Debug + Send + Sync {
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, Error>;

    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, Error>;

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, Error>;

    /// Creates a pay-per-request table keyed by the string attribute
    /// `key_attribute`. An existing table is left as is.
    async fn create_table(&self, table_name: &str, key_attribute: &str) -> Result<(), Error>;
}

#[async_trait]
impl DynamoDbOps for AwsDynamoDbClient {
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, Error> {
        self.put_item()
            .set_item(input.item().cloned())
            .set_table_name(input.table_name().map(|s| s.to_string()))
            .set_condition_expression(input.condition_expression().map(|s| s.to_string()))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .set_expression_attribute_values(input.expression_attribute_values().cloned())
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    Error::ConditionalCheckFailed
                } else {
                    Error::PutItemError(err)
                }
            })
    }

    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, Error> {
        self.get_item()
            .set_key(input.key().cloned())
            .set_table_name(input.table_name().map(|s| s.to_string()))
            .set_consistent_read(input.consistent_read())
            .send()
            .await
            .map_err(Error::GetItemError)
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, Error> {
        self.delete_item()
            .set_key(input.key().cloned())
            .set_table_name(input.table_name().map(|s| s.to_string()))
            .set_condition_expression(input.condition_expression().map(|s| s.to_string()))
            .set_expression_attribute_names(input.expression_attribute_names().cloned())
            .set_expression_attribute_values(input.expression_attribute_values().cloned())
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    Error::ConditionalCheckFailed
                } else {
                    Error::DeleteItemError(err)
                }
            })
    }

    async fn create_table(&self, table_name: &str, key_attribute: &str) -> Result<(), Error> {
        let attribute = AttributeDefinition::builder()
            .attribute_name(key_attribute)
            .attribute_type(ScalarAttributeType::S)
            .build()?;
        let key = KeySchemaElement::builder()
            .attribute_name(key_attribute)
            .key_type(KeyType::Hash)
            .build()?;

        let result = self
            .create_table()
            .table_name(table_name)
            .attribute_definitions(attribute)
            .key_schema(key)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!("Created DynamoDB table: {}", table_name);
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_in_use_exception()) =>
            {
                debug!("DynamoDB table already exists: {}", table_name);
                Ok(())
            }
            Err(err) => Err(Error::CreateTableError(err)),
        }
    }
}

/// Creates a DynamoDB client for the configured region and endpoint.
pub async fn connect(config: &DynamoDbConfig) -> Arc<dyn DynamoDbOps> {
    let region_provider = RegionProviderChain::first_try(Region::new(config.region.clone()));
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region_provider);
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let shared_config = loader.load().await;

    info!(
        region = %config.region,
        endpoint = ?config.endpoint,
        "DynamoDB client initialized"
    );
    Arc::new(AwsDynamoDbClient::new(&shared_config))
}

fn phone_key(phone: &str) -> HashMap<String, AttributeValue> {
    HashMap::from([(PHONE.to_string(), AttributeValue::S(phone.to_string()))])
}

fn string_attr<'a>(
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> Result<&'a String, Error> {
    item.get(name)
        .and_then(|av| av.as_s().ok())
        .ok_or_else(|| Error::ParseError(name.to_string()))
}

fn timestamp_attr(
    item: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<Option<DateTime<Utc>>, Error> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(_) => {
            let raw = string_attr(item, name)?;
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(|_| Error::ParseError(name.to_string()))
        }
    }
}

fn record_to_item(record: &VerificationRecord) -> HashMap<String, AttributeValue> {
    let mut item = phone_key(&record.phone);
    item.insert(CODE.to_string(), AttributeValue::S(record.code.clone()));
    item.insert(
        NUM_OF_RETRIES.to_string(),
        AttributeValue::N(record.retry.num_of_retries.to_string()),
    );
    if let Some(last_retry) = record.retry.last_retry {
        item.insert(
            LAST_RETRY.to_string(),
            AttributeValue::S(last_retry.to_rfc3339()),
        );
    }
    item
}

fn item_to_record(item: &HashMap<String, AttributeValue>) -> Result<VerificationRecord, Error> {
    let num_of_retries = item
        .get(NUM_OF_RETRIES)
        .and_then(|av| av.as_n().ok())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| Error::ParseError(NUM_OF_RETRIES.to_string()))?;

    Ok(VerificationRecord {
        phone: string_attr(item, PHONE)?.clone(),
        code: string_attr(item, CODE)?.clone(),
        retry: RetryState {
            num_of_retries,
            last_retry: timestamp_attr(item, LAST_RETRY)?,
        },
    })
}

fn identity_to_item(identity: &UserIdentity) -> HashMap<String, AttributeValue> {
    let mut item = phone_key(&identity.phone);
    item.insert(USER_ID.to_string(), AttributeValue::S(identity.id.clone()));
    item.insert(
        CREATED_AT.to_string(),
        AttributeValue::S(identity.created_at.to_rfc3339()),
    );
    item
}

fn item_to_identity(item: &HashMap<String, AttributeValue>) -> Result<UserIdentity, Error> {
    Ok(UserIdentity {
        id: string_attr(item, USER_ID)?.clone(),
        phone: string_attr(item, PHONE)?.clone(),
        created_at: timestamp_attr(item, CREATED_AT)?
            .ok_or_else(|| Error::ParseError(CREATED_AT.to_string()))?,
    })
}

async fn get_by_phone(
    client: &dyn DynamoDbOps,
    table_name: &str,
    phone: &str,
) -> Result<Option<HashMap<String, AttributeValue>>, Error> {
    let input = GetItemInput::builder()
        .table_name(table_name)
        .set_key(Some(phone_key(phone)))
        .consistent_read(true)
        .build()
        .map_err(Error::BuildError)?;

    let output = client.get_item(input).await?;
    Ok(output.item)
}

/// Verification codes table
#[derive(Debug, Clone)]
pub struct DynamoDbCodeStore {
    client: Arc<dyn DynamoDbOps>,
    table_name: String,
}

impl DynamoDbCodeStore {
    pub fn new(client: Arc<dyn DynamoDbOps>, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl CodeStore for DynamoDbCodeStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.client.create_table(&self.table_name, PHONE).await?;
        Ok(())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<VerificationRecord>, StoreError> {
        let item = get_by_phone(self.client.as_ref(), &self.table_name, phone).await?;
        Ok(item.as_ref().map(item_to_record).transpose()?)
    }

    async fn replace(&self, record: &VerificationRecord) -> Result<(), StoreError> {
        let input = PutItemInput::builder()
            .table_name(&self.table_name)
            .set_item(Some(record_to_item(record)))
            .build()
            .map_err(Error::BuildError)?;

        self.client.put_item(input).await?;

        debug!(
            phone = %mask_phone_number(&record.phone),
            retries = record.retry.num_of_retries,
            "Stored verification code"
        );
        Ok(())
    }

    async fn delete_by_phone(&self, phone: &str) -> Result<(), StoreError> {
        let input = DeleteItemInput::builder()
            .table_name(&self.table_name)
            .set_key(Some(phone_key(phone)))
            .build()
            .map_err(Error::BuildError)?;

        self.client.delete_item(input).await?;

        debug!(phone = %mask_phone_number(phone), "Deleted verification code");
        Ok(())
    }

    async fn consume(&self, phone: &str, code: &str) -> Result<bool, StoreError> {
        let input = DeleteItemInput::builder()
            .table_name(&self.table_name)
            .set_key(Some(phone_key(phone)))
            .condition_expression("#code = :code")
            .expression_attribute_names("#code", CODE)
            .expression_attribute_values(":code", AttributeValue::S(code.to_string()))
            .build()
            .map_err(Error::BuildError)?;

        match self.client.delete_item(input).await {
            Ok(_) => Ok(true),
            // Wrong code, or already consumed or replaced.
            Err(Error::ConditionalCheckFailed) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Users table
#[derive(Debug, Clone)]
pub struct DynamoDbIdentityStore {
    client: Arc<dyn DynamoDbOps>,
    table_name: String,
}

impl DynamoDbIdentityStore {
    pub fn new(client: Arc<dyn DynamoDbOps>, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl IdentityStore for DynamoDbIdentityStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.client.create_table(&self.table_name, PHONE).await?;
        Ok(())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserIdentity>, StoreError> {
        let item = get_by_phone(self.client.as_ref(), &self.table_name, phone).await?;
        Ok(item.as_ref().map(item_to_identity).transpose()?)
    }

    async fn create_with_phone(
        &self,
        phone: &str,
        created_at: DateTime<Utc>,
    ) -> Result<UserIdentity, StoreError> {
        let identity = UserIdentity {
            id: Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            created_at,
        };

        let input = PutItemInput::builder()
            .table_name(&self.table_name)
            .set_item(Some(identity_to_item(&identity)))
            .condition_expression("attribute_not_exists(#phone)")
            .expression_attribute_names("#phone", PHONE)
            .build()
            .map_err(Error::BuildError)?;

        match self.client.put_item(input).await {
            Ok(_) => {
                info!(
                    phone = %mask_phone_number(phone),
                    user_id = %identity.id,
                    "Created user identity"
                );
                Ok(identity)
            }
            Err(Error::ConditionalCheckFailed) => {
                // Lost a race with another login for the same phone.
                debug!(phone = %mask_phone_number(phone), "User identity already exists");
                self.find_by_phone(phone)
                    .await?
                    .ok_or_else(|| Error::ParseError(USER_ID.to_string()).into())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build input: {0}")]
    BuildError(#[from] aws_sdk_dynamodb::error::BuildError),
    #[error("Failed to put item: {0}")]
    PutItemError(SdkError<PutItemError>),
    #[error("Failed to get item: {0}")]
    GetItemError(SdkError<GetItemError>),
    #[error("Failed to delete item: {0}")]
    DeleteItemError(SdkError<DeleteItemError>),
    #[error("Failed to create table: {0}")]
    CreateTableError(SdkError<CreateTableError>),
    #[error("Failed to parse {0} from DynamoDB response")]
    ParseError(String),
    #[error("Conditional check failed")]
    ConditionalCheckFailed,
}
