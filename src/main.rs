//! SMS Login Service
//!
//! Main entry point for the SMS login service. Callers request a one-time
//! code for a phone number and log in by submitting it back.
//!
//! # Architecture
//! The service is built using:
//! - gRPC for API endpoints
//! - Twilio for phone number lookup and SMS delivery
//! - DynamoDB (or in-memory tables) for codes and user identities
//!
//! # Flow
//! 1. Caller requests a verification code for a phone number
//! 2. Service normalizes the number, applies retry throttling and sends a code
//! 3. Caller submits the code
//! 4. Service redeems the code once and returns the user id for the phone
//!
//! @author Joseph G Noonan
//! @copyright 2025

use anyhow::{Context, Result};
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use rust_sms_login::accounts::SmsAccounts;
use rust_sms_login::config::{Config, LoggingConfig};
use rust_sms_login::db::dynamodb::{self, DynamoDbCodeStore, DynamoDbIdentityStore};
use rust_sms_login::db::{CodeStore, IdentityStore, MemoryCodeStore, MemoryIdentityStore};
use rust_sms_login::grpc::SmsLoginServer;
use rust_sms_login::proto::sms_login::sms_login_service_server::SmsLoginServiceServer;

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the configured level.
fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stdout);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.with_ansi(true).try_init()
    };

    result.map_err(|e| anyhow::anyhow!(e))
}

/// Builds the code and identity stores, creating tables when configured to.
async fn setup_stores(config: &Config) -> Result<(Arc<dyn CodeStore>, Arc<dyn IdentityStore>)> {
    if !config.dynamodb.enabled {
        info!("DynamoDB disabled, using in-memory stores");
        return Ok((
            Arc::new(MemoryCodeStore::new()),
            Arc::new(MemoryIdentityStore::new()),
        ));
    }

    let client = dynamodb::connect(&config.dynamodb).await;
    let codes = DynamoDbCodeStore::new(client.clone(), &config.dynamodb.codes_table);
    let identities = DynamoDbIdentityStore::new(client, &config.dynamodb.users_table);

    if config.dynamodb.create_tables {
        info!("Ensuring DynamoDB tables exist");
        codes
            .ensure_schema()
            .await
            .context("Failed to create verification codes table")?;
        identities
            .ensure_schema()
            .await
            .context("Failed to create users table")?;
    }

    Ok((Arc::new(codes), Arc::new(identities)))
}

/// Initializes service dependencies and serves gRPC until Ctrl-C.
async fn setup_services(config: Config) -> Result<()> {
    let (codes, identities) = setup_stores(&config).await?;
    let accounts = SmsAccounts::from_config(&config, codes, identities)
        .context("Failed to initialize SMS backend")?;

    let addr = format!("{}:{}", config.server.endpoint, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Starting server on {}", addr);

    Server::builder()
        .add_service(SmsLoginServiceServer::new(SmsLoginServer::new(accounts)))
        .serve_with_shutdown(addr, async {
            // Shut down on Ctrl-C; a failed signal listener also stops the server.
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new().context("Failed to load configuration")?;
    setup_logging(&config.logging)?;
    info!("{} starting up...", config.application.name);

    setup_services(config).await?;

    info!("Server stopped");
    Ok(())
}
