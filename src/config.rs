/// Configuration Module
///
/// Provides configuration management for the SMS Login Service.
/// Handles loading and parsing of YAML configuration files and environment variables,
/// and validates that the SMS backend is configured in exactly one supported shape.
///
/// # Copyright
/// Copyright (c) 2025 Signal Messenger, LLC
/// All rights reserved.
///
/// # License
/// Licensed under the AGPLv3 license.
/// Please see the LICENSE file in the root directory for details.

use chrono::Duration;
use config::{Config as ConfigFile, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::verification::code::MAX_CODE_LENGTH;

/// Placeholder replaced by the verification code in the message template.
pub const CODE_PLACEHOLDER: &str = "{code}";

/// Upper bound for every configured wait or timeout, in seconds (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

fn bounded_seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.min(MAX_DURATION_SECS)).unwrap_or_default())
}

/// Application metadata configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Application {
    /// Name of the application
    pub name: String,
}

impl Default for Application {
    fn default() -> Self {
        Self {
            name: "sms-login".to_string(),
        }
    }
}

/// gRPC server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub endpoint: String,
    /// Port to bind
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "0.0.0.0".to_string(),
            port: 50051,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// DynamoDB configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DynamoDbConfig {
    /// Whether DynamoDB is enabled; the in-memory stores are used otherwise
    pub enabled: bool,
    /// AWS region
    pub region: String,
    /// DynamoDB endpoint (optional, for local development)
    pub endpoint: Option<String>,
    /// Table holding outstanding verification codes
    pub codes_table: String,
    /// Table holding user identities
    pub users_table: String,
    /// Create the tables on startup when they do not exist
    pub create_tables: bool,
}

impl Default for DynamoDbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: "us-east-1".to_string(),
            endpoint: None,
            codes_table: "sms_verification_codes".to_string(),
            users_table: "sms_users".to_string(),
            create_tables: false,
        }
    }
}

fn default_lookup_url() -> String {
    "https://lookups.twilio.com".to_string()
}

fn default_api_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_twilio_timeout_secs() -> u64 {
    10
}

/// Twilio credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwilioConfig {
    /// Phone number messages are sent from
    pub from: String,
    /// Twilio account SID
    pub sid: String,
    /// Twilio auth token
    pub token: String,
    /// Base URL of the Lookup API
    #[serde(default = "default_lookup_url")]
    pub lookup_url: String,
    /// Base URL of the REST API used to send messages
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// HTTP timeout in seconds
    #[serde(default = "default_twilio_timeout_secs")]
    pub timeout_secs: u64,
}

/// Outgoing message template
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhoneTemplate {
    /// Sender number; defaults to the Twilio `from` number
    pub from: Option<String>,
    /// Message text, `{code}` is replaced by the verification code
    pub text: String,
}

impl Default for PhoneTemplate {
    fn default() -> Self {
        Self {
            from: None,
            text: format!("Welcome your invitation code is: {}", CODE_PLACEHOLDER),
        }
    }
}

impl PhoneTemplate {
    /// Renders the message body for `code`.
    pub fn text(&self, code: &str) -> String {
        self.text.replace(CODE_PLACEHOLDER, code)
    }
}

/// Verification code and throttling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Minimum spacing between two code requests for one phone, in seconds
    pub verification_wait_time_secs: u64,
    /// Cooldown once the retry threshold is exceeded, in seconds
    pub verification_retries_wait_time_secs: u64,
    /// Number of requests after which the long cooldown applies
    pub verification_max_retry_counts: u32,
    /// Number of digits in a generated code
    pub verification_code_length: u32,
    /// Fixed code that always verifies (test and support environments)
    pub phone_verification_master_code: Option<String>,
    /// Upper bound on one SMS send, in seconds
    pub send_timeout_secs: u64,
    /// Outgoing message template
    pub phone_template: PhoneTemplate,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            verification_wait_time_secs: 20,
            verification_retries_wait_time_secs: 10 * 60,
            verification_max_retry_counts: 5,
            verification_code_length: 4,
            phone_verification_master_code: None,
            send_timeout_secs: 10,
            phone_template: PhoneTemplate::default(),
        }
    }
}

impl VerificationConfig {
    /// Values above [`MAX_DURATION_SECS`] are capped.
    pub fn wait_time(&self) -> Duration {
        bounded_seconds(self.verification_wait_time_secs)
    }

    pub fn retries_wait_time(&self) -> Duration {
        bounded_seconds(self.verification_retries_wait_time_secs)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.send_timeout_secs.min(MAX_DURATION_SECS))
    }
}

/// Application configuration settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Application metadata
    pub application: Application,
    /// gRPC server configuration
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// DynamoDB configuration
    pub dynamodb: DynamoDbConfig,
    /// Twilio credentials; when absent no built-in transport is available
    pub twilio: Option<TwilioConfig>,
    /// Use the in-process transport that logs messages instead of sending them
    pub local_transport: bool,
    /// Verification code and throttling settings
    pub verification: VerificationConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Missing required config value: {0}")]
    MissingConfig(String),
    #[error("Invalid config value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl Config {
    /// Creates a new Config instance by loading and merging configuration from multiple sources.
    ///
    /// # Configuration Sources
    /// Configuration is loaded in the following order (later sources override earlier ones):
    /// 1. Base configuration (`config/application.yml`, optional)
    /// 2. Environment variables (prefixed with `APP_`, nested keys separated by `__`)
    ///
    /// # Errors
    /// Returns a `ConfigError` if:
    /// - Configuration values cannot be parsed
    /// - The resulting configuration fails [`Config::validate`]
    ///
    /// # Examples
    /// ```no_run
    /// use rust_sms_login::config::Config;
    ///
    /// let config = Config::new().expect("Failed to load configuration");
    /// println!("Code length: {}", config.verification.verification_code_length);
    /// ```
    pub fn new() -> Result<Self, ConfigError> {
        let builder = ConfigFile::builder()
            .add_source(File::with_name("config/application.yml").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::finish(builder.build()?)
    }

    /// Loads configuration from a YAML document only.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let source = ConfigFile::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;

        Self::finish(source)
    }

    fn finish(source: ConfigFile) -> Result<Self, ConfigError> {
        let mut config: Config = source
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(twilio) = &config.twilio {
            config
                .verification
                .phone_template
                .from
                .get_or_insert_with(|| twilio.from.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and the shape of the SMS backend settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let verification = &self.verification;
        let length = verification.verification_code_length;

        if length == 0 || length > MAX_CODE_LENGTH {
            return Err(ConfigError::InvalidValue {
                key: "verification.verification_code_length".to_string(),
                reason: format!("must be between 1 and {}", MAX_CODE_LENGTH),
            });
        }

        if !verification.phone_template.text.contains(CODE_PLACEHOLDER) {
            return Err(ConfigError::InvalidValue {
                key: "verification.phone_template.text".to_string(),
                reason: format!("must contain the {} placeholder", CODE_PLACEHOLDER),
            });
        }

        if let Some(master_code) = &verification.phone_verification_master_code {
            let canonical = master_code.len() == length as usize
                && master_code.chars().all(|c| c.is_ascii_digit())
                && !master_code.starts_with('0');
            if !canonical {
                return Err(ConfigError::InvalidValue {
                    key: "verification.phone_verification_master_code".to_string(),
                    reason: format!(
                        "must be a {}-digit number without a leading zero",
                        length
                    ),
                });
            }
        }

        for (key, secs, min) in [
            (
                "verification.verification_wait_time_secs",
                verification.verification_wait_time_secs,
                0,
            ),
            (
                "verification.verification_retries_wait_time_secs",
                verification.verification_retries_wait_time_secs,
                0,
            ),
            ("verification.send_timeout_secs", verification.send_timeout_secs, 1),
        ] {
            check_duration(key, secs, min)?;
        }

        if let Some(twilio) = &self.twilio {
            check_duration("twilio.timeout_secs", twilio.timeout_secs, 1)?;
            for (key, value) in [
                ("twilio.from", &twilio.from),
                ("twilio.sid", &twilio.sid),
                ("twilio.token", &twilio.token),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingConfig(key.to_string()));
                }
            }
        }

        Ok(())
    }

    /// Returns whether any SMS transport is configured.
    pub fn has_transport(&self) -> bool {
        self.twilio.is_some() || self.local_transport
    }
}

fn check_duration(key: &str, secs: u64, min: u64) -> Result<(), ConfigError> {
    if secs < min || secs > MAX_DURATION_SECS {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be between {} and {} seconds", min, MAX_DURATION_SECS),
        });
    }
    Ok(())
}
