//! Twilio SMS transport.
//!
//! Validates numbers with the Twilio Lookup API (carrier lookup) and sends
//! verification messages with the Programmable Messaging API.
//!
//! @author Joseph G Noonan
//! @copyright 2025

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::config::TwilioConfig;
use crate::sms::{mask_phone_number, PhoneLookup, SmsTransport, TransportError};

#[derive(Debug, Deserialize)]
struct LookupResponse {
    phone_number: String,
    carrier: Option<Carrier>,
}

#[derive(Debug, Deserialize)]
struct Carrier {
    #[serde(rename = "type")]
    carrier_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    #[serde(rename = "To")]
    to: &'a str,
    #[serde(rename = "From")]
    from: &'a str,
    #[serde(rename = "Body")]
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: Option<u32>,
    message: String,
}

pub struct TwilioClient {
    config: TwilioConfig,
    client: Client,
    timeout: Duration,
    lookup_base: Url,
    api_base: Url,
}

/// Parses a base URL that path segments can be appended to.
fn base_url(key: &str, url: &str) -> Result<Url> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid {}: {}", key, url))?;
    if parsed.cannot_be_a_base() {
        bail!("Invalid {}: {} cannot be a base URL", key, url);
    }
    Ok(parsed)
}

/// Appends `segments` to `base`, percent-encoding each one so that `/` or
/// `?` inside a segment stays part of it.
fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;
        let lookup_base = base_url("twilio.lookup_url", &config.lookup_url)?;
        let api_base = base_url("twilio.api_url", &config.api_url)?;

        info!(
            from = %mask_phone_number(&config.from),
            lookup_url = %config.lookup_url,
            api_url = %config.api_url,
            "Twilio client initialized"
        );

        Ok(Self {
            config,
            client,
            timeout,
            lookup_base,
            api_base,
        })
    }

    fn lookup_url(&self, phone: &str) -> Url {
        join_segments(&self.lookup_base, &["v1", "PhoneNumbers", phone])
    }

    fn messages_url(&self) -> Url {
        join_segments(
            &self.api_base,
            &["2010-04-01", "Accounts", &self.config.sid, "Messages.json"],
        )
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Http(err)
        }
    }

    /// Turns a non-success response into `TransportError::Rejected`, using
    /// Twilio's JSON error body when there is one.
    async fn rejection(response: Response) -> TransportError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(ErrorResponse {
                code: Some(code),
                message,
            }) => format!("{} (code {})", message, code),
            Ok(ErrorResponse { message, .. }) => message,
            Err(_) => text,
        };

        TransportError::Rejected { status, message }
    }
}

#[async_trait]
impl SmsTransport for TwilioClient {
    async fn lookup(&self, phone: &str) -> Result<PhoneLookup, TransportError> {
        let response = self
            .client
            .get(self.lookup_url(phone))
            .query(&[("Type", "carrier")])
            .basic_auth(&self.config.sid, Some(&self.config.token))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            let err = Self::rejection(response).await;
            error!(phone = %mask_phone_number(phone), error = %err, "Twilio lookup failed");
            return Err(err);
        }

        let lookup: LookupResponse = response.json().await.map_err(|e| self.map_error(e))?;
        let carrier_type = lookup.carrier.and_then(|carrier| carrier.carrier_type);
        info!(
            phone = %mask_phone_number(&lookup.phone_number),
            carrier_type = ?carrier_type,
            "Looked up phone number"
        );

        Ok(PhoneLookup {
            phone_number: lookup.phone_number,
            carrier_type,
        })
    }

    async fn send(&self, to: &str, from: &str, body: &str) -> Result<(), TransportError> {
        let request = MessageRequest { to, from, body };

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.sid, Some(&self.config.token))
            .form(&request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            let err = Self::rejection(response).await;
            error!(to = %mask_phone_number(to), error = %err, "Twilio error");
            return Err(err);
        }

        let message: MessageResponse = response.json().await.map_err(|e| self.map_error(e))?;
        info!(
            to = %mask_phone_number(to),
            sid = %message.sid,
            status = %message.status,
            "Sent verification SMS"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(server: &mockito::Server) -> TwilioConfig {
        TwilioConfig {
            from: "+15550000000".to_string(),
            sid: "AC_test".to_string(),
            token: "test_token".to_string(),
            lookup_url: server.url(),
            api_url: server.url(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_lookup_returns_normalized_number_and_carrier() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/PhoneNumbers/5551234567")
            .match_query(Matcher::UrlEncoded("Type".into(), "carrier".into()))
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "phone_number": "+15551234567",
                    "national_format": "(555) 123-4567",
                    "carrier": { "name": "Carrier", "type": "mobile" }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = TwilioClient::new(config(&server)).unwrap();
        let lookup = client.lookup("5551234567").await.unwrap();

        mock.assert_async().await;
        assert_eq!(lookup.phone_number, "+15551234567");
        assert_eq!(lookup.carrier_type.as_deref(), Some("mobile"));
        assert!(!lookup.is_non_mobile());
    }

    #[tokio::test]
    async fn test_lookup_without_carrier_section() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/PhoneNumbers/5551234567")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"phone_number": "+15551234567"}"#)
            .create_async()
            .await;

        let client = TwilioClient::new(config(&server)).unwrap();
        let lookup = client.lookup("5551234567").await.unwrap();

        assert_eq!(lookup.carrier_type, None);
    }

    #[tokio::test]
    async fn test_lookup_not_found_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/PhoneNumbers/123")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"code": 20404, "message": "The requested resource was not found", "status": 404}"#)
            .create_async()
            .await;

        let client = TwilioClient::new(config(&server)).unwrap();
        let err = client.lookup("123").await.unwrap_err();

        match err {
            TransportError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("20404"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_posts_message_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/2010-04-01/Accounts/AC_test/Messages.json")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("To".into(), "+15551234567".into()),
                Matcher::UrlEncoded("From".into(), "+15550000000".into()),
                Matcher::UrlEncoded("Body".into(), "Your code is 1234".into()),
            ]))
            .with_status(201)
            .with_body(r#"{"sid": "SM123", "status": "queued"}"#)
            .create_async()
            .await;

        let client = TwilioClient::new(config(&server)).unwrap();
        client
            .send("+15551234567", "+15550000000", "Your code is 1234")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_failure_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/2010-04-01/Accounts/AC_test/Messages.json")
            .with_status(400)
            .with_body(r#"{"code": 21211, "message": "Invalid 'To' Phone Number"}"#)
            .create_async()
            .await;

        let client = TwilioClient::new(config(&server)).unwrap();
        let err = client
            .send("+15551234567", "+15550000000", "body")
            .await
            .unwrap_err();

        match err {
            TransportError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid 'To' Phone Number (code 21211)");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let client = TwilioClient::new(TwilioConfig {
            from: "+15550000000".to_string(),
            sid: "AC1".to_string(),
            token: "t".to_string(),
            lookup_url: "https://lookups.example/".to_string(),
            api_url: "https://api.example/".to_string(),
            timeout_secs: 1,
        })
        .unwrap();

        assert_eq!(
            client.lookup_url("+15551234567").as_str(),
            "https://lookups.example/v1/PhoneNumbers/+15551234567"
        );
        assert_eq!(
            client.messages_url().as_str(),
            "https://api.example/2010-04-01/Accounts/AC1/Messages.json"
        );
    }

    #[test]
    fn test_lookup_url_escapes_path_characters() {
        let client = TwilioClient::new(TwilioConfig {
            from: "+15550000000".to_string(),
            sid: "AC1".to_string(),
            token: "t".to_string(),
            lookup_url: "https://lookups.example".to_string(),
            api_url: "https://api.example".to_string(),
            timeout_secs: 1,
        })
        .unwrap();

        let url = client.lookup_url("5551234567/../../v2/PhoneNumbers/+15559999999");
        assert_eq!(
            url.path(),
            "/v1/PhoneNumbers/5551234567%2F..%2F..%2Fv2%2FPhoneNumbers%2F+15559999999"
        );

        let url = client.lookup_url("5551234567?Type=none#x");
        assert_eq!(url.path_segments().unwrap().count(), 3);
        assert!(url.query().is_none());
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let result = TwilioClient::new(TwilioConfig {
            from: "+15550000000".to_string(),
            sid: "AC1".to_string(),
            token: "t".to_string(),
            lookup_url: "not a url".to_string(),
            api_url: "https://api.example".to_string(),
            timeout_secs: 1,
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_lookup_keeps_traversal_inside_phone_segment() {
        let mut server = mockito::Server::new_async().await;
        let escaped = server
            .mock(
                "GET",
                Matcher::Regex(r"^/v1/PhoneNumbers/5551234567%2F\.\.%2F".to_string()),
            )
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"code": 20404, "message": "not found"}"#)
            .create_async()
            .await;
        let traversed = server
            .mock("GET", Matcher::Regex(r"^/v1/v2/".to_string()))
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = TwilioClient::new(config(&server)).unwrap();
        let err = client
            .lookup("5551234567/../../v2/PhoneNumbers/+15559999999")
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Rejected { status: 404, .. }));
        escaped.assert_async().await;
        traversed.assert_async().await;
    }
}
