//! Azure Service Bus provider implementation using the HTTP REST API.
//!
//! The provider talks to the Service Bus REST endpoints directly instead of
//! going through an SDK, which keeps the transport testable with mocked HTTP
//! responses.
//!
//! ## Operations
//!
//! - **Queue listing**: `GET /$Resources/Queues` returns an Atom feed whose
//!   entries carry a `QueueDescription` with message counters. The feed is
//!   paged with `$skip`/`$top`.
//! - **Queue details**: `GET /{queue}` returns a single entry, or an empty
//!   feed when the queue does not exist.
//! - **Receive**: `POST /{queue}/messages/head` peek-locks the head message.
//!   The lock location is returned in the `Location` header; `DELETE` on it
//!   completes the message and `PUT` releases the lock.
//! - **Send**: `POST /{queue}/messages` with system properties in the
//!   `BrokerProperties` header and application properties as custom headers.
//!
//! ## Peeking
//!
//! The REST protocol has no browse operation. A `PeekOnly` receiver
//! peek-locks messages and keeps the locks until it is closed, at which
//! point every lock is released. Each lock counts as a delivery attempt on
//! the broker.
//!
//! ## Authentication
//!
//! - **Connection string**: requests carry a SAS token signed with
//!   HMAC-SHA256 over the namespace URI and expiry.
//! - **Managed identity**: a bearer token is fetched from the instance
//!   metadata service and cached until shortly before it expires.

use crate::client::{MessageReceiver, QueueProvider, ReceiveMode};
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{
    Message, MessageId, QueueName, QueueRuntimeInfo, ReceiptHandle, ReceivedMessage, Timestamp,
};
use crate::provider::{AzureAuthMethod, AzureServiceBusConfig, ProviderType};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

const MANAGEMENT_API_VERSION: &str = "2021-05";
const QUEUE_FEED_PAGE_SIZE: usize = 100;
const SERVICE_BUS_RESOURCE: &str = "https://servicebus.azure.net/";
const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
/// Refresh managed identity tokens this many seconds before they expire
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 300;

/// Response headers that are never application properties
const SYSTEM_HEADERS: &[&str] = &[
    "brokerproperties",
    "connection",
    "content-length",
    "content-type",
    "date",
    "location",
    "server",
    "strict-transport-security",
    "transfer-encoding",
];

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Service Bus error ({status}): {message}")]
    ServiceBusError { status: u16, message: String },

    #[error("Message lock lost: {0}")]
    MessageLockLost(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AzureError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthenticationError(_) => false,
            Self::Forbidden(_) => false,
            Self::NetworkError(_) => true,
            Self::QueueNotFound(_) => false,
            Self::ServiceBusError { status, .. } => *status == 429 || *status >= 500,
            Self::MessageLockLost(_) => false,
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::AuthenticationError(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::Forbidden(operation) => QueueError::PermissionDenied { operation },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::ServiceBusError { status, message } => QueueError::ProviderError {
                provider: ProviderType::AzureServiceBus.to_string(),
                code: status.to_string(),
                message,
            },
            Self::MessageLockLost(receipt) => QueueError::MessageNotFound { receipt },
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::SerializationError(message) => {
                QueueError::SerializationError(SerializationError::InvalidBrokerProperties {
                    message,
                })
            }
        }
    }
}

impl From<AzureError> for QueueError {
    fn from(error: AzureError) -> Self {
        error.to_queue_error()
    }
}

// ============================================================================
// Authentication
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Build a Service Bus SAS token for `resource_uri` valid until `expiry` (unix seconds)
fn generate_sas_token(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expiry: i64,
) -> Result<String, AzureError> {
    let encoded_uri = urlencoding::encode(&resource_uri.to_lowercase()).into_owned();
    let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| AzureError::ConfigurationError(format!("Invalid shared access key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
        encoded_uri,
        urlencoding::encode(&signature),
        expiry,
        key_name
    ))
}

/// Parts of a Service Bus connection string the provider needs
#[derive(Clone)]
struct ConnectionDetails {
    host: String,
    key_name: String,
    key: Zeroizing<String>,
}

fn parse_connection_string(connection_string: &str) -> Result<ConnectionDetails, AzureError> {
    let mut endpoint = None;
    let mut key_name = None;
    let mut key = None;

    for segment in connection_string.split(';').filter(|s| !s.trim().is_empty()) {
        let Some((name, value)) = segment.split_once('=') else {
            return Err(AzureError::ConfigurationError(
                "Malformed connection string segment".to_string(),
            ));
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "endpoint" => endpoint = Some(value.trim().to_string()),
            "sharedaccesskeyname" => key_name = Some(value.trim().to_string()),
            "sharedaccesskey" => key = Some(Zeroizing::new(value.trim().to_string())),
            _ => {}
        }
    }

    let endpoint = endpoint.ok_or_else(|| {
        AzureError::ConfigurationError("Connection string has no Endpoint".to_string())
    })?;
    let host = url::Url::parse(&endpoint)
        .map_err(|e| AzureError::ConfigurationError(format!("Invalid Endpoint: {}", e)))?
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| AzureError::ConfigurationError("Endpoint has no host".to_string()))?;

    Ok(ConnectionDetails {
        host,
        key_name: key_name.ok_or_else(|| {
            AzureError::ConfigurationError(
                "Connection string has no SharedAccessKeyName".to_string(),
            )
        })?,
        key: key.ok_or_else(|| {
            AzureError::ConfigurationError("Connection string has no SharedAccessKey".to_string())
        })?,
    })
}

struct CachedToken {
    token: Zeroizing<String>,
    expires_on: i64,
}

#[derive(Deserialize)]
struct ImdsTokenResponse {
    access_token: String,
    expires_on: String,
}

enum Credential {
    SharedAccessKey {
        key_name: String,
        key: Zeroizing<String>,
    },
    ManagedIdentity {
        client_id: Option<String>,
        token_endpoint: String,
        cached: RwLock<Option<CachedToken>>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedAccessKey { key_name, .. } => f
                .debug_struct("SharedAccessKey")
                .field("key_name", key_name)
                .field("key", &"<REDACTED>")
                .finish(),
            Self::ManagedIdentity { client_id, .. } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .finish(),
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// System properties carried in the `BrokerProperties` header
#[derive(Debug, Default, Serialize, Deserialize)]
struct BrokerProperties {
    #[serde(rename = "MessageId", skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(rename = "CorrelationId", skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(rename = "Label", skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(rename = "LockToken", skip_serializing)]
    lock_token: Option<String>,
    #[serde(rename = "SequenceNumber", skip_serializing)]
    sequence_number: Option<i64>,
    #[serde(rename = "DeliveryCount", skip_serializing)]
    delivery_count: Option<u32>,
    #[serde(rename = "EnqueuedTimeUtc", skip_serializing)]
    enqueued_time_utc: Option<String>,
}

// ============================================================================
// Azure Service Bus Provider
// ============================================================================

/// Shared HTTP state used by the provider and its receivers
#[derive(Debug)]
struct AzureClientInner {
    http_client: reqwest::Client,
    /// Namespace base URL without trailing slash
    base_url: String,
    credential: Credential,
    token_ttl_seconds: u64,
}

/// Azure Service Bus queue provider speaking the REST protocol
#[derive(Debug, Clone)]
pub struct AzureServiceBusProvider {
    inner: Arc<AzureClientInner>,
}

impl AzureServiceBusProvider {
    /// Create new Azure Service Bus provider
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The connection string is missing or malformed
    /// - Managed identity is selected without a namespace
    /// - The HTTP client cannot be built
    pub fn new(config: AzureServiceBusConfig) -> Result<Self, AzureError> {
        let (host, credential) = match config.auth_method {
            AzureAuthMethod::ConnectionString => {
                let connection_string = config.connection_string.as_deref().ok_or_else(|| {
                    AzureError::ConfigurationError(
                        "Connection string required for ConnectionString auth method".to_string(),
                    )
                })?;
                let details = parse_connection_string(connection_string)?;
                (
                    details.host,
                    Credential::SharedAccessKey {
                        key_name: details.key_name,
                        key: details.key,
                    },
                )
            }
            AzureAuthMethod::ManagedIdentity => {
                let namespace = config.namespace.as_deref().ok_or_else(|| {
                    AzureError::ConfigurationError(
                        "Namespace required for ManagedIdentity auth".to_string(),
                    )
                })?;
                let host = if namespace.contains('.') {
                    namespace.to_string()
                } else {
                    format!("{}.servicebus.windows.net", namespace)
                };
                (
                    host,
                    Credential::ManagedIdentity {
                        client_id: config.managed_identity_client_id.clone(),
                        token_endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
                        cached: RwLock::new(None),
                    },
                )
            }
        };

        let base_url = config
            .endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://{}", host))
            .trim_end_matches('/')
            .to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AzureError::ConfigurationError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(AzureClientInner {
                http_client,
                base_url,
                credential,
                token_ttl_seconds: config.token_ttl_seconds,
            }),
        })
    }
}

impl AzureClientInner {
    /// Produce the Authorization header value for the next request
    async fn authorization(&self) -> Result<String, AzureError> {
        match &self.credential {
            Credential::SharedAccessKey { key_name, key } => {
                let expiry = Utc::now().timestamp() + self.token_ttl_seconds as i64;
                generate_sas_token(&format!("{}/", self.base_url), key_name, key, expiry)
            }
            Credential::ManagedIdentity {
                client_id,
                token_endpoint,
                cached,
            } => {
                let now = Utc::now().timestamp();
                {
                    let cache = cached.read().await;
                    if let Some(token) = cache.as_ref() {
                        if token.expires_on - TOKEN_REFRESH_MARGIN_SECONDS > now {
                            return Ok(format!("Bearer {}", token.token.as_str()));
                        }
                    }
                }

                let mut cache = cached.write().await;
                if let Some(token) = cache.as_ref() {
                    if token.expires_on - TOKEN_REFRESH_MARGIN_SECONDS > now {
                        return Ok(format!("Bearer {}", token.token.as_str()));
                    }
                }

                let fresh = self
                    .fetch_managed_identity_token(token_endpoint, client_id.as_deref())
                    .await?;
                let header = format!("Bearer {}", fresh.token.as_str());
                *cache = Some(fresh);
                Ok(header)
            }
        }
    }

    async fn fetch_managed_identity_token(
        &self,
        token_endpoint: &str,
        client_id: Option<&str>,
    ) -> Result<CachedToken, AzureError> {
        let mut query = vec![
            ("api-version", "2018-02-01".to_string()),
            ("resource", SERVICE_BUS_RESOURCE.to_string()),
        ];
        if let Some(client_id) = client_id {
            query.push(("client_id", client_id.to_string()));
        }

        let response = self
            .http_client
            .get(token_endpoint)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .map_err(|e| AzureError::AuthenticationError(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AzureError::AuthenticationError(format!(
                "Identity endpoint returned {}",
                response.status()
            )));
        }

        let token: ImdsTokenResponse = response.json().await.map_err(|e| {
            AzureError::AuthenticationError(format!("Invalid token response: {}", e))
        })?;
        let expires_on = token.expires_on.parse::<i64>().map_err(|e| {
            AzureError::AuthenticationError(format!("Invalid token expiry: {}", e))
        })?;

        Ok(CachedToken {
            token: Zeroizing::new(token.access_token),
            expires_on,
        })
    }

    /// Send an authorized request; `target` is a path relative to the namespace or an absolute URL
    async fn make_request(
        &self,
        method: Method,
        target: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, AzureError> {
        let url = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}/{}", self.base_url, target.trim_start_matches('/'))
        };

        let authorization = self.authorization().await?;
        let mut request = self
            .http_client
            .request(method, &url)
            .headers(headers)
            .header("Authorization", authorization);

        request = match body {
            Some(body) => request.body(body),
            None => request.header("Content-Length", "0"),
        };

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                AzureError::NetworkError(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                AzureError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AzureError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })
    }

    /// Map a non-success response onto an error; `resource` names what was addressed
    async fn error_for_status(response: reqwest::Response, resource: &str) -> AzureError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED => AzureError::AuthenticationError(body),
            StatusCode::FORBIDDEN => AzureError::Forbidden(resource.to_string()),
            StatusCode::NOT_FOUND => AzureError::QueueNotFound(resource.to_string()),
            StatusCode::GONE => AzureError::MessageLockLost(resource.to_string()),
            _ => AzureError::ServiceBusError {
                status: status.as_u16(),
                message: body,
            },
        }
    }

    async fn fetch_queue_feed(&self, target: &str, resource: &str) -> Result<String, AzureError> {
        let response = self
            .make_request(Method::GET, target, HeaderMap::new(), None)
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response, resource).await);
        }

        response
            .text()
            .await
            .map_err(|e| AzureError::NetworkError(format!("Failed to read response body: {}", e)))
    }

    /// Peek-lock the head message; `None` when the queue stayed empty for `wait`
    async fn lock_head(
        &self,
        queue: &QueueName,
        wait: Duration,
    ) -> Result<Option<(ReceivedMessage, String)>, AzureError> {
        let target = format!("{}/messages/head?timeout={}", queue, wait.as_secs().max(1));
        let response = self
            .make_request(Method::POST, &target, HeaderMap::new(), None)
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {}
            StatusCode::NO_CONTENT => return Ok(None),
            _ => return Err(Self::error_for_status(response, queue.as_str()).await),
        }

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| AzureError::NetworkError(format!("Failed to read message body: {}", e)))?;

        let (message, lock_location) = parse_received_message(&headers, body)?;
        let lock_url = lock_location.unwrap_or_else(|| {
            format!(
                "{}/{}/messages/{}/{}",
                self.base_url,
                queue,
                message.message_id,
                message
                    .receipt_handle
                    .as_ref()
                    .map(|r| r.handle().to_string())
                    .unwrap_or_default()
            )
        });

        Ok(Some((message, lock_url)))
    }
}

/// Build a received message from REST response headers and body.
///
/// Returns the message (its receipt holds the lock token) and the lock
/// location when the broker supplied one.
fn parse_received_message(
    headers: &HeaderMap,
    body: Bytes,
) -> Result<(ReceivedMessage, Option<String>), AzureError> {
    let broker_properties: BrokerProperties = match headers.get("BrokerProperties") {
        Some(value) => {
            let raw = value.to_str().map_err(|e| {
                AzureError::SerializationError(format!("BrokerProperties is not text: {}", e))
            })?;
            serde_json::from_str(raw).map_err(|e| {
                AzureError::SerializationError(format!("BrokerProperties is not JSON: {}", e))
            })?
        }
        None => {
            return Err(AzureError::SerializationError(
                "Response has no BrokerProperties header".to_string(),
            ))
        }
    };

    let message_id = broker_properties
        .message_id
        .as_deref()
        .ok_or_else(|| AzureError::SerializationError("Message has no MessageId".to_string()))?
        .parse::<MessageId>()
        .map_err(|e| AzureError::SerializationError(e.to_string()))?;

    let mut properties = HashMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if SYSTEM_HEADERS.contains(&name) || name.starts_with("x-ms-") {
            continue;
        }
        let Ok(raw) = value.to_str() else {
            continue;
        };
        // String properties arrive JSON-quoted; other types arrive bare
        let decoded = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string());
        properties.insert(name.to_string(), decoded);
    }

    let content_type = headers
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let lock_location = headers
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let enqueued_at = broker_properties
        .enqueued_time_utc
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
        .map(|t| Timestamp::from_datetime(t.with_timezone(&Utc)));

    let message = ReceivedMessage {
        message_id,
        body,
        properties,
        correlation_id: broker_properties.correlation_id,
        content_type,
        label: broker_properties.label,
        sequence_number: broker_properties.sequence_number.unwrap_or_default(),
        delivery_count: broker_properties.delivery_count.unwrap_or_default(),
        enqueued_at,
        receipt_handle: broker_properties
            .lock_token
            .map(|token| ReceiptHandle::new(token, ProviderType::AzureServiceBus)),
    };

    Ok((message, lock_location))
}

/// Build request headers that carry a message's system and application properties
fn build_send_headers(message: &Message) -> Result<HeaderMap, AzureError> {
    let mut headers = HeaderMap::new();

    let broker_properties = BrokerProperties {
        message_id: message.message_id.as_ref().map(|id| id.to_string()),
        correlation_id: message.correlation_id.clone(),
        label: message.label.clone(),
        ..Default::default()
    };
    let encoded = serde_json::to_string(&broker_properties)
        .map_err(|e| AzureError::SerializationError(e.to_string()))?;
    headers.insert(
        "BrokerProperties",
        HeaderValue::from_str(&encoded).map_err(|e| AzureError::SerializationError(e.to_string()))?,
    );

    let content_type = message
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        "Content-Type",
        HeaderValue::from_str(content_type)
            .map_err(|e| AzureError::SerializationError(e.to_string()))?,
    );

    for (key, value) in &message.properties {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            AzureError::SerializationError(format!("Property '{}' is not a valid header: {}", key, e))
        })?;
        let quoted = serde_json::to_string(value)
            .map_err(|e| AzureError::SerializationError(e.to_string()))?;
        let header_value = HeaderValue::from_str(&quoted).map_err(|e| {
            AzureError::SerializationError(format!("Property '{}' has an invalid value: {}", key, e))
        })?;
        headers.insert(name, header_value);
    }

    Ok(headers)
}

/// Parse a queue feed (or single entry) into runtime counters
fn parse_queue_feed(xml: &str) -> Result<Vec<QueueRuntimeInfo>, AzureError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    #[derive(Default)]
    struct EntryState {
        title: Option<String>,
        active: Option<u64>,
        dead_letter: Option<u64>,
        total: Option<u64>,
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut queues = Vec::new();
    let mut entry: Option<EntryState> = None;
    let mut current_element: Vec<u8> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"entry" {
                    entry = Some(EntryState::default());
                }
                current_element = name;
            }
            Ok(Event::Text(e)) => {
                if let Some(state) = entry.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|e| AzureError::SerializationError(format!("XML text: {}", e)))?;
                    let count = || text.trim().parse::<u64>().ok();
                    match current_element.as_slice() {
                        b"title" => state.title = Some(text.trim().to_string()),
                        b"ActiveMessageCount" => state.active = count(),
                        b"DeadLetterMessageCount" => state.dead_letter = count(),
                        b"MessageCount" => state.total = count(),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"entry" {
                    if let Some(title) = entry.as_ref().and_then(|s| s.title.clone()) {
                        let state = entry.take().unwrap_or_default();
                        match QueueName::new(title.clone()) {
                            Ok(name) => {
                                let total = state.total.unwrap_or_default();
                                queues.push(QueueRuntimeInfo {
                                    name,
                                    active_message_count: state.active.unwrap_or(total),
                                    dead_letter_message_count: state.dead_letter.unwrap_or_default(),
                                    total_message_count: total,
                                });
                            }
                            Err(e) => {
                                tracing::warn!(queue = %title, error = %e, "Skipping queue with unsupported name");
                            }
                        }
                    }
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AzureError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(queues)
}

#[async_trait]
impl QueueProvider for AzureServiceBusProvider {
    async fn list_queues(&self) -> Result<Vec<QueueRuntimeInfo>, QueueError> {
        let mut queues = Vec::new();
        let mut skip = 0usize;

        loop {
            let target = format!(
                "$Resources/Queues?api-version={}&$skip={}&$top={}",
                MANAGEMENT_API_VERSION, skip, QUEUE_FEED_PAGE_SIZE
            );
            let xml = self.inner.fetch_queue_feed(&target, "$Resources/Queues").await?;
            let page = parse_queue_feed(&xml)?;
            let page_len = page.len();
            queues.extend(page);

            if page_len < QUEUE_FEED_PAGE_SIZE {
                break;
            }
            skip += page_len;
        }

        tracing::debug!(count = queues.len(), "Listed Service Bus queues");
        Ok(queues)
    }

    async fn get_queue_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError> {
        let target = format!("{}?api-version={}", queue, MANAGEMENT_API_VERSION);
        let xml = self.inner.fetch_queue_feed(&target, queue.as_str()).await?;

        parse_queue_feed(&xml)?
            .into_iter()
            .find(|info| info.name == *queue)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            })
    }

    async fn open_receiver(
        &self,
        queue: &QueueName,
        mode: ReceiveMode,
        max_wait: Duration,
    ) -> Result<Box<dyn MessageReceiver>, QueueError> {
        Ok(Box::new(AzureReceiver {
            inner: Arc::clone(&self.inner),
            queue: queue.clone(),
            mode,
            max_wait,
            held_locks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }

    async fn send_message(&self, queue: &QueueName, message: &Message) -> Result<(), QueueError> {
        let headers = build_send_headers(message)?;
        let response = self
            .inner
            .make_request(
                Method::POST,
                &format!("{}/messages", queue),
                headers,
                Some(message.body.clone()),
            )
            .await?;

        if !response.status().is_success() {
            return Err(AzureClientInner::error_for_status(response, queue.as_str())
                .await
                .into());
        }

        tracing::debug!(queue = %queue, "Message sent to Service Bus");
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// Receiver holding peek-locks on one queue
struct AzureReceiver {
    inner: Arc<AzureClientInner>,
    queue: QueueName,
    mode: ReceiveMode,
    max_wait: Duration,
    /// Lock token -> lock URL for every message still locked by this receiver
    held_locks: Mutex<HashMap<String, String>>,
    closed: AtomicBool,
}

impl fmt::Debug for AzureReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureReceiver")
            .field("queue", &self.queue)
            .field("mode", &self.mode)
            .finish()
    }
}

#[async_trait]
impl MessageReceiver for AzureReceiver {
    async fn receive_messages(
        &self,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ProviderError {
                provider: ProviderType::AzureServiceBus.to_string(),
                code: "ReceiverClosed".to_string(),
                message: format!("receiver for '{}' is closed", self.queue),
            });
        }

        let max_size = ProviderType::AzureServiceBus.max_receive_batch();
        if max_messages > max_size {
            return Err(QueueError::BatchTooLarge {
                size: max_messages as usize,
                max_size: max_size as usize,
            });
        }

        let mut batch = Vec::new();
        while batch.len() < max_messages as usize {
            let Some((mut message, lock_url)) =
                self.inner.lock_head(&self.queue, self.max_wait).await?
            else {
                break;
            };

            let token = message
                .receipt_handle
                .as_ref()
                .map(|r| r.handle().to_string())
                .unwrap_or_else(|| lock_url.clone());
            self.held_locks.lock().await.insert(token.clone(), lock_url);

            message.receipt_handle = match self.mode {
                ReceiveMode::PeekOnly => None,
                ReceiveMode::ReceiveAndComplete => {
                    Some(ReceiptHandle::new(token, ProviderType::AzureServiceBus))
                }
            };
            batch.push(message);
        }

        Ok(batch)
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let lock_url = self
            .held_locks
            .lock()
            .await
            .get(receipt.handle())
            .cloned()
            .ok_or_else(|| QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            })?;

        let response = self
            .inner
            .make_request(Method::DELETE, &lock_url, HeaderMap::new(), None)
            .await?;
        if !response.status().is_success() {
            let error = match response.status() {
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    AzureError::MessageLockLost(receipt.handle().to_string())
                }
                _ => AzureClientInner::error_for_status(response, self.queue.as_str()).await,
            };
            return Err(error.into());
        }

        self.held_locks.lock().await.remove(receipt.handle());
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let locks: Vec<String> = self.held_locks.lock().await.drain().map(|(_, url)| url).collect();
        for lock_url in locks {
            match self
                .inner
                .make_request(Method::PUT, &lock_url, HeaderMap::new(), None)
                .await
            {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(
                        queue = %self.queue,
                        status = response.status().as_u16(),
                        "Failed to release message lock; it will expire on the broker"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        queue = %self.queue,
                        error = %e,
                        "Failed to release message lock; it will expire on the broker"
                    );
                }
            }
        }

        Ok(())
    }

    fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    fn mode(&self) -> ReceiveMode {
        self.mode
    }
}
