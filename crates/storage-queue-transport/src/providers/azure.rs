//! Azure Storage Queue provider speaking the queue service REST protocol.
//!
//! Requests are authenticated with Shared Key signatures derived from the
//! storage account key and every call goes through the configured
//! [`RetryPolicy`], so transient faults (timeouts, dropped connections,
//! throttling and 5xx responses) are retried with exponential backoff.
//!
//! ## Connection Strings
//!
//! The usual storage connection string format is accepted:
//!
//! ```text
//! DefaultEndpointsProtocol=https;AccountName=myaccount;AccountKey=<base64>;EndpointSuffix=core.windows.net
//! AccountName=myaccount;AccountKey=<base64>;QueueEndpoint=http://localhost:10001/myaccount
//! UseDevelopmentStorage=true
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use storage_queue_transport::providers::{AzureStorageAccount, AzureStorageConfig};
//! use storage_queue_transport::{QueueName, StorageAccount};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AzureStorageConfig::from_connection_string("UseDevelopmentStorage=true")?;
//! let account = AzureStorageAccount::new(config)?;
//!
//! let queue = account.queue(&QueueName::new("orders")?);
//! queue.create_if_not_exists().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ConfigurationError, QueueError};
use crate::message::{MessageId, PopReceipt, QueueMessage, QueueName};
use crate::queue::{EnqueueOptions, StorageAccount, StorageQueue};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::HeaderMap;
use reqwest::{Client as HttpClient, Method, StatusCode};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

/// REST API version sent with every request
pub const API_VERSION: &str = "2019-12-12";

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_QUEUE_ENDPOINT: &str = "http://127.0.0.1:10001/devstoreaccount1";

/// Service limit on messages fetched per receive call
pub const MAX_MESSAGES_PER_RECEIVE: u32 = 32;

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for a storage account's queue service
#[derive(Clone)]
pub struct AzureStorageConfig {
    pub account_name: String,
    /// Base64 encoded account key
    pub account_key: String,
    pub queue_endpoint: Url,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl AzureStorageConfig {
    /// Parse a storage connection string
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ConfigurationError> {
        let settings: HashMap<String, String> = connection_string
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.split_once('=')
                    .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                    .ok_or_else(|| ConfigurationError::Parsing {
                        message: format!("connection string segment '{}' is not key=value", part),
                    })
            })
            .collect::<Result<_, _>>()?;

        if settings
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Self::new(DEV_ACCOUNT_NAME, DEV_ACCOUNT_KEY, DEV_QUEUE_ENDPOINT);
        }

        let required = |key: &str, name: &str| {
            settings
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ConfigurationError::Missing {
                    key: name.to_string(),
                })
        };

        let account_name = required("accountname", "AccountName")?;
        let account_key = required("accountkey", "AccountKey")?;

        let endpoint = match settings.get("queueendpoint") {
            Some(endpoint) => endpoint.clone(),
            None => {
                let protocol = settings
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = settings
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{}://{}.queue.{}", protocol, account_name, suffix)
            }
        };

        Self::new(&account_name, &account_key, &endpoint)
    }

    /// Create a configuration from explicit account settings
    pub fn new(
        account_name: &str,
        account_key: &str,
        queue_endpoint: &str,
    ) -> Result<Self, ConfigurationError> {
        STANDARD
            .decode(account_key)
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("AccountKey is not valid base64: {}", e),
            })?;

        let queue_endpoint =
            Url::parse(queue_endpoint.trim_end_matches('/')).map_err(|e| {
                ConfigurationError::Invalid {
                    message: format!("queue endpoint '{}' is not a URL: {}", queue_endpoint, e),
                }
            })?;

        if !matches!(queue_endpoint.scheme(), "http" | "https") {
            return Err(ConfigurationError::Invalid {
                message: format!("queue endpoint '{}' must use http or https", queue_endpoint),
            });
        }

        Ok(Self {
            account_name: account_name.to_string(),
            account_key: account_key.to_string(),
            queue_endpoint,
            request_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Set the timeout applied to each HTTP request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry policy for transient faults
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl fmt::Debug for AzureStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureStorageConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &"<REDACTED>")
            .field("queue_endpoint", &self.queue_endpoint.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

// ============================================================================
// Shared Key Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Shared Key request signer
///
/// The string to sign is the verb, the standard header slots (only
/// Content-Length and Content-Type are ever filled), the canonicalized
/// `x-ms-*` headers and the canonicalized resource. The signature is the
/// base64 HMAC-SHA256 of that string keyed with the decoded account key.
#[derive(Clone)]
struct SharedKeySigner {
    account_name: String,
    key: Vec<u8>,
}

impl SharedKeySigner {
    fn new(account_name: &str, account_key: &str) -> Result<Self, ConfigurationError> {
        let key = STANDARD
            .decode(account_key)
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("AccountKey is not valid base64: {}", e),
            })?;

        Ok(Self {
            account_name: account_name.to_string(),
            key,
        })
    }

    fn string_to_sign(
        &self,
        method: &Method,
        url: &Url,
        content_length: usize,
        content_type: &str,
        ms_headers: &BTreeMap<String, String>,
    ) -> String {
        let content_length = if content_length == 0 {
            String::new()
        } else {
            content_length.to_string()
        };

        let standard_headers = [
            method.as_str(),
            "", // Content-Encoding
            "", // Content-Language
            content_length.as_str(),
            "", // Content-MD5
            content_type,
            "", // Date
            "", // If-Modified-Since
            "", // If-Match
            "", // If-None-Match
            "", // If-Unmodified-Since
            "", // Range
        ];

        let mut string_to_sign = standard_headers.join("\n");
        string_to_sign.push('\n');

        for (name, value) in ms_headers {
            string_to_sign.push_str(&format!("{}:{}\n", name.to_ascii_lowercase(), value.trim()));
        }

        string_to_sign.push_str(&self.canonicalized_resource(url));
        string_to_sign
    }

    fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account_name, url.path());

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            params
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.into_owned());
        }

        for (name, mut values) in params {
            values.sort();
            resource.push_str(&format!("\n{}:{}", name, values.join(",")));
        }

        resource
    }

    fn authorization(&self, string_to_sign: &str) -> Result<String, QueueError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| QueueError::AuthenticationFailed {
                message: format!("account key rejected by HMAC: {}", e),
            })?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKey {}:{}", self.account_name, signature))
    }
}

// ============================================================================
// REST Client
// ============================================================================

/// Message a request refers to, used to name it in errors
#[derive(Clone, Copy)]
struct MessageTarget<'a> {
    message_id: &'a MessageId,
    pop_receipt: &'a PopReceipt,
}

struct RestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl RestResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

struct RestClient {
    http_client: HttpClient,
    signer: SharedKeySigner,
    endpoint: Url,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl RestClient {
    fn resource_url(&self, segments: &[&str]) -> Result<Url, QueueError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| QueueError::ConnectionFailed {
                message: format!("endpoint '{}' cannot hold a resource path", self.endpoint),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request with retries; non-success responses become errors
    async fn call(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        body: Option<String>,
        queue_name: &QueueName,
        target: Option<MessageTarget<'_>>,
    ) -> Result<RestResponse, QueueError> {
        let method = &method;
        let url = &url;
        let body = body.as_deref();

        self.retry_policy
            .execute(operation, move || async move {
                let response = self.send_once(method, url, body).await?;
                if response.status.is_success() {
                    Ok(response)
                } else {
                    Err(map_error_response(&response, queue_name, target))
                }
            })
            .await
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&str>,
    ) -> Result<RestResponse, QueueError> {
        let mut ms_headers = BTreeMap::new();
        ms_headers.insert(
            "x-ms-date".to_string(),
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        ms_headers.insert("x-ms-version".to_string(), API_VERSION.to_string());

        let content_length = body.map(str::len).unwrap_or(0);
        let content_type = if content_length > 0 {
            "application/xml"
        } else {
            ""
        };

        let string_to_sign =
            self.signer
                .string_to_sign(method, url, content_length, content_type, &ms_headers);
        let authorization = self.signer.authorization(&string_to_sign)?;

        let mut request = self
            .http_client
            .request(method.clone(), url.clone())
            .header("Authorization", authorization);
        for (name, value) in &ms_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !content_type.is_empty() {
            request = request.header("Content-Type", content_type);
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                QueueError::Timeout {
                    duration: self.request_timeout,
                }
            } else {
                QueueError::ConnectionFailed {
                    message: format!("HTTP request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| QueueError::ConnectionFailed {
            message: format!("Failed to read response body: {}", e),
        })?;

        debug!(
            method = %method,
            path = url.path(),
            status = status.as_u16(),
            "Queue service call completed"
        );

        Ok(RestResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a non-success response onto a queue error
fn map_error_response(
    response: &RestResponse,
    queue_name: &QueueName,
    target: Option<MessageTarget<'_>>,
) -> QueueError {
    let error_record = parse_records(&response.body, "Error")
        .ok()
        .and_then(|mut records| records.pop())
        .unwrap_or_default();

    let code = response
        .header("x-ms-error-code")
        .map(str::to_string)
        .or_else(|| error_record.get("Code").cloned())
        .unwrap_or_default();
    let message = error_record
        .get("Message")
        .map(|m| m.lines().next().unwrap_or_default().to_string())
        .unwrap_or_else(|| {
            response
                .status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });

    let message_not_found = |target: MessageTarget<'_>| QueueError::MessageNotFound {
        message_id: target.message_id.to_string(),
        pop_receipt: target.pop_receipt.to_string(),
    };

    match (code.as_str(), target) {
        ("QueueNotFound", _) => QueueError::QueueNotFound {
            queue_name: queue_name.to_string(),
        },
        ("MessageNotFound" | "PopReceiptMismatch", Some(target)) => message_not_found(target),
        ("", Some(target)) if response.status == StatusCode::NOT_FOUND => {
            message_not_found(target)
        }
        ("", None) if response.status == StatusCode::NOT_FOUND => QueueError::QueueNotFound {
            queue_name: queue_name.to_string(),
        },
        _ if response.status == StatusCode::UNAUTHORIZED
            || response.status == StatusCode::FORBIDDEN =>
        {
            QueueError::AuthenticationFailed {
                message: format!("{}: {}", code, message),
            }
        }
        _ => QueueError::ServiceError {
            status: response.status.as_u16(),
            code,
            message,
        },
    }
}

// ============================================================================
// XML Handling
// ============================================================================

/// Collect the child element texts of every `record` element in a document
fn parse_records(xml: &str, record: &str) -> Result<Vec<HashMap<String, String>>, QueueError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == record {
                    current = Some(HashMap::new());
                } else if current.is_some() {
                    field = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(fields), Some(name)) = (current.as_mut(), field.as_ref()) {
                    let text = e.unescape().map_err(|e| QueueError::InvalidResponse {
                        message: format!("Failed to unescape XML text: {}", e),
                    })?;
                    fields.insert(name.clone(), text.into_owned());
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == record.as_bytes() {
                    if let Some(fields) = current.take() {
                        records.push(fields);
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(QueueError::InvalidResponse {
                    message: format!("XML parsing error: {}", e),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

fn required_field<'a>(
    record: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, QueueError> {
    record
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| QueueError::InvalidResponse {
            message: format!("{} missing from queue message", name),
        })
}

fn parse_service_time(value: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::InvalidResponse {
            message: format!("invalid service timestamp '{}': {}", value, e),
        })
}

fn to_queue_message(record: &HashMap<String, String>) -> Result<QueueMessage, QueueError> {
    let message_id = required_field(record, "MessageId")?.parse::<MessageId>().map_err(|e| {
        QueueError::InvalidResponse {
            message: e.to_string(),
        }
    })?;

    let dequeue_count = required_field(record, "DequeueCount")?
        .parse()
        .map_err(|_| QueueError::InvalidResponse {
            message: "DequeueCount is not a number".to_string(),
        })?;

    Ok(QueueMessage {
        message_id,
        pop_receipt: PopReceipt::new(required_field(record, "PopReceipt")?),
        text: record.get("MessageText").cloned().unwrap_or_default(),
        dequeue_count,
        inserted_at: parse_service_time(required_field(record, "InsertionTime")?)?,
        expires_at: record
            .get("ExpirationTime")
            .map(String::as_str)
            .map(parse_service_time)
            .transpose()?,
        next_visible_at: parse_service_time(required_field(record, "TimeNextVisible")?)?,
    })
}

/// Round a duration up to whole seconds, the service's resolution
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

// ============================================================================
// Storage Account and Queue
// ============================================================================

/// Queue service of one storage account
pub struct AzureStorageAccount {
    client: Arc<RestClient>,
}

impl AzureStorageAccount {
    /// Create an account client from configuration
    pub fn new(config: AzureStorageConfig) -> Result<Self, ConfigurationError> {
        let signer = SharedKeySigner::new(&config.account_name, &config.account_key)?;

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client: Arc::new(RestClient {
                http_client,
                signer,
                endpoint: config.queue_endpoint,
                request_timeout: config.request_timeout,
                retry_policy: config.retry_policy,
            }),
        })
    }

    /// Create an account client from a connection string with default settings
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ConfigurationError> {
        Self::new(AzureStorageConfig::from_connection_string(
            connection_string,
        )?)
    }
}

impl fmt::Debug for AzureStorageAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureStorageAccount")
            .field("account_name", &self.client.signer.account_name)
            .field("endpoint", &self.client.endpoint.as_str())
            .finish()
    }
}

impl StorageAccount for AzureStorageAccount {
    fn queue(&self, name: &QueueName) -> Arc<dyn StorageQueue> {
        Arc::new(AzureStorageQueue {
            client: Arc::clone(&self.client),
            name: name.clone(),
        })
    }
}

/// Handle to one queue in a storage account
pub struct AzureStorageQueue {
    client: Arc<RestClient>,
    name: QueueName,
}

impl AzureStorageQueue {
    fn queue_url(&self) -> Result<Url, QueueError> {
        self.client.resource_url(&[self.name.as_str()])
    }

    fn messages_url(&self) -> Result<Url, QueueError> {
        self.client.resource_url(&[self.name.as_str(), "messages"])
    }

    fn message_url(&self, message_id: &MessageId) -> Result<Url, QueueError> {
        self.client
            .resource_url(&[self.name.as_str(), "messages", message_id.as_str()])
    }

    async fn metadata(&self) -> Result<RestResponse, QueueError> {
        let mut url = self.queue_url()?;
        url.query_pairs_mut().append_pair("comp", "metadata");
        self.client
            .call("get_queue_metadata", Method::GET, url, None, &self.name, None)
            .await
    }
}

#[async_trait]
impl StorageQueue for AzureStorageQueue {
    fn name(&self) -> &QueueName {
        &self.name
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        match self.metadata().await {
            Ok(_) => Ok(true),
            Err(QueueError::QueueNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_if_not_exists(&self) -> Result<bool, QueueError> {
        let url = self.queue_url()?;
        let result = self
            .client
            .call(
                "create_queue",
                Method::PUT,
                url,
                Some(String::new()),
                &self.name,
                None,
            )
            .await;

        match result {
            Ok(response) => Ok(response.status == StatusCode::CREATED),
            Err(QueueError::ServiceError {
                status: 409,
                ref code,
                ..
            }) if code == "QueueAlreadyExists" => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn approximate_message_count(&self) -> Result<u64, QueueError> {
        let response = self.metadata().await?;
        response
            .header("x-ms-approximate-messages-count")
            .and_then(|count| count.parse().ok())
            .ok_or_else(|| QueueError::InvalidResponse {
                message: "x-ms-approximate-messages-count header missing".to_string(),
            })
    }

    async fn send_message(
        &self,
        payload: &str,
        options: &EnqueueOptions,
    ) -> Result<MessageId, QueueError> {
        let mut url = self.messages_url()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(delay) = options.initial_visibility_delay {
                query.append_pair("visibilitytimeout", &whole_seconds(delay).to_string());
            }
            if let Some(ttl) = options.time_to_live {
                query.append_pair("messagettl", &whole_seconds(ttl).max(1).to_string());
            }
        }

        let body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            quick_xml::escape::escape(payload)
        );

        let response = self
            .client
            .call("put_message", Method::POST, url, Some(body), &self.name, None)
            .await?;

        let records = parse_records(&response.body, "QueueMessage")?;
        let record = records.first().ok_or_else(|| QueueError::InvalidResponse {
            message: "put message response holds no message".to_string(),
        })?;

        required_field(record, "MessageId")?
            .parse::<MessageId>()
            .map_err(|e| QueueError::InvalidResponse {
                message: e.to_string(),
            })
    }

    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut url = self.messages_url()?;
        url.query_pairs_mut()
            .append_pair(
                "numofmessages",
                &max_messages.clamp(1, MAX_MESSAGES_PER_RECEIVE).to_string(),
            )
            .append_pair(
                "visibilitytimeout",
                &whole_seconds(visibility_timeout).max(1).to_string(),
            );

        let response = self
            .client
            .call("get_messages", Method::GET, url, None, &self.name, None)
            .await?;

        parse_records(&response.body, "QueueMessage")?
            .iter()
            .map(to_queue_message)
            .collect()
    }

    async fn delete_message(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        let mut url = self.message_url(message_id)?;
        url.query_pairs_mut()
            .append_pair("popreceipt", pop_receipt.as_str());

        self.client
            .call(
                "delete_message",
                Method::DELETE,
                url,
                None,
                &self.name,
                Some(MessageTarget {
                    message_id,
                    pop_receipt,
                }),
            )
            .await
            .map(|_| ())
    }

    async fn update_visibility(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        visibility_timeout: Duration,
    ) -> Result<PopReceipt, QueueError> {
        let mut url = self.message_url(message_id)?;
        url.query_pairs_mut()
            .append_pair("popreceipt", pop_receipt.as_str())
            .append_pair(
                "visibilitytimeout",
                &whole_seconds(visibility_timeout).to_string(),
            );

        let response = self
            .client
            .call(
                "update_message",
                Method::PUT,
                url,
                Some(String::new()),
                &self.name,
                Some(MessageTarget {
                    message_id,
                    pop_receipt,
                }),
            )
            .await?;

        response
            .header("x-ms-popreceipt")
            .map(PopReceipt::new)
            .ok_or_else(|| QueueError::InvalidResponse {
                message: "x-ms-popreceipt header missing".to_string(),
            })
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let url = self.messages_url()?;
        self.client
            .call("clear_messages", Method::DELETE, url, None, &self.name, None)
            .await
            .map(|_| ())
    }
}
