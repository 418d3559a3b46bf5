use crate::core::errors::{ErrorCategory, ErrorCodeTable, ExchangeError};
use crate::core::kernel::rate_limit::RateGovernor;
use crate::core::kernel::signer::Signer;
use crate::core::types::HttpMethod;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, instrument, trace, warn};

/// One REST call, built per request by the endpoint wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestRequest {
    pub method: HttpMethod,
    pub path: String,
    /// Ordered parameters; the signature covers them in this order.
    pub params: Vec<(String, String)>,
    pub requires_signature: bool,
    /// Send the API key header without signing (user data stream keys).
    pub requires_api_key: bool,
    pub weight: u32,
    pub counts_as_order: bool,
}

impl RestRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            requires_signature: false,
            requires_api_key: false,
            weight: 1,
            counts_as_order: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn optional_param<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    #[must_use]
    pub fn signed(mut self) -> Self {
        self.requires_signature = true;
        self
    }

    #[must_use]
    pub fn keyed(mut self) -> Self {
        self.requires_api_key = true;
        self
    }

    #[must_use]
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn order(mut self) -> Self {
        self.counts_as_order = true;
        self
    }

    /// Whether a failed attempt may be sent again.
    ///
    /// An order placement that timed out or hit a 5xx may have been executed,
    /// so it is only re-sent after a rate-limit rejection.
    pub fn may_retry(&self, err: &ExchangeError) -> bool {
        if self.counts_as_order {
            return matches!(err, ExchangeError::RateLimitExceeded { .. });
        }
        err.is_retryable()
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.params.iter().any(|(k, _)| k == key)
    }

    /// Form-urlencoded params in insertion order.
    pub fn query_string(&self) -> Result<String, ExchangeError> {
        encode_params(&self.params)
    }
}

fn encode_params(params: &[(String, String)]) -> Result<String, ExchangeError> {
    serde_urlencoded::to_string(params)
        .map_err(|e| ExchangeError::InvalidParameters(format!("Failed to encode query: {}", e)))
}

/// Successful (2xx, no error envelope) response.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status_code: u16,
    pub body: Value,
    pub headers: HeaderMap,
}

impl RestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ExchangeError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to deserialize JSON: {}", e))
        })
    }
}

/// Fully prepared wire request handed to an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute URL including the query string.
    pub url: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }
}

/// Moves bytes. Everything exchange-aware stays in [`RestExecutor`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &RestClientConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ExchangeError::TransportError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::ConnectionTimeout(format!("Request timed out: {}", e))
            } else {
                ExchangeError::TransportError(format!("Request failed: {}", e))
            }
        })?;

        let status_code = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| {
            ExchangeError::TransportError(format!("Failed to read response body: {}", e))
        })?;

        Ok(HttpResponse {
            status_code,
            headers,
            body,
        })
    }
}

/// REST client trait for making HTTP requests
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Issue a request and return the normalized response.
    async fn execute(&self, request: RestRequest) -> Result<RestResponse, ExchangeError>;

    /// Issue a request and deserialize the body.
    async fn execute_json<T: DeserializeOwned + Send>(
        &self,
        request: RestRequest,
    ) -> Result<T, ExchangeError> {
        self.execute(request).await?.json()
    }

    /// Re-measure the offset between the local clock and the exchange clock.
    async fn sync_time(&self) -> Result<i64, ExchangeError>;

    fn rate_governor(&self) -> &Arc<RateGovernor>;
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// User agent string to include in requests
    pub user_agent: String,
    /// `recvWindow` added to signed requests that don't set their own
    pub recv_window_ms: u64,
    /// Unsigned endpoint returning `{"serverTime": ms}`
    pub time_endpoint: Option<String>,
    pub error_codes: ErrorCodeTable,
}

impl RestClientConfig {
    /// Create a new configuration
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            max_retries: 3,
            retry_base_delay_ms: 200,
            max_retry_delay_ms: 5_000,
            user_agent: "coinmx/0.1".to_string(),
            recv_window_ms: crate::core::config::DEFAULT_RECV_WINDOW_MS,
            time_endpoint: None,
            error_codes: ErrorCodeTable::empty(),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_base_delay_ms = base_ms;
        self.max_retry_delay_ms = max_ms;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn with_time_endpoint(mut self, path: impl Into<String>) -> Self {
        self.time_endpoint = Some(path.into());
        self
    }

    pub fn with_error_codes(mut self, error_codes: ErrorCodeTable) -> Self {
        self.error_codes = error_codes;
        self
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) yields 2, 4, 8..; the factor scales that to base, 2*base, 4*base..
        ExponentialBackoff::from_millis(2)
            .factor((self.retry_base_delay_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.max_retry_delay_ms))
            .map(jitter)
            .take(self.max_retries)
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    transport: Option<Arc<dyn HttpTransport>>,
    governor: Option<Arc<RateGovernor>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
            transport: None,
            governor: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the default `reqwest` transport.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_rate_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn build(self) -> Result<RestExecutor, ExchangeError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        Ok(RestExecutor {
            config: Arc::new(self.config),
            transport,
            signer: self.signer,
            governor: self.governor.unwrap_or_default(),
            clock_offset_ms: Arc::new(AtomicI64::new(0)),
        })
    }
}

/// Signs, rate-limits, sends and classifies REST calls.
#[derive(Clone)]
pub struct RestExecutor {
    config: Arc<RestClientConfig>,
    transport: Arc<dyn HttpTransport>,
    signer: Option<Arc<dyn Signer>>,
    governor: Arc<RateGovernor>,
    clock_offset_ms: Arc<AtomicI64>,
}

impl std::fmt::Debug for RestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestExecutor")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .field("clock_offset_ms", &self.clock_offset_ms.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RestExecutor {
    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    /// Milliseconds to add to the local clock to get exchange time.
    pub fn clock_offset_ms(&self) -> i64 {
        self.clock_offset_ms.load(Ordering::Relaxed)
    }

    fn timestamp(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis() + self.clock_offset_ms();
        now.max(0) as u64
    }

    async fn execute_with_retry(&self, request: &RestRequest) -> Result<RestResponse, ExchangeError> {
        RetryIf::spawn(
            self.config.retry_strategy(),
            || self.attempt(request),
            |err: &ExchangeError| {
                let retry = request.may_retry(err);
                if retry {
                    warn!(error = %err, path = %request.path, "retrying request");
                }
                retry
            },
        )
        .await
    }

    async fn attempt(&self, request: &RestRequest) -> Result<RestResponse, ExchangeError> {
        self.governor
            .acquire(request.weight, request.counts_as_order)
            .await?;

        let mut params = request.params.clone();
        let mut headers = HashMap::new();

        let query_string = if request.requires_signature {
            let signer = self.signer.as_ref().ok_or_else(missing_signer)?;
            if !request.has_param("recvWindow") {
                params.push((
                    "recvWindow".to_string(),
                    self.config.recv_window_ms.to_string(),
                ));
            }
            let query_string = encode_params(&params)?;
            let (signed_headers, signed_params) = signer.sign_request(
                request.method.as_str(),
                &request.path,
                &query_string,
                &[],
                self.timestamp(),
            )?;
            headers.extend(signed_headers);
            let suffix = encode_params(&signed_params)?;
            if query_string.is_empty() {
                suffix
            } else {
                format!("{}&{}", query_string, suffix)
            }
        } else {
            if request.requires_api_key {
                let signer = self.signer.as_ref().ok_or_else(missing_signer)?;
                headers.extend(signer.api_key_headers());
            }
            encode_params(&params)?
        };

        let url = if query_string.is_empty() {
            format!("{}{}", self.config.base_url, request.path)
        } else {
            format!("{}{}?{}", self.config.base_url, request.path, query_string)
        };

        let response = self
            .transport
            .send(HttpRequest {
                method: request.method,
                url,
                headers,
            })
            .await?;

        self.handle_response(response)
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = response.status_code))]
    fn handle_response(&self, response: HttpResponse) -> Result<RestResponse, ExchangeError> {
        trace!("Response body: {}", response.body);

        if let Some(err) =
            self.governor
                .record_response(response.status_code, &response.headers, &response.body)
        {
            return Err(err);
        }

        let success = (200..300).contains(&response.status_code);
        let body = if response.body.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&response.body) {
                Ok(value) => value,
                Err(e) if success => {
                    return Err(ExchangeError::DeserializationError(format!(
                        "Failed to parse JSON response: {}",
                        e
                    )));
                }
                Err(_) => Value::String(response.body.clone()),
            }
        };

        if !success {
            return Err(self.api_error(response.status_code, &body));
        }

        // Some endpoints answer 200 with an error envelope.
        if body
            .get("code")
            .and_then(Value::as_i64)
            .is_some_and(|code| code < 0)
            && body.get("msg").is_some()
        {
            return Err(self.api_error(response.status_code, &body));
        }

        Ok(RestResponse {
            status_code: response.status_code,
            body,
            headers: response.headers,
        })
    }

    fn api_error(&self, status_code: u16, body: &Value) -> ExchangeError {
        let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = body
            .get("msg")
            .and_then(Value::as_str)
            .map_or_else(|| body_text(body), str::to_string);
        ExchangeError::ApiError {
            status_code,
            code,
            message,
            category: self.config.error_codes.classify(status_code, code),
        }
    }
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn missing_signer() -> ExchangeError {
    ExchangeError::SigningError("Authentication required but no credentials configured".to_string())
}

#[async_trait]
impl RestClient for RestExecutor {
    #[instrument(skip(self, request), fields(exchange = %self.config.exchange_name, method = %request.method, path = %request.path))]
    async fn execute(&self, request: RestRequest) -> Result<RestResponse, ExchangeError> {
        if (request.requires_signature || request.requires_api_key) && self.signer.is_none() {
            return Err(missing_signer());
        }

        match self.execute_with_retry(&request).await {
            Err(err)
                if err.category() == Some(ErrorCategory::Timestamp)
                    && self.config.time_endpoint.is_some() =>
            {
                warn!(error = %err, "timestamp rejected, resynchronizing clock");
                self.sync_time().await?;
                self.execute_with_retry(&request).await
            }
            result => result,
        }
    }

    #[instrument(skip(self), fields(exchange = %self.config.exchange_name))]
    async fn sync_time(&self) -> Result<i64, ExchangeError> {
        let path = self.config.time_endpoint.clone().ok_or_else(|| {
            ExchangeError::Other("No server time endpoint configured".to_string())
        })?;

        let sent_at = chrono::Utc::now().timestamp_millis();
        let response = self.execute_with_retry(&RestRequest::get(path)).await?;
        let received_at = chrono::Utc::now().timestamp_millis();

        let server_time = response
            .body
            .get("serverTime")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                ExchangeError::DeserializationError("serverTime missing from response".to_string())
            })?;

        let offset = server_time - (sent_at + received_at) / 2;
        self.clock_offset_ms.store(offset, Ordering::Relaxed);
        debug!(offset_ms = offset, "synchronized server time");
        Ok(offset)
    }

    fn rate_governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }
}
