use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Header carrying the API key on keyed and signed requests.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Result type for signing operations: (headers, `query_params`)
///
/// The returned params are the ones the signer adds (`timestamp`, `signature`)
/// and must be appended after the caller's own params, in order.
pub type SignatureResult = Result<(HashMap<String, String>, Vec<(String, String)>), ExchangeError>;

/// Signer trait for request authentication
pub trait Signer: Send + Sync {
    /// Sign a request and return headers and query parameters
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `endpoint` - API endpoint path
    /// * `query_string` - Canonical query string (without leading '?')
    /// * `body` - Raw request body bytes
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;

    /// Headers for requests that need the API key but no signature.
    fn api_key_headers(&self) -> HashMap<String, String>;
}

/// HMAC-SHA256 signer producing hex signatures over `query[&body]&timestamp=..`.
pub struct HmacSigner {
    api_key: Secret<String>,
    secret_key: Zeroizing<Vec<u8>>,
}

impl HmacSigner {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            secret_key: Zeroizing::new(secret_key.into().into_bytes()),
        }
    }

    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self::new(credentials.api_key(), credentials.secret_key())
    }

    /// Hex HMAC-SHA256 of `payload` under the secret key.
    pub fn signature(&self, payload: &str) -> Result<String, ExchangeError> {
        if self.secret_key.is_empty() {
            return Err(ExchangeError::SigningError(
                "secret key is empty".to_string(),
            ));
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret_key)
            .map_err(|e| ExchangeError::SigningError(format!("Invalid secret key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn sign_request(
        &self,
        _method: &str,
        _endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        if self.api_key.expose_secret().is_empty() {
            return Err(ExchangeError::SigningError("API key is empty".to_string()));
        }

        let mut payload = String::from(query_string);
        if !body.is_empty() {
            let body_str = std::str::from_utf8(body).map_err(|e| {
                ExchangeError::SigningError(format!("Request body is not UTF-8: {}", e))
            })?;
            if !payload.is_empty() && !body_str.is_empty() {
                payload.push('&');
            }
            payload.push_str(body_str);
        }
        let timestamp_param = format!("timestamp={}", timestamp);
        if payload.is_empty() {
            payload = timestamp_param;
        } else {
            payload = format!("{}&{}", payload, timestamp_param);
        }

        let signature = self.signature(&payload)?;

        Ok((
            self.api_key_headers(),
            vec![
                ("timestamp".to_string(), timestamp.to_string()),
                ("signature".to_string(), signature),
            ],
        ))
    }

    fn api_key_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            API_KEY_HEADER.to_string(),
            self.api_key.expose_secret().clone(),
        );
        headers
    }
}
