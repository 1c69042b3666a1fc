use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Thin reqwest wrapper for gateway reads. One attempt per call.
///
/// Timeouts and transport failures surface as `RemoteUnavailable`; bodies that
/// are not valid JSON surface as `MalformedResponse`.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PaymentError::RemoteUnavailable {
                message: format!("failed to initialize HTTP client: {}", e),
                status: None,
            }
        })?;

        Ok(Self { client, timeout })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
    ) -> PaymentResult<T> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| PaymentError::RemoteUnavailable {
            message: if e.is_timeout() {
                format!("gateway request timed out after {:?}", self.timeout)
            } else {
                format!("gateway request failed: {}", e)
            },
            status: None,
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| PaymentError::RemoteUnavailable {
            message: format!("failed to read gateway response: {}", e),
            status: Some(status.as_u16()),
        })?;
        if !status.is_success() {
            return Err(PaymentError::RemoteUnavailable {
                message: format!("HTTP {}: {}", status, text),
                status: Some(status.as_u16()),
            });
        }

        serde_json::from_str::<T>(&text)
            .map_err(|e| PaymentError::malformed(format!("invalid gateway JSON response: {}", e)))
    }
}
