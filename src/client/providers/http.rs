//! Shared HTTP plumbing for provider clients.
//!
//! Every provider owns one [`ProviderHttp`]: a `reqwest::Client` plus the
//! provider's process-wide rate limiter and its bounded retry policy.
//! Status mapping follows the retryable/fatal split: 5xx, 429, and timeouts
//! retry with jittered exponential backoff; other 4xx fail the call.

use super::traits::ProviderError;
use crate::client::rate_limiter::RateLimiter;
use crate::client::{build_http_client, HttpClientConfig};
use crate::config::ProviderSettings;
use crate::resilience::{backoff_delay, RetryConfig};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ProviderHttp {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    name: &'static str,
}

impl ProviderHttp {
    pub fn new(
        name: &'static str,
        settings: &ProviderSettings,
        rate_per_sec: f64,
    ) -> Result<Self, ProviderError> {
        let client = build_http_client(&HttpClientConfig::from_settings(settings))
            .map_err(|e| ProviderError::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::new(rate_per_sec)),
            retry: RetryConfig::for_provider(settings.max_retries),
            name,
        })
    }

    /// GET a URL and return the response body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, ProviderError> {
        let response = self.get(url, &[]).await?;
        response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("failed to read response: {e}")))
    }

    /// GET a URL and deserialize the JSON body.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ProviderError> {
        let response = self.get(url, &[]).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Parse(format!("invalid JSON: {e}")))
    }

    /// GET with extra headers, retrying transient failures.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, ProviderError> {
        let mut attempt = 1u32;
        loop {
            self.limiter.acquire().await;

            let result = self.issue(url, headers).await;
            match result {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.retry.max_attempts {
                        if attempt > 1 {
                            warn!(
                                provider = self.name,
                                attempts = attempt,
                                %error,
                                "request failed after retries"
                            );
                        }
                        return Err(error);
                    }
                    let delay = backoff_delay(attempt - 1, &self.retry, None);
                    debug!(
                        provider = self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn issue(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, ProviderError> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else if e.is_connect() {
                ProviderError::Network(format!("connection failed: {e}"))
            } else {
                ProviderError::Network(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(
                status.as_u16(),
                format!("{} returned {status}", self.name),
            ));
        }
        Ok(response)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http(settings: &ProviderSettings) -> ProviderHttp {
        ProviderHttp::new("test", settings, 100.0).unwrap()
    }

    #[tokio::test]
    async fn retries_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let mut settings = ProviderSettings::default();
        settings.max_retries = 3;
        let body = http(&settings)
            .get_text(&format!("{}/flaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn does_not_retry_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let settings = ProviderSettings::default();
        let error = http(&settings)
            .get_text(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(!error.is_retryable());
    }
}
