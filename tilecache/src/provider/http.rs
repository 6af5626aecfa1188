//! Tile download abstraction for testability

use std::time::Duration;

use tracing::debug;

use super::types::ProviderError;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Downloads tile payloads.
///
/// This abstraction allows the cache to be driven by a mock fetcher in
/// tests.
pub trait Fetcher: Send + Sync {
    /// Downloads the body at `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    ///
    /// # Returns
    ///
    /// The response body or an error. Non-success statuses and empty bodies
    /// are errors.
    fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Blocking fetcher using reqwest.
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    /// Creates a fetcher with the default timeout.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a fetcher with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("tilecache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Fetcher for ReqwestFetcher {
    fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ProviderError::Http(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .bytes()
            .map_err(|e| ProviderError::Http(format!("Failed to read response: {}", e)))?;
        if body.is_empty() {
            return Err(ProviderError::EmptyResponse(url.to_string()));
        }

        debug!(url, bytes = body.len(), "Downloaded tile");
        Ok(body.to_vec())
    }
}

impl<F: Fetcher + ?Sized> Fetcher for std::sync::Arc<F> {
    fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        (**self).download(url)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Mock fetcher returning a fixed response and recording requested URLs.
    pub struct MockFetcher {
        pub response: Result<Vec<u8>, ProviderError>,
        pub requests: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        pub fn ok(body: &[u8]) -> Self {
            Self {
                response: Ok(body.to_vec()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(error: ProviderError) -> Self {
            Self {
                response: Err(error),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Fetcher for MockFetcher {
        fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
            self.requests.lock().push(url.to_string());
            self.response.clone()
        }
    }

    #[test]
    fn test_mock_fetcher_success() {
        let mock = MockFetcher::ok(&[1, 2, 3, 4]);
        assert_eq!(mock.download("http://example.com").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mock.requests.lock().as_slice(), ["http://example.com"]);
    }

    #[test]
    fn test_mock_fetcher_error() {
        let mock = MockFetcher::failing(ProviderError::Http("Test error".to_string()));
        assert!(mock.download("http://example.com").is_err());
    }

    #[test]
    fn test_arc_fetcher_delegates() {
        let mock = std::sync::Arc::new(MockFetcher::ok(b"x"));
        let shared: std::sync::Arc<MockFetcher> = std::sync::Arc::clone(&mock);
        assert_eq!(shared.download("u").unwrap(), b"x");
        assert_eq!(mock.requests.lock().len(), 1);
    }

    #[test]
    fn test_reqwest_fetcher_builds() {
        assert!(ReqwestFetcher::with_timeout(5).is_ok());
    }
}
