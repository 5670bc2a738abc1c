//! HTTP REST client for the exchange snapshot endpoint.
//!
//! Only public market data is needed, so requests are unsigned.
//!
//! # Example
//!
//! ```rust,no_run
//! use depth_recorder::client::RestClient;
//! use depth_recorder::Config;
//!
//! # async fn example() -> depth_recorder::Result<()> {
//! let config = Config::new(["BTCUSDT"]);
//! let rest = RestClient::new(&config)?;
//!
//! let snapshot = rest.depth("BTCUSDT", 1000).await?;
//! println!("lastUpdateId {}", snapshot.last_update_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::client::SnapshotProvider;
use crate::config::Config;
use crate::error::{ApiError, Error};
use crate::types::BookSnapshot;

/// Error body returned by the exchange, e.g. `{"code":-1121,"msg":"Invalid symbol."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    msg: Option<String>,
}

/// HTTP client for the exchange REST API
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: Url,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_base_url(config.rest_base_url(), config)
    }

    /// Create a client against a custom base URL (proxies, mocks)
    pub fn with_base_url(base_url: &str, config: &Config) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid REST base URL '{base_url}': {e}")))?;
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request to the API
    ///
    /// # Arguments
    ///
    /// * `path` - API path (without base URL)
    /// * `query` - Query string pairs
    pub async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoint(path, query)?;
        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    /// Fetch a depth snapshot via `GET /api/v3/depth`
    pub async fn depth(&self, symbol: &str, limit: u32) -> Result<BookSnapshot, Error> {
        let symbol = symbol.to_ascii_uppercase();
        debug!(symbol = %symbol, limit, "Fetching depth snapshot");
        self.get(
            "/api/v3/depth",
            &[("symbol", symbol), ("limit", limit.to_string())],
        )
        .await
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, Error> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid API path '{path}': {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response<T>(&self, response: reqwest::Response) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();

        // 429 is a rate limit warning, 418 an IP ban after ignoring it
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);

            return Err(Error::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(Error::from)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}

#[async_trait]
impl SnapshotProvider for RestClient {
    async fn fetch(&self, symbol: &str, depth_limit: u32) -> Result<BookSnapshot, Error> {
        self.depth(symbol, depth_limit).await
    }
}

fn api_error(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            code: Some(code),
            msg,
        }) => Error::Api(ApiError::with_code(
            status.as_u16(),
            code,
            msg.unwrap_or_else(|| body.to_string()),
        )),
        Ok(ErrorBody { code: None, msg: Some(msg) }) => {
            Error::Api(ApiError::new(status.as_u16(), msg))
        }
        _ => Error::Api(ApiError::new(status.as_u16(), body)),
    }
}
