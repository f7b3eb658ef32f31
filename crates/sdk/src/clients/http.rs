//! Plain HTTP client handed to handlers for outbound calls.

use serde::Serialize;
use serde_json::Value;

/// Thin wrapper so handlers share one connection pool per invocation.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn get_json(&self, url: &str) -> Result<Value, reqwest::Error> {
        self.client.get(url).send().await?.error_for_status()?.json().await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Value, reqwest::Error> {
        self.client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Escape hatch for handlers needing full request control.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}
