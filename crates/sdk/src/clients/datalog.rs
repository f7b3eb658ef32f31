//! Datalog query client with bounded exponential-backoff retry.
//!
//! Dispatch never retries a whole invocation; transient query failures are
//! absorbed here instead.

use serde_json::Value;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 4;
const BASE_BACKOFF_MS: u64 = 250;

#[derive(Debug, thiserror::Error)]
pub enum DatalogError {
    #[error("datalog request failed after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
    #[error("datalog api error: {0}")]
    Api(String),
    #[error("no api key available for workspace {0}")]
    MissingApiKey(String),
}

#[derive(Clone)]
pub struct DatalogClient {
    endpoint: String,
    workspace_id: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl DatalogClient {
    pub fn new(endpoint: impl Into<String>, workspace_id: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            workspace_id: workspace_id.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Run a datalog query. Request-level failures and 5xx responses are
    /// retried with exponential backoff up to [`MAX_ATTEMPTS`]; 4xx responses
    /// fail immediately.
    pub async fn query(&self, query: &str) -> Result<Value, DatalogError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DatalogError::MissingApiKey(self.workspace_id.clone()))?;
        let url = format!("{}/{}/query", self.endpoint.trim_end_matches('/'), self.workspace_id);

        let mut last_reason = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * (1 << (attempt - 1)));
                log::debug!(
                    "datalog retry {}/{} after {:?}: {}",
                    attempt,
                    MAX_ATTEMPTS - 1,
                    backoff,
                    last_reason
                );
                tokio::time::sleep(backoff).await;
            }
            let res = self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .header("content-type", "application/edn")
                .body(query.to_string())
                .send()
                .await;
            match res {
                Ok(res) if res.status().is_success() => {
                    return res
                        .json()
                        .await
                        .map_err(|e| DatalogError::Api(e.to_string()));
                }
                Ok(res) if res.status().is_server_error() => {
                    last_reason = format!("status {}", res.status());
                }
                Ok(res) => {
                    let status = res.status();
                    let body = res.text().await.unwrap_or_default();
                    return Err(DatalogError::Api(format!("{} {}", status, body)));
                }
                Err(e) => {
                    last_reason = e.to_string();
                }
            }
        }
        Err(DatalogError::Exhausted {
            attempts: MAX_ATTEMPTS,
            reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_fails_on_use() {
        let client = DatalogClient::new("https://dl.example", "T1", None);
        let err = client.query("[:find ?e :where [?e :db/id]]").await.unwrap_err();
        assert!(matches!(err, DatalogError::MissingApiKey(w) if w == "T1"));
    }
}
