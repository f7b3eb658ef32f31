//! Workspace-scoped GraphQL client.
//!
//! Construction is side-effect free; the API key is checked on use, so a
//! payload without an api-key secret still yields a working context.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum GraphQlError {
    #[error("graphql request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("graphql api error: {0}")]
    Api(String),
    #[error("no api key available for workspace {0}")]
    MissingApiKey(String),
}

/// Client bound to one workspace and one invocation's credentials.
#[derive(Clone)]
pub struct GraphQlClient {
    endpoint: String,
    workspace_id: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

impl GraphQlClient {
    pub fn new(endpoint: impl Into<String>, workspace_id: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            workspace_id: workspace_id.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// POST a query; returns the `data` field. GraphQL-level errors become
    /// `GraphQlError::Api` with the joined error messages.
    pub async fn query(&self, query: &str, variables: Value) -> Result<Value, GraphQlError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GraphQlError::MissingApiKey(self.workspace_id.clone()))?;
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), self.workspace_id);
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&GraphQlRequest {
                query,
                variables: &variables,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GraphQlError::Api(format!("{} {}", status, body)));
        }
        let body: Value = res.json().await?;
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let joined = errors
                    .iter()
                    .map(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string()
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(GraphQlError::Api(joined));
            }
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Mutations share the query transport.
    pub async fn mutate(&self, mutation: &str, variables: Value) -> Result<Value, GraphQlError> {
        self.query(mutation, variables).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_fails_on_use_not_construction() {
        let client = GraphQlClient::new("https://gql.example", "T1", None);
        let err = client.query("{ me }", Value::Null).await.unwrap_err();
        assert!(matches!(err, GraphQlError::MissingApiKey(w) if w == "T1"));
    }
}
