//! Resource-provider credential resolution via GraphQL.

use serde_json::{json, Value};

use super::graphql::{GraphQlClient, GraphQlError};

/// A resolved provider credential (e.g. a GitHub installation token).
#[derive(Debug, Clone)]
pub struct Credential {
    pub provider_id: String,
    pub secret: String,
    pub scopes: Vec<String>,
}

const CREDENTIAL_QUERY: &str = r#"
query providerCredential($id: ID!) {
  resourceProvider(id: $id) {
    id
    credential {
      secret
      scopes
    }
  }
}
"#;

/// Resolves credentials for the resource providers named in the active
/// configuration. Bound to the invocation's workspace and api key.
#[derive(Clone)]
pub struct CredentialResolver {
    graphql: GraphQlClient,
}

impl CredentialResolver {
    pub fn new(graphql: GraphQlClient) -> Self {
        Self { graphql }
    }

    pub async fn resolve(&self, provider_id: &str) -> Result<Credential, GraphQlError> {
        let data = self
            .graphql
            .query(CREDENTIAL_QUERY, json!({ "id": provider_id }))
            .await?;
        let credential = data
            .get("resourceProvider")
            .and_then(|p| p.get("credential"))
            .ok_or_else(|| {
                GraphQlError::Api(format!("no credential for provider {}", provider_id))
            })?;
        let secret = credential
            .get("secret")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GraphQlError::Api(format!("credential for {} has no secret", provider_id))
            })?
            .to_string();
        let scopes = credential
            .get("scopes")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Credential {
            provider_id: provider_id.to_string(),
            secret,
            scopes,
        })
    }
}
