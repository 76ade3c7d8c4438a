/// Azure credential resolution and request authorization
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::environment::{Environment, DEFAULT_ENVIRONMENT};

const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// Tokens are refreshed this long before they actually expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Errors raised while resolving credentials or authorizing requests
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("subscriptionID is not set in cluster or AZURE_SUBSCRIPTION_ID env var")]
    MissingSubscriptionId,

    #[error("required setting {0} is not set")]
    MissingSetting(&'static str),

    #[error("unknown Azure environment {0:?}")]
    UnknownEnvironment(String),

    #[error("invalid endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    TokenRequest {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("token response is malformed: {0}")]
    MalformedToken(String),

    #[error("deadline exceeded while resolving credentials")]
    DeadlineExceeded,
}

/// Capability that signs outgoing Azure requests
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Attach authorization to a request
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, AuthError>;
}

/// Credentials and endpoints for one subscription, immutable once resolved
#[derive(Clone)]
pub struct CredentialBundle {
    pub subscription_id: String,
    pub authorizer: Arc<dyn Authorizer>,
    pub resource_manager_endpoint: String,
    pub resource_manager_vm_dns_suffix: String,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("subscription_id", &self.subscription_id)
            .field("resource_manager_endpoint", &self.resource_manager_endpoint)
            .field(
                "resource_manager_vm_dns_suffix",
                &self.resource_manager_vm_dns_suffix,
            )
            .finish_non_exhaustive()
    }
}

/// Resolves credentials for a subscription
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, subscription_id: &str) -> Result<CredentialBundle, AuthError>;
}

/// Resolves credentials from `AZURE_*` settings
///
/// A service principal is used when `AZURE_CLIENT_SECRET` is present,
/// otherwise the VM's managed identity is used.
pub struct EnvironmentCredentialResolver {
    vars: HashMap<String, String>,
    http: Client,
}

impl EnvironmentCredentialResolver {
    /// Build from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::vars()
                .filter(|(key, _)| key.starts_with("AZURE_"))
                .collect(),
        )
    }

    /// Build from an explicit set of settings
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self {
            vars,
            http: Client::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<String, AuthError> {
        self.get(key)
            .map(str::to_string)
            .ok_or(AuthError::MissingSetting(key))
    }

    fn token_source(&self, environment: &Environment) -> Result<TokenSource, AuthError> {
        if let Some(secret) = self.get("AZURE_CLIENT_SECRET") {
            let tenant_id = self.require("AZURE_TENANT_ID")?;
            let token_url = Url::parse(environment.active_directory_endpoint)?
                .join(&format!("{}/oauth2/token", tenant_id))?;
            return Ok(TokenSource::ClientSecret {
                token_url,
                client_id: self.require("AZURE_CLIENT_ID")?,
                client_secret: secret.to_string(),
            });
        }

        Ok(TokenSource::ManagedIdentity {
            client_id: self.get("AZURE_CLIENT_ID").map(str::to_string),
        })
    }
}

#[async_trait]
impl CredentialResolver for EnvironmentCredentialResolver {
    async fn resolve(&self, subscription_id: &str) -> Result<CredentialBundle, AuthError> {
        let subscription_id = if subscription_id.is_empty() {
            self.get("AZURE_SUBSCRIPTION_ID")
                .ok_or(AuthError::MissingSubscriptionId)?
                .to_string()
        } else {
            subscription_id.to_string()
        };

        let environment =
            Environment::from_name(self.get("AZURE_ENVIRONMENT").unwrap_or(DEFAULT_ENVIRONMENT))?;
        let source = self.token_source(&environment)?;
        debug!(
            "Resolved {} credentials for subscription {} in {}",
            source.kind(),
            subscription_id,
            environment.name
        );

        let authorizer = TokenAuthorizer::new(
            self.http.clone(),
            source,
            environment.resource_manager_endpoint.to_string(),
        );

        Ok(CredentialBundle {
            subscription_id,
            authorizer: Arc::new(authorizer),
            resource_manager_endpoint: environment.resource_manager_endpoint.to_string(),
            resource_manager_vm_dns_suffix: environment.resource_manager_vm_dns_suffix.to_string(),
        })
    }
}

/// Where bearer tokens come from
#[derive(Debug, Clone)]
enum TokenSource {
    ClientSecret {
        token_url: Url,
        client_id: String,
        client_secret: String,
    },
    ManagedIdentity {
        client_id: Option<String>,
    },
}

impl TokenSource {
    fn kind(&self) -> &'static str {
        match self {
            TokenSource::ClientSecret { .. } => "service principal",
            TokenSource::ManagedIdentity { .. } => "managed identity",
        }
    }
}

/// Cached bearer token
#[derive(Debug, Clone)]
struct BearerToken {
    access_token: String,
    refresh_at: DateTime<Utc>,
}

impl BearerToken {
    /// Refresh ahead of expiry, by at most half the token's lifetime
    fn new(access_token: String, now: DateTime<Utc>, lifetime: i64) -> Self {
        let margin = TOKEN_REFRESH_MARGIN_SECS.min(lifetime.max(0) / 2);
        Self {
            access_token,
            refresh_at: now + Duration::seconds(lifetime - margin),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }
}

/// AAD returns numbers as strings on some endpoints
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: serde_json::Value,
}

impl TokenResponse {
    fn into_token(self, now: DateTime<Utc>) -> Result<BearerToken, AuthError> {
        let expires_in = match &self.expires_in {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| AuthError::MalformedToken(format!("expires_in = {}", self.expires_in)))?;

        Ok(BearerToken::new(self.access_token, now, expires_in))
    }
}

/// Authorizer that fetches OAuth2 tokens lazily and caches them until expiry
pub struct TokenAuthorizer {
    http: Client,
    source: TokenSource,
    resource: String,
    cached: Mutex<Option<BearerToken>>,
}

impl TokenAuthorizer {
    fn new(http: Client, source: TokenSource, resource: String) -> Self {
        Self {
            http,
            source,
            resource,
            cached: Mutex::new(None),
        }
    }

    async fn fetch_token(&self) -> Result<BearerToken, AuthError> {
        let request = match &self.source {
            TokenSource::ClientSecret {
                token_url,
                client_id,
                client_secret,
            } => self.http.post(token_url.clone()).form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("resource", self.resource.as_str()),
            ]),
            TokenSource::ManagedIdentity { client_id } => {
                let mut query = vec![
                    ("api-version", IMDS_API_VERSION),
                    ("resource", self.resource.as_str()),
                ];
                if let Some(id) = client_id {
                    query.push(("client_id", id.as_str()));
                }
                self.http
                    .get(IMDS_TOKEN_ENDPOINT)
                    .header("Metadata", "true")
                    .query(&query)
            }
        };

        debug!("Requesting {} token", self.source.kind());
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenRequest { status, body });
        }

        response.json::<TokenResponse>().await?.into_token(Utc::now())
    }
}

#[async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, AuthError> {
        let mut cached = self.cached.lock().await;
        let token = match cached.as_ref() {
            Some(token) if token.is_fresh(Utc::now()) => token.clone(),
            _ => {
                let token = self.fetch_token().await?;
                *cached = Some(token.clone());
                token
            }
        };

        Ok(request.header(
            header::AUTHORIZATION,
            format!("Bearer {}", token.access_token),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_resolve_uses_cluster_subscription() {
        let resolver = EnvironmentCredentialResolver::from_vars(vars(&[(
            "AZURE_SUBSCRIPTION_ID",
            "from-env",
        )]));

        let bundle = resolver.resolve("from-cluster").await.unwrap();
        assert_eq!(bundle.subscription_id, "from-cluster");
        assert_eq!(bundle.resource_manager_endpoint, "https://management.azure.com/");
        assert_eq!(bundle.resource_manager_vm_dns_suffix, "cloudapp.azure.com");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_env_subscription() {
        let resolver = EnvironmentCredentialResolver::from_vars(vars(&[
            ("AZURE_SUBSCRIPTION_ID", "from-env"),
            ("AZURE_ENVIRONMENT", "AzureUSGovernmentCloud"),
        ]));

        let bundle = resolver.resolve("").await.unwrap();
        assert_eq!(bundle.subscription_id, "from-env");
        assert_eq!(bundle.resource_manager_vm_dns_suffix, "cloudapp.usgovcloudapi.net");
    }

    #[tokio::test]
    async fn test_resolve_without_subscription_fails() {
        let resolver = EnvironmentCredentialResolver::from_vars(HashMap::new());
        let result = resolver.resolve("").await;
        assert!(matches!(result, Err(AuthError::MissingSubscriptionId)));
    }

    #[tokio::test]
    async fn test_client_secret_requires_tenant() {
        let resolver = EnvironmentCredentialResolver::from_vars(vars(&[
            ("AZURE_CLIENT_ID", "id"),
            ("AZURE_CLIENT_SECRET", "secret"),
        ]));
        let result = resolver.resolve("sub").await;
        assert!(matches!(
            result,
            Err(AuthError::MissingSetting("AZURE_TENANT_ID"))
        ));
    }

    #[test]
    fn test_client_secret_token_url() {
        let resolver = EnvironmentCredentialResolver::from_vars(vars(&[
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_CLIENT_ID", "id"),
            ("AZURE_CLIENT_SECRET", "secret"),
        ]));
        match resolver.token_source(&Environment::default()).unwrap() {
            TokenSource::ClientSecret { token_url, .. } => assert_eq!(
                token_url.as_str(),
                "https://login.microsoftonline.com/tenant/oauth2/token"
            ),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_token_response_accepts_string_expiry() {
        let now = Utc::now();
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":"3600"}"#).unwrap();
        let token = response.into_token(now).unwrap();
        assert_eq!(token.refresh_at, now + Duration::seconds(3300));
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + Duration::seconds(3400)));
    }

    #[test]
    fn test_short_lived_token_is_reused() {
        let now = Utc::now();
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":60}"#).unwrap();
        let token = response.into_token(now).unwrap();
        assert!(token.is_fresh(now));
        assert!(token.is_fresh(now + Duration::seconds(29)));
        assert!(!token.is_fresh(now + Duration::seconds(30)));

        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":0}"#).unwrap();
        assert!(!response.into_token(now).unwrap().is_fresh(now));
    }

    #[test]
    fn test_token_response_rejects_bad_expiry() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":null}"#).unwrap();
        assert!(response.into_token(Utc::now()).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a managed identity
    async fn test_managed_identity_token() {
        let resolver = EnvironmentCredentialResolver::from_env();
        let bundle = resolver.resolve("").await.unwrap();
        let request = reqwest::Client::new().get(&bundle.resource_manager_endpoint);
        assert!(bundle.authorizer.authorize(request).await.is_ok());
    }
}
