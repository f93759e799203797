use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::Credentials;
use crate::error::CatalogError;

/// Token audiences the extractor can request. `BiPlatform` drives every REST
/// and XMLA call; `FileStore` is the Graph-side audience callers need when
/// wiring an upload step behind the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    BiPlatform,
    FileStore,
}

impl Audience {
    fn scope(&self) -> &'static str {
        match self {
            Audience::BiPlatform => "https://analysis.windows.net/powerbi/api/.default",
            Audience::FileStore => "https://graph.microsoft.com/.default",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub trait TokenProvider: Send + Sync {
    fn get_token(&self, audience: Audience) -> Result<BearerToken, CatalogError>;
}

/// Client-credentials flow against the AAD v2 token endpoint.
#[derive(Clone)]
pub struct AadTokenProvider {
    client: Client,
    credentials: Credentials,
}

impl AadTokenProvider {
    pub fn new(credentials: Credentials) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| CatalogError::AuthHttp(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    fn token_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.credentials.tenant_id
        )
    }
}

impl TokenProvider for AadTokenProvider {
    fn get_token(&self, audience: Audience) -> Result<BearerToken, CatalogError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", audience.scope()),
        ];

        let response = self
            .client
            .post(self.token_url())
            .form(&params)
            .send()
            .map_err(|err| CatalogError::AuthHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "token request failed".to_string());
            return Err(CatalogError::AuthStatus { status, message });
        }

        let body: Value = response
            .json()
            .map_err(|err| CatalogError::AuthHttp(err.to_string()))?;
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                CatalogError::AuthHttp("token response missing access_token".to_string())
            })?;

        Ok(BearerToken::new(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_scopes() {
        assert_eq!(
            Audience::BiPlatform.scope(),
            "https://analysis.windows.net/powerbi/api/.default"
        );
        assert_eq!(
            Audience::FileStore.scope(),
            "https://graph.microsoft.com/.default"
        );
    }
}
