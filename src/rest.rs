use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};

use crate::auth::BearerToken;
use crate::domain::{ReportId, WorkspaceId};
use crate::error::CatalogError;

/// Addressable resources under the workspace (group) collection root.
/// `Workspace` answers with a single object; the rest answer with a `value`
/// collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    Workspaces,
    Workspace(&'a WorkspaceId),
    Datasets(&'a WorkspaceId),
    Reports(&'a WorkspaceId),
    ReportPages(&'a WorkspaceId, &'a ReportId),
}

impl Resource<'_> {
    pub fn path(&self) -> String {
        match self {
            Resource::Workspaces => String::new(),
            Resource::Workspace(ws) => ws.to_string(),
            Resource::Datasets(ws) => format!("{ws}/datasets"),
            Resource::Reports(ws) => format!("{ws}/reports"),
            Resource::ReportPages(ws, report) => format!("{ws}/reports/{report}/pages"),
        }
    }
}

/// One REST response, shape-resolved at the adapter boundary. The API returns
/// either a single object (workspace info) or an enumerable `{ "value": [...] }`
/// wrapper (datasets, reports, pages); downstream code only ever sees this sum
/// type, never branches on the raw JSON shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiPayload {
    Single(Map<String, Value>),
    Collection(Vec<Value>),
}

impl ApiPayload {
    pub fn from_body(body: Value) -> Result<Self, CatalogError> {
        match body {
            Value::Object(mut map) => match map.remove("value") {
                Some(Value::Array(items)) => Ok(ApiPayload::Collection(items)),
                Some(other) => Err(CatalogError::ApiHttp(format!(
                    "unexpected `value` shape in response: {other}"
                ))),
                None => Ok(ApiPayload::Single(map)),
            },
            other => Err(CatalogError::ApiHttp(format!(
                "unexpected response shape: {other}"
            ))),
        }
    }

    /// Unify both shapes into a flat record list for unnesting.
    pub fn into_records(self) -> Vec<Value> {
        match self {
            ApiPayload::Single(map) => vec![Value::Object(map)],
            ApiPayload::Collection(items) => items,
        }
    }
}

pub trait PowerBiApi: Send + Sync {
    /// GET an endpoint relative to the workspace (group) collection root.
    /// The empty endpoint is the workspace enumeration itself.
    fn get(&self, token: &BearerToken, endpoint: &str) -> Result<ApiPayload, CatalogError>;
}

#[derive(Clone)]
pub struct PowerBiRestClient {
    client: Client,
    base_url: String,
}

impl PowerBiRestClient {
    pub fn new() -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pbi-catalog/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CatalogError::ApiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| CatalogError::ApiHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://api.powerbi.com/v1.0/myorg/groups".to_string(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, CatalogError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CatalogError::ApiHttp(err.to_string()));
                }
            }
        }
    }
}

impl PowerBiApi for PowerBiRestClient {
    fn get(&self, token: &BearerToken, endpoint: &str) -> Result<ApiPayload, CatalogError> {
        let url = if endpoint.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, endpoint)
        };

        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .bearer_auth(token.as_str())
                .header("Content-Type", "application/json")
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Power BI API request failed".to_string());
            return Err(CatalogError::ApiStatus {
                status,
                endpoint: endpoint.to_string(),
                message,
            });
        }

        let body: Value = response
            .json()
            .map_err(|err| CatalogError::ApiHttp(err.to_string()))?;
        ApiPayload::from_body(body)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
