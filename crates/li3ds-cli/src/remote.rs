//! HTTP backend for the li3ds metadata API
//!
//! Collections live at `{api_url}/{path}s/` and items at
//! `{api_url}/{path}s/{id}/`. Successful answers are JSON arrays.

use anyhow::{Context, Result};
use li3ds_core::attrs::display_value;
use li3ds_core::store::matches_key;
use li3ds_core::{Attributes, Backend, ResourcePath, StoreError};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::ApiConfig;

const API_KEY_HEADER: &str = "x-api-key";

pub struct RemoteBackend {
    client: Client,
    api_url: String,
}

impl RemoteBackend {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let url = api.url.as_deref().context("no api url configured")?;
        let key = api.key.as_deref().context("no api key provided")?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(key).context("api key is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .default_headers(headers);
        if api.no_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build().context("building HTTP client")?,
            api_url: url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_url, endpoint)
    }

    fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Response, StoreError> {
        let url = self.url(endpoint);
        debug!(url = %url, ?query, "GET");
        self.client
            .get(&url)
            .query(query)
            .send()
            .map_err(transport_error)
    }
}

/// Query pairs for a natural-key filter; arrays repeat their field
fn key_query(key: &Attributes) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (field, value) in key {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (field.clone(), display_value(item))));
            }
            other => pairs.push((field.clone(), display_value(other))),
        }
    }
    pairs
}

/// Connection failures and timeouts are worth retrying, the rest is not
fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

fn records(response: Response) -> Result<Vec<Attributes>, StoreError> {
    response
        .json::<Vec<Attributes>>()
        .map_err(|e| StoreError::Backend(format!("invalid response body: {e}")))
}

fn first_record(response: Response) -> Result<Attributes, StoreError> {
    records(response)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Backend("empty response body".to_string()))
}

impl Backend for RemoteBackend {
    fn create(
        &mut self,
        path: &ResourcePath,
        attrs: &Attributes,
    ) -> Result<Option<Attributes>, StoreError> {
        let url = self.url(&path.collection());
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(&url)
            .json(attrs)
            .send()
            .map_err(transport_error)?;
        match response.status() {
            StatusCode::CREATED => first_record(response).map(Some),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Ok(None),
            status => Err(StoreError::Backend(format!(
                "adding {path} failed (status code: {status})"
            ))),
        }
    }

    fn fetch_by_id(
        &mut self,
        path: &ResourcePath,
        id: i64,
    ) -> Result<Option<Attributes>, StoreError> {
        let response = self.get(&path.item(id), &[])?;
        match response.status() {
            StatusCode::OK => first_record(response).map(Some),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StoreError::Backend(format!(
                "getting {path} {id} failed (status code: {status})"
            ))),
        }
    }

    fn fetch_by_key(
        &mut self,
        path: &ResourcePath,
        key: &Attributes,
    ) -> Result<Option<Attributes>, StoreError> {
        let response = self.get(&path.collection(), &key_query(key))?;
        let candidates = match response.status() {
            StatusCode::OK => records(response)?,
            StatusCode::NOT_FOUND => return Ok(None),
            status => {
                return Err(StoreError::Backend(format!(
                    "searching {path} failed (status code: {status})"
                )))
            }
        };
        // servers may ignore unknown filters
        Ok(candidates.into_iter().find(|record| matches_key(record, key)))
    }

    fn list(&mut self, path: &ResourcePath) -> Result<Vec<Attributes>, StoreError> {
        let response = self.get(&path.collection(), &[])?;
        match response.status() {
            StatusCode::OK => records(response),
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => Err(StoreError::Backend(format!(
                "listing {path} failed (status code: {status})"
            ))),
        }
    }
}
