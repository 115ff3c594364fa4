//! HTTP client for the Riigikogu open data API.

use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{ApiError, Member, Verbatim};

/// Riigikogu API client
#[derive(Debug, Clone)]
pub struct RiigikoguClient {
    http_client: reqwest::Client,
    base_url: String,
    verbatims_timeout: Duration,
}

impl RiigikoguClient {
    /// `timeout` applies to every request, `verbatims_timeout` to the
    /// transcript endpoint
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        verbatims_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ApiError::Http {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self {
            http_client,
            base_url,
            verbatims_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All plenary members
    pub async fn fetch_members(&self) -> Result<Vec<Member>, ApiError> {
        let url = format!("{}/api/plenary-members", self.base_url);
        let body = self.get_json(&url, &[], None).await?;

        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(decode_items(&url, items))
    }

    /// Plenary transcripts ("IS" type) dated within [start, end]
    pub async fn fetch_verbatims(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Verbatim>, ApiError> {
        let url = format!("{}/api/steno/verbatims", self.base_url);
        let query = [
            ("startDate", start.format("%Y-%m-%d").to_string()),
            ("endDate", end.format("%Y-%m-%d").to_string()),
            ("type", "IS".to_string()),
        ];
        let body = self.get_json(&url, &query, Some(self.verbatims_timeout)).await?;

        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut map) if map.contains_key("data") => match map.remove("data") {
                Some(Value::Array(items)) => items,
                other => {
                    warn!(url = %url, shape = ?other.map(|v| kind_of(&v)), "Unexpected verbatims data format");
                    Vec::new()
                }
            },
            other => {
                warn!(url = %url, shape = kind_of(&other), "Unexpected verbatims response format");
                Vec::new()
            }
        };
        Ok(decode_items(&url, items))
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<Value, ApiError> {
        debug!(url = %url, ?query, "Querying Riigikogu API");

        let mut request = self.http_client.get(url).query(query);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|source| ApiError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response.json::<Value>().await.map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Items that fail to decode are logged and skipped
fn decode_items<T: DeserializeOwned>(url: &str, items: Vec<Value>) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let uuid = item.get("uuid").and_then(Value::as_str).map(str::to_string);
            match serde_json::from_value(item) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(url = %url, index, uuid = ?uuid, error = %e, "Skipping malformed item");
                    None
                }
            }
        })
        .collect();

    if decoded.len() < total {
        warn!(url = %url, skipped = total - decoded.len(), total, "Some items could not be decoded");
    }
    decoded
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
