//! Store API client.
//!
//! One GET per resource collection, plus the single write the list pages
//! make: asking the server to approve or reject a pending return.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::pages::returns::ReturnStatus;
use crate::records::Record;
use crate::settings::Settings;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Sales,
    Returns,
    Grns,
    Suppliers,
    Inventory,
    Batches,
    Invoices,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Self::Sales => "/api/sales",
            Self::Returns => "/api/returns",
            Self::Grns => "/api/grns",
            Self::Suppliers => "/api/suppliers",
            Self::Inventory => "/api/inventory",
            Self::Batches => "/api/batches",
            Self::Invoices => "/api/invoices",
        }
    }

    /// Collection key some endpoints wrap their array in, also used as the
    /// export file prefix.
    pub fn key(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Returns => "returns",
            Self::Grns => "grns",
            Self::Suppliers => "suppliers",
            Self::Inventory => "inventory",
            Self::Batches => "batches",
            Self::Invoices => "invoices",
        }
    }
}

// ---------------------------------------------------------------------------
// URL and query helpers
// ---------------------------------------------------------------------------

/// Adds a scheme when missing (http for localhost, https otherwise) and
/// strips trailing slashes and a trailing `/api`.
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        let scheme = if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            "http"
        } else {
            "https"
        };
        url = format!("{scheme}://{url}");
    }
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    trimmed.trim_end_matches('/').to_string()
}

fn enc(s: &str) -> String {
    s.replace('%', "%25")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace(' ', "%20")
        .replace('+', "%2B")
        .replace('?', "%3F")
        .replace('#', "%23")
}

/// Escapes everything outside the RFC 3986 unreserved set, byte by byte.
fn path_segment(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

fn return_status_path(return_id: &str) -> String {
    format!("{}/{}/status", Resource::Returns.path(), path_segment(return_id))
}

/// Appends `params` as a query string, skipping nulls and empty strings.
pub fn build_query(path: &str, params: &Map<String, Value>) -> String {
    let pairs: Vec<String> = params
        .iter()
        .filter_map(|(k, v)| {
            let text = match v {
                Value::Null => return None,
                Value::String(s) => s.trim().to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            (!text.is_empty()).then(|| format!("{}={}", enc(k), enc(&text)))
        })
        .collect();
    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", pairs.join("&"))
    }
}

/// Pulls the record array out of the response envelopes the API uses:
/// a bare array, `{data: [...]}`, `{items: [...]}`, `{<resource>: [...]}` or
/// `{data: {items: [...]}}`. Anything else is an empty collection.
pub fn extract_records(body: Value, resource: Resource) -> Vec<Record> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["data", "items", resource.key()] {
                match map.remove(key) {
                    Some(Value::Array(items)) => return items,
                    Some(Value::Object(mut inner)) if key == "data" => {
                        if let Some(Value::Array(items)) = inner
                            .remove("items")
                            .or_else(|| inner.remove(resource.key()))
                        {
                            return items;
                        }
                    }
                    _ => {}
                }
            }
            warn!(resource = resource.key(), "Response carried no record array");
            Vec::new()
        }
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "The server rejected the request".to_string(),
        401 => "Session expired, please sign in again".to_string(),
        403 => "You do not have permission for this action".to_string(),
        404 => "Requested resource was not found".to_string(),
        409 => "The record was changed by someone else".to_string(),
        s if s >= 500 => "Store server error".to_string(),
        _ => "Unexpected response from the store server".to_string(),
    }
}

/// Prefers the server's own `error`/`message`, then appends `details`.
fn http_error(status: StatusCode, body_text: &str) -> EngineError {
    let body_text = body_text.trim();
    let message = match serde_json::from_str::<Value>(body_text) {
        Ok(json) => {
            let message = json
                .get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status_message(status));
            match json.get("details").or_else(|| json.get("errors")) {
                Some(details) => format!("{message}: {details}"),
                None => message,
            }
        }
        Err(_) if !body_text.is_empty() => format!("{}: {body_text}", status_message(status)),
        Err(_) => status_message(status),
    };
    EngineError::Http {
        status: status.as_u16(),
        message,
    }
}

fn transport_error(base: &str, err: &reqwest::Error) -> EngineError {
    let message = if err.is_connect() {
        format!("Cannot reach store server at {base}")
    } else if err.is_timeout() {
        format!("Connection to {base} timed out")
    } else if err.is_builder() {
        format!("Invalid store server URL: {base}")
    } else {
        format!("Network error communicating with {base}: {err}")
    };
    EngineError::Transport(message)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            token: token.filter(|t| !t.trim().is_empty()),
            http,
        })
    }

    pub fn from_settings(settings: &Settings, token: Option<String>) -> Result<Self> {
        let timeout = match settings.request_timeout_secs {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        Self::new(&settings.api_base_url, token, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;

        if !status.is_success() {
            warn!(%method, path, status = status.as_u16(), "Store API request failed");
            return Err(http_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body_text)?)
    }

    /// GETs one resource collection and unwraps its envelope.
    pub async fn fetch_records(
        &self,
        resource: Resource,
        params: &Map<String, Value>,
    ) -> Result<Vec<Record>> {
        let path = build_query(resource.path(), params);
        let body = self.send(Method::GET, &path, None).await?;
        let records = extract_records(body, resource);
        debug!(resource = resource.key(), count = records.len(), "Fetched records");
        Ok(records)
    }

    /// Asks the server to move a return out of Pending. Transitions the
    /// server would refuse fail here without a request being made.
    pub async fn request_return_transition(
        &self,
        return_id: &str,
        from: ReturnStatus,
        to: ReturnStatus,
        note: Option<&str>,
    ) -> Result<Value> {
        if !from.can_transition_to(to) {
            warn!(return_id, %from, %to, "Skipped invalid return transition");
            return Err(EngineError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let path = return_status_path(return_id);
        let mut body = json!({ "status": to.as_str() });
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            body["note"] = Value::from(note);
        }
        let updated = self.send(Method::PATCH, &path, Some(body)).await?;
        info!(return_id, %from, %to, "Return status updated");
        Ok(updated)
    }
}
