//! Typed HTTP client for the upstream model server
//!
//! All calls follow the upstream conventions: the model is addressed by a
//! `modeluri` query parameter, payloads ride in a `{"data": ...}` wrapper,
//! and the exchange format is the versioned JSON variant.

use crate::config::UpstreamConfig;
use modelgate_core::{GateError, ModelUri, Result};
use reqwest::Method;
use serde_json::{json, Value};
use url::Url;

/// Exchange format requested from upstream
const FORMAT: &str = "json-v2";

/// Client for issuing HTTP calls and deriving WebSocket URLs against the
/// upstream model server
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    config: UpstreamConfig,
    http: reqwest::Client,
}

impl UpstreamClient {
    /// Build a client for the given endpoint
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GateError::network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    /// Endpoint configuration this client talks to
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// The raw HTTP client, for callers that forward requests verbatim
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Target URL for forwarding a request path (with query) unchanged
    pub fn forward_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.config.http_origin(), path_and_query)
    }

    /// WebSocket URL for bridging a request path (with query) unchanged
    pub fn bridge_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.config.ws_origin(), path_and_query)
    }

    /// GET an API resource
    pub async fn get(&self, path: &str, modeluri: Option<&ModelUri>) -> Result<Value> {
        self.request(Method::GET, path, modeluri, None).await
    }

    /// POST a JSON body to an API resource
    pub async fn post(
        &self,
        path: &str,
        modeluri: Option<&ModelUri>,
        body: Value,
    ) -> Result<Value> {
        self.request(Method::POST, path, modeluri, Some(body)).await
    }

    /// PUT a JSON body to an API resource
    pub async fn put(&self, path: &str, modeluri: Option<&ModelUri>, body: Value) -> Result<Value> {
        self.request(Method::PUT, path, modeluri, Some(body)).await
    }

    /// DELETE an API resource
    pub async fn delete(&self, path: &str, modeluri: Option<&ModelUri>) -> Result<Value> {
        self.request(Method::DELETE, path, modeluri, None).await
    }

    /// Open a transaction on the given model.
    ///
    /// Returns the transaction endpoint URI handed out by upstream. The URI
    /// may come back in `http` or `ws` form; `to_ws_url` translates either
    /// into something dialable.
    pub async fn create_transaction(
        &self,
        modeluri: &ModelUri,
        client_id: &str,
    ) -> Result<String> {
        let reply = self
            .post("/transaction", Some(modeluri), json!({ "data": client_id }))
            .await?;
        reply
            .pointer("/data/uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GateError::protocol(format!(
                    "transaction endpoint missing in upstream reply: {reply}"
                ))
            })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        modeluri: Option<&ModelUri>,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.config.http_base(), path);
        let mut request = self.http.request(method.clone(), &url);
        let mut query: Vec<(&str, String)> = vec![("format", FORMAT.to_string())];
        if let Some(uri) = modeluri {
            query.push(("modeluri", uri.to_string()));
        }
        request = request.query(&query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        tracing::debug!(method = %method, url = %url, "Upstream request");
        let response = request
            .send()
            .await
            .map_err(|e| GateError::network(format!("upstream request to {url} failed: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GateError::network(format!("upstream response read failed: {e}")))?;
        if !status.is_success() {
            return Err(GateError::upstream(
                status.as_u16(),
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            GateError::protocol(format!("upstream returned non-JSON body ({status}): {e}"))
        })
    }
}

/// Translate a transaction URI into a dialable WebSocket URL
pub(crate) fn to_ws_url(uri: &str) -> Result<String> {
    let mut url = Url::parse(uri)?;
    match url.scheme() {
        "ws" | "wss" => {}
        "http" => url
            .set_scheme("ws")
            .map_err(|_| GateError::invalid(format!("cannot derive ws URL from {uri}")))?,
        "https" => url
            .set_scheme("wss")
            .map_err(|_| GateError::invalid(format!("cannot derive ws URL from {uri}")))?,
        other => {
            return Err(GateError::invalid(format!(
                "unsupported transaction URI scheme {other}: {uri}"
            )))
        }
    }
    Ok(url.to_string())
}

impl UpstreamClient {
    /// Translate a transaction URI handed out by upstream into a dialable
    /// WebSocket URL
    pub fn to_ws_url(&self, uri: &str) -> Result<String> {
        to_ws_url(uri)
    }
}
